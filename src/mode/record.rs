//! Mode, transition requests, and the transition history record

use std::time::{Duration, Instant};

/// The three mutually exclusive operating modes of the assistant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Waiting for the user; no work in flight.
    Idle,
    /// Microphone capture and recognition are active.
    Listening,
    /// A backend session is streaming a response.
    Processing,
}

impl Default for Mode {
    fn default() -> Self {
        Self::Idle
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Idle => write!(f, "Idle"),
            Mode::Listening => write!(f, "Listening"),
            Mode::Processing => write!(f, "Processing"),
        }
    }
}

/// How a transition came about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    /// An ordinary request from a collaborator.
    Requested,
    /// Forced by an accepted interrupt.
    Interrupt,
    /// Forced by the processing watchdog.
    Timeout,
}

/// A request for a mode change. Consumed exactly once by the controller.
#[derive(Debug, Clone)]
pub struct TransitionRequest {
    pub target: Mode,
    pub source: String,
    pub session_id: Option<String>,
    /// Carried for upstream arbitration; the controller itself does not
    /// prioritize, requests queue behind its lock in arrival order.
    pub priority: Option<u8>,
    pub kind: TransitionKind,
}

impl TransitionRequest {
    pub fn new(target: Mode, source: impl Into<String>) -> Self {
        Self {
            target,
            source: source.into(),
            session_id: None,
            priority: None,
            kind: TransitionKind::Requested,
        }
    }

    /// An interrupt-driven request back to Idle.
    pub fn interrupt(source: impl Into<String>) -> Self {
        Self {
            kind: TransitionKind::Interrupt,
            ..Self::new(Mode::Idle, source)
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// One entry in the in-memory transition log. Appended on every
/// successful transition, never removed during the process lifetime.
#[derive(Debug, Clone)]
pub struct TransitionRecord {
    pub from: Mode,
    pub to: Mode,
    pub kind: TransitionKind,
    pub at: Instant,
    /// Time spent in `from` before this transition.
    pub dwell: Duration,
}
