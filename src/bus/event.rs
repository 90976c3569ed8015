//! Typed event definitions for the bus

use std::time::Instant;

use crate::interrupt::InterruptRequest;
use crate::mode::{Mode, TransitionRequest};
use crate::session::ChunkKind;

/// The closed set of topics carried by the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Requests for a mode change; consumed by the mode controller.
    ModeRequest,
    /// The authoritative mode-change notice; produced only by the
    /// mode controller.
    ModeChanged,
    /// Pre-emption requests; consumed by the interrupt coordinator.
    InterruptRequest,
    SessionStarted,
    SessionChunk,
    SessionCompleted,
    SessionFailed,
}

/// Payloads, one variant family per topic.
#[derive(Debug, Clone)]
pub enum Payload {
    ModeRequest(TransitionRequest),
    ModeChanged { mode: Mode },
    InterruptRequest(InterruptRequest),
    SessionStarted { session_id: String },
    SessionChunk { session_id: String, chunk: ChunkKind },
    SessionCompleted { session_id: String },
    SessionFailed { session_id: String, message: String },
}

impl Payload {
    /// The topic this payload is published under.
    pub fn topic(&self) -> Topic {
        match self {
            Payload::ModeRequest(_) => Topic::ModeRequest,
            Payload::ModeChanged { .. } => Topic::ModeChanged,
            Payload::InterruptRequest(_) => Topic::InterruptRequest,
            Payload::SessionStarted { .. } => Topic::SessionStarted,
            Payload::SessionChunk { .. } => Topic::SessionChunk,
            Payload::SessionCompleted { .. } => Topic::SessionCompleted,
            Payload::SessionFailed { .. } => Topic::SessionFailed,
        }
    }
}

/// An event as delivered to subscribers. Immutable once published;
/// dropped after dispatch, never persisted.
#[derive(Debug, Clone)]
pub struct BusEvent {
    pub payload: Payload,
    pub at: Instant,
}

impl BusEvent {
    pub fn new(payload: Payload) -> Self {
        Self {
            payload,
            at: Instant::now(),
        }
    }
}
