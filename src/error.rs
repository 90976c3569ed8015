//! Error types for the orchestration core
//!
//! Nothing here is fatal to the process: invalid transitions are rejected
//! locally, stream failures retry and then force a return to Idle, and
//! cancellation failures are logged without blocking recovery.

use thiserror::Error;

use crate::mode::Mode;

/// Errors from the mode controller.
#[derive(Debug, Error)]
pub enum ModeError {
    /// The requested transition is not in the allowed table.
    #[error("invalid transition {from} -> {to}")]
    InvalidTransition { from: Mode, to: Mode },
}

/// Errors from the backend streaming client.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("backend frame codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// A frame exceeded the wire protocol's size cap.
    #[error("frame too large: {len} bytes")]
    FrameTooLarge { len: usize },

    /// The connection closed before a terminal frame arrived.
    #[error("backend connection closed unexpectedly")]
    Closed,

    /// The backend reported an error for the session.
    #[error("backend error: {0}")]
    Remote(String),
}

/// Errors from the session manager.
#[derive(Debug, Error)]
pub enum SessionError {
    /// All open attempts failed; the caller should surface this and
    /// request Idle directly.
    #[error("failed to open session after {attempts} attempts")]
    OpenExhausted {
        attempts: u32,
        #[source]
        last: BackendError,
    },

    /// A session is already streaming; one utterance at a time.
    #[error("session {id} is already active")]
    AlreadyActive { id: String },
}
