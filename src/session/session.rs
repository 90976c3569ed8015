//! Session records and chunk payloads

use std::time::Instant;

/// Lifecycle state of one streaming exchange. Moves from `Open` to one
/// of the terminal states, never backward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    /// The stream ended or playback finished.
    Closed,
    /// An interrupt, timeout, or transport failure stopped the session.
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Cancelled)
    }
}

/// One streaming exchange with the backend, keyed by
/// (hardware id, session id). Owned by the session manager; other
/// components refer to it by id only.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub hardware_id: String,
    pub state: SessionState,
    pub created_at: Instant,
}

impl Session {
    pub fn open(id: impl Into<String>, hardware_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            hardware_id: hardware_id.into(),
            state: SessionState::Open,
            created_at: Instant::now(),
        }
    }
}

/// An incremental response chunk as republished on the bus.
#[derive(Debug, Clone)]
pub enum ChunkKind {
    Text(String),
    Audio(Vec<u8>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_is_not_terminal() {
        let session = Session::open("s1", "hw-1");
        assert_eq!(session.state, SessionState::Open);
        assert!(!session.state.is_terminal());
        assert!(SessionState::Closed.is_terminal());
        assert!(SessionState::Cancelled.is_terminal());
    }
}
