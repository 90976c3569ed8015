//! Session lifecycle and stream relay
//!
//! The manager owns the one active session per utterance: it opens the
//! backend stream with retry, relays chunks onto the bus, settles the
//! Processing -> Idle request exactly once per session, and guarantees
//! that no session is left open when the mode returns to Idle.

mod manager;
mod session;

pub use manager::{SessionManager, SessionWorkOwner};
pub use session::{ChunkKind, Session, SessionState};
