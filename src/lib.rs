//! aria-daemon: mode orchestration for the Aria voice assistant
//!
//! The daemon coordinates the mutually exclusive operating modes
//! (Idle, Listening, Processing) across concurrent producers: input
//! capture, recognition, the streaming backend, and playback. Exactly
//! one mode transition is ever in flight, stale work is cancelled when
//! interrupted, and a failed or silent backend stream always degrades
//! back to Idle.
//!
//! Components only talk through the [`bus`]; the [`mode`] controller is
//! the single source of truth for the current mode.

pub mod backend;
pub mod bus;
pub mod cancel;
pub mod config;
pub mod error;
pub mod interrupt;
pub mod lifecycle;
pub mod mode;
pub mod session;
