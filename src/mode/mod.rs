//! Mode ownership and transitions
//!
//! The controller is the single owner of the current mode. Every change
//! goes through `request_transition` under one mutual-exclusion section,
//! and the resulting `ModeChanged` bus event is the only authoritative
//! notice other components may react to.

mod controller;
mod record;

pub use controller::ModeController;
pub use record::{Mode, TransitionKind, TransitionRecord, TransitionRequest};
