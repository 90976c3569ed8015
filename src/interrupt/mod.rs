//! Interrupt arbitration
//!
//! Competing interrupts from any source are resolved deterministically by
//! (priority, arrival time); the winner cancels the active mode's work and
//! requests Idle, losers are suppressed without error.

mod coordinator;

pub use coordinator::{
    InterruptCoordinator, InterruptKind, InterruptRequest, Outcome, WorkOwner,
};
