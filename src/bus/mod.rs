//! Event bus: the sole communication path between components
//!
//! Topics and payloads are closed enums, so subscribers get exhaustiveness
//! checking at compile time while dispatch stays dynamic at runtime.

mod broker;
mod event;

pub use broker::{EventBus, Subscription};
pub use event::{BusEvent, Payload, Topic};
