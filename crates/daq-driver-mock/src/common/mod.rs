//! Shared infrastructure for the mock devices.
//!
//! - **errors**: scripted and random fault injection
//! - **events**: cross-device timestamped action log
//! - **rng**: seeded random number generator
//! - **timing**: hardware-like delays

pub mod errors;
pub mod events;
pub mod rng;
pub mod timing;

pub use errors::{ErrorConfig, ErrorScenario};
pub use events::{Event, EventLog};
pub use rng::MockRng;
pub use timing::TimingConfig;
