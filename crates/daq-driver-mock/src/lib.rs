//! Mock Hardware Drivers for beamline detector control
//!
//! This crate provides simulated collaborators for exercising collection
//! strategies without physical hardware. All mock devices use async-safe
//! timing (`tokio::time::sleep`, never `std::thread::sleep`), so tests can run
//! them under a paused clock.
//!
//! # Available Mock Drivers
//!
//! - [`MockDetector`] - Area detector with internal and external triggering
//! - [`MockTimingGenerator`] - Cyclic frame generator with pause frames
//! - [`MockShutter`] - Shutter channel that records every write
//! - [`MockSummationPlugin`] - Frame-summation plugin with optional drain lag
//! - [`MockUsageMonitor`] - Camera usage readback driven by the test
//! - [`MockStage`] - Scan axis with travel and settle delays
//!
//! # Wiring
//!
//! ```rust,ignore
//! use daq_driver_mock::{EventLog, MockDetector, MockTimingGenerator};
//! use std::sync::Arc;
//!
//! let log = EventLog::new();
//! let detector = Arc::new(MockDetector::builder("pilatus").event_log(log.clone()).build());
//! let tfg = MockTimingGenerator::builder("tfg")
//!     .target(detector.clone())
//!     .event_log(log.clone())
//!     .build();
//! ```
//!
//! Devices that share an [`EventLog`] produce one timeline, which is how tests
//! assert ordering across devices.

pub mod common;
mod mock_detector;
mod mock_shutter;
mod mock_stage;
mod mock_summation;
mod mock_timing_generator;
mod mock_usage;

// Re-export common types
pub use common::{ErrorConfig, ErrorScenario, Event, EventLog, MockRng, TimingConfig};

// Re-export driver types
pub use mock_detector::{MockDetector, MockDetectorBuilder, TriggerInput};
pub use mock_shutter::MockShutter;
pub use mock_stage::MockStage;
pub use mock_summation::MockSummationPlugin;
pub use mock_timing_generator::{MockTimingGenerator, MockTimingGeneratorBuilder};
pub use mock_usage::MockUsageMonitor;
