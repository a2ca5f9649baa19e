//! `daq-core`
//!
//! Core trait definitions and shared value types for beamline detector control.
//!
//! This crate defines the boundary between the collection-strategy engine and the
//! hardware it drives. Everything that talks to a real device (channel access,
//! vendor SDKs, the timing-frame generator's server) lives behind the traits in
//! [`capabilities`]; everything in this crate is hardware-agnostic.
//!
//! ## Key Types
//!
//! - [`capabilities::AreaDetector`]: acquire time/period, trigger and image mode,
//!   image count, polled detector state, start/stop
//! - [`capabilities::TimingGenerator`]: cyclic frame program, arm, continue, cycle readback
//! - [`capabilities::ShutterChannel`]: open/close value writes
//! - [`capabilities::SummationPlugin`]: frame-accumulation filter control
//! - [`capabilities::UsageMonitor`]: camera duty-cycle updates
//! - [`capabilities::Movable`]: scan axes moved between points
//! - [`error::DaqError`]: application error type with structured driver errors

pub mod capabilities;
pub mod error;
pub mod limits;

// Re-export commonly used types
pub use anyhow::{anyhow, Result};
pub use capabilities::{
    AreaDetector, DetectorState, FilterType, FrameDescriptor, GeneratorStatus, ImageMode,
    Movable, ShutterChannel, SummationPlugin, TimingGenerator, UsageMonitor,
};
pub use error::{AppResult, DaqError, DriverError, DriverErrorKind};
