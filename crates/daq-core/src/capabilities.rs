//! Hardware Collaborator Capabilities
//!
//! This module defines the traits the collection-strategy engine consumes. Each
//! trait covers exactly one piece of beamline hardware:
//!
//! - An area detector implements [`AreaDetector`]
//! - A timing-frame generator implements [`TimingGenerator`]
//! - A fast shutter implements [`ShutterChannel`]
//! - A frame-summation plugin implements [`SummationPlugin`]
//! - A camera duty-cycle readback implements [`UsageMonitor`]
//! - A scan axis implements [`Movable`]
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Uses anyhow::Result for errors
//! - Exposes raw register semantics, never strategy decisions
//!
//! Strategies own at most one handle of each kind at a time and must not cache
//! readbacks across points; every getter here goes to the device.
//!
//! # Example
//!
//! ```rust,ignore
//! async fn single_exposure<D: AreaDetector>(det: &D, seconds: f64) -> Result<()> {
//!     det.set_image_mode(ImageMode::Single).await?;
//!     det.set_acquire_time(seconds).await?;
//!     det.start_acquiring().await?;
//!     while det.detector_state().await?.is_busy() {
//!         tokio::time::sleep(Duration::from_millis(50)).await;
//!     }
//!     Ok(())
//! }
//! ```

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::broadcast;

// =============================================================================
// Detector value types
// =============================================================================

/// Image mode register of an area detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageMode {
    /// Acquire exactly one image per start
    #[default]
    Single,
    /// Acquire `num_images` images per start
    Multiple,
    /// Acquire until stopped
    Continuous,
}

impl ImageMode {
    /// Register code used by areaDetector-style drivers.
    pub fn code(self) -> i32 {
        match self {
            ImageMode::Single => 0,
            ImageMode::Multiple => 1,
            ImageMode::Continuous => 2,
        }
    }
}

/// Polled detector-state register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DetectorState {
    #[default]
    Idle,
    Acquire,
    Readout,
    Correct,
    Saving,
    Aborting,
    Error,
    Waiting,
    Initializing,
    Disconnected,
    Aborted,
}

impl DetectorState {
    /// True while the detector is still working on an acquisition.
    pub fn is_busy(self) -> bool {
        matches!(
            self,
            DetectorState::Acquire
                | DetectorState::Readout
                | DetectorState::Correct
                | DetectorState::Saving
                | DetectorState::Aborting
                | DetectorState::Waiting
                | DetectorState::Initializing
        )
    }

    /// True when the register reports a condition no acquisition can recover from.
    pub fn is_fault(self) -> bool {
        matches!(self, DetectorState::Error | DetectorState::Disconnected)
    }
}

impl std::fmt::Display for DetectorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DetectorState::Idle => "idle",
            DetectorState::Acquire => "acquire",
            DetectorState::Readout => "readout",
            DetectorState::Correct => "correct",
            DetectorState::Saving => "saving",
            DetectorState::Aborting => "aborting",
            DetectorState::Error => "error",
            DetectorState::Waiting => "waiting",
            DetectorState::Initializing => "initializing",
            DetectorState::Disconnected => "disconnected",
            DetectorState::Aborted => "aborted",
        };
        write!(f, "{}", label)
    }
}

// =============================================================================
// Timing generator value types
// =============================================================================

/// Run state reported by a timing-frame generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GeneratorStatus {
    /// Not armed; frames may be reprogrammed
    #[default]
    Idle,
    /// Armed, waiting for an external start
    Armed,
    /// Clocking out frames
    Running,
    /// Holding at a pause frame until `cont()`
    Paused,
}

impl std::fmt::Display for GeneratorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            GeneratorStatus::Idle => "idle",
            GeneratorStatus::Armed => "armed",
            GeneratorStatus::Running => "running",
            GeneratorStatus::Paused => "paused",
        };
        write!(f, "{}", label)
    }
}

/// One entry of a timing-frame program.
///
/// A frame drives `output_pattern` on the digital outputs for `duration`,
/// `repeat` times in a row. When `input_gate` is set the generator holds at the
/// start of the frame until that input (or a software `cont()`) releases it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameDescriptor {
    pub duration: Duration,
    pub output_pattern: u8,
    pub input_gate: Option<u8>,
    pub repeat: u32,
}

impl FrameDescriptor {
    /// A frame that waits on `gate` before driving `output_pattern`.
    pub fn gated(duration: Duration, output_pattern: u8, gate: u8) -> Self {
        Self {
            duration,
            output_pattern,
            input_gate: Some(gate),
            repeat: 1,
        }
    }

    /// A free-running frame.
    pub fn free(duration: Duration, output_pattern: u8) -> Self {
        Self {
            duration,
            output_pattern,
            input_gate: None,
            repeat: 1,
        }
    }

    /// Total time this descriptor occupies once released.
    pub fn span(&self) -> Duration {
        self.duration * self.repeat
    }
}

// =============================================================================
// Summation plugin value types
// =============================================================================

/// Filter applied by a frame-processing plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterType {
    #[default]
    Sum,
    Average,
    RecursiveAverage,
}

// =============================================================================
// Capability traits
// =============================================================================

/// Capability: Area Detector Control
///
/// The register-level handle of a camera or pixel detector.
///
/// # Contract
/// - Times are in seconds
/// - Trigger mode is a vendor-specific code; strategies get it from configuration
/// - `detector_state()` is a polled register: no push notification exists
/// - `start_acquiring()` returns once the start was accepted, not when images are done
#[async_trait]
pub trait AreaDetector: Send + Sync {
    /// Device name used in logs and error messages
    fn name(&self) -> &str;

    async fn set_acquire_time(&self, seconds: f64) -> Result<()>;
    async fn acquire_time(&self) -> Result<f64>;

    async fn set_acquire_period(&self, seconds: f64) -> Result<()>;
    async fn acquire_period(&self) -> Result<f64>;

    async fn set_trigger_mode(&self, code: i32) -> Result<()>;
    async fn trigger_mode(&self) -> Result<i32>;

    async fn set_image_mode(&self, mode: ImageMode) -> Result<()>;
    async fn image_mode(&self) -> Result<ImageMode>;

    async fn set_num_images(&self, count: u32) -> Result<()>;
    async fn num_images(&self) -> Result<u32>;

    /// Read the detector-state register
    async fn detector_state(&self) -> Result<DetectorState>;

    /// Images acquired since the last `start_acquiring()` (array counter readback)
    async fn images_acquired(&self) -> Result<u64>;

    /// Start acquisition with the currently programmed settings
    async fn start_acquiring(&self) -> Result<()>;

    /// Stop acquisition
    ///
    /// Must be safe to call when the detector is already idle.
    async fn stop_acquiring(&self) -> Result<()>;
}

/// Capability: Timing-Frame Generation
///
/// An independently clocked generator that plays a cyclic list of frames on its
/// digital outputs. Once armed it advances on its own; the orchestration task
/// only releases pause frames with `cont()`.
///
/// # Contract
/// - Frames are staged with `clear_frames`/`add_frame` and committed by `load_program`
/// - `set_cycle_count` applies to the next `load_program`
/// - `completed_cycles()` counts whole program cycles since `start()`
/// - `cont()` while the generator is not paused is silently ignored by real
///   hardware, which is why callers must confirm the pause first
#[async_trait]
pub trait TimingGenerator: Send + Sync {
    /// Device name used in logs and error messages
    fn name(&self) -> &str;

    async fn clear_frames(&self) -> Result<()>;
    async fn add_frame(&self, frame: FrameDescriptor) -> Result<()>;
    async fn set_cycle_count(&self, cycles: u32) -> Result<()>;
    async fn load_program(&self) -> Result<()>;

    /// Arm the loaded program
    async fn start(&self) -> Result<()>;

    async fn status(&self) -> Result<GeneratorStatus>;

    /// Number of program cycles completed since `start()`
    async fn completed_cycles(&self) -> Result<u32>;

    /// Release the current pause frame
    async fn cont(&self) -> Result<()>;

    /// Abort the program and return to idle
    async fn stop(&self) -> Result<()>;
}

/// Capability: Shutter Channel
///
/// A single writable channel whose value opens or closes a beam shutter. The
/// open and close values are site configuration, not part of this trait.
#[async_trait]
pub trait ShutterChannel: Send + Sync {
    /// Device name used in logs and error messages
    fn name(&self) -> &str;

    async fn write(&self, value: f64) -> Result<()>;
    async fn read(&self) -> Result<f64>;
}

/// Capability: Frame Summation
///
/// A processing plugin that accumulates `num_filter` incoming frames into one
/// output frame.
///
/// # Contract
/// - `reset_filter()` requests a reset; `reset_pending()` stays true until the
///   plugin has processed it
/// - `num_filtered()` counts frames accumulated since the last reset
/// - Auto-reset must not be trusted immediately after `num_filter` changes
#[async_trait]
pub trait SummationPlugin: Send + Sync {
    /// Device name used in logs and error messages
    fn name(&self) -> &str;

    async fn set_filter_type(&self, filter: FilterType) -> Result<()>;
    async fn set_num_filter(&self, count: u32) -> Result<()>;
    async fn num_filter(&self) -> Result<u32>;
    async fn set_enabled(&self, enabled: bool) -> Result<()>;
    async fn enabled(&self) -> Result<bool>;
    async fn set_auto_reset(&self, enabled: bool) -> Result<()>;
    async fn reset_filter(&self) -> Result<()>;
    async fn reset_pending(&self) -> Result<bool>;
    async fn num_filtered(&self) -> Result<u32>;
}

/// Capability: Camera Usage Monitoring
///
/// Publishes a duty-cycle style metric in percent (0.0–100.0), for example the
/// fill level of a camera's on-board RAM.
#[async_trait]
pub trait UsageMonitor: Send + Sync {
    /// Device name used in logs and error messages
    fn name(&self) -> &str;

    /// Read the current value once
    async fn current_usage(&self) -> Result<f64>;

    /// Subscribe to value updates as the device publishes them
    fn subscribe(&self) -> broadcast::Receiver<f64>;
}

/// Capability: Motion Control
///
/// A scan axis positioned between points. The scan driver moves, then waits
/// for the axis to settle before the next `collect_data`.
#[async_trait]
pub trait Movable: Send + Sync {
    /// Device name used in logs and error messages
    fn name(&self) -> &str;

    /// Move to an absolute position in device-native units
    async fn move_abs(&self, position: f64) -> Result<()>;

    /// Current position; approximate while moving
    async fn position(&self) -> Result<f64>;

    /// Block until motion has settled
    async fn wait_settled(&self) -> Result<()>;
}
