//! Scan orchestration for detector collection strategies.
//!
//! - [`plans`] - Step-scan plans: axes, positions and scan shape
//! - [`run_engine`] - The [`RunEngine`] that drives strategies through a scan

pub mod plans;
pub mod run_engine;

pub use plans::{ScanAxis, StepScan};
pub use run_engine::{EngineHandle, EngineState, Phase, RunEngine, ScanError, ScanSummary};
