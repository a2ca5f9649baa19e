//! # Beamline DAQ
//!
//! Detector collection strategies and step-scan orchestration for
//! synchrotron beamlines.
//!
//! ## Crate Structure
//!
//! - **`daq_core`**: Capability traits for detectors, timing generators,
//!   shutters, summation plugins, usage monitors and scan axes.
//! - **`daq_collection`**: The collection-strategy engine: lifecycle
//!   contract, busy-poll engine, decorators and hardware sequencing.
//! - **`daq_experiment`**: The step-scan `RunEngine`.
//! - **`config`**: Figment-based loading of the beamline TOML file.
//! - **`logging`**: Tracing subscriber initialisation.
//! - **`engine`**: Builds a `RunEngine` from configuration and device handles.
//!
//! ## Example
//!
//! ```rust,ignore
//! let config = BeamlineConfig::load()?;
//! logging::init_from_config(&config)?;
//!
//! let mut engine = engine::assemble(&config, hardware).await?;
//! let summary = engine.run(&StepScan::count(Duration::from_secs(1), 10)).await?;
//! ```

pub mod config;
pub mod engine;
pub mod logging;

pub use config::{ApplicationConfig, BeamlineConfig, DetectorDefinition};
pub use daq_collection;
pub use daq_core;
pub use daq_experiment;
pub use logging::{OutputFormat, TracingConfig};
