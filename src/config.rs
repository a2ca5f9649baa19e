//! Beamline configuration using Figment
//!
//! Configuration is loaded from:
//! 1. `config/beamline.toml` (or an explicit path)
//! 2. Environment variables prefixed with `BEAMLINE_DAQ_`, nested keys
//!    separated by `__` (e.g. `BEAMLINE_DAQ_APPLICATION__LOG_LEVEL=debug`)
//!
//! # Example
//!
//! ```toml
//! [application]
//! name = "I22 SAXS"
//! log_level = "info"
//!
//! [[detectors]]
//! id = "pilatus"
//!
//! [detectors.strategy]
//! type = "timing_generator"
//! ready_timeout = "10s"
//!
//! [[detectors]]
//! id = "sample_cam"
//! enabled = false
//!
//! [detectors.strategy]
//! type = "software"
//! ```

use crate::logging::OutputFormat;
use daq_collection::StrategyConfig;
use daq_core::error::{AppResult, DaqError};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/beamline.toml";

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "BEAMLINE_DAQ_";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Top-level beamline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeamlineConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Detector strategy definitions
    #[serde(default)]
    pub detectors: Vec<DetectorDefinition>,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format
    #[serde(default)]
    pub log_format: OutputFormat,
}

/// One detector and the strategy that drives it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorDefinition {
    /// Unique detector identifier, used to look up its device handles
    pub id: String,
    /// Disabled detectors are skipped when the engine is assembled
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub strategy: StrategyConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_enabled() -> bool {
    true
}

impl BeamlineConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file and the environment, then validate.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| DaqError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that need no hardware.
    pub fn validate(&self) -> AppResult<()> {
        if !LOG_LEVELS.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                LOG_LEVELS.join(", ")
            )));
        }

        let mut ids = HashSet::new();
        for detector in &self.detectors {
            if !ids.insert(detector.id.as_str()) {
                return Err(DaqError::Configuration(format!(
                    "Duplicate detector ID: {}",
                    detector.id
                )));
            }
            detector.strategy.validate().map_err(|e| {
                DaqError::Configuration(format!("detector '{}': {e}", detector.id))
            })?;
        }
        Ok(())
    }

    /// Detectors that take part in scans.
    pub fn enabled_detectors(&self) -> impl Iterator<Item = &DetectorDefinition> {
        self.detectors.iter().filter(|d| d.enabled)
    }
}
