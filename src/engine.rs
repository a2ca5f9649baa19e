//! Assemble a [`RunEngine`] from configuration and live device handles.

use crate::config::BeamlineConfig;
use daq_collection::{build_strategy, StrategyHardware};
use daq_core::error::DaqError;
use daq_experiment::RunEngine;
use std::collections::HashMap;
use tracing::{debug, info};

/// Build every enabled detector's strategy and attach it to a new engine.
///
/// `hardware` maps detector IDs to their device handles. Strategies are
/// built with the engine's abort signal, so `EngineHandle::abort` reaches
/// every blocking point.
pub async fn assemble(
    config: &BeamlineConfig,
    mut hardware: HashMap<String, StrategyHardware>,
) -> Result<RunEngine, DaqError> {
    let mut engine = RunEngine::new();
    for definition in config.enabled_detectors() {
        let devices = hardware.remove(&definition.id).ok_or_else(|| {
            DaqError::Configuration(format!(
                "no device handles for detector '{}' (needs {})",
                definition.id,
                definition.strategy.required_devices().join(", ")
            ))
        })?;
        let strategy = build_strategy(&definition.strategy, devices, engine.interrupt()).await?;
        debug!(detector = %definition.id, strategy = %strategy.name(), "strategy built");
        engine.add_detector(strategy);
    }
    if !hardware.is_empty() {
        let mut unused: Vec<_> = hardware.into_keys().collect();
        unused.sort();
        debug!(?unused, "device handles without an enabled detector");
    }
    info!(detectors = engine.detectors().len(), "run engine assembled");
    Ok(engine)
}
