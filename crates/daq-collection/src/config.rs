//! Declarative strategy definitions.
//!
//! A detector's strategy is described in configuration (usually a
//! `[[detectors]]` table in the beamline TOML file) and built against live
//! device handles with [`build_strategy`].
//!
//! ```toml
//! [strategy]
//! type = "accumulation"
//! exposure_time = "1s"
//!
//! [strategy.poll]
//! interval = "20ms"
//! ceiling = "5s"
//! on_ceiling = "warn"
//!
//! [[strategy.decorators]]
//! type = "usage_throttle"
//! upper = 90.0
//! lower = 25.0
//! ```

use crate::decorator::DecoratorChain;
use crate::detector::{DetectorStrategy, Variant};
use crate::error::{CollectionError, Result};
use crate::hooks::VendorHooks;
use crate::poll::{BusyPoller, CeilingPolicy, Interrupt};
use crate::shutter::ShutterSettings;
use crate::strategy::CollectionStrategy;
use crate::throttle::{ThrottleThresholds, UsageThrottle};
use crate::timing::TimingSettings;
use daq_core::capabilities::{
    AreaDetector, ShutterChannel, SummationPlugin, TimingGenerator, UsageMonitor,
};
use daq_core::limits::{
    validate_poll_interval, DEFAULT_POLL_INTERVAL, DEFAULT_TIMEOUT_MULTIPLIER,
    DEFAULT_TIMEOUT_OFFSET,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Polling
// =============================================================================

/// Ceiling that grows with the collection time: `t * multiplier + offset`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutScaling {
    pub multiplier: f64,
    #[serde(with = "humantime_serde")]
    pub offset: Duration,
}

impl Default for TimeoutScaling {
    fn default() -> Self {
        Self {
            multiplier: DEFAULT_TIMEOUT_MULTIPLIER,
            offset: DEFAULT_TIMEOUT_OFFSET,
        }
    }
}

impl TimeoutScaling {
    pub fn ceiling_for(&self, collection_time: Duration) -> Duration {
        collection_time.mul_f64(self.multiplier) + self.offset
    }
}

/// How a strategy waits for the end of a point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Sleep between status reads, 10..=100 ms
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Fixed ceiling; takes precedence over `scaling`
    #[serde(with = "humantime_serde")]
    pub ceiling: Option<Duration>,
    /// Ceiling derived from the collection time when no fixed one is set
    pub scaling: Option<TimeoutScaling>,
    pub on_ceiling: CeilingPolicy,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            ceiling: None,
            scaling: Some(TimeoutScaling::default()),
            on_ceiling: CeilingPolicy::Warn,
        }
    }
}

impl PollConfig {
    /// Poll with a fixed ceiling.
    pub fn with_ceiling(interval: Duration, ceiling: Duration, policy: CeilingPolicy) -> Self {
        Self {
            interval,
            ceiling: Some(ceiling),
            scaling: None,
            on_ceiling: policy,
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_poll_interval(self.interval)
            .map_err(|e| CollectionError::Configuration(e.to_string()))?;
        if let Some(scaling) = &self.scaling {
            if !scaling.multiplier.is_finite() || scaling.multiplier < 0.0 {
                return Err(CollectionError::Configuration(format!(
                    "timeout multiplier {} must be a non-negative number",
                    scaling.multiplier
                )));
            }
        }
        Ok(())
    }

    /// Effective ceiling for one collection.
    pub fn ceiling_for(&self, collection_time: Duration) -> Option<Duration> {
        self.ceiling
            .or_else(|| self.scaling.map(|s| s.ceiling_for(collection_time)))
    }

    pub fn poller_for(&self, collection_time: Duration) -> Result<BusyPoller> {
        self.validate()?;
        Ok(BusyPoller::new(self.interval)?
            .with_ceiling(self.ceiling_for(collection_time))
            .with_policy(self.on_ceiling))
    }
}

// =============================================================================
// Strategy definitions
// =============================================================================

/// Triggering variant and its variant-specific settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StrategyKind {
    Software,
    HardwareTriggered,
    TimingGenerator(TimingSettings),
    Shutter(ShutterSettings),
    Accumulation {
        #[serde(with = "humantime_serde")]
        exposure_time: Duration,
    },
}

/// One decorator layer, innermost first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DecoratorConfig {
    ImageMultiplier {
        factor: u32,
    },
    AcquireTimeExtension {
        #[serde(with = "humantime_serde")]
        extension: Duration,
    },
    UsageThrottle {
        #[serde(default = "default_upper")]
        upper: f64,
        #[serde(default = "default_lower")]
        lower: f64,
    },
}

fn default_upper() -> f64 {
    ThrottleThresholds::default().upper
}

fn default_lower() -> f64 {
    ThrottleThresholds::default().lower
}

/// Complete description of a detector's collection strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    #[serde(flatten)]
    pub kind: StrategyKind,
    #[serde(default)]
    pub hooks: VendorHooks,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub decorators: Vec<DecoratorConfig>,
}

impl StrategyConfig {
    pub fn new(kind: StrategyKind) -> Self {
        Self {
            kind,
            hooks: VendorHooks::default(),
            poll: PollConfig::default(),
            decorators: Vec::new(),
        }
    }

    /// Checks that need no hardware.
    pub fn validate(&self) -> Result<()> {
        self.poll.validate()?;
        if let StrategyKind::Accumulation { exposure_time } = &self.kind {
            if exposure_time.is_zero() {
                return Err(CollectionError::Configuration(
                    "accumulation exposure_time must be positive".into(),
                ));
            }
            self.hooks.check_exposure(*exposure_time)?;
        }
        for decorator in &self.decorators {
            match decorator {
                DecoratorConfig::ImageMultiplier { factor } if *factor == 0 => {
                    return Err(CollectionError::Configuration(
                        "image multiplier factor must be at least 1".into(),
                    ));
                }
                DecoratorConfig::UsageThrottle { upper, lower } => {
                    ThrottleThresholds {
                        upper: *upper,
                        lower: *lower,
                    }
                    .validate()?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Device handles this definition cannot be built without.
    pub fn required_devices(&self) -> Vec<&'static str> {
        let mut devices = vec!["detector"];
        match self.kind {
            StrategyKind::TimingGenerator(_) => devices.push("timing_generator"),
            StrategyKind::Shutter(_) => devices.push("shutter"),
            StrategyKind::Accumulation { .. } => devices.push("summation"),
            StrategyKind::Software | StrategyKind::HardwareTriggered => {}
        }
        if self
            .decorators
            .iter()
            .any(|d| matches!(d, DecoratorConfig::UsageThrottle { .. }))
        {
            devices.push("usage_monitor");
        }
        devices
    }
}

/// Device handles a strategy may need.
#[derive(Clone)]
pub struct StrategyHardware {
    pub detector: Arc<dyn AreaDetector>,
    pub timing_generator: Option<Arc<dyn TimingGenerator>>,
    pub shutter: Option<Arc<dyn ShutterChannel>>,
    pub summation: Option<Arc<dyn SummationPlugin>>,
    pub usage_monitor: Option<Arc<dyn UsageMonitor>>,
}

impl StrategyHardware {
    pub fn new(detector: Arc<dyn AreaDetector>) -> Self {
        Self {
            detector,
            timing_generator: None,
            shutter: None,
            summation: None,
            usage_monitor: None,
        }
    }

    pub fn with_timing_generator(mut self, generator: Arc<dyn TimingGenerator>) -> Self {
        self.timing_generator = Some(generator);
        self
    }

    pub fn with_shutter(mut self, shutter: Arc<dyn ShutterChannel>) -> Self {
        self.shutter = Some(shutter);
        self
    }

    pub fn with_summation(mut self, plugin: Arc<dyn SummationPlugin>) -> Self {
        self.summation = Some(plugin);
        self
    }

    pub fn with_usage_monitor(mut self, monitor: Arc<dyn UsageMonitor>) -> Self {
        self.usage_monitor = Some(monitor);
        self
    }
}

fn missing(device: &str, kind: &str) -> CollectionError {
    CollectionError::Configuration(format!("{kind} strategy needs a {device} handle"))
}

/// Build the base strategy and its decorator chain.
pub async fn build_strategy(
    config: &StrategyConfig,
    hardware: StrategyHardware,
    interrupt: Interrupt,
) -> Result<Box<dyn CollectionStrategy>> {
    config.validate()?;

    let variant = match &config.kind {
        StrategyKind::Software => Variant::Software,
        StrategyKind::HardwareTriggered => Variant::HardwareTriggered,
        StrategyKind::TimingGenerator(settings) => {
            let generator = hardware
                .timing_generator
                .clone()
                .ok_or_else(|| missing("timing generator", "timing_generator"))?;
            Variant::timing_generator(generator, *settings)
        }
        StrategyKind::Shutter(settings) => {
            let shutter = hardware
                .shutter
                .clone()
                .ok_or_else(|| missing("shutter", "shutter"))?;
            Variant::shutter(shutter, *settings)
        }
        StrategyKind::Accumulation { exposure_time } => {
            let plugin = hardware
                .summation
                .clone()
                .ok_or_else(|| missing("summation plugin", "accumulation"))?;
            Variant::accumulation(plugin, *exposure_time)
        }
    };

    let base = DetectorStrategy::new(Arc::clone(&hardware.detector), variant)
        .with_hooks(config.hooks.clone())
        .with_poll(config.poll.clone())
        .with_interrupt(interrupt.clone());

    let mut chain = DecoratorChain::new(Box::new(base));
    for decorator in &config.decorators {
        chain = match decorator {
            DecoratorConfig::ImageMultiplier { factor } => chain.image_multiplier(*factor),
            DecoratorConfig::AcquireTimeExtension { extension } => {
                chain.acquire_time_extension(*extension)
            }
            DecoratorConfig::UsageThrottle { upper, lower } => {
                let monitor = hardware
                    .usage_monitor
                    .clone()
                    .ok_or_else(|| missing("usage monitor", "usage_throttle"))?;
                let throttle = UsageThrottle::start(
                    monitor,
                    ThrottleThresholds {
                        upper: *upper,
                        lower: *lower,
                    },
                )
                .await?;
                chain.usage_throttle(throttle, interrupt.clone())
            }
        };
    }
    chain.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_poll_scales_with_collection_time() {
        let poll = PollConfig::default();
        assert_eq!(
            poll.ceiling_for(Duration::from_secs(10)),
            Some(Duration::from_secs(70))
        );
        assert!(poll.validate().is_ok());
    }

    #[test]
    fn fixed_ceiling_wins() {
        let poll = PollConfig::with_ceiling(
            Duration::from_millis(20),
            Duration::from_secs(5),
            CeilingPolicy::Warn,
        );
        assert_eq!(
            poll.ceiling_for(Duration::from_secs(100)),
            Some(Duration::from_secs(5))
        );
    }

    #[test]
    fn rejects_fast_polling() {
        let poll = PollConfig {
            interval: Duration::from_millis(1),
            ..PollConfig::default()
        };
        assert!(poll.validate().is_err());
        assert!(poll.poller_for(Duration::from_secs(1)).is_err());
    }

    #[test]
    fn parses_accumulation_with_throttle() {
        let config: StrategyConfig = toml::from_str(
            r#"
            type = "accumulation"
            exposure_time = "1s"

            [poll]
            interval = "20ms"
            ceiling = "5s"
            on_ceiling = "fail"

            [[decorators]]
            type = "usage_throttle"

            [[decorators]]
            type = "image_multiplier"
            factor = 2
            "#,
        )
        .unwrap();

        assert_eq!(
            config.kind,
            StrategyKind::Accumulation {
                exposure_time: Duration::from_secs(1)
            }
        );
        assert_eq!(config.poll.ceiling, Some(Duration::from_secs(5)));
        assert_eq!(config.poll.on_ceiling, CeilingPolicy::Fail);
        assert_eq!(
            config.decorators[0],
            DecoratorConfig::UsageThrottle {
                upper: 90.0,
                lower: 25.0
            }
        );
        assert_eq!(
            config.required_devices(),
            vec!["detector", "summation", "usage_monitor"]
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parses_shutter_settings() {
        let config: StrategyConfig = toml::from_str(
            r#"
            type = "shutter"
            open_delay = "100ms"
            close_value = 2.0
            "#,
        )
        .unwrap();
        match config.kind {
            StrategyKind::Shutter(settings) => {
                assert_eq!(settings.open_delay, Duration::from_millis(100));
                assert_eq!(settings.close_value, 2.0);
                assert_eq!(settings.open_value, 1.0);
            }
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[test]
    fn rejects_zero_multiplier() {
        let mut config = StrategyConfig::new(StrategyKind::Software);
        config
            .decorators
            .push(DecoratorConfig::ImageMultiplier { factor: 0 });
        assert!(config.validate().is_err());
    }
}
