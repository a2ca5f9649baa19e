//! Camera-usage throttle.
//!
//! Some cameras buffer frames in on-board memory and drop them once it
//! fills. The throttle holds new triggers while the published usage is above
//! an upper threshold and releases them once it has fallen to a lower one.
//!
//! A listener task is the only writer of the latest usage value; the
//! collection task is its only reader.

use crate::error::{CollectionError, DeviceResultExt, Result};
use crate::poll::Interrupt;
use daq_core::capabilities::UsageMonitor;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Hysteresis band in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThrottleThresholds {
    pub upper: f64,
    pub lower: f64,
}

impl Default for ThrottleThresholds {
    fn default() -> Self {
        Self {
            upper: 90.0,
            lower: 25.0,
        }
    }
}

impl ThrottleThresholds {
    pub fn validate(&self) -> Result<()> {
        let in_range = |v: f64| (0.0..=100.0).contains(&v);
        if !in_range(self.upper) || !in_range(self.lower) {
            return Err(CollectionError::Configuration(format!(
                "usage thresholds {}/{} must lie within 0..=100",
                self.upper, self.lower
            )));
        }
        if self.lower >= self.upper {
            return Err(CollectionError::Configuration(format!(
                "lower usage threshold {} must be below upper threshold {}",
                self.lower, self.upper
            )));
        }
        Ok(())
    }
}

/// Latest usage value fed by a background listener.
pub struct UsageThrottle {
    monitor: String,
    thresholds: ThrottleThresholds,
    usage: watch::Receiver<f64>,
    listener: JoinHandle<()>,
}

impl UsageThrottle {
    /// Subscribe to `monitor` and start the listener task.
    pub async fn start(
        monitor: Arc<dyn UsageMonitor>,
        thresholds: ThrottleThresholds,
    ) -> Result<Self> {
        thresholds.validate()?;
        let name = monitor.name().to_string();

        // Subscribe first so nothing published after the initial read is lost
        let mut updates = monitor.subscribe();
        let initial = monitor
            .current_usage()
            .await
            .device_context(&name, "current_usage")?;
        let (tx, rx) = watch::channel(initial);

        let listener_name = name.clone();
        let listener = tokio::spawn(async move {
            loop {
                match updates.recv().await {
                    Ok(value) => {
                        tx.send_replace(value);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(monitor = %listener_name, skipped, "usage listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!(monitor = %listener_name, "usage monitor closed");
                        break;
                    }
                }
            }
        });

        Ok(Self {
            monitor: name,
            thresholds,
            usage: rx,
            listener,
        })
    }

    pub fn thresholds(&self) -> ThrottleThresholds {
        self.thresholds
    }

    /// Most recent usage value.
    pub fn current(&self) -> f64 {
        *self.usage.borrow()
    }

    /// Return at once when usage is at or below the upper threshold,
    /// otherwise hold until it has dropped to the lower threshold.
    pub async fn wait_for_capacity(&self, interrupt: &Interrupt) -> Result<()> {
        let usage = self.current();
        if usage <= self.thresholds.upper {
            return Ok(());
        }

        warn!(
            monitor = %self.monitor,
            usage,
            upper = self.thresholds.upper,
            lower = self.thresholds.lower,
            "camera usage above threshold; holding triggers"
        );

        let lower = self.thresholds.lower;
        let mut rx = self.usage.clone();
        let recovered = tokio::select! {
            result = rx.wait_for(|value| *value <= lower) => result.is_ok(),
            _ = interrupt.interrupted() => {
                return Err(CollectionError::Interrupted(
                    "waiting for camera usage to drop".into(),
                ));
            }
        };
        if !recovered {
            return Err(CollectionError::Hardware {
                device: self.monitor.clone(),
                operation: "subscribe",
                source: anyhow::anyhow!("usage updates stopped while throttled"),
            });
        }

        info!(monitor = %self.monitor, usage = self.current(), "camera usage recovered; resuming");
        Ok(())
    }
}

impl Drop for UsageThrottle {
    fn drop(&mut self) {
        self.listener.abort();
    }
}
