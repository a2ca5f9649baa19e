//! Mock camera-usage readback.
//!
//! Tests drive the published value with [`MockUsageMonitor::publish`];
//! subscribers see every update in order.

use anyhow::Result;
use async_trait::async_trait;
use daq_core::capabilities::UsageMonitor;
use parking_lot::Mutex;
use tokio::sync::broadcast;

/// Simulated usage monitor.
pub struct MockUsageMonitor {
    name: String,
    value: Mutex<f64>,
    sender: broadcast::Sender<f64>,
}

impl MockUsageMonitor {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_initial(name, 0.0)
    }

    pub fn with_initial(name: impl Into<String>, percent: f64) -> Self {
        let (sender, _) = broadcast::channel(64);
        Self {
            name: name.into(),
            value: Mutex::new(percent),
            sender,
        }
    }

    /// Set the usage and notify subscribers.
    pub fn publish(&self, percent: f64) {
        *self.value.lock() = percent;
        // No subscribers is fine.
        let _ = self.sender.send(percent);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[async_trait]
impl UsageMonitor for MockUsageMonitor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn current_usage(&self) -> Result<f64> {
        Ok(*self.value.lock())
    }

    fn subscribe(&self) -> broadcast::Receiver<f64> {
        self.sender.subscribe()
    }
}
