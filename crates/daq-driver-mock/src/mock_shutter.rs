//! Mock shutter channel.

use crate::common::{ErrorConfig, EventLog};
use anyhow::Result;
use async_trait::async_trait;
use daq_core::capabilities::ShutterChannel;
use parking_lot::Mutex;

/// Simulated shutter. Writes land immediately and are logged as
/// `"write {value}"`.
pub struct MockShutter {
    name: String,
    value: Mutex<f64>,
    writes: Mutex<Vec<f64>>,
    errors: ErrorConfig,
    log: EventLog,
}

impl MockShutter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Mutex::new(0.0),
            writes: Mutex::new(Vec::new()),
            errors: ErrorConfig::none(),
            log: EventLog::new(),
        }
    }

    pub fn with_error_config(mut self, errors: ErrorConfig) -> Self {
        self.errors = errors;
        self
    }

    pub fn with_event_log(mut self, log: EventLog) -> Self {
        self.log = log;
        self
    }

    pub fn value(&self) -> f64 {
        *self.value.lock()
    }

    /// Every value written, in order.
    pub fn writes(&self) -> Vec<f64> {
        self.writes.lock().clone()
    }

    pub fn event_log(&self) -> &EventLog {
        &self.log
    }
}

#[async_trait]
impl ShutterChannel for MockShutter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&self, value: f64) -> Result<()> {
        self.errors.check_operation(&self.name, "write")?;
        *self.value.lock() = value;
        self.writes.lock().push(value);
        self.log.record(&self.name, format!("write {value}"));
        Ok(())
    }

    async fn read(&self) -> Result<f64> {
        self.errors.check_operation(&self.name, "read")?;
        Ok(*self.value.lock())
    }
}
