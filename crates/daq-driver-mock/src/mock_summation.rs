//! Mock frame-summation plugin.
//!
//! Frames arrive from a [`MockDetector`](crate::MockDetector) and are folded
//! in after an optional drain delay, so the plugin can lag behind a detector
//! that has already gone idle. A requested reset is applied when the next
//! frame arrives, as areaDetector processing plugins do.

use crate::common::{ErrorConfig, EventLog, TimingConfig};
use anyhow::Result;
use async_trait::async_trait;
use daq_core::capabilities::{FilterType, SummationPlugin};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Default)]
struct FilterRegisters {
    filter_type: FilterType,
    num_filter: u32,
    enabled: bool,
    auto_reset: bool,
    reset_pending: bool,
    num_filtered: u32,
    frames_received: u64,
    outputs: u32,
}

impl FilterRegisters {
    fn fold_frame(&mut self) {
        if !self.enabled {
            return;
        }
        self.frames_received += 1;
        if self.reset_pending {
            self.num_filtered = 0;
            self.reset_pending = false;
        } else if self.auto_reset && self.num_filter > 0 && self.num_filtered >= self.num_filter {
            self.num_filtered = 0;
        }
        self.num_filtered += 1;
        if self.num_filtered == self.num_filter {
            self.outputs += 1;
        }
    }
}

/// Simulated summation plugin.
pub struct MockSummationPlugin {
    name: String,
    regs: Arc<Mutex<FilterRegisters>>,
    drain: Duration,
    errors: ErrorConfig,
    log: EventLog,
}

impl MockSummationPlugin {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            regs: Arc::new(Mutex::new(FilterRegisters {
                num_filter: 1,
                ..FilterRegisters::default()
            })),
            drain: Duration::ZERO,
            errors: ErrorConfig::none(),
            log: EventLog::new(),
        }
    }

    pub fn with_timing(mut self, timing: TimingConfig) -> Self {
        self.drain = timing.plugin_drain;
        self
    }

    pub fn with_error_config(mut self, errors: ErrorConfig) -> Self {
        self.errors = errors;
        self
    }

    pub fn with_event_log(mut self, log: EventLog) -> Self {
        self.log = log;
        self
    }

    /// Deliver one detector frame.
    pub fn push_frame(&self) {
        if self.drain.is_zero() {
            self.regs.lock().fold_frame();
            self.log.record(&self.name, "frame folded");
            return;
        }
        let regs = Arc::clone(&self.regs);
        let log = self.log.clone();
        let name = self.name.clone();
        let drain = self.drain;
        tokio::spawn(async move {
            tokio::time::sleep(drain).await;
            regs.lock().fold_frame();
            log.record(&name, "frame folded");
        });
    }

    /// Summed frames emitted so far.
    pub fn outputs(&self) -> u32 {
        self.regs.lock().outputs
    }

    pub fn frames_received(&self) -> u64 {
        self.regs.lock().frames_received
    }

    pub fn auto_reset(&self) -> bool {
        self.regs.lock().auto_reset
    }

    pub fn filter_type(&self) -> FilterType {
        self.regs.lock().filter_type
    }
}

#[async_trait]
impl SummationPlugin for MockSummationPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    async fn set_filter_type(&self, filter: FilterType) -> Result<()> {
        self.errors.check_operation(&self.name, "set_filter_type")?;
        self.regs.lock().filter_type = filter;
        Ok(())
    }

    async fn set_num_filter(&self, count: u32) -> Result<()> {
        self.errors.check_operation(&self.name, "set_num_filter")?;
        self.regs.lock().num_filter = count;
        self.log.record(&self.name, format!("num_filter {count}"));
        Ok(())
    }

    async fn num_filter(&self) -> Result<u32> {
        Ok(self.regs.lock().num_filter)
    }

    async fn set_enabled(&self, enabled: bool) -> Result<()> {
        self.errors.check_operation(&self.name, "set_enabled")?;
        self.regs.lock().enabled = enabled;
        self.log
            .record(&self.name, if enabled { "enabled" } else { "disabled" });
        Ok(())
    }

    async fn enabled(&self) -> Result<bool> {
        Ok(self.regs.lock().enabled)
    }

    async fn set_auto_reset(&self, enabled: bool) -> Result<()> {
        self.errors.check_operation(&self.name, "set_auto_reset")?;
        self.regs.lock().auto_reset = enabled;
        Ok(())
    }

    async fn reset_filter(&self) -> Result<()> {
        self.errors.check_operation(&self.name, "reset_filter")?;
        self.regs.lock().reset_pending = true;
        self.log.record(&self.name, "reset");
        Ok(())
    }

    async fn reset_pending(&self) -> Result<bool> {
        Ok(self.regs.lock().reset_pending)
    }

    async fn num_filtered(&self) -> Result<u32> {
        self.errors.check_operation(&self.name, "num_filtered")?;
        Ok(self.regs.lock().num_filtered)
    }
}
