//! Mock scan axis.

use crate::common::{ErrorConfig, EventLog};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use daq_core::capabilities::Movable;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::sleep;

/// Simulated linear stage.
///
/// Moves at a constant speed, then needs `settle` before `wait_settled`
/// returns. Moves are logged as `"move {target}"`.
///
/// ```rust,ignore
/// let stage = MockStage::new("sample_x")
///     .with_speed(10.0)
///     .with_limits(0.0, 25.0);
/// stage.move_abs(5.0).await?;
/// ```
pub struct MockStage {
    name: String,
    position: Mutex<f64>,
    moves: Mutex<Vec<f64>>,
    /// Units per second; `None` moves instantly
    speed: Option<f64>,
    settle: Duration,
    limits: Option<(f64, f64)>,
    errors: ErrorConfig,
    log: EventLog,
}

impl MockStage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            position: Mutex::new(0.0),
            moves: Mutex::new(Vec::new()),
            speed: None,
            settle: Duration::ZERO,
            limits: None,
            errors: ErrorConfig::none(),
            log: EventLog::new(),
        }
    }

    pub fn with_speed(mut self, units_per_sec: f64) -> Self {
        self.speed = Some(units_per_sec);
        self
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Reject targets outside `[min, max]`.
    pub fn with_limits(mut self, min: f64, max: f64) -> Self {
        self.limits = Some((min, max));
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

    /// Every target reached, in order.
    pub fn moves(&self) -> Vec<f64> {
        self.moves.lock().clone()
    }

    pub fn event_log(&self) -> &EventLog {
        &self.log
    }

    fn travel_time(&self, distance: f64) -> Duration {
        match self.speed {
            Some(speed) if speed > 0.0 => Duration::from_secs_f64(distance.abs() / speed),
            _ => Duration::ZERO,
        }
    }
}

#[async_trait]
impl Movable for MockStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn move_abs(&self, target: f64) -> Result<()> {
        self.errors.check_operation(&self.name, "move_abs")?;
        if let Some((min, max)) = self.limits {
            if target < min || target > max {
                return Err(anyhow!(
                    "Position {target:.3} exceeds limits [{min:.3}, {max:.3}]"
                ));
            }
        }

        let current = *self.position.lock();
        let travel = self.travel_time(target - current);
        tracing::debug!(stage = %self.name, from = current, to = target, ?travel, "moving");
        if !travel.is_zero() {
            sleep(travel).await;
        }

        *self.position.lock() = target;
        self.moves.lock().push(target);
        self.log.record(&self.name, format!("move {target}"));
        Ok(())
    }

    async fn position(&self) -> Result<f64> {
        self.errors.check_operation(&self.name, "position")?;
        Ok(*self.position.lock())
    }

    async fn wait_settled(&self) -> Result<()> {
        if !self.settle.is_zero() {
            sleep(self.settle).await;
        }
        self.log.record(&self.name, "settled");
        Ok(())
    }
}
