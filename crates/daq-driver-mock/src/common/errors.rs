//! Fault injection for mock devices.
//!
//! Every mock operation calls [`ErrorConfig::check_operation`] before it
//! touches its registers. Failures come back as `DriverError`s so they look
//! like what a real driver would report.

use super::rng::MockRng;
use daq_core::error::{DriverError, DriverErrorKind};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// A scripted failure.
#[derive(Debug, Clone)]
pub enum ErrorScenario {
    /// Succeed `count` times, then fail every call of `operation`
    FailAfterN {
        operation: &'static str,
        count: u32,
    },
    /// Fail every call of `operation`
    FailAlways { operation: &'static str },
    /// Channel drops on the first call of any operation and stays down
    CommunicationLoss,
}

#[derive(Default, Debug)]
struct ErrorState {
    calls: HashMap<&'static str, u32>,
    communication_lost: bool,
}

/// Fault-injection settings shared by clones of a mock.
#[derive(Clone, Debug)]
pub struct ErrorConfig {
    failure_rates: Arc<HashMap<&'static str, f64>>,
    scenarios: Arc<Vec<ErrorScenario>>,
    rng: Arc<MockRng>,
    state: Arc<Mutex<ErrorState>>,
}

impl ErrorConfig {
    /// No injected failures.
    pub fn none() -> Self {
        Self::build(HashMap::new(), Vec::new(), None)
    }

    pub fn scenario(scenario: ErrorScenario) -> Self {
        Self::scenarios(vec![scenario])
    }

    pub fn scenarios(scenarios: Vec<ErrorScenario>) -> Self {
        Self::build(HashMap::new(), scenarios, None)
    }

    /// Fail any operation with probability `rate`, reproducibly for a given seed.
    pub fn random_failures_seeded(rate: f64, seed: u64) -> Self {
        let mut rates = HashMap::new();
        rates.insert("*", rate);
        Self::build(rates, Vec::new(), Some(seed))
    }

    fn build(
        rates: HashMap<&'static str, f64>,
        scenarios: Vec<ErrorScenario>,
        seed: Option<u64>,
    ) -> Self {
        Self {
            failure_rates: Arc::new(rates),
            scenarios: Arc::new(scenarios),
            rng: Arc::new(MockRng::new(seed)),
            state: Arc::new(Mutex::new(ErrorState::default())),
        }
    }

    /// Decide whether `operation` on `device` fails this time.
    pub fn check_operation(&self, device: &str, operation: &'static str) -> Result<(), DriverError> {
        let mut state = self.state.lock();

        if state.communication_lost {
            return Err(DriverError::new(
                device,
                DriverErrorKind::Communication,
                "channel disconnected",
            ));
        }

        let calls = {
            let entry = state.calls.entry(operation).or_insert(0);
            *entry += 1;
            *entry
        };

        for scenario in self.scenarios.iter() {
            match scenario {
                ErrorScenario::FailAfterN {
                    operation: op,
                    count,
                } if *op == operation && calls > *count => {
                    return Err(DriverError::new(
                        device,
                        DriverErrorKind::Hardware,
                        format!("injected '{operation}' failure after {count} calls"),
                    ));
                }
                ErrorScenario::FailAlways { operation: op } if *op == operation => {
                    return Err(DriverError::new(
                        device,
                        DriverErrorKind::Hardware,
                        format!("injected '{operation}' failure"),
                    ));
                }
                ErrorScenario::CommunicationLoss => {
                    state.communication_lost = true;
                    return Err(DriverError::new(
                        device,
                        DriverErrorKind::Communication,
                        "channel disconnected",
                    ));
                }
                _ => {}
            }
        }

        let rate = self
            .failure_rates
            .get(operation)
            .or_else(|| self.failure_rates.get("*"))
            .copied()
            .unwrap_or(0.0);
        if self.rng.should_fail(rate) {
            return Err(DriverError::new(
                device,
                DriverErrorKind::Hardware,
                format!("random failure on '{operation}'"),
            ));
        }

        Ok(())
    }

    /// Number of times `operation` has been attempted.
    pub fn calls(&self, operation: &'static str) -> u32 {
        self.state.lock().calls.get(operation).copied().unwrap_or(0)
    }

    /// Clear counters and restore communication.
    pub fn reset(&self) {
        *self.state.lock() = ErrorState::default();
    }
}

impl Default for ErrorConfig {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_never_fails() {
        let config = ErrorConfig::none();
        for _ in 0..50 {
            assert!(config.check_operation("det", "start_acquiring").is_ok());
        }
        assert_eq!(config.calls("start_acquiring"), 50);
    }

    #[test]
    fn fail_after_n() {
        let config = ErrorConfig::scenario(ErrorScenario::FailAfterN {
            operation: "write",
            count: 2,
        });
        assert!(config.check_operation("shutter", "write").is_ok());
        assert!(config.check_operation("shutter", "write").is_ok());
        let err = config.check_operation("shutter", "write").unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::Hardware);
        assert!(config.check_operation("shutter", "read").is_ok());

        config.reset();
        assert!(config.check_operation("shutter", "write").is_ok());
    }

    #[test]
    fn communication_loss_is_sticky() {
        let config = ErrorConfig::scenario(ErrorScenario::CommunicationLoss);
        assert!(config.check_operation("tfg", "status").is_err());
        let err = config.check_operation("tfg", "cont").unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::Communication);
    }

    #[test]
    fn seeded_random_failures_repeat() {
        let a = ErrorConfig::random_failures_seeded(0.3, 99);
        let b = ErrorConfig::random_failures_seeded(0.3, 99);
        let run_a: Vec<bool> = (0..40).map(|_| a.check_operation("d", "x").is_err()).collect();
        let run_b: Vec<bool> = (0..40).map(|_| b.check_operation("d", "x").is_err()).collect();
        assert_eq!(run_a, run_b);
        assert!(run_a.iter().any(|f| *f));
    }
}
