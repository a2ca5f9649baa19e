//! Lifecycle and status states of a collection strategy.

use crate::error::{CollectionError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a strategy is in its prepare/collect/complete lifecycle.
///
/// ```text
/// UNCONFIGURED -> PREPARED -> ACQUIRING -> BUSY -> PREPARED -> ... -> COMPLETE
///                                  \           \
///                                   +-> FAULT <-+   (at_command_failure -> UNCONFIGURED)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LifecycleState {
    #[default]
    Unconfigured,
    Prepared,
    Acquiring,
    Busy,
    Complete,
    Fault,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LifecycleState::Unconfigured => "UNCONFIGURED",
            LifecycleState::Prepared => "PREPARED",
            LifecycleState::Acquiring => "ACQUIRING",
            LifecycleState::Busy => "BUSY",
            LifecycleState::Complete => "COMPLETE",
            LifecycleState::Fault => "FAULT",
        };
        f.write_str(label)
    }
}

impl LifecycleState {
    /// Guard for `collect_data`. A point still in flight must be waited out
    /// before the next one starts.
    pub(crate) fn require_collectable(self, operation: &'static str) -> Result<()> {
        match self {
            LifecycleState::Prepared => Ok(()),
            LifecycleState::Fault => Err(CollectionError::Faulted),
            LifecycleState::Acquiring | LifecycleState::Busy => {
                Err(CollectionError::PointInFlight {
                    operation,
                    state: self,
                })
            }
            state => Err(CollectionError::NotPrepared { operation, state }),
        }
    }

    /// Guard for `prepare_for_collection`.
    pub(crate) fn require_preparable(self) -> Result<()> {
        match self {
            LifecycleState::Unconfigured | LifecycleState::Prepared | LifecycleState::Complete => {
                Ok(())
            }
            LifecycleState::Fault => Err(CollectionError::Faulted),
            state => Err(CollectionError::Configuration(format!(
                "cannot prepare a new collection while {state}"
            ))),
        }
    }

    /// True while an exposure may still be in flight.
    pub fn in_flight(self) -> bool {
        matches!(self, LifecycleState::Acquiring | LifecycleState::Busy)
    }
}

/// Coarse status reported to the scan driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyStatus {
    Idle,
    Busy,
    Fault,
}

impl fmt::Display for StrategyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyStatus::Idle => write!(f, "Idle"),
            StrategyStatus::Busy => write!(f, "Busy"),
            StrategyStatus::Fault => write!(f, "Fault"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collect_requires_prepared() {
        assert!(LifecycleState::Prepared.require_collectable("collect_data").is_ok());
        assert!(matches!(
            LifecycleState::Unconfigured.require_collectable("collect_data"),
            Err(CollectionError::NotPrepared { .. })
        ));
        assert!(matches!(
            LifecycleState::Complete.require_collectable("collect_data"),
            Err(CollectionError::NotPrepared { .. })
        ));
        assert!(matches!(
            LifecycleState::Acquiring.require_collectable("collect_data"),
            Err(CollectionError::PointInFlight { .. })
        ));
        assert!(matches!(
            LifecycleState::Busy.require_collectable("collect_data"),
            Err(CollectionError::PointInFlight { .. })
        ));
        assert!(matches!(
            LifecycleState::Fault.require_collectable("collect_data"),
            Err(CollectionError::Faulted)
        ));
    }

    #[test]
    fn prepare_rejected_mid_exposure() {
        assert!(LifecycleState::Complete.require_preparable().is_ok());
        assert!(LifecycleState::Busy.require_preparable().is_err());
        assert!(LifecycleState::Acquiring.in_flight());
        assert!(!LifecycleState::Prepared.in_flight());
    }
}
