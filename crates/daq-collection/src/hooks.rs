//! Per-detector-family quirks.
//!
//! Detector families differ in trigger-mode codes, readout dead time and
//! exposure limits. Strategies read these values instead of subclassing per
//! vendor.

use crate::error::{CollectionError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Trigger codes and timing limits of one detector family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VendorHooks {
    /// Trigger-mode code for free-running software starts
    pub internal_trigger_mode: i32,
    /// Trigger-mode code for externally gated exposures
    pub external_trigger_mode: i32,
    /// Dead time added to the exposure to form the acquire period
    #[serde(with = "humantime_serde")]
    pub readout_time: Duration,
    /// Shortest exposure the detector accepts
    #[serde(with = "humantime_serde")]
    pub min_exposure: Duration,
    /// Longest single exposure, if the detector has one
    #[serde(with = "humantime_serde")]
    pub max_exposure: Option<Duration>,
}

impl Default for VendorHooks {
    fn default() -> Self {
        Self {
            internal_trigger_mode: 0,
            external_trigger_mode: 1,
            readout_time: Duration::ZERO,
            min_exposure: Duration::from_micros(1),
            max_exposure: None,
        }
    }
}

impl VendorHooks {
    /// Pilatus-style photon counters: external enable, 2.3 ms readout.
    pub fn photon_counting() -> Self {
        Self {
            internal_trigger_mode: 0,
            external_trigger_mode: 2,
            readout_time: Duration::from_micros(2300),
            min_exposure: Duration::from_micros(100),
            max_exposure: None,
        }
    }

    /// CCDs with a single-exposure limit, accumulated in software.
    pub fn ccd(max_exposure: Duration) -> Self {
        Self {
            internal_trigger_mode: 0,
            external_trigger_mode: 1,
            readout_time: Duration::from_millis(100),
            min_exposure: Duration::from_millis(1),
            max_exposure: Some(max_exposure),
        }
    }

    /// Reject an exposure outside the detector's limits.
    pub fn check_exposure(&self, exposure: Duration) -> Result<()> {
        if exposure < self.min_exposure {
            return Err(CollectionError::Configuration(format!(
                "exposure {exposure:?} is shorter than the detector minimum {:?}",
                self.min_exposure
            )));
        }
        if let Some(max) = self.max_exposure {
            if exposure > max {
                return Err(CollectionError::Configuration(format!(
                    "exposure {exposure:?} exceeds the detector maximum {max:?}"
                )));
            }
        }
        Ok(())
    }

    /// Acquire period for the given exposure.
    pub fn period_for(&self, exposure: Duration) -> Duration {
        exposure + self.readout_time
    }
}

/// Seconds as the hardware wants them.
pub(crate) fn to_secs(duration: Duration) -> f64 {
    duration.as_secs_f64()
}

/// Hardware seconds back into a `Duration`.
pub(crate) fn from_secs(device: &str, seconds: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(seconds).map_err(|e| {
        CollectionError::Configuration(format!(
            "{device} reported an unusable time of {seconds} s: {e}"
        ))
    })
}
