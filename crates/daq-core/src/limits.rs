//! Shared polling limits for detector collection.
//!
//! This module centralizes:
//! - The permitted range for busy-poll sleep granularity
//! - Default poll intervals and ceilings
//! - Timeout scaling defaults used when a ceiling follows the collection time
//!
//! Individual detectors override the defaults through configuration; these
//! constants only bound what configuration may ask for.

use crate::error::DaqError;
use std::time::Duration;

// =============================================================================
// Poll granularity
// =============================================================================

/// Shortest sleep between two status reads (10 ms).
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Longest sleep between two status reads (100 ms).
///
/// Coarser polling adds up to this much latency to every point of a scan.
pub const MAX_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default sleep between two status reads (50 ms).
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

// =============================================================================
// Ceilings
// =============================================================================

/// Default hard ceiling for waits on devices that can hang without a status change (5 s).
pub const DEFAULT_POLL_CEILING: Duration = Duration::from_secs(5);

/// Default multiplier applied to the collection time for scaled ceilings.
pub const DEFAULT_TIMEOUT_MULTIPLIER: f64 = 1.0;

/// Default offset added to scaled ceilings (60 s).
pub const DEFAULT_TIMEOUT_OFFSET: Duration = Duration::from_secs(60);

/// Check that a configured poll interval lies inside the permitted range.
pub fn validate_poll_interval(interval: Duration) -> Result<Duration, DaqError> {
    if interval < MIN_POLL_INTERVAL || interval > MAX_POLL_INTERVAL {
        return Err(DaqError::Configuration(format!(
            "poll interval {:?} outside permitted range {:?}..={:?}",
            interval, MIN_POLL_INTERVAL, MAX_POLL_INTERVAL
        )));
    }
    Ok(interval)
}
