//! Error types for collection strategies.
//!
//! The taxonomy follows what a scan driver has to decide after a failure:
//!
//! - **Configuration**: the request cannot be honoured; nothing was sent to hardware
//! - **Timeout**: a bounded wait ran out; soft unless a strategy says otherwise
//! - **Hardware**: a device call failed or reported a fault; fatal to the collection
//! - **Interrupted**: an abort reached a blocking point; always propagated

use crate::state::LifecycleState;
use daq_core::capabilities::DetectorState;
use daq_core::error::DaqError;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for collection operations.
pub type Result<T> = std::result::Result<T, CollectionError>;

/// Errors raised by collection strategies and their helpers.
#[derive(Error, Debug)]
pub enum CollectionError {
    /// Request or configuration contradicts the hardware limits
    #[error("Invalid collection configuration: {0}")]
    Configuration(String),

    /// Lifecycle operation called out of order
    #[error("'{operation}' called in state {state}; prepare_for_collection must succeed first")]
    NotPrepared {
        operation: &'static str,
        state: LifecycleState,
    },

    /// `collect_data` called again before `wait_while_busy` finished the point
    #[error("'{operation}' called in state {state}; the previous point must finish first")]
    PointInFlight {
        operation: &'static str,
        state: LifecycleState,
    },

    /// `num_images` does not echo `get_number_images_per_collection`
    #[error("Requested {requested} images per collection but the strategy acquires {expected}")]
    ImageCountMismatch { expected: u32, requested: u32 },

    /// A device call failed
    #[error("{device}: {operation} failed: {source}")]
    Hardware {
        device: String,
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// The detector-state register reported a fault
    #[error("{device} reported fault state '{state}'")]
    DeviceFault { device: String, state: DetectorState },

    /// An abort request reached a blocking point
    #[error("Interrupted while {0}")]
    Interrupted(String),

    /// A bounded wait ran out
    #[error("Timed out after {waited:?} waiting for {what}")]
    Timeout { what: String, waited: Duration },

    /// A task scheduled on its own timeline failed
    #[error("Deferred {action} on {device} failed: {message}")]
    DeferredAction {
        device: String,
        action: &'static str,
        message: String,
    },

    /// A cycle was about to be issued before the previous one completed
    #[error("{device}: cycle {expected} not yet confirmed (generator reports {reported})")]
    CycleOrdering {
        device: String,
        expected: u32,
        reported: u32,
    },

    /// The strategy failed earlier and has not been cleaned up
    #[error("Strategy is faulted; at_command_failure must run before it can be reused")]
    Faulted,
}

impl CollectionError {
    /// Timeouts may be logged and the scan continued.
    pub fn is_soft(&self) -> bool {
        matches!(self, CollectionError::Timeout { .. })
    }

    /// True when the error came from an abort request.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, CollectionError::Interrupted(_))
    }

    /// True for errors raised before any hardware was touched.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            CollectionError::Configuration(_)
                | CollectionError::NotPrepared { .. }
                | CollectionError::PointInFlight { .. }
                | CollectionError::ImageCountMismatch { .. }
        )
    }
}

/// Attach device name and operation to a collaborator result.
pub(crate) trait DeviceResultExt<T> {
    fn device_context(self, device: &str, operation: &'static str) -> Result<T>;
}

impl<T> DeviceResultExt<T> for anyhow::Result<T> {
    fn device_context(self, device: &str, operation: &'static str) -> Result<T> {
        self.map_err(|source| CollectionError::Hardware {
            device: device.to_string(),
            operation,
            source,
        })
    }
}

impl From<CollectionError> for DaqError {
    fn from(err: CollectionError) -> Self {
        match &err {
            CollectionError::Configuration(_)
            | CollectionError::NotPrepared { .. }
            | CollectionError::PointInFlight { .. }
            | CollectionError::ImageCountMismatch { .. } => DaqError::Configuration(err.to_string()),
            CollectionError::Timeout { .. } => DaqError::Timeout(err.to_string()),
            CollectionError::Interrupted(_) => DaqError::Interrupted(err.to_string()),
            CollectionError::Hardware { .. }
            | CollectionError::DeviceFault { .. }
            | CollectionError::DeferredAction { .. }
            | CollectionError::CycleOrdering { .. }
            | CollectionError::Faulted => DaqError::Instrument(err.to_string()),
        }
    }
}
