//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, shared by every crate in
//! the workspace. Using the `thiserror` crate, it provides a centralized and consistent
//! way to report configuration problems, device failures and cancelled operations.
//!
//! ## Error Hierarchy
//!
//! `DaqError` is an enum that consolidates various error sources:
//!
//! - **`Configuration`**: Semantic errors in configuration or in a collection request,
//!   such as a collection time the detector cannot honour. Detected before any hardware
//!   state is changed.
//! - **`Instrument`**: A general category for errors originating from a device handle.
//! - **`Driver`**: A structured driver error carrying the device name and a category.
//! - **`Timeout`**: A bounded wait ran out. Strategies normally downgrade these to
//!   warnings; the variant exists for the callers that choose not to.
//! - **`Interrupted`**: The operation was cancelled by an operator abort.
//!
//! Crate-specific error enums (for example the collection engine's) convert into
//! `DaqError` with `From`, so the `?` operator works across crate boundaries.

use thiserror::Error;

// =============================================================================
// Driver Errors
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    Configuration,
    Communication,
    Hardware,
    Timeout,
}

impl std::fmt::Display for DriverErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DriverErrorKind::Configuration => "configuration",
            DriverErrorKind::Communication => "communication",
            DriverErrorKind::Hardware => "hardware",
            DriverErrorKind::Timeout => "timeout",
        };
        write!(f, "{}", label)
    }
}

#[derive(Error, Debug, Clone)]
#[error("Driver '{driver_type}' {kind} error: {message}")]
pub struct DriverError {
    pub driver_type: String,
    pub kind: DriverErrorKind,
    pub message: String,
}

impl DriverError {
    pub fn new(
        driver_type: impl Into<String>,
        kind: DriverErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            driver_type: driver_type.into(),
            kind,
            message: message.into(),
        }
    }
}

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Primary error type for the application.
///
/// # Error Categories
///
/// 1. **Configuration Errors** - `Config`, `Configuration`
///    - Permanent; nothing was sent to hardware
///    - Recovery: fix the request or configuration file
///
/// 2. **Device Errors** - `Instrument`, `Driver`
///    - Fatal to the current collection
///    - Recovery: run failure cleanup, check connections, retry the scan
///
/// 3. **Flow Errors** - `Timeout`, `Interrupted`
///    - `Timeout` is usually soft; `Interrupted` always propagates
#[derive(Error, Debug)]
pub enum DaqError {
    /// Configuration file parsing failed.
    ///
    /// **Source**: Wraps `figment::Error` rendered to text so this crate stays free
    /// of the loader dependency.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration or request validation failed.
    ///
    /// # Example
    ///
    /// ```rust
    /// use daq_core::error::DaqError;
    ///
    /// fn validate_exposure(exposure_seconds: f64) -> Result<(), DaqError> {
    ///     if exposure_seconds <= 0.0 {
    ///         return Err(DaqError::Configuration(
    ///             "exposure_seconds must be positive".into()
    ///         ));
    ///     }
    ///     Ok(())
    /// }
    /// ```
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Device handle reported a failure.
    #[error("Instrument error: {0}")]
    Instrument(String),

    /// Structured driver error with category
    #[error("{0}")]
    Driver(DriverError),

    /// A bounded wait ran out.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Operation cancelled by an abort request.
    #[error("Interrupted: {0}")]
    Interrupted(String),
}

impl DaqError {
    /// True for errors caused by an abort request rather than a fault.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, DaqError::Interrupted(_))
    }
}

impl From<DriverError> for DaqError {
    fn from(err: DriverError) -> Self {
        DaqError::Driver(err)
    }
}
