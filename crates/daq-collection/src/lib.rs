//! Detector collection strategies.
//!
//! This crate decides *how* a detector takes the images of one scan point:
//! which registers are programmed before the scan, what starts an exposure,
//! and how the orchestration task learns that the point is done. A scan
//! driver sees every detector through the same [`CollectionStrategy`]
//! lifecycle regardless of triggering scheme.
//!
//! # Module Organization
//!
//! - [`strategy`] - The lifecycle contract
//! - [`detector`] - Base state machine covering all triggering variants
//! - [`decorator`] - Composable wrappers (image multiplier, exposure extension, usage throttle)
//! - [`poll`] - Busy-poll engine and abort signalling
//! - [`timing`] - Timing-generator programs and cycle sequencing
//! - [`shutter`] - Shutter-synchronised exposures with deferred close
//! - [`accumulation`] - Sub-exposure planning and summation plugin control
//! - [`throttle`] - Camera-usage hysteresis
//! - [`config`] - Declarative strategy definitions and the factory
//!
//! # Example
//!
//! ```rust,ignore
//! let (abort, interrupt) = interrupt_pair();
//! let mut strategy = build_strategy(&config, hardware, interrupt).await?;
//!
//! let t = Duration::from_secs(1);
//! let images = strategy.get_number_images_per_collection(t)?;
//! strategy
//!     .prepare_for_collection(&CollectionRequest::new(t, images, ScanShape::new(vec![10])))
//!     .await?;
//! for _ in 0..10 {
//!     strategy.collect_data().await?;
//!     strategy.wait_while_busy().await?;
//! }
//! strategy.complete_collection().await?;
//! ```

pub mod accumulation;
pub mod config;
pub mod decorator;
pub mod detector;
pub mod error;
pub mod hooks;
pub mod poll;
pub mod request;
pub mod shutter;
pub mod state;
pub mod strategy;
pub mod throttle;
pub mod timing;

pub use config::{
    build_strategy, DecoratorConfig, PollConfig, StrategyConfig, StrategyHardware, StrategyKind,
    TimeoutScaling,
};
pub use decorator::{AcquireTimeExtension, DecoratorChain, ImageMultiplier, ThrottledCollection};
pub use detector::{DetectorStrategy, Variant};
pub use error::{CollectionError, Result};
pub use hooks::VendorHooks;
pub use poll::{interrupt_pair, BusyPoller, CeilingPolicy, Interrupt, InterruptHandle, PollOutcome};
pub use request::{CollectionRequest, ScanShape};
pub use shutter::ShutterSettings;
pub use state::{LifecycleState, StrategyStatus};
pub use strategy::CollectionStrategy;
pub use throttle::{ThrottleThresholds, UsageThrottle};
pub use timing::{TimingProgram, TimingSettings};
