//! The collection strategy contract.
//!
//! A scan driver talks to every detector through [`CollectionStrategy`]:
//!
//! ```text
//! get_number_images_per_collection(t)
//! prepare_for_collection(request)          once per scan
//!   prepare_for_line()                     once per line (optional)
//!     collect_data() -> wait_while_busy()  once per point
//!   complete_line()
//! complete_collection()                    or at_command_failure() on error
//! ```
//!
//! Strategies are driven from a single scan task; only the abort signal
//! (see [`crate::poll::Interrupt`]) crosses tasks.

use crate::error::{CollectionError, Result};
use crate::request::CollectionRequest;
use crate::state::{LifecycleState, StrategyStatus};
use async_trait::async_trait;
use std::time::Duration;

/// Prepare/collect/complete lifecycle of one detector in a scan.
#[async_trait]
pub trait CollectionStrategy: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Current lifecycle state.
    fn lifecycle_state(&self) -> LifecycleState;

    /// Images one `collect_data` call produces for the given collection time.
    ///
    /// Callers must pass this value back as `num_images` to
    /// `prepare_for_collection`.
    fn get_number_images_per_collection(&self, collection_time: Duration) -> Result<u32>;

    /// Program exposure and period for the given collection time.
    ///
    /// Called from `prepare_for_collection`; also callable directly for
    /// interactive exposures.
    async fn configure_acquire_and_period_times(&mut self, collection_time: Duration)
        -> Result<()>;

    /// Configure hardware for a collection. Validates everything before
    /// writing anything.
    async fn prepare_for_collection(&mut self, request: &CollectionRequest) -> Result<()>;

    /// Hook at the start of each scan line.
    async fn prepare_for_line(&mut self) -> Result<()> {
        Ok(())
    }

    /// Start one point's exposure. Fails if the strategy is not prepared.
    async fn collect_data(&mut self) -> Result<()>;

    /// Poll-free status snapshot.
    async fn get_status(&self) -> Result<StrategyStatus>;

    /// Block until the point started by `collect_data` is finished.
    async fn wait_while_busy(&mut self) -> Result<()>;

    /// Hook at the end of each scan line.
    async fn complete_line(&mut self) -> Result<()> {
        Ok(())
    }

    /// Halt any exposure in progress. Safe in every state.
    async fn stop(&mut self) -> Result<()>;

    /// Best-effort cleanup after a failed or aborted collection.
    ///
    /// Never fails and may be called repeatedly; a second call leaves the
    /// hardware exactly as the first did.
    async fn at_command_failure(&mut self);

    /// Normal end of a collection. Surfaces failures of deferred actions.
    async fn complete_collection(&mut self) -> Result<()>;

    /// Exposure time as seen by the caller.
    async fn get_acquire_time(&self) -> Result<Duration>;

    /// Acquire period as seen by the caller.
    async fn get_acquire_period(&self) -> Result<Duration>;

    /// True when downstream plugins must run asynchronously to this strategy.
    fn requires_asynchronous_plugins(&self) -> bool {
        false
    }

    /// Take on a failure raised by a layer wrapped around this strategy, such
    /// as an abort during a decorator's own wait, and move to `Fault`.
    ///
    /// Returns the error for the caller to propagate.
    fn record_failure(&mut self, error: CollectionError) -> CollectionError {
        error
    }
}

#[async_trait]
impl CollectionStrategy for Box<dyn CollectionStrategy> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn lifecycle_state(&self) -> LifecycleState {
        (**self).lifecycle_state()
    }

    fn get_number_images_per_collection(&self, collection_time: Duration) -> Result<u32> {
        (**self).get_number_images_per_collection(collection_time)
    }

    async fn configure_acquire_and_period_times(
        &mut self,
        collection_time: Duration,
    ) -> Result<()> {
        (**self)
            .configure_acquire_and_period_times(collection_time)
            .await
    }

    async fn prepare_for_collection(&mut self, request: &CollectionRequest) -> Result<()> {
        (**self).prepare_for_collection(request).await
    }

    async fn prepare_for_line(&mut self) -> Result<()> {
        (**self).prepare_for_line().await
    }

    async fn collect_data(&mut self) -> Result<()> {
        (**self).collect_data().await
    }

    async fn get_status(&self) -> Result<StrategyStatus> {
        (**self).get_status().await
    }

    async fn wait_while_busy(&mut self) -> Result<()> {
        (**self).wait_while_busy().await
    }

    async fn complete_line(&mut self) -> Result<()> {
        (**self).complete_line().await
    }

    async fn stop(&mut self) -> Result<()> {
        (**self).stop().await
    }

    async fn at_command_failure(&mut self) {
        (**self).at_command_failure().await
    }

    async fn complete_collection(&mut self) -> Result<()> {
        (**self).complete_collection().await
    }

    async fn get_acquire_time(&self) -> Result<Duration> {
        (**self).get_acquire_time().await
    }

    async fn get_acquire_period(&self) -> Result<Duration> {
        (**self).get_acquire_period().await
    }

    fn requires_asynchronous_plugins(&self) -> bool {
        (**self).requires_asynchronous_plugins()
    }

    fn record_failure(&mut self, error: CollectionError) -> CollectionError {
        (**self).record_failure(error)
    }
}
