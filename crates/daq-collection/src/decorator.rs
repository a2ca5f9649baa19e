//! Strategy decorators.
//!
//! A decorator wraps exactly one decoratee, overrides the operations it cares
//! about and forwards the rest unchanged. Decorators hold no hardware state of
//! their own: every read goes through to the decoratee, so a value written on
//! the way in is transformed back on the way out.
//!
//! Chains are assembled with [`DecoratorChain`]; the first layer added sits
//! directly on the base strategy.

use crate::error::{CollectionError, Result};
use crate::poll::Interrupt;
use crate::request::CollectionRequest;
use crate::state::{LifecycleState, StrategyStatus};
use crate::strategy::CollectionStrategy;
use crate::throttle::UsageThrottle;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

// =============================================================================
// Image multiplier
// =============================================================================

/// Acquires `factor` hardware images for every image the decoratee reports.
pub struct ImageMultiplier {
    inner: Box<dyn CollectionStrategy>,
    factor: u32,
}

impl ImageMultiplier {
    pub fn new(inner: Box<dyn CollectionStrategy>, factor: u32) -> Result<Self> {
        if factor == 0 {
            return Err(CollectionError::Configuration(
                "image multiplier must be at least 1".into(),
            ));
        }
        Ok(Self { inner, factor })
    }

    pub fn factor(&self) -> u32 {
        self.factor
    }

    pub fn decoratee(&self) -> &dyn CollectionStrategy {
        &*self.inner
    }
}

#[async_trait]
impl CollectionStrategy for ImageMultiplier {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn lifecycle_state(&self) -> LifecycleState {
        self.inner.lifecycle_state()
    }

    fn get_number_images_per_collection(&self, collection_time: Duration) -> Result<u32> {
        let natural = self.inner.get_number_images_per_collection(collection_time)?;
        natural.checked_mul(self.factor).ok_or_else(|| {
            CollectionError::Configuration(format!(
                "{natural} images x {} overflows the image counter",
                self.factor
            ))
        })
    }

    async fn configure_acquire_and_period_times(
        &mut self,
        collection_time: Duration,
    ) -> Result<()> {
        self.inner
            .configure_acquire_and_period_times(collection_time)
            .await
    }

    async fn prepare_for_collection(&mut self, request: &CollectionRequest) -> Result<()> {
        debug!(strategy = %self.inner.name(), factor = self.factor, "multiplying images per collection");
        self.inner
            .prepare_for_collection(&request.scaled_by(self.factor))
            .await
    }

    async fn prepare_for_line(&mut self) -> Result<()> {
        self.inner.prepare_for_line().await
    }

    async fn collect_data(&mut self) -> Result<()> {
        self.inner.collect_data().await
    }

    async fn get_status(&self) -> Result<StrategyStatus> {
        self.inner.get_status().await
    }

    async fn wait_while_busy(&mut self) -> Result<()> {
        self.inner.wait_while_busy().await
    }

    async fn complete_line(&mut self) -> Result<()> {
        self.inner.complete_line().await
    }

    async fn stop(&mut self) -> Result<()> {
        self.inner.stop().await
    }

    async fn at_command_failure(&mut self) {
        self.inner.at_command_failure().await
    }

    async fn complete_collection(&mut self) -> Result<()> {
        self.inner.complete_collection().await
    }

    async fn get_acquire_time(&self) -> Result<Duration> {
        self.inner.get_acquire_time().await
    }

    async fn get_acquire_period(&self) -> Result<Duration> {
        self.inner.get_acquire_period().await
    }

    fn requires_asynchronous_plugins(&self) -> bool {
        self.inner.requires_asynchronous_plugins()
    }

    fn record_failure(&mut self, error: CollectionError) -> CollectionError {
        self.inner.record_failure(error)
    }
}

// =============================================================================
// Acquire-time extension
// =============================================================================

/// Lengthens the detector exposure by a fixed amount to cover shutter
/// run-up and run-down, and hides the extension from readers.
pub struct AcquireTimeExtension {
    inner: Box<dyn CollectionStrategy>,
    extension: Duration,
}

impl AcquireTimeExtension {
    pub fn new(inner: Box<dyn CollectionStrategy>, extension: Duration) -> Self {
        Self { inner, extension }
    }

    pub fn extension(&self) -> Duration {
        self.extension
    }

    pub fn decoratee(&self) -> &dyn CollectionStrategy {
        &*self.inner
    }
}

#[async_trait]
impl CollectionStrategy for AcquireTimeExtension {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn lifecycle_state(&self) -> LifecycleState {
        self.inner.lifecycle_state()
    }

    fn get_number_images_per_collection(&self, collection_time: Duration) -> Result<u32> {
        self.inner.get_number_images_per_collection(collection_time)
    }

    async fn configure_acquire_and_period_times(
        &mut self,
        collection_time: Duration,
    ) -> Result<()> {
        self.inner
            .configure_acquire_and_period_times(collection_time + self.extension)
            .await
    }

    async fn prepare_for_collection(&mut self, request: &CollectionRequest) -> Result<()> {
        debug!(strategy = %self.inner.name(), extension = ?self.extension, "extending exposure");
        self.inner
            .prepare_for_collection(&request.extended_by(self.extension))
            .await
    }

    async fn prepare_for_line(&mut self) -> Result<()> {
        self.inner.prepare_for_line().await
    }

    async fn collect_data(&mut self) -> Result<()> {
        self.inner.collect_data().await
    }

    async fn get_status(&self) -> Result<StrategyStatus> {
        self.inner.get_status().await
    }

    async fn wait_while_busy(&mut self) -> Result<()> {
        self.inner.wait_while_busy().await
    }

    async fn complete_line(&mut self) -> Result<()> {
        self.inner.complete_line().await
    }

    async fn stop(&mut self) -> Result<()> {
        self.inner.stop().await
    }

    async fn at_command_failure(&mut self) {
        self.inner.at_command_failure().await
    }

    async fn complete_collection(&mut self) -> Result<()> {
        self.inner.complete_collection().await
    }

    async fn get_acquire_time(&self) -> Result<Duration> {
        Ok(self
            .inner
            .get_acquire_time()
            .await?
            .saturating_sub(self.extension))
    }

    async fn get_acquire_period(&self) -> Result<Duration> {
        Ok(self
            .inner
            .get_acquire_period()
            .await?
            .saturating_sub(self.extension))
    }

    fn requires_asynchronous_plugins(&self) -> bool {
        self.inner.requires_asynchronous_plugins()
    }

    fn record_failure(&mut self, error: CollectionError) -> CollectionError {
        self.inner.record_failure(error)
    }
}

// =============================================================================
// Usage-throttled collection
// =============================================================================

/// Holds `collect_data` while the camera's usage monitor reports it is full.
pub struct ThrottledCollection {
    inner: Box<dyn CollectionStrategy>,
    throttle: UsageThrottle,
    interrupt: Interrupt,
}

impl ThrottledCollection {
    pub fn new(
        inner: Box<dyn CollectionStrategy>,
        throttle: UsageThrottle,
        interrupt: Interrupt,
    ) -> Self {
        Self {
            inner,
            throttle,
            interrupt,
        }
    }

    pub fn throttle(&self) -> &UsageThrottle {
        &self.throttle
    }

    pub fn decoratee(&self) -> &dyn CollectionStrategy {
        &*self.inner
    }
}

#[async_trait]
impl CollectionStrategy for ThrottledCollection {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn lifecycle_state(&self) -> LifecycleState {
        self.inner.lifecycle_state()
    }

    fn get_number_images_per_collection(&self, collection_time: Duration) -> Result<u32> {
        self.inner.get_number_images_per_collection(collection_time)
    }

    async fn configure_acquire_and_period_times(
        &mut self,
        collection_time: Duration,
    ) -> Result<()> {
        self.inner
            .configure_acquire_and_period_times(collection_time)
            .await
    }

    async fn prepare_for_collection(&mut self, request: &CollectionRequest) -> Result<()> {
        self.inner.prepare_for_collection(request).await
    }

    async fn prepare_for_line(&mut self) -> Result<()> {
        self.inner.prepare_for_line().await
    }

    async fn collect_data(&mut self) -> Result<()> {
        self.inner
            .lifecycle_state()
            .require_collectable("collect_data")?;
        if let Err(e) = self.throttle.wait_for_capacity(&self.interrupt).await {
            return Err(self.inner.record_failure(e));
        }
        self.inner.collect_data().await
    }

    async fn get_status(&self) -> Result<StrategyStatus> {
        self.inner.get_status().await
    }

    async fn wait_while_busy(&mut self) -> Result<()> {
        self.inner.wait_while_busy().await
    }

    async fn complete_line(&mut self) -> Result<()> {
        self.inner.complete_line().await
    }

    async fn stop(&mut self) -> Result<()> {
        self.inner.stop().await
    }

    async fn at_command_failure(&mut self) {
        self.inner.at_command_failure().await
    }

    async fn complete_collection(&mut self) -> Result<()> {
        self.inner.complete_collection().await
    }

    async fn get_acquire_time(&self) -> Result<Duration> {
        self.inner.get_acquire_time().await
    }

    async fn get_acquire_period(&self) -> Result<Duration> {
        self.inner.get_acquire_period().await
    }

    fn requires_asynchronous_plugins(&self) -> bool {
        self.inner.requires_asynchronous_plugins()
    }

    fn record_failure(&mut self, error: CollectionError) -> CollectionError {
        self.inner.record_failure(error)
    }
}

// =============================================================================
// Chain builder
// =============================================================================

enum Layer {
    ImageMultiplier(u32),
    AcquireTimeExtension(Duration),
    Throttle(UsageThrottle, Interrupt),
}

/// Ordered list of decorators applied around a base strategy.
pub struct DecoratorChain {
    base: Box<dyn CollectionStrategy>,
    layers: Vec<Layer>,
}

impl DecoratorChain {
    pub fn new(base: Box<dyn CollectionStrategy>) -> Self {
        Self {
            base,
            layers: Vec::new(),
        }
    }

    pub fn image_multiplier(mut self, factor: u32) -> Self {
        self.layers.push(Layer::ImageMultiplier(factor));
        self
    }

    pub fn acquire_time_extension(mut self, extension: Duration) -> Self {
        self.layers.push(Layer::AcquireTimeExtension(extension));
        self
    }

    pub fn usage_throttle(mut self, throttle: UsageThrottle, interrupt: Interrupt) -> Self {
        self.layers.push(Layer::Throttle(throttle, interrupt));
        self
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Wrap the base strategy, innermost layer first.
    pub fn build(self) -> Result<Box<dyn CollectionStrategy>> {
        let mut strategy = self.base;
        for layer in self.layers {
            strategy = match layer {
                Layer::ImageMultiplier(factor) => Box::new(ImageMultiplier::new(strategy, factor)?),
                Layer::AcquireTimeExtension(extension) => {
                    Box::new(AcquireTimeExtension::new(strategy, extension))
                }
                Layer::Throttle(throttle, interrupt) => {
                    Box::new(ThrottledCollection::new(strategy, throttle, interrupt))
                }
            };
        }
        Ok(strategy)
    }
}
