//! Multi-exposure accumulation.
//!
//! A collection time longer than the detector's single-exposure limit is
//! split into `n` equal sub-exposures that a summation plugin adds into one
//! output frame. Completion is judged by the plugin, not the detector: the
//! detector goes idle while the plugin may still be draining frames.

use crate::error::{CollectionError, DeviceResultExt, Result};
use crate::poll::{BusyPoller, Interrupt, PollOutcome};
use daq_core::capabilities::{FilterType, SummationPlugin};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// How one logical collection is divided into sub-exposures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccumulationPlan {
    pub collection_time: Duration,
    pub sub_exposure: Duration,
    pub images: u32,
}

impl AccumulationPlan {
    /// `images = ceil(collection_time / exposure_time)`; each sub-exposure
    /// uses the full exposure time unless the collection is shorter.
    pub fn new(collection_time: Duration, exposure_time: Duration) -> Result<Self> {
        if exposure_time.is_zero() {
            return Err(CollectionError::Configuration(
                "accumulation exposure time must be positive".into(),
            ));
        }
        if collection_time.is_zero() {
            return Err(CollectionError::Configuration(
                "collection time must be positive".into(),
            ));
        }
        let total = collection_time.as_nanos();
        let each = exposure_time.as_nanos();
        let images = u32::try_from(total.div_ceil(each)).map_err(|_| {
            CollectionError::Configuration(format!(
                "{collection_time:?} in steps of {exposure_time:?} needs too many images"
            ))
        })?;
        Ok(Self {
            collection_time,
            sub_exposure: collection_time.min(exposure_time),
            images,
        })
    }

    /// Time the detector actually integrates.
    pub fn integrated_time(&self) -> Duration {
        self.sub_exposure * self.images
    }
}

/// Owns the summation plugin for the length of a collection.
pub struct SummationStage {
    plugin: Arc<dyn SummationPlugin>,
    count_changed: bool,
}

impl SummationStage {
    pub fn new(plugin: Arc<dyn SummationPlugin>) -> Self {
        Self {
            plugin,
            count_changed: false,
        }
    }

    fn name(&self) -> &str {
        self.plugin.name()
    }

    /// Program the filter to sum `count` frames into one.
    ///
    /// Auto-reset is only enabled when the filter length is unchanged; a
    /// freshly changed length is not honoured by the plugin's first
    /// automatic reset.
    pub async fn configure(&mut self, count: u32) -> Result<()> {
        let name = self.name().to_string();
        self.plugin
            .set_filter_type(FilterType::Sum)
            .await
            .device_context(&name, "set_filter_type")?;
        let current = self
            .plugin
            .num_filter()
            .await
            .device_context(&name, "num_filter")?;
        self.count_changed = current != count;
        if self.count_changed {
            self.plugin
                .set_num_filter(count)
                .await
                .device_context(&name, "set_num_filter")?;
        }
        self.plugin
            .set_auto_reset(!self.count_changed)
            .await
            .device_context(&name, "set_auto_reset")?;
        self.plugin
            .set_enabled(true)
            .await
            .device_context(&name, "set_enabled")?;
        info!(plugin = %name, count, changed = self.count_changed, "summation configured");
        Ok(())
    }

    /// Explicit reset ahead of every logical collection.
    pub async fn reset_before_collection(&mut self) -> Result<()> {
        self.plugin
            .reset_filter()
            .await
            .device_context(self.plugin.name(), "reset_filter")?;
        self.count_changed = false;
        debug!(plugin = %self.plugin.name(), "summation reset requested");
        Ok(())
    }

    /// True while the plugin is enabled and has not yet summed a full set
    /// since its last reset.
    pub async fn is_accumulating(&self) -> Result<bool> {
        accumulating(&*self.plugin).await
    }

    /// Poll the plugin until the summed frame is complete.
    pub async fn wait_until_summed(
        &self,
        poller: &BusyPoller,
        interrupt: &Interrupt,
    ) -> Result<PollOutcome> {
        let plugin: &dyn SummationPlugin = &*self.plugin;
        poller
            .poll_until("summation filter", interrupt, || async move {
                Ok(!accumulating(plugin).await?)
            })
            .await
    }

    /// Leave the plugin disabled. Idempotent.
    pub async fn release(&mut self) -> Result<()> {
        self.count_changed = false;
        self.plugin
            .set_enabled(false)
            .await
            .device_context(self.plugin.name(), "set_enabled")
    }
}

async fn accumulating(plugin: &dyn SummationPlugin) -> Result<bool> {
    let name = plugin.name();
    let enabled = plugin.enabled().await.device_context(name, "enabled")?;
    if !enabled {
        return Ok(false);
    }
    let reset_pending = plugin
        .reset_pending()
        .await
        .device_context(name, "reset_pending")?;
    if reset_pending {
        return Ok(true);
    }
    let filtered = plugin
        .num_filtered()
        .await
        .device_context(name, "num_filtered")?;
    let target = plugin.num_filter().await.device_context(name, "num_filter")?;
    Ok(filtered < target)
}
