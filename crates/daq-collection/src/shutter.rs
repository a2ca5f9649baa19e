//! Shutter-synchronised exposures.
//!
//! The shutter defines the beam exposure: it opens, the detector starts once
//! the blades are clear, and a close is scheduled on its own timeline so the
//! orchestration task is free to poll the detector meanwhile. The outcome of
//! that close is checked at the next `collect_data` or at completion.

use crate::error::{CollectionError, DeviceResultExt, Result};
use crate::poll::{sleep_interruptible, Interrupt};
use daq_core::capabilities::{AreaDetector, ShutterChannel};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Channel values and delays of one shutter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutterSettings {
    pub open_value: f64,
    pub close_value: f64,
    /// Time from the open command to a clear beam path
    #[serde(with = "humantime_serde")]
    pub open_delay: Duration,
    /// Extra time the shutter stays open after the exposure
    #[serde(with = "humantime_serde")]
    pub close_delay: Duration,
}

impl Default for ShutterSettings {
    fn default() -> Self {
        Self {
            open_value: 1.0,
            close_value: 0.0,
            open_delay: Duration::ZERO,
            close_delay: Duration::ZERO,
        }
    }
}

/// Opens the shutter, starts the detector and owns the deferred close.
pub struct ShutterSynchronizer {
    shutter: Arc<dyn ShutterChannel>,
    settings: ShutterSettings,
    pending_close: Option<JoinHandle<anyhow::Result<()>>>,
}

impl ShutterSynchronizer {
    pub fn new(shutter: Arc<dyn ShutterChannel>, settings: ShutterSettings) -> Self {
        Self {
            shutter,
            settings,
            pending_close: None,
        }
    }

    pub fn settings(&self) -> &ShutterSettings {
        &self.settings
    }

    pub fn has_pending_close(&self) -> bool {
        self.pending_close.is_some()
    }

    fn name(&self) -> &str {
        self.shutter.name()
    }

    /// Drive the shutter closed now.
    pub async fn close(&self) -> Result<()> {
        self.shutter
            .write(self.settings.close_value)
            .await
            .device_context(self.name(), "close")
    }

    /// Wait for the previous deferred close and report its outcome.
    pub async fn settle_pending_close(&mut self) -> Result<()> {
        let Some(handle) = self.pending_close.take() else {
            return Ok(());
        };
        let device = self.name().to_string();
        match handle.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(CollectionError::DeferredAction {
                device,
                action: "close",
                message: format!("{e:#}"),
            }),
            Err(join) => Err(CollectionError::DeferredAction {
                device,
                action: "close",
                message: join.to_string(),
            }),
        }
    }

    /// Cancel a scheduled close without waiting on it.
    pub fn cancel_pending_close(&mut self) {
        if let Some(handle) = self.pending_close.take() {
            handle.abort();
        }
    }

    /// Open, wait for the blades, start the detector and schedule the close.
    ///
    /// The close fires `exposure + close_delay` after the open command.
    pub async fn expose(
        &mut self,
        detector: &dyn AreaDetector,
        exposure: Duration,
        interrupt: &Interrupt,
    ) -> Result<()> {
        self.settle_pending_close().await?;

        self.shutter
            .write(self.settings.open_value)
            .await
            .device_context(self.name(), "open")?;
        let opened_at = Instant::now();
        debug!(shutter = %self.name(), "shutter opened");

        if let Err(e) =
            sleep_interruptible(self.settings.open_delay, interrupt, "waiting for shutter to open")
                .await
        {
            self.close_after_failure().await;
            return Err(e);
        }

        if let Err(e) = detector
            .start_acquiring()
            .await
            .device_context(detector.name(), "start_acquiring")
        {
            self.close_after_failure().await;
            return Err(e);
        }

        let close_at = opened_at + exposure + self.settings.close_delay;
        let shutter = Arc::clone(&self.shutter);
        let close_value = self.settings.close_value;
        self.pending_close = Some(tokio::spawn(async move {
            tokio::time::sleep_until(close_at).await;
            shutter.write(close_value).await
        }));
        Ok(())
    }

    async fn close_after_failure(&self) {
        if let Err(e) = self.close().await {
            warn!(shutter = %self.name(), error = %e, "failed to close shutter after aborted exposure");
        }
    }
}

impl Drop for ShutterSynchronizer {
    fn drop(&mut self) {
        self.cancel_pending_close();
    }
}
