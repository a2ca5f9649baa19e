//! Busy-poll engine and abort signalling.
//!
//! Every blocking point in a strategy goes through this module: a sleep
//! between status reads, an optional ceiling and a check of the shared
//! [`Interrupt`]. Time is read from `tokio::time`, so tests can run on a
//! paused clock.

use crate::error::{CollectionError, Result};
use daq_core::limits::{validate_poll_interval, DEFAULT_POLL_INTERVAL};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

// =============================================================================
// Interrupt
// =============================================================================

/// Receiving side of the abort signal, checked at every blocking point.
#[derive(Debug, Clone)]
pub struct Interrupt {
    rx: watch::Receiver<bool>,
}

/// Sending side of the abort signal, owned by the scan driver.
#[derive(Debug, Clone)]
pub struct InterruptHandle {
    tx: Arc<watch::Sender<bool>>,
}

/// Create a connected handle/receiver pair.
pub fn interrupt_pair() -> (InterruptHandle, Interrupt) {
    let (tx, rx) = watch::channel(false);
    (InterruptHandle { tx: Arc::new(tx) }, Interrupt { rx })
}

impl InterruptHandle {
    /// Request that all blocking points return `Interrupted`.
    pub fn interrupt(&self) {
        self.tx.send_replace(true);
    }

    /// Clear a previous request before the next scan.
    pub fn reset(&self) {
        self.tx.send_replace(false);
    }

    pub fn is_interrupted(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> Interrupt {
        Interrupt {
            rx: self.tx.subscribe(),
        }
    }
}

impl Interrupt {
    /// A signal that never fires, for strategies used outside a scan driver.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_interrupted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once an interrupt has been requested.
    pub async fn interrupted(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|requested| *requested).await.is_err() {
            // Sender gone without ever interrupting
            std::future::pending::<()>().await;
        }
    }

    /// Fail fast if an interrupt is already pending.
    pub fn check(&self, what: &str) -> Result<()> {
        if self.is_interrupted() {
            return Err(CollectionError::Interrupted(what.to_string()));
        }
        Ok(())
    }
}

impl Default for Interrupt {
    fn default() -> Self {
        Self::never()
    }
}

/// Sleep that returns early with `Interrupted` when an abort is requested.
pub async fn sleep_interruptible(duration: Duration, interrupt: &Interrupt, what: &str) -> Result<()> {
    interrupt.check(what)?;
    tokio::select! {
        _ = tokio::time::sleep(duration) => Ok(()),
        _ = interrupt.interrupted() => Err(CollectionError::Interrupted(what.to_string())),
    }
}

// =============================================================================
// Busy poller
// =============================================================================

/// What to do when a poll ceiling is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CeilingPolicy {
    /// Log a warning and treat the wait as finished
    #[default]
    Warn,
    /// Return a `Timeout` error
    Fail,
}

/// How a poll loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Completed { polls: u32, elapsed: Duration },
    CeilingReached { elapsed: Duration },
}

impl PollOutcome {
    pub fn elapsed(&self) -> Duration {
        match self {
            PollOutcome::Completed { elapsed, .. } | PollOutcome::CeilingReached { elapsed } => {
                *elapsed
            }
        }
    }

    pub fn timed_out(&self) -> bool {
        matches!(self, PollOutcome::CeilingReached { .. })
    }
}

/// Sleep-and-check loop with an optional ceiling.
#[derive(Debug, Clone, PartialEq)]
pub struct BusyPoller {
    interval: Duration,
    ceiling: Option<Duration>,
    policy: CeilingPolicy,
}

impl Default for BusyPoller {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            ceiling: None,
            policy: CeilingPolicy::Warn,
        }
    }
}

impl BusyPoller {
    /// Poller with the given interval, which must lie within the permitted range.
    pub fn new(interval: Duration) -> Result<Self> {
        let interval = validate_poll_interval(interval)
            .map_err(|e| CollectionError::Configuration(e.to_string()))?;
        Ok(Self {
            interval,
            ..Self::default()
        })
    }

    pub fn with_ceiling(mut self, ceiling: Option<Duration>) -> Self {
        self.ceiling = ceiling;
        self
    }

    pub fn with_policy(mut self, policy: CeilingPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn ceiling(&self) -> Option<Duration> {
        self.ceiling
    }

    pub fn policy(&self) -> CeilingPolicy {
        self.policy
    }

    /// Call `is_done` until it reports true or the ceiling is reached, or
    /// until an interrupt arrives.
    ///
    /// `is_done` returns `Ok(true)` once the awaited condition holds. Its
    /// errors end the loop immediately.
    pub async fn poll_until<F, Fut>(
        &self,
        what: &str,
        interrupt: &Interrupt,
        mut is_done: F,
    ) -> Result<PollOutcome>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<bool>> + Send,
    {
        let started = Instant::now();
        let mut polls = 0u32;

        loop {
            interrupt.check(what)?;

            polls += 1;
            if is_done().await? {
                let elapsed = started.elapsed();
                debug!(what, polls, ?elapsed, "poll condition met");
                return Ok(PollOutcome::Completed { polls, elapsed });
            }

            let elapsed = started.elapsed();
            if let Some(ceiling) = self.ceiling {
                if elapsed >= ceiling {
                    return match self.policy {
                        CeilingPolicy::Warn => {
                            warn!(
                                what,
                                ?elapsed,
                                ?ceiling,
                                "poll ceiling reached; continuing without confirmation"
                            );
                            Ok(PollOutcome::CeilingReached { elapsed })
                        }
                        CeilingPolicy::Fail => Err(CollectionError::Timeout {
                            what: what.to_string(),
                            waited: elapsed,
                        }),
                    };
                }
            }

            sleep_interruptible(self.interval, interrupt, what).await?;
        }
    }
}
