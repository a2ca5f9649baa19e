//! RunEngine - step-scan driver over collection strategies
//!
//! The RunEngine owns the strategies of every detector taking part in a scan
//! and calls them in lifecycle order:
//!
//! ```text
//! get_number_images_per_collection   every detector
//! prepare_for_collection             every detector
//! for each line:
//!     prepare_for_line               every detector
//!     for each point:
//!         move axes, wait settled
//!         collect_data               every detector
//!         wait_while_busy            every detector
//!     complete_line                  every detector
//! complete_collection                every detector
//! ```
//!
//! Any failure stops the scan and runs `at_command_failure` on every
//! strategy before the error is returned.
//!
//! # State Machine
//!
//! ```text
//! ┌──────┐    run()    ┌─────────┐
//! │ Idle │────────────▶│ Running │
//! └──────┘             └────┬────┘
//!    ▲                      │ abort()
//!    │                      ▼
//!    │   cleanup done  ┌──────────┐
//!    └─────────────────│ Aborting │
//!                      └──────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! let mut engine = RunEngine::new();
//! let strategy = build_strategy(&config, hardware, engine.interrupt()).await?;
//! engine.add_detector(strategy);
//!
//! let handle = engine.handle();
//! tokio::spawn(async move {
//!     tokio::signal::ctrl_c().await.ok();
//!     handle.abort();
//! });
//!
//! let summary = engine.run(&StepScan::count(Duration::from_secs(1), 10)).await?;
//! ```

use crate::plans::StepScan;
use daq_collection::{
    interrupt_pair, CollectionError, CollectionRequest, CollectionStrategy, Interrupt,
    InterruptHandle, LifecycleState,
};
use futures::future::join_all;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Engine state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No scan running
    Idle,
    /// Executing a scan
    Running,
    /// Abort requested; cleanup in progress
    Aborting,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Idle => write!(f, "idle"),
            EngineState::Running => write!(f, "running"),
            EngineState::Aborting => write!(f, "aborting"),
        }
    }
}

/// Lifecycle step a detector was in when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Sizing,
    Prepare,
    PrepareLine,
    Collect,
    Wait,
    CompleteLine,
    Complete,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Sizing => "sizing",
            Phase::Prepare => "prepare",
            Phase::PrepareLine => "prepare_line",
            Phase::Collect => "collect",
            Phase::Wait => "wait",
            Phase::CompleteLine => "complete_line",
            Phase::Complete => "complete",
        };
        f.write_str(name)
    }
}

/// Why a scan stopped early.
#[derive(Error, Debug)]
pub enum ScanError {
    /// A strategy call failed
    #[error("{detector}: {phase} failed: {source}")]
    Detector {
        detector: String,
        phase: Phase,
        #[source]
        source: CollectionError,
    },

    /// An axis move failed
    #[error("Moving {axis} to {position} failed: {source}")]
    Motion {
        axis: String,
        position: f64,
        #[source]
        source: anyhow::Error,
    },

    /// `abort()` was called between points
    #[error("Scan aborted at point {point}")]
    Aborted { point: u64 },

    /// The scan cannot be started
    #[error("Invalid scan: {0}")]
    Plan(String),
}

impl ScanError {
    /// True when the scan ended because of an abort request.
    pub fn is_abort(&self) -> bool {
        match self {
            ScanError::Aborted { .. } => true,
            ScanError::Detector { source, .. } => source.is_cancellation(),
            _ => false,
        }
    }

    /// Lifecycle step of a detector failure.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            ScanError::Detector { phase, .. } => Some(*phase),
            _ => None,
        }
    }
}

/// Result of a completed scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanSummary {
    pub points: u64,
    pub detectors: usize,
    /// Soft timeouts that were logged and skipped
    pub soft_timeouts: u32,
    pub elapsed: Duration,
}

/// Cloneable control side of a [`RunEngine`].
#[derive(Clone)]
pub struct EngineHandle {
    state: Arc<RwLock<EngineState>>,
    abort: InterruptHandle,
}

impl EngineHandle {
    pub fn state(&self) -> EngineState {
        *self.state.read()
    }

    /// Abort the running scan. Blocking strategy calls return at their
    /// next interrupt check. No effect while idle.
    pub fn abort(&self) {
        let mut state = self.state.write();
        if *state == EngineState::Running {
            *state = EngineState::Aborting;
            self.abort.interrupt();
            warn!("scan abort requested");
        }
    }
}

/// Step-scan driver.
pub struct RunEngine {
    detectors: Vec<Box<dyn CollectionStrategy>>,
    state: Arc<RwLock<EngineState>>,
    abort: InterruptHandle,
}

impl std::fmt::Debug for RunEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunEngine")
            .field("detectors", &self.detectors.len())
            .field("state", &*self.state.read())
            .finish_non_exhaustive()
    }
}

impl RunEngine {
    pub fn new() -> Self {
        let (abort, _) = interrupt_pair();
        Self {
            detectors: Vec::new(),
            state: Arc::new(RwLock::new(EngineState::Idle)),
            abort,
        }
    }

    /// Abort signal to build this engine's strategies with.
    pub fn interrupt(&self) -> Interrupt {
        self.abort.subscribe()
    }

    pub fn add_detector(&mut self, strategy: Box<dyn CollectionStrategy>) {
        self.detectors.push(strategy);
    }

    pub fn with_detector(mut self, strategy: Box<dyn CollectionStrategy>) -> Self {
        self.add_detector(strategy);
        self
    }

    pub fn detectors(&self) -> &[Box<dyn CollectionStrategy>] {
        &self.detectors
    }

    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            state: self.state.clone(),
            abort: self.abort.clone(),
        }
    }

    pub fn state(&self) -> EngineState {
        *self.state.read()
    }

    fn set_state(&self, state: EngineState) {
        *self.state.write() = state;
    }

    /// Run `plan` to completion.
    ///
    /// On any error every strategy has been through `at_command_failure`
    /// by the time this returns.
    pub async fn run(&mut self, plan: &StepScan) -> Result<ScanSummary, ScanError> {
        if self.detectors.is_empty() {
            return Err(ScanError::Plan("no detectors configured".to_string()));
        }
        if plan.num_points() == 0 {
            return Err(ScanError::Plan("scan has no points".to_string()));
        }

        self.abort.reset();
        self.set_state(EngineState::Running);
        info!(
            points = plan.num_points(),
            detectors = self.detectors.len(),
            collection_time = ?plan.collection_time(),
            "scan started"
        );

        let result = self.execute(plan).await;

        if let Err(e) = &result {
            error!(error = %e, "scan failed; cleaning up detectors");
            // All detectors at once; cleanup never fails
            join_all(
                self.detectors
                    .iter_mut()
                    .map(|detector| detector.at_command_failure()),
            )
            .await;
        }

        self.set_state(EngineState::Idle);
        self.abort.reset();
        result
    }

    async fn execute(&mut self, plan: &StepScan) -> Result<ScanSummary, ScanError> {
        let started = Instant::now();
        let t = plan.collection_time();
        let shape = plan.shape();

        let mut requests = Vec::with_capacity(self.detectors.len());
        for detector in &self.detectors {
            let images = detector
                .get_number_images_per_collection(t)
                .map_err(|e| detector_error(detector.as_ref(), Phase::Sizing, e))?;
            requests.push(CollectionRequest::new(t, images, shape.clone()));
        }
        for (detector, request) in self.detectors.iter_mut().zip(&requests) {
            detector
                .prepare_for_collection(request)
                .await
                .map_err(|e| detector_error(detector.as_ref(), Phase::Prepare, e))?;
        }

        let points = plan.num_points();
        let line_length = shape.line_length();
        let mut soft_timeouts = 0;
        let mut previous: Option<Vec<usize>> = None;

        for point in 0..points {
            if point % line_length == 0 {
                if point > 0 {
                    self.complete_line().await?;
                }
                for detector in &mut self.detectors {
                    detector
                        .prepare_for_line()
                        .await
                        .map_err(|e| detector_error(detector.as_ref(), Phase::PrepareLine, e))?;
                }
            }

            self.check_abort(point)?;
            let indices = plan.indices_of(point);
            move_axes(plan, previous.as_deref(), &indices).await?;
            previous = Some(indices);
            self.check_abort(point)?;

            debug!(point, "collecting");
            for detector in &mut self.detectors {
                detector
                    .collect_data()
                    .await
                    .map_err(|e| detector_error(detector.as_ref(), Phase::Collect, e))?;
            }
            for detector in &mut self.detectors {
                if let Err(e) = detector.wait_while_busy().await {
                    if e.is_soft() && detector.lifecycle_state() != LifecycleState::Fault {
                        warn!(detector = %detector.name(), point, error = %e, "soft timeout; continuing");
                        soft_timeouts += 1;
                        continue;
                    }
                    return Err(detector_error(detector.as_ref(), Phase::Wait, e));
                }
            }
        }

        self.complete_line().await?;
        for detector in &mut self.detectors {
            detector
                .complete_collection()
                .await
                .map_err(|e| detector_error(detector.as_ref(), Phase::Complete, e))?;
        }

        let summary = ScanSummary {
            points,
            detectors: self.detectors.len(),
            soft_timeouts,
            elapsed: started.elapsed(),
        };
        info!(
            points = summary.points,
            soft_timeouts = summary.soft_timeouts,
            elapsed = ?summary.elapsed,
            "scan complete"
        );
        Ok(summary)
    }

    async fn complete_line(&mut self) -> Result<(), ScanError> {
        for detector in &mut self.detectors {
            detector
                .complete_line()
                .await
                .map_err(|e| detector_error(detector.as_ref(), Phase::CompleteLine, e))?;
        }
        Ok(())
    }

    fn check_abort(&self, point: u64) -> Result<(), ScanError> {
        if self.abort.is_interrupted() {
            return Err(ScanError::Aborted { point });
        }
        Ok(())
    }
}

impl Default for RunEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn detector_error(
    detector: &dyn CollectionStrategy,
    phase: Phase,
    source: CollectionError,
) -> ScanError {
    ScanError::Detector {
        detector: detector.name().to_string(),
        phase,
        source,
    }
}

/// Move every axis whose index changed since the previous point, then wait
/// for all of them to settle.
async fn move_axes(
    plan: &StepScan,
    previous: Option<&[usize]>,
    indices: &[usize],
) -> Result<(), ScanError> {
    let mut moved = Vec::new();
    for (slot, (axis, &index)) in plan.axes().iter().zip(indices).enumerate() {
        if previous.map(|p| p[slot]) == Some(index) {
            continue;
        }
        let position = axis.position_at(index);
        axis.mover()
            .move_abs(position)
            .await
            .map_err(|source| ScanError::Motion {
                axis: axis.mover().name().to_string(),
                position,
                source,
            })?;
        moved.push((axis, position));
    }
    for (axis, position) in moved {
        axis.mover()
            .wait_settled()
            .await
            .map_err(|source| ScanError::Motion {
                axis: axis.mover().name().to_string(),
                position,
                source,
            })?;
    }
    Ok(())
}
