//! The base detector strategy.
//!
//! One state machine covers every triggering variant. What differs between
//! variants (who starts the exposure, what "finished" means, which extra
//! device is involved) lives in [`Variant`]; what differs between detector
//! families lives in [`VendorHooks`].

use crate::accumulation::{AccumulationPlan, SummationStage};
use crate::config::PollConfig;
use crate::error::{CollectionError, DeviceResultExt, Result};
use crate::hooks::{from_secs, to_secs, VendorHooks};
use crate::poll::{BusyPoller, Interrupt, PollOutcome};
use crate::request::CollectionRequest;
use crate::shutter::{ShutterSettings, ShutterSynchronizer};
use crate::state::{LifecycleState, StrategyStatus};
use crate::strategy::CollectionStrategy;
use crate::timing::{cycles_for_points, TimingProgram, TimingSequencer, TimingSettings};
use async_trait::async_trait;
use daq_core::capabilities::{
    AreaDetector, ImageMode, ShutterChannel, SummationPlugin, TimingGenerator,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// How exposures are started and how their end is detected.
pub enum Variant {
    /// Software start; done when the detector-state register clears
    Software,
    /// Detector armed once per collection and triggered externally; done
    /// when the image counter reaches the expected total
    HardwareTriggered,
    /// Detector armed and triggered by a timing generator, one cycle per point
    TimingGenerator(TimingSequencer),
    /// Software start bracketed by a shutter that defines the beam exposure
    Shutter(ShutterSynchronizer),
    /// Long exposures split into sub-exposures summed by a plugin
    Accumulation {
        stage: SummationStage,
        exposure_time: Duration,
    },
}

impl Variant {
    pub fn timing_generator(generator: Arc<dyn TimingGenerator>, settings: TimingSettings) -> Self {
        Variant::TimingGenerator(TimingSequencer::new(generator, settings))
    }

    pub fn shutter(shutter: Arc<dyn ShutterChannel>, settings: ShutterSettings) -> Self {
        Variant::Shutter(ShutterSynchronizer::new(shutter, settings))
    }

    pub fn accumulation(plugin: Arc<dyn SummationPlugin>, exposure_time: Duration) -> Self {
        Variant::Accumulation {
            stage: SummationStage::new(plugin),
            exposure_time,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Variant::Software => "software",
            Variant::HardwareTriggered => "hardware_triggered",
            Variant::TimingGenerator(_) => "timing_generator",
            Variant::Shutter(_) => "shutter",
            Variant::Accumulation { .. } => "accumulation",
        }
    }
}

/// Per-collection state, dropped at completion or failure.
struct ActiveCollection {
    request: CollectionRequest,
    poller: BusyPoller,
    plan: Option<AccumulationPlan>,
    /// Cumulative images the detector should have counted so far
    expected_images: u64,
    points: u64,
    lines: u64,
}

/// Lifecycle state machine shared by all detector variants.
pub struct DetectorStrategy {
    name: String,
    detector: Arc<dyn AreaDetector>,
    variant: Variant,
    hooks: VendorHooks,
    poll: PollConfig,
    interrupt: Interrupt,
    lifecycle: LifecycleState,
    active: Option<ActiveCollection>,
}

impl DetectorStrategy {
    pub fn new(detector: Arc<dyn AreaDetector>, variant: Variant) -> Self {
        Self {
            name: detector.name().to_string(),
            detector,
            variant,
            hooks: VendorHooks::default(),
            poll: PollConfig::default(),
            interrupt: Interrupt::never(),
            lifecycle: LifecycleState::Unconfigured,
            active: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_hooks(mut self, hooks: VendorHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_poll(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn variant(&self) -> &Variant {
        &self.variant
    }

    pub fn hooks(&self) -> &VendorHooks {
        &self.hooks
    }

    /// Points started since the collection was prepared.
    pub fn points_collected(&self) -> u64 {
        self.active.as_ref().map_or(0, |a| a.points)
    }

    fn natural_images(&self, collection_time: Duration) -> Result<u32> {
        match &self.variant {
            Variant::Accumulation { exposure_time, .. } => {
                Ok(AccumulationPlan::new(collection_time, *exposure_time)?.images)
            }
            _ => Ok(1),
        }
    }

    /// Exposure the detector is programmed with for a collection time,
    /// lengthened by `extension`.
    fn exposure_for(&self, collection_time: Duration, extension: Duration) -> Result<Duration> {
        let base = match &self.variant {
            Variant::Accumulation { exposure_time, .. } => {
                AccumulationPlan::new(collection_time, *exposure_time)?.sub_exposure
            }
            _ => collection_time,
        };
        let exposure = base + extension;
        self.hooks.check_exposure(exposure)?;
        Ok(exposure)
    }

    async fn program_times(&self, collection_time: Duration, extension: Duration) -> Result<()> {
        let exposure = self.exposure_for(collection_time, extension)?;
        let period = self.hooks.period_for(exposure);
        self.detector
            .set_acquire_time(to_secs(exposure))
            .await
            .device_context(&self.name, "set_acquire_time")?;
        self.detector
            .set_acquire_period(to_secs(period))
            .await
            .device_context(&self.name, "set_acquire_period")?;
        debug!(detector = %self.name, ?exposure, ?period, "exposure programmed");
        Ok(())
    }

    async fn set_counting(&self, trigger_mode: i32, images: u32) -> Result<()> {
        let image_mode = if images == 1 {
            ImageMode::Single
        } else {
            ImageMode::Multiple
        };
        self.detector
            .set_trigger_mode(trigger_mode)
            .await
            .device_context(&self.name, "set_trigger_mode")?;
        self.detector
            .set_image_mode(image_mode)
            .await
            .device_context(&self.name, "set_image_mode")?;
        self.detector
            .set_num_images(images)
            .await
            .device_context(&self.name, "set_num_images")
    }

    async fn arm(&self) -> Result<()> {
        self.detector
            .start_acquiring()
            .await
            .device_context(&self.name, "start_acquiring")
    }

    /// Hardware writes for `prepare_for_collection`, after validation.
    async fn program_hardware(
        &mut self,
        request: &CollectionRequest,
        program: Option<TimingProgram>,
        scan_images: u32,
    ) -> Result<()> {
        self.detector
            .stop_acquiring()
            .await
            .device_context(&self.name, "stop_acquiring")?;
        self.program_times(request.collection_time, request.exposure_extension)
            .await?;

        let internal = self.hooks.internal_trigger_mode;
        let external = self.hooks.external_trigger_mode;
        match &self.variant {
            Variant::Software | Variant::Shutter(_) | Variant::Accumulation { .. } => {
                self.set_counting(internal, request.num_images).await?;
            }
            Variant::HardwareTriggered | Variant::TimingGenerator(_) => {
                self.set_counting(external, scan_images).await?;
                self.arm().await?;
            }
        }

        let name = self.name.clone();
        match &mut self.variant {
            Variant::Software | Variant::HardwareTriggered => {}
            Variant::TimingGenerator(sequencer) => {
                if let Some(program) = program {
                    sequencer.load(program).await?;
                }
            }
            Variant::Shutter(sync) => {
                sync.cancel_pending_close();
                sync.close().await?;
            }
            Variant::Accumulation { stage, .. } => {
                // One summed frame per point, multiplied images included
                stage.configure(request.num_images).await?;
            }
        }
        info!(
            detector = %name,
            variant = self.variant.kind(),
            collection_time = ?request.collection_time,
            num_images = request.num_images,
            points = request.scan_shape.points(),
            "collection prepared"
        );
        Ok(())
    }

    async fn start_point(&mut self) -> Result<()> {
        let detector = Arc::clone(&self.detector);
        let interrupt = self.interrupt.clone();
        let Some(active) = self.active.as_mut() else {
            return Err(CollectionError::NotPrepared {
                operation: "collect_data",
                state: self.lifecycle,
            });
        };
        interrupt.check("starting exposure")?;

        match &mut self.variant {
            Variant::Software => {
                detector
                    .start_acquiring()
                    .await
                    .device_context(&self.name, "start_acquiring")?;
            }
            Variant::HardwareTriggered => {
                active.expected_images += u64::from(active.request.num_images);
                debug!(detector = %self.name, expected = active.expected_images, "awaiting external trigger");
            }
            Variant::TimingGenerator(sequencer) => {
                sequencer.advance(&active.poller, &interrupt).await?;
                active.expected_images += u64::from(active.request.num_images);
            }
            Variant::Shutter(sync) => {
                sync.expose(&*detector, active.request.collection_time, &interrupt)
                    .await?;
            }
            Variant::Accumulation { stage, .. } => {
                stage.reset_before_collection().await?;
                detector
                    .start_acquiring()
                    .await
                    .device_context(&self.name, "start_acquiring")?;
            }
        }
        active.points += 1;
        Ok(())
    }

    async fn wait_point(&self) -> Result<PollOutcome> {
        let Some(active) = self.active.as_ref() else {
            return Err(CollectionError::NotPrepared {
                operation: "wait_while_busy",
                state: self.lifecycle,
            });
        };
        let poller = &active.poller;
        let interrupt = &self.interrupt;
        let detector: &dyn AreaDetector = &*self.detector;

        match &self.variant {
            Variant::Software | Variant::Shutter(_) => {
                poller
                    .poll_until("detector idle", interrupt, || async move {
                        Ok(!detector_busy(detector).await?)
                    })
                    .await
            }
            Variant::HardwareTriggered => {
                let expected = active.expected_images;
                poller
                    .poll_until("external trigger images", interrupt, || async move {
                        Ok(!images_pending(detector, expected).await?)
                    })
                    .await
            }
            Variant::TimingGenerator(sequencer) => {
                let cycle = sequencer.wait_cycle_complete(poller, interrupt).await?;
                if cycle.timed_out() {
                    return Ok(cycle);
                }
                let expected = active.expected_images;
                poller
                    .poll_until("triggered images", interrupt, || async move {
                        Ok(!images_pending(detector, expected).await?)
                    })
                    .await
            }
            Variant::Accumulation { stage, .. } => stage.wait_until_summed(poller, interrupt).await,
        }
    }

    /// One-shot version of the `wait_point` condition.
    async fn point_in_progress(&self) -> Result<bool> {
        let detector: &dyn AreaDetector = &*self.detector;
        let expected = self.active.as_ref().map_or(0, |a| a.expected_images);
        match &self.variant {
            Variant::Software | Variant::Shutter(_) => detector_busy(detector).await,
            Variant::HardwareTriggered => images_pending(detector, expected).await,
            Variant::TimingGenerator(sequencer) => {
                if !sequencer.cycles_done().await? {
                    return Ok(true);
                }
                images_pending(detector, expected).await
            }
            Variant::Accumulation { stage, .. } => stage.is_accumulating().await,
        }
    }

    /// Return hardware to a quiescent state. Collects every error instead of
    /// stopping at the first.
    async fn release_hardware(&mut self, settle_deferred: bool) -> Vec<CollectionError> {
        let mut errors = Vec::new();

        match &mut self.variant {
            Variant::Shutter(sync) => {
                if settle_deferred {
                    if let Err(e) = sync.settle_pending_close().await {
                        errors.push(e);
                    }
                } else {
                    sync.cancel_pending_close();
                }
                if let Err(e) = sync.close().await {
                    errors.push(e);
                }
            }
            Variant::TimingGenerator(sequencer) => {
                if let Err(e) = sequencer.stop().await {
                    errors.push(e);
                }
            }
            Variant::Accumulation { stage, .. } => {
                if let Err(e) = stage.release().await {
                    errors.push(e);
                }
            }
            Variant::Software | Variant::HardwareTriggered => {}
        }

        if let Err(e) = self
            .detector
            .stop_acquiring()
            .await
            .device_context(&self.name, "stop_acquiring")
        {
            errors.push(e);
        }
        errors
    }

    fn fault(&mut self, err: CollectionError) -> CollectionError {
        warn!(detector = %self.name, state = %self.lifecycle, error = %err, "collection faulted");
        self.lifecycle = LifecycleState::Fault;
        err
    }
}

/// Busy per the detector-state register; a fault state is an error.
async fn detector_busy(detector: &dyn AreaDetector) -> Result<bool> {
    let state = detector
        .detector_state()
        .await
        .device_context(detector.name(), "detector_state")?;
    if state.is_fault() {
        return Err(CollectionError::DeviceFault {
            device: detector.name().to_string(),
            state,
        });
    }
    Ok(state.is_busy())
}

async fn images_pending(detector: &dyn AreaDetector, expected: u64) -> Result<bool> {
    let state = detector
        .detector_state()
        .await
        .device_context(detector.name(), "detector_state")?;
    if state.is_fault() {
        return Err(CollectionError::DeviceFault {
            device: detector.name().to_string(),
            state,
        });
    }
    let acquired = detector
        .images_acquired()
        .await
        .device_context(detector.name(), "images_acquired")?;
    Ok(acquired < expected)
}

#[async_trait]
impl CollectionStrategy for DetectorStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle_state(&self) -> LifecycleState {
        self.lifecycle
    }

    fn get_number_images_per_collection(&self, collection_time: Duration) -> Result<u32> {
        self.natural_images(collection_time)
    }

    async fn configure_acquire_and_period_times(
        &mut self,
        collection_time: Duration,
    ) -> Result<()> {
        self.program_times(collection_time, Duration::ZERO).await
    }

    #[instrument(skip(self, request), fields(detector = %self.name))]
    async fn prepare_for_collection(&mut self, request: &CollectionRequest) -> Result<()> {
        self.lifecycle.require_preparable()?;
        request.validate()?;
        request.check_image_echo(self.natural_images(request.collection_time)?)?;
        let exposure = self.exposure_for(request.collection_time, request.exposure_extension)?;
        let poller = self.poll.poller_for(request.collection_time)?;

        let points = request.scan_shape.points();
        let scan_images = u32::try_from(points * u64::from(request.num_images)).map_err(|_| {
            CollectionError::Configuration(format!(
                "{points} points of {} images overflow the detector image counter",
                request.num_images
            ))
        })?;

        let program = match &self.variant {
            Variant::TimingGenerator(sequencer) => {
                let program = TimingProgram::per_point(
                    sequencer.settings(),
                    exposure,
                    self.hooks.readout_time,
                    request.num_images,
                    cycles_for_points(points)?,
                );
                program.validate_for(points)?;
                Some(program)
            }
            _ => None,
        };
        let plan = match &self.variant {
            Variant::Accumulation { exposure_time, .. } => {
                Some(AccumulationPlan::new(request.collection_time, *exposure_time)?)
            }
            _ => None,
        };

        // Validation done; from here on hardware is written
        self.active = None;
        if let Err(e) = self.program_hardware(request, program, scan_images).await {
            return Err(self.fault(e));
        }
        self.active = Some(ActiveCollection {
            request: request.clone(),
            poller,
            plan,
            expected_images: 0,
            points: 0,
            lines: 0,
        });
        self.lifecycle = LifecycleState::Prepared;
        Ok(())
    }

    async fn prepare_for_line(&mut self) -> Result<()> {
        if self.lifecycle != LifecycleState::Prepared {
            return Err(CollectionError::NotPrepared {
                operation: "prepare_for_line",
                state: self.lifecycle,
            });
        }
        if let Some(active) = self.active.as_mut() {
            active.lines += 1;
            debug!(detector = %self.name, line = active.lines, "line started");
        }
        Ok(())
    }

    async fn collect_data(&mut self) -> Result<()> {
        self.lifecycle.require_collectable("collect_data")?;
        match self.start_point().await {
            Ok(()) => {
                self.lifecycle = LifecycleState::Acquiring;
                Ok(())
            }
            Err(e) => Err(self.fault(e)),
        }
    }

    async fn get_status(&self) -> Result<StrategyStatus> {
        match self.lifecycle {
            LifecycleState::Fault => Ok(StrategyStatus::Fault),
            LifecycleState::Acquiring | LifecycleState::Busy => {
                match self.point_in_progress().await {
                    Ok(true) => Ok(StrategyStatus::Busy),
                    Ok(false) => Ok(StrategyStatus::Idle),
                    Err(CollectionError::DeviceFault { .. }) => Ok(StrategyStatus::Fault),
                    Err(e) => Err(e),
                }
            }
            _ => Ok(StrategyStatus::Idle),
        }
    }

    async fn wait_while_busy(&mut self) -> Result<()> {
        match self.lifecycle {
            LifecycleState::Fault => return Err(CollectionError::Faulted),
            LifecycleState::Acquiring | LifecycleState::Busy => {}
            _ => return Ok(()),
        }
        self.lifecycle = LifecycleState::Busy;
        match self.wait_point().await {
            Ok(outcome) => {
                if outcome.timed_out() {
                    warn!(
                        detector = %self.name,
                        elapsed = ?outcome.elapsed(),
                        "point not confirmed complete; continuing"
                    );
                }
                self.lifecycle = LifecycleState::Prepared;
                Ok(())
            }
            Err(e) if e.is_soft() => {
                warn!(detector = %self.name, error = %e, "point not confirmed complete");
                self.lifecycle = LifecycleState::Prepared;
                Err(e)
            }
            Err(e) => Err(self.fault(e)),
        }
    }

    async fn complete_line(&mut self) -> Result<()> {
        if let Variant::Shutter(sync) = &mut self.variant {
            if let Err(e) = sync.settle_pending_close().await {
                return Err(self.fault(e));
            }
        }
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        let mut errors = Vec::new();
        if let Err(e) = self
            .detector
            .stop_acquiring()
            .await
            .device_context(&self.name, "stop_acquiring")
        {
            errors.push(e);
        }
        match &mut self.variant {
            Variant::TimingGenerator(sequencer) => {
                if let Err(e) = sequencer.stop().await {
                    errors.push(e);
                }
            }
            Variant::Shutter(sync) => {
                sync.cancel_pending_close();
                if let Err(e) = sync.close().await {
                    errors.push(e);
                }
            }
            _ => {}
        }
        if self.lifecycle.in_flight() {
            self.lifecycle = LifecycleState::Fault;
        }
        info!(detector = %self.name, "stopped");
        match errors.into_iter().next() {
            Some(first) => Err(first),
            None => Ok(()),
        }
    }

    async fn at_command_failure(&mut self) {
        let errors = self.release_hardware(false).await;
        for e in &errors {
            warn!(detector = %self.name, error = %e, "cleanup step failed after command failure");
        }
        self.active = None;
        self.lifecycle = LifecycleState::Unconfigured;
        info!(detector = %self.name, "reset after command failure");
    }

    #[instrument(skip(self), fields(detector = %self.name))]
    async fn complete_collection(&mut self) -> Result<()> {
        match self.lifecycle {
            LifecycleState::Unconfigured | LifecycleState::Complete => return Ok(()),
            LifecycleState::Fault => return Err(CollectionError::Faulted),
            LifecycleState::Acquiring | LifecycleState::Busy => match self.wait_while_busy().await {
                Ok(()) => {}
                Err(e) if e.is_soft() => {
                    warn!(detector = %self.name, error = %e, "completing with last point unconfirmed");
                }
                Err(e) => return Err(e),
            },
            LifecycleState::Prepared => {}
        }

        let points = self.points_collected();
        let mut errors = self.release_hardware(true).await.into_iter();
        self.active = None;
        match errors.next() {
            None => {
                self.lifecycle = LifecycleState::Complete;
                info!(detector = %self.name, points, "collection complete");
                Ok(())
            }
            Some(first) => {
                for e in errors {
                    warn!(detector = %self.name, error = %e, "additional cleanup failure");
                }
                Err(self.fault(first))
            }
        }
    }

    async fn get_acquire_time(&self) -> Result<Duration> {
        // The detector only holds one sub-exposure; report the logical time
        if let Some(ActiveCollection {
            plan: Some(plan),
            request,
            ..
        }) = self.active.as_ref()
        {
            return Ok(plan.collection_time + request.exposure_extension);
        }
        let seconds = self
            .detector
            .acquire_time()
            .await
            .device_context(&self.name, "acquire_time")?;
        from_secs(&self.name, seconds)
    }

    async fn get_acquire_period(&self) -> Result<Duration> {
        let seconds = self
            .detector
            .acquire_period()
            .await
            .device_context(&self.name, "acquire_period")?;
        from_secs(&self.name, seconds)
    }

    fn requires_asynchronous_plugins(&self) -> bool {
        matches!(
            self.variant,
            Variant::HardwareTriggered | Variant::TimingGenerator(_) | Variant::Accumulation { .. }
        )
    }

    fn record_failure(&mut self, error: CollectionError) -> CollectionError {
        self.fault(error)
    }
}
