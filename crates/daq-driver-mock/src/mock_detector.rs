//! Mock area detector.
//!
//! Demonstrates:
//! - Internal-trigger acquisition that finishes on its own timeline
//! - External-trigger arming with images counted per [`TriggerInput::pulse`]
//! - Frames forwarded to an attached [`MockSummationPlugin`]
//! - A detector that never finishes, for ceiling tests
//!
//! Register writes are instant. Exposure and readout use `tokio::time`, so a
//! paused test clock runs them without real waiting.

use crate::common::{ErrorConfig, EventLog, TimingConfig};
use crate::mock_summation::MockSummationPlugin;
use anyhow::Result;
use async_trait::async_trait;
use daq_core::capabilities::{AreaDetector, DetectorState, ImageMode};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Something that accepts hardware trigger pulses.
pub trait TriggerInput: Send + Sync {
    fn pulse(&self);
}

#[derive(Debug, Clone)]
struct DetectorRegisters {
    acquire_time: f64,
    acquire_period: f64,
    trigger_mode: i32,
    image_mode: ImageMode,
    num_images: u32,
    state: DetectorState,
    images_acquired: u64,
    /// Bumped by every start and stop so stale frame tasks can tell
    generation: u64,
    pulses: u64,
    ignored_pulses: u64,
}

impl Default for DetectorRegisters {
    fn default() -> Self {
        Self {
            acquire_time: 1.0,
            acquire_period: 1.0,
            trigger_mode: 0,
            image_mode: ImageMode::Single,
            num_images: 1,
            state: DetectorState::Idle,
            images_acquired: 0,
            generation: 0,
            pulses: 0,
            ignored_pulses: 0,
        }
    }
}

impl DetectorRegisters {
    fn target_images(&self) -> Option<u64> {
        match self.image_mode {
            ImageMode::Single => Some(1),
            ImageMode::Multiple => Some(u64::from(self.num_images)),
            ImageMode::Continuous => None,
        }
    }

    fn frame_time(&self) -> Duration {
        secs(self.acquire_time.max(self.acquire_period))
    }
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

struct DetectorShared {
    name: String,
    regs: Mutex<DetectorRegisters>,
    plugin: Option<Arc<MockSummationPlugin>>,
    timing: TimingConfig,
    log: EventLog,
}

impl DetectorShared {
    /// Count one image if the acquisition that produced it is still current.
    fn land_image(&self, generation: u64) -> bool {
        let finished = {
            let mut regs = self.regs.lock();
            if regs.generation != generation || regs.state != DetectorState::Acquire {
                return false;
            }
            regs.images_acquired += 1;
            let finished = regs
                .target_images()
                .is_some_and(|target| regs.images_acquired >= target);
            if finished {
                regs.state = DetectorState::Idle;
            }
            finished
        };
        if let Some(plugin) = &self.plugin {
            plugin.push_frame();
        }
        if finished {
            self.log.record(&self.name, "acquisition complete");
        }
        true
    }

    async fn run_internal(self: Arc<Self>, generation: u64) {
        loop {
            let frame = {
                let regs = self.regs.lock();
                regs.frame_time() + self.timing.frame_readout
            };
            tokio::time::sleep(frame).await;
            if !self.land_image(generation) {
                return;
            }
            if self.regs.lock().state != DetectorState::Acquire {
                return;
            }
        }
    }
}

/// Simulated area detector.
pub struct MockDetector {
    shared: Arc<DetectorShared>,
    external_trigger_mode: i32,
    hang: Mutex<bool>,
    errors: ErrorConfig,
    runner: Mutex<Option<JoinHandle<()>>>,
}

impl MockDetector {
    pub fn new(name: impl Into<String>) -> Self {
        Self::builder(name).build()
    }

    pub fn builder(name: impl Into<String>) -> MockDetectorBuilder {
        MockDetectorBuilder {
            name: name.into(),
            external_trigger_mode: 1,
            errors: ErrorConfig::none(),
            log: EventLog::new(),
            plugin: None,
            timing: TimingConfig::default(),
            hang: false,
        }
    }

    /// Force the state register, e.g. to simulate a fault.
    pub fn set_state(&self, state: DetectorState) {
        self.shared.regs.lock().state = state;
    }

    /// When set, started acquisitions never finish.
    pub fn set_hang(&self, hang: bool) {
        *self.hang.lock() = hang;
    }

    pub fn state(&self) -> DetectorState {
        self.shared.regs.lock().state
    }

    pub fn images(&self) -> u64 {
        self.shared.regs.lock().images_acquired
    }

    /// Trigger pulses received while armed.
    pub fn pulses(&self) -> u64 {
        self.shared.regs.lock().pulses
    }

    /// Trigger pulses that arrived while not armed.
    pub fn ignored_pulses(&self) -> u64 {
        self.shared.regs.lock().ignored_pulses
    }

    pub fn event_log(&self) -> &EventLog {
        &self.shared.log
    }

    pub fn errors(&self) -> &ErrorConfig {
        &self.errors
    }

    fn record(&self, action: impl Into<String>) {
        self.shared.log.record(&self.shared.name, action);
    }

    fn abort_runner(&self) {
        if let Some(handle) = self.runner.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for MockDetector {
    fn drop(&mut self) {
        self.abort_runner();
    }
}

pub struct MockDetectorBuilder {
    name: String,
    external_trigger_mode: i32,
    errors: ErrorConfig,
    log: EventLog,
    plugin: Option<Arc<MockSummationPlugin>>,
    timing: TimingConfig,
    hang: bool,
}

impl MockDetectorBuilder {
    /// Trigger-mode code that arms the detector for external pulses.
    pub fn external_trigger_mode(mut self, code: i32) -> Self {
        self.external_trigger_mode = code;
        self
    }

    pub fn error_config(mut self, errors: ErrorConfig) -> Self {
        self.errors = errors;
        self
    }

    pub fn event_log(mut self, log: EventLog) -> Self {
        self.log = log;
        self
    }

    pub fn plugin(mut self, plugin: Arc<MockSummationPlugin>) -> Self {
        self.plugin = Some(plugin);
        self
    }

    pub fn timing(mut self, timing: TimingConfig) -> Self {
        self.timing = timing;
        self
    }

    pub fn hang(mut self) -> Self {
        self.hang = true;
        self
    }

    pub fn build(self) -> MockDetector {
        MockDetector {
            shared: Arc::new(DetectorShared {
                name: self.name,
                regs: Mutex::new(DetectorRegisters::default()),
                plugin: self.plugin,
                timing: self.timing,
                log: self.log,
            }),
            external_trigger_mode: self.external_trigger_mode,
            hang: Mutex::new(self.hang),
            errors: self.errors,
            runner: Mutex::new(None),
        }
    }
}

impl TriggerInput for MockDetector {
    fn pulse(&self) {
        let (generation, exposure) = {
            let mut regs = self.shared.regs.lock();
            if regs.state != DetectorState::Acquire
                || regs.trigger_mode != self.external_trigger_mode
            {
                regs.ignored_pulses += 1;
                return;
            }
            regs.pulses += 1;
            (regs.generation, secs(regs.acquire_time))
        };
        if *self.hang.lock() {
            return;
        }
        let shared = Arc::clone(&self.shared);
        let exposure = exposure + shared.timing.frame_readout;
        tokio::spawn(async move {
            tokio::time::sleep(exposure).await;
            shared.land_image(generation);
        });
    }
}

#[async_trait]
impl AreaDetector for MockDetector {
    fn name(&self) -> &str {
        &self.shared.name
    }

    async fn set_acquire_time(&self, seconds: f64) -> Result<()> {
        self.errors
            .check_operation(&self.shared.name, "set_acquire_time")?;
        self.shared.regs.lock().acquire_time = seconds;
        self.record(format!("acquire_time {seconds}"));
        Ok(())
    }

    async fn acquire_time(&self) -> Result<f64> {
        Ok(self.shared.regs.lock().acquire_time)
    }

    async fn set_acquire_period(&self, seconds: f64) -> Result<()> {
        self.errors
            .check_operation(&self.shared.name, "set_acquire_period")?;
        self.shared.regs.lock().acquire_period = seconds;
        Ok(())
    }

    async fn acquire_period(&self) -> Result<f64> {
        Ok(self.shared.regs.lock().acquire_period)
    }

    async fn set_trigger_mode(&self, code: i32) -> Result<()> {
        self.errors
            .check_operation(&self.shared.name, "set_trigger_mode")?;
        self.shared.regs.lock().trigger_mode = code;
        self.record(format!("trigger_mode {code}"));
        Ok(())
    }

    async fn trigger_mode(&self) -> Result<i32> {
        Ok(self.shared.regs.lock().trigger_mode)
    }

    async fn set_image_mode(&self, mode: ImageMode) -> Result<()> {
        self.errors
            .check_operation(&self.shared.name, "set_image_mode")?;
        self.shared.regs.lock().image_mode = mode;
        Ok(())
    }

    async fn image_mode(&self) -> Result<ImageMode> {
        Ok(self.shared.regs.lock().image_mode)
    }

    async fn set_num_images(&self, count: u32) -> Result<()> {
        self.errors
            .check_operation(&self.shared.name, "set_num_images")?;
        self.shared.regs.lock().num_images = count;
        self.record(format!("num_images {count}"));
        Ok(())
    }

    async fn num_images(&self) -> Result<u32> {
        Ok(self.shared.regs.lock().num_images)
    }

    async fn detector_state(&self) -> Result<DetectorState> {
        self.errors
            .check_operation(&self.shared.name, "detector_state")?;
        Ok(self.shared.regs.lock().state)
    }

    async fn images_acquired(&self) -> Result<u64> {
        self.errors
            .check_operation(&self.shared.name, "images_acquired")?;
        Ok(self.shared.regs.lock().images_acquired)
    }

    async fn start_acquiring(&self) -> Result<()> {
        self.errors
            .check_operation(&self.shared.name, "start_acquiring")?;
        self.abort_runner();
        let (generation, external) = {
            let mut regs = self.shared.regs.lock();
            if regs.state.is_fault() {
                anyhow::bail!("{}: cannot start in state {}", self.shared.name, regs.state);
            }
            regs.generation += 1;
            regs.images_acquired = 0;
            regs.state = DetectorState::Acquire;
            (
                regs.generation,
                regs.trigger_mode == self.external_trigger_mode,
            )
        };
        self.record("start_acquiring");

        if external || *self.hang.lock() {
            return Ok(());
        }
        let shared = Arc::clone(&self.shared);
        *self.runner.lock() = Some(tokio::spawn(shared.run_internal(generation)));
        Ok(())
    }

    async fn stop_acquiring(&self) -> Result<()> {
        self.errors
            .check_operation(&self.shared.name, "stop_acquiring")?;
        self.abort_runner();
        {
            let mut regs = self.shared.regs.lock();
            regs.generation += 1;
            if !regs.state.is_fault() {
                regs.state = DetectorState::Idle;
            }
        }
        self.record("stop_acquiring");
        Ok(())
    }
}
