//! Mock timing-frame generator.
//!
//! Plays a cyclic frame program on its own task. Gated frames hold the
//! program in `Paused` until [`TimingGenerator::cont`]; frames with a
//! non-zero output pattern pulse the attached [`TriggerInput`] once per
//! repeat. A `cont` that arrives while the generator is not paused is
//! dropped, as on the real hardware, and counted so tests can catch it.

use crate::common::{ErrorConfig, EventLog};
use crate::mock_detector::TriggerInput;
use anyhow::{bail, Result};
use async_trait::async_trait;
use daq_core::capabilities::{FrameDescriptor, GeneratorStatus, TimingGenerator};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

#[derive(Debug, Default)]
struct GeneratorRegisters {
    staged: Vec<FrameDescriptor>,
    staged_cycles: u32,
    loaded: Vec<FrameDescriptor>,
    cycles: u32,
    status: GeneratorStatus,
    completed: u32,
    continues: u32,
    ignored_continues: u32,
    /// Set by `cont` until the runner consumes the release
    release_pending: bool,
    release: Option<Arc<Notify>>,
}

struct GeneratorShared {
    name: String,
    regs: Mutex<GeneratorRegisters>,
    target: Option<Arc<dyn TriggerInput>>,
    log: EventLog,
}

impl GeneratorShared {
    async fn run(
        self: Arc<Self>,
        frames: Vec<FrameDescriptor>,
        cycles: u32,
        release: Arc<Notify>,
    ) {
        let mut cycle = 0;
        while cycles == 0 || cycle < cycles {
            for frame in &frames {
                if frame.input_gate.is_some() {
                    {
                        let mut regs = self.regs.lock();
                        if !regs.release_pending {
                            regs.status = GeneratorStatus::Paused;
                        }
                    }
                    release.notified().await;
                    self.regs.lock().release_pending = false;
                }
                for _ in 0..frame.repeat {
                    if frame.output_pattern != 0 {
                        if let Some(target) = &self.target {
                            target.pulse();
                        }
                    }
                    tokio::time::sleep(frame.duration).await;
                }
            }
            cycle += 1;
            self.regs.lock().completed = cycle;
            self.log.record(&self.name, "cycle_complete");
        }
        self.regs.lock().status = GeneratorStatus::Idle;
        self.log.record(&self.name, "program finished");
    }
}

/// Simulated timing-frame generator.
pub struct MockTimingGenerator {
    shared: Arc<GeneratorShared>,
    errors: ErrorConfig,
    runner: Mutex<Option<JoinHandle<()>>>,
}

impl MockTimingGenerator {
    pub fn new(name: impl Into<String>) -> Self {
        Self::builder(name).build()
    }

    pub fn builder(name: impl Into<String>) -> MockTimingGeneratorBuilder {
        MockTimingGeneratorBuilder {
            name: name.into(),
            target: None,
            errors: ErrorConfig::none(),
            log: EventLog::new(),
        }
    }

    /// `cont` calls that released a pause.
    pub fn continues(&self) -> u32 {
        self.shared.regs.lock().continues
    }

    /// `cont` calls dropped because the generator was not paused.
    pub fn ignored_continues(&self) -> u32 {
        self.shared.regs.lock().ignored_continues
    }

    pub fn completed(&self) -> u32 {
        self.shared.regs.lock().completed
    }

    pub fn current_status(&self) -> GeneratorStatus {
        self.shared.regs.lock().status
    }

    /// Frames of the loaded program.
    pub fn frames(&self) -> Vec<FrameDescriptor> {
        self.shared.regs.lock().loaded.clone()
    }

    /// Cycle count of the loaded program.
    pub fn cycles(&self) -> u32 {
        self.shared.regs.lock().cycles
    }

    pub fn event_log(&self) -> &EventLog {
        &self.shared.log
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

impl Drop for MockTimingGenerator {
    fn drop(&mut self) {
        self.abort_runner();
    }
}

pub struct MockTimingGeneratorBuilder {
    name: String,
    target: Option<Arc<dyn TriggerInput>>,
    errors: ErrorConfig,
    log: EventLog,
}

impl MockTimingGeneratorBuilder {
    /// Input pulsed by frames with a non-zero output pattern.
    pub fn target(mut self, target: Arc<dyn TriggerInput>) -> Self {
        self.target = Some(target);
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

    pub fn build(self) -> MockTimingGenerator {
        MockTimingGenerator {
            shared: Arc::new(GeneratorShared {
                name: self.name,
                regs: Mutex::new(GeneratorRegisters::default()),
                target: self.target,
                log: self.log,
            }),
            errors: self.errors,
            runner: Mutex::new(None),
        }
    }
}

#[async_trait]
impl TimingGenerator for MockTimingGenerator {
    fn name(&self) -> &str {
        &self.shared.name
    }

    async fn clear_frames(&self) -> Result<()> {
        self.errors.check_operation(&self.shared.name, "clear_frames")?;
        self.shared.regs.lock().staged.clear();
        Ok(())
    }

    async fn add_frame(&self, frame: FrameDescriptor) -> Result<()> {
        self.errors.check_operation(&self.shared.name, "add_frame")?;
        self.shared.regs.lock().staged.push(frame);
        Ok(())
    }

    async fn set_cycle_count(&self, cycles: u32) -> Result<()> {
        self.errors
            .check_operation(&self.shared.name, "set_cycle_count")?;
        self.shared.regs.lock().staged_cycles = cycles;
        Ok(())
    }

    async fn load_program(&self) -> Result<()> {
        self.errors.check_operation(&self.shared.name, "load_program")?;
        let mut regs = self.shared.regs.lock();
        if regs.status != GeneratorStatus::Idle {
            bail!("{}: cannot load while {}", self.shared.name, regs.status);
        }
        regs.loaded = regs.staged.clone();
        regs.cycles = regs.staged_cycles;
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        self.errors.check_operation(&self.shared.name, "start")?;
        self.abort_runner();
        let (frames, cycles, release) = {
            let mut regs = self.shared.regs.lock();
            if regs.loaded.is_empty() {
                bail!("{}: no frames loaded", self.shared.name);
            }
            let release = Arc::new(Notify::new());
            regs.completed = 0;
            regs.release_pending = false;
            regs.release = Some(Arc::clone(&release));
            regs.status = if regs.loaded[0].input_gate.is_some() {
                GeneratorStatus::Paused
            } else {
                GeneratorStatus::Running
            };
            (regs.loaded.clone(), regs.cycles, release)
        };
        self.record("start");
        let shared = Arc::clone(&self.shared);
        *self.runner.lock() = Some(tokio::spawn(shared.run(frames, cycles, release)));
        Ok(())
    }

    async fn status(&self) -> Result<GeneratorStatus> {
        self.errors.check_operation(&self.shared.name, "status")?;
        Ok(self.shared.regs.lock().status)
    }

    async fn completed_cycles(&self) -> Result<u32> {
        self.errors
            .check_operation(&self.shared.name, "completed_cycles")?;
        Ok(self.shared.regs.lock().completed)
    }

    async fn cont(&self) -> Result<()> {
        self.errors.check_operation(&self.shared.name, "cont")?;
        let released = {
            let mut regs = self.shared.regs.lock();
            if regs.status == GeneratorStatus::Paused {
                regs.status = GeneratorStatus::Running;
                regs.release_pending = true;
                regs.continues += 1;
                if let Some(release) = &regs.release {
                    release.notify_one();
                }
                true
            } else {
                regs.ignored_continues += 1;
                false
            }
        };
        self.record(if released { "cont" } else { "cont ignored" });
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.errors.check_operation(&self.shared.name, "stop")?;
        self.abort_runner();
        {
            let mut regs = self.shared.regs.lock();
            regs.status = GeneratorStatus::Idle;
            regs.release = None;
        }
        self.record("stop");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct PulseCounter(AtomicU32);

    impl TriggerInput for PulseCounter {
        fn pulse(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn load(tfg: &MockTimingGenerator, images: u32, cycles: u32) {
        tfg.clear_frames().await.unwrap();
        tfg.add_frame(FrameDescriptor::gated(Duration::from_micros(1), 0, 9))
            .await
            .unwrap();
        tfg.add_frame(FrameDescriptor {
            repeat: images,
            ..FrameDescriptor::free(Duration::from_millis(100), 1)
        })
        .await
        .unwrap();
        tfg.set_cycle_count(cycles).await.unwrap();
        tfg.load_program().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn cycle_runs_only_after_cont() {
        let counter = Arc::new(PulseCounter::default());
        let tfg = MockTimingGenerator::builder("tfg")
            .target(counter.clone())
            .build();
        load(&tfg, 2, 3).await;
        tfg.start().await.unwrap();
        assert_eq!(tfg.status().await.unwrap(), GeneratorStatus::Paused);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);

        tfg.cont().await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(counter.0.load(Ordering::SeqCst), 2);
        assert_eq!(tfg.completed_cycles().await.unwrap(), 1);
        assert_eq!(tfg.status().await.unwrap(), GeneratorStatus::Paused);
    }

    #[tokio::test(start_paused = true)]
    async fn cont_while_running_is_dropped() {
        let tfg = MockTimingGenerator::new("tfg");
        load(&tfg, 5, 2).await;
        tfg.start().await.unwrap();
        tfg.cont().await.unwrap();
        tfg.cont().await.unwrap();
        assert_eq!(tfg.continues(), 1);
        assert_eq!(tfg.ignored_continues(), 1);
    }

    #[tokio::test]
    async fn start_without_program_fails() {
        let tfg = MockTimingGenerator::new("tfg");
        assert!(tfg.start().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_returns_to_idle() {
        let tfg = MockTimingGenerator::new("tfg");
        load(&tfg, 1, 2).await;
        tfg.start().await.unwrap();
        tfg.stop().await.unwrap();
        assert_eq!(tfg.status().await.unwrap(), GeneratorStatus::Idle);
        tfg.stop().await.unwrap();
    }
}
