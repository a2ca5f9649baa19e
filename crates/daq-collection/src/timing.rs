//! Timing-generator sequencing.
//!
//! A timing generator runs a loaded program of frames for a fixed number of
//! cycles. Each cycle starts with a gated pause frame and continues with the
//! live frames that fire the detector trigger. The sequencer issues one
//! `cont` per point and only after the generator has confirmed completion
//! of the previous cycle; a `cont` sent early is silently dropped by the
//! hardware and the point is lost.

use crate::error::{CollectionError, DeviceResultExt, Result};
use crate::poll::{BusyPoller, CeilingPolicy, Interrupt, PollOutcome};
use daq_core::capabilities::{FrameDescriptor, GeneratorStatus, TimingGenerator};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Output patterns and gating for the per-point program.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingSettings {
    /// Output pattern that fires the detector trigger during live frames
    pub trigger_output: u8,
    /// Input the pause frame waits on
    pub gate_input: u8,
    /// Length of the gated pause frame
    #[serde(with = "humantime_serde")]
    pub pause_time: Duration,
    /// Ceiling on waiting for the generator to report a finished cycle
    #[serde(with = "humantime_serde")]
    pub ready_timeout: Duration,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            trigger_output: 0x01,
            gate_input: 9,
            pause_time: Duration::from_micros(1),
            ready_timeout: Duration::from_secs(5),
        }
    }
}

/// A frame list plus the number of times the generator repeats it.
#[derive(Debug, Clone, PartialEq)]
pub struct TimingProgram {
    frames: Vec<FrameDescriptor>,
    cycles: u32,
}

impl TimingProgram {
    pub fn new(cycles: u32) -> Self {
        Self {
            frames: Vec::new(),
            cycles,
        }
    }

    pub fn with_frame(mut self, frame: FrameDescriptor) -> Self {
        self.frames.push(frame);
        self
    }

    /// Standard program for one point: pause on the gate, then one live
    /// frame per image whose duration is the exposure.
    pub fn per_point(
        settings: &TimingSettings,
        exposure: Duration,
        readout: Duration,
        images: u32,
        cycles: u32,
    ) -> Self {
        let mut program = Self::new(cycles).with_frame(FrameDescriptor::gated(
            settings.pause_time,
            0,
            settings.gate_input,
        ));
        let mut live = FrameDescriptor::free(exposure, settings.trigger_output);
        live.repeat = images;
        program = program.with_frame(live);
        if !readout.is_zero() {
            let mut dead = FrameDescriptor::free(readout, 0);
            dead.repeat = images;
            program = program.with_frame(dead);
        }
        program
    }

    pub fn frames(&self) -> &[FrameDescriptor] {
        &self.frames
    }

    pub fn cycles(&self) -> u32 {
        self.cycles
    }

    /// Wall time of one cycle excluding any time spent paused on the gate.
    pub fn cycle_duration(&self) -> Duration {
        self.frames
            .iter()
            .filter(|f| f.input_gate.is_none())
            .map(FrameDescriptor::span)
            .sum()
    }

    /// The generator stops after its last cycle and later triggers vanish,
    /// so the cycle count must exceed the number of points.
    pub fn validate_for(&self, points: u64) -> Result<()> {
        if self.frames.is_empty() {
            return Err(CollectionError::Configuration(
                "timing program has no frames".into(),
            ));
        }
        if u64::from(self.cycles) <= points {
            return Err(CollectionError::Configuration(format!(
                "timing program runs {} cycles but the scan has {points} points",
                self.cycles
            )));
        }
        Ok(())
    }
}

/// Number of cycles a scan of `points` points needs.
pub fn cycles_for_points(points: u64) -> Result<u32> {
    points
        .checked_add(1)
        .and_then(|c| u32::try_from(c).ok())
        .ok_or_else(|| {
            CollectionError::Configuration(format!(
                "{points} points exceed the timing generator cycle counter"
            ))
        })
}

/// Cycles the sequencer has issued and expects to see completed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleCounter {
    expected: u32,
}

impl CycleCounter {
    pub fn expected(&self) -> u32 {
        self.expected
    }

    /// Refuse to issue while the generator is behind.
    pub fn check_ready(&self, device: &str, reported: u32) -> Result<()> {
        if reported < self.expected {
            return Err(CollectionError::CycleOrdering {
                device: device.to_string(),
                expected: self.expected,
                reported,
            });
        }
        Ok(())
    }

    pub fn issued(&mut self) {
        self.expected += 1;
    }

    pub fn reset(&mut self) {
        self.expected = 0;
    }
}

/// Drives one timing generator through a collection.
pub struct TimingSequencer {
    generator: Arc<dyn TimingGenerator>,
    settings: TimingSettings,
    counter: CycleCounter,
    program: Option<TimingProgram>,
}

impl TimingSequencer {
    pub fn new(generator: Arc<dyn TimingGenerator>, settings: TimingSettings) -> Self {
        Self {
            generator,
            settings,
            counter: CycleCounter::default(),
            program: None,
        }
    }

    pub fn settings(&self) -> &TimingSettings {
        &self.settings
    }

    pub fn counter(&self) -> CycleCounter {
        self.counter
    }

    pub fn generator_name(&self) -> &str {
        self.generator.name()
    }

    /// Replace any running program, load `program` and arm the generator.
    pub async fn load(&mut self, program: TimingProgram) -> Result<()> {
        let name = self.generator.name().to_string();
        self.generator.stop().await.device_context(&name, "stop")?;
        self.generator
            .clear_frames()
            .await
            .device_context(&name, "clear_frames")?;
        for frame in program.frames() {
            self.generator
                .add_frame(*frame)
                .await
                .device_context(&name, "add_frame")?;
        }
        self.generator
            .set_cycle_count(program.cycles())
            .await
            .device_context(&name, "set_cycle_count")?;
        self.generator
            .load_program()
            .await
            .device_context(&name, "load_program")?;
        self.generator.start().await.device_context(&name, "start")?;

        info!(
            generator = %name,
            frames = program.frames().len(),
            cycles = program.cycles(),
            "timing program loaded"
        );
        self.counter.reset();
        self.program = Some(program);
        Ok(())
    }

    /// Issue the next cycle once the generator has finished the previous one.
    pub async fn advance(&mut self, poller: &BusyPoller, interrupt: &Interrupt) -> Result<()> {
        let name = self.generator.name().to_string();
        let cycles = match &self.program {
            Some(program) => program.cycles(),
            None => {
                return Err(CollectionError::Configuration(format!(
                    "{name}: no timing program loaded"
                )))
            }
        };
        let expected = self.counter.expected();
        if expected + 1 >= cycles {
            return Err(CollectionError::Configuration(format!(
                "{name}: all {} usable cycles of the timing program already issued",
                cycles.saturating_sub(1)
            )));
        }

        let generator: &dyn TimingGenerator = &*self.generator;
        let ready = poller
            .clone()
            .with_ceiling(Some(self.settings.ready_timeout))
            .with_policy(CeilingPolicy::Fail);
        ready
            .poll_until("timing generator ready for next cycle", interrupt, || async move {
                let completed = generator
                    .completed_cycles()
                    .await
                    .device_context(generator.name(), "completed_cycles")?;
                let status = generator
                    .status()
                    .await
                    .device_context(generator.name(), "status")?;
                Ok(completed >= expected && status == GeneratorStatus::Paused)
            })
            .await?;

        let reported = self
            .generator
            .completed_cycles()
            .await
            .device_context(&name, "completed_cycles")?;
        self.counter.check_ready(&name, reported)?;

        self.generator.cont().await.device_context(&name, "cont")?;
        self.counter.issued();
        debug!(generator = %name, cycle = expected, "cycle issued");
        Ok(())
    }

    /// True once every issued cycle has been reported complete.
    pub async fn cycles_done(&self) -> Result<bool> {
        let completed = self
            .generator
            .completed_cycles()
            .await
            .device_context(self.generator.name(), "completed_cycles")?;
        Ok(completed >= self.counter.expected())
    }

    /// Block until the last issued cycle has completed.
    pub async fn wait_cycle_complete(
        &self,
        poller: &BusyPoller,
        interrupt: &Interrupt,
    ) -> Result<PollOutcome> {
        let generator: &dyn TimingGenerator = &*self.generator;
        let expected = self.counter.expected();
        poller
            .poll_until("timing generator cycle", interrupt, || async move {
                let completed = generator
                    .completed_cycles()
                    .await
                    .device_context(generator.name(), "completed_cycles")?;
                Ok(completed >= expected)
            })
            .await
    }

    /// Stop the generator and forget the program. Idempotent.
    pub async fn stop(&mut self) -> Result<()> {
        self.counter.reset();
        self.program = None;
        self.generator
            .stop()
            .await
            .device_context(self.generator.name(), "stop")
    }
}
