//! Timing-generator sequencing against the mock generator

use daq_collection::{
    CollectionError, CollectionRequest, CollectionStrategy, DetectorStrategy, LifecycleState,
    ScanShape, TimingSettings, VendorHooks, Variant,
};
use daq_core::capabilities::{AreaDetector, GeneratorStatus, TimingGenerator};
use daq_driver_mock::{EventLog, MockDetector, MockTimingGenerator};
use std::sync::Arc;
use std::time::Duration;

struct Rig {
    log: EventLog,
    detector: Arc<MockDetector>,
    tfg: Arc<MockTimingGenerator>,
}

fn rig() -> Rig {
    rig_with_trigger_code(1)
}

fn rig_with_trigger_code(code: i32) -> Rig {
    let log = EventLog::new();
    let detector = Arc::new(
        MockDetector::builder("det")
            .external_trigger_mode(code)
            .event_log(log.clone())
            .build(),
    );
    let tfg = Arc::new(
        MockTimingGenerator::builder("tfg")
            .target(detector.clone())
            .event_log(log.clone())
            .build(),
    );
    Rig { log, detector, tfg }
}

fn strategy(rig: &Rig) -> DetectorStrategy {
    DetectorStrategy::new(
        rig.detector.clone(),
        Variant::timing_generator(rig.tfg.clone(), TimingSettings::default()),
    )
}

#[tokio::test(start_paused = true)]
async fn continues_only_after_cycle_complete() {
    let rig = rig();
    let mut strategy = strategy(&rig);

    let request = CollectionRequest::new(Duration::from_millis(100), 1, ScanShape::new(vec![3]));
    strategy.prepare_for_collection(&request).await.unwrap();

    assert_eq!(rig.tfg.cycles(), 4, "one spare cycle beyond the last point");
    assert_eq!(rig.detector.num_images().await.unwrap(), 3);

    for _ in 0..3 {
        strategy.collect_data().await.unwrap();
        strategy.wait_while_busy().await.unwrap();
    }

    assert_eq!(rig.tfg.ignored_continues(), 0);
    assert_eq!(rig.tfg.continues(), 3);
    assert_eq!(rig.detector.images(), 3);

    let conts = rig.log.times("tfg", "cont");
    let completes = rig.log.times("tfg", "cycle_complete");
    assert_eq!(conts.len(), 3);
    assert_eq!(completes.len(), 3);
    for i in 1..conts.len() {
        assert!(
            conts[i] >= completes[i - 1],
            "cont {i} issued before cycle {} completed",
            i - 1
        );
    }

    strategy.complete_collection().await.unwrap();
    assert_eq!(rig.tfg.status().await.unwrap(), GeneratorStatus::Idle);
}

#[tokio::test(start_paused = true)]
async fn program_has_pause_live_and_readout_frames() {
    let rig = rig_with_trigger_code(2);
    let mut strategy = strategy(&rig).with_hooks(VendorHooks::photon_counting());

    let request = CollectionRequest::new(Duration::from_millis(50), 1, ScanShape::new(vec![2, 2]));
    strategy.prepare_for_collection(&request).await.unwrap();

    let frames = rig.tfg.frames();
    assert_eq!(frames.len(), 3);
    assert_eq!(frames[0].input_gate, Some(9));
    assert_eq!(frames[0].output_pattern, 0);
    assert_eq!(frames[1].duration, Duration::from_millis(50));
    assert_eq!(frames[1].output_pattern, 0x01);
    assert_eq!(frames[2].duration, Duration::from_micros(2300));
    assert_eq!(frames[2].output_pattern, 0);
    assert_eq!(rig.tfg.cycles(), 5);
    assert_eq!(rig.detector.trigger_mode().await.unwrap(), 2);

    for line in 0..2 {
        strategy.prepare_for_line().await.unwrap();
        for _ in 0..2 {
            strategy.collect_data().await.unwrap();
            strategy.wait_while_busy().await.unwrap();
        }
        strategy.complete_line().await.unwrap();
        assert_eq!(rig.tfg.completed(), 2 * (line + 1));
    }
    strategy.complete_collection().await.unwrap();
    assert_eq!(rig.tfg.ignored_continues(), 0);
}

#[tokio::test(start_paused = true)]
async fn point_past_program_end_is_rejected() {
    let rig = rig();
    let mut strategy = strategy(&rig);

    let request = CollectionRequest::new(Duration::from_millis(100), 1, ScanShape::new(vec![1]));
    strategy.prepare_for_collection(&request).await.unwrap();
    strategy.collect_data().await.unwrap();
    strategy.wait_while_busy().await.unwrap();

    let err = strategy.collect_data().await.unwrap_err();
    assert!(matches!(err, CollectionError::Configuration(_)));
    assert_eq!(strategy.lifecycle_state(), LifecycleState::Fault);
    assert_eq!(rig.tfg.continues(), 1);

    strategy.at_command_failure().await;
    assert_eq!(rig.tfg.status().await.unwrap(), GeneratorStatus::Idle);
}

#[tokio::test(start_paused = true)]
async fn generator_that_never_pauses_times_out() {
    let rig = rig();
    let settings = TimingSettings {
        ready_timeout: Duration::from_secs(1),
        ..TimingSettings::default()
    };
    let mut strategy = DetectorStrategy::new(
        rig.detector.clone(),
        Variant::timing_generator(rig.tfg.clone(), settings),
    );

    let request = CollectionRequest::new(Duration::from_millis(100), 1, ScanShape::new(vec![2]));
    strategy.prepare_for_collection(&request).await.unwrap();

    // Generator aborted behind the strategy's back
    rig.tfg.stop().await.unwrap();

    let err = strategy.collect_data().await.unwrap_err();
    assert!(err.is_soft());
    assert_eq!(strategy.lifecycle_state(), LifecycleState::Fault);
    assert_eq!(rig.tfg.continues(), 0);
}
