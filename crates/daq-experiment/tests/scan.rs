//! Step scans over mock hardware

use daq_collection::{
    CeilingPolicy, DetectorStrategy, LifecycleState, PollConfig, ShutterSettings, Variant,
};
use daq_core::capabilities::DetectorState;
use daq_driver_mock::{ErrorConfig, ErrorScenario, EventLog, MockDetector, MockShutter, MockStage};
use daq_experiment::{EngineState, Phase, RunEngine, ScanAxis, ScanError, StepScan};
use std::sync::Arc;
use std::time::Duration;
use tracing_test::traced_test;

#[tokio::test(start_paused = true)]
async fn grid_scan_moves_between_points() {
    let log = EventLog::new();
    let slow = Arc::new(MockStage::new("y").with_event_log(log.clone()));
    let fast = Arc::new(
        MockStage::new("x")
            .with_speed(10.0)
            .with_settle(Duration::from_millis(50))
            .with_event_log(log.clone()),
    );
    let detector = Arc::new(MockDetector::builder("det").event_log(log.clone()).build());

    let mut engine = RunEngine::new();
    let strategy = DetectorStrategy::new(detector.clone(), Variant::Software)
        .with_interrupt(engine.interrupt());
    engine.add_detector(Box::new(strategy));

    let plan = StepScan::new(Duration::from_millis(200))
        .with_axis(ScanAxis::new(slow.clone(), 0.0, 1.0, 2))
        .with_axis(ScanAxis::new(fast.clone(), 0.0, 2.0, 3));

    let summary = engine.run(&plan).await.unwrap();
    assert_eq!(summary.points, 6);
    assert_eq!(summary.soft_timeouts, 0);

    assert_eq!(slow.moves(), vec![0.0, 1.0]);
    assert_eq!(fast.moves(), vec![0.0, 1.0, 2.0, 0.0, 1.0, 2.0]);
    assert_eq!(detector.images(), 1);
    assert_eq!(log.count("det", "start_acquiring"), 6);

    // Every exposure starts after the fast axis has settled at its point
    let settles = log.times("x", "settled");
    let starts = log.times("det", "start_acquiring");
    for (settled, started) in settles.iter().zip(&starts) {
        assert!(started >= settled);
    }
    assert_eq!(
        engine.detectors()[0].lifecycle_state(),
        LifecycleState::Complete
    );
}

#[tokio::test(start_paused = true)]
async fn abort_mid_point_cleans_up() {
    let detector = Arc::new(MockDetector::new("det"));
    let shutter = Arc::new(MockShutter::new("shutter"));

    let mut engine = RunEngine::new();
    let camera = DetectorStrategy::new(detector.clone(), Variant::Software)
        .with_interrupt(engine.interrupt());
    let shuttered = DetectorStrategy::new(
        Arc::new(MockDetector::new("det2")),
        Variant::shutter(shutter.clone(), ShutterSettings::default()),
    )
    .with_interrupt(engine.interrupt());
    engine.add_detector(Box::new(camera));
    engine.add_detector(Box::new(shuttered));

    let handle = engine.handle();
    let scan = tokio::spawn(async move {
        let result = engine
            .run(&StepScan::count(Duration::from_secs(1), 5))
            .await;
        (engine, result)
    });

    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(handle.state(), EngineState::Running);
    handle.abort();

    let (engine, result) = scan.await.unwrap();
    let err = result.unwrap_err();
    assert!(err.is_abort(), "unexpected error: {err}");
    assert_eq!(handle.state(), EngineState::Idle);
    assert_eq!(detector.state(), DetectorState::Idle);
    assert_eq!(shutter.value(), 0.0);
    for strategy in engine.detectors() {
        assert_eq!(strategy.lifecycle_state(), LifecycleState::Unconfigured);
    }
}

#[tokio::test(start_paused = true)]
async fn motion_failure_is_reported_and_cleaned_up() {
    let stage = Arc::new(MockStage::new("x").with_limits(0.0, 1.0));
    let detector = Arc::new(MockDetector::new("det"));

    let mut engine = RunEngine::new();
    engine.add_detector(Box::new(DetectorStrategy::new(
        detector.clone(),
        Variant::Software,
    )));

    let plan = StepScan::new(Duration::from_millis(100))
        .with_axis(ScanAxis::new(stage.clone(), 0.0, 2.0, 3));
    let err = engine.run(&plan).await.unwrap_err();

    assert!(matches!(
        err,
        ScanError::Motion { ref axis, position, .. } if axis == "x" && position == 2.0
    ));
    assert_eq!(detector.images(), 1);
    assert_eq!(
        engine.detectors()[0].lifecycle_state(),
        LifecycleState::Unconfigured
    );
}

#[tokio::test(start_paused = true)]
async fn detector_failure_is_tagged_with_phase() {
    let detector = Arc::new(
        MockDetector::builder("det")
            .error_config(ErrorConfig::scenario(ErrorScenario::FailAfterN {
                operation: "start_acquiring",
                count: 1,
            }))
            .build(),
    );

    let mut engine = RunEngine::new();
    engine.add_detector(Box::new(DetectorStrategy::new(detector, Variant::Software)));

    let err = engine
        .run(&StepScan::count(Duration::from_millis(100), 3))
        .await
        .unwrap_err();
    match err {
        ScanError::Detector {
            detector, phase, ..
        } => {
            assert_eq!(detector, "det");
            assert_eq!(phase, Phase::Collect);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn hung_points_count_as_soft_timeouts() {
    let detector = Arc::new(MockDetector::builder("det").hang().build());
    let strategy = DetectorStrategy::new(detector.clone(), Variant::Software).with_poll(
        PollConfig::with_ceiling(
            Duration::from_millis(50),
            Duration::from_secs(1),
            CeilingPolicy::Fail,
        ),
    );

    let mut engine = RunEngine::new();
    engine.add_detector(Box::new(strategy));

    let summary = engine
        .run(&StepScan::count(Duration::from_millis(100), 2))
        .await
        .unwrap();

    assert_eq!(summary.points, 2);
    assert_eq!(summary.soft_timeouts, 2);
    assert!(logs_contain("soft timeout; continuing"));
    assert_eq!(
        engine.detectors()[0].lifecycle_state(),
        LifecycleState::Complete
    );
    assert_eq!(detector.state(), DetectorState::Idle);
}
