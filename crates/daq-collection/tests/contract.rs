//! Lifecycle contract tests
//!
//! Every strategy must refuse out-of-order calls, validate before touching
//! hardware and recover from failure cleanup no matter where it happened.

use daq_collection::{
    CollectionError, CollectionRequest, CollectionStrategy, DetectorStrategy, LifecycleState,
    ScanShape, StrategyStatus, Variant,
};
use daq_core::capabilities::{AreaDetector, DetectorState, ImageMode};
use daq_driver_mock::{
    ErrorConfig, ErrorScenario, EventLog, MockDetector, MockSummationPlugin, TriggerInput,
};
use std::sync::Arc;
use std::time::Duration;

fn software(log: &EventLog) -> (Arc<MockDetector>, DetectorStrategy) {
    let detector = Arc::new(MockDetector::builder("det").event_log(log.clone()).build());
    let strategy = DetectorStrategy::new(detector.clone(), Variant::Software);
    (detector, strategy)
}

fn one_second(points: usize) -> CollectionRequest {
    CollectionRequest::new(Duration::from_secs(1), 1, ScanShape::new(vec![points]))
}

#[tokio::test(start_paused = true)]
async fn collect_before_prepare_is_rejected() {
    let log = EventLog::new();
    let (_detector, mut strategy) = software(&log);

    let err = strategy.collect_data().await.unwrap_err();
    assert!(matches!(
        err,
        CollectionError::NotPrepared {
            operation: "collect_data",
            state: LifecycleState::Unconfigured
        }
    ));
    assert_eq!(log.count("det", "start_acquiring"), 0);
    assert_eq!(strategy.lifecycle_state(), LifecycleState::Unconfigured);
}

#[tokio::test(start_paused = true)]
async fn image_count_mismatch_writes_nothing() {
    let log = EventLog::new();
    let detector = Arc::new(MockDetector::builder("det").event_log(log.clone()).build());
    let plugin = Arc::new(MockSummationPlugin::new("proc").with_event_log(log.clone()));
    let mut strategy = DetectorStrategy::new(
        detector.clone(),
        Variant::accumulation(plugin, Duration::from_secs(1)),
    );

    let t = Duration::from_millis(2500);
    assert_eq!(strategy.get_number_images_per_collection(t).unwrap(), 3);

    let err = strategy
        .prepare_for_collection(&CollectionRequest::new(t, 1, ScanShape::single()))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CollectionError::ImageCountMismatch {
            expected: 3,
            requested: 1
        }
    ));
    assert!(err.is_configuration());
    assert!(log.events().is_empty(), "validation must precede hardware writes");
    assert_eq!(strategy.lifecycle_state(), LifecycleState::Unconfigured);
}

#[tokio::test(start_paused = true)]
async fn software_point_runs_full_lifecycle() {
    let log = EventLog::new();
    let (detector, mut strategy) = software(&log);

    strategy.prepare_for_collection(&one_second(2)).await.unwrap();
    assert_eq!(strategy.lifecycle_state(), LifecycleState::Prepared);
    assert_eq!(detector.trigger_mode().await.unwrap(), 0);
    assert_eq!(detector.image_mode().await.unwrap(), ImageMode::Single);

    for _ in 0..2 {
        strategy.collect_data().await.unwrap();
        assert_eq!(strategy.lifecycle_state(), LifecycleState::Acquiring);
        assert_eq!(strategy.get_status().await.unwrap(), StrategyStatus::Busy);

        strategy.wait_while_busy().await.unwrap();
        assert_eq!(strategy.lifecycle_state(), LifecycleState::Prepared);
        assert_eq!(strategy.get_status().await.unwrap(), StrategyStatus::Idle);
    }
    assert_eq!(strategy.points_collected(), 2);
    assert_eq!(log.count("det", "start_acquiring"), 2);

    strategy.complete_collection().await.unwrap();
    assert_eq!(strategy.lifecycle_state(), LifecycleState::Complete);
    strategy.complete_collection().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn second_collect_before_wait_is_rejected() {
    let log = EventLog::new();
    let (detector, mut strategy) = software(&log);

    strategy.prepare_for_collection(&one_second(2)).await.unwrap();
    strategy.collect_data().await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let err = strategy.collect_data().await.unwrap_err();
    assert!(matches!(
        err,
        CollectionError::PointInFlight {
            operation: "collect_data",
            state: LifecycleState::Acquiring
        }
    ));
    assert!(err.is_configuration());
    assert_eq!(log.count("det", "start_acquiring"), 1);
    assert_eq!(strategy.lifecycle_state(), LifecycleState::Acquiring);

    // The first exposure is untouched and finishes normally
    strategy.wait_while_busy().await.unwrap();
    assert_eq!(detector.images(), 1);
    strategy.collect_data().await.unwrap();
    strategy.wait_while_busy().await.unwrap();
    assert_eq!(log.count("det", "start_acquiring"), 2);
    strategy.complete_collection().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn complete_waits_for_point_in_flight() {
    let log = EventLog::new();
    let (detector, mut strategy) = software(&log);

    strategy.prepare_for_collection(&one_second(1)).await.unwrap();
    strategy.collect_data().await.unwrap();
    strategy.complete_collection().await.unwrap();

    assert_eq!(detector.images(), 1);
    assert_eq!(strategy.lifecycle_state(), LifecycleState::Complete);
}

#[tokio::test(start_paused = true)]
async fn repeated_failure_cleanup_is_harmless() {
    let log = EventLog::new();
    let (_detector, mut strategy) = software(&log);

    strategy.prepare_for_collection(&one_second(3)).await.unwrap();
    strategy.collect_data().await.unwrap();

    strategy.at_command_failure().await;
    assert_eq!(strategy.lifecycle_state(), LifecycleState::Unconfigured);
    strategy.at_command_failure().await;
    assert_eq!(strategy.lifecycle_state(), LifecycleState::Unconfigured);

    // A fresh prepare starts over
    strategy.prepare_for_collection(&one_second(1)).await.unwrap();
    strategy.collect_data().await.unwrap();
    strategy.wait_while_busy().await.unwrap();
    strategy.complete_collection().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn cleanup_before_prepare_does_not_fail() {
    let log = EventLog::new();
    let (_detector, mut strategy) = software(&log);
    strategy.at_command_failure().await;
    assert_eq!(strategy.lifecycle_state(), LifecycleState::Unconfigured);
    strategy.complete_collection().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn stop_mid_point_leaves_fault() {
    let log = EventLog::new();
    let (detector, mut strategy) = software(&log);

    strategy.prepare_for_collection(&one_second(2)).await.unwrap();
    strategy.collect_data().await.unwrap();
    strategy.stop().await.unwrap();

    assert_eq!(strategy.lifecycle_state(), LifecycleState::Fault);
    assert_eq!(detector.state(), DetectorState::Idle);
    assert!(matches!(
        strategy.collect_data().await.unwrap_err(),
        CollectionError::Faulted
    ));
    assert!(matches!(
        strategy.complete_collection().await.unwrap_err(),
        CollectionError::Faulted
    ));

    strategy.at_command_failure().await;
    assert_eq!(strategy.lifecycle_state(), LifecycleState::Unconfigured);
}

#[tokio::test(start_paused = true)]
async fn detector_fault_during_wait_is_reported() {
    let log = EventLog::new();
    let (detector, mut strategy) = software(&log);

    strategy.prepare_for_collection(&one_second(1)).await.unwrap();
    strategy.collect_data().await.unwrap();
    detector.set_state(DetectorState::Error);

    assert_eq!(strategy.get_status().await.unwrap(), StrategyStatus::Fault);
    let err = strategy.wait_while_busy().await.unwrap_err();
    assert!(matches!(
        err,
        CollectionError::DeviceFault {
            state: DetectorState::Error,
            ..
        }
    ));
    assert_eq!(strategy.lifecycle_state(), LifecycleState::Fault);
    assert_eq!(strategy.get_status().await.unwrap(), StrategyStatus::Fault);
}

#[tokio::test(start_paused = true)]
async fn prepare_rejects_degenerate_requests() {
    let log = EventLog::new();
    let (_detector, mut strategy) = software(&log);

    let zero_points = CollectionRequest::new(Duration::from_secs(1), 1, ScanShape::new(vec![0]));
    assert!(strategy
        .prepare_for_collection(&zero_points)
        .await
        .unwrap_err()
        .is_configuration());
    assert!(log.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn hardware_triggered_arms_once_per_collection() {
    let log = EventLog::new();
    let detector = Arc::new(MockDetector::builder("det").event_log(log.clone()).build());
    let mut strategy = DetectorStrategy::new(detector.clone(), Variant::HardwareTriggered);

    let request = CollectionRequest::new(Duration::from_millis(200), 1, ScanShape::new(vec![3]));
    strategy.prepare_for_collection(&request).await.unwrap();
    assert_eq!(detector.trigger_mode().await.unwrap(), 1);
    assert_eq!(detector.num_images().await.unwrap(), 3);
    assert!(strategy.requires_asynchronous_plugins());

    for _ in 0..3 {
        strategy.collect_data().await.unwrap();
        assert_eq!(strategy.get_status().await.unwrap(), StrategyStatus::Busy);
        detector.pulse();
        strategy.wait_while_busy().await.unwrap();
    }
    assert_eq!(log.count("det", "start_acquiring"), 1);
    assert_eq!(detector.images(), 3);
    strategy.complete_collection().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn prepare_failure_faults_strategy() {
    let log = EventLog::new();
    let detector = Arc::new(
        MockDetector::builder("det")
            .event_log(log.clone())
            .error_config(ErrorConfig::scenario(ErrorScenario::FailAlways {
                operation: "set_acquire_time",
            }))
            .build(),
    );
    let mut strategy = DetectorStrategy::new(detector, Variant::Software);

    let err = strategy
        .prepare_for_collection(&one_second(1))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CollectionError::Hardware {
            operation: "set_acquire_time",
            ..
        }
    ));
    assert_eq!(strategy.lifecycle_state(), LifecycleState::Fault);

    strategy.at_command_failure().await;
    assert_eq!(strategy.lifecycle_state(), LifecycleState::Unconfigured);
}
