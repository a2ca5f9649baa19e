//! Decorator behaviour against mock hardware

use daq_collection::{
    interrupt_pair, AcquireTimeExtension, CollectionError, CollectionRequest, CollectionStrategy,
    DecoratorChain, DetectorStrategy, ImageMultiplier, LifecycleState, ScanShape,
    ShutterSettings, ThrottleThresholds, ThrottledCollection, TimingSettings, UsageThrottle,
    Variant, VendorHooks,
};
use daq_core::capabilities::{AreaDetector, DetectorState, SummationPlugin, UsageMonitor};
use daq_driver_mock::{
    EventLog, MockDetector, MockShutter, MockSummationPlugin, MockTimingGenerator,
    MockUsageMonitor,
};
use std::sync::Arc;
use std::time::Duration;

fn software_base(detector: &Arc<MockDetector>) -> Box<dyn CollectionStrategy> {
    Box::new(DetectorStrategy::new(detector.clone(), Variant::Software))
}

#[tokio::test(start_paused = true)]
async fn extension_is_invisible_to_readers() {
    let detector = Arc::new(MockDetector::new("det"));
    let mut strategy =
        AcquireTimeExtension::new(software_base(&detector), Duration::from_millis(500));

    let t = Duration::from_secs(1);
    let images = strategy.get_number_images_per_collection(t).unwrap();
    strategy
        .prepare_for_collection(&CollectionRequest::new(t, images, ScanShape::single()))
        .await
        .unwrap();

    assert_eq!(detector.acquire_time().await.unwrap(), 1.5);
    assert_eq!(strategy.get_acquire_time().await.unwrap(), t);
    assert_eq!(strategy.get_acquire_period().await.unwrap(), t);
    assert_eq!(strategy.decoratee().get_acquire_time().await.unwrap(), Duration::from_millis(1500));

    strategy
        .configure_acquire_and_period_times(Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(detector.acquire_time().await.unwrap(), 2.5);
    assert_eq!(strategy.get_acquire_time().await.unwrap(), Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn extended_exposure_is_checked_against_detector_limit() {
    let log = EventLog::new();
    let detector = Arc::new(MockDetector::builder("det").event_log(log.clone()).build());
    let hooks = VendorHooks {
        max_exposure: Some(Duration::from_millis(1200)),
        ..VendorHooks::default()
    };
    let base = DetectorStrategy::new(detector.clone(), Variant::Software).with_hooks(hooks);
    let mut strategy = AcquireTimeExtension::new(Box::new(base), Duration::from_millis(500));

    let err = strategy
        .prepare_for_collection(&CollectionRequest::new(
            Duration::from_secs(1),
            1,
            ScanShape::single(),
        ))
        .await
        .unwrap_err();
    assert!(err.is_configuration(), "unexpected error: {err}");
    assert!(log.events().is_empty(), "limit check must precede hardware writes");
    assert_eq!(strategy.lifecycle_state(), LifecycleState::Unconfigured);
}

#[tokio::test(start_paused = true)]
async fn extension_over_timing_generator_lengthens_live_frame() {
    let log = EventLog::new();
    let detector = Arc::new(MockDetector::builder("det").event_log(log.clone()).build());
    let tfg = Arc::new(
        MockTimingGenerator::builder("tfg")
            .target(detector.clone())
            .event_log(log.clone())
            .build(),
    );
    let base = DetectorStrategy::new(
        detector.clone(),
        Variant::timing_generator(tfg.clone(), TimingSettings::default()),
    );
    let mut strategy = AcquireTimeExtension::new(Box::new(base), Duration::from_millis(250));

    let t = Duration::from_millis(500);
    strategy
        .prepare_for_collection(&CollectionRequest::new(t, 1, ScanShape::new(vec![2])))
        .await
        .unwrap();

    // Generator gate and detector exposure agree on the extended time
    assert_eq!(tfg.frames()[1].duration, Duration::from_millis(750));
    assert_eq!(detector.acquire_time().await.unwrap(), 0.75);
    assert_eq!(strategy.get_acquire_time().await.unwrap(), t);

    for _ in 0..2 {
        strategy.collect_data().await.unwrap();
        strategy.wait_while_busy().await.unwrap();
    }
    assert_eq!(detector.images(), 2);
    assert_eq!(tfg.ignored_continues(), 0);
    strategy.complete_collection().await.unwrap();
    assert_eq!(strategy.lifecycle_state(), LifecycleState::Complete);
}

#[tokio::test(start_paused = true)]
async fn extension_over_shutter_keeps_beam_time() {
    let log = EventLog::new();
    let detector = Arc::new(MockDetector::builder("det").event_log(log.clone()).build());
    let shutter = Arc::new(MockShutter::new("shutter").with_event_log(log.clone()));
    let settings = ShutterSettings {
        open_delay: Duration::from_millis(100),
        ..ShutterSettings::default()
    };
    let base = DetectorStrategy::new(detector.clone(), Variant::shutter(shutter.clone(), settings));
    let mut strategy = AcquireTimeExtension::new(Box::new(base), Duration::from_millis(250));

    let t = Duration::from_secs(1);
    strategy
        .prepare_for_collection(&CollectionRequest::new(t, 1, ScanShape::single()))
        .await
        .unwrap();
    assert_eq!(detector.acquire_time().await.unwrap(), 1.25);
    assert_eq!(strategy.get_acquire_time().await.unwrap(), t);

    strategy.collect_data().await.unwrap();
    strategy.wait_while_busy().await.unwrap();
    strategy.complete_collection().await.unwrap();

    let open = log.first("shutter", "write 1").unwrap();
    let start = log.first("det", "start_acquiring").unwrap();
    let close = log
        .times("shutter", "write 0")
        .into_iter()
        .find(|at| *at > open)
        .unwrap();
    assert_eq!(start - open, Duration::from_millis(100));
    assert_eq!(close - open, t);
    assert_eq!(detector.images(), 1);
    assert_eq!(shutter.value(), 0.0);
}

#[tokio::test(start_paused = true)]
async fn multiplier_scales_the_echoed_count() {
    let detector = Arc::new(MockDetector::new("det"));
    let mut strategy = ImageMultiplier::new(software_base(&detector), 2).unwrap();

    let t = Duration::from_millis(200);
    assert_eq!(strategy.get_number_images_per_collection(t).unwrap(), 2);
    assert_eq!(strategy.decoratee().get_number_images_per_collection(t).unwrap(), 1);

    let err = strategy
        .prepare_for_collection(&CollectionRequest::new(t, 1, ScanShape::single()))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CollectionError::ImageCountMismatch {
            expected: 2,
            requested: 1
        }
    ));

    strategy
        .prepare_for_collection(&CollectionRequest::new(t, 2, ScanShape::single()))
        .await
        .unwrap();
    assert_eq!(detector.num_images().await.unwrap(), 2);

    strategy.collect_data().await.unwrap();
    strategy.wait_while_busy().await.unwrap();
    assert_eq!(detector.images(), 2);
    strategy.complete_collection().await.unwrap();
}

#[tokio::test]
async fn multiplier_rejects_zero() {
    let detector = Arc::new(MockDetector::new("det"));
    assert!(ImageMultiplier::new(software_base(&detector), 0).is_err());
}

#[tokio::test(start_paused = true)]
async fn multipliers_compose_over_accumulation() {
    let plugin = Arc::new(MockSummationPlugin::new("proc"));
    let detector = Arc::new(MockDetector::builder("det").plugin(plugin.clone()).build());
    let base = DetectorStrategy::new(
        detector.clone(),
        Variant::accumulation(plugin.clone(), Duration::from_secs(1)),
    );
    let mut strategy = DecoratorChain::new(Box::new(base))
        .image_multiplier(2)
        .image_multiplier(3)
        .build()
        .unwrap();

    let t = Duration::from_millis(2500);
    assert_eq!(strategy.get_number_images_per_collection(t).unwrap(), 18);
    strategy
        .prepare_for_collection(&CollectionRequest::new(t, 18, ScanShape::single()))
        .await
        .unwrap();
    assert_eq!(detector.num_images().await.unwrap(), 18);
    assert_eq!(plugin.num_filter().await.unwrap(), 18);

    // The point is done only once every multiplied sub-exposure is summed
    strategy.collect_data().await.unwrap();
    strategy.wait_while_busy().await.unwrap();
    assert_eq!(detector.images(), 18);
    assert_eq!(detector.state(), DetectorState::Idle);
    assert_eq!(plugin.outputs(), 1);
    assert_eq!(strategy.get_acquire_time().await.unwrap(), t);

    strategy.complete_collection().await.unwrap();
    assert_eq!(strategy.lifecycle_state(), LifecycleState::Complete);
}

#[tokio::test(start_paused = true)]
async fn chain_applies_layers_inside_out() {
    let detector = Arc::new(MockDetector::new("det"));
    let chain = DecoratorChain::new(software_base(&detector))
        .image_multiplier(2)
        .acquire_time_extension(Duration::from_millis(100));
    assert_eq!(chain.len(), 2);
    let mut strategy = chain.build().unwrap();

    let t = Duration::from_millis(400);
    let images = strategy.get_number_images_per_collection(t).unwrap();
    assert_eq!(images, 2);
    strategy
        .prepare_for_collection(&CollectionRequest::new(t, images, ScanShape::new(vec![2])))
        .await
        .unwrap();

    assert_eq!(detector.acquire_time().await.unwrap(), 0.5);
    assert_eq!(strategy.get_acquire_time().await.unwrap(), t);
    assert_eq!(strategy.name(), "det");

    for _ in 0..2 {
        strategy.collect_data().await.unwrap();
        strategy.wait_while_busy().await.unwrap();
    }
    strategy.complete_collection().await.unwrap();
    assert_eq!(strategy.lifecycle_state(), LifecycleState::Complete);
}

#[tokio::test(start_paused = true)]
async fn throttle_guard_precedes_capacity_wait() {
    let detector = Arc::new(MockDetector::new("det"));
    let monitor = Arc::new(MockUsageMonitor::with_initial("ram", 99.0));
    let throttle = UsageThrottle::start(monitor.clone(), ThrottleThresholds::default())
        .await
        .unwrap();
    let (_abort, interrupt) = interrupt_pair();
    let mut strategy = ThrottledCollection::new(software_base(&detector), throttle, interrupt);

    // Not prepared: fails at once instead of waiting for capacity
    let err = strategy.collect_data().await.unwrap_err();
    assert!(matches!(err, CollectionError::NotPrepared { .. }));
    assert_eq!(monitor.current_usage().await.unwrap(), 99.0);
    assert_eq!(strategy.throttle().current(), 99.0);
}

#[tokio::test(start_paused = true)]
async fn throttle_refuses_collect_while_point_in_flight() {
    let log = EventLog::new();
    let detector = Arc::new(MockDetector::builder("det").event_log(log.clone()).build());
    let monitor = Arc::new(MockUsageMonitor::with_initial("ram", 10.0));
    let throttle = UsageThrottle::start(monitor.clone(), ThrottleThresholds::default())
        .await
        .unwrap();
    let (_abort, interrupt) = interrupt_pair();
    let mut strategy = ThrottledCollection::new(software_base(&detector), throttle, interrupt);

    strategy
        .prepare_for_collection(&CollectionRequest::new(
            Duration::from_secs(1),
            1,
            ScanShape::new(vec![2]),
        ))
        .await
        .unwrap();
    strategy.collect_data().await.unwrap();

    // Full camera, but the guard answers before any capacity wait
    monitor.publish(99.0);
    let err = strategy.collect_data().await.unwrap_err();
    assert!(matches!(err, CollectionError::PointInFlight { .. }));
    assert_eq!(log.count("det", "start_acquiring"), 1);

    strategy.wait_while_busy().await.unwrap();
    assert_eq!(detector.images(), 1);
    strategy.complete_collection().await.unwrap();
}
