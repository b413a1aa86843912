//! Lifecycle tests for activities run through the scenario controller.
//!
//! Guarantees exercised here:
//! - Every cycle in a bounded range is dispatched exactly once, whatever
//!   the thread count.
//! - Stop is idempotent and a finished activity awaits immediately.
//! - Worker panics and `errors=stop` failures surface from await.
//! - Force stop settles an activity even when workers are stuck in a slow op.

use cb_engine::{ActivityError, ControlError, RunState};
use cb_test_utils::{controller_with, def, FailingDriver, PanickingDriver, RecordingDriver, SlowDriver};
use pretty_assertions::assert_eq;
use std::time::{Duration, Instant};

fn wait_for(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    check()
}

/// Tenet: a bounded range is claimed without gaps or duplicates.
#[test]
fn four_threads_dispatch_each_cycle_once() {
    let driver = RecordingDriver::new();
    let controller = controller_with(driver.clone());

    let done = controller
        .run(
            def("alias=load; driver=recording; op='id={{Mod(1000)}}'; cycles=1000; threads=4"),
            None,
        )
        .unwrap();

    assert!(done);
    assert_eq!(driver.cycles(), (0..1000).collect::<Vec<i64>>());
    assert_eq!(controller.states(), vec![("load".to_string(), RunState::Finished)]);

    let summary = &controller.summaries()[0];
    assert_eq!(summary.cycles, 1000);
    assert_eq!(summary.failures, 0);
}

#[test]
fn rendered_fields_follow_the_cycle() {
    let driver = RecordingDriver::new();
    let controller = controller_with(driver.clone());

    assert!(controller
        .run(def("alias=r; driver=recording; op='id={{Mod(7)}}'; cycles=10..20"), None)
        .unwrap());

    assert_eq!(driver.cycles(), (10..20).collect::<Vec<i64>>());
    assert_eq!(driver.field(15, "stmt"), Some("id=1".into()));
}

#[test]
fn stride_does_not_change_the_dispatched_set() {
    let driver = RecordingDriver::new();
    let controller = controller_with(driver.clone());

    assert!(controller
        .run(
            def("alias=s; driver=recording; op=x; cycles=101; threads=3; stride=8"),
            None
        )
        .unwrap());

    assert_eq!(driver.count(), 101);
    assert_eq!(driver.cycles(), (0..101).collect::<Vec<i64>>());
}

/// Tenet: awaiting a finished activity returns at once, and stop on it is a no-op.
#[test]
fn finished_activity_awaits_immediately_and_stops_idempotently() {
    let controller = controller_with(RecordingDriver::new());
    assert!(controller
        .run(def("alias=f; driver=recording; op=x; cycles=5"), None)
        .unwrap());

    let started = Instant::now();
    assert!(controller.await_activity("f", Some(Duration::from_secs(5))).unwrap());
    assert!(started.elapsed() < Duration::from_secs(1));

    assert_eq!(controller.stop("f").unwrap(), vec!["f".to_string()]);
    assert_eq!(controller.stop("f").unwrap(), vec!["f".to_string()]);
    assert_eq!(controller.executor("f").unwrap().state(), RunState::Finished);
}

#[test]
fn stopping_an_unbounded_activity_twice_is_safe() {
    let controller = controller_with(SlowDriver::new(Duration::from_millis(1)));
    let executor = controller
        .start(def("alias=u; driver=slow; op=x; threads=2"))
        .unwrap();
    assert!(executor.tally().await_at_least(RunState::Running, 2, Duration::from_secs(5)));

    assert!(executor.stop());
    assert!(executor.stop());
    assert_eq!(executor.state(), RunState::Stopped);
    assert_eq!(executor.active_workers(), 0);
    assert!(controller.await_activity("u", None).unwrap());
}

/// Tenet: a worker panic is contained and reported through await.
#[test]
fn worker_panic_surfaces_from_await() {
    let controller = controller_with(PanickingDriver::on_cycle(3));

    let result = controller.run(def("alias=p; driver=panicking; op=x; cycles=100"), None);

    match result {
        Err(ControlError::Activity(ActivityError::WorkerPanic { alias, message, .. })) => {
            assert_eq!(alias, "p");
            assert!(message.contains("cycle 3"), "unexpected payload: {message}");
        }
        other => panic!("expected a worker panic, got {other:?}"),
    }
    assert_eq!(controller.executor("p").unwrap().state(), RunState::Stopped);
}

#[test]
fn stop_policy_surfaces_the_failing_cycle() {
    let controller = controller_with(FailingDriver::on_cycles([42]));

    let result = controller.run(
        def("alias=e; driver=failing; op=x; cycles=100; errors=stop"),
        None,
    );

    match result {
        Err(ControlError::Activity(ActivityError::OpFailed { cycle, .. })) => assert_eq!(cycle, 42),
        other => panic!("expected an op failure, got {other:?}"),
    }
}

#[test]
fn retryable_failures_are_retried_until_they_pass() {
    let driver = FailingDriver::retryable([7], 2);
    let controller = controller_with(driver.clone());

    assert!(controller
        .run(def("alias=rt; driver=failing; op=x; cycles=10; maxtries=5"), None)
        .unwrap());

    assert_eq!(driver.attempts(), 3);
    let summary = &controller.summaries()[0];
    assert_eq!(summary.failures, 0);
    assert_eq!(summary.retries, 2);
}

#[test]
fn retries_stop_at_maxtries() {
    let driver = FailingDriver::retryable([0], 100);
    let controller = controller_with(driver.clone());

    assert!(controller
        .run(def("alias=mt; driver=failing; op=x; cycles=1; maxtries=3"), None)
        .unwrap());

    assert_eq!(driver.attempts(), 3);
    assert_eq!(controller.summaries()[0].failures, 1);
}

/// Tenet: force stop always settles the activity.
#[test]
fn force_stop_settles_slow_workers() {
    let controller = controller_with(SlowDriver::new(Duration::from_secs(30)));
    let executor = controller
        .start(def("alias=slow; driver=slow; op=x; threads=2"))
        .unwrap();
    assert!(executor.tally().await_at_least(RunState::Running, 2, Duration::from_secs(5)));

    let started = Instant::now();
    executor.force_stop(Duration::from_millis(50));

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(executor.state(), RunState::Stopped);
    assert_eq!(executor.active_workers(), 0);
}

#[test]
fn restart_after_stop_resumes_the_cursor() {
    let driver = RecordingDriver::new();
    let controller = controller_with(driver.clone());
    let executor = controller
        .start(def("alias=rs; driver=recording; op=x; cycles=5000; cyclerate=1000"))
        .unwrap();
    assert!(wait_for(Duration::from_secs(5), || driver.count() >= 10));
    assert!(executor.stop());
    let first = driver.count();
    assert!(first < 5000);

    controller.start(def("alias=rs; cyclerate=0")).unwrap();
    assert!(controller.await_activity("rs", Some(Duration::from_secs(30))).unwrap());

    let cycles = driver.cycles();
    assert_eq!(cycles.last(), Some(&4999));
    assert_eq!(cycles, (0..5000).collect::<Vec<i64>>());
}

/// Tenet: cycles claimed but not run before a stop are run after restart.
#[test]
fn stop_mid_stride_loses_no_cycles() {
    let driver = RecordingDriver::new();
    let controller = controller_with(driver.clone());
    let executor = controller
        .start(def("alias=ms; driver=recording; op=x; cycles=3000; stride=500; threads=3; cyclerate=2000"))
        .unwrap();
    assert!(wait_for(Duration::from_secs(5), || driver.count() >= 20));
    assert!(executor.stop());
    assert!(driver.count() < 1500);

    controller.start(def("alias=ms; cyclerate=0")).unwrap();
    assert!(controller.await_activity("ms", Some(Duration::from_secs(30))).unwrap());

    assert_eq!(driver.cycles(), (0..3000).collect::<Vec<i64>>());
    assert_eq!(executor.state(), RunState::Finished);
}

#[test]
fn wait_helper_times_out() {
    assert!(!wait_for(Duration::from_millis(10), || false));
}
