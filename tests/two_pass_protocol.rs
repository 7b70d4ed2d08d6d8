//! Validate-then-execute behaviour of the dispatcher.

mod common;

use common::{dispatcher, eventually, lines, settings, Counters};
use daq_script::adapters::MockTransports;
use daq_script::dispatcher::RunState;
use daq_script::script::LineNumber;
use daq_script::{DispatchError, ExecutionMode, PassOutcome};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};
use tracing_test::traced_test;

#[tokio::test]
async fn validating_pass_has_no_side_effects() {
    let counters = Arc::new(Counters::default());
    let mock = MockTransports::new();
    let d = dispatcher(&counters, &mock, settings());

    let script = lines(
        "MAKE a; Recorder; GPIB 4
         a touch
         a check 3
         a touch",
    );
    assert_eq!(d.run(&script).await.unwrap(), PassOutcome::Completed);

    assert_eq!(Counters::get(&counters.opened), 0);
    assert_eq!(Counters::get(&counters.touched), 0);
    assert_eq!(Counters::get(&counters.checked), 1);
    assert!(mock.sent().is_empty());
}

#[tokio::test]
async fn live_pass_invokes_each_line_once() {
    let counters = Arc::new(Counters::default());
    let mock = MockTransports::new();
    let d = dispatcher(&counters, &mock, settings());

    let script = lines(
        "MAKE a; Recorder; GPIB 4
         a touch
         a check 3
         a touch",
    );
    assert_eq!(d.execute(&script).await.unwrap(), PassOutcome::Completed);

    assert_eq!(Counters::get(&counters.opened), 1);
    assert_eq!(Counters::get(&counters.touched), 2);
    // once per pass
    assert_eq!(Counters::get(&counters.checked), 2);
    assert_eq!(Counters::get(&counters.closed), 1);
    assert_eq!(mock.messages_to("GPIB#4"), vec!["*CLS", "TOUCH", "TOUCH"]);
}

#[tokio::test]
async fn set_mode_selects_the_pass() {
    let counters = Arc::new(Counters::default());
    let mut d = dispatcher(&counters, &MockTransports::new(), settings());
    assert_eq!(d.mode(), ExecutionMode::Validating);

    d.set_mode(ExecutionMode::Live);
    assert_ok!(d.run(&lines("MAKE a; Recorder; none\na touch")).await);
    assert_eq!(Counters::get(&counters.touched), 1);
    assert_eq!(Counters::get(&counters.closed), 1);
}

#[tokio::test]
async fn duplicate_alias_is_rejected() {
    let counters = Arc::new(Counters::default());
    let d = dispatcher(&counters, &MockTransports::new(), settings());

    let failure = assert_err!(d.run(&lines("MAKE a; Recorder; none\nMAKE a; Utility; none")).await);
    assert!(matches!(failure.error, DispatchError::AliasInUse(ref alias) if alias == "a"));
    assert_eq!(failure.line, LineNumber::new(2));
    assert_eq!(failure.text, "MAKE a; Utility; none");
}

#[tokio::test]
async fn first_error_halts_the_pass_and_cleans_up() {
    let counters = Arc::new(Counters::default());
    let mut d = dispatcher(&counters, &MockTransports::new(), settings());
    d.set_mode(ExecutionMode::Live);

    let failure = d
        .run(&lines("MAKE a; Recorder; none\nzz touch\na touch"))
        .await
        .unwrap_err();
    assert!(matches!(failure.error, DispatchError::UnknownInstrument(ref name) if name == "zz"));
    assert_eq!(failure.line.line(), 2);
    assert_eq!(Counters::get(&counters.touched), 0);
    assert_eq!(Counters::get(&counters.closed), 1);
    assert!(d.control().is_stopped());
    assert!(d.live_instances().await.is_empty());
}

#[tokio::test]
async fn argument_errors_are_typed() {
    let counters = Arc::new(Counters::default());
    let d = dispatcher(&counters, &MockTransports::new(), settings());

    let cases = [
        ("a check x", "TypeConversionFailure"),
        ("a check 12", "RangeViolation"),
        ("a check", "ArityMismatch"),
        ("a explode", "UnknownCommand"),
    ];
    for (line, kind) in cases {
        let script = vec!["MAKE a; Recorder; none".to_string(), line.to_string()];
        let failure = d.run(&script).await.unwrap_err();
        assert_eq!(failure.error.kind(), kind, "{line}");
    }
}

#[tokio::test]
async fn unknown_display_name_is_reported() {
    let counters = Arc::new(Counters::default());
    let d = dispatcher(&counters, &MockTransports::new(), settings());
    let failure = d
        .run(&lines("MAKE x; Keithley 9999; GPIB 3"))
        .await
        .unwrap_err();
    assert!(matches!(failure.error, DispatchError::UnknownInstrument(ref n) if n == "Keithley 9999"));
}

#[tokio::test]
async fn stop_mid_pass_closes_every_instance_once() {
    let counters = Arc::new(Counters::default());
    let mock = MockTransports::new();
    let d = dispatcher(&counters, &mock, settings());

    let script = lines(
        "MAKE a; Recorder; GPIB 1
         MAKE b; Recorder; GPIB 2
         a touch
         a hold
         b touch",
    );
    let run = d.start(&script).await.unwrap();
    assert!(eventually(|| Counters::get(&counters.holding) == 1).await);

    d.stop().await;
    assert_eq!(run.wait().await.unwrap(), PassOutcome::Stopped);

    assert_eq!(Counters::get(&counters.touched), 1);
    assert_eq!(Counters::get(&counters.closed), 2);
    let mut closed = mock.closed();
    closed.sort();
    assert_eq!(closed, vec!["GPIB#1", "GPIB#2"]);
}

#[tokio::test]
async fn pause_holds_the_worker_until_resumed() {
    let counters = Arc::new(Counters::default());
    let d = dispatcher(&counters, &MockTransports::new(), settings());

    let script = lines(
        "MAKE a; Recorder; none
         a touch
         a pauseHere
         a touch",
    );
    let run = d.start(&script).await.unwrap();
    assert!(eventually(|| d.control().state() == RunState::Paused).await);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(Counters::get(&counters.touched), 1);
    assert!(!run.is_finished());

    d.resume();
    assert_eq!(run.wait().await.unwrap(), PassOutcome::Completed);
    assert_eq!(Counters::get(&counters.touched), 2);
}

#[tokio::test]
async fn stop_releases_a_paused_run() {
    let counters = Arc::new(Counters::default());
    let d = dispatcher(&counters, &MockTransports::new(), settings());

    let run = d
        .start(&lines("MAKE a; Recorder; none\na pauseHere\na touch"))
        .await
        .unwrap();
    assert!(eventually(|| d.control().state() == RunState::Paused).await);

    d.stop().await;
    assert_eq!(run.wait().await.unwrap(), PassOutcome::Stopped);
    assert_eq!(Counters::get(&counters.touched), 0);
    assert_eq!(Counters::get(&counters.closed), 1);
}

#[tokio::test]
async fn live_instances_and_registry_are_visible() {
    let counters = Arc::new(Counters::default());
    let mut d = dispatcher(&counters, &MockTransports::new(), settings());

    let registered = d.registered_instruments();
    assert_eq!(registered["Recorder"], "builtin:recorder");
    assert_eq!(registered["Utility"], "builtin:utility");

    d.set_mode(ExecutionMode::Live);
    let run = {
        let d = d.clone();
        tokio::spawn(async move {
            d.run(&lines("MAKE a; Recorder; none\nMAKE u; Utility; none\na pauseHere\na touch"))
                .await
        })
    };
    assert!(eventually(|| d.control().state() == RunState::Paused).await);

    let live = d.live_instances().await;
    assert_eq!(live.len(), 2);
    assert_eq!(live["u"], "Utility");

    d.resume();
    run.await.unwrap().unwrap();
    assert!(d.live_instances().await.is_empty());
}

#[tokio::test]
#[traced_test]
async fn cleanup_failures_are_logged_not_raised() {
    let counters = Arc::new(Counters::default());
    counters
        .fail_close
        .store(true, std::sync::atomic::Ordering::SeqCst);
    let d = dispatcher(&counters, &MockTransports::new(), settings());

    let outcome =
        assert_ok!(d.execute(&lines("MAKE a; Recorder; none\nMAKE b; Recorder; none\na touch")).await);
    assert_eq!(outcome, PassOutcome::Completed);
    assert_eq!(Counters::get(&counters.closed), 2);
    assert!(logs_contain("failed to close instrument"));
}
