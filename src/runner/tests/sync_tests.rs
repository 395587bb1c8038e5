//! Tests for the synchronous runner

use std::sync::atomic::Ordering;
use std::sync::Arc;

use super::helpers::{init_tracing, BlockingSyncAction, CountingSyncAction};
use crate::errors::{AbortError, RunnerError};
use crate::runner::SyncRunner;
use crate::types::RunnerState;

/* ===================== Admission Race ===================== */

#[test]
fn test_play_runs_work_exactly_once_across_threads() {
    init_tracing();
    let action = CountingSyncAction::new();
    let run_calls = Arc::clone(&action.run_calls);
    let runner = SyncRunner::new(Box::new(action));

    std::thread::scope(|scope| {
        for _ in 0..8 {
            scope.spawn(|| {
                runner.play().expect("play");
                runner.wait().expect("wait");
            });
        }
    });

    assert_eq!(run_calls.load(Ordering::SeqCst), 1);
    assert_eq!(runner.state(), RunnerState::Done);
    assert!(runner.was_successful());
}

#[test]
fn test_abort_before_start_wins() {
    init_tracing();
    let action = CountingSyncAction::new();
    let run_calls = Arc::clone(&action.run_calls);
    let runner = SyncRunner::new(Box::new(action));

    runner.begin_abort().expect("begin_abort");
    runner.wait().expect("wait");

    assert_eq!(runner.state(), RunnerState::Done);
    assert!(!runner.was_successful());
    assert_eq!(run_calls.load(Ordering::SeqCst), 0);
    let error = runner.error().expect("error recorded");
    assert!(error.downcast_ref::<AbortError>().is_some());
}

#[test]
fn test_abort_while_playing_requests_cooperative_stop() {
    init_tracing();
    let action = BlockingSyncAction::new();
    let started = Arc::clone(&action.started);
    let run_calls = Arc::clone(&action.run_calls);
    let runner = SyncRunner::new(Box::new(action));

    std::thread::scope(|scope| {
        scope.spawn(|| {
            runner.play().expect("play");
        });

        while !started.load(Ordering::SeqCst) {
            std::thread::yield_now();
        }
        // The admission race is already lost; this must go through the
        // cooperative abort hook and then drain the critical section.
        runner.abort().expect("abort");
    });

    assert_eq!(runner.state(), RunnerState::Done);
    assert_eq!(run_calls.load(Ordering::SeqCst), 1);
    // The work observed the hook and ran to completion.
    assert!(runner.was_successful());
}

/* ===================== Wait / Pause ===================== */

#[test]
fn test_wait_runs_to_completion_and_publishes_results() {
    let action = CountingSyncAction::new();
    let runner = SyncRunner::new(Box::new(action));

    runner.wait().expect("wait");

    assert_eq!(runner.state(), RunnerState::Done);
    assert!(runner.was_successful());
    assert!(runner.is_primed());

    let answer = runner
        .results()
        .by_name("answer")
        .expect("registry live")
        .expect("result published");
    assert!(answer.is_primary);
    assert_eq!(
        runner.result_value(&answer).expect("value"),
        serde_json::json!(42)
    );
}

#[test]
fn test_pause_behaves_as_wait() {
    let action = CountingSyncAction::new();
    let run_calls = Arc::clone(&action.run_calls);
    let runner = SyncRunner::new(Box::new(action));

    runner.pause().expect("pause");

    assert_eq!(runner.state(), RunnerState::Done);
    assert_eq!(run_calls.load(Ordering::SeqCst), 1);
}

/* ===================== Failure Policy ===================== */

#[test]
fn test_failure_recorded_without_rethrow() {
    let action = CountingSyncAction::failing("sync work exploded", false);
    let runner = SyncRunner::new(Box::new(action));

    runner.play().expect("failure is recorded, not rethrown");

    assert_eq!(runner.state(), RunnerState::Done);
    assert!(!runner.was_successful());
    assert!(!runner.is_primed());
    let message = runner.error_message().expect("message recorded");
    assert!(message.contains("sync work exploded"));
}

#[test]
fn test_failure_rethrown_when_policy_asks() {
    let action = CountingSyncAction::failing("sync work exploded", true);
    let runner = SyncRunner::new(Box::new(action));

    let err = runner.play().expect_err("policy rethrows");
    assert!(matches!(err, RunnerError::ActionFailed(_)));

    // Recorded as well, after the transition to Done.
    assert_eq!(runner.state(), RunnerState::Done);
    assert!(!runner.was_successful());
}

#[test]
fn test_empty_error_message_falls_back_to_failed() {
    let action = CountingSyncAction::failing("", false);
    let runner = SyncRunner::new(Box::new(action));

    runner.play().expect("recorded");
    assert_eq!(runner.error_message().as_deref(), Some("Failed"));
}

/* ===================== Dispose ===================== */

#[test]
fn test_dispose_is_idempotent_and_aborts() {
    let action = CountingSyncAction::new();
    let run_calls = Arc::clone(&action.run_calls);
    let runner = SyncRunner::new(Box::new(action));

    runner.dispose();
    runner.dispose();

    assert_eq!(runner.state(), RunnerState::Done);
    assert_eq!(run_calls.load(Ordering::SeqCst), 0);
    assert!(matches!(runner.play(), Err(RunnerError::Disposed)));
    assert!(runner.results().is_disposed());
}

#[test]
fn test_dispose_after_completion() {
    let action = CountingSyncAction::new();
    let runner = SyncRunner::new(Box::new(action));

    runner.wait().expect("wait");
    runner.dispose();
    runner.dispose();

    assert_eq!(runner.state(), RunnerState::Done);
    assert!(runner.was_successful());
    assert!(matches!(runner.begin_abort(), Err(RunnerError::Disposed)));
}
