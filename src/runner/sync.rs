//! Synchronous runner
//!
//! The degenerate case of the lifecycle contract: no worker task, no
//! pausing, states `Created -> Playing -> Done` only. Whichever controller
//! thread wins the admission race runs the action inline inside a short
//! critical section; a racing abort that wins instead records a cancellation
//! and finishes without ever invoking the action.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use serde_json::Value as JsonValue;
use tracing::debug;

use crate::action::SyncAction;
use crate::errors::{AbortError, RunnerError};
use crate::host::HostRef;
use crate::results::{ResultDescriptor, ResultRegistry};
use crate::types::RunnerState;

use super::{Runner, RunnerFuture, RunnerShared};

pub struct SyncRunner {
    shared: RunnerShared,
    state: AtomicU8,
    abort_requested: AtomicBool,
    /// Critical section around the inline work. The flag flips to true when
    /// the runner completes, waking anyone blocked in `wait`.
    work: Mutex<bool>,
    work_done: Condvar,
    action: Box<dyn SyncAction>,
}

impl SyncRunner {
    pub fn new(action: Box<dyn SyncAction>) -> SyncRunner {
        SyncRunner::with_host(action, None)
    }

    pub fn with_host(action: Box<dyn SyncAction>, host: Option<HostRef>) -> SyncRunner {
        SyncRunner {
            shared: RunnerShared::new(host),
            state: AtomicU8::new(RunnerState::Created as u8),
            abort_requested: AtomicBool::new(false),
            work: Mutex::new(false),
            work_done: Condvar::new(),
            action,
        }
    }

    pub fn state(&self) -> RunnerState {
        RunnerState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// True once the action completed successfully; the sync runner has no
    /// earlier point at which results are consistently readable.
    pub fn is_primed(&self) -> bool {
        self.state() == RunnerState::Done && self.shared.was_successful()
    }

    pub fn was_successful(&self) -> bool {
        self.shared.was_successful()
    }

    pub fn error_message(&self) -> Option<String> {
        self.shared.error_message()
    }

    pub fn error(&self) -> Option<Arc<anyhow::Error>> {
        self.shared.error()
    }

    /// Win the `Created -> Playing` admission race.
    fn claim(&self) -> bool {
        self.state
            .compare_exchange(
                RunnerState::Created as u8,
                RunnerState::Playing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Start the action, running it to completion inline when this thread
    /// wins the admission race. No-op when another thread already won or the
    /// runner is done.
    pub fn play(&self) -> Result<(), RunnerError> {
        self.shared.ensure_live()?;
        if !self.claim() {
            return Ok(());
        }
        self.run_inline()
    }

    fn run_inline(&self) -> Result<(), RunnerError> {
        let mut done = self.work.lock().expect("work section poisoned");

        // An abort requested before work began wins without invoking the
        // action.
        let outcome = if self.abort_requested.load(Ordering::Acquire) {
            Err(anyhow::Error::new(AbortError))
        } else {
            self.action.run(self.shared.registry.as_ref())
        };

        let rethrow = outcome.is_err() && self.action.rethrow_errors();
        self.shared.record_outcome(outcome);
        self.state.store(RunnerState::Done as u8, Ordering::Release);
        *done = true;
        self.work_done.notify_all();
        drop(done);

        debug!(
            runner = %self.shared.id,
            success = self.shared.was_successful(),
            "sync runner done"
        );

        if rethrow {
            let message = self
                .shared
                .error_message()
                .unwrap_or_else(|| "Failed".to_string());
            return Err(RunnerError::ActionFailed(message));
        }
        Ok(())
    }

    /// Pausing is unsupported; behaves as `wait` once playing.
    pub fn pause(&self) -> Result<(), RunnerError> {
        self.wait()
    }

    /// Ensure the action ran, blocking on the critical section while another
    /// thread is mid-work.
    pub fn wait(&self) -> Result<(), RunnerError> {
        self.play()?;
        if self.state() != RunnerState::Done {
            self.block_until_done();
        }
        Ok(())
    }

    /// Drives the runner to completion so results are readable; the sync
    /// runner has no intermediate primed point.
    pub fn prime(&self) -> Result<(), RunnerError> {
        self.wait()
    }

    /// Request cancellation. If the abort wins the admission race the action
    /// never runs; otherwise the action is asked to stop cooperatively.
    pub fn begin_abort(&self) -> Result<(), RunnerError> {
        self.shared.ensure_live()?;
        self.abort_requested.store(true, Ordering::Release);
        if self.claim() {
            let mut done = self.work.lock().expect("work section poisoned");
            self.shared.record_outcome(Err(anyhow::Error::new(AbortError)));
            self.state.store(RunnerState::Done as u8, Ordering::Release);
            *done = true;
            self.work_done.notify_all();
            debug!(runner = %self.shared.id, "sync runner aborted before start");
        } else {
            self.action.request_abort();
        }
        Ok(())
    }

    /// Request cancellation and block until the runner is done.
    pub fn abort(&self) -> Result<(), RunnerError> {
        self.begin_abort()?;
        if self.state() != RunnerState::Done {
            self.block_until_done();
        }
        Ok(())
    }

    fn block_until_done(&self) {
        let mut done = self.work.lock().expect("work section poisoned");
        while !*done {
            done = self.work_done.wait(done).expect("work section poisoned");
        }
    }

    pub fn results(&self) -> &ResultRegistry {
        self.shared.registry.as_ref()
    }

    pub fn result_value(&self, descriptor: &ResultDescriptor) -> anyhow::Result<JsonValue> {
        self.shared.registry.validate(descriptor)?;
        self.action.result_value(descriptor, self.shared.host.as_ref())
    }

    /// Trigger an abort and tear down the registry. Idempotent.
    pub fn dispose(&self) {
        if self.shared.registry.is_disposed() {
            return;
        }
        let _ = self.begin_abort();
        self.shared.registry.dispose();
    }
}

impl Runner for SyncRunner {
    fn state(&self) -> RunnerState {
        SyncRunner::state(self)
    }

    fn is_primed(&self) -> bool {
        SyncRunner::is_primed(self)
    }

    fn was_successful(&self) -> bool {
        SyncRunner::was_successful(self)
    }

    fn error_message(&self) -> Option<String> {
        SyncRunner::error_message(self)
    }

    fn error(&self) -> Option<Arc<anyhow::Error>> {
        SyncRunner::error(self)
    }

    fn prime(&self) -> RunnerFuture<'_> {
        Box::pin(async move { SyncRunner::prime(self) })
    }

    fn play(&self) -> Result<(), RunnerError> {
        SyncRunner::play(self)
    }

    fn pause(&self) -> RunnerFuture<'_> {
        Box::pin(async move { SyncRunner::pause(self) })
    }

    fn wait(&self) -> RunnerFuture<'_> {
        Box::pin(async move { SyncRunner::wait(self) })
    }

    fn begin_abort(&self) -> Result<(), RunnerError> {
        SyncRunner::begin_abort(self)
    }

    fn abort(&self) -> RunnerFuture<'_> {
        Box::pin(async move { SyncRunner::abort(self) })
    }

    fn results(&self) -> &ResultRegistry {
        SyncRunner::results(self)
    }

    fn result_value(&self, descriptor: &ResultDescriptor) -> anyhow::Result<JsonValue> {
        SyncRunner::result_value(self, descriptor)
    }

    fn dispose(&self) {
        SyncRunner::dispose(self)
    }

    fn dispose_async(&self) -> RunnerFuture<'_> {
        Box::pin(async move {
            if !self.shared.registry.is_disposed() {
                let _ = SyncRunner::abort(self);
                self.shared.registry.dispose();
            }
            Ok(())
        })
    }
}

impl Drop for SyncRunner {
    fn drop(&mut self) {
        self.dispose();
    }
}
