//! Asynchronous pausable runner
//!
//! One worker task per runner executes the action's hooks; controllers drive
//! the lifecycle through Prime/Play/Pause/Wait/Abort. The handshake is built
//! from single-completion signals and a short-held state mutex, and the
//! worker observes pause and abort requests only at its yield points.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::action::Action;
use crate::errors::{AbortError, RunnerError};
use crate::host::HostRef;
use crate::results::{ResultDescriptor, ResultRegistry};
use crate::types::RunnerState;

use super::gate::ControlGate;
use super::signal::Signal;
use super::{Runner, RunnerFuture, RunnerShared};

/* ===================== State Cell ===================== */

/// Logical phase of the runner. A single sum type instead of independently
/// nullable signal fields, so illegal combinations are unrepresentable.
enum Phase {
    Created,
    Playing {
        /// Present while a controller is waiting to observe a pause;
        /// resolved by the worker when it actually parks.
        pause: Option<Arc<Signal>>,
    },
    Paused {
        /// Resolved by `play` or `begin_abort` to wake the parked worker.
        resume: Arc<Signal>,
    },
    Done,
}

/// Everything the state mutex protects.
struct StateCell {
    phase: Phase,
    /// The priming hook has returned. Distinct from `primed`: priming only
    /// becomes observable at the next yield point.
    priming_done: bool,
    primed: bool,
    abort_requested: bool,
    /// Controllers waiting for priming to become observable.
    prime_signal: Option<Arc<Signal>>,
}

struct Core {
    shared: RunnerShared,
    state: Mutex<StateCell>,
    /// Snapshot of the phase for lock-free `state()` reads; published under
    /// the state mutex.
    published: AtomicU8,
    primed_flag: AtomicBool,
    /// Resolved exactly once, when the runner reaches `Done`. Stands in for
    /// awaiting the worker task from any number of controllers.
    done: Arc<Signal>,
    gate: ControlGate,
    yield_busy: AtomicBool,
    action: Arc<dyn Action>,
}

impl Core {
    fn lock_state(&self) -> MutexGuard<'_, StateCell> {
        self.state.lock().expect("runner state poisoned")
    }

    fn publish(&self, state: RunnerState) {
        self.published.store(state as u8, Ordering::Release);
    }

    /// The single completion path: transition to `Done` under the state
    /// mutex, resolving every outstanding signal so no controller is left
    /// waiting.
    fn complete(&self, cell: &mut StateCell, outcome: Result<(), anyhow::Error>) {
        self.shared.record_outcome(outcome);
        match std::mem::replace(&mut cell.phase, Phase::Done) {
            Phase::Playing { pause: Some(pause) } => pause.resolve(),
            Phase::Paused { resume } => resume.resolve(),
            _ => {}
        }
        if let Some(prime) = cell.prime_signal.take() {
            prime.resolve();
        }
        self.publish(RunnerState::Done);
        self.done.resolve();
        debug!(
            runner = %self.shared.id,
            success = self.shared.was_successful(),
            "runner done"
        );
    }

    /// Abort under the state mutex. `Created` jumps straight to `Done`
    /// (the worker never spawns); `Paused` flips back to `Playing` so the
    /// parked worker wakes and observes the abort at its next yield.
    fn abort_locked(&self, cell: &mut StateCell) {
        match &cell.phase {
            Phase::Created => {
                debug!(runner = %self.shared.id, "aborted before start");
                self.complete(cell, Err(anyhow::Error::new(AbortError)));
            }
            Phase::Playing { .. } => {
                cell.abort_requested = true;
            }
            Phase::Paused { resume } => {
                let resume = Arc::clone(resume);
                cell.abort_requested = true;
                cell.phase = Phase::Playing { pause: None };
                self.publish(RunnerState::Playing);
                resume.resolve();
            }
            Phase::Done => {}
        }
    }

    /// Worker body. Runs exactly once per runner; every exit, including a
    /// hook failure, funnels through `complete`.
    async fn work(self: Arc<Self>) {
        let scope = ActionScope {
            core: Arc::clone(&self),
        };

        let mut outcome = self.run_hooks(&scope).await;

        if let Err(e) = self.action.cleanup(&scope).await {
            if outcome.is_ok() {
                outcome = Err(e);
            } else {
                warn!(runner = %self.shared.id, error = %e, "cleanup hook failed");
            }
        }

        let mut cell = self.lock_state();
        self.complete(&mut cell, outcome);
    }

    async fn run_hooks(&self, scope: &ActionScope) -> anyhow::Result<()> {
        // An abort requested before any work began cancels immediately.
        scope.checkpoint().await?;
        self.action.prime(scope).await?;
        self.lock_state().priming_done = true;
        // Priming becomes observable here, and a pre-armed pause is honored.
        scope.checkpoint().await?;
        self.action.run(scope).await?;
        Ok(())
    }
}

/// Spawn the worker task. The caller holds the state mutex with the phase
/// still `Created`. Returns the pre-armed pause signal, if any, so a racing
/// controller can await it immediately.
fn spawn_worker(core: &Arc<Core>, cell: &mut StateCell, prearm_pause: bool) -> Option<Arc<Signal>> {
    let pause = if prearm_pause { Some(Signal::new()) } else { None };
    cell.phase = Phase::Playing {
        pause: pause.clone(),
    };
    core.publish(RunnerState::Playing);
    let worker = Arc::clone(core);
    tokio::spawn(worker.work());
    debug!(runner = %core.shared.id, prearm_pause, "worker spawned");
    pause
}

/* ===================== Action Scope ===================== */

/// Execution scope handed to the action's hooks: the yield point plus access
/// to the registry and host.
pub struct ActionScope {
    core: Arc<Core>,
}

impl ActionScope {
    /// The runner's result registry, for publishing results from hooks.
    pub fn results(&self) -> &ResultRegistry {
        self.core.shared.registry.as_ref()
    }

    pub fn host(&self) -> Option<&HostRef> {
        self.core.shared.host.as_ref()
    }

    /// Cooperative yield point.
    ///
    /// Observes an abort request (failing with [`AbortError`]), publishes
    /// "primed" once the priming hook has returned, and honors a pending
    /// pause by parking until a controller resumes. Returns without
    /// suspending when nothing is requested. Not reentrant: a second
    /// concurrent call on the same runner is a caller bug.
    pub async fn checkpoint(&self) -> anyhow::Result<()> {
        if self
            .core
            .yield_busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(RunnerError::YieldReentry.into());
        }
        let _busy = YieldGuard(&self.core);

        loop {
            let resume = {
                let mut guard = self.core.lock_state();
                let StateCell {
                    phase,
                    priming_done,
                    primed,
                    abort_requested,
                    prime_signal,
                } = &mut *guard;

                match phase {
                    Phase::Playing { pause } => {
                        if *abort_requested {
                            return Err(anyhow::Error::new(AbortError));
                        }

                        // Publishing "primed" happens here even when no
                        // pause is pending.
                        if *priming_done && !*primed {
                            *primed = true;
                            self.core.primed_flag.store(true, Ordering::Release);
                            if let Some(prime) = prime_signal.take() {
                                prime.resolve();
                            }
                        }

                        if !*primed {
                            // Never pause before priming is observable; the
                            // request stays pending for a later yield.
                            return Ok(());
                        }

                        match pause.take() {
                            None => return Ok(()),
                            Some(pause) => {
                                let resume = Signal::new();
                                *phase = Phase::Paused {
                                    resume: Arc::clone(&resume),
                                };
                                self.core.publish(RunnerState::Paused);
                                pause.resolve();
                                debug!(runner = %self.core.shared.id, "paused");
                                resume
                            }
                        }
                    }
                    // The worker only yields while Playing; abort-on-Paused
                    // flips back to Playing before waking it.
                    _ => unreachable!("worker yielded outside Playing"),
                }
            };

            resume.wait().await;
            // A controller may have immediately requested another pause, or
            // an abort; go around again.
        }
    }
}

struct YieldGuard<'a>(&'a Arc<Core>);

impl Drop for YieldGuard<'_> {
    fn drop(&mut self) {
        self.0.yield_busy.store(false, Ordering::Release);
    }
}

/* ===================== Runner ===================== */

/// The full pausable runner: a lazily spawned worker task executes the
/// action's hooks, which yield control back at checkpoints.
pub struct AsyncYieldRunner {
    core: Arc<Core>,
}

impl AsyncYieldRunner {
    pub fn new(action: Arc<dyn Action>) -> AsyncYieldRunner {
        AsyncYieldRunner::with_host(action, None)
    }

    pub fn with_host(action: Arc<dyn Action>, host: Option<HostRef>) -> AsyncYieldRunner {
        AsyncYieldRunner {
            core: Arc::new(Core {
                shared: RunnerShared::new(host),
                state: Mutex::new(StateCell {
                    phase: Phase::Created,
                    priming_done: false,
                    primed: false,
                    abort_requested: false,
                    prime_signal: None,
                }),
                published: AtomicU8::new(RunnerState::Created as u8),
                primed_flag: AtomicBool::new(false),
                done: Signal::new(),
                gate: ControlGate::new(),
                yield_busy: AtomicBool::new(false),
                action,
            }),
        }
    }

    pub fn state(&self) -> RunnerState {
        RunnerState::from_u8(self.core.published.load(Ordering::Acquire))
    }

    pub fn is_primed(&self) -> bool {
        self.core.primed_flag.load(Ordering::Acquire)
    }

    pub fn was_successful(&self) -> bool {
        self.core.shared.was_successful()
    }

    pub fn error_message(&self) -> Option<String> {
        self.core.shared.error_message()
    }

    pub fn error(&self) -> Option<Arc<anyhow::Error>> {
        self.core.shared.error()
    }

    /// Drive the runner to the point where streaming results are active:
    /// spawns the worker with pausing pre-armed if it has not started, then
    /// waits for priming to become observable.
    pub async fn prime(&self) -> Result<(), RunnerError> {
        let wait = {
            let _gate = self.core.gate.enter()?;
            self.core.shared.ensure_live()?;
            let mut guard = self.core.lock_state();
            let cell = &mut *guard;
            if matches!(cell.phase, Phase::Created) {
                let signal = Signal::new();
                cell.prime_signal = Some(Arc::clone(&signal));
                let _ = spawn_worker(&self.core, cell, true);
                Some(signal)
            } else {
                match &cell.phase {
                    Phase::Playing { .. } if !cell.primed => Some(Arc::clone(
                        cell.prime_signal.get_or_insert_with(Signal::new),
                    )),
                    // Paused implies primed; Done resolves immediately.
                    _ => None,
                }
            }
        };
        if let Some(signal) = wait {
            signal.wait().await;
        }
        Ok(())
    }

    /// Start or resume. Idempotent while playing; invalid while a pause is
    /// pending unless an abort is in flight.
    pub fn play(&self) -> Result<(), RunnerError> {
        let _gate = self.core.gate.enter()?;
        self.core.shared.ensure_live()?;
        let mut guard = self.core.lock_state();
        let cell = &mut *guard;
        if matches!(cell.phase, Phase::Created) {
            let _ = spawn_worker(&self.core, cell, false);
            return Ok(());
        }
        match &mut cell.phase {
            Phase::Playing { pause } => {
                if pause.is_some() && !cell.abort_requested {
                    return Err(RunnerError::PausePending);
                }
            }
            Phase::Paused { resume } => {
                let resume = Arc::clone(resume);
                cell.phase = Phase::Playing { pause: None };
                self.core.publish(RunnerState::Playing);
                resume.resolve();
                debug!(runner = %self.core.shared.id, "resumed");
            }
            Phase::Created | Phase::Done => {}
        }
        Ok(())
    }

    /// Request a pause and wait until the worker parks (or finishes).
    /// Guarantees `is_primed()` before resolving unless the action fails
    /// first.
    pub async fn pause(&self) -> Result<(), RunnerError> {
        let wait = {
            let _gate = self.core.gate.enter()?;
            self.core.shared.ensure_live()?;
            let mut guard = self.core.lock_state();
            let cell = &mut *guard;
            if matches!(cell.phase, Phase::Created) {
                spawn_worker(&self.core, cell, true)
            } else {
                match &mut cell.phase {
                    Phase::Playing { pause } => {
                        if cell.abort_requested {
                            // The runner will finish, not pause; wait for
                            // that instead.
                            Some(Arc::clone(&self.core.done))
                        } else {
                            Some(Arc::clone(pause.get_or_insert_with(Signal::new)))
                        }
                    }
                    Phase::Created | Phase::Paused { .. } | Phase::Done => None,
                }
            }
        };
        if let Some(signal) = wait {
            signal.wait().await;
        }
        Ok(())
    }

    /// Ensure playing, then wait for `Done`.
    pub async fn wait(&self) -> Result<(), RunnerError> {
        self.play()?;
        self.core.done.wait().await;
        Ok(())
    }

    /// Fire-and-forget cancellation request. Cooperative: the worker
    /// observes it at its next yield point.
    pub fn begin_abort(&self) -> Result<(), RunnerError> {
        let _gate = self.core.gate.enter()?;
        self.core.shared.ensure_live()?;
        let mut guard = self.core.lock_state();
        self.core.abort_locked(&mut guard);
        Ok(())
    }

    /// Request cancellation and wait for `Done`.
    pub async fn abort(&self) -> Result<(), RunnerError> {
        {
            let _gate = self.core.gate.enter()?;
            self.core.shared.ensure_live()?;
            let mut guard = self.core.lock_state();
            self.core.abort_locked(&mut guard);
        }
        self.core.done.wait().await;
        Ok(())
    }

    pub fn results(&self) -> &ResultRegistry {
        self.core.shared.registry.as_ref()
    }

    pub fn result_value(&self, descriptor: &ResultDescriptor) -> anyhow::Result<JsonValue> {
        self.core.shared.registry.validate(descriptor)?;
        self.core
            .action
            .result_value(descriptor, self.core.shared.host.as_ref())
    }

    /// Trigger an abort and tear down the registry. Idempotent; does not
    /// wait for a running worker.
    pub fn dispose(&self) {
        if self.core.shared.registry.is_disposed() {
            return;
        }
        {
            let mut guard = self.core.lock_state();
            self.core.abort_locked(&mut guard);
        }
        self.core.shared.registry.dispose();
    }

    /// Trigger an abort, wait for the worker to finish, then tear down the
    /// registry. Idempotent.
    pub async fn dispose_async(&self) {
        if self.core.shared.registry.is_disposed() {
            return;
        }
        {
            let mut guard = self.core.lock_state();
            self.core.abort_locked(&mut guard);
        }
        self.core.done.wait().await;
        self.core.shared.registry.dispose();
    }
}

impl Runner for AsyncYieldRunner {
    fn state(&self) -> RunnerState {
        AsyncYieldRunner::state(self)
    }

    fn is_primed(&self) -> bool {
        AsyncYieldRunner::is_primed(self)
    }

    fn was_successful(&self) -> bool {
        AsyncYieldRunner::was_successful(self)
    }

    fn error_message(&self) -> Option<String> {
        AsyncYieldRunner::error_message(self)
    }

    fn error(&self) -> Option<Arc<anyhow::Error>> {
        AsyncYieldRunner::error(self)
    }

    fn prime(&self) -> RunnerFuture<'_> {
        Box::pin(AsyncYieldRunner::prime(self))
    }

    fn play(&self) -> Result<(), RunnerError> {
        AsyncYieldRunner::play(self)
    }

    fn pause(&self) -> RunnerFuture<'_> {
        Box::pin(AsyncYieldRunner::pause(self))
    }

    fn wait(&self) -> RunnerFuture<'_> {
        Box::pin(AsyncYieldRunner::wait(self))
    }

    fn begin_abort(&self) -> Result<(), RunnerError> {
        AsyncYieldRunner::begin_abort(self)
    }

    fn abort(&self) -> RunnerFuture<'_> {
        Box::pin(AsyncYieldRunner::abort(self))
    }

    fn results(&self) -> &ResultRegistry {
        AsyncYieldRunner::results(self)
    }

    fn result_value(&self, descriptor: &ResultDescriptor) -> anyhow::Result<JsonValue> {
        AsyncYieldRunner::result_value(self, descriptor)
    }

    fn dispose(&self) {
        AsyncYieldRunner::dispose(self)
    }

    fn dispose_async(&self) -> RunnerFuture<'_> {
        Box::pin(async move {
            AsyncYieldRunner::dispose_async(self).await;
            Ok(())
        })
    }
}

impl Drop for AsyncYieldRunner {
    fn drop(&mut self) {
        self.dispose();
    }
}
