//! Runner lifecycle contract
//!
//! A runner executes one action and is driven through
//! Prime/Play/Pause/Wait/Abort by any number of controller call sites
//! (serialized by the caller). `SyncRunner` is the degenerate case that runs
//! to completion on first play; `AsyncYieldRunner` is the full pausable
//! implementation.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::errors::RunnerError;
use crate::host::HostRef;
use crate::results::{ResultDescriptor, ResultRegistry};
use crate::types::RunnerState;

pub(crate) mod gate;
pub mod signal;
pub mod sync;
pub mod yield_runner;

#[cfg(test)]
mod tests;

pub use signal::Signal;
pub use sync::SyncRunner;
pub use yield_runner::{ActionScope, AsyncYieldRunner};

/// Boxed future returned by the contract's async operations.
pub type RunnerFuture<'a> = Pin<Box<dyn Future<Output = Result<(), RunnerError>> + Send + 'a>>;

/* ===================== Contract ===================== */

/// The runner lifecycle contract.
///
/// `state`, `is_primed` and `was_successful` are non-blocking reads.
/// `error_message`/`error` are non-null only once the runner is `Done` and
/// unsuccessful. Disposing a runner triggers an abort and tears down its
/// registry; any public method called afterwards fails with
/// [`RunnerError::Disposed`].
pub trait Runner: Send + Sync {
    fn state(&self) -> RunnerState;
    fn is_primed(&self) -> bool;
    fn was_successful(&self) -> bool;
    fn error_message(&self) -> Option<String>;
    fn error(&self) -> Option<Arc<anyhow::Error>>;

    /// Drive the runner to the point where streaming results are active.
    /// Resolves immediately when already primed or `Done`.
    fn prime(&self) -> RunnerFuture<'_>;

    /// Start or resume. Idempotent while already playing; invalid while a
    /// pause is pending unless an abort is in flight.
    fn play(&self) -> Result<(), RunnerError>;

    /// Request a pause. Guarantees `is_primed()` before resolving unless the
    /// action fails first. Unsupported implementations behave as `wait`.
    fn pause(&self) -> RunnerFuture<'_>;

    /// Ensure playing, then wait for `Done`.
    fn wait(&self) -> RunnerFuture<'_>;

    /// Fire-and-forget cancellation request.
    fn begin_abort(&self) -> Result<(), RunnerError>;

    /// Cancellation request that waits for `Done`.
    fn abort(&self) -> RunnerFuture<'_>;

    /// Implementation-defined hint.
    fn poke(&self) {}

    /// The runner's published-results registry.
    fn results(&self) -> &ResultRegistry;

    /// Current value of a published result. The descriptor must still be
    /// registered at its recorded index.
    fn result_value(&self, descriptor: &ResultDescriptor) -> anyhow::Result<JsonValue>;

    /// Trigger an abort and release all registry and synchronization
    /// resources. Idempotent.
    fn dispose(&self);

    /// As `dispose`, but awaits the abort.
    fn dispose_async(&self) -> RunnerFuture<'_>;
}

/* ===================== Shared State ===================== */

/// State common to every runner implementation: registry ownership, the
/// disposed guard, and capture of the action's outcome.
pub(crate) struct RunnerShared {
    pub id: Uuid,
    pub registry: Arc<ResultRegistry>,
    pub host: Option<HostRef>,
    failure: Mutex<Option<Arc<anyhow::Error>>>,
    succeeded: AtomicBool,
}

impl RunnerShared {
    pub fn new(host: Option<HostRef>) -> RunnerShared {
        RunnerShared {
            id: Uuid::new_v4(),
            registry: Arc::new(ResultRegistry::new()),
            host,
            failure: Mutex::new(None),
            succeeded: AtomicBool::new(false),
        }
    }

    /// Fail with `Disposed` once the registry has been torn down.
    pub fn ensure_live(&self) -> Result<(), RunnerError> {
        self.registry.ensure_live()
    }

    /// Record the action's outcome. Called exactly once, before the runner
    /// transitions to `Done`.
    pub fn record_outcome(&self, outcome: Result<(), anyhow::Error>) {
        match outcome {
            Ok(()) => self.succeeded.store(true, Ordering::Release),
            Err(e) => {
                *self.failure.lock().expect("failure slot poisoned") = Some(Arc::new(e));
            }
        }
    }

    pub fn was_successful(&self) -> bool {
        self.succeeded.load(Ordering::Acquire)
    }

    pub fn error(&self) -> Option<Arc<anyhow::Error>> {
        self.failure.lock().expect("failure slot poisoned").clone()
    }

    /// Message of the captured failure, falling back to a literal "Failed"
    /// when the error displays as an empty string.
    pub fn error_message(&self) -> Option<String> {
        self.error().map(|e| {
            let message = e.to_string();
            if message.is_empty() {
                "Failed".to_string()
            } else {
                message
            }
        })
    }
}
