//! Action hook interfaces
//!
//! A runner executes exactly one action. The async runner drives the three
//! hooks in order: prime, run, and then cleanup (always, even on failure);
//! hooks receive an [`ActionScope`] giving them the yield point, the result
//! registry, and the host. Hook errors are action failures: the runner
//! captures them and finishes unsuccessfully.

use anyhow::Result;
use serde_json::Value as JsonValue;
use std::future::Future;
use std::pin::Pin;

use crate::host::HostRef;
use crate::results::{ResultDescriptor, ResultRegistry};
use crate::runner::ActionScope;

/// Boxed future returned by action hooks.
pub type HookFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// An action executed by an `AsyncYieldRunner`.
///
/// Hooks are expected to call `scope.checkpoint()` periodically; a hook that
/// never yields makes pausing and cooperative abort impossible for that
/// action. That is an accepted limitation of the cooperative model.
pub trait Action: Send + Sync + 'static {
    /// Bring streaming results to an initially consistent, readable state.
    fn prime<'a>(&'a self, scope: &'a ActionScope) -> HookFuture<'a>;

    /// The action's main work.
    fn run<'a>(&'a self, scope: &'a ActionScope) -> HookFuture<'a>;

    /// Invoked after the main work finishes, fails, or is aborted.
    fn cleanup<'a>(&'a self, scope: &'a ActionScope) -> HookFuture<'a> {
        let _ = scope;
        Box::pin(async { Ok(()) })
    }

    /// Produce the current value of a published result.
    fn result_value(&self, descriptor: &ResultDescriptor, host: Option<&HostRef>) -> Result<JsonValue> {
        let _ = host;
        anyhow::bail!("action exposes no value for result '{}'", descriptor.name)
    }
}

/// An action executed inline by a `SyncRunner`.
pub trait SyncAction: Send + Sync + 'static {
    /// The action's work, run to completion on the winning controller thread.
    fn run(&self, results: &ResultRegistry) -> Result<()>;

    /// Best-effort cooperative cancellation request.
    fn request_abort(&self) {}

    /// Whether a captured failure is also rethrown to the thread that ran
    /// the work inline, independent of it being recorded on the runner.
    fn rethrow_errors(&self) -> bool {
        false
    }

    /// Produce the current value of a published result.
    fn result_value(&self, descriptor: &ResultDescriptor, host: Option<&HostRef>) -> Result<JsonValue> {
        let _ = host;
        anyhow::bail!("action exposes no value for result '{}'", descriptor.name)
    }
}
