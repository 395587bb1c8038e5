//! Contract faults and cancellation errors
//!
//! Two error classes cross the runner API. Action failures (anything a hook
//! returns) travel as `anyhow::Error`, are captured on the runner, and are
//! never rethrown from the worker. Contract faults are usage bugs in the
//! host and are raised at the call site as `RunnerError`.

use thiserror::Error;

/// A violation of the runner's usage contract.
///
/// These indicate a bug in the calling code, not a failure of the action's
/// own logic, and are never stored as the action's outcome.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// The runner or its registry was disposed before the call.
    #[error("runner is disposed")]
    Disposed,

    /// A second control operation entered while another was still in its
    /// state-mutation section. Callers must serialize their control calls.
    #[error("overlapping control operation on runner")]
    ControlOverlap,

    /// The yield point was re-entered while a yield was already in progress.
    #[error("yield point re-entered")]
    YieldReentry,

    /// `play` was called while a pause was outstanding and no abort was in
    /// flight.
    #[error("cannot play while a pause is pending")]
    PausePending,

    /// A streaming result was published with a non-sequence type.
    #[error("streaming result '{0}' requires a sequence type")]
    NotSequence(String),

    /// The descriptor handed to `result_value` is no longer registered at
    /// its recorded index.
    #[error("result descriptor '{0}' is not registered at index {1}")]
    DescriptorStale(String, usize),

    /// Rethrow path of the sync runner: the inline work failed and the
    /// action's policy asked for the failure to surface on the caller.
    #[error("action failed: {0}")]
    ActionFailed(String),
}

/// Cancellation-flavored action failure.
///
/// Raised at a yield point when the worker observes an abort request, or
/// synthesized when an abort claims a runner whose worker never started.
#[derive(Debug, Error)]
#[error("action aborted")]
pub struct AbortError;
