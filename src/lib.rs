pub mod action;
pub mod errors;
pub mod host;
pub mod results;
pub mod runner;
pub mod types;

// Re-export main types
pub use action::{Action, HookFuture, SyncAction};
pub use errors::{AbortError, RunnerError};
pub use host::{ExecutionContext, HostRef, RunnerHost};
pub use results::{ResultDescriptor, ResultRegistry};
pub use runner::{ActionScope, AsyncYieldRunner, Runner, RunnerFuture, Signal, SyncRunner};
pub use types::{RunnerState, TypeDescriptor, TypeRef};
