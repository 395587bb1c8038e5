//! Test helpers for runner tests
//!
//! Scripted actions driven by test-owned signals, so interleavings are
//! deterministic on a current-thread test runtime.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use serde_json::{json, Value as JsonValue};

use crate::action::{Action, HookFuture, SyncAction};
use crate::host::HostRef;
use crate::results::{ResultDescriptor, ResultRegistry};
use crate::runner::{ActionScope, Signal};
use crate::types::{TypeDescriptor, TypeRef};

/// Install a tracing subscriber when RUST_LOG is set. Safe to call from
/// every test.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Type Doubles
// ============================================================================

#[derive(Debug)]
pub struct SequenceType;

impl TypeDescriptor for SequenceType {
    fn is_sequence(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "sequence"
    }
}

pub fn sequence_type() -> TypeRef {
    Arc::new(SequenceType)
}

// ============================================================================
// Scripted Async Action
// ============================================================================

/// Async action with a configurable number of yields and optional failure
/// points. When `hold` is set, the run hook parks on it before yielding so
/// the test controls exactly when the worker reaches its checkpoints.
pub struct ScriptedAction {
    pub prime_calls: AtomicUsize,
    pub run_calls: AtomicUsize,
    pub cleanup_calls: AtomicUsize,
    run_yields: usize,
    hold: Option<Arc<Signal>>,
    fail_in_prime: Option<String>,
    fail_in_run: Option<String>,
}

impl ScriptedAction {
    pub fn new(run_yields: usize) -> Arc<ScriptedAction> {
        Arc::new(ScriptedAction {
            prime_calls: AtomicUsize::new(0),
            run_calls: AtomicUsize::new(0),
            cleanup_calls: AtomicUsize::new(0),
            run_yields,
            hold: None,
            fail_in_prime: None,
            fail_in_run: None,
        })
    }

    /// An action whose run hook parks on the returned signal before its
    /// first checkpoint.
    pub fn held(run_yields: usize) -> (Arc<ScriptedAction>, Arc<Signal>) {
        let hold = Signal::new();
        let action = Arc::new(ScriptedAction {
            prime_calls: AtomicUsize::new(0),
            run_calls: AtomicUsize::new(0),
            cleanup_calls: AtomicUsize::new(0),
            run_yields,
            hold: Some(Arc::clone(&hold)),
            fail_in_prime: None,
            fail_in_run: None,
        });
        (action, hold)
    }

    pub fn failing_in_prime(message: &str) -> Arc<ScriptedAction> {
        Arc::new(ScriptedAction {
            prime_calls: AtomicUsize::new(0),
            run_calls: AtomicUsize::new(0),
            cleanup_calls: AtomicUsize::new(0),
            run_yields: 0,
            hold: None,
            fail_in_prime: Some(message.to_string()),
            fail_in_run: None,
        })
    }

    pub fn failing_in_run(message: &str) -> Arc<ScriptedAction> {
        Arc::new(ScriptedAction {
            prime_calls: AtomicUsize::new(0),
            run_calls: AtomicUsize::new(0),
            cleanup_calls: AtomicUsize::new(0),
            run_yields: 1,
            hold: None,
            fail_in_prime: None,
            fail_in_run: Some(message.to_string()),
        })
    }
}

impl Action for ScriptedAction {
    fn prime<'a>(&'a self, scope: &'a ActionScope) -> HookFuture<'a> {
        Box::pin(async move {
            self.prime_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(message) = &self.fail_in_prime {
                anyhow::bail!("{}", message);
            }
            scope
                .results()
                .add_streaming_result("rows", sequence_type(), true)?;
            Ok(())
        })
    }

    fn run<'a>(&'a self, scope: &'a ActionScope) -> HookFuture<'a> {
        Box::pin(async move {
            self.run_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(hold) = &self.hold {
                hold.wait().await;
            }
            if let Some(message) = &self.fail_in_run {
                anyhow::bail!("{}", message);
            }
            for _ in 0..self.run_yields {
                scope.checkpoint().await?;
            }
            Ok(())
        })
    }

    fn cleanup<'a>(&'a self, _scope: &'a ActionScope) -> HookFuture<'a> {
        Box::pin(async move {
            self.cleanup_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn result_value(
        &self,
        descriptor: &ResultDescriptor,
        _host: Option<&HostRef>,
    ) -> Result<JsonValue> {
        if descriptor.name == "rows" {
            Ok(json!([1, 2, 3]))
        } else {
            anyhow::bail!("unknown result '{}'", descriptor.name)
        }
    }
}

/// Action whose run hook calls the yield point twice concurrently, after
/// parking on `hold`. The overlapping call must fault.
pub struct ReentrantAction {
    pub hold: Arc<Signal>,
}

impl ReentrantAction {
    pub fn new() -> (Arc<ReentrantAction>, Arc<Signal>) {
        let hold = Signal::new();
        let action = Arc::new(ReentrantAction {
            hold: Arc::clone(&hold),
        });
        (action, hold)
    }
}

impl Action for ReentrantAction {
    fn prime<'a>(&'a self, _scope: &'a ActionScope) -> HookFuture<'a> {
        Box::pin(async { Ok(()) })
    }

    fn run<'a>(&'a self, scope: &'a ActionScope) -> HookFuture<'a> {
        Box::pin(async move {
            self.hold.wait().await;
            let (first, second) = tokio::join!(scope.checkpoint(), scope.checkpoint());
            second?;
            first
        })
    }
}

// ============================================================================
// Sync Actions
// ============================================================================

/// Counting sync action; publishes one stable result on success.
pub struct CountingSyncAction {
    pub run_calls: Arc<AtomicUsize>,
    pub abort_requests: Arc<AtomicUsize>,
    fail_with: Option<String>,
    rethrow: bool,
}

impl CountingSyncAction {
    pub fn new() -> CountingSyncAction {
        CountingSyncAction {
            run_calls: Arc::new(AtomicUsize::new(0)),
            abort_requests: Arc::new(AtomicUsize::new(0)),
            fail_with: None,
            rethrow: false,
        }
    }

    pub fn failing(message: &str, rethrow: bool) -> CountingSyncAction {
        CountingSyncAction {
            run_calls: Arc::new(AtomicUsize::new(0)),
            abort_requests: Arc::new(AtomicUsize::new(0)),
            fail_with: Some(message.to_string()),
            rethrow,
        }
    }
}

impl SyncAction for CountingSyncAction {
    fn run(&self, results: &ResultRegistry) -> Result<()> {
        self.run_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.fail_with {
            anyhow::bail!("{}", message);
        }
        results.add_stable_result("answer", sequence_type(), true)?;
        Ok(())
    }

    fn request_abort(&self) {
        self.abort_requests.fetch_add(1, Ordering::SeqCst);
    }

    fn rethrow_errors(&self) -> bool {
        self.rethrow
    }

    fn result_value(
        &self,
        descriptor: &ResultDescriptor,
        _host: Option<&HostRef>,
    ) -> Result<JsonValue> {
        if descriptor.name == "answer" {
            Ok(json!(42))
        } else {
            anyhow::bail!("unknown result '{}'", descriptor.name)
        }
    }
}

/// Sync action that reports when it has started and spins until released,
/// either by the test or by the abort hook.
pub struct BlockingSyncAction {
    pub started: Arc<AtomicBool>,
    pub release: Arc<AtomicBool>,
    pub run_calls: Arc<AtomicUsize>,
}

impl BlockingSyncAction {
    pub fn new() -> BlockingSyncAction {
        BlockingSyncAction {
            started: Arc::new(AtomicBool::new(false)),
            release: Arc::new(AtomicBool::new(false)),
            run_calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl SyncAction for BlockingSyncAction {
    fn run(&self, _results: &ResultRegistry) -> Result<()> {
        self.run_calls.fetch_add(1, Ordering::SeqCst);
        self.started.store(true, Ordering::SeqCst);
        while !self.release.load(Ordering::SeqCst) {
            std::thread::yield_now();
        }
        Ok(())
    }

    fn request_abort(&self) {
        self.release.store(true, Ordering::SeqCst);
    }
}
