//! Single-completion signals
//!
//! The controller/worker handshake is built from signals that resolve at
//! most once. Waiters arm a `Notify` future before re-checking the flag, so
//! a resolve landing between the check and the await is never lost.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// A one-shot completion signal shared between a controller and the worker.
pub struct Signal {
    resolved: AtomicBool,
    notify: Notify,
}

impl Signal {
    pub fn new() -> Arc<Signal> {
        Arc::new(Signal {
            resolved: AtomicBool::new(false),
            notify: Notify::new(),
        })
    }

    /// Resolve the signal. Idempotent; wakes every current waiter, and any
    /// later `wait` returns immediately.
    pub fn resolve(&self) {
        if !self.resolved.swap(true, Ordering::AcqRel) {
            self.notify.notify_waiters();
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.load(Ordering::Acquire)
    }

    /// Wait until the signal resolves.
    pub async fn wait(&self) {
        while !self.resolved.load(Ordering::Acquire) {
            let notified = self.notify.notified();
            if self.resolved.load(Ordering::Acquire) {
                return;
            }
            notified.await;
        }
    }
}
