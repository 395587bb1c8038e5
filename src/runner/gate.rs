//! Control admission gate
//!
//! Detects overlapping control operations. This is not a mutex: callers are
//! responsible for serializing their own control calls, and the gate rejects
//! overlap instead of blocking.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::errors::RunnerError;

pub(crate) struct ControlGate {
    busy: AtomicBool,
}

impl ControlGate {
    pub fn new() -> ControlGate {
        ControlGate {
            busy: AtomicBool::new(false),
        }
    }

    /// Claim the gate for one control operation. Fails with
    /// [`RunnerError::ControlOverlap`] if another operation holds it.
    pub fn enter(&self) -> Result<GateGuard<'_>, RunnerError> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(RunnerError::ControlOverlap);
        }
        Ok(GateGuard { gate: self })
    }
}

pub(crate) struct GateGuard<'a> {
    gate: &'a ControlGate,
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        self.gate.busy.store(false, Ordering::Release);
    }
}
