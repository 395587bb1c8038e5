//! Lifecycle and collaborator types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/* ===================== Runner State ===================== */

/// Runner lifecycle state
///
/// Reachable transitions: `Created -> Playing <-> Paused -> Done`.
/// `Done` is absorbing. `SyncRunner` never visits `Paused`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum RunnerState {
    Created = 0,
    Playing = 1,
    Paused = 2,
    Done = 3,
}

impl RunnerState {
    /// Decode a snapshot published through an `AtomicU8`.
    pub(crate) fn from_u8(raw: u8) -> RunnerState {
        match raw {
            0 => RunnerState::Created,
            1 => RunnerState::Playing,
            2 => RunnerState::Paused,
            _ => RunnerState::Done,
        }
    }
}

/* ===================== Type Descriptors ===================== */

/// Opaque descriptor for a published result's type.
///
/// Supplied by the host's type system. The core only asks whether the type
/// is a sequence (streaming results must be) and how to name it.
pub trait TypeDescriptor: fmt::Debug + Send + Sync {
    fn is_sequence(&self) -> bool;
    fn name(&self) -> &str;
}

pub type TypeRef = Arc<dyn TypeDescriptor>;
