//! Host collaborator interfaces
//!
//! Opaque interfaces supplied by the generated/host code. The core stores
//! references and forwards them; it performs no I/O of its own.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::io::{Read, Write};
use std::sync::Arc;
use uuid::Uuid;

/// I/O primitives the host makes available to actions.
pub trait RunnerHost: Send + Sync {
    /// Open an existing stream for reading.
    fn open_stream(&self, name: &str) -> Result<Box<dyn Read + Send>>;

    /// Create (or truncate) a stream for writing.
    fn create_stream(&self, name: &str) -> Result<Box<dyn Write + Send>>;

    /// List the entries of a directory.
    fn list_directory(&self, path: &str) -> Result<Vec<String>>;

    /// Current wall-clock time.
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Execution context used by generated code inside action hooks.
///
/// `ping` surfaces an external cancel signal unrelated to any one runner;
/// generated code calls it between units of work.
pub trait ExecutionContext: Send + Sync {
    /// Fail if an external cancel signal has been set.
    fn ping(&self, id: Uuid) -> Result<()>;

    /// Log a message attributed to the given runner.
    fn log(&self, id: Uuid, message: &str);
}

pub type HostRef = Arc<dyn RunnerHost>;
