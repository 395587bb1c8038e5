//! Published-results registry
//!
//! Append/replace-by-name list of result descriptors. Thread-safe; lookups
//! are O(n) scans (n is expected small). `count()` never takes the lock: it
//! reads the last count published under it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::errors::RunnerError;
use crate::types::TypeRef;


/* ===================== Descriptors ===================== */

/// A published result.
///
/// `index` is stable for a given name across replacement; a brand-new name
/// gets the next index. At most one descriptor in a registry is primary.
#[derive(Debug, Clone)]
pub struct ResultDescriptor {
    pub name: String,
    pub index: usize,
    pub ty: TypeRef,
    pub is_primary: bool,
    /// Sequence-typed result whose consumption may block while paused.
    /// Streaming implies stable.
    pub is_streaming: bool,
    /// Safe to read while the runner is actively playing.
    pub is_stable: bool,
}

/* ===================== Registry ===================== */

struct Entries {
    list: Vec<ResultDescriptor>,
    primary: Option<usize>,
    /// Immutable copy handed out by `all()`; rebuilt lazily after a mutation.
    snapshot: Option<Arc<Vec<ResultDescriptor>>>,
}

/// Registry of results published by a runner's action.
///
/// Becomes an unusable disposed sentinel after `dispose()`; every operation
/// except `count()` and `is_disposed()` then fails with
/// [`RunnerError::Disposed`].
pub struct ResultRegistry {
    // None is the disposed sentinel.
    inner: Mutex<Option<Entries>>,
    count: AtomicUsize,
}

impl ResultRegistry {
    pub fn new() -> ResultRegistry {
        ResultRegistry {
            inner: Mutex::new(Some(Entries {
                list: Vec::new(),
                primary: None,
                snapshot: None,
            })),
            count: AtomicUsize::new(0),
        }
    }

    /// Publish a result, replacing any existing result of the same name in
    /// place (preserving its index).
    pub fn add_result(
        &self,
        name: &str,
        ty: TypeRef,
        is_primary: bool,
    ) -> Result<ResultDescriptor, RunnerError> {
        self.insert(name, ty, is_primary, false, false)
    }

    /// Publish a streaming result. The type must be a sequence; streaming
    /// results are always stable.
    pub fn add_streaming_result(
        &self,
        name: &str,
        ty: TypeRef,
        is_primary: bool,
    ) -> Result<ResultDescriptor, RunnerError> {
        if !ty.is_sequence() {
            return Err(RunnerError::NotSequence(name.to_string()));
        }
        self.insert(name, ty, is_primary, true, true)
    }

    /// Publish a stable (readable-while-playing) result.
    pub fn add_stable_result(
        &self,
        name: &str,
        ty: TypeRef,
        is_primary: bool,
    ) -> Result<ResultDescriptor, RunnerError> {
        self.insert(name, ty, is_primary, false, true)
    }

    fn insert(
        &self,
        name: &str,
        ty: TypeRef,
        is_primary: bool,
        is_streaming: bool,
        is_stable: bool,
    ) -> Result<ResultDescriptor, RunnerError> {
        let mut guard = self.lock();
        let entries = guard.as_mut().ok_or(RunnerError::Disposed)?;

        let index = entries
            .list
            .iter()
            .position(|d| d.name == name)
            .unwrap_or(entries.list.len());

        let descriptor = ResultDescriptor {
            name: name.to_string(),
            index,
            ty,
            is_primary,
            is_streaming,
            is_stable,
        };

        if index == entries.list.len() {
            entries.list.push(descriptor.clone());
        } else {
            entries.list[index] = descriptor.clone();
        }

        if is_primary {
            // A new primary clears the flag on the previous holder in place.
            if let Some(prev) = entries.primary {
                if prev != index {
                    entries.list[prev].is_primary = false;
                }
            }
            entries.primary = Some(index);
        } else if entries.primary == Some(index) {
            // The replaced entry held the primary flag and the replacement
            // does not.
            entries.primary = None;
        }

        entries.snapshot = None;
        self.count.store(entries.list.len(), Ordering::Release);

        Ok(descriptor)
    }

    /// Number of published results. Never blocks; advisory with respect to
    /// in-flight writers.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// The current primary result, if any.
    pub fn primary(&self) -> Result<Option<ResultDescriptor>, RunnerError> {
        let guard = self.lock();
        let entries = guard.as_ref().ok_or(RunnerError::Disposed)?;
        Ok(entries.primary.map(|i| entries.list[i].clone()))
    }

    /// Immutable snapshot of every published result, cached until the next
    /// mutation.
    pub fn all(&self) -> Result<Arc<Vec<ResultDescriptor>>, RunnerError> {
        let mut guard = self.lock();
        let entries = guard.as_mut().ok_or(RunnerError::Disposed)?;
        let snapshot = match &entries.snapshot {
            Some(snapshot) => Arc::clone(snapshot),
            None => {
                let built = Arc::new(entries.list.clone());
                entries.snapshot = Some(Arc::clone(&built));
                built
            }
        };
        Ok(snapshot)
    }

    /// Look up a result by name. Missing names are not an error.
    pub fn by_name(&self, name: &str) -> Result<Option<ResultDescriptor>, RunnerError> {
        let guard = self.lock();
        let entries = guard.as_ref().ok_or(RunnerError::Disposed)?;
        Ok(entries.list.iter().find(|d| d.name == name).cloned())
    }

    /// Check that a descriptor is still registered at its recorded index.
    pub(crate) fn validate(&self, descriptor: &ResultDescriptor) -> Result<(), RunnerError> {
        let guard = self.lock();
        let entries = guard.as_ref().ok_or(RunnerError::Disposed)?;
        match entries.list.get(descriptor.index) {
            Some(current) if current.name == descriptor.name => Ok(()),
            _ => Err(RunnerError::DescriptorStale(
                descriptor.name.clone(),
                descriptor.index,
            )),
        }
    }

    /// Fail with `Disposed` once the registry has been torn down. The
    /// runner's public API routes its disposed guard through this check.
    pub(crate) fn ensure_live(&self) -> Result<(), RunnerError> {
        match self.lock().as_ref() {
            Some(_) => Ok(()),
            None => Err(RunnerError::Disposed),
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.lock().is_none()
    }

    /// Tear the registry down to the disposed sentinel. Idempotent.
    pub fn dispose(&self) {
        let mut guard = self.lock();
        *guard = None;
        self.count.store(0, Ordering::Release);
    }

    fn lock(&self) -> MutexGuard<'_, Option<Entries>> {
        self.inner.lock().expect("result registry poisoned")
    }
}

impl Default for ResultRegistry {
    fn default() -> Self {
        ResultRegistry::new()
    }
}
