//! Keyed mutual exclusion around shared resources.
//!
//! Data access never goes through these locks; the engine's transaction
//! boundaries cover it. A [`ScopedMutex`] serializes the few operations on
//! process-wide resources, such as opening the same realm from two threads.

use crate::error::{CoreError, CoreResult};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::OnceLock;
use std::thread::{self, ThreadId};
use tracing::trace;

/// A set of named critical sections.
///
/// At most one caller runs inside the section for a given key at a time.
/// The lock is not re-entrant: entering a key the current thread already
/// holds fails instead of deadlocking.
#[derive(Debug, Default)]
pub struct ScopedMutex {
    held: Mutex<HashMap<String, ThreadId>>,
    released: Condvar,
}

struct Guard<'a> {
    mutex: &'a ScopedMutex,
    key: String,
}

impl Drop for Guard<'_> {
    fn drop(&mut self) {
        self.mutex.held.lock().remove(&self.key);
        self.mutex.released.notify_all();
        trace!(key = %self.key, "released scoped lock");
    }
}

impl ScopedMutex {
    /// Creates an empty lock set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` while holding the section for `key`.
    ///
    /// The section is released when `f` returns or unwinds.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IllegalArgument`] if the current thread already
    /// holds `key`, or whatever `f` returns.
    pub fn with_lock<R>(&self, key: &str, f: impl FnOnce() -> CoreResult<R>) -> CoreResult<R> {
        let _guard = self.acquire(key)?;
        f()
    }

    /// Returns true if some thread holds the section for `key`.
    #[must_use]
    pub fn is_locked(&self, key: &str) -> bool {
        self.held.lock().contains_key(key)
    }

    fn acquire(&self, key: &str) -> CoreResult<Guard<'_>> {
        let me = thread::current().id();
        let mut held = self.held.lock();
        loop {
            match held.get(key) {
                Some(owner) if *owner == me => {
                    return Err(CoreError::illegal_argument(format!(
                        "Scoped lock '{key}' is already held by this thread"
                    )));
                }
                Some(_) => self.released.wait(&mut held),
                None => break,
            }
        }
        held.insert(key.to_string(), me);
        trace!(key, "acquired scoped lock");
        Ok(Guard {
            mutex: self,
            key: key.to_string(),
        })
    }
}

/// The process-wide lock serializing realm opens by name.
pub fn open_lock() -> &'static ScopedMutex {
    static OPEN_LOCK: OnceLock<ScopedMutex> = OnceLock::new();
    OPEN_LOCK.get_or_init(ScopedMutex::new)
}
