//! Per-path pending callbacks of one direction.
//!
//! At most one callback is pending per observed path. A newer callback
//! replaces the pending one, but the callers waiting on the old callback are
//! carried over, so everyone is released by the next successful execution.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::BoxFuture;
use tokio::sync::oneshot;

use iosync_core::error::{BoxError, SyncResult};

/// Type-erased user callback. `Ok(false)` asks for another attempt.
pub(crate) type Callback =
    Arc<dyn Fn(PathBuf) -> BoxFuture<'static, Result<bool, BoxError>> + Send + Sync>;

/// Receives the outcome of the cycle that executed a callback.
pub(crate) type Waiter = oneshot::Sender<SyncResult<()>>;

struct PendingEntry {
    callback: Callback,
    waiters: Vec<Waiter>,
}

/// Entry removed from the queue for execution.
pub(crate) struct TakenEntry<'a> {
    pending: &'a PendingCallbacks,
    path: PathBuf,
    entry: Option<PendingEntry>,
}

impl TakenEntry<'_> {
    pub(crate) fn callback(&self) -> Option<Callback> {
        self.entry.as_ref().map(|entry| Arc::clone(&entry.callback))
    }

    /// Delivers `outcome` to every waiter. Waiters that went away are ignored.
    pub(crate) fn complete(mut self, outcome: SyncResult<()>) {
        let Some(entry) = self.entry.take() else {
            return;
        };
        for waiter in entry.waiters {
            let _ = waiter.send(outcome.clone());
        }
    }

    /// Puts the unexecuted entry back.
    pub(crate) fn requeue(self) {
        drop(self);
    }
}

impl Drop for TakenEntry<'_> {
    fn drop(&mut self) {
        if let Some(entry) = self.entry.take() {
            self.pending.requeue(&self.path, entry);
        }
    }
}

#[derive(Default)]
pub(crate) struct PendingCallbacks {
    entries: Mutex<HashMap<PathBuf, PendingEntry>>,
    drivers: Mutex<HashMap<PathBuf, usize>>,
}

impl PendingCallbacks {
    /// Installs `callback` for `path`, replacing a pending one.
    ///
    /// Returns `true` when nothing was pending, in which case the caller is
    /// responsible for driving the path.
    pub(crate) fn install(&self, path: &Path, callback: Callback, waiter: Waiter) -> bool {
        let mut entries = lock(&self.entries);
        match entries.get_mut(path) {
            Some(entry) => {
                entry.callback = callback;
                entry.waiters.push(waiter);
                false
            }
            None => {
                entries.insert(
                    path.to_path_buf(),
                    PendingEntry {
                        callback,
                        waiters: vec![waiter],
                    },
                );
                true
            }
        }
    }

    /// Removes the pending entry so exactly one executor runs it.
    ///
    /// The entry goes back into the queue if the returned handle is dropped
    /// without an outcome.
    pub(crate) fn take(&self, path: &Path) -> Option<TakenEntry<'_>> {
        let entry = lock(&self.entries).remove(path)?;
        Some(TakenEntry {
            pending: self,
            path: path.to_path_buf(),
            entry: Some(entry),
        })
    }

    /// Puts an unexecuted entry back.
    ///
    /// When a newer callback was installed meanwhile, the newer callback is
    /// kept and the old waiters join it.
    fn requeue(&self, path: &Path, entry: PendingEntry) {
        let mut entries = lock(&self.entries);
        match entries.get_mut(path) {
            Some(newer) => newer.waiters.extend(entry.waiters),
            None => {
                entries.insert(path.to_path_buf(), entry);
            }
        }
    }

    pub(crate) fn contains(&self, path: &Path) -> bool {
        lock(&self.entries).contains_key(path)
    }

    /// Registers the caller as a driver of `path` until the guard drops.
    pub(crate) fn drive(&self, path: &Path) -> DriverGuard<'_> {
        *lock(&self.drivers).entry(path.to_path_buf()).or_insert(0) += 1;
        DriverGuard {
            pending: self,
            path: path.to_path_buf(),
        }
    }

    pub(crate) fn has_driver(&self, path: &Path) -> bool {
        lock(&self.drivers).get(path).is_some_and(|count| *count > 0)
    }
}

/// Driver registration of one caller.
pub(crate) struct DriverGuard<'a> {
    pending: &'a PendingCallbacks,
    path: PathBuf,
}

impl Drop for DriverGuard<'_> {
    fn drop(&mut self) {
        let mut drivers = lock(&self.pending.drivers);
        if let Some(count) = drivers.get_mut(&self.path) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                drivers.remove(&self.path);
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
