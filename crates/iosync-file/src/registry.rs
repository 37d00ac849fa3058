//! Reference-counted registry of lock scopes.
//!
//! Nested and concurrent callers in one process that coordinate the same
//! `(path, direction)` share a single [`FileLockScope`], and therefore a
//! single open marker handle. The scope is unlocked and dropped when the last
//! [`ScopeGuard`] goes away.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::trace;

use crate::scope::FileLockScope;

struct ScopeEntry {
    ref_count: usize,
    scope: Arc<FileLockScope>,
}

/// Arena of named, reference-counted lock scopes.
///
/// Cloning the registry shares the underlying arena.
#[derive(Clone, Default)]
pub struct ScopeRegistry {
    entries: Arc<Mutex<HashMap<String, ScopeEntry>>>,
}

impl ScopeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a guard for the scope called `name`, creating it with `create`
    /// when no guard for that name is alive.
    pub fn acquire(&self, name: &str, create: impl FnOnce() -> FileLockScope) -> ScopeGuard {
        let mut entries = self.entries();
        let entry = entries.entry(name.to_string()).or_insert_with(|| ScopeEntry {
            ref_count: 0,
            scope: Arc::new(create()),
        });
        entry.ref_count += 1;
        trace!(scope = name, ref_count = entry.ref_count, "Acquired scope reference");

        ScopeGuard {
            registry: self.clone(),
            name: name.to_string(),
            scope: Arc::clone(&entry.scope),
        }
    }

    /// Returns `true` while at least one guard for `name` is alive.
    pub fn contains(&self, name: &str) -> bool {
        self.entries().contains_key(name)
    }

    /// Number of live guards for `name`.
    pub fn ref_count(&self, name: &str) -> usize {
        self.entries().get(name).map_or(0, |entry| entry.ref_count)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Drops one reference. The last one unlocks the scope before the name
    /// becomes available again, so a new scope of the same name never
    /// contends with the old handle.
    fn release(&self, name: &str) {
        let mut entries = self.entries();
        let Some(entry) = entries.get_mut(name) else {
            return;
        };

        entry.ref_count = entry.ref_count.saturating_sub(1);
        trace!(scope = name, ref_count = entry.ref_count, "Released scope reference");
        if entry.ref_count == 0 {
            if let Some(entry) = entries.remove(name) {
                entry.scope.unlock();
            }
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, ScopeEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One reference to a registered scope.
///
/// Dropping the last guard of a name unlocks its scope.
pub struct ScopeGuard {
    registry: ScopeRegistry,
    name: String,
    scope: Arc<FileLockScope>,
}

impl ScopeGuard {
    pub fn scope(&self) -> &FileLockScope {
        &self.scope
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the underlying scope currently holds its marker.
    ///
    /// Dummy scopes report `true`.
    pub fn is_locked(&self) -> bool {
        self.scope.is_dummy() || self.scope.is_locked()
    }

    pub fn ref_count(&self) -> usize {
        self.registry.ref_count(&self.name)
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        self.registry.release(&self.name);
    }
}

impl std::fmt::Debug for ScopeGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeGuard")
            .field("name", &self.name)
            .field("scope", &self.scope)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guards_share_one_scope() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("__ofs.sync");
        let registry = ScopeRegistry::new();

        let outer = registry.acquire("data_read", || FileLockScope::new(true, &marker));
        assert!(outer.scope().lock().unwrap());

        let inner = registry.acquire("data_read", || unreachable!("scope already registered"));
        assert_eq!(inner.ref_count(), 2);
        assert!(inner.is_locked());

        drop(inner);
        assert!(marker.exists());
        assert_eq!(outer.ref_count(), 1);

        drop(outer);
        assert!(!marker.exists());
        assert!(!registry.contains("data_read"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_scope_recreated_after_release() {
        let registry = ScopeRegistry::new();
        drop(registry.acquire("a_write", FileLockScope::dummy));

        let mut created = false;
        let guard = registry.acquire("a_write", || {
            created = true;
            FileLockScope::dummy()
        });
        assert!(created);
        assert!(guard.is_locked());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_released_scope_never_blocks_its_successor() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("__ofs.sync");
        let registry = ScopeRegistry::new();

        let workers: Vec<_> = (0..2)
            .map(|_| {
                let registry = registry.clone();
                let marker = marker.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        let guard = registry.acquire("data_write", || FileLockScope::new(false, &marker));
                        assert!(guard.scope().lock().unwrap());
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }
        assert!(registry.is_empty());
    }
}
