//! Seams between the synchronization engine and its collaborators.

use std::path::{Path, PathBuf};

// ============================================================================
// Process Lock Diagnostics
// ============================================================================

/// Reports which processes currently hold a file open.
///
/// Used for log output only. Implementations are best-effort: an empty list
/// means "unknown", never "unlocked", and failures must be swallowed.
pub trait ProcessLockQuery: Send + Sync {
    /// Returns display names of processes holding `path` open.
    fn processes_locking(&self, path: &Path) -> Vec<String>;
}

// ============================================================================
// Observed File Resolution
// ============================================================================

/// Maps an observed resource path to the sync marker that guards it.
///
/// `base_path` is the directory the resource lives in (or the resource itself
/// when it is a directory).
///
/// # Example
///
/// ```rust,ignore
/// // Guard every resource with a marker next to it.
/// let resolver = |_path: &Path, base: &Path| base.join("__ofs.sync");
/// ```
pub trait ObservedFileResolver: Send + Sync {
    fn resolve(&self, path: &Path, base_path: &Path) -> PathBuf;
}

impl<F> ObservedFileResolver for F
where
    F: Fn(&Path, &Path) -> PathBuf + Send + Sync,
{
    fn resolve(&self, path: &Path, base_path: &Path) -> PathBuf {
        self(path, base_path)
    }
}

// ============================================================================
// Identifiers
// ============================================================================

/// Produces identifiers for uniquely named sync markers.
pub trait IdProvider: Send + Sync {
    fn new_id(&self) -> String;
}
