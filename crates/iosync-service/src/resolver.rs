//! Strategies mapping an observed path to its sync marker.

use std::path::{Path, PathBuf};

use iosync_core::traits::ObservedFileResolver;
use iosync_file::{SyncFileNameService, SyncFileNamingContext};

/// Guards every resource with a generic `__ofs.sync` marker in its base
/// directory.
#[derive(Debug, Clone, Default)]
pub struct SeparateSyncFile {
    names: SyncFileNameService,
}

impl SeparateSyncFile {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ObservedFileResolver for SeparateSyncFile {
    fn resolve(&self, _path: &Path, base_path: &Path) -> PathBuf {
        self.names
            .file_name(&SyncFileNamingContext::in_directory(base_path))
    }
}

/// Uses the observed file itself as its marker.
///
/// Scopes for such paths are dummies: the resource is never created,
/// locked or deleted by the synchronization layer.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObservedPathAsSyncFile;

impl ObservedFileResolver for ObservedPathAsSyncFile {
    fn resolve(&self, path: &Path, _base_path: &Path) -> PathBuf {
        path.to_path_buf()
    }
}

/// Directory a resource lives in: the path itself for directories, its
/// parent otherwise.
pub(crate) fn base_path(path: &Path) -> PathBuf {
    if path.is_dir() {
        return path.to_path_buf();
    }

    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
