//! Lock scope over one sync marker file.

use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use iosync_core::error::{LockScopeError, is_sharing_violation};
use iosync_core::traits::{IdProvider, ProcessLockQuery};

use crate::name::{SyncFileNameService, SyncFileNamingContext, matches_search_filter};
use crate::process::NoProcessLockQuery;

/// Mutable part of a scope, guarded by the scope's mutex.
#[derive(Default)]
struct ScopeState {
    /// Open marker handle. Holding it is holding the lock.
    file: Option<File>,
    /// Attempts since the last unlock.
    lock_attempts: u32,
}

/// Owns the lifecycle of one on-disk sync marker.
///
/// A scope is either a *dummy* (no marker, every operation succeeds and does
/// nothing) or toggles between unlocked and locked. Locking creates the
/// marker and keeps it open exclusively; unlocking closes it and, for read
/// scopes, deletes it first.
///
/// Dropping the scope unlocks it.
pub struct FileLockScope {
    sync_file: Option<PathBuf>,
    is_read_scope: bool,
    notify_on_release: AtomicBool,
    /// `(directory, search filter)` of sibling markers purged before locking.
    orphan_filter: Option<(PathBuf, String)>,
    process_query: Arc<dyn ProcessLockQuery>,
    state: Mutex<ScopeState>,
}

impl FileLockScope {
    /// Creates a scope for `sync_file`.
    pub fn new(is_read_scope: bool, sync_file: impl Into<PathBuf>) -> Self {
        let sync_file = sync_file.into();
        Self {
            sync_file: (!sync_file.as_os_str().is_empty()).then_some(sync_file),
            is_read_scope,
            notify_on_release: AtomicBool::new(false),
            orphan_filter: None,
            process_query: Arc::new(NoProcessLockQuery),
            state: Mutex::new(ScopeState::default()),
        }
    }

    /// Creates a scope that never touches the filesystem.
    pub fn dummy() -> Self {
        Self::new(false, PathBuf::new())
    }

    /// Creates a scope for a uniquely named marker described by `context`.
    ///
    /// When the context carries an id, unheld markers of the same kind in the
    /// same directory are treated as orphans and removed before locking.
    pub fn for_context<P: IdProvider>(
        context: &SyncFileNamingContext,
        names: &SyncFileNameService<P>,
    ) -> Self {
        let mut scope = Self::new(context.is_read_scope.unwrap_or(false), names.file_name(context));
        if context.has_id {
            if let Some(directory) = &context.directory {
                scope.orphan_filter = Some((directory.clone(), names.search_filter(context)));
            }
        }
        scope
    }

    /// Sets the diagnostic query used when a marker is busy.
    pub fn with_process_query(mut self, process_query: Arc<dyn ProcessLockQuery>) -> Self {
        self.process_query = process_query;
        self
    }

    pub fn is_dummy(&self) -> bool {
        self.sync_file.is_none()
    }

    pub fn is_read_scope(&self) -> bool {
        self.is_read_scope
    }

    pub fn sync_file(&self) -> Option<&Path> {
        self.sync_file.as_deref()
    }

    pub fn is_locked(&self) -> bool {
        self.state().file.is_some()
    }

    pub fn lock_attempts(&self) -> u32 {
        self.state().lock_attempts
    }

    pub fn notify_on_release(&self) -> bool {
        self.notify_on_release.load(Ordering::Acquire)
    }

    /// Touch the marker right before releasing it so watchers see a change.
    pub fn set_notify_on_release(&self, notify: bool) {
        self.notify_on_release.store(notify, Ordering::Release);
    }

    /// Attempts to take the marker.
    ///
    /// Returns `Ok(true)` when the marker is held (including dummy scopes and
    /// repeated calls), `Ok(false)` when someone else holds it and
    /// `Err` for any other failure.
    pub fn lock(&self) -> Result<bool, LockScopeError> {
        let Some(sync_file) = self.sync_file.as_deref() else {
            return Ok(true);
        };

        let mut state = self.state();
        if state.file.is_some() {
            return Ok(true);
        }

        if let Some((directory, filter)) = &self.orphan_filter {
            if let Err(error) = purge_orphaned_markers(directory, filter) {
                debug!(directory = %directory.display(), %error, "Failed to purge orphaned synchronization files");
            }
        }

        let previous_attempts = state.lock_attempts;
        state.lock_attempts += 1;

        match open_marker(sync_file, self.is_read_scope) {
            Ok(file) => {
                state.file = Some(file);
                debug!(sync_file = %sync_file.display(), "Locked synchronization file");
                Ok(true)
            }
            Err(error) if is_sharing_violation(&error) => {
                if previous_attempts > 0 {
                    return Ok(false);
                }

                let processes = self.process_query.processes_locking(sync_file);
                if processes.is_empty() {
                    debug!(
                        sync_file = %sync_file.display(),
                        %error,
                        "First attempt to lock synchronization file was unsuccessful. Possibly locked by unknown application. Will keep retrying in the background."
                    );
                } else {
                    debug!(
                        sync_file = %sync_file.display(),
                        locked_by = %processes.join(", "),
                        "First attempt to lock synchronization file was unsuccessful. Will keep retrying in the background."
                    );
                }

                Ok(false)
            }
            Err(error) => {
                warn!(sync_file = %sync_file.display(), %error, "Failed to lock synchronization file");
                Err(LockScopeError::new(sync_file, error))
            }
        }
    }

    /// Releases the marker.
    ///
    /// Read markers are deleted while the handle is still open so that no
    /// other process can take the marker between close and delete.
    pub fn unlock(&self) {
        let Some(sync_file) = self.sync_file.as_deref() else {
            return;
        };

        let mut state = self.state();
        if let Some(mut file) = state.file.take() {
            if self.notify_on_release() {
                write_sentinel(&mut file, sync_file);
            }

            if self.is_read_scope {
                self.delete_sync_file(sync_file);
            }

            drop(file);
            debug!(sync_file = %sync_file.display(), "Unlocked synchronization file");
        }

        state.lock_attempts = 0;
    }

    /// Writes one byte to the held marker to wake filesystem watchers.
    pub fn write_dummy_content(&self) {
        let Some(sync_file) = self.sync_file.as_deref() else {
            return;
        };

        if let Some(file) = self.state().file.as_mut() {
            write_sentinel(file, sync_file);
        }
    }

    fn delete_sync_file(&self, sync_file: &Path) {
        match std::fs::remove_file(sync_file) {
            Ok(()) => debug!(sync_file = %sync_file.display(), "Deleted synchronization file"),
            Err(error) if error.kind() == ErrorKind::NotFound => {}
            Err(error) => {
                let processes = self.process_query.processes_locking(sync_file);
                if processes.is_empty() {
                    warn!(sync_file = %sync_file.display(), %error, "Failed to delete synchronization file");
                } else {
                    warn!(
                        sync_file = %sync_file.display(),
                        %error,
                        locked_by = %processes.join(", "),
                        "Failed to delete synchronization file"
                    );
                }
            }
        }
    }

    fn state(&self) -> MutexGuard<'_, ScopeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for FileLockScope {
    fn drop(&mut self) {
        self.unlock();
    }
}

impl std::fmt::Debug for FileLockScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileLockScope")
            .field("sync_file", &self.sync_file)
            .field("is_read_scope", &self.is_read_scope)
            .field("is_locked", &self.is_locked())
            .finish()
    }
}

/// Removes markers in `directory` matching `filter` that nobody holds.
///
/// Returns the number of markers removed. Markers held by a live process are
/// left alone.
pub fn purge_orphaned_markers(directory: &Path, filter: &str) -> io::Result<usize> {
    let mut removed = 0;
    for entry in std::fs::read_dir(directory)? {
        let entry = entry?;
        let path = entry.path();
        let matches = entry
            .file_name()
            .to_str()
            .is_some_and(|file_name| matches_search_filter(file_name, filter));
        if !matches || !entry.file_type()?.is_file() {
            continue;
        }

        match open_marker(&path, false) {
            Ok(file) => {
                std::fs::remove_file(&path)?;
                drop(file);
                removed += 1;
                debug!(sync_file = %path.display(), "Removed orphaned synchronization file");
            }
            Err(error) if is_sharing_violation(&error) || error.kind() == ErrorKind::NotFound => {}
            Err(error) => return Err(error),
        }
    }

    Ok(removed)
}

/// Opens `path` for writing and takes an exclusive lock on it.
///
/// The lock lives as long as the returned descriptor: closing the file
/// releases it. The contents are left untouched; any modification wakes the
/// watchers of the marker.
pub(crate) fn open_marker(path: &Path, is_read_scope: bool) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(false);

    #[cfg(windows)]
    {
        use std::os::windows::fs::OpenOptionsExt;

        const FILE_SHARE_DELETE: u32 = 0x0000_0004;
        options.share_mode(if is_read_scope { FILE_SHARE_DELETE } else { 0 });
    }
    #[cfg(not(windows))]
    let _ = is_read_scope;

    let file = options.open(path)?;
    let mut lock = fd_lock::RwLock::new(file);
    std::mem::forget(lock.try_write()?);
    let file = lock.into_inner();

    if !is_still_linked(&file, path)? {
        return Err(io::Error::new(
            ErrorKind::WouldBlock,
            "synchronization file was replaced while locking",
        ));
    }

    Ok(file)
}

/// A read scope deletes its marker before closing it, so a contender that
/// opened the old file may be granted the lock on an unlinked inode.
#[cfg(unix)]
fn is_still_linked(file: &File, path: &Path) -> io::Result<bool> {
    use std::os::unix::fs::MetadataExt;

    let held = file.metadata()?;
    match std::fs::metadata(path) {
        Ok(current) => Ok(current.dev() == held.dev() && current.ino() == held.ino()),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(false),
        Err(error) => Err(error),
    }
}

#[cfg(not(unix))]
fn is_still_linked(_file: &File, _path: &Path) -> io::Result<bool> {
    Ok(true)
}

fn write_sentinel(file: &mut File, sync_file: &Path) {
    if let Err(error) = file.write_all(&[0]).and_then(|()| file.flush()) {
        warn!(sync_file = %sync_file.display(), %error, "Failed to write to synchronization file");
    }
}
