//! Exclusive advisory locking of a fixed set of files.
//!
//! Every file `x` is represented by a companion `x.lock` that is created and
//! held exclusively. A locker takes all of its files at once or none of them.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use iosync_core::error::{LockScopeError, SyncError, SyncResult, is_sharing_violation};
use iosync_core::timeout::Deadline;

use crate::scope::open_marker;

/// Extension of companion lock files.
const LOCK_EXTENSION: &str = "lock";

/// Timeout used by [`FileLocker::lock_files_default`].
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Delay between attempts to take the whole set.
const RETRY_DELAY: Duration = Duration::from_millis(10);

/// Serializes lock acquisition between lockers sharing the gate.
#[derive(Clone, Default)]
pub struct LockerGate {
    inner: Arc<Mutex<()>>,
}

impl LockerGate {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Holds `.lock` companions of a set of files.
///
/// Dropping the locker releases and deletes its lock files.
pub struct FileLocker {
    gate: LockerGate,
    held: BTreeMap<PathBuf, File>,
}

impl FileLocker {
    /// Creates a locker with its own gate.
    pub fn new() -> Self {
        Self::with_gate(LockerGate::new())
    }

    /// Creates a locker sharing `gate` with other lockers.
    pub fn with_gate(gate: LockerGate) -> Self {
        Self {
            gate,
            held: BTreeMap::new(),
        }
    }

    /// Lock files currently held.
    pub fn locked_files(&self) -> impl Iterator<Item = &Path> {
        self.held.keys().map(PathBuf::as_path)
    }

    /// Locks `files` with [`DEFAULT_LOCK_TIMEOUT`].
    pub async fn lock_files_default<I, P>(&mut self, files: I) -> SyncResult<()>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        self.lock_files(files, Some(DEFAULT_LOCK_TIMEOUT)).await
    }

    /// Locks `files` in addition to the files already held.
    ///
    /// Files already held by this locker are released and taken again
    /// together with the new ones, so the whole set is acquired in one step.
    /// `None` waits indefinitely.
    #[instrument(skip(self, files), fields(timeout = ?timeout))]
    pub async fn lock_files<I, P>(&mut self, files: I, timeout: Option<Duration>) -> SyncResult<()>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let gate = self.gate.clone();
        let _gate = gate.inner.lock().await;

        let mut lock_files: BTreeSet<PathBuf> = files
            .into_iter()
            .map(|file| lock_file_name(file.as_ref()))
            .collect();
        lock_files.extend(self.held.keys().cloned());
        self.release();

        for file in &lock_files {
            debug!(lock_file = %file.display(), "Creating and locking file");
        }

        let deadline = Deadline::after(timeout);
        loop {
            if let Some(locked) = try_lock_all(&lock_files)? {
                self.held = locked;
                return Ok(());
            }

            if deadline.has_expired() {
                warn!(elapsed = ?deadline.elapsed(), "Locking files has been interrupted due to timeout");
                return Err(SyncError::Timeout(deadline.timeout().unwrap_or_default()));
            }

            tokio::time::sleep(deadline.clamp(RETRY_DELAY)).await;
        }
    }

    /// Releases and deletes every held lock file.
    ///
    /// Each file is deleted while its handle is still open, so a waiting
    /// locker cannot take a file that is about to disappear.
    pub fn release(&mut self) {
        for (path, file) in std::mem::take(&mut self.held) {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!(lock_file = %path.display(), "Released lock file"),
                Err(error) if error.kind() == ErrorKind::NotFound => {}
                Err(error) => warn!(lock_file = %path.display(), %error, "Failed to delete lock file"),
            }
            drop(file);
        }
    }
}

impl Default for FileLocker {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for FileLocker {
    fn drop(&mut self) {
        self.release();
    }
}

/// `data.txt` → `data.txt.lock`; names already ending in `.lock` are kept.
fn lock_file_name(file: &Path) -> PathBuf {
    let is_lock_file = file
        .extension()
        .and_then(|extension| extension.to_str())
        .is_some_and(|extension| extension.eq_ignore_ascii_case(LOCK_EXTENSION));
    if is_lock_file {
        return file.to_path_buf();
    }

    let mut name = file.as_os_str().to_os_string();
    name.push(".");
    name.push(LOCK_EXTENSION);
    PathBuf::from(name)
}

/// Takes every file or none; `Ok(None)` means one of them is busy.
fn try_lock_all(
    files: &BTreeSet<PathBuf>,
) -> Result<Option<BTreeMap<PathBuf, File>>, LockScopeError> {
    let mut locked = BTreeMap::new();
    for path in files {
        match open_marker(path, false) {
            Ok(file) => {
                locked.insert(path.clone(), file);
            }
            Err(error) if is_sharing_violation(&error) => return Ok(None),
            Err(error) => return Err(LockScopeError::new(path, error)),
        }
    }

    Ok(Some(locked))
}
