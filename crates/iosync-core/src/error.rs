//! Error types for synchronization operations.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::direction::Direction;

/// Boxed error returned by user supplied read/write callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Windows `ERROR_SHARING_VIOLATION`.
const ERROR_SHARING_VIOLATION: i32 = 32;

/// Windows `ERROR_LOCK_VIOLATION`.
const ERROR_LOCK_VIOLATION: i32 = 33;

/// A sync marker could not be created or opened for a reason other than
/// contention.
#[derive(Error, Debug, Clone)]
#[error("failed to lock synchronization file '{}': {source}", .path.display())]
pub struct LockScopeError {
    /// Marker file that failed to open.
    pub path: PathBuf,
    /// Underlying I/O failure.
    #[source]
    pub source: Arc<io::Error>,
}

impl LockScopeError {
    pub fn new(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self {
            path: path.into(),
            source: Arc::new(source),
        }
    }
}

/// Errors that can occur while coordinating reads and writes.
///
/// The type is `Clone` so that a single outcome can be delivered to every
/// caller waiting on the same pending callback.
#[derive(Error, Debug, Clone)]
pub enum SyncError {
    /// Marker file failure that is not a sharing violation.
    #[error(transparent)]
    LockScope(#[from] LockScopeError),

    /// The user supplied callback failed.
    #[error("fatal error in executing {direction} for '{}'", .path.display())]
    Callback {
        path: PathBuf,
        direction: Direction,
        #[source]
        source: Arc<dyn std::error::Error + Send + Sync>,
    },

    /// A pending callback was dropped before producing an outcome.
    #[error("pending {direction} for '{}' was abandoned", .path.display())]
    Abandoned { path: PathBuf, direction: Direction },

    /// A filesystem watcher could not be started.
    #[error("failed to watch '{}': {source}", .path.display())]
    Watch {
        path: PathBuf,
        #[source]
        source: Arc<dyn std::error::Error + Send + Sync>,
    },

    /// Locking files did not finish in time.
    #[error("locking files timed out after {0:?}")]
    Timeout(Duration),

    /// Invalid service configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl SyncError {
    /// Wraps a failed callback.
    pub fn callback(path: impl Into<PathBuf>, direction: Direction, source: BoxError) -> Self {
        Self::Callback {
            path: path.into(),
            direction,
            source: Arc::from(source),
        }
    }

    /// Wraps a watcher failure.
    pub fn watch<E>(path: impl Into<PathBuf>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Watch {
            path: path.into(),
            source: Arc::new(source),
        }
    }
}

/// Result type for synchronization operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Returns `true` when the error means "somebody else holds this file".
///
/// This is the only I/O condition that is ever retried.
pub fn is_sharing_violation(error: &io::Error) -> bool {
    if error.kind() == io::ErrorKind::WouldBlock {
        return true;
    }

    matches!(
        error.raw_os_error(),
        Some(code) if cfg!(windows) && (code == ERROR_SHARING_VIOLATION || code == ERROR_LOCK_VIOLATION)
    )
}

/// Returns `true` when a callback error is a transient sharing violation.
pub fn is_transient(error: &BoxError) -> bool {
    error
        .downcast_ref::<io::Error>()
        .is_some_and(is_sharing_violation)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn would_block_is_a_sharing_violation() {
        let error = io::Error::from(io::ErrorKind::WouldBlock);
        assert!(is_sharing_violation(&error));
    }

    #[test]
    fn other_io_errors_are_not_transient() {
        let error: BoxError = Box::new(io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(!is_transient(&error));

        let error: BoxError = Box::new(io::Error::from(io::ErrorKind::WouldBlock));
        assert!(is_transient(&error));

        let error: BoxError = "plain message".into();
        assert!(!is_transient(&error));
    }

    #[test]
    fn callback_error_keeps_source() {
        let error = SyncError::callback(
            "/data/project",
            Direction::Write,
            Box::new(io::Error::other("disk on fire")),
        );
        assert_eq!(
            error.to_string(),
            "fatal error in executing writing for '/data/project'"
        );
        let source = std::error::Error::source(&error).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("disk on fire"));
    }
}
