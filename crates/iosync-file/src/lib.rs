//! File system building blocks for sync-file based coordination.
//!
//! - [`name`]: the `__ofs[_r|_w][#id].sync` naming protocol
//! - [`scope`]: the lock scope state machine over one marker file
//! - [`registry`]: reference-counted sharing of scopes within a process
//! - [`locker`]: all-or-nothing locking of `.lock` companions
//! - [`process`]: "who holds this file" diagnostics

pub mod id;
pub mod locker;
pub mod name;
pub mod process;
pub mod registry;
pub mod scope;

pub use id::StringIdProvider;
pub use locker::{FileLocker, LockerGate};
pub use name::{SyncFileNameService, SyncFileNamingContext};
pub use process::{NoProcessLockQuery, default_process_lock_query};
#[cfg(target_os = "linux")]
pub use process::ProcFsLockQuery;
pub use registry::{ScopeGuard, ScopeRegistry};
pub use scope::{FileLockScope, purge_orphaned_markers};
