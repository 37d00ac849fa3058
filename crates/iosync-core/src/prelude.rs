//! Convenience prelude for synchronization types.

pub use crate::direction::Direction;
pub use crate::error::{BoxError, LockScopeError, SyncError, SyncResult};
pub use crate::traits::{IdProvider, ObservedFileResolver, ProcessLockQuery};
