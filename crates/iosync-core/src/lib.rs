//! Core types and seams for sync-file based I/O coordination.

pub mod direction;
pub mod error;
pub mod prelude;
pub mod timeout;
pub mod traits;

pub use direction::Direction;
pub use error::{
    BoxError, LockScopeError, SyncError, SyncResult, is_sharing_violation, is_transient,
};
pub use prelude::*;
