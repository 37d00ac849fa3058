//! Callback-queueing read/write scheduler over sync marker files.
//!
//! [`IoSynchronizationService`] lets many callers queue reads and writes of
//! a logical resource while at most one process holds its marker. Changes
//! made by other processes are picked up through filesystem notifications
//! and announced as [`RefreshRequired`].

mod builder;
mod pending;
mod resolver;
mod service;
mod watcher;

pub use builder::{
    DEFAULT_DELAY_AFTER_WRITE_OPERATIONS, DEFAULT_DELAY_BETWEEN_CHECKS, DEFAULT_REFRESH_CAPACITY,
    IoSynchronizationServiceBuilder,
};
pub use resolver::{ObservedPathAsSyncFile, SeparateSyncFile};
pub use service::{IoSynchronizationService, RefreshRequired};
