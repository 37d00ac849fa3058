//! Service configuration.

use std::sync::Arc;
use std::time::Duration;

use iosync_core::error::{SyncError, SyncResult};
use iosync_core::traits::{ObservedFileResolver, ProcessLockQuery};
use iosync_file::{ScopeRegistry, default_process_lock_query};

use crate::resolver::SeparateSyncFile;
use crate::service::IoSynchronizationService;

/// Delay between two attempts of a pending callback.
pub const DEFAULT_DELAY_BETWEEN_CHECKS: Duration = Duration::from_millis(50);

/// Delay between a successful write and the marker touch that announces it.
pub const DEFAULT_DELAY_AFTER_WRITE_OPERATIONS: Duration = Duration::from_millis(50);

/// Refresh notifications buffered per subscriber.
pub const DEFAULT_REFRESH_CAPACITY: usize = 64;

/// Builder for [`IoSynchronizationService`].
pub struct IoSynchronizationServiceBuilder {
    pub(crate) delay_between_checks: Duration,
    pub(crate) delay_after_write_operations: Duration,
    pub(crate) resolver: Arc<dyn ObservedFileResolver>,
    pub(crate) process_query: Arc<dyn ProcessLockQuery>,
    pub(crate) registry: ScopeRegistry,
    pub(crate) refresh_capacity: usize,
}

impl IoSynchronizationServiceBuilder {
    pub fn new() -> Self {
        Self {
            delay_between_checks: DEFAULT_DELAY_BETWEEN_CHECKS,
            delay_after_write_operations: DEFAULT_DELAY_AFTER_WRITE_OPERATIONS,
            resolver: Arc::new(SeparateSyncFile::new()),
            process_query: default_process_lock_query(),
            registry: ScopeRegistry::new(),
            refresh_capacity: DEFAULT_REFRESH_CAPACITY,
        }
    }

    pub fn delay_between_checks(mut self, delay: Duration) -> Self {
        self.delay_between_checks = delay;
        self
    }

    pub fn delay_after_write_operations(mut self, delay: Duration) -> Self {
        self.delay_after_write_operations = delay;
        self
    }

    /// Sets how observed paths map to their markers.
    ///
    /// Defaults to [`SeparateSyncFile`].
    pub fn observed_file_resolver(mut self, resolver: impl ObservedFileResolver + 'static) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    /// Sets the query used to name marker holders in log output.
    pub fn process_lock_query(mut self, query: Arc<dyn ProcessLockQuery>) -> Self {
        self.process_query = query;
        self
    }

    /// Shares a scope registry with other services.
    ///
    /// Services sharing a registry share marker handles, so nested calls
    /// through different services do not block each other.
    pub fn scope_registry(mut self, registry: ScopeRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn refresh_capacity(mut self, capacity: usize) -> Self {
        self.refresh_capacity = capacity;
        self
    }

    /// Builds the service.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidConfiguration`] when the refresh capacity
    /// is zero.
    pub fn build(self) -> SyncResult<IoSynchronizationService> {
        if self.refresh_capacity == 0 {
            return Err(SyncError::InvalidConfiguration(
                "refresh capacity must be greater than zero".to_string(),
            ));
        }

        Ok(IoSynchronizationService::from_builder(self))
    }
}

impl Default for IoSynchronizationServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}
