//! Callback-queueing read/write scheduler.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, error, instrument, warn};

use iosync_core::direction::Direction;
use iosync_core::error::{BoxError, SyncError, SyncResult, is_transient};
use iosync_core::traits::{ObservedFileResolver, ProcessLockQuery};
use iosync_file::{FileLockScope, ScopeGuard, ScopeRegistry};

use crate::builder::IoSynchronizationServiceBuilder;
use crate::pending::{Callback, PendingCallbacks};
use crate::resolver::base_path;
use crate::watcher::{ChangeKind, MarkerChange, MarkerWatcher, same_marker};

/// Published when a watched marker changed and no read of the observed path
/// was in progress in this process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshRequired {
    /// Observed path whose marker changed.
    pub path: PathBuf,
}

/// Coordinates reads and writes of observed paths through sync markers.
///
/// Callbacks are queued per path and direction and retried every
/// [`delay_between_checks`](Self::delay_between_checks) until the marker can
/// be locked. Only the most recently queued callback of a path and direction
/// runs; every caller waiting on that path is released when it succeeds.
///
/// Cloning the service shares its state.
///
/// # Example
///
/// ```rust,no_run
/// use iosync_service::IoSynchronizationService;
///
/// # async fn example() -> iosync_core::SyncResult<()> {
/// let service = IoSynchronizationService::new();
///
/// service
///     .execute_writing("/var/data/project", |path| async move {
///         tokio::fs::write(path.join("data.txt"), b"content").await?;
///         Ok::<_, std::io::Error>(true)
///     })
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct IoSynchronizationService {
    inner: Arc<Inner>,
}

struct Inner {
    delays: Mutex<Delays>,
    resolver: Arc<dyn ObservedFileResolver>,
    process_query: Arc<dyn ProcessLockQuery>,
    registry: ScopeRegistry,
    /// Serializes install/take/requeue decisions. Never held across a
    /// callback or a sleep.
    bookkeeping: tokio::sync::Mutex<()>,
    reads: PendingCallbacks,
    writes: PendingCallbacks,
    /// Markers with a read callback running, counted per marker.
    reads_in_flight: Mutex<HashMap<PathBuf, usize>>,
    base_paths: Mutex<HashMap<PathBuf, PathBuf>>,
    sync_files: Mutex<HashMap<PathBuf, PathBuf>>,
    watchers: Mutex<HashMap<PathBuf, MarkerWatcher>>,
    refresh: broadcast::Sender<RefreshRequired>,
}

#[derive(Clone, Copy)]
struct Delays {
    between_checks: Duration,
    after_write: Duration,
}

impl IoSynchronizationService {
    /// Creates a service with default configuration.
    pub fn new() -> Self {
        Self::from_builder(IoSynchronizationServiceBuilder::new())
    }

    /// Returns a new builder for configuring the service.
    pub fn builder() -> IoSynchronizationServiceBuilder {
        IoSynchronizationServiceBuilder::new()
    }

    pub(crate) fn from_builder(builder: IoSynchronizationServiceBuilder) -> Self {
        let (refresh, _) = broadcast::channel(builder.refresh_capacity);
        Self {
            inner: Arc::new(Inner {
                delays: Mutex::new(Delays {
                    between_checks: builder.delay_between_checks,
                    after_write: builder.delay_after_write_operations,
                }),
                resolver: builder.resolver,
                process_query: builder.process_query,
                registry: builder.registry,
                bookkeeping: tokio::sync::Mutex::new(()),
                reads: PendingCallbacks::default(),
                writes: PendingCallbacks::default(),
                reads_in_flight: Mutex::new(HashMap::new()),
                base_paths: Mutex::new(HashMap::new()),
                sync_files: Mutex::new(HashMap::new()),
                watchers: Mutex::new(HashMap::new()),
                refresh,
            }),
        }
    }

    pub fn delay_between_checks(&self) -> Duration {
        self.inner.delays().between_checks
    }

    pub fn set_delay_between_checks(&self, delay: Duration) {
        lock(&self.inner.delays).between_checks = delay;
    }

    pub fn delay_after_write_operations(&self) -> Duration {
        self.inner.delays().after_write
    }

    pub fn set_delay_after_write_operations(&self, delay: Duration) {
        lock(&self.inner.delays).after_write = delay;
    }

    /// Registry holding this service's lock scopes.
    pub fn scope_registry(&self) -> &ScopeRegistry {
        &self.inner.registry
    }

    /// Subscribes to [`RefreshRequired`] notifications of watched paths.
    pub fn subscribe_refresh(&self) -> broadcast::Receiver<RefreshRequired> {
        self.inner.refresh.subscribe()
    }

    /// Marker guarding `path`. Resolved once per path and cached until
    /// [`stop_watching`](Self::stop_watching).
    pub fn sync_file_for(&self, path: impl AsRef<Path>) -> PathBuf {
        self.inner.sync_file_for(&observed_key(path.as_ref()))
    }

    /// Takes the read scope of `path` and attempts to lock it once.
    ///
    /// Contention does not fail the call; check
    /// [`ScopeGuard::is_locked`]. The scope stays registered until the guard
    /// is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::LockScope`] when the marker cannot be opened for a
    /// reason other than contention.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn acquire_read_lock(&self, path: impl AsRef<Path>) -> SyncResult<ScopeGuard> {
        let guard = self.inner.acquire_scope(Direction::Read, &observed_key(path.as_ref()));
        guard.scope().lock()?;
        Ok(guard)
    }

    /// Takes the write scope of `path` and attempts to lock it once.
    ///
    /// With `notify_on_release` the marker is touched right before it is
    /// released so that watchers in other processes notice the write.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::LockScope`] when the marker cannot be opened for a
    /// reason other than contention.
    #[instrument(skip_all, fields(path = %path.as_ref().display(), notify_on_release = notify_on_release))]
    pub fn acquire_write_lock(
        &self,
        path: impl AsRef<Path>,
        notify_on_release: bool,
    ) -> SyncResult<ScopeGuard> {
        let guard = self.inner.acquire_scope(Direction::Write, &observed_key(path.as_ref()));
        guard.scope().set_notify_on_release(notify_on_release);
        guard.scope().lock()?;
        Ok(guard)
    }

    /// Runs `read` once the read marker of `path` is held.
    ///
    /// The callback returns `Ok(true)` when done and `Ok(false)` to be tried
    /// again later. An [`std::io::Error`] that is a sharing violation is
    /// retried as well; any other error ends the call with
    /// [`SyncError::Callback`].
    pub async fn execute_reading<F, Fut, E>(&self, path: impl AsRef<Path>, read: F) -> SyncResult<()>
    where
        F: Fn(PathBuf) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        self.inner
            .execute(Direction::Read, &observed_key(path.as_ref()), erase(read))
            .await
    }

    /// Runs `write` once the write marker of `path` is held.
    ///
    /// After a successful write the service waits
    /// [`delay_after_write_operations`](Self::delay_after_write_operations)
    /// and touches the marker to announce the change.
    pub async fn execute_writing<F, Fut, E>(&self, path: impl AsRef<Path>, write: F) -> SyncResult<()>
    where
        F: Fn(PathBuf) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        self.inner
            .execute(Direction::Write, &observed_key(path.as_ref()), erase(write))
            .await
    }

    /// Starts watching the marker of `path` for changes made by other
    /// processes. Watching an already watched path does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Watch`] when the marker directory cannot be
    /// watched.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn start_watching(&self, path: impl AsRef<Path>) -> SyncResult<()> {
        let path = observed_key(path.as_ref());
        let path = path.as_path();
        let mut watchers = lock(&self.inner.watchers);
        if watchers.contains_key(path) {
            return Ok(());
        }

        debug!("Start watching path");
        let sync_file = self.inner.sync_file_for(path);
        let inner = Arc::downgrade(&self.inner);
        let watcher = MarkerWatcher::spawn(&sync_file, move |change| {
            let inner = inner.clone();
            async move {
                if let Some(inner) = inner.upgrade() {
                    inner.handle_change(change).await;
                }
            }
            .boxed()
        })?;

        watchers.insert(path.to_path_buf(), watcher);
        Ok(())
    }

    /// Stops watching `path` and forgets its cached base path and marker.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn stop_watching(&self, path: impl AsRef<Path>) {
        let path = observed_key(path.as_ref());
        let path = path.as_path();
        lock(&self.inner.base_paths).remove(path);
        lock(&self.inner.sync_files).remove(path);

        if lock(&self.inner.watchers).remove(path).is_some() {
            debug!("Stop watching path");
        }
    }

    pub fn is_watching(&self, path: impl AsRef<Path>) -> bool {
        lock(&self.inner.watchers).contains_key(&observed_key(path.as_ref()))
    }
}

impl Default for IoSynchronizationService {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn delays(&self) -> Delays {
        *lock(&self.delays)
    }

    fn pending(&self, direction: Direction) -> &PendingCallbacks {
        match direction {
            Direction::Read => &self.reads,
            Direction::Write => &self.writes,
        }
    }

    fn base_path_for(&self, path: &Path) -> PathBuf {
        if let Some(base) = lock(&self.base_paths).get(path) {
            return base.clone();
        }

        let base = base_path(path);
        lock(&self.base_paths).insert(path.to_path_buf(), base.clone());
        base
    }

    fn sync_file_for(&self, path: &Path) -> PathBuf {
        if let Some(sync_file) = lock(&self.sync_files).get(path) {
            return sync_file.clone();
        }

        let base = self.base_path_for(path);
        let sync_file = self.resolver.resolve(path, &base);
        lock(&self.sync_files).insert(path.to_path_buf(), sync_file.clone());
        sync_file
    }

    /// Observed paths whose cached marker is `sync_file`.
    fn paths_by_sync_file(&self, sync_file: &Path) -> Vec<PathBuf> {
        lock(&self.sync_files)
            .iter()
            .filter(|(_, cached)| same_marker(cached, sync_file))
            .map(|(path, _)| path.clone())
            .collect()
    }

    fn acquire_scope(&self, direction: Direction, path: &Path) -> ScopeGuard {
        let sync_file = self.sync_file_for(path);
        self.registry.acquire(&scope_name(path, direction), || {
            if sync_file == path {
                FileLockScope::dummy()
            } else {
                FileLockScope::new(direction.is_read(), &sync_file)
                    .with_process_query(Arc::clone(&self.process_query))
            }
        })
    }

    /// Queues `callback` and waits until a cycle containing it succeeded or
    /// failed.
    #[instrument(skip_all, fields(path = %path.display(), %direction))]
    async fn execute(&self, direction: Direction, path: &Path, callback: Callback) -> SyncResult<()> {
        let _scope = self.acquire_scope(direction, path);
        let pending = self.pending(direction);
        let (waiter, mut outcome) = oneshot::channel();

        let mut driver = {
            let _bookkeeping = self.bookkeeping.lock().await;
            pending
                .install(path, callback, waiter)
                .then(|| pending.drive(path))
        };

        loop {
            if driver.is_none() && !pending.has_driver(path) {
                debug!("No caller is driving pending {direction}, taking over");
                driver = Some(pending.drive(path));
            }

            if driver.is_some() {
                self.execute_if_possible(direction, path).await;
            }

            tokio::select! {
                biased;
                result = &mut outcome => {
                    let result = result.unwrap_or_else(|_| {
                        Err(SyncError::Abandoned {
                            path: path.to_path_buf(),
                            direction,
                        })
                    });
                    if let Err(error) = &result {
                        warn!(%error, "Failed to execute {direction} task");
                    }
                    return result;
                }
                () = tokio::time::sleep(self.delays().between_checks) => {}
            }
        }
    }

    /// Runs the pending callback of `path` if its marker can be locked now.
    async fn execute_if_possible(&self, direction: Direction, path: &Path) {
        let pending = self.pending(direction);
        let taken = {
            let _bookkeeping = self.bookkeeping.lock().await;
            pending.take(path)
        };
        let Some(taken) = taken else {
            return;
        };
        let Some(callback) = taken.callback() else {
            return;
        };

        let sync_file = self.sync_file_for(path);
        let in_flight = if direction.is_read() {
            if path == sync_file && self.is_read_in_flight(&sync_file) {
                debug!(sync_file = %sync_file.display(), "Synchronization file is already being read");
                taken.complete(Ok(()));
                return;
            }
            Some(ReadInFlight::enter(&self.reads_in_flight, &sync_file))
        } else {
            None
        };

        let executed = self.run(direction, path, callback).await;
        drop(in_flight);

        match executed {
            Ok(true) => taken.complete(Ok(())),
            Ok(false) => {
                let _bookkeeping = self.bookkeeping.lock().await;
                taken.requeue();
            }
            Err(error) => taken.complete(Err(error)),
        }
    }

    /// Locks the scope and runs `callback`.
    ///
    /// `Ok(false)` means the attempt did not happen or asked to be repeated.
    async fn run(&self, direction: Direction, path: &Path, callback: Callback) -> SyncResult<bool> {
        let scope = self.acquire_scope(direction, path);
        if !scope.scope().lock()? {
            return Ok(false);
        }

        debug!("Executing {direction} actions");
        match callback(path.to_path_buf()).await {
            Ok(true) => {
                if direction == Direction::Write {
                    let delay = self.delays().after_write;
                    debug!(?delay, "Succeeded to execute write actions");
                    tokio::time::sleep(delay).await;
                    scope.scope().write_dummy_content();
                } else {
                    debug!("Succeeded to execute read actions");
                }
                Ok(true)
            }
            Ok(false) => {
                debug!("Failed to execute {direction} actions, will retry");
                Ok(false)
            }
            Err(error) if is_transient(&error) => {
                warn!(%error, "{direction} failed, adding enqueued action back in the queue");
                Ok(false)
            }
            Err(error) => {
                error!(%error, "Fatal error in executing {direction}");
                Err(SyncError::callback(path, direction, error))
            }
        }
    }

    /// Reacts to a change of a watched marker.
    #[instrument(skip_all, fields(sync_file = %change.path.display(), kind = ?change.kind))]
    async fn handle_change(&self, change: MarkerChange) {
        debug!("Received file watcher event");

        for path in self.paths_by_sync_file(&change.path) {
            let reading = self
                .registry
                .contains(&scope_name(&path, Direction::Read));

            if self.writes.contains(&path) {
                self.execute_if_possible(Direction::Write, &path).await;
            }

            if change.kind != ChangeKind::Changed {
                continue;
            }

            if self.reads.contains(&path) {
                self.execute_if_possible(Direction::Read, &path).await;
            }

            if !reading {
                debug!(path = %path.display(), "Refresh required");
                let _ = self.refresh.send(RefreshRequired { path });
            }
        }
    }

    fn is_read_in_flight(&self, sync_file: &Path) -> bool {
        lock(&self.reads_in_flight).contains_key(sync_file)
    }
}

/// Marks a marker as being read until dropped.
struct ReadInFlight<'a> {
    counts: &'a Mutex<HashMap<PathBuf, usize>>,
    sync_file: PathBuf,
}

impl<'a> ReadInFlight<'a> {
    fn enter(counts: &'a Mutex<HashMap<PathBuf, usize>>, sync_file: &Path) -> Self {
        *lock(counts).entry(sync_file.to_path_buf()).or_insert(0) += 1;
        Self {
            counts,
            sync_file: sync_file.to_path_buf(),
        }
    }
}

impl Drop for ReadInFlight<'_> {
    fn drop(&mut self) {
        let mut counts = lock(self.counts);
        if let Some(count) = counts.get_mut(&self.sync_file) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                counts.remove(&self.sync_file);
            }
        }
    }
}

/// One spelling per observed path: `a/b/`, `a/./b` and `a/b` share their
/// pending callbacks, cached marker and lock scopes.
fn observed_key(path: &Path) -> PathBuf {
    path.components().collect()
}

/// Registry key of the scope for `path` in `direction`.
fn scope_name(path: &Path, direction: Direction) -> String {
    format!("{}_{}", path.display(), direction.scope_suffix())
}

fn erase<F, Fut, E>(callback: F) -> Callback
where
    F: Fn(PathBuf) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<bool, E>> + Send + 'static,
    E: Into<BoxError>,
{
    Arc::new(move |path| {
        let future = callback(path);
        async move { future.await.map_err(Into::<BoxError>::into) }.boxed()
    })
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
