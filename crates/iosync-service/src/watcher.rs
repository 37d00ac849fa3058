//! Filesystem notifications for one sync marker.
//!
//! `notify` delivers events on its own thread. They are filtered down to the
//! marker file and forwarded over a channel to a tokio task that hands them
//! to the service.

use std::path::{Path, PathBuf};

use futures::future::BoxFuture;
use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use iosync_core::error::{SyncError, SyncResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChangeKind {
    Created,
    Changed,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MarkerChange {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

/// Live watch on a marker.
///
/// Dropping it closes the event channel; the forwarding task finishes the
/// event in hand and exits.
pub(crate) struct MarkerWatcher {
    _watcher: RecommendedWatcher,
}

impl MarkerWatcher {
    /// Watches the directory of `sync_file` and calls `on_change` for every
    /// event concerning the marker, one at a time.
    pub(crate) fn spawn<F>(sync_file: &Path, on_change: F) -> SyncResult<Self>
    where
        F: Fn(MarkerChange) -> BoxFuture<'static, ()> + Send + 'static,
    {
        let directory = match sync_file.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let file_name = sync_file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let (tx, mut rx) = mpsc::unbounded_channel::<MarkerChange>();
        let mut watcher = RecommendedWatcher::new(
            move |result: notify::Result<Event>| match result {
                Ok(event) => {
                    for change in marker_changes(&event, &file_name) {
                        let _ = tx.send(change);
                    }
                }
                Err(error) => warn!(%error, "File watcher reported an error"),
            },
            Config::default(),
        )
        .map_err(|error| SyncError::watch(&directory, error))?;

        watcher
            .watch(&directory, RecursiveMode::NonRecursive)
            .map_err(|error| SyncError::watch(&directory, error))?;
        debug!(directory = %directory.display(), sync_file = %sync_file.display(), "Watching synchronization file");

        tokio::spawn(async move {
            while let Some(change) = rx.recv().await {
                on_change(change).await;
            }
        });

        Ok(Self { _watcher: watcher })
    }
}

/// Events of `event` that concern the file called `file_name`.
fn marker_changes(event: &Event, file_name: &str) -> Vec<MarkerChange> {
    let Some(kind) = change_kind(&event.kind) else {
        return Vec::new();
    };

    event
        .paths
        .iter()
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.eq_ignore_ascii_case(file_name))
        })
        .map(|path| MarkerChange {
            path: path.clone(),
            kind,
        })
        .collect()
}

fn change_kind(kind: &EventKind) -> Option<ChangeKind> {
    match kind {
        EventKind::Create(_) => Some(ChangeKind::Created),
        EventKind::Remove(_) => Some(ChangeKind::Deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => Some(ChangeKind::Created),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Some(ChangeKind::Deleted),
        EventKind::Modify(ModifyKind::Name(_)) => None,
        EventKind::Modify(_) => Some(ChangeKind::Changed),
        _ => None,
    }
}

/// Whether two paths name the same marker, ignoring ASCII case of the file
/// name and differences in how the directory was spelled.
pub(crate) fn same_marker(left: &Path, right: &Path) -> bool {
    if left == right {
        return true;
    }

    let names_match = match (left.file_name(), right.file_name()) {
        (Some(left), Some(right)) => left.to_string_lossy().eq_ignore_ascii_case(&right.to_string_lossy()),
        _ => false,
    };
    if !names_match {
        return false;
    }

    match (left.parent(), right.parent()) {
        (Some(left), Some(right)) => canonical_dir(left) == canonical_dir(right),
        _ => false,
    }
}

fn canonical_dir(directory: &Path) -> PathBuf {
    let directory = if directory.as_os_str().is_empty() {
        Path::new(".")
    } else {
        directory
    };
    directory
        .canonicalize()
        .unwrap_or_else(|_| directory.to_path_buf())
}

#[cfg(test)]
mod tests {
    use notify::event::{CreateKind, DataChange, RemoveKind};

    use super::*;

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        paths
            .iter()
            .fold(Event::new(kind), |event, path| event.add_path(PathBuf::from(path)))
    }

    #[test]
    fn test_events_are_filtered_to_marker() {
        let changes = marker_changes(
            &event(
                EventKind::Modify(ModifyKind::Data(DataChange::Any)),
                &["/data/__OFS.SYNC", "/data/other.txt"],
            ),
            "__ofs.sync",
        );
        assert_eq!(
            changes,
            vec![MarkerChange {
                path: PathBuf::from("/data/__OFS.SYNC"),
                kind: ChangeKind::Changed,
            }]
        );
    }

    #[test]
    fn test_change_kinds() {
        let created = marker_changes(&event(EventKind::Create(CreateKind::File), &["/d/__ofs.sync"]), "__ofs.sync");
        assert_eq!(created[0].kind, ChangeKind::Created);

        let deleted = marker_changes(&event(EventKind::Remove(RemoveKind::File), &["/d/__ofs.sync"]), "__ofs.sync");
        assert_eq!(deleted[0].kind, ChangeKind::Deleted);

        let accessed = marker_changes(
            &event(EventKind::Access(notify::event::AccessKind::Any), &["/d/__ofs.sync"]),
            "__ofs.sync",
        );
        assert!(accessed.is_empty());
    }

    #[test]
    fn test_same_marker() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("__ofs.sync");
        let spelled = dir.path().join(".").join("__OFS.sync");

        assert!(same_marker(&marker, &marker));
        assert!(same_marker(&marker, &spelled));
        assert!(!same_marker(&marker, &dir.path().join("__ofs_r.sync")));
    }
}
