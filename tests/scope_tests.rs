//! Integration tests for lock scopes over real marker files.

mod common;

use std::fs::OpenOptions;
use std::sync::Arc;

use common::{RecordingProcessQuery, file_names};
use iosync::{
    FileLockScope, ProcessLockQuery, StringIdProvider, SyncFileNameService, SyncFileNamingContext,
    purge_orphaned_markers,
};

#[test]
fn test_first_lock_creates_exactly_one_file() {
    let dir = tempfile::tempdir().unwrap();
    let scope = FileLockScope::new(false, dir.path().join("__ofs_w.sync"));

    assert!(scope.lock().unwrap());
    assert!(scope.is_locked());
    assert_eq!(file_names(dir.path()), vec!["__ofs_w.sync"]);
}

#[test]
fn test_busy_marker_returns_false_without_new_files() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("__ofs_w.sync");

    // Another process holding the marker.
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&marker)
        .unwrap();
    let mut holder = fd_lock::RwLock::new(file);
    let _held = holder.try_write().unwrap();

    let scope = FileLockScope::new(false, &marker);
    assert!(!scope.lock().unwrap());
    assert!(!scope.is_locked());
    assert_eq!(file_names(dir.path()), vec!["__ofs_w.sync"]);
}

#[test]
fn test_read_unlock_deletes_marker() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("__ofs_r.sync");
    let scope = FileLockScope::new(true, &marker);

    assert!(scope.lock().unwrap());
    assert!(marker.exists());

    scope.unlock();
    assert!(!marker.exists());
    assert!(!scope.is_locked());
}

#[test]
fn test_write_unlock_keeps_marker() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("__ofs.sync");
    let scope = FileLockScope::new(false, &marker);

    assert!(scope.lock().unwrap());
    scope.unlock();

    assert!(marker.exists());
    assert_eq!(std::fs::metadata(&marker).unwrap().len(), 0);
}

#[test]
fn test_notify_on_release_touches_marker() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("__ofs.sync");
    let scope = FileLockScope::new(false, &marker);
    scope.set_notify_on_release(true);

    assert!(scope.lock().unwrap());
    scope.unlock();
    assert_eq!(std::fs::metadata(&marker).unwrap().len(), 1);
}

#[test]
fn test_locking_leaves_marker_contents_alone() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("__ofs.sync");
    std::fs::write(&marker, [0, 0, 0]).unwrap();

    let read = FileLockScope::new(true, &marker);
    assert!(read.lock().unwrap());
    assert_eq!(std::fs::metadata(&marker).unwrap().len(), 3);
    read.unlock();

    std::fs::write(&marker, [0, 0, 0]).unwrap();
    let write = FileLockScope::new(false, &marker);
    assert!(write.lock().unwrap());
    write.unlock();
    assert_eq!(std::fs::metadata(&marker).unwrap().len(), 3);
}

#[test]
fn test_dropping_scope_unlocks() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("__ofs_r.sync");

    {
        let scope = FileLockScope::new(true, &marker);
        assert!(scope.lock().unwrap());
    }

    assert!(!marker.exists());
    let next = FileLockScope::new(true, &marker);
    assert!(next.lock().unwrap());
}

#[test]
fn test_read_marker_released_to_waiting_writer() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("__ofs.sync");
    let reader = FileLockScope::new(true, &marker);
    let writer = FileLockScope::new(false, &marker);

    assert!(reader.lock().unwrap());
    assert!(!writer.lock().unwrap());

    reader.unlock();
    assert!(writer.lock().unwrap());
    assert!(marker.exists());
}

#[test]
fn test_diagnostics_only_on_first_busy_attempt() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("__ofs.sync");
    let holder = FileLockScope::new(false, &marker);
    assert!(holder.lock().unwrap());

    let query = Arc::new(RecordingProcessQuery::reporting(&["editor (42)"]));
    let contender = FileLockScope::new(false, &marker)
        .with_process_query(Arc::clone(&query) as Arc<dyn ProcessLockQuery>);

    assert!(!contender.lock().unwrap());
    assert!(!contender.lock().unwrap());
    assert!(!contender.lock().unwrap());
    assert_eq!(query.queried(), vec![marker.clone()]);

    contender.unlock();
    assert!(!contender.lock().unwrap());
    assert_eq!(query.queried().len(), 2);
}

#[test]
fn test_orphaned_markers_do_not_block_fresh_lock() {
    let dir = tempfile::tempdir().unwrap();
    let orphan = dir.path().join("__ofs_r#ORPHAN01.sync");
    std::fs::write(&orphan, b"").unwrap();

    let held_marker = dir.path().join("__ofs_r#HELD0001.sync");
    let held = FileLockScope::new(true, &held_marker);
    assert!(held.lock().unwrap());

    let names = SyncFileNameService::new(StringIdProvider);
    let context = SyncFileNamingContext::in_directory(dir.path())
        .read_scope(Some(true))
        .with_id(true);
    let scope = FileLockScope::for_context(&context, &names);

    assert!(scope.lock().unwrap());
    assert!(!orphan.exists());
    assert!(held_marker.exists());

    let own = scope.sync_file().unwrap().to_path_buf();
    assert!(own.exists());
    assert_eq!(names.parse(&own), context);
    assert_eq!(file_names(dir.path()).len(), 2);
}

#[test]
fn test_purge_counts_removed_markers() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["__ofs_w#AAAA0001.sync", "__ofs_w#AAAA0002.sync", "__ofs_r#AAAA0003.sync", "data.txt"] {
        std::fs::write(dir.path().join(name), b"").unwrap();
    }

    let removed = purge_orphaned_markers(dir.path(), "__ofs_w*.sync").unwrap();
    assert_eq!(removed, 2);
    assert_eq!(file_names(dir.path()), vec!["__ofs_r#AAAA0003.sync", "data.txt"]);
}
