//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use iosync::{IoSynchronizationService, ProcessLockQuery, ScopeRegistry};

/// Process query that records every path it was asked about.
#[derive(Default)]
pub struct RecordingProcessQuery {
    holders: Vec<String>,
    queried: Mutex<Vec<PathBuf>>,
}

impl RecordingProcessQuery {
    pub fn reporting(holders: &[&str]) -> Self {
        Self {
            holders: holders.iter().map(|holder| holder.to_string()).collect(),
            queried: Mutex::new(Vec::new()),
        }
    }

    pub fn queried(&self) -> Vec<PathBuf> {
        self.queried.lock().unwrap().clone()
    }
}

impl ProcessLockQuery for RecordingProcessQuery {
    fn processes_locking(&self, path: &Path) -> Vec<String> {
        self.queried.lock().unwrap().push(path.to_path_buf());
        self.holders.clone()
    }
}

/// Service with short delays and its own scope registry, so two services in
/// one test behave like two processes.
pub fn fast_service() -> IoSynchronizationService {
    IoSynchronizationService::builder()
        .delay_between_checks(Duration::from_millis(10))
        .delay_after_write_operations(Duration::from_millis(10))
        .scope_registry(ScopeRegistry::new())
        .build()
        .unwrap()
}

/// Names of the entries in `directory`, sorted.
pub fn file_names(directory: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(directory)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
