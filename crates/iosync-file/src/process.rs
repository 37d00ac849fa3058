//! Best-effort "who holds this file" diagnostics.

use std::path::Path;
use std::sync::Arc;

use iosync_core::traits::ProcessLockQuery;

/// Query that never knows anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProcessLockQuery;

impl ProcessLockQuery for NoProcessLockQuery {
    fn processes_locking(&self, _path: &Path) -> Vec<String> {
        Vec::new()
    }
}

/// Scans `/proc/<pid>/fd` for descriptors pointing at the path.
///
/// Processes owned by other users are usually unreadable and silently
/// skipped.
#[cfg(target_os = "linux")]
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcFsLockQuery;

#[cfg(target_os = "linux")]
impl ProcessLockQuery for ProcFsLockQuery {
    fn processes_locking(&self, path: &Path) -> Vec<String> {
        let target = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());

        let Ok(entries) = std::fs::read_dir("/proc") else {
            return Vec::new();
        };

        let mut processes = Vec::new();
        for entry in entries.flatten() {
            let file_name = entry.file_name();
            let Some(pid) = file_name.to_str().filter(|pid| pid.bytes().all(|b| b.is_ascii_digit()))
            else {
                continue;
            };

            if holds_open(&entry.path(), &target) {
                let command = std::fs::read_to_string(entry.path().join("comm"))
                    .map(|comm| comm.trim().to_string())
                    .unwrap_or_else(|_| "unknown".to_string());
                processes.push(format!("{command} ({pid})"));
            }
        }

        processes
    }
}

#[cfg(target_os = "linux")]
fn holds_open(process_dir: &Path, target: &Path) -> bool {
    let Ok(descriptors) = std::fs::read_dir(process_dir.join("fd")) else {
        return false;
    };

    descriptors
        .flatten()
        .filter_map(|descriptor| std::fs::read_link(descriptor.path()).ok())
        .any(|link| link == target)
}

/// Returns the best query available on this platform.
pub fn default_process_lock_query() -> Arc<dyn ProcessLockQuery> {
    #[cfg(target_os = "linux")]
    {
        Arc::new(ProcFsLockQuery)
    }

    #[cfg(not(target_os = "linux"))]
    {
        Arc::new(NoProcessLockQuery)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_query_is_empty() {
        assert!(NoProcessLockQuery.processes_locking(Path::new("/tmp")).is_empty());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_procfs_finds_own_process() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("held.sync");
        let _file = std::fs::File::create(&path).unwrap();

        let processes = ProcFsLockQuery.processes_locking(&path);
        let own_pid = format!("({})", std::process::id());
        assert!(processes.iter().any(|p| p.ends_with(&own_pid)), "{processes:?}");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_procfs_unheld_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("free.sync");
        std::fs::write(&path, b"").unwrap();

        assert!(ProcFsLockQuery.processes_locking(&path).is_empty());
    }
}
