//! Cross-process coordination of reads and writes over shared filesystem
//! paths.
//!
//! Every observed resource (a file, or a directory holding a "project") is
//! guarded by an auxiliary sync marker such as `__ofs.sync`. Holding the
//! marker open exclusively is holding the right to touch the resource. Many
//! callers in one process queue their reads and writes; the service retries
//! them until the marker is free and watches the marker for changes made by
//! other processes.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use iosync::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = IoSynchronizationService::builder()
//!         .delay_between_checks(std::time::Duration::from_millis(25))
//!         .build()?;
//!
//!     let mut refresh = service.subscribe_refresh();
//!     service.start_watching("/var/data/project").await?;
//!
//!     service
//!         .execute_writing("/var/data/project", |project| async move {
//!             tokio::fs::write(project.join("data.txt"), b"content").await?;
//!             Ok::<_, std::io::Error>(true)
//!         })
//!         .await?;
//!
//!     // Another process wrote to the project.
//!     let RefreshRequired { path } = refresh.recv().await?;
//!     println!("reload {}", path.display());
//!
//!     Ok(())
//! }
//! ```
//!
//! # Markers
//!
//! Marker names follow `__ofs[_r|_w][#<id>].sync`; see
//! [`SyncFileNameService`]. A [`FileLockScope`] owns one marker: write
//! markers stay on disk after release, read markers are deleted.
//!
//! # Crate Organization
//!
//! This is a meta-crate that re-exports types from:
//! - `iosync-core`: errors, seams and shared types
//! - `iosync-file`: marker naming, lock scopes and the multi-file locker
//! - `iosync-service`: the read/write scheduler
//!
//! For fine-grained control, you can depend on individual crates instead.

// Re-export core types and traits
pub use iosync_core::*;

// Re-export marker primitives
pub use iosync_file::*;

// Re-export the scheduler
pub use iosync_service::*;
