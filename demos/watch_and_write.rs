//! Two services sharing a project directory, as two processes would.
//!
//! Run with `RUST_LOG=debug cargo run --example watch_and_write` to see the
//! lock lifecycle.

use std::io;
use std::time::Duration;

use iosync::{IoSynchronizationService, ScopeRegistry};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let project = tempfile::tempdir()?;
    let reader = IoSynchronizationService::builder()
        .scope_registry(ScopeRegistry::new())
        .build()?;
    let writer = IoSynchronizationService::builder()
        .scope_registry(ScopeRegistry::new())
        .build()?;

    let mut refresh = reader.subscribe_refresh();
    reader.start_watching(project.path()).await?;

    writer
        .execute_writing(project.path(), |path| async move {
            tokio::fs::write(path.join("model.json"), br#"{"version": 1}"#).await?;
            Ok::<_, io::Error>(true)
        })
        .await?;
    info!("writer finished");

    let event = tokio::time::timeout(Duration::from_secs(5), refresh.recv()).await??;
    info!(path = %event.path.display(), "refresh required");

    reader
        .execute_reading(&event.path, |path| async move {
            let model = tokio::fs::read_to_string(path.join("model.json")).await?;
            info!(%model, "reloaded project");
            Ok::<_, io::Error>(true)
        })
        .await?;

    reader.stop_watching(project.path());
    Ok(())
}
