//! Reload the world file when it changes on disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use tokio::fs;
use tokio::sync::broadcast;
use tokio::time::interval;

use fleet_core::WorldData;

use crate::backoff::Backoff;
use crate::state::Orchestrator;

const RELOAD_BACKOFF_BASE_SECS: u64 = 5;
const RELOAD_BACKOFF_MAX_SECS: u64 = 300;

/// Read and parse a world JSON document.
pub async fn load_world_file(path: &Path) -> Result<WorldData> {
    let raw = fs::read_to_string(path)
        .await
        .with_context(|| format!("reading world file {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing world file {}", path.display()))
}

async fn modified_at(path: &Path) -> Result<SystemTime> {
    let metadata = fs::metadata(path)
        .await
        .with_context(|| format!("stat {}", path.display()))?;
    Ok(metadata.modified()?)
}

pub async fn run_world_sync_loop(state: Arc<Orchestrator>, path: PathBuf, mut shutdown: broadcast::Receiver<()>) {
    let mut ticker = interval(state.config().world_refresh_interval);
    let mut backoff = Backoff::new(
        Duration::from_secs(RELOAD_BACKOFF_BASE_SECS),
        Duration::from_secs(RELOAD_BACKOFF_MAX_SECS),
    );
    let mut last_seen = modified_at(&path).await.ok();

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("World sync loop shutting down");
                break;
            }
            _ = ticker.tick() => {
                if !backoff.ready() {
                    continue;
                }
                match reload_if_changed(&state, &path, last_seen).await {
                    Ok(seen) => {
                        last_seen = seen;
                        backoff.reset();
                    }
                    Err(err) => {
                        let delay = backoff.fail();
                        tracing::warn!("World reload failed: {:#} (next attempt in {:?})", err, delay);
                    }
                }
            }
        }
    }
}

/// Swap in the file's contents when its modification time moved.
async fn reload_if_changed(
    state: &Orchestrator,
    path: &Path,
    last_seen: Option<SystemTime>,
) -> Result<Option<SystemTime>> {
    let modified = modified_at(path).await?;
    if last_seen == Some(modified) {
        return Ok(last_seen);
    }
    let data = load_world_file(path).await?;
    state.replace_world(data)?;
    Ok(Some(modified))
}
