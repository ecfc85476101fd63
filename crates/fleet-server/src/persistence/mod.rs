//! Snapshot persistence.
//!
//! The orchestrator keeps its registries in memory; this layer writes a
//! periodic [`Snapshot`] to a rotating JSON file or a SQLite table and
//! reads the newest one back at startup.

pub mod db;
pub mod file;

pub use db::{init_database, Database};
pub use file::FileStore;

use crate::config::{Config, SnapshotBackend};
use anyhow::Result;
use fleet_core::Snapshot;

pub enum SnapshotStore {
    File(FileStore),
    Sqlite(Database),
}

impl SnapshotStore {
    /// Open the configured backend. `None` when snapshots are disabled.
    pub async fn open(config: &Config) -> Result<Option<Self>> {
        let store = match config.snapshot_backend {
            SnapshotBackend::Disabled => return Ok(None),
            SnapshotBackend::File => Self::File(FileStore::new(&config.snapshot_path, config.max_snapshot_files)),
            SnapshotBackend::Sqlite => Self::Sqlite(
                init_database(
                    &config.snapshot_path.to_string_lossy(),
                    config.database_max_connections,
                    config.max_snapshot_files,
                )
                .await?,
            ),
        };
        Ok(Some(store))
    }

    pub async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        match self {
            Self::File(store) => store.save(snapshot).await,
            Self::Sqlite(db) => db.save_snapshot(snapshot).await,
        }
    }

    pub async fn load(&self) -> Result<Option<Snapshot>> {
        match self {
            Self::File(store) => store.load().await,
            Self::Sqlite(db) => db.latest_snapshot().await,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::File(store) => format!("file {}", store.path().display()),
            Self::Sqlite(_) => "sqlite".to_string(),
        }
    }
}
