//! SQLite snapshot storage.

use anyhow::{Context, Result};
use fleet_core::Snapshot;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::{info, warn};

/// Database connection wrapper.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    keep: usize,
}

impl Database {
    /// Get the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert a snapshot and drop all but the newest `keep` rows.
    pub async fn save_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        let body = snapshot.to_json()?;
        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT INTO snapshots (taken_at, vehicles, tasks, body) VALUES (?1, ?2, ?3, ?4)")
            .bind(snapshot.taken_at.to_rfc3339())
            .bind(snapshot.vehicles.len() as i64)
            .bind(snapshot.tasks.len() as i64)
            .bind(&body)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM snapshots WHERE id NOT IN (SELECT id FROM snapshots ORDER BY id DESC LIMIT ?1)")
            .bind(self.keep.max(1) as i64)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Newest stored snapshot, if any.
    pub async fn latest_snapshot(&self) -> Result<Option<Snapshot>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT body FROM snapshots ORDER BY id DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some((body,)) => Ok(Some(Snapshot::from_json(&body).context("decoding stored snapshot")?)),
            None => Ok(None),
        }
    }

    pub async fn snapshot_count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM snapshots")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

/// Initialize the SQLite database.
///
/// Creates the database file if it doesn't exist, runs migrations,
/// and returns a connection pool.
pub async fn init_database(db_path: &str, max_connections: u32, keep: usize) -> Result<Database> {
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db_url = format!("sqlite:{}?mode=rwc", db_path);
    info!("Connecting to database: {}", db_path);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect(&db_url)
        .await?;

    run_migrations(&pool).await?;

    Ok(Database { pool, keep })
}

async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let migration_sql = include_str!("../../migrations/001_init.sql");

    info!("Running database migrations...");

    for statement in migration_sql.split(';') {
        let statement: String = statement
            .lines()
            .filter(|line| !line.trim().starts_with("--"))
            .collect::<Vec<_>>()
            .join("\n");
        let statement = statement.trim();
        if statement.is_empty() {
            continue;
        }

        if let Err(e) = sqlx::query(statement).execute(pool).await {
            if e.to_string().contains("already exists") {
                continue;
            }
            if statement.to_uppercase().starts_with("CREATE") {
                anyhow::bail!("Migration failed on CREATE statement: {}", e);
            }
            warn!("Migration statement failed: {}", e);
        }
    }

    info!("Database migrations complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn test_init_database() {
        let db = init_database(":memory:", 1, 3).await.unwrap();

        let result: (i32,) =
            sqlx::query_as("SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='snapshots'")
                .fetch_one(db.pool())
                .await
                .unwrap();

        assert_eq!(result.0, 1);
        assert!(db.latest_snapshot().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn keeps_only_newest_rows() {
        let db = init_database(":memory:", 1, 2).await.unwrap();
        let base = Utc::now();
        for minutes in 0..4 {
            db.save_snapshot(&Snapshot::empty(base + Duration::minutes(minutes)))
                .await
                .unwrap();
        }

        assert_eq!(db.snapshot_count().await.unwrap(), 2);
        let latest = db.latest_snapshot().await.unwrap().unwrap();
        assert_eq!(latest.taken_at, base + Duration::minutes(3));
    }
}
