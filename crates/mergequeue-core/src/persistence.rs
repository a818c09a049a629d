//! Durable storage for trains (spec §4.4).
//!
//! Each train is persisted as a single JSON document keyed by
//! `(installation_owner_id, repo_id, target_ref)`. The document holds the
//! full queue state, so a save/load round-trip recovers a train exactly —
//! there is no normalized schema for cars or embarked pulls to keep in sync.

use crate::error::{Error, Result};
use crate::train::Train;
use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::time::Duration;

/// Connection tuning for the train store (grounded on `DatabaseConfig`).
pub struct PersistenceConfig {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            max_connections: 5,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

/// Storage contract the engine depends on; lets tests swap in an in-memory
/// fake without touching SQLite (spec §4.4).
#[async_trait]
pub trait PersistenceAdapter: Send + Sync {
    async fn load(&self, repo_id: i64, target_ref: &str) -> Result<Option<Train>>;
    async fn save(&self, train: &Train) -> Result<()>;
    async fn delete(&self, repo_id: i64, target_ref: &str) -> Result<()>;
    /// All trains for an installation, needed by cross-train operations and
    /// the refresh orchestrator (spec §4.5).
    async fn list_for_installation(&self, installation_owner_id: i64) -> Result<Vec<Train>>;
}

#[derive(Clone)]
pub struct SqlitePersistence {
    pool: SqlitePool,
}

impl SqlitePersistence {
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_config(path, PersistenceConfig::default()).await
    }

    pub async fn with_config(path: impl AsRef<Path>, config: PersistenceConfig) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::Other(e.to_string()))?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&url)
            .await?;

        sqlx::query("PRAGMA journal_mode=WAL").execute(&pool).await?;
        sqlx::query("PRAGMA busy_timeout=5000").execute(&pool).await?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(include_str!("../../../migrations/001_merge_trains.sql"))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl PersistenceAdapter for SqlitePersistence {
    async fn load(&self, repo_id: i64, target_ref: &str) -> Result<Option<Train>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT document FROM merge_trains WHERE repo_id = ? AND target_ref = ?",
        )
        .bind(repo_id)
        .bind(target_ref)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(doc,)| serde_json::from_str(&doc).map_err(Error::from))
            .transpose()
    }

    async fn save(&self, train: &Train) -> Result<()> {
        let document = serde_json::to_string(train)?;
        sqlx::query(
            r#"
            INSERT INTO merge_trains (installation_owner_id, repo_id, target_ref, document, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(repo_id, target_ref) DO UPDATE SET
                installation_owner_id = excluded.installation_owner_id,
                document = excluded.document,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(train.installation_owner_id)
        .bind(train.repo_id)
        .bind(&train.target_ref)
        .bind(document)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, repo_id: i64, target_ref: &str) -> Result<()> {
        sqlx::query("DELETE FROM merge_trains WHERE repo_id = ? AND target_ref = ?")
            .bind(repo_id)
            .bind(target_ref)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_for_installation(&self, installation_owner_id: i64) -> Result<Vec<Train>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT document FROM merge_trains WHERE installation_owner_id = ?",
        )
        .bind(installation_owner_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(doc,)| serde_json::from_str(&doc).map_err(Error::from))
            .collect()
    }
}
