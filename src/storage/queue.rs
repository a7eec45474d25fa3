use log::{debug, info};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;

use crate::config::settings::StorageConfig;
use crate::storage::migrations::DatabaseMigrations;
use crate::storage::models::{QueueRecord, QueueStats};
use crate::utils::error::StorageError;

/// Store-and-forward outbox. Ids only grow and `sent` only goes 0 -> 1.
///
/// The pool holds exactly one connection, so every statement runs on the
/// single writer and the ascending-id delivery order cannot interleave.
#[derive(Clone)]
pub struct MessageQueue {
    pool: SqlitePool,
    config: StorageConfig,
}

impl MessageQueue {
    pub async fn open(config: StorageConfig) -> Result<Self, StorageError> {
        let path = Path::new(&config.database_path);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        info!("🗄️  Opening queue database: {}", config.database_path);

        let synchronous = match config.sync_mode.to_uppercase().as_str() {
            "OFF" => SqliteSynchronous::Off,
            "NORMAL" => SqliteSynchronous::Normal,
            _ => SqliteSynchronous::Full,
        };

        let options = SqliteConnectOptions::new()
            .filename(&config.database_path)
            .create_if_missing(true)
            .busy_timeout(Duration::from_millis(config.busy_timeout_ms))
            .journal_mode(if config.enable_wal {
                SqliteJournalMode::Wal
            } else {
                SqliteJournalMode::Delete
            })
            .synchronous(synchronous);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Open {
                path: config.database_path.clone(),
                reason: e.to_string(),
            })?;

        DatabaseMigrations::run_migrations(&pool).await?;

        let queue = Self { pool, config };
        let stats = queue.stats().await?;
        info!(
            "✅ Queue ready: {} rows, {} pending",
            stats.total, stats.pending
        );
        Ok(queue)
    }

    /// Inserts one unsent record and returns its id once committed.
    pub async fn enqueue(&self, topic: &str, payload: &str, created_at: &str) -> Result<i64, StorageError> {
        let result = sqlx::query("INSERT INTO queue (topic, payload, ts, sent) VALUES (?, ?, ?, 0)")
            .bind(topic)
            .bind(payload)
            .bind(created_at)
            .execute(&self.pool)
            .await?;

        let id = result.last_insert_rowid();
        debug!("Enqueue to DB ok (id={} topic={} ts={})", id, topic, created_at);
        Ok(id)
    }

    /// Oldest unsent records first.
    pub async fn pending(&self, limit: usize) -> Result<Vec<QueueRecord>, StorageError> {
        let records = sqlx::query_as::<_, QueueRecord>(
            "SELECT id, topic, payload, ts, sent FROM queue WHERE sent = 0 ORDER BY id LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Returns whether the record changed state. Already-sent or unknown ids are a no-op.
    pub async fn mark_sent(&self, id: i64) -> Result<bool, StorageError> {
        let result = sqlx::query("UPDATE queue SET sent = 1 WHERE id = ? AND sent = 0")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Keeps the `retain_count` newest sent records and deletes older sent ones.
    /// Unsent records are never touched.
    pub async fn prune(&self, retain_count: u32) -> Result<u64, StorageError> {
        let result = sqlx::query(r#"
            DELETE FROM queue
            WHERE sent = 1 AND id <= (
                SELECT id FROM queue WHERE sent = 1
                ORDER BY id DESC
                LIMIT 1 OFFSET ?
            )
        "#)
        .bind(retain_count as i64)
        .execute(&self.pool)
        .await?;

        let deleted = result.rows_affected();
        if deleted > 0 {
            info!("🧹 Cleanup DB queue, deleted {} old sent rows", deleted);
        }
        Ok(deleted)
    }

    pub async fn pending_count(&self) -> Result<i64, StorageError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM queue WHERE sent = 0")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn stats(&self) -> Result<QueueStats, StorageError> {
        let stats = sqlx::query_as::<_, QueueStats>(r#"
            SELECT
                COUNT(*) AS total,
                COALESCE(SUM(CASE WHEN sent = 0 THEN 1 ELSE 0 END), 0) AS pending,
                COALESCE(SUM(CASE WHEN sent = 1 THEN 1 ELSE 0 END), 0) AS sent,
                MIN(CASE WHEN sent = 0 THEN id END) AS oldest_pending_id,
                MAX(id) AS max_id
            FROM queue
        "#)
        .fetch_one(&self.pool)
        .await?;

        Ok(stats)
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Closes the pool. Safe to call more than once.
    pub async fn close(&self) {
        if !self.pool.is_closed() {
            self.pool.close().await;
            info!("🔒 SQLite DB connection closed: {}", self.config.database_path);
        }
    }
}
