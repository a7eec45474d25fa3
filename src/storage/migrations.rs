use log::info;
use sqlx::SqlitePool;

use crate::utils::error::StorageError;

pub struct DatabaseMigrations;

impl DatabaseMigrations {
    pub async fn run_migrations(pool: &SqlitePool) -> Result<(), StorageError> {
        // Create migration tracking table
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS migrations (
                id INTEGER PRIMARY KEY,
                version TEXT NOT NULL UNIQUE,
                applied_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
        "#)
        .execute(pool)
        .await
        .map_err(|e| StorageError::Migration {
            version: "tracking".to_string(),
            reason: e.to_string(),
        })?;

        Self::apply_migration_v1(pool).await?;
        Ok(())
    }

    async fn is_applied(pool: &SqlitePool, version: &str) -> Result<bool, StorageError> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM migrations WHERE version = ?)")
            .bind(version)
            .fetch_one(pool)
            .await?;
        Ok(exists)
    }

    /// Queue table and the (sent, id) index that backs `pending()`.
    async fn apply_migration_v1(pool: &SqlitePool) -> Result<(), StorageError> {
        if Self::is_applied(pool, "v1").await? {
            return Ok(());
        }

        info!("📦 Applying migration v1: queue table");
        let fail = |e: sqlx::Error| StorageError::Migration {
            version: "v1".to_string(),
            reason: e.to_string(),
        };

        let mut tx = pool.begin().await?;

        // IF NOT EXISTS: queue files from earlier deployments already have it
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS queue (
                id      INTEGER PRIMARY KEY AUTOINCREMENT,
                topic   TEXT NOT NULL,
                payload TEXT NOT NULL,
                ts      TEXT NOT NULL,
                sent    INTEGER NOT NULL DEFAULT 0
            )
        "#)
        .execute(&mut *tx)
        .await
        .map_err(fail)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_queue_sent_id ON queue(sent, id)")
            .execute(&mut *tx)
            .await
            .map_err(fail)?;

        sqlx::query("INSERT INTO migrations (version) VALUES ('v1')")
            .execute(&mut *tx)
            .await
            .map_err(fail)?;

        tx.commit().await?;
        Ok(())
    }
}
