//! Database initialization
//!
//! Creates the database file on first run, applies connection pragmas, creates
//! the LiveDB tables and seeds default settings. Every step is idempotent so
//! the same code path opens new and existing databases.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::{info, warn};

/// Sequence name used for `live_db_item` identifiers
pub const LIVE_DB_ITEM_SEQUENCE: &str = "live_db_item";

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // WAL allows concurrent readers alongside the single writer
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;

    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(&pool)
        .await?;

    prepare_schema(&pool).await?;

    Ok(pool)
}

/// Open a private in-memory database with the full schema
///
/// Limited to one connection: every `sqlite::memory:` connection is a
/// separate database.
pub async fn init_memory_database() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;

    prepare_schema(&pool).await?;

    Ok(pool)
}

/// Create tables, indexes and default settings
pub async fn prepare_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(pool)
        .await?;

    create_settings_table(pool).await?;
    create_model_set_table(pool).await?;
    create_live_db_item_table(pool).await?;
    create_raw_value_queue_table(pool).await?;
    create_id_sequence_table(pool).await?;

    init_default_settings(pool).await?;

    Ok(())
}

/// Create the settings table
///
/// Stores application configuration key-value pairs.
pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_model_set_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS live_db_model_set (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            key TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            comment TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_live_db_item_table(pool: &SqlitePool) -> Result<()> {
    // id is assigned from id_sequence by the importer, never by SQLite
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS live_db_item (
            id INTEGER PRIMARY KEY,
            model_set_id INTEGER NOT NULL REFERENCES live_db_model_set(id) ON DELETE CASCADE,
            key TEXT NOT NULL,
            raw_value TEXT,
            display_value TEXT,
            data_type INTEGER NOT NULL,
            import_hash TEXT,
            props_json TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_live_db_item_model_set_key \
         ON live_db_item (model_set_id, key)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_live_db_item_import_hash ON live_db_item (import_hash)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_raw_value_queue_table(pool: &SqlitePool) -> Result<()> {
    // AUTOINCREMENT keeps ids strictly increasing even after acknowledged rows are deleted
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS live_db_raw_value_queue (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            model_set_id INTEGER NOT NULL REFERENCES live_db_model_set(id) ON DELETE CASCADE,
            key TEXT NOT NULL,
            raw_value TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_id_sequence_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS id_sequence (
            name TEXT PRIMARY KEY,
            next_id INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("INSERT OR IGNORE INTO id_sequence (name, next_id) VALUES (?, 1)")
        .bind(LIVE_DB_ITEM_SEQUENCE)
        .execute(pool)
        .await?;

    Ok(())
}

/// Initialize or update default settings
///
/// Values here are the compiled defaults mirrored by the typed config structs
/// in the server crate.
async fn init_default_settings(pool: &SqlitePool) -> Result<()> {
    // Update queue controller
    ensure_setting(pool, "queue_poll_period_ms", "200").await?;
    ensure_setting(pool, "queue_items_per_task", "500").await?;
    ensure_setting(pool, "queue_blocks_max", "40").await?;
    ensure_setting(pool, "queue_blocks_min", "8").await?;
    ensure_setting(pool, "queue_task_timeout_secs", "60").await?;
    ensure_setting(pool, "queue_retry_delay_ms", "2000").await?;

    // Status notification
    ensure_setting(pool, "status_notify_period_ms", "2000").await?;

    // Bulk read and import
    ensure_setting(pool, "bulk_read_chunk_size", "2500").await?;
    ensure_setting(pool, "import_existence_chunk_size", "1000").await?;

    // Task executor
    ensure_setting(pool, "executor_max_concurrent_tasks", "8").await?;

    // Event bus
    ensure_setting(pool, "event_bus_capacity", "1000").await?;

    Ok(())
}

/// Ensure a setting exists with the specified default value
///
/// If the setting doesn't exist, it will be created with the default.
/// If the setting exists but has a NULL value, it will be reset to the default.
async fn ensure_setting(pool: &SqlitePool, key: &str, default_value: &str) -> Result<()> {
    let value: Option<Option<String>> =
        sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(pool)
            .await?;

    match value {
        None => {
            // INSERT OR IGNORE tolerates two processes initializing at once
            sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)")
                .bind(key)
                .bind(default_value)
                .execute(pool)
                .await?;
        }
        Some(None) => {
            sqlx::query("UPDATE settings SET value = ? WHERE key = ?")
                .bind(default_value)
                .bind(key)
                .execute(pool)
                .await?;

            warn!("Setting '{}' was NULL, reset to default: {}", key, default_value);
        }
        Some(Some(_)) => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_database_has_tables() {
        let pool = init_memory_database().await.unwrap();

        for table in [
            "settings",
            "live_db_model_set",
            "live_db_item",
            "live_db_raw_value_queue",
            "id_sequence",
        ] {
            let exists: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?)",
            )
            .bind(table)
            .fetch_one(&pool)
            .await
            .unwrap();
            assert!(exists, "table {} should exist", table);
        }
    }

    #[tokio::test]
    async fn test_prepare_schema_is_idempotent() {
        let pool = init_memory_database().await.unwrap();
        prepare_schema(&pool).await.unwrap();

        let next_id: i64 = sqlx::query_scalar("SELECT next_id FROM id_sequence WHERE name = ?")
            .bind(LIVE_DB_ITEM_SEQUENCE)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(next_id, 1);
    }

    #[tokio::test]
    async fn test_null_setting_reset_to_default() {
        let pool = init_memory_database().await.unwrap();
        sqlx::query("UPDATE settings SET value = NULL WHERE key = 'queue_blocks_max'")
            .execute(&pool)
            .await
            .unwrap();

        prepare_schema(&pool).await.unwrap();

        let value: String =
            sqlx::query_scalar("SELECT value FROM settings WHERE key = 'queue_blocks_max'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(value, "40");
    }
}
