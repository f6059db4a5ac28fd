//! Database access for divelog-ai
//!
//! SQLite file `divelog.db` in the root folder holds the append-only record
//! store and the service settings.

pub mod records;
pub mod settings;

pub use records::{RecordStore, SqliteRecordStore, StoredRecord};

use anyhow::Result;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::Path;

/// Initialize database connection pool
///
/// Creates the file (and its parent folder) if missing, then the tables.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Use proper SQLite URI with mode=rwc (read, write, create)
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;
    init_tables(&pool).await?;

    Ok(pool)
}

/// In-memory database on a single connection
///
/// Every SQLite `:memory:` connection is a separate database, so the pool is
/// capped at one connection.
pub async fn init_in_memory_pool() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    init_tables(&pool).await?;
    Ok(pool)
}

/// Create settings and dive_metric_records tables if they don't exist
///
/// Records are append-only: triggers reject UPDATE and DELETE.
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dive_metric_records (
            record_id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            source_image_id TEXT NOT NULL,
            supersedes TEXT,
            is_usable INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            record_json TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_dive_metric_records_owner ON dive_metric_records(owner_id)",
    )
    .execute(pool)
    .await?;

    // One successor per record keeps every correction chain linear
    sqlx::query("DROP INDEX IF EXISTS idx_dive_metric_records_supersedes")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_dive_metric_records_successor ON dive_metric_records(supersedes)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TRIGGER IF NOT EXISTS dive_metric_records_no_update
        BEFORE UPDATE ON dive_metric_records
        BEGIN
            SELECT RAISE(ABORT, 'dive_metric_records is append-only');
        END
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TRIGGER IF NOT EXISTS dive_metric_records_no_delete
        BEFORE DELETE ON dive_metric_records
        BEGIN
            SELECT RAISE(ABORT, 'dive_metric_records is append-only');
        END
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized (settings, dive_metric_records)");

    Ok(())
}
