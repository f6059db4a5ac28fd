//! Settings database operations
//!
//! Key-value accessors over the `settings` table.

use sqlx::{Pool, Sqlite};
use divelog_common::{Error, Result};

/// Default for `ai_database_max_lock_wait_ms`
pub const DEFAULT_MAX_LOCK_WAIT_MS: u64 = 5000;

/// Get vision API key from database
///
/// **Returns:** Some(key) if exists, None if not set
pub async fn get_vision_api_key(db: &Pool<Sqlite>) -> Result<Option<String>> {
    get_setting::<String>(db, "vision_api_key").await
}

/// Set vision API key in database
pub async fn set_vision_api_key(db: &Pool<Sqlite>, key: String) -> Result<()> {
    set_setting(db, "vision_api_key", key).await
}

/// How long writes keep retrying on "database is locked"
///
/// **Default:** 5000 ms
pub async fn get_max_lock_wait_ms(db: &Pool<Sqlite>) -> Result<u64> {
    get_setting(db, "ai_database_max_lock_wait_ms")
        .await
        .map(|opt| opt.unwrap_or(DEFAULT_MAX_LOCK_WAIT_MS))
}

/// Generic setting getter (internal)
async fn get_setting<T>(db: &Pool<Sqlite>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await
        .map_err(Error::Database)?;

    match row {
        Some((value,)) => {
            let parsed = value
                .parse::<T>()
                .map_err(|e| Error::Config(format!("Parse setting failed: {}", e)))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

/// Generic setting setter (internal)
async fn set_setting<T>(db: &Pool<Sqlite>, key: &str, value: T) -> Result<()>
where
    T: std::fmt::Display,
{
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value.to_string())
    .execute(db)
    .await
    .map_err(Error::Database)?;

    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
