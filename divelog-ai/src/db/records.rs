//! Dive metric record store
//!
//! Append-only persistence for [`ValidatedDiveMetricRecord`]s. Corrections are
//! new rows whose `supersedes` column points at the corrected record; no row
//! is ever updated or deleted.

use async_trait::async_trait;
use divelog_common::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::settings::get_max_lock_wait_ms;
use crate::types::ValidatedDiveMetricRecord;
use crate::utils::retry_on_lock;

/// A record together with the user it belongs to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRecord {
    pub owner_id: String,
    #[serde(flatten)]
    pub record: ValidatedDiveMetricRecord,
}

/// Persistence collaborator for validated records
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Durably store `record` for `owner_id`
    ///
    /// Fails with [`Error::Conflict`] when another record already supersedes
    /// the same predecessor.
    async fn append(&self, record: &ValidatedDiveMetricRecord, owner_id: &str) -> Result<()>;

    async fn get(&self, record_id: Uuid) -> Result<Option<StoredRecord>>;

    /// All records of one owner, oldest first
    async fn list_for_owner(&self, owner_id: &str) -> Result<Vec<StoredRecord>>;

    /// The correction chain containing `record_id`, oldest first
    ///
    /// Empty when the record is unknown.
    async fn history(&self, record_id: Uuid) -> Result<Vec<StoredRecord>>;
}

/// SQLite implementation over the `dive_metric_records` table
#[derive(Debug, Clone)]
pub struct SqliteRecordStore {
    pool: SqlitePool,
}

impl SqliteRecordStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn append(&self, record: &ValidatedDiveMetricRecord, owner_id: &str) -> Result<()> {
        // Prepare all data BEFORE acquiring database connection
        let record_id = record.record_id().to_string();
        let source_image_id = record.source_image_id().to_string();
        let supersedes = record.supersedes().map(|id| id.to_string());
        let is_usable = record.is_usable();
        let created_at = record.created_at().to_rfc3339();
        let record_json = serde_json::to_string(record)
            .map_err(|e| Error::Internal(format!("Failed to serialize record: {}", e)))?;

        let max_wait_ms = get_max_lock_wait_ms(&self.pool).await?;

        retry_on_lock("append_record", max_wait_ms, || async {
            sqlx::query(
                r#"
                INSERT INTO dive_metric_records (
                    record_id, owner_id, source_image_id, supersedes,
                    is_usable, created_at, record_json
                ) VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&record_id)
            .bind(owner_id)
            .bind(&source_image_id)
            .bind(&supersedes)
            .bind(is_usable)
            .bind(&created_at)
            .bind(&record_json)
            .execute(&self.pool)
            .await
            .map_err(|e| map_append_error(e, supersedes.as_deref()))?;

            Ok(())
        })
        .await?;

        tracing::debug!(
            record_id = %record_id,
            owner_id,
            supersedes = ?supersedes,
            "Dive metric record appended"
        );

        Ok(())
    }

    async fn get(&self, record_id: Uuid) -> Result<Option<StoredRecord>> {
        let row: Option<(String, String)> = sqlx::query_as(
            "SELECT owner_id, record_json FROM dive_metric_records WHERE record_id = ?",
        )
        .bind(record_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(decode_row).transpose()
    }

    async fn list_for_owner(&self, owner_id: &str) -> Result<Vec<StoredRecord>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT owner_id, record_json FROM dive_metric_records
             WHERE owner_id = ? ORDER BY rowid",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(decode_row).collect()
    }

    async fn history(&self, record_id: Uuid) -> Result<Vec<StoredRecord>> {
        // Walk back to the chain root (no stored predecessor), then forward
        // through every record superseding a chain member.
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            WITH RECURSIVE
                ancestors(record_id, supersedes) AS (
                    SELECT record_id, supersedes FROM dive_metric_records WHERE record_id = ?
                    UNION
                    SELECT r.record_id, r.supersedes
                    FROM dive_metric_records r
                    JOIN ancestors a ON r.record_id = a.supersedes
                ),
                roots(record_id) AS (
                    SELECT a.record_id FROM ancestors a
                    WHERE a.supersedes IS NULL
                       OR NOT EXISTS (
                           SELECT 1 FROM dive_metric_records p WHERE p.record_id = a.supersedes
                       )
                ),
                chain(record_id) AS (
                    SELECT record_id FROM roots
                    UNION
                    SELECT r.record_id
                    FROM dive_metric_records r
                    JOIN chain c ON r.supersedes = c.record_id
                )
            SELECT owner_id, record_json FROM dive_metric_records
            WHERE record_id IN (SELECT record_id FROM chain)
            ORDER BY rowid
            "#,
        )
        .bind(record_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(decode_row).collect()
    }
}

/// A second successor for one record surfaces as a conflict
fn map_append_error(err: sqlx::Error, supersedes: Option<&str>) -> Error {
    let successor_taken = err
        .as_database_error()
        .is_some_and(|db| db.is_unique_violation() && db.message().contains("supersedes"));

    match supersedes {
        Some(previous) if successor_taken => {
            Error::Conflict(format!("Record {} was already corrected", previous))
        }
        _ => Error::Database(err),
    }
}

fn decode_row((owner_id, record_json): (String, String)) -> Result<StoredRecord> {
    let record = serde_json::from_str(&record_json)
        .map_err(|e| Error::Internal(format!("Failed to deserialize record: {}", e)))?;
    Ok(StoredRecord { owner_id, record })
}
