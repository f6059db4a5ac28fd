//! Dive metric record API
//!
//! Records are read-only once stored. A correction is a new record that
//! supersedes the old one; the full chain is available through the history
//! endpoint.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{Local, Utc};
use divelog_common::events::DiveLogEvent;
use serde::Serialize;
use uuid::Uuid;

use crate::db::StoredRecord;
use crate::error::{ApiError, ApiResult};
use crate::types::MetricCorrection;
use crate::AppState;

/// GET /owners/{owner_id}/records response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerRecordsResponse {
    pub owner_id: String,
    pub records: Vec<StoredRecord>,
}

/// GET /records/{record_id}/history response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordHistoryResponse {
    pub record_id: Uuid,
    /// Oldest first; the last entry is the current version
    pub chain: Vec<StoredRecord>,
}

/// GET /records/{record_id}
pub async fn get_record(
    State(state): State<AppState>,
    Path(record_id): Path<Uuid>,
) -> ApiResult<Json<StoredRecord>> {
    let stored = state
        .records
        .get(record_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Record not found: {}", record_id)))?;
    Ok(Json(stored))
}

/// GET /records/{record_id}/history
pub async fn get_record_history(
    State(state): State<AppState>,
    Path(record_id): Path<Uuid>,
) -> ApiResult<Json<RecordHistoryResponse>> {
    let chain = state.records.history(record_id).await?;
    if chain.is_empty() {
        return Err(ApiError::NotFound(format!("Record not found: {}", record_id)));
    }
    Ok(Json(RecordHistoryResponse { record_id, chain }))
}

/// GET /owners/{owner_id}/records
pub async fn list_owner_records(
    State(state): State<AppState>,
    Path(owner_id): Path<String>,
) -> ApiResult<Json<OwnerRecordsResponse>> {
    let records = state.records.list_for_owner(&owner_id).await?;
    Ok(Json(OwnerRecordsResponse { owner_id, records }))
}

/// POST /records/{record_id}/corrections
///
/// Stores a corrected copy of the record for the same owner. Only the latest
/// version of a chain can be corrected (409 otherwise).
pub async fn correct_record(
    State(state): State<AppState>,
    Path(record_id): Path<Uuid>,
    Json(correction): Json<MetricCorrection>,
) -> ApiResult<(StatusCode, Json<StoredRecord>)> {
    if correction.is_empty() {
        return Err(ApiError::BadRequest(
            "Correction must change at least one field".to_string(),
        ));
    }

    let original = state
        .records
        .get(record_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Record not found: {}", record_id)))?;

    let chain = state.records.history(record_id).await?;
    if let Some(latest) = chain.last() {
        if latest.record.record_id() != record_id {
            return Err(ApiError::Conflict(format!(
                "Record {} was already corrected by {}",
                record_id,
                latest.record.record_id()
            )));
        }
    }

    let corrected = original
        .record
        .corrected(&correction, Local::now().date_naive());
    // A concurrent correction of the same record loses here with a 409
    state.records.append(&corrected, &original.owner_id).await?;

    tracing::info!(
        record_id = %corrected.record_id(),
        supersedes = %record_id,
        is_usable = corrected.is_usable(),
        "Dive metric record corrected"
    );
    state.event_bus.emit_lossy(DiveLogEvent::RecordStored {
        record_id: corrected.record_id(),
        owner_id: original.owner_id.clone(),
        supersedes: Some(record_id),
        timestamp: Utc::now(),
    });

    Ok((
        StatusCode::CREATED,
        Json(StoredRecord {
            owner_id: original.owner_id,
            record: corrected,
        }),
    ))
}

/// Build record routes
pub fn record_routes() -> Router<AppState> {
    Router::new()
        .route("/records/:record_id", get(get_record))
        .route("/records/:record_id/history", get(get_record_history))
        .route("/records/:record_id/corrections", post(correct_record))
        .route("/owners/:owner_id/records", get(list_owner_records))
}
