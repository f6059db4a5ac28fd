//! Single image analysis
//!
//! POST /analyze runs one image through the pipeline and answers with the
//! validated record. Requests are not retried: an unavailable engine is
//! reported as 503 so the caller can try again.

use axum::{extract::State, routing::post, Json, Router};
use chrono::Utc;
use divelog_common::events::DiveLogEvent;
use serde::Deserialize;

use crate::error::{ApiError, ApiResult};
use crate::extractors::ImagePayload;
use crate::types::{IngestError, ValidatedDiveMetricRecord};
use crate::AppState;

/// POST /analyze request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest {
    /// Base64 image data or a `data:` URL
    pub image: String,
    /// Prompt profile name or free-text hint for the vision engine
    #[serde(default)]
    pub prompt_hint: Option<String>,
    /// Persist the record for this user when present
    #[serde(default)]
    pub owner_id: Option<String>,
}

/// Decode a request image, reporting malformed data as a bad request
pub(crate) fn decode_image(encoded: &str, label: &str) -> ApiResult<ImagePayload> {
    ImagePayload::from_base64(encoded)
        .map_err(|e| ApiError::BadRequest(format!("{}: {}", label, e)))
}

/// POST /analyze
pub async fn analyze_image(
    State(state): State<AppState>,
    Json(request): Json<AnalyzeRequest>,
) -> ApiResult<Json<ValidatedDiveMetricRecord>> {
    let owner_id = normalize_owner(request.owner_id)?;
    let payload = decode_image(&request.image, "image")?;
    let pipeline = state.require_pipeline()?;

    let record = match pipeline
        .analyze(&payload, request.prompt_hint.as_deref())
        .await
    {
        Ok(record) => record,
        Err(e) => {
            if let IngestError::EngineUnavailable(_) = &e {
                *state.last_error.write().await = Some(e.to_string());
            }
            tracing::warn!(error = %e, code = e.code(), "Dive image analysis failed");
            return Err(e.into());
        }
    };

    if let Some(owner_id) = owner_id {
        state.records.append(&record, &owner_id).await?;
        state.event_bus.emit_lossy(DiveLogEvent::RecordStored {
            record_id: record.record_id(),
            owner_id,
            supersedes: None,
            timestamp: Utc::now(),
        });
    }

    Ok(Json(record))
}

/// `ownerId` as given, or 400 when it is blank
pub(crate) fn normalize_owner(owner_id: Option<String>) -> ApiResult<Option<String>> {
    match owner_id {
        Some(id) if id.trim().is_empty() => {
            Err(ApiError::BadRequest("ownerId must not be blank".to_string()))
        }
        other => Ok(other),
    }
}

/// Build analysis routes
pub fn analyze_routes() -> Router<AppState> {
    Router::new().route("/analyze", post(analyze_image))
}
