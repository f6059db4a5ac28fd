//! Batch API handlers
//!
//! POST /batch, POST /batch/folder, GET /batch/{batch_id},
//! POST /batch/{batch_id}/cancel
//!
//! Batches run on a background task; the POST handlers answer 202 Accepted
//! with the batch id and the caller polls the status endpoint or listens on
//! the SSE stream.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::analyze::{decode_image, normalize_owner};
use crate::error::{ApiError, ApiResult};
use crate::models::{BatchSession, BatchState};
use crate::workflow::{BatchItem, SharedBatchSession};
use crate::AppState;

/// One uploaded image of a batch
#[derive(Debug, Deserialize)]
pub struct BatchImage {
    /// Label reported back with the outcome; defaults to `image-<index>`
    #[serde(default)]
    pub name: Option<String>,
    pub image: String,
}

/// POST /batch request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartBatchRequest {
    pub images: Vec<BatchImage>,
    #[serde(default)]
    pub prompt_hint: Option<String>,
    #[serde(default)]
    pub owner_id: Option<String>,
}

/// POST /batch/folder request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartFolderBatchRequest {
    pub folder: String,
    #[serde(default)]
    pub prompt_hint: Option<String>,
    #[serde(default)]
    pub owner_id: Option<String>,
}

/// 202 response of both start endpoints
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartBatchResponse {
    pub batch_id: Uuid,
    pub state: BatchState,
    pub total: Option<usize>,
    pub started_at: DateTime<Utc>,
}

/// POST /batch/{batch_id}/cancel response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelBatchResponse {
    pub batch_id: Uuid,
    pub state: BatchState,
    pub processed: usize,
    pub total: usize,
    pub cancel_requested_at: DateTime<Utc>,
}

/// POST /batch
pub async fn start_batch(
    State(state): State<AppState>,
    Json(request): Json<StartBatchRequest>,
) -> ApiResult<(StatusCode, Json<StartBatchResponse>)> {
    let owner_id = normalize_owner(request.owner_id)?;
    if request.images.is_empty() {
        return Err(ApiError::BadRequest("images must not be empty".to_string()));
    }

    let mut items = Vec::with_capacity(request.images.len());
    for (index, image) in request.images.into_iter().enumerate() {
        let payload = decode_image(&image.image, &format!("images[{}]", index))?;
        let name = image.name.unwrap_or_else(|| format!("image-{}", index));
        items.push(BatchItem::inline(name, payload));
    }

    let total = items.len();
    let processor = state.batch_processor()?;
    let (session, cancel) = register_session(&state, BatchSession::new("inline", owner_id)).await;
    let response = start_response(&session, Some(total)).await;

    let hint = request.prompt_hint;
    let batch_id = response.batch_id;
    let state_clone = state.clone();
    tokio::spawn(async move {
        tracing::info!(batch_id = %batch_id, total, "Background batch task started");
        processor.run(session, items, hint.as_deref(), cancel).await;
        release_token(&state_clone, batch_id).await;
    });

    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// POST /batch/folder
pub async fn start_folder_batch(
    State(state): State<AppState>,
    Json(request): Json<StartFolderBatchRequest>,
) -> ApiResult<(StatusCode, Json<StartBatchResponse>)> {
    let owner_id = normalize_owner(request.owner_id)?;
    let folder = PathBuf::from(&request.folder);
    if !folder.exists() {
        return Err(ApiError::BadRequest(format!(
            "Folder does not exist: {}",
            request.folder
        )));
    }
    if !folder.is_dir() {
        return Err(ApiError::BadRequest(format!(
            "Folder is not a directory: {}",
            request.folder
        )));
    }

    let processor = state.batch_processor()?;
    let session = BatchSession::new(folder.display().to_string(), owner_id);
    let (session, cancel) = register_session(&state, session).await;
    let response = start_response(&session, None).await;

    let hint = request.prompt_hint;
    let batch_id = response.batch_id;
    let state_clone = state.clone();
    tokio::spawn(async move {
        tracing::info!(batch_id = %batch_id, folder = %folder.display(), "Background folder batch task started");
        processor
            .run_folder(session, &folder, hint.as_deref(), cancel)
            .await;
        release_token(&state_clone, batch_id).await;
    });

    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// GET /batch/{batch_id}
pub async fn get_batch_status(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> ApiResult<Json<BatchSession>> {
    let session = find_session(&state, batch_id).await?;
    let snapshot = session.read().await.clone();
    Ok(Json(snapshot))
}

/// POST /batch/{batch_id}/cancel
///
/// Stops dispatching new images. Images already sent to the engine finish and
/// the batch ends CANCELLED once they do.
pub async fn cancel_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> ApiResult<Json<CancelBatchResponse>> {
    let session = find_session(&state, batch_id).await?;
    let (batch_state, progress) = {
        let s = session.read().await;
        (s.state, s.progress.clone())
    };

    if batch_state.is_terminal() {
        return Err(ApiError::Conflict(format!(
            "Batch already finished: {:?}",
            batch_state
        )));
    }

    match state.cancellation_tokens.read().await.get(&batch_id) {
        Some(token) => token.cancel(),
        None => {
            return Err(ApiError::Conflict(format!(
                "Batch is no longer cancellable: {}",
                batch_id
            )))
        }
    }

    tracing::info!(
        batch_id = %batch_id,
        processed = progress.processed,
        total = progress.total,
        "Batch cancellation requested"
    );

    Ok(Json(CancelBatchResponse {
        batch_id,
        state: batch_state,
        processed: progress.processed,
        total: progress.total,
        cancel_requested_at: Utc::now(),
    }))
}

async fn register_session(
    state: &AppState,
    session: BatchSession,
) -> (SharedBatchSession, CancellationToken) {
    let batch_id = session.batch_id;
    let session = Arc::new(RwLock::new(session));
    let cancel = CancellationToken::new();

    state.batches.write().await.insert(batch_id, session.clone());
    prune_finished_sessions(state).await;
    state
        .cancellation_tokens
        .write()
        .await
        .insert(batch_id, cancel.clone());

    (session, cancel)
}

/// Drop the oldest finished sessions beyond `retained_sessions`
///
/// Running sessions are never dropped.
pub(crate) async fn prune_finished_sessions(state: &AppState) {
    let limit = state.batch_settings.retained_sessions;
    let mut batches = state.batches.write().await;

    let mut finished = Vec::new();
    for (batch_id, session) in batches.iter() {
        if let Some(ended_at) = session.read().await.ended_at {
            finished.push((ended_at, *batch_id));
        }
    }
    if finished.len() <= limit {
        return;
    }

    finished.sort();
    let excess = finished.len() - limit;
    for (_, batch_id) in finished.into_iter().take(excess) {
        batches.remove(&batch_id);
    }
    tracing::debug!(dropped = excess, retained = limit, "Pruned finished batch sessions");
}

async fn release_token(state: &AppState, batch_id: Uuid) {
    state.cancellation_tokens.write().await.remove(&batch_id);
}

async fn find_session(state: &AppState, batch_id: Uuid) -> ApiResult<SharedBatchSession> {
    state
        .batches
        .read()
        .await
        .get(&batch_id)
        .cloned()
        .ok_or_else(|| ApiError::NotFound(format!("Batch not found: {}", batch_id)))
}

async fn start_response(session: &SharedBatchSession, total: Option<usize>) -> StartBatchResponse {
    let s = session.read().await;
    StartBatchResponse {
        batch_id: s.batch_id,
        state: s.state,
        total,
        started_at: s.started_at,
    }
}

/// Build batch routes
pub fn batch_routes() -> Router<AppState> {
    Router::new()
        .route("/batch", post(start_batch))
        .route("/batch/folder", post(start_folder_batch))
        .route("/batch/:batch_id", get(get_batch_status))
        .route("/batch/:batch_id/cancel", post(cancel_batch))
}
