//! divelog-ai library interface
//!
//! Dive-metric extraction: a photo of a dive computer or logbook page goes
//! through ingestion (vision/OCR), normalization and validation and comes out
//! as a [`types::ValidatedDiveMetricRecord`].

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod models;
pub mod normalizer;
pub mod types;
pub mod utils;
pub mod validators;
pub mod workflow;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use divelog_common::events::EventBus;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::config::BatchSettings;
use crate::db::{RecordStore, SqliteRecordStore};
use crate::workflow::{BatchProcessor, DiveMetricPipeline, SharedBatchSession};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Extraction pipeline; `None` while no vision API key is configured
    pub pipeline: Option<Arc<DiveMetricPipeline>>,
    /// Persistence for validated records
    pub records: Arc<dyn RecordStore>,
    pub batch_settings: BatchSettings,
    /// Batch sessions started since service start
    pub batches: Arc<RwLock<HashMap<Uuid, SharedBatchSession>>>,
    /// Cancellation tokens for running batches
    pub cancellation_tokens: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    /// State without a vision engine, storing records in `db`
    pub fn new(db: SqlitePool, event_bus: EventBus) -> Self {
        Self {
            records: Arc::new(SqliteRecordStore::new(db.clone())),
            db,
            event_bus,
            pipeline: None,
            batch_settings: BatchSettings::default(),
            batches: Arc::new(RwLock::new(HashMap::new())),
            cancellation_tokens: Arc::new(RwLock::new(HashMap::new())),
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }

    pub fn with_pipeline(mut self, pipeline: Arc<DiveMetricPipeline>) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    pub fn with_batch_settings(mut self, settings: BatchSettings) -> Self {
        self.batch_settings = settings;
        self
    }

    pub fn with_record_store(mut self, records: Arc<dyn RecordStore>) -> Self {
        self.records = records;
        self
    }

    /// The pipeline, or 503 when no vision engine is configured
    pub fn require_pipeline(&self) -> ApiResult<Arc<DiveMetricPipeline>> {
        self.pipeline.clone().ok_or_else(|| {
            ApiError::EngineUnavailable("Vision engine not configured".to_string())
        })
    }

    /// Batch processor wired to this state's pipeline, event bus and store
    pub fn batch_processor(&self) -> ApiResult<BatchProcessor> {
        Ok(
            BatchProcessor::new(self.require_pipeline()?, self.batch_settings.clone())
                .with_event_bus(self.event_bus.clone())
                .with_record_store(self.records.clone()),
        )
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::analyze_routes())
        .merge(api::batch_routes())
        .route("/batch/events", get(api::batch_event_stream))
        .route("/events", get(api::event_stream))
        .merge(api::record_routes())
        .merge(api::health_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
