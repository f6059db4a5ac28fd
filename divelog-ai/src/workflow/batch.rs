//! Batch processing of many dive images
//!
//! # Phases
//! 1. Extraction: up to `workers` images in flight (`buffer_unordered`), each
//!    retried with exponential backoff and full jitter while the engine is
//!    unavailable. Unsupported formats fail immediately.
//! 2. Normalization and validation: a [`NormalizationContext`] learned from all
//!    extracted texts resolves ambiguous dates consistently across the batch.
//!
//! # Cancellation
//! The token is checked when an image is about to be dispatched and before
//! each retry. Images already talking to the engine finish; images never
//! dispatched are reported `cancelled`.
//!
//! One image failing never fails the batch.

use chrono::{Local, Utc};
use divelog_common::events::{DiveLogEvent, EventBus};
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use super::folder_scanner::{display_name, ImageFolderScanner};
use super::pipeline::DiveMetricPipeline;
use crate::config::BatchSettings;
use crate::db::RecordStore;
use crate::extractors::ImagePayload;
use crate::models::{BatchItemOutcome, BatchItemStatus, BatchReport, BatchSession};
use crate::normalizer::NormalizationContext;
use crate::types::{IngestError, RawExtraction, ValidatedDiveMetricRecord};
use crate::utils::retry_with_backoff;

/// Batch session shared between the processor and status readers
pub type SharedBatchSession = Arc<RwLock<BatchSession>>;

/// Where a batch image comes from
#[derive(Debug, Clone)]
pub enum BatchSource {
    /// Uploaded bytes
    Inline(ImagePayload),
    /// File read when the image is dispatched
    File(PathBuf),
}

/// One image of a batch
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub name: String,
    pub source: BatchSource,
}

impl BatchItem {
    pub fn inline(name: impl Into<String>, payload: ImagePayload) -> Self {
        Self {
            name: name.into(),
            source: BatchSource::Inline(payload),
        }
    }

    pub fn file(path: PathBuf) -> Self {
        Self {
            name: display_name(&path),
            source: BatchSource::File(path),
        }
    }
}

/// Phase 1 result: extracted text, or a terminal status
type ItemExtraction = Result<RawExtraction, BatchItemStatus>;

/// Runs batches through a shared [`DiveMetricPipeline`]
pub struct BatchProcessor {
    pipeline: Arc<DiveMetricPipeline>,
    settings: BatchSettings,
    event_bus: Option<EventBus>,
    store: Option<Arc<dyn RecordStore>>,
}

impl BatchProcessor {
    pub fn new(pipeline: Arc<DiveMetricPipeline>, settings: BatchSettings) -> Self {
        Self {
            pipeline,
            settings,
            event_bus: None,
            store: None,
        }
    }

    /// Broadcast batch progress on `event_bus`
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Persist completed records for sessions that have an owner
    pub fn with_record_store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Scan `folder` for images, then run them as a batch
    ///
    /// A scan failure moves the session to FAILED without dispatching anything.
    pub async fn run_folder(
        &self,
        session: SharedBatchSession,
        folder: &Path,
        prompt_hint: Option<&str>,
        cancel: CancellationToken,
    ) -> BatchReport {
        let started = Instant::now();
        let root = folder.to_path_buf();
        let scan = tokio::task::spawn_blocking(move || ImageFolderScanner::new().scan(&root)).await;

        let files = match scan {
            Ok(Ok(files)) => files,
            Ok(Err(e)) => return self.fail(&session, e.to_string(), started).await,
            Err(e) => return self.fail(&session, format!("Folder scan task failed: {}", e), started).await,
        };

        info!(folder = %folder.display(), images = files.len(), "Folder scanned for dive images");

        let items = files.into_iter().map(BatchItem::file).collect();
        self.run(session, items, prompt_hint, cancel).await
    }

    /// Process `items` and record the outcome on `session`
    pub async fn run(
        &self,
        session: SharedBatchSession,
        items: Vec<BatchItem>,
        prompt_hint: Option<&str>,
        cancel: CancellationToken,
    ) -> BatchReport {
        let started = Instant::now();
        let total = items.len();
        let (batch_id, owner_id) = {
            let mut s = session.write().await;
            s.update_progress(0, total);
            (s.batch_id, s.owner_id.clone())
        };

        info!(
            batch_id = %batch_id,
            total,
            workers = self.settings.workers,
            "Batch started"
        );
        self.emit(DiveLogEvent::BatchStarted {
            batch_id,
            total,
            timestamp: Utc::now(),
        });

        // Phase 1: concurrent extraction
        let instruction = self.pipeline.instruction_for(prompt_hint);
        let instruction = instruction.as_str();
        let cancel_ref = &cancel;

        let mut extractions: Vec<(usize, String, ItemExtraction)> = Vec::with_capacity(total);
        let mut processed = 0usize;

        let mut in_flight = stream::iter(items.into_iter().enumerate())
            .map(move |(index, item)| async move {
                let extraction = self.extract_item(&item, instruction, cancel_ref).await;
                (index, item.name, extraction)
            })
            .buffer_unordered(self.settings.workers.max(1));

        while let Some((index, name, extraction)) = in_flight.next().await {
            if !matches!(extraction, Err(BatchItemStatus::Cancelled)) {
                processed += 1;
                session.write().await.update_progress(processed, total);
                self.emit(DiveLogEvent::BatchProgress {
                    batch_id,
                    processed,
                    total,
                    percentage: if total > 0 {
                        (processed as f32 / total as f32) * 100.0
                    } else {
                        0.0
                    },
                    timestamp: Utc::now(),
                });
            }
            extractions.push((index, name, extraction));
        }
        drop(in_flight);

        // Phase 2: normalization with batch context, validation, persistence
        extractions.sort_by_key(|(index, _, _)| *index);
        let ctx = NormalizationContext::from_batch(
            extractions
                .iter()
                .filter_map(|(_, _, e)| e.as_ref().ok())
                .map(|raw| raw.raw_text.as_str()),
        );
        let today = Local::now().date_naive();

        let mut outcomes = Vec::with_capacity(total);
        for (index, name, extraction) in extractions {
            let status = match extraction {
                Ok(raw) => {
                    let record = self.pipeline.finish(&raw, &ctx, today);
                    self.persist(record, owner_id.as_deref()).await
                }
                Err(status) => status,
            };
            self.emit_item_finished(batch_id, index, &name, &status);
            outcomes.push(BatchItemOutcome {
                index,
                name,
                status,
            });
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let report = BatchReport::new(batch_id, outcomes, elapsed_ms);
        session.write().await.finish(&report);

        if report.cancelled > 0 {
            info!(
                batch_id = %batch_id,
                processed,
                skipped = report.cancelled,
                "Batch cancelled"
            );
            self.emit(DiveLogEvent::BatchCancelled {
                batch_id,
                processed,
                skipped: report.cancelled,
                timestamp: Utc::now(),
            });
        } else {
            info!(
                batch_id = %batch_id,
                succeeded = report.succeeded,
                failed = report.failed,
                usable = report.usable,
                elapsed_ms,
                "Batch completed"
            );
            self.emit(DiveLogEvent::BatchCompleted {
                batch_id,
                succeeded: report.succeeded,
                failed: report.failed,
                usable: report.usable,
                elapsed_ms,
                timestamp: Utc::now(),
            });
        }

        report
    }

    async fn extract_item(
        &self,
        item: &BatchItem,
        instruction: &str,
        cancel: &CancellationToken,
    ) -> ItemExtraction {
        if cancel.is_cancelled() {
            return Err(BatchItemStatus::Cancelled);
        }

        let loaded;
        let payload = match &item.source {
            BatchSource::Inline(payload) => payload,
            BatchSource::File(path) => match tokio::fs::read(path).await {
                Ok(bytes) => {
                    loaded = ImagePayload::from_bytes(bytes);
                    &loaded
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to read batch image");
                    return Err(BatchItemStatus::Failed {
                        code: "IMAGE_READ_FAILED".to_string(),
                        message: format!("Failed to read {}: {}", path.display(), e),
                        retryable: false,
                    });
                }
            },
        };

        let image = self
            .pipeline
            .ingestor()
            .prepare(payload)
            .map_err(|e| BatchItemStatus::from_ingest_error(&e))?;

        let image = &image;
        retry_with_backoff(
            "vision_extract",
            &self.settings.retry,
            Some(cancel),
            IngestError::is_retryable,
            move |_attempt| self.pipeline.extract(image, instruction),
        )
        .await
        .map_err(|e| {
            warn!(item = %item.name, error = %e, "Batch image extraction failed");
            BatchItemStatus::from_ingest_error(&e)
        })
    }

    async fn persist(&self, record: ValidatedDiveMetricRecord, owner_id: Option<&str>) -> BatchItemStatus {
        let (Some(store), Some(owner_id)) = (&self.store, owner_id) else {
            return BatchItemStatus::Completed { record };
        };

        match store.append(&record, owner_id).await {
            Ok(()) => {
                self.emit(DiveLogEvent::RecordStored {
                    record_id: record.record_id(),
                    owner_id: owner_id.to_string(),
                    supersedes: record.supersedes(),
                    timestamp: Utc::now(),
                });
                BatchItemStatus::Completed { record }
            }
            Err(e) => {
                warn!(record_id = %record.record_id(), error = %e, "Failed to store batch record");
                BatchItemStatus::Failed {
                    code: "STORAGE_ERROR".to_string(),
                    message: e.to_string(),
                    retryable: true,
                }
            }
        }
    }

    async fn fail(&self, session: &SharedBatchSession, error: String, started: Instant) -> BatchReport {
        let batch_id = {
            let mut s = session.write().await;
            s.fail(error.clone());
            s.batch_id
        };

        warn!(batch_id = %batch_id, error = %error, "Batch failed");
        self.emit(DiveLogEvent::BatchFailed {
            batch_id,
            error,
            timestamp: Utc::now(),
        });

        BatchReport::failed(batch_id, started.elapsed().as_millis() as u64)
    }

    fn emit_item_finished(&self, batch_id: Uuid, index: usize, name: &str, status: &BatchItemStatus) {
        let (record_id, is_usable, error) = match status {
            BatchItemStatus::Completed { record } => (Some(record.record_id()), Some(record.is_usable()), None),
            BatchItemStatus::Failed { message, .. } => (None, None, Some(message.clone())),
            BatchItemStatus::Cancelled => (None, None, None),
        };

        self.emit(DiveLogEvent::BatchItemFinished {
            batch_id,
            index,
            name: name.to_string(),
            status: status.label().to_string(),
            record_id,
            is_usable,
            error,
            timestamp: Utc::now(),
        });
    }

    fn emit(&self, event: DiveLogEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit_lossy(event);
        }
    }
}
