//! Batch session state machine
//!
//! RUNNING → COMPLETED | CANCELLED | FAILED
//!
//! Sessions live in service memory only; the records they produce are what
//! gets persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{IngestError, ValidatedDiveMetricRecord};

/// Batch lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BatchState {
    /// Images are being extracted/normalized
    Running,
    /// Every dispatched image reached an outcome
    Completed,
    /// Stopped dispatching after a cancellation request
    Cancelled,
    /// Aborted before processing could start
    Failed,
}

impl BatchState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, BatchState::Running)
    }
}

/// State transition record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateTransition {
    pub batch_id: Uuid,
    pub old_state: BatchState,
    pub new_state: BatchState,
    pub transitioned_at: DateTime<Utc>,
}

/// Final status of one image in a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum BatchItemStatus {
    Completed {
        record: ValidatedDiveMetricRecord,
    },
    Failed {
        code: String,
        message: String,
        retryable: bool,
    },
    /// Never dispatched because the batch was cancelled
    Cancelled,
}

impl BatchItemStatus {
    pub fn from_ingest_error(err: &IngestError) -> Self {
        BatchItemStatus::Failed {
            code: err.code().to_string(),
            message: err.to_string(),
            retryable: err.is_retryable(),
        }
    }

    /// Label used in events: "completed", "failed" or "cancelled"
    pub fn label(&self) -> &'static str {
        match self {
            BatchItemStatus::Completed { .. } => "completed",
            BatchItemStatus::Failed { .. } => "failed",
            BatchItemStatus::Cancelled => "cancelled",
        }
    }

    pub fn record(&self) -> Option<&ValidatedDiveMetricRecord> {
        match self {
            BatchItemStatus::Completed { record } => Some(record),
            _ => None,
        }
    }
}

/// Outcome of one submitted image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItemOutcome {
    /// Position in the submitted batch
    pub index: usize,
    pub name: String,
    #[serde(flatten)]
    pub status: BatchItemStatus,
}

/// Progress counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchProgress {
    /// Images that finished extraction (successfully or not)
    pub processed: usize,
    pub total: usize,
    /// Percentage complete (0.0 - 100.0)
    pub percentage: f64,
}

/// Summary returned when a batch finishes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub state: BatchState,
    /// Ordered by `index`
    pub items: Vec<BatchItemOutcome>,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Completed items whose record is usable
    pub usable: usize,
    pub elapsed_ms: u64,
}

impl BatchReport {
    pub fn new(batch_id: Uuid, mut items: Vec<BatchItemOutcome>, elapsed_ms: u64) -> Self {
        items.sort_by_key(|item| item.index);

        let mut succeeded = 0;
        let mut failed = 0;
        let mut cancelled = 0;
        let mut usable = 0;
        for item in &items {
            match &item.status {
                BatchItemStatus::Completed { record } => {
                    succeeded += 1;
                    if record.is_usable() {
                        usable += 1;
                    }
                }
                BatchItemStatus::Failed { .. } => failed += 1,
                BatchItemStatus::Cancelled => cancelled += 1,
            }
        }

        let state = if cancelled > 0 {
            BatchState::Cancelled
        } else {
            BatchState::Completed
        };

        Self {
            batch_id,
            state,
            items,
            succeeded,
            failed,
            cancelled,
            usable,
            elapsed_ms,
        }
    }

    /// Report for a batch that failed before any image was dispatched
    pub fn failed(batch_id: Uuid, elapsed_ms: u64) -> Self {
        Self {
            batch_id,
            state: BatchState::Failed,
            items: Vec::new(),
            succeeded: 0,
            failed: 0,
            cancelled: 0,
            usable: 0,
            elapsed_ms,
        }
    }
}

/// Batch session (in-memory state)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSession {
    pub batch_id: Uuid,
    pub state: BatchState,
    /// "inline" for uploaded images, otherwise the scanned folder
    pub source: String,
    pub owner_id: Option<String>,
    pub progress: BatchProgress,
    /// Filled in once the batch finishes
    pub items: Vec<BatchItemOutcome>,
    /// Reason for the FAILED state
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl BatchSession {
    pub fn new(source: impl Into<String>, owner_id: Option<String>) -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            state: BatchState::Running,
            source: source.into(),
            owner_id,
            progress: BatchProgress::default(),
            items: Vec::new(),
            error: None,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Transition to new state
    pub fn transition_to(&mut self, new_state: BatchState) -> StateTransition {
        let transition = StateTransition {
            batch_id: self.batch_id,
            old_state: self.state,
            new_state,
            transitioned_at: Utc::now(),
        };
        self.state = new_state;

        if new_state.is_terminal() {
            self.ended_at = Some(Utc::now());
        }

        transition
    }

    pub fn update_progress(&mut self, processed: usize, total: usize) {
        self.progress.processed = processed;
        self.progress.total = total;
        self.progress.percentage = if total > 0 {
            (processed as f64 / total as f64) * 100.0
        } else {
            0.0
        };
    }

    /// Store the final report and move to its terminal state
    pub fn finish(&mut self, report: &BatchReport) -> StateTransition {
        self.items = report.items.clone();
        self.transition_to(report.state)
    }

    /// Mark the batch as failed before any image was processed
    pub fn fail(&mut self, error: impl Into<String>) -> StateTransition {
        self.error = Some(error.into());
        self.transition_to(BatchState::Failed)
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}
