//! Event types and EventBus for divelog services
//!
//! Events are broadcast via [`EventBus`] and serialized for SSE transmission.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Divelog event types
///
/// All events carry the timestamp at which they were emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DiveLogEvent {
    /// Batch of dive images accepted for processing
    BatchStarted {
        batch_id: Uuid,
        total: usize,
        timestamp: DateTime<Utc>,
    },

    /// One batch item reached a terminal outcome
    BatchItemFinished {
        batch_id: Uuid,
        /// Position of the item in the submitted batch
        index: usize,
        /// Display name of the image (file name or caller-supplied label)
        name: String,
        /// "completed", "failed" or "cancelled"
        status: String,
        record_id: Option<Uuid>,
        is_usable: Option<bool>,
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// Aggregate progress of a running batch
    BatchProgress {
        batch_id: Uuid,
        processed: usize,
        total: usize,
        /// Progress percentage (0.0-100.0)
        percentage: f32,
        timestamp: DateTime<Utc>,
    },

    /// Batch finished with every dispatched item processed
    BatchCompleted {
        batch_id: Uuid,
        succeeded: usize,
        failed: usize,
        usable: usize,
        elapsed_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// Batch stopped dispatching after a cancellation request
    BatchCancelled {
        batch_id: Uuid,
        processed: usize,
        skipped: usize,
        timestamp: DateTime<Utc>,
    },

    /// Batch aborted before processing (e.g. folder scan failed)
    BatchFailed {
        batch_id: Uuid,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// A dive metric record was appended to the record store
    RecordStored {
        record_id: Uuid,
        owner_id: String,
        supersedes: Option<Uuid>,
        timestamp: DateTime<Utc>,
    },
}

impl DiveLogEvent {
    /// Event name used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            DiveLogEvent::BatchStarted { .. } => "BatchStarted",
            DiveLogEvent::BatchItemFinished { .. } => "BatchItemFinished",
            DiveLogEvent::BatchProgress { .. } => "BatchProgress",
            DiveLogEvent::BatchCompleted { .. } => "BatchCompleted",
            DiveLogEvent::BatchCancelled { .. } => "BatchCancelled",
            DiveLogEvent::BatchFailed { .. } => "BatchFailed",
            DiveLogEvent::RecordStored { .. } => "RecordStored",
        }
    }

    /// Batch this event belongs to, if any
    pub fn batch_id(&self) -> Option<Uuid> {
        match self {
            DiveLogEvent::BatchStarted { batch_id, .. }
            | DiveLogEvent::BatchItemFinished { batch_id, .. }
            | DiveLogEvent::BatchProgress { batch_id, .. }
            | DiveLogEvent::BatchCompleted { batch_id, .. }
            | DiveLogEvent::BatchCancelled { batch_id, .. }
            | DiveLogEvent::BatchFailed { batch_id, .. } => Some(*batch_id),
            DiveLogEvent::RecordStored { .. } => None,
        }
    }
}

/// Central event distribution bus
///
/// Uses `tokio::broadcast` internally:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DiveLogEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// ```
    /// use divelog_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(100);
    /// assert_eq!(event_bus.capacity(), 100);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<DiveLogEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: DiveLogEvent,
    ) -> Result<usize, broadcast::error::SendError<DiveLogEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: DiveLogEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
