//! Core types and trait definitions for the dive metric pipeline
//!
//! Data flows strictly one way, one value per stage:
//! - [`RawExtraction`]: text returned by a vision/OCR engine for one image
//! - [`NormalizedMetrics`]: typed, unit-consistent values parsed from that text
//! - [`ValidatedDiveMetricRecord`]: metrics plus bounds warnings, ready to persist
//!
//! Extraction failures are errors ([`IngestError`]); parsing and validation
//! problems are data (null fields, warnings, `is_usable = false`).

use chrono::{DateTime, NaiveDate, Utc};
use divelog_common::human_time::format_optional_dive_time;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::extractors::image_format::PreparedImage;

// ============================================================================
// Ingestion
// ============================================================================

/// Unstructured output of one OCR/vision call
///
/// Created once per image; consumed by the normalizer. Not persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawExtraction {
    /// Lowercase hex SHA-256 of the image bytes
    pub source_image_id: String,
    /// Full text returned by the engine (may be empty)
    pub raw_text: String,
    /// Engine-reported confidence in [0, 1], if the engine reports one
    pub engine_confidence: Option<f32>,
    /// Name of the engine that produced the text
    pub engine: String,
    pub extracted_at: DateTime<Utc>,
}

/// What a [`VisionEngine`] returns for a single image
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineOutput {
    pub text: String,
    pub confidence: Option<f32>,
}

impl EngineOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            confidence: None,
        }
    }
}

/// Ingestion failure taxonomy
///
/// An image with no readable text is not an error: it yields an empty
/// `raw_text`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IngestError {
    /// Network, auth, rate-limit or timeout problem reaching the backend.
    /// Transient: callers may retry with backoff.
    #[error("Vision engine unavailable: {0}")]
    EngineUnavailable(String),

    /// The payload is not an image the backend accepts. Permanent.
    #[error("Unsupported image format: {0}")]
    UnsupportedImageFormat(String),
}

impl IngestError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, IngestError::EngineUnavailable(_))
    }

    /// Stable machine-readable code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            IngestError::EngineUnavailable(_) => "ENGINE_UNAVAILABLE",
            IngestError::UnsupportedImageFormat(_) => "UNSUPPORTED_IMAGE_FORMAT",
        }
    }
}

/// OCR or vision-language backend
///
/// Implementations only talk to their backend; they never write to a store.
/// Timeouts and rate limiting are applied by the caller
/// ([`crate::extractors::ImageIngestor`]).
#[async_trait::async_trait]
pub trait VisionEngine: Send + Sync {
    /// Engine name recorded on every extraction
    fn name(&self) -> &'static str;

    /// Transcribe the text visible in `image`, guided by `instruction`
    async fn extract_text(
        &self,
        image: &PreparedImage,
        instruction: &str,
    ) -> Result<EngineOutput, IngestError>;
}

// ============================================================================
// Normalization
// ============================================================================

/// Qualitative confidence of one extracted field
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceTag {
    #[default]
    Absent,
    Low,
    Medium,
    High,
}

impl ConfidenceTag {
    /// One level lower; `Low` and `Absent` stay where they are
    pub fn downgraded(self) -> Self {
        match self {
            ConfidenceTag::High => ConfidenceTag::Medium,
            ConfidenceTag::Medium => ConfidenceTag::Low,
            other => other,
        }
    }
}

/// Per-field confidence, each field scored independently
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldConfidence {
    pub max_depth_meters: ConfidenceTag,
    pub dive_time_seconds: ConfidenceTag,
    pub water_temperature_celsius: ConfidenceTag,
    pub dive_date: ConfidenceTag,
}

/// Typed dive measurements parsed from one [`RawExtraction`]
///
/// Every field is independently nullable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedMetrics {
    pub source_image_id: String,
    pub max_depth_meters: Option<f64>,
    pub dive_time_seconds: Option<u32>,
    pub water_temperature_celsius: Option<f64>,
    pub dive_date: Option<NaiveDate>,
    pub field_confidence: FieldConfidence,
}

impl NormalizedMetrics {
    /// Metrics with every field null and every confidence absent
    pub fn empty(source_image_id: impl Into<String>) -> Self {
        Self {
            source_image_id: source_image_id.into(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.max_depth_meters.is_none()
            && self.dive_time_seconds.is_none()
            && self.water_temperature_celsius.is_none()
            && self.dive_date.is_none()
    }
}

// ============================================================================
// Validation
// ============================================================================

/// Persistence-ready dive metric record
///
/// Only the validator constructs records, and nothing mutates them afterwards.
/// A correction produces a new record whose `supersedes` points at the old one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatedDiveMetricRecord {
    record_id: Uuid,
    source_image_id: String,
    created_at: DateTime<Utc>,
    supersedes: Option<Uuid>,
    max_depth_meters: Option<f64>,
    dive_time_seconds: Option<u32>,
    /// `M:SS` display form of `dive_time_seconds`
    dive_time_formatted: Option<String>,
    water_temperature_celsius: Option<f64>,
    dive_date: Option<NaiveDate>,
    field_confidence: FieldConfidence,
    validation_warnings: Vec<String>,
    is_usable: bool,
}

impl ValidatedDiveMetricRecord {
    pub(crate) fn assemble(
        metrics: NormalizedMetrics,
        validation_warnings: Vec<String>,
        is_usable: bool,
        supersedes: Option<Uuid>,
    ) -> Self {
        Self {
            record_id: Uuid::new_v4(),
            source_image_id: metrics.source_image_id,
            created_at: Utc::now(),
            supersedes,
            max_depth_meters: metrics.max_depth_meters,
            dive_time_seconds: metrics.dive_time_seconds,
            dive_time_formatted: format_optional_dive_time(metrics.dive_time_seconds),
            water_temperature_celsius: metrics.water_temperature_celsius,
            dive_date: metrics.dive_date,
            field_confidence: metrics.field_confidence,
            validation_warnings,
            is_usable,
        }
    }

    pub fn record_id(&self) -> Uuid {
        self.record_id
    }

    pub fn source_image_id(&self) -> &str {
        &self.source_image_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn supersedes(&self) -> Option<Uuid> {
        self.supersedes
    }

    pub fn max_depth_meters(&self) -> Option<f64> {
        self.max_depth_meters
    }

    pub fn dive_time_seconds(&self) -> Option<u32> {
        self.dive_time_seconds
    }

    pub fn dive_time_formatted(&self) -> Option<&str> {
        self.dive_time_formatted.as_deref()
    }

    pub fn water_temperature_celsius(&self) -> Option<f64> {
        self.water_temperature_celsius
    }

    pub fn dive_date(&self) -> Option<NaiveDate> {
        self.dive_date
    }

    pub fn field_confidence(&self) -> &FieldConfidence {
        &self.field_confidence
    }

    pub fn validation_warnings(&self) -> &[String] {
        &self.validation_warnings
    }

    pub fn is_usable(&self) -> bool {
        self.is_usable
    }

    /// The metric values of this record, for re-validation
    pub fn metrics(&self) -> NormalizedMetrics {
        NormalizedMetrics {
            source_image_id: self.source_image_id.clone(),
            max_depth_meters: self.max_depth_meters,
            dive_time_seconds: self.dive_time_seconds,
            water_temperature_celsius: self.water_temperature_celsius,
            dive_date: self.dive_date,
            field_confidence: self.field_confidence,
        }
    }
}

/// User-supplied corrections; `None` keeps the original value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricCorrection {
    pub max_depth_meters: Option<f64>,
    pub dive_time_seconds: Option<u32>,
    pub water_temperature_celsius: Option<f64>,
    pub dive_date: Option<NaiveDate>,
}

impl MetricCorrection {
    pub fn is_empty(&self) -> bool {
        self.max_depth_meters.is_none()
            && self.dive_time_seconds.is_none()
            && self.water_temperature_celsius.is_none()
            && self.dive_date.is_none()
    }

    /// Apply on top of `metrics`; corrected fields become high confidence
    pub fn apply_to(&self, mut metrics: NormalizedMetrics) -> NormalizedMetrics {
        if let Some(depth) = self.max_depth_meters {
            metrics.max_depth_meters = Some(depth);
            metrics.field_confidence.max_depth_meters = ConfidenceTag::High;
        }
        if let Some(seconds) = self.dive_time_seconds {
            metrics.dive_time_seconds = Some(seconds);
            metrics.field_confidence.dive_time_seconds = ConfidenceTag::High;
        }
        if let Some(temp) = self.water_temperature_celsius {
            metrics.water_temperature_celsius = Some(temp);
            metrics.field_confidence.water_temperature_celsius = ConfidenceTag::High;
        }
        if let Some(date) = self.dive_date {
            metrics.dive_date = Some(date);
            metrics.field_confidence.dive_date = ConfidenceTag::High;
        }
        metrics
    }
}
