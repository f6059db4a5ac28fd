//! Single-image pipeline: ingest → normalize → validate
//!
//! Stages run strictly in sequence with one value handed forward each time.
//! The only suspension point is the vision engine call inside ingestion.

use chrono::{Local, NaiveDate};
use std::sync::Arc;
use tracing::info;

use crate::config::ServiceConfig;
use crate::extractors::{ImageIngestor, ImagePayload, PreparedImage, PromptProfiles};
use crate::normalizer::{self, NormalizationContext};
use crate::types::{IngestError, RawExtraction, ValidatedDiveMetricRecord, VisionEngine};
use crate::validators::MetricValidator;

/// One configured extraction pipeline, shared by single requests and batches
pub struct DiveMetricPipeline {
    ingestor: ImageIngestor,
    prompts: PromptProfiles,
    validator: MetricValidator,
}

impl DiveMetricPipeline {
    pub fn new(ingestor: ImageIngestor, prompts: PromptProfiles) -> Self {
        Self {
            ingestor,
            prompts,
            validator: MetricValidator::new(),
        }
    }

    /// Pipeline over `engine` using the service settings
    pub fn from_engine(engine: Arc<dyn VisionEngine>, config: &ServiceConfig) -> Self {
        Self::new(
            ImageIngestor::new(engine, &config.vision),
            config.prompts.clone(),
        )
    }

    pub fn with_validator(mut self, validator: MetricValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn ingestor(&self) -> &ImageIngestor {
        &self.ingestor
    }

    pub fn validator(&self) -> &MetricValidator {
        &self.validator
    }

    /// Engine instruction for an optional caller prompt hint
    pub fn instruction_for(&self, prompt_hint: Option<&str>) -> String {
        self.prompts.instruction_for(prompt_hint)
    }

    /// Analyze one image against today's local date
    ///
    /// Not retried: `EngineUnavailable` goes straight back to the caller.
    pub async fn analyze(
        &self,
        payload: &ImagePayload,
        prompt_hint: Option<&str>,
    ) -> Result<ValidatedDiveMetricRecord, IngestError> {
        self.analyze_on(payload, prompt_hint, Local::now().date_naive()).await
    }

    /// Analyze one image with an explicit processing date
    pub async fn analyze_on(
        &self,
        payload: &ImagePayload,
        prompt_hint: Option<&str>,
        today: NaiveDate,
    ) -> Result<ValidatedDiveMetricRecord, IngestError> {
        let image = self.ingestor.prepare(payload)?;
        let instruction = self.instruction_for(prompt_hint);
        let raw = self.extract(&image, &instruction).await?;
        let record = self.finish(&raw, &NormalizationContext::standalone(), today);

        info!(
            record_id = %record.record_id(),
            source_image_id = %record.source_image_id(),
            is_usable = record.is_usable(),
            warnings = record.validation_warnings().len(),
            "Dive image analyzed"
        );

        Ok(record)
    }

    /// Ingestion stage for an already verified image
    pub async fn extract(
        &self,
        image: &PreparedImage,
        instruction: &str,
    ) -> Result<RawExtraction, IngestError> {
        self.ingestor.ingest_prepared(image, instruction).await
    }

    /// Normalization and validation stages
    pub fn finish(
        &self,
        raw: &RawExtraction,
        ctx: &NormalizationContext,
        today: NaiveDate,
    ) -> ValidatedDiveMetricRecord {
        let metrics = normalizer::normalize(raw, ctx);
        self.validator.validate(metrics, today)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VisionSettings;
    use crate::extractors::image_format::fixtures::{PDF_HEADER, PNG_HEADER};
    use crate::extractors::StaticTextEngine;

    fn pipeline(engine: StaticTextEngine) -> (DiveMetricPipeline, Arc<StaticTextEngine>) {
        let engine = Arc::new(engine);
        let settings = VisionSettings {
            requests_per_second: 1000,
            ..VisionSettings::default()
        };
        let ingestor = ImageIngestor::new(engine.clone(), &settings);
        (DiveMetricPipeline::new(ingestor, PromptProfiles::builtin()), engine)
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    #[tokio::test]
    async fn test_clean_extraction_end_to_end() {
        let (pipeline, _) = pipeline(StaticTextEngine::new(
            "Max Depth: 45.2m  Dive Time: 02:15  Temp: 27°C  Date: 07/15/2023",
        ));

        let record = pipeline
            .analyze_on(&ImagePayload::from_bytes(PNG_HEADER.to_vec()), None, today())
            .await
            .unwrap();

        assert_eq!(record.max_depth_meters(), Some(45.2));
        assert_eq!(record.dive_time_seconds(), Some(135));
        assert_eq!(record.dive_time_formatted(), Some("2:15"));
        assert_eq!(record.water_temperature_celsius(), Some(27.0));
        assert_eq!(record.dive_date(), NaiveDate::from_ymd_opt(2023, 7, 15));
        assert!(record.is_usable());
        assert!(record.validation_warnings().is_empty());
    }

    #[tokio::test]
    async fn test_empty_ocr_is_not_an_error() {
        let (pipeline, _) = pipeline(StaticTextEngine::new(""));

        let record = pipeline
            .analyze_on(&ImagePayload::from_bytes(PNG_HEADER.to_vec()), None, today())
            .await
            .unwrap();

        assert!(!record.is_usable());
        assert_eq!(record.max_depth_meters(), None);
        assert_eq!(record.dive_time_seconds(), None);
    }

    #[tokio::test]
    async fn test_unsupported_format_skips_engine() {
        let (pipeline, engine) = pipeline(StaticTextEngine::new("45 m"));

        let err = pipeline
            .analyze_on(&ImagePayload::from_bytes(PDF_HEADER.to_vec()), None, today())
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::UnsupportedImageFormat(_)));
        assert_eq!(engine.calls(), 0);
    }

    #[tokio::test]
    async fn test_engine_unavailable_is_not_retried() {
        let (pipeline, engine) = pipeline(StaticTextEngine::failing(
            IngestError::EngineUnavailable("HTTP 503".to_string()),
        ));

        let err = pipeline
            .analyze(&ImagePayload::from_bytes(PNG_HEADER.to_vec()), Some("logbook"))
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(engine.calls(), 1);
    }
}
