//! Image ingestion: image → [`RawExtraction`]
//!
//! [`ImageIngestor`] wraps whichever [`VisionEngine`] is configured and adds
//! the guarantees every engine call needs:
//! - format and size checks before any network traffic
//! - outbound rate limiting shared by all concurrent callers
//! - a hard timeout, reported as `EngineUnavailable`
//! - content-hash source image ids
//!
//! The ingestor never writes to any store.

pub mod image_format;
pub mod openai_vision;
pub mod prompts;
pub mod static_text;

pub use image_format::{ImageFormat, ImagePayload, PreparedImage};
pub use openai_vision::OpenAiVisionEngine;
pub use prompts::PromptProfiles;
pub use static_text::StaticTextEngine;

use chrono::Utc;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::VisionSettings;
use crate::types::{IngestError, RawExtraction, VisionEngine};

/// Engine wrapper producing [`RawExtraction`]s
pub struct ImageIngestor {
    engine: Arc<dyn VisionEngine>,
    limiter: DefaultDirectRateLimiter,
    timeout: Duration,
    max_image_bytes: usize,
}

impl ImageIngestor {
    pub fn new(engine: Arc<dyn VisionEngine>, settings: &VisionSettings) -> Self {
        let per_second = NonZeroU32::new(settings.requests_per_second).unwrap_or(NonZeroU32::MIN);
        Self {
            engine,
            limiter: RateLimiter::direct(Quota::per_second(per_second)),
            timeout: settings.timeout,
            max_image_bytes: settings.max_image_bytes,
        }
    }

    pub fn engine_name(&self) -> &'static str {
        self.engine.name()
    }

    /// Verify format and size without calling the engine
    pub fn prepare(&self, payload: &ImagePayload) -> Result<PreparedImage, IngestError> {
        PreparedImage::prepare(payload, self.max_image_bytes)
    }

    /// Verify, then extract
    pub async fn ingest(
        &self,
        payload: &ImagePayload,
        instruction: &str,
    ) -> Result<RawExtraction, IngestError> {
        let prepared = self.prepare(payload)?;
        self.ingest_prepared(&prepared, instruction).await
    }

    /// Extract text from an already verified image
    ///
    /// Safe to call repeatedly for retries: each call is independent.
    pub async fn ingest_prepared(
        &self,
        image: &PreparedImage,
        instruction: &str,
    ) -> Result<RawExtraction, IngestError> {
        self.limiter.until_ready().await;

        let started = Instant::now();
        let output = match tokio::time::timeout(
            self.timeout,
            self.engine.extract_text(image, instruction),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                warn!(
                    engine = self.engine.name(),
                    source_image_id = %image.source_image_id,
                    timeout_secs = self.timeout.as_secs_f32(),
                    "Vision engine call timed out"
                );
                return Err(IngestError::EngineUnavailable(format!(
                    "{} did not answer within {:?}",
                    self.engine.name(),
                    self.timeout
                )));
            }
        };

        let engine_confidence = output
            .confidence
            .filter(|c| c.is_finite())
            .map(|c| c.clamp(0.0, 1.0));

        debug!(
            engine = self.engine.name(),
            source_image_id = %image.source_image_id,
            text_length = output.text.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Image extraction complete"
        );

        Ok(RawExtraction {
            source_image_id: image.source_image_id.clone(),
            raw_text: output.text,
            engine_confidence,
            engine: self.engine.name().to_string(),
            extracted_at: Utc::now(),
        })
    }
}
