//! Test Helper Utilities
//!
//! Shared utilities for testing divelog-ai

#![allow(dead_code)]

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use divelog_ai::config::{BatchSettings, VisionSettings};
use divelog_ai::extractors::{ImageIngestor, PromptProfiles, StaticTextEngine};
use divelog_ai::utils::RetryPolicy;
use divelog_ai::workflow::DiveMetricPipeline;
use divelog_ai::AppState;
use divelog_common::events::EventBus;
use std::sync::Arc;
use std::time::Duration;

/// Smallest byte sequence recognized as PNG
pub const PNG_HEADER: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44, 0x52,
];

pub const JPEG_HEADER: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46, 0x49, 0x46];

/// Recognized by magic bytes, but not an image
pub const PDF_HEADER: &[u8] = b"%PDF-1.7\n%\xE2\xE3\xCF\xD3\n";

/// PNG bytes made unique by a trailing tag (distinct source image ids)
pub fn png(tag: &str) -> Vec<u8> {
    let mut bytes = PNG_HEADER.to_vec();
    bytes.extend_from_slice(tag.as_bytes());
    bytes
}

pub fn base64(bytes: &[u8]) -> String {
    BASE64_STANDARD.encode(bytes)
}

/// Vision settings without a meaningful rate limit
pub fn fast_vision_settings() -> VisionSettings {
    VisionSettings {
        requests_per_second: 1000,
        ..VisionSettings::default()
    }
}

/// Batch settings with millisecond backoff
pub fn fast_batch_settings(workers: usize) -> BatchSettings {
    BatchSettings {
        workers,
        retry: RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        },
        retained_sessions: 100,
    }
}

pub fn pipeline_for(engine: Arc<StaticTextEngine>) -> Arc<DiveMetricPipeline> {
    let ingestor = ImageIngestor::new(engine, &fast_vision_settings());
    Arc::new(DiveMetricPipeline::new(ingestor, PromptProfiles::builtin()))
}

/// App state over an in-memory database and `engine`
pub async fn test_state(engine: Option<Arc<StaticTextEngine>>) -> AppState {
    let pool = divelog_ai::db::init_in_memory_pool()
        .await
        .expect("Failed to create in-memory database");
    let state = AppState::new(pool, EventBus::new(100)).with_batch_settings(fast_batch_settings(1));

    match engine {
        Some(engine) => state.with_pipeline(pipeline_for(engine)),
        None => state,
    }
}
