//! Configuration resolution for divelog-ai
//!
//! TOML sections are turned into typed settings with defaults here. The
//! vision API key uses 3-tier resolution with Database → ENV → TOML priority.

use divelog_common::config::{BatchSection, TomlConfig, VisionSection};
use divelog_common::{Error, Result};
use sqlx::{Pool, Sqlite};
use std::time::Duration;
use tracing::{info, warn};

use crate::extractors::PromptProfiles;
use crate::utils::retry::RetryPolicy;

/// Environment variable holding the vision API key
pub const VISION_API_KEY_ENV: &str = "DIVELOG_VISION_API_KEY";

pub const DEFAULT_VISION_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_VISION_MODEL: &str = "gpt-4o";
pub const DEFAULT_VISION_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_REQUESTS_PER_SECOND: u32 = 5;
pub const DEFAULT_MAX_IMAGE_BYTES: usize = 20 * 1024 * 1024;
pub const DEFAULT_MAX_TOKENS: u32 = 800;

pub const DEFAULT_BATCH_WORKERS: usize = 4;
pub const MAX_BATCH_WORKERS: usize = 8;
pub const DEFAULT_RETAINED_SESSIONS: usize = 100;

/// Vision backend settings
#[derive(Debug, Clone, PartialEq)]
pub struct VisionSettings {
    pub base_url: String,
    pub model: String,
    /// Per-call timeout; expiry counts as `EngineUnavailable`
    pub timeout: Duration,
    pub requests_per_second: u32,
    pub max_image_bytes: usize,
    pub max_tokens: u32,
}

impl Default for VisionSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_VISION_BASE_URL.to_string(),
            model: DEFAULT_VISION_MODEL.to_string(),
            timeout: DEFAULT_VISION_TIMEOUT,
            requests_per_second: DEFAULT_REQUESTS_PER_SECOND,
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

impl VisionSettings {
    pub fn from_section(section: &VisionSection) -> Self {
        let defaults = Self::default();
        Self {
            base_url: section.base_url.clone().unwrap_or(defaults.base_url),
            model: section.model.clone().unwrap_or(defaults.model),
            timeout: section
                .timeout_secs
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            requests_per_second: section
                .requests_per_second
                .filter(|rps| *rps > 0)
                .unwrap_or(defaults.requests_per_second),
            max_image_bytes: section
                .max_image_bytes
                .filter(|bytes| *bytes > 0)
                .unwrap_or(defaults.max_image_bytes),
            max_tokens: defaults.max_tokens,
        }
    }
}

/// Batch processing settings
#[derive(Debug, Clone, PartialEq)]
pub struct BatchSettings {
    /// Concurrent images in flight (1-8)
    pub workers: usize,
    pub retry: RetryPolicy,
    /// Finished sessions kept in memory; the oldest are dropped beyond this
    pub retained_sessions: usize,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            workers: DEFAULT_BATCH_WORKERS,
            retry: RetryPolicy::default(),
            retained_sessions: DEFAULT_RETAINED_SESSIONS,
        }
    }
}

impl BatchSettings {
    pub fn from_section(section: &BatchSection) -> Self {
        let defaults = Self::default();
        let workers = section.workers.unwrap_or(defaults.workers);
        if !(1..=MAX_BATCH_WORKERS).contains(&workers) {
            warn!(
                workers,
                "Batch worker count out of range, clamping to 1..={}", MAX_BATCH_WORKERS
            );
        }

        Self {
            workers: workers.clamp(1, MAX_BATCH_WORKERS),
            retry: RetryPolicy {
                max_retries: section.max_retries.unwrap_or(defaults.retry.max_retries),
                base_delay: section
                    .base_backoff_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.retry.base_delay),
                max_delay: section
                    .max_backoff_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.retry.max_delay),
            },
            retained_sessions: section
                .retained_sessions
                .filter(|n| *n > 0)
                .unwrap_or(defaults.retained_sessions),
        }
    }
}

/// All typed settings of the service
#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    pub vision: VisionSettings,
    pub batch: BatchSettings,
    pub prompts: PromptProfiles,
}

impl ServiceConfig {
    pub fn from_toml(config: &TomlConfig) -> Self {
        Self {
            vision: VisionSettings::from_section(&config.vision),
            batch: BatchSettings::from_section(&config.batch),
            prompts: PromptProfiles::from_section(&config.prompts),
        }
    }
}

/// Resolve the vision API key from 3-tier configuration
///
/// **Priority:** Database → ENV → TOML
pub async fn resolve_vision_api_key(db: &Pool<Sqlite>, toml_config: &TomlConfig) -> Result<String> {
    let db_key = crate::db::settings::get_vision_api_key(db)
        .await?
        .filter(|k| is_valid_key(k));
    let env_key = std::env::var(VISION_API_KEY_ENV)
        .ok()
        .filter(|k| is_valid_key(k));
    let toml_key = toml_config
        .vision
        .api_key
        .clone()
        .filter(|k| is_valid_key(k));

    let sources: Vec<&str> = [
        db_key.as_ref().map(|_| "database"),
        env_key.as_ref().map(|_| "environment"),
        toml_key.as_ref().map(|_| "TOML"),
    ]
    .into_iter()
    .flatten()
    .collect();

    // Warn if multiple sources (potential misconfiguration)
    if sources.len() > 1 {
        warn!(
            "Vision API key found in multiple sources: {}. Using {} (highest priority).",
            sources.join(", "),
            sources[0]
        );
    }

    if let Some(key) = db_key {
        info!("Vision API key loaded from database");
        return Ok(key);
    }
    if let Some(key) = env_key {
        info!("Vision API key loaded from environment variable");
        return Ok(key);
    }
    if let Some(key) = toml_key {
        info!("Vision API key loaded from TOML config");
        return Ok(key);
    }

    Err(Error::Config(format!(
        "Vision API key not configured. Please configure using one of:\n\
         1. CLI: divelog-ai set-vision-key <key>\n\
         2. Environment: {}=your-key-here\n\
         3. TOML config: ~/.config/divelog/divelog-ai.toml ([vision] api_key = \"your-key\")",
        VISION_API_KEY_ENV
    )))
}

/// Validate API key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}
