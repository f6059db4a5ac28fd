//! Deterministic engine for tests and offline pipeline checks
//!
//! Returns scripted responses in order, then a fixed default. It is never
//! selected by configuration: callers construct it explicitly.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::extractors::image_format::PreparedImage;
use crate::types::{EngineOutput, IngestError, VisionEngine};

pub struct StaticTextEngine {
    scripted: Mutex<VecDeque<Result<EngineOutput, IngestError>>>,
    default: Result<EngineOutput, IngestError>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl StaticTextEngine {
    /// Always return `text`
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            scripted: Mutex::new(VecDeque::new()),
            default: Ok(EngineOutput::text(text)),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Always fail with `error`
    pub fn failing(error: IngestError) -> Self {
        Self {
            scripted: Mutex::new(VecDeque::new()),
            default: Err(error),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Queue responses returned (in order) before the default
    pub fn with_script(self, script: Vec<Result<EngineOutput, IngestError>>) -> Self {
        if let Ok(mut queue) = self.scripted.lock() {
            queue.extend(script);
        }
        self
    }

    /// Sleep before answering each call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of `extract_text` calls so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VisionEngine for StaticTextEngine {
    fn name(&self) -> &'static str {
        "static-text"
    }

    async fn extract_text(
        &self,
        _image: &PreparedImage,
        _instruction: &str,
    ) -> Result<EngineOutput, IngestError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.scripted.lock().ok().and_then(|mut queue| queue.pop_front());
        scripted.unwrap_or_else(|| self.default.clone())
    }
}
