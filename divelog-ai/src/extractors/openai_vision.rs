//! OpenAI-compatible vision engine
//!
//! Sends the image as a base64 `data:` URL inside a chat-completions request
//! and returns the assistant's transcription as raw text.
//!
//! # API Reference
//! - Endpoint: `{base_url}/chat/completions`
//! - Any OpenAI-compatible server works (set `vision.base_url`).

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::VisionSettings;
use crate::extractors::image_format::PreparedImage;
use crate::types::{EngineOutput, IngestError, VisionEngine};

/// Chat-completions vision client
pub struct OpenAiVisionEngine {
    http_client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl OpenAiVisionEngine {
    /// Create a client; the HTTP timeout matches the configured call timeout
    pub fn new(api_key: String, settings: &VisionSettings) -> Result<Self, IngestError> {
        let http_client = Client::builder()
            .timeout(settings.timeout)
            .user_agent(concat!("divelog-ai/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                IngestError::EngineUnavailable(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            http_client,
            endpoint: format!("{}/chat/completions", settings.base_url.trim_end_matches('/')),
            api_key,
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn build_request<'a>(&'a self, image: &PreparedImage, instruction: &'a str) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            temperature: 0.0,
            messages: vec![ChatMessage {
                role: "user",
                content: vec![
                    ContentPart::Text { text: instruction },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: image.to_data_url(),
                            detail: "high",
                        },
                    },
                ],
            }],
        }
    }
}

#[async_trait]
impl VisionEngine for OpenAiVisionEngine {
    fn name(&self) -> &'static str {
        "openai-vision"
    }

    async fn extract_text(
        &self,
        image: &PreparedImage,
        instruction: &str,
    ) -> Result<EngineOutput, IngestError> {
        debug!(
            model = %self.model,
            image_bytes = image.bytes.len(),
            mime_type = image.format.mime_type(),
            "Querying vision API"
        );

        let response = self
            .http_client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&self.build_request(image, instruction))
            .send()
            .await
            .map_err(|e| IngestError::EngineUnavailable(format!("Vision API request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let error = classify_status(status, &body);
            warn!(status = %status, error = %error, "Vision API returned an error");
            return Err(error);
        }

        let completion: ChatResponse = response.json().await.map_err(|e| {
            IngestError::EngineUnavailable(format!("Failed to parse vision API response: {}", e))
        })?;

        let text = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();

        debug!(text_length = text.len(), "Vision API transcription received");
        Ok(EngineOutput::text(text))
    }
}

/// Map a non-success HTTP status to the ingestion error taxonomy
///
/// 413/415/422 reject the payload outright. A 400 is an image rejection only
/// when the error body points at the image; other 400s (unknown model,
/// malformed request) are configuration faults and count as the engine
/// being unavailable, as do auth, throttling and server faults.
pub fn classify_status(status: StatusCode, body: &str) -> IngestError {
    let detail = body.chars().take(200).collect::<String>();
    let image_rejected = match status {
        StatusCode::PAYLOAD_TOO_LARGE
        | StatusCode::UNSUPPORTED_MEDIA_TYPE
        | StatusCode::UNPROCESSABLE_ENTITY => true,
        StatusCode::BAD_REQUEST => is_image_error(body),
        _ => false,
    };

    if image_rejected {
        IngestError::UnsupportedImageFormat(format!(
            "vision API rejected the image ({}): {}",
            status, detail
        ))
    } else {
        IngestError::EngineUnavailable(format!("vision API returned {}: {}", status, detail))
    }
}

/// Whether an error body blames the submitted image
fn is_image_error(body: &str) -> bool {
    let Ok(envelope) = serde_json::from_str::<ApiErrorEnvelope>(body) else {
        return false;
    };
    let error = envelope.error;

    let code_or_param = [error.code.as_deref(), error.param.as_deref()];
    if code_or_param.iter().flatten().any(|v| v.contains("image")) {
        return true;
    }
    error
        .message
        .as_deref()
        .is_some_and(|m| m.to_ascii_lowercase().contains("image"))
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: Option<String>,
    code: Option<String>,
    param: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: Vec<ContentPart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
    detail: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}
