// Generation client - sends requests to the external image generation service

use super::error::{GenerationError, Result};
use super::types::GenerationRequest;
use crate::config::GeminiConfig;
use async_trait::async_trait;
use base64::Engine;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Sends one request to the generative service and returns the encoded image.
///
/// Implementations make exactly one attempt per call: no retries, no caching.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GenerationClient: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

/// Client for the Gemini `generateContent` endpoint
pub struct GeminiClient {
    config: GeminiConfig,
    client: reqwest::Client,
}

impl GeminiClient {
    /// Create a client with the given configuration
    pub fn with_config(config: GeminiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GenerationError::Transport(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &GeminiConfig {
        &self.config
    }

    fn url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.endpoint.trim_end_matches('/'),
            self.config.model
        )
    }
}

#[async_trait]
impl GenerationClient for GeminiClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let body = build_body(request);

        tracing::info!(
            "Requesting composite from {} ({} item image(s))",
            self.config.model,
            request.item_encodings().len()
        );

        let mut call = self.client.post(self.url()).json(&body);
        if let Some(key) = &self.config.api_key {
            call = call.header("x-goog-api-key", key);
        }

        let response = call.send().await?;
        let status = response.status();
        let text = response.text().await?;

        interpret(status, &text)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", alias = "inline_data")]
    inline_data: Option<InlineData>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[serde(alias = "mime_type")]
    mime_type: String,
    data: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    status: Option<String>,
}

/// Subject first, then items in order, then the instruction
fn build_body(request: &GenerationRequest) -> GenerateContentRequest {
    let mut parts = Vec::with_capacity(request.item_encodings().len() + 2);

    for encoding in std::iter::once(request.person_encoding())
        .chain(request.item_encodings().iter().map(String::as_str))
    {
        parts.push(Part {
            inline_data: Some(InlineData {
                mime_type: sniff_mime_type(encoding).to_string(),
                data: encoding.to_string(),
            }),
            ..Default::default()
        });
    }

    parts.push(Part {
        text: Some(request.instruction().to_string()),
        ..Default::default()
    });

    GenerateContentRequest {
        contents: vec![Content {
            role: Some("user".to_string()),
            parts,
        }],
        generation_config: GenerationConfig {
            response_modalities: vec!["IMAGE".to_string(), "TEXT".to_string()],
        },
    }
}

/// Guess the mime type from the first decoded bytes of an encoding
fn sniff_mime_type(encoding: &str) -> &'static str {
    // 16 base64 chars decode to 12 bytes, enough for every magic number we check
    let head = encoding.get(..16).unwrap_or(encoding);
    base64::engine::general_purpose::STANDARD
        .decode(head)
        .ok()
        .and_then(|bytes| image::guess_format(&bytes).ok())
        .map(|format| format.to_mime_type())
        .unwrap_or("image/png")
}

/// Apply the service's response contract to a raw HTTP response
fn interpret(status: StatusCode, body: &str) -> Result<String> {
    if !status.is_success() {
        if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(body) {
            let ErrorBody { message, status: code } = envelope.error;
            tracing::warn!("Service rejected request ({}): {}", status, message);
            return Err(GenerationError::Service(match (message.is_empty(), code) {
                (true, Some(code)) => code,
                _ => message,
            }));
        }
        return Err(GenerationError::Transport(format!("unexpected status {}", status)));
    }

    let response: GenerateContentResponse = serde_json::from_str(body)
        .map_err(|e| GenerationError::Service(format!("malformed response: {}", e)))?;

    extract_image(response)
}

fn extract_image(response: GenerateContentResponse) -> Result<String> {
    if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(GenerationError::Service(format!("request blocked: {}", reason)));
    }

    let mut notes = Vec::new();
    let mut finish_reason = None;

    for candidate in response.candidates {
        if finish_reason.is_none() {
            finish_reason = candidate.finish_reason;
        }
        for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
            if let Some(inline) = part.inline_data {
                if !inline.data.is_empty() {
                    return Ok(inline.data);
                }
            }
            if let Some(text) = part.text {
                if !text.trim().is_empty() {
                    notes.push(text);
                }
            }
        }
    }

    // Models explain refusals in a text part
    let message = if !notes.is_empty() {
        notes.join("\n")
    } else if let Some(reason) = finish_reason {
        format!("response contained no image data (finish reason: {})", reason)
    } else {
        "response contained no image data".to_string()
    };
    Err(GenerationError::Service(message))
}
