//! Direct HTTPS transport for OpenAI-compatible chat-completions endpoints.
//!
//! Used when the caller supplies an API key: the key stays inside this
//! transport and is sent as a bearer token on every request. The request is
//! a single user turn `[text, image_url]` at the configured temperature with
//! `n = 1`, so the reply is the single best completion.

use crate::error::Img2XlsxError;
use crate::pipeline::encode::InlinePayload;
use crate::pipeline::llm::{TransportError, TransportErrorKind, VisionTransport};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

/// Longest error body echoed back to the operator.
const MAX_ERROR_BODY: usize = 300;

/// Chat-completions client bound to one credential and one model.
pub struct OpenAiTransport {
    client: Client,
    api_key: String,
    endpoint: String,
    model: String,
    temperature: f32,
    max_tokens: usize,
    label: String,
}

impl fmt::Debug for OpenAiTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiTransport")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl OpenAiTransport {
    /// Build a transport, validating the credential once.
    ///
    /// # Errors
    /// - [`Img2XlsxError::MissingCredential`] for an empty key
    /// - [`Img2XlsxError::InvalidCredential`] for a key that cannot be sent
    ///   as a header value
    pub fn new(
        api_key: &str,
        base_url: &str,
        model: &str,
        temperature: f32,
        max_tokens: usize,
        timeout: Duration,
    ) -> Result<Self, Img2XlsxError> {
        let api_key = validate_api_key(api_key)?;

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Img2XlsxError::Internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model: model.to_string(),
            temperature,
            max_tokens,
            label: format!("openai:{model}"),
        })
    }

    /// The request body for one document.
    fn build_request(&self, prompt: &str, image: &InlinePayload) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            n: 1,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: vec![
                    ContentPart::Text {
                        text: prompt.to_string(),
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: image.data_uri(),
                            detail: image.detail.clone(),
                        },
                    },
                ],
            }],
        }
    }
}

#[async_trait]
impl VisionTransport for OpenAiTransport {
    fn name(&self) -> &str {
        &self.label
    }

    async fn complete(&self, prompt: &str, image: &InlinePayload) -> Result<String, TransportError> {
        let request = self.build_request(prompt, image);

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::new(TransportErrorKind::Timeout, format!("request timed out: {e}"))
                } else {
                    TransportError::new(TransportErrorKind::Http, format!("request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("{} returned {}", self.endpoint, status);
            return Err(status_error(status, &body));
        }

        let body: ChatResponse = response.json().await.map_err(|e| {
            TransportError::new(
                TransportErrorKind::MalformedResponse,
                format!("failed to parse response: {e}"),
            )
        })?;

        if let Some(usage) = &body.usage {
            debug!(
                "{}: {} prompt tokens, {} completion tokens",
                self.label, usage.prompt_tokens, usage.completion_tokens
            );
        }

        first_choice_text(body)
    }
}

/// Reject empty keys and keys that are not valid header values.
pub fn validate_api_key(raw: &str) -> Result<String, Img2XlsxError> {
    let key = raw.trim();
    if key.is_empty() {
        return Err(Img2XlsxError::MissingCredential);
    }
    if key.chars().any(|c| c.is_whitespace() || c.is_control() || !c.is_ascii()) {
        return Err(Img2XlsxError::InvalidCredential {
            reason: "key contains whitespace or non-ASCII characters".to_string(),
        });
    }
    Ok(key.to_string())
}

/// Turn a non-success status into a classified error with the body excerpt.
fn status_error(status: StatusCode, body: &str) -> TransportError {
    let kind = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => TransportErrorKind::Auth,
        StatusCode::TOO_MANY_REQUESTS => TransportErrorKind::RateLimited,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => TransportErrorKind::Timeout,
        s if s.is_server_error() => TransportErrorKind::Server,
        _ => TransportErrorKind::Http,
    };
    let detail = api_error_message(body).unwrap_or_else(|| truncate(body.trim(), MAX_ERROR_BODY));
    let message = if detail.is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {detail}")
    };
    TransportError::new(kind, message)
}

/// Extract `error.message` from an OpenAI-style error body.
fn api_error_message(body: &str) -> Option<String> {
    serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .map(|e| e.error.message)
        .filter(|m| !m.is_empty())
}

fn first_choice_text(body: ChatResponse) -> Result<String, TransportError> {
    body.choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| {
            TransportError::new(
                TransportErrorKind::MalformedResponse,
                "response contained no message content",
            )
        })
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max).collect();
        format!("{head}\u{2026}")
    }
}

// ── Wire types ───────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    temperature: f32,
    max_tokens: usize,
    n: u32,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: Vec<ContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
    detail: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
}
