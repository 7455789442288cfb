//! VLM interaction: one extraction request per document.
//!
//! The network call sits behind [`VisionTransport`] so the orchestrator can be
//! driven by the raw HTTPS client ([`crate::pipeline::openai::OpenAiTransport`]),
//! by any edgequake-llm provider ([`ProviderTransport`]) or by a scripted
//! transport in tests. This module never retries and never swallows errors:
//! it returns them tagged with the document name and the orchestrator decides.

use crate::document::Document;
use crate::error::DocumentError;
use crate::output::ExtractionResult;
use crate::pipeline::encode::{encode, InlinePayload, Payload};
use crate::pipeline::parse::parse_reply;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

/// Coarse classification of a failed remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// 401/403 or a rejected key.
    Auth,
    /// 429.
    RateLimited,
    /// The request did not complete in time.
    Timeout,
    /// 5xx from the provider.
    Server,
    /// Connection failures and other non-success statuses.
    Http,
    /// A success status whose body could not be understood.
    MalformedResponse,
}

/// Error returned by a [`VisionTransport`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Rate limits, timeouts and 5xx may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            TransportErrorKind::RateLimited | TransportErrorKind::Timeout | TransportErrorKind::Server
        )
    }
}

/// A single-turn multimodal completion endpoint.
///
/// One call sends the instruction text plus one inline image and returns the
/// raw text of the single best completion.
#[async_trait]
pub trait VisionTransport: Send + Sync {
    /// Short label for logs, e.g. `openai:gpt-4o`.
    fn name(&self) -> &str;

    /// Send `prompt` and `image` and return the model's reply text.
    async fn complete(&self, prompt: &str, image: &InlinePayload) -> Result<String, TransportError>;
}

/// Extract structured data from one document.
///
/// # Errors
/// - [`DocumentError::UnsupportedMediaType`] before any network call when the
///   media type is not allow-listed.
/// - [`DocumentError::RemoteCall`] when the transport fails.
///
/// A reply that is not JSON is **not** an error: it comes back as
/// [`ExtractionResult::RawText`].
pub async fn extract(
    transport: &dyn VisionTransport,
    document: &Document,
    prompt: &str,
) -> Result<ExtractionResult, DocumentError> {
    let payload = match encode(&document.bytes, &document.media_type) {
        Payload::Inline(p) => p,
        Payload::Unsupported => {
            return Err(DocumentError::UnsupportedMediaType {
                document: document.name.clone(),
                media_type: document.media_type.clone(),
            })
        }
    };

    let start = Instant::now();
    let reply = transport
        .complete(prompt, &payload)
        .await
        .map_err(|e| DocumentError::RemoteCall {
            document: document.name.clone(),
            message: e.message.clone(),
            transient: e.is_transient(),
        })?;

    debug!(
        "{}: {} chars from {} in {:?}",
        document.name,
        reply.len(),
        transport.name(),
        start.elapsed()
    );

    Ok(parse_reply(&document.name, &reply))
}

// ── edgequake-llm provider transport ─────────────────────────────────────

/// Adapter that drives any edgequake-llm [`LLMProvider`] (OpenAI, Anthropic,
/// Gemini, Ollama, …) as a [`VisionTransport`].
pub struct ProviderTransport {
    provider: Arc<dyn LLMProvider>,
    label: String,
    options: CompletionOptions,
    timeout: Duration,
}

impl ProviderTransport {
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        label: impl Into<String>,
        temperature: f32,
        max_tokens: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            label: label.into(),
            options: CompletionOptions {
                temperature: Some(temperature),
                max_tokens: Some(max_tokens),
                ..Default::default()
            },
            timeout,
        }
    }
}

#[async_trait]
impl VisionTransport for ProviderTransport {
    fn name(&self) -> &str {
        &self.label
    }

    async fn complete(&self, prompt: &str, image: &InlinePayload) -> Result<String, TransportError> {
        // Single user turn: instruction text first, then the image.
        let messages = vec![ChatMessage::user_with_images(
            prompt,
            vec![ImageData::from(image)],
        )];

        match tokio::time::timeout(self.timeout, self.provider.chat(&messages, Some(&self.options)))
            .await
        {
            Ok(Ok(response)) => Ok(response.content),
            Ok(Err(e)) => {
                let message = e.to_string();
                Err(TransportError::new(classify_provider_error(&message), message))
            }
            Err(_) => Err(TransportError::new(
                TransportErrorKind::Timeout,
                format!("request timed out after {}s", self.timeout.as_secs()),
            )),
        }
    }
}

/// Map a provider error message onto a [`TransportErrorKind`].
///
/// Providers surface status codes only inside their messages, so this looks
/// for the usual markers.
pub fn classify_provider_error(message: &str) -> TransportErrorKind {
    let m = message.to_ascii_lowercase();
    if m.contains("429") || m.contains("rate limit") || m.contains("rate_limit") {
        TransportErrorKind::RateLimited
    } else if m.contains("401")
        || m.contains("403")
        || m.contains("unauthorized")
        || m.contains("api key")
        || m.contains("authentication")
    {
        TransportErrorKind::Auth
    } else if m.contains("timed out") || m.contains("timeout") {
        TransportErrorKind::Timeout
    } else if m.contains("500") || m.contains("502") || m.contains("503") || m.contains("504") {
        TransportErrorKind::Server
    } else {
        TransportErrorKind::Http
    }
}
