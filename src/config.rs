//! Configuration types for image-to-spreadsheet extraction.
//!
//! All batch behaviour is controlled through [`ExtractionConfig`], built via
//! its [`ExtractionConfigBuilder`]. The config is the explicit session object
//! handed to every operation: credential, prompt text, pricing and transport
//! all live here instead of in ambient global state.

use crate::error::Img2XlsxError;
use crate::pipeline::llm::VisionTransport;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Default chat-completions endpoint root.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Default vision model.
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Default file-name prefix for exported spreadsheets.
pub const DEFAULT_EXPORT_PREFIX: &str = "document_data";

/// Linear megapixel pricing used for cost estimates.
///
/// The estimate ignores the provider's real billing granularity (tiles,
/// tokens); it exists so the operator sees a ballpark figure before paying.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostModel {
    /// Conversion rate from USD to the local currency. Default: 4.00.
    pub usd_to_local_rate: f64,
    /// Price in USD per megapixel. Default: 0.01.
    pub price_per_megapixel_usd: f64,
    /// Label of the local currency, used only for display. Default: `PLN`.
    pub currency: String,
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            usd_to_local_rate: 4.00,
            price_per_megapixel_usd: 0.01,
            currency: "PLN".to_string(),
        }
    }
}

/// Configuration for a batch extraction run.
///
/// Built via [`ExtractionConfig::builder()`] or using
/// [`ExtractionConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_img2xlsx::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .model("gpt-4o")
///     .api_key("sk-test")
///     .usd_to_local_rate(3.95)
///     .build()
///     .unwrap();
/// assert_eq!(config.cost_model.usd_to_local_rate, 3.95);
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Model identifier sent with every request. Default: `gpt-4o`.
    pub model: String,

    /// API key for the chat-completions endpoint.
    /// If None, `OPENAI_API_KEY` is read once when the batch starts.
    pub api_key: Option<String>,

    /// Root of the chat-completions API. Default: `https://api.openai.com/v1`.
    ///
    /// Point this at any OpenAI-compatible server (vLLM, LiteLLM, Ollama's
    /// `/v1` shim) to keep the same request shape.
    pub base_url: String,

    /// Named edgequake-llm provider (e.g. "anthropic", "gemini", "ollama").
    /// Takes precedence over `api_key`; the provider reads its own key from
    /// the environment.
    pub provider_name: Option<String>,

    /// Pre-constructed edgequake-llm provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Pre-constructed transport. Takes precedence over everything else.
    pub transport: Option<Arc<dyn VisionTransport>>,

    /// Sampling temperature. Default: 0.0 (deterministic field extraction).
    pub temperature: f32,

    /// Maximum tokens the model may generate per document. Default: 4096.
    pub max_tokens: usize,

    /// Number of extraction calls in flight at once. Default: 1.
    ///
    /// 1 gives strictly sequential, incrementally observable progress. Higher
    /// values bound the number of concurrent requests; results still land in
    /// submission order.
    pub concurrency: usize,

    /// Retries for transient remote errors (429, 5xx, timeout). Default: 0.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled after each attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Instruction prompt. If None, uses [`crate::prompts::DEFAULT_EXTRACTION_PROMPT`].
    pub prompt: Option<String>,

    /// Megapixel pricing for cost estimates.
    pub cost_model: CostModel,

    /// Per-request timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// File-name prefix for exported spreadsheets. Default: `document_data`.
    pub export_prefix: String,

    /// Optional per-document progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            provider_name: None,
            provider: None,
            transport: None,
            temperature: 0.0,
            max_tokens: 4096,
            concurrency: 1,
            max_retries: 0,
            retry_backoff_ms: 500,
            prompt: None,
            cost_model: CostModel::default(),
            api_timeout_secs: 60,
            download_timeout_secs: 120,
            export_prefix: DEFAULT_EXPORT_PREFIX.to_string(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("transport", &self.transport.as_ref().map(|t| t.name().to_string()))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("concurrency", &self.concurrency)
            .field("max_retries", &self.max_retries)
            .field("prompt", &self.prompt)
            .field("cost_model", &self.cost_model)
            .field("export_prefix", &self.export_prefix)
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }

    /// The instruction prompt in effect (override or built-in default).
    pub fn effective_prompt(&self) -> &str {
        self.prompt
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(crate::prompts::DEFAULT_EXTRACTION_PROMPT)
    }
}

/// Builder for [`ExtractionConfig`].
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl fmt::Debug for ExtractionConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl ExtractionConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into();
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn VisionTransport>) -> Self {
        self.config.transport = Some(transport);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.prompt = Some(prompt.into());
        self
    }

    pub fn cost_model(mut self, model: CostModel) -> Self {
        self.config.cost_model = model;
        self
    }

    pub fn usd_to_local_rate(mut self, rate: f64) -> Self {
        self.config.cost_model.usd_to_local_rate = rate;
        self
    }

    pub fn price_per_megapixel_usd(mut self, price: f64) -> Self {
        self.config.cost_model.price_per_megapixel_usd = price;
        self
    }

    pub fn currency(mut self, label: impl Into<String>) -> Self {
        self.config.cost_model.currency = label.into();
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn export_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.export_prefix = prefix.into();
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, Img2XlsxError> {
        let c = &self.config;
        if c.model.trim().is_empty() {
            return Err(Img2XlsxError::InvalidConfig("Model must not be empty".into()));
        }
        if c.concurrency == 0 {
            return Err(Img2XlsxError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        let cm = &c.cost_model;
        if !cm.usd_to_local_rate.is_finite() || cm.usd_to_local_rate < 0.0 {
            return Err(Img2XlsxError::InvalidConfig(format!(
                "Currency rate must be a non-negative number, got {}",
                cm.usd_to_local_rate
            )));
        }
        if !cm.price_per_megapixel_usd.is_finite() || cm.price_per_megapixel_usd < 0.0 {
            return Err(Img2XlsxError::InvalidConfig(format!(
                "Price per megapixel must be a non-negative number, got {}",
                cm.price_per_megapixel_usd
            )));
        }
        if !(c.base_url.starts_with("http://") || c.base_url.starts_with("https://")) {
            return Err(Img2XlsxError::InvalidConfig(format!(
                "Base URL must be http(s), got '{}'",
                c.base_url
            )));
        }
        if c.export_prefix.trim().is_empty() {
            return Err(Img2XlsxError::InvalidConfig(
                "Export prefix must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}
