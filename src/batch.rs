//! Batch orchestration: cost pass, then one extraction per document.
//!
//! [`BatchRun`] is an explicit state machine. Each document moves
//! `Pending → CostEstimated → Submitted → {Succeeded | Failed}` and its
//! outcome is written to the slot at its submission index, so the report is
//! always in submission order no matter how calls interleave.
//!
//! Failures are isolated: an unsupported media type, unreadable geometry or a
//! remote error turns into a [`ExtractionResult::Failure`] for that document
//! and the run moves on. The only batch-level precondition is a usable
//! transport (credential), checked once in [`BatchRun::new`].
//!
//! A run can be driven one document at a time with [`BatchRun::step`] or all
//! at once with [`BatchRun::run`]; an [`AbortHandle`] stops it between
//! documents and [`BatchRun::report`] is valid at any point.

use crate::config::{CostModel, ExtractionConfig};
use crate::document::Document;
use crate::error::{DocumentError, Img2XlsxError};
use crate::output::{BatchReport, CostEstimate, DocumentFailure, DocumentState, ExtractionResult};
use crate::pipeline::cost::{estimate_document, round_to, unreadable_estimate};
use crate::pipeline::llm::{self, ProviderTransport, VisionTransport};
use crate::pipeline::openai::OpenAiTransport;
use crate::progress::ProgressCallback;
use edgequake_llm::{LLMProvider, ProviderFactory};
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Shared flag that stops a [`BatchRun`] before its next document.
///
/// Calls already in flight finish normally and their results are kept.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Output of the cost pass over a batch.
#[derive(Debug, Clone, Default)]
pub struct CostPass {
    /// One estimate per document, in submission order.
    pub per_document: Vec<CostEstimate>,
    /// Load and geometry errors, aligned with `per_document`.
    pub errors: Vec<Option<DocumentError>>,
    /// Sum of all estimates, rounded to 4 decimal places.
    pub total: f64,
}

/// Estimate every document's cost. Pure; never touches the network.
///
/// A document that was never loaded or whose geometry is unreadable gets a
/// zero `unreadable` estimate and its [`DocumentError`] in `errors`.
pub fn estimate_costs(documents: &[Document], model: &CostModel) -> CostPass {
    let mut pass = CostPass {
        per_document: Vec::with_capacity(documents.len()),
        errors: Vec::with_capacity(documents.len()),
        total: 0.0,
    };

    for doc in documents {
        match estimate_document(doc, model) {
            Ok(est) => {
                debug!(
                    "{}: {:.2} MPx → {:.4} {}",
                    doc.name, est.megapixels, est.cost_estimate, model.currency
                );
                pass.total += est.cost_estimate;
                pass.per_document.push(est);
                pass.errors.push(None);
            }
            Err(e) => {
                warn!("{}", e);
                pass.per_document.push(unreadable_estimate(doc));
                pass.errors.push(Some(e));
            }
        }
    }

    pass.total = round_to(pass.total, 4);
    pass
}

/// A batch in progress.
pub struct BatchRun {
    transport: Arc<dyn VisionTransport>,
    config: ExtractionConfig,
    documents: Vec<Document>,
    costs: Option<CostPass>,
    slots: Vec<Option<ExtractionResult>>,
    states: Vec<DocumentState>,
    next: usize,
    abort: AbortHandle,
    started: bool,
    completed: bool,
}

impl BatchRun {
    /// Prepare a run, resolving the transport from `config`.
    ///
    /// # Errors
    /// Credential and provider problems ([`Img2XlsxError::MissingCredential`],
    /// [`Img2XlsxError::InvalidCredential`], [`Img2XlsxError::ProviderNotConfigured`])
    /// are reported here, before any document is touched. An empty batch is
    /// [`Img2XlsxError::NoDocuments`].
    pub fn new(documents: Vec<Document>, config: &ExtractionConfig) -> Result<Self, Img2XlsxError> {
        if documents.is_empty() {
            return Err(Img2XlsxError::NoDocuments);
        }
        let transport = resolve_transport(config)?;
        Ok(Self::with_transport(documents, config, transport))
    }

    /// Prepare a run over an explicit transport.
    pub fn with_transport(
        documents: Vec<Document>,
        config: &ExtractionConfig,
        transport: Arc<dyn VisionTransport>,
    ) -> Self {
        let n = documents.len();
        Self {
            transport,
            config: config.clone(),
            documents,
            costs: None,
            slots: vec![None; n],
            states: vec![DocumentState::Pending; n],
            next: 0,
            abort: AbortHandle::default(),
            started: false,
            completed: false,
        }
    }

    /// Handle that stops this run before its next document.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Current state of every document, in submission order.
    pub fn states(&self) -> &[DocumentState] {
        &self.states
    }

    /// Number of documents in the batch.
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Run the cost pass (once) and return the batch total.
    pub fn estimate_costs(&mut self) -> f64 {
        if !self.started {
            self.started = true;
            info!(
                "Starting batch: {} documents via {}",
                self.documents.len(),
                self.transport.name()
            );
            if let Some(cb) = &self.config.progress_callback {
                cb.on_batch_start(self.documents.len());
            }
        }

        if self.costs.is_none() {
            let pass = estimate_costs(&self.documents, &self.config.cost_model);
            for (i, error) in pass.errors.iter().enumerate() {
                if let Some(cb) = &self.config.progress_callback {
                    cb.on_cost_estimated(i, &pass.per_document[i]);
                }
                match error {
                    None => self.states[i] = DocumentState::CostEstimated,
                    Some(e) => {
                        self.states[i] = DocumentState::Failed;
                        self.slots[i] = Some(ExtractionResult::Failure(DocumentFailure::from(
                            e.clone(),
                        )));
                    }
                }
            }
            info!(
                "Estimated cost: {:.4} {}",
                pass.total, self.config.cost_model.currency
            );
            self.costs = Some(pass);
        }

        self.costs.as_ref().map(|c| c.total).unwrap_or(0.0)
    }

    /// Visit the next document in submission order.
    ///
    /// Returns the index visited, or `None` once every document has been
    /// visited or the run was aborted.
    pub async fn step(&mut self) -> Option<usize> {
        self.estimate_costs();

        if self.next >= self.documents.len() || self.abort.is_aborted() {
            self.complete();
            return None;
        }

        let i = self.next;
        self.next += 1;
        let total = self.documents.len();
        let doc = &self.documents[i];
        let cb = self.config.progress_callback.as_ref();

        // Load and geometry failures already occupy their slot.
        if self.states[i] == DocumentState::Failed {
            if let Some(result) = &self.slots[i] {
                emit_outcome(cb, i, total, result);
            }
            return Some(i);
        }

        self.states[i] = DocumentState::Submitted;
        if let Some(cb) = cb {
            cb.on_document_start(i, total, &doc.name);
        }

        let result = process_document(self.transport.as_ref(), doc, &self.config).await;
        emit_outcome(cb, i, total, &result);

        self.states[i] = terminal_state(&result);
        self.slots[i] = Some(result);
        Some(i)
    }

    /// Visit every remaining document.
    ///
    /// With `concurrency = 1` documents are processed strictly one after the
    /// other. Otherwise up to `concurrency` calls run at once; outcomes still
    /// land in their own slots.
    pub async fn run(&mut self) {
        if self.config.concurrency <= 1 {
            while self.step().await.is_some() {}
            return;
        }

        self.estimate_costs();
        let total = self.documents.len();
        let pending: Vec<usize> = (self.next..total).collect();
        self.next = total;

        for &i in &pending {
            if self.states[i] == DocumentState::CostEstimated && !self.abort.is_aborted() {
                self.states[i] = DocumentState::Submitted;
            }
        }

        let outcomes: Vec<(usize, Option<ExtractionResult>)> = {
            let transport = self.transport.as_ref();
            let config = &self.config;
            let documents = &self.documents;
            let slots = &self.slots;
            let states = &self.states;
            let abort = &self.abort;
            let cb = config.progress_callback.as_ref();

            stream::iter(pending.into_iter().map(move |i| async move {
                if abort.is_aborted() {
                    return (i, None);
                }
                if states[i] == DocumentState::Failed {
                    if let Some(result) = &slots[i] {
                        emit_outcome(cb, i, total, result);
                    }
                    return (i, None);
                }
                if let Some(cb) = cb {
                    cb.on_document_start(i, total, &documents[i].name);
                }
                let result = process_document(transport, &documents[i], config).await;
                emit_outcome(cb, i, total, &result);
                (i, Some(result))
            }))
            .buffer_unordered(self.config.concurrency)
            .collect()
            .await
        };

        for (i, outcome) in outcomes {
            match outcome {
                Some(result) => {
                    self.states[i] = terminal_state(&result);
                    self.slots[i] = Some(result);
                }
                None if self.states[i] == DocumentState::Submitted => {
                    // Aborted before the call went out.
                    self.states[i] = DocumentState::CostEstimated;
                }
                None => {}
            }
        }

        self.complete();
    }

    /// Snapshot of everything collected so far.
    pub fn report(&self) -> BatchReport {
        let (per_document, total) = match &self.costs {
            Some(pass) => (pass.per_document.clone(), pass.total),
            None => (Vec::new(), 0.0),
        };

        BatchReport {
            total_cost_estimate: total,
            currency: self.config.cost_model.currency.clone(),
            per_document,
            results: self.slots.iter().flatten().cloned().collect(),
            states: self.states.clone(),
            aborted: self.abort.is_aborted() && self.states.iter().any(|s| !s.is_terminal()),
        }
    }

    /// Consume the run and return its report.
    pub fn into_report(self) -> BatchReport {
        self.report()
    }

    fn complete(&mut self) {
        if self.completed {
            return;
        }
        self.completed = true;

        let summary = self.report().summary();
        if self.abort.is_aborted() && summary.not_processed > 0 {
            warn!(
                "Batch aborted: {} processed, {} not processed",
                summary.succeeded + summary.failed,
                summary.not_processed
            );
        }
        info!(
            "Batch complete: {}/{} succeeded, {} failed, {} rows",
            summary.succeeded, summary.submitted, summary.failed, summary.rows
        );
        if let Some(cb) = &self.config.progress_callback {
            cb.on_batch_complete(&summary);
        }
    }
}

/// Run a whole batch and return its report.
///
/// # Errors
/// Only batch-level preconditions (credential, provider) are errors; every
/// per-document problem is recorded inside the report.
pub async fn run_batch(
    documents: Vec<Document>,
    config: &ExtractionConfig,
) -> Result<BatchReport, Img2XlsxError> {
    let mut run = BatchRun::new(documents, config)?;
    run.run().await;
    Ok(run.into_report())
}

/// Synchronous wrapper around [`run_batch`].
///
/// Creates a temporary tokio runtime internally.
pub fn run_batch_sync(
    documents: Vec<Document>,
    config: &ExtractionConfig,
) -> Result<BatchReport, Img2XlsxError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| Img2XlsxError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(run_batch(documents, config))
}

/// Extract one document, retrying transient remote errors if configured.
pub(crate) async fn process_document(
    transport: &dyn VisionTransport,
    doc: &Document,
    config: &ExtractionConfig,
) -> ExtractionResult {
    let prompt = config.effective_prompt();
    let mut attempt: u32 = 0;

    loop {
        match llm::extract(transport, doc, prompt).await {
            Ok(result) => {
                debug!("{}: {} row(s)", doc.name, result.row_count());
                return result;
            }
            Err(e) if e.is_transient() && attempt < config.max_retries => {
                attempt += 1;
                let backoff = config
                    .retry_backoff_ms
                    .saturating_mul(2u64.saturating_pow(attempt - 1));
                warn!(
                    "{}: retry {}/{} after {}ms",
                    doc.name, attempt, config.max_retries, backoff
                );
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }
            Err(e) => {
                warn!("{}", e);
                return ExtractionResult::Failure(DocumentFailure::from(e));
            }
        }
    }
}

fn terminal_state(result: &ExtractionResult) -> DocumentState {
    if result.is_failure() {
        DocumentState::Failed
    } else {
        DocumentState::Succeeded
    }
}

pub(crate) fn emit_outcome(cb: Option<&ProgressCallback>, index: usize, total: usize, result: &ExtractionResult) {
    let Some(cb) = cb else { return };
    match result {
        ExtractionResult::Failure(f) => cb.on_document_error(index, total, &f.document, &f.message()),
        other => cb.on_document_complete(index, total, other.document(), other.row_count()),
    }
}

// ── Transport resolution ─────────────────────────────────────────────────

/// Resolve the transport, from most-specific to least-specific.
///
/// 1. **Pre-built transport** (`config.transport`): used as-is (tests,
///    custom middleware).
/// 2. **Pre-built provider** (`config.provider`): wrapped in [`ProviderTransport`].
/// 3. **Named provider** (`config.provider_name`): created through
///    [`ProviderFactory`], which reads the provider's own key variable.
/// 4. **API key** (`config.api_key`, else `OPENAI_API_KEY`): direct HTTPS
///    transport against `config.base_url`.
pub fn resolve_transport(config: &ExtractionConfig) -> Result<Arc<dyn VisionTransport>, Img2XlsxError> {
    if let Some(transport) = &config.transport {
        return Ok(Arc::clone(transport));
    }

    let timeout = Duration::from_secs(config.api_timeout_secs);

    if let Some(provider) = &config.provider {
        let transport: Arc<dyn VisionTransport> = Arc::new(ProviderTransport::new(
            Arc::clone(provider),
            format!("provider:{}", config.model),
            config.temperature,
            config.max_tokens,
            timeout,
        ));
        return Ok(transport);
    }

    if let Some(name) = &config.provider_name {
        let provider = create_vision_provider(name, &config.model)?;
        let transport: Arc<dyn VisionTransport> = Arc::new(ProviderTransport::new(
            provider,
            format!("{}:{}", name, config.model),
            config.temperature,
            config.max_tokens,
            timeout,
        ));
        return Ok(transport);
    }

    let api_key = config
        .api_key
        .clone()
        .or_else(|| std::env::var("OPENAI_API_KEY").ok())
        .ok_or(Img2XlsxError::MissingCredential)?;

    let transport: Arc<dyn VisionTransport> = Arc::new(OpenAiTransport::new(
        &api_key,
        &config.base_url,
        &config.model,
        config.temperature,
        config.max_tokens,
        timeout,
    )?);
    Ok(transport)
}

/// Instantiate a named edgequake-llm provider with the given model.
fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, Img2XlsxError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        Img2XlsxError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}
