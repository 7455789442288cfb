//! Result types produced by a batch run.
//!
//! All types are plain data with serde derives so a whole
//! [`BatchReport`] can be dumped as JSON by the CLI (`--json`) or stored by
//! the host application.

use crate::error::DocumentError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Estimated processing cost of one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    /// Originating document name.
    pub document: String,
    /// Estimated cost in the local currency, rounded to 4 decimal places.
    pub cost_estimate: f64,
    /// `width × height / 1_000_000`.
    pub megapixels: f64,
    /// Human-readable geometry, e.g. `1920x1080`, or `unreadable`.
    pub resolution_label: String,
}

/// One structured record extracted from a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Originating document name.
    pub document: String,
    /// Field name → scalar or nested value, in reply order.
    pub fields: Map<String, Value>,
}

impl Record {
    pub fn new(document: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            document: document.into(),
            fields,
        }
    }
}

/// A document that ended in failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentFailure {
    /// Originating document name.
    pub document: String,
    /// What went wrong.
    pub error: DocumentError,
}

impl DocumentFailure {
    /// Human-readable message for the operator.
    pub fn message(&self) -> String {
        self.error.to_string()
    }
}

impl From<DocumentError> for DocumentFailure {
    fn from(error: DocumentError) -> Self {
        Self {
            document: error.document().to_string(),
            error,
        }
    }
}

/// Outcome of extracting one document. Exactly one exists per submitted document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtractionResult {
    /// The reply was a JSON object.
    Record(Record),
    /// The reply was a JSON array; each element became one record.
    RecordList {
        document: String,
        records: Vec<Record>,
    },
    /// The reply was not JSON (or not an object/array); kept verbatim.
    RawText { document: String, text: String },
    /// The document could not be extracted.
    Failure(DocumentFailure),
}

impl ExtractionResult {
    /// Name of the document this result belongs to.
    pub fn document(&self) -> &str {
        match self {
            ExtractionResult::Record(r) => &r.document,
            ExtractionResult::RecordList { document, .. }
            | ExtractionResult::RawText { document, .. } => document,
            ExtractionResult::Failure(f) => &f.document,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, ExtractionResult::Failure(_))
    }

    /// Number of table rows this result contributes.
    pub fn row_count(&self) -> usize {
        match self {
            ExtractionResult::Record(_) | ExtractionResult::RawText { .. } => 1,
            ExtractionResult::RecordList { records, .. } => records.len(),
            ExtractionResult::Failure(_) => 0,
        }
    }
}

/// Lifecycle of one document inside a batch.
///
/// `Pending → CostEstimated → Submitted → {Succeeded | Failed}`; a document
/// whose geometry is unreadable goes straight from `Pending` to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentState {
    Pending,
    CostEstimated,
    Submitted,
    Succeeded,
    Failed,
}

impl DocumentState {
    pub fn is_terminal(self) -> bool {
        matches!(self, DocumentState::Succeeded | DocumentState::Failed)
    }
}

/// Everything a batch run produced, in submission order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    /// Sum of all per-document estimates, rounded to 4 decimal places.
    pub total_cost_estimate: f64,
    /// Currency label of the estimates.
    pub currency: String,
    /// One estimate per submitted document.
    pub per_document: Vec<CostEstimate>,
    /// One result per visited document. Shorter than `per_document` only
    /// when the run was aborted.
    pub results: Vec<ExtractionResult>,
    /// Final state of every submitted document.
    pub states: Vec<DocumentState>,
    /// True when the run stopped before visiting every document.
    pub aborted: bool,
}

impl BatchReport {
    /// Totals for the operator.
    pub fn summary(&self) -> BatchSummary {
        let failed_documents: Vec<String> = self
            .results
            .iter()
            .filter(|r| r.is_failure())
            .map(|r| r.document().to_string())
            .collect();
        let raw_text = self
            .results
            .iter()
            .filter(|r| matches!(r, ExtractionResult::RawText { .. }))
            .count();

        BatchSummary {
            submitted: self.per_document.len(),
            succeeded: self.results.len() - failed_documents.len(),
            failed: failed_documents.len(),
            not_processed: self.per_document.len().saturating_sub(self.results.len()),
            raw_text,
            rows: self.results.iter().map(ExtractionResult::row_count).sum(),
            total_cost_estimate: self.total_cost_estimate,
            failed_documents,
        }
    }

    /// Failures in submission order.
    pub fn failures(&self) -> impl Iterator<Item = &DocumentFailure> {
        self.results.iter().filter_map(|r| match r {
            ExtractionResult::Failure(f) => Some(f),
            _ => None,
        })
    }
}

/// Batch totals: submitted, succeeded, failed and what failed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub submitted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Documents never visited because the run was aborted.
    pub not_processed: usize,
    /// Successful documents whose reply was kept as raw text.
    pub raw_text: usize,
    /// Table rows produced by successful documents.
    pub rows: usize,
    pub total_cost_estimate: f64,
    pub failed_documents: Vec<String>,
}
