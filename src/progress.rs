//! Progress-callback trait for per-document batch events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to receive
//! events as the orchestrator visits each document. Events are informational:
//! the [`crate::output::BatchReport`] is complete without them.
//!
//! # Example
//!
//! ```rust
//! use edgequake_img2xlsx::{BatchProgressCallback, ExtractionConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     failed: AtomicUsize,
//! }
//!
//! impl BatchProgressCallback for CountingCallback {
//!     fn on_document_error(&self, index: usize, total: usize, name: &str, error: &str) {
//!         self.failed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{}/{} {name}: {error}", index + 1, total);
//!     }
//! }
//!
//! let cb = Arc::new(CountingCallback { failed: AtomicUsize::new(0) });
//! let config = ExtractionConfig::builder()
//!     .progress_callback(cb as Arc<dyn BatchProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::output::{BatchSummary, CostEstimate};
use std::sync::Arc;

/// Called by the orchestrator as it processes a batch.
///
/// Implementations must be `Send + Sync`: with `concurrency > 1` the
/// per-document methods may be called from concurrently running futures.
/// All methods have no-op defaults. `index` is the 0-based submission position.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once, before cost estimation.
    fn on_batch_start(&self, total_documents: usize) {
        let _ = total_documents;
    }

    /// Called after each document's cost has been estimated.
    fn on_cost_estimated(&self, index: usize, estimate: &CostEstimate) {
        let _ = (index, estimate);
    }

    /// Called just before the extraction request is sent.
    fn on_document_start(&self, index: usize, total: usize, name: &str) {
        let _ = (index, total, name);
    }

    /// Called when a document produced a record, record list or raw text.
    ///
    /// `rows` is the number of table rows the document contributes.
    fn on_document_complete(&self, index: usize, total: usize, name: &str, rows: usize) {
        let _ = (index, total, name, rows);
    }

    /// Called when a document ends as a failure.
    fn on_document_error(&self, index: usize, total: usize, name: &str, error: &str) {
        let _ = (index, total, name, error);
    }

    /// Called once after every document has been visited or the run was aborted.
    fn on_batch_complete(&self, summary: &BatchSummary) {
        let _ = summary;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;
