//! # edgequake-img2xlsx
//!
//! Extract structured fields from document images (invoices, receipts,
//! forms) with a Vision Language Model and export them to an Excel workbook.
//!
//! ## Pipeline Overview
//!
//! ```text
//! images / URLs
//!  │
//!  ├─ 1. Input    read local files or download URLs, probe pixel geometry
//!  ├─ 2. Cost     megapixels × price × rate, per document and in total
//!  ├─ 3. Encode   allow-listed media type → base64 data URI
//!  ├─ 4. VLM      one completion per document (sequential by default)
//!  ├─ 5. Parse    strip code fences, JSON → record(s) or raw text
//!  └─ 6. Export   flatten to one table → single-sheet .xlsx
//! ```
//!
//! A failing document never stops the batch: it becomes a
//! [`ExtractionResult::Failure`] in its own slot while the others proceed.
//! Only a missing or invalid credential aborts a run, and it does so before
//! any document is submitted.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_img2xlsx::{export, resolve_inputs, run_batch, ExtractionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Credential from OPENAI_API_KEY
//!     let config = ExtractionConfig::default();
//!     let docs = resolve_inputs(&["invoice.png".to_string()], config.download_timeout_secs).await;
//!     let report = run_batch(docs, &config).await?;
//!     eprintln!("estimated cost: {:.4} {}", report.total_cost_estimate, report.currency);
//!
//!     let table = export::flatten(&report.results);
//!     export::write_xlsx(&table, "invoices.xlsx").await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `img2xlsx` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-img2xlsx = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod batch;
pub mod config;
pub mod document;
pub mod error;
pub mod export;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use batch::{estimate_costs, run_batch, run_batch_sync, AbortHandle, BatchRun, CostPass};
pub use config::{CostModel, ExtractionConfig, ExtractionConfigBuilder};
pub use document::Document;
pub use error::{DocumentError, Img2XlsxError};
pub use export::{flatten, CellValue, FlatTable};
pub use output::{
    BatchReport, BatchSummary, CostEstimate, DocumentFailure, DocumentState, ExtractionResult, Record,
};
pub use pipeline::input::{resolve_input, resolve_inputs};
pub use pipeline::llm::{TransportError, TransportErrorKind, VisionTransport};
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
pub use stream::extract_stream;
