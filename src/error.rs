//! Error types for the edgequake-img2xlsx library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`Img2XlsxError`] is **fatal**: the batch cannot start or its artefact
//!   cannot be produced (no credential, bad configuration, unwritable output).
//!   Returned as `Err(Img2XlsxError)` from the top-level entry points.
//!
//! * [`DocumentError`] is **non-fatal**: a single document failed (missing
//!   input, unsupported format, remote call error) but every other document
//!   in the batch is unaffected. Stored inside
//!   [`crate::output::ExtractionResult::Failure`] at that document's position.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-img2xlsx library.
///
/// Document-level failures use [`DocumentError`] and are recorded in the
/// [`crate::output::BatchReport`] rather than propagated here.
#[derive(Debug, Error)]
pub enum Img2XlsxError {
    // ── Credential errors ─────────────────────────────────────────────────
    /// No API key was supplied and none is present in the environment.
    #[error("No API key configured.\nPass --api-key or set OPENAI_API_KEY.")]
    MissingCredential,

    /// The API key cannot be sent as a bearer token.
    #[error("Invalid API key: {reason}")]
    InvalidCredential { reason: String },

    /// The configured LLM provider could not be created.
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Input errors ──────────────────────────────────────────────────────
    /// The batch contains no documents.
    #[error("No documents to process")]
    NoDocuments,

    /// Input file was not found at the given path.
    #[error("Image file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    // ── Output errors ─────────────────────────────────────────────────────
    /// The spreadsheet could not be assembled.
    #[error("Spreadsheet export failed: {0}")]
    ExportFailed(String),

    /// Could not create or write the output spreadsheet file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<rust_xlsxwriter::XlsxError> for Img2XlsxError {
    fn from(e: rust_xlsxwriter::XlsxError) -> Self {
        Img2XlsxError::ExportFailed(e.to_string())
    }
}

/// A non-fatal error for a single document.
///
/// Every variant names the offending document so the operator can tell which
/// upload to fix without cross-referencing positions.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum DocumentError {
    /// The declared media type is not on the image allow-list.
    #[error("{document}: unsupported media type '{media_type}' (accepted: png, jpeg, jpg, webp, gif)")]
    UnsupportedMediaType { document: String, media_type: String },

    /// The remote inference call failed (auth, rate limit, timeout, bad response).
    #[error("{document}: {message}")]
    RemoteCall {
        document: String,
        message: String,
        /// Whether retrying the same request may succeed.
        transient: bool,
    },

    /// The input path or URL could not be read, so there is nothing to send.
    #[error("{document}: cannot load input: {reason}")]
    InputUnavailable { document: String, reason: String },

    /// The image geometry could not be read, so no cost can be estimated.
    #[error("{document}: cannot read image dimensions: {detail}")]
    MalformedImageDimensions { document: String, detail: String },
}

impl DocumentError {
    /// Name of the document this error belongs to.
    pub fn document(&self) -> &str {
        match self {
            DocumentError::UnsupportedMediaType { document, .. }
            | DocumentError::RemoteCall { document, .. }
            | DocumentError::InputUnavailable { document, .. }
            | DocumentError::MalformedImageDimensions { document, .. } => document,
        }
    }

    /// True for remote errors worth retrying (rate limit, timeout, 5xx).
    pub fn is_transient(&self) -> bool {
        matches!(self, DocumentError::RemoteCall { transient: true, .. })
    }
}
