//! Pipeline stages for image-to-spreadsheet extraction.
//!
//! Each submodule implements exactly one transformation step so each is
//! independently testable.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ cost ──▶ encode ──▶ llm ──▶ parse
//! (path/URL) (MPx)   (base64)  (VLM)   (JSON → records)
//! ```
//!
//! 1. [`input`]  : load a local file or download a URL into a `Document`
//! 2. [`cost`]   : pixel geometry → megapixel cost estimate (pure)
//! 3. [`encode`] : allow-list check and base64 data-URI payload
//! 4. [`llm`]    : one remote completion per document behind `VisionTransport`;
//!    [`openai`] is the credentialed HTTPS implementation
//! 5. [`parse`]  : fence stripping and JSON → Record / RecordList / RawText

pub mod cost;
pub mod encode;
pub mod input;
pub mod llm;
pub mod openai;
pub mod parse;
