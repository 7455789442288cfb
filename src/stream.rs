//! Streaming extraction API: emit results as documents finish.
//!
//! [`crate::batch::run_batch`] returns only after every document has been
//! visited. [`extract_stream`] instead yields one [`ExtractionResult`] per
//! document as soon as it is ready, so a host can render rows while the rest
//! of the batch is still in flight.
//!
//! Results are yielded in **submission order** even when `concurrency > 1`:
//! up to `concurrency` calls run ahead, but a finished document waits for its
//! predecessors before it is emitted.
//!
//! A configured progress callback receives the per-document events
//! (`on_document_start`, `on_document_complete`, `on_document_error`). The
//! batch-level events belong to [`crate::batch::BatchRun`] and are not sent.

use crate::batch::{emit_outcome, process_document, resolve_transport};
use crate::config::ExtractionConfig;
use crate::document::Document;
use crate::error::Img2XlsxError;
use crate::output::{DocumentFailure, ExtractionResult};
use crate::pipeline::cost::estimate_document;
use futures::stream::{self, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::Stream;
use tracing::info;

/// A boxed stream of per-document results.
pub type ResultStream = Pin<Box<dyn Stream<Item = ExtractionResult> + Send>>;

/// Extract a batch, streaming results in submission order.
///
/// Documents with unreadable geometry are yielded as failures without a
/// remote call, exactly as in a [`crate::batch::BatchRun`].
///
/// # Errors
/// Only batch-level preconditions: an empty batch or a missing/invalid
/// credential. Per-document problems arrive as
/// [`ExtractionResult::Failure`] items.
///
/// # Example
/// ```rust,no_run
/// use edgequake_img2xlsx::{extract_stream, Document, ExtractionConfig};
/// use futures::StreamExt;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let bytes = std::fs::read("invoice.png")?;
/// let docs = vec![Document::from_bytes("invoice.png", "image/png", bytes)];
/// let config = ExtractionConfig::default();
/// let mut results = extract_stream(docs, &config)?;
/// while let Some(r) = results.next().await {
///     println!("{}: {} row(s)", r.document(), r.row_count());
/// }
/// # Ok(())
/// # }
/// ```
pub fn extract_stream(
    documents: Vec<Document>,
    config: &ExtractionConfig,
) -> Result<ResultStream, Img2XlsxError> {
    if documents.is_empty() {
        return Err(Img2XlsxError::NoDocuments);
    }
    let transport = resolve_transport(config)?;
    info!(
        "Starting streaming extraction: {} documents via {}",
        documents.len(),
        transport.name()
    );

    let concurrency = config.concurrency.max(1);
    let total = documents.len();
    let config = config.clone();

    let s = stream::iter(documents.into_iter().enumerate())
        .map(move |(i, doc)| {
            let transport = Arc::clone(&transport);
            let cfg = config.clone();
            async move {
                let cb = cfg.progress_callback.as_ref();
                let result = match estimate_document(&doc, &cfg.cost_model) {
                    Err(e) => ExtractionResult::Failure(DocumentFailure::from(e)),
                    Ok(_) => {
                        if let Some(cb) = cb {
                            cb.on_document_start(i, total, &doc.name);
                        }
                        process_document(transport.as_ref(), &doc, &cfg).await
                    }
                };
                emit_outcome(cb, i, total, &result);
                result
            }
        })
        .buffered(concurrency);

    Ok(Box::pin(s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::encode::InlinePayload;
    use crate::pipeline::llm::{TransportError, VisionTransport};
    use crate::progress::BatchProgressCallback;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Echo;

    #[async_trait]
    impl VisionTransport for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn complete(&self, _prompt: &str, image: &InlinePayload) -> Result<String, TransportError> {
            Ok(format!("{{\"media_type\":\"{}\"}}", image.media_type))
        }
    }

    #[tokio::test]
    async fn stream_keeps_submission_order_and_isolates_failures() {
        let config = ExtractionConfig::builder()
            .transport(Arc::new(Echo))
            .concurrency(3)
            .build()
            .unwrap();
        let docs = vec![
            Document::new("a.png", "image/png", vec![1], 10, 10),
            Document::new("b.bmp", "image/bmp", vec![2], 10, 10),
            Document::new("c.jpg", "image/jpeg", vec![3], 10, 10),
        ];

        let results: Vec<ExtractionResult> = extract_stream(docs, &config).unwrap().collect().await;
        let names: Vec<&str> = results.iter().map(|r| r.document()).collect();
        assert_eq!(names, vec!["a.png", "b.bmp", "c.jpg"]);
        assert!(!results[0].is_failure());
        assert!(results[1].is_failure());
        assert!(!results[2].is_failure());
    }

    #[derive(Default)]
    struct Events(Mutex<Vec<String>>);

    impl BatchProgressCallback for Events {
        fn on_document_start(&self, index: usize, total: usize, _name: &str) {
            self.0.lock().unwrap().push(format!("start {index}/{total}"));
        }
        fn on_document_complete(&self, index: usize, _total: usize, name: &str, rows: usize) {
            self.0.lock().unwrap().push(format!("ok {index} {name} {rows}"));
        }
        fn on_document_error(&self, index: usize, _total: usize, name: &str, _error: &str) {
            self.0.lock().unwrap().push(format!("err {index} {name}"));
        }
    }

    #[tokio::test]
    async fn stream_reports_document_progress() {
        let events = Arc::new(Events::default());
        let config = ExtractionConfig::builder()
            .transport(Arc::new(Echo))
            .progress_callback(events.clone())
            .build()
            .unwrap();
        let docs = vec![
            Document::new("a.png", "image/png", vec![1], 10, 10),
            Document::new("b.png", "image/png", vec![2], 0, 0),
            Document::new("c.gif", "image/tiff", vec![3], 10, 10),
        ];

        let results: Vec<ExtractionResult> = extract_stream(docs, &config).unwrap().collect().await;
        assert_eq!(results.len(), 3);
        assert_eq!(
            *events.0.lock().unwrap(),
            vec![
                "start 0/3",
                "ok 0 a.png 1",
                "err 1 b.png",
                "start 2/3",
                "err 2 c.gif",
            ]
        );
    }

    #[test]
    fn empty_batch_is_rejected() {
        let config = ExtractionConfig::builder().transport(Arc::new(Echo)).build().unwrap();
        assert!(matches!(
            extract_stream(Vec::new(), &config).err(),
            Some(Img2XlsxError::NoDocuments)
        ));
    }
}
