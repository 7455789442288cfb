//! Orchestrator integration tests driven by a scripted transport (no network).

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use edgequake_img2xlsx::pipeline::encode::InlinePayload;
use edgequake_img2xlsx::{
    flatten, resolve_inputs, run_batch, BatchProgressCallback, BatchRun, BatchSummary, CostEstimate, Document,
    DocumentError, DocumentState, ExtractionConfig, ExtractionResult, Img2XlsxError,
    TransportError, TransportErrorKind, VisionTransport,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Test helpers ─────────────────────────────────────────────────────────────

#[derive(Clone)]
struct Script {
    delay_ms: u64,
    reply: Result<String, TransportError>,
}

/// Replies per document, keyed by the document's bytes (the payload is all a
/// transport ever sees).
#[derive(Default)]
struct ScriptedTransport {
    scripts: HashMap<String, Script>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    fn on(mut self, name: &str, delay_ms: u64, reply: Result<&str, TransportError>) -> Self {
        self.scripts.insert(
            STANDARD.encode(name.as_bytes()),
            Script {
                delay_ms,
                reply: reply.map(str::to_string),
            },
        );
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VisionTransport for ScriptedTransport {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, prompt: &str, image: &InlinePayload) -> Result<String, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        let script = self
            .scripts
            .get(&image.data)
            .cloned()
            .unwrap_or(Script {
                delay_ms: 0,
                reply: Ok("{}".to_string()),
            });
        tokio::time::sleep(Duration::from_millis(script.delay_ms)).await;
        script.reply
    }
}

/// A document whose bytes are its own name, so scripts can target it.
fn doc(name: &str, w: u32, h: u32) -> Document {
    Document::new(name, "image/png", name.as_bytes().to_vec(), w, h)
}

fn server_error() -> TransportError {
    TransportError::new(TransportErrorKind::Server, "HTTP 500 Internal Server Error: boom")
}

fn config(concurrency: usize) -> ExtractionConfig {
    ExtractionConfig::builder()
        .concurrency(concurrency)
        .build()
        .expect("valid config")
}

fn names(results: &[ExtractionResult]) -> Vec<&str> {
    results.iter().map(|r| r.document()).collect()
}

// ── Isolation & ordering ─────────────────────────────────────────────────────

#[tokio::test]
async fn one_remote_failure_does_not_affect_the_others() {
    let transport = Arc::new(
        ScriptedTransport::default()
            .on("a.png", 0, Ok(r#"{"invoice_number":"A1"}"#))
            .on("b.png", 0, Err(server_error()))
            .on("c.png", 0, Ok(r#"[{"x":1},{"x":2}]"#)),
    );
    let docs = vec![doc("a.png", 100, 100), doc("b.png", 100, 100), doc("c.png", 100, 100)];

    let mut run = BatchRun::with_transport(docs, &config(1), transport.clone());
    run.run().await;
    let report = run.into_report();

    assert_eq!(report.results.len(), 3);
    assert_eq!(names(&report.results), vec!["a.png", "b.png", "c.png"]);
    assert!(matches!(report.results[0], ExtractionResult::Record(_)));
    match &report.results[1] {
        ExtractionResult::Failure(f) => {
            assert_eq!(f.document, "b.png");
            assert!(matches!(
                f.error,
                DocumentError::RemoteCall { transient: true, .. }
            ));
            assert!(f.message().contains("boom"));
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(report.results[2].row_count(), 2);
    assert_eq!(
        report.states,
        vec![DocumentState::Succeeded, DocumentState::Failed, DocumentState::Succeeded]
    );
    assert_eq!(transport.calls(), 3);

    let summary = report.summary();
    assert_eq!(summary.submitted, 3);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.failed_documents, vec!["b.png".to_string()]);
    assert!(!report.aborted);
}

#[tokio::test]
async fn order_follows_submission_regardless_of_latency() {
    let transport = Arc::new(
        ScriptedTransport::default()
            .on("d1.png", 80, Ok(r#"{"n":1}"#))
            .on("d2.png", 5, Ok(r#"{"n":2}"#))
            .on("d3.png", 40, Ok(r#"{"n":3}"#)),
    );
    let docs = vec![doc("d1.png", 10, 10), doc("d2.png", 10, 10), doc("d3.png", 10, 10)];

    let mut run = BatchRun::with_transport(docs, &config(3), transport);
    run.run().await;
    let report = run.into_report();

    assert_eq!(names(&report.results), vec!["d1.png", "d2.png", "d3.png"]);
    let per_doc: Vec<&str> = report.per_document.iter().map(|e| e.document.as_str()).collect();
    assert_eq!(per_doc, vec!["d1.png", "d2.png", "d3.png"]);
    assert!(report.states.iter().all(|s| *s == DocumentState::Succeeded));
}

#[tokio::test]
async fn parallel_failure_stays_in_its_slot() {
    let transport = Arc::new(
        ScriptedTransport::default()
            .on("p1.png", 30, Ok(r#"{"n":1}"#))
            .on("p2.png", 60, Err(server_error()))
            .on("p3.png", 0, Ok(r#"{"n":3}"#)),
    );
    let docs = vec![doc("p1.png", 10, 10), doc("p2.png", 10, 10), doc("p3.png", 10, 10)];

    let mut run = BatchRun::with_transport(docs, &config(3), transport.clone());
    run.run().await;
    let report = run.into_report();

    assert_eq!(transport.calls(), 3);
    assert_eq!(names(&report.results), vec!["p1.png", "p2.png", "p3.png"]);
    assert!(!report.results[0].is_failure());
    assert!(matches!(
        &report.results[1],
        ExtractionResult::Failure(f) if matches!(f.error, DocumentError::RemoteCall { .. })
    ));
    assert!(!report.results[2].is_failure());
    assert_eq!(
        report.states,
        vec![DocumentState::Succeeded, DocumentState::Failed, DocumentState::Succeeded]
    );
    assert_eq!(report.summary().failed_documents, vec!["p2.png".to_string()]);
}

#[tokio::test]
async fn unsupported_media_type_fails_without_a_call() {
    let transport = Arc::new(ScriptedTransport::default());
    let docs = vec![
        doc("ok.png", 10, 10),
        Document::new("scan.tiff", "image/tiff", b"II*\0".to_vec(), 10, 10),
        doc("ok2.png", 10, 10),
    ];

    let mut run = BatchRun::with_transport(docs, &config(1), transport.clone());
    run.run().await;
    let report = run.into_report();

    assert_eq!(transport.calls(), 2);
    assert!(matches!(
        &report.results[1],
        ExtractionResult::Failure(f) if matches!(f.error, DocumentError::UnsupportedMediaType { .. })
    ));
    assert!(!report.results[0].is_failure());
    assert!(!report.results[2].is_failure());
}

#[tokio::test]
async fn unreadable_geometry_is_failed_at_estimation() {
    let transport = Arc::new(ScriptedTransport::default());
    let docs = vec![
        doc("fine.png", 1000, 1000),
        Document::new("broken.png", "image/png", b"broken.png".to_vec(), 0, 0),
    ];

    let mut run = BatchRun::with_transport(docs, &config(1), transport.clone());
    let total = run.estimate_costs();
    assert_eq!(total, 0.04);
    assert_eq!(
        run.states(),
        &[DocumentState::CostEstimated, DocumentState::Failed]
    );

    run.run().await;
    let report = run.into_report();
    assert_eq!(transport.calls(), 1);
    assert_eq!(report.per_document[1].cost_estimate, 0.0);
    assert_eq!(report.per_document[1].resolution_label, "unreadable");
    assert!(matches!(
        &report.results[1],
        ExtractionResult::Failure(f) if matches!(f.error, DocumentError::MalformedImageDimensions { .. })
    ));
}

#[tokio::test]
async fn missing_input_file_fails_alone() {
    let dir = tempfile::tempdir().unwrap();
    let present = dir.path().join("present.png");
    let img = image::RgbImage::from_pixel(4, 3, image::Rgb([255, 255, 255]));
    img.save(&present).unwrap();

    let inputs = vec![
        dir.path().join("absent.png").to_str().unwrap().to_string(),
        present.to_str().unwrap().to_string(),
    ];
    let docs = resolve_inputs(&inputs, 5).await;
    assert_eq!(docs.len(), 2);

    let transport = Arc::new(ScriptedTransport::default());
    let mut run = BatchRun::with_transport(docs, &config(1), transport.clone());
    run.run().await;
    let report = run.into_report();

    assert_eq!(transport.calls(), 1);
    assert_eq!(names(&report.results), vec!["absent.png", "present.png"]);
    assert_eq!(
        report.states,
        vec![DocumentState::Failed, DocumentState::Succeeded]
    );
    match &report.results[0] {
        ExtractionResult::Failure(f) => {
            assert!(matches!(f.error, DocumentError::InputUnavailable { .. }));
            assert!(f.message().starts_with("absent.png: cannot load input"));
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(report.per_document[0].resolution_label, "unreadable");
    assert_eq!(report.per_document[1].resolution_label, "4x3");
    assert_eq!(report.summary().failed_documents, vec!["absent.png".to_string()]);
}

// ── Cost ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn total_cost_is_sum_of_estimates() {
    let transport = Arc::new(ScriptedTransport::default());
    let docs = vec![doc("big.png", 2000, 1500), doc("small.png", 1000, 1000)];

    let mut run = BatchRun::with_transport(docs, &config(1), transport);
    run.run().await;
    let report = run.into_report();

    assert_eq!(report.per_document[0].cost_estimate, 0.12);
    assert_eq!(report.per_document[0].resolution_label, "2000x1500");
    assert_eq!(report.per_document[1].cost_estimate, 0.04);
    assert_eq!(report.total_cost_estimate, 0.16);
    assert_eq!(report.currency, "PLN");
}

// ── Abort & stepping ─────────────────────────────────────────────────────────

#[tokio::test]
async fn abort_between_documents_keeps_partial_results() {
    let transport = Arc::new(
        ScriptedTransport::default().on("first.png", 0, Ok(r#"{"invoice_number":"A1","total":42.5}"#)),
    );
    let docs = vec![doc("first.png", 10, 10), doc("second.png", 10, 10), doc("third.png", 10, 10)];

    let mut run = BatchRun::with_transport(docs, &config(1), transport.clone());
    assert_eq!(run.step().await, Some(0));
    assert_eq!(run.states()[0], DocumentState::Succeeded);
    assert_eq!(run.states()[1], DocumentState::CostEstimated);

    run.abort_handle().abort();
    run.run().await;
    assert_eq!(run.step().await, None);

    let report = run.into_report();
    assert!(report.aborted);
    assert_eq!(transport.calls(), 1);
    assert_eq!(report.results.len(), 1);
    assert_eq!(report.per_document.len(), 3);
    assert_eq!(report.summary().not_processed, 2);

    // What was collected is still exportable.
    let table = flatten(&report.results);
    assert_eq!(table.rows.len(), 1);
}

#[tokio::test]
async fn abort_before_concurrent_run_submits_nothing() {
    let transport = Arc::new(ScriptedTransport::default());
    let docs = vec![doc("a.png", 10, 10), doc("b.png", 10, 10)];

    let mut run = BatchRun::with_transport(docs, &config(4), transport.clone());
    run.abort_handle().abort();
    run.run().await;

    assert_eq!(transport.calls(), 0);
    assert_eq!(
        run.states(),
        &[DocumentState::CostEstimated, DocumentState::CostEstimated]
    );
    assert!(run.report().aborted);
}

// ── Preconditions ────────────────────────────────────────────────────────────

#[tokio::test]
async fn missing_credential_is_fatal_before_any_document() {
    let config = ExtractionConfig::builder().api_key("").build().unwrap();
    let err = run_batch(vec![doc("a.png", 10, 10)], &config).await.unwrap_err();
    assert!(matches!(err, Img2XlsxError::MissingCredential));
}

#[tokio::test]
async fn malformed_credential_is_fatal() {
    let config = ExtractionConfig::builder().api_key("sk bad key").build().unwrap();
    let err = run_batch(vec![doc("a.png", 10, 10)], &config).await.unwrap_err();
    assert!(matches!(err, Img2XlsxError::InvalidCredential { .. }));
}

#[tokio::test]
async fn empty_batch_is_rejected() {
    let config = ExtractionConfig::builder().api_key("sk-test").build().unwrap();
    let err = run_batch(Vec::new(), &config).await.unwrap_err();
    assert!(matches!(err, Img2XlsxError::NoDocuments));
}

// ── Prompt & progress ────────────────────────────────────────────────────────

#[tokio::test]
async fn configured_prompt_is_sent_verbatim() {
    let transport = Arc::new(ScriptedTransport::default());
    let config = ExtractionConfig::builder()
        .prompt("List every total as JSON")
        .transport(transport.clone())
        .build()
        .unwrap();

    run_batch(vec![doc("a.png", 10, 10)], &config).await.unwrap();
    assert_eq!(
        *transport.prompts.lock().unwrap(),
        vec!["List every total as JSON".to_string()]
    );
}

#[derive(Default)]
struct RecordingCallback {
    events: Mutex<Vec<String>>,
}

impl BatchProgressCallback for RecordingCallback {
    fn on_batch_start(&self, total: usize) {
        self.events.lock().unwrap().push(format!("start {total}"));
    }
    fn on_cost_estimated(&self, index: usize, estimate: &CostEstimate) {
        self.events
            .lock()
            .unwrap()
            .push(format!("cost {index} {}", estimate.document));
    }
    fn on_document_start(&self, index: usize, _total: usize, _name: &str) {
        self.events.lock().unwrap().push(format!("submit {index}"));
    }
    fn on_document_complete(&self, index: usize, _total: usize, _name: &str, rows: usize) {
        self.events.lock().unwrap().push(format!("ok {index} {rows}"));
    }
    fn on_document_error(&self, index: usize, _total: usize, _name: &str, _error: &str) {
        self.events.lock().unwrap().push(format!("err {index}"));
    }
    fn on_batch_complete(&self, summary: &BatchSummary) {
        self.events
            .lock()
            .unwrap()
            .push(format!("done {}/{}", summary.succeeded, summary.submitted));
    }
}

#[tokio::test]
async fn progress_events_in_sequential_order() {
    let transport = Arc::new(ScriptedTransport::default().on("b.png", 0, Err(server_error())));
    let cb = Arc::new(RecordingCallback::default());
    let config = ExtractionConfig::builder()
        .transport(transport)
        .progress_callback(cb.clone())
        .build()
        .unwrap();

    run_batch(vec![doc("a.png", 10, 10), doc("b.png", 10, 10)], &config)
        .await
        .unwrap();

    assert_eq!(
        *cb.events.lock().unwrap(),
        vec![
            "start 2",
            "cost 0 a.png",
            "cost 1 b.png",
            "submit 0",
            "ok 0 1",
            "submit 1",
            "err 1",
            "done 1/2",
        ]
    );
}
