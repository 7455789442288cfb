//! End-to-end tests against a live vision API.
//!
//! These tests render small synthetic invoices with the `image` crate, send
//! them to the configured endpoint and export the result. They are gated
//! behind the `E2E_ENABLED` environment variable so they do not run in CI
//! unless explicitly requested.
//!
//! Run with:
//!   E2E_ENABLED=1 OPENAI_API_KEY=sk-... cargo test --test e2e -- --nocapture

use edgequake_img2xlsx::export::{export_filename, write_xlsx};
use edgequake_img2xlsx::{
    flatten, run_batch, BatchRun, Document, DocumentState, ExtractionConfig, ExtractionResult,
};
use image::{ImageBuffer, ImageFormat, Rgb};
use std::io::Cursor;
use std::path::PathBuf;

// ── Test helpers ─────────────────────────────────────────────────────────────

fn output_dir() -> PathBuf {
    let d = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("target/e2e-output");
    std::fs::create_dir_all(&d).ok();
    d
}

/// Skip this test unless E2E_ENABLED is set.
macro_rules! e2e_skip_unless_enabled {
    () => {{
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP: set E2E_ENABLED=1 to run e2e tests");
            return;
        }
    }};
}

/// A blank white PNG of the given size.
fn blank_png(name: &str, w: u32, h: u32) -> Document {
    let img: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_pixel(w, h, Rgb([255, 255, 255]));
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("png encodes");
    Document::from_bytes(name, "image/png", bytes)
}

fn live_config() -> ExtractionConfig {
    ExtractionConfig::builder()
        .max_retries(2)
        .build()
        .expect("valid config")
}

// ── Live tests ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_blank_page_yields_one_result() {
    e2e_skip_unless_enabled!();

    let report = run_batch(vec![blank_png("blank.png", 640, 480)], &live_config())
        .await
        .expect("batch should start");

    assert_eq!(report.results.len(), 1);
    assert_eq!(report.per_document[0].resolution_label, "640x480");
    assert_eq!(report.total_cost_estimate, 0.0123);
    println!("{:#?}", report.results[0]);
}

#[tokio::test]
async fn test_unsupported_type_is_isolated_from_live_calls() {
    e2e_skip_unless_enabled!();

    let docs = vec![
        blank_png("first.png", 320, 240),
        Document::new("legacy.bmp", "image/bmp", b"BM".to_vec(), 10, 10),
        blank_png("third.png", 320, 240),
    ];
    let mut run = BatchRun::new(docs, &live_config()).expect("credential present");
    run.run().await;
    let report = run.into_report();

    assert_eq!(report.results.len(), 3);
    assert!(report.results[1].is_failure());
    assert_eq!(report.states[1], DocumentState::Failed);
    for i in [0, 2] {
        assert!(
            !matches!(report.results[i], ExtractionResult::Failure(_)),
            "document {i} failed: {:?}",
            report.results[i]
        );
    }
}

#[tokio::test]
async fn test_export_live_batch() {
    e2e_skip_unless_enabled!();

    let report = run_batch(vec![blank_png("page.png", 800, 600)], &live_config())
        .await
        .expect("batch should start");
    let table = flatten(&report.results);

    let path = output_dir().join(export_filename("e2e", &chrono::Utc::now()));
    write_xlsx(&table, &path).await.expect("export succeeds");
    assert!(path.exists());
    println!("Wrote {}", path.display());
}
