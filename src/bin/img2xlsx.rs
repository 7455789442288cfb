//! CLI binary for edgequake-img2xlsx.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ExtractionConfig`, drives a `BatchRun` and writes the spreadsheet.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_img2xlsx::config::{DEFAULT_BASE_URL, DEFAULT_EXPORT_PREFIX, DEFAULT_MODEL};
use edgequake_img2xlsx::export::{export_filename, write_xlsx};
use edgequake_img2xlsx::{
    estimate_costs, flatten, resolve_inputs, BatchProgressCallback, BatchRun, BatchSummary,
    CostEstimate, ExtractionConfig, ProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a live bar plus one log line per document.
/// Works when documents complete out of order (`--concurrency > 1`).
struct CliProgressCallback {
    bar: ProgressBar,
    currency: String,
    start_times: Mutex<HashMap<usize, Instant>>,
}

impl CliProgressCallback {
    fn new(currency: &str) -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Estimating cost…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            currency: currency.to_string(),
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} documents  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Extracting");
        self.bar.reset_eta();
    }

    fn elapsed_secs(&self, index: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&index))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_documents: usize) {
        self.activate_bar(total_documents);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Processing {total_documents} documents…"))
        ));
    }

    fn on_cost_estimated(&self, _index: usize, estimate: &CostEstimate) {
        self.bar.println(format!(
            "  {} {:<32} {:>11}  {}",
            dim("·"),
            estimate.document,
            estimate.resolution_label,
            dim(&format!("{:.4} {}", estimate.cost_estimate, self.currency)),
        ));
    }

    fn on_document_start(&self, index: usize, _total: usize, name: &str) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(index, Instant::now());
        }
        self.bar.set_message(name.to_string());
    }

    fn on_document_complete(&self, index: usize, total: usize, name: &str, rows: usize) {
        let secs = self.elapsed_secs(index);
        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {:<32}  {:<8}  {}",
            green("✓"),
            index + 1,
            total,
            name,
            dim(&format!("{rows:>3} rows")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_document_error(&self, index: usize, total: usize, name: &str, error: &str) {
        let secs = self.elapsed_secs(index);

        // Truncate very long error messages to keep output tidy.
        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {:<32}  {}  {}",
            red("✗"),
            index + 1,
            total,
            name,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, _summary: &BatchSummary) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract invoices into a timestamped workbook (document_data_YYYYMMDD_HHMMSS.xlsx)
  img2xlsx scans/*.png

  # Write to a chosen file with a custom prompt
  img2xlsx receipt.jpg -o receipts.xlsx --prompt "List every line item as JSON"

  # Show the cost estimate only (no API key needed)
  img2xlsx --estimate-only scans/*.jpg

  # Different currency conversion
  img2xlsx --rate 0.92 --currency EUR invoice.png

  # Use another provider through edgequake-llm
  img2xlsx --provider anthropic --model claude-sonnet-4-20250514 invoice.png

  # Download from a URL, print the full report as JSON
  img2xlsx --json https://example.com/invoice.png > report.json

COST ESTIMATE:
  cost = width × height / 1,000,000 × price-per-megapixel × rate
  e.g. 2000×1500 px at 0.01 USD/MPx and rate 4.00 → 0.12 PLN

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          API key for the chat-completions endpoint
  OPENAI_BASE_URL         OpenAI-compatible endpoint root
  IMG2XLSX_MODEL          Override model ID
  IMG2XLSX_PROVIDER       edgequake-llm provider name (openai, anthropic, gemini, ollama)
  RUST_LOG                Log filter (overrides -v / -q)

Press Ctrl-C once to stop after the document in flight; rows collected so
far are still written.
"#;

/// Extract structured data from document images into an Excel workbook.
#[derive(Parser, Debug)]
#[command(
    name = "img2xlsx",
    version,
    about = "Extract structured data from document images into an Excel workbook using Vision LLMs",
    long_about = "Send each image (local file or URL) to a Vision Language Model with an extraction \
prompt, collect the JSON it returns and export every row to a single-sheet .xlsx workbook. \
A cost estimate based on image resolution is shown before anything is sent.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Image files (png, jpeg, webp, gif) or HTTP/HTTPS URLs.
    #[arg(required = true, num_args = 1..)]
    inputs: Vec<String>,

    /// Write the workbook here instead of `<prefix>_<timestamp>.xlsx`.
    #[arg(short, long, env = "IMG2XLSX_OUTPUT")]
    output: Option<PathBuf>,

    /// Vision model ID.
    #[arg(long, env = "IMG2XLSX_MODEL", default_value = DEFAULT_MODEL)]
    model: String,

    /// edgequake-llm provider (openai, anthropic, gemini, ollama, azure).
    #[arg(
        long,
        env = "IMG2XLSX_PROVIDER",
        long_help = "Route requests through an edgequake-llm provider instead of the direct \
          OpenAI-compatible client. The provider reads its own API key variable."
    )]
    provider: Option<String>,

    /// API key for the chat-completions endpoint.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Root of an OpenAI-compatible API.
    #[arg(long, env = "OPENAI_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Extraction instruction sent with every image.
    #[arg(long, env = "IMG2XLSX_PROMPT", conflicts_with = "prompt_file")]
    prompt: Option<String>,

    /// Read the extraction instruction from a text file.
    #[arg(long, env = "IMG2XLSX_PROMPT_FILE")]
    prompt_file: Option<PathBuf>,

    /// USD → local currency conversion rate.
    #[arg(long, env = "IMG2XLSX_RATE", default_value_t = 4.00)]
    rate: f64,

    /// Price per megapixel in USD.
    #[arg(long, env = "IMG2XLSX_PRICE_PER_MPX", default_value_t = 0.01)]
    price_per_mpx: f64,

    /// Currency label for estimates.
    #[arg(long, env = "IMG2XLSX_CURRENCY", default_value = "PLN")]
    currency: String,

    /// Number of concurrent API calls (1 = strictly sequential).
    #[arg(short, long, env = "IMG2XLSX_CONCURRENCY", default_value_t = 1)]
    concurrency: usize,

    /// Retries for 429 / 5xx / timeouts (0 = fail fast).
    #[arg(long, env = "IMG2XLSX_MAX_RETRIES", default_value_t = 0)]
    max_retries: u32,

    /// Max LLM output tokens per document.
    #[arg(long, env = "IMG2XLSX_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "IMG2XLSX_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    /// Per-document API call timeout in seconds.
    #[arg(long, env = "IMG2XLSX_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// HTTP download timeout for URL inputs in seconds.
    #[arg(long, env = "IMG2XLSX_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// File-name prefix for the default output name.
    #[arg(long, env = "IMG2XLSX_PREFIX", default_value = DEFAULT_EXPORT_PREFIX)]
    prefix: String,

    /// Print the full batch report as JSON on stdout.
    #[arg(long, env = "IMG2XLSX_JSON")]
    json: bool,

    /// Print the cost estimate and exit without calling the API.
    #[arg(long)]
    estimate_only: bool,

    /// Disable progress bar.
    #[arg(long, env = "IMG2XLSX_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "IMG2XLSX_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "IMG2XLSX_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active;
    // the bar provides all the feedback that matters to the user.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.estimate_only;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Load inputs ──────────────────────────────────────────────────────
    // Unreadable inputs stay in the batch and are reported as failed documents.
    let documents = resolve_inputs(&cli.inputs, cli.download_timeout).await;

    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new(&cli.currency);
        Some(cb as Arc<dyn BatchProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb).await?;

    // ── Estimate-only mode ───────────────────────────────────────────────
    if cli.estimate_only {
        let pass = estimate_costs(&documents, &config.cost_model);
        if cli.json {
            let out = serde_json::json!({
                "total_cost_estimate": pass.total,
                "currency": config.cost_model.currency,
                "per_document": pass.per_document,
            });
            println!(
                "{}",
                serde_json::to_string_pretty(&out).context("Failed to serialize estimate")?
            );
        } else {
            for (est, err) in pass.per_document.iter().zip(&pass.errors) {
                let note = err.as_ref().map(|e| red(&e.to_string())).unwrap_or_default();
                println!(
                    "{:<32} {:>11}  {:>8.2} MPx  {:>10.4} {}  {}",
                    est.document,
                    est.resolution_label,
                    est.megapixels,
                    est.cost_estimate,
                    config.cost_model.currency,
                    note
                );
            }
            println!(
                "{} {:.4} {}",
                bold("Total estimated cost:"),
                pass.total,
                config.cost_model.currency
            );
        }
        return Ok(());
    }

    // ── Run batch ────────────────────────────────────────────────────────
    let mut run = BatchRun::new(documents, &config).context("Cannot start extraction")?;

    let abort = run.abort_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{} stopping after the current document…", cyan("⚠"));
            abort.abort();
        }
    });

    run.run().await;
    let report = run.into_report();
    let summary = report.summary();

    // ── Export ───────────────────────────────────────────────────────────
    let table = flatten(&report.results);
    let output_path = cli
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(export_filename(&cli.prefix, &chrono::Local::now())));

    let written = if table.is_empty() {
        if !cli.quiet {
            eprintln!("{} no rows extracted, nothing written", cyan("⚠"));
        }
        false
    } else {
        write_xlsx(&table, &output_path)
            .await
            .with_context(|| format!("Failed to write {}", output_path.display()))?;
        true
    };

    if cli.json {
        let json = serde_json::to_string_pretty(&report).context("Failed to serialise report")?;
        println!("{json}");
    }

    if !cli.quiet {
        print_summary(&summary, &report.currency, written.then_some(&output_path));
        for failure in report.failures() {
            eprintln!("   {} {}", red("✗"), failure.message());
        }
    }

    if summary.submitted > 0 && summary.succeeded == 0 && !report.aborted {
        anyhow::bail!("All {} documents failed", summary.failed);
    }

    Ok(())
}

fn print_summary(summary: &BatchSummary, currency: &str, output: Option<&PathBuf>) {
    let mark = if summary.failed == 0 && summary.not_processed == 0 {
        green("✔")
    } else if summary.succeeded == 0 {
        red("✘")
    } else {
        cyan("⚠")
    };
    let target = output
        .map(|p| format!("  →  {}", bold(&p.display().to_string())))
        .unwrap_or_default();

    eprintln!(
        "{}  {}/{} documents  {} rows  est. {:.4} {}{}",
        mark,
        summary.succeeded,
        summary.submitted,
        summary.rows,
        summary.total_cost_estimate,
        currency,
        target,
    );
    if summary.failed > 0 {
        eprintln!("   {} failed", red(&summary.failed.to_string()));
    }
    if summary.not_processed > 0 {
        eprintln!("   {} not processed (aborted)", summary.not_processed);
    }
    if summary.raw_text > 0 {
        eprintln!(
            "   {}",
            dim(&format!("{} replies were not JSON; kept in raw_response", summary.raw_text))
        );
    }
}

/// Map CLI args to `ExtractionConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
    let prompt = if let Some(ref path) = cli.prompt_file {
        Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read prompt from {:?}", path))?,
        )
    } else {
        cli.prompt.clone()
    };

    let mut builder = ExtractionConfig::builder()
        .model(cli.model.clone())
        .base_url(cli.base_url.clone())
        .usd_to_local_rate(cli.rate)
        .price_per_megapixel_usd(cli.price_per_mpx)
        .currency(cli.currency.clone())
        .concurrency(cli.concurrency)
        .max_retries(cli.max_retries)
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .api_timeout_secs(cli.api_timeout)
        .download_timeout_secs(cli.download_timeout)
        .export_prefix(cli.prefix.clone());

    if let Some(p) = prompt {
        builder = builder.prompt(p);
    }
    if let Some(ref key) = cli.api_key {
        builder = builder.api_key(key.clone());
    }
    if let Some(ref name) = cli.provider {
        builder = builder.provider_name(name.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
