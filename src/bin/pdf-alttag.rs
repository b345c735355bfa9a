//! CLI binary for edgequake-pdf-alttag.
//!
//! A thin shim over the library crate that maps CLI flags to `TagConfig`,
//! runs one job against a local or HTTP object store, and prints the report.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_pdf_alttag::{
    cancel_pair, tag_document_with_cancel, FailurePolicy, HttpStore, LocalStore, ObjectStore,
    ProgressCallback, TagConfig, TagJob, TaggingProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
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

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar over image references, with one log line per figure.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<u32, Instant>>,
    link_failures: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Loading document and manifest…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            link_failures: AtomicUsize::new(0),
        })
    }

    fn elapsed_secs(&self, object_id: u32) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&object_id))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl TaggingProgressCallback for CliProgressCallback {
    fn on_run_start(&self, images: usize, links: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} figures  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ");
        self.bar.set_length(images as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Describing");
        self.bar.reset_eta();
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("{images} figures, {links} links to describe"))
        ));
    }

    fn on_image_start(&self, object_id: u32, _index: usize, _total: usize) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(object_id, Instant::now());
        }
        self.bar.set_message(format!("object {object_id}"));
    }

    fn on_image_complete(&self, object_id: u32, _index: usize, _total: usize, text_len: usize) {
        let secs = self.elapsed_secs(object_id);
        self.bar.println(format!(
            "  {} Figure {:>6}  {:<10}  {}",
            green("✓"),
            object_id,
            dim(&format!("{text_len:>4} chars")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_image_error(&self, object_id: u32, _index: usize, _total: usize, error: &str) {
        let secs = self.elapsed_secs(object_id);
        let msg: String = if error.chars().count() > 80 {
            error.chars().take(79).chain(std::iter::once('…')).collect()
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Figure {:>6}  {}  {}",
            red("✗"),
            object_id,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_link_complete(&self, object_id: u32, ok: bool) {
        if !ok {
            self.link_failures.fetch_add(1, Ordering::SeqCst);
            self.bar
                .println(format!("  {} Link   {:>6}", red("✗"), object_id));
        }
    }

    fn on_run_complete(&self, resolved: usize, fallback: usize) {
        self.bar.finish_and_clear();
        let link_failures = self.link_failures.load(Ordering::SeqCst);
        eprintln!(
            "{} {} figures described, {} with fallback text{}",
            if fallback == 0 && link_failures == 0 {
                green("✔")
            } else {
                cyan("⚠")
            },
            bold(&resolved.to_string()),
            fallback,
            if link_failures > 0 {
                format!(", {link_failures} link(s) with fallback text")
            } else {
                String::new()
            }
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Tag a document stored under ./bucket
  pdf-alttag --store-root ./bucket \
      temp/report/COMPLIANT_report.pdf temp/report/report.pdf_temp_images_data.db

  # Same job against an HTTP object store, tolerant of link failures
  pdf-alttag --store-url https://store.example.org/bucket \
      --link-policy best-effort \
      temp/report/COMPLIANT_report.pdf temp/report/images.txt

  # JSON run report on stdout
  pdf-alttag --store-root ./bucket --json doc/COMPLIANT_doc.pdf doc/images.txt

MANIFEST FORMATS:
  SQLite    table image_data(objid, img_path, prev, current, next, context)
  Text      one record per line: <objid> <img_path> [context]

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  RUST_LOG                Override log filter
"#;

/// Attach LLM-generated alternative text to figures and links in tagged PDFs.
#[derive(Parser, Debug)]
#[command(
    name = "pdf-alttag",
    version,
    about = "Attach LLM-generated alternative text to figures and links in tagged PDFs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Store key of the structurally tagged input PDF.
    document: String,

    /// Store key of the image manifest (SQLite database or text file).
    manifest: String,

    /// Local directory acting as the object store.
    #[arg(long, env = "PDF_ALTTAG_STORE_ROOT", conflicts_with = "store_url",
          required_unless_present = "store_url")]
    store_root: Option<PathBuf>,

    /// Base URL of an HTTP object store (GET/PUT per key).
    #[arg(long, env = "PDF_ALTTAG_STORE_URL")]
    store_url: Option<String>,

    /// Store timeout in seconds (HTTP store only).
    #[arg(long, env = "PDF_ALTTAG_STORE_TIMEOUT", default_value_t = 120)]
    store_timeout: u64,

    /// Key prefix for image payloads. Default: the manifest's directory.
    #[arg(long, env = "PDF_ALTTAG_PAYLOAD_PREFIX")]
    payload_prefix: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Vision model for figures (e.g. gpt-4.1-nano, gpt-4.1).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// Text model for links. Default: same as --model.
    #[arg(long, env = "PDF_ALTTAG_LINK_MODEL")]
    link_model: Option<String>,

    /// Minimum milliseconds between consecutive figure calls.
    #[arg(long, env = "PDF_ALTTAG_IMAGE_INTERVAL_MS", default_value_t = 5_000)]
    image_interval_ms: u64,

    /// Figure failure policy: best-effort or fail-fast.
    #[arg(long, env = "PDF_ALTTAG_IMAGE_POLICY", default_value = "best-effort")]
    image_policy: FailurePolicy,

    /// Link failure policy: best-effort or fail-fast.
    #[arg(long, env = "PDF_ALTTAG_LINK_POLICY", default_value = "fail-fast")]
    link_policy: FailurePolicy,

    /// Text for figures that got no description.
    #[arg(long, env = "PDF_ALTTAG_FALLBACK_TEXT")]
    fallback_text: Option<String>,

    /// Prefix stripped from the input file name.
    #[arg(long, env = "PDF_ALTTAG_INPUT_PREFIX", default_value = "COMPLIANT_")]
    input_prefix: String,

    /// Prefix given to the published file name.
    #[arg(long, env = "PDF_ALTTAG_OUTPUT_PREFIX", default_value = "FINAL_")]
    output_prefix: String,

    /// Max LLM output tokens per description.
    #[arg(long, env = "PDF_ALTTAG_MAX_TOKENS", default_value_t = 512)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "PDF_ALTTAG_TEMPERATURE", default_value_t = 0.2)]
    temperature: f32,

    /// Retries per description on LLM failure.
    #[arg(long, env = "PDF_ALTTAG_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Per-call LLM timeout in seconds.
    #[arg(long, env = "PDF_ALTTAG_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Keep model output verbatim instead of applying cleanup rules.
    #[arg(long, env = "PDF_ALTTAG_RAW")]
    raw: bool,

    /// Print the run report as JSON on stdout.
    #[arg(long, env = "PDF_ALTTAG_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "PDF_ALTTAG_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF_ALTTAG_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDF_ALTTAG_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs when active.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
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

    // ── Store ────────────────────────────────────────────────────────────
    let store: Box<dyn ObjectStore> = match (&cli.store_root, &cli.store_url) {
        (Some(root), _) => Box::new(LocalStore::new(root)),
        (None, Some(url)) => Box::new(
            HttpStore::new(url, cli.store_timeout).context("Failed to set up HTTP store")?,
        ),
        (None, None) => anyhow::bail!("one of --store-root or --store-url is required"),
    };

    // ── Config ───────────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn TaggingProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    let mut job = TagJob::new(&cli.document, &cli.manifest);
    if let Some(ref prefix) = cli.payload_prefix {
        job = job.with_payload_prefix(prefix);
    }

    // ── Ctrl-C cancels the run before anything is published ─────────────
    let (handle, token) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.cancel();
        }
    });

    let report = tag_document_with_cancel(store.as_ref(), &job, &config, token)
        .await
        .context("Tagging failed")?;

    if cli.json {
        let json = serde_json::to_string_pretty(&report).context("Failed to serialise report")?;
        println!("{json}");
    } else if !cli.quiet {
        eprintln!(
            "{}  {}/{} figures resolved  {} fallback  {}/{} links  {}ms  →  {}",
            if report.errors.is_empty() {
                green("✔")
            } else {
                cyan("⚠")
            },
            report.resolved(),
            report.images_total,
            report.fallback,
            report.links_tagged,
            report.links_total,
            report.total_duration_ms,
            bold(&report.output_key),
        );
        if !report.unmatched_ids.is_empty() {
            eprintln!(
                "   {} manifest ids with no figure node: {:?}",
                red("!"),
                report.unmatched_ids
            );
        }
        if !report.untracked_figures.is_empty() {
            eprintln!(
                "   {}",
                dim(&format!(
                    "{} figures not in the manifest were left untouched",
                    report.untracked_figures.len()
                ))
            );
        }
    }

    Ok(())
}

/// Map CLI args to `TagConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<TagConfig> {
    let mut builder = TagConfig::builder()
        .image_interval_ms(cli.image_interval_ms)
        .image_failure_policy(cli.image_policy)
        .link_failure_policy(cli.link_policy)
        .input_prefix(cli.input_prefix.as_str())
        .output_prefix(cli.output_prefix.as_str())
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .max_retries(cli.max_retries)
        .api_timeout_secs(cli.api_timeout)
        .clean_descriptions(!cli.raw);

    if let Some(ref name) = cli.provider {
        builder = builder.provider_name(name.as_str());
    }
    if let Some(ref model) = cli.model {
        builder = builder.image_model(model.as_str());
    }
    if let Some(ref model) = cli.link_model {
        builder = builder.link_model(model.as_str());
    }
    if let Some(ref text) = cli.fallback_text {
        builder = builder.fallback_text(text.as_str());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
