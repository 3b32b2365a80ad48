//! CLI binary for qbank2pdf.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `HarvestConfig`, opens a Chrome session and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use qbank2pdf::{
    harvest_items, load_records, render_items, run_with, save_records, write_atomic,
    ChromeSession, HarvestConfig, HarvestProgressCallback, HarvestStats, ImageStrategy, ItemError,
    PageLayout, PdfiumEncoder, PipelineVariant, ProgressCallback, ReqwestFetcher, SelectorSet,
    StopReason, UnresolvedFallback,
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

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a live progress bar plus one log line per
/// item slot.
struct CliProgressCallback {
    bar: ProgressBar,
    /// Per-item wall-clock start times for elapsed reporting.
    start_times: Mutex<HashMap<usize, Instant>>,
    skipped: AtomicUsize,
}

impl CliProgressCallback {
    /// Spinner until `on_harvest_start` tells us the slot count.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Opening start page…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            skipped: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} items  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Harvesting");
        self.bar.reset_eta();
    }

    fn elapsed_secs(&self, ordinal: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&ordinal))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl HarvestProgressCallback for CliProgressCallback {
    fn on_harvest_start(&self, total_items: usize) {
        self.activate_bar(total_items);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Harvesting up to {total_items} items…"))
        ));
    }

    fn on_item_start(&self, ordinal: usize, _total: usize) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(ordinal, Instant::now());
        }
        self.bar.set_message(format!("item {ordinal}"));
    }

    fn on_item_complete(&self, ordinal: usize, total: usize, image_count: usize) {
        let elapsed = self.elapsed_secs(ordinal);
        self.bar.println(format!(
            "  {} Item {:>3}/{:<3}  {:<10}  {}",
            green("✓"),
            ordinal,
            total,
            dim(&format!("{image_count:>3} images")),
            dim(&format!("{elapsed:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_item_skipped(&self, ordinal: usize, total: usize, reason: &str) {
        let elapsed = self.elapsed_secs(ordinal);
        self.skipped.fetch_add(1, Ordering::SeqCst);
        let msg: String = if reason.chars().count() > 80 {
            let mut s: String = reason.chars().take(79).collect();
            s.push('\u{2026}');
            s
        } else {
            reason.to_string()
        };
        self.bar.println(format!(
            "  {} Item {:>3}/{:<3}  {}  {}",
            red("✗"),
            ordinal,
            total,
            red(&msg),
            dim(&format!("{elapsed:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_harvest_complete(&self, total_items: usize, harvested: usize) {
        self.bar.finish_and_clear();
        let skipped = self.skipped.load(Ordering::SeqCst);
        if harvested == total_items {
            eprintln!(
                "{} {} items harvested",
                green("✔"),
                bold(&harvested.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} items harvested  ({} skipped)",
                if harvested == 0 { red("✘") } else { cyan("⚠") },
                bold(&harvested.to_string()),
                total_items,
                red(&skipped.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Attach to a logged-in Chrome (started with --remote-debugging-port=9222)
  qbank2pdf https://qbank.example/exam/118/A/1 --count 75 \
      --browser-ws ws://127.0.0.1:9222/devtools/browser/<id> -o 118A.pdf

  # Launch Chrome on a persistent profile, include the question text
  qbank2pdf https://qbank.example/exam/118/A/1 --count 75 --variant problem \
      --user-data-dir ~/.qbank-profile --font NotoSansJP-Regular.ttf -o 118A.pdf

  # Interleave four pages of a reference PDF after each item
  qbank2pdf https://qbank.example/exam/118/A/1 --count 75 \
      --merge-reference 118A-questions.pdf --group-size 4 -o 118A-merged.pdf

  # Keep the harvested records, re-render later without a browser
  qbank2pdf https://qbank.example/exam/118/A/1 --count 75 --records-out 118A.json
  qbank2pdf --from-records 118A.json --font NotoSansJP-Regular.ttf -o 118A.pdf

VARIANTS:
  explanation   explanation sections only (default)
  problem       question text, images and choices, then the explanation
  multi         as `problem`, with three sub-views before the reveal control
  reference     as `problem`, plus the reference-material block

ENVIRONMENT VARIABLES:
  QBANK2PDF_BROWSER_WS    DevTools websocket URL of a running Chrome
  QBANK2PDF_FONT          TrueType font used for all text (needed for CJK)
  PDFIUM_LIB_PATH         Directory or file of an existing libpdfium
  RUST_LOG                Overrides the log filter

Logging in is not handled here: sign in once in the attached or persistent
Chrome profile, then run qbank2pdf against it.
"#;

/// Harvest question-bank explanations into a printable PDF.
#[derive(Parser, Debug)]
#[command(
    name = "qbank2pdf",
    version,
    about = "Harvest question-bank items from a browser session into a printable PDF",
    long_about = "Walk a question-bank item sequence in an authenticated Chrome session, \
extract question text, answer explanations, diagnostic images and reference material, \
and assemble them into one PDF, optionally interleaved with a reference PDF.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// URL of the first item.
    #[arg(required_unless_present = "from_records")]
    start: Option<String>,

    /// Number of item slots to visit.
    #[arg(short = 'n', long, env = "QBANK2PDF_COUNT", default_value_t = 1)]
    count: usize,

    /// Output PDF path.
    #[arg(short, long, env = "QBANK2PDF_OUTPUT", default_value = "output.pdf")]
    output: PathBuf,

    /// Site variant: explanation, problem, multi, reference.
    #[arg(long, env = "QBANK2PDF_VARIANT", default_value = "explanation")]
    variant: String,

    /// Reference PDF (path or URL) to interleave with the assembled pages.
    #[arg(long, env = "QBANK2PDF_MERGE_REFERENCE")]
    merge_reference: Option<String>,

    /// Reference pages copied after each item.
    #[arg(long, env = "QBANK2PDF_GROUP_SIZE", default_value_t = 4)]
    group_size: usize,

    /// JSON file overriding the default selector set.
    #[arg(long, env = "QBANK2PDF_SELECTORS")]
    selectors: Option<PathBuf>,

    /// Image resolution strategy.
    #[arg(long, env = "QBANK2PDF_STRATEGY", value_enum, default_value = "fetch")]
    strategy: StrategyArg,

    /// Keep the URL of images that cannot be resolved instead of a placeholder.
    #[arg(long)]
    keep_unresolved_urls: bool,

    /// Concurrent image fetches per item (forced to 1 for screenshots).
    #[arg(long, env = "QBANK2PDF_IMAGE_CONCURRENCY", default_value_t = 4)]
    image_concurrency: usize,

    /// DevTools websocket URL of an already-running, logged-in Chrome.
    #[arg(long, env = "QBANK2PDF_BROWSER_WS", conflicts_with = "user_data_dir")]
    browser_ws: Option<String>,

    /// Launch Chrome on this persistent profile directory.
    #[arg(long, env = "QBANK2PDF_USER_DATA_DIR")]
    user_data_dir: Option<PathBuf>,

    /// Run a launched Chrome headless.
    #[arg(long)]
    headless: bool,

    /// Label the reveal control must carry before it is clicked.
    #[arg(long, env = "QBANK2PDF_REVEAL_LABEL")]
    reveal_label: Option<String>,

    /// TrueType font for all text.
    #[arg(long, env = "QBANK2PDF_FONT")]
    font: Option<PathBuf>,

    /// Directory or file of an existing libpdfium.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,

    /// Also write the harvested records as JSON.
    #[arg(long)]
    records_out: Option<PathBuf>,

    /// Render previously saved records instead of harvesting.
    #[arg(long, conflicts_with_all = ["browser_ws", "user_data_dir", "records_out"])]
    from_records: Option<PathBuf>,

    /// Polling interval for every wait, in milliseconds.
    #[arg(long, env = "QBANK2PDF_POLL_MS", default_value_t = 500)]
    poll_ms: u64,

    /// Seconds to wait for an item's content to appear.
    #[arg(long, env = "QBANK2PDF_READY_TIMEOUT", default_value_t = 30)]
    ready_timeout: u64,

    /// Seconds to wait for the explanation after the reveal click.
    #[arg(long, env = "QBANK2PDF_EXPLANATION_TIMEOUT", default_value_t = 15)]
    explanation_timeout: u64,

    /// Per-image fetch timeout in seconds.
    #[arg(long, env = "QBANK2PDF_FETCH_TIMEOUT", default_value_t = 30)]
    fetch_timeout: u64,

    /// Reference PDF download timeout in seconds.
    #[arg(long, env = "QBANK2PDF_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Print run statistics as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "QBANK2PDF_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "QBANK2PDF_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "QBANK2PDF_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum StrategyArg {
    Fetch,
    Screenshot,
}

impl From<StrategyArg> for ImageStrategy {
    fn from(v: StrategyArg) -> Self {
        match v {
            StrategyArg::Fetch => ImageStrategy::Fetch,
            StrategyArg::Screenshot => ImageStrategy::Screenshot,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar carries the per-item feedback; library logs drop to
    // errors while it is shown unless --verbose asks for everything.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && cli.from_records.is_none();
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

    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn HarvestProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb)?;
    let encoder = PdfiumEncoder::new(config.pdfium_lib_path.clone(), config.font_path.clone());

    // ── Re-render saved records ──────────────────────────────────────────
    if let Some(ref records) = cli.from_records {
        let items = load_records(records)
            .await
            .context("Failed to load records")?;
        let (rendered, stats) = render_items(&items, &encoder, &config)
            .await
            .context("Rendering failed")?;
        write_atomic(&config.output_path, &rendered.pdf)
            .await
            .context("Failed to write PDF")?;
        report(&cli, &config, &stats, &[])?;
        return Ok(());
    }

    // ── Harvest ──────────────────────────────────────────────────────────
    let session = open_session(&cli).await?;
    let fetcher = Arc::new(
        ReqwestFetcher::new(Duration::from_secs(config.fetch_timeout_secs))
            .context("Failed to build HTTP client")?,
    );

    let (pdf, stats, item_errors) = if let Some(ref records_out) = cli.records_out {
        let start = Instant::now();
        let harvest = harvest_items(&session, fetcher, &config)
            .await
            .context("Harvest failed")?;
        let harvest_duration_ms = start.elapsed().as_millis() as u64;
        save_records(records_out, &harvest.items)
            .await
            .context("Failed to save records")?;
        let (rendered, mut stats) = render_items(&harvest.items, &encoder, &config)
            .await
            .context("Rendering failed")?;
        stats.requested_items = config.item_count;
        stats.skipped_items = harvest.skipped;
        stats.stop_reason = harvest.stop_reason;
        stats.harvest_duration_ms = harvest_duration_ms;
        stats.total_duration_ms = start.elapsed().as_millis() as u64;
        (rendered.pdf, stats, harvest.item_errors)
    } else {
        let output = run_with(&session, fetcher, &encoder, &config)
            .await
            .context("Run failed")?;
        (output.pdf, output.stats, output.item_errors)
    };

    write_atomic(&config.output_path, &pdf)
        .await
        .context("Failed to write PDF")?;
    report(&cli, &config, &stats, &item_errors)?;
    Ok(())
}

/// Map CLI args to `HarvestConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<HarvestConfig> {
    let variant = PipelineVariant::from_preset(&cli.variant).with_context(|| {
        format!(
            "Unknown variant '{}' (expected explanation, problem, multi or reference)",
            cli.variant
        )
    })?;

    let selectors = match cli.selectors {
        Some(ref path) => SelectorSet::from_json_file(path)
            .with_context(|| format!("Failed to load selectors from {}", path.display()))?,
        None => SelectorSet::default(),
    };

    let fallback = if cli.keep_unresolved_urls {
        UnresolvedFallback::KeepUrl
    } else {
        UnresolvedFallback::Placeholder
    };

    // Rendering saved records never navigates; the records file is the origin.
    let start = match (&cli.start, &cli.from_records) {
        (Some(start), _) => start.clone(),
        (None, Some(records)) => records.display().to_string(),
        (None, None) => String::new(),
    };

    let mut builder = HarvestConfig::builder()
        .start_location(start)
        .item_count(cli.count)
        .output_path(cli.output.clone())
        .merge_group_size(cli.group_size)
        .variant(variant)
        .selectors(selectors)
        .poll_interval_ms(cli.poll_ms)
        .readiness_timeout_secs(cli.ready_timeout)
        .explanation_timeout_secs(cli.explanation_timeout)
        .fetch_timeout_secs(cli.fetch_timeout)
        .download_timeout_secs(cli.download_timeout)
        .image_strategy(cli.strategy.clone().into())
        .unresolved_fallback(fallback)
        .image_concurrency(cli.image_concurrency)
        .layout(PageLayout::default());

    if let Some(ref reference) = cli.merge_reference {
        builder = builder.merge_with_reference(reference.clone());
    }
    if let Some(ref label) = cli.reveal_label {
        builder = builder.reveal_label(label.clone());
    }
    if let Some(ref font) = cli.font {
        builder = builder.font_path(font.clone());
    }
    if let Some(ref lib) = cli.pdfium_lib {
        builder = builder.pdfium_lib_path(lib.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

async fn open_session(cli: &Cli) -> Result<ChromeSession> {
    match cli.browser_ws {
        Some(ref ws) => ChromeSession::connect(ws)
            .await
            .context("Failed to attach to Chrome"),
        None => ChromeSession::launch(cli.user_data_dir.as_deref(), cli.headless)
            .await
            .context("Failed to launch Chrome"),
    }
}

/// Summary on stderr, or the stats as JSON on stdout with `--json`.
fn report(
    cli: &Cli,
    config: &HarvestConfig,
    stats: &HarvestStats,
    item_errors: &[ItemError],
) -> Result<()> {
    if cli.json {
        let json = serde_json::json!({ "stats": stats, "item_errors": item_errors });
        println!(
            "{}",
            serde_json::to_string_pretty(&json).context("Failed to serialise stats")?
        );
        return Ok(());
    }
    if cli.quiet {
        return Ok(());
    }

    let clean = item_errors.is_empty() && stats.images_unresolved == 0;
    eprintln!(
        "{}  {}/{} items  {} pages  {}ms  →  {}",
        if clean { green("✔") } else { cyan("⚠") },
        stats.harvested_items,
        stats.requested_items,
        stats.output_pages,
        stats.total_duration_ms,
        bold(&config.output_path.display().to_string()),
    );
    if stats.reference_pages_copied > 0 {
        eprintln!(
            "   {} assembled + {} reference pages",
            dim(&stats.assembled_pages.to_string()),
            dim(&stats.reference_pages_copied.to_string()),
        );
    }
    if stats.images_unresolved > 0 {
        eprintln!(
            "   {} of {} images could not be resolved",
            red(&stats.images_unresolved.to_string()),
            stats.images_total,
        );
    }
    match stats.stop_reason {
        StopReason::EndOfContent => eprintln!("   {}", dim("stopped: no more content")),
        StopReason::AdvanceFailed => {
            eprintln!("   {}", red("stopped: next-item control failed"))
        }
        StopReason::Completed | StopReason::FromRecords => {}
    }
    for err in item_errors {
        eprintln!("   {} {}", cyan("·"), err);
    }
    Ok(())
}
