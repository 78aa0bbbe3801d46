//! CLI binary for docweave.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ExportConfig` and writes the produced document.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use docweave::{
    export, export_knowledge, html_to_pdf, write_atomically, ExportConfig, ExportFormat,
    ExportOutput, ExportProgressCallback, FileExport, KnowledgeDoc, ProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
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

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

/// Terminal progress callback: a live bar plus one log line per node and per
/// dropped image.
struct CliProgressCallback {
    bar: ProgressBar,
    /// Per-node wall-clock start times for elapsed reporting.
    start_times: Mutex<HashMap<usize, Instant>>,
    /// Count of dropped inline images.
    dropped: AtomicUsize,
}

impl CliProgressCallback {
    /// Spinner-only until `on_export_start` reports the node count.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Reading request…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            dropped: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} nodes  \
             ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Exporting");
    }

    fn elapsed_ms(&self, index: usize) -> u128 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&index))
            .map(|t| t.elapsed().as_millis())
            .unwrap_or(0)
    }
}

impl ExportProgressCallback for CliProgressCallback {
    fn on_export_start(&self, total_nodes: usize) {
        self.activate_bar(total_nodes);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Exporting {total_nodes} nodes…"))
        ));
    }

    fn on_node_start(&self, index: usize, _total: usize, topic: &str) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(index, Instant::now());
        }
        self.bar.set_message(topic.to_string());
    }

    fn on_node_complete(&self, index: usize, total: usize, topic: &str) {
        let elapsed_ms = self.elapsed_ms(index);
        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {}  {}",
            green("✓"),
            index,
            total,
            truncate(topic, 60),
            dim(&format!("{:.1}s", elapsed_ms as f64 / 1000.0)),
        ));
        self.bar.inc(1);
    }

    fn on_asset_error(&self, url: &str, error: &str) {
        self.dropped.fetch_add(1, Ordering::SeqCst);
        self.bar.println(format!(
            "      {} {}  {}",
            red("✗"),
            dim(&truncate(url, 60)),
            red(&truncate(error, 80)),
        ));
    }

    fn on_export_complete(&self, total_nodes: usize, bytes: usize) {
        self.bar.finish_and_clear();
        let dropped = self.dropped.load(Ordering::SeqCst);
        if dropped == 0 {
            eprintln!(
                "{} {} nodes exported  {}",
                green("✔"),
                bold(&total_nodes.to_string()),
                dim(&format!("{bytes} bytes"))
            );
        } else {
            eprintln!(
                "{} {} nodes exported  ({} images dropped)",
                cyan("⚠"),
                bold(&total_nodes.to_string()),
                red(&dropped.to_string()),
            );
        }
    }
}

/// Shorten `s` to at most `max` characters.
fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let head: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{head}\u{2026}")
    } else {
        s.to_string()
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Mind map to Word (format taken from the request, default docx)
  docweave file map.json -o map.docx

  # Force PDF output
  docweave --format pdf file map.json -o map.pdf

  # Read the request from stdin, write the document to stdout
  cat map.json | docweave file - > map.docx

  # Knowledge article
  docweave knowledge article.json -o article.docx

  # Plain HTML page to PDF
  docweave html-to-pdf page.html -o page.pdf

  # Export statistics as JSON
  docweave --json file map.json -o map.docx

REQUEST FORMAT (file):
  {"meta": {"name": "...", "author": "..."}, "format": "docx",
   "data": [{"id": "root", "topic": "...", "description": "<p>…</p>"},
            {"id": "a", "parentid": "root", "topic": "...", "layer": 2}]}

ENVIRONMENT VARIABLES:
  DOCWEAVE_PDF_COMMAND    HTML → PDF renderer executable (default wkhtmltopdf)
  RUST_LOG                Override the log filter (e.g. docweave=debug)

PDF output requires wkhtmltopdf (or a compatible command taking
`<args…> <input.html> <output.pdf>`) on PATH.
"#;

/// Export topic trees and articles to DOCX or PDF.
#[derive(Parser, Debug)]
#[command(
    name = "docweave",
    version,
    about = "Export hierarchical topic trees and articles to DOCX or PDF",
    long_about = "Export a flat, parent-referenced topic tree (mind map) or a knowledge \
article to a Word or PDF document. Descriptions are repaired, remote images localised and \
architecture diagrams rasterised before composition.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    opts: Opts,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Export a mind-map request (JSON). Use `-` for stdin.
    File { input: String },
    /// Export a knowledge article (JSON with title/contentHtml). Use `-` for stdin.
    Knowledge { input: String },
    /// Render an HTML file to PDF. Use `-` for stdin.
    HtmlToPdf { input: String },
}

#[derive(Args, Debug)]
struct Opts {
    /// Write the document to this file instead of stdout.
    #[arg(short, long, global = true, env = "DOCWEAVE_OUTPUT")]
    output: Option<PathBuf>,

    /// Output format. Default: the request's `format`, else docx.
    #[arg(long, global = true, value_enum, env = "DOCWEAVE_FORMAT")]
    format: Option<FormatArg>,

    /// TCP connect timeout for image downloads, in seconds.
    #[arg(long, global = true, env = "DOCWEAVE_CONNECT_TIMEOUT", default_value_t = 5)]
    connect_timeout: u64,

    /// Overall timeout per image download, in seconds. Default: unbounded.
    #[arg(long, global = true, env = "DOCWEAVE_READ_TIMEOUT")]
    read_timeout: Option<u64>,

    /// Concurrent image downloads within one description.
    #[arg(short, long, global = true, env = "DOCWEAVE_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Deepest heading level (1–9).
    #[arg(long, global = true, default_value_t = 9,
          value_parser = clap::value_parser!(u8).range(1..=9))]
    max_heading_level: u8,

    /// HTML → PDF renderer executable.
    #[arg(long, global = true, env = "DOCWEAVE_PDF_COMMAND")]
    pdf_command: Option<String>,

    /// Parent directory for per-export working directories.
    #[arg(long, global = true, env = "DOCWEAVE_WORK_DIR")]
    work_dir: Option<PathBuf>,

    /// Print export statistics as JSON on stdout (requires --output).
    #[arg(long, global = true, requires = "output")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, global = true, env = "DOCWEAVE_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "DOCWEAVE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "DOCWEAVE_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    Docx,
    Pdf,
}

impl From<FormatArg> for ExportFormat {
    fn from(v: FormatArg) -> Self {
        match v {
            FormatArg::Docx => ExportFormat::Docx,
            FormatArg::Pdf => ExportFormat::Pdf,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let opts = &cli.opts;

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level library logs.
    let show_progress = !opts.quiet && !opts.no_progress && !opts.json;
    let filter = if opts.verbose {
        "debug"
    } else if opts.quiet || show_progress {
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

    match &cli.command {
        Command::File { input } => {
            let request = FileExport::from_json(&read_input(input).await?)
                .context("Invalid export request")?;
            let format = opts
                .format
                .map(ExportFormat::from)
                .or_else(|| request.format.as_deref().and_then(ExportFormat::from_request))
                .unwrap_or_default();
            let config = build_config(opts, format, progress_callback(show_progress))?;
            let output = export(&request, &config).await.context("Export failed")?;
            deliver(opts, output).await
        }
        Command::Knowledge { input } => {
            let doc = KnowledgeDoc::from_json(&read_input(input).await?)
                .context("Invalid knowledge request")?;
            let format = opts.format.map(ExportFormat::from).unwrap_or_default();
            let config = build_config(opts, format, progress_callback(show_progress))?;
            let output = export_knowledge(&doc, &config)
                .await
                .context("Export failed")?;
            deliver(opts, output).await
        }
        Command::HtmlToPdf { input } => {
            let html = read_input(input).await?;
            let config = build_config(opts, ExportFormat::Pdf, None)?;
            let started = Instant::now();
            let pdf = html_to_pdf(&html, &config)
                .await
                .context("PDF rendering failed")?;
            write_document(opts.output.as_deref(), &pdf).await?;
            if !opts.quiet {
                eprintln!(
                    "{}  {} bytes  {}ms",
                    green("✔"),
                    pdf.len(),
                    started.elapsed().as_millis()
                );
            }
            Ok(())
        }
    }
}

fn progress_callback(show: bool) -> Option<ProgressCallback> {
    show.then(|| CliProgressCallback::new_dynamic() as Arc<dyn ExportProgressCallback>)
}

/// Map CLI args to `ExportConfig`.
fn build_config(
    opts: &Opts,
    format: ExportFormat,
    progress: Option<ProgressCallback>,
) -> Result<ExportConfig> {
    let mut builder = ExportConfig::builder()
        .format(format)
        .connect_timeout_secs(opts.connect_timeout)
        .concurrency(opts.concurrency)
        .max_heading_level(opts.max_heading_level);

    if let Some(secs) = opts.read_timeout {
        builder = builder.read_timeout_secs(secs);
    }
    if let Some(ref cmd) = opts.pdf_command {
        builder = builder.pdf_command(cmd.clone());
    }
    if let Some(ref dir) = opts.work_dir {
        builder = builder.work_dir_parent(dir.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Read a file, or stdin for `-`.
async fn read_input(input: &str) -> Result<String> {
    if input == "-" {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read stdin")?;
        return Ok(buf);
    }
    tokio::fs::read_to_string(input)
        .await
        .with_context(|| format!("Failed to read {input:?}"))
}

async fn write_document(output: Option<&Path>, bytes: &[u8]) -> Result<()> {
    match output {
        Some(path) => write_atomically(path, bytes)
            .await
            .with_context(|| format!("Failed to write {}", path.display())),
        None => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle
                .write_all(bytes)
                .and_then(|_| handle.flush())
                .context("Failed to write to stdout")
        }
    }
}

async fn deliver(opts: &Opts, output: ExportOutput) -> Result<()> {
    write_document(opts.output.as_deref(), &output.bytes).await?;

    if opts.json {
        let mime_type = output.mime_type();
        let summary = serde_json::json!({
            "file_name": output.file_name,
            "mime_type": mime_type,
            "stats": output.stats,
            "asset_errors": output.asset_errors,
        });
        let json = serde_json::to_string_pretty(&summary).context("Failed to serialise stats")?;
        println!("{json}");
        return Ok(());
    }

    if opts.quiet {
        return Ok(());
    }
    let stats = &output.stats;
    let target = opts
        .output
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "stdout".to_string());
    eprintln!(
        "{}  {}/{} nodes  {}ms  →  {}",
        if output.asset_errors.is_empty() {
            green("✔")
        } else {
            cyan("⚠")
        },
        stats.exported_nodes,
        stats.total_nodes,
        stats.total_duration_ms,
        bold(&target),
    );
    eprintln!(
        "   {} images ({} dropped)  /  {} diagrams  /  {} bytes",
        dim(&stats.images_embedded.to_string()),
        dim(&stats.images_failed.to_string()),
        dim(&stats.diagrams_embedded.to_string()),
        stats.output_bytes,
    );
    if stats.orphaned_nodes > 0 {
        eprintln!(
            "   {} nodes not reachable from the root were skipped",
            red(&stats.orphaned_nodes.to_string())
        );
    }
    Ok(())
}
