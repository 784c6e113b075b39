//! CLI binary for dli-fetch.
//!
//! A thin shim over the library crate that maps CLI flags to `DliConfig`
//! and `Actions`, sets up logging and renders progress.

use anyhow::{Context, Result};
use clap::Parser;
use dli_fetch::{
    check_tools, run, Actions, DliConfig, DliProgressCallback, FetchTool, PaperSize,
    ProgressCallback, RunReport, Toolchain, DEFAULT_HOSTS,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

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

/// Terminal progress: a spinner while probing hosts and assembling, a page
/// bar while downloading. Each phase gets a fresh bar.
struct CliProgressCallback {
    bar: Mutex<ProgressBar>,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            bar: Mutex::new(ProgressBar::hidden()),
        })
    }

    fn spinner(prefix: &str) -> ProgressBar {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix(prefix.to_string());
        bar.enable_steady_tick(Duration::from_millis(80));
        bar
    }

    fn page_bar(total: usize) -> ProgressBar {
        let bar = ProgressBar::new(total as u64);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  \
                 [{bar:42.green/238}] {pos:>4}/{len} pages  \
                 ⏱ {elapsed_precise}  ETA {eta_precise}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS),
        );
        bar.set_prefix("Downloading");
        bar.enable_steady_tick(Duration::from_millis(80));
        bar
    }

    /// Replace the current bar, clearing the old one.
    fn switch(&self, next: ProgressBar) {
        let mut bar = self.bar.lock().unwrap();
        bar.finish_and_clear();
        *bar = next;
    }

    fn println(&self, line: String) {
        self.bar.lock().unwrap().println(line);
    }
}

impl DliProgressCallback for CliProgressCallback {
    fn on_host_start(&self, host: &str, rank: usize, total: usize) {
        if rank == 1 {
            self.switch(Self::spinner("Lookup"));
        }
        self.bar
            .lock()
            .unwrap()
            .set_message(format!("server {rank}/{total}: {host}"));
    }

    fn on_host_result(&self, host: &str, available: bool, detail: Option<&str>) {
        if available {
            self.println(format!("  {} {}", green("✓"), host));
        } else {
            self.println(format!(
                "  {} {}  {}",
                red("✗"),
                host,
                dim(detail.unwrap_or("unavailable"))
            ));
        }
    }

    fn on_download_start(&self, total_pages: usize) {
        self.switch(Self::page_bar(total_pages));
    }

    fn on_page_fetched(&self, _page_url: &str, done: usize, _total: usize) {
        self.bar.lock().unwrap().set_position(done as u64);
    }

    fn on_download_complete(&self, retrieved: usize, requested: usize) {
        self.switch(ProgressBar::hidden());
        if retrieved >= requested {
            eprintln!("{} {} pages downloaded", green("✔"), bold(&retrieved.to_string()));
        } else {
            eprintln!(
                "{} {}/{} pages present  ({} missing, re-run to resume)",
                cyan("⚠"),
                bold(&retrieved.to_string()),
                requested,
                red(&(requested - retrieved).to_string()),
            );
        }
    }

    fn on_stage_start(&self, stage: &str, index: usize, total: usize) {
        if index == 1 {
            self.switch(Self::spinner("Assembling"));
        }
        self.bar
            .lock()
            .unwrap()
            .set_message(format!("[{index}/{total}] {stage}"));
    }

    fn on_document_ready(&self, path: &Path, size_bytes: u64) {
        self.switch(ProgressBar::hidden());
        eprintln!(
            "{} {}  {}",
            green("✔"),
            bold(&path.display().to_string()),
            dim(&format!("{size_bytes} bytes"))
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Look up, download and create <barcode>.pdf (or <Title>_<barcode>.pdf)
  dli 2020050003466

  # List every server that has the book
  dli --lookup 2020050003466

  # Download pages 1-50 with aria2c, 10 connections, keep the images
  dli --lookup --download --download-tool aria --download-parallel 10 --last 50 2020050003466

  # Build and resize a PDF from images that are already on disk
  dli --create-pdf --resize-pdf --directory pages --pdf-name book.pdf --pdf-size a4

  # Download a list of books
  cat barcodes.txt | xargs -n1 dli

REQUIRED TOOLS:
  --download-tool aria       aria2c
  --download-tool wget       wget (default)
  --download-tool curl       curl
  --download-tool http       none (built in)
  --pdf-tool tiff2pdf        tiffcrop, tiffcp, tiff2pdf (libtiff, default)
  --pdf-tool gs              mogrify (ImageMagick), gs (Ghostscript)
  --pdf-tool sips            sips and Automator (macOS only)
  --resize-pdf               gs

ENVIRONMENT VARIABLES:
  RUST_LOG                   Override console log filter (e.g. dli_fetch=debug)
  DLI_*                      Every option can also be set as DLI_<OPTION>
"#;

/// Download books from the Digital Library of India.
#[derive(Parser, Debug)]
#[command(
    name = "dli",
    version,
    about = "Download books from the Digital Library of India and assemble them into a PDF",
    long_about = "Looks up a book on the Digital Library of India mirrors, downloads its page \
images in parallel and combines them into a single PDF with libtiff, Ghostscript or sips. \
Given only a barcode, --lookup --download --create-pdf are implied.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Barcode of the book.
    barcode: Option<String>,

    /// Barcode of the book (older spelling of the positional argument).
    #[arg(long = "barcode", id = "barcode_flag", hide = true, conflicts_with = "barcode")]
    barcode_flag: Option<String>,

    // ── actions ──────────────────────────────────────────────────────────
    /// Print the configured servers.
    #[arg(long)]
    list_servers: bool,

    /// Find the servers that host the book.
    #[arg(long)]
    lookup: bool,

    /// Download the page images.
    #[arg(long)]
    download: bool,

    /// Combine the page images into a PDF.
    #[arg(long)]
    create_pdf: bool,

    /// Resize the PDF to --pdf-size.
    #[arg(long)]
    resize_pdf: bool,

    // ── lookup ───────────────────────────────────────────────────────────
    /// Servers to try, in priority order (repeat or comma-separate).
    #[arg(long = "server", env = "DLI_SERVERS", value_delimiter = ',', num_args = 1..)]
    servers: Vec<String>,

    /// Timeout for each server's metadata request, in seconds.
    #[arg(long, env = "DLI_LOOKUP_TIMEOUT", default_value_t = 10)]
    lookup_timeout: u64,

    /// Do not scrape the metadata table (title, author, page count).
    #[arg(long, env = "DLI_NO_METADATA")]
    no_metadata: bool,

    // ── download ─────────────────────────────────────────────────────────
    /// First page to download.
    #[arg(long, env = "DLI_FIRST", default_value_t = 1,
          value_parser = clap::value_parser!(u32).range(1..))]
    first: u32,

    /// Last page to download. Default: the page count found during lookup.
    #[arg(long, env = "DLI_LAST", value_parser = clap::value_parser!(u32).range(1..))]
    last: Option<u32>,

    /// Per-page download timeout in seconds.
    #[arg(long, env = "DLI_TIMEOUT", default_value_t = 120)]
    timeout: u64,

    /// Number of pages downloaded in parallel.
    #[arg(short = 'p', long, env = "DLI_DOWNLOAD_PARALLEL", default_value_t = 5)]
    download_parallel: usize,

    /// Download directory. Default: the barcode.
    #[arg(short, long, env = "DLI_DIRECTORY")]
    directory: Option<PathBuf>,

    /// Re-download pages that already exist.
    #[arg(long, env = "DLI_OVERWRITE")]
    overwrite: bool,

    /// Program used to download pages.
    #[arg(long, env = "DLI_DOWNLOAD_TOOL", value_enum, default_value = "wget")]
    download_tool: DownloadToolArg,

    // ── PDF ──────────────────────────────────────────────────────────────
    /// Output PDF. Default: <Title>_<barcode>.pdf when known, else <barcode>.pdf.
    #[arg(short = 'o', long, env = "DLI_PDF_NAME")]
    pdf_name: Option<PathBuf>,

    /// Do not name the PDF after the book title.
    #[arg(long, env = "DLI_NO_TITLE_IN_PDF_NAME")]
    no_title_in_pdf_name: bool,

    /// Toolchain used to build the PDF.
    #[arg(long, env = "DLI_PDF_TOOL", value_enum, default_value = "tiff2pdf")]
    pdf_tool: PdfToolArg,

    /// Paper size for --resize-pdf.
    #[arg(long, env = "DLI_PDF_SIZE", value_enum, default_value = "letter")]
    pdf_size: PdfSizeArg,

    /// Keep the downloaded images and intermediate files.
    #[arg(long, env = "DLI_NO_DELETE_TEMP")]
    no_delete_temp: bool,

    /// Open the PDF once it has been created.
    #[arg(long, env = "DLI_PDF_OPEN")]
    pdf_open: bool,

    // ── environment ──────────────────────────────────────────────────────
    /// Look up external programs in this directory instead of PATH.
    #[arg(long, env = "DLI_TOOL_DIR")]
    tool_dir: Option<PathBuf>,

    /// Skip checking that the required programs are installed.
    #[arg(long, env = "DLI_NO_CHECK_TOOLS")]
    no_check_tools: bool,

    /// Debug log file; "none" disables it.
    #[arg(long, env = "DLI_LOG_FILE", default_value = "dli.log")]
    log_file: String,

    /// Print the run report as JSON on stdout.
    #[arg(long, env = "DLI_JSON")]
    json: bool,

    /// Disable progress bars.
    #[arg(long, env = "DLI_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level console logs.
    #[arg(short, long, env = "DLI_VERBOSE")]
    verbose: bool,

    /// Suppress all console output except errors.
    #[arg(short, long, env = "DLI_QUIET", conflicts_with = "verbose")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum DownloadToolArg {
    Aria,
    Wget,
    Curl,
    Http,
}

impl From<DownloadToolArg> for FetchTool {
    fn from(v: DownloadToolArg) -> Self {
        match v {
            DownloadToolArg::Aria => FetchTool::Aria,
            DownloadToolArg::Wget => FetchTool::Wget,
            DownloadToolArg::Curl => FetchTool::Curl,
            DownloadToolArg::Http => FetchTool::Http,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum PdfToolArg {
    Gs,
    Sips,
    Tiff2pdf,
}

impl From<PdfToolArg> for Toolchain {
    fn from(v: PdfToolArg) -> Self {
        match v {
            PdfToolArg::Gs => Toolchain::Ghostscript,
            PdfToolArg::Sips => Toolchain::Sips,
            PdfToolArg::Tiff2pdf => Toolchain::Tiff2Pdf,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum PdfSizeArg {
    A4,
    Letter,
}

impl From<PdfSizeArg> for PaperSize {
    fn from(v: PdfSizeArg) -> Self {
        match v {
            PdfSizeArg::A4 => PaperSize::A4,
            PdfSizeArg::Letter => PaperSize::Letter,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bars replace INFO-level console logs; the log file
    // always records everything at DEBUG.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let _log_guard = init_logging(&cli, show_progress)?;
    debug!("{:?}", cli);

    let barcode = cli.barcode.clone().or_else(|| cli.barcode_flag.clone());
    let actions = resolve_actions(&cli, barcode.is_some());

    if cli.list_servers {
        let hosts = host_list(&cli);
        for (i, host) in hosts.iter().enumerate() {
            println!("{:>2}. {}", i + 1, host);
        }
        if actions.is_empty() {
            return Ok(());
        }
    }
    if actions.is_empty() {
        anyhow::bail!("Nothing to do: specify a barcode or one of --lookup, --download, --create-pdf, --resize-pdf");
    }

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn DliProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;
    debug!("{:?}", config);

    if !cli.no_check_tools {
        check_tools(&actions, &config).context("Required tools are missing")?;
    }

    // ── Run ──────────────────────────────────────────────────────────────
    let report = run(barcode.as_deref(), actions, &config)
        .await
        .context("dli failed")?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialise report")?
        );
    } else if !cli.quiet {
        print_summary(&report, show_progress);
    }

    if cli.pdf_open {
        if let Some(ref doc) = report.document {
            open_document(&doc.path);
        }
    }

    Ok(())
}

/// Console layer on stderr plus an optional DEBUG file layer.
fn init_logging(cli: &Cli, show_progress: bool) -> Result<Option<WorkerGuard>> {
    let level = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    let console = fmt::layer()
        .with_target(false)
        .with_writer(io::stderr)
        .with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)));

    let (file, guard) = if cli.log_file.eq_ignore_ascii_case("none") {
        (None, None)
    } else {
        let path = Path::new(&cli.log_file);
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let name = path
            .file_name()
            .with_context(|| format!("Invalid log file '{}'", cli.log_file))?;
        let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
        let layer = fmt::layer()
            .with_ansi(false)
            .with_writer(writer)
            .with_filter(LevelFilter::DEBUG);
        (Some(layer), Some(guard))
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init()
        .context("Failed to initialise logging")?;
    Ok(guard)
}

/// A bare barcode implies lookup, download and create-pdf.
fn resolve_actions(cli: &Cli, has_barcode: bool) -> Actions {
    let actions = Actions {
        lookup: cli.lookup,
        download: cli.download,
        create_pdf: cli.create_pdf,
        resize_pdf: cli.resize_pdf,
    };
    if actions.is_empty() && !cli.list_servers && has_barcode {
        Actions::full()
    } else {
        actions
    }
}

fn host_list(cli: &Cli) -> Vec<String> {
    if cli.servers.is_empty() {
        DEFAULT_HOSTS.iter().map(|h| h.to_string()).collect()
    } else {
        cli.servers.clone()
    }
}

/// Map CLI args to `DliConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<DliConfig> {
    let mut builder = DliConfig::builder()
        .hosts(host_list(cli))
        .first_page(cli.first)
        .last_page(cli.last)
        .page_timeout_secs(cli.timeout)
        .lookup_timeout_secs(cli.lookup_timeout)
        .concurrency(cli.download_parallel)
        .overwrite(cli.overwrite)
        .fetch_tool(cli.download_tool.into())
        .toolchain(cli.pdf_tool.into())
        .paper_size(cli.pdf_size.into())
        .title_in_pdf_name(!cli.no_title_in_pdf_name)
        .keep_temp(cli.no_delete_temp)
        .scrape_metadata(!cli.no_metadata);

    if let Some(ref dir) = cli.directory {
        builder = builder.directory(dir);
    }
    if let Some(ref name) = cli.pdf_name {
        builder = builder.pdf_name(name);
    }
    if let Some(ref dir) = cli.tool_dir {
        builder = builder.tool_dir(dir);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn print_summary(report: &RunReport, show_progress: bool) {
    if let (Some(lookup), None) = (&report.lookup, &report.download) {
        for result in lookup.available() {
            println!(
                "{}  {} pages  {}",
                result.host,
                result.page_count,
                dim(&result.base_url)
            );
        }
        if lookup.chosen().is_none() {
            eprintln!("{} Not available on any server", red("✘"));
        }
    }

    // The progress callback already reported downloads and documents.
    if show_progress {
        return;
    }
    if let Some(ref download) = report.download {
        eprintln!(
            "Downloaded {}/{} pages to {}",
            download.retrieved,
            download.requested,
            download.directory.display()
        );
    }
    if let Some(ref doc) = report.document {
        eprintln!("Created {} ({} bytes)", doc.path.display(), doc.size_bytes);
    }
}

/// Open `path` with the platform viewer; failures are only logged.
fn open_document(path: &Path) {
    debug!("Opening file {}", path.display());
    let mut command = if cfg!(target_os = "macos") {
        std::process::Command::new("open")
    } else if cfg!(target_os = "windows") {
        let mut c = std::process::Command::new("cmd");
        c.args(["/C", "start", ""]);
        c
    } else {
        std::process::Command::new("xdg-open")
    };
    if let Err(e) = command.arg(path).spawn() {
        warn!("Could not open {}: {}", path.display(), e);
    }
}
