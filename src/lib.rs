//! # dli-fetch
//!
//! Locate a book on the Digital Library of India mirrors, download its page
//! images and assemble them into a single PDF.
//!
//! ## Pipeline Overview
//!
//! ```text
//! barcode
//!  │
//!  ├─ 1. Lookup    probe mirrors in priority order; scrape title and page count
//!  ├─ 2. Download  write urls.txt, fetch pages with aria2c / wget / curl / reqwest
//!  ├─ 3. Assemble  tiffcrop → tiffcp → tiff2pdf, or mogrify → gs, or sips → join.py
//!  └─ 4. Resize    optional Ghostscript re-render to a4 / letter
//! ```
//!
//! Page retrieval and PDF conversion are delegated to external programs;
//! this crate decides what to run, in which order, and whether it worked.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dli_fetch::{create_pdf, download_book, lookup_book, DliConfig, FetchTool};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DliConfig::builder().fetch_tool(FetchTool::Http).build()?;
//!     let found = lookup_book("2020050003466", &config).await?;
//!     println!("{} pages on {}", found.page_count, found.host);
//!
//!     let report = download_book("2020050003466", &found, &config).await?;
//!     let pdf = create_pdf(&report.directory, "book.pdf".as_ref(), &config).await?;
//!     eprintln!("{} bytes", pdf.size_bytes);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `dli` binary (clap + anyhow + tracing-subscriber + indicatif) |
//! | `html`  | on      | Scrapes the metadata table with `scraper`; without it titles and `TotalPages` are not read |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! dli-fetch = { version = "0.1", default-features = false, features = ["html"] }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod workflow;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{Actions, DliConfig, DliConfigBuilder, FetchTool, PaperSize, Toolchain, DEFAULT_HOSTS};
pub use error::{DliError, LookupError, Severity};
pub use output::{
    BookMetadata, DownloadReport, Host, LookupOutcome, LookupResult, OutputDocument, PageCount,
    RunReport,
};
pub use progress::{DliProgressCallback, NoopProgressCallback, ProgressCallback};
pub use workflow::{check_tools, create_pdf, download_book, find_hosts, lookup_book, resize_pdf, run};
