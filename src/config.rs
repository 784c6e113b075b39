//! Configuration types for locating, downloading and assembling a book.
//!
//! All behaviour is controlled through [`DliConfig`], built via its
//! [`DliConfigBuilder`]. The config is constructed once and passed by
//! reference into every component; nothing reads global state.

use crate::error::DliError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Known DLI mirrors, fastest and most available first.
///
/// `www.new1.dli.ernet.in` sits last because its page counts are unreliable.
pub const DEFAULT_HOSTS: &[&str] = &[
    "202.41.82.144",
    "www.dli.ernet.in",
    "www.new.dli.ernet.in",
    "www.dli.gov.in",
    "www.new.dli.gov.in",
    "www.new1.dli.ernet.in",
];

/// Configuration for a lookup / download / PDF run.
///
/// Built via [`DliConfig::builder()`] or using [`DliConfig::default()`].
///
/// # Example
/// ```rust
/// use dli_fetch::{DliConfig, FetchTool, Toolchain};
///
/// let config = DliConfig::builder()
///     .concurrency(8)
///     .fetch_tool(FetchTool::Curl)
///     .toolchain(Toolchain::Ghostscript)
///     .build()
///     .unwrap();
/// assert_eq!(config.concurrency, 8);
/// ```
#[derive(Clone)]
pub struct DliConfig {
    /// Mirror hosts in priority order. Default: [`DEFAULT_HOSTS`].
    pub hosts: Vec<String>,

    /// First page to download (1-indexed). Default: 1.
    pub first_page: u32,

    /// Last page to download. When `None` the page count discovered during
    /// lookup is used; if that is unknown too, the download is refused.
    pub last_page: Option<u32>,

    /// Per-page timeout in seconds, also used for the first-page probe. Default: 120.
    pub page_timeout_secs: u64,

    /// Timeout for each host's metadata request in seconds. Default: 10.
    pub lookup_timeout_secs: u64,

    /// Number of page fetches in flight at once. Default: 5.
    pub concurrency: usize,

    /// Directory receiving page images. Default: the barcode.
    pub directory: Option<PathBuf>,

    /// Output PDF path. Default: title-derived name, else `{barcode}.pdf`.
    ///
    /// Setting it explicitly disables the title-derived name.
    pub pdf_name: Option<PathBuf>,

    /// Re-fetch pages already present on disk. Default: false.
    pub overwrite: bool,

    /// Transport used to fetch page images. Default: [`FetchTool::Wget`].
    pub fetch_tool: FetchTool,

    /// Conversion toolchain for PDF assembly. Default: [`Toolchain::Tiff2Pdf`].
    pub toolchain: Toolchain,

    /// Paper size used by the resize step. Default: [`PaperSize::Letter`].
    pub paper_size: PaperSize,

    /// Name the PDF after the book title when metadata is available. Default: true.
    pub title_in_pdf_name: bool,

    /// Keep the page images and staging directory after assembly. Default: false.
    pub keep_temp: bool,

    /// Scrape the metadata table during lookup. Default: true.
    ///
    /// Has no effect when the crate is built without the `html` feature.
    pub scrape_metadata: bool,

    /// Look up external programs in this directory instead of `PATH`.
    pub tool_dir: Option<PathBuf>,

    /// Observer for lookup, download and assembly events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for DliConfig {
    fn default() -> Self {
        Self {
            hosts: DEFAULT_HOSTS.iter().map(|h| h.to_string()).collect(),
            first_page: 1,
            last_page: None,
            page_timeout_secs: 120,
            lookup_timeout_secs: 10,
            concurrency: 5,
            directory: None,
            pdf_name: None,
            overwrite: false,
            fetch_tool: FetchTool::default(),
            toolchain: Toolchain::default(),
            paper_size: PaperSize::default(),
            title_in_pdf_name: true,
            keep_temp: false,
            scrape_metadata: true,
            tool_dir: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for DliConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DliConfig")
            .field("hosts", &self.hosts)
            .field("first_page", &self.first_page)
            .field("last_page", &self.last_page)
            .field("page_timeout_secs", &self.page_timeout_secs)
            .field("lookup_timeout_secs", &self.lookup_timeout_secs)
            .field("concurrency", &self.concurrency)
            .field("directory", &self.directory)
            .field("pdf_name", &self.pdf_name)
            .field("overwrite", &self.overwrite)
            .field("fetch_tool", &self.fetch_tool)
            .field("toolchain", &self.toolchain)
            .field("paper_size", &self.paper_size)
            .field("title_in_pdf_name", &self.title_in_pdf_name)
            .field("keep_temp", &self.keep_temp)
            .field("scrape_metadata", &self.scrape_metadata)
            .field("tool_dir", &self.tool_dir)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn DliProgressCallback>"),
            )
            .finish()
    }
}

impl DliConfig {
    /// Create a new builder for `DliConfig`.
    pub fn builder() -> DliConfigBuilder {
        DliConfigBuilder {
            config: Self::default(),
        }
    }

    /// Directory holding the page images of `barcode`.
    pub fn directory_for(&self, barcode: &str) -> PathBuf {
        self.directory
            .clone()
            .unwrap_or_else(|| PathBuf::from(barcode))
    }

    /// Output path when neither `pdf_name` nor a title is available.
    pub fn default_pdf_name(barcode: &str) -> PathBuf {
        PathBuf::from(format!("{barcode}.pdf"))
    }

    /// Whether a title-derived PDF name may replace the default.
    pub fn wants_title_name(&self) -> bool {
        self.title_in_pdf_name && self.pdf_name.is_none()
    }
}

/// Builder for [`DliConfig`].
#[derive(Debug)]
pub struct DliConfigBuilder {
    config: DliConfig,
}

impl DliConfigBuilder {
    pub fn hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.hosts = hosts.into_iter().map(Into::into).collect();
        self
    }

    pub fn first_page(mut self, page: u32) -> Self {
        self.config.first_page = page;
        self
    }

    pub fn last_page(mut self, page: Option<u32>) -> Self {
        self.config.last_page = page;
        self
    }

    pub fn page_timeout_secs(mut self, secs: u64) -> Self {
        self.config.page_timeout_secs = secs;
        self
    }

    pub fn lookup_timeout_secs(mut self, secs: u64) -> Self {
        self.config.lookup_timeout_secs = secs;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n;
        self
    }

    pub fn directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.directory = Some(dir.into());
        self
    }

    pub fn pdf_name(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdf_name = Some(path.into());
        self
    }

    pub fn overwrite(mut self, v: bool) -> Self {
        self.config.overwrite = v;
        self
    }

    pub fn fetch_tool(mut self, tool: FetchTool) -> Self {
        self.config.fetch_tool = tool;
        self
    }

    pub fn toolchain(mut self, toolchain: Toolchain) -> Self {
        self.config.toolchain = toolchain;
        self
    }

    pub fn paper_size(mut self, size: PaperSize) -> Self {
        self.config.paper_size = size;
        self
    }

    pub fn title_in_pdf_name(mut self, v: bool) -> Self {
        self.config.title_in_pdf_name = v;
        self
    }

    pub fn keep_temp(mut self, v: bool) -> Self {
        self.config.keep_temp = v;
        self
    }

    pub fn scrape_metadata(mut self, v: bool) -> Self {
        self.config.scrape_metadata = v;
        self
    }

    pub fn tool_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.tool_dir = Some(dir.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<DliConfig, DliError> {
        let c = &self.config;
        if c.concurrency == 0 {
            return Err(DliError::InvalidConfig("Concurrency must be ≥ 1".into()));
        }
        if c.first_page == 0 {
            return Err(DliError::InvalidConfig(
                "Pages are 1-indexed, --first must be ≥ 1".into(),
            ));
        }
        if let Some(last) = c.last_page {
            if last < c.first_page {
                return Err(DliError::InvalidConfig(format!(
                    "Invalid page range {}-{}: first must be <= last",
                    c.first_page, last
                )));
            }
        }
        if c.hosts.is_empty() {
            return Err(DliError::InvalidConfig(
                "At least one server must be configured".into(),
            ));
        }
        if !c.toolchain.is_supported() {
            return Err(DliError::InvalidConfig(format!(
                "--pdf-tool {} is only supported on mac osx",
                c.toolchain
            )));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Transport used to retrieve page images.
///
/// All variants share the same semantics: existing files are skipped unless
/// overwriting, each URL succeeds or fails on its own, and at most
/// `concurrency` transfers run at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchTool {
    /// `aria2c -i urls.txt`, parallelism handled by aria2 itself.
    Aria,
    /// One `wget` process per page. (default)
    #[default]
    Wget,
    /// One `curl` process per page.
    Curl,
    /// In-process `reqwest` client; needs no external program.
    Http,
}

impl FetchTool {
    /// External programs this transport needs.
    pub fn required_tools(self) -> &'static [&'static str] {
        match self {
            FetchTool::Aria => &["aria2c"],
            FetchTool::Wget => &["wget"],
            FetchTool::Curl => &["curl"],
            FetchTool::Http => &[],
        }
    }
}

impl fmt::Display for FetchTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FetchTool::Aria => "aria",
            FetchTool::Wget => "wget",
            FetchTool::Curl => "curl",
            FetchTool::Http => "http",
        })
    }
}

/// Conversion toolchain used to turn page images into one PDF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Toolchain {
    /// libtiff: `tiffcrop` → `tiffcp` → `tiff2pdf`. (default)
    #[default]
    Tiff2Pdf,
    /// ImageMagick `mogrify` per page, then Ghostscript merge.
    #[serde(rename = "gs")]
    Ghostscript,
    /// macOS `sips` per page, then the Automator "Combine PDF Pages" script.
    Sips,
}

impl Toolchain {
    /// `sips` only exists on macOS.
    pub fn is_supported(self) -> bool {
        match self {
            Toolchain::Sips => cfg!(target_os = "macos"),
            _ => true,
        }
    }
}

impl fmt::Display for Toolchain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Toolchain::Tiff2Pdf => "tiff2pdf",
            Toolchain::Ghostscript => "gs",
            Toolchain::Sips => "sips",
        })
    }
}

/// Paper size passed to Ghostscript's `-sPAPERSIZE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaperSize {
    A4,
    #[default]
    Letter,
}

impl PaperSize {
    pub fn as_str(self) -> &'static str {
        match self {
            PaperSize::A4 => "a4",
            PaperSize::Letter => "letter",
        }
    }
}

impl fmt::Display for PaperSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which steps a run performs.
///
/// Mirrors the CLI actions; `lookup` without `download` enumerates every
/// host that serves the book instead of stopping at the first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Actions {
    pub lookup: bool,
    pub download: bool,
    pub create_pdf: bool,
    pub resize_pdf: bool,
}

impl Actions {
    /// The default chain for a bare barcode: lookup, download, create the PDF.
    pub fn full() -> Self {
        Self {
            lookup: true,
            download: true,
            create_pdf: true,
            resize_pdf: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.lookup || self.download || self.create_pdf || self.resize_pdf)
    }

    /// Lookup and download both need a barcode.
    pub fn needs_barcode(&self) -> bool {
        self.lookup || self.download
    }

    /// External programs the selected actions will invoke.
    pub fn required_tools(&self, config: &DliConfig) -> Vec<&'static str> {
        let mut tools: Vec<&'static str> = Vec::new();
        if self.download {
            tools.extend_from_slice(config.fetch_tool.required_tools());
        }
        if self.create_pdf {
            tools.extend_from_slice(match config.toolchain {
                Toolchain::Tiff2Pdf => &["tiffcrop", "tiffcp", "tiff2pdf"][..],
                Toolchain::Ghostscript => &["mogrify", "gs"][..],
                Toolchain::Sips => &["join.py", "sips"][..],
            });
        }
        if self.resize_pdf {
            tools.push("gs");
        }
        tools.sort_unstable();
        tools.dedup();
        tools
    }
}

/// Join a page-image directory with its staging-directory suffix.
pub(crate) fn staging_dir_for(source_dir: &Path) -> PathBuf {
    let mut name = source_dir.as_os_str().to_owned();
    name.push("-temp-pdf");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_cli() {
        let c = DliConfig::default();
        assert_eq!(c.hosts.len(), DEFAULT_HOSTS.len());
        assert_eq!(c.hosts[0], "202.41.82.144");
        assert_eq!(c.first_page, 1);
        assert_eq!(c.page_timeout_secs, 120);
        assert_eq!(c.lookup_timeout_secs, 10);
        assert_eq!(c.concurrency, 5);
        assert_eq!(c.fetch_tool, FetchTool::Wget);
        assert_eq!(c.toolchain, Toolchain::Tiff2Pdf);
        assert_eq!(c.paper_size, PaperSize::Letter);
    }

    #[test]
    fn build_rejects_zero_concurrency() {
        let err = DliConfig::builder().concurrency(0).build().unwrap_err();
        assert!(matches!(err, DliError::InvalidConfig(_)));
    }

    #[test]
    fn build_rejects_inverted_range() {
        let err = DliConfig::builder()
            .first_page(10)
            .last_page(Some(3))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("10-3"), "got: {err}");
    }

    #[test]
    fn build_rejects_empty_host_list() {
        let err = DliConfig::builder()
            .hosts(Vec::<String>::new())
            .build()
            .unwrap_err();
        assert!(matches!(err, DliError::InvalidConfig(_)));
    }

    #[cfg(not(target_os = "macos"))]
    #[test]
    fn sips_is_rejected_off_macos() {
        let err = DliConfig::builder()
            .toolchain(Toolchain::Sips)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("mac osx"));
    }

    #[test]
    fn explicit_pdf_name_disables_title_name() {
        let c = DliConfig::builder().pdf_name("out.pdf").build().unwrap();
        assert!(!c.wants_title_name());
        assert!(DliConfig::default().wants_title_name());
    }

    #[test]
    fn directory_defaults_to_barcode() {
        let c = DliConfig::default();
        assert_eq!(c.directory_for("99999"), PathBuf::from("99999"));
        let c = DliConfig::builder().directory("pages").build().unwrap();
        assert_eq!(c.directory_for("99999"), PathBuf::from("pages"));
    }

    #[test]
    fn required_tools_follow_actions() {
        let config = DliConfig::default();
        let tools = Actions::full().required_tools(&config);
        assert_eq!(tools, vec!["tiff2pdf", "tiffcp", "tiffcrop", "wget"]);

        let config = DliConfig::builder()
            .fetch_tool(FetchTool::Http)
            .toolchain(Toolchain::Ghostscript)
            .build()
            .unwrap();
        let actions = Actions {
            resize_pdf: true,
            ..Actions::full()
        };
        assert_eq!(actions.required_tools(&config), vec!["gs", "mogrify"]);
    }

    #[test]
    fn staging_dir_appends_suffix() {
        assert_eq!(
            staging_dir_for(Path::new("books/123")),
            PathBuf::from("books/123-temp-pdf")
        );
    }

    #[test]
    fn toolchain_serde_names() {
        let json = serde_json::to_string(&Toolchain::Ghostscript).unwrap();
        assert_eq!(json, "\"gs\"");
        let t: FetchTool = serde_json::from_str("\"aria\"").unwrap();
        assert_eq!(t, FetchTool::Aria);
    }
}
