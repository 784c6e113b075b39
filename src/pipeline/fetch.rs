//! Page-image fetch strategies.
//!
//! A strategy receives the page manifest and fills the destination
//! directory. All strategies share the same contract:
//!
//! * an existing target file is left alone unless overwriting,
//! * every URL succeeds or fails on its own (no retries),
//! * at most `concurrency` transfers are in flight.
//!
//! `aria2c` reads the manifest file and schedules transfers itself. The
//! per-URL strategies (`wget`, `curl`, in-process `http`) go through
//! [`fetch_each`], which bounds concurrency with `buffer_unordered` and
//! writes each page to `{name}.part` before renaming it into place.

use crate::config::FetchTool;
use crate::error::DliError;
use crate::pipeline::tools::{run_tool, ToolSet};
use crate::progress::ProgressCallback;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::Client;
use std::ffi::OsStr;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// One download request handed to a [`FetchStrategy`].
pub struct FetchJob<'a> {
    /// Page URLs in manifest order.
    pub urls: &'a [String],
    /// `urls.txt`, already written.
    pub manifest_path: &'a Path,
    pub dest_dir: &'a Path,
    pub concurrency: usize,
    /// Per-page timeout.
    pub timeout: Duration,
    pub overwrite: bool,
    pub progress: Option<&'a ProgressCallback>,
}

/// A pluggable page-retrieval transport.
#[async_trait]
pub trait FetchStrategy: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Retrieve the job's pages.
    ///
    /// Individual page failures are not errors; only a transport that cannot
    /// run at all (e.g. the program fails to start) returns `Err`.
    async fn fetch(&self, job: &FetchJob<'_>) -> Result<(), DliError>;
}

/// Instantiate the strategy for `tool`.
pub fn fetcher_for(tool: FetchTool, tools: &ToolSet) -> Result<Box<dyn FetchStrategy>, DliError> {
    Ok(match tool {
        FetchTool::Aria => Box::new(Aria2Fetcher {
            program: tools.program("aria2c"),
        }),
        FetchTool::Wget => Box::new(WgetFetcher {
            program: tools.program("wget"),
        }),
        FetchTool::Curl => Box::new(CurlFetcher {
            program: tools.program("curl"),
        }),
        FetchTool::Http => Box::new(HttpFetcher::new()?),
    })
}

/// File name a page URL is stored under (its last path segment).
pub fn target_name(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/').next().unwrap_or(path)
}

/// How one page ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageStatus {
    Fetched,
    /// Target already present and overwriting is off.
    Skipped,
    Failed,
}

/// Run `fetch_one(url, part_path)` for every manifest URL, at most
/// `job.concurrency` at a time.
///
/// `fetch_one` returns whether the transfer succeeded; on success the part
/// file is renamed to its final name, otherwise it is removed.
pub async fn fetch_each<F, Fut>(job: &FetchJob<'_>, fetch_one: F) -> Result<Vec<PageStatus>, DliError>
where
    F: Fn(String, PathBuf) -> Fut,
    Fut: Future<Output = Result<bool, DliError>>,
{
    let total = job.urls.len();
    let done = AtomicUsize::new(0);
    let fetch_one = &fetch_one;
    let done = &done;

    // Built eagerly: a lazily mapped iterator here makes the future not `Send`.
    let pending: Vec<_> = job.urls.iter().map(move |url| async move {
        let name = target_name(url);
        let target = job.dest_dir.join(name);
        let status = if !job.overwrite && target.exists() {
            debug!("{} exists, skipping", target.display());
            Ok(PageStatus::Skipped)
        } else {
            let part = job.dest_dir.join(format!("{name}.part"));
            match fetch_one(url.clone(), part.clone()).await {
                Ok(true) if part.is_file() => tokio::fs::rename(&part, &target)
                    .await
                    .map(|_| PageStatus::Fetched)
                    .map_err(|e| DliError::io(&target, e)),
                Ok(_) => {
                    warn!("Failed to fetch {}", url);
                    let _ = tokio::fs::remove_file(&part).await;
                    Ok(PageStatus::Failed)
                }
                Err(e) => {
                    let _ = tokio::fs::remove_file(&part).await;
                    Err(e)
                }
            }
        };

        let settled = done.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(cb) = job.progress {
            cb.on_page_fetched(url, settled, total);
        }
        status
    }).collect();

    let results: Vec<Result<PageStatus, DliError>> = stream::iter(pending)
        .buffer_unordered(job.concurrency.max(1))
        .collect()
        .await;

    let statuses = results.into_iter().collect::<Result<Vec<_>, _>>()?;
    let count = |s: PageStatus| statuses.iter().filter(|&&x| x == s).count();
    info!(
        "Fetched {} pages, skipped {} existing, {} failed",
        count(PageStatus::Fetched),
        count(PageStatus::Skipped),
        count(PageStatus::Failed)
    );
    Ok(statuses)
}

// ── aria2c ───────────────────────────────────────────────────────────────

/// Upper bound aria2c accepts for `-x` (connections per server).
pub const ARIA2_MAX_CONNECTIONS: usize = 16;

fn aria2_connections(concurrency: usize) -> usize {
    concurrency.clamp(1, ARIA2_MAX_CONNECTIONS)
}

/// Hands the whole manifest to a single `aria2c` process.
pub struct Aria2Fetcher {
    program: PathBuf,
}

#[async_trait]
impl FetchStrategy for Aria2Fetcher {
    fn name(&self) -> &'static str {
        "aria"
    }

    async fn fetch(&self, job: &FetchJob<'_>) -> Result<(), DliError> {
        let mut args: Vec<String> = vec![
            "-i".into(),
            job.manifest_path.display().to_string(),
            "-d".into(),
            job.dest_dir.display().to_string(),
            "-j".into(),
            job.concurrency.max(1).to_string(),
            "-x".into(),
            aria2_connections(job.concurrency).to_string(),
            format!("--timeout={}", job.timeout.as_secs()),
            "--auto-file-renaming=false".into(),
            "--console-log-level=warn".into(),
        ];
        if job.overwrite {
            args.push("--allow-overwrite=true".into());
        }

        let out = run_tool(&self.program, &args, None).await?;
        if !out.success {
            // Also non-zero when a single page fails or already exists.
            warn!("aria2c exited with code {:?}; see the log for details", out.code);
        }
        Ok(())
    }
}

// ── wget ─────────────────────────────────────────────────────────────────

/// One `wget` process per page.
pub struct WgetFetcher {
    program: PathBuf,
}

#[async_trait]
impl FetchStrategy for WgetFetcher {
    fn name(&self) -> &'static str {
        "wget"
    }

    async fn fetch(&self, job: &FetchJob<'_>) -> Result<(), DliError> {
        let timeout = job.timeout.as_secs().to_string();
        fetch_each(job, |url, part| {
            let timeout = timeout.clone();
            async move {
                let args = [
                    OsStr::new("-T"),
                    OsStr::new(&timeout),
                    OsStr::new("--no-verbose"),
                    OsStr::new("-O"),
                    part.as_os_str(),
                    OsStr::new(&url),
                ];
                Ok::<_, DliError>(run_tool(&self.program, args, None).await?.success)
            }
        })
        .await
        .map(|_| ())
    }
}

// ── curl ─────────────────────────────────────────────────────────────────

/// One `curl` process per page.
pub struct CurlFetcher {
    program: PathBuf,
}

#[async_trait]
impl FetchStrategy for CurlFetcher {
    fn name(&self) -> &'static str {
        "curl"
    }

    async fn fetch(&self, job: &FetchJob<'_>) -> Result<(), DliError> {
        let timeout = job.timeout.as_secs().to_string();
        fetch_each(job, |url, part| {
            let timeout = timeout.clone();
            async move {
                let args = [
                    OsStr::new("-sS"),
                    OsStr::new("-f"),
                    OsStr::new("--max-time"),
                    OsStr::new(&timeout),
                    OsStr::new("-o"),
                    part.as_os_str(),
                    OsStr::new(&url),
                ];
                Ok::<_, DliError>(run_tool(&self.program, args, None).await?.success)
            }
        })
        .await
        .map(|_| ())
    }
}

// ── in-process HTTP ──────────────────────────────────────────────────────

/// Streams pages with `reqwest`; needs no external program.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, DliError> {
        let client = Client::builder()
            .user_agent(concat!("dli-fetch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DliError::Http(e.to_string()))?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    async fn fetch_page(&self, url: &str, part: &Path, timeout: Duration) -> Result<bool, DliError> {
        let response = match self.client.get(url).timeout(timeout).send().await {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                debug!("{} returned {}", url, r.status());
                return Ok(false);
            }
            Err(e) => {
                debug!("{} failed: {}", url, e);
                return Ok(false);
            }
        };

        let mut file = tokio::fs::File::create(part)
            .await
            .map_err(|e| DliError::io(part, e))?;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) => file
                    .write_all(&bytes)
                    .await
                    .map_err(|e| DliError::io(part, e))?,
                Err(e) => {
                    debug!("{} interrupted: {}", url, e);
                    return Ok(false);
                }
            }
        }
        file.flush().await.map_err(|e| DliError::io(part, e))?;
        Ok(true)
    }
}

#[async_trait]
impl FetchStrategy for HttpFetcher {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn fetch(&self, job: &FetchJob<'_>) -> Result<(), DliError> {
        let timeout = job.timeout;
        fetch_each(job, |url, part| async move { self.fetch_page(&url, &part, timeout).await })
        .await
        .map(|_| ())
    }
}
