//! Host lookup: find a mirror that actually serves a book's page images.
//!
//! Hosts are probed one at a time in priority order. For each host:
//!
//! 1. fetch the metadata page (bounded by the lookup timeout),
//! 2. scrape its property table and resolve the "Read Online" link,
//! 3. probe the first page image (bounded by the page timeout).
//!
//! Per-host failures become [`LookupError`] values in the outcome and the
//! loop moves on; nothing here aborts a lookup.

use crate::config::DliConfig;
use crate::error::{DliError, LookupError};
use crate::output::{Host, LookupOutcome, LookupResult};
use crate::pipeline::resolve::{find_reader_link, page_url, resolve_reference};
use crate::pipeline::scrape::{select_scraper, MetadataScraper};
use reqwest::Client;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Path of the metadata CGI on every mirror.
const METADATA_PATH: &str = "/cgi-bin/DBscripts/allmetainfo.cgi";

/// Whether to stop at the first host serving the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupMode {
    /// Stop at the first available host (used before downloading).
    FirstAvailable,
    /// Probe every host and report all of them.
    Enumerate,
}

/// Metadata URL of `barcode` on `host`.
pub fn metadata_url(host: &str, barcode: &str) -> String {
    format!("http://{host}{METADATA_PATH}?barcode={barcode}")
}

/// Output name derived from a book title: spaces and slashes become `_`.
pub fn title_pdf_name(title: &str, barcode: &str) -> PathBuf {
    let title: String = title
        .trim()
        .chars()
        .map(|c| if c.is_whitespace() || c == '/' || c == '\\' { '_' } else { c })
        .collect();
    PathBuf::from(format!("{title}_{barcode}.pdf"))
}

/// Probes mirror hosts for a book.
pub struct HostLookup {
    client: Client,
    scraper: Arc<dyn MetadataScraper>,
    lookup_timeout: Duration,
    page_timeout: Duration,
    title_name: bool,
}

impl HostLookup {
    /// Build a lookup from the run configuration.
    pub fn new(config: &DliConfig) -> Result<Self, DliError> {
        let client = Client::builder()
            .user_agent(concat!("dli-fetch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DliError::Http(e.to_string()))?;
        Ok(Self::with_client(client, config))
    }

    /// Build a lookup around an existing client.
    pub fn with_client(client: Client, config: &DliConfig) -> Self {
        let scraper = select_scraper(config.scrape_metadata);
        debug!("Using metadata scraper: {}", scraper.name());
        Self {
            client,
            scraper,
            lookup_timeout: Duration::from_secs(config.lookup_timeout_secs),
            page_timeout: Duration::from_secs(config.page_timeout_secs),
            title_name: config.wants_title_name(),
        }
    }

    /// Replace the metadata scraper.
    pub fn scraper(mut self, scraper: Arc<dyn MetadataScraper>) -> Self {
        self.scraper = scraper;
        self
    }

    /// Probe `hosts` in order for `barcode`.
    pub async fn lookup(
        &self,
        barcode: &str,
        hosts: &[Host],
        mode: LookupMode,
        config: &DliConfig,
    ) -> LookupOutcome {
        let mut outcome = LookupOutcome::default();
        let total = hosts.len();

        for host in hosts {
            info!("Looking up book {} on server [{}]", barcode, host);
            if let Some(ref cb) = config.progress_callback {
                cb.on_host_start(&host.address, host.rank + 1, total);
            }

            match self.probe_host(host, barcode).await {
                Ok(result) => {
                    if let Some(ref cb) = config.progress_callback {
                        let detail = (!result.available).then_some("first page not served");
                        cb.on_host_result(&host.address, result.available, detail);
                    }
                    let available = result.available;
                    outcome.results.push(result);
                    if available && mode == LookupMode::FirstAvailable {
                        break;
                    }
                }
                Err(e) => {
                    warn!("{}", e);
                    if let Some(ref cb) = config.progress_callback {
                        cb.on_host_result(&host.address, false, Some(&e.to_string()));
                    }
                    outcome.failures.push(e);
                }
            }
        }

        outcome
    }

    /// Probe a single host.
    ///
    /// `Err` means the host could not tell us anything; an `Ok` result may
    /// still be unavailable if the first page image is not served.
    pub async fn probe_host(&self, host: &Host, barcode: &str) -> Result<LookupResult, LookupError> {
        let url = metadata_url(&host.address, barcode);
        debug!("Fetching metadata from {}", url);

        let started = Instant::now();
        let html = self.fetch_metadata(&host.address, &url).await?;
        let lookup_ms = started.elapsed().as_millis() as u64;
        info!("Server [{}] metadata fetch took {} ms", host, lookup_ms);

        let metadata = self.scraper.scrape(&html);
        for (key, value) in metadata.iter() {
            debug!("  {}: {}", key, value);
        }

        let reference = find_reader_link(&html).ok_or_else(|| LookupError::NoReferenceFound {
            host: host.address.clone(),
        })?;
        debug!("Read Online link: {}", reference);
        let resolved = resolve_reference(&reference, &host.address)?;
        let page_count = metadata.total_pages().or(resolved.declared_pages);
        debug!("Base URL: {}  pages: {}", resolved.base_url, page_count);

        let (available, probe_ms) = self.probe_first_page(host, &resolved.base_url).await;
        if available {
            if let Some(title) = metadata.title() {
                info!("Title: {}", title);
            }
            if let Some(author) = metadata.author() {
                info!("Author: {}", author);
            }
            info!("Book {} ({} pages) found on server [{}]", barcode, page_count, host);
        } else {
            warn!("Book {} is not available on server [{}]", barcode, host);
        }

        let pdf_name = match metadata.title() {
            Some(title) if self.title_name && available => Some(title_pdf_name(title, barcode)),
            _ => None,
        };

        Ok(LookupResult {
            host: host.clone(),
            base_url: resolved.base_url,
            page_count,
            available,
            metadata: (!metadata.is_empty()).then_some(metadata),
            pdf_name,
            lookup_ms,
            probe_ms,
        })
    }

    async fn fetch_metadata(&self, host: &str, url: &str) -> Result<String, LookupError> {
        let unreachable = |e: reqwest::Error| LookupError::HostUnreachable {
            host: host.to_string(),
            detail: if e.is_timeout() {
                format!("timed out after {}s", self.lookup_timeout.as_secs())
            } else {
                e.to_string()
            },
        };

        let response = self
            .client
            .get(url)
            .timeout(self.lookup_timeout)
            .send()
            .await
            .map_err(unreachable)?;

        if !response.status().is_success() {
            return Err(LookupError::HostRejected {
                host: host.to_string(),
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        response.text().await.map_err(unreachable)
    }

    /// GET the first page image; any error or non-2xx status means unavailable.
    async fn probe_first_page(&self, host: &Host, base_url: &str) -> (bool, Option<u64>) {
        let url = page_url(base_url, 1);
        debug!("Probing {}", url);
        let started = Instant::now();

        match self
            .client
            .get(&url)
            .timeout(self.page_timeout)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                let ms = started.elapsed().as_millis() as u64;
                info!("Server [{}] first page fetch took {} ms", host, ms);
                (true, Some(ms))
            }
            Ok(response) => {
                debug!("First page probe on [{}] returned {}", host, response.status());
                (false, None)
            }
            Err(e) => {
                debug!("First page probe on [{}] failed: {}", host, e);
                (false, None)
            }
        }
    }
}
