//! Result types produced by lookup, download and assembly.

use crate::error::{DliError, LookupError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// One mirror in the prioritised host list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    /// Network address or host name, optionally with a port.
    pub address: String,
    /// 0-indexed position in the configured list; lower is preferred.
    pub rank: usize,
}

impl Host {
    /// Build the ranked host list from configured addresses.
    pub fn ranked<S: AsRef<str>>(addresses: &[S]) -> Vec<Host> {
        addresses
            .iter()
            .enumerate()
            .map(|(rank, a)| Host {
                address: a.as_ref().to_string(),
                rank,
            })
            .collect()
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address)
    }
}

/// A page count that may be unknown, kept distinct from zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PageCount {
    Known(u32),
    #[default]
    Unknown,
}

impl PageCount {
    /// Parse a declared count; anything that is not a positive integer is unknown.
    pub fn parse(s: &str) -> Self {
        match s.trim().parse::<u32>() {
            Ok(n) if n > 0 => PageCount::Known(n),
            _ => PageCount::Unknown,
        }
    }

    pub fn known(self) -> Option<u32> {
        match self {
            PageCount::Known(n) => Some(n),
            PageCount::Unknown => None,
        }
    }

    /// First known count wins.
    pub fn or(self, other: PageCount) -> PageCount {
        match self {
            PageCount::Known(_) => self,
            PageCount::Unknown => other,
        }
    }
}

impl fmt::Display for PageCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageCount::Known(n) => write!(f, "{n}"),
            PageCount::Unknown => f.write_str("?"),
        }
    }
}

/// Book properties scraped from a host's metadata table.
///
/// Keys are the table labels (`Title`, `Author1`, `TotalPages`, …). Values are
/// trimmed and never empty. Missing keys are normal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookMetadata(BTreeMap<String, String>);

impl BookMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a property; empty values after trimming are dropped.
    pub fn insert(&mut self, key: &str, value: &str) {
        let (key, value) = (key.trim(), value.trim());
        if key.is_empty() || value.is_empty() {
            return;
        }
        self.0.insert(key.to_string(), value.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn title(&self) -> Option<&str> {
        self.get("Title")
    }

    pub fn author(&self) -> Option<&str> {
        self.get("Author1")
    }

    /// `TotalPages` as a page count.
    pub fn total_pages(&self) -> PageCount {
        self.get("TotalPages")
            .map(PageCount::parse)
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// What probing one host revealed.
///
/// Created once per host that answered the metadata request; never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupResult {
    pub host: Host,
    /// Absolute page-image base URL; pages live under `{base_url}/PTIFF/`.
    pub base_url: String,
    /// Effective page count: `TotalPages`, else the reader URL's `last`, else unknown.
    pub page_count: PageCount,
    /// Whether the first page image could be fetched.
    pub available: bool,
    /// Scraped properties, when the scraper found any.
    pub metadata: Option<BookMetadata>,
    /// Title-derived output name (`{Title}_{barcode}.pdf`), when enabled.
    pub pdf_name: Option<PathBuf>,
    /// Metadata request latency.
    pub lookup_ms: u64,
    /// First-page probe latency, when the probe succeeded.
    pub probe_ms: Option<u64>,
}

/// Everything a lookup pass produced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LookupOutcome {
    /// Results for hosts that answered, in probe order.
    pub results: Vec<LookupResult>,
    /// Hosts that failed before a result could be built.
    pub failures: Vec<LookupError>,
}

impl LookupOutcome {
    /// The first available host in priority order.
    pub fn chosen(&self) -> Option<&LookupResult> {
        self.results.iter().find(|r| r.available)
    }

    /// Consume the outcome, keeping only the chosen result.
    pub fn into_chosen(self) -> Option<LookupResult> {
        self.results.into_iter().find(|r| r.available)
    }

    /// Every available host, in priority order.
    pub fn available(&self) -> impl Iterator<Item = &LookupResult> {
        self.results.iter().filter(|r| r.available)
    }

    /// Number of hosts probed, successful or not.
    pub fn probed(&self) -> usize {
        self.results.len() + self.failures.len()
    }
}

/// Outcome of a page download.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadReport {
    /// Pages in the manifest (`last - first + 1`).
    pub requested: usize,
    /// `*.tif` files present in the directory afterwards.
    pub retrieved: usize,
    pub directory: PathBuf,
    /// Where the newline-separated URL list was written.
    pub manifest_path: PathBuf,
}

impl DownloadReport {
    /// Fewer images on disk than pages requested.
    pub fn is_partial(&self) -> bool {
        self.retrieved < self.requested
    }

    /// Treat a short download as an error.
    pub fn into_result(self) -> Result<Self, DliError> {
        if self.is_partial() {
            Err(DliError::PartialRetrieval {
                retrieved: self.retrieved,
                requested: self.requested,
                directory: self.directory,
            })
        } else {
            Ok(self)
        }
    }
}

/// A PDF written by the assembler or resizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputDocument {
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Summary of a full [`crate::workflow::run`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    pub lookup: Option<LookupOutcome>,
    pub download: Option<DownloadReport>,
    pub document: Option<OutputDocument>,
    /// PDF path the run targeted (explicit, title-derived or `{barcode}.pdf`).
    pub pdf_name: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(address: &str, rank: usize, available: bool) -> LookupResult {
        LookupResult {
            host: Host {
                address: address.into(),
                rank,
            },
            base_url: format!("http://{address}/data/1"),
            page_count: PageCount::Unknown,
            available,
            metadata: None,
            pdf_name: None,
            lookup_ms: 0,
            probe_ms: None,
        }
    }

    #[test]
    fn page_count_parse() {
        assert_eq!(PageCount::parse("388"), PageCount::Known(388));
        assert_eq!(PageCount::parse(" 12 "), PageCount::Known(12));
        assert_eq!(PageCount::parse("?"), PageCount::Unknown);
        assert_eq!(PageCount::parse("0"), PageCount::Unknown);
        assert_eq!(PageCount::parse(""), PageCount::Unknown);
    }

    #[test]
    fn page_count_preference() {
        let meta = PageCount::Known(120);
        let url = PageCount::Known(118);
        assert_eq!(meta.or(url), PageCount::Known(120));
        assert_eq!(PageCount::Unknown.or(url), PageCount::Known(118));
        assert_eq!(PageCount::Unknown.or(PageCount::Unknown), PageCount::Unknown);
        assert_eq!(PageCount::Unknown.to_string(), "?");
    }

    #[test]
    fn metadata_drops_empty_values() {
        let mut m = BookMetadata::new();
        m.insert(" Title ", "  Gitanjali ");
        m.insert("Author1", "   ");
        m.insert("TotalPages", "120");
        assert_eq!(m.title(), Some("Gitanjali"));
        assert_eq!(m.author(), None);
        assert_eq!(m.total_pages(), PageCount::Known(120));
        assert_eq!(m.len(), 2);
    }

    #[test]
    fn chosen_is_first_available() {
        let outcome = LookupOutcome {
            results: vec![
                result("a", 0, false),
                result("b", 1, true),
                result("c", 2, true),
            ],
            failures: vec![],
        };
        assert_eq!(outcome.chosen().unwrap().host.address, "b");
        assert_eq!(outcome.available().count(), 2);
        assert_eq!(outcome.into_chosen().unwrap().host.rank, 1);
    }

    #[test]
    fn no_available_host_means_no_choice() {
        let outcome = LookupOutcome {
            results: vec![result("a", 0, false)],
            failures: vec![LookupError::NoReferenceFound { host: "b".into() }],
        };
        assert!(outcome.chosen().is_none());
        assert_eq!(outcome.probed(), 2);
    }

    #[test]
    fn partial_download_into_result() {
        let report = DownloadReport {
            requested: 10,
            retrieved: 9,
            directory: PathBuf::from("123"),
            manifest_path: PathBuf::from("123/urls.txt"),
        };
        assert!(report.is_partial());
        assert!(matches!(
            report.into_result(),
            Err(DliError::PartialRetrieval { retrieved: 9, .. })
        ));
    }

    #[test]
    fn ranked_hosts_keep_order() {
        let hosts = Host::ranked(&["x", "y"]);
        assert_eq!(hosts[1].address, "y");
        assert_eq!(hosts[1].rank, 1);
    }
}
