//! Download orchestration: manifest construction and post-fetch accounting.

use crate::error::DliError;
use crate::output::{DownloadReport, PageCount};
use crate::pipeline::fetch::{FetchJob, FetchStrategy};
use crate::pipeline::resolve::page_url;
use crate::progress::ProgressCallback;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Name of the manifest written into the destination directory.
pub const MANIFEST_FILE: &str = "urls.txt";

/// Prefix of the per-page crops written by `tiffcrop`.
pub(crate) const CROP_PREFIX: &str = "crop_";
/// Multi-page TIFF written by `tiffcp`.
pub(crate) const COMBINED_TIFF: &str = "combined.tif";

/// Ordered page URLs for `first..=last`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageManifest {
    pub first: u32,
    pub urls: Vec<String>,
}

impl PageManifest {
    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    /// Newline-separated, newline-terminated.
    pub fn to_file_contents(&self) -> String {
        let mut out = self.urls.join("\n");
        out.push('\n');
        out
    }
}

/// Build the manifest; `first` must be ≥ 1 and ≤ `last`.
pub fn build_manifest(base_url: &str, first: u32, last: u32) -> Result<PageManifest, DliError> {
    if first == 0 {
        return Err(DliError::InvalidConfig(
            "Pages are 1-indexed, --first must be ≥ 1".into(),
        ));
    }
    if first > last {
        return Err(DliError::InvalidConfig(format!(
            "Invalid page range {first}-{last}: first must be <= last"
        )));
    }
    Ok(PageManifest {
        first,
        urls: (first..=last).map(|page| page_url(base_url, page)).collect(),
    })
}

/// Parameters of one [`download`] call.
pub struct DownloadRequest<'a> {
    pub barcode: &'a str,
    pub base_url: &'a str,
    pub first: u32,
    /// Explicit last page, taking precedence over `page_count`.
    pub last: Option<u32>,
    /// Page count discovered during lookup.
    pub page_count: PageCount,
    pub dest_dir: &'a Path,
    pub concurrency: usize,
    pub timeout: Duration,
    pub overwrite: bool,
    pub progress: Option<&'a ProgressCallback>,
}

/// Fetch every page of the request into `dest_dir`.
///
/// Fails before touching the network when the last page is unknown. A short
/// download is logged and reported, not failed; use
/// [`DownloadReport::into_result`] for strict behaviour.
pub async fn download(
    req: &DownloadRequest<'_>,
    strategy: &dyn FetchStrategy,
) -> Result<DownloadReport, DliError> {
    let last = req
        .last
        .or(req.page_count.known())
        .ok_or_else(|| DliError::PageCountRequired {
            barcode: req.barcode.to_string(),
        })?;
    let manifest = build_manifest(req.base_url, req.first, last)?;

    tokio::fs::create_dir_all(req.dest_dir)
        .await
        .map_err(|e| DliError::io(req.dest_dir, e))?;

    let manifest_path = req.dest_dir.join(MANIFEST_FILE);
    tokio::fs::write(&manifest_path, manifest.to_file_contents())
        .await
        .map_err(|e| DliError::io(&manifest_path, e))?;

    info!(
        "Downloading pages {}-{} of {} into '{}' with {} ({} parallel)",
        req.first,
        last,
        req.barcode,
        req.dest_dir.display(),
        strategy.name(),
        req.concurrency
    );
    if let Some(cb) = req.progress {
        cb.on_download_start(manifest.len());
    }

    let job = FetchJob {
        urls: &manifest.urls,
        manifest_path: &manifest_path,
        dest_dir: req.dest_dir,
        concurrency: req.concurrency,
        timeout: req.timeout,
        overwrite: req.overwrite,
        progress: req.progress,
    };
    strategy.fetch(&job).await?;

    let retrieved = count_page_images(req.dest_dir)?;
    let report = DownloadReport {
        requested: manifest.len(),
        retrieved,
        directory: req.dest_dir.to_path_buf(),
        manifest_path,
    };

    if let Some(cb) = req.progress {
        cb.on_download_complete(report.retrieved, report.requested);
    }
    if report.is_partial() {
        warn!(
            "Only {} of {} pages are present in '{}'; re-run to fetch the missing ones",
            report.retrieved,
            report.requested,
            req.dest_dir.display()
        );
    } else {
        info!("Downloaded {} pages to '{}'", report.retrieved, req.dest_dir.display());
    }
    Ok(report)
}

/// Count page images directly inside `dir`.
pub fn count_page_images(dir: &Path) -> Result<usize, DliError> {
    Ok(page_images(dir)?.len())
}

/// Page images in `dir`, sorted: every `*.tif` except assembly intermediates.
pub fn page_images(dir: &Path) -> Result<Vec<PathBuf>, DliError> {
    Ok(list_with_extension(dir, "tif")?
        .into_iter()
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| !n.starts_with(CROP_PREFIX) && n != COMBINED_TIFF)
        })
        .collect())
}

/// Files directly inside `dir` with extension `ext`, sorted by name.
pub(crate) fn list_with_extension(dir: &Path, ext: &str) -> Result<Vec<PathBuf>, DliError> {
    let entries = std::fs::read_dir(dir).map_err(|e| DliError::io(dir, e))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| DliError::io(dir, e))?.path();
        if path.is_file() && path.extension().is_some_and(|e| e == ext) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Writes every manifest page, counting calls.
    #[derive(Default)]
    struct FakeFetcher {
        calls: AtomicUsize,
        skip_last: bool,
    }

    #[async_trait]
    impl FetchStrategy for FakeFetcher {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn fetch(&self, job: &FetchJob<'_>) -> Result<(), DliError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let n = job.urls.len() - usize::from(self.skip_last);
            for url in &job.urls[..n] {
                let name = crate::pipeline::fetch::target_name(url);
                std::fs::write(job.dest_dir.join(name), b"II*\0").unwrap();
            }
            Ok(())
        }
    }

    fn request<'a>(dest: &'a Path, last: Option<u32>, count: PageCount) -> DownloadRequest<'a> {
        DownloadRequest {
            barcode: "123",
            base_url: "http://h/d",
            first: 1,
            last,
            page_count: count,
            dest_dir: dest,
            concurrency: 2,
            timeout: Duration::from_secs(1),
            overwrite: false,
            progress: None,
        }
    }

    #[test]
    fn manifest_covers_range() {
        let m = build_manifest("http://h/d", 3, 12).unwrap();
        assert_eq!(m.len(), 10);
        assert_eq!(m.urls[0], "http://h/d/PTIFF/00000003.tif");
        assert_eq!(m.urls[9], "http://h/d/PTIFF/00000012.tif");
        assert!(m.to_file_contents().ends_with("00000012.tif\n"));
    }

    #[test]
    fn manifest_rejects_bad_ranges() {
        assert!(matches!(build_manifest("b", 0, 5), Err(DliError::InvalidConfig(_))));
        assert!(matches!(build_manifest("b", 6, 5), Err(DliError::InvalidConfig(_))));
        assert_eq!(build_manifest("b", 5, 5).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_page_count_fails_before_any_work() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("book");
        let fetcher = FakeFetcher::default();

        let err = download(&request(&dest, None, PageCount::Unknown), &fetcher)
            .await
            .unwrap_err();
        assert!(matches!(err, DliError::PageCountRequired { .. }));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn explicit_last_overrides_discovered_count() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = FakeFetcher::default();
        let report = download(&request(dir.path(), Some(4), PageCount::Known(100)), &fetcher)
            .await
            .unwrap();
        assert_eq!(report.requested, 4);
        assert_eq!(report.retrieved, 4);
        let manifest = std::fs::read_to_string(dir.path().join(MANIFEST_FILE)).unwrap();
        assert_eq!(manifest.lines().count(), 4);
    }

    #[tokio::test]
    async fn short_download_is_reported_not_failed() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = FakeFetcher {
            skip_last: true,
            ..Default::default()
        };
        let report = download(&request(dir.path(), None, PageCount::Known(3)), &fetcher)
            .await
            .unwrap();
        assert!(report.is_partial());
        assert_eq!(report.retrieved, 2);
    }

    #[test]
    fn only_tif_files_are_counted() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["00000001.tif", "00000002.tif", "00000003.tif.part", "urls.txt"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        assert_eq!(count_page_images(dir.path()).unwrap(), 2);
    }

    #[test]
    fn intermediates_are_not_page_images() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["00000002.tif", "00000001.tif", "crop_00000001.tif", "combined.tif", "urls.txt"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let names: Vec<String> = page_images(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["00000001.tif", "00000002.tif"]);
    }

    #[tokio::test]
    async fn kept_intermediates_do_not_hide_missing_pages() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["crop_00000001.tif", "crop_00000002.tif", "combined.tif"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let fetcher = FakeFetcher {
            skip_last: true,
            ..Default::default()
        };
        let report = download(&request(dir.path(), None, PageCount::Known(2)), &fetcher)
            .await
            .unwrap();
        assert_eq!(report.retrieved, 1);
        assert!(report.is_partial());
    }
}
