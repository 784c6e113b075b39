//! Progress-callback trait for lookup, download and assembly events.
//!
//! Inject an [`Arc<dyn DliProgressCallback>`] via
//! [`crate::config::DliConfigBuilder::progress_callback`] to receive events
//! as the run probes hosts, fetches pages and runs conversion stages.
//!
//! # Example
//!
//! ```rust
//! use dli_fetch::{DliConfig, DliProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct PageCounter {
//!     fetched: AtomicUsize,
//! }
//!
//! impl DliProgressCallback for PageCounter {
//!     fn on_page_fetched(&self, _page_url: &str, _done: usize, _total: usize) {
//!         self.fetched.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//!
//! let counter = Arc::new(PageCounter { fetched: AtomicUsize::new(0) });
//! let config = DliConfig::builder()
//!     .progress_callback(counter as Arc<dyn DliProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the workflow as it progresses.
///
/// Implementations must be `Send + Sync`: page events fire from concurrent
/// fetch tasks. All methods have default no-op implementations so callers
/// only override what they care about.
pub trait DliProgressCallback: Send + Sync {
    /// Called before a host's metadata page is requested.
    ///
    /// # Arguments
    /// * `host`:  host address
    /// * `rank`:  1-indexed position in the host list
    /// * `total`: number of hosts configured
    fn on_host_start(&self, host: &str, rank: usize, total: usize) {
        let _ = (host, rank, total);
    }

    /// Called once a host has been probed.
    ///
    /// `detail` is the failure description when `available` is false.
    fn on_host_result(&self, host: &str, available: bool, detail: Option<&str>) {
        let _ = (host, available, detail);
    }

    /// Called after the manifest is written, before the fetch strategy runs.
    fn on_download_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called as each page finishes (per-page strategies only).
    ///
    /// # Arguments
    /// * `page_url`: URL that was fetched or skipped
    /// * `done`:     pages settled so far, including failures
    /// * `total`:    manifest length
    fn on_page_fetched(&self, page_url: &str, done: usize, total: usize) {
        let _ = (page_url, done, total);
    }

    /// Called once the page images have been counted.
    fn on_download_complete(&self, retrieved: usize, requested: usize) {
        let _ = (retrieved, requested);
    }

    /// Called before a conversion stage starts.
    ///
    /// # Arguments
    /// * `stage`: stage name, e.g. `"tiffcp"`
    /// * `index`: 1-indexed stage position
    /// * `total`: stages in the toolchain
    fn on_stage_start(&self, stage: &str, index: usize, total: usize) {
        let _ = (stage, index, total);
    }

    /// Called when the final PDF exists.
    fn on_document_ready(&self, path: &std::path::Path, size_bytes: u64) {
        let _ = (path, size_bytes);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl DliProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::DliConfig`].
pub type ProgressCallback = Arc<dyn DliProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct TrackingCallback {
        hosts: Mutex<Vec<(String, bool)>>,
        pages: AtomicUsize,
        stages: Mutex<Vec<String>>,
    }

    impl DliProgressCallback for TrackingCallback {
        fn on_host_result(&self, host: &str, available: bool, _detail: Option<&str>) {
            self.hosts.lock().unwrap().push((host.to_string(), available));
        }

        fn on_page_fetched(&self, _page_url: &str, _done: usize, _total: usize) {
            self.pages.fetch_add(1, Ordering::SeqCst);
        }

        fn on_stage_start(&self, stage: &str, _index: usize, _total: usize) {
            self.stages.lock().unwrap().push(stage.to_string());
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_host_start("a", 1, 2);
        cb.on_host_result("a", false, Some("timeout"));
        cb.on_download_start(10);
        cb.on_page_fetched("http://a/PTIFF/00000001.tif", 1, 10);
        cb.on_download_complete(10, 10);
        cb.on_stage_start("tiffcp", 2, 3);
        cb.on_document_ready(std::path::Path::new("x.pdf"), 42);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        tracker.on_host_result("a", false, Some("HTTP 500"));
        tracker.on_host_result("b", true, None);
        tracker.on_page_fetched("u1", 1, 2);
        tracker.on_page_fetched("u2", 2, 2);
        tracker.on_stage_start("tiffcrop", 1, 3);
        tracker.on_stage_start("tiffcp", 2, 3);

        assert_eq!(
            *tracker.hosts.lock().unwrap(),
            vec![("a".to_string(), false), ("b".to_string(), true)]
        );
        assert_eq!(tracker.pages.load(Ordering::SeqCst), 2);
        assert_eq!(*tracker.stages.lock().unwrap(), vec!["tiffcrop", "tiffcp"]);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_download_start(3);
    }
}
