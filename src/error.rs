//! Error types for the dli-fetch library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`DliError`]: raised by a run-level operation (download, assembly,
//!   resize, configuration). Returned as `Err(DliError)` from the public
//!   entry points. Almost all of them are fatal; the exception is
//!   [`DliError::PartialRetrieval`], which callers only see when they ask
//!   for strict download semantics.
//!
//! * [`LookupError`]: a single mirror host could not serve the book
//!   (unreachable, HTTP error, no reader link). Always recoverable: the
//!   lookup loop records it and moves on to the next host.
//!
//! Both carry a [`Severity`] tag so callers decide whether to continue from
//! the tag rather than from the concrete variant.

use std::path::PathBuf;
use thiserror::Error;

/// Whether an error ends the run or only the current step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Severity {
    /// Logged and absorbed; execution continues.
    Recoverable,
    /// Surfaced to the caller; the run stops.
    Fatal,
}

/// All run-level errors returned by the dli-fetch library.
///
/// Per-host lookup failures use [`LookupError`] and are stored in
/// [`crate::output::LookupOutcome`] rather than propagated here.
#[derive(Debug, Error)]
pub enum DliError {
    // ── Configuration errors ──────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The last page is unknown and was not supplied explicitly.
    #[error(
        "Unable to determine the number of pages for book {barcode}.\n\
Specify the --last argument explicitly."
    )]
    PageCountRequired { barcode: String },

    /// Required external programs are not installed.
    #[error("The following tools are required to run this command: {}\nPlease install/configure them and try again.", tools.join(", "))]
    ToolsMissing { tools: Vec<String> },

    // ── Lookup errors ─────────────────────────────────────────────────────
    /// Every configured host was tried and none serves the book.
    #[error("No server hosts book {barcode} ({tried} tried)")]
    NoHostAvailable { barcode: String, tried: usize },

    // ── Download errors ───────────────────────────────────────────────────
    /// Fewer page images are present than were requested.
    ///
    /// Returned by [`crate::output::DownloadReport::into_result`] when the
    /// caller wants to treat a short download as an error.
    #[error("Only {retrieved}/{requested} pages present in '{directory}'")]
    PartialRetrieval {
        retrieved: usize,
        requested: usize,
        directory: PathBuf,
    },

    // ── External tool errors ──────────────────────────────────────────────
    /// An external program could not be started at all.
    #[error("Failed to execute '{program}': {source}")]
    ToolSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    // ── Document errors ───────────────────────────────────────────────────
    /// A pipeline stage did not produce its artifact, or the final PDF is missing.
    #[error("PDF assembly failed at stage '{stage}': {detail}")]
    AssemblyFailed { stage: String, detail: String },

    /// The resized sibling was not produced; the original PDF is untouched.
    #[error("Resizing '{path}' to {paper} failed: {detail}\nRun the command manually to debug.")]
    ResizeFailed {
        path: PathBuf,
        paper: String,
        detail: String,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// A local file or directory operation failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The HTTP client could not be constructed.
    #[error("HTTP client error: {0}")]
    Http(String),
}

impl DliError {
    /// Severity tag for this error.
    pub fn severity(&self) -> Severity {
        match self {
            DliError::PartialRetrieval { .. } => Severity::Recoverable,
            _ => Severity::Fatal,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DliError::Io {
            path: path.into(),
            source,
        }
    }
}

/// A recoverable failure while probing one host.
///
/// Stored alongside the host in [`crate::output::LookupOutcome::failures`].
/// The lookup continues with the next host.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum LookupError {
    /// Connection refused, DNS failure, or timeout.
    #[error("server [{host}]: unreachable ({detail})")]
    HostUnreachable { host: String, detail: String },

    /// The host answered with an HTTP error status.
    #[error("server [{host}]: HTTP error ({status}) fetching {url}")]
    HostRejected {
        host: String,
        status: u16,
        url: String,
    },

    /// The metadata page has no recognisable "Read Online" link.
    #[error("server [{host}]: no 'Read Online' link in metadata page")]
    NoReferenceFound { host: String },

    /// The "Read Online" link could not be parsed as a URL.
    #[error("server [{host}]: malformed reader link '{reference}': {detail}")]
    MalformedReference {
        host: String,
        reference: String,
        detail: String,
    },
}

impl LookupError {
    /// Host failures never stop a lookup.
    pub fn severity(&self) -> Severity {
        Severity::Recoverable
    }

    /// The host this failure belongs to.
    pub fn host(&self) -> &str {
        match self {
            LookupError::HostUnreachable { host, .. }
            | LookupError::HostRejected { host, .. }
            | LookupError::NoReferenceFound { host }
            | LookupError::MalformedReference { host, .. } => host,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_count_required_mentions_last_flag() {
        let e = DliError::PageCountRequired {
            barcode: "2015.12345".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("2015.12345"), "got: {msg}");
        assert!(msg.contains("--last"), "got: {msg}");
        assert_eq!(e.severity(), Severity::Fatal);
    }

    #[test]
    fn partial_retrieval_is_recoverable() {
        let e = DliError::PartialRetrieval {
            retrieved: 98,
            requested: 100,
            directory: PathBuf::from("123"),
        };
        assert!(e.to_string().contains("98/100"));
        assert_eq!(e.severity(), Severity::Recoverable);
    }

    #[test]
    fn tools_missing_lists_every_tool() {
        let e = DliError::ToolsMissing {
            tools: vec!["tiffcp".into(), "tiff2pdf".into()],
        };
        let msg = e.to_string();
        assert!(msg.contains("tiffcp, tiff2pdf"), "got: {msg}");
    }

    #[test]
    fn lookup_errors_are_recoverable_and_keyed_by_host() {
        let errors = [
            LookupError::HostUnreachable {
                host: "a".into(),
                detail: "timed out".into(),
            },
            LookupError::HostRejected {
                host: "b".into(),
                status: 500,
                url: "http://b/x".into(),
            },
            LookupError::NoReferenceFound { host: "c".into() },
            LookupError::MalformedReference {
                host: "d".into(),
                reference: "http://[".into(),
                detail: "invalid IPv6".into(),
            },
        ];
        let hosts: Vec<&str> = errors.iter().map(|e| e.host()).collect();
        assert_eq!(hosts, ["a", "b", "c", "d"]);
        assert!(errors.iter().all(|e| e.severity() == Severity::Recoverable));
    }

    #[test]
    fn host_rejected_display() {
        let e = LookupError::HostRejected {
            host: "www.dli.gov.in".into(),
            status: 404,
            url: "http://www.dli.gov.in/x".into(),
        };
        assert!(e.to_string().contains("404"));
        assert!(e.to_string().contains("www.dli.gov.in"));
    }
}
