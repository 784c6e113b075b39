//! Best-effort resize of a finished PDF to a fixed paper size.
//!
//! Ghostscript renders a sibling `{size}_{name}` next to the original. Only
//! when that run leaves a non-empty sibling is the original replaced;
//! otherwise the original is left exactly as it was.

use crate::config::PaperSize;
use crate::error::DliError;
use crate::output::OutputDocument;
use crate::pipeline::tools::{run_tool, ToolSet};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Path Ghostscript writes the resized copy to.
pub fn resized_sibling(path: &Path, paper: PaperSize) -> PathBuf {
    let mut name = OsString::from(format!("{}_", paper.as_str()));
    name.push(path.file_name().unwrap_or_default());
    path.with_file_name(name)
}

/// Resize `path` in place to `paper`.
pub async fn resize_pdf(
    path: &Path,
    paper: PaperSize,
    tools: &ToolSet,
) -> Result<OutputDocument, DliError> {
    let failed = |detail: String| DliError::ResizeFailed {
        path: path.to_path_buf(),
        paper: paper.to_string(),
        detail,
    };

    if !path.is_file() {
        return Err(failed("file does not exist".into()));
    }

    let sibling = resized_sibling(path, paper);
    // A sibling from an earlier run must not pass for this run's output.
    match tokio::fs::remove_file(&sibling).await {
        Ok(()) => debug!("Removed stale '{}'", sibling.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(DliError::io(&sibling, e)),
    }
    info!("Resizing '{}' to {}", path.display(), paper);

    let mut paper_flag = OsString::from("-sPAPERSIZE=");
    paper_flag.push(paper.as_str());
    let args: [OsString; 7] = [
        "-o".into(),
        sibling.clone().into_os_string(),
        "-sDEVICE=pdfwrite".into(),
        paper_flag,
        "-dFIXEDMEDIA".into(),
        "-dPDFFitPage".into(),
        path.as_os_str().to_owned(),
    ];
    let out = run_tool(&tools.program("gs"), args, None).await?;

    let produced = tokio::fs::metadata(&sibling)
        .await
        .is_ok_and(|m| m.is_file() && m.len() > 0);
    if !produced {
        let _ = tokio::fs::remove_file(&sibling).await;
        return Err(failed(format!(
            "'{}' was not produced (gs exit code {:?})",
            sibling.display(),
            out.code
        )));
    }

    tokio::fs::remove_file(path)
        .await
        .map_err(|e| DliError::io(path, e))?;
    tokio::fs::rename(&sibling, path)
        .await
        .map_err(|e| DliError::io(path, e))?;

    let size_bytes = tokio::fs::metadata(path)
        .await
        .map_err(|e| DliError::io(path, e))?
        .len();
    info!("Resized '{}' ({} bytes)", path.display(), size_bytes);
    Ok(OutputDocument {
        path: path.to_path_buf(),
        size_bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sibling_is_prefixed_with_paper_size() {
        assert_eq!(
            resized_sibling(Path::new("out/book.pdf"), PaperSize::A4),
            PathBuf::from("out/a4_book.pdf")
        );
        assert_eq!(
            resized_sibling(Path::new("book.pdf"), PaperSize::Letter),
            PathBuf::from("letter_book.pdf")
        );
    }

    #[tokio::test]
    async fn missing_input_is_resize_failure() {
        let dir = tempfile::tempdir().unwrap();
        let err = resize_pdf(&dir.path().join("none.pdf"), PaperSize::A4, &ToolSet::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DliError::ResizeFailed { .. }));
    }

    #[cfg(unix)]
    fn stub_gs(dir: &Path, body: &str) -> ToolSet {
        use std::os::unix::fs::PermissionsExt;
        let gs = dir.join("gs");
        std::fs::write(&gs, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&gs, std::fs::Permissions::from_mode(0o755)).unwrap();
        ToolSet::new(Some(dir.to_path_buf()))
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn original_survives_failed_resize() {
        let tools = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let pdf = work.path().join("book.pdf");
        std::fs::write(&pdf, b"%PDF-original").unwrap();

        let err = resize_pdf(&pdf, PaperSize::A4, &stub_gs(tools.path(), "exit 1"))
            .await
            .unwrap_err();
        assert!(matches!(err, DliError::ResizeFailed { .. }));
        assert_eq!(std::fs::read(&pdf).unwrap(), b"%PDF-original");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn sibling_replaces_original() {
        let tools = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let pdf = work.path().join("book.pdf");
        std::fs::write(&pdf, b"%PDF-original").unwrap();

        // gs -o <sibling> ...
        let doc = resize_pdf(&pdf, PaperSize::Letter, &stub_gs(tools.path(), "printf '%%PDF-resized' > \"$2\""))
            .await
            .unwrap();
        assert_eq!(doc.path, pdf);
        assert_eq!(std::fs::read(&pdf).unwrap(), b"%PDF-resized");
        assert!(!work.path().join("letter_book.pdf").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stale_sibling_is_not_mistaken_for_output() {
        let tools = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let pdf = work.path().join("book.pdf");
        std::fs::write(&pdf, b"%PDF-fresh").unwrap();
        std::fs::write(work.path().join("a4_book.pdf"), b"%PDF-stale").unwrap();

        let err = resize_pdf(&pdf, PaperSize::A4, &stub_gs(tools.path(), "exit 1"))
            .await
            .unwrap_err();
        assert!(matches!(err, DliError::ResizeFailed { .. }));
        assert_eq!(std::fs::read(&pdf).unwrap(), b"%PDF-fresh");
        assert!(!work.path().join("a4_book.pdf").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn empty_sibling_is_resize_failure() {
        let tools = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let pdf = work.path().join("book.pdf");
        std::fs::write(&pdf, b"%PDF-original").unwrap();

        let err = resize_pdf(&pdf, PaperSize::A4, &stub_gs(tools.path(), ": > \"$2\""))
            .await
            .unwrap_err();
        assert!(matches!(err, DliError::ResizeFailed { .. }));
        assert_eq!(std::fs::read(&pdf).unwrap(), b"%PDF-original");
    }
}
