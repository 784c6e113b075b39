//! Document assembly: run a conversion toolchain over the page images.
//!
//! Each toolchain is a fixed sequence of [`Stage`]s. Stages run strictly in
//! order and every stage must leave its artifact on disk before the next one
//! starts; a missing artifact stops the pipeline with
//! [`DliError::AssemblyFailed`].
//!
//! | toolchain  | stages                                   |
//! |------------|------------------------------------------|
//! | `tiff2pdf` | `tiffcrop` (per page) → `tiffcp` → `tiff2pdf` |
//! | `gs`       | `mogrify` → `gs`                          |
//! | `sips`     | `sips` → `join.py`                        |
//!
//! The final stage writes to `{output}.part`, which is renamed over the
//! output path once it is verified to exist and be non-empty. The page
//! directory and the staging directory are removed afterwards, whether or
//! not assembly succeeded, unless temporaries are kept.

use crate::config::{staging_dir_for, Toolchain};
use crate::error::DliError;
use crate::output::OutputDocument;
use crate::pipeline::download::{list_with_extension, page_images, COMBINED_TIFF, CROP_PREFIX};
use crate::pipeline::tools::{run_tool, ToolOutput, ToolSet};
use crate::progress::ProgressCallback;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One external conversion step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// `tiffcrop -N1 {page} crop_{page}` for every page image.
    CropFirstImage,
    /// `tiffcp crop_*.tif combined.tif`.
    CombineTiff,
    /// `tiff2pdf -o {out} combined.tif`.
    TiffToPdf,
    /// `mogrify -format pdf` into the staging directory.
    MogrifyToPdf,
    /// Ghostscript `pdfwrite` merge of the staged PDFs.
    GhostscriptMerge,
    /// `sips -s format pdf` into the staging directory.
    SipsToPdf,
    /// Automator "Combine PDF Pages" merge of the staged PDFs.
    AutomatorJoin,
}

impl Stage {
    /// Program the stage runs; also its display name.
    pub fn tool(self) -> &'static str {
        match self {
            Stage::CropFirstImage => "tiffcrop",
            Stage::CombineTiff => "tiffcp",
            Stage::TiffToPdf => "tiff2pdf",
            Stage::MogrifyToPdf => "mogrify",
            Stage::GhostscriptMerge => "gs",
            Stage::SipsToPdf => "sips",
            Stage::AutomatorJoin => "join.py",
        }
    }
}

/// Stages of `toolchain`, in execution order.
pub fn stages(toolchain: Toolchain) -> &'static [Stage] {
    match toolchain {
        Toolchain::Tiff2Pdf => &[Stage::CropFirstImage, Stage::CombineTiff, Stage::TiffToPdf],
        Toolchain::Ghostscript => &[Stage::MogrifyToPdf, Stage::GhostscriptMerge],
        Toolchain::Sips => &[Stage::SipsToPdf, Stage::AutomatorJoin],
    }
}

/// Runs a toolchain over a page directory.
pub struct Assembler {
    tools: ToolSet,
    keep_temp: bool,
    progress: Option<ProgressCallback>,
}

/// Paths shared by every stage of one assembly.
struct Workspace<'a> {
    source_dir: &'a Path,
    staging_dir: PathBuf,
    /// Where the final stage writes.
    partial_output: PathBuf,
}

impl Assembler {
    pub fn new(tools: ToolSet, keep_temp: bool, progress: Option<ProgressCallback>) -> Self {
        Self {
            tools,
            keep_temp,
            progress,
        }
    }

    /// Assemble the images in `source_dir` into `output`.
    pub async fn assemble(
        &self,
        source_dir: &Path,
        toolchain: Toolchain,
        output: &Path,
    ) -> Result<OutputDocument, DliError> {
        let result = self.run_pipeline(source_dir, toolchain, output).await;
        self.cleanup(source_dir);
        result
    }

    async fn run_pipeline(
        &self,
        source_dir: &Path,
        toolchain: Toolchain,
        output: &Path,
    ) -> Result<OutputDocument, DliError> {
        if !source_dir.is_dir() {
            return Err(DliError::AssemblyFailed {
                stage: "input".into(),
                detail: format!("page directory '{}' does not exist", source_dir.display()),
            });
        }
        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DliError::io(parent, e))?;
        }

        let mut partial = output.as_os_str().to_owned();
        partial.push(".part");
        let ws = Workspace {
            source_dir,
            staging_dir: staging_dir_for(source_dir),
            partial_output: PathBuf::from(partial),
        };
        // A leftover from an interrupted run must not pass the output check.
        let _ = tokio::fs::remove_file(&ws.partial_output).await;

        info!(
            "Creating '{}' from '{}' with {}",
            output.display(),
            source_dir.display(),
            toolchain
        );
        let stages = stages(toolchain);
        for (i, &stage) in stages.iter().enumerate() {
            info!("[{}/{}] {}", i + 1, stages.len(), stage.tool());
            if let Some(ref cb) = self.progress {
                cb.on_stage_start(stage.tool(), i + 1, stages.len());
            }
            self.run_stage(stage, &ws).await?;
        }

        let size_bytes = match tokio::fs::metadata(&ws.partial_output).await {
            Ok(m) if m.len() > 0 => m.len(),
            _ => {
                let _ = tokio::fs::remove_file(&ws.partial_output).await;
                return Err(DliError::AssemblyFailed {
                    stage: "output".into(),
                    detail: format!("'{}' is missing or empty", output.display()),
                });
            }
        };
        tokio::fs::rename(&ws.partial_output, output)
            .await
            .map_err(|e| DliError::io(output, e))?;

        info!("Created '{}' ({} bytes)", output.display(), size_bytes);
        if let Some(ref cb) = self.progress {
            cb.on_document_ready(output, size_bytes);
        }
        Ok(OutputDocument {
            path: output.to_path_buf(),
            size_bytes,
        })
    }

    async fn run_stage(&self, stage: Stage, ws: &Workspace<'_>) -> Result<(), DliError> {
        let program = self.tools.program(stage.tool());
        let failed = |detail: String| DliError::AssemblyFailed {
            stage: stage.tool().to_string(),
            detail,
        };

        match stage {
            Stage::CropFirstImage => {
                let pages = require_pages(ws.source_dir).map_err(&failed)?;
                let mut cropped = 0usize;
                for page in &pages {
                    let crop = prefixed(page, CROP_PREFIX);
                    let out = run_tool(&program, args(["-N1"], [page, &crop]), None).await?;
                    if crop.is_file() {
                        cropped += 1;
                    } else {
                        warn!("tiffcrop produced no output for '{}' ({})", page.display(), status(out));
                    }
                }
                if cropped == 0 {
                    return Err(failed("no cropped images were produced".into()));
                }
                debug!("Cropped {}/{} pages", cropped, pages.len());
            }
            Stage::CombineTiff => {
                let crops = list_with_extension(ws.source_dir, "tif")?
                    .into_iter()
                    .filter(|p| {
                        p.file_name()
                            .and_then(|n| n.to_str())
                            .is_some_and(|n| n.starts_with(CROP_PREFIX))
                    })
                    .collect::<Vec<_>>();
                let combined = ws.source_dir.join(COMBINED_TIFF);
                let mut files: Vec<&Path> = crops.iter().map(PathBuf::as_path).collect();
                files.push(&combined);
                let out = run_tool(&program, &files, None).await?;
                expect_file(&combined, out).map_err(&failed)?;
            }
            Stage::TiffToPdf => {
                let combined = ws.source_dir.join(COMBINED_TIFF);
                let out = run_tool(
                    &program,
                    args(["-o"], [&ws.partial_output, &combined]),
                    None,
                )
                .await?;
                expect_file(&ws.partial_output, out).map_err(&failed)?;
            }
            Stage::MogrifyToPdf => {
                let pages = require_pages(ws.source_dir).map_err(&failed)?;
                create_staging(&ws.staging_dir).await?;
                let mut argv = args(["-monitor", "-format", "pdf", "-path"], [&ws.staging_dir]);
                argv.extend(pages.iter().map(|p| p.as_os_str().to_owned()));
                let out = run_tool(&program, argv, None).await?;
                expect_staged_pdfs(&ws.staging_dir, out).map_err(&failed)?;
            }
            Stage::GhostscriptMerge => {
                let staged = list_with_extension(&ws.staging_dir, "pdf")?;
                let mut output_flag = OsString::from("-sOutputFile=");
                output_flag.push(&ws.partial_output);
                let mut argv = args(["-dBATCH", "-dNOPAUSE", "-q", "-sDEVICE=pdfwrite"], [&output_flag]);
                argv.extend(staged.iter().map(|p| p.as_os_str().to_owned()));
                let out = run_tool(&program, argv, None).await?;
                expect_file(&ws.partial_output, out).map_err(&failed)?;
            }
            Stage::SipsToPdf => {
                let pages = require_pages(ws.source_dir).map_err(&failed)?;
                create_staging(&ws.staging_dir).await?;
                let mut argv = args(["-s", "format", "pdf"], std::iter::empty::<&Path>());
                argv.extend(pages.iter().map(|p| p.as_os_str().to_owned()));
                argv.push("--out".into());
                argv.push(ws.staging_dir.as_os_str().to_owned());
                let out = run_tool(&program, argv, None).await?;
                expect_staged_pdfs(&ws.staging_dir, out).map_err(&failed)?;
            }
            Stage::AutomatorJoin => {
                let staged = list_with_extension(&ws.staging_dir, "pdf")?;
                let mut argv = args(["-o"], [&ws.partial_output]);
                argv.extend(staged.iter().map(|p| p.as_os_str().to_owned()));
                let out = run_tool(&program, argv, None).await?;
                expect_file(&ws.partial_output, out).map_err(&failed)?;
            }
        }
        Ok(())
    }

    /// Remove the page and staging directories unless keeping temporaries.
    fn cleanup(&self, source_dir: &Path) {
        if self.keep_temp {
            info!("Keeping '{}'", source_dir.display());
            return;
        }
        for dir in [source_dir.to_path_buf(), staging_dir_for(source_dir)] {
            if !dir.exists() {
                continue;
            }
            match std::fs::remove_dir_all(&dir) {
                Ok(()) => debug!("Removed '{}'", dir.display()),
                Err(e) => warn!("Could not remove '{}': {}", dir.display(), e),
            }
        }
    }
}

// ── helpers ──────────────────────────────────────────────────────────────

/// Flags followed by path arguments, as an argv vector.
fn args<const N: usize, P: AsRef<std::ffi::OsStr>>(
    flags: [&str; N],
    paths: impl IntoIterator<Item = P>,
) -> Vec<OsString> {
    flags
        .into_iter()
        .map(OsString::from)
        .chain(paths.into_iter().map(|p| p.as_ref().to_owned()))
        .collect()
}

/// `dir/crop_{name}` for `dir/{name}`.
fn prefixed(path: &Path, prefix: &str) -> PathBuf {
    let mut name = OsString::from(prefix);
    name.push(path.file_name().unwrap_or_default());
    path.with_file_name(name)
}

fn require_pages(dir: &Path) -> Result<Vec<PathBuf>, String> {
    let pages = page_images(dir).map_err(|e| e.to_string())?;
    if pages.is_empty() {
        return Err(format!("no page images in '{}'", dir.display()));
    }
    Ok(pages)
}

async fn create_staging(dir: &Path) -> Result<(), DliError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| DliError::io(dir, e))
}

fn status(out: ToolOutput) -> String {
    match out.code {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".into(),
    }
}

fn expect_file(path: &Path, out: ToolOutput) -> Result<(), String> {
    if path.is_file() {
        Ok(())
    } else {
        Err(format!("'{}' was not produced ({})", path.display(), status(out)))
    }
}

fn expect_staged_pdfs(dir: &Path, out: ToolOutput) -> Result<(), String> {
    match list_with_extension(dir, "pdf") {
        Ok(pdfs) if !pdfs.is_empty() => Ok(()),
        _ => Err(format!("no PDFs in '{}' ({})", dir.display(), status(out))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toolchains_have_fixed_stage_order() {
        let names = |t| stages(t).iter().map(|s| s.tool()).collect::<Vec<_>>();
        assert_eq!(names(Toolchain::Tiff2Pdf), ["tiffcrop", "tiffcp", "tiff2pdf"]);
        assert_eq!(names(Toolchain::Ghostscript), ["mogrify", "gs"]);
        assert_eq!(names(Toolchain::Sips), ["sips", "join.py"]);
    }

    #[test]
    fn crop_name_is_prefixed_in_place() {
        assert_eq!(
            prefixed(Path::new("book/00000001.tif"), CROP_PREFIX),
            PathBuf::from("book/crop_00000001.tif")
        );
    }

    #[tokio::test]
    async fn missing_page_directory_fails_without_running_tools() {
        let dir = tempfile::tempdir().unwrap();
        let assembler = Assembler::new(ToolSet::new(Some(dir.path().to_path_buf())), true, None);
        let err = assembler
            .assemble(&dir.path().join("absent"), Toolchain::Tiff2Pdf, &dir.path().join("out.pdf"))
            .await
            .unwrap_err();
        assert!(matches!(err, DliError::AssemblyFailed { ref stage, .. } if stage == "input"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_stage_stops_the_pipeline() {
        use std::os::unix::fs::PermissionsExt;

        let tools = tempfile::tempdir().unwrap();
        let marker = tools.path().join("tiff2pdf-ran");
        let scripts = [
            ("tiffcrop", "#!/bin/sh\ncp \"$2\" \"$3\"\n".to_string()),
            ("tiffcp", "#!/bin/sh\nexit 1\n".to_string()),
            ("tiff2pdf", format!("#!/bin/sh\ntouch '{}'\n", marker.display())),
        ];
        for (name, body) in &scripts {
            let path = tools.path().join(name);
            std::fs::write(&path, body).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let work = tempfile::tempdir().unwrap();
        let pages = work.path().join("book");
        std::fs::create_dir(&pages).unwrap();
        std::fs::write(pages.join("00000001.tif"), b"II*\0").unwrap();

        let assembler = Assembler::new(ToolSet::new(Some(tools.path().to_path_buf())), false, None);
        let err = assembler
            .assemble(&pages, Toolchain::Tiff2Pdf, &work.path().join("book.pdf"))
            .await
            .unwrap_err();

        assert!(matches!(err, DliError::AssemblyFailed { ref stage, .. } if stage == "tiffcp"));
        assert!(!marker.exists());
        assert!(!work.path().join("book.pdf").exists());
        assert!(!pages.exists(), "page directory is removed even on failure");
    }
}
