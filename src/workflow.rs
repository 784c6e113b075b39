//! Top-level entry points: look up, download, assemble and resize a book.
//!
//! Each step is available on its own; [`run`] chains them according to an
//! [`Actions`] selection the same way the `dli` binary does.

use crate::config::{Actions, DliConfig};
use crate::error::DliError;
use crate::output::{DownloadReport, Host, LookupOutcome, LookupResult, OutputDocument, RunReport};
use crate::pipeline::assemble::Assembler;
use crate::pipeline::download::{self, DownloadRequest};
use crate::pipeline::fetch::fetcher_for;
use crate::pipeline::lookup::{HostLookup, LookupMode};
use crate::pipeline::resize;
use crate::pipeline::tools::ToolSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Find the first configured host that serves `barcode`.
///
/// # Errors
/// [`DliError::NoHostAvailable`] once every host has been tried.
pub async fn lookup_book(barcode: &str, config: &DliConfig) -> Result<LookupResult, DliError> {
    let hosts = Host::ranked(&config.hosts);
    first_available(barcode, &hosts, config).await
}

/// Probe every configured host and report all of them.
pub async fn find_hosts(barcode: &str, config: &DliConfig) -> Result<LookupOutcome, DliError> {
    let hosts = Host::ranked(&config.hosts);
    let outcome = HostLookup::new(config)?
        .lookup(barcode, &hosts, LookupMode::Enumerate, config)
        .await;

    let available: Vec<&str> = outcome.available().map(|r| r.host.address.as_str()).collect();
    if available.is_empty() {
        warn!("Book {} is not available on any server", barcode);
    } else {
        info!("Book {} is available on: {}", barcode, available.join(", "));
    }
    Ok(outcome)
}

async fn first_available(
    barcode: &str,
    hosts: &[Host],
    config: &DliConfig,
) -> Result<LookupResult, DliError> {
    let outcome = HostLookup::new(config)?
        .lookup(barcode, hosts, LookupMode::FirstAvailable, config)
        .await;
    let tried = outcome.probed();
    outcome.into_chosen().ok_or_else(|| DliError::NoHostAvailable {
        barcode: barcode.to_string(),
        tried,
    })
}

/// Download the pages of `barcode` from the host chosen by a lookup.
///
/// `config.last_page` overrides the page count found during lookup.
pub async fn download_book(
    barcode: &str,
    found: &LookupResult,
    config: &DliConfig,
) -> Result<DownloadReport, DliError> {
    let tools = ToolSet::from_config(config);
    let strategy = fetcher_for(config.fetch_tool, &tools)?;
    let dest_dir = config.directory_for(barcode);

    let request = DownloadRequest {
        barcode,
        base_url: &found.base_url,
        first: config.first_page,
        last: config.last_page,
        page_count: found.page_count,
        dest_dir: &dest_dir,
        concurrency: config.concurrency,
        timeout: Duration::from_secs(config.page_timeout_secs),
        overwrite: config.overwrite,
        progress: config.progress_callback.as_ref(),
    };
    download::download(&request, strategy.as_ref()).await
}

/// Assemble the page images in `source_dir` into `output`.
pub async fn create_pdf(
    source_dir: &Path,
    output: &Path,
    config: &DliConfig,
) -> Result<OutputDocument, DliError> {
    Assembler::new(
        ToolSet::from_config(config),
        config.keep_temp,
        config.progress_callback.clone(),
    )
    .assemble(source_dir, config.toolchain, output)
    .await
}

/// Resize `path` in place to `config.paper_size`.
pub async fn resize_pdf(path: &Path, config: &DliConfig) -> Result<OutputDocument, DliError> {
    resize::resize_pdf(path, config.paper_size, &ToolSet::from_config(config)).await
}

/// Verify that every program the selected actions need is installed.
pub fn check_tools(actions: &Actions, config: &DliConfig) -> Result<(), DliError> {
    ToolSet::from_config(config).check(&actions.required_tools(config))
}

/// Run the selected actions in order: lookup → download → create → resize.
///
/// * `lookup` without `download` enumerates every host and stops there.
/// * `download` without `lookup` only tries the first configured host.
/// * Without a barcode, `create_pdf` needs `config.directory` and both PDF
///   actions need `config.pdf_name`.
pub async fn run(
    barcode: Option<&str>,
    actions: Actions,
    config: &DliConfig,
) -> Result<RunReport, DliError> {
    if actions.needs_barcode() && barcode.is_none() {
        return Err(DliError::InvalidConfig("A barcode must be specified".into()));
    }

    let mut report = RunReport {
        pdf_name: config
            .pdf_name
            .clone()
            .or_else(|| barcode.map(DliConfig::default_pdf_name)),
        ..RunReport::default()
    };

    if let Some(barcode) = barcode {
        if actions.download {
            let hosts = Host::ranked(&config.hosts);
            let candidates = if actions.lookup { &hosts[..] } else { &hosts[..hosts.len().min(1)] };
            let found = first_available(barcode, candidates, config).await?;
            adopt_title_name(&mut report, &found, config);
            let downloaded = download_book(barcode, &found, config).await?;
            report.lookup = Some(LookupOutcome {
                results: vec![found],
                failures: Vec::new(),
            });
            report.download = Some(downloaded);
        } else if actions.lookup {
            let outcome = find_hosts(barcode, config).await?;
            if let Some(chosen) = outcome.chosen() {
                adopt_title_name(&mut report, chosen, config);
            }
            report.lookup = Some(outcome);
        }
    }

    if actions.create_pdf || actions.resize_pdf {
        let pdf_name = report.pdf_name.clone().ok_or_else(|| {
            DliError::InvalidConfig("A PDF name (or a barcode) must be specified".into())
        })?;

        if actions.create_pdf {
            let source_dir = source_dir(barcode, config)?;
            report.document = Some(create_pdf(&source_dir, &pdf_name, config).await?);
        }
        if actions.resize_pdf {
            report.document = Some(resize_pdf(&pdf_name, config).await?);
        }
    }

    Ok(report)
}

fn adopt_title_name(report: &mut RunReport, found: &LookupResult, config: &DliConfig) {
    if !config.wants_title_name() {
        return;
    }
    if let Some(ref name) = found.pdf_name {
        info!("Setting PDF name to '{}'", name.display());
        report.pdf_name = Some(name.clone());
    }
}

fn source_dir(barcode: Option<&str>, config: &DliConfig) -> Result<PathBuf, DliError> {
    match (barcode, &config.directory) {
        (_, Some(dir)) => Ok(dir.clone()),
        (Some(barcode), None) => Ok(config.directory_for(barcode)),
        (None, None) => Err(DliError::InvalidConfig(
            "A directory (or a barcode) must be specified to create a PDF".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lookup_and_download_need_a_barcode() {
        let actions = Actions {
            lookup: true,
            ..Actions::default()
        };
        let err = run(None, actions, &DliConfig::default()).await.unwrap_err();
        assert!(err.to_string().contains("barcode"));
    }

    #[tokio::test]
    async fn create_without_barcode_needs_pdf_name() {
        let actions = Actions {
            create_pdf: true,
            ..Actions::default()
        };
        let config = DliConfig::builder().directory("pages").build().unwrap();
        let err = run(None, actions, &config).await.unwrap_err();
        assert!(matches!(err, DliError::InvalidConfig(_)));
    }

    #[test]
    fn source_dir_prefers_explicit_directory() {
        let config = DliConfig::builder().directory("pages").build().unwrap();
        assert_eq!(source_dir(Some("1"), &config).unwrap(), PathBuf::from("pages"));
        assert_eq!(
            source_dir(Some("1"), &DliConfig::default()).unwrap(),
            PathBuf::from("1")
        );
        assert!(source_dir(None, &DliConfig::default()).is_err());
    }

    #[tokio::test]
    async fn empty_actions_do_nothing() {
        let report = run(Some("1"), Actions::default(), &DliConfig::default())
            .await
            .unwrap();
        assert!(report.lookup.is_none());
        assert!(report.document.is_none());
        assert_eq!(report.pdf_name, Some(PathBuf::from("1.pdf")));
    }

    #[test]
    fn missing_tools_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let config = DliConfig::builder().tool_dir(dir.path()).build().unwrap();
        let err = check_tools(&Actions::full(), &config).unwrap_err();
        match err {
            DliError::ToolsMissing { tools } => assert!(tools.contains(&"wget".to_string())),
            other => panic!("expected ToolsMissing, got {other:?}"),
        }
    }
}
