//! External program resolution and invocation.
//!
//! Every stage that shells out (fetch tools, conversion stages, the resizer)
//! goes through [`run_tool`]: programs are spawned directly with
//! `tokio::process::Command` (no shell), stdout/stderr are captured and
//! forwarded to the log at DEBUG, and a non-zero exit is reported rather
//! than raised. Callers judge success by the artifacts on disk.

use crate::config::DliConfig;
use crate::error::DliError;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

/// Location of the Automator script that merges PDFs on macOS.
const AUTOMATOR_JOIN: &str =
    "/System/Library/Automator/Combine PDF Pages.action/Contents/Resources/join.py";

/// Resolves tool names to executable paths.
///
/// With a tool directory configured every program is looked up there, which
/// lets tests substitute stub scripts for the real toolchain.
#[derive(Debug, Clone, Default)]
pub struct ToolSet {
    dir: Option<PathBuf>,
}

impl ToolSet {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    pub fn from_config(config: &DliConfig) -> Self {
        Self::new(config.tool_dir.clone())
    }

    /// Path (or bare name for `PATH` lookup) of `tool`.
    pub fn program(&self, tool: &str) -> PathBuf {
        match &self.dir {
            Some(dir) => dir.join(tool),
            None if tool == "join.py" => PathBuf::from(AUTOMATOR_JOIN),
            None => PathBuf::from(tool),
        }
    }

    /// Whether `tool` can be executed.
    pub fn is_available(&self, tool: &str) -> bool {
        let program = self.program(tool);
        if self.dir.is_some() || program.is_absolute() {
            program.is_file()
        } else {
            which::which(&program).is_ok()
        }
    }

    /// Verify every tool in `tools`, reporting all missing ones at once.
    pub fn check(&self, tools: &[&str]) -> Result<(), DliError> {
        debug!("Checking for the following required tools: {:?}", tools);
        let missing: Vec<String> = tools
            .iter()
            .filter(|tool| {
                let present = self.is_available(tool);
                debug!("Is {} present: {}", tool, present);
                !present
            })
            .map(|tool| tool.to_string())
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(DliError::ToolsMissing { tools: missing })
        }
    }
}

/// How an external program exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolOutput {
    pub success: bool,
    pub code: Option<i32>,
}

/// Run `program` to completion, logging its output.
///
/// Only a failure to start the process is an error; the exit status is
/// returned for the caller to interpret.
pub async fn run_tool<I, S>(
    program: &Path,
    args: I,
    cwd: Option<&Path>,
) -> Result<ToolOutput, DliError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let args: Vec<OsString> = args.into_iter().map(|a| a.as_ref().to_owned()).collect();
    debug!("cmd: {} {:?}", program.display(), args);

    let mut command = Command::new(program);
    command
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }

    let output = command.output().await.map_err(|e| DliError::ToolSpawn {
        program: program.display().to_string(),
        source: e,
    })?;

    let name = program
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.display().to_string());
    log_stream(&name, &output.stdout);
    log_stream(&name, &output.stderr);

    if !output.status.success() {
        warn!("{} exited with {}", name, output.status);
    }

    Ok(ToolOutput {
        success: output.status.success(),
        code: output.status.code(),
    })
}

fn log_stream(name: &str, bytes: &[u8]) {
    for line in String::from_utf8_lossy(bytes).lines() {
        let line = line.trim_end();
        if !line.is_empty() {
            debug!("[{}] {}", name, line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn program_defaults_to_bare_name() {
        let tools = ToolSet::default();
        assert_eq!(tools.program("tiffcp"), PathBuf::from("tiffcp"));
        assert_eq!(tools.program("join.py"), PathBuf::from(AUTOMATOR_JOIN));
    }

    #[test]
    fn program_uses_tool_dir() {
        let tools = ToolSet::new(Some(PathBuf::from("/opt/stubs")));
        assert_eq!(tools.program("gs"), PathBuf::from("/opt/stubs/gs"));
        assert_eq!(tools.program("join.py"), PathBuf::from("/opt/stubs/join.py"));
    }

    #[test]
    fn check_reports_every_missing_tool() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("gs"), "").unwrap();
        let tools = ToolSet::new(Some(dir.path().to_path_buf()));

        assert!(tools.check(&["gs"]).is_ok());
        match tools.check(&["gs", "mogrify", "tiffcp"]) {
            Err(DliError::ToolsMissing { tools }) => assert_eq!(tools, ["mogrify", "tiffcp"]),
            other => panic!("expected ToolsMissing, got {other:?}"),
        }
    }

    #[test]
    fn nonexistent_binary_is_not_on_path() {
        assert!(!ToolSet::default().is_available("nonexistent-dli-tool-xyz"));
    }

    #[tokio::test]
    async fn spawn_failure_is_an_error() {
        let err = run_tool(Path::new("/definitely/not/a/tool"), ["--help"], None)
            .await
            .unwrap_err();
        assert!(matches!(err, DliError::ToolSpawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exit_status_is_reported() {
        let ok = run_tool(Path::new("sh"), ["-c", "echo hello"], None).await.unwrap();
        assert!(ok.success);
        let failed = run_tool(Path::new("sh"), ["-c", "exit 3"], None).await.unwrap();
        assert!(!failed.success);
        assert_eq!(failed.code, Some(3));
    }
}
