//! Blocking process execution shared by the CLI-backed plugins.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::Arc;

use crate::error::{OrchestratorError, OrchestratorResult};

pub trait CommandRunner: Send + Sync {
    fn run(&self, program: &str, args: &[OsString], cwd: Option<&Path>) -> io::Result<Output>;
}

#[derive(Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run(&self, program: &str, args: &[OsString], cwd: Option<&Path>) -> io::Result<Output> {
        let mut command = Command::new(program);
        command.args(args);
        if let Some(cwd) = cwd {
            command.current_dir(cwd);
        }

        command.output()
    }
}

/// Runs `program` on the blocking pool so call timeouts and cancellation can
/// abandon a hung child without stalling the async workers.
pub async fn run_blocking(
    runner: Arc<dyn CommandRunner>,
    program: String,
    args: Vec<OsString>,
    cwd: Option<PathBuf>,
) -> io::Result<Output> {
    tokio::task::spawn_blocking(move || runner.run(&program, &args, cwd.as_deref()))
        .await
        .map_err(|error| io::Error::other(format!("command task failed: {error}")))?
}

pub fn render_args(args: &[OsString]) -> String {
    args.iter()
        .map(|arg| arg.to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

/// stderr, else stdout, else the exit status.
pub fn command_output_detail(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
    if !stderr.is_empty() {
        return stderr;
    }

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_owned();
    if !stdout.is_empty() {
        return stdout;
    }

    format!("exit status {}", output.status)
}

pub fn truncate_for_error(body: &str) -> String {
    const MAX_LEN: usize = 200;
    if body.chars().count() <= MAX_LEN {
        body.to_owned()
    } else {
        format!("{}...", body.chars().take(MAX_LEN).collect::<String>())
    }
}

/// Classifies a failed CLI call against a remote service. Rate limiting,
/// server errors and network trouble are worth retrying; everything else is
/// reported as permanent.
pub fn classify_remote_failure(detail: &str) -> OrchestratorError {
    let lowered = detail.to_ascii_lowercase();
    let transient = [
        "rate limit",
        "http 429",
        "http 500",
        "http 502",
        "http 503",
        "http 504",
        "timed out",
        "timeout",
        "connection reset",
        "connection refused",
        "could not resolve host",
        "temporarily unavailable",
    ]
    .iter()
    .any(|marker| lowered.contains(marker));

    if transient {
        OrchestratorError::TransientExternal(detail.to_owned())
    } else {
        OrchestratorError::PermanentExternal(detail.to_owned())
    }
}

/// Maps a spawn failure of `binary`; a missing executable is a setup problem.
pub fn spawn_error(binary: &str, error: &io::Error, install_hint: &str) -> OrchestratorError {
    match error.kind() {
        io::ErrorKind::NotFound => OrchestratorError::Configuration(format!(
            "`{binary}` was not found. {install_hint}"
        )),
        _ => OrchestratorError::TransientExternal(format!("failed to execute `{binary}`: {error}")),
    }
}

pub fn parse_json<T: serde::de::DeserializeOwned>(
    what: &str,
    stdout: &[u8],
) -> OrchestratorResult<T> {
    serde_json::from_slice(stdout).map_err(|error| {
        OrchestratorError::PermanentExternal(format!(
            "failed to parse {what}: {error}; output: {}",
            truncate_for_error(String::from_utf8_lossy(stdout).trim())
        ))
    })
}
