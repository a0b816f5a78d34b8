use std::ffi::OsString;
use std::process::Output;
use std::sync::Arc;

use orchestrator_protocol::command::{
    classify_remote_failure, command_output_detail, parse_json, render_args, run_blocking,
    spawn_error,
};
use orchestrator_protocol::{CommandRunner, OrchestratorError, OrchestratorResult};
use serde::de::DeserializeOwned;
use tracing::debug;

/// Thin wrapper over the `gh` binary. Every call passes an argument vector;
/// nothing is routed through a shell.
#[derive(Clone)]
pub struct GhCli {
    runner: Arc<dyn CommandRunner>,
    binary: String,
}

impl GhCli {
    pub fn new(runner: Arc<dyn CommandRunner>, binary: impl Into<String>) -> OrchestratorResult<Self> {
        let binary = binary.into();
        if binary.trim().is_empty() {
            return Err(OrchestratorError::Configuration(
                "github.binary is empty. Provide a valid gh binary path.".to_owned(),
            ));
        }

        Ok(Self { runner, binary })
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// Runs without checking the exit status.
    pub async fn run_raw(&self, args: Vec<OsString>) -> OrchestratorResult<Output> {
        debug!(binary = %self.binary, args = %render_args(&args), "running gh");
        run_blocking(self.runner.clone(), self.binary.clone(), args, None)
            .await
            .map_err(|error| {
                spawn_error(
                    &self.binary,
                    &error,
                    "Install gh and authenticate with `gh auth login`.",
                )
            })
    }

    pub async fn run(&self, args: Vec<OsString>) -> OrchestratorResult<Output> {
        let output = self.run_raw(args.clone()).await?;
        if output.status.success() {
            return Ok(output);
        }

        Err(self.command_failed(&args, &output))
    }

    pub async fn json<T: DeserializeOwned>(
        &self,
        what: &str,
        args: Vec<OsString>,
    ) -> OrchestratorResult<T> {
        let output = self.run(args).await?;
        parse_json(what, &output.stdout)
    }

    pub fn command_failed(&self, args: &[OsString], output: &Output) -> OrchestratorError {
        let detail = command_output_detail(output);
        let message = format!(
            "GitHub CLI command failed (`{} {}`): {detail}",
            self.binary,
            render_args(args)
        );
        if classify_remote_failure(&detail).is_transient() {
            OrchestratorError::TransientExternal(message)
        } else {
            OrchestratorError::PermanentExternal(message)
        }
    }
}
