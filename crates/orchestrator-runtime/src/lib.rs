//! `runtime.tmux`: each session's agent runs in its own detached tmux
//! session, named after the session id.

use std::ffi::OsString;
use std::process::Output;
use std::sync::Arc;

use async_trait::async_trait;
use orchestrator_config::OrchestratorConfig;
use orchestrator_protocol::command::{command_output_detail, render_args, run_blocking, spawn_error};
use orchestrator_protocol::{
    CommandRunner, OrchestratorError, OrchestratorResult, PluginSlot, ProcessCommandRunner,
    Runtime, RuntimeCreateRequest, RuntimeHandle, SessionId,
};
use orchestrator_registry::{PluginInstance, PluginManifest, PluginModule};
use tracing::{debug, info};

const MAX_CAPTURE_LINES: usize = 10_000;

pub struct TmuxRuntime {
    runner: Arc<dyn CommandRunner>,
    binary: String,
}

impl TmuxRuntime {
    pub fn new(runner: Arc<dyn CommandRunner>, binary: impl Into<String>) -> OrchestratorResult<Self> {
        let binary = binary.into();
        if binary.trim().is_empty() {
            return Err(OrchestratorError::Configuration(
                "tmux.binary is empty. Provide a valid tmux binary path.".to_owned(),
            ));
        }

        Ok(Self { runner, binary })
    }

    /// tmux treats `.` and `:` as target separators.
    pub fn session_name(session_id: &SessionId) -> String {
        session_id
            .as_str()
            .chars()
            .map(|ch| if matches!(ch, '.' | ':') || ch.is_whitespace() { '-' } else { ch })
            .collect()
    }

    fn session_target(handle: &RuntimeHandle) -> OsString {
        OsString::from(format!("={}", handle.as_str()))
    }

    fn pane_target(handle: &RuntimeHandle) -> OsString {
        OsString::from(format!("={}:", handle.as_str()))
    }

    fn has_session_args(handle: &RuntimeHandle) -> Vec<OsString> {
        vec![
            OsString::from("has-session"),
            OsString::from("-t"),
            Self::session_target(handle),
        ]
    }

    fn new_session_args(name: &str, request: &RuntimeCreateRequest) -> Vec<OsString> {
        let mut args = vec![
            OsString::from("new-session"),
            OsString::from("-d"),
            OsString::from("-s"),
            OsString::from(name),
            OsString::from("-c"),
            request.workdir.as_os_str().to_owned(),
        ];
        for (key, value) in &request.launch.env {
            args.push(OsString::from("-e"));
            args.push(OsString::from(format!("{key}={value}")));
        }
        args.push(OsString::from(request.launch.command_line()));
        args
    }

    fn kill_session_args(handle: &RuntimeHandle) -> Vec<OsString> {
        vec![
            OsString::from("kill-session"),
            OsString::from("-t"),
            Self::session_target(handle),
        ]
    }

    /// Messages go through a named paste buffer so multi-line text arrives
    /// intact instead of being submitted line by line.
    fn set_buffer_args(handle: &RuntimeHandle, message: &str) -> Vec<OsString> {
        vec![
            OsString::from("set-buffer"),
            OsString::from("-b"),
            OsString::from(handle.as_str()),
            OsString::from("--"),
            OsString::from(message),
        ]
    }

    fn paste_buffer_args(handle: &RuntimeHandle) -> Vec<OsString> {
        vec![
            OsString::from("paste-buffer"),
            OsString::from("-d"),
            OsString::from("-b"),
            OsString::from(handle.as_str()),
            OsString::from("-t"),
            Self::pane_target(handle),
        ]
    }

    fn submit_args(handle: &RuntimeHandle) -> Vec<OsString> {
        vec![
            OsString::from("send-keys"),
            OsString::from("-t"),
            Self::pane_target(handle),
            OsString::from("Enter"),
        ]
    }

    fn capture_pane_args(handle: &RuntimeHandle, lines: usize) -> Vec<OsString> {
        vec![
            OsString::from("capture-pane"),
            OsString::from("-p"),
            OsString::from("-J"),
            OsString::from("-t"),
            Self::pane_target(handle),
            OsString::from("-S"),
            OsString::from(format!("-{lines}")),
        ]
    }

    async fn run_tmux_raw(&self, args: Vec<OsString>) -> OrchestratorResult<Output> {
        debug!(binary = %self.binary, args = %render_args(&args), "running tmux");
        run_blocking(self.runner.clone(), self.binary.clone(), args, None)
            .await
            .map_err(|error| {
                spawn_error(
                    &self.binary,
                    &error,
                    "Install tmux or set tmux.binary to a valid binary path.",
                )
            })
    }

    async fn run_tmux(&self, args: Vec<OsString>) -> OrchestratorResult<Output> {
        let output = self.run_tmux_raw(args.clone()).await?;
        if output.status.success() {
            return Ok(output);
        }

        Err(OrchestratorError::Runtime(format!(
            "tmux command failed (`{} {}`): {}",
            self.binary,
            render_args(&args),
            command_output_detail(&output)
        )))
    }

    async fn session_exists(&self, handle: &RuntimeHandle) -> OrchestratorResult<bool> {
        let output = self.run_tmux_raw(Self::has_session_args(handle)).await?;
        if output.status.success() {
            return Ok(true);
        }
        let detail = command_output_detail(&output);
        if is_missing_session(&detail) {
            return Ok(false);
        }
        Err(OrchestratorError::Runtime(format!(
            "tmux has-session failed for {handle}: {detail}"
        )))
    }
}

#[async_trait]
impl Runtime for TmuxRuntime {
    async fn create(&self, request: &RuntimeCreateRequest) -> OrchestratorResult<RuntimeHandle> {
        let name = Self::session_name(&request.session_id);
        let handle = RuntimeHandle::new(name.clone());
        if self.session_exists(&handle).await? {
            return Err(OrchestratorError::Runtime(format!(
                "tmux session {name} already exists"
            )));
        }

        self.run_tmux(Self::new_session_args(&name, request)).await?;
        info!(
            session_id = %request.session_id,
            tmux_session = %name,
            program = %request.launch.program,
            "started tmux session"
        );
        Ok(handle)
    }

    /// A session that is already gone counts as destroyed.
    async fn destroy(&self, handle: &RuntimeHandle) -> OrchestratorResult<()> {
        let output = self.run_tmux_raw(Self::kill_session_args(handle)).await?;
        if output.status.success() {
            info!(tmux_session = %handle, "killed tmux session");
            return Ok(());
        }
        let detail = command_output_detail(&output);
        if is_missing_session(&detail) {
            return Ok(());
        }
        Err(OrchestratorError::Runtime(format!(
            "failed to kill tmux session {handle}: {detail}"
        )))
    }

    async fn send_message(&self, handle: &RuntimeHandle, message: &str) -> OrchestratorResult<()> {
        self.run_tmux(Self::set_buffer_args(handle, message)).await?;
        self.run_tmux(Self::paste_buffer_args(handle)).await?;
        self.run_tmux(Self::submit_args(handle)).await?;
        Ok(())
    }

    async fn get_output(&self, handle: &RuntimeHandle, lines: usize) -> OrchestratorResult<String> {
        let lines = lines.clamp(1, MAX_CAPTURE_LINES);
        let output = self
            .run_tmux(Self::capture_pane_args(handle, lines))
            .await?;
        Ok(tail_lines(&String::from_utf8_lossy(&output.stdout), lines))
    }

    async fn is_alive(&self, handle: &RuntimeHandle) -> OrchestratorResult<bool> {
        self.session_exists(handle).await
    }
}

fn is_missing_session(detail: &str) -> bool {
    let detail = detail.to_ascii_lowercase();
    detail.contains("can't find session")
        || detail.contains("session not found")
        || detail.contains("no server running")
        || detail.contains("error connecting to")
}

/// Last `lines` lines with the pane's blank tail dropped.
fn tail_lines(captured: &str, lines: usize) -> String {
    let all = captured.trim_end().lines().collect::<Vec<_>>();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}

pub struct TmuxRuntimeModule;

impl PluginModule for TmuxRuntimeModule {
    fn manifest(&self) -> PluginManifest {
        PluginManifest {
            slot: PluginSlot::Runtime,
            name: "tmux",
            description: "detached tmux session per agent",
        }
    }

    fn create(&self, config: &OrchestratorConfig) -> OrchestratorResult<PluginInstance> {
        Ok(PluginInstance::Runtime(Arc::new(TmuxRuntime::new(
            Arc::new(ProcessCommandRunner),
            config.tmux.binary.clone(),
        )?)))
    }
}
