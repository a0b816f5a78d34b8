use orchestrator_lifecycle::LifecycleContext;
use orchestrator_protocol::event::{
    EVENT_SESSION_FAILED, EVENT_SESSION_RESOURCE_LEAK, EVENT_SESSION_SPAWNED,
};
use orchestrator_protocol::{
    call_with_policy, AgentLaunchRequest, IssueId, OrchestratorError, OrchestratorResult,
    RuntimeCreateRequest, RuntimeHandle, SessionId, SessionState, WorkspaceInfo,
    WorkspaceRequest,
};
use orchestrator_registry::ResolvedProject;
use orchestrator_store::{now_timestamp, SessionRecord};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpawnOptions {
    /// Overrides the tracker's branch naming.
    pub branch: Option<String>,
    /// Model hint forwarded to the agent adapter.
    pub model: Option<String>,
    /// Appended to the tracker-generated prompt.
    pub extra_instructions: Option<String>,
}

/// Resources created so far, torn down in reverse on failure.
struct Spawned<'a> {
    ctx: &'a LifecycleContext,
    project: &'a ResolvedProject,
    session_id: SessionId,
    issue_id: IssueId,
    workspace: Option<WorkspaceInfo>,
    runtime: Option<RuntimeHandle>,
}

pub(crate) async fn spawn_session(
    ctx: &LifecycleContext,
    project: &ResolvedProject,
    issue_id: &IssueId,
    options: &SpawnOptions,
) -> OrchestratorResult<SessionRecord> {
    let cancel = CancellationToken::new();
    let policy = &ctx.call_policy;
    let plugins = &project.plugins;
    let context = &project.context;

    let issue = call_with_policy("tracker.get_issue", policy, &cancel, || {
        plugins.tracker.get_issue(context, issue_id)
    })
    .await?;
    let mut prompt = call_with_policy("tracker.generate_prompt", policy, &cancel, || {
        plugins.tracker.generate_prompt(context, &issue)
    })
    .await?;
    if let Some(extra) = options.extra_instructions.as_deref().map(str::trim) {
        if !extra.is_empty() {
            prompt.push_str("\n\n");
            prompt.push_str(extra);
        }
    }
    let branch = options
        .branch
        .clone()
        .unwrap_or_else(|| plugins.tracker.branch_name(context, issue_id));

    let prefix = if project.config.session_prefix.is_empty() {
        project.config.id.as_str()
    } else {
        project.config.session_prefix.as_str()
    };
    let session_id = ctx.store.reserve_session_id(prefix)?;
    let mut spawned = Spawned {
        ctx,
        project,
        session_id: session_id.clone(),
        issue_id: issue_id.clone(),
        workspace: None,
        runtime: None,
    };

    let workspace_request = WorkspaceRequest {
        session_id: session_id.clone(),
        branch: branch.clone(),
    };
    let workspace = match call_with_policy("workspace.create", policy, &cancel, || {
        plugins.workspace.create(context, &workspace_request)
    })
    .await
    {
        Ok(workspace) => workspace,
        Err(error) => {
            spawned.release();
            return Err(as_workspace_error(error));
        }
    };
    spawned.workspace = Some(workspace.clone());

    let launch = match plugins.agent.launch(&AgentLaunchRequest {
        session_id: session_id.clone(),
        workdir: workspace.path.clone(),
        prompt,
        model: options.model.clone(),
    }) {
        Ok(launch) => launch,
        Err(error) => return Err(spawned.roll_back(error, &cancel).await),
    };

    // Runtime start is not idempotent, so it gets exactly one attempt.
    let runtime_request = RuntimeCreateRequest {
        session_id: session_id.clone(),
        workdir: workspace.path.clone(),
        launch,
    };
    let handle = match call_with_policy(
        "runtime.create",
        &policy.single_attempt(),
        &cancel,
        || plugins.runtime.create(&runtime_request),
    )
    .await
    {
        Ok(handle) => handle,
        Err(error) => return Err(spawned.roll_back(as_runtime_error(error), &cancel).await),
    };
    spawned.runtime = Some(handle.clone());

    let mut record = SessionRecord::new(
        session_id.clone(),
        context.id.clone(),
        issue_id.clone(),
        project.config.agent.clone(),
        now_timestamp(),
    );
    record.state = SessionState::Spawning;
    record.runtime_handle = Some(handle.clone());
    record.workspace_path = Some(workspace.path.clone());
    record.workspace_branch = Some(workspace.branch.clone());
    record.labels = issue.labels.clone();

    let persisted = ctx
        .emit(
            &mut record,
            EVENT_SESSION_SPAWNED,
            json!({
                "issue": issue_id,
                "issue_url": issue.url,
                "agent": project.config.agent,
                "branch": workspace.branch,
                "workspace": workspace.path,
                "runtime_handle": handle,
            }),
        )
        .and_then(|_| ctx.persist(&mut record));
    if let Err(error) = persisted {
        return Err(spawned.roll_back(error, &cancel).await);
    }

    info!(
        session_id = %session_id,
        project = %context.id,
        issue = %issue_id,
        branch = %workspace.branch,
        "session spawned"
    );
    Ok(record)
}

impl Spawned<'_> {
    fn release(&self) {
        if let Err(error) = self.ctx.store.release_reservation(&self.session_id) {
            warn!(session_id = %self.session_id, error = %error, "failed to release session id");
        }
    }

    /// Best-effort teardown after a failed spawn step. Returns `cause`.
    ///
    /// When the workspace cannot be removed the session is kept as a
    /// `failed` record carrying the residual path for operator cleanup.
    async fn roll_back(
        &mut self,
        cause: OrchestratorError,
        cancel: &CancellationToken,
    ) -> OrchestratorError {
        warn!(session_id = %self.session_id, error = %cause, "spawn failed; rolling back");
        let policy = &self.ctx.call_policy;
        let plugins = &self.project.plugins;
        let mut leaks = Vec::new();

        if let Some(handle) = self.runtime.take() {
            if let Err(error) = call_with_policy("runtime.destroy", policy, cancel, || {
                plugins.runtime.destroy(&handle)
            })
            .await
            {
                leaks.push(("runtime", handle.as_str().to_owned(), error));
            }
        }
        let mut residual = None;
        if let Some(workspace) = self.workspace.take() {
            if let Err(error) = call_with_policy("workspace.destroy", policy, cancel, || {
                plugins.workspace.destroy(&self.project.context, &workspace)
            })
            .await
            {
                leaks.push(("workspace", workspace.path.display().to_string(), error));
                residual = Some(workspace.path);
            }
        }

        if leaks.is_empty() {
            self.release();
            return cause;
        }
        if let Err(error) = self.record_failed_spawn(&cause, &leaks, residual) {
            error!(session_id = %self.session_id, error = %error, "failed to record failed spawn");
        }
        cause
    }

    fn record_failed_spawn(
        &self,
        cause: &OrchestratorError,
        leaks: &[(&str, String, OrchestratorError)],
        residual: Option<std::path::PathBuf>,
    ) -> OrchestratorResult<()> {
        let ctx = self.ctx;
        let mut record = SessionRecord::new(
            self.session_id.clone(),
            self.project.context.id.clone(),
            self.issue_id.clone(),
            self.project.config.agent.clone(),
            now_timestamp(),
        );
        record.state = SessionState::Failed;
        record.residual_workspace = residual;
        record.status_detail = Some(cause.to_string());

        ctx.emit(
            &mut record,
            EVENT_SESSION_FAILED,
            json!({ "kind": cause.kind(), "detail": cause.detail(), "during": "spawn" }),
        )?;
        for (resource, target, error) in leaks {
            let leak = OrchestratorError::ResourceLeak(format!(
                "{resource} {target}: {}",
                error.detail()
            ));
            error!(session_id = %record.id, resource, target = %target, error = %leak, "spawn rollback left a resource behind");
            ctx.emit(
                &mut record,
                EVENT_SESSION_RESOURCE_LEAK,
                json!({
                    "resource": resource,
                    "target": target,
                    "kind": error.kind(),
                    "detail": leak.detail(),
                }),
            )?;
        }
        ctx.persist(&mut record)
    }
}

fn as_workspace_error(error: OrchestratorError) -> OrchestratorError {
    match error {
        OrchestratorError::Workspace(_)
        | OrchestratorError::Configuration(_)
        | OrchestratorError::Cancelled(_) => error,
        other => OrchestratorError::Workspace(other.detail().to_owned()),
    }
}

fn as_runtime_error(error: OrchestratorError) -> OrchestratorError {
    match error {
        OrchestratorError::Runtime(_)
        | OrchestratorError::Configuration(_)
        | OrchestratorError::Cancelled(_) => error,
        other => OrchestratorError::Runtime(other.detail().to_owned()),
    }
}
