use orchestrator_protocol::event::EVENT_SESSION_RESOURCE_LEAK;
use orchestrator_protocol::{
    call_with_policy, OrchestratorError, OrchestratorResult, WorkspaceInfo,
};
use orchestrator_registry::ResolvedProject;
use orchestrator_store::SessionRecord;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::context::LifecycleContext;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub runtime_destroyed: bool,
    pub workspace_destroyed: bool,
    pub leaks: Vec<String>,
}

/// Destroys the runtime and, when `destroy_workspace` is set, the workspace.
///
/// Teardown failures never block the caller from marking the session
/// finished: each becomes a `session.resource_leak` event and the residual
/// workspace path stays on the record for operator cleanup. The record's
/// runtime handle and workspace path are cleared either way.
pub async fn teardown_resources(
    ctx: &LifecycleContext,
    project: &ResolvedProject,
    record: &mut SessionRecord,
    destroy_workspace: bool,
    cancel: &CancellationToken,
) -> OrchestratorResult<TeardownReport> {
    let mut report = TeardownReport::default();

    if let Some(handle) = record.runtime_handle.clone() {
        let runtime = &project.plugins.runtime;
        match call_with_policy("runtime.destroy", &ctx.call_policy, cancel, || {
            runtime.destroy(&handle)
        })
        .await
        {
            Ok(()) => report.runtime_destroyed = true,
            Err(error) if error.is_cancelled() => return Err(error),
            Err(error) => {
                record_leak(ctx, record, "runtime", handle.as_str(), &error)?;
                report.leaks.push(error.to_string());
            }
        }
        record.runtime_handle = None;
    }

    if !destroy_workspace {
        return Ok(report);
    }
    let Some(path) = record.workspace_path.clone() else {
        return Ok(report);
    };
    let info = WorkspaceInfo {
        path: path.clone(),
        branch: record.workspace_branch.clone().unwrap_or_default(),
    };
    let workspace = &project.plugins.workspace;
    match call_with_policy("workspace.destroy", &ctx.call_policy, cancel, || {
        workspace.destroy(&project.context, &info)
    })
    .await
    {
        Ok(()) => report.workspace_destroyed = true,
        Err(error) if error.is_cancelled() => return Err(error),
        Err(error) => {
            record_leak(ctx, record, "workspace", &path.display().to_string(), &error)?;
            record.residual_workspace = Some(path);
            report.leaks.push(error.to_string());
        }
    }
    record.workspace_path = None;
    Ok(report)
}

fn record_leak(
    ctx: &LifecycleContext,
    record: &mut SessionRecord,
    resource: &str,
    target: &str,
    cause: &OrchestratorError,
) -> OrchestratorResult<()> {
    let leak = OrchestratorError::ResourceLeak(format!("{resource} {target}: {}", cause.detail()));
    error!(
        session_id = %record.id,
        resource,
        target,
        error = %leak,
        "session teardown left a resource behind"
    );
    ctx.emit(
        record,
        EVENT_SESSION_RESOURCE_LEAK,
        json!({
            "resource": resource,
            "target": target,
            "kind": cause.kind(),
            "detail": leak.detail(),
        }),
    )?;
    record.status_detail = Some(leak.to_string());
    Ok(())
}
