use orchestrator_protocol::{call_with_policy, OrchestratorResult};
use orchestrator_registry::ResolvedProject;
use orchestrator_store::SessionRecord;
use tokio_util::sync::CancellationToken;

use crate::context::LifecycleContext;
use crate::transition::{ObservedFacts, ObservedPullRequest};

/// Gathers one poll's facts. Every plugin call carries the configured
/// timeout and transient-retry policy.
pub(crate) async fn observe(
    ctx: &LifecycleContext,
    project: &ResolvedProject,
    record: &SessionRecord,
    cancel: &CancellationToken,
) -> OrchestratorResult<ObservedFacts> {
    let policy = &ctx.call_policy;
    let plugins = &project.plugins;
    let context = &project.context;

    let runtime_alive = match record.runtime_handle.as_ref() {
        Some(handle) => Some(
            call_with_policy("runtime.is_alive", policy, cancel, || {
                plugins.runtime.is_alive(handle)
            })
            .await?,
        ),
        None => None,
    };

    let pr = match (record.pr.clone(), record.workspace_branch.as_deref()) {
        (Some(pr), _) => Some(pr),
        (None, Some(branch)) => {
            call_with_policy("scm.find_pull_request", policy, cancel, || {
                plugins.scm.find_pull_request(context, branch)
            })
            .await?
        }
        (None, None) => None,
    };

    let pull_request = match pr {
        Some(pr) => {
            let status = call_with_policy("scm.pull_request_status", policy, cancel, || {
                plugins.scm.pull_request_status(context, &pr)
            })
            .await?;
            let ci = call_with_policy("scm.ci_status", policy, cancel, || {
                plugins.scm.ci_status(context, &pr)
            })
            .await?;
            let review = call_with_policy("scm.review_decision", policy, cancel, || {
                plugins.scm.review_decision(context, &pr)
            })
            .await?;
            Some(ObservedPullRequest {
                pr,
                status,
                ci,
                review,
            })
        }
        None => None,
    };

    let issue_closed = call_with_policy("tracker.is_completed", policy, cancel, || {
        plugins.tracker.is_completed(context, &record.issue)
    })
    .await?;

    Ok(ObservedFacts {
        pull_request,
        issue_closed,
        runtime_alive,
    })
}
