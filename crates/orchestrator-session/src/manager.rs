use std::sync::Arc;

use orchestrator_lifecycle::{teardown_resources, LifecycleContext};
use orchestrator_protocol::event::{EVENT_SESSION_MESSAGE_SENT, EVENT_SESSION_TERMINATED};
use orchestrator_protocol::{
    call_with_policy, IssueId, OrchestratorError, OrchestratorResult, ProjectId, RuntimeHandle,
    SessionId, SessionState,
};
use orchestrator_store::SessionRecord;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::spawn::{spawn_session, SpawnOptions};

/// Creates and destroys sessions. Shares the lifecycle context so both
/// managers contend on the same per-session locks and cancellation tokens.
#[derive(Clone)]
pub struct SessionManager {
    ctx: Arc<LifecycleContext>,
}

impl SessionManager {
    pub fn new(ctx: Arc<LifecycleContext>) -> Self {
        Self { ctx }
    }

    /// Fails with `Configuration` before any side effect when the project
    /// did not pass plugin validation.
    pub async fn spawn(
        &self,
        project_id: &ProjectId,
        issue_id: &IssueId,
        options: SpawnOptions,
    ) -> OrchestratorResult<SessionRecord> {
        let project = self.ctx.project(project_id)?;
        spawn_session(&self.ctx, project, issue_id, &options).await
    }

    pub fn list(&self) -> OrchestratorResult<Vec<SessionRecord>> {
        self.ctx.store.list_records()
    }

    /// Active record, or the newest archived one for a destroyed session.
    pub fn get(&self, session_id: &SessionId) -> OrchestratorResult<SessionRecord> {
        if let Some(record) = self.ctx.store.read_record(session_id)? {
            return Ok(record);
        }
        self.ctx
            .store
            .read_archived_record(session_id)?
            .ok_or_else(|| OrchestratorError::NotFound(format!("session {session_id}")))
    }

    /// Cancels any in-flight cycle, tears the session down, and archives it.
    ///
    /// Teardown failures are recorded as resource leaks and do not stop the
    /// session from being marked terminated. A session that already reached
    /// a terminal state is archived as is and returned unchanged.
    pub async fn terminate(
        &self,
        session_id: &SessionId,
        destroy_workspace: bool,
    ) -> OrchestratorResult<SessionRecord> {
        let slot = self.ctx.coordinator.cancel(session_id);
        let _guard = slot.lock().await;

        let Some(mut record) = self.ctx.store.read_record(session_id)? else {
            self.ctx.coordinator.forget(session_id);
            return self.get(session_id);
        };
        if record.state.is_terminal() {
            self.ctx.archive(&record)?;
            return Ok(record);
        }

        let project = self.ctx.project(&record.project)?;
        // The session's own token is already cancelled; teardown runs on a
        // fresh one so it is not cut short.
        let teardown = CancellationToken::new();
        let report =
            teardown_resources(&self.ctx, project, &mut record, destroy_workspace, &teardown)
                .await?;

        let from = record.state;
        self.ctx.emit(
            &mut record,
            EVENT_SESSION_TERMINATED,
            json!({
                "from": from,
                "reason": "operator",
                "runtime_destroyed": report.runtime_destroyed,
                "workspace_destroyed": report.workspace_destroyed,
                "leaks": report.leaks,
            }),
        )?;
        record.state = SessionState::Terminated;
        self.ctx.persist(&mut record)?;
        self.ctx.archive(&record)?;
        info!(
            session_id = %session_id,
            from = %from,
            leaks = report.leaks.len(),
            "session terminated"
        );
        Ok(record)
    }

    /// Forwards an operator message to the session's agent.
    pub async fn send(&self, session_id: &SessionId, message: &str) -> OrchestratorResult<()> {
        let slot = self.ctx.coordinator.slot(session_id);
        let _guard = slot.lock().await;
        if slot.is_cancelled() {
            return Err(OrchestratorError::Cancelled(format!(
                "session {session_id} is being terminated"
            )));
        }
        let Some(mut record) = self.ctx.store.read_record(session_id)? else {
            self.ctx.coordinator.forget(session_id);
            return Err(OrchestratorError::NotFound(format!(
                "active session {session_id}"
            )));
        };
        let handle = live_handle(&record)?;
        let project = self.ctx.project(&record.project)?;
        let runtime = &project.plugins.runtime;

        call_with_policy(
            "runtime.send_message",
            &self.ctx.call_policy.single_attempt(),
            slot.cancel_token(),
            || runtime.send_message(&handle, message),
        )
        .await
        .map_err(|error| {
            warn!(session_id = %session_id, error = %error, "operator message not delivered");
            error
        })?;

        self.ctx.emit(
            &mut record,
            EVENT_SESSION_MESSAGE_SENT,
            json!({ "source": "operator", "chars": message.chars().count() }),
        )?;
        self.ctx.persist(&mut record)
    }

    /// Recent runtime output, newest last.
    pub async fn output(&self, session_id: &SessionId, lines: usize) -> OrchestratorResult<String> {
        let record = self.active_record(session_id)?;
        let handle = live_handle(&record)?;
        let project = self.ctx.project(&record.project)?;
        let runtime = &project.plugins.runtime;
        let cancel = self.ctx.coordinator.slot(session_id).cancel_token().clone();
        call_with_policy("runtime.get_output", &self.ctx.call_policy, &cancel, || {
            runtime.get_output(&handle, lines)
        })
        .await
    }

    fn active_record(&self, session_id: &SessionId) -> OrchestratorResult<SessionRecord> {
        self.ctx
            .store
            .read_record(session_id)?
            .ok_or_else(|| OrchestratorError::NotFound(format!("active session {session_id}")))
    }
}

fn live_handle(record: &SessionRecord) -> OrchestratorResult<RuntimeHandle> {
    record.runtime_handle.clone().ok_or_else(|| {
        OrchestratorError::Runtime(format!(
            "session {} has no running runtime ({})",
            record.id, record.state
        ))
    })
}
