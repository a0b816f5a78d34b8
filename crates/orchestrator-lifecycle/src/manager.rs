use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use orchestrator_protocol::event::{
    EVENT_SESSION_EXTERNAL_ERROR, EVENT_SESSION_RUNTIME_EXITED, EVENT_SESSION_STATE_CONFLICT,
    EVENT_SESSION_TERMINATED, EVENT_SESSION_TRANSITION, EVENT_WEBHOOK_RECEIVED,
};
use orchestrator_protocol::{
    verify_webhook, CiStatus, OrchestratorError, OrchestratorResult, PluginKey, PluginSlot,
    PullRequestRef, ReviewDecision, SessionId, SessionState, WebhookEvent, WebhookRequest,
};
use orchestrator_registry::ResolvedProject;
use orchestrator_store::SessionRecord;
use serde_json::{json, Value};
use tokio::sync::{oneshot, Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cleanup::teardown_resources;
use crate::context::LifecycleContext;
use crate::observe::observe;
use crate::perf::{LifecyclePerfCounters, LifecyclePerfSnapshot};
use crate::reaction::{ReactionEngine, ReactionProgress};
use crate::transition::{decide, Decision, ObservedFacts, SessionView};
use crate::webhook::{webhook_targets, WebhookOutcome, WebhookRejection};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Unchanged,
    Transitioned(SessionState),
    Conflict(String),
    ExternalError(String),
    /// A failed reaction is backing off; the next poll resumes it.
    ReactionPending,
    Archived(SessionState),
    Cancelled,
    /// Another worker holds the session.
    Busy,
    /// No active record (never existed or already archived).
    Missing,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub sessions: usize,
    pub transitions: usize,
    pub archived: usize,
    pub skipped_busy: usize,
    pub failed: usize,
}

impl ScanReport {
    fn record(&mut self, outcome: &OrchestratorResult<PollOutcome>) {
        self.sessions += 1;
        match outcome {
            Ok(PollOutcome::Transitioned(_)) => self.transitions += 1,
            Ok(PollOutcome::Archived(_)) => self.archived += 1,
            Ok(PollOutcome::Busy) => self.skipped_busy += 1,
            Ok(_) => {}
            Err(_) => self.failed += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockMode {
    Try,
    Wait,
}

#[derive(Debug, Clone)]
struct Cycle {
    lock: LockMode,
    observe: bool,
    webhook: Option<Value>,
}

impl Cycle {
    fn scan() -> Self {
        Self {
            lock: LockMode::Try,
            observe: true,
            webhook: None,
        }
    }

    fn direct() -> Self {
        Self {
            lock: LockMode::Wait,
            observe: true,
            webhook: None,
        }
    }

    fn recovery() -> Self {
        Self {
            lock: LockMode::Wait,
            observe: false,
            webhook: None,
        }
    }
}

struct PollerState {
    stop_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

/// Single writer of session state: polls, transitions, reacts, and retires
/// sessions. Clones share the same context, counters and poller.
#[derive(Clone)]
pub struct LifecycleManager {
    ctx: Arc<LifecycleContext>,
    perf: Arc<LifecyclePerfCounters>,
    poller: Arc<Mutex<Option<PollerState>>>,
}

impl LifecycleManager {
    pub fn new(ctx: Arc<LifecycleContext>) -> Self {
        Self {
            ctx,
            perf: Arc::new(LifecyclePerfCounters::default()),
            poller: Arc::new(Mutex::new(None)),
        }
    }

    pub fn context(&self) -> &Arc<LifecycleContext> {
        &self.ctx
    }

    pub fn perf_snapshot(&self) -> LifecyclePerfSnapshot {
        self.perf.snapshot()
    }

    /// Polls every active session under a bounded pool. A session already
    /// held by another worker is skipped until the next scan.
    pub async fn scan_once(&self) -> OrchestratorResult<ScanReport> {
        LifecyclePerfCounters::bump(&self.perf.scans_total);
        let records = self.ctx.store.list_records()?;
        Ok(self.fan_out(records, Cycle::scan()).await)
    }

    /// Polls one session now, waiting for any in-flight cycle to finish.
    pub async fn poll_session(&self, session_id: &SessionId) -> OrchestratorResult<PollOutcome> {
        self.run_cycle(session_id, Cycle::direct()).await
    }

    /// Crash recovery: rolls records forward to their event logs and resumes
    /// reactions that have no settled outcome, without observing plugins.
    pub async fn recover(&self) -> OrchestratorResult<ScanReport> {
        let records = self.ctx.store.list_records()?;
        let report = self.fan_out(records, Cycle::recovery()).await;
        info!(
            sessions = report.sessions,
            archived = report.archived,
            failed = report.failed,
            "lifecycle recovery complete"
        );
        Ok(report)
    }

    pub async fn start(&self) -> OrchestratorResult<()> {
        {
            let guard = self.poller.lock().await;
            if guard.is_some() {
                return Ok(());
            }
        }

        self.recover().await?;

        let mut guard = self.poller.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let manager = self.clone();
        let period = Duration::from_secs(self.ctx.settings.poll_interval_secs);
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = interval.tick() => {
                        match manager.scan_once().await {
                            Ok(report) => debug!(
                                sessions = report.sessions,
                                transitions = report.transitions,
                                skipped_busy = report.skipped_busy,
                                failed = report.failed,
                                "lifecycle scan finished"
                            ),
                            Err(error) => warn!(error = %error, "lifecycle scan failed"),
                        }
                    }
                }
            }
        });

        *guard = Some(PollerState {
            stop_tx: Some(stop_tx),
            task,
        });
        Ok(())
    }

    pub async fn stop(&self) -> OrchestratorResult<()> {
        let state = {
            let mut guard = self.poller.lock().await;
            guard.take()
        };

        if let Some(mut state) = state {
            if let Some(stop_tx) = state.stop_tx.take() {
                let _ = stop_tx.send(());
            }
            state.task.await.map_err(|error| {
                OrchestratorError::Runtime(format!("lifecycle poller join failed: {error}"))
            })?;
        }
        Ok(())
    }

    /// Verifies and normalizes a push notification, then polls every session
    /// it concerns out of band.
    pub async fn handle_webhook(
        &self,
        plugin_key: &str,
        request: &WebhookRequest,
        secret: &str,
    ) -> Result<WebhookOutcome, WebhookRejection> {
        let outcome = self.ingest_webhook(plugin_key, request, secret).await;
        match &outcome {
            Ok(_) => LifecyclePerfCounters::bump(&self.perf.webhooks_accepted_total),
            Err(error) => {
                LifecyclePerfCounters::bump(&self.perf.webhooks_rejected_total);
                warn!(plugin = plugin_key, error = %error, "webhook rejected");
            }
        }
        outcome
    }

    async fn ingest_webhook(
        &self,
        plugin_key: &str,
        request: &WebhookRequest,
        secret: &str,
    ) -> Result<WebhookOutcome, WebhookRejection> {
        let key = PluginKey::from_key(plugin_key)
            .ok_or_else(|| WebhookRejection::UnknownPlugin(plugin_key.to_owned()))?;
        let key_name = key.as_key();

        let mut projects = BTreeSet::new();
        let mut source = None;
        for (project_id, project) in &self.ctx.projects {
            let candidate = match key.slot {
                PluginSlot::Tracker if project.config.tracker == key_name => {
                    project.plugins.tracker.webhook()
                }
                PluginSlot::Scm if project.config.scm == key_name => project.plugins.scm.webhook(),
                _ => None,
            };
            if let Some(candidate) = candidate {
                projects.insert(project_id.clone());
                source.get_or_insert(candidate);
            }
        }
        let source = source.ok_or_else(|| WebhookRejection::UnknownPlugin(key_name.clone()))?;

        verify_webhook(source, request, secret).map_err(WebhookRejection::Signature)?;
        let event = source
            .normalize(request)
            .map_err(WebhookRejection::Payload)?;
        if matches!(event, WebhookEvent::Unknown { .. }) {
            debug!(plugin = %key_name, ?event, "ignoring unmapped webhook event");
            return Ok(WebhookOutcome {
                event,
                polled: Vec::new(),
            });
        }

        let records = self
            .ctx
            .store
            .list_records()
            .map_err(WebhookRejection::Internal)?;
        let payload = json!({ "plugin": key_name, "event": event });
        let mut polled = Vec::new();
        for record in records {
            if !projects.contains(&record.project) || !webhook_targets(&event, &record) {
                continue;
            }
            let cycle = Cycle {
                webhook: Some(payload.clone()),
                ..Cycle::direct()
            };
            match self.run_cycle(&record.id, cycle).await {
                Ok(outcome) => {
                    debug!(session_id = %record.id, ?outcome, "webhook-triggered poll finished")
                }
                Err(error) => {
                    warn!(session_id = %record.id, error = %error, "webhook-triggered poll failed")
                }
            }
            polled.push(record.id);
        }
        Ok(WebhookOutcome { event, polled })
    }

    async fn fan_out(&self, records: Vec<SessionRecord>, cycle: Cycle) -> ScanReport {
        let semaphore = Arc::new(Semaphore::new(self.ctx.settings.max_concurrent_polls.max(1)));
        let mut join_set = JoinSet::new();
        for record in records {
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            let manager = self.clone();
            let cycle = cycle.clone();
            join_set.spawn(async move {
                let _permit = permit;
                let outcome = manager.run_cycle(&record.id, cycle).await;
                (record.id, outcome)
            });
        }

        let mut report = ScanReport::default();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((session_id, outcome)) => {
                    if let Err(error) = &outcome {
                        LifecyclePerfCounters::bump(&self.perf.polls_failed_total);
                        warn!(session_id = %session_id, error = %error, "session poll failed");
                    }
                    report.record(&outcome);
                }
                Err(error) => {
                    LifecyclePerfCounters::bump(&self.perf.polls_failed_total);
                    warn!(error = %error, "session poll task panicked");
                    report.sessions += 1;
                    report.failed += 1;
                }
            }
        }
        report
    }

    async fn run_cycle(
        &self,
        session_id: &SessionId,
        cycle: Cycle,
    ) -> OrchestratorResult<PollOutcome> {
        let slot = self.ctx.coordinator.slot(session_id);
        if slot.is_cancelled() {
            return Ok(PollOutcome::Cancelled);
        }
        let _guard = match cycle.lock {
            LockMode::Try => match slot.try_lock() {
                Some(guard) => guard,
                None => {
                    LifecyclePerfCounters::bump(&self.perf.polls_skipped_busy_total);
                    return Ok(PollOutcome::Busy);
                }
            },
            LockMode::Wait => slot.lock().await,
        };
        if slot.is_cancelled() {
            return Ok(PollOutcome::Cancelled);
        }

        let Some(mut record) = self.ctx.store.read_record(session_id)? else {
            self.ctx.coordinator.forget(session_id);
            return Ok(PollOutcome::Missing);
        };
        LifecyclePerfCounters::bump(&self.perf.polls_total);
        let project = self.ctx.project(&record.project)?;

        match self
            .advance(project, &mut record, cycle, slot.cancel_token())
            .await
        {
            Err(error) if error.is_cancelled() => Ok(PollOutcome::Cancelled),
            other => other,
        }
    }

    async fn advance(
        &self,
        project: &ResolvedProject,
        record: &mut SessionRecord,
        cycle: Cycle,
        cancel: &CancellationToken,
    ) -> OrchestratorResult<PollOutcome> {
        self.reconcile(record)?;
        if let Some(payload) = cycle.webhook {
            self.ctx.emit(record, EVENT_WEBHOOK_RECEIVED, payload)?;
        }

        let mut outcome = PollOutcome::Unchanged;
        if cycle.observe && is_observable(record) {
            outcome = self.observe_and_apply(project, record, cancel).await?;
        }
        // The new state is durable before any reaction for it runs.
        self.ctx.persist(record)?;
        if outcome == PollOutcome::Cancelled {
            return Ok(outcome);
        }

        let engine = ReactionEngine {
            ctx: &self.ctx,
            project,
            cancel,
            perf: &self.perf,
        };
        loop {
            let progress = engine.process(record).await?;
            self.ctx.persist(record)?;
            match progress {
                ReactionProgress::Settled => {}
                ReactionProgress::Cancelled => return Ok(PollOutcome::Cancelled),
                ReactionProgress::Waiting => {
                    if outcome == PollOutcome::Unchanged {
                        outcome = PollOutcome::ReactionPending;
                    }
                    return Ok(outcome);
                }
            }

            if needs_cleanup(record) {
                if cancel.is_cancelled() {
                    return Ok(PollOutcome::Cancelled);
                }
                teardown_resources(&self.ctx, project, record, true, cancel).await?;
                if record.state == SessionState::Merged {
                    self.transition(record, SessionState::Terminated, json!({"reason": "merged"}))?;
                }
                self.ctx.persist(record)?;
                continue;
            }

            if record.state.is_terminal() {
                self.ctx.archive(record)?;
                LifecyclePerfCounters::bump(&self.perf.sessions_archived_total);
                info!(session_id = %record.id, state = %record.state, "session archived");
                return Ok(PollOutcome::Archived(record.state));
            }
            return Ok(outcome);
        }
    }

    async fn observe_and_apply(
        &self,
        project: &ResolvedProject,
        record: &mut SessionRecord,
        cancel: &CancellationToken,
    ) -> OrchestratorResult<PollOutcome> {
        let facts = match observe(&self.ctx, project, record, cancel).await {
            Ok(facts) => facts,
            Err(error) if error.is_cancelled() => return Ok(PollOutcome::Cancelled),
            Err(error) => return self.external_error(record, &error),
        };

        let view = SessionView {
            state: record.state,
            pr: record.pr.as_ref(),
            head_sha: record.pr_head_sha.as_deref(),
        };
        match decide(view, &facts) {
            Decision::Hold => {
                refresh_observed(record, &facts);
                if !record.halted {
                    record.status_detail = None;
                }
                Ok(PollOutcome::Unchanged)
            }
            Decision::Conflict(reason) => {
                LifecyclePerfCounters::bump(&self.perf.conflicts_total);
                let detail = OrchestratorError::StateConflict(reason).to_string();
                if record.status_detail.as_deref() != Some(detail.as_str()) {
                    warn!(session_id = %record.id, state = %record.state, detail = %detail, "state conflict; holding");
                    self.ctx.emit(
                        record,
                        EVENT_SESSION_STATE_CONFLICT,
                        json!({
                            "state": record.state,
                            "detail": detail,
                            "facts": facts.to_json(),
                        }),
                    )?;
                    record.status_detail = Some(detail.clone());
                }
                Ok(PollOutcome::Conflict(detail))
            }
            Decision::Transition(to) => {
                if to == SessionState::Failed && facts.runtime_alive == Some(false) {
                    self.ctx.emit(
                        record,
                        EVENT_SESSION_RUNTIME_EXITED,
                        json!({ "runtime_handle": record.runtime_handle }),
                    )?;
                }
                refresh_observed(record, &facts);
                self.transition(record, to, facts.to_json())?;
                if !record.halted {
                    record.status_detail = None;
                }
                Ok(PollOutcome::Transitioned(to))
            }
        }
    }

    fn transition(
        &self,
        record: &mut SessionRecord,
        to: SessionState,
        facts: Value,
    ) -> OrchestratorResult<()> {
        let from = record.state;
        self.ctx.emit(
            record,
            EVENT_SESSION_TRANSITION,
            json!({ "from": from, "to": to, "facts": facts }),
        )?;
        record.state = to;
        LifecyclePerfCounters::bump(&self.perf.transitions_total);
        info!(session_id = %record.id, from = %from, to = %to, "session transitioned");
        Ok(())
    }

    fn external_error(
        &self,
        record: &mut SessionRecord,
        error: &OrchestratorError,
    ) -> OrchestratorResult<PollOutcome> {
        LifecyclePerfCounters::bump(&self.perf.external_errors_total);
        let detail = error.to_string();
        if record.status_detail.as_deref() != Some(detail.as_str()) {
            warn!(session_id = %record.id, error = %error, "session poll hit an external error");
            self.ctx.emit(
                record,
                EVENT_SESSION_EXTERNAL_ERROR,
                json!({ "kind": error.kind(), "detail": error.detail() }),
            )?;
            record.status_detail = Some(detail.clone());
        }
        Ok(PollOutcome::ExternalError(detail))
    }

    /// Rolls the record forward over events appended after its last write,
    /// covering a crash between appending a transition and persisting it.
    fn reconcile(&self, record: &mut SessionRecord) -> OrchestratorResult<()> {
        let events = self.ctx.store.events_after(&record.id, record.last_sequence)?;
        if events.is_empty() {
            return Ok(());
        }
        for event in &events {
            if let Some(to) = event
                .transition_target()
                .and_then(|to| to.parse::<SessionState>().ok())
            {
                record.state = to;
                apply_recorded_facts(record, &event.payload["facts"]);
            } else if event.event_type == EVENT_SESSION_TERMINATED {
                record.state = SessionState::Terminated;
            }
            record.last_sequence = event.sequence;
        }
        warn!(
            session_id = %record.id,
            events = events.len(),
            state = %record.state,
            "rolled session record forward to its event log"
        );
        self.ctx.persist(record)
    }
}

fn is_observable(record: &SessionRecord) -> bool {
    !record.state.is_terminal() && record.state != SessionState::Merged && !record.halted
}

fn needs_cleanup(record: &SessionRecord) -> bool {
    record.state == SessionState::Merged
        || (record.state.requires_teardown()
            && (record.runtime_handle.is_some() || record.workspace_path.is_some()))
}

fn refresh_observed(record: &mut SessionRecord, facts: &ObservedFacts) {
    if let Some(observed) = facts.pull_request.as_ref() {
        record.pr = Some(observed.pr.clone());
        record.pr_head_sha = observed.status.head_sha.clone();
        record.ci_status = Some(observed.ci);
        record.review_status = Some(observed.review);
    }
}

fn apply_recorded_facts(record: &mut SessionRecord, facts: &Value) {
    let Some(pull_request) = facts.get("pull_request").filter(|value| !value.is_null()) else {
        return;
    };
    let number = pull_request.get("number").and_then(Value::as_u64);
    let url = pull_request.get("url").and_then(Value::as_str);
    let branch = pull_request.get("branch").and_then(Value::as_str);
    if let (Some(number), Some(url), Some(branch)) = (number, url, branch) {
        record.pr = Some(PullRequestRef {
            number,
            url: url.to_owned(),
            branch: branch.to_owned(),
        });
    }
    record.pr_head_sha = pull_request
        .get("head_sha")
        .and_then(Value::as_str)
        .map(str::to_owned);
    if let Some(ci) = pull_request
        .get("ci")
        .and_then(Value::as_str)
        .and_then(CiStatus::parse)
    {
        record.ci_status = Some(ci);
    }
    if let Some(review) = pull_request
        .get("review")
        .and_then(Value::as_str)
        .and_then(ReviewDecision::parse)
    {
        record.review_status = Some(review);
    }
}
