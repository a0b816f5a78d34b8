//! Reaction engine: runs configured side effects for persisted events,
//! strictly in sequence order, at most once per `(session, sequence, kind)`.
//!
//! Every attempt is claimed in the session's reaction ledger (fsynced)
//! before the side effect starts. A claim still without an outcome on the
//! next pass means the process died mid-call: the reaction is dead-lettered
//! instead of run again.
//!
//! The escalation for a dead-lettered reaction is its own ledger key,
//! `(dead-letter event sequence, "escalation")`, so a crash between the
//! dead-letter and the notify is resumed on recovery.

use std::collections::BTreeSet;

use orchestrator_config::{ReactionAction, ReactionConfigToml};
use orchestrator_protocol::call::backoff_delay_ms;
use orchestrator_protocol::event::EVENT_REACTION_DEAD_LETTERED;
use orchestrator_protocol::{
    call_with_policy, CustomReactionContext, LifecycleEvent, Notification, NotificationPriority,
    OrchestratorError, OrchestratorResult,
};
use orchestrator_registry::ResolvedProject;
use orchestrator_store::{
    now_millis, now_timestamp, ReactionLedgerEntry, ReactionOutcomes, ReactionStatus,
    SessionRecord,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::context::LifecycleContext;
use crate::perf::LifecyclePerfCounters;
use crate::prompts;

const ESCALATION_KIND: &str = "escalation";
const INTERRUPTED_DETAIL: &str = "interrupted before an outcome was recorded";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReactionProgress {
    /// Every event up to `last_sequence` has a settled outcome.
    Settled,
    /// A failed reaction is waiting for its backoff to elapse.
    Waiting,
    Cancelled,
}

pub(crate) struct ReactionEngine<'a> {
    pub(crate) ctx: &'a LifecycleContext,
    pub(crate) project: &'a ResolvedProject,
    pub(crate) cancel: &'a CancellationToken,
    pub(crate) perf: &'a LifecyclePerfCounters,
}

impl ReactionEngine<'_> {
    /// Works through events after `record.reactions_through`. The caller
    /// persists the record afterwards.
    pub(crate) async fn process(
        &self,
        record: &mut SessionRecord,
    ) -> OrchestratorResult<ReactionProgress> {
        loop {
            let events = self
                .ctx
                .store
                .events_after(&record.id, record.reactions_through)?;
            if events.is_empty() {
                return Ok(ReactionProgress::Settled);
            }
            let outcomes = self.ctx.store.reaction_outcomes(&record.id)?;

            for event in &events {
                if event.sequence > record.last_sequence {
                    return Ok(ReactionProgress::Settled);
                }
                if event.event_type == EVENT_REACTION_DEAD_LETTERED {
                    let progress = self.escalate(record, event, &outcomes).await?;
                    if progress == ReactionProgress::Cancelled {
                        return Ok(progress);
                    }
                    record.reactions_through = event.sequence;
                    continue;
                }

                let rules = matching_rules(&self.project.config.reactions, record, event);
                for rule in rules {
                    let kind = rule.action.kind();
                    let previous = outcomes.get(&(event.sequence, kind.clone()));
                    let attempts_used = match previous {
                        Some(entry) if entry.status.is_settled() => continue,
                        Some(entry) if entry.status == ReactionStatus::Claimed => {
                            warn!(
                                session_id = %record.id,
                                sequence = event.sequence,
                                kind = %kind,
                                attempt = entry.attempt,
                                "claimed reaction has no outcome; not running it again"
                            );
                            self.dead_letter(
                                record,
                                &events,
                                event,
                                &kind,
                                entry.attempt,
                                INTERRUPTED_DETAIL,
                            )?;
                            continue;
                        }
                        Some(entry)
                            if entry.retry_at_ms.is_some_and(|at| at > now_millis()) =>
                        {
                            return Ok(ReactionProgress::Waiting);
                        }
                        Some(entry) => entry.attempt,
                        None => 0,
                    };

                    if attempts_used >= rule.max_attempts {
                        let detail = previous
                            .and_then(|entry| entry.detail.clone())
                            .unwrap_or_else(|| "attempts exhausted".to_owned());
                        self.dead_letter(record, &events, event, &kind, attempts_used, &detail)?;
                        continue;
                    }
                    if self.cancel.is_cancelled() {
                        return Ok(ReactionProgress::Cancelled);
                    }

                    let attempt = attempts_used + 1;
                    self.record(record, event, &kind, ReactionStatus::Claimed, attempt, None, None)?;
                    match self.execute(rule, record, event).await {
                        Ok(()) => {
                            self.record(
                                record,
                                event,
                                &kind,
                                ReactionStatus::Succeeded,
                                attempt,
                                None,
                                None,
                            )?;
                            LifecyclePerfCounters::bump(&self.perf.reactions_executed_total);
                            info!(
                                session_id = %record.id,
                                sequence = event.sequence,
                                kind = %kind,
                                attempt,
                                "reaction executed"
                            );
                        }
                        Err(error) if error.is_cancelled() => {
                            self.record(
                                record,
                                event,
                                &kind,
                                ReactionStatus::Failed,
                                attempt,
                                Some(error.to_string()),
                                None,
                            )?;
                            return Ok(ReactionProgress::Cancelled);
                        }
                        Err(error) => {
                            LifecyclePerfCounters::bump(&self.perf.reactions_failed_total);
                            *record.retry_counts.entry(kind.clone()).or_default() += 1;
                            if error.is_transient() && attempt < rule.max_attempts {
                                let delay = backoff_delay_ms(
                                    attempt - 1,
                                    rule.base_delay_ms,
                                    self.ctx.call_policy.retry.max_delay_ms.max(rule.base_delay_ms),
                                    self.ctx.call_policy.retry.jitter_factor,
                                    rand::random::<f64>(),
                                );
                                self.record(
                                    record,
                                    event,
                                    &kind,
                                    ReactionStatus::Failed,
                                    attempt,
                                    Some(error.to_string()),
                                    Some(now_millis().saturating_add(delay)),
                                )?;
                                warn!(
                                    session_id = %record.id,
                                    sequence = event.sequence,
                                    kind = %kind,
                                    attempt,
                                    retry_in_ms = delay,
                                    error = %error,
                                    "reaction failed; will retry"
                                );
                                return Ok(ReactionProgress::Waiting);
                            }
                            self.dead_letter(
                                record,
                                &events,
                                event,
                                &kind,
                                attempt,
                                &error.to_string(),
                            )?;
                        }
                    }
                }
                record.reactions_through = event.sequence;
            }
        }
    }

    async fn execute(
        &self,
        rule: &ReactionConfigToml,
        record: &SessionRecord,
        event: &LifecycleEvent,
    ) -> OrchestratorResult<()> {
        let policy = self.ctx.call_policy.single_attempt();
        let plugins = &self.project.plugins;
        match &rule.action {
            ReactionAction::SendToAgent => {
                let handle = record.runtime_handle.clone().ok_or_else(|| {
                    OrchestratorError::PermanentExternal(format!(
                        "session {} has no live runtime to message",
                        record.id
                    ))
                })?;
                let message = rule
                    .message
                    .clone()
                    .unwrap_or_else(|| prompts::remediation_prompt(record, event));
                let runtime = &plugins.runtime;
                call_with_policy("runtime.send_message", &policy, self.cancel, || {
                    runtime.send_message(&handle, &message)
                })
                .await
            }
            ReactionAction::Notify => {
                let notification = Notification {
                    session_id: Some(record.id.clone()),
                    title: prompts::notification_title(record, event),
                    body: rule
                        .message
                        .clone()
                        .unwrap_or_else(|| prompts::notification_body(record, event)),
                    priority: prompts::notification_priority(event),
                };
                self.notify_all(&notification).await
            }
            ReactionAction::AutoMerge => {
                if !self.project.config.allow_auto_merge {
                    return Err(OrchestratorError::Configuration(format!(
                        "auto-merge is not enabled for project '{}'",
                        self.project.config.id
                    )));
                }
                let pr = record.pr.clone().ok_or_else(|| {
                    OrchestratorError::PermanentExternal(format!(
                        "session {} has no pull request to merge",
                        record.id
                    ))
                })?;
                let scm = &plugins.scm;
                let project = &self.project.context;
                call_with_policy("scm.merge", &policy, self.cancel, || scm.merge(project, &pr))
                    .await
            }
            ReactionAction::Custom(name) => {
                let reaction = plugins.custom_reactions.get(name).ok_or_else(|| {
                    OrchestratorError::Configuration(format!(
                        "custom reaction '{name}' is not registered"
                    ))
                })?;
                let context = CustomReactionContext {
                    session_id: record.id.clone(),
                    project: self.project.context.clone(),
                    event_type: event.event_type.clone(),
                    event_sequence: event.sequence,
                    payload: event.payload.clone(),
                };
                call_with_policy("custom_reaction.run", &policy, self.cancel, || {
                    reaction.run(&context)
                })
                .await
            }
        }
    }

    async fn notify_all(&self, notification: &Notification) -> OrchestratorResult<()> {
        let policy = self.ctx.call_policy.single_attempt();
        let mut first_error = None;
        for notifier in &self.project.plugins.notifiers {
            let outcome = call_with_policy("notifier.notify", &policy, self.cancel, || {
                notifier.notify(notification)
            })
            .await;
            if let Err(error) = outcome {
                if error.is_cancelled() {
                    return Err(error);
                }
                first_error.get_or_insert(error);
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Emits the dead-letter event before settling the ledger key. An event
    /// already present in `events` for the same key is not emitted again.
    fn dead_letter(
        &self,
        record: &mut SessionRecord,
        events: &[LifecycleEvent],
        event: &LifecycleEvent,
        kind: &str,
        attempts: u32,
        detail: &str,
    ) -> OrchestratorResult<()> {
        let already_emitted = events.iter().any(|candidate| {
            candidate.event_type == EVENT_REACTION_DEAD_LETTERED
                && candidate.payload["sequence"].as_u64() == Some(event.sequence)
                && candidate.payload["kind"].as_str() == Some(kind)
        });
        if !already_emitted {
            self.ctx.emit(
                record,
                EVENT_REACTION_DEAD_LETTERED,
                json!({
                    "sequence": event.sequence,
                    "event_type": event.event_type,
                    "kind": kind,
                    "attempts": attempts,
                    "detail": detail,
                }),
            )?;
        }
        self.record(
            record,
            event,
            kind,
            ReactionStatus::DeadLettered,
            attempts,
            Some(detail.to_owned()),
            None,
        )?;
        LifecyclePerfCounters::bump(&self.perf.reactions_dead_lettered_total);
        error!(
            session_id = %record.id,
            sequence = event.sequence,
            kind,
            attempts,
            detail,
            "reaction dead-lettered"
        );
        if self.ctx.settings.halt_on_dead_letter {
            record.halted = true;
            record.status_detail = Some(format!(
                "halted: reaction {kind} for event {} dead-lettered",
                event.sequence
            ));
        }
        Ok(())
    }

    /// Fires the one urgent notify for a dead-letter event. It is never
    /// retried: a failed or interrupted escalation is settled as is.
    async fn escalate(
        &self,
        record: &SessionRecord,
        dead_letter: &LifecycleEvent,
        outcomes: &ReactionOutcomes,
    ) -> OrchestratorResult<ReactionProgress> {
        match outcomes.get(&(dead_letter.sequence, ESCALATION_KIND.to_owned())) {
            Some(entry) if entry.status.is_settled() => return Ok(ReactionProgress::Settled),
            Some(entry) => {
                self.record(
                    record,
                    dead_letter,
                    ESCALATION_KIND,
                    ReactionStatus::Unknown,
                    entry.attempt,
                    Some(INTERRUPTED_DETAIL.to_owned()),
                    None,
                )?;
                return Ok(ReactionProgress::Settled);
            }
            None => {}
        }
        if self.cancel.is_cancelled() {
            return Ok(ReactionProgress::Cancelled);
        }

        let payload = &dead_letter.payload;
        let kind = payload["kind"].as_str().unwrap_or("reaction");
        let escalation = Notification {
            session_id: Some(record.id.clone()),
            title: format!("{}: reaction {kind} gave up", record.id),
            body: format!(
                "{kind} after {} attempt(s) on `{}` (sequence {}): {}",
                payload["attempts"],
                payload["event_type"].as_str().unwrap_or("unknown"),
                payload["sequence"],
                payload["detail"].as_str().unwrap_or(""),
            ),
            priority: NotificationPriority::Urgent,
        };

        self.record(record, dead_letter, ESCALATION_KIND, ReactionStatus::Claimed, 1, None, None)?;
        match self.notify_all(&escalation).await {
            Ok(()) => {
                self.record(
                    record,
                    dead_letter,
                    ESCALATION_KIND,
                    ReactionStatus::Succeeded,
                    1,
                    None,
                    None,
                )?;
                Ok(ReactionProgress::Settled)
            }
            Err(error) if error.is_cancelled() => {
                self.record(
                    record,
                    dead_letter,
                    ESCALATION_KIND,
                    ReactionStatus::Unknown,
                    1,
                    Some(error.to_string()),
                    None,
                )?;
                Ok(ReactionProgress::Cancelled)
            }
            Err(error) => {
                warn!(session_id = %record.id, error = %error, "dead-letter escalation failed");
                self.record(
                    record,
                    dead_letter,
                    ESCALATION_KIND,
                    ReactionStatus::DeadLettered,
                    1,
                    Some(error.to_string()),
                    None,
                )?;
                Ok(ReactionProgress::Settled)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        record: &SessionRecord,
        event: &LifecycleEvent,
        kind: &str,
        status: ReactionStatus,
        attempt: u32,
        detail: Option<String>,
        retry_at_ms: Option<u64>,
    ) -> OrchestratorResult<()> {
        debug!(session_id = %record.id, sequence = event.sequence, kind, ?status, attempt, "reaction ledger");
        self.ctx.store.append_reaction(
            &record.id,
            &ReactionLedgerEntry {
                sequence: event.sequence,
                kind: kind.to_owned(),
                status,
                attempt,
                detail,
                retry_at_ms,
                recorded_at: now_timestamp(),
            },
        )
    }
}

/// Rules that fire for `event`, first rule per reaction kind.
pub fn matching_rules<'r>(
    rules: &'r [ReactionConfigToml],
    record: &SessionRecord,
    event: &LifecycleEvent,
) -> Vec<&'r ReactionConfigToml> {
    if event.event_type == EVENT_REACTION_DEAD_LETTERED {
        return Vec::new();
    }
    let keys = event.match_keys();
    let mut kinds = BTreeSet::new();
    rules
        .iter()
        .filter(|rule| keys.iter().any(|key| key == &rule.event))
        .filter(|rule| rule.labels.iter().all(|label| record.labels.contains(label)))
        .filter(|rule| rule.matches_branch(record.workspace_branch.as_deref()))
        .filter(|rule| kinds.insert(rule.action.kind()))
        .collect()
}
