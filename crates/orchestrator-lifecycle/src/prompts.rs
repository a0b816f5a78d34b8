use orchestrator_protocol::event::{
    EVENT_REACTION_DEAD_LETTERED, EVENT_SESSION_EXTERNAL_ERROR, EVENT_SESSION_FAILED,
    EVENT_SESSION_RUNTIME_EXITED, EVENT_SESSION_STATE_CONFLICT,
};
use orchestrator_protocol::{LifecycleEvent, NotificationPriority, SessionState};
use orchestrator_store::SessionRecord;

/// Message sent into the agent's runtime when its pull request needs work.
pub fn remediation_prompt(record: &SessionRecord, event: &LifecycleEvent) -> String {
    let pr = record
        .pr
        .as_ref()
        .map(|pr| format!("pull request #{} ({})", pr.number, pr.url))
        .unwrap_or_else(|| "your pull request".to_owned());

    match event.transition_target().and_then(|to| to.parse().ok()) {
        Some(SessionState::CiFailed) => format!(
            "CI is failing on {pr}. Inspect the failing checks, fix the cause, and push the fix to the same branch."
        ),
        Some(SessionState::ChangesRequested) => format!(
            "A reviewer requested changes on {pr}. Read the review comments, address each one, and push the updates to the same branch."
        ),
        Some(SessionState::Mergeable) => {
            format!("{pr} is approved and mergeable. Stop making changes unless asked.")
        }
        Some(state) => format!("Session {} is now {state} for {pr}.", record.id),
        None => format!(
            "Session {} recorded `{}`. Check the state of {pr} and continue working on issue {}.",
            record.id, event.event_type, record.issue
        ),
    }
}

pub fn notification_title(record: &SessionRecord, event: &LifecycleEvent) -> String {
    match event.transition_target() {
        Some(to) => format!("{} is {to}", record.id),
        None => format!("{}: {}", record.id, event.event_type),
    }
}

pub fn notification_body(record: &SessionRecord, event: &LifecycleEvent) -> String {
    let mut body = format!(
        "project {} issue {} state {}",
        record.project, record.issue, record.state
    );
    if let Some(pr) = record.pr.as_ref() {
        body.push_str(&format!("\n{}", pr.url));
    }
    if let Some(detail) = event.payload.get("detail").and_then(|value| value.as_str()) {
        body.push_str(&format!("\n{detail}"));
    }
    body
}

pub fn notification_priority(event: &LifecycleEvent) -> NotificationPriority {
    match event.event_type.as_str() {
        EVENT_REACTION_DEAD_LETTERED | EVENT_SESSION_FAILED | EVENT_SESSION_RUNTIME_EXITED => {
            NotificationPriority::Urgent
        }
        EVENT_SESSION_STATE_CONFLICT | EVENT_SESSION_EXTERNAL_ERROR => NotificationPriority::Action,
        _ => match event.transition_target() {
            Some("mergeable" | "changes_requested" | "failed") => NotificationPriority::Action,
            _ => NotificationPriority::Info,
        },
    }
}
