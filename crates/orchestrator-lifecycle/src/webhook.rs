use orchestrator_protocol::{OrchestratorError, SessionId, WebhookEvent};
use orchestrator_store::SessionRecord;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WebhookRejection {
    #[error("no configured project uses webhook plugin {0}")]
    UnknownPlugin(String),
    #[error("webhook signature rejected: {0}")]
    Signature(OrchestratorError),
    #[error("webhook payload rejected: {0}")]
    Payload(OrchestratorError),
    #[error("webhook handling failed: {0}")]
    Internal(OrchestratorError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookOutcome {
    pub event: WebhookEvent,
    /// Sessions that received an out-of-band poll.
    pub polled: Vec<SessionId>,
}

/// Whether a normalized webhook event concerns `record`.
pub fn webhook_targets(event: &WebhookEvent, record: &SessionRecord) -> bool {
    match event {
        WebhookEvent::Issue { issue_id, .. } => record.issue.as_str() == issue_id,
        WebhookEvent::MergeRequest { number, branch, .. } => {
            let by_number = record.pr.as_ref().is_some_and(|pr| pr.number == *number);
            let by_branch = match (branch.as_deref(), record.workspace_branch.as_deref()) {
                (Some(observed), Some(recorded)) => observed == recorded,
                _ => false,
            };
            by_number || by_branch
        }
        WebhookEvent::Unknown { .. } => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator_protocol::{IssueId, ProjectId, PullRequestRef};

    fn record() -> SessionRecord {
        let mut record = SessionRecord::new(
            SessionId::new("app-1"),
            ProjectId::new("app"),
            IssueId::new("42"),
            "agent.codex",
            "2026-01-01T00:00:00Z",
        );
        record.workspace_branch = Some("feat/issue-42".to_owned());
        record
    }

    #[test]
    fn merge_request_events_match_by_branch_before_a_pr_is_recorded() {
        let event = WebhookEvent::MergeRequest {
            number: 7,
            branch: Some("feat/issue-42".to_owned()),
            action: "opened".to_owned(),
        };
        let mut record = record();
        assert!(webhook_targets(&event, &record));

        record.workspace_branch = None;
        assert!(!webhook_targets(&event, &record));
        record.pr = Some(PullRequestRef {
            number: 7,
            url: "https://github.com/acme/app/pull/7".to_owned(),
            branch: "feat/issue-42".to_owned(),
        });
        assert!(webhook_targets(&event, &record));
    }

    #[test]
    fn issue_events_match_by_issue_id() {
        let event = WebhookEvent::Issue {
            issue_id: "42".to_owned(),
            action: "closed".to_owned(),
        };
        assert!(webhook_targets(&event, &record()));
        let other = WebhookEvent::Issue {
            issue_id: "43".to_owned(),
            action: "closed".to_owned(),
        };
        assert!(!webhook_targets(&other, &record()));
    }
}
