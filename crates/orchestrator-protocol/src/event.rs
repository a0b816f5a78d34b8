use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::SessionId;

pub const EVENT_SESSION_SPAWNED: &str = "session.spawned";
pub const EVENT_SESSION_TRANSITION: &str = "session.transition";
pub const EVENT_SESSION_STATE_CONFLICT: &str = "session.state_conflict";
pub const EVENT_SESSION_FAILED: &str = "session.failed";
pub const EVENT_SESSION_EXTERNAL_ERROR: &str = "session.external_error";
pub const EVENT_SESSION_RUNTIME_EXITED: &str = "session.runtime_exited";
pub const EVENT_SESSION_TERMINATED: &str = "session.terminated";
pub const EVENT_SESSION_MESSAGE_SENT: &str = "session.message_sent";
pub const EVENT_SESSION_RESOURCE_LEAK: &str = "session.resource_leak";
pub const EVENT_REACTION_DEAD_LETTERED: &str = "reaction.dead_lettered";
pub const EVENT_WEBHOOK_RECEIVED: &str = "webhook.received";

/// One line of a session's append-only event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub session_id: SessionId,
    /// 1-based, contiguous per session.
    pub sequence: u64,
    pub event_type: String,
    #[serde(default)]
    pub payload: Value,
    pub appended_at: String,
}

impl LifecycleEvent {
    /// Names a reaction rule may match this event under.
    pub fn match_keys(&self) -> Vec<String> {
        let mut keys = vec![self.event_type.clone()];
        if self.event_type == EVENT_SESSION_TRANSITION {
            if let Some(to) = self.payload.get("to").and_then(Value::as_str) {
                keys.push(format!("transition.{to}"));
            }
        }
        keys
    }

    pub fn transition_target(&self) -> Option<&str> {
        if self.event_type != EVENT_SESSION_TRANSITION {
            return None;
        }
        self.payload.get("to").and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{LifecycleEvent, EVENT_SESSION_SPAWNED, EVENT_SESSION_TRANSITION};
    use crate::ids::SessionId;

    fn event(event_type: &str, payload: serde_json::Value) -> LifecycleEvent {
        LifecycleEvent {
            session_id: SessionId::new("app-1"),
            sequence: 3,
            event_type: event_type.to_owned(),
            payload,
            appended_at: "2026-01-01T00:00:00Z".to_owned(),
        }
    }

    #[test]
    fn transition_events_also_match_by_target_state() {
        let event = event(
            EVENT_SESSION_TRANSITION,
            json!({"from": "pr_open", "to": "ci_failed"}),
        );
        assert_eq!(
            event.match_keys(),
            vec![
                "session.transition".to_owned(),
                "transition.ci_failed".to_owned()
            ]
        );
        assert_eq!(event.transition_target(), Some("ci_failed"));
    }

    #[test]
    fn other_events_match_only_by_type() {
        let event = event(EVENT_SESSION_SPAWNED, json!({}));
        assert_eq!(event.match_keys(), vec!["session.spawned".to_owned()]);
        assert_eq!(event.transition_target(), None);
    }
}
