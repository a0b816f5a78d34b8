use orchestrator_protocol::{LifecycleEvent, SessionId};

/// A persisted event as seen by bus subscribers.
///
/// `global_sequence` orders deliveries across sessions; the per-session order
/// is `event.sequence`.
#[derive(Debug, Clone, PartialEq)]
pub struct EventEnvelope {
    pub global_sequence: u64,
    pub received_at_monotonic_nanos: u64,
    pub event: LifecycleEvent,
}

impl EventEnvelope {
    pub fn session_id(&self) -> &SessionId {
        &self.event.session_id
    }
}
