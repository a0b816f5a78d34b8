use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Instant;

use orchestrator_protocol::{LifecycleEvent, SessionId};
use tokio::sync::broadcast;

use crate::envelope::EventEnvelope;

pub const DEFAULT_SESSION_BUFFER_CAPACITY: usize = 64;
pub const DEFAULT_GLOBAL_BUFFER_CAPACITY: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventBusConfig {
    pub session_buffer_capacity: usize,
    pub global_buffer_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            session_buffer_capacity: DEFAULT_SESSION_BUFFER_CAPACITY,
            global_buffer_capacity: DEFAULT_GLOBAL_BUFFER_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventBusSnapshot {
    pub published: u64,
    pub delivered_to_nobody: u64,
    pub session_channels: usize,
}

/// Bounded broadcast of lifecycle events. Slow subscribers observe
/// `RecvError::Lagged`; publishing never blocks the lifecycle loop.
#[derive(Debug)]
pub struct LifecycleEventBus {
    next_sequence: AtomicU64,
    delivered_to_nobody: AtomicU64,
    boot_instant: Instant,
    config: EventBusConfig,
    session_senders: RwLock<HashMap<SessionId, broadcast::Sender<EventEnvelope>>>,
    global_sender: broadcast::Sender<EventEnvelope>,
}

impl Default for LifecycleEventBus {
    fn default() -> Self {
        Self::new(EventBusConfig::default())
    }
}

impl LifecycleEventBus {
    /// Zero capacities are raised to one.
    pub fn new(config: EventBusConfig) -> Self {
        let config = EventBusConfig {
            session_buffer_capacity: config.session_buffer_capacity.max(1),
            global_buffer_capacity: config.global_buffer_capacity.max(1),
        };
        let (global_sender, _global_receiver) = broadcast::channel(config.global_buffer_capacity);
        Self {
            next_sequence: AtomicU64::new(0),
            delivered_to_nobody: AtomicU64::new(0),
            boot_instant: Instant::now(),
            config,
            session_senders: RwLock::new(HashMap::new()),
            global_sender,
        }
    }

    pub fn subscribe_session(&self, session_id: SessionId) -> broadcast::Receiver<EventEnvelope> {
        if let Some(sender) = self.session_sender(&session_id) {
            return sender.subscribe();
        }

        let mut session_senders = self
            .session_senders
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        session_senders
            .entry(session_id)
            .or_insert_with(|| broadcast::channel(self.config.session_buffer_capacity).0)
            .subscribe()
    }

    pub fn subscribe_all(&self) -> broadcast::Receiver<EventEnvelope> {
        self.global_sender.subscribe()
    }

    /// Drops the session channel, closing its subscribers. Called once a
    /// session is archived.
    pub fn remove_session(&self, session_id: &SessionId) -> bool {
        self.session_senders
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(session_id)
            .is_some()
    }

    pub fn publish(&self, event: LifecycleEvent) -> EventEnvelope {
        let envelope = EventEnvelope {
            global_sequence: self.next_sequence.fetch_add(1, Ordering::Relaxed) + 1,
            received_at_monotonic_nanos: self.monotonic_nanos(),
            event,
        };

        let mut delivered = false;
        if let Some(sender) = self.session_sender(envelope.session_id()) {
            delivered |= sender.send(envelope.clone()).is_ok();
        }
        delivered |= self.global_sender.send(envelope.clone()).is_ok();
        if !delivered {
            self.delivered_to_nobody.fetch_add(1, Ordering::Relaxed);
        }

        envelope
    }

    pub fn snapshot(&self) -> EventBusSnapshot {
        EventBusSnapshot {
            published: self.next_sequence.load(Ordering::Relaxed),
            delivered_to_nobody: self.delivered_to_nobody.load(Ordering::Relaxed),
            session_channels: self
                .session_senders
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .len(),
        }
    }

    fn session_sender(&self, session_id: &SessionId) -> Option<broadcast::Sender<EventEnvelope>> {
        self.session_senders
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(session_id)
            .cloned()
    }

    fn monotonic_nanos(&self) -> u64 {
        u64::try_from(self.boot_instant.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }
}
