use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct LifecyclePerfSnapshot {
    pub scans_total: u64,
    pub polls_total: u64,
    pub polls_skipped_busy_total: u64,
    pub polls_failed_total: u64,
    pub transitions_total: u64,
    pub conflicts_total: u64,
    pub external_errors_total: u64,
    pub reactions_executed_total: u64,
    pub reactions_failed_total: u64,
    pub reactions_dead_lettered_total: u64,
    pub sessions_archived_total: u64,
    pub webhooks_accepted_total: u64,
    pub webhooks_rejected_total: u64,
}

#[derive(Debug, Default)]
pub(crate) struct LifecyclePerfCounters {
    pub(crate) scans_total: AtomicU64,
    pub(crate) polls_total: AtomicU64,
    pub(crate) polls_skipped_busy_total: AtomicU64,
    pub(crate) polls_failed_total: AtomicU64,
    pub(crate) transitions_total: AtomicU64,
    pub(crate) conflicts_total: AtomicU64,
    pub(crate) external_errors_total: AtomicU64,
    pub(crate) reactions_executed_total: AtomicU64,
    pub(crate) reactions_failed_total: AtomicU64,
    pub(crate) reactions_dead_lettered_total: AtomicU64,
    pub(crate) sessions_archived_total: AtomicU64,
    pub(crate) webhooks_accepted_total: AtomicU64,
    pub(crate) webhooks_rejected_total: AtomicU64,
}

impl LifecyclePerfCounters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> LifecyclePerfSnapshot {
        LifecyclePerfSnapshot {
            scans_total: self.scans_total.load(Ordering::Relaxed),
            polls_total: self.polls_total.load(Ordering::Relaxed),
            polls_skipped_busy_total: self.polls_skipped_busy_total.load(Ordering::Relaxed),
            polls_failed_total: self.polls_failed_total.load(Ordering::Relaxed),
            transitions_total: self.transitions_total.load(Ordering::Relaxed),
            conflicts_total: self.conflicts_total.load(Ordering::Relaxed),
            external_errors_total: self.external_errors_total.load(Ordering::Relaxed),
            reactions_executed_total: self.reactions_executed_total.load(Ordering::Relaxed),
            reactions_failed_total: self.reactions_failed_total.load(Ordering::Relaxed),
            reactions_dead_lettered_total: self
                .reactions_dead_lettered_total
                .load(Ordering::Relaxed),
            sessions_archived_total: self.sessions_archived_total.load(Ordering::Relaxed),
            webhooks_accepted_total: self.webhooks_accepted_total.load(Ordering::Relaxed),
            webhooks_rejected_total: self.webhooks_rejected_total.load(Ordering::Relaxed),
        }
    }
}
