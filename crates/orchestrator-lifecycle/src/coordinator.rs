use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use orchestrator_protocol::SessionId;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

/// Per-session exclusion and cancellation shared by both managers.
#[derive(Debug)]
pub struct SessionSlot {
    lock: Arc<AsyncMutex<()>>,
    cancel: CancellationToken,
}

impl SessionSlot {
    fn new() -> Self {
        Self {
            lock: Arc::new(AsyncMutex::new(())),
            cancel: CancellationToken::new(),
        }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn lock(&self) -> OwnedMutexGuard<()> {
        Arc::clone(&self.lock).lock_owned().await
    }

    /// `None` if another worker holds the session.
    pub fn try_lock(&self) -> Option<OwnedMutexGuard<()>> {
        Arc::clone(&self.lock).try_lock_owned().ok()
    }
}

#[derive(Debug, Default)]
pub struct SessionCoordinator {
    slots: Mutex<HashMap<SessionId, Arc<SessionSlot>>>,
}

impl SessionCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slot(&self, session_id: &SessionId) -> Arc<SessionSlot> {
        let mut slots = self
            .slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(
            slots
                .entry(session_id.clone())
                .or_insert_with(|| Arc::new(SessionSlot::new())),
        )
    }

    /// Signals any in-flight cycle for the session to stop before its next
    /// side effect.
    pub fn cancel(&self, session_id: &SessionId) -> Arc<SessionSlot> {
        let slot = self.slot(session_id);
        slot.cancel.cancel();
        slot
    }

    /// Drops bookkeeping for an archived session. Holders of the old slot
    /// keep their (cancelled) token.
    pub fn forget(&self, session_id: &SessionId) {
        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(session_id);
    }

    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
