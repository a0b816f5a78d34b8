use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use orchestrator_config::{LifecycleRuntimeConfig, OrchestratorConfig};
use orchestrator_eventbus::LifecycleEventBus;
use orchestrator_protocol::{
    CallPolicy, LifecycleEvent, OrchestratorError, OrchestratorResult, ProjectId, RetryPolicy,
};
use orchestrator_registry::ResolvedProject;
use orchestrator_store::{now_timestamp, MetadataStore, SessionRecord};
use serde_json::Value;

use crate::coordinator::SessionCoordinator;

/// State shared by the session and lifecycle managers. Built once at startup
/// after plugin validation.
pub struct LifecycleContext {
    pub store: MetadataStore,
    pub bus: Arc<LifecycleEventBus>,
    pub coordinator: SessionCoordinator,
    pub projects: BTreeMap<ProjectId, ResolvedProject>,
    pub call_policy: CallPolicy,
    pub settings: LifecycleRuntimeConfig,
}

impl LifecycleContext {
    pub fn new(
        store: MetadataStore,
        bus: Arc<LifecycleEventBus>,
        projects: BTreeMap<ProjectId, ResolvedProject>,
        config: &OrchestratorConfig,
    ) -> Self {
        let settings = config.lifecycle_runtime();
        let retry = config.retry_runtime();
        Self {
            store,
            bus,
            coordinator: SessionCoordinator::new(),
            projects,
            call_policy: CallPolicy {
                timeout: Duration::from_millis(settings.call_timeout_ms),
                retry: RetryPolicy {
                    max_retries: retry.max_retries,
                    base_delay_ms: retry.base_delay_ms,
                    max_delay_ms: retry.max_delay_ms,
                    jitter_factor: retry.jitter_factor,
                },
            },
            settings,
        }
    }

    pub fn project(&self, project_id: &ProjectId) -> OrchestratorResult<&ResolvedProject> {
        self.projects.get(project_id).ok_or_else(|| {
            OrchestratorError::Configuration(format!(
                "project '{project_id}' is not configured or failed plugin validation"
            ))
        })
    }

    /// Appends to the session log, publishes on the bus, and advances the
    /// record's `last_sequence`. The caller persists the record.
    pub fn emit(
        &self,
        record: &mut SessionRecord,
        event_type: &str,
        payload: Value,
    ) -> OrchestratorResult<LifecycleEvent> {
        let event = self.store.append_event(&record.id, event_type, payload)?;
        record.last_sequence = event.sequence;
        record.updated_at = now_timestamp();
        self.bus.publish(event.clone());
        Ok(event)
    }

    pub fn persist(&self, record: &mut SessionRecord) -> OrchestratorResult<()> {
        record.updated_at = now_timestamp();
        self.store.write_record(record)
    }

    /// Moves a finished session out of the active set.
    pub fn archive(&self, record: &SessionRecord) -> OrchestratorResult<()> {
        self.store.archive_session(&record.id)?;
        self.bus.remove_session(&record.id);
        self.coordinator.forget(&record.id);
        Ok(())
    }
}
