use std::sync::Arc;

use async_trait::async_trait;
use orchestrator_config::OrchestratorConfig;
use orchestrator_protocol::{
    Notification, NotificationPriority, Notifier, OrchestratorResult, PluginSlot,
};
use orchestrator_registry::{PluginInstance, PluginManifest, PluginModule};
use tracing::{error, info, warn};

/// Log level follows priority: urgent escalations land at `error`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> OrchestratorResult<()> {
        let session_id = notification
            .session_id
            .as_ref()
            .map(|id| id.as_str())
            .unwrap_or("-");
        match notification.priority {
            NotificationPriority::Info => info!(
                session_id,
                title = %notification.title,
                body = %notification.body,
                "notification"
            ),
            NotificationPriority::Action => warn!(
                session_id,
                title = %notification.title,
                body = %notification.body,
                "notification: action required"
            ),
            NotificationPriority::Urgent => error!(
                session_id,
                title = %notification.title,
                body = %notification.body,
                "notification: urgent"
            ),
        }
        Ok(())
    }
}

pub struct LogNotifierModule;

impl PluginModule for LogNotifierModule {
    fn manifest(&self) -> PluginManifest {
        PluginManifest {
            slot: PluginSlot::Notifier,
            name: "log",
            description: "notifications written to the orchestrator log",
        }
    }

    fn create(&self, _config: &OrchestratorConfig) -> OrchestratorResult<PluginInstance> {
        Ok(PluginInstance::Notifier(Arc::new(LogNotifier)))
    }
}
