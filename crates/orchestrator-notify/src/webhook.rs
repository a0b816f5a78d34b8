use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use orchestrator_config::OrchestratorConfig;
use orchestrator_protocol::command::truncate_for_error;
use orchestrator_protocol::{
    Notification, Notifier, OrchestratorError, OrchestratorResult, PluginSlot,
};
use orchestrator_registry::{PluginInstance, PluginManifest, PluginModule};
use serde_json::json;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct WebhookNotifier {
    endpoint: String,
    client: reqwest::Client,
}

impl fmt::Debug for WebhookNotifier {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("WebhookNotifier")
            .field("endpoint", &"<redacted>")
            .finish()
    }
}

impl WebhookNotifier {
    pub fn new(endpoint: impl Into<String>) -> OrchestratorResult<Self> {
        let endpoint = endpoint.into();
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(OrchestratorError::Configuration(
                "notify.webhook_url must be an http(s) URL".to_owned(),
            ));
        }
        let client = reqwest::Client::builder()
            .user_agent("orchestrator/notify")
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| {
                OrchestratorError::Configuration(format!(
                    "failed to initialize notification HTTP client: {err}"
                ))
            })?;

        Ok(Self { endpoint, client })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &Notification) -> OrchestratorResult<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({
                "session_id": notification.session_id,
                "title": notification.title,
                "body": notification.body,
                "priority": notification.priority,
            }))
            .send()
            .await
            .map_err(|err| {
                OrchestratorError::TransientExternal(format!(
                    "failed to deliver notification webhook: {err}"
                ))
            })?;

        let status = response.status();
        if status.is_success() {
            debug!(status = status.as_u16(), "notification webhook delivered");
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(OrchestratorError::from_http_status(
            status.as_u16(),
            format!("notification webhook rejected: {}", truncate_for_error(&body)),
        ))
    }
}

/// Unavailable unless `notify.webhook_url` is set.
pub struct WebhookNotifierModule;

impl PluginModule for WebhookNotifierModule {
    fn manifest(&self) -> PluginManifest {
        PluginManifest {
            slot: PluginSlot::Notifier,
            name: "webhook",
            description: "notifications POSTed as JSON to notify.webhook_url",
        }
    }

    fn create(&self, config: &OrchestratorConfig) -> OrchestratorResult<PluginInstance> {
        let endpoint = config.notify.webhook_url.clone().ok_or_else(|| {
            OrchestratorError::Configuration("notify.webhook_url is not set".to_owned())
        })?;
        Ok(PluginInstance::Notifier(Arc::new(WebhookNotifier::new(
            endpoint,
        )?)))
    }
}
