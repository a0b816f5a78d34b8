//! Dependency wiring: the compiled plugin list, the registry built from it,
//! and the two managers sharing one lifecycle context.

use std::sync::Arc;

use orchestrator_config::OrchestratorConfig;
use orchestrator_eventbus::LifecycleEventBus;
use orchestrator_git::GitWorktreeModule;
use orchestrator_github::{GithubScmModule, GithubTrackerModule};
use orchestrator_harness::agent_modules;
use orchestrator_lifecycle::{LifecycleContext, LifecycleManager};
use orchestrator_notify::{LogNotifierModule, WebhookNotifierModule};
use orchestrator_protocol::OrchestratorResult;
use orchestrator_registry::{PluginModule, PluginRegistry};
use orchestrator_runtime::TmuxRuntimeModule;
use orchestrator_session::SessionManager;
use orchestrator_store::MetadataStore;
use tracing::{info, warn};

/// Every plugin compiled into this binary.
pub fn builtin_modules() -> Vec<Box<dyn PluginModule>> {
    let mut modules: Vec<Box<dyn PluginModule>> = vec![
        Box::new(GithubTrackerModule),
        Box::new(GithubScmModule),
        Box::new(GitWorktreeModule),
        Box::new(TmuxRuntimeModule),
        Box::new(LogNotifierModule),
        Box::new(WebhookNotifierModule),
    ];
    modules.extend(
        agent_modules()
            .into_iter()
            .map(|module| Box::new(module) as Box<dyn PluginModule>),
    );
    modules
}

pub fn build_registry(
    modules: &[Box<dyn PluginModule>],
    config: &OrchestratorConfig,
) -> OrchestratorResult<PluginRegistry> {
    let mut registry = PluginRegistry::new();
    registry.register_all(modules, config)?;
    for (key, reason) in registry.unavailable() {
        warn!(plugin = %key, reason, "plugin not available");
    }
    Ok(registry)
}

/// Assembled orchestrator. Cloning shares the same managers.
#[derive(Clone)]
pub struct App {
    pub config: Arc<OrchestratorConfig>,
    pub lifecycle: LifecycleManager,
    pub sessions: SessionManager,
}

impl App {
    /// Fails when any configured project cannot resolve its plugins, so no
    /// session is ever spawned against a half-wired project.
    pub fn build(config: OrchestratorConfig, registry: &PluginRegistry) -> OrchestratorResult<Self> {
        let projects = registry.validate_projects(&config)?;
        let store = MetadataStore::open(&config.store_root)?;
        let bus = Arc::new(LifecycleEventBus::default());
        let ctx = Arc::new(LifecycleContext::new(store, bus, projects, &config));
        info!(
            projects = ctx.projects.len(),
            store_root = %config.store_root,
            "orchestrator assembled"
        );

        Ok(Self {
            config: Arc::new(config),
            lifecycle: LifecycleManager::new(Arc::clone(&ctx)),
            sessions: SessionManager::new(ctx),
        })
    }

    pub fn context(&self) -> &Arc<LifecycleContext> {
        self.lifecycle.context()
    }
}
