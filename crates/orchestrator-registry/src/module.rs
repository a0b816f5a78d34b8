use std::fmt;
use std::sync::Arc;

use orchestrator_config::OrchestratorConfig;
use orchestrator_protocol::{
    Agent, Notifier, OrchestratorResult, PluginKey, PluginSlot, Runtime, Scm, Tracker, Workspace,
};

/// Static description of a compiled-in plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PluginManifest {
    pub slot: PluginSlot,
    pub name: &'static str,
    pub description: &'static str,
}

impl PluginManifest {
    pub fn key(&self) -> PluginKey {
        PluginKey::new(self.slot, self.name)
    }
}

/// One entry of the build-time registration list.
pub trait PluginModule: Send + Sync {
    fn manifest(&self) -> PluginManifest;

    /// Constructs the instance. An error marks the plugin unavailable in this
    /// environment; it only fails a project that actually requires it.
    fn create(&self, config: &OrchestratorConfig) -> OrchestratorResult<PluginInstance>;
}

#[derive(Clone)]
pub enum PluginInstance {
    Runtime(Arc<dyn Runtime>),
    Agent(Arc<dyn Agent>),
    Workspace(Arc<dyn Workspace>),
    Tracker(Arc<dyn Tracker>),
    Scm(Arc<dyn Scm>),
    Notifier(Arc<dyn Notifier>),
}

impl PluginInstance {
    pub const fn slot(&self) -> PluginSlot {
        match self {
            Self::Runtime(_) => PluginSlot::Runtime,
            Self::Agent(_) => PluginSlot::Agent,
            Self::Workspace(_) => PluginSlot::Workspace,
            Self::Tracker(_) => PluginSlot::Tracker,
            Self::Scm(_) => PluginSlot::Scm,
            Self::Notifier(_) => PluginSlot::Notifier,
        }
    }
}

impl fmt::Debug for PluginInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PluginInstance")
            .field(&self.slot().as_str())
            .finish()
    }
}
