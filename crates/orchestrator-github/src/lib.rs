//! GitHub tracker and SCM plugins backed by the `gh` CLI.

use std::sync::Arc;

use orchestrator_config::OrchestratorConfig;
use orchestrator_protocol::{OrchestratorResult, PluginSlot, ProcessCommandRunner};
use orchestrator_registry::{PluginInstance, PluginManifest, PluginModule};

mod cli;
mod scm;
mod tracker;
mod webhook;

pub use cli::GhCli;
pub use scm::GithubScm;
pub use tracker::GithubTracker;
pub use webhook::GithubWebhook;

fn gh_from_config(config: &OrchestratorConfig) -> OrchestratorResult<GhCli> {
    GhCli::new(Arc::new(ProcessCommandRunner), config.github.binary.clone())
}

pub struct GithubTrackerModule;

impl PluginModule for GithubTrackerModule {
    fn manifest(&self) -> PluginManifest {
        PluginManifest {
            slot: PluginSlot::Tracker,
            name: "github",
            description: "GitHub issues through the gh CLI",
        }
    }

    fn create(&self, config: &OrchestratorConfig) -> OrchestratorResult<PluginInstance> {
        Ok(PluginInstance::Tracker(Arc::new(GithubTracker::new(
            gh_from_config(config)?,
        ))))
    }
}

pub struct GithubScmModule;

impl PluginModule for GithubScmModule {
    fn manifest(&self) -> PluginManifest {
        PluginManifest {
            slot: PluginSlot::Scm,
            name: "github",
            description: "GitHub pull requests, checks and reviews through the gh CLI",
        }
    }

    fn create(&self, config: &OrchestratorConfig) -> OrchestratorResult<PluginInstance> {
        Ok(PluginInstance::Scm(Arc::new(GithubScm::new(gh_from_config(
            config,
        )?))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modules_register_under_github_keys() {
        assert_eq!(GithubTrackerModule.manifest().key().as_key(), "tracker.github");
        assert_eq!(GithubScmModule.manifest().key().as_key(), "scm.github");

        let config = OrchestratorConfig::default();
        assert!(matches!(
            GithubTrackerModule.create(&config),
            Ok(PluginInstance::Tracker(_))
        ));
    }

    #[test]
    fn empty_binary_makes_the_plugin_unavailable() {
        let mut config = OrchestratorConfig::default();
        config.github.binary = String::new();
        assert!(GithubScmModule.create(&config).is_err());
    }
}
