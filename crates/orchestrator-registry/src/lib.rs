//! Explicit plugin registry built once at startup and handed to both
//! managers. Plugins come from a compiled registration list; a project that
//! needs an unresolved `<slot>.<name>` fails validation before any session
//! for it is spawned.

mod module;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use orchestrator_config::{OrchestratorConfig, ProjectConfigToml, ReactionAction};
use orchestrator_protocol::{
    Agent, CustomReaction, Notifier, OrchestratorError, OrchestratorResult, PluginKey, PluginSlot,
    ProjectContext, ProjectId, Runtime, Scm, Tracker, Workspace,
};
use tracing::{debug, warn};

pub use module::{PluginInstance, PluginManifest, PluginModule};

#[derive(Default)]
pub struct PluginRegistry {
    plugins: BTreeMap<PluginKey, PluginInstance>,
    unavailable: BTreeMap<PluginKey, String>,
    custom_reactions: BTreeMap<String, Arc<dyn CustomReaction>>,
}

/// Plugin instances one project resolved to.
#[derive(Clone)]
pub struct ResolvedPlugins {
    pub tracker: Arc<dyn Tracker>,
    pub scm: Arc<dyn Scm>,
    pub runtime: Arc<dyn Runtime>,
    pub agent: Arc<dyn Agent>,
    pub workspace: Arc<dyn Workspace>,
    pub notifiers: Vec<Arc<dyn Notifier>>,
    pub custom_reactions: BTreeMap<String, Arc<dyn CustomReaction>>,
}

#[derive(Clone)]
pub struct ResolvedProject {
    pub context: ProjectContext,
    pub config: ProjectConfigToml,
    pub plugins: ResolvedPlugins,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Constructs `module` and binds it under its manifest key.
    ///
    /// Construction failures are recorded, not returned: the plugin is
    /// simply unavailable until a project requires it.
    pub fn register(
        &mut self,
        module: &dyn PluginModule,
        config: &OrchestratorConfig,
    ) -> OrchestratorResult<()> {
        let manifest = module.manifest();
        let key = manifest.key();
        match module.create(config) {
            Ok(instance) => self.insert(key, instance),
            Err(error) => {
                warn!(plugin = %key, error = %error, "plugin unavailable in this environment");
                self.unavailable.insert(key, error.to_string());
                Ok(())
            }
        }
    }

    pub fn register_all(
        &mut self,
        modules: &[Box<dyn PluginModule>],
        config: &OrchestratorConfig,
    ) -> OrchestratorResult<()> {
        for module in modules {
            self.register(module.as_ref(), config)?;
        }
        Ok(())
    }

    /// Binds an already-constructed instance.
    pub fn insert(&mut self, key: PluginKey, instance: PluginInstance) -> OrchestratorResult<()> {
        if instance.slot() != key.slot {
            return Err(OrchestratorError::Configuration(format!(
                "plugin {key} was constructed as a {} plugin",
                instance.slot()
            )));
        }
        if self.plugins.contains_key(&key) {
            return Err(OrchestratorError::Configuration(format!(
                "plugin {key} is registered twice"
            )));
        }
        debug!(plugin = %key, "registered plugin");
        self.unavailable.remove(&key);
        self.plugins.insert(key, instance);
        Ok(())
    }

    pub fn register_custom_reaction(
        &mut self,
        name: impl Into<String>,
        reaction: Arc<dyn CustomReaction>,
    ) {
        self.custom_reactions.insert(name.into(), reaction);
    }

    pub fn get(&self, slot: PluginSlot, name: &str) -> Option<&PluginInstance> {
        self.plugins.get(&PluginKey::new(slot, name))
    }

    /// Registered plugin names for `slot`, sorted.
    pub fn list(&self, slot: PluginSlot) -> Vec<String> {
        self.plugins
            .keys()
            .filter(|key| key.slot == slot)
            .map(|key| key.name.clone())
            .collect()
    }

    pub fn unavailable(&self) -> impl Iterator<Item = (&PluginKey, &str)> {
        self.unavailable
            .iter()
            .map(|(key, reason)| (key, reason.as_str()))
    }

    pub fn resolve_project(&self, project: &ProjectConfigToml) -> OrchestratorResult<ResolvedProject> {
        let plugins = ResolvedPlugins {
            tracker: match self.lookup(project, PluginSlot::Tracker, &project.tracker)? {
                PluginInstance::Tracker(tracker) => tracker,
                other => return Err(slot_mismatch(project, &project.tracker, &other)),
            },
            scm: match self.lookup(project, PluginSlot::Scm, &project.scm)? {
                PluginInstance::Scm(scm) => scm,
                other => return Err(slot_mismatch(project, &project.scm, &other)),
            },
            runtime: match self.lookup(project, PluginSlot::Runtime, &project.runtime)? {
                PluginInstance::Runtime(runtime) => runtime,
                other => return Err(slot_mismatch(project, &project.runtime, &other)),
            },
            agent: match self.lookup(project, PluginSlot::Agent, &project.agent)? {
                PluginInstance::Agent(agent) => agent,
                other => return Err(slot_mismatch(project, &project.agent, &other)),
            },
            workspace: match self.lookup(project, PluginSlot::Workspace, &project.workspace)? {
                PluginInstance::Workspace(workspace) => workspace,
                other => return Err(slot_mismatch(project, &project.workspace, &other)),
            },
            notifiers: project
                .notifiers
                .iter()
                .map(|key| match self.lookup(project, PluginSlot::Notifier, key)? {
                    PluginInstance::Notifier(notifier) => Ok(notifier),
                    other => Err(slot_mismatch(project, key, &other)),
                })
                .collect::<OrchestratorResult<Vec<_>>>()?,
            custom_reactions: self.resolve_custom_reactions(project)?,
        };

        Ok(ResolvedProject {
            context: project_context(project),
            config: project.clone(),
            plugins,
        })
    }

    /// Startup validation pass: every configured project must resolve.
    pub fn validate_projects(
        &self,
        config: &OrchestratorConfig,
    ) -> OrchestratorResult<BTreeMap<ProjectId, ResolvedProject>> {
        let mut resolved = BTreeMap::new();
        let mut failures = Vec::new();
        for project in &config.projects {
            match self.resolve_project(project) {
                Ok(entry) => {
                    resolved.insert(entry.context.id.clone(), entry);
                }
                Err(error) => failures.push(error.detail().to_owned()),
            }
        }
        if failures.is_empty() {
            Ok(resolved)
        } else {
            Err(OrchestratorError::Configuration(failures.join("; ")))
        }
    }

    fn lookup(
        &self,
        project: &ProjectConfigToml,
        expected: PluginSlot,
        raw_key: &str,
    ) -> OrchestratorResult<PluginInstance> {
        let key = PluginKey::from_key(raw_key)
            .filter(|key| key.slot == expected)
            .ok_or_else(|| {
                OrchestratorError::Configuration(format!(
                    "project '{}' sets {} plugin to '{raw_key}', expected `{}.<name>`",
                    project.id,
                    expected.as_str(),
                    expected.as_str()
                ))
            })?;

        if let Some(instance) = self.plugins.get(&key) {
            return Ok(instance.clone());
        }
        let reason = match self.unavailable.get(&key) {
            Some(reason) => format!(" ({reason})"),
            None => String::new(),
        };
        Err(OrchestratorError::Configuration(format!(
            "project '{}' requires plugin {key}, which is not available{reason}",
            project.id
        )))
    }

    fn resolve_custom_reactions(
        &self,
        project: &ProjectConfigToml,
    ) -> OrchestratorResult<BTreeMap<String, Arc<dyn CustomReaction>>> {
        let mut resolved = BTreeMap::new();
        for rule in &project.reactions {
            let ReactionAction::Custom(name) = &rule.action else {
                continue;
            };
            let reaction = self.custom_reactions.get(name).ok_or_else(|| {
                OrchestratorError::Configuration(format!(
                    "project '{}' references unknown custom reaction '{name}'",
                    project.id
                ))
            })?;
            resolved.insert(name.clone(), Arc::clone(reaction));
        }
        Ok(resolved)
    }
}

pub fn project_context(project: &ProjectConfigToml) -> ProjectContext {
    ProjectContext {
        id: ProjectId::new(project.id.clone()),
        repository: project.repository.clone(),
        path: PathBuf::from(&project.path),
        default_branch: project.default_branch.clone(),
    }
}

fn slot_mismatch(
    project: &ProjectConfigToml,
    raw_key: &str,
    instance: &PluginInstance,
) -> OrchestratorError {
    OrchestratorError::Configuration(format!(
        "project '{}' plugin '{raw_key}' resolved to a {} plugin",
        project.id,
        instance.slot()
    ))
}
