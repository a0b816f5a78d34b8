use std::sync::Arc;

use orchestrator_config::OrchestratorConfig;
use orchestrator_protocol::{Agent, OrchestratorError, OrchestratorResult, PluginSlot};
use orchestrator_registry::{PluginInstance, PluginManifest, PluginModule};

use crate::interface::{AgentKind, AgentSettings};
use crate::providers::{claude_code::ClaudeCodeAgent, codex::CodexAgent, opencode::OpenCodeAgent};

const SUPPORTED_AGENT_KEYS: [&str; 3] = [
    AgentKind::Codex.as_key(),
    AgentKind::ClaudeCode.as_key(),
    AgentKind::OpenCode.as_key(),
];

pub fn supported_agent_keys() -> &'static [&'static str] {
    &SUPPORTED_AGENT_KEYS
}

pub fn resolve_agent_kind(agent_key: &str) -> OrchestratorResult<AgentKind> {
    AgentKind::from_key(agent_key).ok_or_else(|| {
        OrchestratorError::Configuration(format!("unknown agent plugin key: {agent_key}"))
    })
}

pub fn build_agent(kind: AgentKind, config: &OrchestratorConfig) -> OrchestratorResult<Arc<dyn Agent>> {
    let agents = &config.agents;
    let model = agents.model.clone();
    let agent: Arc<dyn Agent> = match kind {
        AgentKind::Codex => Arc::new(CodexAgent::new(AgentSettings::new(
            agents.codex_binary.clone(),
            model,
        )?)),
        AgentKind::ClaudeCode => Arc::new(ClaudeCodeAgent::new(AgentSettings::new(
            agents.claude_binary.clone(),
            model,
        )?)),
        AgentKind::OpenCode => Arc::new(OpenCodeAgent::new(AgentSettings::new(
            agents.opencode_binary.clone(),
            model,
        )?)),
    };
    Ok(agent)
}

/// Registration entry for one agent adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentModule {
    kind: AgentKind,
}

impl AgentModule {
    pub const fn new(kind: AgentKind) -> Self {
        Self { kind }
    }
}

impl PluginModule for AgentModule {
    fn manifest(&self) -> PluginManifest {
        let description = match self.kind {
            AgentKind::Codex => "OpenAI Codex CLI",
            AgentKind::ClaudeCode => "Claude Code CLI",
            AgentKind::OpenCode => "OpenCode CLI",
        };
        PluginManifest {
            slot: PluginSlot::Agent,
            name: self.kind.name(),
            description,
        }
    }

    fn create(&self, config: &OrchestratorConfig) -> OrchestratorResult<PluginInstance> {
        Ok(PluginInstance::Agent(build_agent(self.kind, config)?))
    }
}

pub fn agent_modules() -> Vec<AgentModule> {
    SUPPORTED_AGENT_KEYS
        .iter()
        .filter_map(|key| AgentKind::from_key(key))
        .map(AgentModule::new)
        .collect()
}
