use std::collections::BTreeMap;

use orchestrator_protocol::{AgentLaunchRequest, OrchestratorError, OrchestratorResult};

pub const ENV_SESSION_ID: &str = "ORCHESTRATOR_SESSION_ID";
pub const ENV_WORKDIR: &str = "ORCHESTRATOR_WORKDIR";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentKind {
    Codex,
    ClaudeCode,
    OpenCode,
}

impl AgentKind {
    pub const fn as_key(self) -> &'static str {
        match self {
            Self::Codex => "agent.codex",
            Self::ClaudeCode => "agent.claude-code",
            Self::OpenCode => "agent.opencode",
        }
    }

    /// Plugin name without the slot prefix.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Codex => "codex",
            Self::ClaudeCode => "claude-code",
            Self::OpenCode => "opencode",
        }
    }

    pub fn from_key(agent_key: &str) -> Option<Self> {
        match agent_key {
            "agent.codex" => Some(Self::Codex),
            "agent.claude-code" => Some(Self::ClaudeCode),
            "agent.opencode" => Some(Self::OpenCode),
            _ => None,
        }
    }
}

/// Settings shared by every agent adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSettings {
    pub binary: String,
    pub default_model: Option<String>,
}

impl AgentSettings {
    pub fn new(binary: impl Into<String>, default_model: Option<String>) -> OrchestratorResult<Self> {
        let binary = binary.into();
        if binary.trim().is_empty() {
            return Err(OrchestratorError::Configuration(
                "agent binary is empty. Provide a valid binary path.".to_owned(),
            ));
        }
        Ok(Self {
            binary,
            default_model,
        })
    }

    /// The request's model wins over the configured default.
    pub fn model<'a>(&'a self, request: &'a AgentLaunchRequest) -> Option<&'a str> {
        request
            .model
            .as_deref()
            .or(self.default_model.as_deref())
            .map(str::trim)
            .filter(|model| !model.is_empty())
    }
}

pub fn require_prompt(request: &AgentLaunchRequest) -> OrchestratorResult<&str> {
    let prompt = request.prompt.trim();
    if prompt.is_empty() {
        return Err(OrchestratorError::Runtime(format!(
            "refusing to launch an agent for {} without a prompt",
            request.session_id
        )));
    }
    Ok(prompt)
}

/// Environment every launched agent receives.
pub fn session_env(request: &AgentLaunchRequest) -> BTreeMap<String, String> {
    BTreeMap::from([
        (ENV_SESSION_ID.to_owned(), request.session_id.as_str().to_owned()),
        (
            ENV_WORKDIR.to_owned(),
            request.workdir.to_string_lossy().to_string(),
        ),
    ])
}
