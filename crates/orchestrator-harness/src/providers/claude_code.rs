use orchestrator_protocol::{Agent, AgentLaunchRequest, LaunchSpec, OrchestratorResult};

use crate::interface::{require_prompt, session_env, AgentSettings};

/// Interactive `claude` that may edit files in its worktree without asking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaudeCodeAgent {
    settings: AgentSettings,
}

impl ClaudeCodeAgent {
    pub fn new(settings: AgentSettings) -> Self {
        Self { settings }
    }
}

impl Agent for ClaudeCodeAgent {
    fn launch(&self, request: &AgentLaunchRequest) -> OrchestratorResult<LaunchSpec> {
        let prompt = require_prompt(request)?;
        let mut args = vec!["--permission-mode".to_owned(), "acceptEdits".to_owned()];
        if let Some(model) = self.settings.model(request) {
            args.push("--model".to_owned());
            args.push(model.to_owned());
        }
        args.push(prompt.to_owned());

        Ok(LaunchSpec {
            program: self.settings.binary.clone(),
            args,
            env: session_env(request),
        })
    }
}
