use orchestrator_protocol::{Agent, AgentLaunchRequest, LaunchSpec, OrchestratorResult};

use crate::interface::{require_prompt, session_env, AgentSettings};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenCodeAgent {
    settings: AgentSettings,
}

impl OpenCodeAgent {
    pub fn new(settings: AgentSettings) -> Self {
        Self { settings }
    }
}

impl Agent for OpenCodeAgent {
    fn launch(&self, request: &AgentLaunchRequest) -> OrchestratorResult<LaunchSpec> {
        let prompt = require_prompt(request)?;
        let mut args = Vec::new();
        if let Some(model) = self.settings.model(request) {
            args.push("--model".to_owned());
            args.push(model.to_owned());
        }
        args.push("--prompt".to_owned());
        args.push(prompt.to_owned());

        Ok(LaunchSpec {
            program: self.settings.binary.clone(),
            args,
            env: session_env(request),
        })
    }
}
