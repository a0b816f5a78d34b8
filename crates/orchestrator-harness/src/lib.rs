//! Agent adapters: each derives the command line and environment that a
//! runtime uses to start a coding agent in a session's workspace.

pub mod factory;
pub mod interface;
pub mod providers;

pub use factory::{agent_modules, build_agent, resolve_agent_kind, supported_agent_keys, AgentModule};
pub use interface::{AgentKind, AgentSettings};
pub use providers::claude_code::ClaudeCodeAgent;
pub use providers::codex::CodexAgent;
pub use providers::opencode::OpenCodeAgent;
