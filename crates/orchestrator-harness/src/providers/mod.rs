pub mod claude_code;
pub mod codex;
pub mod opencode;
