use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

mod reaction;

pub use reaction::{BranchPattern, ReactionAction, ReactionConfigToml};

pub const ENV_ORCHESTRATOR_CONFIG: &str = "ORCHESTRATOR_CONFIG";

const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
const DEFAULT_MAX_CONCURRENT_POLLS: usize = 8;
const DEFAULT_CALL_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_HALT_ON_DEAD_LETTER: bool = false;
const DEFAULT_RETRY_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 1_000;
const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 60_000;
const DEFAULT_RETRY_JITTER_FACTOR: f64 = 0.2;
const DEFAULT_WEBHOOK_BIND_ADDRESS: &str = "127.0.0.1:8787";
const DEFAULT_WEBHOOK_SECRET_ENV: &str = "ORCHESTRATOR_WEBHOOK_SECRET";
const DEFAULT_GH_BINARY: &str = "gh";
const DEFAULT_GIT_BINARY: &str = "git";
const DEFAULT_TMUX_BINARY: &str = "tmux";
const DEFAULT_CODEX_BINARY: &str = "codex";
const DEFAULT_CLAUDE_BINARY: &str = "claude";
const DEFAULT_OPENCODE_BINARY: &str = "opencode";
const DEFAULT_WORKTREE_DIR_NAME: &str = "worktrees";
const DEFAULT_PROJECT_BRANCH: &str = "main";
const DEFAULT_TRACKER_PLUGIN: &str = "tracker.github";
const DEFAULT_SCM_PLUGIN: &str = "scm.github";
const DEFAULT_RUNTIME_PLUGIN: &str = "runtime.tmux";
const DEFAULT_AGENT_PLUGIN: &str = "agent.claude-code";
const DEFAULT_WORKSPACE_PLUGIN: &str = "workspace.worktree";
const DEFAULT_NOTIFIER_PLUGIN: &str = "notifier.log";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0}")]
    Message(String),
}

impl ConfigError {
    fn configuration(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrchestratorConfig {
    #[serde(default = "default_store_root")]
    pub store_root: String,
    #[serde(default)]
    pub lifecycle: LifecycleConfigToml,
    #[serde(default)]
    pub retry: RetryConfigToml,
    #[serde(default)]
    pub webhook: WebhookConfigToml,
    #[serde(default)]
    pub github: GithubConfigToml,
    #[serde(default)]
    pub git: GitConfigToml,
    #[serde(default)]
    pub tmux: TmuxConfigToml,
    #[serde(default)]
    pub agents: AgentsConfigToml,
    #[serde(default)]
    pub notify: NotifyConfigToml,
    #[serde(default)]
    pub projects: Vec<ProjectConfigToml>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleRuntimeConfig {
    pub poll_interval_secs: u64,
    pub max_concurrent_polls: usize,
    pub call_timeout_ms: u64,
    pub halt_on_dead_letter: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryRuntimeConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_factor: f64,
}

impl OrchestratorConfig {
    pub fn lifecycle_runtime(&self) -> LifecycleRuntimeConfig {
        LifecycleRuntimeConfig {
            poll_interval_secs: self.lifecycle.poll_interval_secs,
            max_concurrent_polls: self.lifecycle.max_concurrent_polls,
            call_timeout_ms: self.lifecycle.call_timeout_ms,
            halt_on_dead_letter: self.lifecycle.halt_on_dead_letter,
        }
    }

    pub fn retry_runtime(&self) -> RetryRuntimeConfig {
        RetryRuntimeConfig {
            max_retries: self.retry.max_retries,
            base_delay_ms: self.retry.base_delay_ms,
            max_delay_ms: self.retry.max_delay_ms,
            jitter_factor: self.retry.jitter_factor,
        }
    }

    pub fn project(&self, project_id: &str) -> Option<&ProjectConfigToml> {
        self.projects
            .iter()
            .find(|project| project.id == project_id)
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            store_root: default_store_root(),
            lifecycle: LifecycleConfigToml::default(),
            retry: RetryConfigToml::default(),
            webhook: WebhookConfigToml::default(),
            github: GithubConfigToml::default(),
            git: GitConfigToml::default(),
            tmux: TmuxConfigToml::default(),
            agents: AgentsConfigToml::default(),
            notify: NotifyConfigToml::default(),
            projects: Vec::new(),
        }
    }
}

pub fn load_from_env() -> Result<OrchestratorConfig, ConfigError> {
    let path = config_path_from_env()?;
    load_from_path(path)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<OrchestratorConfig, ConfigError> {
    load_or_create_config(path.as_ref())
}

/// Parses and normalizes a config document without touching the filesystem.
pub fn parse_config(raw: &str) -> Result<OrchestratorConfig, ConfigError> {
    let mut config: OrchestratorConfig = toml::from_str(raw).map_err(|err| {
        ConfigError::configuration(format!("Failed to parse ORCHESTRATOR_CONFIG: {err}"))
    })?;
    normalize_config(&mut config)?;
    Ok(config)
}

pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    let home = resolve_home_dir().ok_or_else(|| {
        ConfigError::configuration("Unable to resolve home directory from HOME or USERPROFILE")
    })?;

    Ok(home
        .join(".config")
        .join("orchestrator")
        .join("config.toml"))
}

fn config_path_from_env() -> Result<PathBuf, ConfigError> {
    match std::env::var(ENV_ORCHESTRATOR_CONFIG) {
        Ok(raw) => {
            if raw.trim().is_empty() {
                default_config_path()
            } else {
                Ok(raw.into())
            }
        }
        Err(std::env::VarError::NotPresent) => default_config_path(),
        Err(_) => Err(ConfigError::configuration(
            "ORCHESTRATOR_CONFIG contained invalid UTF-8",
        )),
    }
}

fn default_orchestrator_data_dir() -> PathBuf {
    resolve_data_local_dir().join("orchestrator")
}

fn resolve_data_local_dir() -> PathBuf {
    if let Ok(path) = std::env::var("XDG_DATA_HOME") {
        let path = path.trim();
        if !path.is_empty() {
            return absolutize_path(PathBuf::from(path));
        }
    }

    #[cfg(target_os = "macos")]
    {
        if let Some(home) = resolve_home_dir() {
            return home.join("Library").join("Application Support");
        }
    }

    if let Some(home) = resolve_home_dir() {
        return home.join(".local").join("share");
    }

    std::env::temp_dir()
}

fn resolve_home_dir() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var("USERPROFILE")
                .ok()
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
                .map(PathBuf::from)
        })
}

fn absolutize_path(path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        return path;
    }

    if let Ok(current) = std::env::current_dir() {
        return current.join(path);
    }

    std::env::temp_dir().join(path)
}

fn default_store_root() -> String {
    default_orchestrator_data_dir()
        .join("store")
        .to_string_lossy()
        .to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LifecycleConfigToml {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_max_concurrent_polls")]
    pub max_concurrent_polls: usize,
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    /// When set, a dead-lettered reaction freezes further transitions for
    /// its session until an operator intervenes.
    #[serde(default = "default_halt_on_dead_letter")]
    pub halt_on_dead_letter: bool,
}

impl Default for LifecycleConfigToml {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            max_concurrent_polls: default_max_concurrent_polls(),
            call_timeout_ms: default_call_timeout_ms(),
            halt_on_dead_letter: default_halt_on_dead_letter(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfigToml {
    #[serde(default = "default_retry_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_retry_jitter_factor")]
    pub jitter_factor: f64,
}

impl Default for RetryConfigToml {
    fn default() -> Self {
        Self {
            max_retries: default_retry_max_retries(),
            base_delay_ms: default_retry_base_delay_ms(),
            max_delay_ms: default_retry_max_delay_ms(),
            jitter_factor: default_retry_jitter_factor(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WebhookConfigToml {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_webhook_bind_address")]
    pub bind_address: String,
    /// Name of the environment variable holding the shared secret.
    #[serde(default = "default_webhook_secret_env")]
    pub secret_env: String,
}

impl Default for WebhookConfigToml {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: default_webhook_bind_address(),
            secret_env: default_webhook_secret_env(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GithubConfigToml {
    #[serde(default = "default_gh_binary")]
    pub binary: String,
}

impl Default for GithubConfigToml {
    fn default() -> Self {
        Self {
            binary: default_gh_binary(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GitConfigToml {
    #[serde(default = "default_git_binary")]
    pub binary: String,
    /// Directory name under the store root that holds session worktrees.
    #[serde(default = "default_worktree_dir_name")]
    pub worktree_dir_name: String,
}

impl Default for GitConfigToml {
    fn default() -> Self {
        Self {
            binary: default_git_binary(),
            worktree_dir_name: default_worktree_dir_name(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TmuxConfigToml {
    #[serde(default = "default_tmux_binary")]
    pub binary: String,
}

impl Default for TmuxConfigToml {
    fn default() -> Self {
        Self {
            binary: default_tmux_binary(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentsConfigToml {
    #[serde(default = "default_codex_binary")]
    pub codex_binary: String,
    #[serde(default = "default_claude_binary")]
    pub claude_binary: String,
    #[serde(default = "default_opencode_binary")]
    pub opencode_binary: String,
    #[serde(default)]
    pub model: Option<String>,
}

impl Default for AgentsConfigToml {
    fn default() -> Self {
        Self {
            codex_binary: default_codex_binary(),
            claude_binary: default_claude_binary(),
            opencode_binary: default_opencode_binary(),
            model: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct NotifyConfigToml {
    #[serde(default)]
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectConfigToml {
    pub id: String,
    pub repository: String,
    pub path: String,
    #[serde(default = "default_project_branch")]
    pub default_branch: String,
    #[serde(default)]
    pub session_prefix: String,
    #[serde(default = "default_tracker_plugin")]
    pub tracker: String,
    #[serde(default = "default_scm_plugin")]
    pub scm: String,
    #[serde(default = "default_runtime_plugin")]
    pub runtime: String,
    #[serde(default = "default_agent_plugin")]
    pub agent: String,
    #[serde(default = "default_workspace_plugin")]
    pub workspace: String,
    #[serde(default = "default_notifier_plugins")]
    pub notifiers: Vec<String>,
    #[serde(default)]
    pub allow_auto_merge: bool,
    #[serde(default)]
    pub reactions: Vec<ReactionConfigToml>,
}

impl ProjectConfigToml {
    /// Every `<slot>.<name>` key this project needs resolved before spawning.
    pub fn required_plugin_keys(&self) -> Vec<&str> {
        let mut keys = vec![
            self.tracker.as_str(),
            self.scm.as_str(),
            self.runtime.as_str(),
            self.agent.as_str(),
            self.workspace.as_str(),
        ];
        keys.extend(self.notifiers.iter().map(String::as_str));
        keys
    }
}

fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_max_concurrent_polls() -> usize {
    DEFAULT_MAX_CONCURRENT_POLLS
}

fn default_call_timeout_ms() -> u64 {
    DEFAULT_CALL_TIMEOUT_MS
}

fn default_halt_on_dead_letter() -> bool {
    DEFAULT_HALT_ON_DEAD_LETTER
}

fn default_retry_max_retries() -> u32 {
    DEFAULT_RETRY_MAX_RETRIES
}

fn default_retry_base_delay_ms() -> u64 {
    DEFAULT_RETRY_BASE_DELAY_MS
}

fn default_retry_max_delay_ms() -> u64 {
    DEFAULT_RETRY_MAX_DELAY_MS
}

fn default_retry_jitter_factor() -> f64 {
    DEFAULT_RETRY_JITTER_FACTOR
}

fn default_webhook_bind_address() -> String {
    DEFAULT_WEBHOOK_BIND_ADDRESS.to_owned()
}

fn default_webhook_secret_env() -> String {
    DEFAULT_WEBHOOK_SECRET_ENV.to_owned()
}

fn default_gh_binary() -> String {
    DEFAULT_GH_BINARY.to_owned()
}

fn default_git_binary() -> String {
    DEFAULT_GIT_BINARY.to_owned()
}

fn default_worktree_dir_name() -> String {
    DEFAULT_WORKTREE_DIR_NAME.to_owned()
}

fn default_tmux_binary() -> String {
    DEFAULT_TMUX_BINARY.to_owned()
}

fn default_codex_binary() -> String {
    DEFAULT_CODEX_BINARY.to_owned()
}

fn default_claude_binary() -> String {
    DEFAULT_CLAUDE_BINARY.to_owned()
}

fn default_opencode_binary() -> String {
    DEFAULT_OPENCODE_BINARY.to_owned()
}

fn default_project_branch() -> String {
    DEFAULT_PROJECT_BRANCH.to_owned()
}

fn default_tracker_plugin() -> String {
    DEFAULT_TRACKER_PLUGIN.to_owned()
}

fn default_scm_plugin() -> String {
    DEFAULT_SCM_PLUGIN.to_owned()
}

fn default_runtime_plugin() -> String {
    DEFAULT_RUNTIME_PLUGIN.to_owned()
}

fn default_agent_plugin() -> String {
    DEFAULT_AGENT_PLUGIN.to_owned()
}

fn default_workspace_plugin() -> String {
    DEFAULT_WORKSPACE_PLUGIN.to_owned()
}

fn default_notifier_plugins() -> Vec<String> {
    vec![DEFAULT_NOTIFIER_PLUGIN.to_owned()]
}

fn persist_config(path: &Path, config: &OrchestratorConfig) -> Result<(), ConfigError> {
    let rendered = toml::to_string_pretty(config).map_err(|err| {
        ConfigError::configuration(format!(
            "Failed to serialize ORCHESTRATOR_CONFIG for {}: {err}",
            path.display()
        ))
    })?;

    std::fs::write(path, rendered.as_bytes()).map_err(|err| {
        ConfigError::configuration(format!(
            "Failed to write ORCHESTRATOR_CONFIG to {}: {err}",
            path.display()
        ))
    })
}

fn load_or_create_config(path: &Path) -> Result<OrchestratorConfig, ConfigError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|err| {
                        ConfigError::configuration(format!(
                            "Failed to create parent directory {} for ORCHESTRATOR_CONFIG: {err}",
                            parent.display()
                        ))
                    })?;
                }
            }

            let default_config = OrchestratorConfig::default();
            persist_config(path, &default_config)?;
            return Ok(default_config);
        }
        Err(err) => {
            return Err(ConfigError::configuration(format!(
                "Failed to read ORCHESTRATOR_CONFIG from {}: {err}",
                path.display()
            )));
        }
    };

    let mut config: OrchestratorConfig = toml::from_str(&raw).map_err(|err| {
        ConfigError::configuration(format!(
            "Failed to parse ORCHESTRATOR_CONFIG from {}: {err}",
            path.display()
        ))
    })?;

    let changed = normalize_config(&mut config)?;
    if changed {
        persist_config(path, &config)?;
    }

    Ok(config)
}

fn normalize_config(config: &mut OrchestratorConfig) -> Result<bool, ConfigError> {
    let mut changed = false;

    changed |= normalize_non_empty_string(&mut config.store_root, default_store_root());
    changed |= normalize_lifecycle_config(&mut config.lifecycle);
    changed |= normalize_retry_config(&mut config.retry);
    changed |= normalize_non_empty_string(
        &mut config.webhook.bind_address,
        default_webhook_bind_address(),
    );
    changed |=
        normalize_non_empty_string(&mut config.webhook.secret_env, default_webhook_secret_env());
    changed |= normalize_non_empty_string(&mut config.github.binary, default_gh_binary());
    changed |= normalize_non_empty_string(&mut config.git.binary, default_git_binary());
    changed |= normalize_non_empty_string(
        &mut config.git.worktree_dir_name,
        default_worktree_dir_name(),
    );
    changed |= normalize_non_empty_string(&mut config.tmux.binary, default_tmux_binary());
    changed |=
        normalize_non_empty_string(&mut config.agents.codex_binary, default_codex_binary());
    changed |=
        normalize_non_empty_string(&mut config.agents.claude_binary, default_claude_binary());
    changed |= normalize_non_empty_string(
        &mut config.agents.opencode_binary,
        default_opencode_binary(),
    );
    changed |= normalize_optional_string(&mut config.agents.model);
    changed |= normalize_optional_string(&mut config.notify.webhook_url);

    let mut seen_ids = HashSet::new();
    for project in &mut config.projects {
        changed |= normalize_project_config(project)?;
        if !seen_ids.insert(project.id.clone()) {
            return Err(ConfigError::configuration(format!(
                "Duplicate project id '{}' in ORCHESTRATOR_CONFIG.",
                project.id
            )));
        }
    }

    Ok(changed)
}

pub fn normalize_lifecycle_config(config: &mut LifecycleConfigToml) -> bool {
    let mut changed = false;

    let normalized_poll_interval_secs = config.poll_interval_secs.clamp(1, 3_600);
    if normalized_poll_interval_secs != config.poll_interval_secs {
        config.poll_interval_secs = normalized_poll_interval_secs;
        changed = true;
    }

    let normalized_max_concurrent_polls = config.max_concurrent_polls.clamp(1, 256);
    if normalized_max_concurrent_polls != config.max_concurrent_polls {
        config.max_concurrent_polls = normalized_max_concurrent_polls;
        changed = true;
    }

    let normalized_call_timeout_ms = config.call_timeout_ms.clamp(100, 600_000);
    if normalized_call_timeout_ms != config.call_timeout_ms {
        config.call_timeout_ms = normalized_call_timeout_ms;
        changed = true;
    }

    changed
}

pub fn normalize_retry_config(config: &mut RetryConfigToml) -> bool {
    let mut changed = false;

    let normalized_max_retries = config.max_retries.clamp(1, 10);
    if normalized_max_retries != config.max_retries {
        config.max_retries = normalized_max_retries;
        changed = true;
    }

    let normalized_base_delay_ms = config.base_delay_ms.clamp(1, 600_000);
    if normalized_base_delay_ms != config.base_delay_ms {
        config.base_delay_ms = normalized_base_delay_ms;
        changed = true;
    }

    let normalized_max_delay_ms = config.max_delay_ms.max(config.base_delay_ms);
    if normalized_max_delay_ms != config.max_delay_ms {
        config.max_delay_ms = normalized_max_delay_ms;
        changed = true;
    }

    let normalized_jitter_factor = if config.jitter_factor.is_finite() {
        config.jitter_factor.clamp(0.0, 1.0)
    } else {
        default_retry_jitter_factor()
    };
    if normalized_jitter_factor != config.jitter_factor {
        config.jitter_factor = normalized_jitter_factor;
        changed = true;
    }

    changed
}

fn normalize_project_config(project: &mut ProjectConfigToml) -> Result<bool, ConfigError> {
    let mut changed = false;

    changed |= normalize_non_empty_string(&mut project.id, String::new());
    if project.id.is_empty() {
        return Err(ConfigError::configuration(
            "Every [[projects]] entry in ORCHESTRATOR_CONFIG needs a non-empty `id`.",
        ));
    }
    changed |= normalize_non_empty_string(&mut project.repository, String::new());
    changed |= normalize_non_empty_string(&mut project.path, String::new());
    if project.path.is_empty() {
        return Err(ConfigError::configuration(format!(
            "Project '{}' in ORCHESTRATOR_CONFIG needs a non-empty `path`.",
            project.id
        )));
    }
    changed |= normalize_non_empty_string(&mut project.default_branch, default_project_branch());
    changed |= normalize_non_empty_string(&mut project.session_prefix, project.id.clone());

    changed |= normalize_plugin_selection(
        &mut project.tracker,
        DEFAULT_TRACKER_PLUGIN,
        "tracker",
        "tracker",
    )?;
    changed |=
        normalize_plugin_selection(&mut project.scm, DEFAULT_SCM_PLUGIN, "scm", "scm")?;
    changed |= normalize_plugin_selection(
        &mut project.runtime,
        DEFAULT_RUNTIME_PLUGIN,
        "runtime",
        "runtime",
    )?;
    changed |=
        normalize_plugin_selection(&mut project.agent, DEFAULT_AGENT_PLUGIN, "agent", "agent")?;
    changed |= normalize_plugin_selection(
        &mut project.workspace,
        DEFAULT_WORKSPACE_PLUGIN,
        "workspace",
        "workspace",
    )?;
    for notifier in &mut project.notifiers {
        changed |= normalize_plugin_selection(
            notifier,
            DEFAULT_NOTIFIER_PLUGIN,
            "notifiers",
            "notifier",
        )?;
    }
    if project.notifiers.is_empty() {
        project.notifiers = default_notifier_plugins();
        changed = true;
    }

    for reaction in &mut project.reactions {
        changed |= reaction.normalize();
        if reaction.action == ReactionAction::AutoMerge && !project.allow_auto_merge {
            return Err(ConfigError::configuration(format!(
                "Project '{}' configures an `auto-merge` reaction for '{}' but `allow_auto_merge` is false.",
                project.id, reaction.event
            )));
        }
    }

    Ok(changed)
}

fn normalize_plugin_selection(
    value: &mut String,
    default: &str,
    field_name: &str,
    slot: &str,
) -> Result<bool, ConfigError> {
    let normalized = value.trim().to_ascii_lowercase();
    let canonical = if normalized.is_empty() {
        default.to_owned()
    } else {
        normalized
    };
    let expected_prefix = format!("{slot}.");

    if !canonical.starts_with(expected_prefix.as_str()) {
        return Err(ConfigError::configuration(format!(
            "Invalid `{field_name}` value '{canonical}' in ORCHESTRATOR_CONFIG: plugin keys must be namespaced under `{expected_prefix}*` (for example `{default}`)."
        )));
    }
    let suffix = canonical[expected_prefix.len()..].trim();
    if suffix.is_empty()
        || !suffix
            .chars()
            .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '_' || ch == '-')
    {
        return Err(ConfigError::configuration(format!(
            "Invalid `{field_name}` value '{canonical}' in ORCHESTRATOR_CONFIG: expected format `{slot}.<name>` where the name contains only lowercase letters, digits, `_`, or `-`."
        )));
    }

    if *value != canonical {
        *value = canonical;
        return Ok(true);
    }

    Ok(false)
}

fn normalize_non_empty_string(value: &mut String, default: String) -> bool {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        if *value != default {
            *value = default;
            return true;
        }
        return false;
    }

    if trimmed != value {
        *value = trimmed.to_owned();
        return true;
    }
    false
}

fn normalize_optional_string(value: &mut Option<String>) -> bool {
    let Some(current) = value.as_ref() else {
        return false;
    };
    let trimmed = current.trim();
    if trimmed.is_empty() {
        *value = None;
        return true;
    }
    if trimmed != current {
        *value = Some(trimmed.to_owned());
        return true;
    }
    false
}

fn normalize_string_vec(values: &mut Vec<String>) -> bool {
    let normalized = values
        .iter()
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .collect::<Vec<_>>();
    if *values != normalized {
        *values = normalized;
        return true;
    }
    false
}
