use std::fmt;

use globset::{Glob, GlobBuilder, GlobMatcher};
use serde::{Deserialize, Deserializer, Serialize};

const DEFAULT_REACTION_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_REACTION_BASE_DELAY_MS: u64 = 1_000;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ReactionAction {
    Notify,
    SendToAgent,
    AutoMerge,
    Custom(String),
}

impl ReactionAction {
    /// Reaction kind used in the at-most-once key.
    pub fn kind(&self) -> String {
        match self {
            Self::Notify => "notify".to_owned(),
            Self::SendToAgent => "send-to-agent".to_owned(),
            Self::AutoMerge => "auto-merge".to_owned(),
            Self::Custom(name) => format!("custom:{name}"),
        }
    }
}

impl fmt::Display for ReactionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.kind())
    }
}

impl TryFrom<String> for ReactionAction {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "notify" => Ok(Self::Notify),
            "send-to-agent" => Ok(Self::SendToAgent),
            "auto-merge" => Ok(Self::AutoMerge),
            other => match other.strip_prefix("custom:") {
                Some(name) if !name.trim().is_empty() => Ok(Self::Custom(name.trim().to_owned())),
                _ => Err(format!(
                    "unknown reaction action '{value}': expected notify, send-to-agent, auto-merge, or custom:<name>"
                )),
            },
        }
    }
}

impl From<ReactionAction> for String {
    fn from(value: ReactionAction) -> Self {
        value.kind()
    }
}

/// Branch filter compiled once when the config is loaded. `*` also matches
/// across `/`, so `feat/*` covers `feat/a/b`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BranchPattern {
    glob: Glob,
    matcher: GlobMatcher,
}

impl BranchPattern {
    pub fn new(pattern: &str) -> Result<Self, globset::Error> {
        let glob = GlobBuilder::new(pattern.trim())
            .literal_separator(false)
            .build()?;
        Ok(Self {
            matcher: glob.compile_matcher(),
            glob,
        })
    }

    pub fn as_str(&self) -> &str {
        self.glob.glob()
    }

    pub fn is_match(&self, branch: &str) -> bool {
        self.matcher.is_match(branch)
    }
}

impl PartialEq for BranchPattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for BranchPattern {}

impl TryFrom<String> for BranchPattern {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value).map_err(|err| format!("invalid branch_pattern '{value}': {err}"))
    }
}

impl From<BranchPattern> for String {
    fn from(value: BranchPattern) -> Self {
        value.as_str().to_owned()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReactionConfigToml {
    /// Event type (`session.spawned`) or transition target (`transition.ci_failed`).
    pub event: String,
    pub action: ReactionAction,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_branch_pattern")]
    pub branch_pattern: Option<BranchPattern>,
    #[serde(default = "default_reaction_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_reaction_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default)]
    pub message: Option<String>,
}

impl ReactionConfigToml {
    pub fn new(event: impl Into<String>, action: ReactionAction) -> Self {
        Self {
            event: event.into(),
            action,
            labels: Vec::new(),
            branch_pattern: None,
            max_attempts: default_reaction_max_attempts(),
            base_delay_ms: default_reaction_base_delay_ms(),
            message: None,
        }
    }

    /// Whether the branch filter admits `branch`. A rule with a pattern never
    /// fires for a session that has no branch yet.
    pub fn matches_branch(&self, branch: Option<&str>) -> bool {
        match &self.branch_pattern {
            None => true,
            Some(pattern) => branch.is_some_and(|branch| pattern.is_match(branch)),
        }
    }

    pub(crate) fn normalize(&mut self) -> bool {
        let mut changed = false;

        let event = self.event.trim().to_ascii_lowercase();
        if event != self.event {
            self.event = event;
            changed = true;
        }
        changed |= super::normalize_string_vec(&mut self.labels);
        changed |= super::normalize_optional_string(&mut self.message);

        let normalized_max_attempts = self.max_attempts.clamp(1, 20);
        if normalized_max_attempts != self.max_attempts {
            self.max_attempts = normalized_max_attempts;
            changed = true;
        }

        let normalized_base_delay_ms = self.base_delay_ms.clamp(1, 3_600_000);
        if normalized_base_delay_ms != self.base_delay_ms {
            self.base_delay_ms = normalized_base_delay_ms;
            changed = true;
        }

        changed
    }
}

/// Blank patterns read as "no filter".
fn deserialize_branch_pattern<'de, D>(deserializer: D) -> Result<Option<BranchPattern>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(pattern) => BranchPattern::try_from(pattern.to_owned())
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

fn default_reaction_max_attempts() -> u32 {
    DEFAULT_REACTION_MAX_ATTEMPTS
}

fn default_reaction_base_delay_ms() -> u64 {
    DEFAULT_REACTION_BASE_DELAY_MS
}

#[cfg(test)]
mod tests {
    use super::{BranchPattern, ReactionAction, ReactionConfigToml};

    #[test]
    fn actions_parse_from_their_kind_names() {
        for action in [
            ReactionAction::Notify,
            ReactionAction::SendToAgent,
            ReactionAction::AutoMerge,
            ReactionAction::Custom("label-pr".to_owned()),
        ] {
            assert_eq!(ReactionAction::try_from(action.kind()), Ok(action));
        }
    }

    #[test]
    fn unknown_actions_are_rejected() {
        assert!(ReactionAction::try_from("page-oncall".to_owned()).is_err());
        assert!(ReactionAction::try_from("custom:".to_owned()).is_err());
    }

    #[test]
    fn branch_patterns_match_across_path_segments() {
        let pattern = BranchPattern::new(" feat/* ").expect("valid glob");
        assert_eq!(pattern.as_str(), "feat/*");
        assert!(pattern.is_match("feat/issue-42"));
        assert!(pattern.is_match("feat/a/b"));
        assert!(!pattern.is_match("release/1.0"));

        let alternates = BranchPattern::new("{fix,feat}/issue-?").expect("valid glob");
        assert!(alternates.is_match("fix/issue-7"));
        assert!(!alternates.is_match("fix/issue-77"));
    }

    #[test]
    fn rules_without_a_pattern_match_any_branch() {
        let mut rule = ReactionConfigToml::new("transition.ci_failed", ReactionAction::Notify);
        assert!(rule.matches_branch(None));
        assert!(rule.matches_branch(Some("main")));

        rule.branch_pattern = Some(BranchPattern::new("release/*").expect("valid glob"));
        assert!(rule.matches_branch(Some("release/2.1")));
        assert!(!rule.matches_branch(Some("main")));
        assert!(!rule.matches_branch(None));
    }
}
