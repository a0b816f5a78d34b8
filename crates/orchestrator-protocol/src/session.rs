use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Spawning,
    Working,
    PrOpen,
    CiFailed,
    ReviewPending,
    ChangesRequested,
    Approved,
    Mergeable,
    Merged,
    Terminated,
    Abandoned,
    Failed,
}

pub const ALL_SESSION_STATES: [SessionState; 12] = [
    SessionState::Spawning,
    SessionState::Working,
    SessionState::PrOpen,
    SessionState::CiFailed,
    SessionState::ReviewPending,
    SessionState::ChangesRequested,
    SessionState::Approved,
    SessionState::Mergeable,
    SessionState::Merged,
    SessionState::Terminated,
    SessionState::Abandoned,
    SessionState::Failed,
];

impl SessionState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Spawning => "spawning",
            Self::Working => "working",
            Self::PrOpen => "pr_open",
            Self::CiFailed => "ci_failed",
            Self::ReviewPending => "review_pending",
            Self::ChangesRequested => "changes_requested",
            Self::Approved => "approved",
            Self::Mergeable => "mergeable",
            Self::Merged => "merged",
            Self::Terminated => "terminated",
            Self::Abandoned => "abandoned",
            Self::Failed => "failed",
        }
    }

    /// States from which no poll-driven transition leaves.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Terminated | Self::Abandoned | Self::Failed)
    }

    /// States in which the session tracks an open pull request.
    pub const fn is_pull_request_phase(self) -> bool {
        matches!(
            self,
            Self::PrOpen
                | Self::CiFailed
                | Self::ReviewPending
                | Self::ChangesRequested
                | Self::Approved
                | Self::Mergeable
        )
    }

    /// States whose record is torn down and archived once reactions settle.
    pub const fn requires_teardown(self) -> bool {
        matches!(self, Self::Merged | Self::Abandoned | Self::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionState {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        ALL_SESSION_STATES
            .iter()
            .copied()
            .find(|state| state.as_str() == value.trim())
            .ok_or_else(|| format!("unknown session state: {value}"))
    }
}
