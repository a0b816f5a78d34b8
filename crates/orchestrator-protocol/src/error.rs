use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OrchestratorError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("transient external error: {0}")]
    TransientExternal(String),
    #[error("permanent external error: {0}")]
    PermanentExternal(String),
    #[error("state conflict: {0}")]
    StateConflict(String),
    #[error("resource leak: {0}")]
    ResourceLeak(String),
    #[error("workspace error: {0}")]
    Workspace(String),
    #[error("runtime error: {0}")]
    Runtime(String),
    #[error("session not found: {0}")]
    NotFound(String),
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("cancelled: {0}")]
    Cancelled(String),
}

impl OrchestratorError {
    /// Stable label written into persisted events and ledger entries.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::TransientExternal(_) => "transient_external",
            Self::PermanentExternal(_) => "permanent_external",
            Self::StateConflict(_) => "state_conflict",
            Self::ResourceLeak(_) => "resource_leak",
            Self::Workspace(_) => "workspace",
            Self::Runtime(_) => "runtime",
            Self::NotFound(_) => "not_found",
            Self::Persistence(_) => "persistence",
            Self::Cancelled(_) => "cancelled",
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientExternal(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Maps an HTTP status from a provider API onto the external error split.
    pub fn from_http_status(status: u16, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        if status == 429 || (500..=599).contains(&status) {
            Self::TransientExternal(format!("HTTP {status}: {detail}"))
        } else {
            Self::PermanentExternal(format!("HTTP {status}: {detail}"))
        }
    }

    pub fn detail(&self) -> &str {
        match self {
            Self::Configuration(detail)
            | Self::TransientExternal(detail)
            | Self::PermanentExternal(detail)
            | Self::StateConflict(detail)
            | Self::ResourceLeak(detail)
            | Self::Workspace(detail)
            | Self::Runtime(detail)
            | Self::NotFound(detail)
            | Self::Persistence(detail)
            | Self::Cancelled(detail) => detail.as_str(),
        }
    }
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
