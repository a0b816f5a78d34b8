use std::collections::BTreeMap;
use std::path::PathBuf;

use orchestrator_protocol::{
    CiStatus, IssueId, OrchestratorError, OrchestratorResult, ProjectId, PullRequestRef,
    ReviewDecision, RuntimeHandle, SessionId, SessionState,
};

use serde::Serialize;

const RETRY_KEY_PREFIX: &str = "retry.";

/// Durable per-session record, persisted as sorted `key=value` lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionRecord {
    pub id: SessionId,
    pub project: ProjectId,
    pub issue: IssueId,
    pub state: SessionState,
    pub agent: String,
    pub runtime_handle: Option<RuntimeHandle>,
    pub workspace_path: Option<PathBuf>,
    pub workspace_branch: Option<String>,
    pub pr: Option<PullRequestRef>,
    pub pr_head_sha: Option<String>,
    pub ci_status: Option<CiStatus>,
    pub review_status: Option<ReviewDecision>,
    pub labels: Vec<String>,
    /// Failed attempts per reaction kind, across events.
    pub retry_counts: BTreeMap<String, u32>,
    /// Highest event sequence whose effect is reflected in this record.
    pub last_sequence: u64,
    /// Every event at or below this sequence has settled reaction outcomes.
    pub reactions_through: u64,
    pub residual_workspace: Option<PathBuf>,
    pub status_detail: Option<String>,
    pub halted: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl SessionRecord {
    pub fn new(
        id: SessionId,
        project: ProjectId,
        issue: IssueId,
        agent: impl Into<String>,
        now: impl Into<String>,
    ) -> Self {
        let now = now.into();
        Self {
            id,
            project,
            issue,
            state: SessionState::Spawning,
            agent: agent.into(),
            runtime_handle: None,
            workspace_path: None,
            workspace_branch: None,
            pr: None,
            pr_head_sha: None,
            ci_status: None,
            review_status: None,
            labels: Vec::new(),
            retry_counts: BTreeMap::new(),
            last_sequence: 0,
            reactions_through: 0,
            residual_workspace: None,
            status_detail: None,
            halted: false,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn encode(&self) -> String {
        let mut fields = BTreeMap::new();
        fields.insert("id".to_owned(), self.id.as_str().to_owned());
        fields.insert("project".to_owned(), self.project.as_str().to_owned());
        fields.insert("issue".to_owned(), self.issue.as_str().to_owned());
        fields.insert("state".to_owned(), self.state.as_str().to_owned());
        fields.insert("agent".to_owned(), self.agent.clone());
        if let Some(handle) = &self.runtime_handle {
            fields.insert("runtime_handle".to_owned(), handle.as_str().to_owned());
        }
        if let Some(path) = &self.workspace_path {
            fields.insert(
                "workspace_path".to_owned(),
                path.to_string_lossy().to_string(),
            );
        }
        if let Some(branch) = &self.workspace_branch {
            fields.insert("workspace_branch".to_owned(), branch.clone());
        }
        if let Some(pr) = &self.pr {
            fields.insert("pr_number".to_owned(), pr.number.to_string());
            fields.insert("pr_url".to_owned(), pr.url.clone());
            fields.insert("pr_branch".to_owned(), pr.branch.clone());
        }
        if let Some(sha) = &self.pr_head_sha {
            fields.insert("pr_head_sha".to_owned(), sha.clone());
        }
        if let Some(ci) = self.ci_status {
            fields.insert("ci_status".to_owned(), ci.as_str().to_owned());
        }
        if let Some(review) = self.review_status {
            fields.insert("review_status".to_owned(), review.as_str().to_owned());
        }
        if !self.labels.is_empty() {
            fields.insert("labels".to_owned(), self.labels.join(","));
        }
        for (kind, count) in &self.retry_counts {
            fields.insert(format!("{RETRY_KEY_PREFIX}{kind}"), count.to_string());
        }
        fields.insert("last_sequence".to_owned(), self.last_sequence.to_string());
        fields.insert(
            "reactions_through".to_owned(),
            self.reactions_through.to_string(),
        );
        if let Some(path) = &self.residual_workspace {
            fields.insert(
                "residual_workspace".to_owned(),
                path.to_string_lossy().to_string(),
            );
        }
        if let Some(detail) = &self.status_detail {
            fields.insert("status_detail".to_owned(), detail.clone());
        }
        if self.halted {
            fields.insert("halted".to_owned(), "true".to_owned());
        }
        fields.insert("created_at".to_owned(), self.created_at.clone());
        fields.insert("updated_at".to_owned(), self.updated_at.clone());

        let mut out = String::new();
        for (key, value) in fields {
            out.push_str(&key);
            out.push('=');
            out.push_str(&escape_value(&value));
            out.push('\n');
        }
        out
    }

    pub fn decode(raw: &str) -> OrchestratorResult<Self> {
        let mut fields = BTreeMap::new();
        for (index, line) in raw.lines().enumerate() {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                OrchestratorError::Persistence(format!(
                    "session record line {} is not key=value",
                    index + 1
                ))
            })?;
            fields.insert(key.trim().to_owned(), unescape_value(value));
        }

        let required = |key: &str| -> OrchestratorResult<String> {
            fields.get(key).cloned().ok_or_else(|| {
                OrchestratorError::Persistence(format!("session record is missing `{key}`"))
            })
        };
        let optional = |key: &str| fields.get(key).filter(|v| !v.is_empty()).cloned();
        let number = |key: &str| -> OrchestratorResult<u64> {
            match fields.get(key) {
                Some(value) => value.trim().parse::<u64>().map_err(|_| {
                    OrchestratorError::Persistence(format!(
                        "session record `{key}` is not a number: {value}"
                    ))
                }),
                None => Ok(0),
            }
        };

        let state = required("state")?
            .parse::<SessionState>()
            .map_err(OrchestratorError::Persistence)?;
        let pr = match optional("pr_number") {
            Some(raw_number) => Some(PullRequestRef {
                number: raw_number.trim().parse::<u64>().map_err(|_| {
                    OrchestratorError::Persistence(format!(
                        "session record `pr_number` is not a number: {raw_number}"
                    ))
                })?,
                url: optional("pr_url").unwrap_or_default(),
                branch: optional("pr_branch").unwrap_or_default(),
            }),
            None => None,
        };

        let mut retry_counts = BTreeMap::new();
        for (key, value) in &fields {
            if let Some(kind) = key.strip_prefix(RETRY_KEY_PREFIX) {
                let count = value.trim().parse::<u32>().map_err(|_| {
                    OrchestratorError::Persistence(format!(
                        "session record `{key}` is not a number: {value}"
                    ))
                })?;
                retry_counts.insert(kind.to_owned(), count);
            }
        }

        Ok(Self {
            id: SessionId::new(required("id")?),
            project: ProjectId::new(required("project")?),
            issue: IssueId::new(required("issue")?),
            state,
            agent: optional("agent").unwrap_or_default(),
            runtime_handle: optional("runtime_handle").map(RuntimeHandle::new),
            workspace_path: optional("workspace_path").map(PathBuf::from),
            workspace_branch: optional("workspace_branch"),
            pr,
            pr_head_sha: optional("pr_head_sha"),
            ci_status: optional("ci_status").and_then(|value| CiStatus::parse(&value)),
            review_status: optional("review_status")
                .and_then(|value| ReviewDecision::parse(&value)),
            labels: optional("labels")
                .map(|value| {
                    value
                        .split(',')
                        .map(str::trim)
                        .filter(|label| !label.is_empty())
                        .map(ToOwned::to_owned)
                        .collect()
                })
                .unwrap_or_default(),
            retry_counts,
            last_sequence: number("last_sequence")?,
            reactions_through: number("reactions_through")?,
            residual_workspace: optional("residual_workspace").map(PathBuf::from),
            status_detail: optional("status_detail"),
            halted: optional("halted").is_some_and(|value| value == "true"),
            created_at: optional("created_at").unwrap_or_default(),
            updated_at: optional("updated_at").unwrap_or_default(),
        })
    }
}

fn escape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
