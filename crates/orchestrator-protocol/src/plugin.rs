use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::ids::{IssueId, RuntimeHandle, SessionId};
use crate::issue::{Issue, IssueFilter, IssueUpdate, NewIssue};
use crate::project::ProjectContext;
use crate::scm::{CiStatus, PullRequestRef, PullRequestStatus, ReviewDecision};
use crate::webhook::WebhookSource;

#[async_trait]
pub trait Tracker: Send + Sync {
    async fn get_issue(
        &self,
        project: &ProjectContext,
        issue_id: &IssueId,
    ) -> OrchestratorResult<Issue>;

    async fn is_completed(
        &self,
        project: &ProjectContext,
        issue_id: &IssueId,
    ) -> OrchestratorResult<bool> {
        Ok(self.get_issue(project, issue_id).await?.is_closed())
    }

    async fn generate_prompt(
        &self,
        project: &ProjectContext,
        issue: &Issue,
    ) -> OrchestratorResult<String> {
        Ok(default_issue_prompt(project, issue))
    }

    async fn list_issues(
        &self,
        project: &ProjectContext,
        filter: &IssueFilter,
    ) -> OrchestratorResult<Vec<Issue>>;

    async fn update_issue(
        &self,
        project: &ProjectContext,
        issue_id: &IssueId,
        update: &IssueUpdate,
    ) -> OrchestratorResult<()>;

    async fn create_issue(
        &self,
        project: &ProjectContext,
        issue: &NewIssue,
    ) -> OrchestratorResult<Issue>;

    fn issue_url(&self, project: &ProjectContext, issue_id: &IssueId) -> String;

    fn branch_name(&self, project: &ProjectContext, issue_id: &IssueId) -> String {
        let _ = project;
        format!("feat/issue-{}", sanitize_branch_segment(issue_id.as_str()))
    }

    fn webhook(&self) -> Option<&dyn WebhookSource> {
        None
    }
}

#[async_trait]
pub trait Scm: Send + Sync {
    async fn find_pull_request(
        &self,
        project: &ProjectContext,
        branch: &str,
    ) -> OrchestratorResult<Option<PullRequestRef>>;

    async fn pull_request_status(
        &self,
        project: &ProjectContext,
        pr: &PullRequestRef,
    ) -> OrchestratorResult<PullRequestStatus>;

    async fn ci_status(
        &self,
        project: &ProjectContext,
        pr: &PullRequestRef,
    ) -> OrchestratorResult<CiStatus>;

    async fn review_decision(
        &self,
        project: &ProjectContext,
        pr: &PullRequestRef,
    ) -> OrchestratorResult<ReviewDecision>;

    async fn merge(&self, project: &ProjectContext, pr: &PullRequestRef) -> OrchestratorResult<()>;

    fn webhook(&self) -> Option<&dyn WebhookSource> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeCreateRequest {
    pub session_id: SessionId,
    pub workdir: PathBuf,
    pub launch: LaunchSpec,
}

#[async_trait]
pub trait Runtime: Send + Sync {
    async fn create(&self, request: &RuntimeCreateRequest) -> OrchestratorResult<RuntimeHandle>;
    async fn destroy(&self, handle: &RuntimeHandle) -> OrchestratorResult<()>;
    async fn send_message(&self, handle: &RuntimeHandle, message: &str) -> OrchestratorResult<()>;
    async fn get_output(&self, handle: &RuntimeHandle, lines: usize) -> OrchestratorResult<String>;
    async fn is_alive(&self, handle: &RuntimeHandle) -> OrchestratorResult<bool>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentLaunchRequest {
    pub session_id: SessionId,
    pub workdir: PathBuf,
    pub prompt: String,
    pub model: Option<String>,
}

/// Process invocation an agent adapter derives for a runtime to execute.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl LaunchSpec {
    /// Shell-quoted single command line, for runtimes that type into a terminal.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(shell_quote)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

pub trait Agent: Send + Sync {
    fn launch(&self, request: &AgentLaunchRequest) -> OrchestratorResult<LaunchSpec>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceRequest {
    pub session_id: SessionId,
    pub branch: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceInfo {
    pub path: PathBuf,
    pub branch: String,
}

#[async_trait]
pub trait Workspace: Send + Sync {
    async fn create(
        &self,
        project: &ProjectContext,
        request: &WorkspaceRequest,
    ) -> OrchestratorResult<WorkspaceInfo>;

    async fn destroy(
        &self,
        project: &ProjectContext,
        workspace: &WorkspaceInfo,
    ) -> OrchestratorResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    #[default]
    Info,
    Action,
    Urgent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub session_id: Option<SessionId>,
    pub title: String,
    pub body: String,
    pub priority: NotificationPriority,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> OrchestratorResult<()>;
}

/// Context handed to operator-defined `custom:<name>` reactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomReactionContext {
    pub session_id: SessionId,
    pub project: ProjectContext,
    pub event_type: String,
    pub event_sequence: u64,
    pub payload: serde_json::Value,
}

#[async_trait]
pub trait CustomReaction: Send + Sync {
    async fn run(&self, context: &CustomReactionContext) -> OrchestratorResult<()>;
}

pub fn default_issue_prompt(project: &ProjectContext, issue: &Issue) -> String {
    let mut prompt = format!(
        "You are working on issue {} in {}.\n\nTitle: {}\nURL: {}\n",
        issue.id, project.repository, issue.title, issue.url
    );
    if !issue.labels.is_empty() {
        prompt.push_str(&format!("Labels: {}\n", issue.labels.join(", ")));
    }
    if !issue.description.trim().is_empty() {
        prompt.push('\n');
        prompt.push_str(issue.description.trim());
        prompt.push('\n');
    }
    prompt.push_str(
        "\nImplement the change on the current branch, push it, and open a pull request against the default branch.",
    );
    prompt
}

pub fn sanitize_branch_segment(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').to_owned()
}

fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || "-_./=:@%+,".contains(ch))
    {
        return value.to_owned();
    }
    format!("'{}'", value.replace('\'', "'\\''"))
}

pub fn unsupported(operation: &str) -> OrchestratorError {
    OrchestratorError::PermanentExternal(format!("{operation} is not supported by this plugin"))
}
