//! Shared vocabulary of the session orchestrator: identifiers, session
//! states, normalized tracker/SCM shapes, plugin slot contracts, the error
//! taxonomy, external call policy, and webhook verification.

pub mod call;
pub mod command;
pub mod error;
pub mod event;
pub mod ids;
pub mod issue;
pub mod plugin;
pub mod project;
pub mod scm;
pub mod session;
pub mod slot;
pub mod webhook;

pub use call::{call_with_policy, CallPolicy, RetryPolicy};
pub use command::{CommandRunner, ProcessCommandRunner};
pub use error::{OrchestratorError, OrchestratorResult};
pub use event::LifecycleEvent;
pub use ids::{IssueId, ProjectId, RuntimeHandle, SessionId};
pub use issue::{Issue, IssueFilter, IssueState, IssueUpdate, NewIssue};
pub use plugin::{
    Agent, AgentLaunchRequest, CustomReaction, CustomReactionContext, LaunchSpec, Notification,
    NotificationPriority, Notifier, Runtime, RuntimeCreateRequest, Scm, Tracker, Workspace,
    WorkspaceInfo, WorkspaceRequest,
};
pub use project::ProjectContext;
pub use scm::{CiStatus, PullRequestRef, PullRequestState, PullRequestStatus, ReviewDecision};
pub use session::SessionState;
pub use slot::{PluginKey, PluginSlot};
pub use webhook::{verify_webhook, WebhookEvent, WebhookRequest, WebhookSource};
