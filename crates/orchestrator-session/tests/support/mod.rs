#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use orchestrator_config::{parse_config, ReactionConfigToml};
use orchestrator_eventbus::LifecycleEventBus;
use orchestrator_lifecycle::{LifecycleContext, LifecycleManager};
use orchestrator_protocol::{
    Agent, AgentLaunchRequest, CiStatus, Issue, IssueFilter, IssueId, IssueState, IssueUpdate,
    LaunchSpec, NewIssue, Notification, Notifier, OrchestratorError, OrchestratorResult,
    PluginKey, PluginSlot, ProjectContext, PullRequestRef, PullRequestState, PullRequestStatus,
    ReviewDecision, Runtime, RuntimeCreateRequest, RuntimeHandle, Scm, SessionId, Tracker,
    Workspace, WorkspaceInfo, WorkspaceRequest,
};
use orchestrator_registry::{PluginInstance, PluginRegistry};
use orchestrator_session::SessionManager;
use orchestrator_store::MetadataStore;

pub struct MockTracker;

#[async_trait]
impl Tracker for MockTracker {
    async fn get_issue(&self, _project: &ProjectContext, issue_id: &IssueId) -> OrchestratorResult<Issue> {
        if issue_id.as_str() == "404" {
            return Err(OrchestratorError::PermanentExternal("HTTP 404: no such issue".to_owned()));
        }
        Ok(Issue {
            id: issue_id.clone(),
            title: "Widget crashes on save".to_owned(),
            description: "Steps to reproduce: save a widget.".to_owned(),
            url: format!("https://tracker.test/{issue_id}"),
            state: IssueState::Open,
            labels: vec!["bug".to_owned()],
            assignee: None,
        })
    }

    async fn list_issues(&self, _project: &ProjectContext, _filter: &IssueFilter) -> OrchestratorResult<Vec<Issue>> {
        Ok(Vec::new())
    }

    async fn update_issue(&self, _project: &ProjectContext, _issue_id: &IssueId, _update: &IssueUpdate) -> OrchestratorResult<()> {
        Ok(())
    }

    async fn create_issue(&self, _project: &ProjectContext, _issue: &NewIssue) -> OrchestratorResult<Issue> {
        Err(OrchestratorError::PermanentExternal("read-only tracker".to_owned()))
    }

    fn issue_url(&self, _project: &ProjectContext, issue_id: &IssueId) -> String {
        format!("https://tracker.test/{issue_id}")
    }
}

pub struct ScmState {
    pub pr: Option<PullRequestRef>,
    pub ci: CiStatus,
}

pub struct MockScm {
    pub state: Mutex<ScmState>,
}

impl Default for MockScm {
    fn default() -> Self {
        Self {
            state: Mutex::new(ScmState {
                pr: None,
                ci: CiStatus::Pending,
            }),
        }
    }
}

impl MockScm {
    pub fn open_failing_pr(&self, branch: &str) {
        let mut state = self.state.lock().expect("scm lock");
        state.pr = Some(PullRequestRef {
            number: 7,
            url: "https://scm.test/acme/app/pull/7".to_owned(),
            branch: branch.to_owned(),
        });
        state.ci = CiStatus::Failing;
    }
}

#[async_trait]
impl Scm for MockScm {
    async fn find_pull_request(&self, _project: &ProjectContext, branch: &str) -> OrchestratorResult<Option<PullRequestRef>> {
        let state = self.state.lock().expect("scm lock");
        Ok(state.pr.clone().filter(|pr| pr.branch == branch))
    }

    async fn pull_request_status(&self, _project: &ProjectContext, _pr: &PullRequestRef) -> OrchestratorResult<PullRequestStatus> {
        Ok(PullRequestStatus {
            state: PullRequestState::Open,
            mergeable: None,
            head_sha: Some("aaa111".to_owned()),
        })
    }

    async fn ci_status(&self, _project: &ProjectContext, _pr: &PullRequestRef) -> OrchestratorResult<CiStatus> {
        Ok(self.state.lock().expect("scm lock").ci)
    }

    async fn review_decision(&self, _project: &ProjectContext, _pr: &PullRequestRef) -> OrchestratorResult<ReviewDecision> {
        Ok(ReviewDecision::None)
    }

    async fn merge(&self, _project: &ProjectContext, _pr: &PullRequestRef) -> OrchestratorResult<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct RuntimeState {
    pub created: Vec<RuntimeCreateRequest>,
    pub destroyed: Vec<RuntimeHandle>,
    pub messages: Vec<String>,
    pub send_attempts: u32,
    pub hang_on_send: bool,
    pub fail_create: bool,
    pub fail_destroy: bool,
}

#[derive(Default)]
pub struct MockRuntime {
    pub state: Mutex<RuntimeState>,
}

impl MockRuntime {
    pub fn snapshot<T>(&self, read: impl FnOnce(&RuntimeState) -> T) -> T {
        read(&self.state.lock().expect("runtime lock"))
    }
}

#[async_trait]
impl Runtime for MockRuntime {
    async fn create(&self, request: &RuntimeCreateRequest) -> OrchestratorResult<RuntimeHandle> {
        let mut state = self.state.lock().expect("runtime lock");
        if state.fail_create {
            return Err(OrchestratorError::TransientExternal("tmux server not running".to_owned()));
        }
        state.created.push(request.clone());
        Ok(RuntimeHandle::new(format!("mock-{}", request.session_id)))
    }

    async fn destroy(&self, handle: &RuntimeHandle) -> OrchestratorResult<()> {
        let mut state = self.state.lock().expect("runtime lock");
        if state.fail_destroy {
            return Err(OrchestratorError::PermanentExternal("pane stuck".to_owned()));
        }
        state.destroyed.push(handle.clone());
        Ok(())
    }

    async fn send_message(&self, _handle: &RuntimeHandle, message: &str) -> OrchestratorResult<()> {
        let hang = {
            let mut state = self.state.lock().expect("runtime lock");
            state.send_attempts += 1;
            if !state.hang_on_send {
                state.messages.push(message.to_owned());
            }
            state.hang_on_send
        };
        if hang {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn get_output(&self, handle: &RuntimeHandle, lines: usize) -> OrchestratorResult<String> {
        Ok(format!("{handle}: last {lines} lines"))
    }

    async fn is_alive(&self, _handle: &RuntimeHandle) -> OrchestratorResult<bool> {
        Ok(true)
    }
}

pub struct MockAgent;

impl Agent for MockAgent {
    fn launch(&self, request: &AgentLaunchRequest) -> OrchestratorResult<LaunchSpec> {
        let mut env = BTreeMap::new();
        env.insert("SESSION_ID".to_owned(), request.session_id.to_string());
        Ok(LaunchSpec {
            program: "mock-agent".to_owned(),
            args: vec![request.prompt.clone()],
            env,
        })
    }
}

#[derive(Default)]
pub struct WorkspaceState {
    pub created: Vec<PathBuf>,
    pub destroyed: Vec<PathBuf>,
    pub fail_create: bool,
    pub fail_destroy: bool,
}

#[derive(Default)]
pub struct MockWorkspace {
    pub state: Mutex<WorkspaceState>,
}

#[async_trait]
impl Workspace for MockWorkspace {
    async fn create(&self, project: &ProjectContext, request: &WorkspaceRequest) -> OrchestratorResult<WorkspaceInfo> {
        let mut state = self.state.lock().expect("workspace lock");
        if state.fail_create {
            return Err(OrchestratorError::Workspace("branch already checked out".to_owned()));
        }
        let path = project.path.join("worktrees").join(request.session_id.as_str());
        state.created.push(path.clone());
        Ok(WorkspaceInfo {
            path,
            branch: request.branch.clone(),
        })
    }

    async fn destroy(&self, _project: &ProjectContext, workspace: &WorkspaceInfo) -> OrchestratorResult<()> {
        let mut state = self.state.lock().expect("workspace lock");
        if state.fail_destroy {
            return Err(OrchestratorError::Workspace("worktree is dirty".to_owned()));
        }
        state.destroyed.push(workspace.path.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct MockNotifier {
    pub sent: Mutex<Vec<Notification>>,
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn notify(&self, notification: &Notification) -> OrchestratorResult<()> {
        self.sent.lock().expect("notifier lock").push(notification.clone());
        Ok(())
    }
}

pub struct Harness {
    pub root: PathBuf,
    pub scm: Arc<MockScm>,
    pub runtime: Arc<MockRuntime>,
    pub workspace: Arc<MockWorkspace>,
    pub notifier: Arc<MockNotifier>,
    pub sessions: SessionManager,
    pub lifecycle: LifecycleManager,
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.root);
    }
}

impl Harness {
    pub fn new(label: &str, reactions: Vec<ReactionConfigToml>) -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let root = std::env::temp_dir().join(format!(
            "orchestrator-session-{label}-{}-{nanos}",
            std::process::id()
        ));
        let raw = format!(
            r#"
store_root = "{store}"

[lifecycle]
call_timeout_ms = 2000

[retry]
max_retries = 1
base_delay_ms = 1

[[projects]]
id = "app"
repository = "acme/app"
path = "/src/app"
tracker = "tracker.mock"
scm = "scm.mock"
runtime = "runtime.mock"
agent = "agent.mock"
workspace = "workspace.mock"
notifiers = ["notifier.mock"]

[[projects]]
id = "orphan"
repository = "acme/orphan"
path = "/src/orphan"
tracker = "tracker.jira"
"#,
            store = root.join("store").display(),
        );
        let mut config = parse_config(&raw).expect("parse harness config");
        config.projects[0].reactions = reactions;

        let scm = Arc::new(MockScm::default());
        let runtime = Arc::new(MockRuntime::default());
        let workspace = Arc::new(MockWorkspace::default());
        let notifier = Arc::new(MockNotifier::default());

        let mut registry = PluginRegistry::new();
        let entries: Vec<(PluginSlot, PluginInstance)> = vec![
            (PluginSlot::Tracker, PluginInstance::Tracker(Arc::new(MockTracker))),
            (PluginSlot::Scm, PluginInstance::Scm(scm.clone())),
            (PluginSlot::Runtime, PluginInstance::Runtime(runtime.clone())),
            (PluginSlot::Agent, PluginInstance::Agent(Arc::new(MockAgent))),
            (PluginSlot::Workspace, PluginInstance::Workspace(workspace.clone())),
            (PluginSlot::Notifier, PluginInstance::Notifier(notifier.clone())),
        ];
        for (slot, instance) in entries {
            registry
                .insert(PluginKey::new(slot, "mock"), instance)
                .expect("register mock plugin");
        }
        // The orphan project references a tracker nobody registered; only
        // the valid project is handed to the managers.
        let projects = config
            .projects
            .iter()
            .filter_map(|project| registry.resolve_project(project).ok())
            .map(|resolved| (resolved.context.id.clone(), resolved))
            .collect();

        let store = MetadataStore::open(&config.store_root).expect("open store");
        let ctx = Arc::new(LifecycleContext::new(
            store,
            Arc::new(LifecycleEventBus::default()),
            projects,
            &config,
        ));

        Self {
            root,
            scm,
            runtime,
            workspace,
            notifier,
            sessions: SessionManager::new(Arc::clone(&ctx)),
            lifecycle: LifecycleManager::new(ctx),
        }
    }

    pub fn store(&self) -> &MetadataStore {
        &self.lifecycle.context().store
    }

    pub fn event_types(&self, id: &SessionId) -> Vec<String> {
        self.store()
            .read_events(id)
            .expect("read events")
            .into_iter()
            .map(|event| event.event_type)
            .collect()
    }
}
