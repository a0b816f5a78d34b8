#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use orchestrator_config::{parse_config, OrchestratorConfig, ReactionConfigToml};
use orchestrator_eventbus::LifecycleEventBus;
use orchestrator_lifecycle::{LifecycleContext, LifecycleManager};
use orchestrator_protocol::event::EVENT_SESSION_SPAWNED;
use orchestrator_protocol::{
    Agent, AgentLaunchRequest, CiStatus, Issue, IssueFilter, IssueId, IssueState, IssueUpdate,
    LaunchSpec, NewIssue, Notification, Notifier, OrchestratorError, OrchestratorResult,
    PluginKey, PluginSlot, ProjectContext, ProjectId, PullRequestRef, PullRequestState,
    PullRequestStatus, ReviewDecision, Runtime, RuntimeCreateRequest, RuntimeHandle, Scm,
    SessionId, SessionState, Tracker, WebhookEvent, WebhookRequest, WebhookSource, Workspace,
    WorkspaceInfo, WorkspaceRequest,
};
use orchestrator_registry::{PluginInstance, PluginRegistry};
use orchestrator_store::{now_timestamp, MetadataStore, SessionRecord};
use serde_json::json;

pub const WEBHOOK_SECRET: &str = "hook-secret";

#[derive(Default)]
pub struct MockTracker {
    pub closed: Mutex<bool>,
}

#[async_trait]
impl Tracker for MockTracker {
    async fn get_issue(&self, _project: &ProjectContext, issue_id: &IssueId) -> OrchestratorResult<Issue> {
        let closed = *self.closed.lock().expect("tracker lock");
        Ok(Issue {
            id: issue_id.clone(),
            title: format!("Issue {issue_id}"),
            description: "Fix the widget".to_owned(),
            url: format!("https://tracker.test/{issue_id}"),
            state: if closed { IssueState::Closed } else { IssueState::Open },
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

/// Shared-token webhook: the header must carry the secret itself.
pub struct MockWebhook;

impl WebhookSource for MockWebhook {
    fn signature_header(&self) -> &str {
        "x-mock-token"
    }

    fn normalize(&self, request: &WebhookRequest) -> OrchestratorResult<WebhookEvent> {
        let value: serde_json::Value = serde_json::from_slice(&request.body)
            .map_err(|err| OrchestratorError::PermanentExternal(format!("bad payload: {err}")))?;
        match value.get("pr").and_then(serde_json::Value::as_u64) {
            Some(number) => Ok(WebhookEvent::MergeRequest {
                number,
                branch: value.get("branch").and_then(|b| b.as_str()).map(str::to_owned),
                action: "synchronize".to_owned(),
            }),
            None => Ok(WebhookEvent::Unknown {
                event: "ping".to_owned(),
            }),
        }
    }
}

pub struct ScmState {
    pub pr: Option<PullRequestRef>,
    pub state: PullRequestState,
    pub mergeable: Option<bool>,
    pub head_sha: String,
    pub ci: CiStatus,
    pub review: ReviewDecision,
    pub failure: Option<OrchestratorError>,
    pub merges: Vec<u64>,
    pub status_calls: u32,
}

pub struct MockScm {
    pub state: Mutex<ScmState>,
    webhook: MockWebhook,
}

impl Default for MockScm {
    fn default() -> Self {
        Self {
            state: Mutex::new(ScmState {
                pr: None,
                state: PullRequestState::Open,
                mergeable: None,
                head_sha: "aaa111".to_owned(),
                ci: CiStatus::Pending,
                review: ReviewDecision::None,
                failure: None,
                merges: Vec::new(),
                status_calls: 0,
            }),
            webhook: MockWebhook,
        }
    }
}

impl MockScm {
    pub fn open_pr(&self, number: u64, ci: CiStatus, review: ReviewDecision, mergeable: Option<bool>) {
        let mut state = self.state.lock().expect("scm lock");
        state.pr = Some(pull_request(number));
        state.state = PullRequestState::Open;
        state.ci = ci;
        state.review = review;
        state.mergeable = mergeable;
    }

    pub fn set_state(&self, pr_state: PullRequestState) {
        self.state.lock().expect("scm lock").state = pr_state;
    }

    pub fn fail_with(&self, error: Option<OrchestratorError>) {
        self.state.lock().expect("scm lock").failure = error;
    }

    pub fn merges(&self) -> Vec<u64> {
        self.state.lock().expect("scm lock").merges.clone()
    }

    fn check(&self) -> OrchestratorResult<()> {
        match self.state.lock().expect("scm lock").failure.clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

pub fn pull_request(number: u64) -> PullRequestRef {
    PullRequestRef {
        number,
        url: format!("https://scm.test/acme/app/pull/{number}"),
        branch: "feat/issue-42".to_owned(),
    }
}

#[async_trait]
impl Scm for MockScm {
    async fn find_pull_request(&self, _project: &ProjectContext, branch: &str) -> OrchestratorResult<Option<PullRequestRef>> {
        self.check()?;
        let state = self.state.lock().expect("scm lock");
        Ok(state.pr.clone().filter(|pr| pr.branch == branch))
    }

    async fn pull_request_status(&self, _project: &ProjectContext, _pr: &PullRequestRef) -> OrchestratorResult<PullRequestStatus> {
        self.check()?;
        let mut state = self.state.lock().expect("scm lock");
        state.status_calls += 1;
        Ok(PullRequestStatus {
            state: state.state,
            mergeable: state.mergeable,
            head_sha: Some(state.head_sha.clone()),
        })
    }

    async fn ci_status(&self, _project: &ProjectContext, _pr: &PullRequestRef) -> OrchestratorResult<CiStatus> {
        self.check()?;
        Ok(self.state.lock().expect("scm lock").ci)
    }

    async fn review_decision(&self, _project: &ProjectContext, _pr: &PullRequestRef) -> OrchestratorResult<ReviewDecision> {
        self.check()?;
        Ok(self.state.lock().expect("scm lock").review)
    }

    async fn merge(&self, _project: &ProjectContext, pr: &PullRequestRef) -> OrchestratorResult<()> {
        self.state.lock().expect("scm lock").merges.push(pr.number);
        Ok(())
    }

    fn webhook(&self) -> Option<&dyn WebhookSource> {
        Some(&self.webhook)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SendBehavior {
    #[default]
    Succeed,
    /// Fail transiently this many times, then succeed.
    FailTransient(u32),
    FailPermanent,
    /// Never completes; only cancellation ends the call.
    Hang,
}

#[derive(Default)]
pub struct RuntimeState {
    pub alive: bool,
    pub created: Vec<SessionId>,
    pub destroyed: Vec<RuntimeHandle>,
    pub messages: Vec<(RuntimeHandle, String)>,
    pub send_attempts: u32,
    pub send_behavior: SendBehavior,
    pub fail_create: bool,
    pub fail_destroy: bool,
}

pub struct MockRuntime {
    pub state: Mutex<RuntimeState>,
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self {
            state: Mutex::new(RuntimeState {
                alive: true,
                ..RuntimeState::default()
            }),
        }
    }
}

impl MockRuntime {
    pub fn messages(&self) -> Vec<String> {
        self.state
            .lock()
            .expect("runtime lock")
            .messages
            .iter()
            .map(|(_, message)| message.clone())
            .collect()
    }

    pub fn set_send_behavior(&self, behavior: SendBehavior) {
        self.state.lock().expect("runtime lock").send_behavior = behavior;
    }

    pub fn send_attempts(&self) -> u32 {
        self.state.lock().expect("runtime lock").send_attempts
    }
}

#[async_trait]
impl Runtime for MockRuntime {
    async fn create(&self, request: &RuntimeCreateRequest) -> OrchestratorResult<RuntimeHandle> {
        let mut state = self.state.lock().expect("runtime lock");
        if state.fail_create {
            return Err(OrchestratorError::Runtime("runtime refused to start".to_owned()));
        }
        state.created.push(request.session_id.clone());
        Ok(RuntimeHandle::new(format!("mock-{}", request.session_id)))
    }

    async fn destroy(&self, handle: &RuntimeHandle) -> OrchestratorResult<()> {
        let mut state = self.state.lock().expect("runtime lock");
        if state.fail_destroy {
            return Err(OrchestratorError::PermanentExternal("runtime stuck".to_owned()));
        }
        state.destroyed.push(handle.clone());
        Ok(())
    }

    async fn send_message(&self, handle: &RuntimeHandle, message: &str) -> OrchestratorResult<()> {
        let behavior = {
            let mut state = self.state.lock().expect("runtime lock");
            state.send_attempts += 1;
            let behavior = state.send_behavior;
            match behavior {
                SendBehavior::Succeed => {
                    state.messages.push((handle.clone(), message.to_owned()));
                }
                SendBehavior::FailTransient(remaining) if remaining == 0 => {
                    state.messages.push((handle.clone(), message.to_owned()));
                }
                SendBehavior::FailTransient(remaining) => {
                    state.send_behavior = SendBehavior::FailTransient(remaining - 1);
                }
                SendBehavior::FailPermanent | SendBehavior::Hang => {}
            }
            behavior
        };
        match behavior {
            SendBehavior::Succeed | SendBehavior::FailTransient(0) => Ok(()),
            SendBehavior::FailTransient(_) => Err(OrchestratorError::TransientExternal(
                "HTTP 503: runtime busy".to_owned(),
            )),
            SendBehavior::FailPermanent => Err(OrchestratorError::PermanentExternal(
                "HTTP 404: pane gone".to_owned(),
            )),
            SendBehavior::Hang => std::future::pending().await,
        }
    }

    async fn get_output(&self, _handle: &RuntimeHandle, lines: usize) -> OrchestratorResult<String> {
        Ok(format!("last {lines} lines"))
    }

    async fn is_alive(&self, _handle: &RuntimeHandle) -> OrchestratorResult<bool> {
        Ok(self.state.lock().expect("runtime lock").alive)
    }
}

pub struct MockAgent;

impl Agent for MockAgent {
    fn launch(&self, request: &AgentLaunchRequest) -> OrchestratorResult<LaunchSpec> {
        Ok(LaunchSpec {
            program: "mock-agent".to_owned(),
            args: vec![request.prompt.clone()],
            env: BTreeMap::new(),
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
            return Err(OrchestratorError::Workspace("worktree add failed".to_owned()));
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
            return Err(OrchestratorError::Workspace("worktree remove failed".to_owned()));
        }
        state.destroyed.push(workspace.path.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct MockNotifier {
    pub sent: Mutex<Vec<Notification>>,
}

impl MockNotifier {
    pub fn titles(&self) -> Vec<String> {
        self.sent
            .lock()
            .expect("notifier lock")
            .iter()
            .map(|notification| notification.title.clone())
            .collect()
    }
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
    pub config: OrchestratorConfig,
    pub tracker: Arc<MockTracker>,
    pub scm: Arc<MockScm>,
    pub runtime: Arc<MockRuntime>,
    pub workspace: Arc<MockWorkspace>,
    pub notifier: Arc<MockNotifier>,
    pub manager: LifecycleManager,
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.root);
    }
}

pub fn unique_temp_dir(label: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    std::env::temp_dir().join(format!(
        "orchestrator-lifecycle-{label}-{}-{nanos}",
        std::process::id()
    ))
}

#[derive(Default)]
pub struct HarnessOptions {
    pub reactions: Vec<ReactionConfigToml>,
    pub allow_auto_merge: bool,
    pub halt_on_dead_letter: bool,
}

impl Harness {
    pub fn new(label: &str, reactions: Vec<ReactionConfigToml>) -> Self {
        Self::with_options(
            label,
            HarnessOptions {
                reactions,
                ..HarnessOptions::default()
            },
        )
    }

    pub fn with_options(label: &str, options: HarnessOptions) -> Self {
        let root = unique_temp_dir(label);
        let raw = format!(
            r#"
store_root = "{store}"

[lifecycle]
call_timeout_ms = 2000
halt_on_dead_letter = {halt}

[retry]
max_retries = 2
base_delay_ms = 1
max_delay_ms = 5

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
allow_auto_merge = {auto_merge}
"#,
            store = root.join("store").display(),
            halt = options.halt_on_dead_letter,
            auto_merge = options.allow_auto_merge,
        );
        let mut config = parse_config(&raw).expect("parse harness config");
        config.projects[0].reactions = options.reactions;

        let tracker = Arc::new(MockTracker::default());
        let scm = Arc::new(MockScm::default());
        let runtime = Arc::new(MockRuntime::default());
        let workspace = Arc::new(MockWorkspace::default());
        let notifier = Arc::new(MockNotifier::default());

        let mut registry = PluginRegistry::new();
        let entries: Vec<(PluginSlot, PluginInstance)> = vec![
            (PluginSlot::Tracker, PluginInstance::Tracker(tracker.clone())),
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
        let projects = registry
            .validate_projects(&config)
            .unwrap_or_else(|error| panic!("validate projects: {error}"));

        let store = MetadataStore::open(&config.store_root).expect("open store");
        let ctx = Arc::new(LifecycleContext::new(
            store,
            Arc::new(LifecycleEventBus::default()),
            projects,
            &config,
        ));
        let manager = LifecycleManager::new(ctx);

        Self {
            root,
            config,
            tracker,
            scm,
            runtime,
            workspace,
            notifier,
            manager,
        }
    }

    pub fn store(&self) -> &MetadataStore {
        &self.manager.context().store
    }

    /// Writes a record as if the session manager had just spawned it.
    pub fn seed_session(&self, state: SessionState) -> SessionId {
        let store = self.store();
        let id = store.reserve_session_id("app").expect("reserve id");
        let mut record = SessionRecord::new(
            id.clone(),
            ProjectId::new("app"),
            IssueId::new("42"),
            "agent.mock",
            now_timestamp(),
        );
        record.state = state;
        record.runtime_handle = Some(RuntimeHandle::new(format!("mock-{id}")));
        record.workspace_path = Some(PathBuf::from("/src/app/worktrees").join(id.as_str()));
        record.workspace_branch = Some("feat/issue-42".to_owned());
        record.labels = vec!["bug".to_owned()];
        let event = store
            .append_event(&id, EVENT_SESSION_SPAWNED, json!({"issue": "42"}))
            .expect("append spawned");
        record.last_sequence = event.sequence;
        store.write_record(&record).expect("write record");
        id
    }

    pub fn record(&self, id: &SessionId) -> SessionRecord {
        self.store()
            .read_record(id)
            .expect("read record")
            .expect("active record")
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
