mod support;

use std::time::Duration;

use orchestrator_config::{ReactionAction, ReactionConfigToml};
use orchestrator_lifecycle::PollOutcome;
use orchestrator_protocol::event::{
    EVENT_SESSION_FAILED, EVENT_SESSION_MESSAGE_SENT, EVENT_SESSION_RESOURCE_LEAK,
    EVENT_SESSION_SPAWNED,
};
use orchestrator_protocol::{IssueId, OrchestratorError, ProjectId, SessionId, SessionState};
use orchestrator_session::SpawnOptions;
use support::Harness;

fn app() -> ProjectId {
    ProjectId::new("app")
}

#[tokio::test]
async fn spawn_creates_workspace_and_runtime_then_records_spawning() {
    let harness = Harness::new("spawn", Vec::new());

    let record = harness
        .sessions
        .spawn(&app(), &IssueId::new("42"), SpawnOptions::default())
        .await
        .expect("spawn");

    assert_eq!(record.id, SessionId::new("app-1"));
    assert_eq!(record.state, SessionState::Spawning);
    assert_eq!(record.workspace_branch.as_deref(), Some("feat/issue-42"));
    assert_eq!(record.labels, vec!["bug".to_owned()]);
    assert_eq!(record.runtime_handle.as_ref().map(|h| h.as_str()), Some("mock-app-1"));
    assert_eq!(harness.event_types(&record.id), vec![EVENT_SESSION_SPAWNED.to_owned()]);

    let created = harness.runtime.snapshot(|state| state.created.clone());
    assert_eq!(created.len(), 1);
    assert!(created[0].launch.args[0].contains("Widget crashes on save"));
    assert_eq!(
        created[0].workdir,
        std::path::PathBuf::from("/src/app/worktrees/app-1")
    );

    let stored = harness.sessions.get(&record.id).expect("get");
    assert_eq!(stored, record);
    assert_eq!(harness.sessions.list().expect("list"), vec![record]);
}

#[tokio::test]
async fn spawn_allocates_increasing_ids_and_honors_options() {
    let harness = Harness::new("spawn-ids", Vec::new());

    let first = harness
        .sessions
        .spawn(&app(), &IssueId::new("42"), SpawnOptions::default())
        .await
        .expect("first spawn");
    let second = harness
        .sessions
        .spawn(
            &app(),
            &IssueId::new("43"),
            SpawnOptions {
                branch: Some("hotfix/widget".to_owned()),
                extra_instructions: Some("Keep the diff small.".to_owned()),
                ..SpawnOptions::default()
            },
        )
        .await
        .expect("second spawn");

    assert_eq!(first.id.as_str(), "app-1");
    assert_eq!(second.id.as_str(), "app-2");
    assert_eq!(second.workspace_branch.as_deref(), Some("hotfix/widget"));
    let prompt = harness
        .runtime
        .snapshot(|state| state.created[1].launch.args[0].clone());
    assert!(prompt.ends_with("Keep the diff small."));
}

#[tokio::test]
async fn spawn_for_an_unresolved_project_fails_before_any_side_effect() {
    let harness = Harness::new("spawn-config", Vec::new());

    let error = harness
        .sessions
        .spawn(&ProjectId::new("orphan"), &IssueId::new("42"), SpawnOptions::default())
        .await
        .expect_err("unresolved project");

    assert!(matches!(error, OrchestratorError::Configuration(_)));
    assert!(harness.workspace.state.lock().expect("workspace").created.is_empty());
    assert!(harness.sessions.list().expect("list").is_empty());
}

#[tokio::test]
async fn tracker_failure_leaves_nothing_behind() {
    let harness = Harness::new("spawn-tracker", Vec::new());

    let error = harness
        .sessions
        .spawn(&app(), &IssueId::new("404"), SpawnOptions::default())
        .await
        .expect_err("missing issue");

    assert!(matches!(error, OrchestratorError::PermanentExternal(_)));
    assert!(harness.workspace.state.lock().expect("workspace").created.is_empty());
    assert!(harness.sessions.list().expect("list").is_empty());
}

#[tokio::test]
async fn workspace_failure_starts_no_runtime_and_releases_the_id() {
    let harness = Harness::new("spawn-workspace", Vec::new());
    harness.workspace.state.lock().expect("workspace").fail_create = true;

    let error = harness
        .sessions
        .spawn(&app(), &IssueId::new("42"), SpawnOptions::default())
        .await
        .expect_err("workspace failure");

    assert!(matches!(error, OrchestratorError::Workspace(_)));
    assert!(harness.runtime.snapshot(|state| state.created.is_empty()));
    assert!(harness.sessions.list().expect("list").is_empty());

    harness.workspace.state.lock().expect("workspace").fail_create = false;
    let record = harness
        .sessions
        .spawn(&app(), &IssueId::new("42"), SpawnOptions::default())
        .await
        .expect("retry spawn");
    assert_eq!(record.id.as_str(), "app-1");
}

#[tokio::test]
async fn runtime_failure_tears_the_workspace_down() {
    let harness = Harness::new("spawn-runtime", Vec::new());
    harness.runtime.state.lock().expect("runtime").fail_create = true;

    let error = harness
        .sessions
        .spawn(&app(), &IssueId::new("42"), SpawnOptions::default())
        .await
        .expect_err("runtime failure");

    assert!(matches!(error, OrchestratorError::Runtime(_)));
    let workspace = harness.workspace.state.lock().expect("workspace");
    assert_eq!(workspace.created, workspace.destroyed);
    drop(workspace);
    assert!(harness.sessions.list().expect("list").is_empty());
}

#[tokio::test]
async fn runtime_failure_with_stuck_workspace_keeps_a_failed_record() {
    let harness = Harness::new("spawn-leak", Vec::new());
    harness.runtime.state.lock().expect("runtime").fail_create = true;
    harness.workspace.state.lock().expect("workspace").fail_destroy = true;

    let error = harness
        .sessions
        .spawn(&app(), &IssueId::new("42"), SpawnOptions::default())
        .await
        .expect_err("runtime failure");
    assert!(matches!(error, OrchestratorError::Runtime(_)));

    let records = harness.sessions.list().expect("list");
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.state, SessionState::Failed);
    assert_eq!(record.issue, IssueId::new("42"));
    assert_eq!(
        record.residual_workspace,
        Some(std::path::PathBuf::from("/src/app/worktrees/app-1"))
    );
    assert!(record.runtime_handle.is_none());
    assert_eq!(
        harness.event_types(&record.id),
        vec![
            EVENT_SESSION_FAILED.to_owned(),
            EVENT_SESSION_RESOURCE_LEAK.to_owned()
        ]
    );

    // The next scan retires the failed record to the archive.
    let report = harness.lifecycle.scan_once().await.expect("scan");
    assert_eq!(report.archived, 1);
    let archived = harness.sessions.get(&record.id).expect("archived get");
    assert_eq!(archived.state, SessionState::Failed);
    assert!(archived.residual_workspace.is_some());
}

#[tokio::test]
async fn spawned_session_starts_working_and_holds_without_a_pull_request() {
    let harness = Harness::new("scenario-a", Vec::new());
    let record = harness
        .sessions
        .spawn(&app(), &IssueId::new("42"), SpawnOptions::default())
        .await
        .expect("spawn");

    let first = harness.lifecycle.poll_session(&record.id).await.expect("first poll");
    let second = harness.lifecycle.poll_session(&record.id).await.expect("second poll");

    assert_eq!(first, PollOutcome::Transitioned(SessionState::Working));
    assert_eq!(second, PollOutcome::Unchanged);
    assert_eq!(
        harness.sessions.get(&record.id).expect("get").state,
        SessionState::Working
    );
}

#[tokio::test]
async fn terminate_mid_reaction_cancels_it_and_later_polls_are_no_ops() {
    let harness = Harness::new(
        "scenario-d",
        vec![ReactionConfigToml {
            base_delay_ms: 1,
            ..ReactionConfigToml::new("transition.ci_failed", ReactionAction::SendToAgent)
        }],
    );
    let record = harness
        .sessions
        .spawn(&app(), &IssueId::new("42"), SpawnOptions::default())
        .await
        .expect("spawn");
    harness.scm.open_failing_pr("feat/issue-42");
    harness.runtime.state.lock().expect("runtime").hang_on_send = true;

    let lifecycle = harness.lifecycle.clone();
    let id = record.id.clone();
    let poll = tokio::spawn(async move { lifecycle.poll_session(&id).await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let terminated = tokio::time::timeout(
        Duration::from_secs(2),
        harness.sessions.terminate(&record.id, true),
    )
    .await
    .expect("terminate finishes")
    .expect("terminate");

    let outcome = poll.await.expect("join").expect("poll");
    assert_eq!(outcome, PollOutcome::Cancelled);
    assert_eq!(terminated.state, SessionState::Terminated);
    assert!(terminated.runtime_handle.is_none());
    assert!(terminated.workspace_path.is_none());

    let again = harness.lifecycle.poll_session(&record.id).await.expect("later poll");
    assert_eq!(again, PollOutcome::Missing);
    assert_eq!(harness.runtime.snapshot(|state| state.send_attempts), 1);
    assert_eq!(harness.runtime.snapshot(|state| state.destroyed.len()), 1);
    assert!(harness.sessions.list().expect("list").is_empty());
    assert_eq!(
        harness.sessions.get(&record.id).expect("archived").state,
        SessionState::Terminated
    );
}

#[tokio::test]
async fn terminate_is_idempotent() {
    let harness = Harness::new("terminate-twice", Vec::new());
    let record = harness
        .sessions
        .spawn(&app(), &IssueId::new("42"), SpawnOptions::default())
        .await
        .expect("spawn");

    let first = harness
        .sessions
        .terminate(&record.id, false)
        .await
        .expect("first terminate");
    let second = harness
        .sessions
        .terminate(&record.id, false)
        .await
        .expect("second terminate");

    assert_eq!(first, second);
    assert_eq!(harness.runtime.snapshot(|state| state.destroyed.len()), 1);
    assert!(harness.workspace.state.lock().expect("workspace").destroyed.is_empty());

    let missing = harness
        .sessions
        .terminate(&SessionId::new("app-99"), false)
        .await
        .expect_err("unknown session");
    assert!(matches!(missing, OrchestratorError::NotFound(_)));
}

#[tokio::test]
async fn terminate_records_teardown_leaks_but_still_finishes() {
    let harness = Harness::new("terminate-leak", Vec::new());
    let record = harness
        .sessions
        .spawn(&app(), &IssueId::new("42"), SpawnOptions::default())
        .await
        .expect("spawn");
    harness.runtime.state.lock().expect("runtime").fail_destroy = true;

    let terminated = harness
        .sessions
        .terminate(&record.id, true)
        .await
        .expect("terminate");

    assert_eq!(terminated.state, SessionState::Terminated);
    assert!(terminated
        .status_detail
        .as_deref()
        .is_some_and(|detail| detail.contains("pane stuck")));
    assert_eq!(
        harness.workspace.state.lock().expect("workspace").destroyed.len(),
        1
    );
}

#[tokio::test]
async fn send_forwards_operator_messages_and_output_reads_the_runtime() {
    let harness = Harness::new("send", Vec::new());
    let record = harness
        .sessions
        .spawn(&app(), &IssueId::new("42"), SpawnOptions::default())
        .await
        .expect("spawn");

    harness
        .sessions
        .send(&record.id, "please rebase onto main")
        .await
        .expect("send");
    let output = harness.sessions.output(&record.id, 20).await.expect("output");

    assert_eq!(
        harness.runtime.snapshot(|state| state.messages.clone()),
        vec!["please rebase onto main".to_owned()]
    );
    assert_eq!(output, "mock-app-1: last 20 lines");
    let events = harness.event_types(&record.id);
    assert_eq!(events.last().map(String::as_str), Some(EVENT_SESSION_MESSAGE_SENT));

    harness
        .sessions
        .terminate(&record.id, true)
        .await
        .expect("terminate");
    let error = harness
        .sessions
        .send(&record.id, "hello?")
        .await
        .expect_err("terminated session");
    assert!(matches!(error, OrchestratorError::NotFound(_)));
    assert!(harness.lifecycle.context().coordinator.is_empty());
}
