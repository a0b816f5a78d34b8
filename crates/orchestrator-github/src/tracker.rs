use std::ffi::OsString;

use async_trait::async_trait;
use orchestrator_protocol::webhook::WebhookSource;
use orchestrator_protocol::{
    Issue, IssueFilter, IssueId, IssueState, IssueUpdate, NewIssue, OrchestratorError,
    OrchestratorResult, ProjectContext, Tracker,
};
use serde::Deserialize;

use crate::cli::GhCli;
use crate::webhook::GithubWebhook;

const ISSUE_FIELDS: &str = "number,title,body,url,state,labels,assignees";
const DEFAULT_LIST_LIMIT: u32 = 30;

/// `tracker.github`: issues of the project's repository through `gh issue`.
pub struct GithubTracker {
    gh: GhCli,
    webhook: GithubWebhook,
}

impl GithubTracker {
    pub fn new(gh: GhCli) -> Self {
        Self {
            gh,
            webhook: GithubWebhook,
        }
    }

    fn view_issue_args(repository: &str, number: u64) -> Vec<OsString> {
        vec![
            OsString::from("issue"),
            OsString::from("view"),
            OsString::from(number.to_string()),
            OsString::from("--repo"),
            OsString::from(repository),
            OsString::from("--json"),
            OsString::from(ISSUE_FIELDS),
        ]
    }

    fn list_issues_args(repository: &str, filter: &IssueFilter) -> Vec<OsString> {
        let state = match filter.state {
            Some(IssueState::Open) => "open",
            Some(IssueState::Closed) => "closed",
            None => "all",
        };
        let mut args = vec![
            OsString::from("issue"),
            OsString::from("list"),
            OsString::from("--repo"),
            OsString::from(repository),
            OsString::from("--state"),
            OsString::from(state),
        ];
        for label in filter.labels.iter().filter(|label| !label.trim().is_empty()) {
            args.push(OsString::from("--label"));
            args.push(OsString::from(label.trim()));
        }
        if let Some(assignee) = filter.assignee.as_deref() {
            args.push(OsString::from("--assignee"));
            args.push(OsString::from(assignee));
        }
        args.push(OsString::from("--limit"));
        args.push(OsString::from(
            filter.limit.unwrap_or(DEFAULT_LIST_LIMIT).to_string(),
        ));
        args.push(OsString::from("--json"));
        args.push(OsString::from(ISSUE_FIELDS));
        args
    }

    /// `None` when the update carries no label or assignee change.
    fn edit_issue_args(repository: &str, number: u64, update: &IssueUpdate) -> Option<Vec<OsString>> {
        let mut args = vec![
            OsString::from("issue"),
            OsString::from("edit"),
            OsString::from(number.to_string()),
            OsString::from("--repo"),
            OsString::from(repository),
        ];
        let base_len = args.len();
        for label in &update.add_labels {
            args.push(OsString::from("--add-label"));
            args.push(OsString::from(label.as_str()));
        }
        for label in &update.remove_labels {
            args.push(OsString::from("--remove-label"));
            args.push(OsString::from(label.as_str()));
        }
        if let Some(assignee) = update.assignee.as_deref() {
            args.push(OsString::from("--add-assignee"));
            args.push(OsString::from(assignee));
        }
        (args.len() > base_len).then_some(args)
    }

    fn state_args(repository: &str, number: u64, state: IssueState) -> Vec<OsString> {
        let verb = match state {
            IssueState::Open => "reopen",
            IssueState::Closed => "close",
        };
        vec![
            OsString::from("issue"),
            OsString::from(verb),
            OsString::from(number.to_string()),
            OsString::from("--repo"),
            OsString::from(repository),
        ]
    }

    fn comment_args(repository: &str, number: u64, body: &str) -> Vec<OsString> {
        vec![
            OsString::from("issue"),
            OsString::from("comment"),
            OsString::from(number.to_string()),
            OsString::from("--repo"),
            OsString::from(repository),
            OsString::from("--body"),
            OsString::from(body),
        ]
    }

    fn create_issue_args(repository: &str, issue: &NewIssue) -> Vec<OsString> {
        let mut args = vec![
            OsString::from("issue"),
            OsString::from("create"),
            OsString::from("--repo"),
            OsString::from(repository),
            OsString::from("--title"),
            OsString::from(issue.title.as_str()),
            OsString::from("--body"),
            OsString::from(issue.description.as_str()),
        ];
        for label in &issue.labels {
            args.push(OsString::from("--label"));
            args.push(OsString::from(label.as_str()));
        }
        if let Some(assignee) = issue.assignee.as_deref() {
            args.push(OsString::from("--assignee"));
            args.push(OsString::from(assignee));
        }
        args
    }

    async fn view(&self, project: &ProjectContext, number: u64) -> OrchestratorResult<Issue> {
        let issue: GhIssue = self
            .gh
            .json(
                "gh issue view output",
                Self::view_issue_args(&project.repository, number),
            )
            .await?;
        Ok(issue.into_issue())
    }
}

#[async_trait]
impl Tracker for GithubTracker {
    async fn get_issue(
        &self,
        project: &ProjectContext,
        issue_id: &IssueId,
    ) -> OrchestratorResult<Issue> {
        self.view(project, parse_issue_number(issue_id)?).await
    }

    async fn list_issues(
        &self,
        project: &ProjectContext,
        filter: &IssueFilter,
    ) -> OrchestratorResult<Vec<Issue>> {
        let issues: Vec<GhIssue> = self
            .gh
            .json(
                "gh issue list output",
                Self::list_issues_args(&project.repository, filter),
            )
            .await?;
        Ok(issues.into_iter().map(GhIssue::into_issue).collect())
    }

    async fn update_issue(
        &self,
        project: &ProjectContext,
        issue_id: &IssueId,
        update: &IssueUpdate,
    ) -> OrchestratorResult<()> {
        let number = parse_issue_number(issue_id)?;
        let repository = project.repository.as_str();

        if let Some(args) = Self::edit_issue_args(repository, number, update) {
            self.gh.run(args).await?;
        }
        if let Some(comment) = update.comment.as_deref().filter(|body| !body.trim().is_empty()) {
            self.gh
                .run(Self::comment_args(repository, number, comment))
                .await?;
        }
        if let Some(state) = update.state {
            self.gh
                .run(Self::state_args(repository, number, state))
                .await?;
        }
        Ok(())
    }

    async fn create_issue(
        &self,
        project: &ProjectContext,
        issue: &NewIssue,
    ) -> OrchestratorResult<Issue> {
        if issue.title.trim().is_empty() {
            return Err(OrchestratorError::PermanentExternal(
                "issue title must be a non-empty string".to_owned(),
            ));
        }
        let output = self
            .gh
            .run(Self::create_issue_args(&project.repository, issue))
            .await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let number = extract_issue_number(&stdout).ok_or_else(|| {
            OrchestratorError::PermanentExternal(format!(
                "gh issue create did not print an issue URL: {}",
                stdout.trim()
            ))
        })?;
        self.view(project, number).await
    }

    fn issue_url(&self, project: &ProjectContext, issue_id: &IssueId) -> String {
        format!(
            "https://github.com/{}/issues/{}",
            project.repository,
            issue_id.as_str().trim_start_matches('#')
        )
    }

    fn webhook(&self) -> Option<&dyn WebhookSource> {
        Some(&self.webhook)
    }
}

fn parse_issue_number(issue_id: &IssueId) -> OrchestratorResult<u64> {
    issue_id
        .as_str()
        .trim()
        .trim_start_matches('#')
        .parse::<u64>()
        .map_err(|_| {
            OrchestratorError::PermanentExternal(format!(
                "GitHub issue id must be numeric, got '{issue_id}'"
            ))
        })
}

fn extract_issue_number(stdout: &str) -> Option<u64> {
    stdout
        .split_whitespace()
        .filter_map(|token| token.split("/issues/").nth(1))
        .map(|tail| {
            tail.chars()
                .take_while(char::is_ascii_digit)
                .collect::<String>()
        })
        .find_map(|digits| digits.parse::<u64>().ok())
}

#[derive(Debug, Deserialize)]
struct GhIssue {
    number: u64,
    title: String,
    #[serde(default)]
    body: Option<String>,
    url: String,
    state: String,
    #[serde(default)]
    labels: Vec<GhLabel>,
    #[serde(default)]
    assignees: Vec<GhUser>,
}

#[derive(Debug, Deserialize)]
struct GhLabel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct GhUser {
    login: String,
}

impl GhIssue {
    fn into_issue(self) -> Issue {
        let state = if self.state.eq_ignore_ascii_case("closed") {
            IssueState::Closed
        } else {
            IssueState::Open
        };
        Issue {
            id: IssueId::new(self.number.to_string()),
            title: self.title,
            description: self.body.unwrap_or_default(),
            url: self.url,
            state,
            labels: self.labels.into_iter().map(|label| label.name).collect(),
            assignee: self.assignees.into_iter().next().map(|user| user.login),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use orchestrator_protocol::ProjectId;

    use super::*;
    use crate::cli::testing::{cli, output, StubRunner};

    const ISSUE_JSON: &str = r#"{
        "number": 42,
        "title": "Widget crashes on save",
        "body": "Steps to reproduce...",
        "url": "https://github.com/acme/widgets/issues/42",
        "state": "OPEN",
        "labels": [{"name": "bug"}, {"name": "p1"}],
        "assignees": [{"login": "octocat"}]
    }"#;

    fn project() -> ProjectContext {
        ProjectContext {
            id: ProjectId::new("widgets"),
            repository: "acme/widgets".to_owned(),
            path: PathBuf::from("/src/widgets"),
            default_branch: "main".to_owned(),
        }
    }

    #[tokio::test]
    async fn get_issue_views_by_number_and_normalizes_fields() {
        let runner = StubRunner::with_results(vec![Ok(output(0, ISSUE_JSON, ""))]);
        let tracker = GithubTracker::new(cli(&runner));

        let issue = tracker
            .get_issue(&project(), &IssueId::new("#42"))
            .await
            .expect("issue");

        assert_eq!(issue.id, IssueId::new("42"));
        assert_eq!(issue.state, IssueState::Open);
        assert_eq!(issue.labels, vec!["bug".to_owned(), "p1".to_owned()]);
        assert_eq!(issue.assignee.as_deref(), Some("octocat"));
        assert_eq!(
            runner.args(0),
            vec![
                "issue",
                "view",
                "42",
                "--repo",
                "acme/widgets",
                "--json",
                ISSUE_FIELDS
            ]
        );
    }

    #[tokio::test]
    async fn closed_issue_reports_completed() {
        let closed = ISSUE_JSON.replace("\"OPEN\"", "\"CLOSED\"");
        let runner = StubRunner::with_results(vec![Ok(output(0, &closed, ""))]);
        let tracker = GithubTracker::new(cli(&runner));

        assert!(tracker
            .is_completed(&project(), &IssueId::new("42"))
            .await
            .expect("completed"));
    }

    #[tokio::test]
    async fn non_numeric_issue_ids_are_rejected_without_running_gh() {
        let runner = StubRunner::with_results(Vec::new());
        let tracker = GithubTracker::new(cli(&runner));

        let err = tracker
            .get_issue(&project(), &IssueId::new("ENG-1"))
            .await
            .expect_err("non numeric");

        assert!(matches!(err, OrchestratorError::PermanentExternal(_)));
        assert_eq!(runner.call_count(), 0);
    }

    #[tokio::test]
    async fn list_issues_passes_filter_flags() {
        let runner = StubRunner::with_results(vec![Ok(output(0, &format!("[{ISSUE_JSON}]"), ""))]);
        let tracker = GithubTracker::new(cli(&runner));

        let issues = tracker
            .list_issues(
                &project(),
                &IssueFilter {
                    state: Some(IssueState::Open),
                    labels: vec!["bug".to_owned(), " ".to_owned()],
                    assignee: Some("@me".to_owned()),
                    limit: Some(5),
                },
            )
            .await
            .expect("list");

        assert_eq!(issues.len(), 1);
        let args = runner.args(0);
        assert_eq!(
            &args[..10],
            &[
                "issue",
                "list",
                "--repo",
                "acme/widgets",
                "--state",
                "open",
                "--label",
                "bug",
                "--assignee",
                "@me"
            ]
        );
        assert_eq!(&args[10..12], &["--limit", "5"]);
    }

    #[tokio::test]
    async fn update_issue_runs_edit_comment_and_close_in_order() {
        let runner = StubRunner::with_results(vec![
            Ok(output(0, "", "")),
            Ok(output(0, "", "")),
            Ok(output(0, "", "")),
        ]);
        let tracker = GithubTracker::new(cli(&runner));

        tracker
            .update_issue(
                &project(),
                &IssueId::new("42"),
                &IssueUpdate {
                    state: Some(IssueState::Closed),
                    add_labels: vec!["merged".to_owned()],
                    remove_labels: vec!["in-progress".to_owned()],
                    comment: Some("Shipped in #7".to_owned()),
                    assignee: None,
                },
            )
            .await
            .expect("update");

        assert_eq!(
            runner.args(0),
            vec![
                "issue",
                "edit",
                "42",
                "--repo",
                "acme/widgets",
                "--add-label",
                "merged",
                "--remove-label",
                "in-progress"
            ]
        );
        assert_eq!(runner.args(1)[1], "comment");
        assert_eq!(runner.args(2)[1], "close");
    }

    #[tokio::test]
    async fn state_only_update_skips_edit() {
        let runner = StubRunner::with_results(vec![Ok(output(0, "", ""))]);
        let tracker = GithubTracker::new(cli(&runner));

        tracker
            .update_issue(
                &project(),
                &IssueId::new("42"),
                &IssueUpdate {
                    state: Some(IssueState::Open),
                    ..IssueUpdate::default()
                },
            )
            .await
            .expect("reopen");

        assert_eq!(runner.call_count(), 1);
        assert_eq!(runner.args(0)[1], "reopen");
    }

    #[tokio::test]
    async fn create_issue_parses_url_then_reads_back() {
        let runner = StubRunner::with_results(vec![
            Ok(output(0, "https://github.com/acme/widgets/issues/42\n", "")),
            Ok(output(0, ISSUE_JSON, "")),
        ]);
        let tracker = GithubTracker::new(cli(&runner));

        let issue = tracker
            .create_issue(
                &project(),
                &NewIssue {
                    title: "Widget crashes on save".to_owned(),
                    description: "Steps to reproduce...".to_owned(),
                    labels: vec!["bug".to_owned()],
                    assignee: None,
                },
            )
            .await
            .expect("create");

        assert_eq!(issue.id, IssueId::new("42"));
        assert_eq!(runner.args(1)[2], "42");
    }

    #[test]
    fn issue_url_and_branch_follow_repository() {
        let runner = StubRunner::with_results(Vec::new());
        let tracker = GithubTracker::new(cli(&runner));

        assert_eq!(
            tracker.issue_url(&project(), &IssueId::new("42")),
            "https://github.com/acme/widgets/issues/42"
        );
        assert_eq!(
            tracker.branch_name(&project(), &IssueId::new("42")),
            "feat/issue-42"
        );
        assert!(tracker.webhook().is_some());
    }
}
