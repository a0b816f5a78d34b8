use std::ffi::OsString;

use async_trait::async_trait;
use orchestrator_protocol::command::{command_output_detail, parse_json};
use orchestrator_protocol::webhook::WebhookSource;
use orchestrator_protocol::{
    CiStatus, OrchestratorResult, ProjectContext, PullRequestRef, PullRequestState,
    PullRequestStatus, ReviewDecision, Scm,
};
use serde::Deserialize;
use tracing::info;

use crate::cli::GhCli;
use crate::webhook::GithubWebhook;

/// `scm.github`: pull requests, checks and reviews through `gh pr`.
pub struct GithubScm {
    gh: GhCli,
    webhook: GithubWebhook,
}

impl GithubScm {
    pub fn new(gh: GhCli) -> Self {
        Self {
            gh,
            webhook: GithubWebhook,
        }
    }

    fn find_pull_request_args(repository: &str, branch: &str) -> Vec<OsString> {
        vec![
            OsString::from("pr"),
            OsString::from("list"),
            OsString::from("--repo"),
            OsString::from(repository),
            OsString::from("--head"),
            OsString::from(branch),
            OsString::from("--state"),
            OsString::from("all"),
            OsString::from("--json"),
            OsString::from("number,url,headRefName"),
            OsString::from("--limit"),
            OsString::from("1"),
        ]
    }

    fn view_pull_request_args(repository: &str, pr: &PullRequestRef, fields: &str) -> Vec<OsString> {
        vec![
            OsString::from("pr"),
            OsString::from("view"),
            OsString::from(pr.number.to_string()),
            OsString::from("--repo"),
            OsString::from(repository),
            OsString::from("--json"),
            OsString::from(fields),
        ]
    }

    fn checks_args(repository: &str, pr: &PullRequestRef) -> Vec<OsString> {
        vec![
            OsString::from("pr"),
            OsString::from("checks"),
            OsString::from(pr.number.to_string()),
            OsString::from("--repo"),
            OsString::from(repository),
            OsString::from("--json"),
            OsString::from("name,bucket"),
        ]
    }

    fn merge_args(repository: &str, pr: &PullRequestRef) -> Vec<OsString> {
        vec![
            OsString::from("pr"),
            OsString::from("merge"),
            OsString::from(pr.number.to_string()),
            OsString::from("--repo"),
            OsString::from(repository),
            OsString::from("--squash"),
        ]
    }
}

#[async_trait]
impl Scm for GithubScm {
    async fn find_pull_request(
        &self,
        project: &ProjectContext,
        branch: &str,
    ) -> OrchestratorResult<Option<PullRequestRef>> {
        let pulls: Vec<GhPullRequest> = self
            .gh
            .json(
                "gh pr list output",
                Self::find_pull_request_args(&project.repository, branch),
            )
            .await?;
        Ok(pulls.into_iter().next().map(|pull| PullRequestRef {
            number: pull.number,
            url: pull.url,
            branch: pull.head_ref_name,
        }))
    }

    async fn pull_request_status(
        &self,
        project: &ProjectContext,
        pr: &PullRequestRef,
    ) -> OrchestratorResult<PullRequestStatus> {
        let view: GhPullRequestView = self
            .gh
            .json(
                "gh pr view output",
                Self::view_pull_request_args(&project.repository, pr, "state,mergeable,headRefOid"),
            )
            .await?;
        let state = match view.state.to_ascii_uppercase().as_str() {
            "MERGED" => PullRequestState::Merged,
            "CLOSED" => PullRequestState::Closed,
            _ => PullRequestState::Open,
        };
        let mergeable = match view.mergeable.to_ascii_uppercase().as_str() {
            "MERGEABLE" => Some(true),
            "CONFLICTING" => Some(false),
            _ => None,
        };
        Ok(PullRequestStatus {
            state,
            mergeable,
            head_sha: view.head_ref_oid.filter(|sha| !sha.is_empty()),
        })
    }

    async fn ci_status(
        &self,
        project: &ProjectContext,
        pr: &PullRequestRef,
    ) -> OrchestratorResult<CiStatus> {
        // `gh pr checks` exits non-zero for pending and failing checks but
        // still prints the JSON, so the status alone is not an error signal.
        let args = Self::checks_args(&project.repository, pr);
        let output = self.gh.run_raw(args.clone()).await?;
        if !output.status.success() && !looks_like_json(&output.stdout) {
            let detail = command_output_detail(&output);
            if detail.to_ascii_lowercase().contains("no checks reported") {
                return Ok(CiStatus::None);
            }
            return Err(self.gh.command_failed(&args, &output));
        }
        let checks: Vec<GhCheck> = parse_json("gh pr checks output", &output.stdout)?;
        Ok(summarize_checks(&checks))
    }

    async fn review_decision(
        &self,
        project: &ProjectContext,
        pr: &PullRequestRef,
    ) -> OrchestratorResult<ReviewDecision> {
        let view: GhReviewView = self
            .gh
            .json(
                "gh pr view output",
                Self::view_pull_request_args(&project.repository, pr, "reviewDecision"),
            )
            .await?;
        Ok(
            match view
                .review_decision
                .unwrap_or_default()
                .to_ascii_uppercase()
                .as_str()
            {
                "APPROVED" => ReviewDecision::Approved,
                "CHANGES_REQUESTED" => ReviewDecision::ChangesRequested,
                "REVIEW_REQUIRED" => ReviewDecision::Pending,
                _ => ReviewDecision::None,
            },
        )
    }

    async fn merge(&self, project: &ProjectContext, pr: &PullRequestRef) -> OrchestratorResult<()> {
        self.gh
            .run(Self::merge_args(&project.repository, pr))
            .await?;
        info!(repository = %project.repository, pr = pr.number, "merged pull request");
        Ok(())
    }

    fn webhook(&self) -> Option<&dyn WebhookSource> {
        Some(&self.webhook)
    }
}

fn looks_like_json(stdout: &[u8]) -> bool {
    String::from_utf8_lossy(stdout).trim_start().starts_with('[')
}

/// Any failure wins over pending, pending wins over passing.
fn summarize_checks(checks: &[GhCheck]) -> CiStatus {
    if checks.is_empty() {
        return CiStatus::None;
    }
    let bucket = |wanted: &[&str]| {
        checks
            .iter()
            .any(|check| wanted.contains(&check.bucket.to_ascii_lowercase().as_str()))
    };
    if bucket(&["fail", "cancel"]) {
        CiStatus::Failing
    } else if bucket(&["pending"]) {
        CiStatus::Pending
    } else {
        CiStatus::Passing
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GhPullRequest {
    number: u64,
    url: String,
    head_ref_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GhPullRequestView {
    state: String,
    #[serde(default)]
    mergeable: String,
    #[serde(default)]
    head_ref_oid: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GhReviewView {
    #[serde(default)]
    review_decision: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GhCheck {
    #[serde(default)]
    bucket: String,
}
