//! The session state machine as a pure function of the recorded view and
//! the facts observed in one poll.

use orchestrator_protocol::{
    CiStatus, PullRequestRef, PullRequestState, PullRequestStatus, ReviewDecision, SessionState,
};
use serde_json::{json, Value};

/// What the lifecycle manager knows about a session before a poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionView<'a> {
    pub state: SessionState,
    pub pr: Option<&'a PullRequestRef>,
    pub head_sha: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedPullRequest {
    pub pr: PullRequestRef,
    pub status: PullRequestStatus,
    pub ci: CiStatus,
    pub review: ReviewDecision,
}

/// Facts gathered from the tracker, SCM and runtime in one poll.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObservedFacts {
    pub pull_request: Option<ObservedPullRequest>,
    pub issue_closed: bool,
    /// `None` when the session has no runtime handle to check.
    pub runtime_alive: Option<bool>,
}

impl ObservedFacts {
    pub fn to_json(&self) -> Value {
        let pull_request = self.pull_request.as_ref().map(|observed| {
            json!({
                "number": observed.pr.number,
                "url": observed.pr.url,
                "branch": observed.pr.branch,
                "state": observed.status.state,
                "mergeable": observed.status.mergeable,
                "head_sha": observed.status.head_sha,
                "ci": observed.ci.as_str(),
                "review": observed.review.as_str(),
            })
        });
        json!({
            "pull_request": pull_request,
            "issue_closed": self.issue_closed,
            "runtime_alive": self.runtime_alive,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Observed facts confirm the current state.
    Hold,
    Transition(SessionState),
    /// Facts fit no valid edge; the state is held and flagged.
    Conflict(String),
}

pub fn decide(view: SessionView<'_>, facts: &ObservedFacts) -> Decision {
    if view.state.is_terminal() || view.state == SessionState::Merged {
        return Decision::Hold;
    }

    let target = match observed_target(view, facts) {
        Ok(target) => target,
        Err(conflict) => return Decision::Conflict(conflict),
    };

    if target == view.state {
        return Decision::Hold;
    }
    if !is_valid_transition(view.state, target) {
        return Decision::Conflict(format!(
            "observed facts imply {} but {} -> {} is not a valid transition",
            target, view.state, target
        ));
    }
    Decision::Transition(target)
}

fn observed_target(view: SessionView<'_>, facts: &ObservedFacts) -> Result<SessionState, String> {
    let Some(observed) = facts.pull_request.as_ref() else {
        if let Some(recorded) = view.pr {
            return Err(format!(
                "recorded pull request #{} is no longer observed",
                recorded.number
            ));
        }
        if facts.runtime_alive == Some(false) {
            return Ok(SessionState::Failed);
        }
        if facts.issue_closed {
            return Ok(SessionState::Abandoned);
        }
        return Ok(match view.state {
            SessionState::Spawning => SessionState::Working,
            other => other,
        });
    };

    if let Some(recorded) = view.pr {
        if recorded.number != observed.pr.number {
            return Err(format!(
                "pull request changed from #{} to #{}",
                recorded.number, observed.pr.number
            ));
        }
    }

    match observed.status.state {
        PullRequestState::Merged => return Ok(SessionState::Merged),
        PullRequestState::Closed => return Ok(SessionState::Abandoned),
        PullRequestState::Open => {}
    }

    if observed.status.mergeable == Some(true) && observed.ci == CiStatus::Failing {
        return Err(format!(
            "pull request #{} reports mergeable while CI is failing",
            observed.pr.number
        ));
    }
    if facts.runtime_alive == Some(false) {
        return Ok(SessionState::Failed);
    }

    let review = effective_review(view, observed);
    let target = match (observed.ci, review) {
        (CiStatus::Failing, _) => SessionState::CiFailed,
        (_, ReviewDecision::ChangesRequested) => SessionState::ChangesRequested,
        (CiStatus::Passing, ReviewDecision::Approved)
            if observed.status.mergeable == Some(true) =>
        {
            SessionState::Mergeable
        }
        (_, ReviewDecision::Approved) => SessionState::Approved,
        (CiStatus::Passing, _) => SessionState::ReviewPending,
        _ => SessionState::PrOpen,
    };
    Ok(target)
}

/// A changes-requested review no longer applies once new commits land.
fn effective_review(view: SessionView<'_>, observed: &ObservedPullRequest) -> ReviewDecision {
    let pushed_since = match (view.head_sha, observed.status.head_sha.as_deref()) {
        (Some(recorded), Some(current)) => recorded != current,
        _ => false,
    };
    if view.state == SessionState::ChangesRequested
        && observed.review == ReviewDecision::ChangesRequested
        && pushed_since
    {
        return ReviewDecision::None;
    }
    observed.review
}

pub fn is_valid_transition(from: SessionState, to: SessionState) -> bool {
    use SessionState::*;

    if from == to || from.is_terminal() {
        return false;
    }
    if from == Merged {
        return to == Terminated;
    }
    if matches!(to, Terminated | Abandoned | Failed) {
        return true;
    }
    match from {
        Spawning => to == Working || to.is_pull_request_phase(),
        Working => to.is_pull_request_phase() || to == Merged,
        CiFailed | ChangesRequested if to == Working => true,
        _ if from.is_pull_request_phase() => to.is_pull_request_phase() || to == Merged,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator_protocol::session::ALL_SESSION_STATES;

    fn pr(number: u64) -> PullRequestRef {
        PullRequestRef {
            number,
            url: format!("https://github.com/acme/app/pull/{number}"),
            branch: "feat/issue-42".to_owned(),
        }
    }

    fn open_pr(ci: CiStatus, review: ReviewDecision, mergeable: Option<bool>) -> ObservedFacts {
        ObservedFacts {
            pull_request: Some(ObservedPullRequest {
                pr: pr(7),
                status: PullRequestStatus {
                    state: PullRequestState::Open,
                    mergeable,
                    head_sha: Some("abc".to_owned()),
                },
                ci,
                review,
            }),
            issue_closed: false,
            runtime_alive: Some(true),
        }
    }

    fn view(state: SessionState, recorded: Option<&PullRequestRef>) -> SessionView<'_> {
        SessionView {
            state,
            pr: recorded,
            head_sha: Some("abc"),
        }
    }

    #[test]
    fn spawning_without_pr_moves_to_working_then_holds() {
        let facts = ObservedFacts {
            runtime_alive: Some(true),
            ..ObservedFacts::default()
        };
        assert_eq!(
            decide(view(SessionState::Spawning, None), &facts),
            Decision::Transition(SessionState::Working)
        );
        assert_eq!(decide(view(SessionState::Working, None), &facts), Decision::Hold);
    }

    #[test]
    fn failing_ci_moves_working_session_to_ci_failed() {
        let facts = open_pr(CiStatus::Failing, ReviewDecision::None, None);
        assert_eq!(
            decide(view(SessionState::Working, None), &facts),
            Decision::Transition(SessionState::CiFailed)
        );
        let recorded = pr(7);
        assert_eq!(
            decide(view(SessionState::CiFailed, Some(&recorded)), &facts),
            Decision::Hold
        );
    }

    #[test]
    fn approved_passing_and_mergeable_is_mergeable() {
        let recorded = pr(7);
        let facts = open_pr(CiStatus::Passing, ReviewDecision::Approved, Some(true));
        assert_eq!(
            decide(view(SessionState::ReviewPending, Some(&recorded)), &facts),
            Decision::Transition(SessionState::Mergeable)
        );

        let unknown_mergeability = open_pr(CiStatus::Passing, ReviewDecision::Approved, None);
        assert_eq!(
            decide(view(SessionState::ReviewPending, Some(&recorded)), &unknown_mergeability),
            Decision::Transition(SessionState::Approved)
        );
    }

    #[test]
    fn new_commits_clear_a_stale_changes_requested_review() {
        let recorded = pr(7);
        let facts = open_pr(CiStatus::Pending, ReviewDecision::ChangesRequested, None);
        let stale = SessionView {
            state: SessionState::ChangesRequested,
            pr: Some(&recorded),
            head_sha: Some("old"),
        };
        assert_eq!(
            decide(stale, &facts),
            Decision::Transition(SessionState::PrOpen)
        );
        assert_eq!(
            decide(view(SessionState::ChangesRequested, Some(&recorded)), &facts),
            Decision::Hold
        );
    }

    #[test]
    fn merged_and_closed_pull_requests_end_the_session() {
        let recorded = pr(7);
        let mut facts = open_pr(CiStatus::Passing, ReviewDecision::Approved, Some(true));
        if let Some(observed) = facts.pull_request.as_mut() {
            observed.status.state = PullRequestState::Merged;
        }
        assert_eq!(
            decide(view(SessionState::Mergeable, Some(&recorded)), &facts),
            Decision::Transition(SessionState::Merged)
        );
        if let Some(observed) = facts.pull_request.as_mut() {
            observed.status.state = PullRequestState::Closed;
        }
        assert_eq!(
            decide(view(SessionState::Mergeable, Some(&recorded)), &facts),
            Decision::Transition(SessionState::Abandoned)
        );
    }

    #[test]
    fn closed_issue_without_pr_abandons_and_dead_runtime_fails() {
        let closed = ObservedFacts {
            issue_closed: true,
            runtime_alive: Some(true),
            ..ObservedFacts::default()
        };
        assert_eq!(
            decide(view(SessionState::Working, None), &closed),
            Decision::Transition(SessionState::Abandoned)
        );

        let dead = ObservedFacts {
            runtime_alive: Some(false),
            ..ObservedFacts::default()
        };
        assert_eq!(
            decide(view(SessionState::Working, None), &dead),
            Decision::Transition(SessionState::Failed)
        );
    }

    #[test]
    fn conflicting_signals_hold_the_state() {
        let recorded = pr(7);
        let facts = open_pr(CiStatus::Failing, ReviewDecision::None, Some(true));
        assert!(matches!(
            decide(view(SessionState::PrOpen, Some(&recorded)), &facts),
            Decision::Conflict(_)
        ));

        let other = pr(8);
        let facts = open_pr(CiStatus::Passing, ReviewDecision::None, None);
        assert!(matches!(
            decide(view(SessionState::PrOpen, Some(&other)), &facts),
            Decision::Conflict(reason) if reason.contains("#8")
        ));

        let vanished = ObservedFacts::default();
        assert!(matches!(
            decide(view(SessionState::ReviewPending, Some(&recorded)), &vanished),
            Decision::Conflict(_)
        ));
    }

    #[test]
    fn terminal_states_have_no_outgoing_edges_and_merged_only_terminates() {
        for to in ALL_SESSION_STATES {
            for from in [
                SessionState::Terminated,
                SessionState::Abandoned,
                SessionState::Failed,
            ] {
                assert!(!is_valid_transition(from, to), "{from} -> {to}");
            }
            assert_eq!(
                is_valid_transition(SessionState::Merged, to),
                to == SessionState::Terminated
            );
        }
    }

    #[test]
    fn every_decided_state_is_reachable_from_spawning() {
        let mut reachable = vec![SessionState::Spawning];
        let mut index = 0;
        while index < reachable.len() {
            let from = reachable[index];
            for to in ALL_SESSION_STATES {
                if is_valid_transition(from, to) && !reachable.contains(&to) {
                    reachable.push(to);
                }
            }
            index += 1;
        }
        for state in ALL_SESSION_STATES {
            assert!(reachable.contains(&state), "{state} unreachable");
        }
    }

    #[test]
    fn decisions_are_deterministic() {
        let recorded = pr(7);
        let facts = open_pr(CiStatus::Passing, ReviewDecision::Pending, Some(false));
        let first = decide(view(SessionState::PrOpen, Some(&recorded)), &facts);
        let second = decide(view(SessionState::PrOpen, Some(&recorded)), &facts);
        assert_eq!(first, second);
        assert_eq!(first, Decision::Transition(SessionState::ReviewPending));
    }
}
