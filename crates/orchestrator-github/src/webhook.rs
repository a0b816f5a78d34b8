use hmac::{Hmac, Mac};
use orchestrator_protocol::{
    OrchestratorError, OrchestratorResult, WebhookEvent, WebhookRequest, WebhookSource,
};
use serde_json::Value;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_HEADER: &str = "x-hub-signature-256";
const EVENT_HEADER: &str = "x-github-event";

/// GitHub deliveries signed with `sha256=<hex hmac>` over the raw body.
#[derive(Debug, Clone, Copy, Default)]
pub struct GithubWebhook;

impl WebhookSource for GithubWebhook {
    fn signature_header(&self) -> &str {
        SIGNATURE_HEADER
    }

    fn expected_signature(&self, secret: &str, body: &[u8]) -> String {
        let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
            // HMAC accepts keys of any length.
            return String::new();
        };
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    fn normalize(&self, request: &WebhookRequest) -> OrchestratorResult<WebhookEvent> {
        let event = request.header(EVENT_HEADER).unwrap_or("").trim().to_owned();
        if event.is_empty() {
            return Err(OrchestratorError::PermanentExternal(format!(
                "missing {EVENT_HEADER} header"
            )));
        }
        if event == "ping" {
            return Ok(WebhookEvent::Unknown { event });
        }

        let payload: Value = serde_json::from_slice(&request.body).map_err(|error| {
            OrchestratorError::PermanentExternal(format!("invalid GitHub webhook payload: {error}"))
        })?;
        let action = payload
            .get("action")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_owned();

        let normalized = match event.as_str() {
            "issues" | "issue_comment" => payload
                .pointer("/issue/number")
                .and_then(Value::as_u64)
                .map(|number| WebhookEvent::Issue {
                    issue_id: number.to_string(),
                    action,
                }),
            "pull_request" | "pull_request_review" | "pull_request_review_comment" => payload
                .pointer("/pull_request/number")
                .and_then(Value::as_u64)
                .map(|number| WebhookEvent::MergeRequest {
                    number,
                    branch: string_at(&payload, "/pull_request/head/ref"),
                    action,
                }),
            "check_suite" => check_event(&payload, "/check_suite", "/check_suite/head_branch", action),
            "check_run" => check_event(
                &payload,
                "/check_run",
                "/check_run/check_suite/head_branch",
                action,
            ),
            _ => None,
        };

        Ok(normalized.unwrap_or(WebhookEvent::Unknown { event }))
    }
}

/// Check deliveries name the pull request when GitHub knows it; otherwise
/// only the head branch identifies the session.
fn check_event(
    payload: &Value,
    root: &str,
    branch_pointer: &str,
    action: String,
) -> Option<WebhookEvent> {
    let number = payload
        .pointer(&format!("{root}/pull_requests/0/number"))
        .and_then(Value::as_u64);
    let branch = string_at(payload, branch_pointer);
    if number.is_none() && branch.is_none() {
        return None;
    }
    Some(WebhookEvent::MergeRequest {
        number: number.unwrap_or(0),
        branch,
        action,
    })
}

fn string_at(payload: &Value, pointer: &str) -> Option<String> {
    payload
        .pointer(pointer)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use orchestrator_protocol::verify_webhook;

    use super::*;

    fn request(event: &str, signature: Option<String>, body: &str) -> WebhookRequest {
        let mut headers = vec![("X-GitHub-Event".to_owned(), event.to_owned())];
        if let Some(signature) = signature {
            headers.push(("X-Hub-Signature-256".to_owned(), signature));
        }
        WebhookRequest::new(headers, body.as_bytes().to_vec())
    }

    #[test]
    fn signature_matches_githubs_published_example() {
        // Example delivery from GitHub's webhook validation guide.
        let signature = GithubWebhook.expected_signature("It's a Secret to Everybody", b"Hello, World!");
        assert_eq!(
            signature,
            "sha256=757107ea0eb2509fc211221cce984b8a37570b6d7586c22c46f4379c8b043e17"
        );
    }

    #[test]
    fn verification_accepts_signed_bodies_and_rejects_tampering() {
        let body = r#"{"action":"opened","pull_request":{"number":7,"head":{"ref":"feat/issue-42"}}}"#;
        let signature = GithubWebhook.expected_signature("s3cret", body.as_bytes());

        let signed = request("pull_request", Some(signature.clone()), body);
        assert!(verify_webhook(&GithubWebhook, &signed, "s3cret").is_ok());

        let tampered = request("pull_request", Some(signature), &body.replace('7', "8"));
        assert!(verify_webhook(&GithubWebhook, &tampered, "s3cret").is_err());

        let unsigned = request("pull_request", None, body);
        assert!(verify_webhook(&GithubWebhook, &unsigned, "s3cret").is_err());
    }

    #[test]
    fn pull_request_events_normalize_to_merge_requests() {
        let body = r#"{"action":"synchronize","pull_request":{"number":7,"head":{"ref":"feat/issue-42"}}}"#;
        let event = GithubWebhook
            .normalize(&request("pull_request", None, body))
            .expect("normalize");

        assert_eq!(
            event,
            WebhookEvent::MergeRequest {
                number: 7,
                branch: Some("feat/issue-42".to_owned()),
                action: "synchronize".to_owned(),
            }
        );
    }

    #[test]
    fn check_suites_without_pull_requests_fall_back_to_branch() {
        let body = r#"{"action":"completed","check_suite":{"head_branch":"feat/issue-42","pull_requests":[]}}"#;
        let event = GithubWebhook
            .normalize(&request("check_suite", None, body))
            .expect("normalize");

        assert_eq!(
            event,
            WebhookEvent::MergeRequest {
                number: 0,
                branch: Some("feat/issue-42".to_owned()),
                action: "completed".to_owned(),
            }
        );
    }

    #[test]
    fn issue_events_carry_the_issue_number() {
        let body = r#"{"action":"closed","issue":{"number":42}}"#;
        let event = GithubWebhook
            .normalize(&request("issues", None, body))
            .expect("normalize");

        assert_eq!(
            event,
            WebhookEvent::Issue {
                issue_id: "42".to_owned(),
                action: "closed".to_owned(),
            }
        );
    }

    #[test]
    fn unmapped_events_and_bad_payloads() {
        let ping = GithubWebhook
            .normalize(&request("ping", None, "not json"))
            .expect("ping");
        assert_eq!(
            ping,
            WebhookEvent::Unknown {
                event: "ping".to_owned()
            }
        );

        let star = GithubWebhook
            .normalize(&request("star", None, r#"{"action":"created"}"#))
            .expect("star");
        assert!(matches!(star, WebhookEvent::Unknown { .. }));

        assert!(GithubWebhook
            .normalize(&request("issues", None, "{"))
            .is_err());
    }
}
