use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::{OrchestratorError, OrchestratorResult};

/// Raw inbound webhook with lower-cased header names.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WebhookRequest {
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl WebhookRequest {
    pub fn new(headers: impl IntoIterator<Item = (String, String)>, body: Vec<u8>) -> Self {
        Self {
            headers: headers
                .into_iter()
                .map(|(name, value)| (name.to_ascii_lowercase(), value))
                .collect(),
            body,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WebhookEvent {
    Issue {
        issue_id: String,
        action: String,
    },
    MergeRequest {
        number: u64,
        branch: Option<String>,
        action: String,
    },
    Unknown {
        event: String,
    },
}

/// Implemented by tracker and SCM plugins that accept push notifications.
pub trait WebhookSource: Send + Sync {
    fn signature_header(&self) -> &str;

    /// Value the signature header must carry for `body`. Plain shared-token
    /// schemes return the secret itself.
    fn expected_signature(&self, secret: &str, body: &[u8]) -> String {
        let _ = body;
        secret.to_owned()
    }

    fn normalize(&self, request: &WebhookRequest) -> OrchestratorResult<WebhookEvent>;
}

/// Rejects requests whose signature header does not match.
///
/// Both sides are reduced to SHA-256 digests before a constant-time compare,
/// and a missing header is compared as an empty value, so the cost does not
/// depend on header length or presence. An empty secret rejects everything.
pub fn verify_webhook(
    source: &dyn WebhookSource,
    request: &WebhookRequest,
    secret: &str,
) -> OrchestratorResult<()> {
    let provided = request.header(source.signature_header()).unwrap_or("");
    let expected = source.expected_signature(secret, &request.body);
    if signatures_match(provided, &expected) & !secret.is_empty() {
        return Ok(());
    }
    Err(OrchestratorError::PermanentExternal(
        "webhook signature mismatch".to_owned(),
    ))
}

pub fn signatures_match(provided: &str, expected: &str) -> bool {
    let provided = Sha256::digest(provided.as_bytes());
    let expected = Sha256::digest(expected.as_bytes());
    provided.as_slice().ct_eq(expected.as_slice()).into()
}
