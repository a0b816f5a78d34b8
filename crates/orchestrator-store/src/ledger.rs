use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use orchestrator_protocol::{OrchestratorError, OrchestratorResult};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::event_log::persistence;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReactionStatus {
    /// Durably recorded before the side effect starts.
    Claimed,
    Succeeded,
    Failed,
    DeadLettered,
    /// A claim interrupted before its outcome was written. The side effect
    /// may have happened, so it is never run again.
    Unknown,
}

impl ReactionStatus {
    pub const fn is_settled(self) -> bool {
        matches!(self, Self::Succeeded | Self::DeadLettered | Self::Unknown)
    }
}

/// One line of a session's reaction ledger. The latest line for a
/// `(sequence, kind)` pair is its current outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionLedgerEntry {
    pub sequence: u64,
    pub kind: String,
    pub status: ReactionStatus,
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Unix milliseconds before which a failed reaction is not retried.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_at_ms: Option<u64>,
    pub recorded_at: String,
}

pub type ReactionOutcomes = BTreeMap<(u64, String), ReactionLedgerEntry>;

pub(crate) fn append_entry(path: &Path, entry: &ReactionLedgerEntry) -> OrchestratorResult<()> {
    let mut line = serde_json::to_string(entry)
        .map_err(|err| OrchestratorError::Persistence(err.to_string()))?;
    line.push('\n');
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|err| persistence(path, "open", err))?;
    file.write_all(line.as_bytes())
        .map_err(|err| persistence(path, "append to", err))?;
    file.sync_data()
        .map_err(|err| persistence(path, "sync", err))
}

pub(crate) fn read_outcomes(path: &Path) -> OrchestratorResult<ReactionOutcomes> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(err) => return Err(persistence(path, "read", err)),
    };

    let mut outcomes = BTreeMap::new();
    for line in raw.lines().filter(|line| !line.trim().is_empty()) {
        match serde_json::from_str::<ReactionLedgerEntry>(line) {
            Ok(entry) => {
                outcomes.insert((entry.sequence, entry.kind.clone()), entry);
            }
            Err(error) => {
                warn!(path = %path.display(), error = %error, "skipping unparseable reaction ledger line");
            }
        }
    }
    Ok(outcomes)
}
