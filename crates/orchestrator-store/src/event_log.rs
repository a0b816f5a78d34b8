use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use orchestrator_protocol::{LifecycleEvent, OrchestratorError, OrchestratorResult, SessionId};
use serde_json::Value;
use tracing::warn;

use crate::now_timestamp;

/// Appends one event, assigning the next per-session sequence number.
///
/// A torn trailing line left by a crash mid-write is dropped before the new
/// line is written so the log stays line-delimited.
pub(crate) fn append_event(
    path: &Path,
    session_id: &SessionId,
    event_type: &str,
    payload: Value,
) -> OrchestratorResult<LifecycleEvent> {
    let existing = read_raw(path)?;
    let complete_len = match existing.rfind('\n') {
        Some(index) => index + 1,
        None => 0,
    };
    if complete_len != existing.len() {
        warn!(path = %path.display(), "dropping torn trailing event log line");
        let file = OpenOptions::new()
            .write(true)
            .open(path)
            .map_err(|err| persistence(path, "open", err))?;
        file.set_len(complete_len as u64)
            .map_err(|err| persistence(path, "truncate", err))?;
    }

    let last_sequence = parse_events(&existing[..complete_len], path)
        .last()
        .map(|event| event.sequence)
        .unwrap_or(0);
    let event = LifecycleEvent {
        session_id: session_id.clone(),
        sequence: last_sequence + 1,
        event_type: event_type.to_owned(),
        payload,
        appended_at: now_timestamp(),
    };

    let mut line = serde_json::to_string(&event)
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
        .map_err(|err| persistence(path, "sync", err))?;
    Ok(event)
}

pub(crate) fn read_events(path: &Path) -> OrchestratorResult<Vec<LifecycleEvent>> {
    let raw = read_raw(path)?;
    let complete_len = raw.rfind('\n').map(|index| index + 1).unwrap_or(0);
    Ok(parse_events(&raw[..complete_len], path))
}

fn read_raw(path: &Path) -> OrchestratorResult<String> {
    match fs::read_to_string(path) {
        Ok(raw) => Ok(raw),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(err) => Err(persistence(path, "read", err)),
    }
}

fn parse_events(raw: &str, path: &Path) -> Vec<LifecycleEvent> {
    raw.lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<LifecycleEvent>(line) {
            Ok(event) => Some(event),
            Err(error) => {
                warn!(path = %path.display(), error = %error, "skipping unparseable event log line");
                None
            }
        })
        .collect()
}

pub(crate) fn persistence(path: &Path, action: &str, err: std::io::Error) -> OrchestratorError {
    OrchestratorError::Persistence(format!("failed to {action} {}: {err}", path.display()))
}
