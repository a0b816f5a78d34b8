//! Human-readable durable state for orchestrated sessions.
//!
//! ```text
//! <root>/sessions/<id>/session.kv       sorted key=value record
//! <root>/sessions/<id>/events.jsonl     append-only event log
//! <root>/sessions/<id>/reactions.jsonl  append-only reaction ledger
//! <root>/archive/<id>-<nanos>/          destroyed sessions
//! ```

mod event_log;
mod ledger;
mod record;

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use orchestrator_protocol::{LifecycleEvent, OrchestratorError, OrchestratorResult, SessionId};
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::event_log::persistence;

pub use ledger::{ReactionLedgerEntry, ReactionOutcomes, ReactionStatus};
pub use record::SessionRecord;

const SESSIONS_DIR: &str = "sessions";
const ARCHIVE_DIR: &str = "archive";
const RECORD_FILE: &str = "session.kv";
const RECORD_TMP_FILE: &str = "session.kv.tmp";
const EVENTS_FILE: &str = "events.jsonl";
const LEDGER_FILE: &str = "reactions.jsonl";

#[derive(Debug, Clone)]
pub struct MetadataStore {
    root: PathBuf,
}

impl MetadataStore {
    pub fn open(root: impl Into<PathBuf>) -> OrchestratorResult<Self> {
        let root = root.into();
        for dir in [root.join(SESSIONS_DIR), root.join(ARCHIVE_DIR)] {
            fs::create_dir_all(&dir).map_err(|err| persistence(&dir, "create", err))?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Claims the next free `<prefix>-<n>` id by creating its directory.
    pub fn reserve_session_id(&self, prefix: &str) -> OrchestratorResult<SessionId> {
        if !is_safe_id(prefix) {
            return Err(OrchestratorError::Configuration(format!(
                "session prefix '{prefix}' may only contain letters, digits, `-`, `_`, or `.`"
            )));
        }

        let mut next = self.highest_session_number(prefix)? + 1;
        loop {
            let id = SessionId::new(format!("{prefix}-{next}"));
            let dir = self.sessions_dir().join(id.as_str());
            match fs::create_dir(&dir) {
                Ok(()) => return Ok(id),
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => next += 1,
                Err(err) => return Err(persistence(&dir, "create", err)),
            }
        }
    }

    /// Drops a reserved id that never received a record.
    pub fn release_reservation(&self, id: &SessionId) -> OrchestratorResult<()> {
        let dir = self.session_dir(id)?;
        if dir.join(RECORD_FILE).exists() {
            return Ok(());
        }
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(persistence(&dir, "remove", err)),
        }
    }

    /// Atomically replaces the session record (write temp file, then rename).
    pub fn write_record(&self, record: &SessionRecord) -> OrchestratorResult<()> {
        let dir = self.session_dir(&record.id)?;
        fs::create_dir_all(&dir).map_err(|err| persistence(&dir, "create", err))?;
        let tmp = dir.join(RECORD_TMP_FILE);
        let target = dir.join(RECORD_FILE);
        {
            let mut file = File::create(&tmp).map_err(|err| persistence(&tmp, "create", err))?;
            file.write_all(record.encode().as_bytes())
                .map_err(|err| persistence(&tmp, "write", err))?;
            file.sync_all()
                .map_err(|err| persistence(&tmp, "sync", err))?;
        }
        fs::rename(&tmp, &target).map_err(|err| persistence(&target, "replace", err))
    }

    pub fn read_record(&self, id: &SessionId) -> OrchestratorResult<Option<SessionRecord>> {
        let path = self.session_dir(id)?.join(RECORD_FILE);
        read_record_file(&path)
    }

    /// Active (non-archived) records ordered by creation time.
    pub fn list_records(&self) -> OrchestratorResult<Vec<SessionRecord>> {
        let dir = self.sessions_dir();
        let entries = fs::read_dir(&dir).map_err(|err| persistence(&dir, "read", err))?;
        let mut records = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| persistence(&dir, "read", err))?;
            let path = entry.path().join(RECORD_FILE);
            match read_record_file(&path) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(error) => {
                    tracing::warn!(path = %path.display(), error = %error, "skipping unreadable session record");
                }
            }
        }
        records.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.as_str().cmp(b.id.as_str()))
        });
        Ok(records)
    }

    pub fn append_event(
        &self,
        id: &SessionId,
        event_type: &str,
        payload: Value,
    ) -> OrchestratorResult<LifecycleEvent> {
        let path = self.session_dir(id)?.join(EVENTS_FILE);
        event_log::append_event(&path, id, event_type, payload)
    }

    pub fn read_events(&self, id: &SessionId) -> OrchestratorResult<Vec<LifecycleEvent>> {
        let path = self.session_dir(id)?.join(EVENTS_FILE);
        event_log::read_events(&path)
    }

    pub fn events_after(
        &self,
        id: &SessionId,
        sequence: u64,
    ) -> OrchestratorResult<Vec<LifecycleEvent>> {
        Ok(self
            .read_events(id)?
            .into_iter()
            .filter(|event| event.sequence > sequence)
            .collect())
    }

    pub fn append_reaction(
        &self,
        id: &SessionId,
        entry: &ReactionLedgerEntry,
    ) -> OrchestratorResult<()> {
        let path = self.session_dir(id)?.join(LEDGER_FILE);
        ledger::append_entry(&path, entry)
    }

    pub fn reaction_outcomes(&self, id: &SessionId) -> OrchestratorResult<ReactionOutcomes> {
        let path = self.session_dir(id)?.join(LEDGER_FILE);
        ledger::read_outcomes(&path)
    }

    /// Moves a session's files under `archive/`, returning the new location.
    pub fn archive_session(&self, id: &SessionId) -> OrchestratorResult<PathBuf> {
        let source = self.session_dir(id)?;
        let target = self
            .archive_dir()
            .join(format!("{}-{}", id.as_str(), now_nanos()));
        fs::rename(&source, &target).map_err(|err| persistence(&source, "archive", err))?;
        Ok(target)
    }

    /// Newest archived record for `id`, if the session was destroyed.
    pub fn read_archived_record(&self, id: &SessionId) -> OrchestratorResult<Option<SessionRecord>> {
        self.session_dir(id)?;
        let dir = self.archive_dir();
        let entries = fs::read_dir(&dir).map_err(|err| persistence(&dir, "read", err))?;
        let prefix = format!("{}-", id.as_str());
        let mut newest: Option<(u128, PathBuf)> = None;
        for entry in entries {
            let entry = entry.map_err(|err| persistence(&dir, "read", err))?;
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(stamp) = name
                .strip_prefix(&prefix)
                .and_then(|rest| rest.parse::<u128>().ok())
            else {
                continue;
            };
            if newest.as_ref().map_or(true, |(current, _)| stamp > *current) {
                newest = Some((stamp, entry.path()));
            }
        }
        match newest {
            Some((_, path)) => read_record_file(&path.join(RECORD_FILE)),
            None => Ok(None),
        }
    }

    fn highest_session_number(&self, prefix: &str) -> OrchestratorResult<u64> {
        let marker = format!("{prefix}-");
        let mut highest = 0;
        for dir in [self.sessions_dir(), self.archive_dir()] {
            let entries = fs::read_dir(&dir).map_err(|err| persistence(&dir, "read", err))?;
            for entry in entries {
                let entry = entry.map_err(|err| persistence(&dir, "read", err))?;
                let name = entry.file_name().to_string_lossy().to_string();
                let Some(rest) = name.strip_prefix(&marker) else {
                    continue;
                };
                let number = rest.split('-').next().and_then(|n| n.parse::<u64>().ok());
                if let Some(number) = number {
                    highest = highest.max(number);
                }
            }
        }
        Ok(highest)
    }

    fn sessions_dir(&self) -> PathBuf {
        self.root.join(SESSIONS_DIR)
    }

    fn archive_dir(&self) -> PathBuf {
        self.root.join(ARCHIVE_DIR)
    }

    fn session_dir(&self, id: &SessionId) -> OrchestratorResult<PathBuf> {
        if !is_safe_id(id.as_str()) {
            return Err(OrchestratorError::NotFound(id.as_str().to_owned()));
        }
        Ok(self.sessions_dir().join(id.as_str()))
    }
}

fn read_record_file(path: &Path) -> OrchestratorResult<Option<SessionRecord>> {
    match fs::read_to_string(path) {
        Ok(raw) => SessionRecord::decode(&raw).map(Some),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(persistence(path, "read", err)),
    }
}

fn is_safe_id(value: &str) -> bool {
    !value.is_empty()
        && value != "."
        && value != ".."
        && value
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' || ch == '.')
}

/// RFC 3339 UTC timestamp used in records, events, and ledger lines.
pub fn now_timestamp() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| format!("{}", now_nanos() / 1_000_000_000))
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn now_nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
}
