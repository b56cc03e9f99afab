//! Append-only event log for the opaque session store.
//!
//! Each log entry is written as one JSON line tagged with its session id,
//! under an exclusive file lock so concurrent writers never interleave.

use crate::types::LogEntry;
use crate::Result;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// One line of the event log
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EventRecord {
    pub session_id: Uuid,
    pub entry: LogEntry,
}

/// Destination for session log entries
pub trait EventSink {
    fn append(&mut self, session_id: Uuid, entries: &[LogEntry]) -> Result<()>;
}

/// JSONL-based event sink with file locking
pub struct JsonlEventSink {
    path: PathBuf,
}

impl JsonlEventSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_parent_dir(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

impl EventSink for JsonlEventSink {
    fn append(&mut self, session_id: Uuid, entries: &[LogEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        self.ensure_parent_dir()?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.lock_exclusive()?;

        let mut writer = std::io::BufWriter::new(&file);
        for entry in entries {
            let record = EventRecord {
                session_id,
                entry: entry.clone(),
            };
            serde_json::to_writer(&mut writer, &record)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        drop(writer);

        file.unlock()?;
        tracing::debug!("Appended {} events for session {}", entries.len(), session_id);
        Ok(())
    }
}

/// Result of replaying the event log
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EventReplay {
    pub records: Vec<EventRecord>,
    /// 1-based line numbers that could not be parsed
    pub skipped_lines: Vec<usize>,
}

/// Only the session tag of a line, so other sessions' entries are never decoded
#[derive(Deserialize)]
struct SessionTag {
    session_id: Uuid,
}

/// Replay the event log in file order, optionally for one session only.
///
/// Lines are matched on their session tag first; only matching lines are
/// decoded in full. Unparseable lines are skipped and reported.
pub fn replay_events(path: &Path, session_id: Option<Uuid>) -> Result<EventReplay> {
    let mut replay = EventReplay::default();
    if !path.exists() {
        return Ok(replay);
    }

    let file = File::open(path)?;
    file.lock_shared()?;
    let lines: Vec<String> = BufReader::new(&file).lines().collect::<std::io::Result<_>>()?;
    file.unlock()?;

    for (idx, line) in lines.iter().enumerate().filter(|(_, l)| !l.trim().is_empty()) {
        let wanted = match serde_json::from_str::<SessionTag>(line) {
            Ok(tag) => session_id.map_or(true, |id| id == tag.session_id),
            Err(_) => true,
        };
        if !wanted {
            continue;
        }
        match serde_json::from_str::<EventRecord>(line) {
            Ok(record) => replay.records.push(record),
            Err(e) => {
                tracing::warn!("Skipping unreadable event at line {}: {}", idx + 1, e);
                replay.skipped_lines.push(idx + 1);
            }
        }
    }

    tracing::debug!(
        "Replayed {} events ({} skipped) from {:?}",
        replay.records.len(),
        replay.skipped_lines.len(),
        path
    );
    Ok(replay)
}

/// Events belonging to one session, in file order
pub fn read_session_events(path: &Path, session_id: Uuid) -> Result<Vec<LogEntry>> {
    Ok(replay_events(path, Some(session_id))?
        .records
        .into_iter()
        .map(|r| r.entry)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventKind;
    use chrono::Utc;

    fn entry(detail: &str) -> LogEntry {
        LogEntry {
            timestamp: Utc::now(),
            kind: EventKind::StepCompleted,
            letter: None,
            detail: detail.into(),
        }
    }

    #[test]
    fn test_append_and_read_back() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("events.jsonl");
        let id = Uuid::new_v4();

        let mut sink = JsonlEventSink::new(&path);
        sink.append(id, &[entry("first"), entry("second")]).unwrap();

        let records = replay_events(&path, None).unwrap().records;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].session_id, id);
        assert_eq!(records[1].entry.detail, "second");
    }

    #[test]
    fn test_filters_by_session() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("events.jsonl");
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        let mut sink = JsonlEventSink::new(&path);
        sink.append(a, &[entry("a1")]).unwrap();
        sink.append(b, &[entry("b1")]).unwrap();
        sink.append(a, &[entry("a2")]).unwrap();

        let details: Vec<_> = read_session_events(&path, a)
            .unwrap()
            .into_iter()
            .map(|e| e.detail)
            .collect();
        assert_eq!(details, vec!["a1", "a2"]);
    }

    #[test]
    fn test_skips_corrupt_lines() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("events.jsonl");

        let mut sink = JsonlEventSink::new(&path);
        sink.append(Uuid::new_v4(), &[entry("good")]).unwrap();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{{ not json").unwrap();
        sink.append(Uuid::new_v4(), &[entry("also good")]).unwrap();

        let replay = replay_events(&path, None).unwrap();
        assert_eq!(replay.records.len(), 2);
        assert_eq!(replay.skipped_lines, vec![2]);
    }

    #[test]
    fn test_other_sessions_are_not_decoded() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("events.jsonl");
        let (mine, other) = (Uuid::new_v4(), Uuid::new_v4());

        let mut sink = JsonlEventSink::new(&path);
        sink.append(mine, &[entry("mine")]).unwrap();
        // Tagged for another session but with an entry this build cannot read
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, r#"{{"session_id":"{}","entry":{{"kind":"future_kind"}}}}"#, other).unwrap();

        let replay = replay_events(&path, Some(mine)).unwrap();
        assert_eq!(replay.records.len(), 1);
        assert!(replay.skipped_lines.is_empty());

        let all = replay_events(&path, None).unwrap();
        assert_eq!(all.records.len(), 1);
        assert_eq!(all.skipped_lines, vec![2]);
    }

    #[test]
    fn test_missing_file_is_empty() {
        let temp_dir = tempfile::tempdir().unwrap();
        let replay = replay_events(&temp_dir.path().join("missing.jsonl"), None).unwrap();
        assert_eq!(replay, EventReplay::default());
    }
}
