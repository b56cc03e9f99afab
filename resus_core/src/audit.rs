//! Audit record export.
//!
//! The plain-text record lists every log entry with its elapsed time since
//! session start as `[mm:ss]`, then the diagnosis and summary counts. The
//! same log can be written as CSV for spreadsheets.

use crate::types::LogEntry;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write as _;
use std::fs::File;
use std::path::Path;
use uuid::Uuid;

const RULE: &str = "----------------------------------------";

#[derive(Clone, Copy, Debug, Default, Serialize, PartialEq, Eq)]
pub struct AuditSummary {
    pub threats: usize,
    pub interventions: usize,
    pub safety_alerts: usize,
}

/// Everything above the event lines
#[derive(Clone, Debug, PartialEq)]
pub struct AuditHeader {
    pub engine: &'static str,
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    /// Omitted when the export is configured without patient details
    pub patient: Option<String>,
    pub diagnosis: Option<String>,
}

/// Elapsed time as `mm:ss`; minutes keep counting past 59
pub fn format_elapsed(started_at: DateTime<Utc>, at: DateTime<Utc>) -> String {
    let seconds = (at - started_at).num_seconds().max(0);
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

/// Parse a `[mm:ss]` prefix back into seconds
pub fn parse_elapsed(line: &str) -> Option<u64> {
    let inner = line.strip_prefix('[')?;
    let (stamp, _) = inner.split_once(']')?;
    let (minutes, seconds) = stamp.split_once(':')?;
    let minutes: u64 = minutes.parse().ok()?;
    let seconds: u64 = seconds.parse().ok()?;
    if seconds >= 60 {
        return None;
    }
    Some(minutes * 60 + seconds)
}

/// Elapsed seconds of every event line in a rendered record, in order
pub fn read_elapsed_times(record: &str) -> Vec<u64> {
    record.lines().filter_map(parse_elapsed).collect()
}

fn event_line(started_at: DateTime<Utc>, entry: &LogEntry) -> String {
    let elapsed = format_elapsed(started_at, entry.timestamp);
    match entry.letter {
        Some(letter) => format!(
            "[{}] {} [{}] {}",
            elapsed,
            entry.kind.label(),
            letter,
            entry.detail
        ),
        None => format!("[{}] {} {}", elapsed, entry.kind.label(), entry.detail),
    }
}

/// Render the plain-text audit record
pub fn render_audit(header: &AuditHeader, log: &[LogEntry], summary: &AuditSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "RESUSCITATION RECORD ({})", header.engine);
    let _ = writeln!(out, "Session: {}", header.session_id);
    let _ = writeln!(
        out,
        "Started: {}",
        header.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    if let Some(patient) = &header.patient {
        let _ = writeln!(out, "Patient: {}", patient);
    }
    let _ = writeln!(out, "{}", RULE);

    for entry in log {
        let _ = writeln!(out, "{}", event_line(header.started_at, entry));
    }

    let _ = writeln!(out, "{}", RULE);
    if let Some(diagnosis) = &header.diagnosis {
        let _ = writeln!(out, "Diagnosis: {}", diagnosis);
    }
    let _ = writeln!(
        out,
        "Threats: {}  Interventions: {}  Safety alerts: {}",
        summary.threats, summary.interventions, summary.safety_alerts
    );
    out
}

/// A row in the CSV output
#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    elapsed: String,
    timestamp: String,
    kind: &'static str,
    letter: Option<String>,
    detail: &'a str,
}

/// Write the event log as CSV, replacing any existing file.
///
/// Returns the number of rows written.
pub fn write_csv(path: &Path, started_at: DateTime<Utc>, log: &[LogEntry]) -> Result<usize> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = File::create(path)?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(true)
        .from_writer(file);

    for entry in log {
        writer.serialize(CsvRow {
            elapsed: format_elapsed(started_at, entry.timestamp),
            timestamp: entry.timestamp.to_rfc3339(),
            kind: entry.kind.label(),
            letter: entry.letter.map(|l| l.to_string()),
            detail: &entry.detail,
        })?;
    }

    writer.flush()?;
    let file = writer
        .into_inner()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
    file.sync_all()?;

    tracing::info!("Wrote {} events to {:?}", log.len(), path);
    Ok(log.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pathways::get_default_registry;
    use crate::machine::{create_session_at, transition_at};
    use crate::types::{EventKind, Input, Letter, PatientContext};
    use chrono::Duration;

    fn header(started_at: DateTime<Utc>) -> AuditHeader {
        AuditHeader {
            engine: "pathway",
            session_id: Uuid::new_v4(),
            started_at,
            patient: Some("20 kg, 5 years, medical".into()),
            diagnosis: Some("Anaphylaxis".into()),
        }
    }

    #[test]
    fn test_format_elapsed() {
        let t0 = Utc::now();
        assert_eq!(format_elapsed(t0, t0), "00:00");
        assert_eq!(format_elapsed(t0, t0 + Duration::seconds(75)), "01:15");
        assert_eq!(format_elapsed(t0, t0 + Duration::seconds(6000)), "100:00");
        assert_eq!(format_elapsed(t0, t0 - Duration::seconds(5)), "00:00");
    }

    #[test]
    fn test_parse_elapsed() {
        assert_eq!(parse_elapsed("[01:15] STEP done"), Some(75));
        assert_eq!(parse_elapsed("[100:00] STEP done"), Some(6000));
        assert_eq!(parse_elapsed("Session: abc"), None);
        assert_eq!(parse_elapsed("[01:75] bad"), None);
    }

    #[test]
    fn test_render_includes_letters_diagnosis_and_counts() {
        let t0 = Utc::now();
        let log = vec![LogEntry {
            timestamp: t0 + Duration::seconds(42),
            kind: EventKind::Finding,
            letter: Some(Letter::B),
            detail: "b_wheeze = yes".into(),
        }];
        let summary = AuditSummary {
            threats: 2,
            interventions: 3,
            safety_alerts: 1,
        };
        let text = render_audit(&header(t0), &log, &summary);

        assert!(text.contains("[00:42] FINDING [B] b_wheeze = yes"));
        assert!(text.contains("Patient: 20 kg, 5 years, medical"));
        assert!(text.contains("Diagnosis: Anaphylaxis"));
        assert!(text.contains("Threats: 2  Interventions: 3  Safety alerts: 1"));
    }

    #[test]
    fn test_exported_elapsed_times_follow_dispatch_order() {
        let registry = get_default_registry();
        let t0 = Utc::now();
        let mut s = create_session_at(PatientContext::new(Some(20.0), None, false), t0);
        let inputs = [
            Input::answer("breathing", "yes"),
            Input::answer("pulse", "yes"),
            Input::answer("consciousness", "voice"),
            Input::select_pathway("allergic"),
            Input::step_done(),
            Input::improving(false),
            Input::step_done(),
        ];
        for (i, input) in inputs.iter().enumerate() {
            s = transition_at(&s, input, registry, t0 + Duration::seconds(30 * (i as i64 + 1)));
        }

        let text = render_audit(&header(t0), &s.log, &AuditSummary::default());
        let times = read_elapsed_times(&text);

        assert_eq!(times.len(), s.log.len());
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*times.last().unwrap(), 30 * inputs.len() as u64);
    }

    #[test]
    fn test_write_csv() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("exports").join("case.csv");
        let t0 = Utc::now();
        let log = vec![
            LogEntry {
                timestamp: t0,
                kind: EventKind::SessionStart,
                letter: None,
                detail: "start".into(),
            },
            LogEntry {
                timestamp: t0 + Duration::seconds(5),
                kind: EventKind::Threat,
                letter: Some(Letter::A),
                detail: "Airway obstruction, critical".into(),
            },
        ];

        assert_eq!(write_csv(&path, t0, &log).unwrap(), 2);

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(
            headers.iter().collect::<Vec<_>>(),
            vec!["elapsed", "timestamp", "kind", "letter", "detail"]
        );
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[1][0], "00:05");
        assert_eq!(&rows[1][3], "A");
        assert_eq!(&rows[1][4], "Airway obstruction, critical");
    }
}
