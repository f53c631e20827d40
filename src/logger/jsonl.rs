//! Consolidation journal: append-only line-delimited JSON.
//!
//! Each line is one self-contained JSON object, assembled in memory and
//! written with a single `write_all` so a concurrent `tail -f` never sees a
//! partial line.
//!
//! Degradation chain:
//! 1. Journal file
//! 2. stderr with `[PMS-JSONL]` prefix
//! 3. Silent discard (journaling never fails a consolidation)

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions, rename};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::config::Config;
use crate::core::errors::{ProbeError, Result};
use crate::stats::consolidate::{BackfillReport, DayOutcome};

/// Severity level for journal events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    DayConsolidated,
    BackfillStart,
    BackfillComplete,
    BackfillAbort,
    StatsCleared,
    Error,
}

/// A single journal line. Only `ts`, `event` and `severity` are always present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// ISO 8601 UTC timestamp.
    pub ts: String,
    pub event: EventType,
    pub severity: Severity,
    /// Local day concerned, `YYYY-MM-DD`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub day: Option<String>,
    /// Devices seen that day.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub devices: Option<u64>,
    /// Summary rows written.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
    /// `PMS-xxxx` code when the action failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Freeform details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl LogEntry {
    /// Create a new entry stamped with the current UTC time.
    pub fn new(event: EventType, severity: Severity) -> Self {
        Self {
            ts: format_utc_now(),
            event,
            severity,
            day: None,
            devices: None,
            rows: None,
            duration_ms: None,
            ok: None,
            error_code: None,
            error_message: None,
            details: None,
        }
    }

    pub fn day_consolidated(outcome: &DayOutcome) -> Self {
        let mut entry = Self::new(EventType::DayConsolidated, Severity::Info);
        entry.day = Some(outcome.day.to_string());
        entry.devices = Some(outcome.devices as u64);
        entry.rows = Some(outcome.rows_written as u64);
        entry.duration_ms = Some(u64::try_from(outcome.duration.as_millis()).unwrap_or(u64::MAX));
        entry.ok = Some(true);
        entry
    }

    pub fn backfill_complete(report: &BackfillReport) -> Self {
        let mut entry = Self::new(EventType::BackfillComplete, Severity::Info);
        entry.rows = Some(report.rows_written() as u64);
        entry.ok = Some(true);
        entry.details = Some(match report.range {
            Some((first, last)) => format!("{} day(s) from {first} to {last}", report.days.len()),
            None => "no events to consolidate".to_string(),
        });
        entry
    }

    /// A failed action. Backfill aborts name their day.
    pub fn failure(error: &ProbeError) -> Self {
        let (event, day) = match error {
            ProbeError::BackfillAborted { day, .. } => (EventType::BackfillAbort, Some(day.to_string())),
            _ => (EventType::Error, None),
        };
        let mut entry = Self::new(event, Severity::Critical);
        entry.day = day;
        entry.ok = Some(false);
        entry.error_code = Some(error.code().to_string());
        entry.error_message = Some(error.to_string());
        entry
    }
}

/// Degradation state of the writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Normal,
    Stderr,
    Discard,
}

/// Settings for the journal writer.
#[derive(Debug, Clone)]
pub struct JsonlConfig {
    pub path: PathBuf,
    /// Rotate once the file would grow past this many bytes.
    pub max_size_bytes: u64,
    /// Rotated files kept next to the journal.
    pub max_rotated_files: u32,
}

impl JsonlConfig {
    /// Journal settings from the loaded configuration, if journaling is on.
    pub fn from_config(config: &Config) -> Option<Self> {
        config.journal.enabled.then(|| Self {
            path: config.paths.journal.clone(),
            max_size_bytes: config.journal.max_size_bytes,
            max_rotated_files: config.journal.max_rotated_files,
        })
    }
}

/// Append-only JSONL writer with rotation and fallback to stderr.
pub struct JsonlWriter {
    config: JsonlConfig,
    writer: Option<BufWriter<File>>,
    state: WriterState,
    bytes_written: u64,
}

impl JsonlWriter {
    /// Open the journal. Falls through the degradation chain on failure.
    pub fn open(config: JsonlConfig) -> Self {
        let mut w = Self {
            config,
            writer: None,
            state: WriterState::Discard,
            bytes_written: 0,
        };
        w.try_open_primary();
        w
    }

    /// Write a single entry as one JSONL line.
    pub fn write_entry(&mut self, entry: &LogEntry) {
        let line = match serde_json::to_string(entry) {
            Ok(json) => format!("{json}\n"),
            Err(e) => {
                let _ = writeln!(io::stderr(), "[PMS-JSONL] serialize error: {e}");
                return;
            }
        };
        self.write_line(&line);
    }

    pub fn flush(&mut self) {
        if let Some(w) = self.writer.as_mut() {
            let _ = w.flush();
        }
    }

    /// Current degradation state.
    pub fn state(&self) -> &str {
        match self.state {
            WriterState::Normal => "normal",
            WriterState::Stderr => "stderr",
            WriterState::Discard => "discard",
        }
    }

    /// Bytes in the current journal file.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    // ──────────────────────── internals ────────────────────────

    fn write_line(&mut self, line: &str) {
        if self.bytes_written + line.len() as u64 > self.config.max_size_bytes
            && self.state == WriterState::Normal
        {
            self.rotate();
        }

        match self.state {
            WriterState::Normal => {
                if let Some(w) = self.writer.as_mut() {
                    if w.write_all(line.as_bytes()).is_err() {
                        self.degrade();
                        self.write_line(line);
                        return;
                    }
                    self.bytes_written += line.len() as u64;
                } else {
                    self.degrade();
                    self.write_line(line);
                }
            }
            WriterState::Stderr => {
                if write!(io::stderr(), "[PMS-JSONL] {line}").is_err() {
                    self.degrade();
                }
            }
            WriterState::Discard => {}
        }
    }

    fn try_open_primary(&mut self) {
        match open_append(&self.config.path) {
            Ok((file, size)) => {
                self.writer = Some(BufWriter::new(file));
                self.state = WriterState::Normal;
                self.bytes_written = size;
            }
            Err(e) => {
                self.state = WriterState::Stderr;
                let _ = writeln!(io::stderr(), "[PMS-JSONL] journal unavailable, using stderr: {e}");
            }
        }
    }

    fn degrade(&mut self) {
        self.writer = None;
        self.state = match self.state {
            WriterState::Normal => {
                let _ = writeln!(io::stderr(), "[PMS-JSONL] journal write failed, using stderr");
                WriterState::Stderr
            }
            WriterState::Stderr | WriterState::Discard => WriterState::Discard,
        };
    }

    fn rotate(&mut self) {
        if let Some(w) = self.writer.as_mut() {
            let _ = w.flush();
        }
        self.writer = None;

        let base = self.config.path.clone();
        // .N-1 → .N, …, .1 → .2, then current → .1
        for i in (1..self.config.max_rotated_files).rev() {
            let _ = rename(rotated_name(&base, i), rotated_name(&base, i + 1));
        }
        if self.config.max_rotated_files == 0 {
            let _ = fs::remove_file(&base);
        } else {
            let _ = rename(&base, rotated_name(&base, 1));
        }

        match open_append(&base) {
            Ok((file, _)) => {
                self.writer = Some(BufWriter::new(file));
                self.bytes_written = 0;
            }
            Err(_) => self.degrade(),
        }
    }
}

impl Drop for JsonlWriter {
    fn drop(&mut self) {
        self.flush();
    }
}

/// Journal handle that may be switched off by configuration.
pub struct Journal {
    writer: Option<JsonlWriter>,
}

impl Journal {
    pub fn from_config(config: &Config) -> Self {
        Self {
            writer: JsonlConfig::from_config(config).map(JsonlWriter::open),
        }
    }

    pub fn disabled() -> Self {
        Self { writer: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.writer.is_some()
    }

    pub fn record(&mut self, entry: &LogEntry) {
        if let Some(w) = self.writer.as_mut() {
            w.write_entry(entry);
        }
    }

    pub fn flush(&mut self) {
        if let Some(w) = self.writer.as_mut() {
            w.flush();
        }
    }
}

// ──────────────────────── helpers ────────────────────────

/// Open or create a file for appending. Returns `(File, current_size)`.
fn open_append(path: &Path) -> Result<(File, u64)> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|source| ProbeError::io(parent, source))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| ProbeError::io(path, source))?;
    let size = file.metadata().map(|m| m.len()).unwrap_or(0);
    Ok((file, size))
}

/// `consolidate.jsonl` → `consolidate.jsonl.3`.
fn rotated_name(base: &Path, index: u32) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

fn format_utc_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::time::Duration;

    fn config(path: PathBuf, max_size_bytes: u64) -> JsonlConfig {
        JsonlConfig {
            path,
            max_size_bytes,
            max_rotated_files: 3,
        }
    }

    fn outcome() -> DayOutcome {
        DayOutcome {
            day: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            devices: 4,
            rows_written: 3,
            duration: Duration::from_millis(15),
        }
    }

    #[test]
    fn day_entry_is_one_json_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");
        let mut writer = JsonlWriter::open(config(path.clone(), 1024 * 1024));
        writer.write_entry(&LogEntry::day_consolidated(&outcome()));
        writer.flush();

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 1);
        let parsed: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed["event"], "day_consolidated");
        assert_eq!(parsed["severity"], "info");
        assert_eq!(parsed["day"], "2024-01-02");
        assert_eq!(parsed["rows"], 3);
        assert_eq!(parsed["duration_ms"], 15);
    }

    #[test]
    fn abort_entry_names_day_and_code() {
        let err = ProbeError::BackfillAborted {
            day: NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(),
            source: Box::new(ProbeError::MissingTable { table: "stats" }),
        };
        let entry = LogEntry::failure(&err);
        assert_eq!(entry.event, EventType::BackfillAbort);
        assert_eq!(entry.day.as_deref(), Some("2024-01-03"));
        assert_eq!(entry.error_code.as_deref(), Some("PMS-2005"));
        assert_eq!(entry.ok, Some(false));

        let plain = LogEntry::failure(&ProbeError::MissingTable { table: "stats" });
        assert_eq!(plain.event, EventType::Error);
        assert!(plain.day.is_none());
    }

    #[test]
    fn optional_fields_omitted_when_none() {
        let line = serde_json::to_string(&LogEntry::new(EventType::StatsCleared, Severity::Info))
            .unwrap();
        assert!(!line.contains("\"day\""));
        assert!(!line.contains("\"rows\""));
        assert!(!line.contains("\"error_code\""));
    }

    #[test]
    fn appends_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("journal.jsonl");
        for _ in 0..2 {
            let mut writer = JsonlWriter::open(config(path.clone(), 1024 * 1024));
            writer.write_entry(&LogEntry::new(EventType::BackfillStart, Severity::Info));
        }
        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }

    #[test]
    fn rotation_shifts_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rot.jsonl");
        let mut writer = JsonlWriter::open(config(path.clone(), 100));
        for _ in 0..10 {
            writer.write_entry(&LogEntry::day_consolidated(&outcome()));
        }
        writer.flush();
        assert!(path.exists());
        assert!(rotated_name(&path, 1).exists());
        assert!(!rotated_name(&path, 4).exists());
    }

    #[test]
    fn unwritable_path_degrades_to_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, b"x").unwrap();
        let mut writer = JsonlWriter::open(config(blocker.join("journal.jsonl"), 1024));
        assert_eq!(writer.state(), "stderr");
        writer.write_entry(&LogEntry::new(EventType::Error, Severity::Warning));
        assert_eq!(writer.state(), "stderr");
    }

    #[test]
    fn disabled_journal_writes_nothing() {
        let mut journal = Journal::disabled();
        assert!(!journal.is_enabled());
        journal.record(&LogEntry::new(EventType::StatsCleared, Severity::Info));
        journal.flush();
    }

    #[test]
    fn journal_follows_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = Config::default();
        cfg.paths.journal = dir.path().join("j.jsonl");
        let mut journal = Journal::from_config(&cfg);
        assert!(journal.is_enabled());
        journal.record(&LogEntry::new(EventType::StatsCleared, Severity::Info));
        journal.flush();
        assert!(cfg.paths.journal.exists());

        cfg.journal.enabled = false;
        assert!(!Journal::from_config(&cfg).is_enabled());
    }
}
