// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Append-only JSON-lines files, one per index and UTC day.

use chrono::NaiveDate;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{error, warn};

use crate::clock::SharedClock;
use crate::config::FileConfig;
use crate::entry::LogEntry;
use crate::sinks::retention::RetentionSweeper;
use crate::sinks::{BatchSink, Sink, SinkError};

const NAME: &str = "FILE";
const FALLBACK_INDEX: &str = "log";

/// Lower-cases `raw` and replaces anything outside `[a-z0-9_.-]` with `_`.
#[must_use]
pub fn sanitize_index(raw: &str) -> String {
    let sanitized: String = raw
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '_' | '.' | '-' => c,
            _ => '_',
        })
        .collect();
    if sanitized.is_empty() {
        FALLBACK_INDEX.to_string()
    } else {
        sanitized
    }
}

/// Writes entries to `{directory}/{index}-{YYYY-MM-DD}.jsonl`.
///
/// Entries without an `index` field go to the file named after the sink. I/O failures are
/// logged and the affected entries dropped; this sink never reports an error.
#[derive(Debug)]
pub struct FileSink {
    directory: PathBuf,
    default_index: String,
    retention: RetentionSweeper,
    clock: SharedClock,
}

impl FileSink {
    #[must_use]
    pub fn new(config: &FileConfig, clock: SharedClock) -> Self {
        FileSink {
            directory: config.directory.clone(),
            default_index: sanitize_index(&config.name),
            retention: RetentionSweeper::new(&config.directory, &config.name, config.retention_days),
            clock,
        }
    }

    #[must_use]
    pub fn path_for(&self, index: &str, date: NaiveDate) -> PathBuf {
        self.directory
            .join(format!("{index}-{}.jsonl", date.format("%Y-%m-%d")))
    }

    fn deliver(&mut self, entries: &[&LogEntry]) {
        if entries.is_empty() {
            return;
        }
        if let Err(e) = self.retention.maybe_sweep(self.clock.today()) {
            warn!("{NAME} | Retention sweep failed: {e}");
        }

        let mut groups: Vec<(PathBuf, String)> = Vec::new();
        let mut counts: Vec<usize> = Vec::new();
        for &entry in entries {
            let index = entry
                .target_index()
                .map_or_else(|| self.default_index.clone(), sanitize_index);
            let path = self.path_for(&index, entry.timestamp().date_naive());
            let position = match groups.iter().position(|(existing, _)| *existing == path) {
                Some(position) => position,
                None => {
                    groups.push((path, String::new()));
                    counts.push(0);
                    groups.len() - 1
                }
            };
            let lines = &mut groups[position].1;
            lines.push_str(&entry.to_json_line());
            lines.push('\n');
            counts[position] += 1;
        }

        for ((path, lines), count) in groups.iter().zip(counts) {
            if let Err(e) = append(&self.directory, path, lines) {
                error!(
                    "{NAME} | Dropping {count} log entries for {}: {e}",
                    path.display()
                );
            }
        }
    }
}

fn append(directory: &Path, path: &Path, lines: &str) -> io::Result<()> {
    fs::create_dir_all(directory)?;
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(lines.as_bytes())
}

impl BatchSink for FileSink {
    fn write_batch(&mut self, entries: &[LogEntry]) -> Result<(), SinkError> {
        let entries: Vec<&LogEntry> = entries.iter().collect();
        self.deliver(&entries);
        Ok(())
    }
}

impl Sink for FileSink {
    fn name(&self) -> &str {
        NAME
    }

    fn write(&mut self, entry: &LogEntry) -> Result<(), SinkError> {
        self.deliver(&[entry]);
        Ok(())
    }

    fn as_batch(&mut self) -> Option<&mut dyn BatchSink> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::entry::{field, Fields, Level};
    use chrono::{TimeZone, Utc};
    use duplicate::duplicate_item;
    use serde_json::{json, Value};
    use std::sync::Arc;

    #[duplicate_item(
        test_name                  raw                 expected;
        [test_sanitize_plain]      ["audit"]           ["audit"];
        [test_sanitize_case]       ["  Audit.Log "]    ["audit.log"];
        [test_sanitize_separators] ["app/logs:v1"]     ["app_logs_v1"];
        [test_sanitize_blank]      ["   "]             ["log"];
    )]
    #[test]
    fn test_name() {
        assert_eq!(sanitize_index(raw), expected);
    }

    fn sink(directory: &Path, clock: &ManualClock) -> FileSink {
        FileSink::new(
            &FileConfig {
                directory: directory.to_path_buf(),
                name: "oplog".to_string(),
                retention_days: 14,
            },
            Arc::new(clock.clone()),
        )
    }

    fn entry(message: &str, index: Option<&str>, day: u32) -> LogEntry {
        let mut fields = Fields::new();
        if let Some(index) = index {
            fields.insert(field::INDEX.to_string(), json!(index));
        }
        LogEntry::new(
            "database",
            Level::Info,
            message,
            fields,
            Utc.with_ymd_and_hms(2024, 3, day, 23, 59, 0).unwrap(),
        )
    }

    fn read_lines(path: &Path) -> Vec<Value> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn test_groups_by_index_and_day() {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 20, 0, 0, 0).unwrap());
        let mut sink = sink(&dir.path().join("nested"), &clock);

        sink.write_batch(&[
            entry("a", Some("Audit"), 19),
            entry("b", None, 19),
            entry("c", Some("audit"), 20),
            entry("d", Some("AUDIT"), 19),
        ])
        .unwrap();

        let audit_19 = read_lines(&dir.path().join("nested/audit-2024-03-19.jsonl"));
        let messages: Vec<&str> = audit_19
            .iter()
            .map(|doc| doc["message"].as_str().unwrap())
            .collect();
        assert_eq!(messages, vec!["a", "d"]);
        assert_eq!(
            read_lines(&dir.path().join("nested/oplog-2024-03-19.jsonl")).len(),
            1
        );
        assert_eq!(
            read_lines(&dir.path().join("nested/audit-2024-03-20.jsonl"))[0]["message"],
            "c"
        );
    }

    #[test]
    fn test_appends_across_writes() {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 20, 0, 0, 0).unwrap());
        let mut sink = sink(dir.path(), &clock);

        sink.write(&entry("first", None, 20)).unwrap();
        sink.write(&entry("second", None, 20)).unwrap();

        let docs = read_lines(&sink.path_for("oplog", NaiveDate::from_ymd_opt(2024, 3, 20).unwrap()));
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[1]["message"], "second");
        assert_eq!(docs[0]["@timestamp"], "2024-03-20T23:59:00.000Z");
    }

    #[test]
    fn test_write_prunes_expired_files() {
        let dir = tempfile::tempdir().unwrap();
        let expired = dir.path().join("oplog-2024-03-01.jsonl");
        let kept = dir.path().join("oplog-2024-03-10.jsonl");
        fs::write(&expired, "{}\n").unwrap();
        fs::write(&kept, "{}\n").unwrap();

        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 20, 9, 0, 0).unwrap());
        let mut sink = sink(dir.path(), &clock);
        sink.write(&entry("today", None, 20)).unwrap();

        assert!(!expired.exists());
        assert!(kept.exists());
    }

    #[test]
    fn test_unwritable_directory_drops_entries_quietly() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, "").unwrap();

        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 20, 0, 0, 0).unwrap());
        let mut sink = sink(&blocker, &clock);
        assert!(sink.write(&entry("lost", None, 20)).is_ok());
    }
}
