//! Append-only JSONL persistence for run logs.
//!
//! Writes go through a channel to a dedicated writer thread so concurrent
//! workers never interleave partial lines; each record is one atomic
//! newline-terminated append. Readers are tolerant: malformed lines are
//! skipped, never fatal, so a truncated log from a crashed run still resumes.

use std::collections::{HashMap, HashSet};
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::mpsc;

use serde::Serialize;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(String),
    #[error("log channel closed")]
    Closed,
    #[error("log writer failed: {0}")]
    Join(String),
}

/// Handle for appending records to one JSONL file.
///
/// Clone freely; all clones feed the same writer thread.
#[derive(Clone)]
pub struct JsonlSink {
    sender: mpsc::Sender<String>,
}

/// Owns the writer thread; join it after all sinks are dropped to surface
/// any I/O error and guarantee the file is flushed.
pub struct LogWorker {
    handle: Option<std::thread::JoinHandle<Result<(), LogError>>>,
}

impl LogWorker {
    pub fn join(mut self) -> Result<(), LogError> {
        match self.handle.take() {
            Some(handle) => match handle.join() {
                Ok(result) => result,
                Err(_) => Err(LogError::Join("log writer panicked".to_string())),
            },
            None => Ok(()),
        }
    }
}

impl JsonlSink {
    /// Open `path` for appending, creating parent directories as needed.
    pub fn append(path: impl AsRef<Path>) -> Result<(Self, LogWorker), LogError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let (sender, receiver) = mpsc::channel::<String>();
        let handle = std::thread::spawn(move || write_loop(file, receiver));
        Ok((
            Self { sender },
            LogWorker {
                handle: Some(handle),
            },
        ))
    }

    /// Serialize one record and queue it for appending.
    pub fn record<T: Serialize>(&self, record: &T) -> Result<(), LogError> {
        let line = serde_json::to_string(record).map_err(|e| LogError::Serde(e.to_string()))?;
        self.sender.send(line).map_err(|_| LogError::Closed)
    }
}

fn write_loop(file: std::fs::File, receiver: mpsc::Receiver<String>) -> Result<(), LogError> {
    let mut writer = BufWriter::new(file);
    for line in receiver {
        writeln!(writer, "{line}")?;
        // Flush per record: a crashed run must keep every completed attempt.
        writer.flush()?;
    }
    writer.flush()?;
    Ok(())
}

/// Read all well-formed JSON object lines from a JSONL file.
///
/// A missing file yields an empty vec; malformed lines are skipped.
pub fn read_jsonl(path: &Path) -> Result<Vec<Value>, LogError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = std::fs::File::open(path)?;
    let reader = BufReader::new(file);
    let mut out = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(trimmed) {
            Ok(v) if v.is_object() => out.push(v),
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(error = %e, "skipping malformed log line");
            }
        }
    }
    Ok(out)
}

/// Attempt identities already recorded in the raw log (success or failure).
///
/// Read once before scheduling; a restarted run skips these.
pub fn load_existing_attempt_ids(raw_path: &Path) -> Result<HashSet<String>, LogError> {
    let mut out = HashSet::new();
    for rec in read_jsonl(raw_path)? {
        if let Some(id) = rec.get("attempt_id").and_then(Value::as_str) {
            out.insert(id.to_string());
        }
    }
    Ok(out)
}

/// Latest label record per attempt id (last-write-wins by file order).
pub fn latest_labels_by_attempt_id(labels_path: &Path) -> Result<HashMap<String, Value>, LogError> {
    let mut latest = HashMap::new();
    for rec in read_jsonl(labels_path)? {
        if let Some(id) = rec.get("attempt_id").and_then(Value::as_str) {
            latest.insert(id.to_string(), rec);
        }
    }
    Ok(latest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write as _;

    #[test]
    fn sink_appends_one_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");

        let (sink, worker) = JsonlSink::append(&path).unwrap();
        sink.record(&json!({"attempt_id": "a"})).unwrap();
        sink.record(&json!({"attempt_id": "b"})).unwrap();
        drop(sink);
        worker.join().unwrap();

        let records = read_jsonl(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["attempt_id"], "a");
        assert_eq!(records[1]["attempt_id"], "b");
    }

    #[test]
    fn append_mode_preserves_existing_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");

        let (sink, worker) = JsonlSink::append(&path).unwrap();
        sink.record(&json!({"attempt_id": "a"})).unwrap();
        drop(sink);
        worker.join().unwrap();

        let (sink, worker) = JsonlSink::append(&path).unwrap();
        sink.record(&json!({"attempt_id": "b"})).unwrap();
        drop(sink);
        worker.join().unwrap();

        let ids = load_existing_attempt_ids(&path).unwrap();
        assert!(ids.contains("a") && ids.contains("b"));
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, r#"{{"attempt_id": "good"}}"#).unwrap();
        writeln!(f, "not json at all").unwrap();
        writeln!(f, r#"{{"attempt_id": "also_good"}}"#).unwrap();

        let ids = load_existing_attempt_ids(&path).unwrap();
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.jsonl");
        assert!(read_jsonl(&path).unwrap().is_empty());
        assert!(load_existing_attempt_ids(&path).unwrap().is_empty());
    }

    #[test]
    fn latest_label_wins_per_attempt_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels.jsonl");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, r#"{{"attempt_id": "a", "final_label": "reject"}}"#).unwrap();
        writeln!(f, r#"{{"attempt_id": "a", "final_label": "accept"}}"#).unwrap();

        let latest = latest_labels_by_attempt_id(&path).unwrap();
        assert_eq!(latest["a"]["final_label"], "accept");
    }
}
