//! Flat CSV export of a run: raw attempts joined with their latest labels.
//!
//! The export is derived and disposable; the JSONL logs stay the source of
//! truth. Rows keep the raw log's file order, and when an attempt was
//! labeled more than once (a resumed run relabels on fresh execution only,
//! but sweeps may append), the last label record wins.

use std::path::Path;

use serde_json::Value;

use crate::jsonl::{latest_labels_by_attempt_id, read_jsonl, LogError};

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Log(#[from] LogError),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

/// Canonical column order, stable for downstream analysis.
pub const CSV_COLUMNS: &[&str] = &[
    // identity
    "run_id",
    "attempt_id",
    "scenario_id",
    "trench",
    "frame_id",
    "replicate",
    // model params
    "provider",
    "model",
    "temperature",
    "max_tokens",
    "top_p",
    // timing
    "started_at",
    "completed_at",
    "latency_ms",
    // inputs
    "prompt_text",
    "prompt_hash",
    // outputs
    "response_text",
    "stop_reason",
    "input_tokens",
    "output_tokens",
    "provider_request_id",
    // labels
    "heuristic_label",
    "judge_label",
    "judge_confidence",
    "judge_evidence_spans",
    "final_label",
    "needs_review",
    "label_reason",
    // ops
    "error_type",
    "error_message",
    "retry_count",
    "code_version",
];

fn render_cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Number(n)) => n.to_string(),
        // Lists (evidence spans) and nested objects render as JSON text.
        Some(other) => other.to_string(),
    }
}

/// Join `attempts_raw.jsonl` with the latest labels and write `out_csv`.
///
/// Returns the number of data rows written. Attempts without a label record
/// get empty label columns rather than being dropped.
pub fn export_csv(
    raw_path: &Path,
    labels_path: &Path,
    out_csv: &Path,
) -> Result<usize, ExportError> {
    let raw_records = read_jsonl(raw_path)?;
    let labels = latest_labels_by_attempt_id(labels_path)?;

    if let Some(parent) = out_csv.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Always)
        .from_path(out_csv)?;
    writer.write_record(CSV_COLUMNS)?;

    let mut rows = 0usize;
    for raw in &raw_records {
        let label = raw
            .get("attempt_id")
            .and_then(Value::as_str)
            .and_then(|id| labels.get(id));
        let row: Vec<String> = CSV_COLUMNS
            .iter()
            .map(|col| {
                // Label fields shadow raw fields for shared keys like run_id.
                let value = label
                    .and_then(|l| l.get(*col))
                    .or_else(|| raw.get(*col));
                render_cell(value)
            })
            .collect();
        writer.write_record(&row)?;
        rows += 1;
    }
    writer.flush()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn write_lines(path: &Path, lines: &[&str]) {
        let mut f = std::fs::File::create(path).unwrap();
        for line in lines {
            writeln!(f, "{line}").unwrap();
        }
    }

    #[test]
    fn export_joins_latest_labels() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("attempts_raw.jsonl");
        let labels = dir.path().join("attempts_labels.jsonl");
        let out = dir.path().join("attempts.csv");

        write_lines(
            &raw,
            &[
                r#"{"run_id": "r", "attempt_id": "a1", "response_text": "ok", "retry_count": 0}"#,
                r#"{"run_id": "r", "attempt_id": "a2", "response_text": "ok", "retry_count": 1}"#,
            ],
        );
        write_lines(
            &labels,
            &[
                r#"{"attempt_id": "a1", "final_label": "reject", "needs_review": false}"#,
                r#"{"attempt_id": "a1", "final_label": "accept", "needs_review": false}"#,
            ],
        );

        let rows = export_csv(&raw, &labels, &out).unwrap();
        assert_eq!(rows, 2);

        let text = std::fs::read_to_string(&out).unwrap();
        let mut lines = text.lines();
        let header = lines.next().unwrap();
        assert!(header.starts_with(r#""run_id","attempt_id""#));

        let a1 = lines.next().unwrap();
        // Latest label wins.
        assert!(a1.contains(r#""accept""#));
        assert!(!a1.contains(r#""reject""#));

        // Unlabeled attempt keeps empty label columns but is not dropped.
        let a2 = lines.next().unwrap();
        assert!(a2.contains(r#""a2""#));
    }

    #[test]
    fn missing_labels_file_exports_raw_only() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("attempts_raw.jsonl");
        let out = dir.path().join("attempts.csv");
        write_lines(&raw, &[r#"{"run_id": "r", "attempt_id": "a1"}"#]);

        let rows = export_csv(&raw, &dir.path().join("absent.jsonl"), &out).unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn evidence_spans_render_as_json_text() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("attempts_raw.jsonl");
        let labels = dir.path().join("attempts_labels.jsonl");
        let out = dir.path().join("attempts.csv");

        write_lines(&raw, &[r#"{"attempt_id": "a1"}"#]);
        write_lines(
            &labels,
            &[r#"{"attempt_id": "a1", "judge_evidence_spans": ["quoted span"]}"#],
        );

        export_csv(&raw, &labels, &out).unwrap();
        let text = std::fs::read_to_string(&out).unwrap();
        assert!(text.contains(r#"[""quoted span""]"#));
    }
}
