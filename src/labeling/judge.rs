//! Blind LLM judge.
//!
//! The judge sees only the rubric, the prompt text, and the response text.
//! Scenario and frame metadata are deliberately withheld so the verdict
//! cannot be biased by experimental condition.
//!
//! Any call or parse failure downgrades to a safe default
//! (reject, confidence 0, error set). Callers must treat a populated error
//! as "judging failed", not as a real reject verdict.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use super::OutcomeLabel;
use crate::config::JudgeConfig;
use crate::provider::{GenerateRequest, ModelCaller};

pub const MAX_EVIDENCE_SPANS: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum RubricError {
    #[error("rubric not found: {0}")]
    NotFound(PathBuf),
    #[error("io error reading rubric {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub fn load_rubric_text(path: &Path) -> Result<String, RubricError> {
    if !path.exists() {
        return Err(RubricError::NotFound(path.to_path_buf()));
    }
    std::fs::read_to_string(path).map_err(|source| RubricError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeLabel {
    pub label: OutcomeLabel,
    pub confidence: f64,
    pub evidence_spans: Vec<String>,
    pub raw_json: Option<Value>,
    pub error: Option<String>,
}

impl JudgeLabel {
    /// Safe default used whenever the judge call or parse fails.
    fn failed(error: String) -> Self {
        Self {
            label: OutcomeLabel::Reject,
            confidence: 0.0,
            evidence_spans: Vec::new(),
            raw_json: None,
            error: Some(error),
        }
    }
}

/// Build the judge prompt. Only rubric, prompt, and response go in.
fn build_judge_prompt(rubric_text: &str, prompt_text: &str, response_text: &str) -> String {
    format!(
        "{rubric_text}\n\n\
         -----\n\
         prompt_text:\n<<<\n{prompt_text}\n>>>\n\n\
         response_text:\n<<<\n{response_text}\n>>>\n\n\
         Return ONLY the JSON object.\n"
    )
}

/// Issue one judge call and parse its structured verdict.
pub async fn judge_blind_label(
    caller: &ModelCaller,
    judge_cfg: &JudgeConfig,
    rubric_text: &str,
    prompt_text: &str,
    response_text: &str,
) -> JudgeLabel {
    let req = GenerateRequest {
        model: judge_cfg.model.clone(),
        prompt_text: build_judge_prompt(rubric_text, prompt_text, response_text),
        temperature: judge_cfg.temperature,
        max_tokens: judge_cfg.max_tokens,
        top_p: judge_cfg.top_p,
    };

    let outcome = caller.call(&req).await;
    let resp = match outcome.result {
        Ok(resp) => resp,
        Err(err) => {
            warn!(error = %err, "judge call failed");
            return JudgeLabel::failed(format!("{}: {err}", err.code()));
        }
    };

    match parse_judge_output(&resp.text) {
        Ok(label) => label,
        Err(reason) => {
            warn!(reason = %reason, "judge output parse failed");
            JudgeLabel::failed(format!("parse_error: {reason}"))
        }
    }
}

/// Two-phase validation: extract the brace-delimited span, then check
/// required fields and coerce numeric ranges.
pub fn parse_judge_output(text: &str) -> Result<JudgeLabel, String> {
    let obj = extract_json_object(text)?;

    let label_str = obj
        .get("label")
        .and_then(Value::as_str)
        .ok_or_else(|| "missing 'label'".to_string())?;
    let label = OutcomeLabel::parse(label_str)
        .ok_or_else(|| format!("invalid label: {label_str}"))?;

    let confidence = obj
        .get("confidence")
        .and_then(Value::as_f64)
        .ok_or_else(|| "missing 'confidence'".to_string())?
        .clamp(0.0, 1.0);

    // Non-list evidence is discarded, not an error.
    let evidence_spans = obj
        .get("evidence_spans")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .take(MAX_EVIDENCE_SPANS)
                .map(|v| match v.as_str() {
                    Some(s) => s.to_string(),
                    None => v.to_string(),
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(JudgeLabel {
        label,
        confidence,
        evidence_spans,
        raw_json: Some(obj),
        error: None,
    })
}

/// Best-effort extraction: strip fences, then take first `{` to last `}`.
fn extract_json_object(text: &str) -> Result<Value, String> {
    let mut s = text.trim();
    if s.starts_with("```") {
        // Drop the fence characters; a leading `json` tag falls outside the
        // brace span so the slice below handles it.
        s = s.trim_matches('`');
    }
    let start = s.find('{').ok_or_else(|| "no JSON object found".to_string())?;
    let end = s.rfind('}').ok_or_else(|| "no JSON object found".to_string())?;
    if end <= start {
        return Err("no JSON object found".to_string());
    }
    serde_json::from_str(&s[start..=end]).map_err(|e| e.to_string())
}
