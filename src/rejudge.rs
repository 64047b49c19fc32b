//! Judge temperature sweep over a sample of an existing run.
//!
//! Re-runs the blind judge at several temperatures on a seeded random sample
//! of successful attempts, without touching `attempts_raw.jsonl`. Results go
//! to a separate sweep log so verdicts can be compared across temperatures.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use serde_json::Value;

use crate::config::{ConfigError, ExperimentConfig, JudgeConfig};
use crate::identity::fingerprint;
use crate::jsonl::{read_jsonl, JsonlSink, LogError};
use crate::labeling::{judge_blind_label, load_rubric_text, OutcomeLabel, RubricError};
use crate::matrix::{format_float, judge_sweep_path, raw_log_path};
use crate::provider::{ModelCaller, ProviderError, RetryPolicy};
use crate::runner::ProviderFactory;

#[derive(Debug, thiserror::Error)]
pub enum RejudgeError {
    #[error("sample size must be >= 1")]
    InvalidSampleSize,
    #[error("no judge temperatures provided")]
    NoTemperatures,
    #[error("invalid temperature: {0}")]
    InvalidTemperature(String),
    #[error("raw log not found: {0}")]
    MissingRawLog(PathBuf),
    #[error("suite has no judge, or the judge is disabled")]
    JudgeDisabled,
    #[error("no successful responses found in {0}")]
    NoCandidates(PathBuf),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Log(#[from] LogError),
    #[error(transparent)]
    Rubric(#[from] RubricError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Parse a comma-separated temperature list, e.g. `"0.0,0.3,0.7"`.
pub fn parse_temps(text: &str) -> Result<Vec<f64>, RejudgeError> {
    let mut out = Vec::new();
    for part in text.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let temp: f64 = part
            .parse()
            .map_err(|_| RejudgeError::InvalidTemperature(part.to_string()))?;
        out.push(temp);
    }
    if out.is_empty() {
        return Err(RejudgeError::NoTemperatures);
    }
    Ok(out)
}

#[derive(Debug)]
pub struct RejudgeOptions {
    pub run_id: String,
    pub n: usize,
    pub seed: u64,
    pub judge_temps: Vec<f64>,
    pub out_path: Option<PathBuf>,
    pub suite: Option<String>,
}

#[derive(Debug, Serialize)]
struct SweepMetaRecord<'a> {
    #[serde(rename = "type")]
    record_type: &'static str,
    sweep_id: &'a str,
    run_id: &'a str,
    created_at: String,
    n_requested: usize,
    n_sampled: usize,
    seed: u64,
    judge_model: &'a str,
    judge_max_tokens: u32,
    judge_top_p: f64,
    judge_temps: &'a [f64],
    rubric_path: &'a std::path::Path,
    rubric_hash: &'a str,
}

#[derive(Debug, Serialize)]
struct SweepResultRecord<'a> {
    #[serde(rename = "type")]
    record_type: &'static str,
    sweep_id: &'a str,
    run_id: &'a str,
    attempt_id: &'a str,
    judge_model: &'a str,
    judge_temperature: f64,
    judge_label: OutcomeLabel,
    judge_confidence: f64,
    judge_evidence_spans: Vec<String>,
    judge_error: Option<String>,
    rubric_hash: &'a str,
    created_at: String,
}

fn utc_now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// A raw record qualifies when it succeeded and carries usable text.
fn is_candidate(rec: &Value) -> bool {
    rec.get("error_type").map_or(true, Value::is_null)
        && rec.get("response_text").is_some_and(Value::is_string)
        && rec.get("prompt_text").is_some_and(Value::is_string)
        && rec.get("attempt_id").is_some_and(Value::is_string)
}

/// Run the sweep. Returns the path of the sweep log.
pub async fn rejudge_sample(
    cfg: &ExperimentConfig,
    opts: RejudgeOptions,
    factory: &dyn ProviderFactory,
) -> Result<PathBuf, RejudgeError> {
    if opts.n < 1 {
        return Err(RejudgeError::InvalidSampleSize);
    }
    if opts.judge_temps.is_empty() {
        return Err(RejudgeError::NoTemperatures);
    }

    let suite = cfg.suite(opts.suite.as_deref())?;
    let judge_cfg = suite
        .judge
        .as_deref()
        .and_then(|key| cfg.judges.get(key))
        .filter(|j| j.enabled)
        .ok_or(RejudgeError::JudgeDisabled)?;

    let raw_path = raw_log_path(&cfg.run.output_dir, &opts.run_id);
    if !raw_path.exists() {
        return Err(RejudgeError::MissingRawLog(raw_path));
    }

    let rubric_text = load_rubric_text(&judge_cfg.rubric_path)?;
    let rubric_hash = fingerprint(&rubric_text);

    let candidates: Vec<Value> = read_jsonl(&raw_path)?
        .into_iter()
        .filter(is_candidate)
        .collect();
    if candidates.is_empty() {
        return Err(RejudgeError::NoCandidates(raw_path));
    }

    let mut rng = rand::rngs::StdRng::seed_from_u64(opts.seed);
    let sample: Vec<&Value> = if candidates.len() <= opts.n {
        candidates.iter().collect()
    } else {
        candidates
            .choose_multiple(&mut rng, opts.n)
            .collect()
    };

    let judge_provider_cfg = &cfg.providers[&judge_cfg.provider];
    let provider = factory.build(&judge_cfg.provider, judge_provider_cfg)?;
    let caller = ModelCaller::new(
        provider,
        RetryPolicy::from_config(&judge_provider_cfg.retries),
    );

    let temps_text = opts
        .judge_temps
        .iter()
        .map(|t| format_float(*t))
        .collect::<Vec<_>>()
        .join(",");
    let sweep_id: String = fingerprint(&format!(
        "{}|{}|{}|{}|{}|{}",
        opts.run_id,
        opts.seed,
        temps_text,
        judge_cfg.model,
        rubric_hash,
        utc_now_rfc3339()
    ))
    .chars()
    .take(16)
    .collect();

    let out_path = opts
        .out_path
        .clone()
        .unwrap_or_else(|| judge_sweep_path(&cfg.run.output_dir, &opts.run_id));
    let (sink, worker) = JsonlSink::append(&out_path)?;

    sink.record(&SweepMetaRecord {
        record_type: "judge_sweep_meta",
        sweep_id: &sweep_id,
        run_id: &opts.run_id,
        created_at: utc_now_rfc3339(),
        n_requested: opts.n,
        n_sampled: sample.len(),
        seed: opts.seed,
        judge_model: &judge_cfg.model,
        judge_max_tokens: judge_cfg.max_tokens,
        judge_top_p: judge_cfg.top_p,
        judge_temps: &opts.judge_temps,
        rubric_path: &judge_cfg.rubric_path,
        rubric_hash: &rubric_hash,
    })?;

    for rec in &sample {
        // is_candidate guarantees these fields are strings.
        let attempt_id = rec["attempt_id"].as_str().unwrap_or_default();
        let prompt_text = rec["prompt_text"].as_str().unwrap_or_default();
        let response_text = rec["response_text"].as_str().unwrap_or_default();

        for &temp in &opts.judge_temps {
            let sweep_judge = JudgeConfig {
                temperature: temp,
                ..judge_cfg.clone()
            };
            let judged = judge_blind_label(
                &caller,
                &sweep_judge,
                &rubric_text,
                prompt_text,
                response_text,
            )
            .await;
            sink.record(&SweepResultRecord {
                record_type: "judge_sweep_result",
                sweep_id: &sweep_id,
                run_id: &opts.run_id,
                attempt_id,
                judge_model: &judge_cfg.model,
                judge_temperature: temp,
                judge_label: judged.label,
                judge_confidence: judged.confidence,
                judge_evidence_spans: judged.evidence_spans,
                judge_error: judged.error,
                rubric_hash: &rubric_hash,
                created_at: utc_now_rfc3339(),
            })?;
        }
    }

    drop(sink);
    worker.join()?;
    Ok(out_path)
}
