//! Run orchestration: attempt execution, resume, and the bounded worker pool.
//!
//! The coordinator drains a fixed, pre-computed pending list through
//! `buffer_unordered` workers. Each worker runs one attempt to completion,
//! including backoff sleeps and (when enabled) the synchronous judge call,
//! then appends its records through the serialized JSONL sinks in completion
//! order. Attempt-level failures never cross a worker boundary as errors;
//! they land in the record's error fields.
//!
//! Precondition: at most one coordinator per run id at a time. The resume
//! set is read once before scheduling, so a concurrently writing second
//! process would not be visible.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::{SecondsFormat, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};

use crate::config::{
    load_experiment_config, ConfigError, ExperimentConfig, JudgeConfig, ProviderConfig,
};
use crate::inputs::{load_frames, load_scenarios, InputError};
use crate::jsonl::{load_existing_attempt_ids, JsonlSink, LogError};
use crate::labeling::{
    heuristic_classify, judge_blind_label, load_rubric_text, reconcile_labels, HeuristicSignals,
    OutcomeLabel, RubricError,
};
use crate::matrix::{
    expand_matrix, labels_log_path, output_dir_for_run, raw_log_path, resolve_run_id,
    run_meta_path, AttemptSpec, MatrixError,
};
use crate::provider::{
    AnthropicAdapter, GenerateProvider, GenerateRequest, ModelCaller, ProviderError, RetryPolicy,
};

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Input(#[from] InputError),
    #[error(transparent)]
    Matrix(#[from] MatrixError),
    #[error(transparent)]
    Log(#[from] LogError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Rubric(#[from] RubricError),
}

// =============================================================================
// Persisted records
// =============================================================================

/// One line in `attempts_raw.jsonl`: the spec plus its execution outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    #[serde(flatten)]
    pub spec: AttemptSpec,
    pub started_at: String,
    pub completed_at: String,
    pub latency_ms: i64,
    pub response_text: Option<String>,
    pub stop_reason: Option<String>,
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
    pub provider_request_id: Option<String>,
    pub error_type: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub code_version: Option<String>,
}

/// One line in `attempts_labels.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelRecord {
    pub run_id: String,
    pub attempt_id: String,
    pub suite_name: String,
    pub heuristic_label: Option<OutcomeLabel>,
    pub heuristic_signals: Option<HeuristicSignals>,
    pub judge_label: Option<OutcomeLabel>,
    pub judge_confidence: Option<f64>,
    pub judge_evidence_spans: Vec<String>,
    pub judge_error: Option<String>,
    pub final_label: Option<OutcomeLabel>,
    pub needs_review: bool,
    pub label_reason: String,
}

/// One line in `run_meta.jsonl`, written once per run start.
#[derive(Debug, Clone, Serialize)]
pub struct RunMetaRecord {
    pub run_id: String,
    pub suite_name: String,
    pub provider_key: String,
    pub judge_key: Option<String>,
    pub started_at: String,
    pub config_path: String,
    pub config: ExperimentConfig,
    pub code_version: Option<String>,
}

#[derive(Debug)]
pub struct RunSummary {
    pub run_id: String,
    pub output_dir: PathBuf,
    pub total_attempts: usize,
    pub skipped_existing: usize,
    pub executed: usize,
}

// =============================================================================
// Provider construction seam
// =============================================================================

/// Builds concrete providers from config. Tests swap this to point at a mock
/// server; production uses [`EnvProviderFactory`].
pub trait ProviderFactory: Send + Sync {
    fn build(&self, key: &str, cfg: &ProviderConfig)
        -> Result<Arc<dyn GenerateProvider>, ProviderError>;
}

/// Builds Anthropic adapters from environment credentials.
pub struct EnvProviderFactory;

impl ProviderFactory for EnvProviderFactory {
    fn build(
        &self,
        _key: &str,
        cfg: &ProviderConfig,
    ) -> Result<Arc<dyn GenerateProvider>, ProviderError> {
        Ok(Arc::new(AnthropicAdapter::from_env(cfg)?))
    }
}

// =============================================================================
// Attempt execution
// =============================================================================

fn utc_now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Best-effort git revision tag; `None` when unavailable.
pub fn try_get_code_version() -> Option<String> {
    let output = std::process::Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let sha = String::from_utf8(output.stdout).ok()?.trim().to_string();
    (!sha.is_empty()).then_some(sha)
}

/// Execute one attempt end to end. Never fails: provider errors collapse
/// into the record's error fields.
pub async fn execute_attempt(
    caller: &ModelCaller,
    spec: AttemptSpec,
    code_version: Option<String>,
) -> AttemptRecord {
    let started_at = utc_now_rfc3339();
    let timer = Instant::now();

    let req = GenerateRequest {
        model: spec.model.clone(),
        prompt_text: spec.prompt_text.clone(),
        temperature: spec.temperature,
        max_tokens: spec.max_tokens,
        top_p: spec.top_p,
    };
    let outcome = caller.call(&req).await;

    let completed_at = utc_now_rfc3339();
    let latency_ms = timer.elapsed().as_millis() as i64;

    match outcome.result {
        Ok(resp) => AttemptRecord {
            spec,
            started_at,
            completed_at,
            latency_ms,
            response_text: Some(resp.text),
            stop_reason: resp.stop_reason,
            input_tokens: resp.input_tokens,
            output_tokens: resp.output_tokens,
            provider_request_id: resp.request_id,
            error_type: None,
            error_message: None,
            retry_count: outcome.retry_count,
            code_version,
        },
        Err(err) => AttemptRecord {
            spec,
            started_at,
            completed_at,
            latency_ms,
            response_text: None,
            stop_reason: None,
            input_tokens: None,
            output_tokens: None,
            provider_request_id: err.context().and_then(|c| c.request_id.clone()),
            error_type: Some(err.code().to_string()),
            error_message: Some(err.to_string()),
            retry_count: outcome.retry_count,
            code_version,
        },
    }
}

/// Judge wiring for a run where labeling is enabled.
pub struct JudgeContext {
    pub cfg: JudgeConfig,
    pub caller: ModelCaller,
    pub rubric_text: String,
}

/// Label one executed attempt. Failed or empty attempts still get a record
/// so the labels log accounts for every execution.
pub async fn label_attempt(judge: &JudgeContext, record: &AttemptRecord) -> LabelRecord {
    let response_text = match (&record.response_text, &record.error_type) {
        (Some(text), None) if !text.is_empty() => text,
        _ => {
            return LabelRecord {
                run_id: record.spec.run_id.clone(),
                attempt_id: record.spec.attempt_id.clone(),
                suite_name: record.spec.suite_name.clone(),
                heuristic_label: None,
                heuristic_signals: None,
                judge_label: None,
                judge_confidence: None,
                judge_evidence_spans: Vec::new(),
                judge_error: None,
                final_label: None,
                needs_review: true,
                label_reason: "no_response_or_error".to_string(),
            }
        }
    };

    let heuristic = heuristic_classify(response_text);
    let judged = judge_blind_label(
        &judge.caller,
        &judge.cfg,
        &judge.rubric_text,
        &record.spec.prompt_text,
        response_text,
    )
    .await;
    let final_label = reconcile_labels(&heuristic, &judged, judge.cfg.confidence_threshold);

    LabelRecord {
        run_id: record.spec.run_id.clone(),
        attempt_id: record.spec.attempt_id.clone(),
        suite_name: record.spec.suite_name.clone(),
        heuristic_label: Some(heuristic.label),
        heuristic_signals: Some(heuristic.signals),
        judge_label: Some(judged.label),
        judge_confidence: Some(judged.confidence),
        judge_evidence_spans: judged.evidence_spans,
        judge_error: judged.error,
        final_label: final_label.final_label,
        needs_review: final_label.needs_review,
        label_reason: final_label.reason,
    }
}

// =============================================================================
// Coordinator
// =============================================================================

/// Run one suite end to end with providers from the environment.
pub async fn run_experiment(
    config_path: &Path,
    replicates: usize,
    suite_name: Option<&str>,
) -> Result<RunSummary, RunError> {
    let cfg = load_experiment_config(config_path)?;
    run_with_factory(cfg, config_path, replicates, suite_name, &EnvProviderFactory).await
}

/// Run one suite with explicitly constructed providers.
pub async fn run_with_factory(
    cfg: ExperimentConfig,
    config_path: &Path,
    replicates: usize,
    suite_name: Option<&str>,
    factory: &dyn ProviderFactory,
) -> Result<RunSummary, RunError> {
    let suite = cfg.suite(suite_name)?.clone();
    let provider_key = suite.provider.clone();
    let provider_cfg = cfg.providers[&provider_key].clone();

    let scenarios = load_scenarios(&cfg.inputs.scenarios_path)?;
    let frames = load_frames(&cfg.inputs.frames_path)?;

    let run_id = resolve_run_id(&cfg);
    let out_dir = output_dir_for_run(&cfg.run.output_dir, &run_id);
    let raw_path = raw_log_path(&cfg.run.output_dir, &run_id);
    let labels_path = labels_log_path(&cfg.run.output_dir, &run_id);

    // Resume set is read once, synchronously, before any worker starts.
    let existing = if cfg.run.resume {
        load_existing_attempt_ids(&raw_path)?
    } else {
        Default::default()
    };

    let code_version = try_get_code_version();

    // Judge wiring, built before any work is scheduled so bad references
    // or a missing rubric abort the run up front.
    let judge_key = suite.judge.clone();
    let judge_ctx = match judge_key.as_deref().map(|k| &cfg.judges[k]) {
        Some(judge_cfg) if judge_cfg.enabled => {
            let judge_provider_cfg = &cfg.providers[&judge_cfg.provider];
            let provider = factory.build(&judge_cfg.provider, judge_provider_cfg)?;
            let caller = ModelCaller::new(
                provider,
                RetryPolicy::from_config(&judge_provider_cfg.retries),
            );
            Some(Arc::new(JudgeContext {
                cfg: judge_cfg.clone(),
                caller,
                rubric_text: load_rubric_text(&judge_cfg.rubric_path)?,
            }))
        }
        _ => None,
    };

    let provider = factory.build(&provider_key, &provider_cfg)?;
    let caller = ModelCaller::new(provider, RetryPolicy::from_config(&provider_cfg.retries));

    let specs = expand_matrix(
        &run_id,
        &suite,
        &provider_cfg.provider_type,
        &cfg.generation_defaults,
        &scenarios,
        &frames,
        replicates,
    )?;
    let total_attempts = specs.len();
    let pending: Vec<AttemptSpec> = specs
        .into_iter()
        .filter(|s| !existing.contains(&s.attempt_id))
        .collect();
    let skipped_existing = total_attempts - pending.len();
    let executed = pending.len();

    tracing::info!(
        run_id = %run_id,
        total = total_attempts,
        pending = executed,
        skipped = skipped_existing,
        "starting run"
    );

    // Metadata record, once per run start.
    let (meta_sink, meta_worker) = JsonlSink::append(run_meta_path(&cfg.run.output_dir, &run_id))?;
    meta_sink.record(&RunMetaRecord {
        run_id: run_id.clone(),
        suite_name: suite.name.clone(),
        provider_key: provider_key.clone(),
        judge_key,
        started_at: utc_now_rfc3339(),
        config_path: config_path.display().to_string(),
        config: cfg.clone(),
        code_version: code_version.clone(),
    })?;
    drop(meta_sink);
    meta_worker.join()?;

    let (raw_sink, raw_worker) = JsonlSink::append(&raw_path)?;
    let labels = match &judge_ctx {
        Some(_) => Some(JsonlSink::append(&labels_path)?),
        None => None,
    };
    let (labels_sink, labels_worker) = match labels {
        Some((sink, worker)) => (Some(sink), Some(worker)),
        None => (None, None),
    };

    let concurrency = provider_cfg.concurrency.max(1);

    let results: Vec<Result<(), LogError>> = stream::iter(pending.into_iter().map(|spec| {
        let caller = caller.clone();
        let judge_ctx = judge_ctx.clone();
        let code_version = code_version.clone();
        let raw_sink = raw_sink.clone();
        let labels_sink = labels_sink.clone();
        async move {
            let record = execute_attempt(&caller, spec, code_version).await;
            // Raw before labels, from the same worker, so every persisted
            // label has its attempt on disk already.
            raw_sink.record(&record)?;
            if let (Some(judge), Some(sink)) = (judge_ctx.as_deref(), labels_sink.as_ref()) {
                let label = label_attempt(judge, &record).await;
                sink.record(&label)?;
            }
            Ok(())
        }
    }))
    .buffer_unordered(concurrency)
    .collect()
    .await;

    drop(raw_sink);
    drop(labels_sink);
    raw_worker.join()?;
    if let Some(worker) = labels_worker {
        worker.join()?;
    }
    for result in results {
        result?;
    }

    Ok(RunSummary {
        run_id,
        output_dir: out_dir,
        total_attempts,
        skipped_existing,
        executed,
    })
}
