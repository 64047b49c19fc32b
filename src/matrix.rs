//! Attempt matrix expansion and run output paths.
//!
//! The matrix is the full cross product of
//! (scenario x frame x model x temperature x replicate), expanded in a fixed
//! scenario-major order so repeated runs log attempts in the same sequence.
//! Ordering is not semantically load-bearing; stable identity is.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::{ExperimentConfig, GenerationDefaults, SuiteConfig};
use crate::identity::{attempt_identity, fingerprint};
use crate::inputs::{build_prompt_text, Frame, Scenario};

#[derive(Debug, thiserror::Error)]
pub enum MatrixError {
    #[error("replicates must be >= 1 (got {0})")]
    InvalidReplicateCount(usize),
}

/// Immutable description of one unit of work.
///
/// `attempt_id` is the idempotency key: a content hash over everything that
/// defines the attempt, so identical configuration always maps to the same
/// identity across runs and restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptSpec {
    pub run_id: String,
    pub attempt_id: String,
    pub suite_name: String,
    pub provider_key: String,
    pub scenario_id: String,
    pub trench: String,
    pub frame_id: String,
    pub replicate: usize,
    pub provider: String,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub top_p: f64,
    pub prompt_text: String,
    pub prompt_hash: String,
}

/// Render a float the way it appears in logs and identity hashes.
///
/// Plain `Display` for f64 is stable across platforms, which is the invariant
/// the identity hash needs.
pub fn format_float(v: f64) -> String {
    format!("{v}")
}

/// Expand the full attempt matrix for one suite.
///
/// Scenario-major, then frame, model, temperature, replicate (1-based).
/// Prompt text is rendered once per (scenario, frame) cell.
#[allow(clippy::too_many_arguments)]
pub fn expand_matrix(
    run_id: &str,
    suite: &SuiteConfig,
    provider_type: &str,
    defaults: &GenerationDefaults,
    scenarios: &[Scenario],
    frames: &[Frame],
    replicates: usize,
) -> Result<Vec<AttemptSpec>, MatrixError> {
    if replicates < 1 {
        return Err(MatrixError::InvalidReplicateCount(replicates));
    }

    let mut specs = Vec::new();
    for scenario in scenarios {
        for frame in frames {
            let prompt_text = build_prompt_text(scenario, frame);
            let prompt_hash = fingerprint(&prompt_text);

            for model in &suite.models {
                for &temperature in &model.temperatures {
                    for replicate in 1..=replicates {
                        let attempt_id = attempt_identity(&[
                            suite.name.clone(),
                            suite.provider.clone(),
                            scenario.id.clone(),
                            frame.id.clone(),
                            model.model.clone(),
                            format_float(temperature),
                            replicate.to_string(),
                            prompt_hash.clone(),
                            defaults.max_tokens.to_string(),
                            format_float(defaults.top_p),
                        ]);
                        specs.push(AttemptSpec {
                            run_id: run_id.to_string(),
                            attempt_id,
                            suite_name: suite.name.clone(),
                            provider_key: suite.provider.clone(),
                            scenario_id: scenario.id.clone(),
                            trench: scenario.trench.clone(),
                            frame_id: frame.id.clone(),
                            replicate,
                            provider: provider_type.to_string(),
                            model: model.model.clone(),
                            temperature,
                            max_tokens: defaults.max_tokens,
                            top_p: defaults.top_p,
                            prompt_text: prompt_text.clone(),
                            prompt_hash: prompt_hash.clone(),
                        });
                    }
                }
            }
        }
    }
    Ok(specs)
}

// =============================================================================
// Run output paths
// =============================================================================

pub fn resolve_run_id(cfg: &ExperimentConfig) -> String {
    cfg.run
        .run_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

pub fn output_dir_for_run(output_dir: &Path, run_id: &str) -> PathBuf {
    output_dir.join(run_id)
}

pub fn raw_log_path(output_dir: &Path, run_id: &str) -> PathBuf {
    output_dir_for_run(output_dir, run_id).join("attempts_raw.jsonl")
}

pub fn labels_log_path(output_dir: &Path, run_id: &str) -> PathBuf {
    output_dir_for_run(output_dir, run_id).join("attempts_labels.jsonl")
}

pub fn run_meta_path(output_dir: &Path, run_id: &str) -> PathBuf {
    output_dir_for_run(output_dir, run_id).join("run_meta.jsonl")
}

pub fn csv_path(output_dir: &Path, run_id: &str) -> PathBuf {
    output_dir_for_run(output_dir, run_id).join("attempts.csv")
}

pub fn judge_sweep_path(output_dir: &Path, run_id: &str) -> PathBuf {
    output_dir_for_run(output_dir, run_id).join("judge_sweep.jsonl")
}
