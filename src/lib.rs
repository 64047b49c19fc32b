#![forbid(unsafe_code)]

//! # scenario-harness
//!
//! Run a matrix of (scenario x frame x model x temperature x replicate)
//! prompts against an LLM provider and label the responses.
//!
//! Every attempt has a content-derived identity, so interrupted runs resume
//! by replaying the matrix and skipping what the append-only JSONL logs
//! already contain. Labels come from two independent channels per response:
//! a pattern heuristic and a rubric-driven blind judge, reconciled into a
//! final label or flagged for human review.

pub mod config;
pub mod export;
pub mod identity;
pub mod inputs;
pub mod jsonl;
pub mod labeling;
pub mod matrix;
pub mod provider;
pub mod rejudge;
pub mod runner;

pub use config::{load_experiment_config, ConfigError, ExperimentConfig};
pub use labeling::{
    heuristic_classify, judge_blind_label, reconcile_labels, FinalLabel, HeuristicLabel,
    JudgeLabel, OutcomeLabel,
};
pub use matrix::{expand_matrix, AttemptSpec};
pub use provider::{
    AnthropicAdapter, GenerateProvider, GenerateRequest, GenerateResponse, ModelCaller,
    ProviderError, RetryPolicy,
};
pub use runner::{
    run_experiment, run_with_factory, AttemptRecord, EnvProviderFactory, LabelRecord,
    ProviderFactory, RunError, RunSummary,
};
