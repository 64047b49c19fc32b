//! Deterministic merge of heuristic and judge verdicts.
//!
//! Precedence: judge error, then low confidence, then agreement. The judge
//! must be both reachable and confident before its vote counts at all.

use serde::{Deserialize, Serialize};

use super::{HeuristicLabel, JudgeLabel, OutcomeLabel};

/// Final verdict or a review flag. Invariant: `final_label` is absent
/// exactly when `needs_review` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalLabel {
    pub final_label: Option<OutcomeLabel>,
    pub needs_review: bool,
    pub reason: String,
}

pub fn reconcile_labels(
    heuristic: &HeuristicLabel,
    judge: &JudgeLabel,
    confidence_threshold: f64,
) -> FinalLabel {
    if let Some(error) = &judge.error {
        return FinalLabel {
            final_label: None,
            needs_review: true,
            reason: format!("judge_error:{error}"),
        };
    }

    if judge.confidence < confidence_threshold {
        return FinalLabel {
            final_label: None,
            needs_review: true,
            reason: format!("low_confidence:{:.3}", judge.confidence),
        };
    }

    if heuristic.label == judge.label {
        return FinalLabel {
            final_label: Some(judge.label),
            needs_review: false,
            reason: "agree".to_string(),
        };
    }

    FinalLabel {
        final_label: None,
        needs_review: true,
        reason: format!(
            "disagree:heuristic={},judge={}",
            heuristic.label, judge.label
        ),
    }
}
