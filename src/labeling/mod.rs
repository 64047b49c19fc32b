//! Two-stage outcome labeling: a fast heuristic pass, a blind LLM judge,
//! and a deterministic reconciliation with a human-review escape hatch.

pub mod heuristics;
pub mod judge;
pub mod reconcile;

use serde::{Deserialize, Serialize};

pub use heuristics::{heuristic_classify, HeuristicLabel, HeuristicSignals};
pub use judge::{judge_blind_label, load_rubric_text, JudgeLabel, RubricError};
pub use reconcile::{reconcile_labels, FinalLabel};

/// The three outcome categories every response is classified into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeLabel {
    Reject,
    AcceptWithGuidance,
    Accept,
}

impl OutcomeLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeLabel::Reject => "reject",
            OutcomeLabel::AcceptWithGuidance => "accept_with_guidance",
            OutcomeLabel::Accept => "accept",
        }
    }

    /// Parse a canonical wire value; anything else is rejected.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "reject" => Some(OutcomeLabel::Reject),
            "accept_with_guidance" => Some(OutcomeLabel::AcceptWithGuidance),
            "accept" => Some(OutcomeLabel::Accept),
            _ => None,
        }
    }
}

impl std::fmt::Display for OutcomeLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
