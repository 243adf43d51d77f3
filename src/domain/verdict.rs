//! Evaluator verdicts

use crate::domain::types::{Reasoning, Score};
use serde::{Deserialize, Serialize};

/// Outcome of one evaluator over one (case, system_response) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub score: Score,
    pub passed: bool,
    pub reasoning: Reasoning,
}

impl Verdict {
    /// Build a verdict, deriving `passed` from the effective threshold:
    /// the case's expectation when present, otherwise the evaluator default.
    pub fn scored(
        score: Score,
        reasoning: Reasoning,
        case_threshold: Option<Score>,
        default_threshold: Score,
    ) -> Self {
        let threshold = case_threshold.unwrap_or(default_threshold);
        Self {
            passed: score >= threshold,
            score,
            reasoning,
        }
    }
}
