//! Additional domain types for stronger type safety
//!
//! This module provides newtypes for common domain concepts to avoid
//! primitive obsession and ensure validation at boundaries.

use nutype::nutype;
#[allow(unused_imports)] // These are used by nutype derive macros
use serde::{Deserialize, Serialize};

/// Suite name; immutable within a tenant once created
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 200),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        AsRef,
        Display
    ),
    new_unchecked
)]
pub struct SuiteName(String);

/// Evaluator kind label (e.g. "hallucination", "answer_relevancy")
#[nutype(
    sanitize(trim, lowercase),
    validate(not_empty, len_char_max = 100, regex = r"^[a-z][a-z0-9_]*$"),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        Serialize,
        Deserialize,
        AsRef,
        Display
    ),
    new_unchecked
)]
pub struct EvaluatorKind(String);

/// User input text driving a test case
#[nutype(
    validate(not_empty, len_char_max = 100000),
    derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, AsRef, Display),
    new_unchecked
)]
pub struct UserInput(String);

/// Response text obtained from the target conversation system
#[nutype(
    validate(len_char_max = 200000),
    derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, AsRef, Display),
    new_unchecked
)]
pub struct SystemResponse(String);

/// Evaluator reasoning attached to a verdict
#[nutype(
    validate(len_char_max = 10000),
    derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, AsRef, Display),
    new_unchecked
)]
pub struct Reasoning(String);

/// Evaluator score in the closed interval [0, 1]
#[nutype(
    validate(finite, greater_or_equal = 0.0, less_or_equal = 1.0),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        PartialOrd,
        Serialize,
        Deserialize,
        AsRef,
        Display
    ),
    new_unchecked
)]
pub struct Score(f64);

impl Score {
    /// Clamp an arbitrary model-produced value into the valid range
    pub fn clamped(raw: f64) -> Self {
        let bounded = if raw.is_finite() {
            raw.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self::try_new(bounded).expect("clamped value is within range")
    }
}

/// Latency in milliseconds
#[nutype(derive(
    Clone,
    Copy,
    Debug,
    Display,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Deserialize,
    Serialize,
    From,
    AsRef
))]
pub struct LatencyMs(u64);

/// Token count for model usage accounting
#[nutype(
    validate(less_or_equal = 1000000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        Serialize,
        Deserialize,
        AsRef,
        Display
    ),
    new_unchecked
)]
pub struct TokenCount(u32);

/// Estimated cost in cents (to avoid floating point for money)
#[nutype(
    validate(less_or_equal = 100000000), // $1,000,000 max
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        Serialize,
        Deserialize,
        AsRef,
        Display
    ),
    new_unchecked
)]
pub struct CostCents(u32);

/// Execution progress percentage in [0, 100]
#[nutype(
    validate(less_or_equal = 100),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        Serialize,
        Deserialize,
        AsRef,
        Display
    ),
    new_unchecked
)]
pub struct ProgressPct(u8);

impl ProgressPct {
    pub fn zero() -> Self {
        Self::try_new(0).expect("0 is a valid percentage")
    }

    pub fn complete() -> Self {
        Self::try_new(100).expect("100 is a valid percentage")
    }

    /// `floor(100 * completed / total)`; a zero-case suite is fully complete
    pub fn from_counts(completed: usize, total: usize) -> Self {
        if total == 0 {
            return Self::complete();
        }
        let pct = (completed.min(total) * 100) / total;
        // pct <= 100 by construction
        Self::try_new(u8::try_from(pct).unwrap_or(100)).expect("floor percentage is at most 100")
    }
}

/// Version number of a suite or test case; dense and starting at 1
#[nutype(
    validate(greater_or_equal = 1),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        Serialize,
        Deserialize,
        AsRef,
        Display
    ),
    new_unchecked
)]
pub struct VersionNumber(u32);

impl VersionNumber {
    pub fn first() -> Self {
        Self::try_new(1).expect("1 is a valid version number")
    }

    pub fn next(self) -> Self {
        Self::try_new(self.into_inner().saturating_add(1)).unwrap_or(self)
    }
}

/// Caller-supplied key making repeated start requests converge
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 200),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        AsRef,
        Display
    ),
    new_unchecked
)]
pub struct IdempotencyKey(String);

/// Stable label classifying a failure on a case-result row
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 100),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        Serialize,
        Deserialize,
        AsRef,
        Display
    ),
    new_unchecked
)]
pub struct FailureLabel(String);

impl FailureLabel {
    pub const CANCELLED: &'static str = "cancelled";
    pub const UNKNOWN_EVALUATOR: &'static str = "unknown_evaluator";

    pub fn cancelled() -> Self {
        Self::try_new(Self::CANCELLED.to_string()).expect("constant label is valid")
    }

    pub fn unknown_evaluator() -> Self {
        Self::try_new(Self::UNKNOWN_EVALUATOR.to_string()).expect("constant label is valid")
    }
}

/// Opaque execution parameters (conversation_spec_id and friends)
#[nutype(
    derive(Debug, Clone, PartialEq, Serialize, Deserialize, AsRef),
    new_unchecked
)]
pub struct ExecutionParams(serde_json::Value);

impl Default for ExecutionParams {
    fn default() -> Self {
        Self::new(serde_json::Value::Object(serde_json::Map::new()))
    }
}

/// Retrieval / grounding context attached to a test case
#[nutype(
    derive(Debug, Clone, PartialEq, Serialize, Deserialize, AsRef),
    new_unchecked
)]
pub struct CaseContext(serde_json::Value);

impl Default for CaseContext {
    fn default() -> Self {
        Self::new(serde_json::Value::Object(serde_json::Map::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suite_name_validation() {
        assert!(SuiteName::try_new("Regression pack".to_string()).is_ok());
        assert!(SuiteName::try_new("".to_string()).is_err());
        assert!(SuiteName::try_new("a".repeat(201)).is_err());
    }

    #[test]
    fn test_evaluator_kind_validation() {
        assert!(EvaluatorKind::try_new("hallucination".to_string()).is_ok());
        assert!(EvaluatorKind::try_new("answer_relevancy".to_string()).is_ok());
        // sanitized to lowercase before validation
        assert_eq!(
            EvaluatorKind::try_new("Faithfulness".to_string())
                .unwrap()
                .as_ref(),
            "faithfulness"
        );
        assert!(EvaluatorKind::try_new("".to_string()).is_err());
        assert!(EvaluatorKind::try_new("1bad".to_string()).is_err());
        assert!(EvaluatorKind::try_new("has space".to_string()).is_err());
    }

    #[test]
    fn test_score_bounds() {
        assert!(Score::try_new(0.0).is_ok());
        assert!(Score::try_new(1.0).is_ok());
        assert!(Score::try_new(-0.01).is_err());
        assert!(Score::try_new(1.01).is_err());
        assert!(Score::try_new(f64::NAN).is_err());
    }

    #[test]
    fn test_score_clamping() {
        assert!((Score::clamped(1.7).into_inner() - 1.0).abs() < f64::EPSILON);
        assert!((Score::clamped(-3.0).into_inner()).abs() < f64::EPSILON);
        assert!((Score::clamped(f64::NAN).into_inner()).abs() < f64::EPSILON);
        assert!((Score::clamped(0.42).into_inner() - 0.42).abs() < f64::EPSILON);
    }

    #[test]
    fn test_progress_from_counts() {
        assert_eq!(ProgressPct::from_counts(0, 100).into_inner(), 0);
        assert_eq!(ProgressPct::from_counts(3, 100).into_inner(), 3);
        assert_eq!(ProgressPct::from_counts(1, 3).into_inner(), 33);
        assert_eq!(ProgressPct::from_counts(100, 100).into_inner(), 100);
        // degenerate empty suite counts as fully complete
        assert_eq!(ProgressPct::from_counts(0, 0).into_inner(), 100);
    }

    #[test]
    fn test_version_number_sequence() {
        let v1 = VersionNumber::first();
        assert_eq!(v1.into_inner(), 1);
        assert_eq!(v1.next().into_inner(), 2);
        assert!(VersionNumber::try_new(0).is_err());
    }

    #[test]
    fn test_idempotency_key_trims() {
        let key = IdempotencyKey::try_new("  k1  ".to_string()).unwrap();
        assert_eq!(key.as_ref(), "k1");
        assert!(IdempotencyKey::try_new("   ".to_string()).is_err());
    }

    #[test]
    fn test_failure_label_constants() {
        assert_eq!(FailureLabel::cancelled().as_ref(), "cancelled");
        assert_eq!(
            FailureLabel::unknown_evaluator().as_ref(),
            "unknown_evaluator"
        );
    }
}
