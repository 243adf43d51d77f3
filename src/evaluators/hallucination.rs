//! Hallucination evaluator
//!
//! The judge rates the degree of fabrication in the response; the verdict
//! score is the inverse, so a lower hallucination degree yields a higher
//! score and a pass.

use crate::connector::{ConnectorError, ModelConnector};
use crate::domain::{EvaluatorKind, Score, SystemResponse, TestCase};
use crate::evaluators::judge::LlmJudge;
use crate::evaluators::{Evaluator, Judgment};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

const INSTRUCTION: &str = "You are grading an AI assistant's answer for hallucination. \
Rate how much of the answer is fabricated or unsupported by the provided context, \
where 0 means fully grounded and 1 means entirely fabricated.";

pub struct HallucinationEvaluator {
    judge: LlmJudge,
}

impl HallucinationEvaluator {
    pub fn new(connector: Arc<dyn ModelConnector>, timeout: Duration) -> Self {
        Self {
            judge: LlmJudge::new(connector, timeout),
        }
    }
}

#[async_trait]
impl Evaluator for HallucinationEvaluator {
    fn kind(&self) -> EvaluatorKind {
        EvaluatorKind::try_new("hallucination".to_string()).expect("constant kind is valid")
    }

    fn default_threshold(&self) -> Score {
        Score::clamped(0.5)
    }

    async fn evaluate(
        &self,
        case: &TestCase,
        system_response: &SystemResponse,
        idempotency_key: String,
    ) -> std::result::Result<Judgment, ConnectorError> {
        let material = format!(
            "Context:\n{}\n\nQuestion:\n{}\n\nAnswer:\n{}",
            case.context.as_ref(),
            case.user_input,
            system_response
        );
        let judgment = self
            .judge
            .score(&case.tenant_id, INSTRUCTION, material, idempotency_key)
            .await?;
        // Inverse scoring: less hallucination means a higher verdict score
        Ok(Judgment {
            score: Score::clamped(1.0 - judgment.score.into_inner()),
            reasoning: judgment.reasoning,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        CaseContext, CaseId, SuiteId, TenantId, UserInput, VersionNumber,
    };
    use crate::evaluators::test_support::CannedJudge;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn case() -> TestCase {
        TestCase {
            id: CaseId::generate(),
            tenant_id: TenantId::generate(),
            suite_id: SuiteId::generate(),
            evaluator_kinds: vec![EvaluatorKind::try_new("hallucination".to_string()).unwrap()],
            expected: BTreeMap::new(),
            user_input: UserInput::try_new("what is the capital of France".to_string()).unwrap(),
            context: CaseContext::new(serde_json::json!({"facts": ["Paris is the capital"]})),
            source_conversation_id: None,
            version: VersionNumber::first(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn low_hallucination_scores_high() {
        let evaluator = HallucinationEvaluator::new(
            Arc::new(CannedJudge {
                body: r#"{"score": 0.1, "reasoning": "grounded"}"#.to_string(),
            }),
            Duration::from_secs(30),
        );
        let judgment = evaluator
            .evaluate(
                &case(),
                &SystemResponse::try_new("Paris.".to_string()).unwrap(),
                "k".to_string(),
            )
            .await
            .unwrap();
        assert!((judgment.score.into_inner() - 0.9).abs() < 1e-9);
        assert!(judgment.score >= evaluator.default_threshold());
    }

    #[tokio::test]
    async fn heavy_hallucination_scores_low() {
        let evaluator = HallucinationEvaluator::new(
            Arc::new(CannedJudge {
                body: r#"{"score": 0.95, "reasoning": "made up"}"#.to_string(),
            }),
            Duration::from_secs(30),
        );
        let judgment = evaluator
            .evaluate(
                &case(),
                &SystemResponse::try_new("Lyon, obviously.".to_string()).unwrap(),
                "k".to_string(),
            )
            .await
            .unwrap();
        assert!(judgment.score < evaluator.default_threshold());
    }
}
