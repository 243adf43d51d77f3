//! Faithfulness evaluator

use crate::connector::{ConnectorError, ModelConnector};
use crate::domain::{EvaluatorKind, Score, SystemResponse, TestCase};
use crate::evaluators::judge::LlmJudge;
use crate::evaluators::{Evaluator, Judgment};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

const INSTRUCTION: &str = "You are grading an AI assistant's answer for faithfulness. \
Rate how consistent every claim in the answer is with the provided context, \
where 0 means the answer contradicts the context and 1 means every claim is supported.";

pub struct FaithfulnessEvaluator {
    judge: LlmJudge,
}

impl FaithfulnessEvaluator {
    pub fn new(connector: Arc<dyn ModelConnector>, timeout: Duration) -> Self {
        Self {
            judge: LlmJudge::new(connector, timeout),
        }
    }
}

#[async_trait]
impl Evaluator for FaithfulnessEvaluator {
    fn kind(&self) -> EvaluatorKind {
        EvaluatorKind::try_new("faithfulness".to_string()).expect("constant kind is valid")
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
        self.judge
            .score(&case.tenant_id, INSTRUCTION, material, idempotency_key)
            .await
    }
}
