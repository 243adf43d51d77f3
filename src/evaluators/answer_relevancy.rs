//! Answer relevancy evaluator

use crate::connector::{ConnectorError, ModelConnector};
use crate::domain::{EvaluatorKind, Score, SystemResponse, TestCase};
use crate::evaluators::judge::LlmJudge;
use crate::evaluators::{Evaluator, Judgment};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

const INSTRUCTION: &str = "You are grading an AI assistant's answer for relevancy. \
Rate how directly and completely the answer addresses the user's question, \
where 0 means entirely off-topic and 1 means fully on point.";

pub struct AnswerRelevancyEvaluator {
    judge: LlmJudge,
}

impl AnswerRelevancyEvaluator {
    pub fn new(connector: Arc<dyn ModelConnector>, timeout: Duration) -> Self {
        Self {
            judge: LlmJudge::new(connector, timeout),
        }
    }
}

#[async_trait]
impl Evaluator for AnswerRelevancyEvaluator {
    fn kind(&self) -> EvaluatorKind {
        EvaluatorKind::try_new("answer_relevancy".to_string()).expect("constant kind is valid")
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
            "Question:\n{}\n\nAnswer:\n{}",
            case.user_input, system_response
        );
        self.judge
            .score(&case.tenant_id, INSTRUCTION, material, idempotency_key)
            .await
    }
}
