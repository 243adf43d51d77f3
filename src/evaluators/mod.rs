//! Evaluator registry and builtin evaluator kinds
//!
//! Each evaluator is a pure function of `(case, system_response, context)`
//! returning a judgment; its only allowed side effect is calling the model
//! connector. Registration is static at startup and duplicate registration
//! fails fast.

pub mod answer_relevancy;
pub mod contextual_precision;
pub mod faithfulness;
pub mod hallucination;
pub mod judge;

use crate::connector::{ConnectorError, ModelConnector};
use crate::domain::{EvaluatorKind, Reasoning, Score, SystemResponse, TestCase};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Raw judgment produced by an evaluator; `passed` is derived later against
/// the case's expected threshold
#[derive(Debug, Clone, PartialEq)]
pub struct Judgment {
    pub score: Score,
    pub reasoning: Reasoning,
}

/// A named evaluator
#[async_trait]
pub trait Evaluator: Send + Sync {
    fn kind(&self) -> EvaluatorKind;

    /// Threshold applied when the case does not declare one
    fn default_threshold(&self) -> Score;

    async fn evaluate(
        &self,
        case: &TestCase,
        system_response: &SystemResponse,
        idempotency_key: String,
    ) -> std::result::Result<Judgment, ConnectorError>;
}

/// Catalog of evaluators, processed in a stable (sorted) kind order
#[derive(Default)]
pub struct EvaluatorRegistry {
    evaluators: BTreeMap<EvaluatorKind, Arc<dyn Evaluator>>,
}

impl EvaluatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an evaluator; duplicate kinds fail fast
    pub fn register(&mut self, evaluator: Arc<dyn Evaluator>) -> Result<()> {
        let kind = evaluator.kind();
        if self.evaluators.contains_key(&kind) {
            return Err(Error::conflict(format!(
                "evaluator {kind} is already registered"
            )));
        }
        self.evaluators.insert(kind, evaluator);
        Ok(())
    }

    pub fn get(&self, kind: &EvaluatorKind) -> Option<Arc<dyn Evaluator>> {
        self.evaluators.get(kind).cloned()
    }

    /// Registered kinds in stable order
    pub fn kinds(&self) -> Vec<EvaluatorKind> {
        self.evaluators.keys().cloned().collect()
    }

    /// Registry with the builtin model-judged kinds
    pub fn builtin(connector: Arc<dyn ModelConnector>, eval_timeout: Duration) -> Result<Self> {
        let mut registry = Self::new();
        registry.register(Arc::new(hallucination::HallucinationEvaluator::new(
            Arc::clone(&connector),
            eval_timeout,
        )))?;
        registry.register(Arc::new(answer_relevancy::AnswerRelevancyEvaluator::new(
            Arc::clone(&connector),
            eval_timeout,
        )))?;
        registry.register(Arc::new(faithfulness::FaithfulnessEvaluator::new(
            Arc::clone(&connector),
            eval_timeout,
        )))?;
        registry.register(Arc::new(
            contextual_precision::ContextualPrecisionEvaluator::new(connector, eval_timeout),
        ))?;
        Ok(registry)
    }
}
