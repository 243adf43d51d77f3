//! Per-case execution engine
//!
//! The runner resolves the case snapshot, obtains the system response
//! through the conversation port, fans the requested evaluators out under a
//! bounded semaphore, and transitions the pre-created result rows exactly
//! once. Cancellation is checked between the conversation call and each
//! evaluator.

pub mod events;

pub use events::ExecutionEvents;

use crate::connector::conversation::Conversation;
use crate::domain::{
    CaseOutcome, CaseResult, EventKind, Execution, FailureLabel, LatencyMs, SystemResponse,
    TestCase, Verdict,
};
use crate::evaluators::EvaluatorRegistry;
use crate::store::ExecutionStore;
use crate::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{instrument, warn};

/// Cooperative cancellation flag shared between the orchestrator and
/// in-flight runner tasks
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Runner tuning knobs
#[derive(Debug, Clone, Copy)]
pub struct RunnerConfig {
    /// Concurrent evaluators within one case
    pub evaluator_fanout: usize,
    /// Per-evaluator timeout
    pub eval_timeout: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            evaluator_fanout: 4,
            eval_timeout: Duration::from_secs(30),
        }
    }
}

/// Executes a single test case end-to-end
pub struct CaseRunner {
    store: Arc<dyn ExecutionStore>,
    conversation: Arc<dyn Conversation>,
    registry: Arc<EvaluatorRegistry>,
    events: Arc<ExecutionEvents>,
    config: RunnerConfig,
}

fn failure_label(kind: &str) -> FailureLabel {
    FailureLabel::try_new(kind.to_string())
        .unwrap_or_else(|_| FailureLabel::try_new("internal".to_string()).expect("label is valid"))
}

impl CaseRunner {
    pub fn new(
        store: Arc<dyn ExecutionStore>,
        conversation: Arc<dyn Conversation>,
        registry: Arc<EvaluatorRegistry>,
        events: Arc<ExecutionEvents>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            store,
            conversation,
            registry,
            events,
            config,
        }
    }

    /// Transition every still-pending row of this case to `skipped`
    async fn skip_pending(&self, rows: &[CaseResult], label: FailureLabel) -> Result<()> {
        for row in rows {
            if !row.status.is_terminal() {
                self.store
                    .record_case_result(
                        &row.id,
                        CaseOutcome::Skipped {
                            error_kind: label.clone(),
                        },
                        None,
                        None,
                    )
                    .await?;
            }
        }
        Ok(())
    }

    /// Mark every still-pending row failed with the conversation's error kind
    async fn fail_all(&self, rows: &[CaseResult], label: FailureLabel) -> Result<()> {
        for row in rows {
            if !row.status.is_terminal() {
                self.store
                    .record_case_result(
                        &row.id,
                        CaseOutcome::Failed {
                            error_kind: label.clone(),
                        },
                        None,
                        None,
                    )
                    .await?;
            }
        }
        Ok(())
    }

    /// Run one case. Safe to call again for the same case: rows already in a
    /// terminal state are left untouched.
    #[instrument(skip(self, execution, case, cancel), fields(execution_id = %execution.id, case_id = %case.id))]
    pub async fn run_case(
        &self,
        execution: &Execution,
        case: &TestCase,
        cancel: &CancelFlag,
    ) -> Result<()> {
        let rows = self
            .store
            .record_case_start(&execution.id, &case.id, case.version, &case.evaluator_kinds)
            .await?;
        if rows.iter().all(|row| row.status.is_terminal()) {
            // Redelivered job: this case is already done
            return Ok(());
        }

        self.events.publish(
            &execution.id,
            EventKind::CaseStarted,
            serde_json::json!({"case_id": case.id}),
        );

        if cancel.is_cancelled() {
            return self.skip_pending(&rows, FailureLabel::cancelled()).await;
        }

        let conversation_key = format!("{}:{}", execution.id, case.id);
        let reply = self
            .conversation
            .converse(
                &execution.tenant_id,
                &execution.params,
                &case.user_input,
                &case.context,
                conversation_key,
            )
            .await;

        let reply = match reply {
            Ok(reply) => reply,
            Err(err) => {
                // The conversation itself failed: the whole case fails with
                // the connector's error kind
                warn!(error = %err, "conversation call failed");
                let label = failure_label(err.error_kind());
                self.fail_all(&rows, label.clone()).await?;
                self.events.publish(
                    &execution.id,
                    EventKind::CaseFinished,
                    serde_json::json!({
                        "case_id": case.id,
                        "status": "failed",
                        "error_kind": label,
                    }),
                );
                return Ok(());
            }
        };

        self.events.publish(
            &execution.id,
            EventKind::ResponseChunk,
            serde_json::json!({
                "case_id": case.id,
                "latency_ms": reply.latency_ms,
            }),
        );

        let case = Arc::new(case.clone());
        let response = Arc::new(reply.text);
        let semaphore = Arc::new(Semaphore::new(self.config.evaluator_fanout.max(1)));
        let mut tasks: JoinSet<Result<()>> = JoinSet::new();

        // Rows arrive in stable (sorted) evaluator-kind order
        for row in rows {
            if row.status.is_terminal() {
                continue;
            }
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|_| crate::Error::internal("evaluator semaphore closed"))?;
            let store = Arc::clone(&self.store);
            let registry = Arc::clone(&self.registry);
            let events = Arc::clone(&self.events);
            let case = Arc::clone(&case);
            let response = Arc::clone(&response);
            let cancel = cancel.clone();
            let execution_id = execution.id.clone();
            let eval_timeout = self.config.eval_timeout;

            tasks.spawn(async move {
                let _permit = permit;
                let (outcome, latency) = evaluate_row(
                    &registry,
                    &case,
                    &response,
                    &row,
                    &cancel,
                    &execution_id,
                    eval_timeout,
                )
                .await;
                let recorded = store
                    .record_case_result(
                        &row.id,
                        outcome,
                        Some(response.as_ref().clone()),
                        latency,
                    )
                    .await?;
                events.publish(
                    &execution_id,
                    EventKind::CaseFinished,
                    serde_json::json!({
                        "case_id": recorded.case_id,
                        "evaluator_kind": recorded.evaluator_kind,
                        "status": recorded.status,
                        "score": recorded.score,
                        "passed": recorded.passed,
                    }),
                );
                Ok(())
            });
        }

        while let Some(joined) = tasks.join_next().await {
            joined.map_err(|err| crate::Error::internal(format!("evaluator task: {err}")))??;
        }
        Ok(())
    }
}

/// Decide the terminal outcome for one evaluator row
async fn evaluate_row(
    registry: &EvaluatorRegistry,
    case: &TestCase,
    response: &SystemResponse,
    row: &CaseResult,
    cancel: &CancelFlag,
    execution_id: &crate::domain::ExecutionId,
    eval_timeout: Duration,
) -> (CaseOutcome, Option<LatencyMs>) {
    if cancel.is_cancelled() {
        return (
            CaseOutcome::Skipped {
                error_kind: FailureLabel::cancelled(),
            },
            None,
        );
    }

    let Some(evaluator) = registry.get(&row.evaluator_kind) else {
        return (
            CaseOutcome::Skipped {
                error_kind: FailureLabel::unknown_evaluator(),
            },
            None,
        );
    };

    let idempotency_key = format!("{}:{}:{}", execution_id, case.id, row.evaluator_kind);
    let started = Instant::now();
    let judged = tokio::time::timeout(
        eval_timeout,
        evaluator.evaluate(case, response, idempotency_key),
    )
    .await;
    let latency = LatencyMs::from(u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX));

    match judged {
        Ok(Ok(judgment)) => {
            let verdict = Verdict::scored(
                judgment.score,
                judgment.reasoning,
                case.threshold_for(&row.evaluator_kind),
                evaluator.default_threshold(),
            );
            (CaseOutcome::Verdict(verdict), Some(latency))
        }
        Ok(Err(err)) => (
            CaseOutcome::Failed {
                error_kind: failure_label(err.error_kind()),
            },
            Some(latency),
        ),
        Err(_) => (
            CaseOutcome::Failed {
                error_kind: failure_label("timeout"),
            },
            Some(latency),
        ),
    }
}
