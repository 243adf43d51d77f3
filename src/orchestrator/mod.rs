//! Orchestrator: turns start requests into progressing executions
//!
//! `start` stays bounded: one row write plus one enqueue. The worker entry
//! `run` drives every case of the pinned suite snapshot through the runner
//! under bounded concurrency, updates progress on a stride, and finalizes
//! the aggregate summary. Redelivered jobs resume from the first
//! non-terminal case-result row.

pub mod queue;
pub mod worker;

pub use queue::{Delivery, InMemoryQueue, RunExecutionJob, WorkQueue};
pub use worker::WorkerPool;

use crate::connector::circuit::CircuitBreaker;
use crate::domain::{
    capabilities, Execution, ExecutionId, ExecutionParams, ExecutionStatus, ExecutionSummary,
    FailureLabel, ProgressPct, RequestContext, SuiteId, TestCase,
};
use crate::runner::{CancelFlag, CaseRunner, ExecutionEvents};
use crate::store::{DefinitionStore, ExecutionStore};
use crate::{Error, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, instrument, warn};

/// Orchestrator tuning knobs
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    /// Concurrent cases within one execution (overridable per start request)
    pub case_concurrency: usize,
    /// Fraction of failed cases at which the execution is marked failed
    pub failure_threshold: f64,
    /// Per-execution wall-clock timeout
    pub execution_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            case_concurrency: 5,
            failure_threshold: 1.0,
            execution_timeout: Duration::from_secs(3600),
        }
    }
}

/// Scheduler driving executions through the runner
pub struct Orchestrator {
    definitions: Arc<dyn DefinitionStore>,
    executions: Arc<dyn ExecutionStore>,
    queue: Arc<dyn WorkQueue>,
    runner: Arc<CaseRunner>,
    events: Arc<ExecutionEvents>,
    circuit: Option<Arc<CircuitBreaker>>,
    cancellations: RwLock<HashMap<ExecutionId, CancelFlag>>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        definitions: Arc<dyn DefinitionStore>,
        executions: Arc<dyn ExecutionStore>,
        queue: Arc<dyn WorkQueue>,
        runner: Arc<CaseRunner>,
        events: Arc<ExecutionEvents>,
        circuit: Option<Arc<CircuitBreaker>>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            definitions,
            executions,
            queue,
            runner,
            events,
            circuit,
            cancellations: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Validate, create the pending execution row (idempotent), enqueue the
    /// job, and return. No case work happens inline.
    #[instrument(skip(self, ctx, params), fields(tenant_id = %ctx.tenant_id()))]
    pub async fn start(
        &self,
        ctx: &RequestContext,
        suite_id: &SuiteId,
        params: ExecutionParams,
    ) -> Result<Execution> {
        ctx.require(capabilities::EXECUTIONS_START)?;
        let suite = self.definitions.get_suite(ctx, suite_id).await?;
        let (execution, created_new) = self
            .executions
            .create_execution(ctx, suite_id, suite.version, params)
            .await?;
        if created_new {
            self.queue
                .enqueue(RunExecutionJob {
                    execution_id: execution.id.clone(),
                    tenant_id: execution.tenant_id.clone(),
                })
                .await?;
            info!(execution_id = %execution.id, "execution enqueued");
        }
        Ok(execution)
    }

    /// Mark the execution cancelled and signal in-flight case tasks. Cases
    /// already started may finish; cases not yet started are skipped during
    /// the wind-down.
    #[instrument(skip(self, ctx))]
    pub async fn cancel(&self, ctx: &RequestContext, execution_id: &ExecutionId) -> Result<()> {
        ctx.require(capabilities::EXECUTIONS_CANCEL)?;
        let execution = self.executions.get_execution(ctx, execution_id).await?;
        let was_pending = execution.status == ExecutionStatus::Pending;
        self.executions.mark_cancelled(execution_id).await?;

        if let Some(flag) = self.cancellations.read().get(execution_id) {
            flag.cancel();
        }

        // A pending execution has no worker to wind it down
        if was_pending {
            let worker_ctx = RequestContext::for_worker(execution.tenant_id.clone());
            let (_, cases) = self
                .definitions
                .get_suite_for_execution(&worker_ctx, &execution.suite_id, Some(execution.suite_version))
                .await?;
            self.skip_unfinished(&execution, &cases, FailureLabel::cancelled())
                .await?;
            self.events.complete(execution_id);
        }
        Ok(())
    }

    /// Give every (case, kind) pair a terminal row, skipping whatever is not
    /// yet finished
    async fn skip_unfinished(
        &self,
        execution: &Execution,
        cases: &[TestCase],
        label: FailureLabel,
    ) -> Result<()> {
        for case in cases {
            let rows = self
                .executions
                .record_case_start(&execution.id, &case.id, case.version, &case.evaluator_kinds)
                .await?;
            for row in rows {
                if !row.status.is_terminal() {
                    self.executions
                        .record_case_result(
                            &row.id,
                            crate::domain::CaseOutcome::Skipped {
                                error_kind: label.clone(),
                            },
                            None,
                            None,
                        )
                        .await?;
                }
            }
        }
        Ok(())
    }

    fn register_cancel_flag(&self, execution_id: &ExecutionId) -> CancelFlag {
        let flag = CancelFlag::new();
        self.cancellations
            .write()
            .insert(execution_id.clone(), flag.clone());
        flag
    }

    fn unregister_cancel_flag(&self, execution_id: &ExecutionId) {
        self.cancellations.write().remove(execution_id);
    }

    /// Worker entry: load, mark running, drive all cases, finalize.
    #[instrument(skip(self), fields(execution_id = %job.execution_id))]
    pub async fn run(&self, job: &RunExecutionJob) -> Result<()> {
        let execution = self
            .executions
            .load_execution(&job.tenant_id, &job.execution_id)
            .await?;
        let worker_ctx = RequestContext::for_worker(execution.tenant_id.clone());
        let (_, cases) = self
            .definitions
            .get_suite_for_execution(&worker_ctx, &execution.suite_id, Some(execution.suite_version))
            .await?;

        if execution.is_terminal() {
            // Redelivery of an already-finished job; make the wind-down
            // invariant hold for cancellations that never saw a worker
            if execution.status == ExecutionStatus::Cancelled {
                self.skip_unfinished(&execution, &cases, FailureLabel::cancelled())
                    .await?;
            }
            return Ok(());
        }

        self.executions.mark_running(&execution.id).await?;
        let cancel = self.register_cancel_flag(&execution.id);

        let drive = self.drive_cases(&execution, &cases, &cancel);
        let timed_out = tokio::time::timeout(self.config.execution_timeout, drive)
            .await
            .is_err();
        if timed_out {
            warn!(execution_id = %execution.id, "execution wall clock exceeded");
            cancel.cancel();
            self.skip_unfinished(&execution, &cases, FailureLabel::try_new("timeout".to_string())
                .map_err(|_| Error::internal("timeout label"))?)
                .await?;
        }

        let result = self.finalize(&execution, &cases).await;
        self.unregister_cancel_flag(&execution.id);
        result
    }

    /// Drive every case through the runner under bounded concurrency
    async fn drive_cases(
        &self,
        execution: &Execution,
        cases: &[TestCase],
        cancel: &CancelFlag,
    ) -> Result<()> {
        let max_concurrent = execution
            .params
            .as_ref()
            .get("max_concurrent")
            .and_then(serde_json::Value::as_u64)
            .map_or(self.config.case_concurrency, |n| {
                usize::try_from(n).unwrap_or(self.config.case_concurrency)
            })
            .clamp(1, 64);
        let total = cases.len();
        let stride = (total / 20).max(1);
        let completed = Arc::new(AtomicUsize::new(0));
        let semaphore = Arc::new(Semaphore::new(max_concurrent));
        let mut tasks: JoinSet<Result<()>> = JoinSet::new();

        for case in cases {
            if cancel.is_cancelled() {
                break;
            }
            // Backpressure: while the provider circuit is open, suspend
            // instead of queueing more work against it
            if let Some(circuit) = &self.circuit {
                circuit.wait_until_closed().await;
            }
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|_| Error::internal("case semaphore closed"))?;
            let runner = Arc::clone(&self.runner);
            let executions = Arc::clone(&self.executions);
            let execution = execution.clone();
            let case = case.clone();
            let cancel = cancel.clone();
            let completed = Arc::clone(&completed);

            tasks.spawn(async move {
                let _permit = permit;
                runner.run_case(&execution, &case, &cancel).await?;
                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                if done % stride == 0 || done == total {
                    executions
                        .advance_progress(&execution.id, ProgressPct::from_counts(done, total))
                        .await?;
                }
                Ok(())
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(error = %err, "case task failed"),
                Err(err) => warn!(error = %err, "case task panicked"),
            }
        }
        Ok(())
    }

    /// Compute the summary and move the execution to its terminal status
    async fn finalize(&self, execution: &Execution, cases: &[TestCase]) -> Result<()> {
        let current = self
            .executions
            .load_execution(&execution.tenant_id, &execution.id)
            .await?;
        if current.status == ExecutionStatus::Cancelled {
            self.skip_unfinished(execution, cases, FailureLabel::cancelled())
                .await?;
            self.events.complete(&execution.id);
            info!(execution_id = %execution.id, "execution cancelled");
            return Ok(());
        }

        let results = self.executions.list_case_results(&execution.id).await?;
        let summary = ExecutionSummary::from_results(&results);
        let all_failed = summary.total_cases > 0
            && (summary.failed_cases as f64 / summary.total_cases as f64)
                >= self.config.failure_threshold;

        if all_failed {
            self.executions
                .mark_failed(
                    &execution.id,
                    summary,
                    FailureLabel::try_new("all_cases_failed".to_string())
                        .map_err(|_| Error::internal("failure label"))?,
                )
                .await?;
            info!(execution_id = %execution.id, "execution failed");
        } else {
            self.executions.mark_completed(&execution.id, summary).await?;
            info!(execution_id = %execution.id, "execution completed");
        }
        self.events.complete(&execution.id);
        Ok(())
    }
}
