//! In-memory execution store

use crate::domain::{
    CaseId, CaseOutcome, CaseResult, CaseResultId, EvaluatorKind, Execution, ExecutionId,
    ExecutionParams, ExecutionStatus, ExecutionSummary, FailureLabel, IdempotencyKey, LatencyMs,
    ProgressPct, RequestContext, SuiteId, SystemResponse, TenantId, VersionNumber,
};
use crate::store::ExecutionStore;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Default)]
struct Inner {
    executions: HashMap<ExecutionId, Execution>,
    idempotency: HashMap<(TenantId, SuiteId, IdempotencyKey), ExecutionId>,
    results: HashMap<CaseResultId, CaseResult>,
    result_index: HashMap<(ExecutionId, CaseId, EvaluatorKind), CaseResultId>,
    execution_results: HashMap<ExecutionId, Vec<CaseResultId>>,
}

/// In-memory `ExecutionStore`; transitions are serialized by the store lock
#[derive(Default)]
pub struct InMemoryExecutionStore {
    inner: RwLock<Inner>,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn transition(
        &self,
        execution_id: &ExecutionId,
        next: ExecutionStatus,
        apply: impl FnOnce(&mut Execution),
    ) -> Result<()> {
        let mut inner = self.inner.write();
        let execution = inner
            .executions
            .get_mut(execution_id)
            .ok_or_else(|| Error::not_found(format!("execution {execution_id}")))?;
        execution.status = execution.status.transition_to(next)?;
        apply(execution);
        Ok(())
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn create_execution(
        &self,
        ctx: &RequestContext,
        suite_id: &SuiteId,
        suite_version: VersionNumber,
        params: ExecutionParams,
    ) -> Result<(Execution, bool)> {
        let mut inner = self.inner.write();
        if let Some(key) = ctx.idempotency_key() {
            let idx = (
                ctx.tenant_id().clone(),
                suite_id.clone(),
                key.clone(),
            );
            if let Some(existing_id) = inner.idempotency.get(&idx) {
                let existing = inner
                    .executions
                    .get(existing_id)
                    .cloned()
                    .ok_or_else(|| Error::internal("idempotency index points at missing row"))?;
                return Ok((existing, false));
            }
        }
        let execution = Execution {
            id: ExecutionId::generate(),
            tenant_id: ctx.tenant_id().clone(),
            suite_id: suite_id.clone(),
            suite_version,
            status: ExecutionStatus::Pending,
            progress_pct: ProgressPct::zero(),
            params,
            summary: None,
            error_kind: None,
            idempotency_key: ctx.idempotency_key().cloned(),
            started_at: Utc::now(),
            finished_at: None,
        };
        if let Some(key) = ctx.idempotency_key() {
            inner.idempotency.insert(
                (ctx.tenant_id().clone(), suite_id.clone(), key.clone()),
                execution.id.clone(),
            );
        }
        inner
            .executions
            .insert(execution.id.clone(), execution.clone());
        Ok((execution, true))
    }

    async fn get_execution(
        &self,
        ctx: &RequestContext,
        execution_id: &ExecutionId,
    ) -> Result<Execution> {
        self.load_execution(ctx.tenant_id(), execution_id).await
    }

    async fn load_execution(
        &self,
        tenant_id: &TenantId,
        execution_id: &ExecutionId,
    ) -> Result<Execution> {
        let inner = self.inner.read();
        inner
            .executions
            .get(execution_id)
            .filter(|execution| execution.tenant_id == *tenant_id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("execution {execution_id}")))
    }

    async fn list_executions(
        &self,
        ctx: &RequestContext,
        suite_id: &SuiteId,
    ) -> Result<Vec<Execution>> {
        let inner = self.inner.read();
        let mut executions: Vec<Execution> = inner
            .executions
            .values()
            .filter(|execution| {
                execution.tenant_id == *ctx.tenant_id() && execution.suite_id == *suite_id
            })
            .cloned()
            .collect();
        executions.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        Ok(executions)
    }

    async fn mark_running(&self, execution_id: &ExecutionId) -> Result<()> {
        // A redelivered job may find the row already running; tolerate the
        // replay so resumption can proceed
        {
            let inner = self.inner.read();
            if let Some(execution) = inner.executions.get(execution_id) {
                if execution.status == ExecutionStatus::Running {
                    return Ok(());
                }
            }
        }
        self.transition(execution_id, ExecutionStatus::Running, |_| {})
    }

    async fn mark_completed(
        &self,
        execution_id: &ExecutionId,
        summary: ExecutionSummary,
    ) -> Result<()> {
        self.transition(execution_id, ExecutionStatus::Completed, |execution| {
            execution.summary = Some(summary);
            execution.progress_pct = ProgressPct::complete();
            execution.finished_at = Some(Utc::now());
        })
    }

    async fn mark_failed(
        &self,
        execution_id: &ExecutionId,
        summary: ExecutionSummary,
        error_kind: FailureLabel,
    ) -> Result<()> {
        self.transition(execution_id, ExecutionStatus::Failed, |execution| {
            execution.summary = Some(summary);
            execution.error_kind = Some(error_kind);
            execution.finished_at = Some(Utc::now());
        })
    }

    async fn mark_cancelled(&self, execution_id: &ExecutionId) -> Result<()> {
        self.transition(execution_id, ExecutionStatus::Cancelled, |execution| {
            execution.finished_at = Some(Utc::now());
        })
    }

    async fn record_case_start(
        &self,
        execution_id: &ExecutionId,
        case_id: &CaseId,
        case_version: VersionNumber,
        evaluator_kinds: &[EvaluatorKind],
    ) -> Result<Vec<CaseResult>> {
        let mut inner = self.inner.write();
        let tenant_id = inner
            .executions
            .get(execution_id)
            .map(|execution| execution.tenant_id.clone())
            .ok_or_else(|| Error::not_found(format!("execution {execution_id}")))?;

        let mut rows = Vec::with_capacity(evaluator_kinds.len());
        for kind in evaluator_kinds {
            let idx = (execution_id.clone(), case_id.clone(), kind.clone());
            if let Some(existing_id) = inner.result_index.get(&idx) {
                let existing = inner
                    .results
                    .get(existing_id)
                    .cloned()
                    .ok_or_else(|| Error::internal("result index points at missing row"))?;
                rows.push(existing);
                continue;
            }
            let row = CaseResult::pending(
                tenant_id.clone(),
                execution_id.clone(),
                case_id.clone(),
                case_version,
                kind.clone(),
                Utc::now(),
            );
            inner.result_index.insert(idx, row.id.clone());
            inner
                .execution_results
                .entry(execution_id.clone())
                .or_default()
                .push(row.id.clone());
            inner.results.insert(row.id.clone(), row.clone());
            rows.push(row);
        }
        Ok(rows)
    }

    async fn record_case_result(
        &self,
        result_id: &CaseResultId,
        outcome: CaseOutcome,
        system_response: Option<SystemResponse>,
        latency_ms: Option<LatencyMs>,
    ) -> Result<CaseResult> {
        let mut inner = self.inner.write();
        let row = inner
            .results
            .get_mut(result_id)
            .ok_or_else(|| Error::not_found(format!("case result {result_id}")))?;
        row.finish(outcome, system_response, latency_ms, Utc::now());
        Ok(row.clone())
    }

    async fn list_case_results(&self, execution_id: &ExecutionId) -> Result<Vec<CaseResult>> {
        let inner = self.inner.read();
        let ids = inner
            .execution_results
            .get(execution_id)
            .cloned()
            .unwrap_or_default();
        Ok(ids
            .iter()
            .filter_map(|id| inner.results.get(id).cloned())
            .collect())
    }

    async fn advance_progress(
        &self,
        execution_id: &ExecutionId,
        progress: ProgressPct,
    ) -> Result<()> {
        let mut inner = self.inner.write();
        let execution = inner
            .executions
            .get_mut(execution_id)
            .ok_or_else(|| Error::not_found(format!("execution {execution_id}")))?;
        // Compare-and-set: a stale writer never decreases progress
        if progress > execution.progress_pct {
            execution.progress_pct = progress;
        }
        Ok(())
    }

    async fn get_status(
        &self,
        ctx: &RequestContext,
        execution_id: &ExecutionId,
    ) -> Result<(ExecutionStatus, ProgressPct)> {
        let execution = self.load_execution(ctx.tenant_id(), execution_id).await?;
        Ok((execution.status, execution.progress_pct))
    }

    async fn get_summary(
        &self,
        ctx: &RequestContext,
        execution_id: &ExecutionId,
    ) -> Result<ExecutionSummary> {
        let execution = self.load_execution(ctx.tenant_id(), execution_id).await?;
        if let Some(summary) = execution.summary {
            return Ok(summary);
        }
        let results = self.list_case_results(execution_id).await?;
        Ok(ExecutionSummary::from_results(&results))
    }
}
