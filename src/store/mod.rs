//! Persistence ports for definitions and executions
//!
//! The Definition Store owns suites and test cases (with their version
//! history); the Execution Store owns executions and case results. All
//! cross-component access goes through these traits; rows never cross
//! tenants.

pub mod filter;
pub mod memory;
pub mod postgres;

use crate::domain::{
    CaseId, CaseOutcome, CaseResult, EvaluatorConfig, EvaluatorKind, Execution, ExecutionId,
    ExecutionParams, ExecutionStatus, ExecutionSummary, FailureLabel, LatencyMs, ProgressPct,
    RequestContext, Suite, SuiteDiff, SuiteId, SuiteName, SuitePatch, SystemResponse, TenantId,
    TestCase, TestCasePayload, VersionNumber,
};
use crate::Result;
use async_trait::async_trait;

pub use filter::{Filter, FilterOp, ListQuery, Page, Sort, SortDirection};

use crate::domain::CaseResultId;

/// Durable, versioned storage of suites and test cases, scoped by tenant
#[async_trait]
pub trait DefinitionStore: Send + Sync {
    /// Create a suite at version 1; `Conflict` when `(tenant, name)` exists
    async fn create_suite(
        &self,
        ctx: &RequestContext,
        name: SuiteName,
        evaluator_config: EvaluatorConfig,
    ) -> Result<Suite>;

    async fn get_suite(&self, ctx: &RequestContext, suite_id: &SuiteId) -> Result<Suite>;

    /// Append the prior row to the history sibling and increment the
    /// version; losers of a concurrent update observe `StaleVersion`
    async fn update_suite(
        &self,
        ctx: &RequestContext,
        suite_id: &SuiteId,
        patch: SuitePatch,
    ) -> Result<Suite>;

    async fn add_case(
        &self,
        ctx: &RequestContext,
        suite_id: &SuiteId,
        payload: TestCasePayload,
    ) -> Result<TestCase>;

    async fn update_case(
        &self,
        ctx: &RequestContext,
        case_id: &CaseId,
        expected_version: VersionNumber,
        payload: TestCasePayload,
    ) -> Result<TestCase>;

    async fn list_cases(&self, ctx: &RequestContext, suite_id: &SuiteId) -> Result<Vec<TestCase>>;

    async fn list_suites(&self, ctx: &RequestContext, query: ListQuery) -> Result<Page<Suite>>;

    /// Immutable snapshot for an execution; current version when omitted
    async fn get_suite_for_execution(
        &self,
        ctx: &RequestContext,
        suite_id: &SuiteId,
        version: Option<VersionNumber>,
    ) -> Result<(Suite, Vec<TestCase>)>;

    async fn compare_suite_versions(
        &self,
        ctx: &RequestContext,
        suite_id: &SuiteId,
        v1: VersionNumber,
        v2: VersionNumber,
    ) -> Result<SuiteDiff>;

    /// Re-apply a historical definition as a new version (never rewinds)
    async fn restore_suite(
        &self,
        ctx: &RequestContext,
        suite_id: &SuiteId,
        version: VersionNumber,
    ) -> Result<Suite>;
}

/// Tracking of execution aggregates and per-case results
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Idempotent create: an existing `(tenant, suite, idempotency_key)` row
    /// is returned with `created_new = false`
    async fn create_execution(
        &self,
        ctx: &RequestContext,
        suite_id: &SuiteId,
        suite_version: VersionNumber,
        params: ExecutionParams,
    ) -> Result<(Execution, bool)>;

    async fn get_execution(
        &self,
        ctx: &RequestContext,
        execution_id: &ExecutionId,
    ) -> Result<Execution>;

    /// Worker-side load; the tenant comes from the queue job, not a caller
    async fn load_execution(
        &self,
        tenant_id: &TenantId,
        execution_id: &ExecutionId,
    ) -> Result<Execution>;

    async fn list_executions(
        &self,
        ctx: &RequestContext,
        suite_id: &SuiteId,
    ) -> Result<Vec<Execution>>;

    async fn mark_running(&self, execution_id: &ExecutionId) -> Result<()>;

    async fn mark_completed(
        &self,
        execution_id: &ExecutionId,
        summary: ExecutionSummary,
    ) -> Result<()>;

    async fn mark_failed(
        &self,
        execution_id: &ExecutionId,
        summary: ExecutionSummary,
        error_kind: FailureLabel,
    ) -> Result<()>;

    async fn mark_cancelled(&self, execution_id: &ExecutionId) -> Result<()>;

    /// Pre-create one pending row per evaluator kind; idempotent on replay
    /// (existing rows for the same `(case, kind)` are returned as-is)
    async fn record_case_start(
        &self,
        execution_id: &ExecutionId,
        case_id: &CaseId,
        case_version: VersionNumber,
        evaluator_kinds: &[EvaluatorKind],
    ) -> Result<Vec<CaseResult>>;

    /// Transition a pending row to a terminal state exactly once; a second
    /// invocation is a no-op returning the existing row
    async fn record_case_result(
        &self,
        result_id: &CaseResultId,
        outcome: CaseOutcome,
        system_response: Option<SystemResponse>,
        latency_ms: Option<LatencyMs>,
    ) -> Result<CaseResult>;

    async fn list_case_results(&self, execution_id: &ExecutionId) -> Result<Vec<CaseResult>>;

    /// Compare-and-set progress write; a stale value never decreases it
    async fn advance_progress(
        &self,
        execution_id: &ExecutionId,
        progress: ProgressPct,
    ) -> Result<()>;

    async fn get_status(
        &self,
        ctx: &RequestContext,
        execution_id: &ExecutionId,
    ) -> Result<(ExecutionStatus, ProgressPct)>;

    /// Stored summary for terminal executions, otherwise computed live from
    /// the result rows
    async fn get_summary(
        &self,
        ctx: &RequestContext,
        execution_id: &ExecutionId,
    ) -> Result<ExecutionSummary>;
}
