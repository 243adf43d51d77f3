//! Execution and case-result aggregates
//!
//! An execution is one run of a suite. Its status machine is monotonic:
//! once a terminal status is reached no further transitions are accepted.
//! Case results are append-once rows keyed by (case, evaluator kind).

use crate::domain::identifiers::{CaseId, CaseResultId, ExecutionId, SuiteId, TenantId};
use crate::domain::types::{
    EvaluatorKind, ExecutionParams, FailureLabel, IdempotencyKey, LatencyMs, ProgressPct,
    Reasoning, Score, SystemResponse, VersionNumber,
};
use crate::domain::verdict::Verdict;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Status of a suite execution
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, derive_more::Display,
)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    #[display("pending")]
    Pending,
    #[display("running")]
    Running,
    #[display("completed")]
    Completed,
    #[display("failed")]
    Failed,
    #[display("cancelled")]
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Valid edges of the status machine
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Cancelled)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
                | (Self::Running, Self::Cancelled)
        )
    }

    /// Check an edge, failing with `IllegalTransition` when it is not valid
    pub fn transition_to(self, next: Self) -> Result<Self> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(Error::IllegalTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(Error::invalid(format!("unknown execution status {other}"))),
        }
    }
}

/// Status of one (case, evaluator kind) result row
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, derive_more::Display,
)]
#[serde(rename_all = "snake_case")]
pub enum CaseResultStatus {
    #[display("pending")]
    Pending,
    #[display("ok")]
    Ok,
    #[display("failed")]
    Failed,
    #[display("skipped")]
    Skipped,
}

impl CaseResultStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "ok" => Ok(Self::Ok),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            other => Err(Error::invalid(format!("unknown result status {other}"))),
        }
    }
}

/// A run of a suite, with its own status, progress, and summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,
    pub tenant_id: TenantId,
    pub suite_id: SuiteId,
    /// Suite definition version pinned at start for snapshot immutability
    pub suite_version: VersionNumber,
    pub status: ExecutionStatus,
    pub progress_pct: ProgressPct,
    pub params: ExecutionParams,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<ExecutionSummary>,
    /// Failure classification set when the execution is marked failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<FailureLabel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<IdempotencyKey>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Execution {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Terminal outcome written by the runner for one evaluator row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CaseOutcome {
    /// The evaluator produced a verdict
    Verdict(Verdict),
    /// The evaluator (or the conversation call) failed
    Failed { error_kind: FailureLabel },
    /// The row was never run (cancellation, unknown evaluator)
    Skipped { error_kind: FailureLabel },
}

/// One (case, evaluator kind) result row of an execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseResult {
    pub id: CaseResultId,
    pub tenant_id: TenantId,
    pub execution_id: ExecutionId,
    pub case_id: CaseId,
    /// Case definition version pinned so results stay reproducible even if
    /// the case is edited later
    pub case_version: VersionNumber,
    pub evaluator_kind: EvaluatorKind,
    pub status: CaseResultStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<Score>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<Reasoning>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_response: Option<SystemResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<LatencyMs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<FailureLabel>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl CaseResult {
    /// Fresh pending row, created when a case starts
    pub fn pending(
        tenant_id: TenantId,
        execution_id: ExecutionId,
        case_id: CaseId,
        case_version: VersionNumber,
        evaluator_kind: EvaluatorKind,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: CaseResultId::generate(),
            tenant_id,
            execution_id,
            case_id,
            case_version,
            evaluator_kind,
            status: CaseResultStatus::Pending,
            score: None,
            passed: None,
            reasoning: None,
            system_response: None,
            latency_ms: None,
            error_kind: None,
            created_at: now,
            finished_at: None,
        }
    }

    /// Apply a terminal outcome. Returns `false` (leaving the row untouched)
    /// when the row is already terminal, making repeated writes no-ops.
    pub fn finish(
        &mut self,
        outcome: CaseOutcome,
        system_response: Option<SystemResponse>,
        latency_ms: Option<LatencyMs>,
        now: DateTime<Utc>,
    ) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        match outcome {
            CaseOutcome::Verdict(verdict) => {
                self.status = CaseResultStatus::Ok;
                self.score = Some(verdict.score);
                self.passed = Some(verdict.passed);
                self.reasoning = Some(verdict.reasoning);
            }
            CaseOutcome::Failed { error_kind } => {
                self.status = CaseResultStatus::Failed;
                self.error_kind = Some(error_kind);
            }
            CaseOutcome::Skipped { error_kind } => {
                self.status = CaseResultStatus::Skipped;
                self.error_kind = Some(error_kind);
            }
        }
        self.system_response = system_response;
        self.latency_ms = latency_ms;
        self.finished_at = Some(now);
        true
    }
}

/// Aggregate outcome figures for one evaluator kind
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EvaluatorSummary {
    pub evaluated: u64,
    pub passed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub pass_rate: f64,
    pub p50_latency_ms: u64,
    pub p95_latency_ms: u64,
}

/// Per-case rollup in the summary document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseSummary {
    pub case_id: CaseId,
    pub ok: u64,
    pub failed: u64,
    pub skipped: u64,
    pub passed_all: bool,
}

/// Summary document computed when an execution reaches a terminal status
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub total_cases: u64,
    pub completed_cases: u64,
    pub failed_cases: u64,
    pub skipped_cases: u64,
    pub evaluators: BTreeMap<EvaluatorKind, EvaluatorSummary>,
    #[serde(default)]
    pub cases: Vec<CaseSummary>,
    pub error_counts: BTreeMap<FailureLabel, u64>,
}

fn percentile(sorted: &[u64], pct: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = ((sorted.len() as f64) * pct).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

impl ExecutionSummary {
    /// Compute the summary from the execution's result rows. A case is
    /// counted failed only when every one of its rows failed; per-evaluator
    /// failures are isolated.
    pub fn from_results(results: &[CaseResult]) -> Self {
        let mut by_case: BTreeMap<String, Vec<&CaseResult>> = BTreeMap::new();
        for result in results {
            by_case
                .entry(result.case_id.to_string())
                .or_default()
                .push(result);
        }

        let mut evaluators: BTreeMap<EvaluatorKind, EvaluatorSummary> = BTreeMap::new();
        let mut latencies: BTreeMap<EvaluatorKind, Vec<u64>> = BTreeMap::new();
        let mut error_counts: BTreeMap<FailureLabel, u64> = BTreeMap::new();
        let mut cases = Vec::with_capacity(by_case.len());
        let mut completed_cases = 0;
        let mut failed_cases = 0;
        let mut skipped_cases = 0;

        for rows in by_case.values() {
            let mut case_ok = 0;
            let mut case_failed = 0;
            let mut case_skipped = 0;
            let mut passed_all = true;
            for row in rows {
                let entry = evaluators.entry(row.evaluator_kind.clone()).or_default();
                match row.status {
                    CaseResultStatus::Ok => {
                        entry.evaluated += 1;
                        case_ok += 1;
                        if row.passed == Some(true) {
                            entry.passed += 1;
                        } else {
                            passed_all = false;
                        }
                        if let Some(latency) = row.latency_ms {
                            latencies
                                .entry(row.evaluator_kind.clone())
                                .or_default()
                                .push(latency.into_inner());
                        }
                    }
                    CaseResultStatus::Failed => {
                        entry.failed += 1;
                        case_failed += 1;
                        passed_all = false;
                    }
                    CaseResultStatus::Skipped => {
                        entry.skipped += 1;
                        case_skipped += 1;
                        passed_all = false;
                    }
                    CaseResultStatus::Pending => {
                        passed_all = false;
                    }
                }
                if let Some(error_kind) = &row.error_kind {
                    *error_counts.entry(error_kind.clone()).or_insert(0) += 1;
                }
            }

            let case_id = rows
                .first()
                .map(|r| r.case_id.clone())
                .unwrap_or_else(CaseId::generate);
            cases.push(CaseSummary {
                case_id,
                ok: case_ok,
                failed: case_failed,
                skipped: case_skipped,
                passed_all,
            });

            // A case failed only if the conversation call took every row down
            if case_failed > 0 && case_ok == 0 && case_skipped == 0 {
                failed_cases += 1;
            } else if case_skipped > 0 && case_ok == 0 && case_failed == 0 {
                skipped_cases += 1;
            } else {
                completed_cases += 1;
            }
        }

        for (kind, entry) in &mut evaluators {
            if entry.evaluated > 0 {
                entry.pass_rate = entry.passed as f64 / entry.evaluated as f64;
            }
            if let Some(values) = latencies.get_mut(kind) {
                values.sort_unstable();
                entry.p50_latency_ms = percentile(values, 0.50);
                entry.p95_latency_ms = percentile(values, 0.95);
            }
        }

        Self {
            total_cases: by_case.len() as u64,
            completed_cases,
            failed_cases,
            skipped_cases,
            evaluators,
            cases,
            error_counts,
        }
    }
}
