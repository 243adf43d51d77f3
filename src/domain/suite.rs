//! Suite and test case aggregates
//!
//! Suites are named, versioned, tenant-scoped containers of test cases and
//! evaluator configuration. Every mutation appends the prior state to a
//! history sibling, so version numbers stay dense and strictly increasing.

use crate::domain::identifiers::{CaseId, SuiteId, TenantId, UserId};
use crate::domain::types::{
    CaseContext, EvaluatorKind, Score, SuiteName, UserInput, VersionNumber,
};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use nutype::nutype;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-kind evaluator configuration carried by a suite, opaque to the core
#[nutype(
    derive(Debug, Clone, PartialEq, Serialize, Deserialize, AsRef),
    new_unchecked
)]
pub struct EvaluatorConfig(serde_json::Value);

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self::new(serde_json::Value::Object(serde_json::Map::new()))
    }
}

/// A named, versioned, tenant-scoped container of test cases
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suite {
    pub id: SuiteId,
    pub tenant_id: TenantId,
    pub name: SuiteName,
    pub evaluator_config: EvaluatorConfig,
    pub version: VersionNumber,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: UserId,
    pub updated_by: UserId,
}

/// Historical snapshot of a suite at a given version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteRevision {
    pub suite_id: SuiteId,
    pub tenant_id: TenantId,
    pub version: VersionNumber,
    pub name: SuiteName,
    pub evaluator_config: EvaluatorConfig,
    pub recorded_at: DateTime<Utc>,
    pub recorded_by: UserId,
}

impl Suite {
    /// Snapshot of the current state, suitable for the history sibling
    pub fn revision(&self) -> SuiteRevision {
        SuiteRevision {
            suite_id: self.id.clone(),
            tenant_id: self.tenant_id.clone(),
            version: self.version,
            name: self.name.clone(),
            evaluator_config: self.evaluator_config.clone(),
            recorded_at: self.updated_at,
            recorded_by: self.updated_by.clone(),
        }
    }
}

/// Patch applied by `update_suite`; `expected_version` detects lost updates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuitePatch {
    pub expected_version: VersionNumber,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluator_config: Option<EvaluatorConfig>,
}

/// Field-level difference between two suite revisions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub from: serde_json::Value,
    pub to: serde_json::Value,
}

/// Diff document produced by `compare_suite_versions`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SuiteDiff {
    pub changes: BTreeMap<String, FieldChange>,
}

impl SuiteDiff {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Compute the field-level diff between two revisions of the same suite
    pub fn between(a: &SuiteRevision, b: &SuiteRevision) -> Result<Self> {
        let mut changes = BTreeMap::new();
        if a.name != b.name {
            changes.insert(
                "name".to_string(),
                FieldChange {
                    from: serde_json::to_value(&a.name)?,
                    to: serde_json::to_value(&b.name)?,
                },
            );
        }
        if a.evaluator_config != b.evaluator_config {
            changes.insert(
                "evaluator_config".to_string(),
                FieldChange {
                    from: serde_json::to_value(&a.evaluator_config)?,
                    to: serde_json::to_value(&b.evaluator_config)?,
                },
            );
        }
        Ok(Self { changes })
    }
}

/// Pass threshold expectation for one evaluator kind on one case
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Expectation {
    pub min_score: Score,
}

/// A single scenario: an input, expected criteria, and the evaluator kinds
/// to apply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub id: CaseId,
    pub tenant_id: TenantId,
    pub suite_id: SuiteId,
    pub evaluator_kinds: Vec<EvaluatorKind>,
    pub expected: BTreeMap<EvaluatorKind, Expectation>,
    pub user_input: UserInput,
    pub context: CaseContext,
    pub source_conversation_id: Option<String>,
    pub version: VersionNumber,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TestCase {
    /// Effective threshold for a kind, if the case declares one
    pub fn threshold_for(&self, kind: &EvaluatorKind) -> Option<Score> {
        self.expected.get(kind).map(|e| e.min_score)
    }
}

/// Historical snapshot of a test case at a given version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCaseRevision {
    pub case_id: CaseId,
    pub tenant_id: TenantId,
    pub version: VersionNumber,
    pub payload: TestCasePayload,
    pub recorded_at: DateTime<Utc>,
}

/// Create/update payload for a test case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCasePayload {
    pub evaluator_kinds: Vec<EvaluatorKind>,
    #[serde(default)]
    pub expected: BTreeMap<EvaluatorKind, Expectation>,
    pub user_input: UserInput,
    #[serde(default)]
    pub context: CaseContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_conversation_id: Option<String>,
}

impl TestCasePayload {
    /// Validate and normalize: kinds are deduplicated and put in a stable
    /// (sorted) order so evaluator processing order is deterministic
    pub fn normalized(mut self) -> Result<Self> {
        if self.evaluator_kinds.is_empty() {
            return Err(Error::invalid("at least one evaluator kind is required"));
        }
        self.evaluator_kinds.sort();
        self.evaluator_kinds.dedup();
        for kind in self.expected.keys() {
            if !self.evaluator_kinds.contains(kind) {
                return Err(Error::invalid(format!(
                    "expectation for {kind} does not match any requested evaluator kind"
                )));
            }
        }
        Ok(self)
    }
}

impl TestCase {
    /// Apply a normalized payload as a new version of this case
    pub fn apply(&self, payload: TestCasePayload, now: DateTime<Utc>) -> Self {
        Self {
            id: self.id.clone(),
            tenant_id: self.tenant_id.clone(),
            suite_id: self.suite_id.clone(),
            evaluator_kinds: payload.evaluator_kinds,
            expected: payload.expected,
            user_input: payload.user_input,
            context: payload.context,
            source_conversation_id: payload.source_conversation_id,
            version: self.version.next(),
            created_at: self.created_at,
            updated_at: now,
        }
    }
}
