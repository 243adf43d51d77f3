//! In-memory definition store

use crate::domain::{
    CaseId, EvaluatorConfig, RequestContext, Suite, SuiteDiff, SuiteId, SuiteName, SuitePatch,
    SuiteRevision, TenantId, TestCase, TestCasePayload, TestCaseRevision, VersionNumber,
};
use crate::store::filter::{
    matches_filter, compare_values, CursorPosition, FilterOp, ListQuery, Page, SortDirection,
};
use crate::store::DefinitionStore;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Default)]
struct Inner {
    suites: HashMap<(TenantId, SuiteId), Suite>,
    suite_history: HashMap<(TenantId, SuiteId), Vec<SuiteRevision>>,
    suite_names: HashMap<(TenantId, String), SuiteId>,
    cases: HashMap<(TenantId, CaseId), TestCase>,
    case_history: HashMap<(TenantId, CaseId), Vec<TestCaseRevision>>,
    suite_cases: HashMap<(TenantId, SuiteId), Vec<CaseId>>,
}

/// In-memory `DefinitionStore`; mutations are serialized by the store lock
#[derive(Default)]
pub struct InMemoryDefinitionStore {
    inner: RwLock<Inner>,
}

impl InMemoryDefinitionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Extract a filterable field value from a suite
fn suite_field(suite: &Suite, field: &str) -> serde_json::Value {
    match field {
        "name" => serde_json::Value::String(suite.name.to_string()),
        "version" => serde_json::Value::from(suite.version.into_inner()),
        "created_at" => serde_json::Value::String(suite.created_at.to_rfc3339()),
        "updated_at" => serde_json::Value::String(suite.updated_at.to_rfc3339()),
        "created_by" => serde_json::Value::String(suite.created_by.to_string()),
        "updated_by" => serde_json::Value::String(suite.updated_by.to_string()),
        _ => serde_json::Value::Null,
    }
}

fn suite_matches(suite: &Suite, query: &ListQuery) -> bool {
    query.filters.iter().all(|filter| {
        let value = suite_field(suite, &filter.field);
        let other = if filter.op == FilterOp::NeField {
            filter
                .value
                .as_str()
                .map(|field| suite_field(suite, field))
        } else {
            None
        };
        matches_filter(filter, &value, other.as_ref())
    })
}

impl Inner {
    fn suite(&self, tenant_id: &TenantId, suite_id: &SuiteId) -> Result<&Suite> {
        self.suites
            .get(&(tenant_id.clone(), suite_id.clone()))
            .ok_or_else(|| Error::not_found(format!("suite {suite_id}")))
    }

    fn revision(
        &self,
        tenant_id: &TenantId,
        suite_id: &SuiteId,
        version: VersionNumber,
    ) -> Result<SuiteRevision> {
        let current = self.suite(tenant_id, suite_id)?;
        if current.version == version {
            return Ok(current.revision());
        }
        self.suite_history
            .get(&(tenant_id.clone(), suite_id.clone()))
            .and_then(|history| history.iter().find(|rev| rev.version == version))
            .cloned()
            .ok_or_else(|| Error::not_found(format!("suite {suite_id} version {version}")))
    }

    fn apply_suite_update(
        &mut self,
        ctx: &RequestContext,
        suite_id: &SuiteId,
        expected_version: VersionNumber,
        evaluator_config: Option<EvaluatorConfig>,
    ) -> Result<Suite> {
        let key = (ctx.tenant_id().clone(), suite_id.clone());
        let suite = self
            .suites
            .get_mut(&key)
            .ok_or_else(|| Error::not_found(format!("suite {suite_id}")))?;
        if suite.version != expected_version {
            return Err(Error::StaleVersion {
                expected: expected_version.into_inner(),
                current: suite.version.into_inner(),
            });
        }
        let prior = suite.revision();
        if let Some(config) = evaluator_config {
            suite.evaluator_config = config;
        }
        suite.version = suite.version.next();
        suite.updated_at = Utc::now();
        suite.updated_by = ctx.user_id().clone();
        let updated = suite.clone();
        self.suite_history.entry(key).or_default().push(prior);
        Ok(updated)
    }
}

#[async_trait]
impl DefinitionStore for InMemoryDefinitionStore {
    async fn create_suite(
        &self,
        ctx: &RequestContext,
        name: SuiteName,
        evaluator_config: EvaluatorConfig,
    ) -> Result<Suite> {
        let mut inner = self.inner.write();
        let name_key = (ctx.tenant_id().clone(), name.to_string());
        if inner.suite_names.contains_key(&name_key) {
            return Err(Error::conflict(format!("suite name {name} already exists")));
        }
        let now = Utc::now();
        let suite = Suite {
            id: SuiteId::generate(),
            tenant_id: ctx.tenant_id().clone(),
            name,
            evaluator_config,
            version: VersionNumber::first(),
            created_at: now,
            updated_at: now,
            created_by: ctx.user_id().clone(),
            updated_by: ctx.user_id().clone(),
        };
        inner.suite_names.insert(name_key, suite.id.clone());
        inner.suites.insert(
            (ctx.tenant_id().clone(), suite.id.clone()),
            suite.clone(),
        );
        Ok(suite)
    }

    async fn get_suite(&self, ctx: &RequestContext, suite_id: &SuiteId) -> Result<Suite> {
        let inner = self.inner.read();
        inner.suite(ctx.tenant_id(), suite_id).cloned()
    }

    async fn update_suite(
        &self,
        ctx: &RequestContext,
        suite_id: &SuiteId,
        patch: SuitePatch,
    ) -> Result<Suite> {
        let mut inner = self.inner.write();
        inner.apply_suite_update(ctx, suite_id, patch.expected_version, patch.evaluator_config)
    }

    async fn add_case(
        &self,
        ctx: &RequestContext,
        suite_id: &SuiteId,
        payload: TestCasePayload,
    ) -> Result<TestCase> {
        let payload = payload.normalized()?;
        let mut inner = self.inner.write();
        inner.suite(ctx.tenant_id(), suite_id)?;
        let now = Utc::now();
        let case = TestCase {
            id: CaseId::generate(),
            tenant_id: ctx.tenant_id().clone(),
            suite_id: suite_id.clone(),
            evaluator_kinds: payload.evaluator_kinds,
            expected: payload.expected,
            user_input: payload.user_input,
            context: payload.context,
            source_conversation_id: payload.source_conversation_id,
            version: VersionNumber::first(),
            created_at: now,
            updated_at: now,
        };
        inner
            .suite_cases
            .entry((ctx.tenant_id().clone(), suite_id.clone()))
            .or_default()
            .push(case.id.clone());
        inner
            .cases
            .insert((ctx.tenant_id().clone(), case.id.clone()), case.clone());
        Ok(case)
    }

    async fn update_case(
        &self,
        ctx: &RequestContext,
        case_id: &CaseId,
        expected_version: VersionNumber,
        payload: TestCasePayload,
    ) -> Result<TestCase> {
        let payload = payload.normalized()?;
        let mut inner = self.inner.write();
        let key = (ctx.tenant_id().clone(), case_id.clone());
        let case = inner
            .cases
            .get(&key)
            .ok_or_else(|| Error::not_found(format!("case {case_id}")))?;
        if case.version != expected_version {
            return Err(Error::StaleVersion {
                expected: expected_version.into_inner(),
                current: case.version.into_inner(),
            });
        }
        let prior = TestCaseRevision {
            case_id: case.id.clone(),
            tenant_id: case.tenant_id.clone(),
            version: case.version,
            payload: TestCasePayload {
                evaluator_kinds: case.evaluator_kinds.clone(),
                expected: case.expected.clone(),
                user_input: case.user_input.clone(),
                context: case.context.clone(),
                source_conversation_id: case.source_conversation_id.clone(),
            },
            recorded_at: case.updated_at,
        };
        let updated = case.apply(payload, Utc::now());
        inner.case_history.entry(key.clone()).or_default().push(prior);
        inner.cases.insert(key, updated.clone());
        Ok(updated)
    }

    async fn list_cases(&self, ctx: &RequestContext, suite_id: &SuiteId) -> Result<Vec<TestCase>> {
        let inner = self.inner.read();
        inner.suite(ctx.tenant_id(), suite_id)?;
        let ids = inner
            .suite_cases
            .get(&(ctx.tenant_id().clone(), suite_id.clone()))
            .cloned()
            .unwrap_or_default();
        Ok(ids
            .iter()
            .filter_map(|id| {
                inner
                    .cases
                    .get(&(ctx.tenant_id().clone(), id.clone()))
                    .cloned()
            })
            .collect())
    }

    async fn list_suites(&self, ctx: &RequestContext, query: ListQuery) -> Result<Page<Suite>> {
        let query = query.validated()?;
        let inner = self.inner.read();

        let mut matched: Vec<&Suite> = inner
            .suites
            .iter()
            .filter(|((tenant, _), _)| tenant == ctx.tenant_id())
            .map(|(_, suite)| suite)
            .filter(|suite| suite_matches(suite, &query))
            .collect();

        let sort_field = query.sort.field.clone();
        matched.sort_by(|a, b| {
            let ordering = compare_values(&suite_field(a, &sort_field), &suite_field(b, &sort_field))
                .then_with(|| a.id.to_string().cmp(&b.id.to_string()));
            match query.sort.direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            }
        });

        let start = match &query.cursor {
            Some(cursor) => {
                let position = CursorPosition::decode(cursor)?;
                matched
                    .iter()
                    .position(|suite| {
                        let ordering = compare_values(
                            &suite_field(suite, &sort_field),
                            &position.last,
                        )
                        .then_with(|| suite.id.to_string().cmp(&position.id.to_string()));
                        match query.sort.direction {
                            SortDirection::Asc => ordering.is_gt(),
                            SortDirection::Desc => ordering.is_lt(),
                        }
                    })
                    .unwrap_or(matched.len())
            }
            None => 0,
        };

        let page: Vec<Suite> = matched
            .iter()
            .skip(start)
            .take(query.limit)
            .map(|suite| (*suite).clone())
            .collect();

        let next_cursor = if start + page.len() < matched.len() {
            page.last()
                .map(|last| {
                    CursorPosition {
                        last: suite_field(last, &sort_field),
                        id: last.id.clone(),
                    }
                    .encode()
                })
                .transpose()?
        } else {
            None
        };

        Ok(Page {
            items: page,
            next_cursor,
        })
    }

    async fn get_suite_for_execution(
        &self,
        ctx: &RequestContext,
        suite_id: &SuiteId,
        version: Option<VersionNumber>,
    ) -> Result<(Suite, Vec<TestCase>)> {
        let snapshot = {
            let inner = self.inner.read();
            let current = inner.suite(ctx.tenant_id(), suite_id)?.clone();
            match version {
                None => current,
                Some(v) if v == current.version => current,
                Some(v) => {
                    let revision = inner.revision(ctx.tenant_id(), suite_id, v)?;
                    Suite {
                        id: current.id,
                        tenant_id: current.tenant_id,
                        name: revision.name,
                        evaluator_config: revision.evaluator_config,
                        version: revision.version,
                        created_at: current.created_at,
                        updated_at: revision.recorded_at,
                        created_by: current.created_by,
                        updated_by: revision.recorded_by,
                    }
                }
            }
        };
        let cases = self.list_cases(ctx, suite_id).await?;
        Ok((snapshot, cases))
    }

    async fn compare_suite_versions(
        &self,
        ctx: &RequestContext,
        suite_id: &SuiteId,
        v1: VersionNumber,
        v2: VersionNumber,
    ) -> Result<SuiteDiff> {
        let inner = self.inner.read();
        let a = inner.revision(ctx.tenant_id(), suite_id, v1)?;
        let b = inner.revision(ctx.tenant_id(), suite_id, v2)?;
        SuiteDiff::between(&a, &b)
    }

    async fn restore_suite(
        &self,
        ctx: &RequestContext,
        suite_id: &SuiteId,
        version: VersionNumber,
    ) -> Result<Suite> {
        let mut inner = self.inner.write();
        let revision = inner.revision(ctx.tenant_id(), suite_id, version)?;
        let current_version = inner.suite(ctx.tenant_id(), suite_id)?.version;
        inner.apply_suite_update(
            ctx,
            suite_id,
            current_version,
            Some(revision.evaluator_config),
        )
    }
}
