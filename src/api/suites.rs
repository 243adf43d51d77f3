//! Suite management handlers

use crate::api::error::ApiError;
use crate::api::AppState;
use crate::domain::{
    capabilities, EvaluatorConfig, RequestContext, Suite, SuiteId, SuiteName, TestCase,
    TestCasePayload,
};
use crate::store::filter::{Filter, ListQuery, Page, Sort, SortDirection};
use crate::Error;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateSuiteRequest {
    pub name: String,
    #[serde(default)]
    pub evaluator_config: serde_json::Value,
}

/// POST /api/{version}/evaluation/suites
pub async fn create_suite(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(body): Json<CreateSuiteRequest>,
) -> Result<(StatusCode, Json<Suite>), ApiError> {
    ctx.require(capabilities::SUITES_WRITE)?;
    let name =
        SuiteName::try_new(body.name).map_err(|err| Error::invalid(format!("name: {err}")))?;
    let suite = state
        .definitions
        .create_suite(&ctx, name, EvaluatorConfig::new(body.evaluator_config))
        .await?;
    Ok((StatusCode::CREATED, Json(suite)))
}

/// POST /api/{version}/evaluation/suites/{suite_id}/evals
pub async fn add_case(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(suite_id): Path<Uuid>,
    Json(payload): Json<TestCasePayload>,
) -> Result<(StatusCode, Json<TestCase>), ApiError> {
    ctx.require(capabilities::SUITES_WRITE)?;
    let case = state
        .definitions
        .add_case(&ctx, &SuiteId::new(suite_id), payload)
        .await?;
    Ok((StatusCode::CREATED, Json(case)))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListSuitesParams {
    /// JSON-encoded array of filter predicates
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default)]
    pub sort_by: Option<String>,
    #[serde(default)]
    pub sort_dir: Option<String>,
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl ListSuitesParams {
    fn into_query(self) -> Result<ListQuery, Error> {
        let filters: Vec<Filter> = match self.filter {
            Some(raw) => serde_json::from_str(&raw)
                .map_err(|err| Error::invalid(format!("filter: {err}")))?,
            None => Vec::new(),
        };
        let direction = match self.sort_dir.as_deref() {
            None | Some("asc") => SortDirection::Asc,
            Some("desc") => SortDirection::Desc,
            Some(other) => {
                return Err(Error::invalid(format!("sort_dir: unknown direction {other}")))
            }
        };
        let sort = Sort {
            field: self.sort_by.unwrap_or_else(|| "created_at".to_string()),
            direction,
        };
        let mut query = ListQuery {
            filters,
            sort,
            cursor: self.cursor,
            ..ListQuery::default()
        };
        if let Some(limit) = self.limit {
            query.limit = limit;
        }
        Ok(query)
    }
}

/// GET /api/flows
pub async fn list_suites(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Query(params): Query<ListSuitesParams>,
) -> Result<Json<Page<Suite>>, ApiError> {
    ctx.require(capabilities::SUITES_READ)?;
    let query = params.into_query()?;
    let page = state.definitions.list_suites(&ctx, query).await?;
    Ok(Json(page))
}
