//! HTTP edge
//!
//! Axum router over the orchestration core. Middleware order: request id,
//! then logging, then authentication; handlers receive the request context
//! from the auth layer and never build it from request bodies.

pub mod auth;
pub mod error;
pub mod executions;
pub mod suites;

use crate::connector::rate_limit::TokenBucket;
use crate::connector::ConnectorMetrics;
use crate::orchestrator::{Orchestrator, WorkQueue};
use crate::runner::ExecutionEvents;
use crate::store::{DefinitionStore, ExecutionStore};
use auth::Authorizer;
use axum::extract::State;
use axum::http::StatusCode;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tower_http::timeout::TimeoutLayer;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub definitions: Arc<dyn DefinitionStore>,
    pub executions: Arc<dyn ExecutionStore>,
    pub orchestrator: Arc<Orchestrator>,
    pub events: Arc<ExecutionEvents>,
    pub queue: Arc<dyn WorkQueue>,
    pub connector_metrics: Option<Arc<ConnectorMetrics>>,
    pub rate_limiter: Option<Arc<TokenBucket>>,
}

/// Build the service router under `/api/{api_version}`
pub fn router(state: AppState, authorizer: Arc<dyn Authorizer>, api_version: &str) -> Router {
    let evaluation = Router::new()
        .route("/evaluation/suites", post(suites::create_suite))
        .route(
            "/evaluation/suites/{suite_id}/evals",
            post(suites::add_case),
        )
        .route(
            "/evaluation/suites/{suite_id}/execute",
            post(executions::execute),
        )
        .route(
            "/evaluation/executions/{execution_id}/status",
            get(executions::status),
        )
        .route(
            "/evaluation/executions/{execution_id}/summary",
            get(executions::summary),
        )
        .route(
            "/evaluation/executions/{execution_id}/cancel",
            post(executions::cancel),
        )
        .route(
            "/evaluation/executions/{execution_id}/events",
            get(executions::events),
        );

    Router::new()
        .nest(&format!("/api/{api_version}"), evaluation)
        .route("/api/flows", get(suites::list_suites))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .layer(from_fn_with_state(authorizer, auth::auth_middleware))
        .layer(from_fn(auth::logging_middleware))
        .layer(from_fn(auth::request_id_middleware))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(120),
        ))
}

/// Health check handler
async fn health_handler() -> &'static str {
    "OK"
}

/// Plain-text counters: connector token accounting and queue depth
async fn metrics_handler(State(state): State<AppState>) -> String {
    let mut out = String::new();
    if let Some(metrics) = &state.connector_metrics {
        let snapshot = metrics.snapshot();
        out.push_str(&format!("connector_calls_total {}\n", snapshot.calls));
        out.push_str(&format!("connector_failures_total {}\n", snapshot.failures));
        out.push_str(&format!(
            "connector_input_tokens_total {}\n",
            snapshot.input_tokens
        ));
        out.push_str(&format!(
            "connector_output_tokens_total {}\n",
            snapshot.output_tokens
        ));
        out.push_str(&format!(
            "connector_cost_cents_total {}\n",
            snapshot.cost_cents
        ));
    }
    if let Some(bucket) = &state.rate_limiter {
        out.push_str(&format!(
            "connector_rate_tokens_available {:.2}\n",
            bucket.available()
        ));
    }
    out.push_str(&format!("queue_depth {}\n", state.queue.depth().await));
    out
}
