//! End-to-end orchestration scenarios over the HTTP surface
//!
//! The full stack (router, auth, orchestrator, runner, stores) runs on the
//! in-memory implementations with a scripted model connector, so every
//! scenario exercises the same paths production traffic takes.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use crucible::api::auth::StaticTokenAuthorizer;
use crucible::api::AppState;
use crucible::connector::conversation::ModelBackedConversation;
use crucible::connector::{
    ConnectorError, InvokeRequest, InvokeResponse, ModelConnector, TokenUsage,
};
use crucible::domain::{
    Claims, CostCents, LatencyMs, Role, TenantId, TokenCount, UserId,
};
use crucible::evaluators::EvaluatorRegistry;
use crucible::orchestrator::{
    InMemoryQueue, Orchestrator, OrchestratorConfig, WorkerPool,
};
use crucible::runner::{CaseRunner, ExecutionEvents, RunnerConfig};
use crucible::store::memory::{InMemoryDefinitionStore, InMemoryExecutionStore};
use crucible::store::ExecutionStore;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const TOKEN: &str = "test-token";

/// Scripted connector: judge-shaped prompts get a verdict document, other
/// prompts get a plain conversational answer, optionally delayed
struct ScriptedConnector {
    verdict: String,
    conversation_delay: Duration,
}

impl ScriptedConnector {
    fn passing() -> Self {
        Self {
            verdict: r#"{"score": 0.9, "reasoning": "solid answer"}"#.to_string(),
            conversation_delay: Duration::ZERO,
        }
    }

    fn slow(delay: Duration) -> Self {
        Self {
            verdict: r#"{"score": 0.9, "reasoning": "solid answer"}"#.to_string(),
            conversation_delay: delay,
        }
    }
}

#[async_trait]
impl ModelConnector for ScriptedConnector {
    async fn invoke(
        &self,
        request: InvokeRequest,
    ) -> std::result::Result<InvokeResponse, ConnectorError> {
        let is_judge = request
            .messages
            .first()
            .is_some_and(|message| message.content.contains("\"score\""));
        let text = if is_judge {
            self.verdict.clone()
        } else {
            if !self.conversation_delay.is_zero() {
                tokio::time::sleep(self.conversation_delay).await;
            }
            "a helpful answer".to_string()
        };
        Ok(InvokeResponse {
            text,
            usage: TokenUsage {
                input_tokens: TokenCount::try_new(5).unwrap(),
                output_tokens: TokenCount::try_new(5).unwrap(),
                cost_cents: CostCents::try_new(0).unwrap(),
            },
            latency_ms: LatencyMs::from(1),
        })
    }
}

struct TestApp {
    router: Router,
    executions: Arc<InMemoryExecutionStore>,
    pool: WorkerPool,
    tenant_id: TenantId,
}

fn build_app(connector: Arc<dyn ModelConnector>) -> TestApp {
    let definitions = Arc::new(InMemoryDefinitionStore::new());
    let executions = Arc::new(InMemoryExecutionStore::new());
    let queue = Arc::new(InMemoryQueue::new(Duration::from_secs(3600), 3));
    let events = Arc::new(ExecutionEvents::new());
    let registry = Arc::new(
        EvaluatorRegistry::builtin(Arc::clone(&connector), Duration::from_secs(30)).unwrap(),
    );
    let conversation = Arc::new(ModelBackedConversation::new(
        connector,
        Duration::from_secs(30),
    ));
    let runner = Arc::new(CaseRunner::new(
        Arc::clone(&executions) as Arc<dyn ExecutionStore>,
        conversation,
        registry,
        Arc::clone(&events),
        RunnerConfig::default(),
    ));
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&definitions) as Arc<dyn crucible::store::DefinitionStore>,
        Arc::clone(&executions) as Arc<dyn ExecutionStore>,
        Arc::clone(&queue) as Arc<dyn crucible::orchestrator::WorkQueue>,
        runner,
        Arc::clone(&events),
        None,
        OrchestratorConfig::default(),
    ));
    let pool = WorkerPool::new(
        Arc::clone(&queue) as Arc<dyn crucible::orchestrator::WorkQueue>,
        Arc::clone(&orchestrator),
        1,
    );

    let tenant_id = TenantId::generate();
    let authorizer = StaticTokenAuthorizer::new().with_token(
        TOKEN,
        Claims {
            tenant_id: tenant_id.clone(),
            user_id: UserId::generate(),
            role: Role::Admin,
        },
    );

    let state = AppState {
        definitions: definitions as Arc<dyn crucible::store::DefinitionStore>,
        executions: Arc::clone(&executions) as Arc<dyn ExecutionStore>,
        orchestrator,
        events,
        queue: queue as Arc<dyn crucible::orchestrator::WorkQueue>,
        connector_metrics: None,
        rate_limiter: None,
    };
    let router = crucible::api::router(state, Arc::new(authorizer), "v1");

    TestApp {
        router,
        executions,
        pool,
        tenant_id,
    }
}

async fn call(
    router: &Router,
    method: &str,
    path: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method(method)
        .uri(path)
        .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"));
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            builder.body(Body::empty()).unwrap()
        }
    };
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

async fn create_suite(app: &TestApp, name: &str) -> String {
    let (status, body) = call(
        &app.router,
        "POST",
        "/api/v1/evaluation/suites",
        Some(json!({"name": name, "evaluator_config": {}})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["id"].as_str().unwrap().to_string()
}

async fn add_case(app: &TestApp, suite_id: &str, payload: Value) {
    let (status, _) = call(
        &app.router,
        "POST",
        &format!("/api/v1/evaluation/suites/{suite_id}/evals"),
        Some(payload),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn create_and_execute_happy_path() {
    let app = build_app(Arc::new(ScriptedConnector::passing()));
    let suite_id = create_suite(&app, "S1").await;
    add_case(
        &app,
        &suite_id,
        json!({
            "evaluator_kinds": ["answer_relevancy"],
            "user_input": "hi",
            "expected": {"answer_relevancy": {"min_score": 0.0}}
        }),
    )
    .await;

    let (status, body) = call(
        &app.router,
        "POST",
        &format!("/api/v1/evaluation/suites/{suite_id}/execute"),
        Some(json!({"idempotency_key": "k1"})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "pending");
    let execution_id = body["execution_id"].as_str().unwrap().to_string();

    let stats = app.pool.drain().await.unwrap();
    assert_eq!(stats.processed, 1);

    let (status, body) = call(
        &app.router,
        "GET",
        &format!("/api/v1/evaluation/executions/{execution_id}/status"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
    assert_eq!(body["progress_pct"], 100);

    let (status, summary) = call(
        &app.router,
        "GET",
        &format!("/api/v1/evaluation/executions/{execution_id}/summary"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["total_cases"], 1);
    assert_eq!(summary["completed_cases"], 1);
    let relevancy = &summary["evaluators"]["answer_relevancy"];
    assert!((relevancy["pass_rate"].as_f64().unwrap() - 1.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn repeated_start_with_the_same_key_converges() {
    let app = build_app(Arc::new(ScriptedConnector::passing()));
    let suite_id = create_suite(&app, "S2").await;
    add_case(
        &app,
        &suite_id,
        json!({"evaluator_kinds": ["answer_relevancy"], "user_input": "hi"}),
    )
    .await;

    let execute = |key: &'static str| {
        let router = app.router.clone();
        let suite_id = suite_id.clone();
        async move {
            let (status, body) = call(
                &router,
                "POST",
                &format!("/api/v1/evaluation/suites/{suite_id}/execute"),
                Some(json!({"idempotency_key": key})),
            )
            .await;
            assert_eq!(status, StatusCode::ACCEPTED);
            body["execution_id"].as_str().unwrap().to_string()
        }
    };

    let first = execute("k1").await;
    let second = execute("k1").await;
    assert_eq!(first, second);

    // Only one execution row exists for the suite
    let ctx = crucible::domain::RequestContext::from_claims(Claims {
        tenant_id: app.tenant_id.clone(),
        user_id: UserId::generate(),
        role: Role::Admin,
    });
    let suite_uuid = crucible::domain::SuiteId::new(suite_id.parse().unwrap());
    let executions = app
        .executions
        .list_executions(&ctx, &suite_uuid)
        .await
        .unwrap();
    assert_eq!(executions.len(), 1);
}

#[tokio::test]
async fn unknown_evaluator_is_isolated_to_its_row() {
    let app = build_app(Arc::new(ScriptedConnector::passing()));
    let suite_id = create_suite(&app, "S3").await;
    add_case(
        &app,
        &suite_id,
        json!({
            "evaluator_kinds": ["answer_relevancy", "toxicity"],
            "user_input": "hi"
        }),
    )
    .await;

    let (_, body) = call(
        &app.router,
        "POST",
        &format!("/api/v1/evaluation/suites/{suite_id}/execute"),
        Some(json!({})),
    )
    .await;
    let execution_id = body["execution_id"].as_str().unwrap().to_string();
    app.pool.drain().await.unwrap();

    let (status, body) = call(
        &app.router,
        "GET",
        &format!("/api/v1/evaluation/executions/{execution_id}/status"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    // The bad evaluator row does not fail the execution
    assert_eq!(body["status"], "completed");

    let (_, summary) = call(
        &app.router,
        "GET",
        &format!("/api/v1/evaluation/executions/{execution_id}/summary"),
        None,
    )
    .await;
    assert_eq!(summary["error_counts"]["unknown_evaluator"], 1);
    let relevancy = &summary["evaluators"]["answer_relevancy"];
    assert_eq!(relevancy["evaluated"], 1);
    let toxicity = &summary["evaluators"]["toxicity"];
    assert_eq!(toxicity["skipped"], 1);
}

#[tokio::test]
async fn cancellation_mid_run_skips_remaining_cases() {
    let app = build_app(Arc::new(ScriptedConnector::slow(Duration::from_millis(150))));
    let suite_id = create_suite(&app, "S4").await;
    for i in 0..5 {
        add_case(
            &app,
            &suite_id,
            json!({
                "evaluator_kinds": ["answer_relevancy"],
                "user_input": format!("question {i}")
            }),
        )
        .await;
    }

    let (_, body) = call(
        &app.router,
        "POST",
        &format!("/api/v1/evaluation/suites/{suite_id}/execute"),
        Some(json!({"max_concurrent": 1})),
    )
    .await;
    let execution_id = body["execution_id"].as_str().unwrap().to_string();

    let drain = {
        let pool = app.pool;
        tokio::spawn(async move { pool.drain().await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;

    let (status, body) = call(
        &app.router,
        "POST",
        &format!("/api/v1/evaluation/executions/{execution_id}/cancel"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "cancelled");

    drain.await.unwrap().unwrap();

    let (_, body) = call(
        &app.router,
        "GET",
        &format!("/api/v1/evaluation/executions/{execution_id}/status"),
        None,
    )
    .await;
    assert_eq!(body["status"], "cancelled");

    // Every row is terminal; the ones that never ran are skipped/cancelled
    let execution_uuid = crucible::domain::ExecutionId::new(execution_id.parse().unwrap());
    let results = app
        .executions
        .list_case_results(&execution_uuid)
        .await
        .unwrap();
    assert_eq!(results.len(), 5);
    assert!(results.iter().all(|row| row.status.is_terminal()));
    assert!(results.iter().any(|row| {
        row.error_kind.as_ref().map(AsRef::as_ref) == Some("cancelled")
    }));

    // Cancelling again conflicts: the execution is already terminal
    let (status, _) = call(
        &app.router,
        "POST",
        &format!("/api/v1/evaluation/executions/{execution_id}/cancel"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn requests_without_credentials_are_rejected() {
    let app = build_app(Arc::new(ScriptedConnector::passing()));
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/evaluation/suites")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({"name": "S"}).to_string()))
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unknown_ids_map_to_not_found() {
    let app = build_app(Arc::new(ScriptedConnector::passing()));
    let missing = uuid::Uuid::now_v7();
    let (status, body) = call(
        &app.router,
        "GET",
        &format!("/api/v1/evaluation/executions/{missing}/status"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error_kind"], "not_found");
}

#[tokio::test]
async fn duplicate_suite_names_conflict() {
    let app = build_app(Arc::new(ScriptedConnector::passing()));
    create_suite(&app, "twice").await;
    let (status, body) = call(
        &app.router,
        "POST",
        "/api/v1/evaluation/suites",
        Some(json!({"name": "twice", "evaluator_config": {}})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error_kind"], "conflict");
}

#[tokio::test]
async fn invalid_payloads_are_unprocessable() {
    let app = build_app(Arc::new(ScriptedConnector::passing()));
    let suite_id = create_suite(&app, "bad-payload").await;
    // No evaluator kinds at all
    let (status, _) = call(
        &app.router,
        "POST",
        &format!("/api/v1/evaluation/suites/{suite_id}/evals"),
        Some(json!({"evaluator_kinds": [], "user_input": "hi"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn flows_listing_pages_through_suites() {
    let app = build_app(Arc::new(ScriptedConnector::passing()));
    for name in ["alpha", "beta", "gamma"] {
        create_suite(&app, name).await;
    }

    let (status, page) = call(
        &app.router,
        "GET",
        "/api/flows?sort_by=name&sort_dir=asc&limit=2",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = page["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["alpha", "beta"]);

    let cursor = page["next_cursor"].as_str().unwrap();
    let (_, page) = call(
        &app.router,
        "GET",
        &format!("/api/flows?sort_by=name&sort_dir=asc&limit=2&cursor={cursor}"),
        None,
    )
    .await;
    let names: Vec<&str> = page["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["gamma"]);
    assert!(page["next_cursor"].is_null());
}

#[tokio::test]
async fn event_stream_for_a_finished_execution_completes_immediately() {
    let app = build_app(Arc::new(ScriptedConnector::passing()));
    let suite_id = create_suite(&app, "events").await;
    add_case(
        &app,
        &suite_id,
        json!({"evaluator_kinds": ["answer_relevancy"], "user_input": "hi"}),
    )
    .await;
    let (_, body) = call(
        &app.router,
        "POST",
        &format!("/api/v1/evaluation/suites/{suite_id}/execute"),
        Some(json!({})),
    )
    .await;
    let execution_id = body["execution_id"].as_str().unwrap().to_string();
    app.pool.drain().await.unwrap();

    let request = Request::builder()
        .method("GET")
        .uri(format!(
            "/api/v1/evaluation/executions/{execution_id}/events"
        ))
        .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(content_type.starts_with("text/event-stream"));

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8_lossy(&bytes);
    assert!(text.contains("\"kind\":\"complete\""));
    assert!(text.contains("\"sequence\":1"));
}
