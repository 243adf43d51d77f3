//! Circuit-open backpressure scenario
//!
//! Forces the provider failure rate over the breaker threshold and checks
//! that the orchestrator suspends dispatch for the cooldown, resumes after
//! the probe call succeeds, and loses no case-result row. Durations are
//! shortened; the production values come from configuration.

use async_trait::async_trait;
use crucible::connector::circuit::{CircuitBreaker, CircuitConfig};
use crucible::connector::conversation::{Conversation, ConversationReply};
use crucible::connector::{
    ConnectorError, InvokeRequest, InvokeResponse, ModelConnector, TokenUsage,
};
use crucible::domain::{
    CaseContext, CaseResultStatus, Claims, CostCents, EvaluatorConfig, ExecutionParams,
    ExecutionStatus, LatencyMs, RequestContext, Role, SuiteName, SystemResponse, TenantId,
    TestCasePayload, TokenCount, UserId, UserInput,
};
use crucible::evaluators::EvaluatorRegistry;
use crucible::orchestrator::{InMemoryQueue, Orchestrator, OrchestratorConfig, WorkQueue};
use crucible::runner::{CaseRunner, ExecutionEvents, RunnerConfig};
use crucible::store::memory::{InMemoryDefinitionStore, InMemoryExecutionStore};
use crucible::store::{DefinitionStore, ExecutionStore};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const COOLDOWN: Duration = Duration::from_millis(120);

/// Judge double answering every evaluator call with a fixed passing verdict
struct PassingJudge;

#[async_trait]
impl ModelConnector for PassingJudge {
    async fn invoke(
        &self,
        _request: InvokeRequest,
    ) -> std::result::Result<InvokeResponse, ConnectorError> {
        Ok(InvokeResponse {
            text: r#"{"score": 0.9, "reasoning": "fine"}"#.to_string(),
            usage: TokenUsage {
                input_tokens: TokenCount::try_new(1).unwrap(),
                output_tokens: TokenCount::try_new(1).unwrap(),
                cost_cents: CostCents::try_new(0).unwrap(),
            },
            latency_ms: LatencyMs::from(1),
        })
    }
}

/// Conversation wired to a breaker the way the real connector is: every
/// call is gated by `check` and reported back as success or failure
struct FlakyConversation {
    circuit: Arc<CircuitBreaker>,
    failures_remaining: AtomicU32,
}

#[async_trait]
impl Conversation for FlakyConversation {
    async fn converse(
        &self,
        _tenant_id: &TenantId,
        _params: &ExecutionParams,
        _user_input: &UserInput,
        _context: &CaseContext,
        _idempotency_key: String,
    ) -> std::result::Result<ConversationReply, ConnectorError> {
        self.circuit.check()?;
        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.fetch_sub(1, Ordering::SeqCst);
            self.circuit.on_failure();
            return Err(ConnectorError::Transport("connection reset".to_string()));
        }
        self.circuit.on_success();
        Ok(ConversationReply {
            text: SystemResponse::try_new("recovered".to_string()).unwrap(),
            latency_ms: LatencyMs::from(1),
        })
    }
}

#[tokio::test]
async fn execution_suspends_while_the_circuit_is_open_and_resumes() {
    let circuit = Arc::new(CircuitBreaker::new(CircuitConfig {
        failure_threshold: 0.5,
        window: Duration::from_secs(60),
        min_calls: 4,
        cooldown: COOLDOWN,
    }));
    let definitions = Arc::new(InMemoryDefinitionStore::new());
    let executions = Arc::new(InMemoryExecutionStore::new());
    let queue = Arc::new(InMemoryQueue::new(Duration::from_secs(3600), 3));
    let events = Arc::new(ExecutionEvents::new());
    let registry = Arc::new(
        EvaluatorRegistry::builtin(Arc::new(PassingJudge), Duration::from_secs(30)).unwrap(),
    );
    let conversation = Arc::new(FlakyConversation {
        circuit: Arc::clone(&circuit),
        failures_remaining: AtomicU32::new(4),
    });
    let runner = Arc::new(CaseRunner::new(
        Arc::clone(&executions) as Arc<dyn ExecutionStore>,
        conversation,
        registry,
        Arc::clone(&events),
        RunnerConfig::default(),
    ));
    let orchestrator = Orchestrator::new(
        Arc::clone(&definitions) as Arc<dyn DefinitionStore>,
        Arc::clone(&executions) as Arc<dyn ExecutionStore>,
        Arc::clone(&queue) as Arc<dyn WorkQueue>,
        runner,
        events,
        Some(Arc::clone(&circuit)),
        OrchestratorConfig {
            case_concurrency: 1,
            ..OrchestratorConfig::default()
        },
    );
    let ctx = RequestContext::from_claims(Claims {
        tenant_id: TenantId::generate(),
        user_id: UserId::generate(),
        role: Role::Admin,
    });

    let suite = definitions
        .create_suite(
            &ctx,
            SuiteName::try_new("backpressure".to_string()).unwrap(),
            EvaluatorConfig::default(),
        )
        .await
        .unwrap();
    for i in 0..8 {
        definitions
            .add_case(
                &ctx,
                &suite.id,
                TestCasePayload {
                    evaluator_kinds: vec![crucible::domain::EvaluatorKind::try_new(
                        "answer_relevancy".to_string(),
                    )
                    .unwrap()],
                    expected: BTreeMap::new(),
                    user_input: UserInput::try_new(format!("question {i}")).unwrap(),
                    context: CaseContext::default(),
                    source_conversation_id: None,
                },
            )
            .await
            .unwrap();
    }

    let execution = orchestrator
        .start(&ctx, &suite.id, ExecutionParams::default())
        .await
        .unwrap();
    let delivery = queue.dequeue().await.unwrap().unwrap();

    let started = Instant::now();
    orchestrator.run(&delivery.job).await.unwrap();
    let elapsed = started.elapsed();

    // The run had to sit out at least one full cooldown
    assert!(
        elapsed >= COOLDOWN,
        "run finished in {elapsed:?}, before the cooldown could elapse"
    );

    let (status, progress) = executions.get_status(&ctx, &execution.id).await.unwrap();
    assert_eq!(status, ExecutionStatus::Completed);
    assert_eq!(progress.into_inner(), 100);

    // No case-result row was lost: the four pre-open failures are recorded
    // and everything after the probe succeeded
    let results = executions.list_case_results(&execution.id).await.unwrap();
    assert_eq!(results.len(), 8);
    assert!(results.iter().all(|row| row.status.is_terminal()));
    let failed = results
        .iter()
        .filter(|row| row.status == CaseResultStatus::Failed)
        .count();
    let ok = results
        .iter()
        .filter(|row| row.status == CaseResultStatus::Ok)
        .count();
    assert_eq!(failed, 4);
    assert_eq!(ok, 4);
}
