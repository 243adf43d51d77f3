//! Application wiring
//!
//! Builds the full stack from settings: stores, connector, evaluator
//! registry, event hub, queue, orchestrator, worker pool, and the HTTP
//! router. A `memory://` database URL selects the in-memory stores for
//! single-process development.

use crate::api::auth::{Authorizer, StaticTokenAuthorizer};
use crate::api::AppState;
use crate::config::Settings;
use crate::connector::conversation::ModelBackedConversation;
use crate::connector::http::HttpModelConnector;
use crate::evaluators::EvaluatorRegistry;
use crate::orchestrator::worker::DrainStats;
use crate::orchestrator::{InMemoryQueue, Orchestrator, OrchestratorConfig, WorkerPool};
use crate::runner::{CaseRunner, ExecutionEvents, RunnerConfig};
use crate::store::memory::{InMemoryDefinitionStore, InMemoryExecutionStore};
use crate::store::postgres::{ensure_schema, PostgresDefinitionStore, PostgresExecutionStore};
use crate::store::{DefinitionStore, ExecutionStore};
use crate::Result;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, instrument};

/// Main application struct that coordinates all components
pub struct Application {
    settings: Settings,
    state: AppState,
    authorizer: Arc<dyn Authorizer>,
    worker_pool: Arc<WorkerPool>,
}

impl Application {
    #[instrument]
    pub async fn new() -> Result<Self> {
        Self::with_settings(Settings::new()?).await
    }

    pub async fn with_settings(settings: Settings) -> Result<Self> {
        let connector = Arc::new(HttpModelConnector::new(&settings.model_provider)?);
        let circuit = connector.circuit();
        let connector_metrics = connector.metrics();
        let rate_limiter = connector.rate_limiter();
        let conversation = Arc::new(ModelBackedConversation::new(
            Arc::clone(&connector) as Arc<dyn crate::connector::ModelConnector>,
            settings.connector_timeout(),
        ));
        let registry = Arc::new(EvaluatorRegistry::builtin(
            connector,
            settings.eval_timeout(),
        )?);
        let events = Arc::new(ExecutionEvents::new());

        let (definitions, executions): (Arc<dyn DefinitionStore>, Arc<dyn ExecutionStore>) =
            if settings.database.url.starts_with("memory://") {
                info!("using in-memory stores");
                (
                    Arc::new(InMemoryDefinitionStore::new()),
                    Arc::new(InMemoryExecutionStore::new()),
                )
            } else {
                info!("connecting to database");
                let pool = PgPoolOptions::new()
                    .max_connections(settings.database.max_connections)
                    .connect(&settings.database.url)
                    .await?;
                ensure_schema(&pool).await?;
                (
                    Arc::new(PostgresDefinitionStore::new(pool.clone())),
                    Arc::new(PostgresExecutionStore::new(pool)),
                )
            };

        let queue = Arc::new(InMemoryQueue::new(
            Duration::from_secs(settings.queue.visibility_timeout_seconds),
            settings.queue.max_deliveries,
        ));
        let runner = Arc::new(CaseRunner::new(
            Arc::clone(&executions),
            conversation,
            registry,
            Arc::clone(&events),
            RunnerConfig {
                evaluator_fanout: settings.orchestrator.evaluator_fanout,
                eval_timeout: settings.eval_timeout(),
            },
        ));
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&definitions),
            Arc::clone(&executions),
            Arc::clone(&queue) as Arc<dyn crate::orchestrator::WorkQueue>,
            runner,
            Arc::clone(&events),
            Some(circuit),
            OrchestratorConfig {
                case_concurrency: settings.orchestrator.case_concurrency,
                failure_threshold: settings.orchestrator.failure_threshold,
                execution_timeout: settings.execution_timeout(),
            },
        ));
        let worker_pool = Arc::new(WorkerPool::new(
            Arc::clone(&queue) as Arc<dyn crate::orchestrator::WorkQueue>,
            Arc::clone(&orchestrator),
            settings.orchestrator.worker_count,
        ));

        let state = AppState {
            definitions,
            executions,
            orchestrator,
            events,
            queue,
            connector_metrics: Some(connector_metrics),
            rate_limiter: Some(rate_limiter),
        };

        Ok(Self {
            settings,
            state,
            authorizer: Arc::new(StaticTokenAuthorizer::new()),
            worker_pool,
        })
    }

    /// Replace the default (empty) authorizer with a deployment's own
    pub fn with_authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = authorizer;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Serve HTTP with an embedded worker pool until ctrl-c
    #[instrument(skip(self))]
    pub async fn run(self) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker_handles = self.worker_pool.spawn(shutdown_rx);

        let router = crate::api::router(
            self.state.clone(),
            Arc::clone(&self.authorizer),
            &self.settings.application.api_version,
        );
        let address = format!(
            "{}:{}",
            self.settings.application.host, self.settings.application.port
        );
        info!(address, "starting crucible server");
        let listener = tokio::net::TcpListener::bind(&address).await?;

        axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                info!("shutdown signal received");
            })
            .await?;

        let _ = shutdown_tx.send(true);
        for handle in worker_handles {
            let _ = handle.await;
        }
        Ok(())
    }

    /// Process queued executions until the queue is empty
    pub async fn drain(&self) -> Result<DrainStats> {
        self.worker_pool.drain().await
    }
}
