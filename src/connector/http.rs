//! HTTP model provider connector
//!
//! Generic JSON-over-HTTP provider client wrapped with the connector's
//! resilience stack: per-call timeout, retry with full jitter, shared token
//! bucket, circuit breaker, and the in-memory idempotency window.

use crate::config::ModelProviderSettings;
use crate::connector::circuit::{CircuitBreaker, CircuitConfig};
use crate::connector::dedupe::DedupeWindow;
use crate::connector::rate_limit::TokenBucket;
use crate::connector::retry::{retry_with_backoff, RetryPolicy};
use crate::connector::{
    ChatMessage, ConnectorError, ConnectorMetrics, InvokeRequest, InvokeResponse, ModelConnector,
    TokenUsage,
};
use crate::domain::{CostCents, LatencyMs, TokenCount};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Method, StatusCode, Uri};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::instrument;

/// Estimated provider pricing in cents per million tokens
const INPUT_COST_CENTS_PER_MILLION: u64 = 300;
const OUTPUT_COST_CENTS_PER_MILLION: u64 = 1500;

type HttpClient = hyper_util::client::legacy::Client<
    hyper_util::client::legacy::connect::HttpConnector,
    Full<Bytes>,
>;

/// Wire request sent to the provider endpoint
#[derive(Debug, Serialize)]
struct ProviderRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    parameters: &'a serde_json::Value,
    idempotency_key: &'a str,
}

#[derive(Debug, Deserialize)]
struct ProviderUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ProviderResponse {
    text: String,
    #[serde(default)]
    usage: Option<ProviderUsage>,
}

fn estimated_cost(input_tokens: u32, output_tokens: u32) -> CostCents {
    let cents = (u64::from(input_tokens) * INPUT_COST_CENTS_PER_MILLION
        + u64::from(output_tokens) * OUTPUT_COST_CENTS_PER_MILLION)
        / 1_000_000;
    let bounded = u32::try_from(cents).unwrap_or(u32::MAX);
    CostCents::try_new(bounded.min(100_000_000))
        .unwrap_or_else(|_| CostCents::try_new(0).expect("0 is a valid cost"))
}

fn token_count(raw: u32) -> TokenCount {
    TokenCount::try_new(raw.min(1_000_000)).expect("bounded token count is valid")
}

/// HTTP-backed `ModelConnector`
pub struct HttpModelConnector {
    endpoint: Uri,
    api_key: String,
    client: HttpClient,
    rate_limiter: Arc<TokenBucket>,
    circuit: Arc<CircuitBreaker>,
    dedupe: DedupeWindow,
    retry: RetryPolicy,
    metrics: Arc<ConnectorMetrics>,
}

impl HttpModelConnector {
    pub fn new(settings: &ModelProviderSettings) -> Result<Self> {
        let endpoint: Uri = settings
            .endpoint
            .parse()
            .map_err(|_| Error::invalid(format!("bad provider endpoint {}", settings.endpoint)))?;
        let circuit = CircuitBreaker::new(CircuitConfig {
            failure_threshold: settings.circuit_failure_threshold,
            window: Duration::from_secs(settings.circuit_window_seconds),
            min_calls: settings.circuit_min_calls,
            cooldown: Duration::from_secs(settings.circuit_cooldown_seconds),
        });
        let client =
            hyper_util::client::legacy::Client::builder(hyper_util::rt::TokioExecutor::new())
                .build_http();
        Ok(Self {
            endpoint,
            api_key: settings.api_key.clone(),
            client,
            rate_limiter: Arc::new(TokenBucket::new(settings.rate_limit_per_second)),
            circuit: Arc::new(circuit),
            dedupe: DedupeWindow::new(Duration::from_secs(settings.dedupe_window_seconds)),
            retry: RetryPolicy::default(),
            metrics: Arc::new(ConnectorMetrics::new()),
        })
    }

    /// Shared breaker handle for orchestrator backpressure
    pub fn circuit(&self) -> Arc<CircuitBreaker> {
        Arc::clone(&self.circuit)
    }

    /// Shared bucket handle, exposed for metrics
    pub fn rate_limiter(&self) -> Arc<TokenBucket> {
        Arc::clone(&self.rate_limiter)
    }

    pub fn metrics(&self) -> Arc<ConnectorMetrics> {
        Arc::clone(&self.metrics)
    }

    async fn attempt(
        &self,
        request: &InvokeRequest,
    ) -> std::result::Result<InvokeResponse, ConnectorError> {
        let started = Instant::now();
        let wire = ProviderRequest {
            model: request.model_id.as_ref(),
            messages: &request.messages,
            parameters: &request.parameters,
            idempotency_key: &request.idempotency_key,
        };
        let body = serde_json::to_vec(&wire)
            .map_err(|err| ConnectorError::BadRequest(err.to_string()))?;
        let http_request = hyper::Request::builder()
            .method(Method::POST)
            .uri(self.endpoint.clone())
            .header(http::header::CONTENT_TYPE, "application/json")
            .header(
                http::header::AUTHORIZATION,
                format!("Bearer {}", self.api_key),
            )
            .header("idempotency-key", request.idempotency_key.clone())
            .body(Full::new(Bytes::from(body)))
            .map_err(|err| ConnectorError::Transport(err.to_string()))?;

        let response = tokio::time::timeout(request.timeout, self.client.request(http_request))
            .await
            .map_err(|_| ConnectorError::Timeout)?
            .map_err(|err| ConnectorError::Transport(err.to_string()))?;

        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .map_err(|err| ConnectorError::Transport(err.to_string()))?
            .to_bytes();

        match status {
            s if s.is_success() => {
                let parsed: ProviderResponse = serde_json::from_slice(&bytes)
                    .map_err(|err| ConnectorError::Transport(format!("bad provider body: {err}")))?;
                let usage = parsed.usage.unwrap_or(ProviderUsage {
                    input_tokens: 0,
                    output_tokens: 0,
                });
                let latency =
                    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                Ok(InvokeResponse {
                    text: parsed.text,
                    usage: TokenUsage {
                        input_tokens: token_count(usage.input_tokens),
                        output_tokens: token_count(usage.output_tokens),
                        cost_cents: estimated_cost(usage.input_tokens, usage.output_tokens),
                    },
                    latency_ms: LatencyMs::from(latency),
                })
            }
            StatusCode::TOO_MANY_REQUESTS => Err(ConnectorError::RateLimited),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ConnectorError::AuthFailed(
                format!("provider returned {status}"),
            )),
            s if s.is_client_error() => Err(ConnectorError::BadRequest(format!(
                "provider returned {status}"
            ))),
            _ => Err(ConnectorError::Transport(format!(
                "provider returned {status}"
            ))),
        }
    }
}

#[async_trait]
impl ModelConnector for HttpModelConnector {
    #[instrument(skip(self, request), fields(model = %request.model_id))]
    async fn invoke(
        &self,
        request: InvokeRequest,
    ) -> std::result::Result<InvokeResponse, ConnectorError> {
        let dedupe_key = format!("{}:{}", request.tenant_id, request.idempotency_key);
        if let Some(hit) = self.dedupe.get(&dedupe_key) {
            return Ok(hit);
        }
        self.circuit.check()?;

        let result = retry_with_backoff(&self.retry, |_| {
            let request = request.clone();
            async move {
                self.rate_limiter.acquire().await;
                self.attempt(&request).await
            }
        })
        .await;

        match &result {
            Ok(response) => {
                self.circuit.on_success();
                self.metrics.record_success(&response.usage);
                self.dedupe.put(dedupe_key, response.clone());
            }
            Err(err) => {
                if err.trips_circuit() {
                    self.circuit.on_failure();
                }
                self.metrics.record_failure();
            }
        }
        result
    }
}
