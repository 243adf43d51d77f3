//! Model connector: the single entry point for outbound model provider
//! traffic
//!
//! The connector owns retries, timeouts, rate limiting, circuit breaking,
//! idempotent dedupe, and token accounting. Evaluators and the conversation
//! port are its only callers.

pub mod circuit;
pub mod conversation;
pub mod dedupe;
pub mod http;
pub mod rate_limit;
pub mod retry;

use crate::domain::{CostCents, LatencyMs, TenantId, TokenCount};
use crate::Error;
use async_trait::async_trait;
use nutype::nutype;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Model identifier addressed at the provider
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 200),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        AsRef,
        Display
    ),
    new_unchecked
)]
pub struct ModelId(String);

/// Role of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// One message of a model conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

/// Request accepted by `ModelConnector::invoke`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokeRequest {
    pub model_id: ModelId,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub parameters: serde_json::Value,
    /// Per-call timeout; mandatory
    pub timeout: Duration,
    /// Forwarded to the provider when supported; otherwise used for the
    /// in-memory dedupe window
    pub idempotency_key: String,
    pub tenant_id: TenantId,
}

/// Token usage and estimated cost of one call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: TokenCount,
    pub output_tokens: TokenCount,
    pub cost_cents: CostCents,
}

/// Successful connector response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokeResponse {
    pub text: String,
    pub usage: TokenUsage,
    pub latency_ms: LatencyMs,
}

/// Typed connector failures
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConnectorError {
    #[error("model call timed out")]
    Timeout,

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("rate limited by provider")]
    RateLimited,

    #[error("circuit open")]
    CircuitOpen,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),
}

impl ConnectorError {
    /// Stable label recorded on case-result rows
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Transport(_) => "transport",
            Self::RateLimited => "rate_limited",
            Self::CircuitOpen => "circuit_open",
            Self::BadRequest(_) => "bad_request",
            Self::AuthFailed(_) => "auth_failed",
        }
    }

    /// Whether a retry may succeed (network, 5xx, provider rate limit)
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::RateLimited)
    }

    /// Whether this failure counts against the circuit breaker
    pub fn trips_circuit(&self) -> bool {
        matches!(self, Self::Timeout | Self::Transport(_) | Self::RateLimited)
    }
}

impl From<ConnectorError> for Error {
    fn from(err: ConnectorError) -> Self {
        match err {
            ConnectorError::Timeout => Error::timeout("model call"),
            ConnectorError::Transport(message) => Error::transport(message),
            ConnectorError::RateLimited => Error::RateLimited,
            ConnectorError::CircuitOpen => Error::CircuitOpen,
            ConnectorError::BadRequest(message) => Error::invalid(message),
            ConnectorError::AuthFailed(message) => Error::internal(message),
        }
    }
}

/// Single entry point for all outbound model provider traffic
#[async_trait]
pub trait ModelConnector: Send + Sync {
    async fn invoke(
        &self,
        request: InvokeRequest,
    ) -> std::result::Result<InvokeResponse, ConnectorError>;
}

/// Process-wide token and cost accounting, exposed via `/metrics`
#[derive(Debug, Default)]
pub struct ConnectorMetrics {
    calls: AtomicU64,
    failures: AtomicU64,
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
    cost_cents: AtomicU64,
}

/// Point-in-time view of the connector counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub calls: u64,
    pub failures: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_cents: u64,
}

impl ConnectorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, usage: &TokenUsage) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.input_tokens
            .fetch_add(u64::from(usage.input_tokens.into_inner()), Ordering::Relaxed);
        self.output_tokens.fetch_add(
            u64::from(usage.output_tokens.into_inner()),
            Ordering::Relaxed,
        );
        self.cost_cents
            .fetch_add(u64::from(usage.cost_cents.into_inner()), Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            calls: self.calls.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            input_tokens: self.input_tokens.load(Ordering::Relaxed),
            output_tokens: self.output_tokens.load(Ordering::Relaxed),
            cost_cents: self.cost_cents.load(Ordering::Relaxed),
        }
    }
}
