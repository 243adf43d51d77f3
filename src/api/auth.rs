//! Authentication middleware
//!
//! A bearer credential is resolved by the external authorizer into claims
//! `(tenant_id, user_id, role)`; the request context facade is constructed
//! from those claims only, never from request bodies.

use crate::api::error::ErrorBody;
use crate::domain::{Claims, RequestContext};
use crate::{Error, Result};
use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

pub const X_REQUEST_ID: &str = "x-request-id";
const BEARER_PREFIX: &str = "Bearer ";

/// Paths served without a credential
const BYPASS_PATHS: &[&str] = &["/health", "/metrics"];

/// External authorizer resolving bearer credentials into claims
pub trait Authorizer: Send + Sync {
    fn resolve(&self, token: &str) -> Result<Claims>;
}

/// Static token table; development and test deployments
#[derive(Default)]
pub struct StaticTokenAuthorizer {
    tokens: HashMap<String, Claims>,
}

impl StaticTokenAuthorizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: impl Into<String>, claims: Claims) -> Self {
        self.tokens.insert(token.into(), claims);
        self
    }
}

impl Authorizer for StaticTokenAuthorizer {
    fn resolve(&self, token: &str) -> Result<Claims> {
        self.tokens
            .get(token)
            .cloned()
            .ok_or_else(|| Error::Forbidden {
                capability: "authentication".to_string(),
            })
    }
}

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorBody {
            error_kind: "forbidden".to_string(),
            message: message.to_string(),
            details: None,
            correlation_id: None,
        }),
    )
        .into_response()
}

/// Request ID middleware - ensures every request carries a correlation id
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| Uuid::parse_str(value).ok())
        .unwrap_or_else(Uuid::now_v7);
    let header_value = HeaderValue::from_str(&request_id.to_string())
        .unwrap_or_else(|_| HeaderValue::from_static("invalid"));

    request
        .headers_mut()
        .insert(X_REQUEST_ID, header_value.clone());
    let mut response = next.run(request).await;
    response.headers_mut().insert(X_REQUEST_ID, header_value);
    response
}

/// Logging middleware - request/response details with timing
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let request_id = request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown")
        .to_string();

    let response = next.run(request).await;
    info!(
        request_id,
        method = %method,
        path,
        status = response.status().as_u16(),
        duration_ms = start.elapsed().as_millis() as u64,
        "request completed"
    );
    response
}

/// Authentication middleware - resolves the bearer credential and threads
/// the request context through the handler chain
pub async fn auth_middleware(
    State(authorizer): State<Arc<dyn Authorizer>>,
    mut request: Request,
    next: Next,
) -> Response {
    if BYPASS_PATHS.contains(&request.uri().path()) {
        return next.run(request).await;
    }

    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix(BEARER_PREFIX))
        .map(str::trim);
    let Some(token) = token else {
        warn!("missing or malformed Authorization header");
        return unauthorized("missing bearer credential");
    };

    match authorizer.resolve(token) {
        Ok(claims) => {
            request
                .extensions_mut()
                .insert(RequestContext::from_claims(claims));
            next.run(request).await
        }
        Err(err) => {
            warn!(error = %err, "credential rejected");
            unauthorized("invalid bearer credential")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Role, TenantId, UserId};
    use axum::body::Body;
    use axum::middleware::{from_fn, from_fn_with_state};
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    fn claims() -> Claims {
        Claims {
            tenant_id: TenantId::generate(),
            user_id: UserId::generate(),
            role: Role::Member,
        }
    }

    fn app(authorizer: StaticTokenAuthorizer) -> Router {
        Router::new()
            .route(
                "/api/v1/ping",
                get(|request: Request| async move {
                    let has_context = request.extensions().get::<RequestContext>().is_some();
                    if has_context {
                        StatusCode::OK
                    } else {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                }),
            )
            .route("/health", get(|| async { "OK" }))
            .layer(from_fn_with_state(
                Arc::new(authorizer) as Arc<dyn Authorizer>,
                auth_middleware,
            ))
            .layer(from_fn(request_id_middleware))
    }

    #[tokio::test]
    async fn valid_token_threads_the_context() {
        let app = app(StaticTokenAuthorizer::new().with_token("secret-1", claims()));
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/api/v1/ping")
                    .header(header::AUTHORIZATION, "Bearer secret-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(X_REQUEST_ID));
    }

    #[tokio::test]
    async fn missing_token_is_unauthorized() {
        let app = app(StaticTokenAuthorizer::new().with_token("secret-1", claims()));
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/api/v1/ping")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unknown_token_is_unauthorized() {
        let app = app(StaticTokenAuthorizer::new().with_token("secret-1", claims()));
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/api/v1/ping")
                    .header(header::AUTHORIZATION, "Bearer wrong")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn health_bypasses_authentication() {
        let app = app(StaticTokenAuthorizer::new());
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
