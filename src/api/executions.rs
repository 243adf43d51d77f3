//! Execution lifecycle handlers

use crate::api::error::ApiError;
use crate::api::AppState;
use crate::domain::{
    capabilities, EventKind, ExecutionId, ExecutionParams, ExecutionStatus, ExecutionSummary,
    IdempotencyKey, ProgressPct, RequestContext, SuiteId,
};
use crate::Error;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::{Extension, Json};
use futures_util::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

#[derive(Debug, Default, Deserialize)]
pub struct ExecuteRequest {
    #[serde(default)]
    pub conversation_spec_id: Option<String>,
    #[serde(default)]
    pub batch_size: Option<u32>,
    #[serde(default)]
    pub max_concurrent: Option<u32>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ExecuteResponse {
    pub execution_id: ExecutionId,
    pub status: ExecutionStatus,
}

/// POST /api/{version}/evaluation/suites/{suite_id}/execute
pub async fn execute(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(suite_id): Path<Uuid>,
    Json(body): Json<ExecuteRequest>,
) -> Result<(StatusCode, Json<ExecuteResponse>), ApiError> {
    let idempotency_key = body
        .idempotency_key
        .map(|key| {
            IdempotencyKey::try_new(key)
                .map_err(|err| Error::invalid(format!("idempotency_key: {err}")))
        })
        .transpose()?;
    let ctx = ctx.with_idempotency_key(idempotency_key);

    // The params map stays opaque to the core; the conversation port
    // resolves it
    let mut params = serde_json::Map::new();
    if let Some(spec) = body.conversation_spec_id {
        params.insert("conversation_spec_id".to_string(), spec.into());
    }
    if let Some(batch) = body.batch_size {
        params.insert("batch_size".to_string(), batch.into());
    }
    if let Some(concurrent) = body.max_concurrent {
        params.insert("max_concurrent".to_string(), concurrent.into());
    }

    let execution = state
        .orchestrator
        .start(
            &ctx,
            &SuiteId::new(suite_id),
            ExecutionParams::new(serde_json::Value::Object(params)),
        )
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(ExecuteResponse {
            execution_id: execution.id,
            status: execution.status,
        }),
    ))
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: ExecutionStatus,
    pub progress_pct: ProgressPct,
}

/// GET /api/{version}/evaluation/executions/{execution_id}/status
pub async fn status(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(execution_id): Path<Uuid>,
) -> Result<Json<StatusResponse>, ApiError> {
    ctx.require(capabilities::EXECUTIONS_READ)?;
    let (status, progress_pct) = state
        .executions
        .get_status(&ctx, &ExecutionId::new(execution_id))
        .await?;
    Ok(Json(StatusResponse {
        status,
        progress_pct,
    }))
}

/// GET /api/{version}/evaluation/executions/{execution_id}/summary
pub async fn summary(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(execution_id): Path<Uuid>,
) -> Result<Json<ExecutionSummary>, ApiError> {
    ctx.require(capabilities::EXECUTIONS_READ)?;
    let summary = state
        .executions
        .get_summary(&ctx, &ExecutionId::new(execution_id))
        .await?;
    Ok(Json(summary))
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub status: ExecutionStatus,
}

/// POST /api/{version}/evaluation/executions/{execution_id}/cancel
pub async fn cancel(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(execution_id): Path<Uuid>,
) -> Result<Json<CancelResponse>, ApiError> {
    let execution_id = ExecutionId::new(execution_id);
    state.orchestrator.cancel(&ctx, &execution_id).await?;
    Ok(Json(CancelResponse {
        status: ExecutionStatus::Cancelled,
    }))
}

/// Wire shape of one server-sent frame
#[derive(Debug, Serialize)]
struct WireFrame {
    sequence: u64,
    kind: EventKind,
    value: serde_json::Value,
    at: chrono::DateTime<chrono::Utc>,
}

fn frame_event(sequence: u64, kind: EventKind, value: serde_json::Value) -> Event {
    let wire = WireFrame {
        sequence,
        kind,
        value,
        at: chrono::Utc::now(),
    };
    Event::default().data(
        serde_json::to_string(&wire)
            .unwrap_or_else(|_| r#"{"sequence":0,"kind":"complete","value":null}"#.to_string()),
    )
}

/// GET /api/{version}/evaluation/executions/{execution_id}/events
///
/// Server-sent frames re-sequenced per connection starting at 1; the final
/// frame has kind `complete` and the stream ends after it.
pub async fn events(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(execution_id): Path<Uuid>,
) -> Result<
    Sse<axum::response::sse::KeepAliveStream<BoxStream<'static, std::result::Result<Event, Infallible>>>>,
    ApiError,
> {
    ctx.require(capabilities::EXECUTIONS_READ)?;
    let execution_id = ExecutionId::new(execution_id);

    // Subscribe before the status check so a completion in between cannot
    // leave this connection waiting forever
    let receiver = state.events.subscribe(&execution_id);
    let (status, _) = match state.executions.get_status(&ctx, &execution_id).await {
        Ok(status) => status,
        Err(err) => {
            drop(receiver);
            state.events.prune(&execution_id);
            return Err(err.into());
        }
    };

    if status.is_terminal() {
        let only = frame_event(1, EventKind::Complete, serde_json::Value::Null);
        let stream = stream::once(async move { Ok(only) }).boxed();
        return Ok(Sse::new(stream).keep_alive(KeepAlive::default()));
    }

    let stream = stream::unfold(
        (receiver, 0u64, false),
        |(mut receiver, sequence, done)| async move {
            if done {
                return None;
            }
            loop {
                match receiver.recv().await {
                    Ok(frame) => {
                        let sequence = sequence + 1;
                        let is_final = frame.is_final();
                        let event = frame_event(sequence, frame.kind, frame.payload);
                        return Some((Ok(event), (receiver, sequence, is_final)));
                    }
                    // Lagging subscribers miss frames; keep reading
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => return None,
                }
            }
        },
    )
    .boxed();
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
