//! Axum router and all HTTP handlers for the admin surface.
//!
//! `build_router` is the single entry point; the binary crate attaches
//! tracing/CORS middleware after calling it. All handlers are `pub(crate)`
//! so router-composition tests in `tests/` can exercise them directly.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};

use dispatchbox_db::RepoError;

use crate::api_types::{
    DeadEventsQuery, DeadEventsResponse, DeadEventsStatsResponse, ErrorResponse, HealthResponse,
    ReadyResponse, RetryBatchRequest, RetryBatchResponse, RetryResponse,
};
use crate::extract::{JsonPath, JsonQuery};
use crate::state::AppState;

const DEAD_EVENTS_DEFAULT_LIMIT: i64 = 100;
const DEAD_EVENTS_MAX_LIMIT: i64 = 1000;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics))
        .route("/api/dead-events", get(list_dead_events))
        .route("/api/dead-events/stats", get(dead_events_stats))
        .route("/api/dead-events/:id", get(get_dead_event))
        .route("/api/dead-events/:id/retry", post(retry_dead_event))
        .route("/api/dead-events/retry-batch", post(retry_dead_events_batch))
        .with_state(state)
}

/// `GET /health` — liveness. Always `200 {"status":"ok"}`.
pub(crate) async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

/// `GET /ready` — readiness. `200` if a DB ping succeeds, else `503` with
/// a reason.
pub(crate) async fn ready(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.repository_for_ready().await {
        Ok(repo) if repo.is_connected().await => (
            StatusCode::OK,
            Json(ReadyResponse {
                status: "ready",
                reason: None,
            }),
        ),
        Ok(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadyResponse {
                status: "not ready",
                reason: Some("database not connected".to_string()),
            }),
        ),
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadyResponse {
                status: "not ready",
                reason: Some(err.to_string()),
            }),
        ),
    }
}

/// `GET /metrics` — Prometheus exposition, `501` if no metrics provider is
/// registered.
pub(crate) async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match &state.metrics {
        Some(registry) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            registry.render(),
        )
            .into_response(),
        None => (
            StatusCode::NOT_IMPLEMENTED,
            Json(ErrorResponse::new("metrics not available")),
        )
            .into_response(),
    }
}

/// `GET /api/dead-events` — list DLQ, paginated and optionally filtered.
pub(crate) async fn list_dead_events(
    State(state): State<Arc<AppState>>,
    JsonQuery(q): JsonQuery<DeadEventsQuery>,
) -> impl IntoResponse {
    let limit = q.limit.unwrap_or(DEAD_EVENTS_DEFAULT_LIMIT).min(DEAD_EVENTS_MAX_LIMIT);
    let offset = q.offset.unwrap_or(0);

    let repo = match state.repository_for_dlq().await {
        Ok(repo) => repo,
        Err(err) => return repo_error_response(err),
    };

    match repo
        .fetch_dead(limit, offset, q.aggregate_type.as_deref(), q.event_type.as_deref())
        .await
    {
        Ok(events) => (
            StatusCode::OK,
            Json(DeadEventsResponse {
                count: events.len(),
                events: events.iter().map(|e| e.to_wire()).collect(),
                limit,
                offset,
            }),
        )
            .into_response(),
        Err(err) => repo_error_response(err),
    }
}

/// `GET /api/dead-events/stats` — aggregate count for the given filter.
pub(crate) async fn dead_events_stats(
    State(state): State<Arc<AppState>>,
    JsonQuery(q): JsonQuery<DeadEventsQuery>,
) -> impl IntoResponse {
    let repo = match state.repository_for_dlq().await {
        Ok(repo) => repo,
        Err(err) => return repo_error_response(err),
    };

    match repo
        .count_dead(q.aggregate_type.as_deref(), q.event_type.as_deref())
        .await
    {
        Ok(total) => (
            StatusCode::OK,
            Json(DeadEventsStatsResponse {
                total,
                aggregate_type: q.aggregate_type,
                event_type: q.event_type,
            }),
        )
            .into_response(),
        Err(err) => repo_error_response(err),
    }
}

/// `GET /api/dead-events/{id}` — single DLQ event or `404`.
pub(crate) async fn get_dead_event(
    State(state): State<Arc<AppState>>,
    JsonPath(id): JsonPath<i64>,
) -> impl IntoResponse {
    let repo = match state.repository_for_dlq().await {
        Ok(repo) => repo,
        Err(err) => return repo_error_response(err),
    };

    match repo.get_dead(id).await {
        Ok(Some(event)) => (StatusCode::OK, Json(event.to_wire())).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new(format!("dead event {id} not found"))),
        )
            .into_response(),
        Err(err) => repo_error_response(err),
    }
}

/// `POST /api/dead-events/{id}/retry` — reset one dead event to pending.
pub(crate) async fn retry_dead_event(
    State(state): State<Arc<AppState>>,
    JsonPath(id): JsonPath<i64>,
) -> impl IntoResponse {
    let repo = match state.repository_for_dlq().await {
        Ok(repo) => repo,
        Err(err) => return repo_error_response(err),
    };

    match repo.retry_dead(id).await {
        Ok(true) => (
            StatusCode::OK,
            Json(RetryResponse {
                status: "success",
                event_id: id,
                message: format!("event {id} reset to pending"),
            }),
        )
            .into_response(),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new(format!(
                "dead event {id} not found or already processed"
            ))),
        )
            .into_response(),
        Err(err) => repo_error_response(err),
    }
}

/// `POST /api/dead-events/retry-batch` — reset a batch of dead events.
///
/// Body is parsed manually (rather than via axum's `Json` extractor) so
/// malformed JSON produces the same `400 {"error": "..."}` shape as every
/// other validation failure in this surface, instead of axum's default
/// plain-text rejection body.
pub(crate) async fn retry_dead_events_batch(
    State(state): State<Arc<AppState>>,
    body: axum::body::Bytes,
) -> impl IntoResponse {
    let request: RetryBatchRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new("invalid JSON in request body")),
            )
                .into_response()
        }
    };

    if request.event_ids.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("event_ids must be a non-empty list")),
        )
            .into_response();
    }

    let repo = match state.repository_for_dlq().await {
        Ok(repo) => repo,
        Err(err) => return repo_error_response(err),
    };

    match repo.retry_dead_batch(&request.event_ids).await {
        Ok(processed) => (
            StatusCode::OK,
            Json(RetryBatchResponse {
                status: "success",
                message: format!("{processed} event(s) reset to pending"),
                requested: request.event_ids.len(),
                processed,
            }),
        )
            .into_response(),
        Err(err) => repo_error_response(err),
    }
}

/// Map a `RepoError` to a status code: validation errors are the caller's
/// fault (`400`); transient/permanent database errors and malformed rows
/// are server-side (`500`).
fn repo_error_response(err: RepoError) -> axum::response::Response {
    match err {
        RepoError::Validation(msg) => {
            (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(msg))).into_response()
        }
        other => {
            tracing::error!(error = %other, "admin request failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("internal server error")),
            )
                .into_response()
        }
    }
}
