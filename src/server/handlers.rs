//! HTTP handlers.

use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::metrics;
use crate::streaming::{event_stream, ChatRequest, StreamControl, StreamSession};

use super::state::AppState;

const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

/// `POST /chat`: validate, open the backend, then stream SSE until terminal.
///
/// Everything that can fail with an HTTP status happens before the response
/// headers are produced. After that, failures travel as `error` events.
pub async fn chat(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    let request = ChatRequest::from_json(&body).map_err(|e| {
        tracing::debug!(error = %e, "Rejected chat request");
        metrics::record_request_rejected("validation");
        ApiError::from(e)
    })?;

    if state.shutdown.is_shutdown() {
        metrics::record_request_rejected("shutting_down");
        return Err(ApiError::ShuttingDown);
    }

    let stream_guard = state.shutdown.register_stream();
    let request_id = format!("req-{}", stream_guard.id());
    let key = request
        .session_id()
        .map(str::to_owned)
        .unwrap_or_else(|| request_id.clone());

    let slot = state.sessions.try_reserve().ok_or_else(|| {
        tracing::warn!(
            request_id = %request_id,
            max_streams = state.sessions.max_streams(),
            "Stream limit reached"
        );
        metrics::record_request_rejected("capacity");
        ApiError::AtCapacity
    })?;

    let backend_timeout = state.config.backend.timeout();
    let opened = tokio::time::timeout(
        backend_timeout,
        StreamSession::start(state.backend.as_ref(), request, request_id.clone()),
    )
    .await;

    let session = match opened {
        Ok(Ok(session)) => session,
        Ok(Err(e)) => {
            tracing::error!(
                request_id = %request_id,
                backend = state.backend.name(),
                error = %e,
                "Backend unavailable"
            );
            metrics::record_request_rejected("backend_unavailable");
            return Err(ApiError::BackendUnavailable);
        }
        Err(_) => {
            tracing::error!(
                request_id = %request_id,
                backend = state.backend.name(),
                timeout_secs = backend_timeout.as_secs(),
                "Backend open timed out"
            );
            metrics::record_request_rejected("backend_timeout");
            return Err(ApiError::BackendTimeout);
        }
    };

    // Only a live stream may take over the key from an older one.
    let session_guard = slot.commit(key);

    tracing::info!(
        request_id = %request_id,
        session_id = %session.request().session_id,
        backend = state.backend.name(),
        "Streaming response"
    );

    let control = StreamControl::new(session_guard.cancellation_token(), state.shutdown.clone())
        .with_superseded(session_guard.superseded_token())
        .with_timeout(state.config.server.request_timeout())
        .with_keep_alive(state.config.server.keep_alive());

    let body = Body::from_stream(event_stream(session, control, (session_guard, stream_guard)));

    Ok((
        [
            (CONTENT_TYPE, "text/event-stream"),
            (CACHE_CONTROL, "no-cache"),
            (X_ACCEL_BUFFERING, "no"),
        ],
        body,
    )
        .into_response())
}

/// `DELETE /chat/{session_id}`: cancel an active stream from another connection.
pub async fn cancel_chat(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.sessions.cancel(&session_id) {
        tracing::info!(session_id = %session_id, "Stream cancelled by request");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::SessionNotFound(session_id))
    }
}

/// `GET /health`: process liveness.
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "ok": true,
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "backend": state.backend.name(),
        "sessions": {
            "active": state.sessions.active_count(),
            "max": state.sessions.max_streams(),
        }
    }))
}

/// `GET /ready`: backend reachability.
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match state.backend.health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "ready": true, "backend": state.backend.name() })),
        ),
        Err(e) => {
            tracing::warn!(backend = state.backend.name(), error = %e, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "ready": false, "backend": state.backend.name() })),
            )
        }
    }
}

/// `GET /`: service banner.
pub async fn root() -> Json<Value> {
    Json(json!({
        "message": "SSE chat gateway",
        "chat": "/chat",
        "health": "/health",
    }))
}
