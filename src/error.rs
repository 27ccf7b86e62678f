//! Error types for the streaming gateway.

use std::io;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Result type alias for gateway startup operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Errors that stop the gateway from starting or serving.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to bind {addr}: {source}")]
    Bind { addr: String, source: io::Error },

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}

/// Errors from generation backends (mock, OpenAI-compatible).
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Timeout")]
    Timeout,

    #[error("Rate limited")]
    RateLimited,

    #[error("Connection failed: {0}")]
    Connection(String),
}

impl BackendError {
    /// Short description that is safe to send to the client.
    ///
    /// Upstream status codes, URLs and provider messages stay in the logs.
    pub fn public_message(&self) -> &'static str {
        match self {
            BackendError::Timeout => "generation timed out",
            BackendError::RateLimited => "generation rate limited",
            BackendError::Api { status: 429, .. } => "generation rate limited",
            _ => "generation failed",
        }
    }
}

/// Rejections raised before any stream is opened.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("malformed request body: {0}")]
    MalformedBody(String),

    #[error("message must not be empty")]
    EmptyMessage,
}

/// Errors returned to HTTP clients as a status code plus JSON body.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("too many concurrent streams")]
    AtCapacity,

    #[error("backend unavailable")]
    BackendUnavailable,

    #[error("backend timeout")]
    BackendTimeout,

    #[error("no active stream for session {0}")]
    SessionNotFound(String),

    #[error("server is shutting down")]
    ShuttingDown,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::AtCapacity | ApiError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::BackendUnavailable => StatusCode::BAD_GATEWAY,
            ApiError::BackendTimeout => StatusCode::GATEWAY_TIMEOUT,
            ApiError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "invalid_request_error",
            ApiError::SessionNotFound(_) => "not_found_error",
            _ => "server_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "message": self.to_string(),
                "type": self.error_type(),
            }
        }));

        (self.status(), body).into_response()
    }
}
