//! Unified error handling for the proxy.
//!
//! Every error that reaches an HTTP caller is rendered in the OpenAI error shape.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt;

/// Unified error type for proxy operations.
#[derive(Debug, Clone)]
pub enum ProxyError {
    /// Upstream base URL could not be parsed.
    InvalidUpstream(String),
    /// The configuration validation hook rejected the configuration.
    Validation(String),
    /// Listener could not be bound or the server failed.
    Server(String),
    /// Upstream could not be reached.
    Upstream(String),
    /// Upstream answered with a non-success status.
    UpstreamStatus { status: u16, message: String },
    /// Caller sent a request we cannot process.
    BadRequest(String),
    /// A translated upstream response could not be decoded or re-encoded.
    Translation(String),
    /// Internal error.
    Internal(String),
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidUpstream(msg) => write!(f, "Invalid upstream URL: {}", msg),
            Self::Validation(msg) => write!(f, "Validation failed: {}", msg),
            Self::Server(msg) => write!(f, "Server error: {}", msg),
            Self::Upstream(msg) => write!(f, "Upstream error: {}", msg),
            Self::UpstreamStatus { status, message } => {
                write!(f, "Upstream returned {}: {}", status, message)
            }
            Self::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            Self::Translation(msg) => write!(f, "Translation error: {}", msg),
            Self::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for ProxyError {}

/// Error response structure for JSON serialization.
#[derive(Serialize)]
struct ErrorResponseBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    message: String,
    r#type: String,
}

impl ProxyError {
    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidUpstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Validation(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Server(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::UpstreamStatus { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Translation(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error type string.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::InvalidUpstream(_) | Self::Validation(_) => "configuration_error",
            Self::Server(_) | Self::Internal(_) => "internal_error",
            Self::Upstream(_) | Self::UpstreamStatus { .. } => "upstream_error",
            Self::BadRequest(_) => "invalid_request_error",
            Self::Translation(_) => "translation_error",
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponseBody {
            error: ErrorDetail {
                message: self.to_string(),
                r#type: self.error_type().to_string(),
            },
        };

        (status, Json(body)).into_response()
    }
}
