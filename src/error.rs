//! Relay error types with HTTP status code mapping.
//!
//! [`RelayError`] is the central error type of the crate. Delivery and
//! concurrency components return it directly; the HTTP layer renders it as
//! a structured JSON error response.

use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::event::EventType;

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 1001,
///     "message": "invalid request: event type must not be empty",
///     "details": null
///   }
/// }
/// ```
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorBody {
    /// Numeric error code (see [`RelayError::error_code`]).
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Crate-wide error enum.
///
/// # Error Code Ranges
///
/// | Range     | Category              | HTTP Status                 |
/// |-----------|-----------------------|-----------------------------|
/// | 1000–1999 | Validation / payloads | 400 Bad Request             |
/// | 2000–2999 | Delivery              | 502 Bad Gateway             |
/// | 3000–3999 | Server / storage      | 500 Internal Server Error   |
/// | 4000–4999 | Lifecycle             | 503 Service Unavailable     |
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// One or more handlers failed while an event was published on the bus.
    #[error("{failed} handler(s) failed for event {event_type}")]
    HandlersFailed {
        /// Number of handlers that returned an error.
        failed: usize,
        /// Type of the event being published.
        event_type: EventType,
        /// Rendered handler errors, in subscription order.
        causes: Vec<String>,
    },

    /// The event carries no payload.
    #[error("event {0} has no payload")]
    PayloadMissing(EventType),

    /// The payload could not be decoded into the requested shape.
    #[error("payload decode failed: {0}")]
    PayloadDecode(#[from] serde_json::Error),

    /// The dead-letter file could not be opened or written.
    #[error("dead-letter io error: {0}")]
    DeadLetterIo(#[from] std::io::Error),

    /// A dead-letter record could not be serialized.
    #[error("dead-letter encode error: {0}")]
    DeadLetterEncode(String),

    /// The dead-letter sink was already closed.
    #[error("dead-letter sink is closed")]
    DeadLetterClosed,

    /// The worker pool no longer accepts jobs.
    #[error("worker pool is stopped")]
    PoolStopped,

    /// The caller gave up waiting for queue capacity.
    #[error("enqueue cancelled while waiting for queue capacity")]
    EnqueueCancelled,

    /// The broadcast hub is stopped.
    #[error("broadcast hub is stopped")]
    HubStopped,

    /// A component did not finish shutting down within its deadline.
    #[error("{component} shutdown timed out after {timeout:?}")]
    ShutdownTimeout {
        /// Component that timed out.
        component: &'static str,
        /// The deadline that was exceeded.
        timeout: Duration,
    },

    /// Request validation failed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidRequest(_) => 1001,
            Self::PayloadMissing(_) => 1002,
            Self::PayloadDecode(_) => 1003,
            Self::HandlersFailed { .. } => 2001,
            Self::Internal(_) => 3000,
            Self::DeadLetterIo(_) => 3001,
            Self::DeadLetterEncode(_) => 3002,
            Self::DeadLetterClosed => 3003,
            Self::PoolStopped => 4001,
            Self::EnqueueCancelled => 4002,
            Self::HubStopped => 4003,
            Self::ShutdownTimeout { .. } => 4004,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) | Self::PayloadMissing(_) | Self::PayloadDecode(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::HandlersFailed { .. } => StatusCode::BAD_GATEWAY,
            Self::DeadLetterIo(_)
            | Self::DeadLetterEncode(_)
            | Self::DeadLetterClosed
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::PoolStopped
            | Self::EnqueueCancelled
            | Self::HubStopped
            | Self::ShutdownTimeout { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Returns `true` for the shutdown-timeout status, which callers report
    /// rather than treat as a total failure.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::ShutdownTimeout { .. })
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let details = match &self {
            Self::HandlersFailed { causes, .. } if !causes.is_empty() => Some(causes.join("; ")),
            _ => None,
        };
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details,
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}
