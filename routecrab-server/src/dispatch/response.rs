//! Error responses and rate-limit headers
//!
//! Every error the gateway answers with uses the same envelope:
//!
//! ```json
//! { "errors": [ { "id": "TOO_MANY_REQUESTS", "message": "Too many requests" } ] }
//! ```

use crate::metrics::Outcome;
use crate::ratelimit::{self, Dimension};
use crate::rpc::CallError;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub errors: Vec<ErrorItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorItem {
    pub id: String,
    pub message: String,
}

/// A request the gateway answers itself instead of proxying
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    id: String,
    message: String,
    outcome: Outcome,
    headers: HeaderMap,
}

impl ApiError {
    pub fn new(status: StatusCode, id: &str, message: &str, outcome: Outcome) -> Self {
        ApiError {
            status,
            id: id.to_string(),
            message: message.to_string(),
            outcome,
            headers: HeaderMap::new(),
        }
    }

    pub fn not_found(method: &str, path: &str) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            &format!("no route for {method} {path}"),
            Outcome::NotFound,
        )
    }

    pub fn unauthorized() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            "UNAUTHORIZED",
            "authentication required",
            Outcome::Unauthorized,
        )
    }

    pub fn too_many_requests(dimension: Dimension) -> Self {
        Self::new(
            StatusCode::TOO_MANY_REQUESTS,
            "TOO_MANY_REQUESTS",
            "Too many requests",
            Outcome::RateLimited(dimension),
        )
    }

    pub fn unsupported_media_type() -> Self {
        Self::new(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "UNSUPPORTED_MEDIA_TYPE",
            "provide a content-type header",
            Outcome::ClientError,
        )
    }

    pub fn payload_too_large() -> Self {
        Self::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            "PAYLOAD_TOO_LARGE",
            "request body too large",
            Outcome::ClientError,
        )
    }

    pub fn internal(message: &str) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            message,
            Outcome::Internal,
        )
    }

    pub fn bad_gateway(message: &str) -> Self {
        Self::new(
            StatusCode::BAD_GATEWAY,
            "BAD_GATEWAY",
            message,
            Outcome::BackendError,
        )
    }

    /// Translate a failed backend call
    ///
    /// A backend-reported error keeps its id and detail, and its code becomes
    /// the status (500 when unset or not a valid status).
    pub fn from_call_error(error: CallError) -> Self {
        match error {
            CallError::Remote(remote) => {
                let status = u16::try_from(remote.code)
                    .ok()
                    .and_then(|code| StatusCode::from_u16(code).ok())
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                let id = if remote.id.is_empty() {
                    status.canonical_reason().unwrap_or("BACKEND_ERROR").to_string()
                } else {
                    remote.id
                };
                Self::new(status, &id, &remote.detail, Outcome::BackendError)
            }
            CallError::Timeout => Self::new(
                StatusCode::GATEWAY_TIMEOUT,
                "GATEWAY_TIMEOUT",
                "backend did not answer in time",
                Outcome::BackendError,
            ),
            CallError::Unavailable(reason) => Self::bad_gateway(&reason),
            CallError::Protocol(reason) => {
                Self::internal(&reason).with_outcome(Outcome::BackendError)
            }
        }
    }

    fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = outcome;
        self
    }

    /// Attach headers, such as the rate-limit counters gathered so far
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let envelope = ErrorEnvelope {
            errors: vec![ErrorItem {
                id: self.id,
                message: self.message,
            }],
        };
        (self.status, self.headers, Json(envelope)).into_response()
    }
}

/// Set `<prefix>-Limit`, `<prefix>-Remaining` and `<prefix>-Reset` for a dimension
pub fn insert_rate_headers(headers: &mut HeaderMap, dimension: Dimension, outcome: &ratelimit::Outcome) {
    let prefix = dimension.header_prefix();
    for (suffix, value) in [
        ("Limit", outcome.limit),
        ("Remaining", outcome.remaining),
        ("Reset", outcome.reset_at),
    ] {
        if let Ok(name) = HeaderName::from_bytes(format!("{prefix}-{suffix}").as_bytes()) {
            headers.insert(name, HeaderValue::from(value));
        }
    }
}
