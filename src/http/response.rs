//! JSON error bodies returned by the HTTP layer.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use crate::admission::AdmissionDecision;

/// Current time as an ISO 8601 UTC timestamp with millisecond precision.
pub fn iso_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Body of a 429 response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectionBody {
    pub ok: bool,
    pub error: String,
    pub retry_after: Option<u64>,
    pub timestamp: String,
}

/// A request turned away by the admission gate.
///
/// Rendered as `429 Too Many Requests` with a `Retry-After` header when the
/// wait is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    body: RejectionBody,
}

impl Rejection {
    pub fn new(reason: impl Into<String>, retry_after_secs: Option<u64>) -> Self {
        Self {
            body: RejectionBody {
                ok: false,
                error: reason.into(),
                retry_after: retry_after_secs,
                timestamp: iso_timestamp(),
            },
        }
    }

    pub fn body(&self) -> &RejectionBody {
        &self.body
    }
}

impl From<&AdmissionDecision> for Rejection {
    fn from(decision: &AdmissionDecision) -> Self {
        Rejection::new(
            decision.reason().unwrap_or("Request rejected."),
            decision.retry_after_secs,
        )
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let retry_after = self.body.retry_after;
        let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(self.body)).into_response();

        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }

        response
    }
}

/// Body of a non-admission error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub ok: bool,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<&'static str>,
    pub timestamp: String,
}

/// Validation, downstream and timeout failures of the edit route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorResponse {
    status: StatusCode,
    body: ErrorBody,
}

impl ErrorResponse {
    fn new(status: StatusCode, error: impl Into<String>, method: Option<&'static str>) -> Self {
        Self {
            status,
            body: ErrorBody {
                ok: false,
                error: error.into(),
                method,
                timestamp: iso_timestamp(),
            },
        }
    }

    pub fn bad_request(error: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error, None)
    }

    pub fn internal(error: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, error, None)
    }

    pub fn timeout() -> Self {
        Self::new(
            StatusCode::GATEWAY_TIMEOUT,
            "Edit request timed out. Please try again.",
            Some("timeout"),
        )
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::RejectionKind;

    #[test]
    fn test_rejection_with_retry_sets_header() {
        let response = Rejection::new("Rate limit exceeded. Please slow down.", Some(300))
            .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "300");
    }

    #[test]
    fn test_rejection_without_retry_has_no_header() {
        let response = Rejection::new("Service recovering.", None).into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().get(header::RETRY_AFTER).is_none());
    }

    #[test]
    fn test_rejection_body_shape() {
        let rejection = Rejection::new("Server is busy", None);
        let json = serde_json::to_value(rejection.body()).unwrap();

        assert_eq!(json["ok"], false);
        assert_eq!(json["error"], "Server is busy");
        assert!(json["retryAfter"].is_null());
        assert!(json["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn test_rejection_from_decision() {
        let decision = AdmissionDecision {
            allowed: false,
            rejection: Some(RejectionKind::Blocked),
            retry_after_secs: Some(42),
            client_id: "10.0.0.1".into(),
            probe: false,
        };

        let rejection = Rejection::from(&decision);
        assert_eq!(
            rejection.body().error,
            "Too many requests. You have been temporarily blocked."
        );
        assert_eq!(rejection.body().retry_after, Some(42));
    }

    #[test]
    fn test_timeout_error_response() {
        let error = ErrorResponse::timeout();
        assert_eq!(error.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            error.into_response().status(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }
}
