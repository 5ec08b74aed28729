//! Route handlers for the protected edit endpoint and monitoring.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, instrument, warn};

use super::response::{ErrorResponse, Rejection};
use crate::admission::{
    AdmissionController, AdmissionDecision, ProtectionStatus, SharedAdmissionController,
};
use crate::backend::{EditBackend, EditRequest};
use crate::error::EditGateError;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Admission gate for the edit route
    pub controller: SharedAdmissionController,
    /// The protected operation
    pub backend: Arc<dyn EditBackend>,
    /// Time allowed for one downstream edit
    pub upstream_timeout: Duration,
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/edit", post(edit_handler))
        .route("/api/protection/status", get(status_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Reports the downstream outcome of an admitted request exactly once. If
/// dropped unreported (bad payload, client gone) the admission is abandoned.
struct PendingOutcome<'a> {
    controller: &'a AdmissionController,
    decision: &'a AdmissionDecision,
    reported: bool,
}

impl<'a> PendingOutcome<'a> {
    fn new(controller: &'a AdmissionController, decision: &'a AdmissionDecision) -> Self {
        Self {
            controller,
            decision,
            reported: false,
        }
    }

    fn report(mut self, success: bool) {
        self.reported = true;
        self.controller.record_api_result(success);
    }
}

impl Drop for PendingOutcome<'_> {
    fn drop(&mut self) {
        if !self.reported {
            self.controller.abandon(self.decision);
        }
    }
}

/// POST /api/edit
///
/// Admission runs before the body is even parsed, so malformed requests still
/// count against the caller's quota.
#[instrument(skip_all, fields(request_id = %uuid::Uuid::new_v4()))]
async fn edit_handler(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let decision = state.controller.check_protection(&headers);
    if !decision.allowed {
        return Rejection::from(&decision).into_response();
    }

    let pending = PendingOutcome::new(&state.controller, &decision);

    let request: EditRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            debug!(client_id = %decision.client_id, error = %e, "Malformed edit request body");
            return ErrorResponse::bad_request("Request body must be a JSON object").into_response();
        }
    };

    if let Err(message) = request.validate() {
        debug!(client_id = %decision.client_id, "Edit request failed validation");
        return ErrorResponse::bad_request(message).into_response();
    }

    match tokio::time::timeout(state.upstream_timeout, state.backend.edit(&request)).await {
        Ok(Ok(response)) => {
            pending.report(true);
            info!(
                client_id = %decision.client_id,
                method = %response.method,
                images = response.generated_images.len(),
                "Edit completed"
            );
            Json(response).into_response()
        }
        Ok(Err(EditGateError::Timeout(timeout_ms))) => {
            pending.report(false);
            warn!(client_id = %decision.client_id, timeout_ms, "Upstream edit timed out");
            ErrorResponse::timeout().into_response()
        }
        Ok(Err(e)) => {
            pending.report(false);
            warn!(client_id = %decision.client_id, error = %e, "Edit failed");
            ErrorResponse::internal(e.to_string()).into_response()
        }
        Err(_) => {
            pending.report(false);
            warn!(
                client_id = %decision.client_id,
                timeout_ms = state.upstream_timeout.as_millis() as u64,
                "Edit timed out"
            );
            ErrorResponse::timeout().into_response()
        }
    }
}

/// GET /api/protection/status
async fn status_handler(State(state): State<AppState>) -> Json<ProtectionStatus> {
    Json(state.controller.protection_status())
}

/// GET /health
async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::{CircuitState, FixedRandom, ManualClock};
    use crate::backend::{EditResponse, UnavailableBackend};
    use crate::config::EditGateConfig;
    use crate::error::Result;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    #[derive(Default)]
    struct CountingBackend {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EditBackend for CountingBackend {
        async fn edit(&self, _request: &EditRequest) -> Result<EditResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(EditResponse {
                ok: true,
                edited: Some("data:image/jpeg;base64,AAAA".into()),
                method: "stub".into(),
                generated_images: vec!["data:image/jpeg;base64,AAAA".into()],
                analysis: None,
                note: None,
                timestamp: "2025-01-01T00:00:00.000Z".into(),
            })
        }
    }

    struct SlowBackend;

    struct TimingOutBackend;

    #[async_trait]
    impl EditBackend for TimingOutBackend {
        async fn edit(&self, _request: &EditRequest) -> Result<EditResponse> {
            Err(EditGateError::Timeout(45_000))
        }
    }

    #[async_trait]
    impl EditBackend for SlowBackend {
        async fn edit(&self, _request: &EditRequest) -> Result<EditResponse> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(EditResponse::default())
        }
    }

    fn state_with(backend: Arc<dyn EditBackend>) -> AppState {
        state_with_clock(backend, ManualClock::default())
    }

    fn state_with_clock(backend: Arc<dyn EditBackend>, clock: ManualClock) -> AppState {
        let controller = AdmissionController::with_sources(
            &EditGateConfig::default(),
            Arc::new(clock),
            Arc::new(FixedRandom(0.99)),
        );
        AppState {
            controller: Arc::new(controller),
            backend,
            upstream_timeout: Duration::from_millis(50),
        }
    }

    fn edit_request(ip: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/edit")
            .header("x-forwarded-for", ip)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    const VALID_BODY: &str = r#"{"imageUrl":"data:image/png;base64,AAAA","changeSummary":"warmer"}"#;

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let app = router(state_with(Arc::new(UnavailableBackend)));
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_edit_success_passes_through() {
        let backend = Arc::new(CountingBackend::default());
        let app = router(state_with(backend.clone()));

        let response = app.oneshot(edit_request("10.0.0.1", VALID_BODY)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["ok"], true);
        assert_eq!(json["method"], "stub");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalid_payload_is_400_and_skips_backend() {
        let backend = Arc::new(CountingBackend::default());
        let state = state_with(backend.clone());
        let app = router(state.clone());

        let response = app
            .clone()
            .oneshot(edit_request("10.0.0.1", r#"{"imageUrl":""}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            json_body(response).await["error"],
            "Image URL and change summary are required"
        );

        let response = app.oneshot(edit_request("10.0.0.1", "not json")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
        assert_eq!(state.controller.circuit_breaker().failure_count(), 0);
    }

    #[tokio::test]
    async fn test_backend_failure_is_500_and_counts() {
        let state = state_with(Arc::new(UnavailableBackend));
        let app = router(state.clone());

        let response = app.oneshot(edit_request("10.0.0.1", VALID_BODY)).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json_body(response).await["ok"], false);
        assert_eq!(state.controller.circuit_breaker().failure_count(), 1);
    }

    #[tokio::test]
    async fn test_backend_timeout_is_504_and_counts() {
        let state = state_with(Arc::new(SlowBackend));
        let app = router(state.clone());

        let response = app.oneshot(edit_request("10.0.0.1", VALID_BODY)).await.unwrap();

        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(json_body(response).await["method"], "timeout");
        assert_eq!(state.controller.circuit_breaker().failure_count(), 1);
    }

    #[tokio::test]
    async fn test_upstream_timeout_error_is_504() {
        let state = state_with(Arc::new(TimingOutBackend));
        let app = router(state.clone());

        let response = app.oneshot(edit_request("10.0.0.1", VALID_BODY)).await.unwrap();

        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(json_body(response).await["method"], "timeout");
        assert_eq!(state.controller.circuit_breaker().failure_count(), 1);
    }

    #[tokio::test]
    async fn test_invalid_probe_request_returns_its_slot() {
        let clock = ManualClock::default();
        let state = state_with_clock(Arc::new(CountingBackend::default()), clock.clone());
        let app = router(state.clone());

        for _ in 0..5 {
            state.controller.record_api_result(false);
        }
        clock.advance(Duration::from_secs(31));

        let response = app
            .clone()
            .oneshot(edit_request("10.0.0.1", "not json"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            state.controller.protection_status().circuit_state,
            CircuitState::HalfOpen
        );
        assert_eq!(state.controller.circuit_breaker().probe_count(), 0);

        let response = app.oneshot(edit_request("10.0.0.2", VALID_BODY)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            state.controller.protection_status().circuit_state,
            CircuitState::Closed
        );
    }

    #[tokio::test]
    async fn test_rate_limited_client_gets_429() {
        let backend = Arc::new(CountingBackend::default());
        let app = router(state_with(backend.clone()));

        // Manual clock never moves: every request is part of one burst
        let mut last = None;
        for _ in 0..11 {
            last = Some(
                app.clone()
                    .oneshot(edit_request("203.0.113.9", VALID_BODY))
                    .await
                    .unwrap(),
            );
        }
        let response = last.unwrap();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "300");
        let json = json_body(response).await;
        assert_eq!(json["ok"], false);
        assert_eq!(json["retryAfter"], 300);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_open_circuit_rejects_without_retry_header() {
        let state = state_with(Arc::new(UnavailableBackend));
        let app = router(state.clone());

        for i in 0..5 {
            let ip = format!("10.0.0.{i}");
            app.clone().oneshot(edit_request(&ip, VALID_BODY)).await.unwrap();
        }
        assert_eq!(
            state.controller.protection_status().circuit_state,
            CircuitState::Open
        );

        let response = app.oneshot(edit_request("10.0.1.1", VALID_BODY)).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().get(header::RETRY_AFTER).is_none());
        assert_eq!(
            json_body(response).await["error"],
            "Service temporarily unavailable. Please try again later."
        );
    }

    #[tokio::test]
    async fn test_status_endpoint() {
        let state = state_with(Arc::new(CountingBackend::default()));
        let app = router(state);

        app.clone().oneshot(edit_request("10.0.0.1", VALID_BODY)).await.unwrap();
        let response = app
            .oneshot(
                Request::get("/api/protection/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["circuitState"], "closed");
        assert_eq!(json["activeClients"], 1);
        assert_eq!(json["requestsInWindow"], 1);
        assert_eq!(json["loadSheddingActive"], false);
    }
}
