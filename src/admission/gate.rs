//! The admission gate: one object owning the limiter, breaker and shedder.

use std::sync::Arc;

use axum::http::HeaderMap;
use serde::Serialize;
use tracing::{debug, info};

use super::breaker::{CircuitBreaker, CircuitState};
use super::client_id::resolve_client_id;
use super::clock::{SharedClock, SystemClock};
use super::decision::{Decision, RejectionKind};
use super::limiter::ClientRateLimiter;
use super::shedder::{LoadShedder, SharedRandom, ThreadRandom};
use crate::config::EditGateConfig;

/// Final admission outcome for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionDecision {
    /// Whether the request may reach the downstream operation
    pub allowed: bool,
    /// The stage that denied the request
    pub rejection: Option<RejectionKind>,
    /// Seconds the caller should wait, when known
    pub retry_after_secs: Option<u64>,
    /// Resolved caller identity, always present for logging
    pub client_id: String,
    /// The request holds a half-open probe slot and must either report an
    /// outcome or be abandoned
    pub probe: bool,
}

impl AdmissionDecision {
    fn from_stage(decision: Decision, client_id: String) -> Self {
        Self {
            allowed: decision.allowed,
            rejection: decision.rejection,
            retry_after_secs: decision.retry_after_secs,
            client_id,
            probe: decision.probe,
        }
    }

    /// Message for a denied request.
    pub fn reason(&self) -> Option<&'static str> {
        self.rejection.map(|kind| kind.reason())
    }
}

/// Read-only snapshot for monitoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtectionStatus {
    pub circuit_state: CircuitState,
    pub circuit_failures: u32,
    pub load_shedding_active: bool,
    /// Requests seen by the load shedder in its current window
    pub requests_in_window: u64,
    /// Clients the rate limiter is tracking
    pub active_clients: usize,
}

/// Admission controller for the protected edit operation.
///
/// Built once per process and shared behind an `Arc`. Every request runs
/// [`check_protection`](Self::check_protection); every request that then
/// reaches the downstream operation reports its outcome exactly once through
/// [`record_api_result`](Self::record_api_result).
#[derive(Debug)]
pub struct AdmissionController {
    rate_limiter: ClientRateLimiter,
    circuit_breaker: CircuitBreaker,
    load_shedder: LoadShedder,
}

impl AdmissionController {
    /// Create a controller using the system clock and thread-local randomness.
    pub fn new(config: &EditGateConfig) -> Self {
        Self::with_sources(config, Arc::new(SystemClock::new()), Arc::new(ThreadRandom))
    }

    /// Create a controller with explicit time and randomness sources.
    pub fn with_sources(config: &EditGateConfig, clock: SharedClock, random: SharedRandom) -> Self {
        Self {
            rate_limiter: ClientRateLimiter::new(config.rate_limiting.clone(), clock.clone()),
            circuit_breaker: CircuitBreaker::new(config.circuit_breaker.clone(), clock.clone()),
            load_shedder: LoadShedder::new(config.load_shedding.clone(), clock, random),
        }
    }

    /// Resolve the caller from `headers` and run the admission checks.
    pub fn check_protection(&self, headers: &HeaderMap) -> AdmissionDecision {
        self.check_client(resolve_client_id(headers))
    }

    /// Run rate limiting, circuit breaking and load shedding, in that order,
    /// for an already resolved client. The first denial wins.
    pub fn check_client(&self, client_id: String) -> AdmissionDecision {
        let limit = self.rate_limiter.check(&client_id);
        if !limit.allowed {
            return self.denied(limit, client_id);
        }

        let circuit = self.circuit_breaker.check();
        if !circuit.allowed {
            return self.denied(circuit, client_id);
        }

        let load = self.load_shedder.check();
        if !load.allowed {
            if circuit.probe {
                self.circuit_breaker.release_probe();
            }
            return self.denied(load, client_id);
        }

        debug!(client_id = %client_id, probe = circuit.probe, "Request admitted");
        AdmissionDecision::from_stage(circuit, client_id)
    }

    fn denied(&self, decision: Decision, client_id: String) -> AdmissionDecision {
        info!(
            client_id = %client_id,
            rejection = ?decision.rejection,
            retry_after = ?decision.retry_after_secs,
            "Request rejected"
        );
        AdmissionDecision::from_stage(decision, client_id)
    }

    /// Feed the downstream outcome back into the circuit breaker.
    pub fn record_api_result(&self, success: bool) {
        if success {
            self.circuit_breaker.record_success();
        } else {
            self.circuit_breaker.record_failure();
        }
    }

    /// An admitted request was dropped before reaching the downstream
    /// operation, so it will never report a result. A probe slot it holds is
    /// handed back; admissions made while closed release nothing.
    pub fn abandon(&self, decision: &AdmissionDecision) {
        if decision.probe {
            self.circuit_breaker.release_probe();
        }
    }

    /// Current protection status.
    pub fn protection_status(&self) -> ProtectionStatus {
        ProtectionStatus {
            circuit_state: self.circuit_breaker.state(),
            circuit_failures: self.circuit_breaker.failure_count(),
            load_shedding_active: self.load_shedder.is_shedding(),
            requests_in_window: self.load_shedder.requests_in_window(),
            active_clients: self.rate_limiter.tracked_clients(),
        }
    }

    /// Per-client limiter stage.
    pub fn rate_limiter(&self) -> &ClientRateLimiter {
        &self.rate_limiter
    }

    /// Circuit breaker stage.
    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.circuit_breaker
    }

    /// Load shedding stage.
    pub fn load_shedder(&self) -> &LoadShedder {
        &self.load_shedder
    }
}

/// Shareable controller reference.
pub type SharedAdmissionController = Arc<AdmissionController>;
