//! System-wide circuit breaker guarding the downstream edit operation.
//!
//! The breaker trips after a run of failures, rejects everything for a
//! cooldown, then admits a bounded number of probe requests. A successful
//! probe closes the circuit; a failed one trips it again.

use std::fmt;
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::clock::SharedClock;
use super::decision::{Decision, RejectionKind};
use crate::config::CircuitBreakerConfig;

/// Externally visible breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    /// Operating normally
    Closed,
    /// Tripped; rejecting until the cooldown elapses
    Open,
    /// Admitting a limited number of probes
    HalfOpen,
}

impl CircuitState {
    /// Name used in status output.
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Closed,
    Open { opened_at: Instant },
    HalfOpen { since: Instant },
}

#[derive(Debug)]
struct BreakerState {
    phase: Phase,
    /// Failures counted while closed
    failure_count: u32,
    /// Probes admitted in the current half-open period
    probe_count: u32,
    last_failure_at: Option<Instant>,
}

/// Three-state circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: Mutex<BreakerState>,
    config: CircuitBreakerConfig,
    clock: SharedClock,
}

impl CircuitBreaker {
    /// Create a closed breaker.
    pub fn new(config: CircuitBreakerConfig, clock: SharedClock) -> Self {
        Self {
            state: Mutex::new(BreakerState {
                phase: Phase::Closed,
                failure_count: 0,
                probe_count: 0,
                last_failure_at: None,
            }),
            config,
            clock,
        }
    }

    /// Decide whether a request may reach the downstream operation.
    pub fn check(&self) -> Decision {
        let now = self.clock.now();
        let mut state = self.state.lock();

        match state.phase {
            Phase::Closed => Decision::allow(),
            Phase::Open { opened_at } => {
                if now.saturating_duration_since(opened_at) > self.config.reset_timeout() {
                    info!("Circuit cooldown elapsed, probing downstream");
                    state.phase = Phase::HalfOpen { since: now };
                    state.failure_count = 0;
                    state.probe_count = 1;
                    Decision::allow_probe()
                } else {
                    Decision::deny(RejectionKind::CircuitOpen)
                }
            }
            Phase::HalfOpen { since } => {
                if state.probe_count < self.config.half_open_max_requests {
                    state.probe_count += 1;
                    debug!(probe = state.probe_count, "Admitting half-open probe");
                    return Decision::allow_probe();
                }

                // Probes whose outcome never arrived must not wedge the breaker.
                if now.saturating_duration_since(since) > self.config.reset_timeout() {
                    debug!("Half-open probes went unanswered, starting a new probe round");
                    state.phase = Phase::HalfOpen { since: now };
                    state.probe_count = 1;
                    return Decision::allow_probe();
                }

                Decision::deny(RejectionKind::CircuitRecovering)
            }
        }
    }

    /// The downstream operation succeeded.
    pub fn record_success(&self) {
        let mut state = self.state.lock();

        match state.phase {
            Phase::Closed => {
                state.failure_count = state.failure_count.saturating_sub(1);
            }
            Phase::HalfOpen { .. } => {
                info!("Probe succeeded, closing circuit");
                state.phase = Phase::Closed;
                state.failure_count = 0;
                state.probe_count = 0;
            }
            Phase::Open { .. } => {
                // Late result from a request admitted before the trip
            }
        }
    }

    /// The downstream operation failed or timed out.
    pub fn record_failure(&self) {
        let now = self.clock.now();
        let mut state = self.state.lock();

        state.failure_count = state.failure_count.saturating_add(1);
        state.last_failure_at = Some(now);

        match state.phase {
            Phase::Closed => {
                if state.failure_count >= self.config.failure_threshold {
                    warn!(
                        failures = state.failure_count,
                        cooldown_ms = self.config.reset_timeout_ms,
                        "Failure threshold reached, opening circuit"
                    );
                    state.phase = Phase::Open { opened_at: now };
                }
            }
            Phase::HalfOpen { .. } => {
                warn!("Probe failed, reopening circuit");
                state.phase = Phase::Open { opened_at: now };
                state.probe_count = 0;
            }
            Phase::Open { .. } => {}
        }
    }

    /// Hand back a probe that was admitted but never reached the downstream
    /// operation. Only call this for a decision whose `probe` flag is set.
    /// Has no effect outside the half-open state.
    pub fn release_probe(&self) {
        let mut state = self.state.lock();
        if let Phase::HalfOpen { .. } = state.phase {
            state.probe_count = state.probe_count.saturating_sub(1);
        }
    }

    /// Current state.
    pub fn state(&self) -> CircuitState {
        match self.state.lock().phase {
            Phase::Closed => CircuitState::Closed,
            Phase::Open { .. } => CircuitState::Open,
            Phase::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }

    /// Failures counted toward the trip threshold.
    pub fn failure_count(&self) -> u32 {
        self.state.lock().failure_count
    }

    /// Probes admitted in the current half-open round.
    pub fn probe_count(&self) -> u32 {
        self.state.lock().probe_count
    }

    /// When the most recent failure was recorded.
    pub fn last_failure_at(&self) -> Option<Instant> {
        self.state.lock().last_failure_at
    }

    /// When the circuit last tripped, if it is open.
    pub fn opened_at(&self) -> Option<Instant> {
        match self.state.lock().phase {
            Phase::Open { opened_at } => Some(opened_at),
            _ => None,
        }
    }

    /// Force the breaker closed.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.phase = Phase::Closed;
        state.failure_count = 0;
        state.probe_count = 0;
    }
}
