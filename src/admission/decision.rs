//! Allow/deny outcomes produced by each admission stage.

/// Why a request was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectionKind {
    /// Client exceeded its per-window quota
    RateLimited,
    /// Client exceeded the quota in a way that looks like abuse
    BruteForce,
    /// Client is still serving an earlier block
    Blocked,
    /// Downstream is failing and the breaker is open
    CircuitOpen,
    /// Breaker is half-open and its probes are used up
    CircuitRecovering,
    /// Global volume is over the ceiling and this request was shed
    Overloaded,
}

impl RejectionKind {
    /// Human-readable message returned to the caller.
    pub fn reason(&self) -> &'static str {
        match self {
            RejectionKind::RateLimited | RejectionKind::BruteForce => {
                "Rate limit exceeded. Please slow down."
            }
            RejectionKind::Blocked => "Too many requests. You have been temporarily blocked.",
            RejectionKind::CircuitOpen => {
                "Service temporarily unavailable. Please try again later."
            }
            RejectionKind::CircuitRecovering => "Service recovering. Please try again shortly.",
            RejectionKind::Overloaded => {
                "Server is experiencing high load. Please try again in a moment."
            }
        }
    }

    /// Whether the rejection is tied to the calling client rather than the
    /// whole system.
    pub fn is_per_client(&self) -> bool {
        matches!(
            self,
            RejectionKind::RateLimited | RejectionKind::BruteForce | RejectionKind::Blocked
        )
    }
}

/// Outcome of a single admission stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Set when the request is denied
    pub rejection: Option<RejectionKind>,
    /// Seconds the caller should wait, when known
    pub retry_after_secs: Option<u64>,
    /// The request holds one of the breaker's half-open probe slots
    pub probe: bool,
}

impl Decision {
    /// Let the request through.
    pub fn allow() -> Self {
        Self {
            allowed: true,
            rejection: None,
            retry_after_secs: None,
            probe: false,
        }
    }

    /// Let the request through as a half-open probe.
    pub fn allow_probe() -> Self {
        Self {
            probe: true,
            ..Self::allow()
        }
    }

    /// Deny without a retry hint.
    pub fn deny(kind: RejectionKind) -> Self {
        Self {
            allowed: false,
            rejection: Some(kind),
            retry_after_secs: None,
            probe: false,
        }
    }

    /// Deny and tell the caller when to come back.
    pub fn deny_with_retry(kind: RejectionKind, retry_after_secs: u64) -> Self {
        Self {
            allowed: false,
            rejection: Some(kind),
            retry_after_secs: Some(retry_after_secs),
            probe: false,
        }
    }

    /// Message for a denied request.
    pub fn reason(&self) -> Option<&'static str> {
        self.rejection.map(|kind| kind.reason())
    }
}
