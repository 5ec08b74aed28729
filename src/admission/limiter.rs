//! Per-client fixed window rate limiter with block escalation.

use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use super::clock::SharedClock;
use super::counter::{ceil_secs, FixedWindow};
use super::decision::{Decision, RejectionKind};
use crate::config::RateLimitingConfig;

/// Severity of an active block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// Ordinary overuse
    Standard,
    /// Suspected brute force; uses the longer block duration
    BruteForce,
}

/// An active block on a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    /// When the block lifts
    pub expiry: Instant,
    /// Why the client was blocked
    pub kind: BlockKind,
}

/// Tracked state for one client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientLimitState {
    /// Requests in the current window
    window: FixedWindow,
    /// Most recent request, blocked attempts included
    last_request: Instant,
    /// Burst penalty points accrued in the current window
    penalty: u64,
    /// Active block, if any
    block: Option<Block>,
}

impl ClientLimitState {
    fn first_request(window: Duration, now: Instant) -> Self {
        let mut counter = FixedWindow::new(window, now);
        counter.increment(1);
        Self {
            window: counter,
            last_request: now,
            penalty: 0,
            block: None,
        }
    }

    /// Requests counted in the current window.
    pub fn count(&self) -> u64 {
        self.window.count()
    }

    /// Start of the current window.
    pub fn window_start(&self) -> Instant {
        self.window.start()
    }

    /// Most recent request, blocked attempts included.
    pub fn last_request(&self) -> Instant {
        self.last_request
    }

    /// Burst penalty points accrued in the current window.
    pub fn penalty(&self) -> u64 {
        self.penalty
    }

    /// Whether a block is recorded, expired or not.
    pub fn is_blocked(&self) -> bool {
        self.block.is_some()
    }

    /// The recorded block, if any.
    pub fn block(&self) -> Option<Block> {
        self.block
    }

    /// Request count plus burst penalty. A blocked client whose score passes
    /// the brute-force threshold gets the longer block.
    pub fn abuse_score(&self) -> u64 {
        self.window.count().saturating_add(self.penalty)
    }
}

/// Per-client rate limiter.
///
/// Entries live in a sharded map; the entry guard serializes concurrent
/// checks for the same client while other clients proceed in parallel.
#[derive(Debug)]
pub struct ClientRateLimiter {
    /// State indexed by client identifier
    clients: DashMap<String, ClientLimitState>,
    config: RateLimitingConfig,
    clock: SharedClock,
    /// When the last stale-entry sweep ran
    last_sweep: Mutex<Option<Instant>>,
}

impl ClientRateLimiter {
    /// Create a rate limiter reading time from `clock`.
    pub fn new(config: RateLimitingConfig, clock: SharedClock) -> Self {
        Self {
            clients: DashMap::new(),
            config,
            clock,
            last_sweep: Mutex::new(None),
        }
    }

    /// Count a request from `client_id` and decide whether it may proceed.
    pub fn check(&self, client_id: &str) -> Decision {
        let now = self.clock.now();
        self.maybe_sweep(now);

        let mut state = match self.clients.entry(client_id.to_string()) {
            Entry::Vacant(vacant) => {
                trace!(client_id = %client_id, "Tracking new client");
                vacant.insert(ClientLimitState::first_request(self.config.window(), now));
                return Decision::allow();
            }
            Entry::Occupied(occupied) => occupied.into_ref(),
        };

        if let Some(block) = state.block {
            if now < block.expiry {
                return self.deny_blocked(client_id, &mut state, block, now);
            }

            debug!(client_id = %client_id, "Block expired, starting fresh");
            *state = ClientLimitState::first_request(self.config.window(), now);
            return Decision::allow();
        }

        if state.window.is_expired(now) {
            trace!(client_id = %client_id, "Window elapsed, resetting count");
            state.window.restart(now);
            state.window.increment(1);
            state.penalty = 0;
            state.last_request = now;
            return Decision::allow();
        }

        let gap = now.saturating_duration_since(state.last_request);
        let count = state.window.increment(1);
        if gap < self.config.burst_gap() {
            state.penalty = state.penalty.saturating_add(self.config.burst_penalty);
            trace!(
                client_id = %client_id,
                gap_ms = gap.as_millis() as u64,
                penalty = state.penalty,
                "Burst request penalized"
            );
        }
        state.last_request = now;

        if count <= self.config.max_requests_per_window {
            return Decision::allow();
        }

        let (kind, duration) = if count > self.config.brute_force_threshold() {
            (BlockKind::BruteForce, self.config.brute_force_block())
        } else {
            (BlockKind::Standard, self.config.block_duration())
        };
        state.block = Some(Block {
            expiry: now + duration,
            kind,
        });

        warn!(
            client_id = %client_id,
            count = count,
            penalty = state.penalty,
            block = ?kind,
            block_secs = duration.as_secs(),
            "Client exceeded rate limit, blocking"
        );

        let rejection = match kind {
            BlockKind::Standard => RejectionKind::RateLimited,
            BlockKind::BruteForce => RejectionKind::BruteForce,
        };
        Decision::deny_with_retry(rejection, ceil_secs(duration))
    }

    /// A blocked client tried again. The attempt still counts toward the
    /// current window, and enough of them in one window escalate a standard
    /// block to a brute-force block. Rapid retries accrue burst penalty and
    /// escalate sooner.
    fn deny_blocked(
        &self,
        client_id: &str,
        state: &mut ClientLimitState,
        block: Block,
        now: Instant,
    ) -> Decision {
        if state.window.is_expired(now) {
            state.window.restart(now);
            state.penalty = 0;
        } else if now.saturating_duration_since(state.last_request) < self.config.burst_gap() {
            state.penalty = state.penalty.saturating_add(self.config.burst_penalty);
        }
        state.window.increment(1);
        state.last_request = now;

        let mut expiry = block.expiry;
        if block.kind == BlockKind::Standard
            && state.abuse_score() > self.config.brute_force_threshold()
        {
            expiry = now + self.config.brute_force_block();
            state.block = Some(Block {
                expiry,
                kind: BlockKind::BruteForce,
            });
            warn!(
                client_id = %client_id,
                count = state.window.count(),
                "Blocked client kept retrying, escalating to brute-force block"
            );
        }

        debug!(client_id = %client_id, "Rejecting request from blocked client");
        Decision::deny_with_retry(
            RejectionKind::Blocked,
            ceil_secs(expiry.saturating_duration_since(now)),
        )
    }

    /// Sweep stale entries once the map is large, at most once per sweep
    /// interval.
    fn maybe_sweep(&self, now: Instant) {
        if self.clients.len() <= self.config.sweep_threshold {
            return;
        }

        {
            let mut last = self.last_sweep.lock();
            if let Some(previous) = *last {
                if now.saturating_duration_since(previous) < self.config.sweep_interval() {
                    return;
                }
            }
            *last = Some(now);
        }

        self.sweep_stale_at(now);
    }

    /// Remove unblocked clients that have been idle for longer than the
    /// block duration. Returns the number of entries removed.
    pub fn sweep_stale(&self) -> usize {
        self.sweep_stale_at(self.clock.now())
    }

    fn sweep_stale_at(&self, now: Instant) -> usize {
        let idle_limit = self.config.block_duration();
        let before = self.clients.len();

        self.clients.retain(|_, state| {
            state.is_blocked() || now.saturating_duration_since(state.last_request) <= idle_limit
        });

        let removed = before.saturating_sub(self.clients.len());
        debug!(
            removed = removed,
            remaining = self.clients.len(),
            "Swept stale client entries"
        );
        removed
    }

    /// Snapshot of one client's state.
    pub fn client_state(&self, client_id: &str) -> Option<ClientLimitState> {
        self.clients.get(client_id).map(|entry| entry.value().clone())
    }

    /// Number of tracked clients.
    pub fn tracked_clients(&self) -> usize {
        self.clients.len()
    }

    /// Forget every client.
    pub fn clear(&self) {
        self.clients.clear();
    }

    /// Limits this limiter enforces.
    pub fn config(&self) -> &RateLimitingConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::clock::ManualClock;
    use std::sync::Arc;

    fn limiter() -> (ClientRateLimiter, ManualClock) {
        limiter_with(RateLimitingConfig::default())
    }

    fn limiter_with(config: RateLimitingConfig) -> (ClientRateLimiter, ManualClock) {
        let clock = ManualClock::default();
        let limiter = ClientRateLimiter::new(config, Arc::new(clock.clone()));
        (limiter, clock)
    }

    #[test]
    fn test_first_request_creates_state() {
        let (limiter, _clock) = limiter();

        assert!(limiter.check("a").allowed);
        assert_eq!(limiter.tracked_clients(), 1);
        assert_eq!(limiter.client_state("a").unwrap().count(), 1);
    }

    #[test]
    fn test_requests_within_limit_allowed() {
        let (limiter, clock) = limiter();

        for _ in 0..10 {
            assert!(limiter.check("a").allowed);
            clock.advance(Duration::from_secs(3));
        }
        assert_eq!(limiter.client_state("a").unwrap().count(), 10);
    }

    #[test]
    fn test_exceeding_limit_blocks_with_standard_duration() {
        let (limiter, clock) = limiter();

        for _ in 0..10 {
            assert!(limiter.check("a").allowed);
            clock.advance(Duration::from_secs(3));
        }

        let decision = limiter.check("a");
        assert!(!decision.allowed);
        assert_eq!(decision.rejection, Some(RejectionKind::RateLimited));
        assert_eq!(decision.retry_after_secs, Some(300));

        let state = limiter.client_state("a").unwrap();
        assert_eq!(state.block().unwrap().kind, BlockKind::Standard);
        assert!(state.block().unwrap().expiry > state.window_start());
    }

    #[test]
    fn test_blocked_client_gets_remaining_time() {
        let (limiter, clock) = limiter();

        for _ in 0..11 {
            limiter.check("a");
            clock.advance(Duration::from_secs(3));
        }

        clock.advance(Duration::from_millis(99_500));
        let decision = limiter.check("a");
        assert!(!decision.allowed);
        assert_eq!(decision.rejection, Some(RejectionKind::Blocked));
        // 300s block, 3s + 99.5s elapsed since blocking
        assert_eq!(decision.retry_after_secs, Some(198));
    }

    #[test]
    fn test_burst_accrues_penalty_without_blocking_early() {
        let (limiter, clock) = limiter();

        for _ in 0..10 {
            assert!(limiter.check("a").allowed);
            clock.advance(Duration::from_millis(100));
        }

        let state = limiter.client_state("a").unwrap();
        assert_eq!(state.count(), 10);
        assert_eq!(state.penalty(), 9);
    }

    #[test]
    fn test_rapid_burst_first_block_is_standard() {
        let (limiter, clock) = limiter();

        for _ in 0..10 {
            assert!(limiter.check("a").allowed);
            clock.advance(Duration::from_millis(100));
        }

        let decision = limiter.check("a");
        assert!(!decision.allowed);
        assert_eq!(decision.rejection, Some(RejectionKind::RateLimited));
        assert_eq!(decision.retry_after_secs, Some(300));
        assert_eq!(
            limiter.client_state("a").unwrap().block().unwrap().kind,
            BlockKind::Standard
        );
    }

    #[test]
    fn test_rapid_retry_after_burst_escalates() {
        let (limiter, clock) = limiter();

        for _ in 0..11 {
            limiter.check("a");
            clock.advance(Duration::from_millis(50));
        }

        // count 12 plus 11 penalty points passes the threshold of 20
        let decision = limiter.check("a");
        assert!(!decision.allowed);
        assert_eq!(decision.rejection, Some(RejectionKind::Blocked));
        assert_eq!(decision.retry_after_secs, Some(900));
        assert_eq!(
            limiter.client_state("a").unwrap().block().unwrap().kind,
            BlockKind::BruteForce
        );
    }

    #[test]
    fn test_slow_retries_across_windows_stay_standard() {
        let (limiter, clock) = limiter();

        for _ in 0..11 {
            limiter.check("a");
            clock.advance(Duration::from_secs(5));
        }

        let mut last = Decision::allow();
        for _ in 0..13 {
            last = limiter.check("a");
            clock.advance(Duration::from_secs(20));
        }

        assert!(!last.allowed);
        assert!(last.retry_after_secs.unwrap() <= 300);
        let state = limiter.client_state("a").unwrap();
        assert_eq!(state.block().unwrap().kind, BlockKind::Standard);
        assert!(state.count() <= 4);
    }

    #[test]
    fn test_retrying_while_blocked_escalates() {
        let (limiter, clock) = limiter();

        for _ in 0..11 {
            limiter.check("a");
            clock.advance(Duration::from_secs(2));
        }
        assert_eq!(
            limiter.client_state("a").unwrap().block().unwrap().kind,
            BlockKind::Standard
        );

        let mut last = Decision::allow();
        for _ in 0..10 {
            last = limiter.check("a");
            clock.advance(Duration::from_secs(2));
        }

        assert!(!last.allowed);
        assert!(last.retry_after_secs.unwrap() > 300);
        assert_eq!(
            limiter.client_state("a").unwrap().block().unwrap().kind,
            BlockKind::BruteForce
        );
    }

    #[test]
    fn test_block_expiry_restarts_count() {
        let (limiter, clock) = limiter();

        for _ in 0..11 {
            limiter.check("a");
            clock.advance(Duration::from_secs(3));
        }
        clock.advance(Duration::from_secs(301));

        assert!(limiter.check("a").allowed);
        let state = limiter.client_state("a").unwrap();
        assert_eq!(state.count(), 1);
        assert!(!state.is_blocked());
        assert_eq!(state.penalty(), 0);
    }

    #[test]
    fn test_window_rollover_resets_count() {
        let (limiter, clock) = limiter();

        for _ in 0..10 {
            assert!(limiter.check("a").allowed);
            clock.advance(Duration::from_secs(5));
        }
        clock.advance(Duration::from_secs(11));

        assert!(limiter.check("a").allowed);
        assert_eq!(limiter.client_state("a").unwrap().count(), 1);
    }

    #[test]
    fn test_clients_are_independent() {
        let (limiter, clock) = limiter();

        for _ in 0..11 {
            limiter.check("a");
            clock.advance(Duration::from_secs(3));
        }

        assert!(!limiter.check("a").allowed);
        assert!(limiter.check("b").allowed);
    }

    #[test]
    fn test_sweep_removes_idle_unblocked_clients() {
        let (limiter, clock) = limiter();

        limiter.check("idle");
        for _ in 0..11 {
            limiter.check("blocked");
            clock.advance(Duration::from_secs(3));
        }
        clock.advance(Duration::from_secs(280));
        limiter.check("fresh");

        assert_eq!(limiter.sweep_stale(), 1);
        assert!(limiter.client_state("idle").is_none());
        assert!(limiter.client_state("blocked").is_some());
        assert!(limiter.client_state("fresh").is_some());
    }

    #[test]
    fn test_size_triggered_sweep_is_throttled() {
        let config = RateLimitingConfig {
            sweep_threshold: 2,
            ..RateLimitingConfig::default()
        };
        let (limiter, clock) = limiter_with(config);

        limiter.check("a");
        limiter.check("b");
        limiter.check("c");
        clock.advance(Duration::from_secs(301));

        // Map is over the threshold: this check sweeps a, b and c first
        limiter.check("d");
        assert_eq!(limiter.tracked_clients(), 1);

        limiter.check("e");
        limiter.check("f");
        clock.advance(Duration::from_secs(5));
        limiter.check("g");
        // Within the sweep interval, nothing is removed
        assert_eq!(limiter.tracked_clients(), 4);
    }

    #[test]
    fn test_clear() {
        let (limiter, _clock) = limiter();
        limiter.check("a");
        limiter.clear();
        assert_eq!(limiter.tracked_clients(), 0);
    }
}
