//! System-wide probabilistic load shedding.

use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{info, trace, warn};

use super::clock::SharedClock;
use super::counter::FixedWindow;
use super::decision::{Decision, RejectionKind};
use crate::config::LoadSheddingConfig;

/// Source of uniform draws in `[0, 1)`.
pub trait RandomSource: Send + Sync + Debug {
    fn next_f64(&self) -> f64;
}

/// Draws from the thread-local generator.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn next_f64(&self) -> f64 {
        rand::thread_rng().gen::<f64>()
    }
}

/// Always returns the same value. Forces one branch of a probabilistic check.
#[derive(Debug, Clone, Copy)]
pub struct FixedRandom(pub f64);

impl RandomSource for FixedRandom {
    fn next_f64(&self) -> f64 {
        self.0
    }
}

/// Reproducible pseudo-random draws.
#[derive(Debug)]
pub struct SeededRandom {
    rng: Mutex<StdRng>,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl RandomSource for SeededRandom {
    fn next_f64(&self) -> f64 {
        self.rng.lock().gen::<f64>()
    }
}

/// Shareable random source reference.
pub type SharedRandom = Arc<dyn RandomSource>;

#[derive(Debug)]
struct ShedState {
    window: FixedWindow,
    shedding: bool,
}

/// Rejects a share of traffic once global volume passes a ceiling.
///
/// Shedding starts when the window's request count exceeds
/// `max_global_requests` and lasts until the window rolls over.
#[derive(Debug)]
pub struct LoadShedder {
    state: Mutex<ShedState>,
    config: LoadSheddingConfig,
    clock: SharedClock,
    random: SharedRandom,
}

impl LoadShedder {
    pub fn new(config: LoadSheddingConfig, clock: SharedClock, random: SharedRandom) -> Self {
        let window = FixedWindow::new(config.window(), clock.now());
        Self {
            state: Mutex::new(ShedState {
                window,
                shedding: false,
            }),
            config,
            clock,
            random,
        }
    }

    /// Count a request and decide whether to shed it.
    pub fn check(&self) -> Decision {
        let now = self.clock.now();

        let (count, shedding) = {
            let mut state = self.state.lock();

            if state.window.maybe_reset(now) && state.shedding {
                info!("Load window rolled over, shedding stopped");
                state.shedding = false;
            }

            let count = state.window.increment(1);
            if count > self.config.max_global_requests && !state.shedding {
                warn!(
                    requests = count,
                    ceiling = self.config.max_global_requests,
                    shed_percentage = self.config.shed_percentage,
                    "Global request ceiling exceeded, shedding load"
                );
                state.shedding = true;
            }

            (count, state.shedding)
        };

        if shedding && self.random.next_f64() < self.config.shed_probability() {
            trace!(requests = count, "Shedding request");
            return Decision::deny(RejectionKind::Overloaded);
        }

        Decision::allow()
    }

    pub fn is_shedding(&self) -> bool {
        self.state.lock().shedding
    }

    /// Requests counted in the current window.
    pub fn requests_in_window(&self) -> u64 {
        self.state.lock().window.count()
    }
}
