//! Request admission control: per-client rate limiting, circuit breaking and
//! load shedding in front of the protected edit operation.

mod breaker;
mod client_id;
mod clock;
mod counter;
mod decision;
mod gate;
mod limiter;
mod shedder;

pub use breaker::{CircuitBreaker, CircuitState};
pub use client_id::{resolve_client_id, UNKNOWN_CLIENT};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use counter::{ceil_secs, FixedWindow};
pub use decision::{Decision, RejectionKind};
pub use gate::{AdmissionController, AdmissionDecision, ProtectionStatus, SharedAdmissionController};
pub use limiter::{Block, BlockKind, ClientLimitState, ClientRateLimiter};
pub use shedder::{FixedRandom, LoadShedder, RandomSource, SeededRandom, SharedRandom, ThreadRandom};
