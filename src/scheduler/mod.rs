//! Scheduling engine for automatic restocking.
//!
//! This module provides:
//! - **Eligibility filtering**: Decides which counterparties may be traded
//!   with right now, with a reason code for every rejection.
//! - **Priority scoring**: Ranks eligible counterparties by cheap stock,
//!   tier-weighted unmet need, and open-transaction load.
//! - **Transaction building**: Greedily assembles the largest viable
//!   purchase under the unit, budget, and spend caps, with speculative
//!   reservations and full rollback.
//! - **Backpressure**: A hysteresis governor over the downstream
//!   fulfillment queue depth (Normal/Slowdown/Paused/Critical).
//! - **Scheduler**: The orchestrator tying it together behind the host's
//!   event entry points.
//!
//! # Architecture
//!
//! The scheduler has no thread of its own. Host events (counterparty
//! arrival/departure, transaction completion/cancellation, queue-depth
//! samples) invoke it synchronously; each cycle re-derives the best
//! action from current state:
//!
//! 1. Check the backpressure governor
//! 2. Filter counterparties through the eligibility checks
//! 3. Score the survivors and sort best-first
//! 4. Build a transaction for the top candidate
//! 5. Commit under the dedup lock, re-checking caps inside it
//! 6. Re-score everyone and repeat, up to a bounded iteration count

mod backpressure;
mod builder;
mod eligibility;
mod engine;
mod scoring;

pub use backpressure::{BackpressureGovernor, ThrottleState, Transition};
pub use builder::build_transaction;
pub use eligibility::check_eligibility;
pub use engine::{CANDIDATE_LOOKAHEAD, MAX_CYCLE_ITERATIONS, Scheduler};
pub use scoring::{
    CHEAPEST_TIER_BONUS, ItemNeed, NEED_DIVISOR, OPEN_TX_PENALTY, RETRY_SCORE, ScoreConfig,
    ScoredCandidate, eligible_items, need_of, score_counterparty, stock_percent,
};
