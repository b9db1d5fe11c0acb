//! Scheduler cycle outcomes and eligibility reason codes.

use serde::{Deserialize, Serialize};

use crate::scheduler::ThrottleState;

/// Why a counterparty was rejected by the eligibility filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IneligibleReason {
    /// The counterparty is the consumer itself.
    IsConsumer,
    /// The host refuses trade with this counterparty entirely.
    NotTradeable,
    /// Lifetime transaction budget for this visit is used up.
    VisitBudgetExhausted,
    /// Still inside the post-attempt cooldown window.
    CoolingDown,
    /// New counterparty whose warm-up delay has not elapsed.
    WarmingUp,
    /// Already at the maximum number of concurrently open transactions.
    AtConcurrencyCap,
    /// A previous scan found nothing purchasable.
    NothingToPurchase,
}

/// What a scheduler cycle did. Informational only; callers do not depend
/// on it for correctness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The backpressure governor is Paused or Critical; nothing attempted.
    Throttled(ThrottleState),
    /// Slowdown throttle randomly skipped this cycle.
    SkippedSlowdown,
    /// Available budget is at or below the reserve floor.
    BudgetFloor,
    /// No consumer, no eligible counterparties, or nothing to buy.
    NothingToDo,
    /// Number of transactions committed this cycle (>= 1).
    Committed(usize),
}

impl CycleOutcome {
    /// True if the cycle committed at least one transaction.
    pub fn committed_any(&self) -> bool {
        matches!(self, CycleOutcome::Committed(n) if *n > 0)
    }
}
