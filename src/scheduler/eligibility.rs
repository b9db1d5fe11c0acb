//! Eligibility filter for counterparties.
//!
//! A pure predicate: given a counterparty handle, its tracked state, the
//! consumer id, and the derived open-transaction count, decide whether a
//! purchase may be attempted, and if not, why. No side effects; the
//! engine applies any state changes the verdict implies.

use std::time::Instant;

use crate::config::Config;
use crate::domain::{CounterpartyId, CounterpartyRef, IneligibleReason};
use crate::store::{CounterpartyState, Lifecycle};

/// Check one counterparty. Returns `Err(reason)` on the first failing
/// check, in a fixed order so reason codes are deterministic.
pub fn check_eligibility(
    candidate: &CounterpartyRef,
    consumer: CounterpartyId,
    state: &CounterpartyState,
    open_count: usize,
    config: &Config,
    now: Instant,
) -> Result<(), IneligibleReason> {
    if candidate.id == consumer {
        return Err(IneligibleReason::IsConsumer);
    }
    if !candidate.tradeable {
        return Err(IneligibleReason::NotTradeable);
    }
    if state.lifecycle == Lifecycle::Exhausted
        || state.total_committed >= config.limits.max_committed_per_visit
    {
        return Err(IneligibleReason::VisitBudgetExhausted);
    }
    if state.in_cooldown(now, config.timing.cooldown()) {
        return Err(IneligibleReason::CoolingDown);
    }
    if !state.warmup_elapsed(now, config.timing.warmup()) {
        return Err(IneligibleReason::WarmingUp);
    }
    if open_count >= config.limits.max_open_per_counterparty {
        return Err(IneligibleReason::AtConcurrencyCap);
    }
    if state.no_need && !state.lifecycle.is_new() {
        return Err(IneligibleReason::NothingToPurchase);
    }
    Ok(())
}
