//! Per-counterparty mutable state.
//!
//! One record per counterparty currently tracked: cached offers, timers,
//! counters, and lifecycle flags. The record never stores the number of
//! open transactions; that is derived from the host's live transaction
//! set on every check.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::domain::{ItemKind, Offer};

/// Lifecycle of a tracked counterparty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    /// Recently arrived; gets a warm-up delay and bounded retries before
    /// "nothing to purchase" sticks.
    New,
    /// Has committed at least one transaction, or used up its retries.
    Active,
    /// Visit transaction budget used up; skipped until released.
    Exhausted,
}

impl Lifecycle {
    /// Returns true while the counterparty still gets new-arrival grace.
    pub fn is_new(&self) -> bool {
        matches!(self, Lifecycle::New)
    }
}

/// Mutable record for one counterparty. Owned exclusively by
/// [`CounterpartyStore`](super::CounterpartyStore).
#[derive(Debug, Clone)]
pub struct CounterpartyState {
    pub lifecycle: Lifecycle,
    /// Memoized sellable-item list. `None` means invalidated; an empty map
    /// means the counterparty offered nothing at last refresh.
    pub cached_offers: Option<HashMap<ItemKind, Offer>>,
    /// When the offer cache was last refreshed.
    pub offers_refreshed_at: Option<Instant>,
    /// When a purchase was last attempted; anchors the cooldown window.
    pub last_attempt_at: Option<Instant>,
    /// Lifetime transactions committed against this counterparty this visit.
    pub total_committed: u32,
    /// When the counterparty was first seen; anchors the warm-up delay.
    pub first_seen_at: Instant,
    /// Retries consumed while `New` with nothing purchasable.
    pub retry_count: u32,
    /// Set once a scan finds nothing purchasable. Sticky unless `New`.
    pub no_need: bool,
}

impl CounterpartyState {
    /// Fresh state for a counterparty first seen `now`.
    pub fn new(now: Instant) -> Self {
        Self {
            lifecycle: Lifecycle::New,
            cached_offers: None,
            offers_refreshed_at: None,
            last_attempt_at: None,
            total_committed: 0,
            first_seen_at: now,
            retry_count: 0,
            no_need: false,
        }
    }

    /// Whether the new-arrival warm-up delay has elapsed.
    pub fn warmup_elapsed(&self, now: Instant, warmup: Duration) -> bool {
        !self.lifecycle.is_new() || now.duration_since(self.first_seen_at) >= warmup
    }

    /// Whether the counterparty is inside its post-attempt cooldown window.
    pub fn in_cooldown(&self, now: Instant, cooldown: Option<Duration>) -> bool {
        match (cooldown, self.last_attempt_at) {
            (Some(window), Some(last)) => now.duration_since(last) < window,
            _ => false,
        }
    }

    /// Cached offers if present and not stale.
    pub fn fresh_offers(&self, now: Instant, staleness: Option<Duration>) -> Option<&HashMap<ItemKind, Offer>> {
        let offers = self.cached_offers.as_ref()?;
        if let Some(window) = staleness
            && let Some(refreshed) = self.offers_refreshed_at
            && now.duration_since(refreshed) >= window
        {
            return None;
        }
        Some(offers)
    }

    /// Store a refreshed offer map.
    pub fn put_offers(&mut self, offers: HashMap<ItemKind, Offer>, now: Instant) {
        self.cached_offers = Some(offers);
        self.offers_refreshed_at = Some(now);
    }

    /// Drop the cached offers. Called after any committed transaction
    /// against this counterparty: its stock has changed.
    pub fn invalidate_offers(&mut self) {
        self.cached_offers = None;
        self.offers_refreshed_at = None;
    }

    /// Record an attempt (successful or not). Starts the cooldown window.
    pub fn record_attempt(&mut self, now: Instant) {
        self.last_attempt_at = Some(now);
    }

    /// Record a committed transaction: bump the counter, clear flags,
    /// invalidate offers, and promote/exhaust the lifecycle.
    pub fn record_commit(&mut self, now: Instant, visit_cap: u32) {
        self.total_committed += 1;
        self.no_need = false;
        self.invalidate_offers();
        self.record_attempt(now);
        self.lifecycle = if self.total_committed >= visit_cap {
            Lifecycle::Exhausted
        } else {
            Lifecycle::Active
        };
    }

    /// Record a failed attempt. New counterparties consume a retry before
    /// "nothing to purchase" sticks; at the retry bound they are demoted.
    pub fn record_failure(&mut self, now: Instant, max_new_retries: u32) {
        self.record_attempt(now);
        if self.lifecycle.is_new() {
            self.retry_count += 1;
            if self.retry_count >= max_new_retries {
                self.lifecycle = Lifecycle::Active;
                self.no_need = true;
            }
        } else {
            self.no_need = true;
        }
    }

    /// Clear skip flags and the offer cache after a transaction completes
    /// or is cancelled: a slot may have freed and stock has changed.
    pub fn reset_flags(&mut self) {
        self.no_need = false;
        self.invalidate_offers();
    }
}
