//! Counterparty state store.
//!
//! Keyed map of per-counterparty records plus the release policies the
//! scheduler and backpressure transitions apply. The store is encapsulated
//! behind the scheduler's mutex and never handed out by reference.

mod state;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::domain::CounterpartyId;

pub use state::{CounterpartyState, Lifecycle};

/// Map of counterparty id to mutable state.
#[derive(Debug, Default)]
pub struct CounterpartyStore {
    states: HashMap<CounterpartyId, CounterpartyState>,
}

impl CounterpartyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a counterparty as newly arrived. Idempotent: an id already
    /// tracked keeps its original first-seen time and retry count.
    pub fn mark_new(&mut self, id: CounterpartyId, now: Instant) {
        self.states.entry(id).or_insert_with(|| {
            tracing::debug!(counterparty = id, "tracking new counterparty");
            CounterpartyState::new(now)
        });
    }

    /// State for one counterparty, if tracked.
    pub fn get(&self, id: CounterpartyId) -> Option<&CounterpartyState> {
        self.states.get(&id)
    }

    /// Mutable state for one counterparty, creating a fresh record if
    /// the id is unknown (a counterparty can be evaluated before its
    /// arrival event lands).
    pub fn get_or_insert(&mut self, id: CounterpartyId, now: Instant) -> &mut CounterpartyState {
        self.states.entry(id).or_insert_with(|| CounterpartyState::new(now))
    }

    /// Mutable state for one counterparty, if tracked. Does not create.
    pub fn get_mut(&mut self, id: CounterpartyId) -> Option<&mut CounterpartyState> {
        self.states.get_mut(&id)
    }

    /// Drop all state for a counterparty. A returning counterparty starts
    /// fresh.
    pub fn remove(&mut self, id: CounterpartyId) -> Option<CounterpartyState> {
        let removed = self.states.remove(&id);
        if let Some(ref s) = removed {
            tracing::debug!(
                counterparty = id,
                committed = s.total_committed,
                "flushed counterparty state"
            );
        }
        removed
    }

    /// Number of tracked counterparties.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Release counterparties with no open transactions that are marked
    /// "nothing to purchase" and are past their new-arrival grace. Frees
    /// memory and lets them be re-evaluated if they return.
    pub fn release_inactive(&mut self, open_counts: &HashMap<CounterpartyId, usize>) -> usize {
        let before = self.states.len();
        self.states.retain(|id, state| {
            let open = open_counts.get(id).copied().unwrap_or(0);
            let release = open == 0 && state.no_need && !state.lifecycle.is_new();
            if release {
                tracing::debug!(counterparty = *id, "releasing inactive counterparty");
            }
            !release
        });
        before - self.states.len()
    }

    /// Release every counterparty with no open transactions, keeping only
    /// those with in-flight work. Applied when backpressure pauses trading.
    pub fn release_idle(&mut self, open_counts: &HashMap<CounterpartyId, usize>) -> usize {
        let before = self.states.len();
        self.states
            .retain(|id, _| open_counts.get(id).copied().unwrap_or(0) > 0);
        before - self.states.len()
    }

    /// Release all counterparty state. Applied on the critical
    /// backpressure transition after open transactions are cancelled.
    pub fn release_all(&mut self) -> usize {
        let released = self.states.len();
        self.states.clear();
        released
    }

    /// Ids of `New` counterparties whose warm-up just elapsed and that
    /// still have retries left. Used when a cycle finds no candidates.
    pub fn new_ready(&self, now: Instant, warmup: Duration, max_retries: u32) -> Vec<CounterpartyId> {
        let mut ready: Vec<CounterpartyId> = self
            .states
            .iter()
            .filter(|(_, s)| {
                s.lifecycle.is_new() && s.warmup_elapsed(now, warmup) && s.retry_count < max_retries
            })
            .map(|(id, _)| *id)
            .collect();
        ready.sort_unstable();
        ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(ids: &[CounterpartyId]) -> CounterpartyStore {
        let mut store = CounterpartyStore::new();
        let now = Instant::now();
        for &id in ids {
            store.mark_new(id, now);
        }
        store
    }

    #[test]
    fn test_mark_new_idempotent() {
        let mut store = CounterpartyStore::new();
        let early = Instant::now() - Duration::from_secs(30);
        store.mark_new(1, early);
        store.get_or_insert(1, early).retry_count = 2;

        // Re-marking must not reset first-seen or retries
        store.mark_new(1, Instant::now());
        let state = store.get(1).unwrap();
        assert_eq!(state.first_seen_at, early);
        assert_eq!(state.retry_count, 2);
    }

    #[test]
    fn test_remove_returns_state() {
        let mut store = store_with(&[1, 2]);
        assert!(store.remove(1).is_some());
        assert!(store.remove(1).is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_release_inactive() {
        let mut store = store_with(&[1, 2, 3]);
        // 1: no-need, active, no open tx -> released
        {
            let s = store.get_or_insert(1, Instant::now());
            s.lifecycle = Lifecycle::Active;
            s.no_need = true;
        }
        // 2: no-need but still new -> kept
        store.get_or_insert(2, Instant::now()).no_need = true;
        // 3: no-need, active, but has open tx -> kept
        {
            let s = store.get_or_insert(3, Instant::now());
            s.lifecycle = Lifecycle::Active;
            s.no_need = true;
        }

        let open = HashMap::from([(3, 1usize)]);
        let released = store.release_inactive(&open);

        assert_eq!(released, 1);
        assert!(store.get(1).is_none());
        assert!(store.get(2).is_some());
        assert!(store.get(3).is_some());
    }

    #[test]
    fn test_release_idle_keeps_open() {
        let mut store = store_with(&[1, 2, 3]);
        let open = HashMap::from([(2, 2usize)]);

        let released = store.release_idle(&open);

        assert_eq!(released, 2);
        assert_eq!(store.len(), 1);
        assert!(store.get(2).is_some());
    }

    #[test]
    fn test_release_all() {
        let mut store = store_with(&[1, 2, 3]);
        assert_eq!(store.release_all(), 3);
        assert!(store.is_empty());
    }

    #[test]
    fn test_new_ready_filters_and_sorts() {
        let mut store = CounterpartyStore::new();
        let past = Instant::now() - Duration::from_secs(20);
        let now = Instant::now();

        // Warm-up elapsed, retries left
        store.mark_new(5, past);
        store.mark_new(2, past);
        // Still warming up
        store.mark_new(3, now);
        // Retries exhausted
        store.mark_new(4, past);
        store.get_or_insert(4, past).retry_count = 3;
        // Not new anymore
        store.mark_new(6, past);
        store.get_or_insert(6, past).lifecycle = Lifecycle::Active;

        let ready = store.new_ready(now, Duration::from_secs(10), 3);
        assert_eq!(ready, vec![2, 5]);
    }
}
