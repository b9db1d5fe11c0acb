//! Scheduling engine.
//!
//! Drives the full cycle: backpressure check, eligibility filtering,
//! priority scoring, transaction building, and the double-checked commit.
//! Every external event re-derives the best action from current state
//! rather than maintaining a persistent plan.
//!
//! The engine runs synchronously on whichever caller triggered it and may
//! be invoked concurrently from any thread. Only the commit sequence is a
//! critical section; everything else works on best-effort snapshots whose
//! staleness the commit re-checks correct.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use rand::Rng;

use crate::config::Config;
use crate::domain::{CounterpartyId, CycleOutcome, IneligibleReason, ItemKind, Offer, Transaction, TxId};
use crate::error::Result;
use crate::host::{Host, open_counts};
use crate::scheduler::backpressure::{BackpressureGovernor, ThrottleState, Transition};
use crate::scheduler::builder::build_transaction;
use crate::scheduler::eligibility::check_eligibility;
use crate::scheduler::scoring::{ScoreConfig, ScoredCandidate, score_counterparty};
use crate::store::CounterpartyStore;

/// Upper bound on commit attempts within one cycle.
pub const MAX_CYCLE_ITERATIONS: usize = 20;

/// How many top-ranked candidates to try when the best one turns out to
/// be at its concurrency cap.
pub const CANDIDATE_LOOKAHEAD: usize = 2;

/// The orchestrator. Owns the counterparty state store, the committed-id
/// dedup set, and the backpressure governor; none are ever exposed for
/// direct mutation.
pub struct Scheduler<H: Host> {
    host: Arc<H>,
    config: Config,
    scoring: ScoreConfig,
    store: Mutex<CounterpartyStore>,
    /// Ids of committed-but-not-yet-closed transactions. Its mutex is the
    /// commit critical section.
    committed_ids: Mutex<HashSet<TxId>>,
    governor: Mutex<BackpressureGovernor>,
}

impl<H: Host> Scheduler<H> {
    pub fn new(host: Arc<H>, config: Config) -> Self {
        let governor = BackpressureGovernor::new(config.backpressure.clone());
        Self {
            host,
            config,
            scoring: ScoreConfig::default(),
            store: Mutex::new(CounterpartyStore::new()),
            committed_ids: Mutex::new(HashSet::new()),
            governor: Mutex::new(governor),
        }
    }

    /// Replace the scoring constants.
    pub fn with_scoring(mut self, scoring: ScoreConfig) -> Self {
        self.scoring = scoring;
        self
    }

    /// Current throttle state.
    pub fn throttle_state(&self) -> ThrottleState {
        self.lock_governor().state()
    }

    /// Number of counterparties currently tracked.
    pub fn tracked_counterparties(&self) -> usize {
        self.lock_store().len()
    }

    //=== Entry points ===
    //
    // Each one is a total function: internal failures degrade to a logged
    // no-op and nothing propagates to the host.

    /// A counterparty appeared in the world.
    pub fn on_counterparty_arrived(&self, id: CounterpartyId) {
        tracing::info!(counterparty = id, "counterparty arrived");
        self.lock_store().mark_new(id, Instant::now());
        self.run_cycle();
    }

    /// A counterparty left the world. Its state is flushed; if it returns
    /// it starts fresh.
    pub fn on_counterparty_departed(&self, id: CounterpartyId) {
        tracing::info!(counterparty = id, "counterparty departed");
        self.lock_store().remove(id);
        self.run_cycle();
    }

    /// The host finished fulfilling a transaction.
    pub fn on_transaction_completed(&self, tx: &Transaction) {
        tracing::info!(tx = tx.id, counterparty = tx.counterparty, "transaction completed");
        self.forget_transaction(tx.id);
        if let Some(state) = self.lock_store().get_mut(tx.counterparty) {
            // A slot freed and stock changed; re-check this counterparty
            state.reset_flags();
        }
        self.run_cycle();
    }

    /// The host cancelled a transaction. `forced_by_departure` marks
    /// cancellations caused by the counterparty leaving.
    pub fn on_transaction_cancelled(&self, tx: &Transaction, forced_by_departure: bool) {
        tracing::info!(
            tx = tx.id,
            counterparty = tx.counterparty,
            forced = forced_by_departure,
            "transaction cancelled"
        );
        self.forget_transaction(tx.id);
        let mut store = self.lock_store();
        if forced_by_departure {
            store.remove(tx.counterparty);
        } else if let Some(state) = store.get_mut(tx.counterparty) {
            state.reset_flags();
        }
        drop(store);
        self.run_cycle();
    }

    /// A fresh downstream queue-depth sample arrived.
    pub fn on_backpressure_sample(&self, depth: usize) {
        let transition = self.lock_governor().observe(depth);
        if let Some(transition) = transition {
            self.apply_transition(transition);
        }
        self.run_cycle();
    }

    /// Run one scheduling cycle. Never fails; the worst outcome of any
    /// internal error is that no transaction was created.
    pub fn run_cycle(&self) -> CycleOutcome {
        match self.try_cycle() {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(error = %e, "cycle aborted");
                CycleOutcome::NothingToDo
            }
        }
    }

    //=== Cycle internals ===

    fn try_cycle(&self) -> Result<CycleOutcome> {
        let throttle = self.throttle_state();
        if !throttle.allows_new_transactions() {
            tracing::debug!(state = ?throttle, "throttled, skipping cycle");
            return Ok(CycleOutcome::Throttled(throttle));
        }
        if throttle == ThrottleState::Slowdown && rand::rng().random_bool(0.5) {
            tracing::debug!("slowdown throttle, skipping this cycle");
            return Ok(CycleOutcome::SkippedSlowdown);
        }

        let Some(consumer) = self.host.consumer() else {
            return Ok(CycleOutcome::NothingToDo);
        };
        if self.host.available_budget() <= self.config.limits.min_budget_reserve {
            tracing::debug!(
                available = self.host.available_budget(),
                reserve = self.config.limits.min_budget_reserve,
                "budget at reserve floor"
            );
            return Ok(CycleOutcome::BudgetFloor);
        }

        // Free state for counterparties with nothing to offer and nothing
        // in flight, so they can be re-evaluated if they return
        {
            let open = open_counts(self.host.as_ref());
            self.lock_store().release_inactive(&open);
        }

        let mut committed = 0usize;
        let mut retried_new = false;

        for _ in 0..MAX_CYCLE_ITERATIONS {
            if self.host.available_budget() <= self.config.limits.min_budget_reserve {
                break;
            }

            // Re-derive the candidate ranking; a commit changes needs and
            // open counts, so the best counterparty may differ each pass
            let candidates = self.candidates(consumer);
            if candidates.is_empty() {
                // A new counterparty's warm-up may have elapsed between
                // enumerations; give the pool one more look
                if !retried_new && committed == 0 {
                    retried_new = true;
                    let now = Instant::now();
                    let ready = self.lock_store().new_ready(
                        now,
                        self.config.timing.warmup(),
                        self.config.limits.max_new_retries,
                    );
                    if !ready.is_empty() {
                        tracing::debug!(count = ready.len(), "retrying warmed-up new counterparties");
                        continue;
                    }
                }
                break;
            }

            // Current open counts may be newer than the scored snapshot
            let open = open_counts(self.host.as_ref());
            let chosen = candidates
                .iter()
                .take(CANDIDATE_LOOKAHEAD)
                .find(|c| {
                    open.get(&c.id).copied().unwrap_or(0) < self.config.limits.max_open_per_counterparty
                })
                .copied();
            let Some(chosen) = chosen else {
                tracing::debug!("top candidates all at concurrency cap");
                break;
            };

            if self.attempt_purchase(chosen)? {
                committed += 1;
            } else {
                // Chosen candidate could not produce a transaction; the
                // cycle stops here
                break;
            }
        }

        if committed > 0 {
            Ok(CycleOutcome::Committed(committed))
        } else {
            Ok(CycleOutcome::NothingToDo)
        }
    }

    /// Enumerate, filter, and score counterparties. Sorted best-first,
    /// ties broken by ascending id for determinism.
    fn candidates(&self, consumer: CounterpartyId) -> Vec<ScoredCandidate> {
        let now = Instant::now();
        let open = open_counts(self.host.as_ref());
        let mut out: Vec<ScoredCandidate> = Vec::new();

        for cref in self.host.list_counterparties() {
            if cref.id == consumer {
                continue;
            }
            let open_count = open.get(&cref.id).copied().unwrap_or(0);
            let state = self.lock_store().get_or_insert(cref.id, now).clone();

            if let Err(reason) = check_eligibility(&cref, consumer, &state, open_count, &self.config, now) {
                tracing::trace!(counterparty = cref.id, reason = ?reason, "skipped");
                if reason == IneligibleReason::VisitBudgetExhausted {
                    // Engine-applied consequence of the verdict: let the
                    // release sweep reclaim this counterparty
                    let mut store = self.lock_store();
                    if let Some(s) = store.get_mut(cref.id) {
                        s.no_need = true;
                        s.lifecycle = crate::store::Lifecycle::Exhausted;
                    }
                }
                continue;
            }

            let offers = match self.offers_for(cref.id, now) {
                Ok(offers) => offers,
                Err(e) => {
                    tracing::warn!(counterparty = cref.id, error = %e, "offer listing failed, skipping");
                    continue;
                }
            };

            if let Some(candidate) = score_counterparty(
                cref.id,
                &offers,
                &state,
                open_count,
                self.host.as_ref(),
                &self.config,
                &self.scoring,
            ) {
                out.push(candidate);
            }
        }

        out.sort_by(|a, b| b.score.cmp(&a.score).then(a.id.cmp(&b.id)));
        out
    }

    /// Cached offers for one counterparty, refreshing from the host when
    /// absent or stale. Restricted to the tracked item kinds.
    fn offers_for(&self, id: CounterpartyId, now: Instant) -> Result<HashMap<ItemKind, Offer>> {
        let staleness = self.config.timing.offer_staleness();
        {
            let store = self.lock_store();
            if let Some(state) = store.get(id)
                && let Some(offers) = state.fresh_offers(now, staleness)
            {
                return Ok(offers.clone());
            }
        }

        let offers = self.host.list_offers(id, &self.config.tracked_kinds())?;
        tracing::debug!(counterparty = id, items = offers.len(), "refreshed offers");
        self.lock_store().get_or_insert(id, now).put_offers(offers.clone(), now);
        Ok(offers)
    }

    /// Build and commit one transaction for the chosen candidate.
    /// `Ok(false)` means no transaction was possible; failure bookkeeping
    /// (retry / no-need / cooldown) has been applied.
    fn attempt_purchase(&self, candidate: ScoredCandidate) -> Result<bool> {
        let now = Instant::now();
        let id = candidate.id;

        let offers = self.offers_for(id, now)?;
        if offers.is_empty() {
            self.note_failure(id, now);
            return Ok(false);
        }

        let tx_id = self.host.next_transaction_id();
        let Some(tx) = build_transaction(self.host.as_ref(), &self.config, id, &offers, tx_id)? else {
            self.note_failure(id, now);
            return Ok(false);
        };

        if !self.commit(&tx)? {
            return Ok(false);
        }

        // Post-commit bookkeeping: stock changed, flags clear, lifecycle
        // advances, and the next pass re-scores everyone
        self.lock_store()
            .get_or_insert(id, now)
            .record_commit(now, self.config.limits.max_committed_per_visit);
        tracing::info!(
            tx = tx.id,
            counterparty = id,
            units = tx.total_units(),
            cost = tx.cost,
            score = candidate.score,
            "committed transaction"
        );
        Ok(true)
    }

    /// The commit critical section. State checked outside the lock may
    /// have changed, so the dedup set, the concurrency cap, and the
    /// budget are all re-verified inside it.
    fn commit(&self, tx: &Transaction) -> Result<bool> {
        let mut committed_ids = self.lock_committed();

        if committed_ids.contains(&tx.id) {
            tracing::warn!(tx = tx.id, "transaction id already committed, dropping duplicate");
            self.host.release_all_reservations(tx.id);
            return Ok(false);
        }

        let open = open_counts(self.host.as_ref());
        let open_count = open.get(&tx.counterparty).copied().unwrap_or(0);
        if open_count >= self.config.limits.max_open_per_counterparty {
            tracing::debug!(
                counterparty = tx.counterparty,
                open = open_count,
                "concurrency cap reached between scoring and commit"
            );
            self.host.release_all_reservations(tx.id);
            return Ok(false);
        }

        let available = self.host.available_budget();
        if available < tx.cost || available <= self.config.limits.min_budget_reserve {
            tracing::debug!(cost = tx.cost, available, "budget no longer covers transaction");
            self.host.release_all_reservations(tx.id);
            return Ok(false);
        }

        self.host.reserve_budget(tx.cost).inspect_err(|_| {
            self.host.release_all_reservations(tx.id);
        })?;

        committed_ids.insert(tx.id);
        if let Err(e) = self.host.commit_transaction(tx) {
            committed_ids.remove(&tx.id);
            self.host.release_budget(tx.cost);
            self.host.release_all_reservations(tx.id);
            return Err(e);
        }
        Ok(true)
    }

    /// Failure bookkeeping for a candidate that produced no transaction.
    fn note_failure(&self, id: CounterpartyId, now: Instant) {
        let mut store = self.lock_store();
        let state = store.get_or_insert(id, now);
        state.record_failure(now, self.config.limits.max_new_retries);
        tracing::debug!(
            counterparty = id,
            retries = state.retry_count,
            no_need = state.no_need,
            "nothing to purchase"
        );
    }

    /// Drop a transaction id from the dedup set once the host reports it
    /// closed.
    fn forget_transaction(&self, id: TxId) {
        self.lock_committed().remove(&id);
    }

    /// Side effects of a backpressure state change.
    fn apply_transition(&self, transition: Transition) {
        if transition.entered_critical() {
            let open = self.host.open_transactions();
            tracing::warn!(
                open = open.len(),
                "backpressure critical: cancelling all open transactions"
            );
            for tx in &open {
                self.host.cancel_transaction(tx, false);
            }
            {
                let mut committed_ids = self.lock_committed();
                for tx in &open {
                    committed_ids.remove(&tx.id);
                }
            }
            let released = self.lock_store().release_all();
            tracing::warn!(released, "released all counterparty state");
        } else if transition.entered_pause() {
            let open = open_counts(self.host.as_ref());
            let released = self.lock_store().release_idle(&open);
            tracing::info!(released, "backpressure pause: released idle counterparties");
        } else if transition.resumed() {
            tracing::info!(state = ?transition.to, "backpressure eased, trading resumes");
        }
    }

    //=== Lock helpers ===
    //
    // Poisoning cannot leave the engine unusable: a panicked holder's
    // guard is recovered and the double-checked commit corrects any
    // half-written snapshot state.

    fn lock_store(&self) -> MutexGuard<'_, CounterpartyStore> {
        self.store.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_committed(&self) -> MutexGuard<'_, HashSet<TxId>> {
        self.committed_ids.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_governor(&self) -> MutexGuard<'_, BackpressureGovernor> {
        self.governor.lock().unwrap_or_else(|e| e.into_inner())
    }
}
