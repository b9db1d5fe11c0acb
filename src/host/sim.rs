//! In-memory host implementation for simulation and tests.
//!
//! `SimHost` models just enough of a real host to drive the scheduler end
//! to end: counterparty stock tables, a consumer inventory, a credit
//! budget, per-transaction reservation ledgers, and a settable downstream
//! queue depth. Reservation and release calls are counted so tests can
//! assert rollback completeness.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::domain::{CounterpartyId, CounterpartyRef, ItemKind, Offer, PriceTier, Transaction, TxId};
use crate::error::{Result, StockrError};
use crate::host::Host;

/// One simulated counterparty: whether the host allows trade with it and
/// what it currently has for sale.
#[derive(Debug, Clone, Default)]
pub struct SimCounterparty {
    pub tradeable: bool,
    pub offers: HashMap<ItemKind, Offer>,
}

impl SimCounterparty {
    pub fn new() -> Self {
        Self { tradeable: true, offers: HashMap::new() }
    }

    /// Add an offer line.
    pub fn with_offer(mut self, kind: ItemKind, qty: u32, tier: PriceTier) -> Self {
        self.offers.insert(kind, Offer { qty, tier });
        self
    }

    pub fn untradeable(mut self) -> Self {
        self.tradeable = false;
        self
    }
}

#[derive(Debug, Default)]
struct SimState {
    counterparties: HashMap<CounterpartyId, SimCounterparty>,
    consumer: Option<CounterpartyId>,
    inventory: HashMap<ItemKind, u32>,
    budget: u64,
    reserved_budget: u64,
    base_prices: HashMap<ItemKind, u64>,
    /// Units held per transaction: (counterparty, kind) per reserved unit.
    reservations: HashMap<TxId, Vec<(CounterpartyId, ItemKind)>>,
    open: Vec<Transaction>,
    committed: Vec<Transaction>,
    cancelled: Vec<(TxId, bool)>,
    queue_depth: usize,
    reserve_grants: u64,
    release_count: u64,
    fail_pricing: Vec<ItemKind>,
    fail_commit: bool,
}

/// In-memory [`Host`] for the simulation binary and integration tests.
#[derive(Debug, Default)]
pub struct SimHost {
    state: Mutex<SimState>,
    next_tx_id: AtomicU64,
}

impl SimHost {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState::default()),
            next_tx_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_consumer(&self, id: CounterpartyId) {
        self.lock().consumer = Some(id);
    }

    pub fn set_budget(&self, credits: u64) {
        self.lock().budget = credits;
    }

    /// Base per-unit price for an item kind; tier multipliers apply on top.
    pub fn set_base_price(&self, kind: ItemKind, price: u64) {
        self.lock().base_prices.insert(kind, price);
    }

    pub fn set_on_hand(&self, kind: ItemKind, qty: u32) {
        self.lock().inventory.insert(kind, qty);
    }

    pub fn set_queue_depth(&self, depth: usize) {
        self.lock().queue_depth = depth;
    }

    pub fn insert_counterparty(&self, id: CounterpartyId, counterparty: SimCounterparty) {
        self.lock().counterparties.insert(id, counterparty);
    }

    pub fn remove_counterparty(&self, id: CounterpartyId) {
        self.lock().counterparties.remove(&id);
    }

    /// Make `unit_price` fail for one item kind.
    pub fn fail_pricing_for(&self, kind: ItemKind) {
        self.lock().fail_pricing.push(kind);
    }

    /// Make the next `commit_transaction` call fail.
    pub fn fail_next_commit(&self) {
        self.lock().fail_commit = true;
    }

    /// Reserved units not yet turned into a transaction or released.
    pub fn outstanding_reservations(&self) -> usize {
        self.lock().reservations.values().map(Vec::len).sum()
    }

    /// Units granted by `reserve_unit` so far.
    pub fn reserve_grants(&self) -> u64 {
        self.lock().reserve_grants
    }

    /// Units released so far (single releases plus release-all sweeps).
    pub fn release_count(&self) -> u64 {
        self.lock().release_count
    }

    pub fn committed(&self) -> Vec<Transaction> {
        self.lock().committed.clone()
    }

    pub fn cancelled(&self) -> Vec<(TxId, bool)> {
        self.lock().cancelled.clone()
    }

    pub fn open_count(&self) -> usize {
        self.lock().open.len()
    }

    /// Simulate fulfillment: close an open transaction and move its items
    /// into the consumer's inventory. Returns the closed transaction.
    pub fn complete(&self, id: TxId) -> Option<Transaction> {
        let mut state = self.lock();
        let idx = state.open.iter().position(|t| t.id == id)?;
        let tx = state.open.remove(idx);
        for item in &tx.items {
            *state.inventory.entry(item.kind).or_insert(0) += item.qty;
        }
        Some(tx)
    }

    fn reserved_against(state: &SimState, counterparty: CounterpartyId, kind: ItemKind) -> u32 {
        state
            .reservations
            .values()
            .flatten()
            .filter(|(c, k)| *c == counterparty && *k == kind)
            .count() as u32
    }
}

impl Host for SimHost {
    fn list_counterparties(&self) -> Vec<CounterpartyRef> {
        let state = self.lock();
        let mut refs: Vec<CounterpartyRef> = state
            .counterparties
            .iter()
            .map(|(id, c)| CounterpartyRef { id: *id, tradeable: c.tradeable })
            .collect();
        refs.sort_unstable_by_key(|r| r.id);
        refs
    }

    fn consumer(&self) -> Option<CounterpartyId> {
        self.lock().consumer
    }

    fn on_hand(&self, kind: ItemKind) -> u32 {
        self.lock().inventory.get(&kind).copied().unwrap_or(0)
    }

    fn in_flight(&self, kind: ItemKind) -> u32 {
        self.lock().open.iter().map(|tx| tx.units_of(kind)).sum()
    }

    fn list_offers(
        &self,
        counterparty: CounterpartyId,
        kinds: &[ItemKind],
    ) -> Result<HashMap<ItemKind, Offer>> {
        let state = self.lock();
        let Some(cp) = state.counterparties.get(&counterparty) else {
            return Ok(HashMap::new());
        };
        Ok(cp
            .offers
            .iter()
            .filter(|(kind, offer)| kinds.contains(kind) && offer.qty > 0)
            .map(|(kind, offer)| (*kind, *offer))
            .collect())
    }

    fn reserve_unit(&self, counterparty: CounterpartyId, kind: ItemKind, tx: TxId) -> Result<bool> {
        let mut state = self.lock();
        let offered = state
            .counterparties
            .get(&counterparty)
            .and_then(|c| c.offers.get(&kind))
            .map(|o| o.qty)
            .unwrap_or(0);
        let held = Self::reserved_against(&state, counterparty, kind);
        if held >= offered {
            return Ok(false);
        }
        state.reservations.entry(tx).or_default().push((counterparty, kind));
        state.reserve_grants += 1;
        Ok(true)
    }

    fn release_reservation(&self, counterparty: CounterpartyId, kind: ItemKind, tx: TxId) {
        let mut state = self.lock();
        if let Some(held) = state.reservations.get_mut(&tx)
            && let Some(idx) = held.iter().position(|(c, k)| *c == counterparty && *k == kind)
        {
            held.remove(idx);
            state.release_count += 1;
        }
    }

    fn release_all_reservations(&self, tx: TxId) {
        let mut state = self.lock();
        if let Some(held) = state.reservations.remove(&tx) {
            state.release_count += held.len() as u64;
        }
    }

    fn unit_price(
        &self,
        _counterparty: CounterpartyId,
        kind: ItemKind,
        _remaining_qty: u32,
        tier: PriceTier,
    ) -> Result<u64> {
        let state = self.lock();
        if state.fail_pricing.contains(&kind) {
            return Err(StockrError::Host(format!("pricing unavailable for item {kind}")));
        }
        let base = state.base_prices.get(&kind).copied().unwrap_or(10);
        let percent = match tier {
            PriceTier::Discounted => 50,
            PriceTier::Normal => 100,
            PriceTier::Markup => 150,
            PriceTier::Premium => 250,
        };
        Ok(base * percent / 100)
    }

    fn available_budget(&self) -> u64 {
        let state = self.lock();
        state.budget.saturating_sub(state.reserved_budget)
    }

    fn reserve_budget(&self, amount: u64) -> Result<()> {
        let mut state = self.lock();
        if amount > state.budget.saturating_sub(state.reserved_budget) {
            return Err(StockrError::Host(format!("cannot reserve {amount} credits")));
        }
        state.reserved_budget += amount;
        Ok(())
    }

    fn release_budget(&self, amount: u64) {
        let mut state = self.lock();
        state.reserved_budget = state.reserved_budget.saturating_sub(amount);
    }

    fn commit_transaction(&self, tx: &Transaction) -> Result<()> {
        let mut state = self.lock();
        if state.fail_commit {
            state.fail_commit = false;
            return Err(StockrError::Host("commit rejected".to_string()));
        }
        // The reserved units become the trade: consume them from stock.
        state.reservations.remove(&tx.id);
        for item in &tx.items {
            if let Some(cp) = state.counterparties.get_mut(&tx.counterparty)
                && let Some(offer) = cp.offers.get_mut(&item.kind)
            {
                offer.qty = offer.qty.saturating_sub(item.qty);
            }
        }
        state.open.push(tx.clone());
        state.committed.push(tx.clone());
        Ok(())
    }

    fn cancel_transaction(&self, tx: &Transaction, forced: bool) {
        let mut state = self.lock();
        state.open.retain(|t| t.id != tx.id);
        state.reserved_budget = state.reserved_budget.saturating_sub(tx.cost);
        state.cancelled.push((tx.id, forced));
    }

    fn next_transaction_id(&self) -> TxId {
        self.next_tx_id.fetch_add(1, Ordering::Relaxed)
    }

    fn open_transactions(&self) -> Vec<Transaction> {
        self.lock().open.clone()
    }

    fn downstream_queue_depth(&self) -> usize {
        self.lock().queue_depth
    }
}
