//! Host collaborator interface.
//!
//! The scheduler never touches the world directly. Everything it needs
//! (counterparty enumeration, inventory levels, offer listings, per-unit
//! reservations, pricing, budget, transaction registration, and the
//! downstream queue-depth signal) goes through this trait. The crate
//! ships [`SimHost`], an in-memory implementation used by the binary's
//! simulation mode and the integration tests.

mod sim;

use std::collections::HashMap;

use crate::domain::{CounterpartyId, CounterpartyRef, ItemKind, Offer, PriceTier, Transaction, TxId};
use crate::error::Result;

pub use sim::{SimCounterparty, SimHost};

/// Everything the scheduler consumes from its host.
///
/// `Ok(false)` from [`reserve_unit`](Host::reserve_unit) is a transient
/// rejection and handled locally; an `Err` from any method is the
/// "unexpected host failure" class and aborts the in-progress attempt
/// after rollback. Release calls are best-effort and infallible.
pub trait Host: Send + Sync {
    /// Counterparties currently present in the world.
    fn list_counterparties(&self) -> Vec<CounterpartyRef>;

    /// The consumer this scheduler restocks, if present.
    fn consumer(&self) -> Option<CounterpartyId>;

    /// Units of `kind` the consumer holds right now.
    fn on_hand(&self, kind: ItemKind) -> u32;

    /// Units of `kind` already committed toward the consumer in open
    /// transactions.
    fn in_flight(&self, kind: ItemKind) -> u32;

    /// Current offers from one counterparty, restricted to the given item
    /// kinds. An empty map means nothing is for sale.
    fn list_offers(
        &self,
        counterparty: CounterpartyId,
        kinds: &[ItemKind],
    ) -> Result<HashMap<ItemKind, Offer>>;

    /// Reserve a single unit on the counterparty for transaction `tx`.
    /// Returns `Ok(false)` when the unit cannot be reserved.
    fn reserve_unit(&self, counterparty: CounterpartyId, kind: ItemKind, tx: TxId) -> Result<bool>;

    /// Release one previously reserved unit.
    fn release_reservation(&self, counterparty: CounterpartyId, kind: ItemKind, tx: TxId);

    /// Release every reservation held for transaction `tx`.
    fn release_all_reservations(&self, tx: TxId);

    /// Price of the next unit of `kind` given how many units remain
    /// offered. May depend on the remaining quantity.
    fn unit_price(
        &self,
        counterparty: CounterpartyId,
        kind: ItemKind,
        remaining_qty: u32,
        tier: PriceTier,
    ) -> Result<u64>;

    /// Credits currently available (not reserved) to the consumer.
    fn available_budget(&self) -> u64;

    /// Reserve credits from the consumer's budget.
    fn reserve_budget(&self, amount: u64) -> Result<()>;

    /// Return previously reserved credits. Best-effort; used to unwind a
    /// budget reservation when registration fails after it.
    fn release_budget(&self, amount: u64);

    /// Register a committed transaction with the host.
    fn commit_transaction(&self, tx: &Transaction) -> Result<()>;

    /// Cancel an open transaction. `forced` marks cancellations caused by
    /// counterparty departure.
    fn cancel_transaction(&self, tx: &Transaction, forced: bool);

    /// A fresh, globally unique transaction id.
    fn next_transaction_id(&self) -> TxId;

    /// The live set of open transactions toward the consumer.
    fn open_transactions(&self) -> Vec<Transaction>;

    /// Depth of the downstream fulfillment queue.
    fn downstream_queue_depth(&self) -> usize;
}

/// Count open transactions per counterparty from the host's live set.
pub fn open_counts(host: &dyn Host) -> HashMap<CounterpartyId, usize> {
    let mut counts: HashMap<CounterpartyId, usize> = HashMap::new();
    for tx in host.open_transactions() {
        *counts.entry(tx.counterparty).or_insert(0) += 1;
    }
    counts
}
