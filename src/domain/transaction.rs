//! Purchase transaction records.

use serde::{Deserialize, Serialize};

use crate::domain::types::{CounterpartyId, ItemKind, TxId};

/// One line of a transaction: an item kind and how many units of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionItem {
    pub kind: ItemKind,
    pub qty: u32,
}

/// A purchase transaction against one counterparty.
///
/// Built speculatively (reservations held), then either committed to the
/// host or torn down. Immutable once committed; the host reports its end
/// of life back through `on_transaction_completed` / `on_transaction_cancelled`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Globally unique id, issued by the host before building starts.
    pub id: TxId,
    /// The counterparty the items are bought from.
    pub counterparty: CounterpartyId,
    /// Items flowing to the consumer.
    pub items: Vec<TransactionItem>,
    /// Total cost in credits, reserved from the consumer's budget at commit.
    pub cost: u64,
}

impl Transaction {
    /// Total units across all item lines.
    pub fn total_units(&self) -> u32 {
        self.items.iter().map(|i| i.qty).sum()
    }

    /// Units of one item kind in this transaction.
    pub fn units_of(&self, kind: ItemKind) -> u32 {
        self.items
            .iter()
            .filter(|i| i.kind == kind)
            .map(|i| i.qty)
            .sum()
    }
}
