//! Core identifiers, price tiers, and offer types.

use serde::{Deserialize, Serialize};

/// Stable integer id of a counterparty, valid only while it is present in
/// the world.
pub type CounterpartyId = u64;

/// Identifier for a kind of tradeable item.
pub type ItemKind = u32;

/// Transaction identifier, issued by the host. Never reused while the
/// transaction is open.
pub type TxId = u64;

/// Price class attached to an offered item, cheapest first.
///
/// The derived `Ord` follows declaration order (`Discounted < Normal <
/// Markup < Premium`), so sorting offers by tier yields cheapest-first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceTier {
    Discounted,
    Normal,
    Markup,
    Premium,
}

impl PriceTier {
    /// Scoring weight for this tier. Strictly decreases as the tier gets
    /// more expensive.
    pub fn weight(&self) -> i64 {
        match self {
            PriceTier::Discounted => 4,
            PriceTier::Normal => 3,
            PriceTier::Markup => 2,
            PriceTier::Premium => 1,
        }
    }

    /// True for the cheapest tier.
    pub fn is_cheapest(&self) -> bool {
        matches!(self, PriceTier::Discounted)
    }
}

/// One sellable item as advertised by a counterparty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
    /// Units currently offered for sale.
    pub qty: u32,
    /// Price tier the units are offered at.
    pub tier: PriceTier,
}

/// Handle to a counterparty as enumerated by the host.
///
/// `tradeable = false` collapses every host-side condition that forbids
/// trading entirely (hostile, defunct, already traded out this visit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterpartyRef {
    pub id: CounterpartyId,
    pub tradeable: bool,
}

impl CounterpartyRef {
    /// A tradeable counterparty handle.
    pub fn new(id: CounterpartyId) -> Self {
        Self { id, tradeable: true }
    }
}
