//! Greedy transaction construction.
//!
//! Builds the largest-value transaction for one counterparty under, in
//! order: the hard per-transaction unit cap, the consumer's available
//! budget, the optional per-transaction spend cap, and what the host will
//! actually reserve. Reservations are speculative; every failure path
//! releases them before returning.

use std::collections::HashMap;

use crate::config::Config;
use crate::domain::{CounterpartyId, ItemKind, Offer, Transaction, TransactionItem, TxId};
use crate::error::Result;
use crate::host::Host;
use crate::scheduler::scoring::eligible_items;

/// Try to build a transaction against `counterparty` from its current
/// offers. Returns `Ok(None)` when no viable (non-degenerate) transaction
/// exists; all reservations are released in that case. On `Err`, every
/// reservation taken for `tx_id` has been released before returning.
pub fn build_transaction(
    host: &dyn Host,
    config: &Config,
    counterparty: CounterpartyId,
    offers: &HashMap<ItemKind, Offer>,
    tx_id: TxId,
) -> Result<Option<Transaction>> {
    match try_build(host, config, counterparty, offers, tx_id) {
        Ok(Some(tx)) => Ok(Some(tx)),
        Ok(None) => {
            host.release_all_reservations(tx_id);
            Ok(None)
        }
        Err(e) => {
            // Never leave partial reservations outstanding
            host.release_all_reservations(tx_id);
            Err(e)
        }
    }
}

fn try_build(
    host: &dyn Host,
    config: &Config,
    counterparty: CounterpartyId,
    offers: &HashMap<ItemKind, Offer>,
    tx_id: TxId,
) -> Result<Option<Transaction>> {
    let mut remaining_capacity = config.limits.max_units_per_tx;
    let mut total_cost: u64 = 0;
    let mut lines: Vec<TransactionItem> = Vec::new();

    let spend_cap = config.limits.max_spend_per_tx;

    for item in eligible_items(offers, host, config) {
        if remaining_capacity == 0 {
            break;
        }

        let desired = item.need.min(item.avail).min(remaining_capacity);
        if desired == 0 {
            continue;
        }

        // Reserve one unit at a time; the host may grant less than asked.
        let mut reserved = 0u32;
        for _ in 0..desired {
            if !host.reserve_unit(counterparty, item.kind, tx_id)? {
                break;
            }
            reserved += 1;
        }
        if reserved == 0 {
            // Transient rejection: nothing available, skip the item
            tracing::debug!(counterparty, kind = item.kind, "no units reservable, skipping item");
            continue;
        }

        // Price per unit against the remaining offered quantity
        let cost_of = |units: u32| -> Result<u64> {
            let mut cost = 0u64;
            for taken in 0..units {
                cost += host.unit_price(counterparty, item.kind, item.avail - taken, item.tier)?;
            }
            Ok(cost)
        };
        let mut item_cost = cost_of(reserved)?;

        // Shrink until the item fits the remaining budget and spend cap
        let budget = host.available_budget();
        let limit = if spend_cap > 0 { budget.min(spend_cap) } else { budget };
        while reserved > 0 && total_cost + item_cost > limit {
            host.release_reservation(counterparty, item.kind, tx_id);
            reserved -= 1;
            item_cost = cost_of(reserved)?;
        }
        if reserved == 0 {
            // Nothing fits anymore; stop adding further items
            break;
        }

        lines.push(TransactionItem { kind: item.kind, qty: reserved });
        total_cost += item_cost;
        remaining_capacity -= reserved;
    }

    if lines.is_empty() || total_cost == 0 {
        return Ok(None);
    }

    let tx = Transaction {
        id: tx_id,
        counterparty,
        items: lines,
        cost: total_cost,
    };
    tracing::debug!(
        counterparty,
        tx = tx.id,
        units = tx.total_units(),
        cost = tx.cost,
        "built transaction"
    );
    Ok(Some(tx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PriceTier;
    use crate::host::{SimCounterparty, SimHost};

    const CP: CounterpartyId = 2;

    fn config_with_targets(targets: &[(ItemKind, u32)]) -> Config {
        let mut config = Config::default();
        config.limits.max_spend_per_tx = 0; // unlimited unless a test opts in
        for &(kind, target) in targets {
            config.targets.insert(kind, target);
        }
        config
    }

    fn host_with(offers: &[(ItemKind, u32, PriceTier)]) -> SimHost {
        let host = SimHost::new();
        host.set_consumer(1);
        host.set_budget(1_000_000);
        let mut cp = SimCounterparty::new();
        for &(kind, qty, tier) in offers {
            cp = cp.with_offer(kind, qty, tier);
        }
        host.insert_counterparty(CP, cp);
        host
    }

    fn offers_of(host: &SimHost, kinds: &[ItemKind]) -> HashMap<ItemKind, Offer> {
        host.list_offers(CP, kinds).unwrap()
    }

    #[test]
    fn test_respects_unit_cap() {
        let host = host_with(&[(1, 50, PriceTier::Normal)]);
        let config = config_with_targets(&[(1, 100)]);

        let tx = build_transaction(&host, &config, CP, &offers_of(&host, &[1]), 10)
            .unwrap()
            .unwrap();

        assert_eq!(tx.total_units(), 10);
        assert_eq!(host.outstanding_reservations(), 10);
    }

    #[test]
    fn test_respects_need() {
        let host = host_with(&[(1, 50, PriceTier::Normal)]);
        host.set_on_hand(1, 97);
        let config = config_with_targets(&[(1, 100)]);

        // Stock 97% >= normal threshold 70 -> excluded entirely
        let tx = build_transaction(&host, &config, CP, &offers_of(&host, &[1]), 10).unwrap();
        assert!(tx.is_none());
        assert_eq!(host.outstanding_reservations(), 0);
    }

    #[test]
    fn test_respects_offered_quantity() {
        let host = host_with(&[(1, 3, PriceTier::Normal)]);
        let config = config_with_targets(&[(1, 100)]);

        let tx = build_transaction(&host, &config, CP, &offers_of(&host, &[1]), 10)
            .unwrap()
            .unwrap();
        assert_eq!(tx.total_units(), 3);
    }

    #[test]
    fn test_budget_shrinks_second_item() {
        // Two items at 100/unit, 3 units each (300 + 300), budget 500:
        // first taken whole, second shrunk to 2 units.
        let host = host_with(&[(1, 3, PriceTier::Normal), (2, 3, PriceTier::Normal)]);
        host.set_budget(500);
        host.set_base_price(1, 100);
        host.set_base_price(2, 100);
        let config = config_with_targets(&[(1, 100), (2, 100)]);

        let tx = build_transaction(&host, &config, CP, &offers_of(&host, &[1, 2]), 10)
            .unwrap()
            .unwrap();

        assert_eq!(tx.units_of(1), 3);
        assert_eq!(tx.units_of(2), 2);
        assert_eq!(tx.cost, 500);
        // Shrinking released exactly one unit
        assert_eq!(host.release_count(), 1);
        assert_eq!(host.outstanding_reservations(), 5);
    }

    #[test]
    fn test_spend_cap_stops_adding() {
        let host = host_with(&[(1, 3, PriceTier::Normal), (2, 3, PriceTier::Normal)]);
        host.set_base_price(1, 100);
        host.set_base_price(2, 100);
        let mut config = config_with_targets(&[(1, 100), (2, 100)]);
        config.limits.max_spend_per_tx = 300;

        let tx = build_transaction(&host, &config, CP, &offers_of(&host, &[1, 2]), 10)
            .unwrap()
            .unwrap();

        // First item fills the cap exactly; second shrinks to zero and
        // building stops there
        assert_eq!(tx.units_of(1), 3);
        assert_eq!(tx.units_of(2), 0);
        assert_eq!(tx.cost, 300);
    }

    #[test]
    fn test_cheapest_tier_bought_first() {
        let host = host_with(&[(1, 10, PriceTier::Markup), (2, 10, PriceTier::Discounted)]);
        let config = config_with_targets(&[(1, 100), (2, 100)]);

        let tx = build_transaction(&host, &config, CP, &offers_of(&host, &[1, 2]), 10)
            .unwrap()
            .unwrap();

        // Capacity 10 all goes to the discounted item
        assert_eq!(tx.units_of(2), 10);
        assert_eq!(tx.units_of(1), 0);
    }

    #[test]
    fn test_partial_reservation_accepted() {
        let host = host_with(&[(1, 5, PriceTier::Normal)]);
        let config = config_with_targets(&[(1, 100)]);
        // Another transaction already holds 3 of the 5 units
        for _ in 0..3 {
            assert!(host.reserve_unit(CP, 1, 999).unwrap());
        }

        let tx = build_transaction(&host, &config, CP, &offers_of(&host, &[1]), 10)
            .unwrap()
            .unwrap();
        assert_eq!(tx.units_of(1), 2);
    }

    #[test]
    fn test_fully_reserved_item_skipped() {
        let host = host_with(&[(1, 2, PriceTier::Normal), (2, 4, PriceTier::Normal)]);
        let config = config_with_targets(&[(1, 100), (2, 100)]);
        for _ in 0..2 {
            assert!(host.reserve_unit(CP, 1, 999).unwrap());
        }

        let tx = build_transaction(&host, &config, CP, &offers_of(&host, &[1, 2]), 10)
            .unwrap()
            .unwrap();
        assert_eq!(tx.units_of(1), 0);
        assert_eq!(tx.units_of(2), 4);
    }

    #[test]
    fn test_no_viable_transaction_returns_none() {
        let host = host_with(&[]);
        let config = config_with_targets(&[(1, 100)]);

        let tx = build_transaction(&host, &config, CP, &HashMap::new(), 10).unwrap();
        assert!(tx.is_none());
        assert_eq!(host.outstanding_reservations(), 0);
    }

    #[test]
    fn test_zero_budget_releases_everything() {
        let host = host_with(&[(1, 5, PriceTier::Normal)]);
        host.set_budget(0);
        let config = config_with_targets(&[(1, 100)]);

        let tx = build_transaction(&host, &config, CP, &offers_of(&host, &[1]), 10).unwrap();

        assert!(tx.is_none());
        assert_eq!(host.outstanding_reservations(), 0);
        assert_eq!(host.release_count(), host.reserve_grants());
    }

    #[test]
    fn test_host_error_rolls_back_all_reservations() {
        let host = host_with(&[(1, 5, PriceTier::Discounted), (2, 5, PriceTier::Normal)]);
        host.fail_pricing_for(2);
        let config = config_with_targets(&[(1, 100), (2, 100)]);

        let result = build_transaction(&host, &config, CP, &offers_of(&host, &[1, 2]), 10);

        assert!(result.is_err());
        // Every reservation taken before the failure was released
        assert_eq!(host.outstanding_reservations(), 0);
        assert_eq!(host.release_count(), host.reserve_grants());
    }
}
