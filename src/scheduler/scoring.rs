//! Priority scoring for eligible counterparties.
//!
//! Counterparties are ranked by:
//! - Cheapest-tier bonus (+100 per discounted item we need)
//! - Tier-weighted unmet need (weight 4/3/2/1, cheapest to priciest)
//! - Open-transaction penalty (-20 per concurrently open transaction)
//!
//! A `New` counterparty with no eligible items but retries left gets a
//! deliberately low sentinel score so it stays in the candidate pool
//! instead of being dropped.

use std::collections::HashMap;

use crate::config::Config;
use crate::domain::{CounterpartyId, ItemKind, Offer, PriceTier};
use crate::host::Host;
use crate::store::CounterpartyState;

/// Bonus per needed item offered at the cheapest tier.
pub const CHEAPEST_TIER_BONUS: i64 = 100;
/// Divisor applied to the accumulated tier-weighted need.
pub const NEED_DIVISOR: i64 = 10;
/// Penalty per concurrently open transaction with the counterparty.
pub const OPEN_TX_PENALTY: i64 = 20;
/// Sentinel score for offerless `New` counterparties kept for retry.
/// Low enough to rank after anything with actual offers.
pub const RETRY_SCORE: i64 = -1000;

/// Scoring constants (for customization). Each constant must keep its
/// stated direction: bonuses positive, penalty positive (subtracted).
#[derive(Debug, Clone)]
pub struct ScoreConfig {
    pub cheapest_tier_bonus: i64,
    pub need_divisor: i64,
    pub open_tx_penalty: i64,
    pub retry_score: i64,
}

impl Default for ScoreConfig {
    fn default() -> Self {
        Self {
            cheapest_tier_bonus: CHEAPEST_TIER_BONUS,
            need_divisor: NEED_DIVISOR,
            open_tx_penalty: OPEN_TX_PENALTY,
            retry_score: RETRY_SCORE,
        }
    }
}

/// A counterparty that survived eligibility and scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoredCandidate {
    pub id: CounterpartyId,
    pub score: i64,
    pub cheapest_tier_items: u32,
    pub weighted_need: i64,
    pub open_count: usize,
}

/// One purchasable item line after need and threshold checks.
#[derive(Debug, Clone, Copy)]
pub struct ItemNeed {
    pub kind: ItemKind,
    pub tier: PriceTier,
    /// Unmet need: `target - on_hand - in_flight`, floored at zero.
    pub need: u32,
    /// Units the counterparty offers.
    pub avail: u32,
}

/// Unmet need for one item kind.
pub fn need_of(host: &dyn Host, kind: ItemKind, target: u32) -> u32 {
    let have = host.on_hand(kind) + host.in_flight(kind);
    target.saturating_sub(have)
}

/// Current stock as a percentage of the target level.
pub fn stock_percent(host: &dyn Host, kind: ItemKind, target: u32) -> f64 {
    if target == 0 {
        return 0.0;
    }
    let have = host.on_hand(kind) + host.in_flight(kind);
    (have as f64 / target as f64) * 100.0
}

/// Filter a counterparty's offers down to the items actually worth
/// buying: tracked, needed, under the tier's admission threshold, and in
/// stock. Sorted by tier ascending (cheapest first), stable by item kind
/// within a tier.
pub fn eligible_items(
    offers: &HashMap<ItemKind, Offer>,
    host: &dyn Host,
    config: &Config,
) -> Vec<ItemNeed> {
    let mut items = Vec::new();
    for kind in config.tracked_kinds() {
        let Some(target) = config.target(kind) else { continue };
        let Some(offer) = offers.get(&kind) else { continue };

        let need = need_of(host, kind, target);
        if need == 0 {
            continue;
        }
        let threshold = config.thresholds.for_tier(offer.tier);
        if stock_percent(host, kind, target) >= threshold as f64 {
            continue;
        }
        if offer.qty == 0 {
            continue;
        }
        items.push(ItemNeed { kind, tier: offer.tier, need, avail: offer.qty });
    }
    items.sort_by_key(|item| item.tier);
    items
}

/// Score one counterparty from its cached offers and the consumer's unmet
/// needs. Returns `None` when there is nothing to buy and no retry grace
/// applies; the counterparty drops out of the candidate pool.
pub fn score_counterparty(
    id: CounterpartyId,
    offers: &HashMap<ItemKind, Offer>,
    state: &CounterpartyState,
    open_count: usize,
    host: &dyn Host,
    config: &Config,
    scoring: &ScoreConfig,
) -> Option<ScoredCandidate> {
    let items = eligible_items(offers, host, config);

    if items.is_empty() {
        // Offerless new arrivals stay in the pool for retry
        if state.lifecycle.is_new() && state.retry_count < config.limits.max_new_retries {
            return Some(ScoredCandidate {
                id,
                score: scoring.retry_score,
                cheapest_tier_items: 0,
                weighted_need: 0,
                open_count,
            });
        }
        return None;
    }

    let mut cheapest_tier_items = 0u32;
    let mut weighted_need = 0i64;
    for item in &items {
        if item.tier.is_cheapest() {
            cheapest_tier_items += 1;
        }
        weighted_need += item.tier.weight() * i64::from(item.need.min(item.avail));
    }

    let score = scoring.cheapest_tier_bonus * i64::from(cheapest_tier_items)
        + weighted_need / scoring.need_divisor
        - scoring.open_tx_penalty * open_count as i64;

    Some(ScoredCandidate {
        id,
        score,
        cheapest_tier_items,
        weighted_need,
        open_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::SimHost;
    use crate::store::Lifecycle;
    use std::time::Instant;

    fn config_with_targets(targets: &[(ItemKind, u32)]) -> Config {
        let mut config = Config::default();
        for &(kind, target) in targets {
            config.targets.insert(kind, target);
        }
        config
    }

    fn offers(entries: &[(ItemKind, u32, PriceTier)]) -> HashMap<ItemKind, Offer> {
        entries
            .iter()
            .map(|&(kind, qty, tier)| (kind, Offer { qty, tier }))
            .collect()
    }

    fn active_state() -> CounterpartyState {
        let mut s = CounterpartyState::new(Instant::now());
        s.lifecycle = Lifecycle::Active;
        s
    }

    #[test]
    fn test_need_never_negative() {
        let host = SimHost::new();
        host.set_on_hand(1, 150);
        assert_eq!(need_of(&host, 1, 100), 0);
    }

    #[test]
    fn test_need_decreases_with_stock() {
        let host = SimHost::new();
        let mut last = need_of(&host, 1, 100);
        for on_hand in 1..=100 {
            host.set_on_hand(1, on_hand);
            let need = need_of(&host, 1, 100);
            assert!(need < last, "need must strictly decrease while under target");
            last = need;
        }
        assert_eq!(last, 0);
    }

    #[test]
    fn test_threshold_excludes_high_stock() {
        // target=100, on_hand=90, Normal threshold 70 -> stock 90% >= 70 -> excluded
        let host = SimHost::new();
        host.set_on_hand(1, 90);
        let config = config_with_targets(&[(1, 100)]);
        let items = eligible_items(&offers(&[(1, 10, PriceTier::Normal)]), &host, &config);
        assert!(items.is_empty());
    }

    #[test]
    fn test_premium_included_below_threshold() {
        // target=100, on_hand=10, Premium threshold 20 -> stock 10% < 20 -> included
        let host = SimHost::new();
        host.set_on_hand(1, 10);
        let config = config_with_targets(&[(1, 100)]);
        let items = eligible_items(&offers(&[(1, 10, PriceTier::Premium)]), &host, &config);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].need, 90);
    }

    #[test]
    fn test_in_flight_counts_toward_stock() {
        let host = SimHost::new();
        host.set_consumer(9);
        host.set_on_hand(1, 30);
        host.insert_counterparty(2, crate::host::SimCounterparty::new().with_offer(1, 50, PriceTier::Normal));
        // Open transaction carrying 45 units -> stock 75% >= 70
        let tx = crate::domain::Transaction {
            id: 1,
            counterparty: 2,
            items: vec![crate::domain::TransactionItem { kind: 1, qty: 45 }],
            cost: 450,
        };
        host.commit_transaction(&tx).unwrap();

        let config = config_with_targets(&[(1, 100)]);
        let items = eligible_items(&offers(&[(1, 10, PriceTier::Normal)]), &host, &config);
        assert!(items.is_empty());
    }

    #[test]
    fn test_items_sorted_cheapest_first() {
        let host = SimHost::new();
        let config = config_with_targets(&[(1, 100), (2, 100), (3, 100)]);
        let items = eligible_items(
            &offers(&[
                (1, 5, PriceTier::Markup),
                (2, 5, PriceTier::Discounted),
                (3, 5, PriceTier::Normal),
            ]),
            &host,
            &config,
        );
        let tiers: Vec<PriceTier> = items.iter().map(|i| i.tier).collect();
        assert_eq!(
            tiers,
            vec![PriceTier::Discounted, PriceTier::Normal, PriceTier::Markup]
        );
    }

    #[test]
    fn test_score_formula() {
        let host = SimHost::new();
        let config = config_with_targets(&[(1, 100), (2, 100)]);
        // Item 1: discounted, need 100, avail 10 -> weight 4 * 10 = 40
        // Item 2: normal, need 100, avail 20 -> weight 3 * 20 = 60
        let candidate = score_counterparty(
            5,
            &offers(&[(1, 10, PriceTier::Discounted), (2, 20, PriceTier::Normal)]),
            &active_state(),
            1,
            &host,
            &config,
            &ScoreConfig::default(),
        )
        .unwrap();

        assert_eq!(candidate.cheapest_tier_items, 1);
        assert_eq!(candidate.weighted_need, 100);
        // 100*1 + 100/10 - 20*1 = 90
        assert_eq!(candidate.score, 90);
    }

    #[test]
    fn test_score_penalizes_open_transactions() {
        let host = SimHost::new();
        let config = config_with_targets(&[(1, 100)]);
        let offer_map = offers(&[(1, 10, PriceTier::Discounted)]);
        let scoring = ScoreConfig::default();

        let idle = score_counterparty(5, &offer_map, &active_state(), 0, &host, &config, &scoring).unwrap();
        let busy = score_counterparty(5, &offer_map, &active_state(), 3, &host, &config, &scoring).unwrap();
        assert!(idle.score > busy.score);
        assert_eq!(idle.score - busy.score, 60);
    }

    #[test]
    fn test_offerless_active_drops_out() {
        let host = SimHost::new();
        let config = config_with_targets(&[(1, 100)]);
        let candidate = score_counterparty(
            5,
            &HashMap::new(),
            &active_state(),
            0,
            &host,
            &config,
            &ScoreConfig::default(),
        );
        assert!(candidate.is_none());
    }

    #[test]
    fn test_offerless_new_gets_retry_score() {
        let host = SimHost::new();
        let config = config_with_targets(&[(1, 100)]);
        let state = CounterpartyState::new(Instant::now());
        let candidate = score_counterparty(
            5,
            &HashMap::new(),
            &state,
            0,
            &host,
            &config,
            &ScoreConfig::default(),
        )
        .unwrap();
        assert_eq!(candidate.score, RETRY_SCORE);
    }

    #[test]
    fn test_offerless_new_out_of_retries_drops_out() {
        let host = SimHost::new();
        let config = config_with_targets(&[(1, 100)]);
        let mut state = CounterpartyState::new(Instant::now());
        state.retry_count = 3;
        let candidate = score_counterparty(
            5,
            &HashMap::new(),
            &state,
            0,
            &host,
            &config,
            &ScoreConfig::default(),
        );
        assert!(candidate.is_none());
    }

    #[test]
    fn test_retry_score_ranks_below_real_offers() {
        let host = SimHost::new();
        let config = config_with_targets(&[(1, 100)]);
        let scoring = ScoreConfig::default();

        let real = score_counterparty(
            5,
            &offers(&[(1, 1, PriceTier::Premium)]),
            &active_state(),
            3,
            &host,
            &config,
            &scoring,
        )
        .unwrap();
        let retry = score_counterparty(
            6,
            &HashMap::new(),
            &CounterpartyState::new(Instant::now()),
            0,
            &host,
            &config,
            &scoring,
        )
        .unwrap();
        // Even a penalized single-premium-unit candidate beats the retry sentinel
        assert!(real.score > retry.score);
    }
}
