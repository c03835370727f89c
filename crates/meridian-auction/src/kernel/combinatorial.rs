//! Single-round combinatorial winner determination.
//!
//! Each bid names a bundle of items as a bitmask under the `bundle` metadata
//! key. Winner determination maximizes the total bid value subject to every
//! item being sold at most once. The solver is a depth-first branch and
//! bound over bids sorted by amount, pruning branches whose optimistic
//! remainder cannot beat the incumbent; [`exhaustive_winner_determination`]
//! walks every subset and exists to cross-check the solver on small inputs.

use meridian_core::{
    mechanism::Combinatorial,
    primitive::BidderId,
    Bid,
    Value,
};
use rust_decimal::Decimal;

use super::{
    filter_valid_bids,
    Allocations,
    Payments,
};

/// Metadata key under which a bid carries its bundle bitmask.
pub const BUNDLE_KEY: &str = "bundle";

/// Extracts the bundle bitmask of a bid, if it carries a valid one.
fn bundle_mask(bid: &Bid, num_items: u32) -> Option<u64> {
    let Some(Value::Int(raw)) = bid.metadata().get(BUNDLE_KEY) else {
        return None;
    };
    let mask = u64::try_from(*raw).ok()?;
    let universe = if num_items == 64 {
        u64::MAX
    } else {
        (1_u64 << num_items) - 1
    };
    (mask != 0 && mask & !universe == 0).then_some(mask)
}

/// Bids that clear the reserve and carry a well-formed bundle, sorted by
/// amount descending for effective pruning.
fn eligible<'a>(config: &Combinatorial, bids: &'a [Bid], reserve_price: Decimal) -> Vec<(&'a Bid, u64)> {
    let mut eligible: Vec<(&Bid, u64)> = filter_valid_bids(bids, reserve_price)
        .into_iter()
        .filter_map(|bid| bundle_mask(bid, config.num_items).map(|mask| (bid, mask)))
        .collect();
    eligible.sort_by(|a, b| b.0.amount().cmp(&a.0.amount()));
    eligible
}

struct Search<'a> {
    bids: &'a [(&'a Bid, u64)],
    /// `suffix_value[i]` = total amount of bids `i..`, the optimistic bound.
    suffix_value: Vec<Decimal>,
    best_value: Decimal,
    best_set: Vec<usize>,
}

impl Search<'_> {
    fn descend(&mut self, index: usize, used: u64, value: Decimal, chosen: &mut Vec<usize>) {
        if value > self.best_value {
            self.best_value = value;
            self.best_set = chosen.clone();
        }
        if index == self.bids.len() || value + self.suffix_value[index] <= self.best_value {
            return;
        }
        let (bid, mask) = self.bids[index];
        if used & mask == 0 {
            chosen.push(index);
            self.descend(index + 1, used | mask, value + bid.amount(), chosen);
            chosen.pop();
        }
        self.descend(index + 1, used, value, chosen);
    }
}

/// Indices (into the eligible ordering) and total value of the optimal
/// disjoint set.
fn solve(eligible: &[(&Bid, u64)]) -> (Vec<usize>, Decimal) {
    let mut suffix_value = vec![Decimal::ZERO; eligible.len() + 1];
    for (i, (bid, _)) in eligible.iter().enumerate().rev() {
        suffix_value[i] = suffix_value[i + 1] + bid.amount();
    }
    let mut search = Search {
        bids: eligible,
        suffix_value,
        best_value: Decimal::ZERO,
        best_set: Vec::new(),
    };
    search.descend(0, 0, Decimal::ZERO, &mut Vec::new());
    (search.best_set, search.best_value)
}

/// Reference solver: walks all `2^n` subsets. Only sensible for small `n`;
/// used to verify the branch-and-bound search.
#[must_use]
pub fn exhaustive_winner_determination(
    bundles: &[(Decimal, u64)],
) -> (Vec<usize>, Decimal) {
    assert!(
        bundles.len() <= 20,
        "exhaustive search is limited to 20 bids"
    );
    let mut best_value = Decimal::ZERO;
    let mut best_set = Vec::new();
    for subset in 0_u64..(1 << bundles.len()) {
        let mut used = 0_u64;
        let mut value = Decimal::ZERO;
        let mut feasible = true;
        for (i, (amount, mask)) in bundles.iter().enumerate() {
            if subset & (1 << i) == 0 {
                continue;
            }
            if used & mask != 0 {
                feasible = false;
                break;
            }
            used |= mask;
            value += *amount;
        }
        if feasible && value > best_value {
            best_value = value;
            best_set = (0..bundles.len()).filter(|i| subset & (1 << i) != 0).collect();
        }
    }
    (best_set, best_value)
}

/// For a combinatorial auction the "clearing price" is the value of the
/// winning set.
pub(super) fn clearing_price(
    config: &Combinatorial,
    bids: &[Bid],
    reserve_price: Decimal,
) -> Decimal {
    let eligible = eligible(config, bids, reserve_price);
    solve(&eligible).1
}

pub(super) fn allocate(
    config: &Combinatorial,
    bids: &[Bid],
    reserve_price: Decimal,
) -> (Vec<BidderId>, Allocations) {
    let eligible = eligible(config, bids, reserve_price);
    let (winning, _) = solve(&eligible);
    let mut allocations = Allocations::new();
    for index in winning {
        let (bid, _) = eligible[index];
        // One bundle granted per winning bid.
        *allocations
            .entry(bid.bidder_id().clone())
            .or_insert(Decimal::ZERO) += Decimal::ONE;
    }
    let winners = allocations.keys().cloned().collect();
    (winners, allocations)
}

/// Combinatorial winners pay their bid (first-price on bundles). The
/// winning set is recomputed so that a bidder's losing bundles are never
/// charged.
pub(super) fn payments(config: &Combinatorial, bids: &[Bid], reserve_price: Decimal) -> Payments {
    let eligible = eligible(config, bids, reserve_price);
    let (winning, _) = solve(&eligible);
    let mut payments = Payments::new();
    for index in winning {
        let (bid, _) = eligible[index];
        *payments
            .entry(bid.bidder_id().clone())
            .or_insert(Decimal::ZERO) += bid.amount();
    }
    payments
}
