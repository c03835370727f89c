//! Uniform-price auction against an elastic supply schedule.
//!
//! The clearing price is the smallest `p` within the schedule's price band
//! such that the aggregate demand strictly above `p` fits inside `S(p)`.
//! Demand is a step function with steps only at bid amounts, so the search
//! bisects the band and then snaps onto the bid amount the boundary sits on.
//! Bids strictly above the clearing price are filled in full; bids at the
//! clearing price split the remaining supply according to the tie-break
//! rule. Every winner pays the clearing price per allocated unit.

use meridian_core::{
    mechanism::{
        TieBreakRule,
        UniformElastic,
    },
    primitive::BidderId,
    Bid,
};
use rust_decimal::Decimal;

use super::{
    filter_valid_bids,
    resolve_ties,
    Allocations,
    Payments,
};

/// Total quantity demanded at prices strictly above `price`.
fn demand_above(bids: &[&Bid], price: Decimal) -> Decimal {
    bids.iter()
        .filter(|bid| bid.amount() > price)
        .map(|bid| bid.quantity())
        .sum()
}

pub(super) fn clearing_price(
    config: &UniformElastic,
    bids: &[Bid],
    reserve_price: Decimal,
) -> Decimal {
    let valid = filter_valid_bids(bids, reserve_price);
    if valid.is_empty() {
        return reserve_price;
    }
    let schedule = &config.schedule;
    let mut lo = schedule.price_floor().max(reserve_price);
    let mut hi = schedule.price_ceiling();
    if lo >= hi {
        return hi;
    }
    let feasible = |price: Decimal| demand_above(&valid, price) <= schedule.quantity_at(price);
    if feasible(lo) {
        return lo;
    }
    if !feasible(hi) {
        // Demand exceeds supply across the whole band; clear at the ceiling
        // and let allocation trim the order book.
        return hi;
    }
    while hi - lo > config.tolerance {
        let mid = (lo + hi) / Decimal::TWO;
        if feasible(mid) {
            hi = mid;
        } else {
            lo = mid;
        }
    }
    snap_to_bid_amount(hi, &valid, config.tolerance)
}

/// The feasibility boundary always sits on a demand step, i.e. on some bid's
/// amount. Bisection stops within `tolerance` of it; return the exact step
/// so downstream equality comparisons hold.
fn snap_to_bid_amount(price: Decimal, bids: &[&Bid], tolerance: Decimal) -> Decimal {
    let snap_radius = tolerance * Decimal::TWO;
    bids.iter()
        .map(|bid| bid.amount())
        .filter(|amount| (*amount - price).abs() <= snap_radius)
        .min_by(|a, b| {
            (*a - price)
                .abs()
                .cmp(&(*b - price).abs())
        })
        .unwrap_or(price)
}

pub(super) fn allocate(
    config: &UniformElastic,
    bids: &[Bid],
    clearing_price: Decimal,
    reserve_price: Decimal,
) -> (Vec<BidderId>, Allocations) {
    let valid = filter_valid_bids(bids, reserve_price);
    if valid.is_empty() {
        return (Vec::new(), Allocations::new());
    }
    let tolerance = config.tolerance;
    let supply = config.schedule.quantity_at(clearing_price);

    let mut above: Vec<&Bid> = valid
        .iter()
        .copied()
        .filter(|bid| bid.amount() > clearing_price + tolerance)
        .collect();
    // Highest price first; earlier bids first within a price level.
    above.sort_by(|a, b| {
        b.amount()
            .cmp(&a.amount())
            .then_with(|| a.timestamp().cmp(&b.timestamp()))
    });
    let tied: Vec<&Bid> = valid
        .iter()
        .copied()
        .filter(|bid| (bid.amount() - clearing_price).abs() <= tolerance)
        .collect();

    let mut allocations = Allocations::new();
    let mut remaining = supply;
    for bid in above {
        if remaining <= Decimal::ZERO {
            break;
        }
        let granted = bid.quantity().min(remaining);
        if granted > Decimal::ZERO {
            *allocations
                .entry(bid.bidder_id().clone())
                .or_insert(Decimal::ZERO) += granted;
            remaining -= granted;
        }
    }

    if remaining > Decimal::ZERO && !tied.is_empty() {
        allocate_tied(&mut allocations, &tied, remaining, &config.tie_break);
    }

    let winners = allocations.keys().cloned().collect();
    (winners, allocations)
}

/// Splits the marginal supply among the bids sitting exactly at the
/// clearing price.
fn allocate_tied(
    allocations: &mut Allocations,
    tied: &[&Bid],
    remaining: Decimal,
    rule: &TieBreakRule,
) {
    let total_tied: Decimal = tied.iter().map(|bid| bid.quantity()).sum();
    if total_tied <= remaining {
        // Everyone at the margin fits.
        for bid in tied {
            *allocations
                .entry(bid.bidder_id().clone())
                .or_insert(Decimal::ZERO) += bid.quantity();
        }
        return;
    }
    match rule {
        TieBreakRule::Proportional => {
            for bid in tied {
                let share = remaining * bid.quantity() / total_tied;
                if share > Decimal::ZERO {
                    *allocations
                        .entry(bid.bidder_id().clone())
                        .or_insert(Decimal::ZERO) += share;
                }
            }
        }
        rule => {
            let mut left = remaining;
            for bid in resolve_ties(tied, rule) {
                if left <= Decimal::ZERO {
                    break;
                }
                let granted = bid.quantity().min(left);
                *allocations
                    .entry(bid.bidder_id().clone())
                    .or_insert(Decimal::ZERO) += granted;
                left -= granted;
            }
        }
    }
}

/// Uniform pricing: every winner pays the clearing price per allocated unit.
pub(super) fn payments(allocations: &Allocations, clearing_price: Decimal) -> Payments {
    allocations
        .iter()
        .map(|(bidder, quantity)| (bidder.clone(), clearing_price * quantity))
        .collect()
}
