//! All-pay auction: every participant pays, the prize structure decides who
//! wins what.

use meridian_core::{
    mechanism::{
        AllPay,
        PrizeStructure,
    },
    primitive::BidderId,
    Bid,
};
use rust_decimal::Decimal;

use super::{
    filter_valid_bids,
    sort_bids_by_price,
    Allocations,
    Payments,
};

fn ranked<'a>(bids: &'a [Bid], reserve_price: Decimal) -> Vec<&'a Bid> {
    let mut valid = filter_valid_bids(bids, reserve_price);
    sort_bids_by_price(&mut valid, true);
    valid
}

pub(super) fn clearing_price(bids: &[Bid], reserve_price: Decimal) -> Decimal {
    ranked(bids, reserve_price)
        .first()
        .map_or(reserve_price, |bid| bid.amount())
}

/// Winners receive prize shares summing to 1 (the offered supply of an
/// all-pay contest is one prize unit).
pub(super) fn allocate(
    config: &AllPay,
    bids: &[Bid],
    reserve_price: Decimal,
) -> (Vec<BidderId>, Allocations) {
    let ranked = ranked(bids, reserve_price);
    if ranked.is_empty() {
        return (Vec::new(), Allocations::new());
    }
    let mut allocations = Allocations::new();
    match &config.prize_structure {
        PrizeStructure::WinnerTakesAll => {
            allocations.insert(ranked[0].bidder_id().clone(), Decimal::ONE);
        }
        PrizeStructure::Proportional => {
            let total: Decimal = ranked.iter().map(|bid| bid.amount()).sum();
            for bid in &ranked {
                let share = if total.is_zero() {
                    Decimal::ONE / Decimal::from(ranked.len() as u64)
                } else {
                    bid.amount() / total
                };
                *allocations
                    .entry(bid.bidder_id().clone())
                    .or_insert(Decimal::ZERO) += share;
            }
        }
        PrizeStructure::TopK { k, distribution } => {
            let winners = ranked.iter().take(*k).collect::<Vec<_>>();
            // Renormalize over the weights actually used in case fewer than
            // k bidders showed up.
            let used: Decimal = distribution.iter().take(winners.len()).copied().sum();
            for (bid, weight) in winners.iter().zip(distribution) {
                let share = if used.is_zero() {
                    Decimal::ZERO
                } else {
                    *weight / used
                };
                *allocations
                    .entry(bid.bidder_id().clone())
                    .or_insert(Decimal::ZERO) += share;
            }
        }
    }
    let winners = allocations.keys().cloned().collect();
    (winners, allocations)
}

/// Winners pay their full bid; losers pay `amount * (1 - refund_rate)`.
pub(super) fn payments(
    config: &AllPay,
    bids: &[Bid],
    winners: &[BidderId],
    reserve_price: Decimal,
) -> Payments {
    let mut payments = Payments::new();
    for bid in ranked(bids, reserve_price) {
        let owed = if winners.contains(bid.bidder_id()) {
            bid.amount()
        } else {
            bid.amount() * (Decimal::ONE - config.refund_rate)
        };
        *payments
            .entry(bid.bidder_id().clone())
            .or_insert(Decimal::ZERO) += owed;
    }
    payments
}
