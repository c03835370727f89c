//! First-price sealed bid: the highest bid wins and pays its own amount.

use meridian_core::{
    primitive::BidderId,
    Bid,
};
use rust_decimal::Decimal;

use super::{
    filter_valid_bids,
    Allocations,
    Payments,
};

/// Picks the single winning bid: highest amount, earliest timestamp on ties.
fn winning_bid(bids: &[Bid], reserve_price: Decimal) -> Option<&Bid> {
    filter_valid_bids(bids, reserve_price)
        .into_iter()
        .max_by(|a, b| {
            a.amount()
                .cmp(&b.amount())
                // On equal amounts prefer the earlier bid.
                .then_with(|| b.timestamp().cmp(&a.timestamp()))
        })
}

pub(super) fn clearing_price(bids: &[Bid], reserve_price: Decimal) -> Decimal {
    winning_bid(bids, reserve_price).map_or(reserve_price, Bid::amount)
}

pub(super) fn allocate(bids: &[Bid], reserve_price: Decimal) -> (Vec<BidderId>, Allocations) {
    match winning_bid(bids, reserve_price) {
        Some(winner) => {
            let mut allocations = Allocations::new();
            allocations.insert(winner.bidder_id().clone(), winner.quantity());
            (vec![winner.bidder_id().clone()], allocations)
        }
        None => (Vec::new(), Allocations::new()),
    }
}

pub(super) fn payments(bids: &[Bid], winners: &[BidderId], reserve_price: Decimal) -> Payments {
    let mut payments = Payments::new();
    if let Some(winner) = winning_bid(bids, reserve_price) {
        if winners.contains(winner.bidder_id()) {
            payments.insert(winner.bidder_id().clone(), winner.amount());
        }
    }
    payments
}
