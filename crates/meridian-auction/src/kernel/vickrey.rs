//! Vickrey (second-price) sealed bid.
//!
//! The highest bid wins but pays the second-highest amount, which makes
//! truthful bidding a dominant strategy. With a single valid bid the
//! reserve price stands in for the missing second bid.

use meridian_core::{
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
    // Stable sort keeps the earlier of two equal bids in front.
    sort_bids_by_price(&mut valid, true);
    valid
}

pub(super) fn clearing_price(bids: &[Bid], reserve_price: Decimal) -> Decimal {
    let ranked = ranked(bids, reserve_price);
    match ranked.len() {
        0 => reserve_price,
        1 => reserve_price,
        _ => ranked[1].amount(),
    }
}

pub(super) fn allocate(bids: &[Bid], reserve_price: Decimal) -> (Vec<BidderId>, Allocations) {
    match ranked(bids, reserve_price).first() {
        Some(winner) => {
            let mut allocations = Allocations::new();
            allocations.insert(winner.bidder_id().clone(), winner.quantity());
            (vec![winner.bidder_id().clone()], allocations)
        }
        None => (Vec::new(), Allocations::new()),
    }
}

pub(super) fn payments(winners: &[BidderId], clearing_price: Decimal) -> Payments {
    winners
        .iter()
        .map(|winner| (winner.clone(), clearing_price))
        .collect()
}
