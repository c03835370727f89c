//! Pure clearing functions over `(mechanism, bids, reserve price)`.
//!
//! The three entry points mirror the phases of finalization: price
//! discovery, winner allocation, and payment computation. [`run_auction`]
//! composes them into an [`AuctionResult`]. None of these functions touch
//! clocks, channels, or locks; everything they need arrives as arguments.

use indexmap::IndexMap;
use meridian_core::{
    mechanism::TieBreakRule,
    primitive::BidderId,
    AuctionResult,
    Bid,
    Mechanism,
};
use rand::{
    rngs::StdRng,
    Rng as _,
    SeedableRng as _,
};
use rust_decimal::{
    prelude::ToPrimitive as _,
    Decimal,
};

mod all_pay;
mod combinatorial;
mod first_price;
mod uniform;
mod vickrey;

pub use combinatorial::exhaustive_winner_determination;

/// Quantities allocated per winning bidder, in allocation order.
pub type Allocations = IndexMap<BidderId, Decimal>;
/// Amounts owed per bidder.
pub type Payments = IndexMap<BidderId, Decimal>;

/// Drops every bid below the reserve price, preserving input order.
#[must_use]
pub fn filter_valid_bids(bids: &[Bid], reserve_price: Decimal) -> Vec<&Bid> {
    bids.iter()
        .filter(|bid| bid.amount() >= reserve_price)
        .collect()
}

/// Stable price sort: bids with equal amounts keep their input order.
pub fn sort_bids_by_price(bids: &mut [&Bid], descending: bool) {
    if descending {
        bids.sort_by(|a, b| b.amount().cmp(&a.amount()));
    } else {
        bids.sort_by(|a, b| a.amount().cmp(&b.amount()));
    }
}

/// Orders a tied set of bids by the given rule, most preferred first.
///
/// `Proportional` keeps the whole set in input order; the caller divides the
/// remaining allocation pro-rata.
#[must_use]
pub fn resolve_ties<'a>(tied: &[&'a Bid], rule: &TieBreakRule) -> Vec<&'a Bid> {
    let mut ordered: Vec<&Bid> = tied.to_vec();
    match rule {
        TieBreakRule::Proportional => {}
        TieBreakRule::FirstCome => {
            ordered.sort_by_key(|bid| bid.timestamp());
        }
        TieBreakRule::HighestId => {
            ordered.sort_by(|a, b| b.bidder_id().cmp(a.bidder_id()));
        }
        TieBreakRule::Random { seed } => {
            if !ordered.is_empty() {
                let mut rng = StdRng::seed_from_u64(*seed);
                let chosen = rng.gen_range(0..ordered.len());
                ordered.swap(0, chosen);
            }
        }
        TieBreakRule::Augmented {
            quantity_weight,
            time_weight,
        } => {
            let score = |bid: &Bid| -> f64 {
                let quantity = bid.quantity().to_f64().unwrap_or(0.0);
                let seconds = bid.timestamp().as_second() as f64;
                quantity_weight * (1.0 + quantity).ln() + time_weight * (-seconds)
            };
            ordered.sort_by(|a, b| {
                score(b)
                    .partial_cmp(&score(a))
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }
    }
    ordered
}

/// The clearing price the mechanism discovers on `bids`.
///
/// With no valid bids every mechanism clears at the reserve price.
#[must_use]
pub fn determine_clearing_price(
    mechanism: &Mechanism,
    bids: &[Bid],
    reserve_price: Decimal,
) -> Decimal {
    match mechanism {
        Mechanism::FirstPrice => first_price::clearing_price(bids, reserve_price),
        Mechanism::Vickrey => vickrey::clearing_price(bids, reserve_price),
        Mechanism::UniformElastic(config) => uniform::clearing_price(config, bids, reserve_price),
        Mechanism::AllPay(_) => all_pay::clearing_price(bids, reserve_price),
        Mechanism::Combinatorial(config) => {
            combinatorial::clearing_price(config, bids, reserve_price)
        }
    }
}

/// Winners and their allocated quantities at `clearing_price`.
#[must_use]
pub fn allocate_winners(
    mechanism: &Mechanism,
    bids: &[Bid],
    clearing_price: Decimal,
    reserve_price: Decimal,
) -> (Vec<BidderId>, Allocations) {
    match mechanism {
        Mechanism::FirstPrice => first_price::allocate(bids, reserve_price),
        Mechanism::Vickrey => vickrey::allocate(bids, reserve_price),
        Mechanism::UniformElastic(config) => {
            uniform::allocate(config, bids, clearing_price, reserve_price)
        }
        Mechanism::AllPay(config) => all_pay::allocate(config, bids, reserve_price),
        Mechanism::Combinatorial(config) => combinatorial::allocate(config, bids, reserve_price),
    }
}

/// Amounts owed by each bidder given the allocation.
#[must_use]
pub fn compute_payments(
    mechanism: &Mechanism,
    bids: &[Bid],
    winners: &[BidderId],
    allocations: &Allocations,
    clearing_price: Decimal,
    reserve_price: Decimal,
) -> Payments {
    match mechanism {
        Mechanism::FirstPrice => first_price::payments(bids, winners, reserve_price),
        Mechanism::Vickrey => vickrey::payments(winners, clearing_price),
        Mechanism::UniformElastic(_) => uniform::payments(allocations, clearing_price),
        Mechanism::AllPay(config) => all_pay::payments(config, bids, winners, reserve_price),
        Mechanism::Combinatorial(config) => {
            combinatorial::payments(config, bids, reserve_price)
        }
    }
}

/// Runs the full clearing pipeline and assembles the result.
#[must_use]
pub fn run_auction(mechanism: &Mechanism, bids: &[Bid], reserve_price: Decimal) -> AuctionResult {
    let clearing_price = determine_clearing_price(mechanism, bids, reserve_price);
    let (winners, allocations) = allocate_winners(mechanism, bids, clearing_price, reserve_price);
    let payments = compute_payments(
        mechanism,
        bids,
        &winners,
        &allocations,
        clearing_price,
        reserve_price,
    );
    let mut result = AuctionResult::empty(clearing_price);
    result.winners = winners;
    result.allocations = allocations;
    result.payments = payments;
    result
        .summary_metadata
        .insert("mechanism".to_string(), mechanism.tag().into());
    result.summary_metadata.insert(
        "num_bids".to_string(),
        meridian_core::Value::Int(bids.len() as i64),
    );
    result
}

#[cfg(test)]
mod tests;
