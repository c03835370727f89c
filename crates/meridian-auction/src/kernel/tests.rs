use jiff::Timestamp;
use meridian_core::{
    mechanism::{
        AllPay,
        Combinatorial,
        ElasticityModel,
        Mechanism,
        PrizeStructure,
        SupplyPoint,
        SupplySchedule,
        TieBreakRule,
        UniformElastic,
    },
    primitive::AuctionId,
    Bid,
    Value,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::*;

fn bid(bidder: &str, amount: Decimal, quantity: Decimal, at_second: i64) -> Bid {
    Bid::new(bidder, AuctionId::random(), amount, quantity)
        .unwrap()
        .with_timestamp(Timestamp::from_second(at_second).unwrap())
}

fn bidders(winners: &[meridian_core::primitive::BidderId]) -> Vec<&str> {
    winners.iter().map(|w| w.as_str()).collect()
}

#[test]
fn first_price_winner_pays_own_bid() {
    let bids = vec![
        bid("b1", dec!(100), dec!(1), 1),
        bid("b2", dec!(120), dec!(1), 2),
        bid("b3", dec!(90), dec!(1), 3),
    ];
    let result = run_auction(&Mechanism::FirstPrice, &bids, dec!(10));
    assert_eq!(result.clearing_price, dec!(120));
    assert_eq!(bidders(&result.winners), vec!["b2"]);
    assert_eq!(result.payments["b2"], dec!(120));
}

#[test]
fn first_price_breaks_amount_ties_by_timestamp() {
    let bids = vec![
        bid("late", dec!(100), dec!(1), 9),
        bid("early", dec!(100), dec!(1), 2),
    ];
    let result = run_auction(&Mechanism::FirstPrice, &bids, dec!(0));
    assert_eq!(bidders(&result.winners), vec!["early"]);
}

// Scenario: three truthful bidders, reserve 10.
#[test]
fn vickrey_winner_pays_second_highest() {
    let bids = vec![
        bid("B1", dec!(100), dec!(1), 1),
        bid("B2", dec!(80), dec!(1), 2),
        bid("B3", dec!(120), dec!(1), 3),
    ];
    let result = run_auction(&Mechanism::Vickrey, &bids, dec!(10));
    assert_eq!(bidders(&result.winners), vec!["B3"]);
    assert_eq!(result.clearing_price, dec!(100));
    assert_eq!(result.payments.len(), 1);
    assert_eq!(result.payments["B3"], dec!(100));
    // The winner never pays more than their own bid.
    assert!(result.payments["B3"] <= dec!(120));
}

#[test]
fn vickrey_single_bid_pays_the_reserve() {
    let bids = vec![bid("only", dec!(75), dec!(1), 1)];
    let result = run_auction(&Mechanism::Vickrey, &bids, dec!(10));
    assert_eq!(bidders(&result.winners), vec!["only"]);
    assert_eq!(result.clearing_price, dec!(10));
    assert_eq!(result.payments["only"], dec!(10));
}

#[test]
fn no_valid_bids_clears_at_reserve_with_no_winners() {
    let bids = vec![bid("low", dec!(5), dec!(1), 1)];
    for mechanism in [Mechanism::FirstPrice, Mechanism::Vickrey] {
        let result = run_auction(&mechanism, &bids, dec!(10));
        assert_eq!(result.clearing_price, dec!(10));
        assert!(result.winners.is_empty());
        assert!(result.payments.is_empty());
    }
}

fn uniform(schedule: SupplySchedule, tie_break: TieBreakRule) -> Mechanism {
    Mechanism::UniformElastic(UniformElastic::new(schedule, tie_break).unwrap())
}

// Scenario: five bidders against a 1000-unit supply band over [10, 20].
#[test]
fn uniform_elastic_clears_at_the_marginal_price() {
    let schedule = SupplySchedule::flat(dec!(1000), dec!(10), dec!(20)).unwrap();
    let mechanism = uniform(schedule, TieBreakRule::Proportional);
    let bids = vec![
        bid("b1", dec!(15), dec!(200), 1),
        bid("b2", dec!(14), dec!(300), 2),
        bid("b3", dec!(13), dec!(400), 3),
        bid("b4", dec!(12), dec!(500), 4),
        bid("b5", dec!(11), dec!(100), 5),
    ];
    let result = run_auction(&mechanism, &bids, dec!(10));
    assert_eq!(result.clearing_price, dec!(12));
    assert_eq!(result.allocations["b1"], dec!(200));
    assert_eq!(result.allocations["b2"], dec!(300));
    assert_eq!(result.allocations["b3"], dec!(400));
    assert_eq!(result.allocations["b4"], dec!(100));
    assert!(!result.allocations.contains_key("b5"));
    let total: Decimal = result.allocations.values().copied().sum();
    assert_eq!(total, dec!(1000));
    // Uniform pricing: everyone pays the clearing price per unit.
    assert_eq!(result.payments["b1"], dec!(2400));
    assert_eq!(result.payments["b4"], dec!(1200));
}

#[test]
fn uniform_clearing_price_is_the_smallest_feasible_price() {
    let schedule = SupplySchedule::new(
        vec![
            SupplyPoint {
                price: dec!(10),
                quantity: dec!(500),
            },
            SupplyPoint {
                price: dec!(20),
                quantity: dec!(1500),
            },
        ],
        ElasticityModel::Linear,
        dec!(10),
        dec!(20),
    )
    .unwrap();
    let mechanism = uniform(schedule.clone(), TieBreakRule::Proportional);
    let bids = vec![
        bid("b1", dec!(18), dec!(400), 1),
        bid("b2", dec!(16), dec!(400), 2),
        bid("b3", dec!(14), dec!(400), 3),
    ];
    let clearing = determine_clearing_price(&mechanism, &bids, dec!(10));
    // Feasibility holds at the clearing price...
    let demand_above = |p: Decimal| -> Decimal {
        bids.iter()
            .filter(|b| b.amount() > p)
            .map(Bid::quantity)
            .sum()
    };
    assert!(demand_above(clearing) <= schedule.quantity_at(clearing));
    // ...and fails a hair below it.
    let below = clearing - dec!(0.001);
    assert!(demand_above(below) > schedule.quantity_at(below));
}

#[test]
fn uniform_supply_exhausted_at_floor_allocates_everything() {
    let schedule = SupplySchedule::flat(dec!(1000), dec!(10), dec!(20)).unwrap();
    let mechanism = uniform(schedule, TieBreakRule::Proportional);
    let bids = vec![
        bid("b1", dec!(15), dec!(100), 1),
        bid("b2", dec!(14), dec!(100), 2),
    ];
    let result = run_auction(&mechanism, &bids, dec!(10));
    // Supply dwarfs demand: the price settles at the floor.
    assert_eq!(result.clearing_price, dec!(10));
    assert_eq!(result.allocations["b1"], dec!(100));
    assert_eq!(result.allocations["b2"], dec!(100));
}

#[test]
fn uniform_first_come_tie_break_prefers_the_earlier_bid() {
    let schedule = SupplySchedule::flat(dec!(100), dec!(1), dec!(50)).unwrap();
    let mechanism = uniform(schedule, TieBreakRule::FirstCome);
    let bids = vec![
        bid("late", dec!(10), dec!(100), 9),
        bid("early", dec!(10), dec!(100), 2),
        bid("top", dec!(20), dec!(50), 1),
    ];
    let result = run_auction(&mechanism, &bids, dec!(1));
    assert_eq!(result.clearing_price, dec!(10));
    assert_eq!(result.allocations["top"], dec!(50));
    // 50 units remain for the two tied bids; first come takes them all.
    assert_eq!(result.allocations["early"], dec!(50));
    assert!(!result.allocations.contains_key("late"));
}

#[test]
fn uniform_highest_id_tie_break_orders_lexicographically() {
    let schedule = SupplySchedule::flat(dec!(60), dec!(1), dec!(50)).unwrap();
    let mechanism = uniform(schedule, TieBreakRule::HighestId);
    let bids = vec![
        bid("alpha", dec!(10), dec!(60), 1),
        bid("zeta", dec!(10), dec!(60), 2),
    ];
    let result = run_auction(&mechanism, &bids, dec!(1));
    assert_eq!(result.allocations["zeta"], dec!(60));
    assert!(!result.allocations.contains_key("alpha"));
}

#[test]
fn uniform_random_tie_break_is_deterministic_for_a_seed() {
    let schedule = SupplySchedule::flat(dec!(10), dec!(1), dec!(50)).unwrap();
    let mechanism = uniform(schedule, TieBreakRule::Random { seed: 42 });
    let bids = vec![
        bid("a", dec!(10), dec!(10), 1),
        bid("b", dec!(10), dec!(10), 2),
        bid("c", dec!(10), dec!(10), 3),
    ];
    let first = run_auction(&mechanism, &bids, dec!(1));
    let second = run_auction(&mechanism, &bids, dec!(1));
    assert_eq!(first.allocations, second.allocations);
    let total: Decimal = first.allocations.values().copied().sum();
    assert_eq!(total, dec!(10));
}

#[test]
fn uniform_augmented_tie_break_favors_larger_quantities() {
    let schedule = SupplySchedule::flat(dec!(100), dec!(1), dec!(50)).unwrap();
    let mechanism = uniform(
        schedule,
        TieBreakRule::Augmented {
            quantity_weight: 1.0,
            time_weight: 0.0,
        },
    );
    let bids = vec![
        bid("small", dec!(10), dec!(40), 1),
        bid("large", dec!(10), dec!(90), 2),
    ];
    let result = run_auction(&mechanism, &bids, dec!(1));
    assert_eq!(result.allocations["large"], dec!(90));
    assert_eq!(result.allocations["small"], dec!(10));
}

// Scenario: winner-takes-all with no refunds; everyone pays what they bid.
#[test]
fn all_pay_winner_takes_all_charges_everyone() {
    let mechanism = Mechanism::AllPay(
        AllPay::new(PrizeStructure::WinnerTakesAll, Decimal::ZERO).unwrap(),
    );
    let bids = vec![
        bid("a", dec!(50), dec!(1), 1),
        bid("b", dec!(40), dec!(1), 2),
        bid("c", dec!(30), dec!(1), 3),
    ];
    let result = run_auction(&mechanism, &bids, dec!(0));
    assert_eq!(bidders(&result.winners), vec!["a"]);
    assert_eq!(result.payments["a"], dec!(50));
    assert_eq!(result.payments["b"], dec!(40));
    assert_eq!(result.payments["c"], dec!(30));
}

#[test]
fn all_pay_refund_rate_discounts_losers() {
    let mechanism = Mechanism::AllPay(
        AllPay::new(PrizeStructure::WinnerTakesAll, dec!(0.5)).unwrap(),
    );
    let bids = vec![
        bid("a", dec!(50), dec!(1), 1),
        bid("b", dec!(40), dec!(1), 2),
    ];
    let result = run_auction(&mechanism, &bids, dec!(0));
    assert_eq!(result.payments["a"], dec!(50));
    assert_eq!(result.payments["b"], dec!(20));
    // Total collected equals the sum of bids less loser refunds.
    let collected: Decimal = result.payments.values().copied().sum();
    assert_eq!(collected, dec!(70));
}

#[test]
fn all_pay_top_k_splits_by_normalized_distribution() {
    let mechanism = Mechanism::AllPay(
        AllPay::new(
            PrizeStructure::TopK {
                k: 2,
                distribution: vec![dec!(0.6), dec!(0.4)],
            },
            Decimal::ZERO,
        )
        .unwrap(),
    );
    let bids = vec![
        bid("a", dec!(50), dec!(1), 1),
        bid("b", dec!(40), dec!(1), 2),
        bid("c", dec!(30), dec!(1), 3),
    ];
    let result = run_auction(&mechanism, &bids, dec!(0));
    assert_eq!(result.allocations["a"], dec!(0.6));
    assert_eq!(result.allocations["b"], dec!(0.4));
    assert!(!result.allocations.contains_key("c"));
}

#[test]
fn all_pay_proportional_shares_sum_to_one() {
    let mechanism = Mechanism::AllPay(
        AllPay::new(PrizeStructure::Proportional, Decimal::ZERO).unwrap(),
    );
    let bids = vec![
        bid("a", dec!(60), dec!(1), 1),
        bid("b", dec!(40), dec!(1), 2),
    ];
    let result = run_auction(&mechanism, &bids, dec!(0));
    assert_eq!(result.allocations["a"], dec!(0.6));
    assert_eq!(result.allocations["b"], dec!(0.4));
}

fn bundle_bid(bidder: &str, amount: Decimal, mask: u64, at_second: i64) -> Bid {
    bid(bidder, amount, dec!(1), at_second).with_metadata(
        combinatorial::BUNDLE_KEY,
        Value::Int(mask as i64),
    )
}

use super::combinatorial;

#[test]
fn combinatorial_picks_the_value_maximizing_disjoint_set() {
    let mechanism = Mechanism::Combinatorial(Combinatorial::new(4).unwrap());
    // {AB}:10, {CD}:9, {ABCD}:15 -- the pair beats the grand bundle.
    let bids = vec![
        bundle_bid("grand", dec!(15), 0b1111, 1),
        bundle_bid("left", dec!(10), 0b0011, 2),
        bundle_bid("right", dec!(9), 0b1100, 3),
    ];
    let result = run_auction(&mechanism, &bids, dec!(0));
    assert_eq!(result.clearing_price, dec!(19));
    let mut winners = bidders(&result.winners);
    winners.sort_unstable();
    assert_eq!(winners, vec!["left", "right"]);
    assert_eq!(result.payments["left"], dec!(10));
    assert_eq!(result.payments["right"], dec!(9));
}

#[test]
fn combinatorial_overlapping_bundles_exclude_each_other() {
    let mechanism = Mechanism::Combinatorial(Combinatorial::new(3).unwrap());
    let bids = vec![
        bundle_bid("x", dec!(8), 0b011, 1),
        bundle_bid("y", dec!(7), 0b110, 2),
    ];
    let result = run_auction(&mechanism, &bids, dec!(0));
    assert_eq!(bidders(&result.winners), vec!["x"]);
    assert_eq!(result.clearing_price, dec!(8));
}

#[test]
fn combinatorial_bids_without_bundles_are_ignored() {
    let mechanism = Mechanism::Combinatorial(Combinatorial::new(3).unwrap());
    let bids = vec![
        bid("plain", dec!(100), dec!(1), 1),
        bundle_bid("bundled", dec!(5), 0b001, 2),
    ];
    let result = run_auction(&mechanism, &bids, dec!(0));
    assert_eq!(bidders(&result.winners), vec!["bundled"]);
    assert_eq!(result.clearing_price, dec!(5));
}

#[test]
fn branch_and_bound_matches_exhaustive_search() {
    let cases: Vec<Vec<(Decimal, u64)>> = vec![
        vec![(dec!(15), 0b1111), (dec!(10), 0b0011), (dec!(9), 0b1100)],
        vec![
            (dec!(5), 0b00001),
            (dec!(6), 0b00110),
            (dec!(4), 0b01000),
            (dec!(9), 0b01111),
            (dec!(3), 0b10000),
        ],
        vec![
            (dec!(2), 0b001),
            (dec!(2), 0b010),
            (dec!(2), 0b100),
            (dec!(5), 0b111),
        ],
    ];
    for bundles in cases {
        let mechanism = Mechanism::Combinatorial(Combinatorial::new(8).unwrap());
        let bids: Vec<Bid> = bundles
            .iter()
            .enumerate()
            .map(|(i, (amount, mask))| {
                bundle_bid(&format!("bidder-{i}"), *amount, *mask, i as i64)
            })
            .collect();
        let solver_value = determine_clearing_price(&mechanism, &bids, dec!(0));
        let (_, exhaustive_value) = exhaustive_winner_determination(&bundles);
        assert_eq!(solver_value, exhaustive_value);
    }
}

#[test]
fn resolve_ties_rules_order_as_documented() {
    let a = bid("aaa", dec!(10), dec!(5), 5);
    let b = bid("zzz", dec!(10), dec!(50), 1);
    let tied = vec![&a, &b];

    let first_come = resolve_ties(&tied, &TieBreakRule::FirstCome);
    assert_eq!(first_come[0].bidder_id().as_str(), "zzz");

    let highest_id = resolve_ties(&tied, &TieBreakRule::HighestId);
    assert_eq!(highest_id[0].bidder_id().as_str(), "zzz");

    let proportional = resolve_ties(&tied, &TieBreakRule::Proportional);
    assert_eq!(proportional.len(), 2);
    assert_eq!(proportional[0].bidder_id().as_str(), "aaa");

    let seeded_a = resolve_ties(&tied, &TieBreakRule::Random { seed: 1 });
    let seeded_b = resolve_ties(&tied, &TieBreakRule::Random { seed: 1 });
    assert_eq!(
        seeded_a[0].bidder_id(),
        seeded_b[0].bidder_id(),
        "same seed must pick the same bid",
    );
}

#[test]
fn filter_valid_bids_keeps_input_order() {
    let bids = vec![
        bid("a", dec!(5), dec!(1), 1),
        bid("b", dec!(20), dec!(1), 2),
        bid("c", dec!(15), dec!(1), 3),
    ];
    let valid = filter_valid_bids(&bids, dec!(10));
    let ids: Vec<_> = valid.iter().map(|b| b.bidder_id().as_str()).collect();
    assert_eq!(ids, vec!["b", "c"]);
}
