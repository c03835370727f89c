use meridian_core::primitive::BidderId;
use rust_decimal_macros::dec;

use super::*;

fn config() -> PhantomConfig {
    PhantomConfig::default()
}

fn commit_and_reveal(handle: &PhantomHandle, bidder: &str, price: rust_decimal::Decimal) {
    let bidder_id = BidderId::new(bidder);
    let nonce = format!("nonce-{bidder}").into_bytes();
    handle
        .commit(bidder_id.clone(), commitment_hash(&bidder_id, price, &nonce))
        .unwrap();
    handle.reveal(bidder_id, price, nonce).unwrap();
}

// Scenario: five bidders beat a 100.0 baseline; the 200 bps winner is
// clamped to the 50 bps cap.
#[tokio::test(start_paused = true)]
async fn improvement_is_clamped_to_the_configured_cap() {
    let (auction, handle) = PhantomAuction::new(config(), dec!(100.0), dec!(10));
    for (bidder, price) in [
        ("p1", dec!(101.0)),
        ("p2", dec!(101.5)),
        ("p3", dec!(102.0)),
        ("p4", dec!(101.8)),
        ("p5", dec!(100.5)),
    ] {
        commit_and_reveal(&handle, bidder, price);
    }
    let result = auction.run(None).await;

    let winner = result.winning_bid.expect("auction has a winner");
    assert_eq!(winner.bidder_id.as_str(), "p3");
    assert_eq!(winner.offered_price, dec!(102.0));
    assert_eq!(result.improvement_bps, dec!(50));
    assert_eq!(result.price, dec!(100.5));
    assert_eq!(result.num_participants, 5);
}

#[tokio::test(start_paused = true)]
async fn too_few_participants_falls_back_to_baseline() {
    let (auction, handle) = PhantomAuction::new(config(), dec!(100), dec!(10));
    commit_and_reveal(&handle, "only", dec!(101));
    let result = auction.run(None).await;

    assert!(result.winning_bid.is_none());
    assert_eq!(result.price, dec!(100));
    assert_eq!(result.improvement_bps, dec!(0));
    assert_eq!(result.num_participants, 1);
}

#[tokio::test(start_paused = true)]
async fn improvement_below_the_floor_is_rejected() {
    // 5 bps < the 10 bps floor.
    let (auction, handle) = PhantomAuction::new(config(), dec!(100), dec!(10));
    commit_and_reveal(&handle, "a", dec!(100.05));
    commit_and_reveal(&handle, "b", dec!(100.01));
    let result = auction.run(None).await;

    assert!(result.winning_bid.is_none());
    assert_eq!(result.price, dec!(100));
}

#[tokio::test(start_paused = true)]
async fn mismatched_reveal_is_rejected() {
    let (auction, handle) = PhantomAuction::new(config(), dec!(100), dec!(10));
    commit_and_reveal(&handle, "honest", dec!(100.2));
    commit_and_reveal(&handle, "other", dec!(100.3));

    // Committed to one price, reveals another.
    let cheat = BidderId::new("cheat");
    handle
        .commit(cheat.clone(), commitment_hash(&cheat, dec!(101), b"n"))
        .unwrap();
    handle.reveal(cheat, dec!(150), b"n".to_vec()).unwrap();

    let result = auction.run(None).await;
    assert_eq!(result.num_participants, 2);
    let winner = result.winning_bid.expect("honest winner");
    assert_eq!(winner.bidder_id.as_str(), "other");
}

#[tokio::test(start_paused = true)]
async fn reveal_without_commitment_is_ignored() {
    let (auction, handle) = PhantomAuction::new(config(), dec!(100), dec!(10));
    commit_and_reveal(&handle, "a", dec!(100.5));
    commit_and_reveal(&handle, "b", dec!(100.4));
    handle
        .reveal(BidderId::new("ghost"), dec!(200), b"n".to_vec())
        .unwrap();

    let result = auction.run(None).await;
    assert_eq!(result.num_participants, 2);
    assert_eq!(
        result.winning_bid.unwrap().bidder_id.as_str(),
        "a",
    );
}

#[tokio::test(start_paused = true)]
async fn price_ties_go_to_the_earliest_reveal() {
    let (auction, handle) = PhantomAuction::new(config(), dec!(100), dec!(10));
    commit_and_reveal(&handle, "second", dec!(100.5));
    commit_and_reveal(&handle, "first", dec!(100.5));

    let result = auction.run(None).await;
    // "second" revealed first in channel order.
    assert_eq!(result.winning_bid.unwrap().bidder_id.as_str(), "second");
}

#[tokio::test(start_paused = true)]
async fn blown_deadline_returns_no_improvement() {
    let (auction, handle) = PhantomAuction::new(config(), dec!(100), dec!(10));
    commit_and_reveal(&handle, "a", dec!(102));
    commit_and_reveal(&handle, "b", dec!(101));

    // The deadline expires before the commit window closes.
    let deadline = Instant::now() + Duration::from_millis(5);
    let result = auction.run(Some(deadline)).await;

    assert!(result.winning_bid.is_none());
    assert_eq!(result.price, dec!(100));
}

#[test]
fn commitment_hash_binds_bidder_price_and_nonce() {
    let bidder = BidderId::new("a");
    let base = commitment_hash(&bidder, dec!(100), b"nonce");
    assert_eq!(commitment_hash(&bidder, dec!(100), b"nonce"), base);
    assert_ne!(commitment_hash(&bidder, dec!(101), b"nonce"), base);
    assert_ne!(commitment_hash(&bidder, dec!(100), b"other"), base);
    assert_ne!(
        commitment_hash(&BidderId::new("b"), dec!(100), b"nonce"),
        base,
    );
}
