use meridian_core::{
    event::EventPayload,
    primitive::{
        AuctionId,
        RequestId,
    },
    Bid,
};
use meridian_eventlog::EventLog;
use rust_decimal_macros::dec;

fn populated_log() -> (EventLog, AuctionId) {
    let log = EventLog::new();
    let auction_id = AuctionId::random();
    log.append(
        auction_id,
        EventPayload::AuctionStarted {
            mechanism: "vickrey".to_string(),
        },
    );
    for (bidder, amount) in [("b1", dec!(100)), ("b2", dec!(80.5)), ("b3", dec!(120))] {
        log.append(
            auction_id,
            EventPayload::BidSubmitted {
                bid: Bid::new(bidder, auction_id, amount, dec!(1)).unwrap(),
            },
        );
    }
    log.append(
        auction_id,
        EventPayload::WorkflowStarted {
            request_id: RequestId::random(),
            workflow: "settlement".to_string(),
        },
    );
    (log, auction_id)
}

#[test]
fn export_then_import_reproduces_identical_hashes() {
    let (log, auction_id) = populated_log();
    let mut buffer = Vec::new();
    log.export_json(&mut buffer).unwrap();

    let imported = EventLog::import_json(buffer.as_slice()).unwrap();
    assert!(imported.verify_integrity());
    assert_eq!(imported.len(), log.len());

    let original = log.events();
    let roundtripped = imported.events();
    for (a, b) in original.iter().zip(&roundtripped) {
        assert_eq!(a.id(), b.id());
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a.previous_hash(), b.previous_hash());
        assert_eq!(a.timestamp(), b.timestamp());
    }
    assert_eq!(
        imported.query_by_auction(auction_id).len(),
        log.query_by_auction(auction_id).len(),
    );
}

#[test]
fn export_entries_carry_hex_hashes_and_tags() {
    let (log, _) = populated_log();
    let mut buffer = Vec::new();
    log.export_json(&mut buffer).unwrap();

    let parsed: serde_json::Value = serde_json::from_slice(&buffer).unwrap();
    let entries = parsed.as_array().unwrap();
    assert_eq!(entries.len(), log.len());

    let first = &entries[0];
    assert_eq!(first["payload_tag"], "AuctionStarted");
    assert_eq!(first["previous_hash"], "");
    let hash = first["hash"].as_str().unwrap();
    assert_eq!(hash.len(), 64);
    assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    let event_id = first["event_id"].as_str().unwrap();
    assert_eq!(event_id.len(), 32);

    let second = &entries[1];
    assert_eq!(second["previous_hash"], first["hash"]);
}

#[test]
fn import_of_tampered_export_is_rejected() {
    let (log, _) = populated_log();
    let mut buffer = Vec::new();
    log.export_json(&mut buffer).unwrap();

    let mut parsed: serde_json::Value = serde_json::from_slice(&buffer).unwrap();
    parsed[1]["hash"] = serde_json::Value::String("ab".repeat(32));
    let tampered = serde_json::to_vec(&parsed).unwrap();

    assert!(EventLog::import_json(tampered.as_slice()).is_err());
}
