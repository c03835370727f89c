use std::{
    sync::Arc,
    time::Duration,
};

use meridian_core::primitive::BidderId;
use meridian_eventlog::EventLog;
use meridian_settlement::{
    atomic::{
        AtomicSettlement,
        BatchStatus,
        PreparedSettlement,
    },
    bridge::testing::StaticBridge,
    orchestrator::{
        FailureReason,
        SettlementOrchestrator,
        SettlementRequest,
        SettlementStatus,
    },
    phantom::commitment_hash,
    CfmmBridge as _,
    PhantomConfig,
    SettlementConfig,
    TokenId,
};
use meridian_state::StateStore;
use meridian_telemetry::{
    BreakerConfig,
    BypassConfig,
    LatencyTracker,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

const USDC: TokenId = TokenId(1);
const WETH: TokenId = TokenId(2);

struct Harness {
    bridge: Arc<StaticBridge>,
    state: Arc<StateStore>,
    event_log: Arc<EventLog>,
    tracker: Arc<LatencyTracker>,
    orchestrator: SettlementOrchestrator,
}

fn harness(bridge: StaticBridge) -> Harness {
    let bridge = Arc::new(bridge);
    let state = Arc::new(StateStore::default());
    let event_log = Arc::new(EventLog::new());
    let tracker = Arc::new(LatencyTracker::new(
        BreakerConfig::default(),
        BypassConfig::default(),
    ));
    let orchestrator = SettlementOrchestrator::new(
        bridge.clone(),
        state.clone(),
        event_log.clone(),
        tracker.clone(),
        SettlementConfig::default(),
        PhantomConfig::default(),
    );
    Harness {
        bridge,
        state,
        event_log,
        tracker,
        orchestrator,
    }
}

fn priced_bridge() -> StaticBridge {
    StaticBridge::new().with_price(USDC, WETH, dec!(100))
}

fn request() -> SettlementRequest {
    SettlementRequest::new(
        USDC,
        WETH,
        dec!(10),
        dec!(0.05),
        "alice",
        Duration::from_secs(30),
    )
}

#[tokio::test(start_paused = true)]
async fn baseline_settlement_completes_without_phantom() {
    let harness = harness(priced_bridge());
    let result = harness.orchestrator.settle(request()).await;

    assert_eq!(result.status, SettlementStatus::Completed);
    assert_eq!(result.cfmm_price, Some(dec!(100)));
    assert_eq!(result.improved_price, None);
    assert_eq!(result.amount_out, dec!(1000));
    assert!(result.failure.is_none());

    // Both workflow markers and the 2PC chain links are in the log.
    assert!(harness.event_log.verify_integrity());
    assert_eq!(harness.event_log.query_by_type("WorkflowStarted").len(), 1);
    assert_eq!(harness.event_log.query_by_type("WorkflowCompleted").len(), 1);
    assert!(!harness.event_log.query_by_type("ChainLinkExecuted").is_empty());

    // Stage latencies were recorded.
    assert!(harness.tracker.snapshot("routing").is_some());
    assert!(harness.tracker.snapshot("commit").is_some());
    assert!(harness.tracker.snapshot("settlement").is_some());

    // Balances moved atomically.
    let credited = harness
        .state
        .get(&format!("balance:alice:{WETH}"), None)
        .unwrap()
        .and_then(|v| v.as_decimal());
    assert_eq!(credited, Some(dec!(1000)));
}

#[tokio::test(start_paused = true)]
async fn open_breaker_fast_fails_settlements() {
    let harness = harness(priced_bridge());
    // Five consecutive over-threshold samples trip the default breaker.
    for _ in 0..5 {
        harness
            .tracker
            .record("settlement", Duration::from_millis(500));
    }
    let result = harness.orchestrator.settle(request()).await;

    assert_eq!(result.status, SettlementStatus::Failed);
    assert_eq!(result.failure, Some(FailureReason::CircuitOpen));
    // The pipeline never reached the bridge.
    assert_eq!(harness.bridge.route_query_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn missing_route_fails_after_retries() {
    let harness = harness(StaticBridge::new());
    let result = harness.orchestrator.settle(request()).await;

    assert_eq!(result.status, SettlementStatus::Failed);
    assert_eq!(result.failure, Some(FailureReason::NoRoute));
    // One initial attempt plus two retries.
    assert_eq!(harness.bridge.route_query_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn transient_route_failures_are_retried_through() {
    let bridge = priced_bridge();
    bridge.fail_next_routes(2);
    let harness = harness(bridge);
    let result = harness.orchestrator.settle(request()).await;

    assert_eq!(result.status, SettlementStatus::Completed);
    assert_eq!(harness.bridge.route_query_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn oversized_gas_estimate_fails_validation() {
    let bridge = StaticBridge::new()
        .with_price(USDC, WETH, dec!(100))
        .with_gas_estimate(2_000_000);
    let harness = harness(bridge);
    let result = harness.orchestrator.settle(request()).await;

    assert_eq!(result.status, SettlementStatus::Failed);
    assert!(matches!(
        result.failure,
        Some(FailureReason::Validation(_)),
    ));
    assert_eq!(harness.bridge.execution_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn exhausted_deadline_cancels_before_commit() {
    let harness = harness(priced_bridge());
    let request = SettlementRequest::new(
        USDC,
        WETH,
        dec!(10),
        dec!(0.05),
        "alice",
        Duration::ZERO,
    );
    let result = harness.orchestrator.settle(request).await;

    assert_eq!(result.status, SettlementStatus::Cancelled);
    assert_eq!(harness.bridge.execution_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn commit_failure_falls_back_to_direct_execution() {
    let bridge = priced_bridge();
    // All three atomic attempts fail; the fallback call succeeds.
    bridge.fail_next_executions(3);
    let harness = harness(bridge);
    let result = harness.orchestrator.settle(request()).await;

    assert_eq!(result.status, SettlementStatus::Completed);
    assert_eq!(result.improved_price, None);
    assert_eq!(result.amount_out, dec!(1000));
    assert_eq!(harness.bridge.execution_count(), 4);
    assert_eq!(harness.orchestrator.stats().fallbacks, 1);
}

#[tokio::test(start_paused = true)]
async fn disabled_fallback_surfaces_the_commit_failure() {
    let bridge = priced_bridge();
    bridge.fail_next_executions(u32::MAX);
    let bridge = Arc::new(bridge);
    let orchestrator = SettlementOrchestrator::new(
        bridge.clone(),
        Arc::new(StateStore::default()),
        Arc::new(EventLog::new()),
        Arc::new(LatencyTracker::new(
            BreakerConfig::default(),
            BypassConfig::default(),
        )),
        SettlementConfig {
            fallback_enabled: false,
            ..SettlementConfig::default()
        },
        PhantomConfig::default(),
    );
    let result = orchestrator.settle(request()).await;

    assert_eq!(result.status, SettlementStatus::Failed);
    assert!(matches!(result.failure, Some(FailureReason::Commit(_))));
}

#[tokio::test(start_paused = true)]
async fn phantom_improvement_is_adopted_and_clamped() {
    let bridge = Arc::new(priced_bridge());
    let state = Arc::new(StateStore::default());
    let (participants_tx, mut participants_rx) = tokio::sync::mpsc::channel(8);
    let orchestrator = SettlementOrchestrator::new(
        bridge.clone(),
        state,
        Arc::new(EventLog::new()),
        Arc::new(LatencyTracker::new(
            BreakerConfig::default(),
            BypassConfig::default(),
        )),
        SettlementConfig::default(),
        PhantomConfig::default(),
    )
    .with_phantom_participants(participants_tx);

    // A bidder offering 200 bps over the baseline; the grant is clamped to
    // the 50 bps cap.
    tokio::spawn(async move {
        while let Some(handle) = participants_rx.recv().await {
            for (bidder, price) in [("searcher-1", dec!(102)), ("searcher-2", dec!(101))] {
                let bidder_id = BidderId::new(bidder);
                let nonce = bidder.as_bytes().to_vec();
                handle
                    .commit(bidder_id.clone(), commitment_hash(&bidder_id, price, &nonce))
                    .unwrap();
                handle.reveal(bidder_id, price, nonce).unwrap();
            }
        }
    });

    let result = orchestrator.settle(request()).await;
    assert_eq!(result.status, SettlementStatus::Completed);
    assert_eq!(result.cfmm_price, Some(dec!(100)));
    assert_eq!(result.improved_price, Some(dec!(100.5)));
    assert_eq!(result.improvement_bps, dec!(50));
    assert_eq!(result.amount_out, dec!(1005));

    let stats = orchestrator.stats();
    assert_eq!(stats.phantom_improvements, 1);
    assert_eq!(stats.average_improvement_bps(), dec!(50));
}

fn prepared(
    request_id: meridian_core::primitive::RequestId,
    amount_in: Decimal,
) -> PreparedSettlement {
    PreparedSettlement {
        request_id,
        token_in: USDC,
        token_out: WETH,
        amount_in,
        amount_out: amount_in * dec!(100),
        price: dec!(100),
        slippage: dec!(0.05),
        gas_estimate: 50_000,
        user: "alice".to_string(),
        deadline: jiff::Timestamp::from_millisecond(
            jiff::Timestamp::now().as_millisecond() + 60_000,
        )
        .unwrap(),
    }
}

#[tokio::test(start_paused = true)]
async fn batch_failure_compensates_in_reverse_and_restores_state() {
    let bridge = priced_bridge();
    // First batch step succeeds, second fails.
    bridge.fail_execution_at(1);
    let bridge = Arc::new(bridge);
    let state = Arc::new(StateStore::default());
    let event_log = Arc::new(EventLog::new());
    let atomic = AtomicSettlement::new(
        bridge.clone(),
        state.clone(),
        event_log.clone(),
        SettlementConfig::default(),
    );

    let pre_batch_version = state.version();
    let first = meridian_core::primitive::RequestId::random();
    let second = meridian_core::primitive::RequestId::random();
    let result = atomic
        .execute_batch(vec![prepared(first, dec!(10)), prepared(second, dec!(20))])
        .await
        .unwrap();

    assert_eq!(result.status, BatchStatus::Failed);
    assert!(result.executions.is_empty());
    // The completed first step was compensated and the store rewound.
    assert_eq!(state.version(), pre_batch_version);
    assert_eq!(
        state.get(&format!("balance:alice:{WETH}"), None).unwrap(),
        None,
    );
    let compensations: Vec<String> = event_log
        .query_by_type("ChainLinkExecuted")
        .iter()
        .filter_map(|event| match event.payload() {
            meridian_core::event::EventPayload::ChainLinkExecuted { description }
                if description.starts_with("compensate") =>
            {
                Some(description.clone())
            }
            _ => None,
        })
        .collect();
    assert_eq!(compensations.len(), 1);
    assert!(event_log.verify_integrity());
}

#[tokio::test(start_paused = true)]
async fn successful_batch_commits_every_step() {
    let bridge = Arc::new(priced_bridge());
    let state = Arc::new(StateStore::default());
    let atomic = AtomicSettlement::new(
        bridge.clone(),
        state.clone(),
        Arc::new(EventLog::new()),
        SettlementConfig::default(),
    );

    let result = atomic
        .execute_batch(vec![
            prepared(meridian_core::primitive::RequestId::random(), dec!(10)),
            prepared(meridian_core::primitive::RequestId::random(), dec!(5)),
        ])
        .await
        .unwrap();

    assert_eq!(result.status, BatchStatus::Completed);
    assert_eq!(result.executions.len(), 2);
    let credited = state
        .get(&format!("balance:alice:{WETH}"), None)
        .unwrap()
        .and_then(|v| v.as_decimal());
    assert_eq!(credited, Some(dec!(1500)));
}

#[tokio::test(start_paused = true)]
async fn duplicate_requests_fail_batch_validation() {
    let bridge = Arc::new(priced_bridge());
    let atomic = AtomicSettlement::new(
        bridge,
        Arc::new(StateStore::default()),
        Arc::new(EventLog::new()),
        SettlementConfig::default(),
    );
    let duplicate = meridian_core::primitive::RequestId::random();
    let err = atomic
        .execute_batch(vec![prepared(duplicate, dec!(10)), prepared(duplicate, dec!(5))])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("duplicate"));
}

#[tokio::test(start_paused = true)]
async fn spot_price_flows_through_the_cache() {
    let bridge = meridian_settlement::CachingBridge::new(priced_bridge());
    let spot = bridge.spot_price(USDC, WETH).await;
    assert_eq!(spot, Some(dec!(100)));
    // The reverse pair is answered from the cache without a bridge lookup.
    assert_eq!(bridge.cache().get(WETH, USDC), Some(dec!(0.01)));
}
