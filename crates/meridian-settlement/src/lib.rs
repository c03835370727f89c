//! Post-trade settlement against external constant-function market makers.
//!
//! A settlement request flows through a fixed pipeline:
//!
//! 1. the [`orchestrator`] asks the [`bridge`] for a baseline route;
//! 2. if the latency budget allows it, a short sealed-bid [`phantom`]
//!    auction tries to beat the baseline price via commit/reveal;
//! 3. the winning (or baseline) price is handed to the [`atomic`] two-phase
//!    commit coordinator, which locks the affected pools, executes through
//!    the bridge with retries, and runs compensations on failure.
//!
//! Latencies of every stage feed the workspace latency tracker, whose
//! circuit breakers can fast-fail the whole pipeline and whose adaptive
//! bypass can skip the phantom stage while downstream components are slow.
//! Every significant transition lands in the shared event log.

pub mod atomic;
pub mod bridge;
pub mod config;
pub mod orchestrator;
pub mod phantom;

pub use bridge::{
    CachingBridge,
    CfmmBridge,
    ExecutionResult,
    Route,
    TokenId,
};
pub use config::{
    PhantomConfig,
    SettlementConfig,
};
pub use orchestrator::{
    SettlementOrchestrator,
    SettlementRequest,
    SettlementResult,
    SettlementStatus,
};
pub use phantom::{
    PhantomAuction,
    PhantomHandle,
    PhantomResult,
};

/// Workflow events of a settlement request are recorded under the log
/// scope derived from its request id.
pub(crate) fn event_scope(
    request_id: meridian_core::primitive::RequestId,
) -> meridian_core::primitive::AuctionId {
    meridian_core::primitive::AuctionId::from_uuid(*request_id.as_uuid())
}
