//! Payloads recorded to the hash-chained event log.

use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    auction::AuctionResult,
    bid::Bid,
    primitive::{
        BidId,
        BidderId,
        RequestId,
    },
};

/// The tagged payload of a single event-log entry.
///
/// Payload variants are serialized with a stable field order; the event log
/// hashes the serialized form, so variants must remain
/// backwards-compatible once emitted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    BidSubmitted {
        bid: Bid,
    },
    BidRejected {
        bid_id: BidId,
        bidder_id: BidderId,
        reason: String,
    },
    AuctionStarted {
        mechanism: String,
    },
    AuctionFinalized {
        result: AuctionResult,
    },
    AuctionCancelled {
        reason: String,
    },
    WorkflowStarted {
        request_id: RequestId,
        workflow: String,
    },
    WorkflowCompleted {
        request_id: RequestId,
        status: String,
    },
    ChainLinkExecuted {
        description: String,
    },
}

impl EventPayload {
    /// The stable tag written to the export format and hashed into the
    /// event chain.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::BidSubmitted { .. } => "BidSubmitted",
            Self::BidRejected { .. } => "BidRejected",
            Self::AuctionStarted { .. } => "AuctionStarted",
            Self::AuctionFinalized { .. } => "AuctionFinalized",
            Self::AuctionCancelled { .. } => "AuctionCancelled",
            Self::WorkflowStarted { .. } => "WorkflowStarted",
            Self::WorkflowCompleted { .. } => "WorkflowCompleted",
            Self::ChainLinkExecuted { .. } => "ChainLinkExecuted",
        }
    }
}
