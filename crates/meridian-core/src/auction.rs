//! Auction lifecycle state and results.

use indexmap::IndexMap;
use jiff::Timestamp;
use rust_decimal::Decimal;
use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    bid::Bid,
    mechanism::Mechanism,
    primitive::{
        AuctionId,
        BidderId,
    },
    value::Value,
};

/// Lifecycle status of an auction.
///
/// Valid transitions are `Pending -> Active -> Finalizing -> Completed` and
/// `Pending | Active -> Cancelled`. Only the owning actor performs
/// transitions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuctionStatus {
    Pending,
    Active,
    Finalizing,
    Completed,
    Cancelled,
}

impl AuctionStatus {
    /// Whether the auction has reached a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl std::fmt::Display for AuctionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Finalizing => "finalizing",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// The outcome of a finalized auction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuctionResult {
    pub clearing_price: Decimal,
    /// Winning bidders in allocation order.
    pub winners: Vec<BidderId>,
    /// Quantity allocated per winner; sums to at most the effective supply
    /// at the clearing price.
    pub allocations: IndexMap<BidderId, Decimal>,
    /// Amount owed per bidder. All-pay mechanisms charge losers here too.
    pub payments: IndexMap<BidderId, Decimal>,
    pub timestamp: Timestamp,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub summary_metadata: IndexMap<String, Value>,
}

impl AuctionResult {
    /// A result with no winners, used when no bid clears the reserve.
    #[must_use]
    pub fn empty(clearing_price: Decimal) -> Self {
        Self {
            clearing_price,
            winners: Vec::new(),
            allocations: IndexMap::new(),
            payments: IndexMap::new(),
            timestamp: Timestamp::now(),
            summary_metadata: IndexMap::new(),
        }
    }
}

/// Mutable state of a live auction, exclusively owned by its actor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuctionState {
    pub auction_id: AuctionId,
    pub status: AuctionStatus,
    pub mechanism: Mechanism,
    pub reserve_price: Decimal,
    pub start_time: Timestamp,
    pub end_time: Option<Timestamp>,
    /// Accepted bids in the order the actor admitted them.
    pub current_bids: Vec<Bid>,
    pub result: Option<AuctionResult>,
}

impl AuctionState {
    #[must_use]
    pub fn new(auction_id: AuctionId, mechanism: Mechanism, reserve_price: Decimal) -> Self {
        Self {
            auction_id,
            status: AuctionStatus::Pending,
            mechanism,
            reserve_price,
            start_time: Timestamp::now(),
            end_time: None,
            current_bids: Vec::new(),
            result: None,
        }
    }
}
