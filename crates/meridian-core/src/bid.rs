//! Bids submitted by auction participants.

use indexmap::IndexMap;
use jiff::Timestamp;
use rust_decimal::Decimal;
use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    primitive::{
        AuctionId,
        BidId,
        BidderId,
    },
    value::Value,
};

#[derive(Debug, thiserror::Error)]
pub enum BidError {
    #[error("bid amount must be non-negative, got `{0}`")]
    NegativeAmount(Decimal),
    #[error("bid quantity must be non-negative, got `{0}`")]
    NegativeQuantity(Decimal),
}

/// A single offer to buy `quantity` units at up to `amount` per unit.
///
/// Bids are immutable once constructed. The ingress timestamp is recorded at
/// construction and is used by time-based tie-breaking rules, so producers
/// should construct the bid at the submission boundary, not earlier.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bid {
    bid_id: BidId,
    bidder_id: BidderId,
    auction_id: AuctionId,
    amount: Decimal,
    quantity: Decimal,
    timestamp: Timestamp,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    metadata: IndexMap<String, Value>,
    /// Hint that this bid sits at the margin of the bidder's valuation.
    /// Consumed by diagnostics only; never by the clearing kernel.
    #[serde(default)]
    is_marginal: bool,
}

impl Bid {
    /// Constructs a bid with a fresh id and the current wall-clock ingress
    /// timestamp.
    ///
    /// # Errors
    /// Returns an error if `amount` or `quantity` is negative.
    pub fn new(
        bidder_id: impl Into<BidderId>,
        auction_id: AuctionId,
        amount: Decimal,
        quantity: Decimal,
    ) -> Result<Self, BidError> {
        if amount.is_sign_negative() {
            return Err(BidError::NegativeAmount(amount));
        }
        if quantity.is_sign_negative() {
            return Err(BidError::NegativeQuantity(quantity));
        }
        Ok(Self {
            bid_id: BidId::random(),
            bidder_id: bidder_id.into(),
            auction_id,
            amount,
            quantity,
            timestamp: Timestamp::now(),
            metadata: IndexMap::new(),
            is_marginal: false,
        })
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn with_marginal(mut self, is_marginal: bool) -> Self {
        self.is_marginal = is_marginal;
        self
    }

    #[must_use]
    pub fn id(&self) -> BidId {
        self.bid_id
    }

    #[must_use]
    pub fn bidder_id(&self) -> &BidderId {
        &self.bidder_id
    }

    #[must_use]
    pub fn auction_id(&self) -> AuctionId {
        self.auction_id
    }

    #[must_use]
    pub fn amount(&self) -> Decimal {
        self.amount
    }

    #[must_use]
    pub fn quantity(&self) -> Decimal {
        self.quantity
    }

    #[must_use]
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    #[must_use]
    pub fn metadata(&self) -> &IndexMap<String, Value> {
        &self.metadata
    }

    #[must_use]
    pub fn is_marginal(&self) -> bool {
        self.is_marginal
    }
}
