//! Core domain types for the meridian auction and settlement engine.
//!
//! This crate carries the shared vocabulary of the workspace: identifiers,
//! bids, auction mechanisms and their configuration, auction state and
//! results, and the payloads recorded to the event log. It deliberately
//! contains no I/O and no runtime dependencies so that the clearing kernel
//! can stay a set of pure functions over these types.

pub mod auction;
pub mod bid;
pub mod event;
pub mod mechanism;
pub mod primitive;
pub mod value;

pub use auction::{
    AuctionResult,
    AuctionState,
    AuctionStatus,
};
pub use bid::Bid;
pub use event::EventPayload;
pub use mechanism::Mechanism;
pub use primitive::{
    AuctionId,
    BidId,
    BidderId,
    EventId,
    RequestId,
    TransactionId,
};
pub use value::Value;
