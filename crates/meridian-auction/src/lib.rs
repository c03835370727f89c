//! Auction runtime: a pure clearing kernel plus one actor per live auction.
//!
//! # Clearing kernel
//!
//! The [`kernel`] module computes clearing prices, winner allocations, and
//! payments for the supported mechanism family (first-price, Vickrey,
//! uniform-price with elastic supply, all-pay, and single-round
//! combinatorial). All kernel operations are pure functions of
//! `(mechanism, bids, reserve price)` so they can be property-tested in
//! isolation.
//!
//! # Actors
//!
//! Every live auction is owned by exactly one actor task with a bounded
//! mailbox. Producers enqueue bids through a cheaply clonable
//! [`AuctionHandle`]; the actor processes messages strictly in FIFO order and
//! appends every accepted bid, rejection, finalization, and cancellation to
//! the shared event log before touching the next message. The
//! [`AuctionRegistry`] is the single owner of actor handles and reaps
//! terminal actors after a retention period.

pub mod actor;
pub mod kernel;
mod registry;

pub use actor::{
    AuctionHandle,
    AuctionOutcome,
};
pub use registry::AuctionRegistry;
