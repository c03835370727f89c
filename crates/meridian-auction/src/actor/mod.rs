//! One actor per live auction.
//!
//! An auction actor owns its [`AuctionState`] exclusively and processes
//! messages from its bounded mailbox strictly in FIFO order, at most one at
//! a time. Producers talk to it through a cheaply clonable
//! [`AuctionHandle`]; bid submission, finalization, and cancellation are
//! fire-and-forget enqueues, while [`AuctionHandle::query`] and
//! [`AuctionHandle::outcome`] await replies. Every state transition is
//! appended to the shared event log before the actor picks up the next
//! message, so the log observes bids in exactly the order the actor
//! accepted them.

use eyre::WrapErr as _;
use jiff::Timestamp;
use meridian_core::{
    primitive::AuctionId,
    AuctionResult,
    AuctionState,
    Bid,
};
use tokio::sync::{
    mpsc,
    oneshot,
    watch,
};

mod worker;

pub(crate) use worker::Worker;

/// Terminal outcome of an auction, published once by its actor.
#[derive(Clone, Debug)]
pub enum AuctionOutcome {
    Finalized { result: AuctionResult, at: Timestamp },
    Cancelled { reason: String, at: Timestamp },
}

impl AuctionOutcome {
    /// When the auction reached its terminal state.
    #[must_use]
    pub fn at(&self) -> Timestamp {
        match self {
            Self::Finalized { at, .. } | Self::Cancelled { at, .. } => *at,
        }
    }

    /// The auction result, if the auction finalized rather than cancelled.
    #[must_use]
    pub fn result(&self) -> Option<&AuctionResult> {
        match self {
            Self::Finalized { result, .. } => Some(result),
            Self::Cancelled { .. } => None,
        }
    }
}

pub(crate) enum Message {
    Bid(Bid),
    Finalize { force: bool },
    Cancel { reason: String },
    Query { reply: oneshot::Sender<AuctionState> },
}

/// Producer-side handle to a running auction actor.
#[derive(Clone)]
pub struct AuctionHandle {
    pub(crate) auction_id: AuctionId,
    pub(crate) messages: mpsc::Sender<Message>,
    pub(crate) outcome: watch::Receiver<Option<AuctionOutcome>>,
}

impl AuctionHandle {
    #[must_use]
    pub fn auction_id(&self) -> AuctionId {
        self.auction_id
    }

    /// Enqueues a bid without waiting for the actor to process it.
    ///
    /// # Errors
    /// Returns an error if the mailbox is full or the actor is gone.
    pub fn submit_bid(&self, bid: Bid) -> eyre::Result<()> {
        self.messages
            .try_send(Message::Bid(bid))
            .wrap_err("failed to enqueue bid: auction mailbox full or closed")
    }

    /// Asks the actor to finalize. `force` permits finalizing an auction
    /// that never went active.
    ///
    /// # Errors
    /// Returns an error if the mailbox is full or the actor is gone.
    pub fn finalize(&self, force: bool) -> eyre::Result<()> {
        self.messages
            .try_send(Message::Finalize { force })
            .wrap_err("failed to enqueue finalize: auction mailbox full or closed")
    }

    /// Asks the actor to cancel the auction.
    ///
    /// # Errors
    /// Returns an error if the mailbox is full or the actor is gone.
    pub fn cancel(&self, reason: impl Into<String>) -> eyre::Result<()> {
        self.messages
            .try_send(Message::Cancel {
                reason: reason.into(),
            })
            .wrap_err("failed to enqueue cancel: auction mailbox full or closed")
    }

    /// A snapshot of the auction's current state.
    ///
    /// # Errors
    /// Returns an error if the actor is gone before replying.
    pub async fn query(&self) -> eyre::Result<AuctionState> {
        let (reply, response) = oneshot::channel();
        self.messages
            .send(Message::Query { reply })
            .await
            .wrap_err("failed to enqueue query: auction actor is gone")?;
        response
            .await
            .wrap_err("auction actor dropped the query reply")
    }

    /// Waits until the auction reaches a terminal state and returns its
    /// outcome. Resolves immediately if the auction is already terminal.
    ///
    /// # Errors
    /// Returns an error if the actor is gone without publishing an outcome.
    pub async fn outcome(&self) -> eyre::Result<AuctionOutcome> {
        let mut receiver = self.outcome.clone();
        let outcome = receiver
            .wait_for(Option::is_some)
            .await
            .wrap_err("auction actor is gone without publishing an outcome")?;
        Ok(outcome
            .clone()
            .expect("wait_for only returns once the outcome is set"))
    }

    /// The terminal outcome if the auction has already reached one.
    #[must_use]
    pub fn try_outcome(&self) -> Option<AuctionOutcome> {
        self.outcome.borrow().clone()
    }
}
