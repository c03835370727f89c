//! The mailbox consumer behind an [`super::AuctionHandle`].

use std::sync::Arc;

use jiff::Timestamp;
use meridian_core::{
    event::EventPayload,
    AuctionState,
    AuctionStatus,
    Bid,
};
use meridian_eventlog::EventLog;
use tokio::{
    select,
    sync::{
        mpsc,
        watch,
    },
};
use tokio_util::sync::CancellationToken;
use tracing::{
    debug,
    info,
    instrument,
    warn,
};

use super::{
    AuctionOutcome,
    Message,
};
use crate::kernel;

pub(crate) struct Worker {
    pub(crate) state: AuctionState,
    pub(crate) event_log: Arc<EventLog>,
    pub(crate) messages: mpsc::Receiver<Message>,
    pub(crate) outcome: watch::Sender<Option<AuctionOutcome>>,
    pub(crate) shutdown_token: CancellationToken,
}

impl Worker {
    pub(crate) async fn run(mut self) {
        self.activate();
        loop {
            select! {
                biased;

                () = self.shutdown_token.cancelled() => {
                    debug!(auction_id = %self.state.auction_id, "auction actor shutting down");
                    break;
                }

                message = self.messages.recv() => {
                    let Some(message) = message else {
                        // All handles dropped; nothing can reach this auction
                        // anymore.
                        break;
                    };
                    self.handle_message(message);
                }
            }
        }
    }

    /// Opens the auction for bids. Runs before the first message is popped
    /// so producers can never observe a registered-but-pending auction.
    fn activate(&mut self) {
        self.state.status = AuctionStatus::Active;
        self.event_log.append(
            self.state.auction_id,
            EventPayload::AuctionStarted {
                mechanism: self.state.mechanism.tag().to_string(),
            },
        );
        info!(
            auction_id = %self.state.auction_id,
            mechanism = self.state.mechanism.tag(),
            "auction opened for bids",
        );
    }

    fn handle_message(&mut self, message: Message) {
        match message {
            Message::Bid(bid) => self.handle_bid(bid),
            Message::Finalize { force } => self.handle_finalize(force),
            Message::Cancel { reason } => self.handle_cancel(reason),
            Message::Query { reply } => {
                // The requester may have given up; that is not our problem.
                let _ = reply.send(self.state.clone());
            }
        }
    }

    #[instrument(skip_all, fields(auction_id = %self.state.auction_id, bidder_id = %bid.bidder_id()))]
    fn handle_bid(&mut self, bid: Bid) {
        if self.state.status != AuctionStatus::Active {
            debug!(status = %self.state.status, "rejecting bid for inactive auction");
            self.event_log.append(
                self.state.auction_id,
                EventPayload::BidRejected {
                    bid_id: bid.id(),
                    bidder_id: bid.bidder_id().clone(),
                    reason: format!("auction not active (status {})", self.state.status),
                },
            );
            return;
        }
        self.event_log.append(
            self.state.auction_id,
            EventPayload::BidSubmitted { bid: bid.clone() },
        );
        self.state.current_bids.push(bid);
    }

    #[instrument(skip_all, fields(auction_id = %self.state.auction_id, force))]
    fn handle_finalize(&mut self, force: bool) {
        match self.state.status {
            AuctionStatus::Active => {}
            AuctionStatus::Pending if force => {}
            status if status.is_terminal() => {
                debug!(%status, "ignoring finalize for terminal auction");
                return;
            }
            status => {
                warn!(%status, "ignoring finalize for auction that is not active");
                return;
            }
        }
        self.state.status = AuctionStatus::Finalizing;
        let result = kernel::run_auction(
            &self.state.mechanism,
            &self.state.current_bids,
            self.state.reserve_price,
        );
        self.event_log.append(
            self.state.auction_id,
            EventPayload::AuctionFinalized {
                result: result.clone(),
            },
        );
        let at = Timestamp::now();
        self.state.end_time = Some(at);
        self.state.result = Some(result.clone());
        self.state.status = AuctionStatus::Completed;
        info!(
            num_bids = self.state.current_bids.len(),
            num_winners = result.winners.len(),
            clearing_price = %result.clearing_price,
            "auction finalized",
        );
        let _ = self.outcome.send(Some(AuctionOutcome::Finalized { result, at }));
    }

    #[instrument(skip_all, fields(auction_id = %self.state.auction_id))]
    fn handle_cancel(&mut self, reason: String) {
        if !matches!(
            self.state.status,
            AuctionStatus::Pending | AuctionStatus::Active,
        ) {
            debug!(status = %self.state.status, "ignoring cancel");
            return;
        }
        self.event_log.append(
            self.state.auction_id,
            EventPayload::AuctionCancelled {
                reason: reason.clone(),
            },
        );
        let at = Timestamp::now();
        self.state.end_time = Some(at);
        self.state.status = AuctionStatus::Cancelled;
        info!(%reason, "auction cancelled");
        let _ = self.outcome.send(Some(AuctionOutcome::Cancelled { reason, at }));
    }
}
