//! The single owner of live auction actor handles.

use std::{
    sync::Arc,
    time::Duration,
};

use jiff::Timestamp;
use meridian_core::{
    primitive::AuctionId,
    AuctionState,
    Mechanism,
};
use meridian_eventlog::EventLog;
use rust_decimal::Decimal;
use tokio::sync::{
    mpsc,
    watch,
};
use tokio_util::sync::CancellationToken;
use tracing::{
    info,
    instrument,
};

use crate::actor::{
    AuctionHandle,
    Worker,
};

/// Mailbox depth per auction actor.
const MAILBOX_CAPACITY: usize = 256;

#[derive(Clone)]
struct Entry {
    handle: AuctionHandle,
    token: CancellationToken,
}

/// Creates, indexes, and reaps auction actors.
///
/// The registry hands out [`AuctionHandle`]s to producers for the duration
/// of a send; actors never share mutable state with one another, all
/// cross-auction observation goes through the event log.
pub struct AuctionRegistry {
    event_log: Arc<EventLog>,
    actors: papaya::HashMap<AuctionId, Entry>,
    shutdown_token: CancellationToken,
}

impl AuctionRegistry {
    #[must_use]
    pub fn new(event_log: Arc<EventLog>) -> Self {
        Self {
            event_log,
            actors: papaya::HashMap::new(),
            shutdown_token: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn event_log(&self) -> &Arc<EventLog> {
        &self.event_log
    }

    /// Registers a new auction and spawns its actor, returning the handle.
    ///
    /// The mechanism must already be validated; construction of
    /// [`Mechanism`] values enforces that.
    #[instrument(skip_all, fields(mechanism = mechanism.tag(), %reserve_price))]
    pub fn open_auction(&self, mechanism: Mechanism, reserve_price: Decimal) -> AuctionHandle {
        let auction_id = AuctionId::random();
        let state = AuctionState::new(auction_id, mechanism, reserve_price);
        let (messages_tx, messages_rx) = mpsc::channel(MAILBOX_CAPACITY);
        let (outcome_tx, outcome_rx) = watch::channel(None);
        let token = self.shutdown_token.child_token();
        let worker = Worker {
            state,
            event_log: self.event_log.clone(),
            messages: messages_rx,
            outcome: outcome_tx,
            shutdown_token: token.clone(),
        };
        tokio::spawn(worker.run());
        let handle = AuctionHandle {
            auction_id,
            messages: messages_tx,
            outcome: outcome_rx,
        };
        self.actors.pin().insert(
            auction_id,
            Entry {
                handle: handle.clone(),
                token,
            },
        );
        info!(%auction_id, "registered auction");
        handle
    }

    /// The handle for a live auction, if it is still registered.
    #[must_use]
    pub fn handle(&self, auction_id: AuctionId) -> Option<AuctionHandle> {
        self.actors
            .pin()
            .get(&auction_id)
            .map(|entry| entry.handle.clone())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.actors.pin().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes actors that reached a terminal state at least `retention`
    /// ago, stopping their tasks. Returns the number of actors reaped.
    pub fn sweep_retired(&self, retention: Duration) -> usize {
        let now = Timestamp::now();
        let guard = self.actors.guard();
        let retired: Vec<AuctionId> = self
            .actors
            .iter(&guard)
            .filter_map(|(auction_id, entry)| {
                let outcome = entry.handle.try_outcome()?;
                let age_ms = now.as_millisecond() - outcome.at().as_millisecond();
                (age_ms >= 0 && age_ms as u128 >= retention.as_millis()).then_some(*auction_id)
            })
            .collect();
        drop(guard);
        let mut reaped = 0;
        let actors = self.actors.pin();
        for auction_id in retired {
            if let Some(entry) = actors.get(&auction_id) {
                entry.token.cancel();
                actors.remove(&auction_id);
                reaped += 1;
                info!(%auction_id, "reaped retired auction actor");
            }
        }
        reaped
    }

    /// Stops every actor. Handles already given out keep working until
    /// their actor observes the cancellation.
    pub fn shutdown(&self) {
        self.shutdown_token.cancel();
        self.actors.pin().clear();
    }
}
