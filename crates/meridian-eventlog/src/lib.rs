//! A hash-chained, append-only event log.
//!
//! Every event carries the SHA-256 hash of its predecessor, making the
//! sequence tamper-evident: [`EventLog::verify_integrity`] recomputes the
//! chain and detects any out-of-band mutation. The log keeps secondary
//! indexes by auction id and payload tag, supports `(timestamp, index)`
//! checkpoints with non-destructive restoration, and round-trips through a
//! canonical JSON export.
//!
//! The log is safe under concurrent callers: appends serialize behind an
//! exclusive lock, queries copy a snapshot under a shared lock, and no
//! reader ever observes a partially constructed event.

use std::{
    collections::HashMap,
    io::{
        Read,
        Write,
    },
    sync::{
        Arc,
        RwLock,
    },
};

use jiff::Timestamp;
use meridian_core::{
    event::EventPayload,
    primitive::{
        AuctionId,
        EventId,
    },
};
use serde::{
    Deserialize,
    Serialize,
};
use sha2::{
    Digest as _,
    Sha256,
};


#[derive(Debug, thiserror::Error)]
pub enum EventLogError {
    #[error("checkpoint index `{index}` is out of range for a log of `{len}` events")]
    CheckpointOutOfRange { index: usize, len: usize },
    #[error("no checkpoint with id `{0}`")]
    UnknownCheckpoint(usize),
    #[error("event at index `{index}` does not reproduce its recorded hash")]
    ChainMismatch { index: usize },
    #[error("failed to serialize event log")]
    Serialize(#[source] serde_json::Error),
    #[error("failed to parse event log export")]
    Parse(#[source] serde_json::Error),
    #[error("failed to write event log export")]
    Io(#[from] std::io::Error),
}

/// An immutable entry of the log.
///
/// Events are created exactly once by [`EventLog::append`] and never
/// modified or removed afterwards.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    event_id: EventId,
    auction_id: AuctionId,
    payload: EventPayload,
    /// Hash of the predecessor event; `None` for the first event.
    previous_hash: Option<[u8; 32]>,
    event_hash: [u8; 32],
    timestamp: Timestamp,
}

impl Event {
    #[must_use]
    pub fn id(&self) -> EventId {
        self.event_id
    }

    #[must_use]
    pub fn auction_id(&self) -> AuctionId {
        self.auction_id
    }

    #[must_use]
    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }

    #[must_use]
    pub fn previous_hash(&self) -> Option<&[u8; 32]> {
        self.previous_hash.as_ref()
    }

    #[must_use]
    pub fn hash(&self) -> &[u8; 32] {
        &self.event_hash
    }

    #[must_use]
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Computes `SHA256(event_id || auction_id || payload_tag ||
    /// canonical(payload) || previous_hash || timestamp)`.
    fn compute_hash(
        event_id: EventId,
        auction_id: AuctionId,
        payload: &EventPayload,
        previous_hash: Option<&[u8; 32]>,
        timestamp: Timestamp,
    ) -> Result<[u8; 32], EventLogError> {
        let canonical = serde_json::to_vec(payload).map_err(EventLogError::Serialize)?;
        let mut hasher = Sha256::new();
        hasher.update(event_id.to_string().as_bytes());
        hasher.update(auction_id.to_string().as_bytes());
        hasher.update(payload.tag().as_bytes());
        hasher.update(&canonical);
        if let Some(previous) = previous_hash {
            hasher.update(previous);
        }
        hasher.update(timestamp.to_string().as_bytes());
        Ok(hasher.finalize().into())
    }
}

/// A recorded `(timestamp, event index)` pair that a new log can be
/// restored from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Checkpoint {
    pub id: usize,
    pub timestamp: Timestamp,
    pub index: usize,
}

#[derive(Default)]
struct Inner {
    events: Vec<Arc<Event>>,
    by_auction: HashMap<AuctionId, Vec<usize>>,
    by_tag: HashMap<&'static str, Vec<usize>>,
    checkpoints: Vec<Checkpoint>,
}

impl Inner {
    fn push(&mut self, event: Event) {
        let index = self.events.len();
        self.by_auction
            .entry(event.auction_id)
            .or_default()
            .push(index);
        self.by_tag
            .entry(event.payload.tag())
            .or_default()
            .push(index);
        self.events.push(Arc::new(event));
    }
}

/// The append-only event store.
#[derive(Default)]
pub struct EventLog {
    inner: RwLock<Inner>,
}

impl EventLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `payload` for `auction_id`, chaining it to the current tail.
    ///
    /// Returns the id of the new event.
    pub fn append(&self, auction_id: AuctionId, payload: EventPayload) -> EventId {
        let event_id = EventId::random();
        let timestamp = Timestamp::now();
        let mut inner = self.inner.write().expect("event log lock poisoned");
        let previous_hash = inner.events.last().map(|tail| tail.event_hash);
        let event_hash = Event::compute_hash(
            event_id,
            auction_id,
            &payload,
            previous_hash.as_ref(),
            timestamp,
        )
        .expect("event payloads always serialize");
        inner.push(Event {
            event_id,
            auction_id,
            payload,
            previous_hash,
            event_hash,
            timestamp,
        });
        event_id
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().expect("event log lock poisoned").events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The hash of the most recent event, if any.
    #[must_use]
    pub fn head_hash(&self) -> Option<[u8; 32]> {
        self.inner
            .read()
            .expect("event log lock poisoned")
            .events
            .last()
            .map(|event| event.event_hash)
    }

    /// A snapshot of all events in insertion order.
    #[must_use]
    pub fn events(&self) -> Vec<Arc<Event>> {
        self.inner
            .read()
            .expect("event log lock poisoned")
            .events
            .clone()
    }

    /// Events recorded for `auction_id`, in insertion order.
    #[must_use]
    pub fn query_by_auction(&self, auction_id: AuctionId) -> Vec<Arc<Event>> {
        let inner = self.inner.read().expect("event log lock poisoned");
        inner
            .by_auction
            .get(&auction_id)
            .map(|indices| indices.iter().map(|&i| inner.events[i].clone()).collect())
            .unwrap_or_default()
    }

    /// Events whose payload tag equals `tag`, in insertion order.
    #[must_use]
    pub fn query_by_type(&self, tag: &str) -> Vec<Arc<Event>> {
        let inner = self.inner.read().expect("event log lock poisoned");
        inner
            .by_tag
            .get(tag)
            .map(|indices| indices.iter().map(|&i| inner.events[i].clone()).collect())
            .unwrap_or_default()
    }

    /// Events recorded strictly after `timestamp`, in insertion order.
    #[must_use]
    pub fn query_after(&self, timestamp: Timestamp) -> Vec<Arc<Event>> {
        let inner = self.inner.read().expect("event log lock poisoned");
        inner
            .events
            .iter()
            .filter(|event| event.timestamp > timestamp)
            .cloned()
            .collect()
    }

    /// Recomputes the whole chain.
    ///
    /// Returns false if any event's recorded predecessor hash does not match
    /// the previous event, or if recomputing an event hash does not
    /// reproduce the stored value. The log itself is left unchanged.
    #[must_use]
    pub fn verify_integrity(&self) -> bool {
        let inner = self.inner.read().expect("event log lock poisoned");
        let mut expected_previous: Option<[u8; 32]> = None;
        for (index, event) in inner.events.iter().enumerate() {
            if event.previous_hash != expected_previous {
                tracing::warn!(index, "event chain broken: previous hash mismatch");
                return false;
            }
            let Ok(recomputed) = Event::compute_hash(
                event.event_id,
                event.auction_id,
                &event.payload,
                event.previous_hash.as_ref(),
                event.timestamp,
            ) else {
                return false;
            };
            if recomputed != event.event_hash {
                tracing::warn!(index, "event chain broken: event hash mismatch");
                return false;
            }
            expected_previous = Some(event.event_hash);
        }
        true
    }

    /// Records a checkpoint at `index` and returns its id.
    ///
    /// # Errors
    /// Returns an error if `index` is out of range.
    pub fn checkpoint(&self, index: usize) -> Result<usize, EventLogError> {
        let mut inner = self.inner.write().expect("event log lock poisoned");
        let Some(event) = inner.events.get(index) else {
            return Err(EventLogError::CheckpointOutOfRange {
                index,
                len: inner.events.len(),
            });
        };
        let checkpoint = Checkpoint {
            id: inner.checkpoints.len(),
            timestamp: event.timestamp,
            index,
        };
        inner.checkpoints.push(checkpoint);
        Ok(checkpoint.id)
    }

    /// All recorded checkpoints.
    #[must_use]
    pub fn checkpoints(&self) -> Vec<Checkpoint> {
        self.inner
            .read()
            .expect("event log lock poisoned")
            .checkpoints
            .clone()
    }

    /// Produces an independent log containing events `[0..=checkpoint.index]`
    /// with its indexes rebuilt. The source log is unchanged.
    ///
    /// # Errors
    /// Returns an error if no checkpoint with `checkpoint_id` exists.
    pub fn restore(&self, checkpoint_id: usize) -> Result<Self, EventLogError> {
        let inner = self.inner.read().expect("event log lock poisoned");
        let checkpoint = inner
            .checkpoints
            .get(checkpoint_id)
            .copied()
            .ok_or(EventLogError::UnknownCheckpoint(checkpoint_id))?;
        let mut restored = Inner::default();
        for event in &inner.events[..=checkpoint.index] {
            restored.push(Event::clone(event));
        }
        Ok(Self {
            inner: RwLock::new(restored),
        })
    }

    /// Writes the canonical JSON export: an array of entries carrying the
    /// event fields with hex-encoded hashes and RFC 3339 timestamps.
    ///
    /// # Errors
    /// Returns an error if serialization or the underlying writer fails.
    pub fn export_json<W: Write>(&self, writer: W) -> Result<(), EventLogError> {
        let entries: Vec<ExportedEvent> = {
            let inner = self.inner.read().expect("event log lock poisoned");
            inner
                .events
                .iter()
                .map(|event| ExportedEvent::from_event(event))
                .collect()
        };
        serde_json::to_writer_pretty(writer, &entries).map_err(EventLogError::Serialize)
    }

    /// Parses a canonical JSON export back into a log, re-verifying the
    /// chain.
    ///
    /// # Errors
    /// Returns an error if the input is not a valid export or if any entry
    /// fails to reproduce its recorded hash.
    pub fn import_json<R: Read>(reader: R) -> Result<Self, EventLogError> {
        let entries: Vec<ExportedEvent> =
            serde_json::from_reader(reader).map_err(EventLogError::Parse)?;
        let mut inner = Inner::default();
        for (index, entry) in entries.into_iter().enumerate() {
            let event = entry.into_event(index)?;
            let recomputed = Event::compute_hash(
                event.event_id,
                event.auction_id,
                &event.payload,
                event.previous_hash.as_ref(),
                event.timestamp,
            )?;
            if recomputed != event.event_hash {
                return Err(EventLogError::ChainMismatch { index });
            }
            inner.push(event);
        }
        let log = Self {
            inner: RwLock::new(inner),
        };
        if !log.verify_integrity() {
            return Err(EventLogError::ChainMismatch { index: 0 });
        }
        Ok(log)
    }

    /// Replaces the hash stored for the event at `index`.
    ///
    /// Exists so tests can simulate out-of-band tampering; nothing in the
    /// engine calls this.
    #[cfg(test)]
    fn corrupt_event_hash(&self, index: usize, hash: [u8; 32]) {
        let mut inner = self.inner.write().expect("event log lock poisoned");
        let event = Event {
            event_hash: hash,
            ..Event::clone(&inner.events[index])
        };
        inner.events[index] = Arc::new(event);
    }
}

/// One entry of the JSON export format.
#[derive(Serialize, Deserialize)]
struct ExportedEvent {
    event_id: EventId,
    auction_id: AuctionId,
    payload_tag: String,
    payload: EventPayload,
    hash: String,
    previous_hash: String,
    timestamp: Timestamp,
}

impl ExportedEvent {
    fn from_event(event: &Event) -> Self {
        Self {
            event_id: event.event_id,
            auction_id: event.auction_id,
            payload_tag: event.payload.tag().to_string(),
            payload: event.payload.clone(),
            hash: hex::encode(event.event_hash),
            previous_hash: event
                .previous_hash
                .map(hex::encode)
                .unwrap_or_default(),
            timestamp: event.timestamp,
        }
    }

    fn into_event(self, index: usize) -> Result<Event, EventLogError> {
        let decode = |s: &str| -> Option<[u8; 32]> {
            let bytes = hex::decode(s).ok()?;
            bytes.try_into().ok()
        };
        let event_hash =
            decode(&self.hash).ok_or(EventLogError::ChainMismatch { index })?;
        let previous_hash = if self.previous_hash.is_empty() {
            None
        } else {
            Some(
                decode(&self.previous_hash)
                    .ok_or(EventLogError::ChainMismatch { index })?,
            )
        };
        Ok(Event {
            event_id: self.event_id,
            auction_id: self.auction_id,
            payload: self.payload,
            previous_hash,
            event_hash,
            timestamp: self.timestamp,
        })
    }
}
