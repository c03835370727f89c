//! Transaction handles and per-transaction bookkeeping.

use std::collections::{
    HashMap,
    HashSet,
    VecDeque,
};

use jiff::Timestamp;
use meridian_core::{
    primitive::TransactionId,
    Value,
};

/// How reads are isolated from concurrent commits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IsolationLevel {
    /// Reads always observe the latest committed value.
    ReadCommitted,
    /// The first read of a key pins its value for the transaction.
    RepeatableRead,
    /// All reads observe the state as of the transaction's start version.
    Serializable,
}

/// How a detected commit conflict is resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ConflictStrategy {
    /// Fail the commit, leaving the store untouched.
    #[default]
    Abort,
    /// Apply this transaction's writes over the conflicting state.
    LastWriteWins,
    /// The transaction with the earliest start timestamp among the active
    /// conflict set wins; later ones abort.
    FirstWriteWins,
    /// Combine the committed and staged values key by key with a caller
    /// supplied merge function.
    Merge,
}

/// Caller-visible transaction handle. The store keeps all mutable state;
/// the handle is just the key into its transaction table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TxHandle {
    pub(crate) id: TransactionId,
    pub(crate) start_version: u64,
    pub(crate) isolation: IsolationLevel,
}

impl TxHandle {
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    #[must_use]
    pub fn start_version(&self) -> u64 {
        self.start_version
    }

    #[must_use]
    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }
}

/// Store-side record of an active transaction.
pub(crate) struct TxRecord {
    pub(crate) start_version: u64,
    pub(crate) isolation: IsolationLevel,
    pub(crate) started_at: Timestamp,
    /// Keys read so far, with the value observed at first read.
    pub(crate) read_set: HashMap<String, Option<Value>>,
    /// Staged writes, applied on commit.
    pub(crate) write_set: HashMap<String, Value>,
    /// State pinned at begin for serializable reads.
    pub(crate) pinned_state: Option<HashMap<String, Value>>,
    /// Bounded ring of write-set checkpoints for retryable callers.
    pub(crate) checkpoints: VecDeque<HashMap<String, Value>>,
}

impl TxRecord {
    pub(crate) fn touched_keys(&self) -> HashSet<&str> {
        self.write_set.keys().map(String::as_str).collect()
    }
}
