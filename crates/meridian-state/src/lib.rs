//! A multi-version key/value store with optimistic concurrency control.
//!
//! The store hands out transaction handles pinned to the version current at
//! `begin`. Reads and writes are staged per transaction; `commit` detects
//! read-write and write-write conflicts and resolves them with a configurable
//! [`ConflictStrategy`]. Snapshots carry a SHA-256 checksum and restore
//! non-destructively after re-verification.
//!
//! A single coordinating mutex protects the version counter and the
//! transaction table; the store is deliberately coarse-grained since every
//! critical section is short and allocation-free on the read path.

use std::{
    collections::{
        HashMap,
        VecDeque,
    },
    sync::Mutex,
};

use jiff::Timestamp;
use meridian_core::{
    primitive::TransactionId,
    Value,
};
use serde::Deserialize;
use sha2::{
    Digest as _,
    Sha256,
};
use tracing::{
    debug,
    warn,
};

mod transaction;

pub use transaction::{
    ConflictStrategy,
    IsolationLevel,
    TxHandle,
};
use transaction::TxRecord;

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("transaction `{0}` is not active")]
    UnknownTransaction(TransactionId),
    #[error("commit conflicts on keys {keys:?}")]
    Conflict { keys: Vec<String> },
    #[error("no snapshot with id `{0}`")]
    UnknownSnapshot(usize),
    #[error("snapshot `{snapshot_id}` failed checksum verification")]
    ChecksumMismatch { snapshot_id: usize },
    #[error("transaction `{0}` has no checkpoint to restore")]
    NoCheckpoint(TransactionId),
}

/// Store tuning.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Maximum retained snapshots; the oldest is evicted beyond this.
    pub state_snapshot_limit: usize,
    /// Bound of the per-transaction checkpoint ring and of the committed
    /// version history.
    pub checkpoint_retention: usize,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            state_snapshot_limit: 100,
            checkpoint_retention: 10,
        }
    }
}

/// A checksummed copy of the store at one version.
#[derive(Clone, Debug)]
pub struct Snapshot {
    pub id: usize,
    pub version: u64,
    state: HashMap<String, Value>,
    checksum: [u8; 32],
}

impl Snapshot {
    #[must_use]
    pub fn checksum_hex(&self) -> String {
        hex::encode(self.checksum)
    }
}

/// Result of an invariant sweep over the committed state.
#[derive(Clone, Debug, Default)]
pub struct ValidationReport {
    pub violations: Vec<String>,
}

impl ValidationReport {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }
}

struct StoreInner {
    current: HashMap<String, Value>,
    current_version: u64,
    /// Recently committed versions, oldest first.
    history: VecDeque<(u64, HashMap<String, Value>)>,
    active: HashMap<TransactionId, TxRecord>,
    snapshots: Vec<Snapshot>,
    next_snapshot_id: usize,
}

/// The multi-version optimistic-concurrency store.
pub struct StateStore {
    config: StateConfig,
    inner: Mutex<StoreInner>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new(StateConfig::default())
    }
}

impl StateStore {
    #[must_use]
    pub fn new(config: StateConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(StoreInner {
                current: HashMap::new(),
                current_version: 0,
                history: VecDeque::new(),
                active: HashMap::new(),
                snapshots: Vec::new(),
                next_snapshot_id: 0,
            }),
        }
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.lock().expect("state store lock poisoned").current_version
    }

    /// Opens a transaction pinned to the current committed version.
    pub fn begin(&self, isolation: IsolationLevel) -> TxHandle {
        let mut inner = self.inner.lock().expect("state store lock poisoned");
        let id = TransactionId::random();
        let record = TxRecord {
            start_version: inner.current_version,
            isolation,
            started_at: Timestamp::now(),
            read_set: HashMap::new(),
            write_set: HashMap::new(),
            // Pinned for conflict detection at commit; only serializable
            // transactions also read from it.
            pinned_state: Some(inner.current.clone()),
            checkpoints: VecDeque::new(),
        };
        let handle = TxHandle {
            id,
            start_version: record.start_version,
            isolation,
        };
        inner.active.insert(id, record);
        handle
    }

    /// Reads `key`, either through `tx` (recording it in the read set) or
    /// directly from the latest committed state.
    ///
    /// # Errors
    /// Returns an error if `tx` is no longer active.
    pub fn get(&self, key: &str, tx: Option<&TxHandle>) -> Result<Option<Value>, StateError> {
        let mut inner = self.inner.lock().expect("state store lock poisoned");
        let Some(tx) = tx else {
            return Ok(inner.current.get(key).cloned());
        };
        let current_value = inner.current.get(key).cloned();
        let record = inner
            .active
            .get_mut(&tx.id)
            .ok_or(StateError::UnknownTransaction(tx.id))?;
        // A transaction always sees its own staged writes.
        if let Some(staged) = record.write_set.get(key) {
            return Ok(Some(staged.clone()));
        }
        let observed = match record.isolation {
            IsolationLevel::ReadCommitted => current_value,
            IsolationLevel::RepeatableRead => {
                if let Some(first_read) = record.read_set.get(key) {
                    return Ok(first_read.clone());
                }
                current_value
            }
            IsolationLevel::Serializable => record
                .pinned_state
                .as_ref()
                .and_then(|state| state.get(key).cloned()),
        };
        record.read_set.insert(key.to_string(), observed.clone());
        Ok(observed)
    }

    /// Writes `key`, staging into `tx` or auto-committing a new version.
    ///
    /// # Errors
    /// Returns an error if `tx` is no longer active.
    pub fn put(&self, key: &str, value: Value, tx: Option<&TxHandle>) -> Result<(), StateError> {
        let mut inner = self.inner.lock().expect("state store lock poisoned");
        match tx {
            Some(tx) => {
                let record = inner
                    .active
                    .get_mut(&tx.id)
                    .ok_or(StateError::UnknownTransaction(tx.id))?;
                record.write_set.insert(key.to_string(), value);
                Ok(())
            }
            None => {
                inner.current.insert(key.to_string(), value);
                self.bump_version(&mut inner);
                Ok(())
            }
        }
    }

    fn bump_version(&self, inner: &mut StoreInner) {
        inner.current_version += 1;
        let version = inner.current_version;
        let state = inner.current.clone();
        inner.history.push_back((version, state));
        while inner.history.len() > self.config.checkpoint_retention {
            inner.history.pop_front();
        }
    }

    /// Commits `tx` under the given conflict strategy.
    ///
    /// Returns the new committed version.
    ///
    /// # Errors
    /// Returns [`StateError::Conflict`] if conflicts were detected and the
    /// strategy does not resolve them in this transaction's favor; the
    /// transaction is removed in that case.
    pub fn commit(&self, tx: TxHandle, strategy: ConflictStrategy) -> Result<u64, StateError> {
        self.commit_inner(tx, strategy, None)
    }

    /// Commits `tx`, combining conflicting values with `merge`.
    ///
    /// # Errors
    /// Returns an error if `tx` is no longer active.
    pub fn commit_with_merge(
        &self,
        tx: TxHandle,
        merge: impl Fn(&Value, &Value) -> Value,
    ) -> Result<u64, StateError> {
        self.commit_inner(tx, ConflictStrategy::Merge, Some(&merge))
    }

    fn commit_inner(
        &self,
        tx: TxHandle,
        strategy: ConflictStrategy,
        merge: Option<&dyn Fn(&Value, &Value) -> Value>,
    ) -> Result<u64, StateError> {
        let mut inner = self.inner.lock().expect("state store lock poisoned");
        let record = inner
            .active
            .remove(&tx.id)
            .ok_or(StateError::UnknownTransaction(tx.id))?;

        let mut conflicts: Vec<String> = Vec::new();
        // (a) read-write: a read key whose committed value changed since the
        // transaction's start version.
        let pinned = record.pinned_state.as_ref();
        for key in record.read_set.keys() {
            let at_start = pinned.and_then(|state| state.get(key));
            if inner.current.get(key) != at_start {
                conflicts.push(key.clone());
            }
        }
        // (b) write-write: a staged key also staged by another active
        // transaction.
        let own_writes = record.touched_keys();
        let mut earliest_conflicting_start: Option<Timestamp> = None;
        for other in inner.active.values() {
            for key in other.write_set.keys() {
                if own_writes.contains(key.as_str()) {
                    conflicts.push(key.clone());
                    earliest_conflicting_start = Some(
                        earliest_conflicting_start
                            .map_or(other.started_at, |t| t.min(other.started_at)),
                    );
                }
            }
        }
        conflicts.sort();
        conflicts.dedup();

        if !conflicts.is_empty() {
            match strategy {
                ConflictStrategy::Abort => {
                    debug!(tx = %tx.id, ?conflicts, "aborting conflicting transaction");
                    return Err(StateError::Conflict { keys: conflicts });
                }
                ConflictStrategy::LastWriteWins => {}
                ConflictStrategy::FirstWriteWins => {
                    if let Some(earliest) = earliest_conflicting_start {
                        if earliest < record.started_at {
                            debug!(
                                tx = %tx.id,
                                "first-write-wins: an earlier transaction holds the keys"
                            );
                            return Err(StateError::Conflict { keys: conflicts });
                        }
                    }
                }
                ConflictStrategy::Merge => {
                    let Some(merge) = merge else {
                        return Err(StateError::Conflict { keys: conflicts });
                    };
                    let mut merged = record.write_set.clone();
                    for key in &conflicts {
                        if let (Some(current), Some(staged)) =
                            (inner.current.get(key), record.write_set.get(key))
                        {
                            merged.insert(key.clone(), merge(current, staged));
                        }
                    }
                    for (key, value) in merged {
                        inner.current.insert(key, value);
                    }
                    self.bump_version(&mut inner);
                    return Ok(inner.current_version);
                }
            }
        }

        for (key, value) in record.write_set {
            inner.current.insert(key, value);
        }
        self.bump_version(&mut inner);
        Ok(inner.current_version)
    }

    /// Discards `tx` and its staged writes.
    pub fn rollback(&self, tx: TxHandle) {
        let mut inner = self.inner.lock().expect("state store lock poisoned");
        inner.active.remove(&tx.id);
    }

    /// Records a checkpoint of `tx`'s staged writes.
    ///
    /// # Errors
    /// Returns an error if `tx` is no longer active.
    pub fn tx_checkpoint(&self, tx: &TxHandle) -> Result<(), StateError> {
        let mut inner = self.inner.lock().expect("state store lock poisoned");
        let retention = self.config.checkpoint_retention;
        let record = inner
            .active
            .get_mut(&tx.id)
            .ok_or(StateError::UnknownTransaction(tx.id))?;
        record.checkpoints.push_back(record.write_set.clone());
        while record.checkpoints.len() > retention {
            record.checkpoints.pop_front();
        }
        Ok(())
    }

    /// Rewinds `tx`'s staged writes to its most recent checkpoint.
    ///
    /// # Errors
    /// Returns an error if `tx` is not active or has no checkpoint.
    pub fn tx_restore_checkpoint(&self, tx: &TxHandle) -> Result<(), StateError> {
        let mut inner = self.inner.lock().expect("state store lock poisoned");
        let record = inner
            .active
            .get_mut(&tx.id)
            .ok_or(StateError::UnknownTransaction(tx.id))?;
        let checkpoint = record
            .checkpoints
            .back()
            .cloned()
            .ok_or(StateError::NoCheckpoint(tx.id))?;
        record.write_set = checkpoint;
        Ok(())
    }

    /// Takes a checksummed snapshot of the committed state.
    pub fn snapshot(&self) -> Snapshot {
        let mut inner = self.inner.lock().expect("state store lock poisoned");
        let snapshot = Snapshot {
            id: inner.next_snapshot_id,
            version: inner.current_version,
            checksum: checksum(&inner.current, inner.current_version),
            state: inner.current.clone(),
        };
        inner.next_snapshot_id += 1;
        inner.snapshots.push(snapshot.clone());
        while inner.snapshots.len() > self.config.state_snapshot_limit {
            inner.snapshots.remove(0);
        }
        snapshot
    }

    /// Restores the store to a retained snapshot, aborting every active
    /// transaction.
    ///
    /// # Errors
    /// Returns an error if the snapshot is unknown or fails checksum
    /// re-verification; the store is unchanged in both cases.
    pub fn restore(&self, snapshot_id: usize) -> Result<(), StateError> {
        let mut inner = self.inner.lock().expect("state store lock poisoned");
        let snapshot = inner
            .snapshots
            .iter()
            .find(|snapshot| snapshot.id == snapshot_id)
            .cloned()
            .ok_or(StateError::UnknownSnapshot(snapshot_id))?;
        if checksum(&snapshot.state, snapshot.version) != snapshot.checksum {
            warn!(snapshot_id, "snapshot failed checksum verification");
            return Err(StateError::ChecksumMismatch { snapshot_id });
        }
        let aborted = inner.active.len();
        if aborted > 0 {
            warn!(aborted, "aborting active transactions for snapshot restore");
        }
        inner.active.clear();
        inner.current = snapshot.state;
        inner.current_version = snapshot.version;
        Ok(())
    }

    /// Sweeps the committed state for invariant violations: numeric values
    /// under `reserve:` or `balance:` keys must be non-negative.
    #[must_use]
    pub fn validate(&self) -> ValidationReport {
        let inner = self.inner.lock().expect("state store lock poisoned");
        let mut report = ValidationReport::default();
        let mut keys: Vec<_> = inner.current.keys().collect();
        keys.sort();
        for key in keys {
            if !(key.starts_with("reserve:") || key.starts_with("balance:")) {
                continue;
            }
            let value = &inner.current[key];
            if let Some(amount) = value.as_decimal() {
                if amount.is_sign_negative() {
                    report
                        .violations
                        .push(format!("key `{key}` holds negative amount {amount}"));
                }
            }
        }
        report
    }
}

/// SHA-256 over the sorted `(key, canonical value)` pairs and the version.
fn checksum(state: &HashMap<String, Value>, version: u64) -> [u8; 32] {
    let mut keys: Vec<_> = state.keys().collect();
    keys.sort();
    let mut hasher = Sha256::new();
    for key in keys {
        hasher.update(key.as_bytes());
        let canonical =
            serde_json::to_vec(&state[key]).expect("state values always serialize");
        hasher.update(&canonical);
    }
    hasher.update(version.to_le_bytes());
    hasher.finalize().into()
}
