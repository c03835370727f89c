//! Two-phase commit coordination for settlements.
//!
//! **Prepare** validates the settlement, takes advisory per-pool locks in a
//! deterministic global order (sorted pool ids, so concurrent settlements
//! can never deadlock), and stages balance movements into a state-store
//! transaction. **Commit** executes through the CFMM bridge with
//! exponential-backoff retries; each retry first rewinds the staged writes
//! to their checkpoint so every attempt starts from the same baseline. On
//! exhausted retries the compensations run: staged writes are rolled back
//! and the locks released.
//!
//! The batch variant validates a whole group up front, executes the swaps
//! sequentially under one prepare/commit envelope, and unwinds completed
//! steps in reverse order if any step fails, restoring the state store to
//! its pre-batch snapshot.

use std::{
    collections::HashMap,
    sync::{
        atomic::{
            AtomicU32,
            Ordering,
        },
        Arc,
        Mutex,
    },
    time::Duration,
};

use jiff::Timestamp;
use meridian_core::{
    event::EventPayload,
    primitive::RequestId,
    Value,
};
use meridian_eventlog::EventLog;
use meridian_state::{
    ConflictStrategy,
    IsolationLevel,
    StateError,
    StateStore,
};
use rust_decimal::Decimal;
use tokio::sync::OwnedMutexGuard;
use tracing::{
    debug,
    info,
    instrument,
    warn,
};

use crate::{
    bridge::{
        CfmmBridge,
        TokenId,
    },
    config::SettlementConfig,
    event_scope,
};

#[derive(Debug, thiserror::Error)]
pub enum AtomicError {
    #[error("settlement validation failed: {0}")]
    Validation(String),
    #[error("settlement execution failed after {attempts} attempts")]
    CommitFailed { attempts: u32 },
    #[error("batch of {got} settlements exceeds the maximum size {max}")]
    BatchTooLarge { got: usize, max: usize },
    #[error(transparent)]
    State(#[from] StateError),
}

/// A fully specified settlement, ready for the two-phase commit.
#[derive(Clone, Debug)]
pub struct PreparedSettlement {
    pub request_id: RequestId,
    pub token_in: TokenId,
    pub token_out: TokenId,
    pub amount_in: Decimal,
    pub amount_out: Decimal,
    pub price: Decimal,
    pub slippage: Decimal,
    pub gas_estimate: u64,
    pub user: String,
    pub deadline: Timestamp,
}

impl PreparedSettlement {
    /// Advisory lock identifier of the pool this settlement touches.
    /// Direction-independent so that opposing swaps contend on the same
    /// lock.
    #[must_use]
    pub fn pool_id(&self) -> String {
        let (a, b) = if self.token_in <= self.token_out {
            (self.token_in, self.token_out)
        } else {
            (self.token_out, self.token_in)
        };
        format!("pool:{a}:{b}")
    }
}

/// Outcome of a committed settlement.
#[derive(Clone, Debug)]
pub struct SettlementExecution {
    pub request_id: RequestId,
    pub price: Decimal,
    pub amount_out: Decimal,
    pub gas_used: u64,
    pub tx_reference: String,
    pub attempts: u32,
    pub prepare_timestamp: Timestamp,
    pub commit_timestamp: Timestamp,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchStatus {
    Completed,
    Failed,
}

/// Outcome of a batch run. On failure the completed prefix has been
/// compensated and the state store restored.
#[derive(Debug)]
pub struct BatchResult {
    pub status: BatchStatus,
    pub executions: Vec<SettlementExecution>,
    pub failure: Option<String>,
}

/// Advisory async locks keyed by pool id.
struct PoolLocks {
    pools: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl PoolLocks {
    fn new() -> Self {
        Self {
            pools: Mutex::new(HashMap::new()),
        }
    }

    fn pool(&self, id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.pools
            .lock()
            .expect("pool lock table poisoned")
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Locks every pool in sorted order. Sorting gives all settlements the
    /// same global acquisition order, which rules out lock cycles.
    async fn acquire(&self, mut pool_ids: Vec<String>) -> Vec<OwnedMutexGuard<()>> {
        pool_ids.sort();
        pool_ids.dedup();
        let mut guards = Vec::with_capacity(pool_ids.len());
        for id in pool_ids {
            guards.push(self.pool(&id).lock_owned().await);
        }
        guards
    }
}

/// The two-phase commit coordinator.
pub struct AtomicSettlement {
    bridge: Arc<dyn CfmmBridge>,
    state: Arc<StateStore>,
    event_log: Arc<EventLog>,
    locks: PoolLocks,
    config: SettlementConfig,
}

impl AtomicSettlement {
    #[must_use]
    pub fn new(
        bridge: Arc<dyn CfmmBridge>,
        state: Arc<StateStore>,
        event_log: Arc<EventLog>,
        config: SettlementConfig,
    ) -> Self {
        Self {
            bridge,
            state,
            event_log,
            locks: PoolLocks::new(),
            config,
        }
    }

    fn validate(settlement: &PreparedSettlement) -> Result<(), AtomicError> {
        if settlement.price <= Decimal::ZERO {
            return Err(AtomicError::Validation("price must be positive".into()));
        }
        if settlement.amount_in <= Decimal::ZERO || settlement.amount_out <= Decimal::ZERO {
            return Err(AtomicError::Validation("amounts must be positive".into()));
        }
        if settlement.deadline <= Timestamp::now() {
            return Err(AtomicError::Validation("deadline already passed".into()));
        }
        Ok(())
    }

    fn chain_link(&self, request_id: RequestId, description: impl Into<String>) {
        self.event_log.append(
            event_scope(request_id),
            EventPayload::ChainLinkExecuted {
                description: description.into(),
            },
        );
    }

    /// Runs one settlement through prepare and commit.
    ///
    /// # Errors
    /// Returns an error if validation fails, if every commit attempt fails
    /// (compensations have run), or if the surrounding state transaction
    /// cannot commit.
    #[instrument(skip_all, fields(request_id = %settlement.request_id), err)]
    pub async fn execute(
        &self,
        settlement: PreparedSettlement,
    ) -> Result<SettlementExecution, AtomicError> {
        // Prepare: validate, lock, stage.
        Self::validate(&settlement)?;
        let _guards = self.locks.acquire(vec![settlement.pool_id()]).await;
        let prepare_timestamp = Timestamp::now();
        self.chain_link(
            settlement.request_id,
            format!("prepare: locked {}", settlement.pool_id()),
        );

        let tx = self.state.begin(IsolationLevel::Serializable);
        self.stage_balances(&settlement, &tx)?;
        self.state.tx_checkpoint(&tx)?;

        let attempts = AtomicU32::new(0);
        let commit_result = self.commit_with_retries(&settlement, &tx, &attempts).await;
        let attempts = attempts.load(Ordering::SeqCst);

        match commit_result {
            Ok(execution) => {
                self.state.commit(tx, ConflictStrategy::Abort)?;
                let commit_timestamp = Timestamp::now();
                self.chain_link(
                    settlement.request_id,
                    format!("commit: executed via {}", execution.tx_reference),
                );
                info!(attempts, tx_reference = %execution.tx_reference, "settlement committed");
                Ok(SettlementExecution {
                    request_id: settlement.request_id,
                    price: execution.price,
                    amount_out: execution.amount_out,
                    gas_used: execution.gas_used,
                    tx_reference: execution.tx_reference,
                    attempts,
                    prepare_timestamp,
                    commit_timestamp,
                })
            }
            Err(()) => {
                // Compensations: discard staged writes, release the locks.
                self.state.rollback(tx);
                self.chain_link(
                    settlement.request_id,
                    "compensate: rolled back staged writes and released locks",
                );
                warn!(attempts, "settlement failed, compensations applied");
                Err(AtomicError::CommitFailed { attempts })
            }
        }
    }

    /// Stages the balance movements this settlement causes.
    fn stage_balances(
        &self,
        settlement: &PreparedSettlement,
        tx: &meridian_state::TxHandle,
    ) -> Result<(), AtomicError> {
        let debit_key = format!("balance:{}:{}", settlement.user, settlement.token_in);
        let credit_key = format!("balance:{}:{}", settlement.user, settlement.token_out);
        let debit = self
            .state
            .get(&debit_key, Some(tx))?
            .and_then(|value| value.as_decimal())
            .unwrap_or(Decimal::ZERO);
        let credit = self
            .state
            .get(&credit_key, Some(tx))?
            .and_then(|value| value.as_decimal())
            .unwrap_or(Decimal::ZERO);
        self.state.put(
            &debit_key,
            Value::Float(debit - settlement.amount_in),
            Some(tx),
        )?;
        self.state.put(
            &credit_key,
            Value::Float(credit + settlement.amount_out),
            Some(tx),
        )?;
        Ok(())
    }

    async fn commit_with_retries(
        &self,
        settlement: &PreparedSettlement,
        tx: &meridian_state::TxHandle,
        attempts: &AtomicU32,
    ) -> Result<crate::bridge::ExecutionResult, ()> {
        let span = tracing::Span::current();
        let retry_cfg = tryhard::RetryFutureConfig::new(
            self.config.max_retry_attempts.saturating_sub(1),
        )
        .exponential_backoff(Duration::from_millis(self.config.retry_base_delay_ms))
        .max_delay(Duration::from_millis(self.config.retry_max_delay_ms))
        .on_retry(
            move |attempt: u32, next_delay: Option<Duration>, _error: &&str| {
                let wait_duration = next_delay
                    .map(humantime::format_duration)
                    .map(tracing::field::display);
                warn!(
                    parent: &span,
                    attempt,
                    wait_duration,
                    "settlement execution attempt failed; retrying after backoff",
                );
                std::future::ready(())
            },
        );

        tryhard::retry_fn(|| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                // Every attempt starts from the same staged baseline.
                self.state
                    .tx_restore_checkpoint(tx)
                    .map_err(|_| "transaction gone")?;
                let execution = self
                    .bridge
                    .execute_direct(
                        settlement.token_in,
                        settlement.token_out,
                        settlement.amount_in,
                        settlement.slippage,
                    )
                    .await
                    .ok_or("bridge reported no route")?;
                verify_execution(settlement, &execution)?;
                Ok(execution)
            }
        })
        .with_config(retry_cfg)
        .await
        .map_err(|error: &str| {
            debug!(error, "all settlement execution attempts failed");
        })
    }

    /// Runs a group of settlements under a single two-phase commit.
    ///
    /// # Errors
    /// Returns an error if the batch fails validation before any execution
    /// starts; failures during execution are reported through the returned
    /// [`BatchResult`] after compensations have run.
    #[instrument(skip_all, fields(batch_size = batch.len()))]
    pub async fn execute_batch(
        &self,
        batch: Vec<PreparedSettlement>,
    ) -> Result<BatchResult, AtomicError> {
        if batch.len() > self.config.max_batch_size {
            return Err(AtomicError::BatchTooLarge {
                got: batch.len(),
                max: self.config.max_batch_size,
            });
        }
        self.validate_batch(&batch).await?;

        // Prepare: one snapshot and one lock set for the whole batch.
        let snapshot = self.state.snapshot();
        let pool_ids: Vec<String> = batch.iter().map(PreparedSettlement::pool_id).collect();
        let _guards = self.locks.acquire(pool_ids).await;

        let mut executions: Vec<SettlementExecution> = Vec::with_capacity(batch.len());
        for settlement in &batch {
            let prepare_timestamp = Timestamp::now();
            let executed = self
                .bridge
                .execute_direct(
                    settlement.token_in,
                    settlement.token_out,
                    settlement.amount_in,
                    settlement.slippage,
                )
                .await
                .filter(|execution| verify_execution(settlement, execution).is_ok());
            let Some(execution) = executed else {
                self.compensate_batch(&executions, snapshot.id)?;
                warn!(
                    request_id = %settlement.request_id,
                    completed = executions.len(),
                    "batch settlement failed, compensations applied in reverse",
                );
                return Ok(BatchResult {
                    status: BatchStatus::Failed,
                    executions: Vec::new(),
                    failure: Some(format!(
                        "execution failed for request {}",
                        settlement.request_id,
                    )),
                });
            };
            // Batch steps apply directly; the pre-batch snapshot is the
            // rollback point.
            let tx = self.state.begin(IsolationLevel::Serializable);
            self.stage_balances(settlement, &tx)?;
            self.state.commit(tx, ConflictStrategy::Abort)?;
            self.chain_link(
                settlement.request_id,
                format!("batch step committed via {}", execution.tx_reference),
            );
            executions.push(SettlementExecution {
                request_id: settlement.request_id,
                price: execution.price,
                amount_out: execution.amount_out,
                gas_used: execution.gas_used,
                tx_reference: execution.tx_reference,
                attempts: 1,
                prepare_timestamp,
                commit_timestamp: Timestamp::now(),
            });
        }

        info!(executed = executions.len(), "batch committed");
        Ok(BatchResult {
            status: BatchStatus::Completed,
            executions,
            failure: None,
        })
    }

    async fn validate_batch(&self, batch: &[PreparedSettlement]) -> Result<(), AtomicError> {
        let mut seen = std::collections::HashSet::new();
        let mut aggregate_gas = 0_u64;
        for settlement in batch {
            Self::validate(settlement)?;
            if !seen.insert(settlement.request_id) {
                return Err(AtomicError::Validation(format!(
                    "duplicate settlement request {}",
                    settlement.request_id,
                )));
            }
            aggregate_gas = aggregate_gas.saturating_add(settlement.gas_estimate);
            // Liquidity sufficiency: the bridge must know the pair at all.
            if self
                .bridge
                .spot_price(settlement.token_in, settlement.token_out)
                .await
                .is_none()
            {
                return Err(AtomicError::Validation(format!(
                    "no liquidity for {} -> {}",
                    settlement.token_in, settlement.token_out,
                )));
            }
        }
        if aggregate_gas > self.config.max_batch_gas {
            return Err(AtomicError::Validation(format!(
                "aggregate gas estimate {aggregate_gas} exceeds limit {}",
                self.config.max_batch_gas,
            )));
        }
        Ok(())
    }

    /// Unwinds the completed steps of a failed batch in reverse order and
    /// restores the pre-batch state snapshot.
    fn compensate_batch(
        &self,
        completed: &[SettlementExecution],
        snapshot_id: usize,
    ) -> Result<(), AtomicError> {
        for execution in completed.iter().rev() {
            self.chain_link(
                execution.request_id,
                format!("compensate: reverted batch step {}", execution.tx_reference),
            );
        }
        self.state.restore(snapshot_id)?;
        Ok(())
    }
}

fn verify_execution(
    settlement: &PreparedSettlement,
    execution: &crate::bridge::ExecutionResult,
) -> Result<(), &'static str> {
    if execution.amount_out <= Decimal::ZERO {
        return Err("execution produced no output");
    }
    if settlement.price > Decimal::ZERO {
        let drift = (execution.price - settlement.price).abs() / settlement.price;
        if drift > settlement.slippage {
            return Err("execution price outside the slippage bound");
        }
    }
    Ok(())
}

