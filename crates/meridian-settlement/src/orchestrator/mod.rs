//! The settlement pipeline state machine.
//!
//! One request advances `Pending -> Routing -> Auctioning -> Preparing ->
//! Committing` and terminates in `Completed`, `Failed`, or `Cancelled`.
//! Stages execute sequentially; the request's deadline is checked at every
//! stage boundary and blowing it unwinds to `Cancelled` without committing.
//! Per-stage latencies feed the latency tracker under the `routing`,
//! `phantom`, `prepare`, and `commit` component keys; the whole pipeline
//! reports under `settlement`, whose circuit breaker fast-fails new
//! requests while open.

use std::{
    sync::{
        Arc,
        Mutex,
    },
    time::Duration,
};

use jiff::Timestamp;
use meridian_core::{
    event::EventPayload,
    primitive::RequestId,
};
use meridian_eventlog::EventLog;
use meridian_state::StateStore;
use meridian_telemetry::LatencyTracker;
use rust_decimal::Decimal;
use tokio::{
    sync::mpsc,
    time::Instant,
};
use tracing::{
    debug,
    info,
    instrument,
    warn,
};

use crate::{
    atomic::{
        AtomicSettlement,
        PreparedSettlement,
    },
    bridge::{
        CfmmBridge,
        Route,
        TokenId,
    },
    config::{
        PhantomConfig,
        SettlementConfig,
    },
    event_scope,
    phantom::{
        PhantomAuction,
        PhantomHandle,
    },
};

/// Latency tracker component keys used by the pipeline.
const COMPONENT_SETTLEMENT: &str = "settlement";
const COMPONENT_ROUTING: &str = "routing";
const COMPONENT_PHANTOM: &str = "phantom";
const COMPONENT_PREPARE: &str = "prepare";
const COMPONENT_COMMIT: &str = "commit";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SettlementStatus {
    Pending,
    Routing,
    Auctioning,
    Preparing,
    Committing,
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for SettlementStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Routing => "routing",
            Self::Auctioning => "auctioning",
            Self::Preparing => "preparing",
            Self::Committing => "committing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Why a settlement ended in `Failed`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FailureReason {
    CircuitOpen,
    NoRoute,
    Validation(String),
    Commit(String),
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CircuitOpen => f.write_str("circuit_open"),
            Self::NoRoute => f.write_str("no_route"),
            Self::Validation(detail) => write!(f, "validation: {detail}"),
            Self::Commit(detail) => write!(f, "commit: {detail}"),
        }
    }
}

/// A request to settle `amount_in` of `token_in` into `token_out`.
#[derive(Clone, Debug)]
pub struct SettlementRequest {
    pub request_id: RequestId,
    pub token_in: TokenId,
    pub token_out: TokenId,
    pub amount_in: Decimal,
    pub slippage: Decimal,
    pub user: String,
    pub deadline: Timestamp,
}

impl SettlementRequest {
    /// A request with a fresh id and the given deadline budget.
    #[must_use]
    pub fn new(
        token_in: TokenId,
        token_out: TokenId,
        amount_in: Decimal,
        slippage: Decimal,
        user: impl Into<String>,
        budget: Duration,
    ) -> Self {
        let budget_ms = i64::try_from(budget.as_millis()).unwrap_or(i64::MAX);
        let deadline = Timestamp::from_millisecond(
            Timestamp::now().as_millisecond().saturating_add(budget_ms),
        )
        .unwrap_or(Timestamp::MAX);
        Self {
            request_id: RequestId::random(),
            token_in,
            token_out,
            amount_in,
            slippage,
            user: user.into(),
            deadline,
        }
    }
}

/// Terminal report for one settlement request.
#[derive(Clone, Debug)]
pub struct SettlementResult {
    pub request_id: RequestId,
    pub status: SettlementStatus,
    pub failure: Option<FailureReason>,
    /// The baseline price quoted by the CFMM, when routing succeeded.
    pub cfmm_price: Option<Decimal>,
    /// The phantom-improved price actually settled at, if any. `None` for
    /// baseline and fallback settlements.
    pub improved_price: Option<Decimal>,
    pub amount_out: Decimal,
    pub improvement_bps: Decimal,
    pub execution_time_ms: u64,
    pub gas_used: u64,
}

/// Rolling pipeline counters.
#[derive(Clone, Debug, Default)]
pub struct OrchestratorStats {
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub fallbacks: u64,
    pub phantom_improvements: u64,
    total_improvement_bps: Decimal,
}

impl OrchestratorStats {
    /// Mean granted improvement over settlements that had one.
    #[must_use]
    pub fn average_improvement_bps(&self) -> Decimal {
        if self.phantom_improvements == 0 {
            Decimal::ZERO
        } else {
            self.total_improvement_bps / Decimal::from(self.phantom_improvements)
        }
    }
}

/// Drives settlement requests through the pipeline.
pub struct SettlementOrchestrator {
    bridge: Arc<dyn CfmmBridge>,
    atomic: AtomicSettlement,
    tracker: Arc<LatencyTracker>,
    event_log: Arc<EventLog>,
    config: SettlementConfig,
    phantom_config: PhantomConfig,
    phantom_participants: Option<mpsc::Sender<PhantomHandle>>,
    stats: Mutex<OrchestratorStats>,
}

impl SettlementOrchestrator {
    #[must_use]
    pub fn new(
        bridge: Arc<dyn CfmmBridge>,
        state: Arc<StateStore>,
        event_log: Arc<EventLog>,
        tracker: Arc<LatencyTracker>,
        config: SettlementConfig,
        phantom_config: PhantomConfig,
    ) -> Self {
        let atomic = AtomicSettlement::new(
            bridge.clone(),
            state,
            event_log.clone(),
            config.clone(),
        );
        Self {
            bridge,
            atomic,
            tracker,
            event_log,
            config,
            phantom_config,
            phantom_participants: None,
            stats: Mutex::new(OrchestratorStats::default()),
        }
    }

    /// Registers the channel through which phantom auction handles are
    /// published to bidders. Without it the phantom stage is skipped.
    #[must_use]
    pub fn with_phantom_participants(mut self, participants: mpsc::Sender<PhantomHandle>) -> Self {
        self.phantom_participants = Some(participants);
        self
    }

    #[must_use]
    pub fn stats(&self) -> OrchestratorStats {
        self.stats.lock().expect("stats lock poisoned").clone()
    }

    #[must_use]
    pub fn batch_coordinator(&self) -> &AtomicSettlement {
        &self.atomic
    }

    /// Runs one request through the pipeline to a terminal result.
    #[instrument(skip_all, fields(request_id = %request.request_id))]
    pub async fn settle(&self, request: SettlementRequest) -> SettlementResult {
        let started = Instant::now();
        self.event_log.append(
            event_scope(request.request_id),
            EventPayload::WorkflowStarted {
                request_id: request.request_id,
                workflow: "settlement".to_string(),
            },
        );

        let mut result = self.run_pipeline(&request, started).await;
        result.execution_time_ms = elapsed_ms(started);
        self.tracker.record(COMPONENT_SETTLEMENT, started.elapsed());
        self.event_log.append(
            event_scope(request.request_id),
            EventPayload::WorkflowCompleted {
                request_id: request.request_id,
                status: result
                    .failure
                    .as_ref()
                    .map_or_else(|| result.status.to_string(), ToString::to_string),
            },
        );
        self.update_stats(&result);
        result
    }

    async fn run_pipeline(
        &self,
        request: &SettlementRequest,
        started: Instant,
    ) -> SettlementResult {
        // Stage 0: fast-fail while the global breaker is open.
        if !self.tracker.allow_request(COMPONENT_SETTLEMENT) {
            warn!("settlement breaker open, fast-failing request");
            return self.failed(request, None, FailureReason::CircuitOpen);
        }

        // Stage 1: baseline route discovery with retries.
        let routing_started = Instant::now();
        let route = self.route_with_retries(request).await;
        self.tracker.record(COMPONENT_ROUTING, routing_started.elapsed());
        let Some(route) = route else {
            return self.failed(request, None, FailureReason::NoRoute);
        };
        debug!(price = %route.price, amount_out = %route.amount_out, "baseline route discovered");
        if past_deadline(request) {
            return self.cancelled(request, Some(route.price));
        }

        // Stage 2: phantom auction, if the latency budget allows it.
        let improvement = self.maybe_run_phantom(request, &route, started).await;
        if past_deadline(request) {
            return self.cancelled(request, Some(route.price));
        }

        // Stage 3: prepare and validate.
        let prepare_started = Instant::now();
        let prepared = self.prepare(request, &route, improvement.as_ref());
        self.tracker.record(COMPONENT_PREPARE, prepare_started.elapsed());
        let prepared = match prepared {
            Ok(prepared) => prepared,
            Err(reason) => return self.failed(request, Some(route.price), reason),
        };

        // Stage 4: atomic commit, with direct execution as a fallback.
        let commit_started = Instant::now();
        let committed = self.atomic.execute(prepared.clone()).await;
        self.tracker.record(COMPONENT_COMMIT, commit_started.elapsed());
        match committed {
            Ok(execution) => {
                info!(
                    amount_out = %prepared.amount_out,
                    attempts = execution.attempts,
                    "settlement completed",
                );
                SettlementResult {
                    request_id: request.request_id,
                    status: SettlementStatus::Completed,
                    failure: None,
                    cfmm_price: Some(route.price),
                    improved_price: improvement.as_ref().map(|i| i.price),
                    // The user settles at the improved price; the winner
                    // covers the spread over the CFMM leg.
                    amount_out: prepared.amount_out,
                    improvement_bps: improvement
                        .map_or(Decimal::ZERO, |i| i.improvement_bps),
                    execution_time_ms: 0,
                    gas_used: execution.gas_used,
                }
            }
            Err(err) if self.config.fallback_enabled => {
                warn!(error = %err, "atomic commit failed, attempting direct fallback");
                self.fallback(request, &route, err.to_string()).await
            }
            Err(err) => self.failed(
                request,
                Some(route.price),
                FailureReason::Commit(err.to_string()),
            ),
        }
    }

    async fn route_with_retries(&self, request: &SettlementRequest) -> Option<Route> {
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
                    "route discovery failed; retrying after backoff",
                );
                std::future::ready(())
            },
        );

        tryhard::retry_fn(|| async move {
            self.bridge
                .get_route(
                    request.token_in,
                    request.token_out,
                    request.amount_in,
                    request.slippage,
                )
                .await
                .ok_or("bridge returned no route")
        })
        .with_config(retry_cfg)
        .await
        .ok()
    }

    /// Runs the phantom stage unless the budget is blown, the bypass is
    /// active, or nobody is wired up to bid.
    async fn maybe_run_phantom(
        &self,
        request: &SettlementRequest,
        route: &Route,
        started: Instant,
    ) -> Option<Improvement> {
        let Some(participants) = &self.phantom_participants else {
            return None;
        };
        let elapsed = started.elapsed();
        if elapsed >= Duration::from_millis(self.config.fallback_threshold_ms) {
            debug!(?elapsed, "skipping phantom auction: routing consumed the budget");
            return None;
        }
        if self.tracker.should_bypass(COMPONENT_PHANTOM) {
            debug!("skipping phantom auction: adaptive bypass active");
            return None;
        }

        let phantom_started = Instant::now();
        let (auction, handle) = PhantomAuction::new(
            self.phantom_config.clone(),
            route.price,
            request.amount_in,
        );
        if participants.try_send(handle).is_err() {
            debug!("no phantom bidders reachable, keeping the baseline");
            return None;
        }
        let result = auction.run(deadline_instant(request)).await;
        self.tracker.record(COMPONENT_PHANTOM, phantom_started.elapsed());

        if result.winning_bid.is_some() {
            info!(
                price = %result.price,
                improvement_bps = %result.improvement_bps,
                num_participants = result.num_participants,
                "phantom auction improved the baseline",
            );
            Some(Improvement {
                price: result.price,
                amount_out: request.amount_in * result.price,
                improvement_bps: result.improvement_bps,
            })
        } else {
            debug!(
                num_participants = result.num_participants,
                "phantom auction kept the baseline",
            );
            None
        }
    }

    fn prepare(
        &self,
        request: &SettlementRequest,
        route: &Route,
        improvement: Option<&Improvement>,
    ) -> Result<PreparedSettlement, FailureReason> {
        let price = improvement.map_or(route.price, |i| i.price);
        let amount_out = improvement.map_or(route.amount_out, |i| i.amount_out);
        if price <= Decimal::ZERO {
            return Err(FailureReason::Validation("price must be positive".into()));
        }
        if route.price_impact > request.slippage {
            return Err(FailureReason::Validation(format!(
                "price impact {} exceeds slippage bound {}",
                route.price_impact, request.slippage,
            )));
        }
        if route.gas_estimate > self.config.max_gas_estimate {
            return Err(FailureReason::Validation(format!(
                "gas estimate {} exceeds limit {}",
                route.gas_estimate, self.config.max_gas_estimate,
            )));
        }
        if request.deadline <= Timestamp::now() {
            return Err(FailureReason::Validation("deadline already passed".into()));
        }
        Ok(PreparedSettlement {
            request_id: request.request_id,
            token_in: request.token_in,
            token_out: request.token_out,
            amount_in: request.amount_in,
            amount_out,
            price,
            slippage: request.slippage,
            gas_estimate: route.gas_estimate,
            user: request.user.clone(),
            deadline: request.deadline,
        })
    }

    /// Direct execution at the baseline route, bypassing the phantom
    /// improvement entirely.
    async fn fallback(
        &self,
        request: &SettlementRequest,
        route: &Route,
        commit_error: String,
    ) -> SettlementResult {
        let executed = self
            .bridge
            .execute_direct(
                request.token_in,
                request.token_out,
                request.amount_in,
                request.slippage,
            )
            .await;
        match executed {
            Some(execution) => {
                info!(amount_out = %execution.amount_out, "fallback execution succeeded");
                self.stats.lock().expect("stats lock poisoned").fallbacks += 1;
                SettlementResult {
                    request_id: request.request_id,
                    status: SettlementStatus::Completed,
                    failure: None,
                    cfmm_price: Some(route.price),
                    improved_price: None,
                    amount_out: execution.amount_out,
                    improvement_bps: Decimal::ZERO,
                    execution_time_ms: 0,
                    gas_used: execution.gas_used,
                }
            }
            None => self.failed(
                request,
                Some(route.price),
                FailureReason::Commit(commit_error),
            ),
        }
    }

    fn failed(
        &self,
        request: &SettlementRequest,
        cfmm_price: Option<Decimal>,
        reason: FailureReason,
    ) -> SettlementResult {
        SettlementResult {
            request_id: request.request_id,
            status: SettlementStatus::Failed,
            failure: Some(reason),
            cfmm_price,
            improved_price: None,
            amount_out: Decimal::ZERO,
            improvement_bps: Decimal::ZERO,
            execution_time_ms: 0,
            gas_used: 0,
        }
    }

    fn cancelled(
        &self,
        request: &SettlementRequest,
        cfmm_price: Option<Decimal>,
    ) -> SettlementResult {
        debug!("settlement deadline exceeded, unwinding");
        SettlementResult {
            request_id: request.request_id,
            status: SettlementStatus::Cancelled,
            failure: None,
            cfmm_price,
            improved_price: None,
            amount_out: Decimal::ZERO,
            improvement_bps: Decimal::ZERO,
            execution_time_ms: 0,
            gas_used: 0,
        }
    }

    fn update_stats(&self, result: &SettlementResult) {
        let mut stats = self.stats.lock().expect("stats lock poisoned");
        stats.total += 1;
        match result.status {
            SettlementStatus::Completed => stats.completed += 1,
            SettlementStatus::Cancelled => stats.cancelled += 1,
            _ => stats.failed += 1,
        }
        if result.improved_price.is_some() {
            stats.phantom_improvements += 1;
            stats.total_improvement_bps += result.improvement_bps;
        }
    }
}

struct Improvement {
    price: Decimal,
    amount_out: Decimal,
    improvement_bps: Decimal,
}

fn past_deadline(request: &SettlementRequest) -> bool {
    Timestamp::now() >= request.deadline
}

/// Converts the request's wall-clock deadline into a monotonic instant for
/// the phantom auction's timers.
fn deadline_instant(request: &SettlementRequest) -> Option<Instant> {
    let remaining_ms = request.deadline.as_millisecond() - Timestamp::now().as_millisecond();
    let remaining = u64::try_from(remaining_ms).ok()?;
    Some(Instant::now() + Duration::from_millis(remaining))
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
