//! A deterministic in-memory bridge for tests.

use std::{
    collections::HashMap,
    sync::{
        atomic::{
            AtomicU32,
            AtomicU64,
            Ordering,
        },
        Mutex,
    },
};

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::{
    CfmmBridge,
    ExecutionResult,
    Route,
    TokenId,
};

/// A scriptable [`CfmmBridge`] backed by a fixed price table.
///
/// Routes are quoted at the configured price with no impact; executions
/// settle at exactly the routed price. Failures are injected explicitly via
/// [`StaticBridge::fail_next_executions`] and
/// [`StaticBridge::fail_next_routes`], never at random.
pub struct StaticBridge {
    prices: HashMap<(TokenId, TokenId), Decimal>,
    gas_estimate: u64,
    failing_executions: AtomicU32,
    failing_routes: AtomicU32,
    fail_at: Mutex<std::collections::HashSet<u64>>,
    executions: AtomicU64,
    route_queries: AtomicU64,
    executed: Mutex<Vec<(TokenId, TokenId, Decimal)>>,
}

impl StaticBridge {
    #[must_use]
    pub fn new() -> Self {
        Self {
            prices: HashMap::new(),
            gas_estimate: 50_000,
            failing_executions: AtomicU32::new(0),
            failing_routes: AtomicU32::new(0),
            fail_at: Mutex::new(std::collections::HashSet::new()),
            executions: AtomicU64::new(0),
            route_queries: AtomicU64::new(0),
            executed: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn with_price(mut self, token_in: TokenId, token_out: TokenId, price: Decimal) -> Self {
        self.prices.insert((token_in, token_out), price);
        if price > Decimal::ZERO {
            self.prices
                .entry((token_out, token_in))
                .or_insert(Decimal::ONE / price);
        }
        self
    }

    #[must_use]
    pub fn with_gas_estimate(mut self, gas_estimate: u64) -> Self {
        self.gas_estimate = gas_estimate;
        self
    }

    /// The next `n` calls to `execute_direct` return `None`.
    pub fn fail_next_executions(&self, n: u32) {
        self.failing_executions.store(n, Ordering::SeqCst);
    }

    /// The next `n` calls to `get_route` return `None`.
    pub fn fail_next_routes(&self, n: u32) {
        self.failing_routes.store(n, Ordering::SeqCst);
    }

    /// The `sequence`-th call (zero-based) to `execute_direct` returns
    /// `None`.
    pub fn fail_execution_at(&self, sequence: u64) {
        self.fail_at
            .lock()
            .expect("bridge lock poisoned")
            .insert(sequence);
    }

    #[must_use]
    pub fn execution_count(&self) -> u64 {
        self.executions.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn route_query_count(&self) -> u64 {
        self.route_queries.load(Ordering::SeqCst)
    }

    /// Successful executions in call order.
    #[must_use]
    pub fn executed_swaps(&self) -> Vec<(TokenId, TokenId, Decimal)> {
        self.executed.lock().expect("bridge lock poisoned").clone()
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for StaticBridge {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CfmmBridge for StaticBridge {
    async fn get_route(
        &self,
        token_in: TokenId,
        token_out: TokenId,
        amount: Decimal,
        _slippage: Decimal,
    ) -> Option<Route> {
        self.route_queries.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.failing_routes) {
            return None;
        }
        let price = *self.prices.get(&(token_in, token_out))?;
        Some(Route {
            price,
            amount_out: amount * price,
            path: vec![token_in, token_out],
            price_impact: Decimal::ZERO,
            gas_estimate: self.gas_estimate,
        })
    }

    async fn execute_direct(
        &self,
        token_in: TokenId,
        token_out: TokenId,
        amount: Decimal,
        _slippage: Decimal,
    ) -> Option<ExecutionResult> {
        let sequence = self.executions.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.failing_executions) {
            return None;
        }
        if self
            .fail_at
            .lock()
            .expect("bridge lock poisoned")
            .remove(&sequence)
        {
            return None;
        }
        let price = *self.prices.get(&(token_in, token_out))?;
        self.executed
            .lock()
            .expect("bridge lock poisoned")
            .push((token_in, token_out, amount));
        Some(ExecutionResult {
            price,
            amount_out: amount * price,
            gas_used: self.gas_estimate,
            tx_reference: format!("static-{sequence}"),
        })
    }

    async fn spot_price(&self, token_in: TokenId, token_out: TokenId) -> Option<Decimal> {
        self.prices.get(&(token_in, token_out)).copied()
    }
}
