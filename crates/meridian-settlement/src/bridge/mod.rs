//! The typed seam to external constant-function market makers.
//!
//! The engine never touches routing math or chain execution directly;
//! everything goes through [`CfmmBridge`]. Any operation may report "no
//! route" by returning `None`, which the orchestrator treats as a transient
//! failure and retries with backoff.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{
    Deserialize,
    Serialize,
};

mod cache;
pub mod testing;

pub use cache::{
    CachingBridge,
    PriceCache,
};

/// Identifies a token within the bridge's universe.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenId(pub u32);

impl std::fmt::Display for TokenId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "token-{}", self.0)
    }
}

/// A quoted route for an exact-in swap.
#[derive(Clone, Debug, PartialEq)]
pub struct Route {
    pub price: Decimal,
    pub amount_out: Decimal,
    pub path: Vec<TokenId>,
    pub price_impact: Decimal,
    pub gas_estimate: u64,
}

/// The outcome of an executed swap.
#[derive(Clone, Debug, PartialEq)]
pub struct ExecutionResult {
    pub price: Decimal,
    pub amount_out: Decimal,
    pub gas_used: u64,
    pub tx_reference: String,
}

/// Operations the settlement engine requires from a CFMM integration.
///
/// Implementations must be deterministic with respect to their own state:
/// `execute_direct` settles at the routed price, never at a drifted one.
#[async_trait]
pub trait CfmmBridge: Send + Sync {
    /// Quotes the best route for swapping `amount` of `token_in` into
    /// `token_out` within `slippage`.
    async fn get_route(
        &self,
        token_in: TokenId,
        token_out: TokenId,
        amount: Decimal,
        slippage: Decimal,
    ) -> Option<Route>;

    /// Executes the swap directly at the currently routed price.
    async fn execute_direct(
        &self,
        token_in: TokenId,
        token_out: TokenId,
        amount: Decimal,
        slippage: Decimal,
    ) -> Option<ExecutionResult>;

    /// The current marginal price of `token_out` per `token_in`.
    async fn spot_price(&self, token_in: TokenId, token_out: TokenId) -> Option<Decimal>;
}
