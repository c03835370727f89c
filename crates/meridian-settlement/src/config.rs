//! Settlement pipeline configuration.

use serde::Deserialize;

/// Tuning for the sealed-bid phantom auction.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PhantomConfig {
    /// Total auction window, commit and reveal phases together.
    pub max_auction_duration_ms: u64,
    /// Reveal window at the end of the auction.
    pub reveal_delay_ms: u64,
    /// Minimum number of revealed bidders for a result to stand.
    pub min_participants: usize,
    /// Floor for accepting an improvement over the baseline.
    pub min_improvement_bps: u32,
    /// Cap on the granted improvement; higher reveals are clamped.
    pub max_improvement_bps: u32,
}

impl Default for PhantomConfig {
    fn default() -> Self {
        Self {
            max_auction_duration_ms: 100,
            reveal_delay_ms: 20,
            min_participants: 2,
            min_improvement_bps: 10,
            max_improvement_bps: 50,
        }
    }
}

/// Tuning for the settlement orchestrator and the atomic commit phase.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SettlementConfig {
    /// Skip the phantom auction when routing already took longer than this.
    pub fallback_threshold_ms: u64,
    /// Routing and commit retry budget.
    pub max_retry_attempts: u32,
    /// Base delay of the exponential retry backoff.
    pub retry_base_delay_ms: u64,
    /// Upper bound on a single retry backoff.
    pub retry_max_delay_ms: u64,
    /// Attempt a direct execution when the atomic commit fails.
    pub fallback_enabled: bool,
    /// Routes with a higher gas estimate fail prepare validation.
    pub max_gas_estimate: u64,
    /// Maximum number of settlements in one batch.
    pub max_batch_size: usize,
    /// Batches whose summed gas estimates exceed this fail validation.
    pub max_batch_gas: u64,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            fallback_threshold_ms: 80,
            max_retry_attempts: 3,
            retry_base_delay_ms: 100,
            retry_max_delay_ms: 2_000,
            fallback_enabled: true,
            max_gas_estimate: 1_000_000,
            max_batch_size: 16,
            max_batch_gas: 5_000_000,
        }
    }
}
