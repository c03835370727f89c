//! Probabilistic bypass of optional work for persistently slow components.

use std::time::Duration;

use rand::Rng;
use serde::Deserialize;
use tracing::{
    debug,
    info,
};

/// Bypass tuning. Orthogonal to the circuit breaker: bypass skips optional
/// work at some probability while the breaker rejects mandatory work
/// entirely.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BypassConfig {
    /// Samples above this latency count as slow.
    pub bypass_threshold_ms: u64,
    /// Samples below this latency count as fast.
    pub recovery_threshold_ms: u64,
    /// Consecutive slow samples required to raise the bypass rate.
    pub slow_threshold: u32,
    /// Consecutive fast samples required to lower the bypass rate.
    pub fast_threshold: u32,
}

impl Default for BypassConfig {
    fn default() -> Self {
        Self {
            bypass_threshold_ms: 50,
            recovery_threshold_ms: 25,
            slow_threshold: 3,
            fast_threshold: 5,
        }
    }
}

/// Tracks slow/fast streaks and converts them into a bypass probability.
///
/// Each completed slow streak raises the rate by 0.1 (capped at 1.0); each
/// completed fast streak lowers it by 0.2 (floored at 0.0, at which point
/// bypassing is disabled).
pub struct AdaptiveBypass {
    config: BypassConfig,
    consecutive_slow: u32,
    consecutive_fast: u32,
    enabled: bool,
    rate: f64,
}

impl AdaptiveBypass {
    #[must_use]
    pub fn new(config: BypassConfig) -> Self {
        Self {
            config,
            consecutive_slow: 0,
            consecutive_fast: 0,
            enabled: false,
            rate: 0.0,
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Feeds one latency sample into the streak counters.
    pub fn record(&mut self, latency: Duration) {
        let slow = latency > Duration::from_millis(self.config.bypass_threshold_ms);
        let fast = latency < Duration::from_millis(self.config.recovery_threshold_ms);
        if slow {
            self.consecutive_fast = 0;
            self.consecutive_slow += 1;
            if self.consecutive_slow >= self.config.slow_threshold {
                self.consecutive_slow = 0;
                self.enabled = true;
                self.rate = (self.rate + 0.1).min(1.0);
                info!(rate = self.rate, "bypass rate raised after slow streak");
            }
        } else if fast {
            self.consecutive_slow = 0;
            self.consecutive_fast += 1;
            if self.consecutive_fast >= self.config.fast_threshold {
                self.consecutive_fast = 0;
                self.rate = (self.rate - 0.2).max(0.0);
                if self.rate == 0.0 && self.enabled {
                    self.enabled = false;
                    debug!("bypass disabled after fast streak");
                }
            }
        } else {
            // A middling sample breaks both streaks.
            self.consecutive_slow = 0;
            self.consecutive_fast = 0;
        }
    }

    /// Whether to skip optional work, drawing once from `rng`.
    #[must_use]
    pub fn should_bypass<R: Rng>(&self, rng: &mut R) -> bool {
        self.enabled && rng.gen::<f64>() < self.rate
    }
}
