//! Per-component latency tracking, circuit breaking, and adaptive bypass.
//!
//! The [`LatencyTracker`] records latency samples in microseconds, keyed by
//! component name. Each component carries three cooperating pieces of state:
//!
//! * running aggregates and a bounded sample reservoir for percentile
//!   estimation, exposed as read-only [`LatencySnapshot`]s;
//! * a [`CircuitBreaker`] that fast-fails callers after a run of
//!   over-threshold samples and probes for recovery after a dwell;
//! * an [`AdaptiveBypass`] that probabilistically skips optional work (the
//!   phantom auction) while a component is persistently slow.
//!
//! Callers receive snapshots by value; the tracker owns all mutable state.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        Mutex,
        RwLock,
    },
    time::Duration,
};

mod breaker;
mod bypass;
mod stats;

pub use breaker::{
    BreakerConfig,
    BreakerState,
    CircuitBreaker,
};
pub use bypass::{
    AdaptiveBypass,
    BypassConfig,
};
pub use stats::LatencySnapshot;
use stats::ComponentStats;

/// Per-component monitor: histogram, breaker, and bypass state.
struct ComponentMonitor {
    stats: Mutex<ComponentStats>,
    breaker: CircuitBreaker,
    bypass: Mutex<AdaptiveBypass>,
}

impl ComponentMonitor {
    fn new(breaker_config: BreakerConfig, bypass_config: BypassConfig) -> Self {
        Self {
            stats: Mutex::new(ComponentStats::new()),
            breaker: CircuitBreaker::new(breaker_config),
            bypass: Mutex::new(AdaptiveBypass::new(bypass_config)),
        }
    }
}

/// Records latency samples per component and drives the per-component
/// circuit breakers and bypass controllers.
pub struct LatencyTracker {
    breaker_config: BreakerConfig,
    bypass_config: BypassConfig,
    components: RwLock<HashMap<String, Arc<ComponentMonitor>>>,
}

impl LatencyTracker {
    #[must_use]
    pub fn new(breaker_config: BreakerConfig, bypass_config: BypassConfig) -> Self {
        Self {
            breaker_config,
            bypass_config,
            components: RwLock::new(HashMap::new()),
        }
    }

    fn monitor(&self, component: &str) -> Arc<ComponentMonitor> {
        if let Some(monitor) = self
            .components
            .read()
            .expect("latency tracker lock poisoned")
            .get(component)
        {
            return monitor.clone();
        }
        let mut components = self
            .components
            .write()
            .expect("latency tracker lock poisoned");
        components
            .entry(component.to_string())
            .or_insert_with(|| {
                Arc::new(ComponentMonitor::new(
                    self.breaker_config.clone(),
                    self.bypass_config.clone(),
                ))
            })
            .clone()
    }

    /// Records one latency sample for `component`, feeding the histogram,
    /// the circuit breaker, and the bypass controller.
    pub fn record(&self, component: &str, latency: Duration) {
        let monitor = self.monitor(component);
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        monitor
            .stats
            .lock()
            .expect("component stats lock poisoned")
            .record(micros);
        monitor.breaker.record(latency);
        monitor
            .bypass
            .lock()
            .expect("bypass lock poisoned")
            .record(latency);
    }

    /// A read-only statistics snapshot for `component`, if any samples have
    /// been recorded.
    #[must_use]
    pub fn snapshot(&self, component: &str) -> Option<LatencySnapshot> {
        let components = self
            .components
            .read()
            .expect("latency tracker lock poisoned");
        let monitor = components.get(component)?;
        let stats = monitor.stats.lock().expect("component stats lock poisoned");
        Some(stats.snapshot())
    }

    /// Snapshots for every component that has recorded at least one sample.
    #[must_use]
    pub fn snapshots(&self) -> HashMap<String, LatencySnapshot> {
        let components = self
            .components
            .read()
            .expect("latency tracker lock poisoned");
        components
            .iter()
            .map(|(name, monitor)| {
                let stats = monitor.stats.lock().expect("component stats lock poisoned");
                (name.clone(), stats.snapshot())
            })
            .collect()
    }

    /// Current circuit breaker state for `component`. Components that have
    /// never recorded a sample report `Closed`.
    #[must_use]
    pub fn breaker_state(&self, component: &str) -> BreakerState {
        self.monitor(component).breaker.state()
    }

    /// Whether the breaker currently admits requests for `component`.
    #[must_use]
    pub fn allow_request(&self, component: &str) -> bool {
        self.monitor(component).breaker.allow_request()
    }

    /// Whether optional work for `component` should be skipped right now.
    ///
    /// Draws from the bypass controller's current rate; nondeterministic
    /// unless the rate is 0 or 1.
    #[must_use]
    pub fn should_bypass(&self, component: &str) -> bool {
        self.monitor(component)
            .bypass
            .lock()
            .expect("bypass lock poisoned")
            .should_bypass(&mut rand::thread_rng())
    }

    /// The bypass controller's current `(enabled, rate)` pair.
    #[must_use]
    pub fn bypass_rate(&self, component: &str) -> (bool, f64) {
        let monitor = self.monitor(component);
        let bypass = monitor.bypass.lock().expect("bypass lock poisoned");
        (bypass.is_enabled(), bypass.rate())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> LatencyTracker {
        LatencyTracker::new(BreakerConfig::default(), BypassConfig::default())
    }

    #[test]
    fn snapshot_reports_aggregates() {
        let tracker = tracker();
        for ms in [10_u64, 20, 30, 40] {
            tracker.record("routing", Duration::from_millis(ms));
        }
        let snapshot = tracker.snapshot("routing").unwrap();
        assert_eq!(snapshot.count, 4);
        assert_eq!(snapshot.min_us, 10_000);
        assert_eq!(snapshot.max_us, 40_000);
        assert_eq!(snapshot.mean_us, 25_000.0);
    }

    #[test]
    fn unknown_component_has_no_snapshot() {
        assert!(tracker().snapshot("nope").is_none());
    }

    #[test]
    fn components_are_tracked_independently() {
        let tracker = tracker();
        tracker.record("routing", Duration::from_millis(5));
        tracker.record("commit", Duration::from_millis(50));
        assert_eq!(tracker.snapshot("routing").unwrap().count, 1);
        assert_eq!(tracker.snapshot("commit").unwrap().count, 1);
        assert_eq!(tracker.snapshots().len(), 2);
    }
}
