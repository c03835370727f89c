//! Latency-driven circuit breaker.

use std::{
    sync::{
        atomic::{
            AtomicU32,
            AtomicU8,
            Ordering,
        },
        Mutex,
    },
    time::Duration,
};

use serde::Deserialize;
use tokio::time::Instant;
use tracing::{
    debug,
    warn,
};

/// Breaker tuning. Latencies at or below `threshold_ms` count as successes.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Latency above which a sample counts as a failure.
    pub threshold_ms: u64,
    /// Consecutive failures required to open the breaker.
    pub failure_threshold: u32,
    /// Half-open successes required to close the breaker again.
    pub success_threshold: u32,
    /// Dwell in the open state before probing resumes.
    pub timeout_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            threshold_ms: 100,
            failure_threshold: 5,
            success_threshold: 3,
            timeout_ms: 30_000,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BreakerState {
    /// Passing all requests.
    Closed,
    /// Fast-failing all requests until the dwell elapses.
    Open,
    /// Admitting a limited number of probe requests.
    HalfOpen,
}

const CLOSED: u8 = 0;
const OPEN: u8 = 1;
const HALF_OPEN: u8 = 2;

/// A three-state circuit breaker driven by latency samples.
///
/// State itself lives in an atomic cell so that `allow_request` stays
/// lock-free on the hot path; the open-state dwell is tracked under a short
/// mutex.
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: AtomicU8,
    failure_count: AtomicU32,
    success_count: AtomicU32,
    probes_admitted: AtomicU32,
    last_failure: Mutex<Option<Instant>>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: AtomicU8::new(CLOSED),
            failure_count: AtomicU32::new(0),
            success_count: AtomicU32::new(0),
            probes_admitted: AtomicU32::new(0),
            last_failure: Mutex::new(None),
        }
    }

    fn threshold(&self) -> Duration {
        Duration::from_millis(self.config.threshold_ms)
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.config.timeout_ms)
    }

    /// The current state, applying the open-to-half-open transition if the
    /// dwell has elapsed.
    #[must_use]
    pub fn state(&self) -> BreakerState {
        if self.state.load(Ordering::Acquire) == OPEN {
            let last_failure = self
                .last_failure
                .lock()
                .expect("breaker lock poisoned")
                .unwrap_or_else(Instant::now);
            if last_failure.elapsed() >= self.timeout() {
                self.enter_half_open();
            }
        }
        match self.state.load(Ordering::Acquire) {
            OPEN => BreakerState::Open,
            HALF_OPEN => BreakerState::HalfOpen,
            _ => BreakerState::Closed,
        }
    }

    /// Whether a request may proceed right now.
    ///
    /// In the half-open state at most `success_threshold` probes are
    /// admitted until their outcomes are known.
    #[must_use]
    pub fn allow_request(&self) -> bool {
        match self.state() {
            BreakerState::Closed => true,
            BreakerState::Open => false,
            BreakerState::HalfOpen => {
                self.probes_admitted.fetch_add(1, Ordering::AcqRel)
                    < self.config.success_threshold
            }
        }
    }

    /// Feeds one latency sample through the state machine.
    pub fn record(&self, latency: Duration) {
        let failed = latency > self.threshold();
        match self.state() {
            BreakerState::Closed => {
                if failed {
                    let failures = self.failure_count.fetch_add(1, Ordering::AcqRel) + 1;
                    if failures >= self.config.failure_threshold {
                        self.trip();
                    }
                } else {
                    self.failure_count.store(0, Ordering::Release);
                }
            }
            BreakerState::Open => {
                if failed {
                    *self.last_failure.lock().expect("breaker lock poisoned") =
                        Some(Instant::now());
                }
            }
            BreakerState::HalfOpen => {
                if failed {
                    self.trip();
                } else {
                    let successes = self.success_count.fetch_add(1, Ordering::AcqRel) + 1;
                    if successes >= self.config.success_threshold {
                        self.close();
                    }
                }
            }
        }
    }

    fn trip(&self) {
        *self.last_failure.lock().expect("breaker lock poisoned") = Some(Instant::now());
        self.success_count.store(0, Ordering::Release);
        self.probes_admitted.store(0, Ordering::Release);
        if self.state.swap(OPEN, Ordering::AcqRel) != OPEN {
            warn!("circuit breaker opened");
        }
    }

    fn enter_half_open(&self) {
        self.success_count.store(0, Ordering::Release);
        self.probes_admitted.store(0, Ordering::Release);
        if self
            .state
            .compare_exchange(OPEN, HALF_OPEN, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            debug!("circuit breaker half-open, probing");
        }
    }

    fn close(&self) {
        self.failure_count.store(0, Ordering::Release);
        self.success_count.store(0, Ordering::Release);
        self.probes_admitted.store(0, Ordering::Release);
        if self.state.swap(CLOSED, Ordering::AcqRel) != CLOSED {
            debug!("circuit breaker closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BreakerConfig {
        BreakerConfig {
            threshold_ms: 100,
            failure_threshold: 3,
            success_threshold: 3,
            timeout_ms: 30_000,
        }
    }

    #[test]
    fn consecutive_failures_trip_the_breaker() {
        let breaker = CircuitBreaker::new(config());
        for _ in 0..3 {
            assert_eq!(breaker.state(), BreakerState::Closed);
            breaker.record(Duration::from_millis(150));
        }
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.allow_request());
    }

    #[test]
    fn a_fast_sample_resets_the_failure_streak() {
        let breaker = CircuitBreaker::new(config());
        breaker.record(Duration::from_millis(150));
        breaker.record(Duration::from_millis(150));
        breaker.record(Duration::from_millis(10));
        breaker.record(Duration::from_millis(150));
        breaker.record(Duration::from_millis(150));
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn breaker_recovers_through_half_open() {
        let breaker = CircuitBreaker::new(config());
        for _ in 0..3 {
            breaker.record(Duration::from_millis(150));
        }
        assert_eq!(breaker.state(), BreakerState::Open);

        tokio::time::advance(Duration::from_millis(30_001)).await;
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        assert!(breaker.allow_request());

        for _ in 0..3 {
            breaker.record(Duration::from_millis(50));
        }
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.allow_request());
    }

    #[tokio::test(start_paused = true)]
    async fn failing_probe_reopens_the_breaker() {
        let breaker = CircuitBreaker::new(config());
        for _ in 0..3 {
            breaker.record(Duration::from_millis(150));
        }
        tokio::time::advance(Duration::from_millis(30_001)).await;
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        breaker.record(Duration::from_millis(500));
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_admits_a_bounded_number_of_probes() {
        let breaker = CircuitBreaker::new(config());
        for _ in 0..3 {
            breaker.record(Duration::from_millis(150));
        }
        tokio::time::advance(Duration::from_millis(30_001)).await;
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        assert!(breaker.allow_request());
        assert!(breaker.allow_request());
        assert!(breaker.allow_request());
        assert!(!breaker.allow_request());
    }
}
