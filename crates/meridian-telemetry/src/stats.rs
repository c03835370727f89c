//! Running latency aggregates with a bounded percentile reservoir.

/// Maximum samples retained per component before the reservoir is halved.
const RESERVOIR_CAP: usize = 10_000;

/// A read-only view of one component's latency distribution, all values in
/// microseconds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LatencySnapshot {
    pub count: u64,
    pub mean_us: f64,
    pub std_dev_us: f64,
    pub min_us: u64,
    pub max_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub p999_us: u64,
}

pub(crate) struct ComponentStats {
    count: u64,
    sum: f64,
    sum_sq: f64,
    min: u64,
    max: u64,
    samples: Vec<u64>,
}

impl ComponentStats {
    pub(crate) fn new() -> Self {
        Self {
            count: 0,
            sum: 0.0,
            sum_sq: 0.0,
            min: u64::MAX,
            max: 0,
            samples: Vec::new(),
        }
    }

    pub(crate) fn record(&mut self, micros: u64) {
        self.samples.push(micros);
        if self.samples.len() > RESERVOIR_CAP {
            // Keep the most recent half and rebuild the aggregates from it so
            // stale outliers age out together with their samples.
            self.samples.drain(..RESERVOIR_CAP / 2);
            self.recompute();
            return;
        }
        self.count += 1;
        let value = micros as f64;
        self.sum += value;
        self.sum_sq += value * value;
        self.min = self.min.min(micros);
        self.max = self.max.max(micros);
    }

    fn recompute(&mut self) {
        self.count = self.samples.len() as u64;
        self.sum = 0.0;
        self.sum_sq = 0.0;
        self.min = u64::MAX;
        self.max = 0;
        for &micros in &self.samples {
            let value = micros as f64;
            self.sum += value;
            self.sum_sq += value * value;
            self.min = self.min.min(micros);
            self.max = self.max.max(micros);
        }
    }

    pub(crate) fn snapshot(&self) -> LatencySnapshot {
        let count = self.count.max(1) as f64;
        let mean = self.sum / count;
        let variance = (self.sum_sq / count - mean * mean).max(0.0);
        let mut sorted = self.samples.clone();
        sorted.sort_unstable();
        LatencySnapshot {
            count: self.count,
            mean_us: if self.count == 0 { 0.0 } else { mean },
            std_dev_us: variance.sqrt(),
            min_us: if self.min == u64::MAX { 0 } else { self.min },
            max_us: self.max,
            p50_us: percentile(&sorted, 0.50),
            p95_us: percentile(&sorted, 0.95),
            p99_us: percentile(&sorted, 0.99),
            p999_us: percentile(&sorted, 0.999),
        }
    }
}

/// Nearest-rank percentile over an already sorted slice.
fn percentile(sorted: &[u64], quantile: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = (quantile * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentiles_use_nearest_rank() {
        let mut stats = ComponentStats::new();
        for micros in 1..=100 {
            stats.record(micros);
        }
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.p50_us, 50);
        assert_eq!(snapshot.p95_us, 95);
        assert_eq!(snapshot.p99_us, 99);
        assert_eq!(snapshot.p999_us, 100);
    }

    #[test]
    fn reservoir_halves_and_recomputes() {
        let mut stats = ComponentStats::new();
        for _ in 0..RESERVOIR_CAP {
            stats.record(1_000_000);
        }
        assert_eq!(stats.snapshot().max_us, 1_000_000);
        // The overflowing sample triggers the halving; the retained half no
        // longer contains only the old value.
        stats.record(10);
        let snapshot = stats.snapshot();
        assert!(snapshot.count <= (RESERVOIR_CAP / 2 + 1) as u64);
        assert_eq!(snapshot.min_us, 10);
    }

    #[test]
    fn std_dev_of_constant_samples_is_zero() {
        let mut stats = ComponentStats::new();
        for _ in 0..10 {
            stats.record(500);
        }
        assert_eq!(stats.snapshot().std_dev_us, 0.0);
    }
}
