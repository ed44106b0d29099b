//! Metrics for the Matching Engine
//!
//! Counters shared by the engine and the coordinator. Lifetime totals are
//! kept for reporting; health is derived from exponentially weighted
//! averages so that recent attempts dominate.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Weight of each new attempt in the recent latency and error averages
///
/// After `n` attempts an old sample keeps `(1 - HEALTH_SMOOTHING)^n` of its
/// weight: roughly 0.6% after 100 attempts.
pub const HEALTH_SMOOTHING: f64 = 0.05;

/// Simple atomic counter
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self) {
        self.add(1);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.value.store(0, Ordering::Relaxed);
    }
}

/// Histogram for tracking latencies (count/sum/min/max only)
#[derive(Debug)]
pub struct Histogram {
    count: AtomicU64,
    sum: AtomicU64,
    min: AtomicU64,
    max: AtomicU64,
}

impl Histogram {
    pub fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            sum: AtomicU64::new(0),
            min: AtomicU64::new(u64::MAX),
            max: AtomicU64::new(0),
        }
    }

    pub fn record(&self, value_us: u64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum.fetch_add(value_us, Ordering::Relaxed);
        self.min.fetch_min(value_us, Ordering::Relaxed);
        self.max.fetch_max(value_us, Ordering::Relaxed);
    }

    pub fn get_stats(&self) -> HistogramStats {
        let count = self.count.load(Ordering::Relaxed);
        let sum = self.sum.load(Ordering::Relaxed);

        HistogramStats {
            count,
            sum_us: sum,
            avg_us: if count > 0 { sum / count } else { 0 },
            min_us: if count > 0 { self.min.load(Ordering::Relaxed) } else { 0 },
            max_us: self.max.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.count.store(0, Ordering::Relaxed);
        self.sum.store(0, Ordering::Relaxed);
        self.min.store(u64::MAX, Ordering::Relaxed);
        self.max.store(0, Ordering::Relaxed);
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

/// Exponentially weighted moving average
///
/// The first sample seeds the average.
#[derive(Debug)]
pub struct Ewma {
    alpha: f64,
    value: Mutex<Option<f64>>,
}

impl Ewma {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(f64::MIN_POSITIVE, 1.0),
            value: Mutex::new(None),
        }
    }

    pub fn record(&self, sample: f64) {
        let mut value = self.value.lock();
        *value = Some(match *value {
            Some(prev) => prev + self.alpha * (sample - prev),
            None => sample,
        });
    }

    pub fn get(&self) -> f64 {
        self.value.lock().unwrap_or(0.0)
    }

    pub fn reset(&self) {
        *self.value.lock() = None;
    }
}

impl Default for Ewma {
    fn default() -> Self {
        Self::new(HEALTH_SMOOTHING)
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct HistogramStats {
    pub count: u64,
    pub sum_us: u64,
    pub avg_us: u64,
    pub min_us: u64,
    pub max_us: u64,
}

/// Metrics for the matching engine and the cancellation coordinator
#[derive(Debug, Default)]
pub struct EngineMetrics {
    pub match_attempts: Counter,
    /// Attempts that failed for a system reason (store, conflict, persist)
    pub match_failures: Counter,
    /// Compare-and-swap collisions, including ones resolved by retry
    pub conflicts: Counter,
    pub matches_created: Counter,
    pub coins_matched: Counter,
    pub cancellations: Counter,
    pub refunds: Counter,
    pub coins_refunded: Counter,
    pub refund_failures: Counter,
    pub match_latency: Histogram,
    /// Recent match latency in microseconds
    pub recent_latency_us: Ewma,
    /// Recent share of attempts that failed for a system reason
    pub recent_errors: Ewma,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_attempt(&self) {
        self.match_attempts.increment();
    }

    /// Close out one match attempt
    pub fn record_outcome(&self, duration: Duration, failed: bool) {
        let us = duration.as_micros().min(u128::from(u64::MAX)) as u64;
        self.match_latency.record(us);
        self.recent_latency_us.record(us as f64);
        self.recent_errors.record(if failed { 1.0 } else { 0.0 });
        if failed {
            self.match_failures.increment();
        }
    }

    pub fn record_conflict(&self) {
        self.conflicts.increment();
    }

    pub fn record_match(&self, amount: u32) {
        self.matches_created.increment();
        self.coins_matched.add(u64::from(amount));
    }

    pub fn record_cancellation(&self) {
        self.cancellations.increment();
    }

    pub fn record_refund(&self, amount: u32) {
        self.refunds.increment();
        self.coins_refunded.add(u64::from(amount));
    }

    pub fn record_refund_failure(&self) {
        self.refund_failures.increment();
    }

    /// Fraction of all match attempts that failed for a system reason
    pub fn error_rate(&self) -> f64 {
        let attempts = self.match_attempts.get();
        if attempts == 0 {
            0.0
        } else {
            self.match_failures.get() as f64 / attempts as f64
        }
    }

    pub fn snapshot(&self) -> EngineMetricsSnapshot {
        let latency = self.match_latency.get_stats();

        EngineMetricsSnapshot {
            match_attempts: self.match_attempts.get(),
            match_failures: self.match_failures.get(),
            conflicts: self.conflicts.get(),
            matches_created: self.matches_created.get(),
            coins_matched: self.coins_matched.get(),
            cancellations: self.cancellations.get(),
            refunds: self.refunds.get(),
            coins_refunded: self.coins_refunded.get(),
            refund_failures: self.refund_failures.get(),
            match_latency_avg_us: latency.avg_us,
            match_latency_max_us: latency.max_us,
            error_rate: self.error_rate(),
            recent_latency_us: self.recent_latency_us.get().round() as u64,
            recent_error_rate: self.recent_errors.get(),
        }
    }

    pub fn reset(&self) {
        self.match_attempts.reset();
        self.match_failures.reset();
        self.conflicts.reset();
        self.matches_created.reset();
        self.coins_matched.reset();
        self.cancellations.reset();
        self.refunds.reset();
        self.coins_refunded.reset();
        self.refund_failures.reset();
        self.match_latency.reset();
        self.recent_latency_us.reset();
        self.recent_errors.reset();
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct EngineMetricsSnapshot {
    pub match_attempts: u64,
    pub match_failures: u64,
    pub conflicts: u64,
    pub matches_created: u64,
    pub coins_matched: u64,
    pub cancellations: u64,
    pub refunds: u64,
    pub coins_refunded: u64,
    pub refund_failures: u64,
    pub match_latency_avg_us: u64,
    pub match_latency_max_us: u64,
    /// Lifetime failure share
    pub error_rate: f64,
    /// Weighted toward recent attempts; drives health
    pub recent_latency_us: u64,
    pub recent_error_rate: f64,
}
