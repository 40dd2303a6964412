//! Bounded-memory latency distributions
//!
//! [`LatencyHistogram`] buckets positive values on a logarithmic scale with
//! growth factor [`GROWTH`]. A value `v` lands in bucket `i` with
//! `GROWTH^(i-1) < v <= GROWTH^i` and is reported as `2 * GROWTH^i / (GROWTH + 1)`,
//! so any percentile estimate is within `(GROWTH - 1) / (GROWTH + 1)` (about
//! 0.99 %) of the exact nearest-rank value. Durations between one nanosecond
//! and a day need fewer than 2 000 buckets.

use serde::{Serialize, Serializer};
use std::collections::BTreeMap;

/// Bucket growth factor
pub const GROWTH: f64 = 1.02;

/// Values at or below this go to the zero bucket
const MIN_TRACKABLE: f64 = 1e-9;

/// Percentiles reported in summaries
pub const REPORTED_PERCENTILES: [f64; 4] = [0.50, 0.90, 0.95, 0.99];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LatencyHistogram {
    buckets: BTreeMap<i32, u64>,
    zero_count: u64,
    total: u64,
}

impl LatencyHistogram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }
        self.total += 1;
        if value <= MIN_TRACKABLE {
            self.zero_count += 1;
            return;
        }
        let index = (value.ln() / GROWTH.ln()).ceil() as i32;
        *self.buckets.entry(index).or_insert(0) += 1;
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Nearest-rank quantile estimate for `q` in `[0, 1]`
    pub fn quantile(&self, q: f64) -> Option<f64> {
        if self.total == 0 {
            return None;
        }

        let q = q.clamp(0.0, 1.0);
        let rank = ((q * self.total as f64).ceil() as u64).max(1);

        if rank <= self.zero_count {
            return Some(0.0);
        }

        let mut seen = self.zero_count;
        for (&index, &count) in &self.buckets {
            seen += count;
            if seen >= rank {
                return Some(2.0 * GROWTH.powi(index) / (GROWTH + 1.0));
            }
        }

        // Unreachable while counts add up; fall back to the top bucket
        self.buckets
            .keys()
            .next_back()
            .map(|&index| 2.0 * GROWTH.powi(index) / (GROWTH + 1.0))
    }
}

/// Running moments plus a histogram for percentiles
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DistributionStats {
    count: u64,
    sum: f64,
    sum_squares: f64,
    min: Option<f64>,
    max: Option<f64>,
    histogram: LatencyHistogram,
}

impl DistributionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }
        self.count += 1;
        self.sum += value;
        self.sum_squares += value * value;
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
        self.histogram.record(value);
    }

    pub fn record_opt(&mut self, value: Option<f64>) {
        if let Some(value) = value {
            self.record(value);
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn min(&self) -> Option<f64> {
        self.min
    }

    pub fn max(&self) -> Option<f64> {
        self.max
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    /// Population standard deviation
    pub fn std_dev(&self) -> Option<f64> {
        let mean = self.mean()?;
        let variance = (self.sum_squares / self.count as f64 - mean * mean).max(0.0);
        Some(variance.sqrt())
    }

    /// Percentile estimate clamped to the observed range
    pub fn percentile(&self, q: f64) -> Option<f64> {
        let estimate = self.histogram.quantile(q)?;
        match (self.min, self.max) {
            (Some(min), Some(max)) => Some(estimate.clamp(min, max)),
            _ => Some(estimate),
        }
    }

    pub fn summary(&self) -> DistributionSummary {
        DistributionSummary {
            count: self.count,
            sum: self.sum,
            mean: self.mean(),
            min: self.min,
            max: self.max,
            std_dev: self.std_dev(),
            p50: self.percentile(REPORTED_PERCENTILES[0]),
            p90: self.percentile(REPORTED_PERCENTILES[1]),
            p95: self.percentile(REPORTED_PERCENTILES[2]),
            p99: self.percentile(REPORTED_PERCENTILES[3]),
        }
    }
}

/// Serialized view of a distribution
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionSummary {
    pub count: u64,
    pub sum: f64,
    pub mean: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub std_dev: Option<f64>,
    pub p50: Option<f64>,
    pub p90: Option<f64>,
    pub p95: Option<f64>,
    pub p99: Option<f64>,
}

impl Serialize for DistributionStats {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.summary().serialize(serializer)
    }
}
