//! Insight thresholds
//!
//! Every numeric trigger used by the rule catalog lives here. Values load
//! from the `[analysis.thresholds]` config section or a request body; any
//! field left out takes its default from [`defaults`].

use crate::services::query_analyzer::aggregator::TimeoutPolicy;
use serde::{Deserialize, Serialize};
use validator::Validate;

// ============================================================================
// Default Values
// ============================================================================

pub mod defaults {
    /// Average primary scan time that flags primary index usage
    pub const PRIMARY_INDEX_SCAN_TIME_MS: f64 = 2_000.0;

    /// Average index scan time of inefficient scans
    pub const INEFFICIENT_SCAN_TIME_MS: f64 = 2_000.0;

    /// Items a scan must read before its selectivity is judged
    pub const INEFFICIENT_SCAN_MIN_ITEMS: u64 = 10_000;

    /// Returned/scanned ratio at or below which a scan is inefficient
    pub const INEFFICIENT_SCAN_SELECTIVITY: f64 = 0.01;

    /// Fraction of non-aggregate statements without WHERE
    pub const MISSING_WHERE_FRACTION: f64 = 0.10;

    /// Server-side statement timeout
    pub const STATEMENT_TIMEOUT_MS: f64 = 75_000.0;

    /// Lower edge of the "approaching timeout" band
    pub const TIMEOUT_APPROACH_LOWER_BOUND_MS: f64 = 60_000.0;

    /// Per-request memory
    pub const HIGH_MEMORY_BYTES: u64 = 50 * 1024 * 1024;

    /// USE KEYS lookups should be near-instant
    pub const SLOW_USE_KEYS_MS: f64 = 1_000.0;

    pub const LARGE_RESULT_SIZE_BYTES: u64 = 10 * 1024 * 1024;

    pub const LARGE_RESULT_COUNT: u64 = 10_000;

    /// Fraction of SELECTs using `SELECT *`
    pub const SELECT_STAR_FRACTION: f64 = 0.25;

    /// Documents fetched per result row
    pub const FETCH_AMPLIFICATION_RATIO: f64 = 10.0;

    pub const FETCH_AMPLIFICATION_MIN_FETCHED: u64 = 1_000;

    /// Parse plus plan time
    pub const SLOW_PARSE_PLAN_MS: f64 = 100.0;

    /// Sample request ids attached to each insight
    pub const MAX_SAMPLES: usize = 10;
}

/// Rule thresholds, all configurable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default, rename_all = "camelCase")]
pub struct InsightThresholds {
    #[validate(range(min = 0.0))]
    pub primary_index_scan_time_threshold_ms: f64,

    #[validate(range(min = 0.0))]
    pub inefficient_scan_time_threshold_ms: f64,
    pub inefficient_scan_min_items: u64,
    #[validate(range(min = 0.0, max = 1.0))]
    pub inefficient_scan_selectivity: f64,

    #[validate(range(min = 0.0, max = 1.0))]
    pub missing_where_fraction: f64,

    #[validate(range(min = 1.0))]
    pub statement_timeout_ms: f64,
    #[validate(range(min = 0.0))]
    pub timeout_approach_lower_bound_ms: f64,

    pub high_memory_bytes: u64,

    #[validate(range(min = 0.0))]
    pub slow_use_keys_ms: f64,

    pub large_result_size_bytes: u64,
    pub large_result_count: u64,

    #[validate(range(min = 0.0, max = 1.0))]
    pub select_star_fraction: f64,

    #[validate(range(min = 1.0))]
    pub fetch_amplification_ratio: f64,
    pub fetch_amplification_min_fetched: u64,

    #[validate(range(min = 0.0))]
    pub slow_parse_plan_ms: f64,

    #[validate(range(min = 1, max = 1000))]
    pub max_samples: usize,
}

impl Default for InsightThresholds {
    fn default() -> Self {
        Self {
            primary_index_scan_time_threshold_ms: defaults::PRIMARY_INDEX_SCAN_TIME_MS,
            inefficient_scan_time_threshold_ms: defaults::INEFFICIENT_SCAN_TIME_MS,
            inefficient_scan_min_items: defaults::INEFFICIENT_SCAN_MIN_ITEMS,
            inefficient_scan_selectivity: defaults::INEFFICIENT_SCAN_SELECTIVITY,
            missing_where_fraction: defaults::MISSING_WHERE_FRACTION,
            statement_timeout_ms: defaults::STATEMENT_TIMEOUT_MS,
            timeout_approach_lower_bound_ms: defaults::TIMEOUT_APPROACH_LOWER_BOUND_MS,
            high_memory_bytes: defaults::HIGH_MEMORY_BYTES,
            slow_use_keys_ms: defaults::SLOW_USE_KEYS_MS,
            large_result_size_bytes: defaults::LARGE_RESULT_SIZE_BYTES,
            large_result_count: defaults::LARGE_RESULT_COUNT,
            select_star_fraction: defaults::SELECT_STAR_FRACTION,
            fetch_amplification_ratio: defaults::FETCH_AMPLIFICATION_RATIO,
            fetch_amplification_min_fetched: defaults::FETCH_AMPLIFICATION_MIN_FETCHED,
            slow_parse_plan_ms: defaults::SLOW_PARSE_PLAN_MS,
            max_samples: defaults::MAX_SAMPLES,
        }
    }
}

impl InsightThresholds {
    pub fn timeout_policy(&self) -> TimeoutPolicy {
        TimeoutPolicy {
            statement_timeout_ms: self.statement_timeout_ms,
            approach_lower_bound_ms: self.timeout_approach_lower_bound_ms,
        }
    }

    /// Field validation plus the cross-field timeout band check
    pub fn check(&self) -> Result<(), String> {
        self.validate().map_err(|e| e.to_string())?;
        if self.timeout_approach_lower_bound_ms >= self.statement_timeout_ms {
            return Err(format!(
                "timeoutApproachLowerBoundMs ({}) must be below statementTimeoutMs ({})",
                self.timeout_approach_lower_bound_ms, self.statement_timeout_ms
            ));
        }
        Ok(())
    }
}
