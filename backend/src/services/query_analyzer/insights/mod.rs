//! Insight rule engine
//!
//! A fixed catalog of threshold and pattern rules evaluated against one
//! finished analysis pass. Rules are grouped by subject:
//!
//! - `rules::query`    statement-level checks (timeouts, memory, results)
//! - `rules::index`    index scan efficiency and index metadata
//! - `rules::pattern`  statement text patterns
//! - `rules::schema`   schema inference checks
//! - `rules::advisory` placeholder rules with static advice

pub mod rule_engine;
pub mod rules;
pub mod thresholds;

pub use rule_engine::{InsightReport, RuleEngine};
pub use rules::get_all_rules;
pub use thresholds::InsightThresholds;

use crate::services::query_analyzer::aggregator::Aggregates;
use crate::services::query_analyzer::models::{Insight, QueryRecord, RuleStatus, Severity};
use crate::services::query_analyzer::parser::specialized::{IndexCatalog, SchemaCatalog};
use std::collections::BTreeMap;

// ============================================================================
// Rule Trait and Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("Missing aggregate data: {0}")]
    MissingData(String),

    #[error("Inconsistent aggregate: {0}")]
    Inconsistent(String),
}

/// Read-only view of one analysis pass
pub struct InsightContext<'a> {
    pub records: &'a [QueryRecord],
    pub aggregates: &'a Aggregates,
    pub index_catalog: &'a IndexCatalog,
    pub schema_catalog: &'a SchemaCatalog,
    pub thresholds: &'a InsightThresholds,
}

impl<'a> InsightContext<'a> {
    /// First `max_samples` request ids among `records`, in input order
    pub fn sample_ids<'r, I>(&self, records: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'r QueryRecord>,
    {
        records
            .into_iter()
            .take(self.thresholds.max_samples)
            .map(|r| r.request_id.clone())
            .collect()
    }
}

/// One catalog entry
pub trait InsightRule: Send + Sync {
    /// Stable identifier, e.g. `primary_index_usage`
    fn id(&self) -> &str;

    fn title(&self) -> &str;

    fn status(&self) -> RuleStatus;

    /// `Ok(None)` when the rule does not apply or does not trigger
    fn evaluate(&self, ctx: &InsightContext) -> Result<Option<Insight>, RuleError>;

    /// Insight skeleton carrying this rule's identity
    fn insight(
        &self,
        severity: Severity,
        description: String,
        affected_count: usize,
        sample_query_ids: Vec<String>,
    ) -> Insight {
        Insight {
            rule_id: self.id().to_string(),
            severity,
            status: self.status(),
            title: self.title().to_string(),
            description,
            affected_count,
            sample_query_ids,
            metrics: BTreeMap::new(),
            recommendation: None,
        }
    }
}

impl Insight {
    pub fn with_metric(mut self, name: &str, value: f64) -> Self {
        if value.is_finite() {
            self.metrics.insert(name.to_string(), value);
        }
        self
    }

    pub fn with_recommendation(mut self, recommendation: impl Into<String>) -> Self {
        self.recommendation = Some(recommendation.into());
        self
    }
}

// ============================================================================
// Utility Functions
// ============================================================================

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Format duration in ms to human-readable string
pub fn format_duration_ms(ms: f64) -> String {
    if ms < 1.0 {
        format!("{:.2}µs", ms * 1000.0)
    } else if ms < 1000.0 {
        format!("{:.2}ms", ms)
    } else if ms < 60000.0 {
        format!("{:.2}s", ms / 1000.0)
    } else if ms < 3600000.0 {
        format!("{:.1}m", ms / 60000.0)
    } else {
        format!("{:.1}h", ms / 3600000.0)
    }
}

pub fn format_percent(fraction: f64) -> String {
    format!("{:.1}%", fraction * 100.0)
}

/// Mean of the present values, `None` when nothing was reported
pub fn mean_of<I: IntoIterator<Item = Option<f64>>>(values: I) -> Option<f64> {
    let (sum, count) = values
        .into_iter()
        .flatten()
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_helpers() {
        assert_eq!(format_duration_ms(0.5), "500.00µs");
        assert_eq!(format_duration_ms(2_500.0), "2.50s");
        assert_eq!(format_duration_ms(90_000.0), "1.5m");
        assert_eq!(format_bytes(52_428_800), "50.00 MB");
        assert_eq!(format_percent(0.125), "12.5%");
    }

    #[test]
    fn test_mean_of_skips_absent() {
        assert_eq!(mean_of([Some(1.0), None, Some(3.0)]), Some(2.0));
        assert_eq!(mean_of([None, None]), None);
    }
}
