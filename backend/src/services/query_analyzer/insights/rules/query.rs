//! Statement-level rules
//!
//! Threshold checks over individual records: timeouts, memory, result
//! sizes, USE KEYS latency and parse/plan overhead.

use super::super::{InsightContext, InsightRule, RuleError, format_bytes, format_duration_ms};
use crate::services::query_analyzer::models::{
    Insight, QueryRecord, RuleStatus, Severity, TimeoutClass,
};

fn records_where<'a, F>(ctx: &InsightContext<'a>, predicate: F) -> Vec<&'a QueryRecord>
where
    F: Fn(&QueryRecord) -> bool,
{
    ctx.records.iter().filter(|r| predicate(r)).collect()
}

// ============================================================================
// timed_out_queries
// ============================================================================

/// Requests that hit the statement timeout
pub struct TimedOutQueries;

impl InsightRule for TimedOutQueries {
    fn id(&self) -> &str {
        "timed_out_queries"
    }

    fn title(&self) -> &str {
        "Timed-out queries"
    }

    fn status(&self) -> RuleStatus {
        RuleStatus::Live
    }

    fn evaluate(&self, ctx: &InsightContext) -> Result<Option<Insight>, RuleError> {
        let policy = ctx.aggregates.timeout_policy;
        let affected = records_where(ctx, |r| policy.classify(r) == TimeoutClass::Actual);
        if affected.is_empty() {
            return Ok(None);
        }

        let expected = ctx.aggregates.global.timeouts.actual;
        if expected != affected.len() {
            return Err(RuleError::Inconsistent(format!(
                "{} timed-out records but the summary counts {}",
                affected.len(),
                expected
            )));
        }

        let groups = {
            let mut ids: Vec<&str> = affected.iter().map(|r| r.signature_id.as_str()).collect();
            ids.sort_unstable();
            ids.dedup();
            ids.len()
        };
        let description = format!(
            "{} queries from {} statement groups timed out (statement timeout {})",
            affected.len(),
            groups,
            format_duration_ms(policy.statement_timeout_ms)
        );

        Ok(Some(
            self.insight(
                Severity::Critical,
                description,
                affected.len(),
                ctx.sample_ids(affected.iter().copied()),
            )
            .with_metric("statementGroups", groups as f64)
            .with_metric("statementTimeoutMs", policy.statement_timeout_ms)
            .with_metric(
                "fatalNonTimeout",
                ctx.aggregates.global.timeouts.fatal_non_timeout as f64,
            )
            .with_recommendation(
                "Review the plans of these statements for primary or unselective scans before \
                 raising the timeout",
            ),
        ))
    }
}

// ============================================================================
// timeout_prone_queries
// ============================================================================

/// Requests that finished just below the statement timeout
pub struct TimeoutProneQueries;

impl InsightRule for TimeoutProneQueries {
    fn id(&self) -> &str {
        "timeout_prone_queries"
    }

    fn title(&self) -> &str {
        "Queries approaching the timeout"
    }

    fn status(&self) -> RuleStatus {
        RuleStatus::Live
    }

    fn evaluate(&self, ctx: &InsightContext) -> Result<Option<Insight>, RuleError> {
        let policy = ctx.aggregates.timeout_policy;
        let affected = records_where(ctx, |r| policy.classify(r) == TimeoutClass::Approaching);
        if affected.is_empty() {
            return Ok(None);
        }

        let description = format!(
            "{} queries ran between {} and {}, close to the statement timeout",
            affected.len(),
            format_duration_ms(policy.approach_lower_bound_ms),
            format_duration_ms(policy.statement_timeout_ms)
        );
        Ok(Some(
            self.insight(
                Severity::Warning,
                description,
                affected.len(),
                ctx.sample_ids(affected.iter().copied()),
            )
            .with_metric("lowerBoundMs", policy.approach_lower_bound_ms)
            .with_metric("statementTimeoutMs", policy.statement_timeout_ms)
            .with_recommendation("These statements will start failing as data grows; tune them now"),
        ))
    }
}

// ============================================================================
// high_memory_usage
// ============================================================================

pub struct HighMemoryUsage;

impl InsightRule for HighMemoryUsage {
    fn id(&self) -> &str {
        "high_memory_usage"
    }

    fn title(&self) -> &str {
        "High memory usage"
    }

    fn status(&self) -> RuleStatus {
        RuleStatus::Live
    }

    fn evaluate(&self, ctx: &InsightContext) -> Result<Option<Insight>, RuleError> {
        let threshold = ctx.thresholds.high_memory_bytes;
        let affected = records_where(ctx, |r| {
            r.resource_usage.used_memory_bytes.is_some_and(|m| m > threshold)
        });
        if affected.is_empty() {
            return Ok(None);
        }

        let peak = affected
            .iter()
            .filter_map(|r| r.resource_usage.used_memory_bytes)
            .max()
            .unwrap_or(0);
        let description = format!(
            "{} queries used more than {} of memory (peak {})",
            affected.len(),
            format_bytes(threshold),
            format_bytes(peak)
        );
        Ok(Some(
            self.insight(
                Severity::Warning,
                description,
                affected.len(),
                ctx.sample_ids(affected.iter().copied()),
            )
            .with_metric("peakBytes", peak as f64)
            .with_metric("thresholdBytes", threshold as f64)
            .with_recommendation(
                "Reduce ORDER BY and GROUP BY input with selective predicates or LIMIT, \
                 and set a per-request memory quota",
            ),
        ))
    }
}

// ============================================================================
// slow_use_keys
// ============================================================================

/// Direct key lookups that still take long
pub struct SlowUseKeys;

impl InsightRule for SlowUseKeys {
    fn id(&self) -> &str {
        "slow_use_keys"
    }

    fn title(&self) -> &str {
        "Slow USE KEYS queries"
    }

    fn status(&self) -> RuleStatus {
        RuleStatus::Live
    }

    fn evaluate(&self, ctx: &InsightContext) -> Result<Option<Insight>, RuleError> {
        let threshold = ctx.thresholds.slow_use_keys_ms;
        let affected = records_where(ctx, |r| {
            r.use_keys && r.timings.elapsed_ms.is_some_and(|e| e > threshold)
        });
        if affected.is_empty() {
            return Ok(None);
        }

        let total_use_keys = ctx.aggregates.global.use_keys_count;
        let description = format!(
            "{} of {} USE KEYS queries took longer than {}",
            affected.len(),
            total_use_keys,
            format_duration_ms(threshold)
        );
        Ok(Some(
            self.insight(
                Severity::Warning,
                description,
                affected.len(),
                ctx.sample_ids(affected.iter().copied()),
            )
            .with_metric("thresholdMs", threshold)
            .with_recommendation(
                "Large key lists or big documents slow key lookups; batch keys or use the KV API",
            ),
        ))
    }
}

// ============================================================================
// large_result_sets
// ============================================================================

pub struct LargeResultSets;

impl InsightRule for LargeResultSets {
    fn id(&self) -> &str {
        "large_result_sets"
    }

    fn title(&self) -> &str {
        "Large result sets"
    }

    fn status(&self) -> RuleStatus {
        RuleStatus::Live
    }

    fn evaluate(&self, ctx: &InsightContext) -> Result<Option<Insight>, RuleError> {
        let max_bytes = ctx.thresholds.large_result_size_bytes;
        let max_rows = ctx.thresholds.large_result_count;
        let affected = records_where(ctx, |r| {
            r.resource_usage.result_size_bytes.is_some_and(|s| s > max_bytes)
                || r.resource_usage.result_count.is_some_and(|c| c > max_rows)
        });
        if affected.is_empty() {
            return Ok(None);
        }

        let largest = affected
            .iter()
            .filter_map(|r| r.resource_usage.result_size_bytes)
            .max()
            .unwrap_or(0);
        let description = format!(
            "{} queries streamed more than {} rows or {} (largest {})",
            affected.len(),
            max_rows,
            format_bytes(max_bytes),
            format_bytes(largest)
        );
        Ok(Some(
            self.insight(
                Severity::Warning,
                description,
                affected.len(),
                ctx.sample_ids(affected.iter().copied()),
            )
            .with_metric("largestResultBytes", largest as f64)
            .with_recommendation("Paginate with LIMIT/OFFSET or keyset pagination and project only needed fields"),
        ))
    }
}

// ============================================================================
// slow_parse_plan
// ============================================================================

/// Parse and plan phases that dominate short queries
pub struct SlowParsePlan;

impl InsightRule for SlowParsePlan {
    fn id(&self) -> &str {
        "slow_parse_plan"
    }

    fn title(&self) -> &str {
        "Slow parse and plan phases"
    }

    fn status(&self) -> RuleStatus {
        RuleStatus::Beta
    }

    fn evaluate(&self, ctx: &InsightContext) -> Result<Option<Insight>, RuleError> {
        let threshold = ctx.thresholds.slow_parse_plan_ms;
        let affected = records_where(ctx, |r| {
            r.timings.parse_plan_ms().is_some_and(|t| t > threshold)
        });
        if affected.is_empty() {
            return Ok(None);
        }

        let worst = affected
            .iter()
            .filter_map(|r| r.timings.parse_plan_ms())
            .fold(0.0, f64::max);
        let description = format!(
            "{} queries spent more than {} parsing and planning (worst {})",
            affected.len(),
            format_duration_ms(threshold),
            format_duration_ms(worst)
        );
        Ok(Some(
            self.insight(
                Severity::Info,
                description,
                affected.len(),
                ctx.sample_ids(affected.iter().copied()),
            )
            .with_metric("worstParsePlanMs", worst)
            .with_recommendation("Prepare frequently repeated statements to skip parsing and planning"),
        ))
    }
}

pub fn get_rules() -> Vec<Box<dyn InsightRule>> {
    vec![
        Box::new(TimedOutQueries),
        Box::new(TimeoutProneQueries),
        Box::new(HighMemoryUsage),
        Box::new(SlowUseKeys),
        Box::new(super::pattern::LeadingWildcardLike),
        Box::new(LargeResultSets),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::query_analyzer::insights::rules::test_support::Fixture;
    use serde_json::json;

    #[test]
    fn test_fatal_long_request_is_an_actual_timeout() {
        let fixture = Fixture::new(json!([
            {"requestId": "r1", "elapsedTime": "80s", "statement": "SELECT * FROM b", "state": "fatal"}
        ]));
        let ctx = fixture.context();

        let timed_out = TimedOutQueries.evaluate(&ctx).unwrap().unwrap();
        assert_eq!(timed_out.affected_count, 1);
        assert_eq!(timed_out.severity, Severity::Critical);
        assert!(TimeoutProneQueries.evaluate(&ctx).unwrap().is_none());
    }

    #[test]
    fn test_fast_fatal_request_is_an_actual_timeout() {
        let fixture = Fixture::new(json!([
            {"requestId": "r1", "elapsedTime": "2s", "statement": "SELECT * FROM b", "state": "fatal"}
        ]));
        let ctx = fixture.context();

        let timed_out = TimedOutQueries.evaluate(&ctx).unwrap().unwrap();
        assert_eq!(timed_out.affected_count, 1);
        assert_eq!(timed_out.sample_query_ids, vec!["r1"]);
        assert_eq!(timed_out.metrics["fatalNonTimeout"], 1.0);
    }

    #[test]
    fn test_timeout_prone_band() {
        let fixture = Fixture::new(json!([
            {"requestId": "r1", "elapsedTime": "59.9s", "statement": "SELECT 1"},
            {"requestId": "r2", "elapsedTime": "60s", "statement": "SELECT 1"},
            {"requestId": "r3", "elapsedTime": "1m14s", "statement": "SELECT 1"},
            {"requestId": "r4", "elapsedTime": "75s", "statement": "SELECT 1"}
        ]));

        let insight = TimeoutProneQueries.evaluate(&fixture.context()).unwrap().unwrap();
        assert_eq!(insight.sample_query_ids, vec!["r2", "r3"]);
    }

    #[test]
    fn test_high_memory_ignores_absent_values() {
        let fixture = Fixture::new(json!([
            {"requestId": "r1", "statement": "SELECT 1", "usedMemory": 104857600},
            {"requestId": "r2", "statement": "SELECT 1", "usedMemory": 1024},
            {"requestId": "r3", "statement": "SELECT 1"}
        ]));

        let insight = HighMemoryUsage.evaluate(&fixture.context()).unwrap().unwrap();
        assert_eq!(insight.affected_count, 1);
        assert_eq!(insight.metrics["peakBytes"], 104_857_600.0);
    }

    #[test]
    fn test_slow_use_keys() {
        let fixture = Fixture::new(json!([
            {"requestId": "r1", "statement": "SELECT * FROM b USE KEYS ['a', 'b']", "elapsedTime": "1.5s"},
            {"requestId": "r2", "statement": "SELECT * FROM b USE KEYS 'c'", "elapsedTime": "2ms"},
            {"requestId": "r3", "statement": "SELECT * FROM b WHERE x = 1", "elapsedTime": "5s"}
        ]));

        let insight = SlowUseKeys.evaluate(&fixture.context()).unwrap().unwrap();
        assert_eq!(insight.sample_query_ids, vec!["r1"]);
        assert!(insight.description.starts_with("1 of 2"));
    }

    #[test]
    fn test_large_result_sets() {
        let fixture = Fixture::new(json!([
            {"requestId": "r1", "statement": "SELECT 1", "resultCount": 20000, "resultSize": 1000},
            {"requestId": "r2", "statement": "SELECT 1", "resultCount": 5, "resultSize": 20971520},
            {"requestId": "r3", "statement": "SELECT 1", "resultCount": 5, "resultSize": 100}
        ]));

        let insight = LargeResultSets.evaluate(&fixture.context()).unwrap().unwrap();
        assert_eq!(insight.affected_count, 2);
    }

    #[test]
    fn test_slow_parse_plan() {
        let fixture = Fixture::new(json!([
            {"requestId": "r1", "statement": "SELECT 1", "phaseTimes": {"parse": "60ms", "plan": "70ms"}},
            {"requestId": "r2", "statement": "SELECT 1", "phaseTimes": {"parse": "1ms"}}
        ]));

        let insight = SlowParsePlan.evaluate(&fixture.context()).unwrap().unwrap();
        assert_eq!(insight.affected_count, 1);
        assert_eq!(insight.metrics["worstParsePlanMs"], 130.0);
    }
}
