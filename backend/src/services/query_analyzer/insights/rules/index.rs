//! Index usage rules
//!
//! Scan efficiency checks read per-record operator stats; metadata checks
//! only run when index definitions were supplied.

use super::super::{
    InsightContext, InsightRule, RuleError, format_duration_ms, format_percent, mean_of,
};
use crate::services::query_analyzer::models::{
    Insight, OperatorKind, QueryRecord, RuleStatus, Severity, add_opt,
};

/// Self time of this record's primary scans
fn primary_scan_time_ms(record: &QueryRecord) -> Option<f64> {
    record
        .plan
        .operators
        .iter()
        .filter(|op| op.kind == OperatorKind::PrimaryScan)
        .fold(None, |acc, op| add_opt(acc, op.self_time_ms))
}

// ============================================================================
// primary_index_usage
// ============================================================================

/// Primary index scans whose average time exceeds the threshold
pub struct PrimaryIndexUsage;

impl InsightRule for PrimaryIndexUsage {
    fn id(&self) -> &str {
        "primary_index_usage"
    }

    fn title(&self) -> &str {
        "Primary index over-usage"
    }

    fn status(&self) -> RuleStatus {
        RuleStatus::Live
    }

    fn evaluate(&self, ctx: &InsightContext) -> Result<Option<Insight>, RuleError> {
        let affected: Vec<&QueryRecord> = ctx
            .records
            .iter()
            .filter(|r| r.plan.uses_primary_scan())
            .collect();
        if affected.is_empty() {
            return Ok(None);
        }

        let Some(avg_scan_ms) = mean_of(affected.iter().map(|r| primary_scan_time_ms(r))) else {
            return Ok(None);
        };
        let threshold = ctx.thresholds.primary_index_scan_time_threshold_ms;
        if avg_scan_ms <= threshold {
            return Ok(None);
        }

        let avg_items = mean_of(
            affected
                .iter()
                .map(|r| {
                    r.plan
                        .operators
                        .iter()
                        .filter(|op| op.kind == OperatorKind::PrimaryScan)
                        .fold(None, |acc, op| add_opt(acc, op.items_out.or(op.items_in)))
                })
                .map(|items| items.map(|n| n as f64)),
        );

        let severity = if avg_scan_ms > threshold * 2.0 {
            Severity::Critical
        } else {
            Severity::Warning
        };

        let description = match avg_items {
            Some(items) => format!(
                "{} queries scan the primary index, averaging {} per scan over {:.0} documents (threshold {})",
                affected.len(),
                format_duration_ms(avg_scan_ms),
                items,
                format_duration_ms(threshold)
            ),
            None => format!(
                "{} queries scan the primary index, averaging {} per scan (threshold {})",
                affected.len(),
                format_duration_ms(avg_scan_ms),
                format_duration_ms(threshold)
            ),
        };

        let mut insight = self
            .insight(severity, description, affected.len(), ctx.sample_ids(affected.iter().copied()))
            .with_metric("avgScanTimeMs", avg_scan_ms)
            .with_metric("thresholdMs", threshold)
            .with_recommendation(
                "Create secondary indexes covering the predicates of these statements; \
                 keep the primary index for development and ad-hoc use only",
            );
        if let Some(items) = avg_items {
            insight = insight.with_metric("avgItemsScanned", items);
        }
        Ok(Some(insight))
    }
}

// ============================================================================
// inefficient_index_scans
// ============================================================================

/// Scans that read many index entries but keep very few
pub struct InefficientIndexScans;

impl InefficientIndexScans {
    /// Scan time of the qualifying scans, or `None` when the record has none
    fn qualifying_scans(record: &QueryRecord, ctx: &InsightContext) -> Option<(u64, u64, Option<f64>)> {
        let thresholds = ctx.thresholds;
        let mut found = false;
        let mut scanned_total = 0u64;
        let mut returned_total = 0u64;
        let mut time: Option<f64> = None;

        for op in record.plan.index_scans() {
            let (Some(scanned), Some(returned)) = (op.items_in.or(op.items_out), op.items_out) else {
                continue;
            };
            if scanned < thresholds.inefficient_scan_min_items || scanned == 0 {
                continue;
            }
            if returned as f64 / scanned as f64 > thresholds.inefficient_scan_selectivity {
                continue;
            }
            found = true;
            scanned_total += scanned;
            returned_total += returned;
            time = add_opt(time, op.self_time_ms);
        }

        found.then_some((scanned_total, returned_total, time))
    }
}

impl InsightRule for InefficientIndexScans {
    fn id(&self) -> &str {
        "inefficient_index_scans"
    }

    fn title(&self) -> &str {
        "Inefficient index scans"
    }

    fn status(&self) -> RuleStatus {
        RuleStatus::Live
    }

    fn evaluate(&self, ctx: &InsightContext) -> Result<Option<Insight>, RuleError> {
        let mut contributing: Vec<&QueryRecord> = Vec::new();
        let mut scanned = 0u64;
        let mut returned = 0u64;
        let mut times: Vec<Option<f64>> = Vec::new();

        for record in ctx.records {
            if let Some((s, r, t)) = Self::qualifying_scans(record, ctx) {
                contributing.push(record);
                scanned += s;
                returned += r;
                times.push(t);
            }
        }

        if contributing.is_empty() {
            return Ok(None);
        }
        let Some(avg_scan_ms) = mean_of(times) else {
            return Ok(None);
        };
        let threshold = ctx.thresholds.inefficient_scan_time_threshold_ms;
        if avg_scan_ms <= threshold {
            return Ok(None);
        }

        let selectivity = returned as f64 / scanned.max(1) as f64;
        let description = format!(
            "{} queries scan {} index entries on average but keep {} of them; average scan time {}",
            contributing.len(),
            scanned / contributing.len() as u64,
            format_percent(selectivity),
            format_duration_ms(avg_scan_ms)
        );

        Ok(Some(
            self.insight(
                Severity::Critical,
                description,
                contributing.len(),
                ctx.sample_ids(contributing.iter().copied()),
            )
            .with_metric("avgScanTimeMs", avg_scan_ms)
            .with_metric("itemsScanned", scanned as f64)
            .with_metric("itemsReturned", returned as f64)
            .with_metric("selectivity", selectivity)
            .with_recommendation(
                "Add the filtering predicates to the index keys or a partial index WHERE clause \
                 so the scan range matches the rows actually returned",
            ),
        ))
    }
}

// ============================================================================
// high_fetch_amplification
// ============================================================================

/// Statement groups fetching many documents per result row
pub struct HighFetchAmplification;

impl InsightRule for HighFetchAmplification {
    fn id(&self) -> &str {
        "high_fetch_amplification"
    }

    fn title(&self) -> &str {
        "High fetch amplification"
    }

    fn status(&self) -> RuleStatus {
        RuleStatus::Beta
    }

    fn evaluate(&self, ctx: &InsightContext) -> Result<Option<Insight>, RuleError> {
        let thresholds = ctx.thresholds;
        let mut affected = 0usize;
        let mut groups = 0usize;
        let mut worst_ratio: f64 = 0.0;
        let mut samples: Vec<String> = Vec::new();

        for group in &ctx.aggregates.statement_groups {
            let Some(fetched) = group.items_fetched else {
                continue;
            };
            if group.result_count.is_empty() || fetched < thresholds.fetch_amplification_min_fetched {
                continue;
            }
            let results = group.result_count.sum().max(1.0);
            let ratio = fetched as f64 / results;
            if ratio <= thresholds.fetch_amplification_ratio {
                continue;
            }

            groups += 1;
            affected += group.count();
            worst_ratio = worst_ratio.max(ratio);
            for id in &group.rollup.sample_query_ids {
                if samples.len() < thresholds.max_samples {
                    samples.push(id.clone());
                }
            }
        }

        if groups == 0 {
            return Ok(None);
        }

        let description = format!(
            "{} statement groups fetch up to {:.1} documents per returned row ({} queries)",
            groups, worst_ratio, affected
        );
        Ok(Some(
            self.insight(Severity::Warning, description, affected, samples)
                .with_metric("statementGroups", groups as f64)
                .with_metric("maxFetchRatio", worst_ratio)
                .with_recommendation(
                    "Filter earlier in the index, or use a covering index so documents \
                     do not have to be fetched only to be discarded",
                ),
        ))
    }
}

// ============================================================================
// missing_index_metadata
// ============================================================================

/// Indexes used by queries but absent from the supplied definitions
pub struct MissingIndexMetadata;

impl InsightRule for MissingIndexMetadata {
    fn id(&self) -> &str {
        "missing_index_metadata"
    }

    fn title(&self) -> &str {
        "Indexes without metadata"
    }

    fn status(&self) -> RuleStatus {
        RuleStatus::Live
    }

    fn evaluate(&self, ctx: &InsightContext) -> Result<Option<Insight>, RuleError> {
        if ctx.index_catalog.is_empty() {
            return Ok(None);
        }

        let missing: Vec<_> = ctx
            .aggregates
            .indexes
            .iter()
            .filter(|i| i.usage_count() > 0 && !i.metadata_available)
            .collect();
        if missing.is_empty() {
            return Ok(None);
        }

        let affected: usize = missing.iter().map(|i| i.usage_count()).sum();
        let mut samples: Vec<String> = Vec::new();
        for index in &missing {
            for id in &index.rollup.sample_query_ids {
                if samples.len() < ctx.thresholds.max_samples && !samples.contains(id) {
                    samples.push(id.clone());
                }
            }
        }
        let names: Vec<&str> = missing.iter().map(|i| i.index_name.as_str()).collect();

        let description = format!(
            "{} indexes used by {} queries are not in the supplied index metadata: {}",
            missing.len(),
            affected,
            names.join(", ")
        );
        Ok(Some(
            self.insight(Severity::Info, description, affected, samples)
                .with_metric("indexes", missing.len() as f64)
                .with_recommendation(
                    "Export system:indexes again; the metadata may be stale or from another cluster",
                ),
        ))
    }
}

// ============================================================================
// unused_indexes
// ============================================================================

/// Defined indexes that no captured query scanned
pub struct UnusedIndexes;

impl InsightRule for UnusedIndexes {
    fn id(&self) -> &str {
        "unused_indexes"
    }

    fn title(&self) -> &str {
        "Unused indexes"
    }

    fn status(&self) -> RuleStatus {
        RuleStatus::Beta
    }

    fn evaluate(&self, ctx: &InsightContext) -> Result<Option<Insight>, RuleError> {
        if ctx.index_catalog.is_empty() {
            return Ok(None);
        }
        if let Some(index) = ctx
            .aggregates
            .indexes
            .iter()
            .find(|i| i.usage_count() > 0 && i.rollup.sample_query_ids.is_empty())
        {
            return Err(RuleError::Inconsistent(format!(
                "index {} has usage but no sampled queries",
                index.index_name
            )));
        }

        let unused: Vec<String> = ctx
            .aggregates
            .indexes
            .iter()
            .filter(|i| i.usage_count() == 0 && i.metadata_available && !i.is_primary)
            .map(|i| match i.keyspaces.first() {
                Some(keyspace) => format!("{} on {}", i.index_name, keyspace),
                None => i.index_name.clone(),
            })
            .collect();
        if unused.is_empty() {
            return Ok(None);
        }

        let description = format!(
            "{} of {} defined indexes were not used by any captured query: {}",
            unused.len(),
            ctx.index_catalog.indexes.len(),
            unused.join(", ")
        );
        Ok(Some(
            self.insight(Severity::Info, description, unused.len(), Vec::new())
                .with_metric("unusedIndexes", unused.len() as f64)
                .with_recommendation(
                    "Confirm over a longer capture window before dropping; every index costs \
                     memory and mutation throughput",
                ),
        ))
    }
}

pub fn get_scan_rules() -> Vec<Box<dyn InsightRule>> {
    vec![Box::new(PrimaryIndexUsage), Box::new(InefficientIndexScans)]
}

pub fn get_metadata_rules() -> Vec<Box<dyn InsightRule>> {
    vec![Box::new(MissingIndexMetadata), Box::new(UnusedIndexes)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::query_analyzer::insights::rules::test_support::Fixture;
    use serde_json::{Value, json};

    fn scan_request(id: &str, index: &str, items_in: u64, items_out: u64, exec: &str) -> Value {
        let tag = if index == "#primary" { "PrimaryScan3" } else { "IndexScan3" };
        json!({
            "completed_requests": {
                "requestId": id,
                "statement": format!("SELECT name FROM b WHERE city = '{}'", id),
                "elapsedTime": "3s",
                "resultCount": items_out
            },
            "plan": {"#operator": "Sequence", "~children": [
                {"#operator": tag, "index": index, "keyspace": "b",
                 "#stats": {"#itemsIn": items_in, "#itemsOut": items_out, "execTime": exec}},
                {"#operator": "Fetch", "keyspace": "b", "#stats": {"#itemsOut": items_out}}
            ]}
        })
    }

    #[test]
    fn test_inefficient_scans_count_contributing_records() {
        let fixture = Fixture::new(json!([
            scan_request("r1", "idx_city", 1_000_000, 5, "2.5s"),
            scan_request("r2", "idx_city", 1_000_000, 5, "3s"),
            scan_request("r3", "idx_city", 1_000_000, 5, "2.2s"),
            // selective enough
            scan_request("r4", "idx_city", 1_000_000, 500_000, "9s"),
            // too small to judge
            scan_request("r5", "idx_city", 100, 1, "9s")
        ]));

        let insight = InefficientIndexScans.evaluate(&fixture.context()).unwrap().unwrap();
        assert_eq!(insight.affected_count, 3);
        assert_eq!(insight.sample_query_ids, vec!["r1", "r2", "r3"]);
        assert!((insight.metrics["avgScanTimeMs"] - 2_566.666).abs() < 0.01);
    }

    #[test]
    fn test_inefficient_scans_fast_enough() {
        let fixture = Fixture::new(json!([scan_request("r1", "idx_city", 1_000_000, 5, "20ms")]));
        assert!(InefficientIndexScans.evaluate(&fixture.context()).unwrap().is_none());
    }

    #[test]
    fn test_primary_index_usage() {
        let fixture = Fixture::new(json!([
            scan_request("r1", "#primary", 50_000, 50_000, "3s"),
            scan_request("r2", "#primary", 70_000, 70_000, "1.5s"),
            scan_request("r3", "idx_city", 10, 10, "1ms")
        ]));

        let insight = PrimaryIndexUsage.evaluate(&fixture.context()).unwrap().unwrap();
        assert_eq!(insight.affected_count, 2);
        assert_eq!(insight.severity, Severity::Warning);
        assert_eq!(insight.metrics["avgScanTimeMs"], 2_250.0);
        assert_eq!(insight.metrics["avgItemsScanned"], 60_000.0);
    }

    #[test]
    fn test_primary_index_without_timing_does_not_fire() {
        let fixture = Fixture::new(json!([{
            "completed_requests": {"requestId": "r1", "statement": "SELECT * FROM b"},
            "plan": {"#operator": "PrimaryScan3", "index": "#primary", "keyspace": "b"}
        }]));
        assert!(PrimaryIndexUsage.evaluate(&fixture.context()).unwrap().is_none());
    }

    #[test]
    fn test_fetch_amplification() {
        let mut request = scan_request("r1", "idx_city", 5_000, 5_000, "10ms");
        request["completed_requests"]["resultCount"] = json!(10);
        let fixture = Fixture::new(json!([request]));

        let insight = HighFetchAmplification.evaluate(&fixture.context()).unwrap().unwrap();
        assert_eq!(insight.affected_count, 1);
        assert_eq!(insight.metrics["maxFetchRatio"], 500.0);
    }

    #[test]
    fn test_metadata_rules_need_catalog() {
        let fixture = Fixture::new(json!([scan_request("r1", "idx_city", 10, 10, "1ms")]));
        assert!(MissingIndexMetadata.evaluate(&fixture.context()).unwrap().is_none());
        assert!(UnusedIndexes.evaluate(&fixture.context()).unwrap().is_none());
    }

    #[test]
    fn test_missing_and_unused_indexes() {
        let fixture = Fixture::with_metadata(
            json!([
                scan_request("r1", "idx_city", 10, 10, "1ms"),
                scan_request("r2", "idx_gone", 10, 10, "1ms")
            ]),
            Some(json!([
                {"name": "idx_city", "keyspace_id": "b"},
                {"name": "idx_stale", "keyspace_id": "b"},
                {"name": "#primary", "keyspace_id": "b", "is_primary": true}
            ])),
            None,
        );
        let ctx = fixture.context();

        let missing = MissingIndexMetadata.evaluate(&ctx).unwrap().unwrap();
        assert_eq!(missing.affected_count, 1);
        assert_eq!(missing.sample_query_ids, vec!["r2"]);
        assert!(missing.description.contains("idx_gone"));

        let unused = UnusedIndexes.evaluate(&ctx).unwrap().unwrap();
        assert_eq!(unused.affected_count, 1);
        assert!(unused.description.contains("idx_stale"));
    }

    #[test]
    fn test_unused_index_on_second_keyspace() {
        let fixture = Fixture::with_metadata(
            json!([scan_request("r1", "idx_type", 10, 10, "1ms")]),
            Some(json!([
                {"name": "idx_type", "keyspace_id": "b"},
                {"name": "idx_type", "keyspace_id": "c"}
            ])),
            None,
        );
        let ctx = fixture.context();

        assert!(MissingIndexMetadata.evaluate(&ctx).unwrap().is_none());
        let unused = UnusedIndexes.evaluate(&ctx).unwrap().unwrap();
        assert_eq!(unused.affected_count, 1);
        assert!(unused.description.contains("idx_type on c"));
    }

    #[test]
    fn test_metadata_for_other_keyspace_counts_as_missing() {
        let mut request = scan_request("r1", "idx_x", 10, 10, "1ms");
        request["plan"]["~children"][0]["keyspace"] = json!("c");
        request["plan"]["~children"][1]["keyspace"] = json!("c");
        let fixture = Fixture::with_metadata(
            json!([request]),
            Some(json!([{"name": "idx_x", "keyspace_id": "b"}])),
            None,
        );
        let ctx = fixture.context();

        let used = &fixture.aggregates.indexes[0];
        assert_eq!(used.keyspaces, vec!["c"]);
        assert!(!used.metadata_available);

        let missing = MissingIndexMetadata.evaluate(&ctx).unwrap().unwrap();
        assert_eq!(missing.affected_count, 1);
        assert_eq!(missing.sample_query_ids, vec!["r1"]);
    }
}
