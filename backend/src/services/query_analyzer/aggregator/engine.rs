//! Aggregation engine
//!
//! Folds normalized records into every aggregate family in one pass.
//! Families only grow while records are observed; `finish` merges index and
//! schema metadata and freezes the result. Ordering is fully determined by
//! input order, so identical input yields identical aggregates.

use super::aggregates::{
    Aggregates, DimensionRollups, GlobalSummary, GroupIndexUsage, IndexAggregate,
    KeyedRollup, KeyspaceAggregate, Rollup, StatementGroupAggregate, TimeBucketAggregate,
    TimeoutPolicy,
};
use super::time_bucket::TimeGranularity;
use crate::services::query_analyzer::models::{
    OperatorKind, QueryRecord, TimeoutClass, add_opt,
};
use crate::services::query_analyzer::parser::specialized::{IndexCatalog, SchemaCatalog};
use crate::utils::collection_ext::{OrderedMap, push_unique};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

pub const DEFAULT_MAX_SAMPLES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregationOptions {
    pub granularity: TimeGranularity,
    pub max_samples: usize,
    pub timeout_policy: TimeoutPolicy,
}

impl Default for AggregationOptions {
    fn default() -> Self {
        Self {
            granularity: TimeGranularity::default(),
            max_samples: DEFAULT_MAX_SAMPLES,
            timeout_policy: TimeoutPolicy::default(),
        }
    }
}

/// Single-pass aggregation state
#[derive(Debug)]
pub struct AggregationEngine {
    options: AggregationOptions,
    global: GlobalSummary,
    time_buckets: BTreeMap<DateTime<Utc>, TimeBucketAggregate>,
    groups: OrderedMap<String, StatementGroupAggregate>,
    indexes: OrderedMap<String, IndexAggregate>,
    keyspaces: OrderedMap<String, KeyspaceAggregate>,
    by_user: OrderedMap<String, Rollup>,
    by_node: OrderedMap<String, Rollup>,
    by_statement_type: OrderedMap<String, Rollup>,
    by_state: OrderedMap<String, Rollup>,
}

impl AggregationEngine {
    pub fn new(options: AggregationOptions) -> Self {
        Self {
            options,
            global: GlobalSummary::default(),
            time_buckets: BTreeMap::new(),
            groups: OrderedMap::new(),
            indexes: OrderedMap::new(),
            keyspaces: OrderedMap::new(),
            by_user: OrderedMap::new(),
            by_node: OrderedMap::new(),
            by_statement_type: OrderedMap::new(),
            by_state: OrderedMap::new(),
        }
    }

    /// Aggregate a complete record list
    pub fn aggregate(
        options: AggregationOptions,
        records: &[QueryRecord],
        index_catalog: &IndexCatalog,
        schema_catalog: &SchemaCatalog,
    ) -> Aggregates {
        let mut engine = Self::new(options);
        for record in records {
            engine.observe(record);
        }
        engine.finish(index_catalog, schema_catalog)
    }

    pub fn observe(&mut self, record: &QueryRecord) {
        let timeout_class = self.options.timeout_policy.classify(record);

        self.observe_global(record, timeout_class);
        self.observe_time_bucket(record, timeout_class);
        self.observe_statement_group(record, timeout_class);
        self.observe_indexes(record);
        self.observe_keyspaces(record);
        self.observe_dimensions(record);
    }

    fn observe_global(&mut self, record: &QueryRecord, timeout_class: TimeoutClass) {
        let global = &mut self.global;
        global.total_records += 1;

        if record.has_plan() {
            global.records_with_plan += 1;
        } else {
            global.records_without_plan += 1;
        }

        match record.request_time {
            Some(at) => {
                global.first_request_time = Some(global.first_request_time.map_or(at, |t| t.min(at)));
                global.last_request_time = Some(global.last_request_time.map_or(at, |t| t.max(at)));
            },
            None => global.undated_records += 1,
        }

        global.elapsed_ms.record_opt(record.timings.elapsed_ms);
        global.execution_ms.record_opt(record.timings.execution_ms);
        global.service_ms.record_opt(record.timings.service_ms);
        global.parse_plan_ms.record_opt(record.timings.parse_plan_ms());
        global
            .used_memory_bytes
            .record_opt(record.resource_usage.used_memory_bytes.map(|v| v as f64));
        global
            .result_count
            .record_opt(record.resource_usage.result_count.map(|v| v as f64));
        global
            .result_size_bytes
            .record_opt(record.resource_usage.result_size_bytes.map(|v| v as f64));

        *global.states.entry(record.state).or_insert(0) += 1;
        *global.statement_types.entry(record.statement_type).or_insert(0) += 1;
        global.timeouts.add(timeout_class);
        if self.options.timeout_policy.is_fatal_non_timeout(record) {
            global.timeouts.fatal_non_timeout += 1;
        }

        if record.use_keys {
            global.use_keys_count += 1;
        }
        if record.plan.uses_primary_scan() {
            global.primary_scan_count += 1;
        }

        for (kind, totals) in &record.plan.totals {
            let acc = global.operator_totals.entry(*kind).or_default();
            acc.count += totals.count;
            acc.items_in = add_opt(acc.items_in, totals.items_in);
            acc.items_out = add_opt(acc.items_out, totals.items_out);
            acc.time_ms = add_opt(acc.time_ms, totals.time_ms);
        }
        global.operator_anomalies += record.plan.anomaly_count;
        global.plan_warnings += record.plan.warnings.len();
    }

    fn observe_time_bucket(&mut self, record: &QueryRecord, timeout_class: TimeoutClass) {
        let Some(at) = record.request_time else {
            return;
        };

        let start = self.options.granularity.bucket_start(at);
        let bucket = self
            .time_buckets
            .entry(start)
            .or_insert_with(|| TimeBucketAggregate::new(start));

        bucket.rollup.observe(record, self.options.max_samples);
        *bucket.states.entry(record.state).or_insert(0) += 1;
        *bucket.statement_types.entry(record.statement_type).or_insert(0) += 1;
        bucket.timeouts.add(timeout_class);
        bucket.result_count += record.resource_usage.result_count.unwrap_or(0);
        bucket.result_size_bytes += record.resource_usage.result_size_bytes.unwrap_or(0);
    }

    fn observe_statement_group(&mut self, record: &QueryRecord, timeout_class: TimeoutClass) {
        let max_samples = self.options.max_samples;
        let group = self
            .groups
            .entry_or_insert_with(record.signature_id.clone(), || {
                StatementGroupAggregate::new(record)
            });

        group.rollup.observe(record, max_samples);
        group.execution_ms.record_opt(record.timings.execution_ms);
        group.parse_plan_ms.record_opt(record.timings.parse_plan_ms());
        group.index_scan_time_ms.record_opt(record.plan.index_scan_time_ms());
        group
            .result_count
            .record_opt(record.resource_usage.result_count.map(|v| v as f64));
        group
            .result_size_bytes
            .record_opt(record.resource_usage.result_size_bytes.map(|v| v as f64));
        group
            .used_memory_bytes
            .record_opt(record.resource_usage.used_memory_bytes.map(|v| v as f64));
        *group.states.entry(record.state).or_insert(0) += 1;
        group.timeouts.add(timeout_class);

        if record.use_keys {
            group.use_keys_count += 1;
        }
        if record.plan.uses_primary_scan() {
            group.primary_scan_count += 1;
        }
        if record.has_plan() {
            group.records_with_plan += 1;
        }
        if record.shape.leading_wildcard_like {
            group.leading_wildcard_like_count += 1;
        }

        group.items_scanned = add_opt(group.items_scanned, record.plan.items_scanned());
        let items_fetched = record.plan.items_fetched();
        group.items_fetched = add_opt(group.items_fetched, items_fetched);

        for (position, touch) in record.plan.index_touches().into_iter().enumerate() {
            let usage = match group
                .index_usage
                .iter()
                .position(|u| u.index_name == touch.index_name)
            {
                Some(pos) => &mut group.index_usage[pos],
                None => {
                    group.index_usage.push(GroupIndexUsage {
                        index_name: touch.index_name.clone(),
                        is_primary: false,
                        occurrences: 0,
                        scan_count: 0,
                        items_scanned: None,
                        items_fetched: None,
                        scan_time_ms: None,
                    });
                    let last = group.index_usage.len() - 1;
                    &mut group.index_usage[last]
                },
            };

            usage.occurrences += 1;
            usage.is_primary |= touch.is_primary;
            usage.scan_count += touch.scan_count;
            usage.items_scanned = add_opt(usage.items_scanned, touch.items_scanned);
            usage.scan_time_ms = add_opt(usage.scan_time_ms, touch.scan_time_ms);
            // Fetches are credited to the index that feeds them first
            if position == 0 {
                usage.items_fetched = add_opt(usage.items_fetched, items_fetched);
            }
        }

        for keyspace in &record.plan.keyspaces {
            push_unique(&mut group.keyspaces, keyspace.clone());
        }

        if let Some(at) = record.request_time {
            group.first_seen = Some(group.first_seen.map_or(at, |t| t.min(at)));
            group.last_seen = Some(group.last_seen.map_or(at, |t| t.max(at)));
        }
    }

    fn observe_indexes(&mut self, record: &QueryRecord) {
        for touch in record.plan.index_touches() {
            let index = self
                .indexes
                .entry_or_insert_with(touch.index_name.clone(), || {
                    IndexAggregate::new(&touch.index_name)
                });

            index.rollup.observe(record, self.options.max_samples);
            index.is_primary |= touch.is_primary;
            index.scan_count += touch.scan_count;
            index.scan_time_ms.record_opt(touch.scan_time_ms);
            index.items_scanned = add_opt(index.items_scanned, touch.items_scanned);
            index.items_returned = add_opt(index.items_returned, touch.items_returned);
            if let Some(keyspace) = touch.keyspace {
                push_unique(&mut index.keyspaces, keyspace);
            }
            push_unique(&mut index.signature_ids, record.signature_id.clone());
        }
    }

    fn observe_keyspaces(&mut self, record: &QueryRecord) {
        for keyspace in &record.plan.keyspaces {
            let aggregate = self
                .keyspaces
                .entry_or_insert_with(keyspace.clone(), || KeyspaceAggregate::new(keyspace));

            aggregate.rollup.observe(record, self.options.max_samples);

            let mut used_primary = false;
            for op in &record.plan.operators {
                if op.keyspace.as_deref() != Some(keyspace.as_str()) {
                    continue;
                }
                match op.kind {
                    OperatorKind::Fetch => {
                        aggregate.items_fetched =
                            add_opt(aggregate.items_fetched, op.items_out.or(op.items_in));
                    },
                    OperatorKind::IndexScan | OperatorKind::PrimaryScan => {
                        used_primary |= op.kind == OperatorKind::PrimaryScan;
                        if let Some(name) = &op.index_name {
                            push_unique(&mut aggregate.indexes, name.clone());
                        }
                    },
                    _ => {},
                }
            }
            if used_primary {
                aggregate.primary_scan_count += 1;
            }
        }
    }

    fn observe_dimensions(&mut self, record: &QueryRecord) {
        let max_samples = self.options.max_samples;

        if let Some(user) = &record.user {
            self.by_user
                .entry_or_insert_with(user.clone(), Rollup::default)
                .observe(record, max_samples);
        }
        if let Some(node) = &record.node {
            self.by_node
                .entry_or_insert_with(node.clone(), Rollup::default)
                .observe(record, max_samples);
        }
        self.by_statement_type
            .entry_or_insert_with(record.statement_type.as_str().to_string(), Rollup::default)
            .observe(record, max_samples);
        self.by_state
            .entry_or_insert_with(record.state.as_str().to_string(), Rollup::default)
            .observe(record, max_samples);
    }

    /// Merge metadata and freeze every family
    pub fn finish(self, index_catalog: &IndexCatalog, schema_catalog: &SchemaCatalog) -> Aggregates {
        let mut global = self.global;

        let mut indexes = self.indexes.into_values();
        for index in &mut indexes {
            if let Some(metadata) = index_catalog.lookup(&index.index_name, &index.keyspaces) {
                index.metadata_available = true;
                index.is_primary |= metadata.is_primary;
                index.metadata = Some(metadata.clone());
            }
        }
        let observed_indexes = indexes.len();
        // Same-named indexes on other keyspaces are distinct indexes
        for metadata in &index_catalog.indexes {
            let observed = indexes.iter().any(|i| {
                i.index_name == metadata.name
                    && (i.metadata.as_ref() == Some(metadata)
                        || i.keyspaces.is_empty()
                        || metadata.keyspace.as_ref().is_none_or(|ks| i.keyspaces.contains(ks)))
            });
            if !observed {
                indexes.push(IndexAggregate::from_metadata(metadata));
            }
        }

        let mut keyspaces = self.keyspaces.into_values();
        for keyspace in &mut keyspaces {
            if let Some(schema) = schema_catalog.lookup(&keyspace.keyspace) {
                keyspace.schema_available = true;
                keyspace.schema = Some(schema.clone());
            }
        }
        let observed_keyspaces = keyspaces.len();
        for schema in &schema_catalog.collections {
            let matched = keyspaces
                .iter()
                .any(|k| k.schema.as_ref().is_some_and(|s| s.collection == schema.collection));
            if !matched {
                let mut aggregate = KeyspaceAggregate::new(&schema.collection);
                aggregate.schema_available = true;
                aggregate.schema = Some(schema.clone());
                keyspaces.push(aggregate);
            }
        }

        global.distinct_signatures = self.groups.len();
        global.distinct_indexes = observed_indexes;
        global.distinct_keyspaces = observed_keyspaces;

        tracing::debug!(
            "Aggregated {} records into {} statement groups, {} indexes, {} keyspaces, {} time buckets",
            global.total_records,
            global.distinct_signatures,
            indexes.len(),
            keyspaces.len(),
            self.time_buckets.len()
        );

        Aggregates {
            granularity: self.options.granularity,
            timeout_policy: self.options.timeout_policy,
            global,
            time_buckets: self.time_buckets.into_values().collect(),
            statement_groups: self.groups.into_values(),
            indexes,
            keyspaces,
            dimensions: DimensionRollups {
                by_user: keyed(self.by_user),
                by_node: keyed(self.by_node),
                by_statement_type: keyed(self.by_statement_type),
                by_state: keyed(self.by_state),
            },
        }
    }
}

fn keyed(map: OrderedMap<String, Rollup>) -> Vec<KeyedRollup> {
    map.into_entries()
        .into_iter()
        .map(|(key, rollup)| KeyedRollup { key, rollup })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::query_analyzer::parser::core::RecordNormalizer;
    use crate::services::query_analyzer::parser::specialized::{IndexParser, SchemaParser};
    use serde_json::{Value, json};

    fn records(items: Value) -> Vec<QueryRecord> {
        let Value::Array(items) = items else {
            panic!("fixture must be an array");
        };
        RecordNormalizer::default().normalize_all(items).records
    }

    fn index_scan_plan(index: &str, items_in: u64, items_out: u64, exec: &str) -> Value {
        json!({
            "#operator": "Sequence",
            "~children": [
                {"#operator": "IndexScan3", "index": index, "keyspace": "b",
                 "#stats": {"#itemsIn": items_in, "#itemsOut": items_out, "execTime": exec}},
                {"#operator": "Fetch", "keyspace": "b", "#stats": {"#itemsOut": items_out}}
            ]
        })
    }

    fn aggregate(items: Value) -> Aggregates {
        AggregationEngine::aggregate(
            AggregationOptions::default(),
            &records(items),
            &IndexCatalog::default(),
            &SchemaCatalog::default(),
        )
    }

    #[test]
    fn test_literal_variants_share_one_group() {
        let aggregates = aggregate(json!([
            {"requestId": "r1", "statement": "SELECT * FROM b WHERE id=1", "elapsedTime": "10ms"},
            {"requestId": "r2", "statement": "SELECT * FROM b WHERE id=2", "elapsedTime": "30ms"}
        ]));

        assert_eq!(aggregates.statement_groups.len(), 1);
        let group = &aggregates.statement_groups[0];
        assert_eq!(group.count(), 2);
        assert_eq!(group.representative_statement, "SELECT * FROM b WHERE id=1");
        assert_eq!(group.rollup.sample_query_ids, vec!["r1", "r2"]);
        assert_eq!(group.rollup.elapsed_ms.mean(), Some(20.0));
    }

    #[test]
    fn test_samples_are_first_encountered() {
        let items: Vec<Value> = (0..15)
            .map(|i| json!({"requestId": format!("r{}", i), "statement": "SELECT 1"}))
            .collect();
        let aggregates = aggregate(Value::Array(items));

        let group = &aggregates.statement_groups[0];
        assert_eq!(group.count(), 15);
        assert_eq!(group.rollup.sample_query_ids.len(), DEFAULT_MAX_SAMPLES);
        assert_eq!(group.rollup.sample_query_ids[0], "r0");
        assert_eq!(group.rollup.sample_query_ids[9], "r9");
    }

    #[test]
    fn test_timeout_classification() {
        let aggregates = aggregate(json!([
            {"requestId": "a", "statement": "SELECT * FROM b", "elapsedTime": "80s", "state": "fatal"},
            {"requestId": "b", "statement": "SELECT 1", "elapsedTime": "65s", "state": "completed"},
            {"requestId": "c", "statement": "SELECT 1", "elapsedTime": "1s", "state": "timeout"},
            {"requestId": "d", "statement": "SELECT 1", "elapsedTime": "75s", "state": "completed"},
            {"requestId": "e", "statement": "SELECT 1", "elapsedTime": "2s", "state": "fatal"}
        ]));

        assert_eq!(aggregates.global.timeouts.actual, 3);
        assert_eq!(aggregates.global.timeouts.approaching, 1);
        assert_eq!(aggregates.global.timeouts.fatal_non_timeout, 1);
    }

    #[test]
    fn test_fast_fatal_is_an_actual_timeout() {
        let aggregates = aggregate(json!([
            {"requestId": "a", "statement": "SELECT 1", "elapsedTime": "2s", "state": "fatal"},
            {"requestId": "b", "statement": "SELECT 1", "elapsedTime": "3s", "state": "fatal",
             "errors": [{"code": 1080, "msg": "Timeout 3s exceeded"}]}
        ]));

        assert_eq!(aggregates.global.timeouts.actual, 2);
        assert_eq!(aggregates.global.timeouts.approaching, 0);
        assert_eq!(aggregates.global.timeouts.fatal_non_timeout, 1);
        assert_eq!(aggregates.statement_groups[0].timeouts.actual, 2);
    }

    #[test]
    fn test_time_buckets_follow_granularity() {
        let items = json!([
            {"requestId": "r1", "statement": "SELECT 1", "requestTime": "2024-03-05T14:37:12Z"},
            {"requestId": "r2", "statement": "SELECT 1", "requestTime": "2024-03-05T14:37:50Z"},
            {"requestId": "r3", "statement": "SELECT 1", "requestTime": "2024-03-05T14:12:00Z"},
            {"requestId": "r4", "statement": "SELECT 1"}
        ]);

        let by_minute = aggregate(items.clone());
        assert_eq!(by_minute.time_buckets.len(), 2);
        // Ordered by time, not by input
        assert_eq!(by_minute.time_buckets[0].rollup.sample_query_ids, vec!["r3"]);
        assert_eq!(by_minute.time_buckets[1].rollup.count, 2);
        assert_eq!(by_minute.global.undated_records, 1);

        let options = AggregationOptions {
            granularity: TimeGranularity::Hour,
            ..Default::default()
        };
        let by_hour = AggregationEngine::aggregate(
            options,
            &records(items),
            &IndexCatalog::default(),
            &SchemaCatalog::default(),
        );
        assert_eq!(by_hour.time_buckets.len(), 1);
        assert_eq!(by_hour.time_buckets[0].rollup.count, 3);
        // Statement groups are unaffected by granularity
        assert_eq!(by_hour.statement_groups[0].count(), by_minute.statement_groups[0].count());
    }

    #[test]
    fn test_index_usage_without_metadata_is_flagged() {
        let aggregates = aggregate(json!([
            {"completed_requests": {"requestId": "r1", "statement": "SELECT * FROM b WHERE x = 1"},
             "plan": index_scan_plan("idx_x", 100, 10, "5ms")},
            {"completed_requests": {"requestId": "r2", "statement": "SELECT * FROM b WHERE x = 2"},
             "plan": index_scan_plan("idx_x", 300, 30, "15ms")}
        ]));

        let index = aggregates.index("idx_x").unwrap();
        assert_eq!(index.usage_count(), 2);
        assert!(!index.metadata_available);
        assert_eq!(index.items_scanned, Some(400));
        assert_eq!(index.items_returned, Some(40));
        assert_eq!(index.avg_scan_time_ms(), Some(10.0));
        assert_eq!(index.keyspaces, vec!["b"]);

        let group = &aggregates.statement_groups[0];
        assert_eq!(group.index_usage.len(), 1);
        assert_eq!(group.index_usage[0].occurrences, 2);
        assert_eq!(group.index_usage[0].items_fetched, Some(40));

        let keyspace = aggregates.keyspace("b").unwrap();
        assert_eq!(keyspace.items_fetched, Some(40));
        assert_eq!(keyspace.indexes, vec!["idx_x"]);
    }

    #[test]
    fn test_metadata_merge() {
        let items = records(json!([
            {"completed_requests": {"requestId": "r1", "statement": "SELECT * FROM b WHERE x = 1"},
             "plan": index_scan_plan("idx_x", 100, 10, "5ms")}
        ]));
        let index_catalog = IndexParser::new().parse(&json!([
            {"name": "idx_x", "keyspace_id": "b", "index_key": ["x"]},
            {"name": "idx_unused", "keyspace_id": "b", "index_key": ["y"]}
        ]));
        let schema_catalog = SchemaParser::new().parse(&json!({
            "b": [{"#docs": 10, "properties": {"x": {}}}],
            "other": [{"#docs": 1, "properties": {}}]
        }));

        let aggregates = AggregationEngine::aggregate(
            AggregationOptions::default(),
            &items,
            &index_catalog,
            &schema_catalog,
        );

        assert_eq!(aggregates.indexes.len(), 2);
        assert!(aggregates.index("idx_x").unwrap().metadata_available);
        let unused = aggregates.index("idx_unused").unwrap();
        assert_eq!(unused.usage_count(), 0);
        assert!(unused.metadata_available);
        assert_eq!(aggregates.global.distinct_indexes, 1);

        assert!(aggregates.keyspace("b").unwrap().schema_available);
        assert_eq!(aggregates.keyspace("other").unwrap().rollup.count, 0);
    }

    #[test]
    fn test_same_named_index_on_other_keyspace_is_kept() {
        let items = records(json!([
            {"completed_requests": {"requestId": "r1", "statement": "SELECT * FROM b WHERE type = 'x'"},
             "plan": index_scan_plan("idx_type", 100, 10, "5ms")}
        ]));
        let index_catalog = IndexParser::new().parse(&json!([
            {"name": "idx_type", "keyspace_id": "b", "index_key": ["type"]},
            {"name": "idx_type", "keyspace_id": "c", "index_key": ["type"]}
        ]));

        let aggregates = AggregationEngine::aggregate(
            AggregationOptions::default(),
            &items,
            &index_catalog,
            &SchemaCatalog::default(),
        );

        assert_eq!(aggregates.indexes.len(), 2);
        let used = &aggregates.indexes[0];
        assert_eq!(used.usage_count(), 1);
        assert_eq!(used.metadata.as_ref().and_then(|m| m.keyspace.as_deref()), Some("b"));
        let idle = &aggregates.indexes[1];
        assert_eq!(idle.index_name, "idx_type");
        assert_eq!(idle.keyspaces, vec!["c"]);
        assert_eq!(idle.usage_count(), 0);
        assert!(idle.metadata_available);
        assert_eq!(aggregates.global.distinct_indexes, 1);
    }

    #[test]
    fn test_metadata_on_other_keyspace_does_not_match() {
        let items = records(json!([
            {"completed_requests": {"requestId": "r1", "statement": "SELECT * FROM b WHERE x = 1"},
             "plan": index_scan_plan("idx_x", 100, 10, "5ms")}
        ]));
        let index_catalog = IndexParser::new().parse(&json!([
            {"name": "idx_x", "keyspace_id": "c", "index_key": ["x"]}
        ]));

        let aggregates = AggregationEngine::aggregate(
            AggregationOptions::default(),
            &items,
            &index_catalog,
            &SchemaCatalog::default(),
        );

        assert_eq!(aggregates.indexes.len(), 2);
        let used = &aggregates.indexes[0];
        assert_eq!(used.keyspaces, vec!["b"]);
        assert!(!used.metadata_available);
        assert!(used.metadata.is_none());
        assert_eq!(aggregates.indexes[1].keyspaces, vec!["c"]);
    }

    #[test]
    fn test_dimensions_in_first_appearance_order() {
        let aggregates = aggregate(json!([
            {"requestId": "r1", "statement": "UPDATE b SET x = 1", "users": "bob", "node": "n2"},
            {"requestId": "r2", "statement": "SELECT 1", "users": "alice", "node": "n1"},
            {"requestId": "r3", "statement": "SELECT 2", "users": "bob"}
        ]));

        let users: Vec<_> = aggregates.dimensions.by_user.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(users, vec!["bob", "alice"]);
        assert_eq!(aggregates.dimensions.by_user[0].rollup.count, 2);
        assert_eq!(aggregates.dimensions.by_node.len(), 2);
        let types: Vec<_> = aggregates
            .dimensions
            .by_statement_type
            .iter()
            .map(|r| r.key.as_str())
            .collect();
        assert_eq!(types, vec!["UPDATE", "SELECT"]);
    }

    #[test]
    fn test_records_without_plan_contribute_no_index_data() {
        let aggregates = aggregate(json!([
            {"requestId": "r1", "statement": "SELECT * FROM b", "elapsedTime": "1ms"}
        ]));

        assert!(aggregates.indexes.is_empty());
        assert!(aggregates.keyspaces.is_empty());
        assert_eq!(aggregates.global.records_without_plan, 1);
        let group = &aggregates.statement_groups[0];
        assert_eq!(group.items_scanned, None);
        assert_eq!(group.items_fetched, None);
        assert!(!group.touches_index());
    }

    #[test]
    fn test_deterministic_serialization() {
        let items = json!([
            {"completed_requests": {"requestId": "r1", "statement": "SELECT * FROM b WHERE x = 1",
             "elapsedTime": "3ms", "requestTime": "2024-01-01T00:00:00Z"},
             "plan": index_scan_plan("idx_x", 100, 10, "1ms")},
            {"requestId": "r2", "statement": "DELETE FROM b WHERE y = 'a'", "elapsedTime": "9ms"}
        ]);

        let first = serde_json::to_string(&aggregate(items.clone())).unwrap();
        let second = serde_json::to_string(&aggregate(items)).unwrap();
        assert_eq!(first, second);
    }
}
