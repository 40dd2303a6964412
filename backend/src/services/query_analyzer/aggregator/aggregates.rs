//! Aggregate families produced by one analysis pass
//!
//! All families are plain data once built; keyed collections are `Vec`s in
//! first-appearance order except the time series, which is ordered by time.

use super::histogram::DistributionStats;
use super::time_bucket::TimeGranularity;
use crate::services::query_analyzer::models::{
    CollectionSchema, IndexMetadata, OperatorKind, OperatorTotals, QueryRecord, QueryState,
    StatementShape, StatementType, TimeoutClass,
};
use crate::utils::collection_ext::push_capped;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Server statement timeout and the "approaching" band below it
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutPolicy {
    pub statement_timeout_ms: f64,
    pub approach_lower_bound_ms: f64,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self { statement_timeout_ms: 75_000.0, approach_lower_bound_ms: 60_000.0 }
    }
}

impl TimeoutPolicy {
    /// `Actual` for every timed-out or fatal request; `Approaching` for
    /// anything else whose elapsed time lies in `[lower bound, statement timeout)`
    pub fn classify(&self, record: &QueryRecord) -> TimeoutClass {
        if matches!(record.state, QueryState::Timeout | QueryState::Fatal) {
            return TimeoutClass::Actual;
        }

        match record.timings.elapsed_ms {
            Some(e) if e >= self.approach_lower_bound_ms && e < self.statement_timeout_ms => {
                TimeoutClass::Approaching
            },
            _ => TimeoutClass::None,
        }
    }

    /// Fatal request that neither ran into the band nor reported a timeout
    ///
    /// Still counted as `Actual`; tallied on the side so a capture full of
    /// fast failures can be told apart from real timeouts.
    pub fn is_fatal_non_timeout(&self, record: &QueryRecord) -> bool {
        record.state == QueryState::Fatal
            && !record.mentions_timeout()
            && !record.timings.elapsed_ms.is_some_and(|e| e >= self.approach_lower_bound_ms)
    }
}

/// Count, elapsed-time distribution and sampled ids shared by every family
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Rollup {
    pub count: usize,
    pub elapsed_ms: DistributionStats,
    pub sample_query_ids: Vec<String>,
}

impl Rollup {
    pub fn observe(&mut self, record: &QueryRecord, max_samples: usize) {
        self.count += 1;
        self.elapsed_ms.record_opt(record.timings.elapsed_ms);
        push_capped(&mut self.sample_query_ids, record.request_id.clone(), max_samples);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutCounts {
    pub actual: usize,
    pub approaching: usize,
    /// Part of `actual`: fatal requests with no sign of a timeout
    pub fatal_non_timeout: usize,
}

impl TimeoutCounts {
    pub fn add(&mut self, class: TimeoutClass) {
        match class {
            TimeoutClass::Actual => self.actual += 1,
            TimeoutClass::Approaching => self.approaching += 1,
            TimeoutClass::None => {},
        }
    }
}

// ========================================
// Time Series
// ========================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeBucketAggregate {
    pub bucket_start: DateTime<Utc>,
    #[serde(flatten)]
    pub rollup: Rollup,
    pub states: BTreeMap<QueryState, usize>,
    pub statement_types: BTreeMap<StatementType, usize>,
    pub timeouts: TimeoutCounts,
    pub result_count: u64,
    pub result_size_bytes: u64,
}

impl TimeBucketAggregate {
    pub fn new(bucket_start: DateTime<Utc>) -> Self {
        Self {
            bucket_start,
            rollup: Rollup::default(),
            states: BTreeMap::new(),
            statement_types: BTreeMap::new(),
            timeouts: TimeoutCounts::default(),
            result_count: 0,
            result_size_bytes: 0,
        }
    }
}

// ========================================
// Statement Groups
// ========================================

/// Usage of one index by one statement group
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupIndexUsage {
    pub index_name: String,
    pub is_primary: bool,
    /// Records of the group that scanned this index
    pub occurrences: usize,
    pub scan_count: usize,
    pub items_scanned: Option<u64>,
    /// Fetch output of records whose first scanned index is this one
    pub items_fetched: Option<u64>,
    pub scan_time_ms: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatementGroupAggregate {
    pub signature_id: String,
    pub statement_signature: String,
    pub representative_statement: String,
    pub representative_request_id: String,
    pub statement_type: StatementType,
    pub shape: StatementShape,
    #[serde(flatten)]
    pub rollup: Rollup,
    pub execution_ms: DistributionStats,
    pub parse_plan_ms: DistributionStats,
    pub index_scan_time_ms: DistributionStats,
    pub result_count: DistributionStats,
    pub result_size_bytes: DistributionStats,
    pub used_memory_bytes: DistributionStats,
    pub states: BTreeMap<QueryState, usize>,
    pub timeouts: TimeoutCounts,
    pub use_keys_count: usize,
    pub primary_scan_count: usize,
    pub records_with_plan: usize,
    pub leading_wildcard_like_count: usize,
    pub items_scanned: Option<u64>,
    pub items_fetched: Option<u64>,
    pub index_usage: Vec<GroupIndexUsage>,
    pub keyspaces: Vec<String>,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
}

impl StatementGroupAggregate {
    pub fn new(record: &QueryRecord) -> Self {
        Self {
            signature_id: record.signature_id.clone(),
            statement_signature: record.statement_signature.clone(),
            representative_statement: record.statement.clone(),
            representative_request_id: record.request_id.clone(),
            statement_type: record.statement_type,
            shape: record.shape.clone(),
            rollup: Rollup::default(),
            execution_ms: DistributionStats::new(),
            parse_plan_ms: DistributionStats::new(),
            index_scan_time_ms: DistributionStats::new(),
            result_count: DistributionStats::new(),
            result_size_bytes: DistributionStats::new(),
            used_memory_bytes: DistributionStats::new(),
            states: BTreeMap::new(),
            timeouts: TimeoutCounts::default(),
            use_keys_count: 0,
            primary_scan_count: 0,
            records_with_plan: 0,
            leading_wildcard_like_count: 0,
            items_scanned: None,
            items_fetched: None,
            index_usage: Vec::new(),
            keyspaces: Vec::new(),
            first_seen: None,
            last_seen: None,
        }
    }

    pub fn count(&self) -> usize {
        self.rollup.count
    }

    pub fn touches_index(&self) -> bool {
        !self.index_usage.is_empty()
    }
}

// ========================================
// Index / Keyspace Usage
// ========================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexAggregate {
    pub index_name: String,
    pub is_primary: bool,
    /// Records that scanned this index
    #[serde(flatten)]
    pub rollup: Rollup,
    pub scan_count: usize,
    /// Per-record scan time spent in this index
    pub scan_time_ms: DistributionStats,
    pub items_scanned: Option<u64>,
    pub items_returned: Option<u64>,
    pub keyspaces: Vec<String>,
    pub signature_ids: Vec<String>,
    pub metadata_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<IndexMetadata>,
}

impl IndexAggregate {
    pub fn new(index_name: &str) -> Self {
        Self {
            index_name: index_name.to_string(),
            is_primary: false,
            rollup: Rollup::default(),
            scan_count: 0,
            scan_time_ms: DistributionStats::new(),
            items_scanned: None,
            items_returned: None,
            keyspaces: Vec::new(),
            signature_ids: Vec::new(),
            metadata_available: false,
            metadata: None,
        }
    }

    /// Entry for an index known only from metadata
    pub fn from_metadata(metadata: &IndexMetadata) -> Self {
        let mut aggregate = Self::new(&metadata.name);
        aggregate.is_primary = metadata.is_primary;
        aggregate.keyspaces.extend(metadata.keyspace.clone());
        aggregate.metadata_available = true;
        aggregate.metadata = Some(metadata.clone());
        aggregate
    }

    pub fn usage_count(&self) -> usize {
        self.rollup.count
    }

    /// Mean per-record scan time
    pub fn avg_scan_time_ms(&self) -> Option<f64> {
        self.scan_time_ms.mean()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyspaceAggregate {
    pub keyspace: String,
    #[serde(flatten)]
    pub rollup: Rollup,
    pub items_fetched: Option<u64>,
    pub indexes: Vec<String>,
    pub primary_scan_count: usize,
    pub schema_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<CollectionSchema>,
}

impl KeyspaceAggregate {
    pub fn new(keyspace: &str) -> Self {
        Self {
            keyspace: keyspace.to_string(),
            rollup: Rollup::default(),
            items_fetched: None,
            indexes: Vec::new(),
            primary_scan_count: 0,
            schema_available: false,
            schema: None,
        }
    }
}

// ========================================
// Dimensions / Global
// ========================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyedRollup {
    pub key: String,
    #[serde(flatten)]
    pub rollup: Rollup,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DimensionRollups {
    pub by_user: Vec<KeyedRollup>,
    pub by_node: Vec<KeyedRollup>,
    pub by_statement_type: Vec<KeyedRollup>,
    pub by_state: Vec<KeyedRollup>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalSummary {
    pub total_records: usize,
    pub records_with_plan: usize,
    pub records_without_plan: usize,
    /// Records without a usable `requestTime`
    pub undated_records: usize,
    pub first_request_time: Option<DateTime<Utc>>,
    pub last_request_time: Option<DateTime<Utc>>,
    pub elapsed_ms: DistributionStats,
    pub execution_ms: DistributionStats,
    pub service_ms: DistributionStats,
    pub parse_plan_ms: DistributionStats,
    pub used_memory_bytes: DistributionStats,
    pub result_count: DistributionStats,
    pub result_size_bytes: DistributionStats,
    pub states: BTreeMap<QueryState, usize>,
    pub statement_types: BTreeMap<StatementType, usize>,
    pub timeouts: TimeoutCounts,
    pub use_keys_count: usize,
    pub primary_scan_count: usize,
    pub distinct_signatures: usize,
    pub distinct_indexes: usize,
    pub distinct_keyspaces: usize,
    pub operator_totals: BTreeMap<OperatorKind, OperatorTotals>,
    pub operator_anomalies: usize,
    pub plan_warnings: usize,
}

/// Every aggregate family of one analysis pass
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Aggregates {
    pub granularity: TimeGranularity,
    pub timeout_policy: TimeoutPolicy,
    pub global: GlobalSummary,
    pub time_buckets: Vec<TimeBucketAggregate>,
    pub statement_groups: Vec<StatementGroupAggregate>,
    pub indexes: Vec<IndexAggregate>,
    pub keyspaces: Vec<KeyspaceAggregate>,
    pub dimensions: DimensionRollups,
}

impl Aggregates {
    pub fn statement_group(&self, signature_id: &str) -> Option<&StatementGroupAggregate> {
        self.statement_groups.iter().find(|g| g.signature_id == signature_id)
    }

    pub fn index(&self, index_name: &str) -> Option<&IndexAggregate> {
        self.indexes.iter().find(|i| i.index_name == index_name)
    }

    pub fn keyspace(&self, keyspace: &str) -> Option<&KeyspaceAggregate> {
        self.keyspaces.iter().find(|k| k.keyspace == keyspace)
    }
}
