//! Aggregation engine and its output families

pub mod aggregates;
pub mod engine;
pub mod histogram;
pub mod time_bucket;

pub use aggregates::{
    Aggregates, DimensionRollups, GlobalSummary, GroupIndexUsage, IndexAggregate, KeyedRollup,
    KeyspaceAggregate, Rollup, StatementGroupAggregate, TimeBucketAggregate, TimeoutCounts,
    TimeoutPolicy,
};
pub use engine::{AggregationEngine, AggregationOptions, DEFAULT_MAX_SAMPLES};
pub use histogram::{DistributionStats, DistributionSummary, LatencyHistogram};
pub use time_bucket::TimeGranularity;
