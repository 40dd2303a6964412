//! Couchbase Query Analyzer
//!
//! Parses `system:completed_requests` dumps, aggregates them and runs the
//! insight catalog over the result.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       AnalysisSession                        │
//! │                                                              │
//! │   requests JSON       indexes JSON        schema JSON        │
//! │        │                   │                   │             │
//! │        ▼                   ▼                   ▼             │
//! │  ┌────────────┐     ┌────────────┐      ┌────────────┐       │
//! │  │  Record    │     │   Index    │      │   Schema   │       │
//! │  │ Normalizer │     │   Parser   │      │   Parser   │       │
//! │  │ PlanWalker │     └─────┬──────┘      └─────┬──────┘       │
//! │  │ Signature  │           │                   │              │
//! │  └─────┬──────┘           │                   │              │
//! │        ▼                  ▼                   ▼              │
//! │  ┌────────────────────────────────────────────────────┐      │
//! │  │                AggregationEngine                   │      │
//! │  │  global · time buckets · statement groups ·        │      │
//! │  │  indexes · keyspaces · dimensions                  │      │
//! │  └───────────────┬──────────────────────┬─────────────┘      │
//! │                  ▼                      ▼                    │
//! │          ┌──────────────┐       ┌──────────────┐             │
//! │          │  RuleEngine  │       │  FlowGraph   │             │
//! │          │  (insights)  │       │   Builder    │             │
//! │          └──────────────┘       └──────────────┘             │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use cb_query_analyzer::services::query_analyzer::{AnalysisConfig, analyze};
//!
//! let requests: serde_json::Value = serde_json::from_str(&dump)?;
//! let session = analyze(requests, None, None, &AnalysisConfig::default())?;
//!
//! for insight in &session.insights.insights {
//!     println!("[{:?}] {}: {}", insight.severity, insight.title, insight.description);
//! }
//! ```

pub mod aggregator;
pub mod flow_graph;
pub mod insights;
pub mod models;
pub mod parser;
pub mod session;


pub use flow_graph::FlowGraphBuilder;
pub use insights::{InsightReport, InsightThresholds, RuleEngine};
pub use parser::AnalysisError;
pub use session::{AnalysisConfig, AnalysisSession};

use serde_json::Value;

/// Analyze one upload
///
/// Fails only when `requests` is not a non-empty array (or `{"results": [...]}`
/// wrapper). Malformed elements are skipped and counted in the summary.
pub fn analyze(
    requests: Value,
    indexes: Option<&Value>,
    schema: Option<&Value>,
    config: &AnalysisConfig,
) -> Result<AnalysisSession, AnalysisError> {
    AnalysisSession::build(requests, indexes, schema, config)
}

/// Parse raw text and analyze it
pub fn analyze_text(
    requests: &str,
    indexes: Option<&str>,
    schema: Option<&str>,
    config: &AnalysisConfig,
) -> Result<AnalysisSession, AnalysisError> {
    let requests: Value = serde_json::from_str(requests)?;
    let indexes: Option<Value> = indexes.map(serde_json::from_str).transpose()?;
    let schema: Option<Value> = schema.map(serde_json::from_str).transpose()?;
    analyze(requests, indexes.as_ref(), schema.as_ref(), config)
}
