//! Analysis session
//!
//! One session holds everything derived from one upload: records, parse
//! summary, aggregates, ranked insights and the flow graph. A session is
//! built in full or not at all; re-analysis builds a new session and the
//! caller swaps it in, so consumers never see a half-built state.

use crate::services::query_analyzer::aggregator::{
    AggregationEngine, AggregationOptions, Aggregates, TimeGranularity,
};
use crate::services::query_analyzer::flow_graph::FlowGraphBuilder;
use crate::services::query_analyzer::insights::{
    InsightContext, InsightReport, InsightThresholds, RuleEngine,
};
use crate::services::query_analyzer::models::{FlowGraph, ParseSummary, QueryRecord};
use crate::services::query_analyzer::parser::core::plan_walker::DEFAULT_MAX_DEPTH;
use crate::services::query_analyzer::parser::core::{PlanWalker, RecordNormalizer};
use crate::services::query_analyzer::parser::error::json_type_name;
use crate::services::query_analyzer::parser::specialized::{
    IndexCatalog, IndexParser, SchemaCatalog, SchemaParser,
};
use crate::services::query_analyzer::parser::AnalysisError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Instant;

/// Tunables of one analysis run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub time_granularity: TimeGranularity,
    pub max_plan_depth: usize,
    pub thresholds: InsightThresholds,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            time_granularity: TimeGranularity::default(),
            max_plan_depth: DEFAULT_MAX_DEPTH,
            thresholds: InsightThresholds::default(),
        }
    }
}

impl AnalysisConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_plan_depth == 0 {
            return Err("max_plan_depth must be at least 1".to_string());
        }
        self.thresholds.check()
    }

    fn aggregation_options(&self) -> AggregationOptions {
        AggregationOptions {
            granularity: self.time_granularity,
            max_samples: self.thresholds.max_samples,
            timeout_policy: self.thresholds.timeout_policy(),
        }
    }
}

/// Immutable result of one analysis run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisSession {
    pub created_at: DateTime<Utc>,
    pub summary: ParseSummary,
    pub records: Vec<QueryRecord>,
    pub aggregates: Aggregates,
    #[serde(flatten)]
    pub insights: InsightReport,
    pub flow_graph: FlowGraph,
    #[serde(skip)]
    pub index_catalog: IndexCatalog,
    #[serde(skip)]
    pub schema_catalog: SchemaCatalog,
    #[serde(skip)]
    pub thresholds: InsightThresholds,
}

impl AnalysisSession {
    /// Run the whole pipeline over one upload
    ///
    /// `requests` must be a non-empty array of completed requests, or an
    /// object whose `results` field is one. Index and schema payloads are
    /// optional and never fatal.
    pub fn build(
        requests: Value,
        indexes: Option<&Value>,
        schema: Option<&Value>,
        config: &AnalysisConfig,
    ) -> Result<Self, AnalysisError> {
        let started = Instant::now();
        let items = unwrap_request_array(requests)?;

        let normalizer = RecordNormalizer::new(PlanWalker::new(config.max_plan_depth));
        let output = normalizer.normalize_all(items);
        let mut summary = output.summary;
        let records = output.records;

        let index_catalog = indexes.map(|v| IndexParser::new().parse(v)).unwrap_or_default();
        let schema_catalog = schema.map(|v| SchemaParser::new().parse(v)).unwrap_or_default();
        summary.index_documents_skipped = index_catalog.skipped;
        summary.schema_documents_skipped = schema_catalog.skipped;

        let aggregates = AggregationEngine::aggregate(
            config.aggregation_options(),
            &records,
            &index_catalog,
            &schema_catalog,
        );

        let ctx = InsightContext {
            records: &records,
            aggregates: &aggregates,
            index_catalog: &index_catalog,
            schema_catalog: &schema_catalog,
            thresholds: &config.thresholds,
        };
        let insights = RuleEngine::new().evaluate(&ctx);
        let flow_graph = FlowGraphBuilder::build(&aggregates);

        tracing::info!(
            "Analysis complete in {:?}: {} input, {} valid, {} skipped, {} statement groups, {} insights",
            started.elapsed(),
            summary.total_input,
            summary.valid,
            summary.skipped,
            aggregates.statement_groups.len(),
            insights.insights.len()
        );

        Ok(Self {
            created_at: Utc::now(),
            summary,
            records,
            aggregates,
            insights,
            flow_graph,
            index_catalog,
            schema_catalog,
            thresholds: config.thresholds.clone(),
        })
    }

    pub fn context(&self) -> InsightContext<'_> {
        InsightContext {
            records: &self.records,
            aggregates: &self.aggregates,
            index_catalog: &self.index_catalog,
            schema_catalog: &self.schema_catalog,
            thresholds: &self.thresholds,
        }
    }
}

fn unwrap_request_array(requests: Value) -> Result<Vec<Value>, AnalysisError> {
    let items = match requests {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("results") {
            Some(Value::Array(items)) => items,
            _ => return Err(AnalysisError::NotAnArray("object")),
        },
        other => return Err(AnalysisError::NotAnArray(json_type_name(&other))),
    };

    if items.is_empty() {
        return Err(AnalysisError::EmptyInput);
    }
    Ok(items)
}
