//! Data models for completed-request analysis
//!
//! Everything here is produced once per analysis run and treated as
//! read-only afterwards. Optional numeric fields distinguish "not reported by
//! the server" (`None`) from a reported zero.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

// ========================================
// Query Record
// ========================================

/// One parsed completed request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRecord {
    pub request_id: String,
    /// Position of the record in the input array
    pub input_index: usize,
    pub statement: String,
    pub statement_signature: String,
    pub signature_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prepared_name: Option<String>,
    pub statement_type: StatementType,
    pub state: QueryState,
    pub timings: Timings,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_time: Option<DateTime<Utc>>,
    pub resource_usage: ResourceUsage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan_consistency: Option<String>,
    pub use_keys: bool,
    pub shape: StatementShape,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_addr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_context_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub error_messages: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub phase_counts: BTreeMap<String, u64>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub phase_operators: BTreeMap<String, u64>,
    pub plan: PlanSummary,
    /// Raw plan subtree, shared read-only
    #[serde(skip)]
    pub plan_root: Option<Arc<serde_json::Value>>,
}

impl QueryRecord {
    pub fn has_plan(&self) -> bool {
        self.plan_root.is_some()
    }

    pub fn mentions_timeout(&self) -> bool {
        self.error_messages
            .iter()
            .any(|msg| msg.to_ascii_lowercase().contains("timeout"))
    }
}

/// Durations normalized to milliseconds
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Timings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_ms: Option<f64>,
    /// Kernel time summed over plan operators
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kernel_ms: Option<f64>,
}

impl Timings {
    pub fn parse_plan_ms(&self) -> Option<f64> {
        match (self.parse_ms, self.plan_ms) {
            (None, None) => None,
            (parse, plan) => Some(parse.unwrap_or(0.0) + plan.unwrap_or(0.0)),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceUsage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used_memory_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_quota: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_count: Option<u64>,
}

/// Literal-independent facts about a statement's text
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatementShape {
    pub has_where: bool,
    pub has_aggregate: bool,
    pub select_star: bool,
    pub has_limit: bool,
    pub has_order_by: bool,
    pub uses_keys_clause: bool,
    /// `LIKE` against a string literal starting with `%` or `_`
    pub leading_wildcard_like: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StatementType {
    Select,
    Insert,
    Upsert,
    Update,
    Delete,
    Merge,
    Create,
    Drop,
    Alter,
    Build,
    Explain,
    Prepare,
    Execute,
    Infer,
    Advise,
    Grant,
    Revoke,
    #[default]
    Other,
}

impl StatementType {
    /// Classify by the leading keyword; `WITH` introduces a SELECT
    pub fn from_statement(statement: &str) -> Self {
        let first = statement
            .trim_start_matches(|c: char| c.is_whitespace() || c == '(')
            .split(|c: char| !c.is_ascii_alphabetic())
            .next()
            .unwrap_or("")
            .to_ascii_uppercase();

        match first.as_str() {
            "SELECT" | "WITH" => Self::Select,
            "INSERT" => Self::Insert,
            "UPSERT" => Self::Upsert,
            "UPDATE" => Self::Update,
            "DELETE" => Self::Delete,
            "MERGE" => Self::Merge,
            "CREATE" => Self::Create,
            "DROP" => Self::Drop,
            "ALTER" => Self::Alter,
            "BUILD" => Self::Build,
            "EXPLAIN" => Self::Explain,
            "PREPARE" => Self::Prepare,
            "EXECUTE" => Self::Execute,
            "INFER" => Self::Infer,
            "ADVISE" => Self::Advise,
            "GRANT" => Self::Grant,
            "REVOKE" => Self::Revoke,
            _ => Self::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Select => "SELECT",
            Self::Insert => "INSERT",
            Self::Upsert => "UPSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Merge => "MERGE",
            Self::Create => "CREATE",
            Self::Drop => "DROP",
            Self::Alter => "ALTER",
            Self::Build => "BUILD",
            Self::Explain => "EXPLAIN",
            Self::Prepare => "PREPARE",
            Self::Execute => "EXECUTE",
            Self::Infer => "INFER",
            Self::Advise => "ADVISE",
            Self::Grant => "GRANT",
            Self::Revoke => "REVOKE",
            Self::Other => "OTHER",
        }
    }

    pub fn is_mutation(&self) -> bool {
        matches!(self, Self::Insert | Self::Upsert | Self::Update | Self::Delete | Self::Merge)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryState {
    Completed,
    Running,
    Cancelled,
    Timeout,
    Fatal,
    Errors,
    Stopped,
    #[default]
    Other,
}

impl QueryState {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "completed" | "success" => Self::Completed,
            "running" => Self::Running,
            "cancelled" | "canceled" => Self::Cancelled,
            "timeout" | "timedout" | "timed out" => Self::Timeout,
            "fatal" => Self::Fatal,
            "errors" | "error" => Self::Errors,
            "stopped" | "closed" => Self::Stopped,
            _ => Self::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Running => "running",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
            Self::Fatal => "fatal",
            Self::Errors => "errors",
            Self::Stopped => "stopped",
            Self::Other => "other",
        }
    }
}

/// Timeout classification of a single record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutClass {
    Actual,
    Approaching,
    None,
}

// ========================================
// Plan Walk Output
// ========================================

/// Operator category derived from the `#operator` tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorKind {
    IndexScan,
    PrimaryScan,
    KeyScan,
    Fetch,
    Filter,
    Join,
    Aggregate,
    Sort,
    Project,
    Limit,
    Mutation,
    Structural,
    Other,
}

impl OperatorKind {
    pub fn is_index_scan(&self) -> bool {
        matches!(self, Self::IndexScan | Self::PrimaryScan)
    }
}

/// One plan node's contribution
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorStat {
    /// Raw `#operator` tag
    pub operator: String,
    pub kind: OperatorKind,
    pub depth: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyspace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items_in: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items_out: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub self_time_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cumulative_time_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kernel_time_ms: Option<f64>,
    /// itemsOut exceeded itemsIn
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub anomaly: bool,
}

/// Per-kind totals; each sum stays `None` until some operator reports it
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorTotals {
    pub count: usize,
    pub items_in: Option<u64>,
    pub items_out: Option<u64>,
    pub time_ms: Option<f64>,
}

impl OperatorTotals {
    pub fn add(&mut self, op: &OperatorStat) {
        self.count += 1;
        self.items_in = add_opt(self.items_in, op.items_in);
        self.items_out = add_opt(self.items_out, op.items_out);
        self.time_ms = add_opt(self.time_ms, op.self_time_ms);
    }
}

/// Sum that keeps "absent" distinct from zero
pub fn add_opt<T: std::ops::Add<Output = T>>(acc: Option<T>, value: Option<T>) -> Option<T> {
    match (acc, value) {
        (Some(a), Some(b)) => Some(a + b),
        (a, None) => a,
        (None, b) => b,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanWarning {
    /// A node was reached twice
    Cycle { depth: usize, operator: Option<String> },
    /// Descent stopped at the configured depth cap
    DepthLimit { depth: usize, operator: Option<String> },
    /// The plan was a string that did not parse as JSON
    Unparseable { message: String },
    /// A plan node was neither an object nor an array
    NotAnObject { depth: usize },
}

/// Index usage of one record, grouped by index name
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexTouch {
    pub index_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyspace: Option<String>,
    pub is_primary: bool,
    pub scan_count: usize,
    pub items_scanned: Option<u64>,
    pub items_returned: Option<u64>,
    pub scan_time_ms: Option<f64>,
}

/// Plan walker output attached to each record
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanSummary {
    pub present: bool,
    pub operators: Vec<OperatorStat>,
    pub totals: BTreeMap<OperatorKind, OperatorTotals>,
    /// Index names in first-seen order
    pub indexes: Vec<String>,
    pub keyspaces: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<PlanWarning>,
    pub anomaly_count: usize,
    /// Plan durations that failed to parse
    #[serde(skip_serializing_if = "is_zero")]
    pub unparsed_durations: usize,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

impl PlanSummary {
    /// Summary for a record without a plan: every derived counter is absent
    pub fn absent() -> Self {
        Self::default()
    }

    pub fn index_scans(&self) -> impl Iterator<Item = &OperatorStat> {
        self.operators.iter().filter(|op| op.kind.is_index_scan())
    }

    /// Total self time of index and primary scans
    pub fn index_scan_time_ms(&self) -> Option<f64> {
        self.index_scans()
            .fold(None, |acc, op| add_opt(acc, op.self_time_ms))
    }

    /// Items read by index scans; `itemsIn` when reported, else `itemsOut`
    pub fn items_scanned(&self) -> Option<u64> {
        self.index_scans()
            .fold(None, |acc, op| add_opt(acc, op.items_in.or(op.items_out)))
    }

    /// Documents returned by fetch operators
    pub fn items_fetched(&self) -> Option<u64> {
        self.totals
            .get(&OperatorKind::Fetch)
            .and_then(|t| t.items_out.or(t.items_in))
    }

    pub fn uses_primary_scan(&self) -> bool {
        self.totals.contains_key(&OperatorKind::PrimaryScan)
    }

    pub fn has_key_scan(&self) -> bool {
        self.totals.contains_key(&OperatorKind::KeyScan)
    }

    pub fn fetches_after_index_scan(&self) -> bool {
        self.totals.contains_key(&OperatorKind::Fetch)
            && (self.totals.contains_key(&OperatorKind::IndexScan)
                || self.totals.contains_key(&OperatorKind::PrimaryScan))
    }

    /// Index scans grouped by index name in first-seen order
    pub fn index_touches(&self) -> Vec<IndexTouch> {
        let mut touches: Vec<IndexTouch> = Vec::new();

        for op in self.index_scans() {
            let Some(name) = op.index_name.as_deref() else {
                continue;
            };

            let touch = match touches.iter().position(|t| t.index_name == name) {
                Some(pos) => &mut touches[pos],
                None => {
                    touches.push(IndexTouch {
                        index_name: name.to_string(),
                        keyspace: op.keyspace.clone(),
                        is_primary: false,
                        scan_count: 0,
                        items_scanned: None,
                        items_returned: None,
                        scan_time_ms: None,
                    });
                    let last = touches.len() - 1;
                    &mut touches[last]
                },
            };

            touch.scan_count += 1;
            touch.is_primary |= op.kind == OperatorKind::PrimaryScan;
            touch.items_scanned = add_opt(touch.items_scanned, op.items_in.or(op.items_out));
            touch.items_returned = add_opt(touch.items_returned, op.items_out);
            touch.scan_time_ms = add_opt(touch.scan_time_ms, op.self_time_ms);
            if touch.keyspace.is_none() {
                touch.keyspace = op.keyspace.clone();
            }
        }

        touches
    }
}

// ========================================
// Parse Summary
// ========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NotAnObject,
    MissingContainer,
    MissingRequestId,
    DuplicateRequestId,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotAnObject => "not_an_object",
            Self::MissingContainer => "missing_container",
            Self::MissingRequestId => "missing_request_id",
            Self::DuplicateRequestId => "duplicate_request_id",
        }
    }
}

/// Post-parse tally; `valid + skipped == total_input` always holds
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseSummary {
    pub total_input: usize,
    pub valid: usize,
    pub skipped: usize,
    pub skip_reasons: BTreeMap<SkipReason, usize>,
    /// Per-field count of duration strings with an unrecognized unit
    pub unparsed_durations: BTreeMap<String, usize>,
    pub unparsed_timestamps: usize,
    pub duplicate_request_ids: Vec<String>,
    pub records_with_plan: usize,
    pub plan_warnings: usize,
    pub index_documents_skipped: usize,
    pub schema_documents_skipped: usize,
}

impl ParseSummary {
    pub fn record_skip(&mut self, reason: SkipReason) {
        self.skipped += 1;
        *self.skip_reasons.entry(reason).or_insert(0) += 1;
    }

    pub fn record_unparsed_duration(&mut self, field: &str) {
        *self.unparsed_durations.entry(field.to_string()).or_insert(0) += 1;
    }
}

// ========================================
// Index / Schema Metadata
// ========================================

/// One secondary or primary index definition
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexMetadata {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyspace: Option<String>,
    pub is_primary: bool,
    pub index_keys: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub using: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_replica: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub definition: Option<String>,
}

/// Inferred schema of one collection
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSchema {
    pub collection: String,
    pub document_count: u64,
    pub flavors: Vec<SchemaFlavor>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaFlavor {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flavor: Option<String>,
    pub document_count: u64,
    pub field_names: Vec<String>,
}

// ========================================
// Insights
// ========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Confidence classification of a rule's output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleStatus {
    /// Computed from the uploaded data
    Live,
    /// Computed, but with heuristics still being tuned
    Beta,
    /// Static advisory text
    Placeholder,
}

/// One rule finding
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Insight {
    pub rule_id: String,
    pub severity: Severity,
    pub status: RuleStatus,
    pub title: String,
    pub description: String,
    pub affected_count: usize,
    pub sample_query_ids: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metrics: BTreeMap<String, f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
}

/// A rule that errored or panicked and was left out of the results
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleFailure {
    pub rule_id: String,
    pub message: String,
}

// ========================================
// Flow Graph
// ========================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowQueryNode {
    pub signature_id: String,
    pub statement_signature: String,
    pub representative_statement: String,
    pub count: usize,
    /// Group touched no index
    pub isolated: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowIndexNode {
    pub index_name: String,
    /// Tells apart same-named indexes on different keyspaces
    pub keyspaces: Vec<String>,
    pub is_primary: bool,
    pub usage_count: usize,
    pub metadata_available: bool,
    /// Index seen by no captured query
    pub isolated: bool,
}

/// Aggregated relationship between a statement group and an index
///
/// Isolated nodes get a zero-weight edge with the missing side set to `None`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowEdge {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_name: Option<String>,
    pub occurrences: usize,
    pub items_scanned: u64,
    pub items_fetched: u64,
    pub scan_time_ms: f64,
    /// Combined scan and fetch counters
    pub weight: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowGraph {
    pub query_nodes: Vec<FlowQueryNode>,
    pub index_nodes: Vec<FlowIndexNode>,
    pub edges: Vec<FlowEdge>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_type_from_statement() {
        assert_eq!(StatementType::from_statement("select * from b"), StatementType::Select);
        assert_eq!(
            StatementType::from_statement("  WITH x AS (SELECT 1) SELECT x"),
            StatementType::Select
        );
        assert_eq!(StatementType::from_statement("(SELECT 1)"), StatementType::Select);
        assert_eq!(StatementType::from_statement("UPSERT INTO b VALUES"), StatementType::Upsert);
        assert_eq!(StatementType::from_statement(""), StatementType::Other);
    }

    #[test]
    fn test_query_state_parse() {
        assert_eq!(QueryState::parse("completed"), QueryState::Completed);
        assert_eq!(QueryState::parse("FATAL"), QueryState::Fatal);
        assert_eq!(QueryState::parse("timeout"), QueryState::Timeout);
        assert_eq!(QueryState::parse("weird"), QueryState::Other);
    }

    #[test]
    fn test_add_opt_keeps_absent_distinct() {
        assert_eq!(add_opt::<u64>(None, None), None);
        assert_eq!(add_opt(None, Some(0u64)), Some(0));
        assert_eq!(add_opt(Some(2u64), None), Some(2));
        assert_eq!(add_opt(Some(2u64), Some(3)), Some(5));
    }

    #[test]
    fn test_absent_plan_has_no_counters() {
        let plan = PlanSummary::absent();
        assert!(!plan.present);
        assert_eq!(plan.index_scan_time_ms(), None);
        assert_eq!(plan.items_scanned(), None);
        assert_eq!(plan.items_fetched(), None);
        assert!(!plan.uses_primary_scan());
        assert!(plan.index_touches().is_empty());
    }

    #[test]
    fn test_parse_plan_ms() {
        let timings = Timings { parse_ms: Some(1.0), ..Default::default() };
        assert_eq!(timings.parse_plan_ms(), Some(1.0));
        assert_eq!(Timings::default().parse_plan_ms(), None);
    }
}
