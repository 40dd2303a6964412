//! Record normalizer
//!
//! Converts raw completed-request documents into [`QueryRecord`]s. Each
//! element is sniffed for a known shape and handed to one extractor:
//!
//! - **Envelope**: `{"completed_requests": {...}, "plan": {...}}`, the row
//!   shape of `SELECT *, meta().plan FROM system:completed_requests`
//! - **Flat**: the request fields at the top level, as produced by exports
//!   that select individual columns
//!
//! Malformed elements are skipped and tallied; they never abort the batch.
//! Duplicate `requestId`s resolve last-write-wins: the later record replaces
//! the earlier one in the earlier one's slot, and the earlier copy counts as
//! skipped.

use crate::services::query_analyzer::models::{
    ParseSummary, PlanSummary, PlanWarning, QueryRecord, QueryState, ResourceUsage, SkipReason,
    StatementType, Timings, add_opt,
};
use crate::services::query_analyzer::parser::core::plan_walker::PlanWalker;
use crate::services::query_analyzer::parser::core::signature::SignatureBuilder;
use crate::services::query_analyzer::parser::core::value_parser::ValueParser;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

const CONTAINER_KEY: &str = "completed_requests";
const REQUEST_ID_KEYS: &[&str] = &["requestId", "requestID", "request_id"];
const FLAT_MARKER_KEYS: &[&str] = &["statement", "preparedText", "elapsedTime"];

/// Known raw document shapes
enum RawShape {
    Envelope { request: Map<String, Value>, plan: Option<Value> },
    Flat { request: Map<String, Value>, plan: Option<Value> },
}

impl RawShape {
    fn sniff(item: Value) -> Result<Self, SkipReason> {
        let Value::Object(mut obj) = item else {
            return Err(SkipReason::NotAnObject);
        };

        match obj.remove(CONTAINER_KEY) {
            Some(Value::Object(mut request)) => {
                let plan = obj.remove("plan").or_else(|| request.remove("plan"));
                Ok(RawShape::Envelope { request, plan })
            },
            Some(_) => Err(SkipReason::MissingContainer),
            None => {
                let has_id = REQUEST_ID_KEYS.iter().any(|k| obj.contains_key(*k));
                let has_marker = FLAT_MARKER_KEYS.iter().any(|k| obj.contains_key(*k));
                if has_id && has_marker {
                    let plan = obj.remove("plan");
                    Ok(RawShape::Flat { request: obj, plan })
                } else {
                    Err(SkipReason::MissingContainer)
                }
            },
        }
    }

    fn into_parts(self) -> (Map<String, Value>, Option<Value>) {
        match self {
            RawShape::Envelope { request, plan } | RawShape::Flat { request, plan } => {
                (request, plan)
            },
        }
    }
}

/// Field-level problems of one record, merged into the summary only if the record survives
#[derive(Debug, Default)]
struct RecordIssues {
    unparsed_durations: Vec<&'static str>,
    unparsed_timestamp: bool,
}

/// Normalized records plus the parse summary
#[derive(Debug)]
pub struct NormalizationOutput {
    pub records: Vec<QueryRecord>,
    pub summary: ParseSummary,
}

/// Record normalizer
#[derive(Debug, Clone, Default)]
pub struct RecordNormalizer {
    plan_walker: PlanWalker,
}

impl RecordNormalizer {
    pub fn new(plan_walker: PlanWalker) -> Self {
        Self { plan_walker }
    }

    /// Normalize every element in input order
    pub fn normalize_all(&self, items: Vec<Value>) -> NormalizationOutput {
        let mut summary = ParseSummary { total_input: items.len(), ..Default::default() };
        let mut records: Vec<QueryRecord> = Vec::with_capacity(items.len());
        let mut issues: Vec<RecordIssues> = Vec::with_capacity(items.len());
        let mut slots: HashMap<String, usize> = HashMap::new();

        for (input_index, item) in items.into_iter().enumerate() {
            let mut record_issues = RecordIssues::default();
            let record = match self.normalize_one(item, input_index, &mut record_issues) {
                Ok(record) => record,
                Err(reason) => {
                    tracing::debug!("Skipping input element {}: {}", input_index, reason.as_str());
                    summary.record_skip(reason);
                    continue;
                },
            };

            if let Some(&slot) = slots.get(&record.request_id) {
                tracing::debug!(
                    "Duplicate requestId {} at element {}, replacing element {}",
                    record.request_id,
                    input_index,
                    records[slot].input_index
                );
                if !summary.duplicate_request_ids.contains(&record.request_id) {
                    summary.duplicate_request_ids.push(record.request_id.clone());
                }
                summary.record_skip(SkipReason::DuplicateRequestId);
                records[slot] = record;
                issues[slot] = record_issues;
            } else {
                slots.insert(record.request_id.clone(), records.len());
                records.push(record);
                issues.push(record_issues);
            }
        }

        for (record, record_issues) in records.iter().zip(&issues) {
            for field in &record_issues.unparsed_durations {
                summary.record_unparsed_duration(field);
            }
            if record_issues.unparsed_timestamp {
                summary.unparsed_timestamps += 1;
            }
            if record.plan.unparsed_durations > 0 {
                *summary.unparsed_durations.entry("plan".to_string()).or_insert(0) +=
                    record.plan.unparsed_durations;
            }
            if record.has_plan() {
                summary.records_with_plan += 1;
            }
            summary.plan_warnings += record.plan.warnings.len();
        }

        summary.valid = records.len();

        tracing::info!(
            "Normalized {} of {} completed requests ({} skipped, {} with plan)",
            summary.valid,
            summary.total_input,
            summary.skipped,
            summary.records_with_plan
        );
        if !summary.unparsed_durations.is_empty() {
            tracing::warn!("Unparsed duration values: {:?}", summary.unparsed_durations);
        }

        NormalizationOutput { records, summary }
    }

    fn normalize_one(
        &self,
        item: Value,
        input_index: usize,
        issues: &mut RecordIssues,
    ) -> Result<QueryRecord, SkipReason> {
        let (request, raw_plan) = RawShape::sniff(item)?.into_parts();

        let request_id = REQUEST_ID_KEYS
            .iter()
            .find_map(|k| request.get(*k))
            .and_then(scalar_string)
            .filter(|id| !id.is_empty())
            .ok_or(SkipReason::MissingRequestId)?;

        let prepared_text = string_field(&request, "preparedText");
        let statement = string_field(&request, "statement")
            .or_else(|| prepared_text.clone())
            .unwrap_or_default();

        // EXECUTE groups with the statement it runs
        let (statement_type, grouping_text) = match prepared_text.as_deref() {
            Some(text) if StatementType::from_statement(&statement) == StatementType::Execute => {
                (StatementType::from_statement(text), text)
            },
            _ => (StatementType::from_statement(&statement), statement.as_str()),
        };
        let (signature, shape) = SignatureBuilder::analyze(grouping_text);

        let (plan_root, plan) = self.walk_plan(raw_plan);

        let phase_times = request.get("phaseTimes").and_then(Value::as_object);
        let mut duration = |field: &'static str, value: Option<&Value>| -> Option<f64> {
            let value = value.filter(|v| !v.is_null())?;
            match ValueParser::duration_value_ms(field, value) {
                Ok(ms) => Some(ms),
                Err(e) => {
                    tracing::debug!("Request {}: ignoring {}: {}", request_id, field, e);
                    issues.unparsed_durations.push(field);
                    None
                },
            }
        };

        let timings = Timings {
            elapsed_ms: duration("elapsedTime", request.get("elapsedTime")),
            execution_ms: duration("executionTime", request.get("executionTime")),
            service_ms: duration("serviceTime", request.get("serviceTime")),
            cpu_ms: duration("cpuTime", request.get("cpuTime")),
            parse_ms: duration("phaseTimes.parse", phase_times.and_then(|p| p.get("parse"))),
            plan_ms: duration("phaseTimes.plan", phase_times.and_then(|p| p.get("plan"))),
            kernel_ms: plan
                .operators
                .iter()
                .fold(None, |acc, op| add_opt(acc, op.kernel_time_ms)),
        };

        let request_time = match request.get("requestTime").filter(|v| !v.is_null()) {
            Some(raw) => match ValueParser::timestamp_value(raw) {
                Ok(ts) => Some(ts),
                Err(e) => {
                    tracing::debug!("Request {}: ignoring requestTime: {}", request_id, e);
                    issues.unparsed_timestamp = true;
                    None
                },
            },
            None => None,
        };

        let resource_usage = ResourceUsage {
            used_memory_bytes: request.get("usedMemory").and_then(ValueParser::bytes_value),
            memory_quota: request.get("memoryQuota").and_then(ValueParser::bytes_value),
            result_count: request.get("resultCount").and_then(ValueParser::count_value),
            result_size_bytes: request.get("resultSize").and_then(ValueParser::bytes_value),
            error_count: request.get("errorCount").and_then(ValueParser::count_value),
        };

        let state = string_field(&request, "state")
            .map(|s| QueryState::parse(&s))
            .unwrap_or_default();

        let use_keys = shape.uses_keys_clause || plan.has_key_scan();

        Ok(QueryRecord {
            request_id,
            input_index,
            statement,
            statement_signature: signature.text,
            signature_id: signature.id,
            prepared_name: string_field(&request, "preparedName"),
            statement_type,
            state,
            timings,
            request_time,
            resource_usage,
            scan_consistency: string_field(&request, "scanConsistency"),
            use_keys,
            shape,
            user: user_field(&request),
            node: string_field(&request, "node"),
            remote_addr: string_field(&request, "remoteAddr"),
            user_agent: string_field(&request, "userAgent"),
            client_context_id: string_field(&request, "clientContextID"),
            error_messages: error_messages(request.get("errors")),
            phase_counts: count_map(request.get("phaseCounts")),
            phase_operators: count_map(request.get("phaseOperators")),
            plan,
            plan_root,
        })
    }

    /// Resolve the raw plan (object, or JSON text) and walk it
    fn walk_plan(&self, raw_plan: Option<Value>) -> (Option<Arc<Value>>, PlanSummary) {
        let root = match raw_plan {
            None | Some(Value::Null) => return (None, PlanSummary::absent()),
            Some(Value::String(text)) => match serde_json::from_str::<Value>(&text) {
                Ok(parsed) => parsed,
                Err(e) => {
                    let mut summary = PlanSummary::absent();
                    summary
                        .warnings
                        .push(PlanWarning::Unparseable { message: e.to_string() });
                    return (None, summary);
                },
            },
            Some(other) => other,
        };

        let summary = self.plan_walker.walk(Some(&root));
        (Some(Arc::new(root)), summary)
    }
}

/// String or number rendered as a string
fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn string_field(request: &Map<String, Value>, key: &str) -> Option<String> {
    request
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// `users` may be a single name, a comma list, or an array
fn user_field(request: &Map<String, Value>) -> Option<String> {
    match request.get("users").or_else(|| request.get("user"))? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Array(items) => {
            let names: Vec<&str> = items.iter().filter_map(Value::as_str).collect();
            (!names.is_empty()).then(|| names.join(","))
        },
        _ => None,
    }
}

fn error_messages(errors: Option<&Value>) -> Vec<String> {
    let Some(Value::Array(items)) = errors else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.clone()),
            Value::Object(obj) => obj
                .get("msg")
                .or_else(|| obj.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        })
        .collect()
}

fn count_map(value: Option<&Value>) -> BTreeMap<String, u64> {
    value
        .and_then(Value::as_object)
        .map(|obj| {
            obj.iter()
                .filter_map(|(k, v)| ValueParser::count_value(v).map(|n| (k.clone(), n)))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn normalize(items: Vec<Value>) -> NormalizationOutput {
        RecordNormalizer::default().normalize_all(items)
    }

    #[test]
    fn test_envelope_shape() {
        let output = normalize(vec![json!({
            "completed_requests": {
                "requestId": "r-1",
                "statement": "SELECT * FROM `travel-sample` WHERE type = 'hotel'",
                "elapsedTime": "1.5s",
                "executionTime": "1.49s",
                "phaseTimes": {"parse": "120µs", "plan": "2ms"},
                "requestTime": "2024-03-01 10:15:42.123 +0000 UTC",
                "resultCount": 12,
                "resultSize": 4096,
                "usedMemory": 2048,
                "state": "completed",
                "users": "Administrator",
                "node": "10.0.0.5:8091",
                "scanConsistency": "unbounded"
            },
            "plan": {
                "#operator": "Sequence",
                "~children": [
                    {"#operator": "IndexScan3", "index": "def_type", "keyspace": "travel-sample",
                     "#stats": {"#itemsOut": 12, "execTime": "1ms", "servTime": "40ms", "kernTime": "1ms"}},
                    {"#operator": "Fetch", "keyspace": "travel-sample", "#stats": {"#itemsOut": 12}}
                ]
            }
        })]);

        assert_eq!(output.summary.valid, 1);
        assert_eq!(output.summary.records_with_plan, 1);
        let record = &output.records[0];
        assert_eq!(record.request_id, "r-1");
        assert_eq!(record.statement_type, StatementType::Select);
        assert_eq!(record.state, QueryState::Completed);
        assert_eq!(record.timings.elapsed_ms, Some(1500.0));
        assert!((record.timings.parse_ms.unwrap() - 0.12).abs() < 1e-9);
        assert_eq!(record.timings.kernel_ms, Some(1.0));
        assert_eq!(record.resource_usage.result_count, Some(12));
        assert_eq!(record.user.as_deref(), Some("Administrator"));
        assert!(record.has_plan());
        assert_eq!(record.plan.indexes, vec!["def_type".to_string()]);
        assert!(record.request_time.is_some());
        assert!(!record.use_keys);
    }

    #[test]
    fn test_flat_shape_without_plan() {
        let output = normalize(vec![json!({
            "requestId": "r1",
            "elapsedTime": "80s",
            "statement": "SELECT * FROM b",
            "state": "fatal"
        })]);

        assert_eq!(output.summary.valid, 1);
        assert_eq!(output.summary.skipped, 0);
        let record = &output.records[0];
        assert_eq!(record.statement_type, StatementType::Select);
        assert_eq!(record.state, QueryState::Fatal);
        assert_eq!(record.timings.elapsed_ms, Some(80_000.0));
        assert!(!record.has_plan());
        assert!(!record.plan.present);
        assert_eq!(record.plan.items_scanned(), None);
    }

    #[test]
    fn test_skip_reasons_are_tallied() {
        let output = normalize(vec![
            json!(42),
            json!({"something": "else"}),
            json!({"completed_requests": {"statement": "SELECT 1"}}),
            json!({"completed_requests": "not an object"}),
            json!({"requestId": "ok", "statement": "SELECT 1"}),
        ]);

        let summary = &output.summary;
        assert_eq!(summary.total_input, 5);
        assert_eq!(summary.valid, 1);
        assert_eq!(summary.skipped, 4);
        assert_eq!(summary.valid + summary.skipped, summary.total_input);
        assert_eq!(summary.skip_reasons[&SkipReason::NotAnObject], 1);
        assert_eq!(summary.skip_reasons[&SkipReason::MissingContainer], 2);
        assert_eq!(summary.skip_reasons[&SkipReason::MissingRequestId], 1);
    }

    #[test]
    fn test_duplicate_request_id_last_write_wins() {
        let output = normalize(vec![
            json!({"requestId": "dup", "statement": "SELECT 1", "elapsedTime": "1s"}),
            json!({"requestId": "other", "statement": "SELECT 2", "elapsedTime": "2s"}),
            json!({"requestId": "dup", "statement": "SELECT 3", "elapsedTime": "3s"}),
        ]);

        let summary = &output.summary;
        assert_eq!(summary.valid, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.skip_reasons[&SkipReason::DuplicateRequestId], 1);
        assert_eq!(summary.duplicate_request_ids, vec!["dup".to_string()]);

        // Winner keeps the first occurrence's slot
        assert_eq!(output.records[0].request_id, "dup");
        assert_eq!(output.records[0].timings.elapsed_ms, Some(3000.0));
        assert_eq!(output.records[0].input_index, 2);
        assert_eq!(output.records[1].request_id, "other");
    }

    #[test]
    fn test_unknown_duration_unit_is_absent_and_counted() {
        let output = normalize(vec![json!({
            "requestId": "r1",
            "statement": "SELECT 1",
            "elapsedTime": "5 fortnights",
            "executionTime": 1_000_000
        })]);

        let record = &output.records[0];
        assert_eq!(record.timings.elapsed_ms, None);
        assert_eq!(record.timings.execution_ms, Some(1.0));
        assert_eq!(output.summary.unparsed_durations["elapsedTime"], 1);
    }

    #[test]
    fn test_non_finite_durations_are_absent_and_counted() {
        let output = normalize(vec![json!({
            "requestId": "r1",
            "statement": "SELECT 1",
            "elapsedTime": "NaN",
            "executionTime": "inf",
            "serviceTime": "infinity"
        })]);

        let record = &output.records[0];
        assert_eq!(record.timings.elapsed_ms, None);
        assert_eq!(record.timings.execution_ms, None);
        assert_eq!(output.summary.unparsed_durations["elapsedTime"], 1);
        assert_eq!(output.summary.unparsed_durations["executionTime"], 1);
        assert_eq!(output.summary.unparsed_durations["serviceTime"], 1);
    }

    #[test]
    fn test_superseded_duplicate_does_not_leave_issue_tallies() {
        let output = normalize(vec![
            json!({"requestId": "dup", "statement": "SELECT 1", "elapsedTime": "bogus"}),
            json!({"requestId": "dup", "statement": "SELECT 1", "elapsedTime": "1s"}),
        ]);

        assert!(output.summary.unparsed_durations.is_empty());
    }

    #[test]
    fn test_execute_resolves_prepared_text() {
        let output = normalize(vec![
            json!({
                "requestId": "p1",
                "statement": "EXECUTE p_find",
                "preparedName": "p_find",
                "preparedText": "SELECT * FROM b WHERE id = $1"
            }),
            json!({"requestId": "p2", "statement": "SELECT * FROM b WHERE id = 7"}),
        ]);

        let prepared = &output.records[0];
        assert_eq!(prepared.statement, "EXECUTE p_find");
        assert_eq!(prepared.statement_type, StatementType::Select);
        assert_eq!(prepared.prepared_name.as_deref(), Some("p_find"));
        assert_eq!(prepared.statement_signature, output.records[1].statement_signature);
    }

    #[test]
    fn test_use_keys_from_statement_or_plan() {
        let output = normalize(vec![
            json!({"requestId": "a", "statement": "SELECT * FROM b USE KEYS 'k1'"}),
            json!({
                "requestId": "b",
                "statement": "SELECT * FROM b",
                "plan": {"#operator": "KeyScan", "#stats": {"#itemsOut": 1}}
            }),
            json!({"requestId": "c", "statement": "SELECT * FROM b WHERE x = 1"}),
        ]);

        assert!(output.records[0].use_keys);
        assert!(output.records[1].use_keys);
        assert!(!output.records[2].use_keys);
    }

    #[test]
    fn test_plan_as_json_text() {
        let output = normalize(vec![
            json!({
                "requestId": "a",
                "statement": "SELECT 1",
                "plan": "{\"#operator\": \"Sequence\", \"~children\": [{\"#operator\": \"DummyScan\"}]}"
            }),
            json!({"requestId": "b", "statement": "SELECT 1", "plan": "{not json"}),
        ]);

        assert!(output.records[0].has_plan());
        assert_eq!(output.records[0].plan.operators.len(), 2);
        assert!(!output.records[1].has_plan());
        assert!(matches!(output.records[1].plan.warnings[0], PlanWarning::Unparseable { .. }));
        assert_eq!(output.summary.plan_warnings, 1);
    }

    #[test]
    fn test_errors_and_phase_counts() {
        let output = normalize(vec![json!({
            "requestId": "e1",
            "statement": "SELECT 1",
            "state": "fatal",
            "errors": [{"code": 1080, "msg": "Timeout 1m15s exceeded"}, "plain"],
            "phaseCounts": {"fetch": 16, "indexScan": "187"},
            "users": ["alice", "bob"]
        })]);

        let record = &output.records[0];
        assert!(record.mentions_timeout());
        assert_eq!(record.error_messages.len(), 2);
        assert_eq!(record.phase_counts["indexScan"], 187);
        assert_eq!(record.user.as_deref(), Some("alice,bob"));
    }
}
