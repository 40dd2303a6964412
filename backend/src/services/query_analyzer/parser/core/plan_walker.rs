//! Execution plan walker
//!
//! Walks a `meta().plan` operator tree depth-first with an explicit stack,
//! producing one [`OperatorStat`] per `#operator` node plus per-kind totals.
//!
//! ```text
//! Sequence ──► ~children ──► [ IndexScan3, Fetch, Parallel ──► ~child ──► Sequence ... ]
//! ```
//!
//! Nodes without an `#operator` tag (the `{"plan": ..., "text": ...}` wrapper,
//! arrays of subplans) are transparent: their children are walked but they
//! produce no operator. A node reached twice or below the depth cap stops
//! descent there and leaves a [`PlanWarning`] instead of failing the record.

use crate::services::query_analyzer::models::{
    OperatorStat, OperatorTotals, PlanSummary, PlanWarning, add_opt,
};
use crate::services::query_analyzer::parser::core::operator_classifier::{
    self, EXEC_TIME_KEYS, KERN_TIME_KEYS, SERV_TIME_KEYS,
};
use crate::services::query_analyzer::parser::core::value_parser::ValueParser;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};

/// Keys under which child operators appear, walked in this order
const CHILD_KEYS: &[&str] =
    &["~children", "~child", "first", "second", "input", "scans", "scan", "plan", "~subqueries"];

/// Default maximum plan depth
pub const DEFAULT_MAX_DEPTH: usize = 256;

enum Frame<'a> {
    Enter { node: &'a Value, depth: usize, parent: Option<usize> },
    Exit { op: usize },
}

#[derive(Default)]
struct WalkState {
    operators: Vec<OperatorStat>,
    parents: Vec<Option<usize>>,
    child_time: Vec<Option<f64>>,
    warnings: Vec<PlanWarning>,
    unparsed_durations: usize,
}

/// Plan walker with a configurable depth cap
#[derive(Debug, Clone)]
pub struct PlanWalker {
    max_depth: usize,
}

impl Default for PlanWalker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH)
    }
}

impl PlanWalker {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth: max_depth.max(1) }
    }

    /// Walk a plan tree; `None` yields a summary with every counter absent
    pub fn walk(&self, root: Option<&Value>) -> PlanSummary {
        let Some(root) = root else {
            return PlanSummary::absent();
        };

        let mut state = WalkState::default();
        let mut visited: HashSet<*const Value> = HashSet::new();
        let mut stack = vec![Frame::Enter { node: root, depth: 0, parent: None }];

        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Enter { node, depth, parent } => {
                    let operator_tag = node
                        .get("#operator")
                        .and_then(Value::as_str)
                        .map(str::to_string);

                    if depth > self.max_depth {
                        state
                            .warnings
                            .push(PlanWarning::DepthLimit { depth, operator: operator_tag });
                        continue;
                    }

                    if !visited.insert(std::ptr::from_ref(node)) {
                        state.warnings.push(PlanWarning::Cycle { depth, operator: operator_tag });
                        continue;
                    }

                    match node {
                        Value::Object(map) => {
                            let current = match operator_tag {
                                Some(tag) => {
                                    let op = Self::extract_operator(&tag, map, depth, &mut state);
                                    state.operators.push(op);
                                    state.parents.push(parent);
                                    state.child_time.push(None);
                                    let index = state.operators.len() - 1;
                                    stack.push(Frame::Exit { op: index });
                                    Some(index)
                                },
                                None => parent,
                            };

                            // Reverse push keeps children in document order
                            let mut children: Vec<&Value> = Vec::new();
                            for key in CHILD_KEYS {
                                match map.get(*key) {
                                    Some(Value::Array(items)) => children.extend(items.iter()),
                                    Some(child @ Value::Object(_)) => children.push(child),
                                    _ => {},
                                }
                            }
                            for child in children.into_iter().rev() {
                                stack.push(Frame::Enter { node: child, depth: depth + 1, parent: current });
                            }
                        },
                        Value::Array(items) => {
                            for child in items.iter().rev() {
                                stack.push(Frame::Enter { node: child, depth: depth + 1, parent });
                            }
                        },
                        _ => state.warnings.push(PlanWarning::NotAnObject { depth }),
                    }
                },
                Frame::Exit { op } => {
                    let cumulative = add_opt(state.operators[op].self_time_ms, state.child_time[op]);
                    state.operators[op].cumulative_time_ms = cumulative;
                    if let Some(parent) = state.parents[op] {
                        state.child_time[parent] = add_opt(state.child_time[parent], cumulative);
                    }
                },
            }
        }

        if !state.warnings.is_empty() {
            tracing::debug!("Plan walk finished with {} warning(s)", state.warnings.len());
        }

        Self::summarize(state)
    }

    fn extract_operator(
        tag: &str,
        node: &Map<String, Value>,
        depth: usize,
        state: &mut WalkState,
    ) -> OperatorStat {
        let index_name = node.get("index").and_then(Value::as_str).map(str::to_string);
        let kind = operator_classifier::classify(tag, index_name.as_deref());
        let aliases = operator_classifier::counter_aliases(kind, operator_classifier::is_known(tag));

        let stats = node.get("#stats").and_then(Value::as_object);

        let items_in = lookup(node, stats, aliases.items_in).and_then(ValueParser::count_value);
        let items_out = lookup(node, stats, aliases.items_out).and_then(ValueParser::count_value);

        let mut duration = |keys: &[&str]| -> Option<f64> {
            let raw = lookup(node, stats, keys)?;
            match ValueParser::duration_value_ms(keys[0], raw) {
                Ok(ms) => Some(ms),
                Err(e) => {
                    tracing::debug!("Ignoring plan {} on {}: {}", keys[0], tag, e);
                    state.unparsed_durations += 1;
                    None
                },
            }
        };

        let exec = duration(EXEC_TIME_KEYS);
        let serv = duration(SERV_TIME_KEYS);
        let kern = duration(KERN_TIME_KEYS);

        OperatorStat {
            operator: tag.to_string(),
            kind,
            depth,
            index_name,
            keyspace: Self::keyspace_path(node),
            items_in,
            items_out,
            self_time_ms: add_opt(exec, serv),
            cumulative_time_ms: None,
            kernel_time_ms: kern,
            anomaly: matches!((items_in, items_out), (Some(i), Some(o)) if o > i),
        }
    }

    /// `bucket.scope.collection` when the node names all three, else the bare
    /// keyspace; the default collection collapses to its bucket
    fn keyspace_path(node: &Map<String, Value>) -> Option<String> {
        let keyspace = node.get("keyspace").and_then(Value::as_str)?;
        match (
            node.get("bucket").and_then(Value::as_str),
            node.get("scope").and_then(Value::as_str),
        ) {
            (Some(bucket), Some("_default")) if keyspace == "_default" => Some(bucket.to_string()),
            (Some(bucket), Some(scope)) => Some(format!("{}.{}.{}", bucket, scope, keyspace)),
            _ => Some(keyspace.to_string()),
        }
    }

    fn summarize(state: WalkState) -> PlanSummary {
        let mut totals: BTreeMap<_, OperatorTotals> = BTreeMap::new();
        let mut indexes: Vec<String> = Vec::new();
        let mut keyspaces: Vec<String> = Vec::new();
        let mut anomaly_count = 0;

        for op in &state.operators {
            totals.entry(op.kind).or_default().add(op);

            if op.anomaly {
                anomaly_count += 1;
            }
            if op.kind.is_index_scan()
                && let Some(name) = &op.index_name
                && !indexes.contains(name)
            {
                indexes.push(name.clone());
            }
            if let Some(keyspace) = &op.keyspace
                && !keyspaces.contains(keyspace)
            {
                keyspaces.push(keyspace.clone());
            }
        }

        PlanSummary {
            present: true,
            operators: state.operators,
            totals,
            indexes,
            keyspaces,
            warnings: state.warnings,
            anomaly_count,
            unparsed_durations: state.unparsed_durations,
        }
    }
}

/// First non-null value among `keys`, preferring `#stats` over the node itself
fn lookup<'a>(
    node: &'a Map<String, Value>,
    stats: Option<&'a Map<String, Value>>,
    keys: &[&str],
) -> Option<&'a Value> {
    keys.iter().find_map(|key| {
        stats
            .and_then(|s| s.get(*key))
            .or_else(|| node.get(*key))
            .filter(|v| !v.is_null())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::query_analyzer::models::OperatorKind;
    use serde_json::json;

    fn sample_plan() -> Value {
        json!({
            "#operator": "Sequence",
            "#stats": {"#phaseSwitches": 1, "execTime": "1µs"},
            "~children": [
                {
                    "#operator": "IndexScan3",
                    "index": "idx_type",
                    "keyspace": "travel",
                    "#stats": {"#itemsOut": 120, "execTime": "2ms", "servTime": "8ms"}
                },
                {
                    "#operator": "Fetch",
                    "keyspace": "travel",
                    "#stats": {"#itemsIn": 120, "#itemsOut": 120, "execTime": "1ms", "servTime": "30ms"}
                },
                {
                    "#operator": "Parallel",
                    "~child": {
                        "#operator": "Sequence",
                        "~children": [
                            {"#operator": "Filter", "#stats": {"#itemsIn": 120, "#itemsOut": 10, "execTime": "500µs"}},
                            {"#operator": "InitialProject", "#stats": {"#itemsIn": 10, "#itemsOut": 10}}
                        ]
                    }
                }
            ]
        })
    }

    #[test]
    fn test_walk_extracts_operators_in_document_order() {
        let plan = sample_plan();
        let summary = PlanWalker::default().walk(Some(&plan));

        let tags: Vec<&str> = summary.operators.iter().map(|op| op.operator.as_str()).collect();
        assert_eq!(
            tags,
            vec!["Sequence", "IndexScan3", "Fetch", "Parallel", "Sequence", "Filter", "InitialProject"]
        );
        assert_eq!(summary.indexes, vec!["idx_type".to_string()]);
        assert_eq!(summary.keyspaces, vec!["travel".to_string()]);
        assert!(summary.warnings.is_empty());
    }

    #[test]
    fn test_walk_counters_and_times() {
        let plan = sample_plan();
        let summary = PlanWalker::default().walk(Some(&plan));

        assert_eq!(summary.items_scanned(), Some(120));
        assert_eq!(summary.items_fetched(), Some(120));
        assert!((summary.index_scan_time_ms().unwrap() - 10.0).abs() < 1e-9);

        let filter = &summary.totals[&OperatorKind::Filter];
        assert_eq!(filter.count, 1);
        assert_eq!(filter.items_in, Some(120));
        assert_eq!(filter.items_out, Some(10));

        // InitialProject reports no times at all
        let project = &summary.totals[&OperatorKind::Project];
        assert_eq!(project.time_ms, None);
    }

    #[test]
    fn test_cumulative_time_includes_children() {
        let plan = sample_plan();
        let summary = PlanWalker::default().walk(Some(&plan));

        let root = &summary.operators[0];
        // 0.001 + 10 + 31 + 0.5
        assert!((root.cumulative_time_ms.unwrap() - 41.501).abs() < 1e-9);

        let parallel = summary.operators.iter().find(|op| op.operator == "Parallel").unwrap();
        assert_eq!(parallel.self_time_ms, None);
        assert!((parallel.cumulative_time_ms.unwrap() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_missing_plan_is_absent_not_zero() {
        let summary = PlanWalker::default().walk(None);
        assert!(!summary.present);
        assert!(summary.operators.is_empty());
        assert_eq!(summary.items_scanned(), None);
        assert_eq!(summary.index_scan_time_ms(), None);
    }

    #[test]
    fn test_primary_scan_detection() {
        let plan = json!({
            "#operator": "Sequence",
            "~children": [
                {"#operator": "PrimaryScan3", "index": "#primary", "keyspace": "b", "#stats": {"#itemsOut": 50000}},
                {"#operator": "Fetch", "keyspace": "b"}
            ]
        });
        let summary = PlanWalker::default().walk(Some(&plan));

        assert!(summary.uses_primary_scan());
        let touches = summary.index_touches();
        assert_eq!(touches.len(), 1);
        assert!(touches[0].is_primary);
        assert_eq!(touches[0].items_scanned, Some(50000));
        // Fetch reported no counters
        assert_eq!(summary.items_fetched(), None);
    }

    #[test]
    fn test_depth_cap_records_warning() {
        let mut plan = json!({"#operator": "Filter"});
        for _ in 0..10 {
            plan = json!({"#operator": "Sequence", "~children": [plan]});
        }

        let summary = PlanWalker::new(4).walk(Some(&plan));

        assert_eq!(summary.operators.len(), 5);
        assert!(matches!(summary.warnings[0], PlanWarning::DepthLimit { depth: 5, .. }));
    }

    #[test]
    fn test_items_out_exceeding_items_in_is_flagged() {
        let plan = json!({"#operator": "Filter", "#stats": {"#itemsIn": 5, "#itemsOut": 9}});
        let summary = PlanWalker::default().walk(Some(&plan));

        assert!(summary.operators[0].anomaly);
        assert_eq!(summary.anomaly_count, 1);
    }

    #[test]
    fn test_wrapper_and_non_object_nodes() {
        let plan = json!({
            "plan": {"#operator": "KeyScan", "#stats": {"#itemsOut": 3}},
            "~subqueries": [42]
        });
        let summary = PlanWalker::default().walk(Some(&plan));

        assert!(summary.has_key_scan());
        assert_eq!(summary.operators.len(), 1);
        assert_eq!(summary.warnings, vec![PlanWarning::NotAnObject { depth: 1 }]);
    }

    #[test]
    fn test_unknown_operator_and_bad_durations() {
        let plan = json!({
            "#operator": "Teleport",
            "#stats": {"#itemsIn": 5, "#itemsOut": 5, "execTime": "3 fortnights"}
        });
        let summary = PlanWalker::default().walk(Some(&plan));

        let op = &summary.operators[0];
        assert_eq!(op.kind, OperatorKind::Other);
        assert_eq!(op.items_in, None);
        assert_eq!(op.self_time_ms, None);
        assert_eq!(summary.unparsed_durations, 1);
    }

    #[test]
    fn test_keyspace_path_with_scope() {
        let plan = json!({
            "#operator": "IndexScan3",
            "index": "idx_a",
            "bucket": "travel",
            "scope": "inventory",
            "keyspace": "airline"
        });
        let summary = PlanWalker::default().walk(Some(&plan));
        assert_eq!(summary.keyspaces, vec!["travel.inventory.airline".to_string()]);
    }

    #[test]
    fn test_default_collection_collapses_to_bucket() {
        let plan = json!({
            "#operator": "IndexScan3",
            "index": "idx_a",
            "bucket": "travel",
            "scope": "_default",
            "keyspace": "_default"
        });
        let summary = PlanWalker::default().walk(Some(&plan));
        assert_eq!(summary.keyspaces, vec!["travel".to_string()]);
    }
}
