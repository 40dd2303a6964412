//! Operator classification
//!
//! Maps `#operator` tags to [`OperatorKind`] and names the counter keys each
//! kind reports under. Tags differ across server versions (`IndexScan`,
//! `IndexScan2`, `IndexScan3`), so unknown tags fall back to prefix matching
//! before landing in `Other`.

use crate::services::query_analyzer::models::OperatorKind;
use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Name of the primary index in plan output
pub const PRIMARY_INDEX_NAME: &str = "#primary";

static OPERATOR_TABLE: Lazy<HashMap<&'static str, OperatorKind>> = Lazy::new(|| {
    use OperatorKind::*;

    let entries: &[(&str, OperatorKind)] = &[
        // Scans
        ("IndexScan", IndexScan),
        ("IndexScan2", IndexScan),
        ("IndexScan3", IndexScan),
        ("IndexCountScan", IndexScan),
        ("IndexCountScan2", IndexScan),
        ("IndexCountDistinctScan2", IndexScan),
        ("IndexFtsSearch", IndexScan),
        ("DistinctScan", IndexScan),
        ("IntersectScan", Structural),
        ("OrderedIntersectScan", Structural),
        ("UnionScan", Structural),
        ("PrimaryScan", PrimaryScan),
        ("PrimaryScan3", PrimaryScan),
        ("KeyScan", KeyScan),
        ("ExpressionScan", Other),
        ("ValueScan", Other),
        ("DummyScan", Other),
        ("CountScan", Other),
        // Document access
        ("Fetch", Fetch),
        ("DummyFetch", Fetch),
        // Filtering
        ("Filter", Filter),
        ("Let", Filter),
        ("With", Filter),
        // Joins
        ("Join", Join),
        ("NestedLoopJoin", Join),
        ("HashJoin", Join),
        ("IndexJoin", Join),
        ("Nest", Join),
        ("NestedLoopNest", Join),
        ("HashNest", Join),
        ("IndexNest", Join),
        ("Unnest", Join),
        // Grouping
        ("InitialGroup", Aggregate),
        ("IntermediateGroup", Aggregate),
        ("FinalGroup", Aggregate),
        ("WindowAggregate", Aggregate),
        // Ordering
        ("Order", Sort),
        ("Sort", Sort),
        // Projection
        ("InitialProject", Project),
        ("FinalProject", Project),
        ("IndexCountProject", Project),
        ("Distinct", Project),
        // Pagination
        ("Limit", Limit),
        ("Offset", Limit),
        // Mutations
        ("SendInsert", Mutation),
        ("SendUpsert", Mutation),
        ("SendUpdate", Mutation),
        ("SendDelete", Mutation),
        ("Clone", Mutation),
        ("Set", Mutation),
        ("Unset", Mutation),
        ("Merge", Mutation),
        // Plan structure
        ("Sequence", Structural),
        ("Parallel", Structural),
        ("Authorize", Structural),
        ("Stream", Structural),
        ("Alias", Structural),
        ("Collect", Structural),
        ("Receive", Structural),
        ("Channel", Structural),
        ("UnionAll", Structural),
        ("IntersectAll", Structural),
        ("ExceptAll", Structural),
        ("Discard", Structural),
        ("Prepare", Structural),
        ("Explain", Structural),
    ];

    entries.iter().copied().collect()
});

/// Counter key aliases for one operator kind, checked in order
#[derive(Debug, Clone, Copy)]
pub struct CounterAliases {
    pub items_in: &'static [&'static str],
    pub items_out: &'static [&'static str],
}

const GENERAL_COUNTERS: CounterAliases = CounterAliases {
    items_in: &["#itemsIn", "itemsIn"],
    items_out: &["#itemsOut", "itemsOut", "itemsCount", "#itemsCount"],
};

const FETCH_COUNTERS: CounterAliases = CounterAliases {
    items_in: &["#itemsIn", "itemsIn"],
    items_out: &["#itemsOut", "itemsOut", "#itemsFetched", "itemsFetched", "itemsCount"],
};

const NO_COUNTERS: CounterAliases = CounterAliases { items_in: &[], items_out: &[] };

/// Keys holding the operator's own execution time
pub const EXEC_TIME_KEYS: &[&str] = &["execTime", "#execTime"];
/// Keys holding service time spent waiting on other services
pub const SERV_TIME_KEYS: &[&str] = &["servTime", "#servTime"];
/// Keys holding time spent in the query kernel
pub const KERN_TIME_KEYS: &[&str] = &["kernTime", "#kernTime"];

/// Classify an operator tag
///
/// Any index scan against `#primary` counts as a primary scan.
pub fn classify(tag: &str, index_name: Option<&str>) -> OperatorKind {
    let kind = OPERATOR_TABLE
        .get(tag)
        .copied()
        .unwrap_or_else(|| classify_by_prefix(tag));

    if kind == OperatorKind::IndexScan && index_name == Some(PRIMARY_INDEX_NAME) {
        return OperatorKind::PrimaryScan;
    }

    kind
}

fn classify_by_prefix(tag: &str) -> OperatorKind {
    if tag.starts_with("PrimaryScan") {
        OperatorKind::PrimaryScan
    } else if tag.starts_with("IndexScan") || tag.starts_with("IndexCount") {
        OperatorKind::IndexScan
    } else if tag.starts_with("Group") {
        OperatorKind::Aggregate
    } else if tag.starts_with("Send") {
        OperatorKind::Mutation
    } else if tag.ends_with("Join") || tag.ends_with("Nest") {
        OperatorKind::Join
    } else {
        OperatorKind::Other
    }
}

/// Whether the tag is known to the table or a known prefix
pub fn is_known(tag: &str) -> bool {
    OPERATOR_TABLE.contains_key(tag) || classify_by_prefix(tag) != OperatorKind::Other
}

/// Counter aliases for a classified operator
///
/// Unrecognized tags report no item counters at all.
pub fn counter_aliases(kind: OperatorKind, known: bool) -> CounterAliases {
    if !known {
        return NO_COUNTERS;
    }
    match kind {
        OperatorKind::Fetch => FETCH_COUNTERS,
        _ => GENERAL_COUNTERS,
    }
}
