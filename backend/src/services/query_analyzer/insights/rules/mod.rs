//! Insight rule catalog
//!
//! Declaration order here is the catalog order used to break ranking ties.

pub mod advisory;
pub mod index;
pub mod pattern;
pub mod query;
pub mod schema;

use super::InsightRule;

pub fn get_all_rules() -> Vec<Box<dyn InsightRule>> {
    let mut rules: Vec<Box<dyn InsightRule>> = Vec::new();

    // primary_index_usage, inefficient_index_scans
    rules.extend(index::get_scan_rules());

    // missing_where_clause
    rules.push(Box::new(pattern::MissingWhereClause));

    // timed_out_queries .. large_result_sets
    rules.extend(query::get_rules());

    // select_star, high_fetch_amplification, slow_parse_plan
    rules.push(Box::new(pattern::SelectStar));
    rules.push(Box::new(index::HighFetchAmplification));
    rules.push(Box::new(query::SlowParsePlan));

    // missing_index_metadata, unused_indexes
    rules.extend(index::get_metadata_rules());

    // schema_flavor_drift
    rules.extend(schema::get_rules());

    // covering_index_opportunities, prepared_statement_advice
    rules.extend(advisory::get_rules());

    rules
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_catalog_order_and_ids() {
        let ids: Vec<String> = get_all_rules().iter().map(|r| r.id().to_string()).collect();
        assert_eq!(
            ids,
            vec![
                "primary_index_usage",
                "inefficient_index_scans",
                "missing_where_clause",
                "timed_out_queries",
                "timeout_prone_queries",
                "high_memory_usage",
                "slow_use_keys",
                "leading_wildcard_like",
                "large_result_sets",
                "select_star",
                "high_fetch_amplification",
                "slow_parse_plan",
                "missing_index_metadata",
                "unused_indexes",
                "schema_flavor_drift",
                "covering_index_opportunities",
                "prepared_statement_advice",
            ]
        );
        let unique: HashSet<&String> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());
    }
}
