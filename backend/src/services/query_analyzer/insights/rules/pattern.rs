//! Statement text pattern rules

use super::super::{InsightContext, InsightRule, RuleError, format_percent};
use crate::services::query_analyzer::models::{
    Insight, QueryRecord, RuleStatus, Severity, StatementType,
};

fn reads_keyspace(record: &QueryRecord) -> bool {
    record.statement_signature.split_whitespace().any(|t| t == "FROM")
}

// ============================================================================
// missing_where_clause
// ============================================================================

/// Non-aggregate statements that read or modify a whole keyspace
pub struct MissingWhereClause;

impl MissingWhereClause {
    fn is_candidate(record: &QueryRecord) -> bool {
        match record.statement_type {
            StatementType::Select => {
                reads_keyspace(record) && !record.shape.has_aggregate && !record.use_keys
            },
            StatementType::Update | StatementType::Delete => !record.use_keys,
            _ => false,
        }
    }
}

impl InsightRule for MissingWhereClause {
    fn id(&self) -> &str {
        "missing_where_clause"
    }

    fn title(&self) -> &str {
        "Missing WHERE clause"
    }

    fn status(&self) -> RuleStatus {
        RuleStatus::Live
    }

    fn evaluate(&self, ctx: &InsightContext) -> Result<Option<Insight>, RuleError> {
        let candidates: Vec<&QueryRecord> =
            ctx.records.iter().filter(|r| Self::is_candidate(r)).collect();
        if candidates.is_empty() {
            return Ok(None);
        }

        let missing: Vec<&QueryRecord> = candidates
            .iter()
            .copied()
            .filter(|r| !r.shape.has_where)
            .collect();
        let fraction = missing.len() as f64 / candidates.len() as f64;
        if missing.is_empty() || fraction <= ctx.thresholds.missing_where_fraction {
            return Ok(None);
        }

        let mutations = missing.iter().filter(|r| r.statement_type.is_mutation()).count();
        let description = format!(
            "{} of {} non-aggregate statements ({}) have no WHERE clause{}",
            missing.len(),
            candidates.len(),
            format_percent(fraction),
            if mutations > 0 {
                format!(", {} of them UPDATE or DELETE", mutations)
            } else {
                String::new()
            }
        );

        Ok(Some(
            self.insight(
                Severity::Warning,
                description,
                missing.len(),
                ctx.sample_ids(missing.iter().copied()),
            )
            .with_metric("fraction", fraction)
            .with_metric("mutations", mutations as f64)
            .with_recommendation("Add a selective predicate or a LIMIT; unfiltered statements scan the whole keyspace"),
        ))
    }
}

// ============================================================================
// leading_wildcard_like
// ============================================================================

/// `LIKE '%...'` cannot use an index range
pub struct LeadingWildcardLike;

impl InsightRule for LeadingWildcardLike {
    fn id(&self) -> &str {
        "leading_wildcard_like"
    }

    fn title(&self) -> &str {
        "Leading wildcard LIKE patterns"
    }

    fn status(&self) -> RuleStatus {
        RuleStatus::Live
    }

    fn evaluate(&self, ctx: &InsightContext) -> Result<Option<Insight>, RuleError> {
        let affected: Vec<&QueryRecord> = ctx
            .records
            .iter()
            .filter(|r| r.shape.leading_wildcard_like)
            .collect();
        if affected.is_empty() {
            return Ok(None);
        }

        let groups = ctx
            .aggregates
            .statement_groups
            .iter()
            .filter(|g| g.leading_wildcard_like_count > 0)
            .count();
        let description = format!(
            "{} queries in {} statement groups use LIKE with a leading wildcard",
            affected.len(),
            groups
        );
        Ok(Some(
            self.insight(
                Severity::Warning,
                description,
                affected.len(),
                ctx.sample_ids(affected.iter().copied()),
            )
            .with_metric("statementGroups", groups as f64)
            .with_recommendation(
                "Use a Search (FTS) index, or store a reversed or tokenized copy of the field",
            ),
        ))
    }
}

// ============================================================================
// select_star
// ============================================================================

pub struct SelectStar;

impl InsightRule for SelectStar {
    fn id(&self) -> &str {
        "select_star"
    }

    fn title(&self) -> &str {
        "SELECT * usage"
    }

    fn status(&self) -> RuleStatus {
        RuleStatus::Beta
    }

    fn evaluate(&self, ctx: &InsightContext) -> Result<Option<Insight>, RuleError> {
        let selects = ctx
            .records
            .iter()
            .filter(|r| r.statement_type == StatementType::Select)
            .count();
        if selects == 0 {
            return Ok(None);
        }

        let affected: Vec<&QueryRecord> = ctx
            .records
            .iter()
            .filter(|r| r.statement_type == StatementType::Select && r.shape.select_star)
            .collect();
        let fraction = affected.len() as f64 / selects as f64;
        if affected.is_empty() || fraction <= ctx.thresholds.select_star_fraction {
            return Ok(None);
        }

        let description = format!(
            "{} of {} SELECT statements ({}) project every field",
            affected.len(),
            selects,
            format_percent(fraction)
        );
        Ok(Some(
            self.insight(
                Severity::Info,
                description,
                affected.len(),
                ctx.sample_ids(affected.iter().copied()),
            )
            .with_metric("fraction", fraction)
            .with_recommendation("Project only the fields the application reads to enable covering indexes"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::query_analyzer::insights::rules::test_support::Fixture;
    use serde_json::json;

    #[test]
    fn test_missing_where_fraction() {
        let fixture = Fixture::new(json!([
            {"requestId": "r1", "statement": "SELECT * FROM b"},
            {"requestId": "r2", "statement": "SELECT name FROM b WHERE id = 1"},
            {"requestId": "r3", "statement": "SELECT COUNT(*) FROM b"},
            {"requestId": "r4", "statement": "DELETE FROM b"},
            {"requestId": "r5", "statement": "SELECT 1"},
            {"requestId": "r6", "statement": "SELECT * FROM b USE KEYS 'k'"}
        ]));

        let insight = MissingWhereClause.evaluate(&fixture.context()).unwrap().unwrap();
        assert_eq!(insight.affected_count, 2);
        assert_eq!(insight.sample_query_ids, vec!["r1", "r4"]);
        assert_eq!(insight.metrics["mutations"], 1.0);
        assert!((insight.metrics["fraction"] - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_where_below_threshold() {
        let mut items: Vec<serde_json::Value> = (0..19)
            .map(|i| json!({"requestId": format!("r{}", i), "statement": format!("SELECT a FROM b WHERE x = {}", i)}))
            .collect();
        items.push(json!({"requestId": "all", "statement": "SELECT a FROM b"}));

        let fixture = Fixture::new(serde_json::Value::Array(items));
        assert!(MissingWhereClause.evaluate(&fixture.context()).unwrap().is_none());
    }

    #[test]
    fn test_leading_wildcard_like() {
        let fixture = Fixture::new(json!([
            {"requestId": "r1", "statement": "SELECT a FROM b WHERE name LIKE '%son'"},
            {"requestId": "r2", "statement": "SELECT a FROM b WHERE name LIKE '%ez'"},
            {"requestId": "r3", "statement": "SELECT a FROM b WHERE name LIKE 'Jo%'"}
        ]));

        let insight = LeadingWildcardLike.evaluate(&fixture.context()).unwrap().unwrap();
        assert_eq!(insight.affected_count, 2);
        assert_eq!(insight.metrics["statementGroups"], 1.0);
    }

    #[test]
    fn test_select_star_fraction() {
        let fixture = Fixture::new(json!([
            {"requestId": "r1", "statement": "SELECT * FROM b WHERE x = 1"},
            {"requestId": "r2", "statement": "SELECT a FROM b WHERE x = 1"},
            {"requestId": "r3", "statement": "UPDATE b SET a = 1 WHERE x = 2"}
        ]));

        let insight = SelectStar.evaluate(&fixture.context()).unwrap().unwrap();
        assert_eq!(insight.affected_count, 1);
        assert_eq!(insight.metrics["fraction"], 0.5);
    }
}
