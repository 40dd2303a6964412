//! Advisory rules
//!
//! These carry fixed advice text. The counts they report are simple record
//! filters; neither rule inspects index definitions or statement reuse in
//! enough depth to make a concrete recommendation.

use super::super::{InsightContext, InsightRule, RuleError};
use crate::services::query_analyzer::models::{
    Insight, QueryRecord, RuleStatus, Severity, StatementType,
};

// ============================================================================
// covering_index_opportunities
// ============================================================================

pub struct CoveringIndexOpportunities;

impl InsightRule for CoveringIndexOpportunities {
    fn id(&self) -> &str {
        "covering_index_opportunities"
    }

    fn title(&self) -> &str {
        "Covering index opportunities"
    }

    fn status(&self) -> RuleStatus {
        RuleStatus::Placeholder
    }

    fn evaluate(&self, ctx: &InsightContext) -> Result<Option<Insight>, RuleError> {
        let affected: Vec<&QueryRecord> = ctx
            .records
            .iter()
            .filter(|r| r.plan.fetches_after_index_scan())
            .collect();
        if affected.is_empty() {
            return Ok(None);
        }

        Ok(Some(
            self.insight(
                Severity::Info,
                format!(
                    "{} queries fetch documents after an index scan. A covering index \
                     containing every referenced field avoids the fetch phase.",
                    affected.len()
                ),
                affected.len(),
                ctx.sample_ids(affected.iter().copied()),
            )
            .with_recommendation(
                "Include projected and filtered fields in the index keys so the plan \
                 shows a covering IndexScan without Fetch",
            ),
        ))
    }
}

// ============================================================================
// prepared_statement_advice
// ============================================================================

pub struct PreparedStatementAdvice;

impl InsightRule for PreparedStatementAdvice {
    fn id(&self) -> &str {
        "prepared_statement_advice"
    }

    fn title(&self) -> &str {
        "Prepared statement advice"
    }

    fn status(&self) -> RuleStatus {
        RuleStatus::Placeholder
    }

    fn evaluate(&self, ctx: &InsightContext) -> Result<Option<Insight>, RuleError> {
        let repeated = |record: &QueryRecord| {
            ctx.aggregates
                .statement_group(&record.signature_id)
                .is_some_and(|g| g.count() > 1)
        };
        let affected: Vec<&QueryRecord> = ctx
            .records
            .iter()
            .filter(|r| r.prepared_name.is_none() && r.statement_type != StatementType::Execute)
            .filter(|r| repeated(r))
            .collect();
        if affected.is_empty() {
            return Ok(None);
        }

        Ok(Some(
            self.insight(
                Severity::Info,
                format!(
                    "{} ad-hoc queries repeat a statement shape seen elsewhere in the capture. \
                     Prepared statements skip parsing and planning on every execution.",
                    affected.len()
                ),
                affected.len(),
                ctx.sample_ids(affected.iter().copied()),
            )
            .with_recommendation("Use parameterized prepared statements (adhoc=false in the SDKs)"),
        ))
    }
}

pub fn get_rules() -> Vec<Box<dyn InsightRule>> {
    vec![Box::new(CoveringIndexOpportunities), Box::new(PreparedStatementAdvice)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::query_analyzer::insights::rules::test_support::Fixture;
    use serde_json::json;

    #[test]
    fn test_covering_index_counts_fetching_records() {
        let fixture = Fixture::new(json!([
            {"completed_requests": {"requestId": "r1", "statement": "SELECT * FROM b WHERE x = 1"},
             "plan": {"#operator": "Sequence", "~children": [
                {"#operator": "IndexScan3", "index": "idx_x"},
                {"#operator": "Fetch"}
             ]}},
            {"completed_requests": {"requestId": "r2", "statement": "SELECT x FROM b WHERE x = 1"},
             "plan": {"#operator": "IndexScan3", "index": "idx_x"}}
        ]));

        let insight = CoveringIndexOpportunities.evaluate(&fixture.context()).unwrap().unwrap();
        assert_eq!(insight.status, RuleStatus::Placeholder);
        assert_eq!(insight.sample_query_ids, vec!["r1"]);
    }

    #[test]
    fn test_prepared_statement_advice() {
        let fixture = Fixture::new(json!([
            {"requestId": "r1", "statement": "SELECT a FROM b WHERE x = 1"},
            {"requestId": "r2", "statement": "SELECT a FROM b WHERE x = 2"},
            {"requestId": "r3", "statement": "SELECT c FROM b WHERE y = 2"},
            {"requestId": "r4", "statement": "EXECUTE p1", "preparedName": "p1",
             "preparedText": "SELECT a FROM b WHERE x = $1"}
        ]));

        let insight = PreparedStatementAdvice.evaluate(&fixture.context()).unwrap().unwrap();
        assert_eq!(insight.sample_query_ids, vec!["r1", "r2"]);
    }
}
