//! Schema inference rules

use super::super::{InsightContext, InsightRule, RuleError};
use crate::services::query_analyzer::models::{CollectionSchema, Insight, RuleStatus, Severity};
use std::collections::BTreeSet;

/// Field names present in some flavors of a collection but not all of them
fn drifting_fields(schema: &CollectionSchema) -> BTreeSet<&str> {
    let mut union: BTreeSet<&str> = BTreeSet::new();
    for flavor in &schema.flavors {
        union.extend(flavor.field_names.iter().map(String::as_str));
    }
    union
        .into_iter()
        .filter(|field| {
            !schema
                .flavors
                .iter()
                .all(|f| f.field_names.iter().any(|n| n.as_str() == *field))
        })
        .collect()
}

// ============================================================================
// schema_flavor_drift
// ============================================================================

/// Collections whose documents come in several shapes
pub struct SchemaFlavorDrift;

impl InsightRule for SchemaFlavorDrift {
    fn id(&self) -> &str {
        "schema_flavor_drift"
    }

    fn title(&self) -> &str {
        "Schema flavor drift"
    }

    fn status(&self) -> RuleStatus {
        RuleStatus::Beta
    }

    fn evaluate(&self, ctx: &InsightContext) -> Result<Option<Insight>, RuleError> {
        if ctx.schema_catalog.is_empty() {
            return Ok(None);
        }

        let drifting: Vec<(&CollectionSchema, BTreeSet<&str>)> = ctx
            .schema_catalog
            .collections
            .iter()
            .filter(|c| c.flavors.len() > 1)
            .map(|c| (c, drifting_fields(c)))
            .filter(|(_, fields)| !fields.is_empty())
            .collect();
        if drifting.is_empty() {
            return Ok(None);
        }

        let mut samples: Vec<String> = Vec::new();
        let mut queried = 0usize;
        for (schema, _) in &drifting {
            let Some(keyspace) = ctx
                .aggregates
                .keyspaces
                .iter()
                .find(|k| k.schema.as_ref().is_some_and(|s| s.collection == schema.collection))
            else {
                continue;
            };
            queried += keyspace.rollup.count;
            for id in &keyspace.rollup.sample_query_ids {
                if samples.len() < ctx.thresholds.max_samples && !samples.contains(id) {
                    samples.push(id.clone());
                }
            }
        }

        let details: Vec<String> = drifting
            .iter()
            .map(|(schema, fields)| {
                format!(
                    "{} ({} flavors; optional fields: {})",
                    schema.collection,
                    schema.flavors.len(),
                    fields.iter().copied().collect::<Vec<_>>().join(", ")
                )
            })
            .collect();
        let description = format!(
            "{} collections hold documents of differing shapes: {}",
            drifting.len(),
            details.join("; ")
        );

        Ok(Some(
            self.insight(Severity::Info, description, drifting.len(), samples)
                .with_metric("collections", drifting.len() as f64)
                .with_metric("queriesTouching", queried as f64)
                .with_recommendation(
                    "Index keys on optional fields miss documents of other flavors; \
                     use partial indexes per document type",
                ),
        ))
    }
}

pub fn get_rules() -> Vec<Box<dyn InsightRule>> {
    vec![Box::new(SchemaFlavorDrift)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::query_analyzer::insights::rules::test_support::Fixture;
    use serde_json::json;

    #[test]
    fn test_flavor_drift() {
        let fixture = Fixture::with_metadata(
            json!([{
                "completed_requests": {"requestId": "r1", "statement": "SELECT name FROM hotel WHERE x = 1"},
                "plan": {"#operator": "Fetch", "keyspace": "hotel"}
            }]),
            None,
            Some(json!([
                {"collection": "hotel", "schema": [[
                    {"#docs": 90, "Flavor": "type = \"hotel\"", "properties": {"name": {}, "city": {}}},
                    {"#docs": 10, "Flavor": "", "properties": {"name": {}, "legacy_id": {}}}
                ]]},
                {"collection": "airline", "schema": [[
                    {"#docs": 5, "properties": {"name": {}}}
                ]]}
            ])),
        );

        let insight = SchemaFlavorDrift.evaluate(&fixture.context()).unwrap().unwrap();
        assert_eq!(insight.affected_count, 1);
        assert_eq!(insight.sample_query_ids, vec!["r1"]);
        assert!(insight.description.contains("city, legacy_id"));
    }

    #[test]
    fn test_no_schema_input() {
        let fixture = Fixture::new(json!([{"requestId": "r1", "statement": "SELECT 1"}]));
        assert!(SchemaFlavorDrift.evaluate(&fixture.context()).unwrap().is_none());
    }
}
