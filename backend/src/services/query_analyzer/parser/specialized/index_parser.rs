//! Index metadata parser
//!
//! Accepts the common ways index definitions get exported:
//! `SELECT * FROM system:indexes` rows (`{"indexes": {...}}`), flat
//! `system:indexes` projections, the query service `{"results": [...]}`
//! wrapper, and the index service `/indexStatus` document.

use crate::services::query_analyzer::models::IndexMetadata;
use crate::services::query_analyzer::parser::core::operator_classifier::PRIMARY_INDEX_NAME;
use crate::services::query_analyzer::parser::core::value_parser::ValueParser;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

static REPLICA_SUFFIX_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*\(replica \d+\)$").unwrap());

/// Parsed index definitions
#[derive(Debug, Clone, Default)]
pub struct IndexCatalog {
    pub indexes: Vec<IndexMetadata>,
    pub skipped: usize,
}

impl IndexCatalog {
    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty()
    }

    /// Find an index by name defined on one of `keyspaces`
    ///
    /// A definition on some other keyspace never matches once `keyspaces` is
    /// known; definitions without a keyspace match any.
    pub fn lookup(&self, name: &str, keyspaces: &[String]) -> Option<&IndexMetadata> {
        let mut fallback = None;
        for idx in self.indexes.iter().filter(|idx| idx.name == name) {
            match &idx.keyspace {
                Some(ks) if keyspaces.contains(ks) => return Some(idx),
                Some(_) if !keyspaces.is_empty() => {},
                _ => {
                    fallback = fallback.or(Some(idx));
                },
            }
        }
        fallback
    }
}

#[derive(Debug, Clone, Default)]
pub struct IndexParser;

impl IndexParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse(&self, payload: &Value) -> IndexCatalog {
        let mut catalog = IndexCatalog::default();

        for item in unwrap_items(payload) {
            let Some(obj) = item.as_object() else {
                catalog.skipped += 1;
                continue;
            };
            let definition = obj
                .get("indexes")
                .and_then(Value::as_object)
                .unwrap_or(obj);

            match Self::parse_definition(definition) {
                Some(index) => {
                    let duplicate = catalog
                        .indexes
                        .iter()
                        .any(|known| known.name == index.name && known.keyspace == index.keyspace);
                    if !duplicate {
                        catalog.indexes.push(index);
                    }
                },
                None => catalog.skipped += 1,
            }
        }

        tracing::info!(
            "Parsed {} index definitions ({} skipped)",
            catalog.indexes.len(),
            catalog.skipped
        );
        catalog
    }

    fn parse_definition(obj: &Map<String, Value>) -> Option<IndexMetadata> {
        let raw_name = ["name", "indexName", "index"]
            .iter()
            .find_map(|k| obj.get(*k).and_then(Value::as_str))?;
        let name = REPLICA_SUFFIX_REGEX.replace(raw_name.trim(), "").to_string();
        if name.is_empty() {
            return None;
        }

        let definition = text(obj, "definition");
        let is_primary = obj.get("is_primary").and_then(Value::as_bool).unwrap_or(false)
            || obj.get("isPrimary").and_then(Value::as_bool).unwrap_or(false)
            || name == PRIMARY_INDEX_NAME
            || definition
                .as_deref()
                .is_some_and(|d| d.to_ascii_uppercase().starts_with("CREATE PRIMARY INDEX"));

        let index_keys = obj
            .get("index_key")
            .or_else(|| obj.get("secExprs"))
            .and_then(Value::as_array)
            .map(|keys| keys.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default();

        let num_replica = obj
            .get("metadata")
            .and_then(|m| m.get("num_replica"))
            .or_else(|| obj.get("numReplica"))
            .and_then(ValueParser::count_value);

        Some(IndexMetadata {
            name,
            keyspace: keyspace_of(obj),
            is_primary,
            index_keys,
            condition: text(obj, "condition").or_else(|| text(obj, "where")),
            state: text(obj, "state").or_else(|| text(obj, "status")),
            using: text(obj, "using"),
            num_replica,
            definition,
        })
    }
}

/// Elements of a top-level array, `results`, or `indexes` array
fn unwrap_items(payload: &Value) -> Vec<&Value> {
    match payload {
        Value::Array(items) => items.iter().collect(),
        Value::Object(obj) => {
            for key in ["results", "indexes", "status"] {
                if let Some(Value::Array(items)) = obj.get(key) {
                    return items.iter().collect();
                }
            }
            vec![payload]
        },
        _ => {
            tracing::warn!("Index metadata payload is neither an array nor an object");
            Vec::new()
        },
    }
}

fn text(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Keyspace path in the form plan operators use
///
/// Default scope and collection collapse to the bucket name.
fn keyspace_of(obj: &Map<String, Value>) -> Option<String> {
    let (bucket, scope, collection) = match obj.get("bucket_id").and_then(Value::as_str) {
        Some(bucket) => (
            bucket,
            obj.get("scope_id").and_then(Value::as_str),
            obj.get("keyspace_id").and_then(Value::as_str),
        ),
        None => match obj.get("bucket").and_then(Value::as_str) {
            Some(bucket) => (
                bucket,
                obj.get("scope").and_then(Value::as_str),
                obj.get("collection").and_then(Value::as_str),
            ),
            None => return text(obj, "keyspace_id").or_else(|| text(obj, "keyspace")),
        },
    };

    match (scope, collection) {
        (Some(scope), Some(collection)) if !(scope == "_default" && collection == "_default") => {
            Some(format!("{}.{}.{}", bucket, scope, collection))
        },
        _ => Some(bucket.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_system_indexes_rows() {
        let payload = json!([
            {"indexes": {
                "name": "def_type",
                "keyspace_id": "travel-sample",
                "namespace_id": "default",
                "index_key": ["`type`"],
                "state": "online",
                "using": "gsi"
            }},
            {"indexes": {
                "name": "#primary",
                "keyspace_id": "travel-sample",
                "is_primary": true,
                "state": "online",
                "using": "gsi"
            }}
        ]);

        let catalog = IndexParser::new().parse(&payload);
        assert_eq!(catalog.indexes.len(), 2);
        assert_eq!(catalog.skipped, 0);
        let def_type = &catalog.indexes[0];
        assert_eq!(def_type.keyspace.as_deref(), Some("travel-sample"));
        assert_eq!(def_type.index_keys, vec!["`type`".to_string()]);
        assert!(!def_type.is_primary);
        assert!(catalog.indexes[1].is_primary);
    }

    #[test]
    fn test_collection_keyspace_path() {
        let payload = json!({"results": [{
            "name": "idx_airline",
            "bucket_id": "travel-sample",
            "scope_id": "inventory",
            "keyspace_id": "airline",
            "condition": "(`country` = \"France\")"
        }]});

        let catalog = IndexParser::new().parse(&payload);
        let index = &catalog.indexes[0];
        assert_eq!(index.keyspace.as_deref(), Some("travel-sample.inventory.airline"));
        assert!(index.condition.is_some());
    }

    #[test]
    fn test_index_status_document() {
        let payload = json!({"indexes": [
            {
                "index": "idx_city",
                "bucket": "travel-sample",
                "scope": "_default",
                "collection": "_default",
                "status": "Ready",
                "definition": "CREATE INDEX `idx_city` ON `travel-sample`(`city`)",
                "secExprs": ["`city`"],
                "numReplica": 1
            },
            {
                "index": "idx_city (replica 1)",
                "bucket": "travel-sample",
                "scope": "_default",
                "collection": "_default",
                "status": "Ready"
            },
            {"index": "#primary", "bucket": "beer-sample",
             "definition": "CREATE PRIMARY INDEX `#primary` ON `beer-sample`"}
        ]});

        let catalog = IndexParser::new().parse(&payload);
        assert_eq!(catalog.indexes.len(), 2);
        let city = &catalog.indexes[0];
        assert_eq!(city.keyspace.as_deref(), Some("travel-sample"));
        assert_eq!(city.state.as_deref(), Some("Ready"));
        assert_eq!(city.num_replica, Some(1));
        assert!(catalog.indexes[1].is_primary);
    }

    #[test]
    fn test_skips_unusable_entries() {
        let payload = json!([{"indexes": {"keyspace_id": "b"}}, 7, {"name": "ok"}]);
        let catalog = IndexParser::new().parse(&payload);
        assert_eq!(catalog.indexes.len(), 1);
        assert_eq!(catalog.skipped, 2);
    }

    #[test]
    fn test_lookup_prefers_matching_keyspace() {
        let payload = json!([
            {"name": "#primary", "keyspace_id": "a", "is_primary": true},
            {"name": "#primary", "keyspace_id": "b", "is_primary": true}
        ]);
        let catalog = IndexParser::new().parse(&payload);

        let found = catalog.lookup("#primary", &["b".to_string()]).unwrap();
        assert_eq!(found.keyspace.as_deref(), Some("b"));

        let fallback = catalog.lookup("#primary", &[]).unwrap();
        assert_eq!(fallback.keyspace.as_deref(), Some("a"));

        assert!(catalog.lookup("missing", &[]).is_none());
    }

    #[test]
    fn test_lookup_ignores_other_keyspaces() {
        let payload = json!([
            {"name": "idx_x", "keyspace_id": "b"},
            {"name": "idx_any"}
        ]);
        let catalog = IndexParser::new().parse(&payload);

        assert!(catalog.lookup("idx_x", &["c".to_string()]).is_none());
        assert_eq!(
            catalog.lookup("idx_x", &["b".to_string()]).unwrap().keyspace.as_deref(),
            Some("b")
        );
        assert!(catalog.lookup("idx_any", &["c".to_string()]).is_some());
    }
}
