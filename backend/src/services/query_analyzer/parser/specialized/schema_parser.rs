//! Schema inference parser
//!
//! Reads `INFER` output. Accepted layouts:
//! - `[{"collection": "b.s.c", "schema": [flavor, ...]}, ...]` (also `keyspace`/`name`
//!   for the collection and `flavors`/`infer`/`results` for the flavor list)
//! - `{"b.s.c": [flavor, ...], ...}`
//! - a bare flavor list, or the query service wrapper `{"results": [[flavor, ...]]}`,
//!   stored under [`UNNAMED_COLLECTION`]

use crate::services::query_analyzer::models::{CollectionSchema, SchemaFlavor};
use crate::services::query_analyzer::parser::core::value_parser::ValueParser;
use serde_json::{Map, Value};

pub const UNNAMED_COLLECTION: &str = "_unnamed";

const COLLECTION_KEYS: &[&str] = &["collection", "keyspace", "name"];
const FLAVOR_LIST_KEYS: &[&str] = &["schema", "flavors", "infer", "results"];

#[derive(Debug, Clone, Default)]
pub struct SchemaCatalog {
    pub collections: Vec<CollectionSchema>,
    pub skipped: usize,
}

impl SchemaCatalog {
    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }

    /// Match on the full path first, then on the last path segment
    pub fn lookup(&self, keyspace: &str) -> Option<&CollectionSchema> {
        self.collections
            .iter()
            .find(|c| c.collection == keyspace)
            .or_else(|| {
                let last = keyspace.rsplit('.').next().unwrap_or(keyspace);
                let mut matches = self
                    .collections
                    .iter()
                    .filter(|c| c.collection.rsplit('.').next() == Some(last));
                let first = matches.next();
                // Ambiguous short names do not match
                if matches.next().is_some() { None } else { first }
            })
    }
}

#[derive(Debug, Clone, Default)]
pub struct SchemaParser;

impl SchemaParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse(&self, payload: &Value) -> SchemaCatalog {
        let mut catalog = SchemaCatalog::default();

        match payload {
            Value::Array(items) if looks_like_flavor_list(items) => {
                Self::push(&mut catalog, UNNAMED_COLLECTION, payload);
            },
            Value::Array(items) => {
                for item in items {
                    match Self::named_entry(item) {
                        Some((name, flavors)) => Self::push(&mut catalog, &name, flavors),
                        None => catalog.skipped += 1,
                    }
                }
            },
            Value::Object(obj) => {
                if let Some((name, flavors)) = Self::named_entry(payload) {
                    Self::push(&mut catalog, &name, flavors);
                } else if let Some(results) = obj.get("results") {
                    Self::push(&mut catalog, UNNAMED_COLLECTION, results);
                } else {
                    for (name, flavors) in obj {
                        if flavors.is_array() {
                            Self::push(&mut catalog, name, flavors);
                        } else {
                            catalog.skipped += 1;
                        }
                    }
                }
            },
            _ => {
                tracing::warn!("Schema payload is neither an array nor an object");
                catalog.skipped += 1;
            },
        }

        tracing::info!(
            "Parsed schema for {} collections ({} skipped)",
            catalog.collections.len(),
            catalog.skipped
        );
        catalog
    }

    fn named_entry(item: &Value) -> Option<(String, &Value)> {
        let obj = item.as_object()?;
        let name = COLLECTION_KEYS
            .iter()
            .find_map(|k| obj.get(*k).and_then(Value::as_str))?;
        let flavors = FLAVOR_LIST_KEYS.iter().find_map(|k| obj.get(*k))?;
        Some((name.to_string(), flavors))
    }

    fn push(catalog: &mut SchemaCatalog, name: &str, flavors: &Value) {
        let flavors = flatten_flavors(flavors);
        if flavors.is_empty() {
            catalog.skipped += 1;
            return;
        }

        let parsed: Vec<SchemaFlavor> = flavors.into_iter().map(parse_flavor).collect();
        let document_count = parsed.iter().map(|f| f.document_count).sum();
        catalog.collections.push(CollectionSchema {
            collection: name.to_string(),
            document_count,
            flavors: parsed,
        });
    }
}

/// INFER wraps its flavor list in one more array
fn flatten_flavors(value: &Value) -> Vec<&Map<String, Value>> {
    match value {
        Value::Array(items) => items
            .iter()
            .flat_map(|item| match item {
                Value::Array(inner) => inner.iter().filter_map(Value::as_object).collect(),
                Value::Object(obj) => vec![obj],
                _ => Vec::new(),
            })
            .collect(),
        Value::Object(obj) => vec![obj],
        _ => Vec::new(),
    }
}

fn looks_like_flavor_list(items: &[Value]) -> bool {
    items.iter().any(|item| match item {
        Value::Object(obj) => obj.contains_key("#docs") || obj.contains_key("properties"),
        Value::Array(_) => true,
        _ => false,
    })
}

fn parse_flavor(obj: &Map<String, Value>) -> SchemaFlavor {
    let mut field_names: Vec<String> = obj
        .get("properties")
        .and_then(Value::as_object)
        .map(|props| props.keys().cloned().collect())
        .unwrap_or_default();
    field_names.sort();

    SchemaFlavor {
        flavor: obj
            .get("Flavor")
            .or_else(|| obj.get("flavor"))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        document_count: obj
            .get("#docs")
            .and_then(ValueParser::count_value)
            .unwrap_or(0),
        field_names,
    }
}
