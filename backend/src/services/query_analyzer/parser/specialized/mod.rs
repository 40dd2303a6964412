//! Parsers for the optional companion inputs
//!
//! Index metadata and schema inference documents are parsed independently
//! of the completed requests and merged into the aggregates by key.

mod index_parser;
mod schema_parser;

pub use index_parser::{IndexCatalog, IndexParser};
pub use schema_parser::{SchemaCatalog, SchemaParser, UNNAMED_COLLECTION};
