//! Completed-request parser module
//!
//! Turns raw `system:completed_requests` dumps and the optional index and
//! schema documents into typed records and lookup catalogs.

pub mod core;
pub mod error;
pub mod specialized;

pub use error::{AnalysisError, ParseError, ParseResult};
