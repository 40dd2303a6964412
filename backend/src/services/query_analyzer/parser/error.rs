//! Parser error types for completed-request analysis

use thiserror::Error;

/// Errors raised while parsing individual field values
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Failed to parse duration: {0}")]
    ParseDurationError(String),

    #[error("Failed to parse number: {0}")]
    ParseNumberError(String),

    #[error("Failed to parse timestamp: {0}")]
    ParseTimestampError(String),

    #[error("Unexpected {found} value for {field}")]
    UnexpectedType { field: String, found: &'static str },
}

/// Result type alias for parser operations
pub type ParseResult<T> = Result<T, ParseError>;

/// Errors that abort a whole analysis run
///
/// No partial session is produced when one of these is returned.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Input is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Expected a JSON array of completed requests, found {0}")]
    NotAnArray(&'static str),

    #[error("Input array is empty")]
    EmptyInput,
}

/// Name of a JSON value's type, for error messages
pub fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
