//! Core parsing components

pub mod operator_classifier;
pub mod plan_walker;
pub mod record_normalizer;
pub mod signature;
pub mod value_parser;

pub use plan_walker::PlanWalker;
pub use record_normalizer::{NormalizationOutput, RecordNormalizer};
pub use signature::{SignatureBuilder, StatementSignature};
pub use value_parser::ValueParser;
