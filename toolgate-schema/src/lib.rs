#![forbid(unsafe_code)]

//! Compiled JSON Schema cache keyed by content hash.

pub mod cache;
pub mod validate;

pub use cache::{CachedValidator, EvictionStrategy, Lookup, OldestInsertedHalf, SchemaCache, DEFAULT_CAPACITY};
pub use validate::{compile, SchemaViolation, ValidationMode, ValidationReport};

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("invalid schema: {0}")]
    Invalid(String),
}

/// Content hash used as the cache key.
pub fn schema_hash(schema: &serde_json::Value) -> String {
    toolgate_types::content_hash(schema)
}
