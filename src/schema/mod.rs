//! Avro schema types and parsing.
//!
//! Schema JSON parsing, named type lookup, and resolution of values written
//! with one schema into another.

pub mod evolution;
mod parser;
mod resolution;
mod types;

pub use parser::{parse_schema, SchemaParser};
pub use resolution::SchemaResolutionContext;
pub use types::*;
