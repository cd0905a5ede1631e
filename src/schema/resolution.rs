//! Named type lookup.
//!
//! Schemas reference previously defined records, enums and fixed types by
//! name. The decoder keeps those references and dereferences them on demand
//! through a [`SchemaResolutionContext`], which also keeps recursive schemas
//! finite.

use std::collections::HashMap;

use crate::error::SchemaError;
use crate::schema::AvroSchema;

/// A registry of named types keyed by fully qualified name.
#[derive(Debug, Clone, Default)]
pub struct SchemaResolutionContext {
    named_types: HashMap<String, AvroSchema>,
}

impl SchemaResolutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a named type in the context.
    pub fn register(&mut self, name: String, schema: AvroSchema) {
        self.named_types.insert(name, schema);
    }

    pub fn get(&self, name: &str) -> Option<&AvroSchema> {
        self.named_types.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.named_types.contains_key(name)
    }

    /// Build a context by collecting every named type defined inside `schema`.
    pub fn build_from_schema(schema: &AvroSchema) -> Self {
        let mut context = Self::new();
        context.extract_named_types(schema);
        context
    }

    fn extract_named_types(&mut self, schema: &AvroSchema) {
        match schema {
            AvroSchema::Record(record) => {
                self.named_types.insert(record.fullname(), schema.clone());
                for field in &record.fields {
                    self.extract_named_types(&field.schema);
                }
            }
            AvroSchema::Enum(e) => {
                self.named_types.insert(e.fullname(), schema.clone());
            }
            AvroSchema::Fixed(f) => {
                self.named_types.insert(f.fullname(), schema.clone());
            }
            AvroSchema::Array(inner) | AvroSchema::Map(inner) => self.extract_named_types(inner),
            AvroSchema::Union(variants) => {
                for variant in variants {
                    self.extract_named_types(variant);
                }
            }
            AvroSchema::Logical(logical) => {
                // decimal over fixed registers the fixed's name
                if let AvroSchema::Fixed(f) = logical.base.as_ref() {
                    self.named_types.insert(f.fullname(), schema.clone());
                }
            }
            _ => {}
        }
    }

    /// Follow `Named` references until a concrete schema is reached.
    pub fn deref<'a>(&'a self, schema: &'a AvroSchema) -> Result<&'a AvroSchema, SchemaError> {
        let mut current = schema;
        // A chain longer than the registry means a reference cycle
        for _ in 0..=self.named_types.len() {
            match current {
                AvroSchema::Named(name) => {
                    current = self
                        .named_types
                        .get(name)
                        .ok_or_else(|| SchemaError::UnresolvedName(name.clone()))?;
                }
                other => return Ok(other),
            }
        }
        Err(SchemaError::InvalidSchema(format!(
            "Cyclic named type reference: {:?}",
            schema.fullname()
        )))
    }
}
