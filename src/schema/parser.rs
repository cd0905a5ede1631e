//! JSON schema parser for Avro schemas.
//!
//! Parses Avro schema JSON into the AvroSchema type hierarchy. Named types
//! (records, enums, fixed) are registered as they are defined so that later
//! references by name resolve to `AvroSchema::Named(fullname)`.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::error::SchemaError;
use crate::schema::{
    AvroSchema, EnumSchema, FieldSchema, FixedSchema, LogicalType, LogicalTypeName, RecordSchema,
};

/// Parse an Avro schema from a JSON string.
///
/// # Example
/// ```
/// use avro_tensor::schema::{parse_schema, AvroSchema};
///
/// let schema = parse_schema(r#"{"type": "array", "items": "int"}"#).unwrap();
/// assert_eq!(schema, AvroSchema::Array(Box::new(AvroSchema::Int)));
/// ```
pub fn parse_schema(json: &str) -> Result<AvroSchema, SchemaError> {
    let value: Value = serde_json::from_str(json)
        .map_err(|e| SchemaError::ParseError(format!("Invalid JSON: {}", e)))?;

    let mut parser = SchemaParser::new();
    parser.parse(&value)
}

/// Schema parser with named type resolution context.
#[derive(Debug, Default)]
pub struct SchemaParser {
    /// Registry of named types by their fully qualified name
    named_types: HashMap<String, AvroSchema>,
    /// Current namespace for resolving unqualified names
    current_namespace: Option<String>,
}

impl SchemaParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Named types registered so far.
    pub fn named_types(&self) -> &HashMap<String, AvroSchema> {
        &self.named_types
    }

    /// Parse a JSON value into an AvroSchema.
    pub fn parse(&mut self, value: &Value) -> Result<AvroSchema, SchemaError> {
        match value {
            Value::String(s) => self.parse_string_schema(s),
            Value::Object(obj) => self.parse_object_schema(obj),
            Value::Array(arr) => self.parse_union_schema(arr),
            _ => Err(SchemaError::InvalidSchema(format!(
                "Expected string, object, or array, found: {}",
                value
            ))),
        }
    }

    fn parse_string_schema(&self, s: &str) -> Result<AvroSchema, SchemaError> {
        match s {
            "null" => Ok(AvroSchema::Null),
            "boolean" => Ok(AvroSchema::Boolean),
            "int" => Ok(AvroSchema::Int),
            "long" => Ok(AvroSchema::Long),
            "float" => Ok(AvroSchema::Float),
            "double" => Ok(AvroSchema::Double),
            "bytes" => Ok(AvroSchema::Bytes),
            "string" => Ok(AvroSchema::String),
            name => {
                let fullname = self.resolve_name(name);
                if self.named_types.contains_key(&fullname) {
                    Ok(AvroSchema::Named(fullname))
                } else if self.named_types.contains_key(name) {
                    Ok(AvroSchema::Named(name.to_string()))
                } else {
                    Err(SchemaError::UnresolvedName(name.to_string()))
                }
            }
        }
    }

    fn parse_object_schema(&mut self, obj: &Map<String, Value>) -> Result<AvroSchema, SchemaError> {
        let type_value = obj
            .get("type")
            .ok_or_else(|| SchemaError::InvalidSchema("Missing 'type' field".to_string()))?;

        let type_str = match type_value {
            Value::String(s) => s.as_str(),
            // {"type": {...}} or {"type": [...]} wraps a full schema
            other => return self.parse(other),
        };

        match type_str {
            "null" => Ok(AvroSchema::Null),
            "boolean" => Ok(AvroSchema::Boolean),
            "int" => Ok(maybe_wrap_logical(obj, AvroSchema::Int)),
            "long" => Ok(maybe_wrap_logical(obj, AvroSchema::Long)),
            "float" => Ok(AvroSchema::Float),
            "double" => Ok(AvroSchema::Double),
            "bytes" => Ok(maybe_wrap_logical(obj, AvroSchema::Bytes)),
            "string" => Ok(maybe_wrap_logical(obj, AvroSchema::String)),
            "record" | "error" => self.parse_record_schema(obj),
            "enum" => self.parse_enum_schema(obj),
            "array" => {
                let items = obj.get("items").ok_or_else(|| {
                    SchemaError::InvalidSchema("Array missing 'items' field".to_string())
                })?;
                Ok(AvroSchema::Array(Box::new(self.parse(items)?)))
            }
            "map" => {
                let values = obj.get("values").ok_or_else(|| {
                    SchemaError::InvalidSchema("Map missing 'values' field".to_string())
                })?;
                Ok(AvroSchema::Map(Box::new(self.parse(values)?)))
            }
            "fixed" => self.parse_fixed_schema(obj),
            other => self.parse_string_schema(other).map_err(|_| {
                SchemaError::UnsupportedType(format!("Unknown type: {}", other))
            }),
        }
    }

    fn parse_union_schema(&mut self, arr: &[Value]) -> Result<AvroSchema, SchemaError> {
        if arr.is_empty() {
            return Err(SchemaError::InvalidSchema(
                "Union schema cannot be empty".to_string(),
            ));
        }
        let variants = arr
            .iter()
            .map(|v| self.parse(v))
            .collect::<Result<Vec<_>, _>>()?;
        if variants.iter().any(|v| matches!(v, AvroSchema::Union(_))) {
            return Err(SchemaError::InvalidSchema(
                "Unions may not immediately contain other unions".to_string(),
            ));
        }
        Ok(AvroSchema::Union(variants))
    }

    fn parse_record_schema(&mut self, obj: &Map<String, Value>) -> Result<AvroSchema, SchemaError> {
        let (name, namespace, fullname) = self.named_parts(obj, "Record")?;

        // Register before parsing fields so recursive references resolve
        self.named_types
            .insert(fullname.clone(), AvroSchema::Named(fullname.clone()));

        let prev_namespace = self.current_namespace.clone();
        self.current_namespace = namespace.clone();

        let fields_value = obj
            .get("fields")
            .and_then(|v| v.as_array())
            .ok_or_else(|| {
                SchemaError::InvalidSchema("Record missing 'fields' array".to_string())
            })?;
        let fields = fields_value
            .iter()
            .map(|f| self.parse_field_schema(f))
            .collect::<Result<Vec<_>, _>>();

        self.current_namespace = prev_namespace;

        let schema = AvroSchema::Record(RecordSchema {
            name,
            namespace,
            fields: fields?,
            aliases: string_list(obj.get("aliases")),
        });
        self.named_types.insert(fullname, schema.clone());
        Ok(schema)
    }

    fn parse_field_schema(&mut self, value: &Value) -> Result<FieldSchema, SchemaError> {
        let obj = value
            .as_object()
            .ok_or_else(|| SchemaError::InvalidSchema("Field must be an object".to_string()))?;
        let name = obj
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| SchemaError::InvalidSchema("Field missing 'name'".to_string()))?;
        validate_name(name, "Field")?;
        let type_value = obj
            .get("type")
            .ok_or_else(|| SchemaError::InvalidSchema(format!("Field '{}' missing 'type'", name)))?;

        Ok(FieldSchema {
            name: name.to_string(),
            schema: self.parse(type_value)?,
            default: obj.get("default").cloned(),
            aliases: string_list(obj.get("aliases")),
        })
    }

    fn parse_enum_schema(&mut self, obj: &Map<String, Value>) -> Result<AvroSchema, SchemaError> {
        let (name, namespace, fullname) = self.named_parts(obj, "Enum")?;

        let symbols = string_list(obj.get("symbols"));
        if symbols.is_empty() {
            return Err(SchemaError::InvalidSchema(format!(
                "Enum '{}' must have at least one symbol",
                fullname
            )));
        }
        for symbol in &symbols {
            validate_name(symbol, "Enum symbol")?;
        }

        let schema = AvroSchema::Enum(EnumSchema {
            name,
            namespace,
            symbols,
            aliases: string_list(obj.get("aliases")),
            default: obj.get("default").and_then(|v| v.as_str()).map(String::from),
        });
        self.named_types.insert(fullname, schema.clone());
        Ok(schema)
    }

    fn parse_fixed_schema(&mut self, obj: &Map<String, Value>) -> Result<AvroSchema, SchemaError> {
        let (name, namespace, fullname) = self.named_parts(obj, "Fixed")?;
        let size = obj
            .get("size")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| SchemaError::InvalidSchema("Fixed missing 'size' field".to_string()))?
            as usize;

        let fixed = AvroSchema::Fixed(FixedSchema {
            name,
            namespace,
            size,
            aliases: string_list(obj.get("aliases")),
        });
        let schema = maybe_wrap_logical(obj, fixed);
        self.named_types.insert(fullname, schema.clone());
        Ok(schema)
    }

    /// Split a named type's `name`/`namespace` attributes into
    /// `(short name, namespace, fullname)`.
    fn named_parts(
        &self,
        obj: &Map<String, Value>,
        kind: &str,
    ) -> Result<(String, Option<String>, String), SchemaError> {
        let raw = obj
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| SchemaError::InvalidSchema(format!("{} missing 'name' field", kind)))?;

        let (namespace, name) = match raw.rsplit_once('.') {
            Some((ns, short)) => (Some(ns.to_string()), short.to_string()),
            None => (
                obj.get("namespace")
                    .and_then(|v| v.as_str())
                    .filter(|ns| !ns.is_empty())
                    .map(String::from)
                    .or_else(|| self.current_namespace.clone()),
                raw.to_string(),
            ),
        };
        validate_name(&name, kind)?;

        let fullname = match &namespace {
            Some(ns) => format!("{}.{}", ns, name),
            None => name.clone(),
        };
        Ok((name, namespace, fullname))
    }

    fn resolve_name(&self, name: &str) -> String {
        if name.contains('.') {
            return name.to_string();
        }
        match &self.current_namespace {
            Some(ns) => format!("{}.{}", ns, name),
            None => name.to_string(),
        }
    }
}

fn maybe_wrap_logical(obj: &Map<String, Value>, base: AvroSchema) -> AvroSchema {
    let Some(name) = obj.get("logicalType").and_then(|v| v.as_str()) else {
        return base;
    };
    let precision = obj
        .get("precision")
        .and_then(|v| v.as_u64())
        .map(|p| p as u32);
    let scale = obj.get("scale").and_then(|v| v.as_u64()).map(|s| s as u32);

    match LogicalTypeName::from_name(name, precision, scale) {
        Some(logical) => AvroSchema::Logical(LogicalType::new(base, logical)),
        None => base,
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

fn validate_name(name: &str, kind: &str) -> Result<(), SchemaError> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    if valid_start && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(SchemaError::InvalidSchema(format!(
            "{} name '{}' is not a valid Avro name",
            kind, name
        )))
    }
}
