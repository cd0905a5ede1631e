//! Avro schema types.
//!
//! Logical types are kept on the schema so that a reader can report them, but
//! values decode to the base type's representation.

use serde_json::Value;

/// Represents an Avro schema.
#[derive(Debug, Clone, PartialEq)]
pub enum AvroSchema {
    // Primitive types
    /// Null type - no value.
    Null,
    /// Boolean type.
    Boolean,
    /// 32-bit signed integer.
    Int,
    /// 64-bit signed integer.
    Long,
    /// 32-bit IEEE 754 floating-point.
    Float,
    /// 64-bit IEEE 754 floating-point.
    Double,
    /// Sequence of bytes.
    Bytes,
    /// Unicode string.
    String,

    // Complex types
    /// Record type with named fields.
    Record(RecordSchema),
    /// Enumeration type.
    Enum(EnumSchema),
    /// Array of items with a single schema.
    Array(Box<AvroSchema>),
    /// Map with string keys and values of a single schema.
    Map(Box<AvroSchema>),
    /// Union of multiple schemas.
    Union(Vec<AvroSchema>),
    /// Fixed-size byte array.
    Fixed(FixedSchema),

    /// Reference to a named type defined elsewhere in the schema.
    Named(String),

    /// Logical type wrapper.
    Logical(LogicalType),
}

/// Schema for a record type.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordSchema {
    pub name: String,
    pub namespace: Option<String>,
    pub fields: Vec<FieldSchema>,
    pub aliases: Vec<String>,
}

impl RecordSchema {
    pub fn new(name: impl Into<String>, fields: Vec<FieldSchema>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            fields,
            aliases: Vec::new(),
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Get the fully qualified name.
    pub fn fullname(&self) -> String {
        qualify(&self.namespace, &self.name)
    }

    /// Find a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Schema for a field within a record.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSchema {
    pub name: String,
    pub schema: AvroSchema,
    /// JSON default used when a writer schema lacks this field.
    pub default: Option<Value>,
    pub aliases: Vec<String>,
}

impl FieldSchema {
    pub fn new(name: impl Into<String>, schema: AvroSchema) -> Self {
        Self {
            name: name.into(),
            schema,
            default: None,
            aliases: Vec::new(),
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_aliases(mut self, aliases: Vec<String>) -> Self {
        self.aliases = aliases;
        self
    }

    /// True if `name` is this field's name or one of its aliases.
    pub fn answers_to(&self, name: &str) -> bool {
        self.name == name || self.aliases.iter().any(|a| a == name)
    }
}

/// Schema for an enumeration type.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumSchema {
    pub name: String,
    pub namespace: Option<String>,
    pub symbols: Vec<String>,
    pub aliases: Vec<String>,
    /// Symbol substituted for unknown writer symbols.
    pub default: Option<String>,
}

impl EnumSchema {
    pub fn new(name: impl Into<String>, symbols: Vec<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            symbols,
            aliases: Vec::new(),
            default: None,
        }
    }

    pub fn fullname(&self) -> String {
        qualify(&self.namespace, &self.name)
    }

    pub fn symbol_index(&self, symbol: &str) -> Option<usize> {
        self.symbols.iter().position(|s| s == symbol)
    }
}

/// Schema for a fixed-size byte array.
#[derive(Debug, Clone, PartialEq)]
pub struct FixedSchema {
    pub name: String,
    pub namespace: Option<String>,
    pub size: usize,
    pub aliases: Vec<String>,
}

impl FixedSchema {
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            size,
            aliases: Vec::new(),
        }
    }

    pub fn fullname(&self) -> String {
        qualify(&self.namespace, &self.name)
    }
}

/// Logical type wrapper around a base schema.
#[derive(Debug, Clone, PartialEq)]
pub struct LogicalType {
    pub base: Box<AvroSchema>,
    pub logical_type: LogicalTypeName,
}

impl LogicalType {
    pub fn new(base: AvroSchema, logical_type: LogicalTypeName) -> Self {
        Self {
            base: Box::new(base),
            logical_type,
        }
    }
}

/// Logical type names with their parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum LogicalTypeName {
    Decimal { precision: u32, scale: u32 },
    Uuid,
    Date,
    TimeMillis,
    TimeMicros,
    TimestampMillis,
    TimestampMicros,
    LocalTimestampMillis,
    LocalTimestampMicros,
    Duration,
}

impl LogicalTypeName {
    /// Parse the `logicalType` attribute. Unknown names yield `None` and the
    /// base type is used unchanged, as the Avro specification requires.
    pub fn from_name(name: &str, precision: Option<u32>, scale: Option<u32>) -> Option<Self> {
        match name {
            "decimal" => Some(LogicalTypeName::Decimal {
                precision: precision?,
                scale: scale.unwrap_or(0),
            }),
            "uuid" => Some(LogicalTypeName::Uuid),
            "date" => Some(LogicalTypeName::Date),
            "time-millis" => Some(LogicalTypeName::TimeMillis),
            "time-micros" => Some(LogicalTypeName::TimeMicros),
            "timestamp-millis" => Some(LogicalTypeName::TimestampMillis),
            "timestamp-micros" => Some(LogicalTypeName::TimestampMicros),
            "local-timestamp-millis" => Some(LogicalTypeName::LocalTimestampMillis),
            "local-timestamp-micros" => Some(LogicalTypeName::LocalTimestampMicros),
            "duration" => Some(LogicalTypeName::Duration),
            _ => None,
        }
    }
}

impl AvroSchema {
    /// The Avro type name of this schema (`"record"`, `"int"`, ...).
    ///
    /// Logical types report their base type.
    pub fn type_name(&self) -> &'static str {
        match self {
            AvroSchema::Null => "null",
            AvroSchema::Boolean => "boolean",
            AvroSchema::Int => "int",
            AvroSchema::Long => "long",
            AvroSchema::Float => "float",
            AvroSchema::Double => "double",
            AvroSchema::Bytes => "bytes",
            AvroSchema::String => "string",
            AvroSchema::Record(_) => "record",
            AvroSchema::Enum(_) => "enum",
            AvroSchema::Array(_) => "array",
            AvroSchema::Map(_) => "map",
            AvroSchema::Union(_) => "union",
            AvroSchema::Fixed(_) => "fixed",
            AvroSchema::Named(_) => "named",
            AvroSchema::Logical(l) => l.base.type_name(),
        }
    }

    /// Get the fully qualified name of a named type, if applicable.
    pub fn fullname(&self) -> Option<String> {
        match self {
            AvroSchema::Record(r) => Some(r.fullname()),
            AvroSchema::Enum(e) => Some(e.fullname()),
            AvroSchema::Fixed(f) => Some(f.fullname()),
            AvroSchema::Named(n) => Some(n.clone()),
            _ => None,
        }
    }

    /// Strip a logical type wrapper.
    pub fn base(&self) -> &AvroSchema {
        match self {
            AvroSchema::Logical(l) => l.base.base(),
            other => other,
        }
    }
}

fn qualify(namespace: &Option<String>, name: &str) -> String {
    match namespace {
        Some(ns) if !ns.is_empty() && !name.contains('.') => format!("{}.{}", ns, name),
        _ => name.to_string(),
    }
}
