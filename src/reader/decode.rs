//! Avro binary decoding into generic values.
//!
//! The decoder follows the Avro specification for binary encoding:
//! - `int`/`long` are zigzag varints
//! - `float`/`double` are little-endian IEEE 754
//! - `bytes`/`string` are length-prefixed
//! - arrays and maps are sequences of counted blocks ending with a zero count
//!
//! Logical types decode to the representation of their base type; the parser
//! tree only ever sees the primitive kinds it extracts tensors from.

use crate::error::{DecodeError, SchemaError};
use crate::reader::varint::decode_zigzag;
use crate::schema::{evolution, AvroSchema, EnumSchema, SchemaResolutionContext};

// ============================================================================
// Primitive decoders
// ============================================================================

/// Decode a boolean (one byte, 0 or 1).
#[inline]
pub fn decode_boolean(data: &mut &[u8]) -> Result<bool, DecodeError> {
    let (&byte, rest) = data.split_first().ok_or(DecodeError::UnexpectedEof)?;
    *data = rest;
    match byte {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(DecodeError::InvalidData(format!(
            "Invalid boolean value: {}, expected 0 or 1",
            byte
        ))),
    }
}

/// Decode a 32-bit signed integer, rejecting values outside the i32 range.
#[inline]
pub fn decode_int(data: &mut &[u8]) -> Result<i32, DecodeError> {
    let long = decode_long(data)?;
    i32::try_from(long).map_err(|_| {
        DecodeError::InvalidData(format!("Integer overflow: {} does not fit in i32", long))
    })
}

#[inline]
pub fn decode_long(data: &mut &[u8]) -> Result<i64, DecodeError> {
    decode_zigzag(data)
}

#[inline]
pub fn decode_float(data: &mut &[u8]) -> Result<f32, DecodeError> {
    let bytes = take(data, 4)?;
    Ok(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[inline]
pub fn decode_double(data: &mut &[u8]) -> Result<f64, DecodeError> {
    let bytes = take(data, 8)?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    Ok(f64::from_le_bytes(buf))
}

/// Decode length-prefixed bytes.
pub fn decode_bytes(data: &mut &[u8]) -> Result<Vec<u8>, DecodeError> {
    let len = decode_long(data)?;
    if len < 0 {
        return Err(DecodeError::InvalidData(format!(
            "Negative bytes length: {}",
            len
        )));
    }
    Ok(take(data, len as usize)?.to_vec())
}

/// Decode a length-prefixed UTF-8 string.
pub fn decode_string(data: &mut &[u8]) -> Result<String, DecodeError> {
    Ok(String::from_utf8(decode_bytes(data)?)?)
}

/// Decode `size` raw bytes of a fixed type.
#[inline]
pub fn decode_fixed(data: &mut &[u8], size: usize) -> Result<Vec<u8>, DecodeError> {
    Ok(take(data, size)?.to_vec())
}

/// Decode an enum index and map it to its symbol.
pub fn decode_enum(data: &mut &[u8], schema: &EnumSchema) -> Result<(i32, String), DecodeError> {
    let index = decode_int(data)?;
    let symbol = usize::try_from(index)
        .ok()
        .and_then(|i| schema.symbols.get(i))
        .ok_or_else(|| {
            DecodeError::InvalidData(format!(
                "Enum index {} out of range (0..{})",
                index,
                schema.symbols.len()
            ))
        })?;
    Ok((index, symbol.clone()))
}

#[inline]
fn take<'a>(data: &mut &'a [u8], n: usize) -> Result<&'a [u8], DecodeError> {
    if data.len() < n {
        return Err(DecodeError::UnexpectedEof);
    }
    let (head, tail) = data.split_at(n);
    *data = tail;
    Ok(head)
}

/// Read an array/map block header, returning the item count of the next block
/// (zero at the end of the sequence).
fn decode_block_count(data: &mut &[u8]) -> Result<usize, DecodeError> {
    let count = decode_long(data)?;
    if count < 0 {
        // Negative count is followed by the block's byte size
        let _byte_size = decode_long(data)?;
        Ok(count.unsigned_abs() as usize)
    } else {
        Ok(count as usize)
    }
}

// ============================================================================
// Generic value
// ============================================================================

/// A decoded, self-describing Avro datum.
///
/// This is the value the parser tree walks: records expose field lookup by
/// name, arrays expose indexed elements, maps expose their key/value pairs in
/// encoded order and unions keep the resolved branch index.
#[derive(Debug, Clone, PartialEq)]
pub enum AvroValue {
    Null,
    Boolean(bool),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Bytes(Vec<u8>),
    String(String),
    /// Record with named fields in schema order
    Record(Vec<(String, AvroValue)>),
    /// Enum variant (index and symbol name)
    Enum(i32, String),
    Array(Vec<AvroValue>),
    /// Map entries in encoded order
    Map(Vec<(String, AvroValue)>),
    /// Union variant (branch index and value)
    Union(i32, Box<AvroValue>),
    Fixed(Vec<u8>),
}

impl AvroValue {
    /// Avro kind name of the value.
    ///
    /// Union selectors in feature paths (`field:string`) compare against this.
    pub fn type_name(&self) -> &'static str {
        match self {
            AvroValue::Null => "null",
            AvroValue::Boolean(_) => "boolean",
            AvroValue::Int(_) => "int",
            AvroValue::Long(_) => "long",
            AvroValue::Float(_) => "float",
            AvroValue::Double(_) => "double",
            AvroValue::Bytes(_) => "bytes",
            AvroValue::String(_) => "string",
            AvroValue::Record(_) => "record",
            AvroValue::Enum(_, _) => "enum",
            AvroValue::Array(_) => "array",
            AvroValue::Map(_) => "map",
            AvroValue::Union(_, _) => "union",
            AvroValue::Fixed(_) => "fixed",
        }
    }

    /// Look up a record field by name.
    pub fn field(&self, name: &str) -> Option<&AvroValue> {
        match self.resolve_union() {
            AvroValue::Record(fields) => fields.iter().find(|(n, _)| n == name).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Strip union wrappers, yielding the resolved branch value.
    pub fn resolve_union(&self) -> &AvroValue {
        let mut value = self;
        while let AvroValue::Union(_, inner) = value {
            value = inner;
        }
        value
    }

    /// Owned variant of [`resolve_union`](Self::resolve_union).
    pub fn into_resolved(self) -> AvroValue {
        let mut value = self;
        while let AvroValue::Union(_, inner) = value {
            value = *inner;
        }
        value
    }

    /// Approximate in-memory payload size in bytes, used to plan shards.
    pub fn estimated_size(&self) -> usize {
        match self {
            AvroValue::Null => 1,
            AvroValue::Boolean(_) => 1,
            AvroValue::Int(_) | AvroValue::Float(_) => 4,
            AvroValue::Long(_) | AvroValue::Double(_) => 8,
            AvroValue::Bytes(b) | AvroValue::Fixed(b) => b.len() + 1,
            AvroValue::String(s) => s.len() + 1,
            AvroValue::Enum(_, _) => 4,
            AvroValue::Record(fields) => fields.iter().map(|(_, v)| v.estimated_size()).sum(),
            AvroValue::Array(items) => 1 + items.iter().map(|v| v.estimated_size()).sum::<usize>(),
            AvroValue::Map(entries) => {
                1 + entries
                    .iter()
                    .map(|(k, v)| k.len() + 1 + v.estimated_size())
                    .sum::<usize>()
            }
            AvroValue::Union(_, inner) => 1 + inner.estimated_size(),
        }
    }
}

// ============================================================================
// Schema-driven decoding
// ============================================================================

/// Decode any Avro value based on its schema, resolving named references
/// through `context`.
pub fn decode_value(
    data: &mut &[u8],
    schema: &AvroSchema,
    context: &SchemaResolutionContext,
) -> Result<AvroValue, DecodeError> {
    match schema {
        AvroSchema::Null => Ok(AvroValue::Null),
        AvroSchema::Boolean => Ok(AvroValue::Boolean(decode_boolean(data)?)),
        AvroSchema::Int => Ok(AvroValue::Int(decode_int(data)?)),
        AvroSchema::Long => Ok(AvroValue::Long(decode_long(data)?)),
        AvroSchema::Float => Ok(AvroValue::Float(decode_float(data)?)),
        AvroSchema::Double => Ok(AvroValue::Double(decode_double(data)?)),
        AvroSchema::Bytes => Ok(AvroValue::Bytes(decode_bytes(data)?)),
        AvroSchema::String => Ok(AvroValue::String(decode_string(data)?)),

        AvroSchema::Record(record) => {
            let mut fields = Vec::with_capacity(record.fields.len());
            for field in &record.fields {
                let value = decode_value(data, &field.schema, context)?;
                fields.push((field.name.clone(), value));
            }
            Ok(AvroValue::Record(fields))
        }
        AvroSchema::Enum(enum_schema) => {
            let (index, symbol) = decode_enum(data, enum_schema)?;
            Ok(AvroValue::Enum(index, symbol))
        }
        AvroSchema::Array(item_schema) => {
            let mut items = Vec::new();
            loop {
                let count = decode_block_count(data)?;
                if count == 0 {
                    break;
                }
                // Cap the reservation so a corrupt count cannot trigger a huge allocation
                items.reserve(count.min(data.len()));
                for _ in 0..count {
                    items.push(decode_value(data, item_schema, context)?);
                }
            }
            Ok(AvroValue::Array(items))
        }
        AvroSchema::Map(value_schema) => {
            let mut entries = Vec::new();
            loop {
                let count = decode_block_count(data)?;
                if count == 0 {
                    break;
                }
                entries.reserve(count.min(data.len()));
                for _ in 0..count {
                    let key = decode_string(data)?;
                    let value = decode_value(data, value_schema, context)?;
                    entries.push((key, value));
                }
            }
            Ok(AvroValue::Map(entries))
        }
        AvroSchema::Union(variants) => {
            let index = decode_int(data)?;
            let variant = usize::try_from(index)
                .ok()
                .and_then(|i| variants.get(i))
                .ok_or_else(|| {
                    DecodeError::InvalidData(format!(
                        "Union index {} out of range (0..{})",
                        index,
                        variants.len()
                    ))
                })?;
            let value = decode_value(data, variant, context)?;
            Ok(AvroValue::Union(index, Box::new(value)))
        }
        AvroSchema::Fixed(fixed) => Ok(AvroValue::Fixed(decode_fixed(data, fixed.size)?)),
        AvroSchema::Named(_) => {
            let resolved = context.deref(schema)?;
            decode_value(data, resolved, context)
        }
        AvroSchema::Logical(logical) => decode_value(data, &logical.base, context),
    }
}

// ============================================================================
// Datum reader
// ============================================================================

#[derive(Debug, Clone)]
struct WriterSide {
    schema: AvroSchema,
    context: SchemaResolutionContext,
}

/// Decodes single binary Avro datums against a reader schema.
///
/// When constructed with a separate writer schema, data is decoded with the
/// writer schema and then resolved into the shape of the reader schema
/// following Avro's schema resolution rules.
///
/// # Example
/// ```
/// use avro_tensor::reader::{encode_value, AvroValue, DatumReader};
/// use avro_tensor::schema::parse_schema;
///
/// let schema = parse_schema(r#"{"type": "array", "items": "int"}"#).unwrap();
/// let value = AvroValue::Array(vec![AvroValue::Int(1), AvroValue::Int(2)]);
/// let mut bytes = Vec::new();
/// encode_value(&value, &schema, &mut bytes).unwrap();
///
/// let reader = DatumReader::new(schema);
/// assert_eq!(reader.read(&mut bytes.as_slice()).unwrap(), value);
/// ```
#[derive(Debug, Clone)]
pub struct DatumReader {
    schema: AvroSchema,
    context: SchemaResolutionContext,
    writer: Option<WriterSide>,
}

impl DatumReader {
    /// Create a reader whose data was written with the same schema.
    pub fn new(schema: AvroSchema) -> Self {
        let context = SchemaResolutionContext::build_from_schema(&schema);
        Self {
            schema,
            context,
            writer: None,
        }
    }

    /// Create a reader that resolves data written with `writer` into `reader`.
    ///
    /// Fails up front if the top-level schema kinds can never be reconciled.
    pub fn with_writer_schema(writer: AvroSchema, reader: AvroSchema) -> Result<Self, SchemaError> {
        let writer_context = SchemaResolutionContext::build_from_schema(&writer);
        let context = SchemaResolutionContext::build_from_schema(&reader);
        evolution::check_resolvable(&writer, &writer_context, &reader, &context)?;
        Ok(Self {
            schema: reader,
            context,
            writer: Some(WriterSide {
                schema: writer,
                context: writer_context,
            }),
        })
    }

    /// The reader schema values are produced in.
    pub fn schema(&self) -> &AvroSchema {
        &self.schema
    }

    pub fn context(&self) -> &SchemaResolutionContext {
        &self.context
    }

    /// Decode one datum, advancing the cursor past it.
    pub fn read(&self, data: &mut &[u8]) -> Result<AvroValue, DecodeError> {
        match &self.writer {
            None => decode_value(data, &self.schema, &self.context),
            Some(writer) => {
                let value = decode_value(data, &writer.schema, &writer.context)?;
                let resolved = evolution::resolve_value(
                    value,
                    &writer.schema,
                    &writer.context,
                    &self.schema,
                    &self.context,
                )?;
                Ok(resolved)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::encode::encode_value;
    use crate::schema::parse_schema;

    fn roundtrip(schema_json: &str, value: AvroValue) -> AvroValue {
        let schema = parse_schema(schema_json).unwrap();
        let mut bytes = Vec::new();
        encode_value(&value, &schema, &mut bytes).unwrap();
        let reader = DatumReader::new(schema);
        let mut cursor = bytes.as_slice();
        let decoded = reader.read(&mut cursor).unwrap();
        assert!(cursor.is_empty());
        decoded
    }

    #[test]
    fn test_decode_primitives() {
        let mut cursor: &[u8] = &[0x01];
        assert!(decode_boolean(&mut cursor).unwrap());
        let mut cursor: &[u8] = &[0x02];
        assert!(decode_boolean(&mut cursor).is_err());

        let mut cursor: &[u8] = &[0x06, b'f', b'o', b'o'];
        assert_eq!(decode_string(&mut cursor).unwrap(), "foo");

        let bytes = 1.5f64.to_le_bytes();
        let mut cursor: &[u8] = &bytes;
        assert_eq!(decode_double(&mut cursor).unwrap(), 1.5);
    }

    #[test]
    fn test_decode_int_overflow() {
        let bytes = crate::reader::varint::encode_zigzag(i64::from(i32::MAX) + 1);
        let mut cursor = bytes.as_slice();
        assert!(decode_int(&mut cursor).is_err());
    }

    #[test]
    fn test_invalid_utf8() {
        let mut cursor: &[u8] = &[0x02, 0xFF];
        assert!(matches!(
            decode_string(&mut cursor),
            Err(DecodeError::InvalidUtf8(_))
        ));
    }

    #[test]
    fn test_negative_block_count() {
        // One block of -2 items with a byte size, then the terminator
        let schema = AvroSchema::Array(Box::new(AvroSchema::Int));
        let bytes = [0x03, 0x04, 0x02, 0x04, 0x00];
        let mut cursor: &[u8] = &bytes;
        let value = decode_value(&mut cursor, &schema, &SchemaResolutionContext::new()).unwrap();
        assert_eq!(
            value,
            AvroValue::Array(vec![AvroValue::Int(1), AvroValue::Int(2)])
        );
    }

    #[test]
    fn test_roundtrip_nested_record() {
        let schema = r#"{"type": "record", "name": "Person", "fields": [
            {"name": "name", "type": "string"},
            {"name": "tags", "type": {"type": "map", "values": "long"}},
            {"name": "nick", "type": ["null", "string"]},
            {"name": "kind", "type": {"type": "enum", "name": "Kind", "symbols": ["A", "B"]}},
            {"name": "id", "type": {"type": "fixed", "name": "Id", "size": 2}}
        ]}"#;
        let value = AvroValue::Record(vec![
            ("name".into(), AvroValue::String("Carl".into())),
            (
                "tags".into(),
                AvroValue::Map(vec![("a".into(), AvroValue::Long(-7))]),
            ),
            (
                "nick".into(),
                AvroValue::Union(1, Box::new(AvroValue::String("C".into()))),
            ),
            ("kind".into(), AvroValue::Enum(1, "B".into())),
            ("id".into(), AvroValue::Fixed(vec![1, 2])),
        ]);
        assert_eq!(roundtrip(schema, value.clone()), value);
    }

    #[test]
    fn test_logical_type_decodes_base() {
        let value = roundtrip(
            r#"{"type": "long", "logicalType": "timestamp-millis"}"#,
            AvroValue::Long(1_700_000_000_000),
        );
        assert_eq!(value, AvroValue::Long(1_700_000_000_000));
    }

    #[test]
    fn test_recursive_named_type() {
        let schema = r#"{"type": "record", "name": "Node", "fields": [
            {"name": "value", "type": "int"},
            {"name": "next", "type": ["null", "Node"]}
        ]}"#;
        let value = AvroValue::Record(vec![
            ("value".into(), AvroValue::Int(1)),
            (
                "next".into(),
                AvroValue::Union(
                    1,
                    Box::new(AvroValue::Record(vec![
                        ("value".into(), AvroValue::Int(2)),
                        ("next".into(), AvroValue::Union(0, Box::new(AvroValue::Null))),
                    ])),
                ),
            ),
        ]);
        assert_eq!(roundtrip(schema, value.clone()), value);
    }

    #[test]
    fn test_value_accessors() {
        let value = AvroValue::Union(
            1,
            Box::new(AvroValue::Record(vec![(
                "age".into(),
                AvroValue::Int(33),
            )])),
        );
        assert_eq!(value.type_name(), "union");
        assert_eq!(value.resolve_union().type_name(), "record");
        assert_eq!(value.field("age"), Some(&AvroValue::Int(33)));
        assert_eq!(value.field("name"), None);
        assert_eq!(value.estimated_size(), 5);
    }

    #[test]
    fn test_truncated_record() {
        let schema = parse_schema(
            r#"{"type": "record", "name": "R", "fields": [{"name": "x", "type": "double"}]}"#,
        )
        .unwrap();
        let reader = DatumReader::new(schema);
        let mut cursor: &[u8] = &[0x00, 0x01];
        assert!(matches!(
            reader.read(&mut cursor),
            Err(DecodeError::UnexpectedEof)
        ));
    }
}
