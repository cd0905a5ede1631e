//! Avro binary encoding of generic values.
//!
//! Only what tests, benchmarks and container fixtures need: values are written
//! against a schema, arrays and maps as a single counted block.

use crate::error::DecodeError;
use crate::reader::decode::AvroValue;
use crate::reader::varint::encode_zigzag_into;
use crate::schema::{AvroSchema, SchemaResolutionContext};

/// Encode `value` as `schema` and append the bytes to `out`.
pub fn encode_value(
    value: &AvroValue,
    schema: &AvroSchema,
    out: &mut Vec<u8>,
) -> Result<(), DecodeError> {
    let context = SchemaResolutionContext::build_from_schema(schema);
    encode_with_context(value, schema, &context, out)
}

/// Encode against a schema whose named types are registered in `context`.
pub fn encode_with_context(
    value: &AvroValue,
    schema: &AvroSchema,
    context: &SchemaResolutionContext,
    out: &mut Vec<u8>,
) -> Result<(), DecodeError> {
    match (schema, value) {
        (AvroSchema::Named(_), _) => {
            let resolved = context.deref(schema)?;
            encode_with_context(value, resolved, context, out)
        }
        (AvroSchema::Logical(logical), _) => encode_with_context(value, &logical.base, context, out),
        (AvroSchema::Union(variants), AvroValue::Union(index, inner)) => {
            let variant = usize::try_from(*index)
                .ok()
                .and_then(|i| variants.get(i))
                .ok_or_else(|| {
                    DecodeError::InvalidData(format!("Union index {} out of range", index))
                })?;
            encode_zigzag_into(i64::from(*index), out);
            encode_with_context(inner, variant, context, out)
        }
        (AvroSchema::Union(variants), _) => {
            // Bare value: pick the first branch of the same kind
            let index = variants
                .iter()
                .position(|v| branch_kind(v, context) == value.type_name())
                .ok_or_else(|| mismatch(schema, value))?;
            encode_zigzag_into(index as i64, out);
            encode_with_context(value, &variants[index], context, out)
        }
        (AvroSchema::Null, AvroValue::Null) => Ok(()),
        (AvroSchema::Boolean, AvroValue::Boolean(b)) => {
            out.push(u8::from(*b));
            Ok(())
        }
        (AvroSchema::Int, AvroValue::Int(v)) => {
            encode_zigzag_into(i64::from(*v), out);
            Ok(())
        }
        (AvroSchema::Long, AvroValue::Long(v)) => {
            encode_zigzag_into(*v, out);
            Ok(())
        }
        (AvroSchema::Float, AvroValue::Float(v)) => {
            out.extend_from_slice(&v.to_le_bytes());
            Ok(())
        }
        (AvroSchema::Double, AvroValue::Double(v)) => {
            out.extend_from_slice(&v.to_le_bytes());
            Ok(())
        }
        (AvroSchema::Bytes, AvroValue::Bytes(b)) => {
            write_len_prefixed(b, out);
            Ok(())
        }
        (AvroSchema::String, AvroValue::String(s)) => {
            write_len_prefixed(s.as_bytes(), out);
            Ok(())
        }
        (AvroSchema::Fixed(fixed), AvroValue::Fixed(b)) => {
            if b.len() != fixed.size {
                return Err(DecodeError::InvalidData(format!(
                    "Fixed '{}' expects {} bytes, got {}",
                    fixed.name,
                    fixed.size,
                    b.len()
                )));
            }
            out.extend_from_slice(b);
            Ok(())
        }
        (AvroSchema::Enum(enum_schema), AvroValue::Enum(_, symbol)) => {
            let index = enum_schema.symbol_index(symbol).ok_or_else(|| {
                DecodeError::InvalidData(format!(
                    "Symbol '{}' is not part of enum '{}'",
                    symbol, enum_schema.name
                ))
            })?;
            encode_zigzag_into(index as i64, out);
            Ok(())
        }
        (AvroSchema::Record(record), AvroValue::Record(fields)) => {
            for field in &record.fields {
                let field_value = fields
                    .iter()
                    .find(|(name, _)| *name == field.name)
                    .map(|(_, v)| v)
                    .ok_or_else(|| {
                        DecodeError::InvalidData(format!(
                            "Record '{}' value is missing field '{}'",
                            record.name, field.name
                        ))
                    })?;
                encode_with_context(field_value, &field.schema, context, out)?;
            }
            Ok(())
        }
        (AvroSchema::Array(item_schema), AvroValue::Array(items)) => {
            if !items.is_empty() {
                encode_zigzag_into(items.len() as i64, out);
                for item in items {
                    encode_with_context(item, item_schema, context, out)?;
                }
            }
            out.push(0);
            Ok(())
        }
        (AvroSchema::Map(value_schema), AvroValue::Map(entries)) => {
            if !entries.is_empty() {
                encode_zigzag_into(entries.len() as i64, out);
                for (key, item) in entries {
                    write_len_prefixed(key.as_bytes(), out);
                    encode_with_context(item, value_schema, context, out)?;
                }
            }
            out.push(0);
            Ok(())
        }
        _ => Err(mismatch(schema, value)),
    }
}

fn branch_kind(schema: &AvroSchema, context: &SchemaResolutionContext) -> &'static str {
    context
        .deref(schema)
        .map(|s| s.type_name())
        .unwrap_or("named")
}

fn mismatch(schema: &AvroSchema, value: &AvroValue) -> DecodeError {
    DecodeError::TypeMismatch(format!(
        "cannot encode {} as {}",
        value.type_name(),
        schema.type_name()
    ))
}

fn write_len_prefixed(bytes: &[u8], out: &mut Vec<u8>) {
    encode_zigzag_into(bytes.len() as i64, out);
    out.extend_from_slice(bytes);
}
