//! Writer-to-reader schema resolution for decoded values.
//!
//! Values are decoded with the schema they were written with and then
//! reshaped into the reader schema:
//! - record fields are matched by name or reader alias; missing reader fields
//!   take their JSON default and surplus writer fields are dropped
//! - `int` promotes to `long`/`float`/`double`, `long` to `float`/`double`,
//!   `float` to `double`, and `string`/`bytes` convert into each other
//! - enum symbols are remapped by name, falling back to the reader default
//! - a non-union writer value is placed into the first matching reader branch

use serde_json::Value;

use crate::error::SchemaError;
use crate::reader::AvroValue;
use crate::schema::{AvroSchema, SchemaResolutionContext};

/// Check that `writer` can ever be read as `reader`.
///
/// Only the outermost shape is compared; deeper mismatches are reported when
/// a value actually exercises them.
pub fn check_resolvable(
    writer: &AvroSchema,
    writer_ctx: &SchemaResolutionContext,
    reader: &AvroSchema,
    reader_ctx: &SchemaResolutionContext,
) -> Result<(), SchemaError> {
    let w = strip(writer_ctx.deref(writer)?);
    let r = strip(reader_ctx.deref(reader)?);
    match (w, r) {
        (AvroSchema::Union(_), _) | (_, AvroSchema::Union(_)) => Ok(()),
        _ if kinds_compatible(w, writer_ctx, r, reader_ctx) => Ok(()),
        _ => Err(incompatible(w, r)),
    }
}

/// Resolve a value decoded with `writer` into the shape of `reader`.
pub fn resolve_value(
    value: AvroValue,
    writer: &AvroSchema,
    writer_ctx: &SchemaResolutionContext,
    reader: &AvroSchema,
    reader_ctx: &SchemaResolutionContext,
) -> Result<AvroValue, SchemaError> {
    let w = strip(writer_ctx.deref(writer)?);
    let r = strip(reader_ctx.deref(reader)?);

    // Writer union: continue with the branch that was actually written
    if let AvroSchema::Union(branches) = w {
        let (index, inner) = match value {
            AvroValue::Union(index, inner) => (index, inner),
            other => {
                return Err(SchemaError::IncompatibleSchemas(format!(
                    "expected union value for writer union, found {}",
                    other.type_name()
                )))
            }
        };
        let branch = usize::try_from(index)
            .ok()
            .and_then(|i| branches.get(i))
            .ok_or_else(|| {
                SchemaError::IncompatibleSchemas(format!("writer union index {} out of range", index))
            })?;
        return resolve_value(*inner, branch, writer_ctx, reader, reader_ctx);
    }

    if let AvroSchema::Union(branches) = r {
        let index = branches
            .iter()
            .position(|b| same_kind(w, writer_ctx, b, reader_ctx))
            .or_else(|| {
                branches
                    .iter()
                    .position(|b| kinds_compatible(w, writer_ctx, b, reader_ctx))
            })
            .ok_or_else(|| {
                SchemaError::IncompatibleSchemas(format!(
                    "no branch of the reader union accepts writer type {}",
                    w.type_name()
                ))
            })?;
        let resolved = resolve_value(value, w, writer_ctx, &branches[index], reader_ctx)?;
        return Ok(AvroValue::Union(index as i32, Box::new(resolved)));
    }

    match (w, r, value) {
        (AvroSchema::Record(wr), AvroSchema::Record(rr), AvroValue::Record(mut fields)) => {
            if !names_match(&wr.name, &rr.name, &rr.aliases) {
                return Err(incompatible(w, r));
            }
            let mut out = Vec::with_capacity(rr.fields.len());
            for reader_field in &rr.fields {
                let writer_field = wr.fields.iter().find(|f| reader_field.answers_to(&f.name));
                match writer_field {
                    Some(writer_field) => {
                        let pos = fields
                            .iter()
                            .position(|(n, _)| *n == writer_field.name)
                            .ok_or_else(|| {
                                SchemaError::IncompatibleSchemas(format!(
                                    "decoded record lacks writer field '{}'",
                                    writer_field.name
                                ))
                            })?;
                        let (_, field_value) = fields.swap_remove(pos);
                        let resolved = resolve_value(
                            field_value,
                            &writer_field.schema,
                            writer_ctx,
                            &reader_field.schema,
                            reader_ctx,
                        )?;
                        out.push((reader_field.name.clone(), resolved));
                    }
                    None => {
                        let default = reader_field.default.as_ref().ok_or_else(|| {
                            SchemaError::IncompatibleSchemas(format!(
                                "reader field '{}' is missing from the writer schema and has no default",
                                reader_field.name
                            ))
                        })?;
                        let value = json_to_value(default, &reader_field.schema, reader_ctx)?;
                        out.push((reader_field.name.clone(), value));
                    }
                }
            }
            Ok(AvroValue::Record(out))
        }
        (AvroSchema::Enum(_), AvroSchema::Enum(re), AvroValue::Enum(_, symbol)) => {
            let symbol = if re.symbol_index(&symbol).is_some() {
                symbol
            } else {
                re.default.clone().ok_or_else(|| {
                    SchemaError::IncompatibleSchemas(format!(
                        "symbol '{}' is not in reader enum '{}'",
                        symbol, re.name
                    ))
                })?
            };
            let index = re.symbol_index(&symbol).ok_or_else(|| {
                SchemaError::InvalidSchema(format!(
                    "default symbol '{}' is not in enum '{}'",
                    symbol, re.name
                ))
            })?;
            Ok(AvroValue::Enum(index as i32, symbol))
        }
        (AvroSchema::Array(wi), AvroSchema::Array(ri), AvroValue::Array(items)) => items
            .into_iter()
            .map(|item| resolve_value(item, wi, writer_ctx, ri, reader_ctx))
            .collect::<Result<Vec<_>, _>>()
            .map(AvroValue::Array),
        (AvroSchema::Map(wv), AvroSchema::Map(rv), AvroValue::Map(entries)) => entries
            .into_iter()
            .map(|(k, v)| resolve_value(v, wv, writer_ctx, rv, reader_ctx).map(|v| (k, v)))
            .collect::<Result<Vec<_>, _>>()
            .map(AvroValue::Map),
        (AvroSchema::Fixed(wf), AvroSchema::Fixed(rf), value @ AvroValue::Fixed(_)) => {
            if wf.size == rf.size && names_match(&wf.name, &rf.name, &rf.aliases) {
                Ok(value)
            } else {
                Err(incompatible(w, r))
            }
        }
        (_, _, value) => promote(value, r),
    }
}

/// Apply a primitive promotion, or pass the value through when the kinds
/// already agree.
fn promote(value: AvroValue, reader: &AvroSchema) -> Result<AvroValue, SchemaError> {
    let promoted = match (value, reader) {
        (v @ AvroValue::Null, AvroSchema::Null)
        | (v @ AvroValue::Boolean(_), AvroSchema::Boolean)
        | (v @ AvroValue::Int(_), AvroSchema::Int)
        | (v @ AvroValue::Long(_), AvroSchema::Long)
        | (v @ AvroValue::Float(_), AvroSchema::Float)
        | (v @ AvroValue::Double(_), AvroSchema::Double)
        | (v @ AvroValue::Bytes(_), AvroSchema::Bytes)
        | (v @ AvroValue::String(_), AvroSchema::String) => v,
        (AvroValue::Int(i), AvroSchema::Long) => AvroValue::Long(i64::from(i)),
        (AvroValue::Int(i), AvroSchema::Float) => AvroValue::Float(i as f32),
        (AvroValue::Int(i), AvroSchema::Double) => AvroValue::Double(f64::from(i)),
        (AvroValue::Long(l), AvroSchema::Float) => AvroValue::Float(l as f32),
        (AvroValue::Long(l), AvroSchema::Double) => AvroValue::Double(l as f64),
        (AvroValue::Float(f), AvroSchema::Double) => AvroValue::Double(f64::from(f)),
        (AvroValue::String(s), AvroSchema::Bytes) => AvroValue::Bytes(s.into_bytes()),
        (AvroValue::Bytes(b), AvroSchema::String) => AvroValue::String(
            String::from_utf8(b)
                .map_err(|e| SchemaError::IncompatibleSchemas(format!("bytes are not UTF-8: {}", e)))?,
        ),
        (value, reader) => {
            return Err(SchemaError::IncompatibleSchemas(format!(
                "cannot read {} as {}",
                value.type_name(),
                reader.type_name()
            )))
        }
    };
    Ok(promoted)
}

/// Convert a JSON field default into a value of `schema`.
///
/// Union defaults belong to the first branch; bytes and fixed defaults are
/// strings whose code points are the byte values.
pub fn json_to_value(
    json: &Value,
    schema: &AvroSchema,
    ctx: &SchemaResolutionContext,
) -> Result<AvroValue, SchemaError> {
    let schema = strip(ctx.deref(schema)?);
    let bad = || {
        SchemaError::InvalidSchema(format!(
            "default {} does not match type {}",
            json,
            schema.type_name()
        ))
    };
    match schema {
        AvroSchema::Null => json.is_null().then_some(AvroValue::Null).ok_or_else(bad),
        AvroSchema::Boolean => json.as_bool().map(AvroValue::Boolean).ok_or_else(bad),
        AvroSchema::Int => json
            .as_i64()
            .and_then(|v| i32::try_from(v).ok())
            .map(AvroValue::Int)
            .ok_or_else(bad),
        AvroSchema::Long => json.as_i64().map(AvroValue::Long).ok_or_else(bad),
        AvroSchema::Float => json.as_f64().map(|v| AvroValue::Float(v as f32)).ok_or_else(bad),
        AvroSchema::Double => json.as_f64().map(AvroValue::Double).ok_or_else(bad),
        AvroSchema::String => json
            .as_str()
            .map(|s| AvroValue::String(s.to_string()))
            .ok_or_else(bad),
        AvroSchema::Bytes => json
            .as_str()
            .and_then(latin1_bytes)
            .map(AvroValue::Bytes)
            .ok_or_else(bad),
        AvroSchema::Fixed(f) => json
            .as_str()
            .and_then(latin1_bytes)
            .filter(|b| b.len() == f.size)
            .map(AvroValue::Fixed)
            .ok_or_else(bad),
        AvroSchema::Enum(e) => {
            let symbol = json.as_str().ok_or_else(bad)?;
            let index = e.symbol_index(symbol).ok_or_else(bad)?;
            Ok(AvroValue::Enum(index as i32, symbol.to_string()))
        }
        AvroSchema::Array(items) => json
            .as_array()
            .ok_or_else(bad)?
            .iter()
            .map(|v| json_to_value(v, items, ctx))
            .collect::<Result<Vec<_>, _>>()
            .map(AvroValue::Array),
        AvroSchema::Map(values) => json
            .as_object()
            .ok_or_else(bad)?
            .iter()
            .map(|(k, v)| json_to_value(v, values, ctx).map(|v| (k.clone(), v)))
            .collect::<Result<Vec<_>, _>>()
            .map(AvroValue::Map),
        AvroSchema::Record(record) => {
            let obj = json.as_object().ok_or_else(bad)?;
            let mut fields = Vec::with_capacity(record.fields.len());
            for field in &record.fields {
                let field_json = obj
                    .get(&field.name)
                    .or(field.default.as_ref())
                    .ok_or_else(bad)?;
                fields.push((field.name.clone(), json_to_value(field_json, &field.schema, ctx)?));
            }
            Ok(AvroValue::Record(fields))
        }
        AvroSchema::Union(branches) => {
            let first = branches.first().ok_or_else(bad)?;
            Ok(AvroValue::Union(0, Box::new(json_to_value(json, first, ctx)?)))
        }
        AvroSchema::Named(_) | AvroSchema::Logical(_) => Err(bad()),
    }
}

fn latin1_bytes(s: &str) -> Option<Vec<u8>> {
    s.chars().map(|c| u8::try_from(u32::from(c)).ok()).collect()
}

fn strip(schema: &AvroSchema) -> &AvroSchema {
    schema.base()
}

fn names_match(writer_name: &str, reader_name: &str, reader_aliases: &[String]) -> bool {
    let short = |n: &str| n.rsplit('.').next().unwrap_or(n).to_string();
    short(writer_name) == short(reader_name)
        || reader_aliases.iter().any(|a| short(a) == short(writer_name))
}

/// Same Avro kind (and name, for named types) without any promotion.
fn same_kind(
    writer: &AvroSchema,
    writer_ctx: &SchemaResolutionContext,
    reader: &AvroSchema,
    reader_ctx: &SchemaResolutionContext,
) -> bool {
    let (Ok(w), Ok(r)) = (writer_ctx.deref(writer), reader_ctx.deref(reader)) else {
        return false;
    };
    let (w, r) = (strip(w), strip(r));
    match (w, r) {
        (AvroSchema::Record(a), AvroSchema::Record(b)) => names_match(&a.name, &b.name, &b.aliases),
        (AvroSchema::Enum(a), AvroSchema::Enum(b)) => names_match(&a.name, &b.name, &b.aliases),
        (AvroSchema::Fixed(a), AvroSchema::Fixed(b)) => {
            a.size == b.size && names_match(&a.name, &b.name, &b.aliases)
        }
        _ => w.type_name() == r.type_name(),
    }
}

fn kinds_compatible(
    writer: &AvroSchema,
    writer_ctx: &SchemaResolutionContext,
    reader: &AvroSchema,
    reader_ctx: &SchemaResolutionContext,
) -> bool {
    if same_kind(writer, writer_ctx, reader, reader_ctx) {
        return true;
    }
    let (Ok(w), Ok(r)) = (writer_ctx.deref(writer), reader_ctx.deref(reader)) else {
        return false;
    };
    matches!(
        (strip(w), strip(r)),
        (AvroSchema::Int, AvroSchema::Long | AvroSchema::Float | AvroSchema::Double)
            | (AvroSchema::Long, AvroSchema::Float | AvroSchema::Double)
            | (AvroSchema::Float, AvroSchema::Double)
            | (AvroSchema::String, AvroSchema::Bytes)
            | (AvroSchema::Bytes, AvroSchema::String)
    )
}

fn incompatible(writer: &AvroSchema, reader: &AvroSchema) -> SchemaError {
    SchemaError::IncompatibleSchemas(format!(
        "writer type {} cannot be read as {}",
        writer
            .fullname()
            .unwrap_or_else(|| writer.type_name().to_string()),
        reader
            .fullname()
            .unwrap_or_else(|| reader.type_name().to_string())
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::{encode_value, DatumReader};
    use crate::schema::parse_schema;

    fn read_as(writer_json: &str, reader_json: &str, value: AvroValue) -> Result<AvroValue, String> {
        let writer = parse_schema(writer_json).unwrap();
        let reader = parse_schema(reader_json).unwrap();
        let mut bytes = Vec::new();
        encode_value(&value, &writer, &mut bytes).unwrap();
        let datum_reader = DatumReader::with_writer_schema(writer, reader).map_err(|e| e.to_string())?;
        datum_reader
            .read(&mut bytes.as_slice())
            .map_err(|e| e.to_string())
    }

    #[test]
    fn test_numeric_promotion() {
        assert_eq!(
            read_as(r#""int""#, r#""long""#, AvroValue::Int(7)).unwrap(),
            AvroValue::Long(7)
        );
        assert_eq!(
            read_as(r#""float""#, r#""double""#, AvroValue::Float(0.5)).unwrap(),
            AvroValue::Double(0.5)
        );
        assert!(read_as(r#""long""#, r#""int""#, AvroValue::Long(7)).is_err());
    }

    #[test]
    fn test_record_fields_added_removed_and_aliased() {
        let writer = r#"{"type": "record", "name": "P", "fields": [
            {"name": "fname", "type": "string"},
            {"name": "dropped", "type": "int"}
        ]}"#;
        let reader = r#"{"type": "record", "name": "P", "fields": [
            {"name": "first", "type": "string", "aliases": ["fname"]},
            {"name": "age", "type": "int", "default": 18},
            {"name": "nick", "type": ["null", "string"], "default": null}
        ]}"#;
        let value = AvroValue::Record(vec![
            ("fname".into(), AvroValue::String("Carl".into())),
            ("dropped".into(), AvroValue::Int(1)),
        ]);
        assert_eq!(
            read_as(writer, reader, value).unwrap(),
            AvroValue::Record(vec![
                ("first".into(), AvroValue::String("Carl".into())),
                ("age".into(), AvroValue::Int(18)),
                ("nick".into(), AvroValue::Union(0, Box::new(AvroValue::Null))),
            ])
        );
    }

    #[test]
    fn test_missing_field_without_default() {
        let writer = r#"{"type": "record", "name": "P", "fields": []}"#;
        let reader = r#"{"type": "record", "name": "P", "fields": [{"name": "age", "type": "int"}]}"#;
        let err = read_as(writer, reader, AvroValue::Record(vec![])).unwrap_err();
        assert!(err.contains("no default"));
    }

    #[test]
    fn test_enum_symbol_remap_and_default() {
        let writer = r#"{"type": "enum", "name": "E", "symbols": ["A", "B", "C"]}"#;
        let reader = r#"{"type": "enum", "name": "E", "symbols": ["C", "A"], "default": "A"}"#;
        assert_eq!(
            read_as(writer, reader, AvroValue::Enum(2, "C".into())).unwrap(),
            AvroValue::Enum(0, "C".into())
        );
        assert_eq!(
            read_as(writer, reader, AvroValue::Enum(1, "B".into())).unwrap(),
            AvroValue::Enum(1, "A".into())
        );
    }

    #[test]
    fn test_union_resolution() {
        // Writer union branch resolved into a plain reader type
        assert_eq!(
            read_as(
                r#"["null", "int"]"#,
                r#""long""#,
                AvroValue::Union(1, Box::new(AvroValue::Int(3)))
            )
            .unwrap(),
            AvroValue::Long(3)
        );
        // Plain writer type placed into a reader union
        assert_eq!(
            read_as(r#""string""#, r#"["null", "string"]"#, AvroValue::String("x".into())).unwrap(),
            AvroValue::Union(1, Box::new(AvroValue::String("x".into())))
        );
    }

    #[test]
    fn test_incompatible_top_level() {
        let writer = parse_schema(r#""string""#).unwrap();
        let reader = parse_schema(r#""int""#).unwrap();
        assert!(matches!(
            DatumReader::with_writer_schema(writer, reader),
            Err(SchemaError::IncompatibleSchemas(_))
        ));
    }

    #[test]
    fn test_json_defaults() {
        let ctx = SchemaResolutionContext::new();
        let schema = parse_schema(r#"{"type": "array", "items": "double"}"#).unwrap();
        assert_eq!(
            json_to_value(&serde_json::json!([1.5, 2]), &schema, &ctx).unwrap(),
            AvroValue::Array(vec![AvroValue::Double(1.5), AvroValue::Double(2.0)])
        );
        assert_eq!(
            json_to_value(&serde_json::json!("\u{00ff}"), &AvroSchema::Bytes, &ctx).unwrap(),
            AvroValue::Bytes(vec![0xFF])
        );
        assert!(json_to_value(&serde_json::json!("x"), &AvroSchema::Int, &ctx).is_err());
    }
}
