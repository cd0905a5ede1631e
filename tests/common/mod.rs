//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::io::Write;
use std::path::PathBuf;

use avro_tensor::reader::varint::encode_zigzag_into;
use avro_tensor::reader::{encode_value, AvroValue, AVRO_MAGIC};
use avro_tensor::schema::{parse_schema, AvroSchema};
use tempfile::NamedTempFile;

pub const SYNC: [u8; 16] = [
    0x4f, 0x2c, 0x91, 0x07, 0x3a, 0xe5, 0x12, 0x88, 0x5d, 0x60, 0xc3, 0x1b, 0x99, 0x04, 0x7e, 0xd2,
];

pub const PERSON_SCHEMA: &str = r#"{
    "type": "record",
    "name": "Person",
    "fields": [
        {"name": "name", "type": "string"},
        {"name": "age", "type": "long"},
        {"name": "scores", "type": {"type": "array", "items": "float"}},
        {"name": "nickname", "type": ["null", "string"], "default": null}
    ]
}"#;

pub fn record(fields: Vec<(&str, AvroValue)>) -> AvroValue {
    AvroValue::Record(fields.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
}

pub fn string(s: &str) -> AvroValue {
    AvroValue::String(s.to_string())
}

pub fn longs(values: &[i64]) -> AvroValue {
    AvroValue::Array(values.iter().map(|v| AvroValue::Long(*v)).collect())
}

pub fn person(name: &str, age: i64, scores: &[f32], nickname: Option<&str>) -> AvroValue {
    record(vec![
        ("name", string(name)),
        ("age", AvroValue::Long(age)),
        (
            "scores",
            AvroValue::Array(scores.iter().map(|s| AvroValue::Float(*s)).collect()),
        ),
        (
            "nickname",
            match nickname {
                Some(n) => AvroValue::Union(1, Box::new(string(n))),
                None => AvroValue::Union(0, Box::new(AvroValue::Null)),
            },
        ),
    ])
}

/// The `persons` array from the filter examples: Carl is 33 and 12.
pub fn persons_record() -> AvroValue {
    let entry = |name: &str, age: i64| record(vec![("name", string(name)), ("age", AvroValue::Long(age))]);
    record(vec![(
        "persons",
        AvroValue::Array(vec![
            entry("Carl", 33),
            entry("Mary", 29),
            entry("Carl", 12),
        ]),
    )])
}

/// Build an object container file in memory.
///
/// Each inner slice becomes one block. `codec` is written to the header as
/// is; only "null" and "deflate" blocks are compressed here.
pub fn container_bytes(schema_json: &str, codec: &str, blocks: &[Vec<AvroValue>]) -> Vec<u8> {
    let schema = parse_schema(schema_json).unwrap();
    let mut out = AVRO_MAGIC.to_vec();

    let meta: [(&str, &[u8]); 2] = [
        ("avro.schema", schema_json.as_bytes()),
        ("avro.codec", codec.as_bytes()),
    ];
    encode_zigzag_into(meta.len() as i64, &mut out);
    for (key, value) in meta {
        encode_zigzag_into(key.len() as i64, &mut out);
        out.extend_from_slice(key.as_bytes());
        encode_zigzag_into(value.len() as i64, &mut out);
        out.extend_from_slice(value);
    }
    out.push(0);
    out.extend_from_slice(&SYNC);

    for block in blocks {
        let data = encode_block(&schema, block);
        let data = compress(codec, data);
        encode_zigzag_into(block.len() as i64, &mut out);
        encode_zigzag_into(data.len() as i64, &mut out);
        out.extend_from_slice(&data);
        out.extend_from_slice(&SYNC);
    }
    out
}

fn encode_block(schema: &AvroSchema, records: &[AvroValue]) -> Vec<u8> {
    let mut data = Vec::new();
    for record in records {
        encode_value(record, schema, &mut data).unwrap();
    }
    data
}

fn compress(codec: &str, data: Vec<u8>) -> Vec<u8> {
    match codec {
        "null" => data,
        #[cfg(feature = "deflate")]
        "deflate" => {
            let mut encoder =
                flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(&data).unwrap();
            encoder.finish().unwrap()
        }
        other => panic!("test helper cannot compress with {}", other),
    }
}

/// Write a container to a temporary file that lives as long as the handle.
pub fn write_container(schema_json: &str, codec: &str, blocks: &[Vec<AvroValue>]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(&container_bytes(schema_json, codec, blocks))
        .unwrap();
    file.flush().unwrap();
    file
}

pub fn paths(files: &[&NamedTempFile]) -> Vec<PathBuf> {
    files.iter().map(|f| f.path().to_path_buf()).collect()
}
