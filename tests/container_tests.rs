//! Container files, the sequential record reader and the batch dataset.

mod common;

use std::io::Cursor;

use avro_tensor::batch::{AvroBatchReader, AvroParseConfig, BatchReaderConfig, DenseFeature};
use avro_tensor::error::ParseError;
use avro_tensor::reader::{AvroRecordReader, AvroValue, ContainerReader};
use avro_tensor::schema::parse_schema;
use avro_tensor::tensor::{DataType, Tensor};
use bytes::Bytes;
use common::{container_bytes, paths, person, write_container, PERSON_SCHEMA};

fn ages(reader: &mut AvroRecordReader) -> Vec<i64> {
    let mut out = Vec::new();
    while let Some(record) = reader.next_record().unwrap() {
        match record.field("age") {
            Some(AvroValue::Long(age)) => out.push(*age),
            other => panic!("unexpected age {:?}", other),
        }
    }
    out
}

fn people(ages: &[i64]) -> Vec<AvroValue> {
    ages.iter()
        .map(|age| person(&format!("p{}", age), *age, &[*age as f32], None))
        .collect()
}

#[test]
fn test_null_codec_container() {
    let bytes = container_bytes(PERSON_SCHEMA, "null", &[people(&[1, 2]), people(&[3])]);
    let mut reader = ContainerReader::new(Cursor::new(bytes)).unwrap();
    assert_eq!(reader.schema(), &parse_schema(PERSON_SCHEMA).unwrap());
    let mut count = 0;
    while let Some(record) = reader.next_record().unwrap() {
        assert!(matches!(record.field("name"), Some(AvroValue::String(_))));
        count += 1;
    }
    assert_eq!(count, 3);
}

#[cfg(feature = "deflate")]
#[test]
fn test_deflate_container() {
    let file = write_container(PERSON_SCHEMA, "deflate", &[people(&[10, 11, 12]), people(&[13])]);
    let mut reader = AvroRecordReader::new(paths(&[&file]));
    assert_eq!(ages(&mut reader), vec![10, 11, 12, 13]);
}

#[test]
fn test_reader_walks_files_in_order() {
    let first = write_container(PERSON_SCHEMA, "null", &[people(&[1, 2])]);
    let empty = write_container(PERSON_SCHEMA, "null", &[]);
    let last = write_container(PERSON_SCHEMA, "null", &[people(&[3]), people(&[4, 5])]);
    let mut reader = AvroRecordReader::new(paths(&[&first, &empty, &last]));
    assert_eq!(ages(&mut reader), vec![1, 2, 3, 4, 5]);
    assert!(reader.next_record().unwrap().is_none());
}

#[test]
fn test_checkpoint_restore_resumes_exactly() {
    let first = write_container(PERSON_SCHEMA, "null", &[people(&[1, 2, 3]), people(&[4, 5])]);
    let second = write_container(PERSON_SCHEMA, "null", &[people(&[6]), people(&[7, 8])]);
    let files = paths(&[&first, &second]);

    for skip in 0..8 {
        let mut reader = AvroRecordReader::new(files.clone());
        for _ in 0..skip {
            reader.next_record().unwrap().unwrap();
        }
        let checkpoint = reader.checkpoint();
        let expected = ages(&mut reader);

        let mut resumed = AvroRecordReader::new(files.clone());
        resumed.restore(checkpoint).unwrap();
        assert_eq!(ages(&mut resumed), expected, "after {} records", skip);
    }
}

#[test]
fn test_batch_reader_batches() {
    let first = write_container(PERSON_SCHEMA, "null", &[people(&[1, 2, 3, 4])]);
    let second = write_container(PERSON_SCHEMA, "null", &[people(&[5, 6]), people(&[7])]);
    let files = paths(&[&first, &second]);
    let parse = AvroParseConfig::new().with_dense(DenseFeature::new("age", DataType::Int64));

    let reader = AvroBatchReader::new(
        files.clone(),
        parse.clone(),
        BatchReaderConfig::new().with_batch_size(3),
    )
    .unwrap();
    let batches: Vec<Vec<i64>> = reader
        .map(|b| {
            let b = b.unwrap();
            let t = b.dense_tensor("age").unwrap();
            t.as_array::<i64>().unwrap().iter().copied().collect()
        })
        .collect();
    assert_eq!(batches, vec![vec![1, 2, 3], vec![4, 5, 6], vec![7]]);

    let mut dropping = AvroBatchReader::new(
        files,
        parse,
        BatchReaderConfig::new()
            .with_batch_size(3)
            .with_drop_remainder(true),
    )
    .unwrap();
    assert_eq!(dropping.next_batch().unwrap().unwrap().batch_size, 3);
    assert_eq!(dropping.next_batch().unwrap().unwrap().batch_size, 3);
    assert!(dropping.next_batch().unwrap().is_none());
    assert!(matches!(
        dropping.save_checkpoint(),
        Err(ParseError::Unimplemented(_))
    ));
    assert!(matches!(
        dropping.restore_checkpoint(&[]),
        Err(ParseError::Unimplemented(_))
    ));
}

#[test]
fn test_batch_reader_with_evolved_schema() {
    let file = write_container(PERSON_SCHEMA, "null", &[people(&[1, 2])]);
    let reader_schema = parse_schema(
        r#"{
            "type": "record",
            "name": "Person",
            "fields": [
                {"name": "age", "type": "double"},
                {"name": "team", "type": "string", "default": "none"}
            ]
        }"#,
    )
    .unwrap();
    let parse = AvroParseConfig::new()
        .with_dense(DenseFeature::new("age", DataType::Double))
        .with_dense(DenseFeature::new("team", DataType::String));
    let mut reader = AvroBatchReader::new(paths(&[&file]), parse, BatchReaderConfig::new())
        .unwrap()
        .with_reader_schema(reader_schema);
    let batch = reader.next_batch().unwrap().unwrap();
    let age: Vec<f64> = batch
        .dense_tensor("age")
        .unwrap()
        .as_array::<f64>()
        .unwrap()
        .iter()
        .copied()
        .collect();
    assert_eq!(age, vec![1.0, 2.0]);
    let team = batch.dense_tensor("team").unwrap();
    assert_eq!(
        team,
        &Tensor::from_vec(&[2], vec![Bytes::from_static(b"none"); 2]).unwrap()
    );
    assert!(reader.next_batch().unwrap().is_none());
}

#[test]
fn test_batch_reader_surfaces_io_errors() {
    let parse = AvroParseConfig::new().with_dense(DenseFeature::new("age", DataType::Int64));
    let mut reader = AvroBatchReader::new(
        vec!["/nonexistent/people.avro".into()],
        parse,
        BatchReaderConfig::new(),
    )
    .unwrap();
    assert!(matches!(reader.next(), Some(Err(ParseError::Reader(_)))));
    assert!(reader.next().is_none());
}
