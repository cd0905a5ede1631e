//! Parser tree compilation and record walking.

mod common;

use avro_tensor::buffer::ValueBuffer;
use avro_tensor::error::ParseError;
use avro_tensor::parser::ParserTree;
use avro_tensor::reader::AvroValue;
use avro_tensor::tensor::DataType;
use bytes::Bytes;
use common::{longs, persons_record, record, string};

fn string_keys(keys: &[&str]) -> Vec<(String, DataType)> {
    keys.iter().map(|k| (k.to_string(), DataType::String)).collect()
}

fn strings(tree_stores: &avro_tensor::buffer::ValueStoreMap, key: &str) -> Vec<String> {
    let buffer = tree_stores[key]
        .as_any()
        .downcast_ref::<ValueBuffer<Bytes>>()
        .unwrap();
    buffer
        .values()
        .iter()
        .map(|b| String::from_utf8(b.to_vec()).unwrap())
        .collect()
}

fn longs_in(stores: &avro_tensor::buffer::ValueStoreMap, key: &str) -> Vec<i64> {
    stores[key]
        .as_any()
        .downcast_ref::<ValueBuffer<i64>>()
        .unwrap()
        .values()
        .to_vec()
}

#[test]
fn test_tree_layout_is_deterministic() {
    let keys = string_keys(&[
        "friends[2].name.first",
        "friends[*].address[*].street",
        "friends[*].job[*].coworker[*].name.first",
        "car['nickname'].color",
        "friends[gender='unknown'].name.first",
        "friends[name.first=name.last].name.initial",
    ]);
    let expected = "\
|---RootParser
|   |---NamespaceParser(default)
|   |   |---RecordParser(friends)
|   |   |   |---ArrayAllParser
|   |   |   |   |---RecordParser(gender)
|   |   |   |   |   |---StringValueParser(friends[*].gender)
|   |   |   |   |---RecordParser(name)
|   |   |   |   |   |---RecordParser(first)
|   |   |   |   |   |   |---StringValueParser(friends[*].name.first)
|   |   |   |   |   |---RecordParser(last)
|   |   |   |   |   |   |---StringValueParser(friends[*].name.last)
|   |   |   |   |---RecordParser(address)
|   |   |   |   |   |---ArrayAllParser
|   |   |   |   |   |   |---RecordParser(street)
|   |   |   |   |   |   |   |---StringValueParser(friends[*].address[*].street)
|   |   |   |   |---RecordParser(job)
|   |   |   |   |   |---ArrayAllParser
|   |   |   |   |   |   |---RecordParser(coworker)
|   |   |   |   |   |   |   |---ArrayAllParser
|   |   |   |   |   |   |   |   |---RecordParser(name)
|   |   |   |   |   |   |   |   |   |---RecordParser(first)
|   |   |   |   |   |   |   |   |   |   |---StringValueParser(friends[*].job[*].coworker[*].name.first)
|   |   |   |---ArrayFilterParser(friends[*].gender='unknown')
|   |   |   |   |---RecordParser(name)
|   |   |   |   |   |---RecordParser(first)
|   |   |   |   |   |   |---StringValueParser(friends[gender='unknown'].name.first)
|   |   |   |---ArrayFilterParser(friends[*].name.first=friends[*].name.last)
|   |   |   |   |---RecordParser(name)
|   |   |   |   |   |---RecordParser(initial)
|   |   |   |   |   |   |---StringValueParser(friends[name.first=name.last].name.initial)
|   |   |   |---ArrayIndexParser(2)
|   |   |   |   |---RecordParser(name)
|   |   |   |   |   |---RecordParser(first)
|   |   |   |   |   |   |---StringValueParser(friends[2].name.first)
|   |   |---RecordParser(car)
|   |   |   |---MapKeyParser(nickname)
|   |   |   |   |---RecordParser(color)
|   |   |   |   |   |---StringValueParser(car['nickname'].color)
";
    let tree = ParserTree::build("default", &keys).unwrap();
    assert_eq!(tree.dump(), expected);

    // Same keys, same tree
    let again = ParserTree::build("default", &keys).unwrap();
    assert_eq!(again.to_string(), expected);
}

#[test]
fn test_auxiliary_keys_come_first() {
    let keys = vec![
        ("persons[name='Carl'].age".to_string(), DataType::Int64),
        ("persons[*].name".to_string(), DataType::String),
    ];
    let tree = ParserTree::build("default", &keys).unwrap();
    let names: Vec<&str> = tree.keys().iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(names, vec!["persons[*].name", "persons[name='Carl'].age"]);
}

#[test]
fn test_carl_filter_selects_matching_ages() {
    let keys = vec![("persons[name='Carl'].age".to_string(), DataType::Int64)];
    let tree = ParserTree::build("default", &keys).unwrap();
    let mut stores = tree.new_value_stores();
    tree.parse(&mut stores, &persons_record(), &Default::default())
        .unwrap();
    assert_eq!(longs_in(&stores, "persons[name='Carl'].age"), vec![33, 12]);
    assert_eq!(
        strings(&stores, "persons[*].name"),
        vec!["Carl", "Mary", "Carl"]
    );
}

#[test]
fn test_namespace_prefix_keeps_caller_key() {
    let keys = vec![("default.id".to_string(), DataType::Int64)];
    let tree = ParserTree::build("default", &keys).unwrap();
    let mut stores = tree.new_value_stores();
    tree.parse(
        &mut stores,
        &record(vec![("id", AvroValue::Long(4))]),
        &Default::default(),
    )
    .unwrap();
    assert_eq!(longs_in(&stores, "default.id"), vec![4]);
}

#[test]
fn test_union_branch_on_record_field() {
    let keys = vec![
        ("value:long".to_string(), DataType::Int64),
        ("value:string".to_string(), DataType::String),
    ];
    let tree = ParserTree::build("default", &keys).unwrap();
    let mut stores = tree.new_value_stores();
    let records = [
        record(vec![("value", AvroValue::Union(0, Box::new(AvroValue::Long(1))))]),
        record(vec![("value", AvroValue::Union(1, Box::new(string("two"))))]),
        record(vec![("value", AvroValue::Union(0, Box::new(AvroValue::Long(3))))]),
    ];
    for r in &records {
        tree.parse(&mut stores, r, &Default::default()).unwrap();
    }
    assert_eq!(longs_in(&stores, "value:long"), vec![1, 3]);
    assert_eq!(strings(&stores, "value:string"), vec!["two"]);
}

#[test]
fn test_nested_arrays_build_shape() {
    let keys = vec![("rows[*][*]".to_string(), DataType::Int64)];
    let tree = ParserTree::build("default", &keys).unwrap();
    let mut stores = tree.new_value_stores();
    let datum = record(vec![(
        "rows",
        AvroValue::Array(vec![longs(&[1, 2]), longs(&[]), longs(&[3, 4, 5])]),
    )]);
    tree.parse(&mut stores, &datum, &Default::default()).unwrap();
    let store = &stores["rows[*][*]"];
    assert_eq!(store.len(), 5);
    assert_eq!(store.shape_builder().dense_shape(), vec![3, 3]);
}

#[test]
fn test_build_rejects_bad_keys() {
    let duplicate = string_keys(&["a.b", "default.a.b"]);
    assert!(matches!(
        ParserTree::build("default", &duplicate),
        Err(ParseError::DuplicateKey(_))
    ));

    let malformed = string_keys(&["a[*"]);
    assert!(ParserTree::build("default", &malformed).is_err());

    let prefix = string_keys(&["a", "a.b"]);
    assert!(matches!(
        ParserTree::build("default", &prefix),
        Err(ParseError::InvalidArgument(_))
    ));

    let constant_filter = string_keys(&["a['x'='y'].b"]);
    assert!(matches!(
        ParserTree::build("default", &constant_filter),
        Err(ParseError::InvalidSegment { .. })
    ));
}

#[test]
fn test_missing_map_key() {
    let keys = string_keys(&["car['nickname'].color"]);
    let tree = ParserTree::build("default", &keys).unwrap();
    let mut stores = tree.new_value_stores();
    let datum = record(vec![("car", AvroValue::Map(vec![]))]);
    let err = tree
        .parse(&mut stores, &datum, &Default::default())
        .unwrap_err();
    assert!(matches!(err, ParseError::MissingMapKey(k) if k == "nickname"));
}
