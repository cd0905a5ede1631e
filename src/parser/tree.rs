//! Compiled parser trees.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use bytes::Bytes;
use tracing::{debug, trace};

use crate::buffer::{downcast_buffer_mut, new_value_store, ValueStore, ValueStoreMap};
use crate::error::ParseError;
use crate::parser::node::{FilterOperand, NodeId, ParserKind, ParserNode};
use crate::parser::path::{
    join_segments, prepare_keys, split_path, FilterKind, FilterSide, PreparedKeys, Segment,
};
use crate::parser::prefix_tree::PrefixTree;
use crate::reader::{AvroValue, RecordSource};
use crate::tensor::{DataType, Element, Tensor};

/// Per-feature defaults consulted when a terminal parser meets a null.
pub type DefaultValues = HashMap<String, Tensor>;

const ROOT: NodeId = 0;

/// An executable tree of parser nodes built from feature keys.
///
/// The tree is immutable once built and can be shared across threads;
/// all per-batch state lives in the [`ValueStoreMap`] passed to
/// [`parse`](Self::parse).
///
/// ```
/// use avro_tensor::parser::ParserTree;
/// use avro_tensor::reader::AvroValue;
/// use avro_tensor::tensor::DataType;
///
/// let tree = ParserTree::build("default", &[("id".to_string(), DataType::Int64)]).unwrap();
/// let mut stores = tree.new_value_stores();
/// let record = AvroValue::Record(vec![("id".into(), AvroValue::Long(7))]);
/// tree.parse(&mut stores, &record, &Default::default()).unwrap();
/// assert_eq!(stores["id"].len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct ParserTree {
    namespace: String,
    nodes: Vec<ParserNode>,
    /// Terminal nodes below each node, filled by `initialize`
    final_descendants: Vec<Vec<NodeId>>,
    /// Feature keys in parse order, auxiliary filter keys first
    keys: Vec<(String, DataType)>,
}

impl ParserTree {
    /// Compile feature keys into a parser tree.
    ///
    /// # Errors
    /// - `ParseError::DuplicateKey` if two keys name the same path
    /// - `ParseError::InvalidSegment` for unparseable path syntax
    /// - `ParseError::InvalidArgument` if one key is a prefix of another
    pub fn build(namespace: &str, keys: &[(String, DataType)]) -> Result<Self, ParseError> {
        let prepared = prepare_keys(namespace, keys)?;
        let prefix_tree = PrefixTree::build(&prepared.keys)?;

        let mut tree = Self {
            namespace: namespace.to_string(),
            nodes: vec![ParserNode::new(ParserKind::Root)],
            final_descendants: Vec::new(),
            keys: prepared
                .keys
                .iter()
                .map(|k| (k.store_key.clone(), k.dtype))
                .collect(),
        };
        let ns = tree.add_child(ROOT, ParserKind::Namespace(namespace.to_string()));
        let mut path = Vec::new();
        tree.build_children(&prefix_tree, PrefixTree::ROOT, ns, &prepared, &mut path)?;
        tree.initialize();

        debug!(
            namespace,
            nodes = tree.nodes.len(),
            keys = tree.keys.len(),
            auxiliary_keys = tree.keys.len() - keys.len(),
            "Built parser tree"
        );
        Ok(tree)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Feature keys in parse order, including auxiliary filter operands.
    pub fn keys(&self) -> &[(String, DataType)] {
        &self.keys
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// One empty value store per key.
    pub fn new_value_stores(&self) -> ValueStoreMap {
        self.keys
            .iter()
            .map(|(key, dtype)| (key.clone(), new_value_store(*dtype)))
            .collect()
    }

    fn add_child(&mut self, parent: NodeId, kind: ParserKind) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(ParserNode::new(kind));
        self.nodes[parent].children.push(id);
        id
    }

    fn build_children(
        &mut self,
        prefix_tree: &PrefixTree,
        prefix_id: usize,
        parent: NodeId,
        prepared: &PreparedKeys,
        path: &mut Vec<String>,
    ) -> Result<(), ParseError> {
        for &child in &prefix_tree.node(prefix_id).children {
            let prefix = prefix_tree.node(child);
            let segment = prefix.segment.as_ref().ok_or_else(|| {
                ParseError::Internal(format!("Prefix '{}' has no segment", prefix.text))
            })?;
            let kind = node_kind(segment, path, prepared)?;
            let id = self.add_child(parent, kind);
            if let Some(index) = prefix.key {
                let key = &prepared.keys[index];
                self.add_child(
                    id,
                    ParserKind::Value {
                        key: key.store_key.clone(),
                        dtype: key.dtype,
                    },
                );
            }
            path.push(prefix.text.clone());
            self.build_children(prefix_tree, child, id, prepared, path)?;
            path.pop();
        }
        Ok(())
    }

    /// Compute the final descendants of every node.
    ///
    /// Nodes are visited in reverse breadth-first order so that children
    /// are complete before their parents.
    fn initialize(&mut self) {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut queue = VecDeque::from([ROOT]);
        while let Some(id) = queue.pop_front() {
            order.push(id);
            queue.extend(self.nodes[id].children.iter().copied());
        }

        let mut final_descendants = vec![Vec::new(); self.nodes.len()];
        for &id in order.iter().rev() {
            let mut terminals = Vec::new();
            for &child in &self.nodes[id].children {
                if self.nodes[child].kind.is_terminal() {
                    terminals.push(child);
                } else {
                    terminals.extend_from_slice(&final_descendants[child]);
                }
            }
            final_descendants[id] = terminals;
        }
        self.final_descendants = final_descendants;
    }

    // ========================================================================
    // Parsing
    // ========================================================================

    /// Parse one record into `stores`.
    pub fn parse(
        &self,
        stores: &mut ValueStoreMap,
        datum: &AvroValue,
        defaults: &DefaultValues,
    ) -> Result<(), ParseError> {
        self.parse_node(ROOT, datum, stores, defaults)
    }

    /// Drain up to `limit` records (all when `None`) from `source` into
    /// fresh stores wrapped in one begin/finish mark pair.
    ///
    /// Returns the number of records parsed, or `ParseError::OutOfRange` if
    /// the source was exhausted before the first record.
    pub fn parse_values<S: RecordSource + ?Sized>(
        &self,
        stores: &mut ValueStoreMap,
        source: &mut S,
        limit: Option<usize>,
        defaults: &DefaultValues,
    ) -> Result<usize, ParseError> {
        *stores = self.new_value_stores();
        for store in stores.values_mut() {
            store.begin_mark();
        }

        let mut parsed = 0usize;
        while limit.map_or(true, |limit| parsed < limit) {
            let Some(record) = source.read_record()? else {
                if parsed == 0 {
                    return Err(ParseError::OutOfRange("record source is exhausted".into()));
                }
                break;
            };
            self.parse(stores, &record, defaults)?;
            parsed += 1;
        }

        for store in stores.values_mut() {
            store.finish_mark();
        }
        Ok(parsed)
    }

    fn parse_children(
        &self,
        id: NodeId,
        datum: &AvroValue,
        stores: &mut ValueStoreMap,
        defaults: &DefaultValues,
    ) -> Result<(), ParseError> {
        for &child in &self.nodes[id].children {
            self.parse_node(child, datum, stores, defaults)?;
        }
        Ok(())
    }

    fn parse_node(
        &self,
        id: NodeId,
        datum: &AvroValue,
        stores: &mut ValueStoreMap,
        defaults: &DefaultValues,
    ) -> Result<(), ParseError> {
        let kind = &self.nodes[id].kind;
        match kind {
            ParserKind::Root | ParserKind::Namespace(_) => {
                self.parse_children(id, datum, stores, defaults)
            }
            ParserKind::Record(name) => {
                let AvroValue::Record(fields) = datum.resolve_union() else {
                    return Err(mismatch(kind, "record", datum));
                };
                let (_, value) = fields
                    .iter()
                    .find(|(field, _)| field == name)
                    .ok_or_else(|| ParseError::MissingField(name.clone()))?;
                self.parse_children(id, value, stores, defaults)
            }
            ParserKind::Union(branch) => {
                let resolved = datum.resolve_union();
                if resolved.type_name() == branch {
                    self.parse_children(id, resolved, stores, defaults)
                } else {
                    trace!(
                        branch = %branch,
                        actual = resolved.type_name(),
                        "Dropping datum of unselected union branch"
                    );
                    Ok(())
                }
            }
            ParserKind::ArrayAll => {
                let items = array_items(kind, datum)?;
                self.mark(id, stores, true)?;
                for item in items {
                    self.parse_children(id, item, stores, defaults)?;
                }
                self.mark(id, stores, false)
            }
            ParserKind::ArrayIndex(index) => {
                let items = array_items(kind, datum)?;
                let len = items.len();
                // `index == len` passes the bounds check and fails on access
                if *index > len {
                    return Err(ParseError::IndexOutOfBounds { index: *index, len });
                }
                let item = items
                    .get(*index)
                    .ok_or(ParseError::ElementAccess { index: *index, len })?;
                self.parse_children(id, item, stores, defaults)
            }
            ParserKind::ArrayFilter { lhs, rhs, kind: filter } => {
                let items = array_items(kind, datum)?;
                let n = items.len();
                self.mark(id, stores, true)?;
                for (i, item) in items.iter().enumerate() {
                    if filter_matches(lhs, rhs, *filter, n - i, stores)? {
                        self.parse_children(id, item, stores, defaults)?;
                    }
                }
                self.mark(id, stores, false)
            }
            ParserKind::MapKey(key) => {
                let AvroValue::Map(entries) = datum.resolve_union() else {
                    return Err(mismatch(kind, "map", datum));
                };
                let (_, value) = entries
                    .iter()
                    .find(|(k, _)| k == key)
                    .ok_or_else(|| ParseError::MissingMapKey(key.clone()))?;
                self.parse_children(id, value, stores, defaults)
            }
            ParserKind::Value { key, dtype } => {
                parse_value(kind, key, *dtype, datum, stores, defaults)
            }
        }
    }

    /// Begin or finish a nesting level on every store below `id`.
    fn mark(&self, id: NodeId, stores: &mut ValueStoreMap, begin: bool) -> Result<(), ParseError> {
        for &terminal in &self.final_descendants[id] {
            let ParserKind::Value { key, .. } = &self.nodes[terminal].kind else {
                continue;
            };
            let store = stores.get_mut(key).ok_or_else(|| missing_store(key))?;
            if begin {
                store.begin_mark();
            } else {
                store.finish_mark();
            }
        }
        Ok(())
    }

    /// Human-readable rendering, one node per line.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        self.dump_node(ROOT, 0, &mut out);
        out
    }

    fn dump_node(&self, id: NodeId, depth: usize, out: &mut String) {
        for _ in 0..depth {
            out.push_str("|   ");
        }
        out.push_str("|---");
        out.push_str(&self.nodes[id].kind.to_string());
        out.push('\n');
        for &child in &self.nodes[id].children {
            self.dump_node(child, depth + 1, out);
        }
    }
}

impl fmt::Display for ParserTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dump())
    }
}

fn node_kind(
    segment: &Segment,
    path: &[String],
    prepared: &PreparedKeys,
) -> Result<ParserKind, ParseError> {
    Ok(match segment {
        Segment::Attribute(name) => ParserKind::Record(name.clone()),
        Segment::ArrayAll => ParserKind::ArrayAll,
        Segment::ArrayIndex(index) => ParserKind::ArrayIndex(*index),
        Segment::MapKey(key) => ParserKind::MapKey(key.clone()),
        Segment::UnionBranch(branch) => ParserKind::Union(branch.clone()),
        Segment::ArrayFilter { lhs, rhs, kind } => {
            let array_path = join_segments(path);
            ParserKind::ArrayFilter {
                lhs: resolve_operand(lhs, &array_path, prepared)?,
                rhs: resolve_operand(rhs, &array_path, prepared)?,
                kind: *kind,
            }
        }
    })
}

fn resolve_operand(
    side: &FilterSide,
    array_path: &str,
    prepared: &PreparedKeys,
) -> Result<FilterOperand, ParseError> {
    let dependency = match side {
        FilterSide::Constant(constant) => return Ok(FilterOperand::Constant(constant.clone())),
        other => other.dependency(array_path).unwrap_or_default(),
    };
    let canonical = join_segments(&split_path(&dependency, &dependency)?);
    prepared
        .store_keys
        .get(&canonical)
        .map(|key| FilterOperand::Key(key.clone()))
        .ok_or_else(|| {
            ParseError::Internal(format!("No feature registered for filter operand '{}'", canonical))
        })
}

fn filter_matches(
    lhs: &FilterOperand,
    rhs: &FilterOperand,
    kind: FilterKind,
    reverse_index: usize,
    stores: &ValueStoreMap,
) -> Result<bool, ParseError> {
    let store = |key: &str| stores.get(key).ok_or_else(|| missing_store(key));
    Ok(match (kind, lhs, rhs) {
        (FilterKind::NeitherConstant, FilterOperand::Key(l), FilterOperand::Key(r)) => {
            store(l)?.values_match_at_reverse_index(&**store(r)?, reverse_index)
        }
        (FilterKind::RhsConstant, FilterOperand::Key(l), FilterOperand::Constant(c))
        | (FilterKind::LhsConstant, FilterOperand::Constant(c), FilterOperand::Key(l)) => {
            store(l)?.value_matches_at_reverse_index(c, reverse_index)
        }
        _ => {
            return Err(ParseError::Internal(format!(
                "Filter {}={} does not fit kind {:?}",
                lhs, rhs, kind
            )))
        }
    })
}

fn parse_value(
    kind: &ParserKind,
    key: &str,
    dtype: DataType,
    datum: &AvroValue,
    stores: &mut ValueStoreMap,
    defaults: &DefaultValues,
) -> Result<(), ParseError> {
    let store = stores.get_mut(key).ok_or_else(|| missing_store(key))?;
    let store = store.as_mut();
    match (dtype, datum.resolve_union()) {
        (DataType::Bool, AvroValue::Boolean(v)) => push(store, *v),
        (DataType::Int32, AvroValue::Int(v)) => push(store, *v),
        (DataType::Int64, AvroValue::Long(v)) => push(store, *v),
        (DataType::Float, AvroValue::Float(v)) => push(store, *v),
        (DataType::Double, AvroValue::Double(v)) => push(store, *v),
        (DataType::String, AvroValue::String(s)) => push(store, Bytes::copy_from_slice(s.as_bytes())),
        (DataType::String, AvroValue::Bytes(b) | AvroValue::Fixed(b)) => {
            push(store, Bytes::copy_from_slice(b))
        }
        (DataType::String, AvroValue::Enum(_, symbol)) => {
            push(store, Bytes::copy_from_slice(symbol.as_bytes()))
        }
        (_, AvroValue::Null) => {
            if let Some(default) = defaults.get(key) {
                if store.add_default(default) {
                    return Ok(());
                }
            }
            Err(ParseError::type_mismatch(
                kind.to_string(),
                expected_type(dtype),
                "null",
            ))
        }
        (_, other) => Err(ParseError::type_mismatch(
            kind.to_string(),
            expected_type(dtype),
            other.type_name(),
        )),
    }
}

fn push<T: Element>(store: &mut dyn ValueStore, value: T) -> Result<(), ParseError> {
    let dtype = store.dtype();
    let buffer = downcast_buffer_mut::<T>(store).ok_or_else(|| {
        ParseError::Internal(format!(
            "Store holds {} values, parser produced {}",
            dtype,
            T::DATA_TYPE
        ))
    })?;
    buffer.add(value);
    Ok(())
}

fn expected_type(dtype: DataType) -> &'static str {
    match dtype {
        DataType::Bool => "boolean",
        DataType::Int32 => "int",
        DataType::Int64 => "long",
        DataType::Float => "float",
        DataType::Double => "double",
        DataType::String => "string, bytes, enum or fixed",
    }
}

fn array_items<'a>(kind: &ParserKind, datum: &'a AvroValue) -> Result<&'a [AvroValue], ParseError> {
    match datum.resolve_union() {
        AvroValue::Array(items) => Ok(items),
        _ => Err(mismatch(kind, "array", datum)),
    }
}

fn mismatch(kind: &ParserKind, expected: &str, datum: &AvroValue) -> ParseError {
    ParseError::type_mismatch(kind.to_string(), expected, datum.resolve_union().type_name())
}

fn missing_store(key: &str) -> ParseError {
    ParseError::Internal(format!("No value store for key '{}'", key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::ValueBuffer;

    fn record(fields: Vec<(&str, AvroValue)>) -> AvroValue {
        AvroValue::Record(fields.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }

    fn string(s: &str) -> AvroValue {
        AvroValue::String(s.to_string())
    }

    fn build(keys: &[(&str, DataType)]) -> ParserTree {
        let keys: Vec<_> = keys.iter().map(|(k, d)| (k.to_string(), *d)).collect();
        ParserTree::build("default", &keys).unwrap()
    }

    fn values<T: Element>(stores: &ValueStoreMap, key: &str) -> Vec<T> {
        stores[key]
            .as_any()
            .downcast_ref::<ValueBuffer<T>>()
            .unwrap()
            .values()
            .to_vec()
    }

    fn persons() -> AvroValue {
        let person = |name: &str, age: i32| record(vec![("name", string(name)), ("age", AvroValue::Int(age))]);
        record(vec![(
            "persons",
            AvroValue::Array(vec![person("Carl", 33), person("Mary", 22), person("Carl", 12)]),
        )])
    }

    #[test]
    fn test_filter_keeps_matching_elements_in_order() {
        let tree = build(&[("persons[name='Carl'].age", DataType::Int32)]);
        let mut stores = tree.new_value_stores();
        tree.parse(&mut stores, &persons(), &DefaultValues::new()).unwrap();
        assert_eq!(values::<i32>(&stores, "persons[name='Carl'].age"), vec![33, 12]);
        assert_eq!(
            stores["persons[name='Carl'].age"].shape_builder().dense_shape(),
            vec![2]
        );
    }

    #[test]
    fn test_filter_between_two_fields() {
        let pair = |a: &str, b: &str, v: i64| {
            record(vec![("a", string(a)), ("b", string(b)), ("v", AvroValue::Long(v))])
        };
        let datum = record(vec![(
            "items",
            AvroValue::Array(vec![pair("x", "x", 1), pair("x", "y", 2), pair("z", "z", 3)]),
        )]);
        let tree = build(&[("items[a=b].v", DataType::Int64)]);
        let mut stores = tree.new_value_stores();
        tree.parse(&mut stores, &datum, &DefaultValues::new()).unwrap();
        assert_eq!(values::<i64>(&stores, "items[a=b].v"), vec![1, 3]);
    }

    #[test]
    fn test_filter_matching_nothing_still_marks() {
        let tree = build(&[("persons[name='Nobody'].age", DataType::Int32)]);
        let mut stores = tree.new_value_stores();
        tree.parse(&mut stores, &persons(), &DefaultValues::new()).unwrap();
        let builder = stores["persons[name='Nobody'].age"].shape_builder();
        assert_eq!(builder.element_count(), 0);
        assert_eq!(builder.number_of_dimensions(), 1);
    }

    #[test]
    fn test_array_index_bounds() {
        let tree = build(&[("xs[2]", DataType::Int64)]);
        let datum = |n: usize| record(vec![("xs", AvroValue::Array(vec![AvroValue::Long(5); n]))]);

        let mut stores = tree.new_value_stores();
        tree.parse(&mut stores, &datum(3), &DefaultValues::new()).unwrap();
        assert_eq!(values::<i64>(&stores, "xs[2]"), vec![5]);
        assert!(!stores["xs[2]"].shape_builder().is_marked());

        let err = tree.parse(&mut stores, &datum(2), &DefaultValues::new()).unwrap_err();
        assert!(matches!(err, ParseError::ElementAccess { index: 2, len: 2 }));
        let err = tree.parse(&mut stores, &datum(1), &DefaultValues::new()).unwrap_err();
        assert!(matches!(err, ParseError::IndexOutOfBounds { index: 2, len: 1 }));
    }

    #[test]
    fn test_map_key() {
        let tree = build(&[("car['nickname'].color", DataType::String)]);
        let datum = record(vec![(
            "car",
            AvroValue::Map(vec![
                ("make".into(), record(vec![("color", string("red"))])),
                ("nickname".into(), record(vec![("color", string("blue"))])),
            ]),
        )]);
        let mut stores = tree.new_value_stores();
        tree.parse(&mut stores, &datum, &DefaultValues::new()).unwrap();
        assert_eq!(
            values::<Bytes>(&stores, "car['nickname'].color"),
            vec![Bytes::from_static(b"blue")]
        );

        let missing = record(vec![("car", AvroValue::Map(vec![]))]);
        assert!(matches!(
            tree.parse(&mut stores, &missing, &DefaultValues::new()),
            Err(ParseError::MissingMapKey(k)) if k == "nickname"
        ));
    }

    #[test]
    fn test_union_branch_selection() {
        let tree = build(&[("v:string", DataType::String), ("v:long", DataType::Int64)]);
        let mut stores = tree.new_value_stores();
        let datum = |v: AvroValue| record(vec![("v", v)]);
        tree.parse(
            &mut stores,
            &datum(AvroValue::Union(1, Box::new(string("a")))),
            &DefaultValues::new(),
        )
        .unwrap();
        tree.parse(
            &mut stores,
            &datum(AvroValue::Union(0, Box::new(AvroValue::Long(4)))),
            &DefaultValues::new(),
        )
        .unwrap();
        assert_eq!(values::<Bytes>(&stores, "v:string"), vec![Bytes::from_static(b"a")]);
        assert_eq!(values::<i64>(&stores, "v:long"), vec![4]);
    }

    #[test]
    fn test_null_uses_default() {
        let tree = build(&[("age", DataType::Int32)]);
        let datum = record(vec![("age", AvroValue::Union(0, Box::new(AvroValue::Null)))]);
        let mut stores = tree.new_value_stores();

        let err = tree.parse(&mut stores, &datum, &DefaultValues::new()).unwrap_err();
        assert!(matches!(err, ParseError::TypeMismatch { ref actual, .. } if actual == "null"));

        let defaults = DefaultValues::from([("age".to_string(), Tensor::scalar(-1i32))]);
        tree.parse(&mut stores, &datum, &defaults).unwrap();
        assert_eq!(values::<i32>(&stores, "age"), vec![-1]);
    }

    #[test]
    fn test_strict_terminal_types() {
        let tree = build(&[("n", DataType::Int64)]);
        let mut stores = tree.new_value_stores();
        let err = tree
            .parse(&mut stores, &record(vec![("n", AvroValue::Int(1))]), &DefaultValues::new())
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Type mismatch in LongValueParser(n): expected long, found int"
        );
    }

    #[test]
    fn test_string_accepts_enum_and_fixed() {
        let tree = build(&[("s[*]", DataType::String)]);
        let datum = record(vec![(
            "s",
            AvroValue::Array(vec![
                AvroValue::Enum(1, "RED".into()),
                AvroValue::Fixed(vec![b'a', b'b']),
                AvroValue::Bytes(vec![b'c']),
            ]),
        )]);
        let mut stores = tree.new_value_stores();
        tree.parse(&mut stores, &datum, &DefaultValues::new()).unwrap();
        assert_eq!(
            values::<Bytes>(&stores, "s[*]"),
            vec![
                Bytes::from_static(b"RED"),
                Bytes::from_static(b"ab"),
                Bytes::from_static(b"c")
            ]
        );
    }

    #[test]
    fn test_missing_field() {
        let tree = build(&[("a.b", DataType::Bool)]);
        let mut stores = tree.new_value_stores();
        let datum = record(vec![("a", record(vec![]))]);
        assert!(matches!(
            tree.parse(&mut stores, &datum, &DefaultValues::new()),
            Err(ParseError::MissingField(f)) if f == "b"
        ));
    }

    #[test]
    fn test_final_descendants() {
        let tree = build(&[("a[*].b", DataType::Int64), ("a[*].c.d", DataType::Int64), ("e", DataType::Int64)]);
        let keys_below = |id: NodeId| -> Vec<String> {
            tree.final_descendants[id]
                .iter()
                .filter_map(|&t| match &tree.nodes[t].kind {
                    ParserKind::Value { key, .. } => Some(key.clone()),
                    _ => None,
                })
                .collect()
        };
        assert_eq!(keys_below(ROOT), vec!["a[*].b", "a[*].c.d", "e"]);
        let array_all = tree
            .nodes
            .iter()
            .position(|n| n.kind == ParserKind::ArrayAll)
            .unwrap();
        assert_eq!(keys_below(array_all), vec!["a[*].b", "a[*].c.d"]);
    }

    #[test]
    fn test_parse_values_wraps_batch() {
        let tree = build(&[("x", DataType::Int64)]);
        let records: Vec<_> = (0..3)
            .map(|i| record(vec![("x", AvroValue::Long(i))]))
            .collect();
        let mut source = crate::reader::VecRecordSource::new(&records);
        let mut stores = ValueStoreMap::new();

        let n = tree
            .parse_values(&mut stores, &mut source, Some(2), &DefaultValues::new())
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(stores["x"].shape_builder().dense_shape(), vec![2]);

        let n = tree
            .parse_values(&mut stores, &mut source, None, &DefaultValues::new())
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(values::<i64>(&stores, "x"), vec![2]);

        let err = tree
            .parse_values(&mut stores, &mut source, None, &DefaultValues::new())
            .unwrap_err();
        assert!(err.is_out_of_range());
    }

    #[test]
    fn test_build_errors() {
        let dup = vec![
            ("a".to_string(), DataType::Int64),
            ("a".to_string(), DataType::Int64),
        ];
        assert!(matches!(
            ParserTree::build("default", &dup),
            Err(ParseError::DuplicateKey(_))
        ));
        let bad = vec![("a.b-c".to_string(), DataType::Int64)];
        assert!(matches!(
            ParserTree::build("default", &bad),
            Err(ParseError::InvalidSegment { segment, .. }) if segment == "b-c"
        ));
    }
}
