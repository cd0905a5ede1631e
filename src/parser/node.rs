//! Parser node kinds.

use std::fmt;

use crate::parser::path::FilterKind;
use crate::tensor::DataType;

pub(crate) type NodeId = usize;

/// A resolved filter operand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FilterOperand {
    Constant(String),
    /// Store key of the feature holding the operand values
    Key(String),
}

impl fmt::Display for FilterOperand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterOperand::Constant(c) => write!(f, "'{}'", c),
            FilterOperand::Key(k) => f.write_str(k),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ParserKind {
    Root,
    Namespace(String),
    Record(String),
    /// Union branch selected by kind name
    Union(String),
    ArrayAll,
    ArrayIndex(usize),
    ArrayFilter {
        lhs: FilterOperand,
        rhs: FilterOperand,
        kind: FilterKind,
    },
    MapKey(String),
    Value {
        key: String,
        dtype: DataType,
    },
}

impl ParserKind {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ParserKind::Value { .. })
    }
}

impl fmt::Display for ParserKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParserKind::Root => f.write_str("RootParser"),
            ParserKind::Namespace(ns) => write!(f, "NamespaceParser({})", ns),
            ParserKind::Record(name) => write!(f, "RecordParser({})", name),
            ParserKind::Union(branch) => write!(f, "UnionParser({})", branch),
            ParserKind::ArrayAll => f.write_str("ArrayAllParser"),
            ParserKind::ArrayIndex(i) => write!(f, "ArrayIndexParser({})", i),
            ParserKind::ArrayFilter { lhs, rhs, .. } => {
                write!(f, "ArrayFilterParser({}={})", lhs, rhs)
            }
            ParserKind::MapKey(key) => write!(f, "MapKeyParser({})", key),
            ParserKind::Value { key, dtype } => {
                let prefix = match dtype {
                    DataType::Bool => "Bool",
                    DataType::Int32 => "Int",
                    DataType::Int64 => "Long",
                    DataType::Float => "Float",
                    DataType::Double => "Double",
                    DataType::String => "String",
                };
                write!(f, "{}ValueParser({})", prefix, key)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ParserNode {
    pub kind: ParserKind,
    pub children: Vec<NodeId>,
}

impl ParserNode {
    pub fn new(kind: ParserKind) -> Self {
        Self {
            kind,
            children: Vec::new(),
        }
    }
}
