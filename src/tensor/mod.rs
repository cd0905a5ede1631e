//! Typed tensor outputs.
//!
//! Dense outputs are `ndarray` arrays of one of six element types. Strings are
//! byte strings (`Bytes`), matching how Avro `string`, `bytes`, `enum` and
//! `fixed` values all land in the same string feature type.

use std::fmt;

use bytes::Bytes;
use ndarray::{ArrayD, IxDyn};

use crate::error::ParseError;

// ============================================================================
// Data types
// ============================================================================

/// Scalar element type of a feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Bool,
    Int32,
    Int64,
    Float,
    Double,
    /// Byte strings; also used for bytes, enum symbols and fixed values
    String,
}

impl DataType {
    pub fn name(&self) -> &'static str {
        match self {
            DataType::Bool => "bool",
            DataType::Int32 => "int32",
            DataType::Int64 => "int64",
            DataType::Float => "float",
            DataType::Double => "double",
            DataType::String => "string",
        }
    }

    /// Parse a data type name. `bytes` is accepted as an alias for `string`.
    pub fn from_name(name: &str) -> Result<Self, ParseError> {
        match name {
            "bool" => Ok(DataType::Bool),
            "int32" => Ok(DataType::Int32),
            "int64" => Ok(DataType::Int64),
            "float" => Ok(DataType::Float),
            "double" => Ok(DataType::Double),
            "string" | "bytes" => Ok(DataType::String),
            other => Err(ParseError::Unimplemented(format!(
                "Data type '{}' is not supported",
                other
            ))),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Tensors
// ============================================================================

/// A dense tensor of one of the supported element types.
#[derive(Debug, Clone, PartialEq)]
pub enum Tensor {
    Bool(ArrayD<bool>),
    Int32(ArrayD<i32>),
    Int64(ArrayD<i64>),
    Float(ArrayD<f32>),
    Double(ArrayD<f64>),
    String(ArrayD<Bytes>),
}

macro_rules! dispatch {
    ($tensor:expr, $array:ident => $body:expr) => {
        match $tensor {
            Tensor::Bool($array) => $body,
            Tensor::Int32($array) => $body,
            Tensor::Int64($array) => $body,
            Tensor::Float($array) => $body,
            Tensor::Double($array) => $body,
            Tensor::String($array) => $body,
        }
    };
}

impl Tensor {
    /// Build a tensor from row-major values.
    pub fn from_vec<T: Element>(shape: &[usize], values: Vec<T>) -> Result<Self, ParseError> {
        let array = ArrayD::from_shape_vec(IxDyn(shape), values).map_err(|e| {
            ParseError::InvalidArgument(format!("Cannot build tensor of shape {:?}: {}", shape, e))
        })?;
        Ok(T::into_tensor(array))
    }

    /// A rank-0 tensor holding one value.
    pub fn scalar<T: Element>(value: T) -> Self {
        T::into_tensor(ArrayD::from_elem(IxDyn(&[]), value))
    }

    /// An empty 1-D tensor of `dtype`, the "no default" marker.
    pub fn empty(dtype: DataType) -> Self {
        match dtype {
            DataType::Bool => Tensor::Bool(ArrayD::from_elem(IxDyn(&[0]), false)),
            DataType::Int32 => Tensor::Int32(ArrayD::zeros(IxDyn(&[0]))),
            DataType::Int64 => Tensor::Int64(ArrayD::zeros(IxDyn(&[0]))),
            DataType::Float => Tensor::Float(ArrayD::zeros(IxDyn(&[0]))),
            DataType::Double => Tensor::Double(ArrayD::zeros(IxDyn(&[0]))),
            DataType::String => Tensor::String(ArrayD::from_elem(IxDyn(&[0]), Bytes::new())),
        }
    }

    pub fn dtype(&self) -> DataType {
        match self {
            Tensor::Bool(_) => DataType::Bool,
            Tensor::Int32(_) => DataType::Int32,
            Tensor::Int64(_) => DataType::Int64,
            Tensor::Float(_) => DataType::Float,
            Tensor::Double(_) => DataType::Double,
            Tensor::String(_) => DataType::String,
        }
    }

    pub fn shape(&self) -> &[usize] {
        dispatch!(self, a => a.shape())
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        dispatch!(self, a => a.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Typed view of the underlying array.
    pub fn as_array<T: Element>(&self) -> Option<&ArrayD<T>> {
        T::tensor_ref(self)
    }

    /// Same data under a new shape with the same element count.
    pub fn reshape(&self, shape: &[usize]) -> Result<Self, ParseError> {
        let err = |e: ndarray::ShapeError| {
            ParseError::InvalidArgument(format!(
                "Cannot reshape {:?} to {:?}: {}",
                self.shape(),
                shape,
                e
            ))
        };
        Ok(match self {
            Tensor::Bool(a) => Tensor::Bool(reshaped(a, shape).map_err(err)?),
            Tensor::Int32(a) => Tensor::Int32(reshaped(a, shape).map_err(err)?),
            Tensor::Int64(a) => Tensor::Int64(reshaped(a, shape).map_err(err)?),
            Tensor::Float(a) => Tensor::Float(reshaped(a, shape).map_err(err)?),
            Tensor::Double(a) => Tensor::Double(reshaped(a, shape).map_err(err)?),
            Tensor::String(a) => Tensor::String(reshaped(a, shape).map_err(err)?),
        })
    }

    /// Stack `n` copies of this tensor along a new leading dimension.
    pub fn replicate(&self, n: usize) -> Result<Self, ParseError> {
        fn tile<T: Clone>(a: &ArrayD<T>, n: usize) -> Result<ArrayD<T>, ndarray::ShapeError> {
            let mut shape = Vec::with_capacity(a.ndim() + 1);
            shape.push(n);
            shape.extend_from_slice(a.shape());
            let mut values = Vec::with_capacity(a.len() * n);
            for _ in 0..n {
                values.extend(a.iter().cloned());
            }
            ArrayD::from_shape_vec(IxDyn(&shape), values)
        }
        let err = |e: ndarray::ShapeError| {
            ParseError::Internal(format!("Cannot replicate {:?}: {}", self.shape(), e))
        };
        Ok(match self {
            Tensor::Bool(a) => Tensor::Bool(tile(a, n).map_err(err)?),
            Tensor::Int32(a) => Tensor::Int32(tile(a, n).map_err(err)?),
            Tensor::Int64(a) => Tensor::Int64(tile(a, n).map_err(err)?),
            Tensor::Float(a) => Tensor::Float(tile(a, n).map_err(err)?),
            Tensor::Double(a) => Tensor::Double(tile(a, n).map_err(err)?),
            Tensor::String(a) => Tensor::String(tile(a, n).map_err(err)?),
        })
    }
}

fn reshaped<T: Clone>(a: &ArrayD<T>, shape: &[usize]) -> Result<ArrayD<T>, ndarray::ShapeError> {
    let values: Vec<T> = a.iter().cloned().collect();
    ArrayD::from_shape_vec(IxDyn(shape), values)
}

/// COO sparse tensor.
///
/// `indices` has one row per value and one column per dimension; for rank
/// one or less it is one-dimensional.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseTensor {
    pub indices: ArrayD<i64>,
    pub values: Tensor,
    pub dense_shape: ArrayD<i64>,
}

// ============================================================================
// Partial shapes
// ============================================================================

/// A shape whose rank and dimensions may each be unknown.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PartialShape {
    dims: Option<Vec<Option<usize>>>,
}

impl PartialShape {
    /// Shape of unknown rank.
    pub fn unknown() -> Self {
        Self { dims: None }
    }

    /// Known rank, possibly unknown dimensions.
    pub fn new(dims: Vec<Option<usize>>) -> Self {
        Self { dims: Some(dims) }
    }

    /// Fully-defined shape.
    pub fn known(dims: &[usize]) -> Self {
        Self::new(dims.iter().copied().map(Some).collect())
    }

    /// Scalar (rank 0) shape.
    pub fn scalar() -> Self {
        Self::new(Vec::new())
    }

    pub fn rank(&self) -> Option<usize> {
        self.dims.as_ref().map(Vec::len)
    }

    pub fn dims(&self) -> Option<&[Option<usize>]> {
        self.dims.as_deref()
    }

    pub fn is_fully_defined(&self) -> bool {
        self.dims
            .as_ref()
            .map(|d| d.iter().all(Option::is_some))
            .unwrap_or(false)
    }

    /// Concrete dimensions if every one is known.
    pub fn to_shape(&self) -> Option<Vec<usize>> {
        self.dims.as_ref()?.iter().copied().collect()
    }

    pub fn num_elements(&self) -> Option<usize> {
        self.to_shape().map(|s| s.iter().product())
    }

    /// Prepend a dimension; unknown rank stays unknown.
    pub fn prepend(&self, dim: usize) -> Self {
        match &self.dims {
            Some(dims) => {
                let mut out = Vec::with_capacity(dims.len() + 1);
                out.push(Some(dim));
                out.extend_from_slice(dims);
                Self::new(out)
            }
            None => Self::unknown(),
        }
    }

    /// Combine two shapes that describe the same tensor.
    ///
    /// Fails when ranks differ or a dimension is known on both sides with
    /// different sizes.
    pub fn merge_with(&self, other: &PartialShape) -> Result<PartialShape, String> {
        let (Some(a), Some(b)) = (&self.dims, &other.dims) else {
            return Ok(if self.dims.is_some() {
                self.clone()
            } else {
                other.clone()
            });
        };
        if a.len() != b.len() {
            return Err(format!("rank mismatch between {} and {}", self, other));
        }
        a.iter()
            .zip(b)
            .map(|(x, y)| match (x, y) {
                (Some(x), Some(y)) if x != y => {
                    Err(format!("dimension mismatch between {} and {}", self, other))
                }
                (Some(x), _) => Ok(Some(*x)),
                (None, y) => Ok(*y),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(PartialShape::new)
    }
}

impl From<&[usize]> for PartialShape {
    fn from(dims: &[usize]) -> Self {
        Self::known(dims)
    }
}

impl fmt::Display for PartialShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.dims {
            None => f.write_str("<unknown>"),
            Some(dims) => {
                f.write_str("[")?;
                for (i, d) in dims.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    match d {
                        Some(d) => write!(f, "{}", d)?,
                        None => f.write_str("?")?,
                    }
                }
                f.write_str("]")
            }
        }
    }
}

// ============================================================================
// Element trait
// ============================================================================

/// Scalar types a value buffer can hold.
pub trait Element: Clone + Default + PartialEq + fmt::Debug + Send + Sync + 'static {
    const DATA_TYPE: DataType;

    fn into_tensor(array: ArrayD<Self>) -> Tensor;

    fn tensor_ref(tensor: &Tensor) -> Option<&ArrayD<Self>>;

    /// Parse a filter literal; `None` when the text is not a valid value.
    fn parse_literal(text: &str) -> Option<Self>;
}

macro_rules! numeric_element {
    ($ty:ty, $variant:ident) => {
        impl Element for $ty {
            const DATA_TYPE: DataType = DataType::$variant;

            fn into_tensor(array: ArrayD<Self>) -> Tensor {
                Tensor::$variant(array)
            }

            fn tensor_ref(tensor: &Tensor) -> Option<&ArrayD<Self>> {
                match tensor {
                    Tensor::$variant(a) => Some(a),
                    _ => None,
                }
            }

            fn parse_literal(text: &str) -> Option<Self> {
                text.trim().parse().ok()
            }
        }
    };
}

numeric_element!(bool, Bool);
numeric_element!(i32, Int32);
numeric_element!(i64, Int64);
numeric_element!(f32, Float);
numeric_element!(f64, Double);

impl Element for Bytes {
    const DATA_TYPE: DataType = DataType::String;

    fn into_tensor(array: ArrayD<Self>) -> Tensor {
        Tensor::String(array)
    }

    fn tensor_ref(tensor: &Tensor) -> Option<&ArrayD<Self>> {
        match tensor {
            Tensor::String(a) => Some(a),
            _ => None,
        }
    }

    fn parse_literal(text: &str) -> Option<Self> {
        Some(Bytes::copy_from_slice(text.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_shape_merge() {
        let a = PartialShape::new(vec![None, Some(3)]);
        let b = PartialShape::known(&[2, 3]);
        assert_eq!(a.merge_with(&b).unwrap(), b);
        assert_eq!(PartialShape::unknown().merge_with(&a).unwrap(), a);
        assert!(a.merge_with(&PartialShape::known(&[2, 4])).is_err());
        assert!(a.merge_with(&PartialShape::known(&[3])).is_err());
    }

    #[test]
    fn test_partial_shape_display_and_elements() {
        let s = PartialShape::new(vec![Some(2), None]);
        assert_eq!(s.to_string(), "[2,?]");
        assert_eq!(s.num_elements(), None);
        assert_eq!(PartialShape::scalar().num_elements(), Some(1));
        assert_eq!(PartialShape::unknown().to_string(), "<unknown>");
        assert_eq!(s.prepend(5).to_string(), "[5,2,?]");
    }

    #[test]
    fn test_tensor_construction() {
        let t = Tensor::from_vec(&[2, 2], vec![1i64, 2, 3, 4]).unwrap();
        assert_eq!(t.dtype(), DataType::Int64);
        assert_eq!(t.shape(), &[2, 2]);
        assert!(Tensor::from_vec(&[3], vec![1i64, 2]).is_err());

        let s = Tensor::scalar(1.5f32);
        assert_eq!(s.shape(), &[] as &[usize]);
        assert_eq!(s.len(), 1);
        assert!(Tensor::empty(DataType::String).is_empty());
    }

    #[test]
    fn test_replicate_and_reshape() {
        let t = Tensor::from_vec(&[2], vec![1i32, 2]).unwrap();
        let r = t.replicate(3).unwrap();
        assert_eq!(r.shape(), &[3, 2]);
        assert_eq!(
            r.as_array::<i32>().unwrap().iter().copied().collect::<Vec<_>>(),
            vec![1, 2, 1, 2, 1, 2]
        );
        assert_eq!(r.reshape(&[6]).unwrap().shape(), &[6]);
        assert!(r.reshape(&[5]).is_err());
    }

    #[test]
    fn test_parse_literal() {
        assert_eq!(i32::parse_literal("42"), Some(42));
        assert_eq!(i32::parse_literal("forty"), None);
        assert_eq!(bool::parse_literal("true"), Some(true));
        assert_eq!(
            Bytes::parse_literal("Carl"),
            Some(Bytes::from_static(b"Carl"))
        );
    }

    #[test]
    fn test_data_type_names() {
        assert_eq!(DataType::from_name("bytes").unwrap(), DataType::String);
        assert!(matches!(
            DataType::from_name("complex64"),
            Err(ParseError::Unimplemented(_))
        ));
    }
}
