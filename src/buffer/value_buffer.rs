//! Typed, append-only value buffers.

use std::any::Any;
use std::collections::HashMap;
use std::fmt::Debug;

use bytes::Bytes;
use ndarray::{ArrayD, IxDyn};

use crate::buffer::shape_builder::ShapeBuilder;
use crate::error::ParseError;
use crate::tensor::{DataType, Element, PartialShape, SparseTensor, Tensor};

/// Ordered scalars of one feature plus the structure they were seen in.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueBuffer<T> {
    values: Vec<T>,
    shape: ShapeBuilder,
}

impl<T> Default for ValueBuffer<T> {
    fn default() -> Self {
        Self {
            values: Vec::new(),
            shape: ShapeBuilder::default(),
        }
    }
}

impl<T: Element> ValueBuffer<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Concatenate shard buffers in order.
    pub fn from_shards(shards: Vec<ValueBuffer<T>>) -> Self {
        let mut merged = Self::new();
        merged
            .values
            .reserve(shards.iter().map(|s| s.values.len()).sum());
        for shard in shards {
            merged.shape.merge(&shard.shape);
            merged.values.extend(shard.values);
        }
        merged
    }

    pub fn add(&mut self, value: T) {
        self.values.push(value);
        self.shape.increment();
    }

    pub fn add_by_ref(&mut self, value: &T) {
        self.add(value.clone());
    }

    pub fn begin_mark(&mut self) {
        self.shape.begin_mark();
    }

    pub fn finish_mark(&mut self) {
        self.shape.finish_mark();
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn shape_builder(&self) -> &ShapeBuilder {
        &self.shape
    }

    /// Value `k` positions from the end; 1 is the most recent.
    pub fn value_at_reverse_index(&self, k: usize) -> Option<&T> {
        if k == 0 {
            return None;
        }
        self.values.len().checked_sub(k).map(|i| &self.values[i])
    }

    /// Compare the `k`-th most recent values of two buffers.
    ///
    /// Two empty buffers match.
    pub fn values_match_at_reverse_index(&self, other: &ValueBuffer<T>, k: usize) -> bool {
        match (self.value_at_reverse_index(k), other.value_at_reverse_index(k)) {
            (Some(a), Some(b)) => a == b,
            (None, None) => self.is_empty() && other.is_empty(),
            _ => false,
        }
    }

    /// Compare the `k`-th most recent value against a literal.
    pub fn value_matches_at_reverse_index(&self, literal: &str, k: usize) -> bool {
        match (self.value_at_reverse_index(k), T::parse_literal(literal)) {
            (Some(value), Some(literal)) => *value == literal,
            _ => false,
        }
    }

    /// Output shape for a single-record parse.
    ///
    /// Priority: a fully-defined user shape with more than one element, then
    /// a default with more than one element merged with the user shape, then
    /// the shape inferred from data with known user dimensions applied.
    pub fn resolve_dense_shape(
        &self,
        key: &str,
        user_shape: &PartialShape,
        default_shape: &[usize],
    ) -> Result<Vec<usize>, ParseError> {
        if let Some(shape) = user_shape.to_shape() {
            if shape.iter().product::<usize>() > 1 {
                return Ok(shape);
            }
        }
        if default_shape.iter().product::<usize>() > 1 {
            let merged = user_shape
                .merge_with(&PartialShape::known(default_shape))
                .map_err(|m| ParseError::shape_mismatch(key, m))?;
            return merged.to_shape().ok_or_else(|| {
                ParseError::shape_mismatch(key, format!("shape {} is not fully defined", merged))
            });
        }

        let data = self.shape.dense_shape();
        match user_shape.dims() {
            None => Ok(data),
            Some(_) if data.is_empty() && user_shape.is_fully_defined() => {
                Ok(user_shape.to_shape().unwrap_or_default())
            }
            Some(dims) => apply_known_dims(key, user_shape, dims, &data),
        }
    }

    /// Output shape for a batch of `batch_size` records.
    ///
    /// A default with more than one element already carries the batch
    /// dimension and wins. Otherwise the data shape must agree in rank with
    /// `[batch_size] + user_shape` and fit inside its known dimensions,
    /// which take precedence.
    pub fn resolve_dense_shape_with_batch(
        &self,
        key: &str,
        user_shape: &PartialShape,
        default_shape: &[usize],
        batch_size: usize,
    ) -> Result<Vec<usize>, ParseError> {
        if default_shape.iter().product::<usize>() > 1 {
            return Ok(default_shape.to_vec());
        }
        let requested = user_shape.prepend(batch_size);
        let data = self.shape.dense_shape();
        let Some(dims) = requested.dims() else {
            return Ok(data);
        };
        let shape = apply_known_dims(key, &requested, dims, &data)?;
        if data.iter().zip(&shape).any(|(d, s)| d > s) {
            return Err(ParseError::shape_mismatch(
                key,
                format!(
                    "requested shape {} is incompatible with data shape {:?}",
                    requested, data
                ),
            ));
        }
        Ok(shape)
    }

    /// `[total values]`
    pub fn sparse_value_shape(&self) -> Vec<usize> {
        vec![self.values.len()]
    }

    /// `[total values, rank]`, or `[total values]` for rank one or less.
    pub fn sparse_index_shape(&self) -> Vec<usize> {
        let rank = self.shape.number_of_dimensions();
        if rank <= 1 {
            vec![self.values.len()]
        } else {
            vec![self.values.len(), rank]
        }
    }

    /// Shape a sparse tensor over this buffer densifies to.
    pub fn sparse_dense_shape(&self) -> Vec<usize> {
        if self.shape.is_marked() {
            self.shape.dense_shape()
        } else {
            vec![self.values.len()]
        }
    }

    /// Lay the values out in a tensor of `shape`.
    ///
    /// Positions without data come from `defaults`: a single element is
    /// broadcast, a tensor of exactly `shape`'s element count supplies each
    /// missing position. When the data fills `shape` the defaults are never
    /// read.
    pub fn make_dense(
        self,
        key: &str,
        shape: &[usize],
        defaults: &Tensor,
    ) -> Result<Tensor, ParseError> {
        let total: usize = shape.iter().product();
        let runs = self
            .shape
            .copy_info(shape)
            .map_err(|m| ParseError::shape_mismatch(key, m))?;
        let covered: usize = runs.iter().map(|(_, len)| len).sum();
        if covered != self.values.len() {
            return Err(ParseError::Internal(format!(
                "'{}' holds {} values but its marks account for {}",
                key,
                self.values.len(),
                covered
            )));
        }
        if covered == total {
            return Tensor::from_vec(shape, self.values);
        }

        let default = T::tensor_ref(defaults).ok_or_else(|| {
            ParseError::InvalidArgument(format!(
                "Default for '{}' has type {} but the feature is {}",
                key,
                defaults.dtype(),
                T::DATA_TYPE
            ))
        })?;
        let mut out: Vec<T> = match default.len() {
            0 => {
                return Err(ParseError::InvalidArgument(format!(
                    "Feature '{}' is missing values for shape {:?} and has no default",
                    key, shape
                )))
            }
            1 => {
                let fill = default.iter().next().cloned().unwrap_or_default();
                vec![fill; total]
            }
            n if n == total => {
                let flat: Vec<T> = default.iter().cloned().collect();
                let mut out = vec![T::default(); total];
                let gaps = self
                    .shape
                    .fill_info(shape)
                    .map_err(|m| ParseError::shape_mismatch(key, m))?;
                for (offset, len) in gaps {
                    out[offset..offset + len].clone_from_slice(&flat[offset..offset + len]);
                }
                out
            }
            n => {
                return Err(ParseError::shape_mismatch(
                    key,
                    format!(
                        "default has {} elements, expected 1 or {} for shape {:?}",
                        n, total, shape
                    ),
                ))
            }
        };

        let mut values = self.values.into_iter();
        for (offset, len) in runs {
            for slot in &mut out[offset..offset + len] {
                if let Some(value) = values.next() {
                    *slot = value;
                }
            }
        }
        Tensor::from_vec(shape, out)
    }

    /// Values in append order with their COO indices.
    pub fn make_sparse(self) -> Result<SparseTensor, ParseError> {
        let index_shape = self.sparse_index_shape();
        let dense_shape: Vec<i64> = self
            .sparse_dense_shape()
            .into_iter()
            .map(|d| d as i64)
            .collect();
        let indices = ArrayD::from_shape_vec(IxDyn(&index_shape), self.shape.indices())
            .map_err(|e| ParseError::Internal(format!("Sparse indices: {}", e)))?;
        let dense_len = dense_shape.len();
        let dense_shape = ArrayD::from_shape_vec(IxDyn(&[dense_len]), dense_shape)
            .map_err(|e| ParseError::Internal(format!("Sparse dense shape: {}", e)))?;
        let n = self.values.len();
        Ok(SparseTensor {
            indices,
            values: Tensor::from_vec(&[n], self.values)?,
            dense_shape,
        })
    }
}

fn apply_known_dims(
    key: &str,
    requested: &PartialShape,
    dims: &[Option<usize>],
    data: &[usize],
) -> Result<Vec<usize>, ParseError> {
    // Without any values, inner groups never opened and their ranks are lost
    let padded = dims.len() > data.len() && data.iter().product::<usize>() == 0;
    if dims.len() != data.len() && !padded {
        return Err(ParseError::shape_mismatch(
            key,
            format!(
                "requested shape {} is incompatible with data shape {:?}",
                requested, data
            ),
        ));
    }
    Ok(dims
        .iter()
        .enumerate()
        .map(|(i, user)| user.unwrap_or_else(|| data.get(i).copied().unwrap_or(0)))
        .collect())
}

// ============================================================================
// Type-erased stores
// ============================================================================

/// Type-erased view of a [`ValueBuffer`], one per feature key.
pub trait ValueStore: Any + Send + Debug {
    fn dtype(&self) -> DataType;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn begin_mark(&mut self);

    fn finish_mark(&mut self);

    fn shape_builder(&self) -> &ShapeBuilder;

    /// Append the single value of `default`. Returns `false` when `default`
    /// has the wrong type or does not hold exactly one element.
    fn add_default(&mut self, default: &Tensor) -> bool;

    fn resolve_dense_shape(
        &self,
        key: &str,
        user_shape: &PartialShape,
        default_shape: &[usize],
    ) -> Result<Vec<usize>, ParseError>;

    fn resolve_dense_shape_with_batch(
        &self,
        key: &str,
        user_shape: &PartialShape,
        default_shape: &[usize],
        batch_size: usize,
    ) -> Result<Vec<usize>, ParseError>;

    fn make_dense(
        self: Box<Self>,
        key: &str,
        shape: &[usize],
        defaults: &Tensor,
    ) -> Result<Tensor, ParseError>;

    fn make_sparse(self: Box<Self>) -> Result<SparseTensor, ParseError>;

    /// Buffers of different element types never match.
    fn values_match_at_reverse_index(&self, other: &dyn ValueStore, k: usize) -> bool;

    fn value_matches_at_reverse_index(&self, literal: &str, k: usize) -> bool;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl<T: Element> ValueStore for ValueBuffer<T> {
    fn dtype(&self) -> DataType {
        T::DATA_TYPE
    }

    fn len(&self) -> usize {
        self.values.len()
    }

    fn begin_mark(&mut self) {
        ValueBuffer::begin_mark(self);
    }

    fn finish_mark(&mut self) {
        ValueBuffer::finish_mark(self);
    }

    fn shape_builder(&self) -> &ShapeBuilder {
        &self.shape
    }

    fn add_default(&mut self, default: &Tensor) -> bool {
        match T::tensor_ref(default) {
            Some(array) if array.len() == 1 => {
                if let Some(value) = array.iter().next() {
                    self.add_by_ref(value);
                }
                true
            }
            _ => false,
        }
    }

    fn resolve_dense_shape(
        &self,
        key: &str,
        user_shape: &PartialShape,
        default_shape: &[usize],
    ) -> Result<Vec<usize>, ParseError> {
        ValueBuffer::resolve_dense_shape(self, key, user_shape, default_shape)
    }

    fn resolve_dense_shape_with_batch(
        &self,
        key: &str,
        user_shape: &PartialShape,
        default_shape: &[usize],
        batch_size: usize,
    ) -> Result<Vec<usize>, ParseError> {
        ValueBuffer::resolve_dense_shape_with_batch(self, key, user_shape, default_shape, batch_size)
    }

    fn make_dense(
        self: Box<Self>,
        key: &str,
        shape: &[usize],
        defaults: &Tensor,
    ) -> Result<Tensor, ParseError> {
        (*self).make_dense(key, shape, defaults)
    }

    fn make_sparse(self: Box<Self>) -> Result<SparseTensor, ParseError> {
        (*self).make_sparse()
    }

    fn values_match_at_reverse_index(&self, other: &dyn ValueStore, k: usize) -> bool {
        other
            .as_any()
            .downcast_ref::<ValueBuffer<T>>()
            .map(|other| ValueBuffer::values_match_at_reverse_index(self, other, k))
            .unwrap_or(false)
    }

    fn value_matches_at_reverse_index(&self, literal: &str, k: usize) -> bool {
        ValueBuffer::value_matches_at_reverse_index(self, literal, k)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

/// Value stores keyed by feature key.
pub type ValueStoreMap = HashMap<String, Box<dyn ValueStore>>;

/// Empty buffer for `dtype`.
pub fn new_value_store(dtype: DataType) -> Box<dyn ValueStore> {
    match dtype {
        DataType::Bool => Box::new(ValueBuffer::<bool>::new()),
        DataType::Int32 => Box::new(ValueBuffer::<i32>::new()),
        DataType::Int64 => Box::new(ValueBuffer::<i64>::new()),
        DataType::Float => Box::new(ValueBuffer::<f32>::new()),
        DataType::Double => Box::new(ValueBuffer::<f64>::new()),
        DataType::String => Box::new(ValueBuffer::<Bytes>::new()),
    }
}

/// Typed access to a type-erased store.
pub fn downcast_buffer_mut<T: Element>(store: &mut dyn ValueStore) -> Option<&mut ValueBuffer<T>> {
    store.as_any_mut().downcast_mut::<ValueBuffer<T>>()
}

/// Merge per-shard stores of one feature in shard order.
pub fn merge_value_stores(
    dtype: DataType,
    shards: Vec<Box<dyn ValueStore>>,
) -> Result<Box<dyn ValueStore>, ParseError> {
    match dtype {
        DataType::Bool => merge_typed::<bool>(shards),
        DataType::Int32 => merge_typed::<i32>(shards),
        DataType::Int64 => merge_typed::<i64>(shards),
        DataType::Float => merge_typed::<f32>(shards),
        DataType::Double => merge_typed::<f64>(shards),
        DataType::String => merge_typed::<Bytes>(shards),
    }
}

fn merge_typed<T: Element>(
    shards: Vec<Box<dyn ValueStore>>,
) -> Result<Box<dyn ValueStore>, ParseError> {
    let typed = shards
        .into_iter()
        .map(|shard| {
            let dtype = shard.dtype();
            shard
                .into_any()
                .downcast::<ValueBuffer<T>>()
                .map(|b| *b)
                .map_err(|_| {
                    ParseError::Internal(format!(
                        "Cannot merge {} shard into {} buffer",
                        dtype,
                        T::DATA_TYPE
                    ))
                })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Box::new(ValueBuffer::from_shards(typed)))
}
