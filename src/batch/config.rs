//! Batch parsing configuration.

use std::collections::HashSet;

use crate::error::ParseError;
use crate::parser::DefaultValues;
use crate::tensor::{DataType, PartialShape, Tensor};

/// A feature produced as a dense tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseFeature {
    /// Feature path, also the output name
    pub name: String,
    pub dtype: DataType,
    /// Per-record shape, without the batch dimension
    pub shape: PartialShape,
    /// Values for missing positions; empty means missing data is an error
    pub default: Tensor,
    /// Whether records may contribute different numbers of values
    pub variable_length: bool,
}

impl DenseFeature {
    /// Scalar feature with no default.
    pub fn new(name: impl Into<String>, dtype: DataType) -> Self {
        Self {
            name: name.into(),
            dtype,
            shape: PartialShape::scalar(),
            default: Tensor::empty(dtype),
            variable_length: false,
        }
    }

    pub fn with_shape(mut self, shape: PartialShape) -> Self {
        self.shape = shape;
        self
    }

    pub fn with_default(mut self, default: Tensor) -> Self {
        self.default = default;
        self
    }

    /// Mark the feature as variable length.
    pub fn variable_length(mut self) -> Self {
        self.variable_length = true;
        self
    }
}

/// A feature produced as a COO sparse tensor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SparseFeature {
    pub name: String,
    pub dtype: DataType,
}

impl SparseFeature {
    pub fn new(name: impl Into<String>, dtype: DataType) -> Self {
        Self {
            name: name.into(),
            dtype,
        }
    }
}

/// Features to extract from each batch of records.
#[derive(Debug, Clone, PartialEq)]
pub struct AvroParseConfig {
    /// Namespace feature paths may be prefixed with (default: "default")
    pub namespace: String,
    pub dense: Vec<DenseFeature>,
    pub sparse: Vec<SparseFeature>,
}

impl Default for AvroParseConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            dense: Vec::new(),
            sparse: Vec::new(),
        }
    }
}

impl AvroParseConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_dense(mut self, feature: DenseFeature) -> Self {
        self.dense.push(feature);
        self
    }

    pub fn with_sparse(mut self, feature: SparseFeature) -> Self {
        self.sparse.push(feature);
        self
    }

    /// Check feature definitions before any record is parsed.
    ///
    /// # Errors
    /// - `ParseError::DuplicateKey` if a name is used twice
    /// - `ParseError::InvalidArgument` for a default of the wrong type, a
    ///   fixed-length feature without a fully-defined shape, or a
    ///   variable-length feature whose default has more than one element
    pub fn validate(&self) -> Result<(), ParseError> {
        let mut names = HashSet::new();
        let all_names = self
            .dense
            .iter()
            .map(|f| &f.name)
            .chain(self.sparse.iter().map(|f| &f.name));
        for name in all_names {
            if !names.insert(name) {
                return Err(ParseError::DuplicateKey(name.clone()));
            }
        }

        for feature in &self.dense {
            if feature.default.dtype() != feature.dtype {
                return Err(ParseError::InvalidArgument(format!(
                    "Default for '{}' has type {} but the feature is {}",
                    feature.name,
                    feature.default.dtype(),
                    feature.dtype
                )));
            }
            if feature.variable_length {
                if feature.default.len() > 1 {
                    return Err(ParseError::InvalidArgument(format!(
                        "Variable-length feature '{}' needs a scalar default, got {} elements",
                        feature.name,
                        feature.default.len()
                    )));
                }
            } else if !feature.shape.is_fully_defined() {
                return Err(ParseError::InvalidArgument(format!(
                    "Feature '{}' has shape {} but is not variable length",
                    feature.name, feature.shape
                )));
            }
        }
        Ok(())
    }

    /// Feature keys in output order, dense before sparse.
    pub fn feature_keys(&self) -> Vec<(String, DataType)> {
        self.dense
            .iter()
            .map(|f| (f.name.clone(), f.dtype))
            .chain(self.sparse.iter().map(|f| (f.name.clone(), f.dtype)))
            .collect()
    }

    /// Single-element defaults, used when a null reaches a feature.
    pub fn null_defaults(&self) -> DefaultValues {
        self.dense
            .iter()
            .filter(|f| f.default.len() == 1)
            .map(|f| (f.name.clone(), f.default.clone()))
            .collect()
    }
}

/// How a batch is split into shards parsed in parallel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardConfig {
    /// Approximate decoded bytes per shard (default: 50,000)
    pub target_shard_bytes: usize,
    /// Minimum number of shards (default: 1)
    pub min_shards: usize,
    /// Maximum number of shards (default: 64)
    pub max_shards: usize,
    /// Parse shards on the rayon pool (default: true)
    pub parallel: bool,
}

impl Default for ShardConfig {
    fn default() -> Self {
        Self {
            target_shard_bytes: 50_000,
            min_shards: 1,
            max_shards: 64,
            parallel: true,
        }
    }
}

impl ShardConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_target_shard_bytes(mut self, bytes: usize) -> Self {
        self.target_shard_bytes = bytes;
        self
    }

    pub fn with_min_shards(mut self, min: usize) -> Self {
        self.min_shards = min;
        self
    }

    pub fn with_max_shards(mut self, max: usize) -> Self {
        self.max_shards = max;
        self
    }

    /// Parse all shards on the calling thread.
    pub fn sequential(mut self) -> Self {
        self.parallel = false;
        self
    }
}

/// Configuration for [`AvroBatchReader`](crate::batch::AvroBatchReader).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReaderConfig {
    /// Records per batch (default: 128)
    pub batch_size: usize,
    /// Skip a final batch with fewer than `batch_size` records
    pub drop_remainder: bool,
    pub shard: ShardConfig,
}

impl Default for BatchReaderConfig {
    fn default() -> Self {
        Self {
            batch_size: 128,
            drop_remainder: false,
            shard: ShardConfig::default(),
        }
    }
}

impl BatchReaderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_drop_remainder(mut self, drop: bool) -> Self {
        self.drop_remainder = drop;
        self
    }

    pub fn with_shard_config(mut self, shard: ShardConfig) -> Self {
        self.shard = shard;
        self
    }
}
