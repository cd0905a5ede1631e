//! Batch driver: records in, tensors out.
//!
//! A batch is split into shards that are parsed independently, on the rayon
//! pool when enabled. Each shard fills its own value stores inside one
//! top-level mark pair; after every shard has finished, the stores are
//! merged in shard order and converted into the configured dense and sparse
//! tensors.

use std::collections::HashMap;
use std::ops::Range;

use bytes::Bytes;
use rayon::prelude::*;
use tracing::debug;

use crate::batch::config::{AvroParseConfig, DenseFeature, ShardConfig};
use crate::batch::shard::{shard_count, shard_ranges};
use crate::buffer::{merge_value_stores, ValueStore, ValueStoreMap};
use crate::error::ParseError;
use crate::parser::{DefaultValues, ParserTree};
use crate::reader::{AvroValue, DatumReader, RecordSource, SerializedRecordSource, VecRecordSource};
use crate::tensor::{SparseTensor, Tensor};

/// Tensors produced from one batch, in configuration order.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedBatch {
    /// Number of records parsed
    pub batch_size: usize,
    pub dense: Vec<(String, Tensor)>,
    pub sparse: Vec<(String, SparseTensor)>,
}

impl ParsedBatch {
    pub fn dense_tensor(&self, name: &str) -> Option<&Tensor> {
        self.dense.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }

    pub fn sparse_tensor(&self, name: &str) -> Option<&SparseTensor> {
        self.sparse.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }
}

/// Parses batches of records according to an [`AvroParseConfig`].
///
/// The parser tree is compiled once and shared read-only by all shards.
#[derive(Debug, Clone)]
pub struct BatchParser {
    config: AvroParseConfig,
    shard_config: ShardConfig,
    tree: ParserTree,
    null_defaults: DefaultValues,
}

impl BatchParser {
    pub fn new(config: AvroParseConfig, shard_config: ShardConfig) -> Result<Self, ParseError> {
        config.validate()?;
        let tree = ParserTree::build(&config.namespace, &config.feature_keys())?;
        let null_defaults = config.null_defaults();
        Ok(Self {
            config,
            shard_config,
            tree,
            null_defaults,
        })
    }

    pub fn config(&self) -> &AvroParseConfig {
        &self.config
    }

    pub fn tree(&self) -> &ParserTree {
        &self.tree
    }

    /// Parse already-decoded records.
    pub fn parse_records(&self, records: &[AvroValue]) -> Result<ParsedBatch, ParseError> {
        let total_bytes = records.iter().map(AvroValue::estimated_size).sum();
        let ranges = self.plan(total_bytes, records.len());
        self.parse_sharded(ranges, |range| VecRecordSource::new(&records[range]))
    }

    /// Decode and parse binary datums.
    pub fn parse_serialized(
        &self,
        records: &[Bytes],
        reader: &DatumReader,
    ) -> Result<ParsedBatch, ParseError> {
        let total_bytes = records.iter().map(Bytes::len).sum();
        let ranges = self.plan(total_bytes, records.len());
        self.parse_sharded(ranges, |range| {
            SerializedRecordSource::new(&records[range], reader)
        })
    }

    /// Parse up to `max_records` records from `source` on the calling thread.
    ///
    /// Returns `ParseError::OutOfRange` when the source is already exhausted.
    pub fn parse_source(
        &self,
        source: &mut dyn RecordSource,
        max_records: usize,
    ) -> Result<ParsedBatch, ParseError> {
        let mut stores = ValueStoreMap::new();
        let parsed =
            self.tree
                .parse_values(&mut stores, source, Some(max_records), &self.null_defaults)?;
        self.make_tensors(stores, parsed, true)
    }

    /// Parse a single record without a batch dimension.
    pub fn parse_record(&self, record: &AvroValue) -> Result<ParsedBatch, ParseError> {
        let mut stores = self.tree.new_value_stores();
        self.tree.parse(&mut stores, record, &self.null_defaults)?;
        self.make_tensors(stores, 1, false)
    }

    fn plan(&self, total_bytes: usize, records: usize) -> Vec<Range<usize>> {
        let shards = shard_count(total_bytes, records, &self.shard_config);
        debug!(records, total_bytes, shards, "Planned batch shards");
        shard_ranges(records, shards)
    }

    fn parse_sharded<S, F>(
        &self,
        ranges: Vec<Range<usize>>,
        make_source: F,
    ) -> Result<ParsedBatch, ParseError>
    where
        S: RecordSource,
        F: Fn(Range<usize>) -> S + Sync,
    {
        let parse_shard = |range: Range<usize>| {
            let mut source = make_source(range);
            self.parse_shard(&mut source)
        };
        // Every shard runs to completion before the first error is reported
        let results: Vec<Result<(ValueStoreMap, usize), ParseError>> =
            if self.shard_config.parallel && ranges.len() > 1 {
                ranges.into_par_iter().map(parse_shard).collect()
            } else {
                ranges.into_iter().map(parse_shard).collect()
            };

        let mut shards = Vec::with_capacity(results.len());
        for result in results {
            shards.push(result?);
        }
        let batch_size = shards.iter().map(|(_, n)| n).sum();
        let stores = self.merge_shards(shards.into_iter().map(|(s, _)| s).collect())?;
        self.make_tensors(stores, batch_size, true)
    }

    fn parse_shard<S: RecordSource + ?Sized>(
        &self,
        source: &mut S,
    ) -> Result<(ValueStoreMap, usize), ParseError> {
        let mut stores = ValueStoreMap::new();
        match self
            .tree
            .parse_values(&mut stores, source, None, &self.null_defaults)
        {
            Ok(parsed) => Ok((stores, parsed)),
            Err(e) if e.is_out_of_range() => {
                let mut stores = self.tree.new_value_stores();
                for store in stores.values_mut() {
                    store.begin_mark();
                    store.finish_mark();
                }
                Ok((stores, 0))
            }
            Err(e) => Err(e),
        }
    }

    fn merge_shards(&self, shards: Vec<ValueStoreMap>) -> Result<ValueStoreMap, ParseError> {
        let mut per_key: HashMap<String, Vec<Box<dyn ValueStore>>> = HashMap::new();
        for shard in shards {
            for (key, store) in shard {
                per_key.entry(key).or_default().push(store);
            }
        }
        self.tree
            .keys()
            .iter()
            .map(|(key, dtype)| {
                let parts = per_key.remove(key).unwrap_or_default();
                Ok((key.clone(), merge_value_stores(*dtype, parts)?))
            })
            .collect()
    }

    fn make_tensors(
        &self,
        mut stores: ValueStoreMap,
        batch_size: usize,
        batched: bool,
    ) -> Result<ParsedBatch, ParseError> {
        let mut take = |name: &str| {
            stores
                .remove(name)
                .ok_or_else(|| ParseError::Internal(format!("No value store for '{}'", name)))
        };

        let mut dense = Vec::with_capacity(self.config.dense.len());
        for feature in &self.config.dense {
            let store = take(&feature.name)?;
            let tensor = if batched {
                let default = batched_default(feature, batch_size)?;
                let shape = store.resolve_dense_shape_with_batch(
                    &feature.name,
                    &feature.shape,
                    default.shape(),
                    batch_size,
                )?;
                store.make_dense(&feature.name, &shape, &default)?
            } else {
                let shape =
                    store.resolve_dense_shape(&feature.name, &feature.shape, feature.default.shape())?;
                store.make_dense(&feature.name, &shape, &feature.default)?
            };
            dense.push((feature.name.clone(), tensor));
        }

        let mut sparse = Vec::with_capacity(self.config.sparse.len());
        for feature in &self.config.sparse {
            let store = take(&feature.name)?;
            sparse.push((feature.name.clone(), store.make_sparse()?));
        }

        debug!(
            batch_size,
            dense = dense.len(),
            sparse = sparse.len(),
            "Assembled batch tensors"
        );
        Ok(ParsedBatch {
            batch_size,
            dense,
            sparse,
        })
    }
}

/// The default tensor for a whole batch.
///
/// Scalar defaults broadcast as they are. A default holding one record's
/// worth of values is replicated across the batch; anything else is taken to
/// already include the batch dimension.
fn batched_default(feature: &DenseFeature, batch_size: usize) -> Result<Tensor, ParseError> {
    let default = &feature.default;
    if default.len() <= 1 {
        return Ok(default.clone());
    }
    match feature.shape.to_shape() {
        Some(shape) if shape.iter().product::<usize>() == default.len() => {
            default.reshape(&shape)?.replicate(batch_size)
        }
        _ => Ok(default.clone()),
    }
}
