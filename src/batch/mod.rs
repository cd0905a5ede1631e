//! Batch parsing into tensors.
//!
//! [`BatchParser`] compiles an [`AvroParseConfig`] into a parser tree once
//! and turns batches of records into dense and sparse tensors, splitting
//! large batches into shards parsed in parallel. [`AvroBatchReader`] feeds it
//! from container files.

mod config;
mod dataset;
mod driver;
pub mod shard;

pub use config::{AvroParseConfig, BatchReaderConfig, DenseFeature, ShardConfig, SparseFeature};
pub use dataset::AvroBatchReader;
pub use driver::{BatchParser, ParsedBatch};
