//! Avro records to tensors
//!
//! This library extracts features from Avro records into dense and sparse
//! tensors. Features are named by path expressions over the record
//! (`friends[*].name.first`, `car['nickname'].color`,
//! `persons[name='Carl'].age`, `value:int`) which are compiled into a tree of
//! parsers. Batches of records are split into shards and parsed in parallel.
//!
//! The [`reader`] and [`schema`] modules supply the Avro side: schema
//! parsing and evolution, binary datum decoding, and container file reading
//! with block compression from [`codec`].

pub mod batch;
pub mod buffer;
pub mod codec;
pub mod error;
pub mod parser;
pub mod reader;
pub mod schema;
pub mod tensor;

// Re-export main types
pub use batch::{
    AvroBatchReader, AvroParseConfig, BatchParser, BatchReaderConfig, DenseFeature, ParsedBatch,
    ShardConfig, SparseFeature,
};
pub use buffer::{ShapeBuilder, ValueBuffer, ValueStore, ValueStoreMap};
pub use codec::Codec;
pub use error::{CodecError, DecodeError, ParseError, ReaderError, SchemaError};
pub use parser::{DefaultValues, ParserTree};
pub use reader::{
    AvroRecordReader, AvroValue, ContainerReader, DatumReader, ReaderCheckpoint, RecordSource,
};
pub use schema::{parse_schema, AvroSchema};
pub use tensor::{DataType, PartialShape, SparseTensor, Tensor};
