//! Avro decode layer
//!
//! Binary decoding of single datums into generic [`AvroValue`]s, container file
//! reading, and the record sources the parser tree pulls from.

mod container;
pub mod decode;
pub mod encode;
mod header;
mod source;
pub mod varint;

pub use container::ContainerReader;
pub use decode::{decode_value, AvroValue, DatumReader};
pub use encode::{encode_value, encode_with_context};
pub use header::{AvroHeader, AVRO_MAGIC, SYNC_MARKER_SIZE};
pub use source::{
    from_fn, AvroRecordReader, FnRecordSource, ReaderCheckpoint, RecordSource,
    SerializedRecordSource, VecRecordSource,
};
