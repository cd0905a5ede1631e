//! Error types for Avro decoding and tensor parsing

use std::io;
use thiserror::Error;

/// Errors that can occur during schema operations
#[derive(Debug, Error)]
pub enum SchemaError {
    /// Invalid schema format
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),
    /// Unsupported schema type
    #[error("Unsupported type: {0}")]
    UnsupportedType(String),
    /// Schema JSON could not be parsed
    #[error("Parse error: {0}")]
    ParseError(String),
    /// Named type reference without a definition
    #[error("Unresolved named type: {0}")]
    UnresolvedName(String),
    /// Writer and reader schemas cannot be reconciled
    #[error("Incompatible schemas: {0}")]
    IncompatibleSchemas(String),
}

/// Errors that can occur during codec operations
#[derive(Debug, Error)]
pub enum CodecError {
    /// Unknown codec, or a codec whose cargo feature is disabled
    #[error("Unsupported codec: {0}")]
    UnsupportedCodec(String),
    /// Decompression error
    #[error("Decompression error: {0}")]
    DecompressionError(String),
}

/// Errors that can occur while decoding binary Avro data
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Invalid Avro data
    #[error("Invalid data: {0}")]
    InvalidData(String),
    /// Unexpected end of data
    #[error("Unexpected end of data")]
    UnexpectedEof,
    /// Value does not fit the schema it is encoded or resolved against
    #[error("Type mismatch: {0}")]
    TypeMismatch(String),
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    /// Invalid varint encoding
    #[error("Invalid varint encoding")]
    InvalidVarint,
    /// String is not valid UTF-8
    #[error("Invalid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
    /// Schema problem discovered while decoding
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),
}

/// Errors raised while reading Avro object container files
#[derive(Debug, Error)]
pub enum ReaderError {
    /// IO error from the underlying file
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Structural error at a specific offset
    #[error("Parse error at offset {offset}: {message}")]
    Parse { offset: u64, message: String },

    /// Schema error
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Record decoding failed inside a block
    #[error("Decode error in block {block_index}, record {record_index}: {source}")]
    Decode {
        block_index: usize,
        record_index: usize,
        #[source]
        source: DecodeError,
    },

    /// Codec error
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Invalid magic bytes
    #[error("Invalid magic bytes: expected 'Obj\\x01', found {0:?}")]
    InvalidMagic([u8; 4]),

    /// Sync marker after a block does not match the header
    #[error("Invalid sync marker at block {block_index}, offset {offset}")]
    InvalidSyncMarker { block_index: usize, offset: u64 },

    /// A checkpoint refers to a file or position the reader cannot restore
    #[error("Invalid checkpoint: {0}")]
    InvalidCheckpoint(String),
}

/// Errors produced by the path compiler, the parser tree, value buffers and the
/// batch driver.
#[derive(Debug, Error)]
pub enum ParseError {
    /// Two features were declared with the same path
    #[error("Duplicate feature key '{0}'")]
    DuplicateKey(String),

    /// A path segment could not be classified
    #[error("Unable to parse segment '{segment}' of key '{key}'")]
    InvalidSegment { key: String, segment: String },

    /// Operation or data type that is not supported
    #[error("Unimplemented: {0}")]
    Unimplemented(String),

    /// Datum type differs from what a parser node expects
    #[error("Type mismatch in {node}: expected {expected}, found {actual}")]
    TypeMismatch {
        node: String,
        expected: String,
        actual: String,
    },

    /// Record field lookup failed
    #[error("Field '{0}' not found in record")]
    MissingField(String),

    /// Map key lookup failed
    #[error("Key '{0}' not found in map")]
    MissingMapKey(String),

    /// Array index beyond the array length
    #[error("Index {index} is out of bounds for array of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    /// Element access failed after the bounds check passed
    #[error("Unable to access array element {index} of {len}")]
    ElementAccess { index: usize, len: usize },

    /// Buffered data cannot be placed into the requested shape
    #[error("Shape mismatch for '{key}': {message}")]
    ShapeMismatch { key: String, message: String },

    /// Generic invalid argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// End of input; not a failure
    #[error("Out of range: {0}")]
    OutOfRange(String),

    /// Broken internal invariant
    #[error("Internal error: {0}")]
    Internal(String),

    /// Decoding a serialized record failed
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Reading from a container file failed
    #[error("Reader error: {0}")]
    Reader(#[from] ReaderError),

    /// Schema error
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),
}

impl ParseError {
    /// Whether this is the end-of-input signal rather than a failure.
    pub fn is_out_of_range(&self) -> bool {
        matches!(self, ParseError::OutOfRange(_))
    }

    pub(crate) fn type_mismatch(
        node: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        ParseError::TypeMismatch {
            node: node.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub(crate) fn shape_mismatch(key: impl Into<String>, message: impl Into<String>) -> Self {
        ParseError::ShapeMismatch {
            key: key.into(),
            message: message.into(),
        }
    }
}
