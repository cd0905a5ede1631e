//! Avro file header parsing
//!
//! Parses the Avro Object Container File header which contains:
//! - Magic bytes ("Obj\x01")
//! - Metadata map (including schema and codec)
//! - 16-byte sync marker

use std::collections::HashMap;
use std::io::Read;

use crate::codec::Codec;
use crate::error::ReaderError;
use crate::schema::{parse_schema, AvroSchema};

/// The Avro magic bytes that identify an Object Container File.
pub const AVRO_MAGIC: [u8; 4] = [b'O', b'b', b'j', 0x01];

/// Size of the sync marker in bytes
pub const SYNC_MARKER_SIZE: usize = 16;

/// Parsed Avro file header containing schema and metadata.
#[derive(Debug, Clone)]
pub struct AvroHeader {
    /// Metadata key-value pairs from the header
    pub metadata: HashMap<String, Vec<u8>>,
    /// Sync marker repeated after every block
    pub sync_marker: [u8; SYNC_MARKER_SIZE],
    /// Writer schema from `avro.schema`
    pub schema: AvroSchema,
    /// Compression codec from `avro.codec` (null when absent)
    pub codec: Codec,
    /// Total size of the header in bytes (offset where blocks begin)
    pub header_size: u64,
}

impl AvroHeader {
    /// Read a header from the start of a stream.
    ///
    /// # Errors
    /// - `ReaderError::InvalidMagic` if magic bytes don't match
    /// - `ReaderError::Parse` if metadata or sync marker cannot be parsed
    /// - `ReaderError::Schema` if the schema JSON is invalid
    /// - `ReaderError::Codec` if the codec is unknown
    pub fn read<R: Read>(reader: &mut R) -> Result<Self, ReaderError> {
        let mut input = HeaderInput { reader, offset: 0 };

        let mut magic = [0u8; 4];
        input.fill(&mut magic, "magic")?;
        if magic != AVRO_MAGIC {
            return Err(ReaderError::InvalidMagic(magic));
        }

        let metadata = input.metadata()?;

        let mut sync_marker = [0u8; SYNC_MARKER_SIZE];
        input.fill(&mut sync_marker, "sync marker")?;

        let schema = Self::extract_schema(&metadata)?;
        let codec = Self::extract_codec(&metadata)?;

        Ok(Self {
            metadata,
            sync_marker,
            schema,
            codec,
            header_size: input.offset,
        })
    }

    /// Parse a header from the leading bytes of a file.
    pub fn parse(bytes: &[u8]) -> Result<Self, ReaderError> {
        let mut cursor = bytes;
        Self::read(&mut cursor)
    }

    fn extract_schema(metadata: &HashMap<String, Vec<u8>>) -> Result<AvroSchema, ReaderError> {
        let schema_bytes = metadata
            .get("avro.schema")
            .ok_or_else(|| ReaderError::Parse {
                offset: 0,
                message: "Missing 'avro.schema' in metadata".to_string(),
            })?;
        let schema_json = std::str::from_utf8(schema_bytes).map_err(|e| ReaderError::Parse {
            offset: 0,
            message: format!("Schema is not valid UTF-8: {}", e),
        })?;
        Ok(parse_schema(schema_json)?)
    }

    fn extract_codec(metadata: &HashMap<String, Vec<u8>>) -> Result<Codec, ReaderError> {
        match metadata.get("avro.codec") {
            Some(codec_bytes) => {
                let name = std::str::from_utf8(codec_bytes).map_err(|e| ReaderError::Parse {
                    offset: 0,
                    message: format!("Codec name is not valid UTF-8: {}", e),
                })?;
                Ok(Codec::from_name(name)?)
            }
            None => Ok(Codec::Null),
        }
    }

    /// Get a metadata value as a string.
    pub fn get_metadata_string(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .and_then(|v| std::str::from_utf8(v).ok())
    }
}

/// Byte-at-a-time header reader that tracks its offset for error reports.
struct HeaderInput<'a, R> {
    reader: &'a mut R,
    offset: u64,
}

impl<R: Read> HeaderInput<'_, R> {
    fn fill(&mut self, buf: &mut [u8], what: &str) -> Result<(), ReaderError> {
        self.reader
            .read_exact(buf)
            .map_err(|e| ReaderError::Parse {
                offset: self.offset,
                message: format!("Failed to read {}: {}", what, e),
            })?;
        self.offset += buf.len() as u64;
        Ok(())
    }

    fn long(&mut self, what: &str) -> Result<i64, ReaderError> {
        let mut result: u64 = 0;
        let mut shift = 0u32;
        loop {
            let mut byte = [0u8; 1];
            self.fill(&mut byte, what)?;
            result |= u64::from(byte[0] & 0x7F) << shift;
            if byte[0] & 0x80 == 0 {
                return Ok(((result >> 1) as i64) ^ -((result & 1) as i64));
            }
            shift += 7;
            if shift >= 64 {
                return Err(ReaderError::Parse {
                    offset: self.offset,
                    message: format!("Invalid varint in {}", what),
                });
            }
        }
    }

    fn bytes(&mut self, what: &str) -> Result<Vec<u8>, ReaderError> {
        let len = self.long(what)?;
        if len < 0 {
            return Err(ReaderError::Parse {
                offset: self.offset,
                message: format!("Negative length {} for {}", len, what),
            });
        }
        // Allocation tracks the bytes present, not the declared length
        let mut buf = Vec::new();
        let read = self
            .reader
            .by_ref()
            .take(len as u64)
            .read_to_end(&mut buf)
            .map_err(|e| ReaderError::Parse {
                offset: self.offset,
                message: format!("Failed to read {}: {}", what, e),
            })?;
        if read as u64 != len as u64 {
            return Err(ReaderError::Parse {
                offset: self.offset,
                message: format!("Truncated {}: expected {} bytes, found {}", what, len, read),
            });
        }
        self.offset += read as u64;
        Ok(buf)
    }

    fn metadata(&mut self) -> Result<HashMap<String, Vec<u8>>, ReaderError> {
        let mut metadata = HashMap::new();
        loop {
            let count = self.long("metadata block count")?;
            if count == 0 {
                break;
            }
            if count < 0 {
                // Negative count is followed by the block size in bytes
                self.long("metadata block size")?;
            }
            for _ in 0..count.unsigned_abs() {
                let key_offset = self.offset;
                let key = String::from_utf8(self.bytes("metadata key")?).map_err(|e| {
                    ReaderError::Parse {
                        offset: key_offset,
                        message: format!("Metadata key is not valid UTF-8: {}", e),
                    }
                })?;
                let value = self.bytes("metadata value")?;
                metadata.insert(key, value);
            }
        }
        Ok(metadata)
    }
}
