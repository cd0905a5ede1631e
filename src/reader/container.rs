//! Block-by-block reading of Avro object container files.
//!
//! After the header, a container file is a sequence of blocks:
//! - record count (long)
//! - compressed size in bytes (long)
//! - compressed records
//! - the 16-byte sync marker from the header
//!
//! [`ContainerReader`] keeps one compressed and one decompressed scratch
//! buffer per reader and decodes records out of the current block on demand.
//! It is a single-consumer reader: every read takes `&mut self`.

use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom};

use tracing::{debug, warn};

use crate::error::ReaderError;
use crate::reader::decode::{AvroValue, DatumReader};
use crate::reader::header::{AvroHeader, SYNC_MARKER_SIZE};
use crate::schema::AvroSchema;

/// Reader over the records of one container file.
#[derive(Debug)]
pub struct ContainerReader<R: Read + Seek> {
    input: BufReader<R>,
    header: AvroHeader,
    datum_reader: DatumReader,
    /// Scratch for the compressed bytes of the current block
    compressed: Vec<u8>,
    /// Scratch for the decompressed bytes of the current block
    block: Vec<u8>,
    block_pos: usize,
    block_remaining: u64,
    /// Index of the block currently being consumed
    block_index: usize,
    /// Blocks loaded so far
    blocks_loaded: usize,
    records_into_block: u64,
    /// File offset of the block currently being consumed
    block_offset: u64,
    /// File offset of the next unread byte
    offset: u64,
    finished: bool,
}

impl<R: Read + Seek> ContainerReader<R> {
    /// Open a container, decoding records with the writer schema.
    pub fn new(reader: R) -> Result<Self, ReaderError> {
        Self::open(reader, None)
    }

    /// Open a container, resolving records into `reader_schema`.
    pub fn with_reader_schema(reader: R, reader_schema: AvroSchema) -> Result<Self, ReaderError> {
        Self::open(reader, Some(reader_schema))
    }

    fn open(reader: R, reader_schema: Option<AvroSchema>) -> Result<Self, ReaderError> {
        let mut input = BufReader::new(reader);
        let header = AvroHeader::read(&mut input)?;
        let datum_reader = match reader_schema {
            Some(schema) => DatumReader::with_writer_schema(header.schema.clone(), schema)?,
            None => DatumReader::new(header.schema.clone()),
        };
        debug!(
            codec = %header.codec,
            header_size = header.header_size,
            "Opened Avro container"
        );
        let offset = header.header_size;
        Ok(Self {
            input,
            header,
            datum_reader,
            compressed: Vec::new(),
            block: Vec::new(),
            block_pos: 0,
            block_remaining: 0,
            block_index: 0,
            blocks_loaded: 0,
            records_into_block: 0,
            block_offset: offset,
            offset,
            finished: false,
        })
    }

    pub fn header(&self) -> &AvroHeader {
        &self.header
    }

    /// Schema records are produced in.
    pub fn schema(&self) -> &AvroSchema {
        self.datum_reader.schema()
    }

    /// Position of the next record as `(block offset, records into block)`.
    pub fn position(&self) -> (u64, u64) {
        if self.block_remaining == 0 {
            (self.offset, 0)
        } else {
            (self.block_offset, self.records_into_block)
        }
    }

    /// Decode the next record, or `None` at end of file.
    pub fn next_record(&mut self) -> Result<Option<AvroValue>, ReaderError> {
        while self.block_remaining == 0 {
            if self.finished || !self.load_next_block()? {
                return Ok(None);
            }
        }

        let mut cursor = &self.block[self.block_pos..];
        let before = cursor.len();
        let value = self
            .datum_reader
            .read(&mut cursor)
            .map_err(|source| ReaderError::Decode {
                block_index: self.block_index,
                record_index: self.records_into_block as usize,
                source,
            })?;
        self.block_pos += before - cursor.len();
        self.block_remaining -= 1;
        self.records_into_block += 1;
        Ok(Some(value))
    }

    /// Reposition at the block starting at `block_offset` and skip
    /// `records_into_block` records inside it.
    pub fn seek_to_block(
        &mut self,
        block_offset: u64,
        records_into_block: u64,
    ) -> Result<(), ReaderError> {
        if block_offset < self.header.header_size {
            return Err(ReaderError::InvalidCheckpoint(format!(
                "block offset {} lies inside the {} byte header",
                block_offset, self.header.header_size
            )));
        }
        self.input.seek(SeekFrom::Start(block_offset))?;
        self.offset = block_offset;
        self.block_offset = block_offset;
        self.block_remaining = 0;
        self.records_into_block = 0;
        self.finished = false;

        for skipped in 0..records_into_block {
            if self.next_record()?.is_none() {
                return Err(ReaderError::InvalidCheckpoint(format!(
                    "block at offset {} ended after {} of {} records",
                    block_offset, skipped, records_into_block
                )));
            }
        }
        Ok(())
    }

    /// Read, validate and decompress the next block into the scratch buffer.
    ///
    /// Returns `false` at a clean end of file.
    fn load_next_block(&mut self) -> Result<bool, ReaderError> {
        let start = self.offset;
        let Some(record_count) = self.read_long(true)? else {
            self.finished = true;
            return Ok(false);
        };
        let compressed_size = self.read_long(false)?.unwrap_or_default();
        if record_count < 0 || compressed_size < 0 {
            return Err(ReaderError::Parse {
                offset: start,
                message: format!(
                    "Invalid block header: {} records, {} bytes",
                    record_count, compressed_size
                ),
            });
        }

        self.read_block_data(start, compressed_size as u64)?;

        let mut sync = [0u8; SYNC_MARKER_SIZE];
        self.input
            .read_exact(&mut sync)
            .map_err(|e| ReaderError::Parse {
                offset: self.offset,
                message: format!("Failed to read sync marker: {}", e),
            })?;
        self.offset += SYNC_MARKER_SIZE as u64;
        if sync != self.header.sync_marker {
            warn!(
                block_index = self.blocks_loaded,
                offset = self.offset - SYNC_MARKER_SIZE as u64,
                "Sync marker mismatch"
            );
            return Err(ReaderError::InvalidSyncMarker {
                block_index: self.blocks_loaded,
                offset: self.offset - SYNC_MARKER_SIZE as u64,
            });
        }

        self.header
            .codec
            .decompress_into(&self.compressed, &mut self.block)?;

        self.block_index = self.blocks_loaded;
        self.blocks_loaded += 1;
        self.block_offset = start;
        self.block_pos = 0;
        self.block_remaining = record_count as u64;
        self.records_into_block = 0;
        Ok(true)
    }

    /// Read `size` bytes of block data into the scratch buffer, growing it
    /// only as far as the input actually reaches.
    fn read_block_data(&mut self, block_start: u64, size: u64) -> Result<(), ReaderError> {
        self.compressed.clear();
        let read = self
            .input
            .by_ref()
            .take(size)
            .read_to_end(&mut self.compressed)
            .map_err(|e| ReaderError::Parse {
                offset: block_start,
                message: format!("Failed to read block data: {}", e),
            })?;
        if read as u64 != size {
            return Err(ReaderError::Parse {
                offset: block_start,
                message: format!("Truncated block data: expected {} bytes, found {}", size, read),
            });
        }
        self.offset += size;
        Ok(())
    }

    /// Read a zigzag long; with `eof_ok`, a clean EOF before the first byte
    /// yields `None`.
    fn read_long(&mut self, eof_ok: bool) -> Result<Option<i64>, ReaderError> {
        let mut result: u64 = 0;
        let mut shift = 0u32;
        let mut first = true;
        loop {
            let mut byte = [0u8; 1];
            match self.input.read_exact(&mut byte) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::UnexpectedEof && first && eof_ok => {
                    return Ok(None)
                }
                Err(e) => {
                    return Err(ReaderError::Parse {
                        offset: self.offset,
                        message: format!("Failed to read block header: {}", e),
                    })
                }
            }
            first = false;
            self.offset += 1;
            result |= u64::from(byte[0] & 0x7F) << shift;
            if byte[0] & 0x80 == 0 {
                return Ok(Some(((result >> 1) as i64) ^ -((result & 1) as i64)));
            }
            shift += 7;
            if shift >= 64 {
                return Err(ReaderError::Parse {
                    offset: self.offset,
                    message: "Invalid varint in block header".to_string(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::encode::encode_value;
    use crate::reader::header::AVRO_MAGIC;
    use crate::reader::varint::encode_zigzag_into;
    use std::io::Cursor;

    const SYNC: [u8; 16] = [0xAB; 16];

    fn container(blocks: &[Vec<i64>]) -> Vec<u8> {
        let mut out = AVRO_MAGIC.to_vec();
        let schema = br#""long""#;
        encode_zigzag_into(1, &mut out);
        encode_zigzag_into(11, &mut out);
        out.extend_from_slice(b"avro.schema");
        encode_zigzag_into(schema.len() as i64, &mut out);
        out.extend_from_slice(schema);
        out.push(0);
        out.extend_from_slice(&SYNC);
        for block in blocks {
            let mut data = Vec::new();
            for v in block {
                encode_value(&AvroValue::Long(*v), &AvroSchema::Long, &mut data).unwrap();
            }
            encode_zigzag_into(block.len() as i64, &mut out);
            encode_zigzag_into(data.len() as i64, &mut out);
            out.extend_from_slice(&data);
            out.extend_from_slice(&SYNC);
        }
        out
    }

    fn drain<R: Read + Seek>(reader: &mut ContainerReader<R>) -> Vec<i64> {
        let mut out = Vec::new();
        while let Some(value) = reader.next_record().unwrap() {
            match value {
                AvroValue::Long(v) => out.push(v),
                other => panic!("unexpected value {:?}", other),
            }
        }
        out
    }

    #[test]
    fn test_reads_all_blocks() {
        let bytes = container(&[vec![1, 2], vec![], vec![3]]);
        let mut reader = ContainerReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(drain(&mut reader), vec![1, 2, 3]);
        assert!(reader.next_record().unwrap().is_none());
    }

    #[test]
    fn test_position_and_seek() {
        let bytes = container(&[vec![1, 2, 3], vec![4, 5]]);
        let mut reader = ContainerReader::new(Cursor::new(bytes.clone())).unwrap();
        reader.next_record().unwrap();
        reader.next_record().unwrap();
        let (offset, skip) = reader.position();
        assert_eq!(offset, reader.header().header_size);
        assert_eq!(skip, 2);

        let mut resumed = ContainerReader::new(Cursor::new(bytes)).unwrap();
        resumed.seek_to_block(offset, skip).unwrap();
        assert_eq!(drain(&mut resumed), vec![3, 4, 5]);
    }

    #[test]
    fn test_sync_marker_mismatch() {
        let mut bytes = container(&[vec![1]]);
        let last = bytes.len() - 1;
        bytes[last] = 0;
        let mut reader = ContainerReader::new(Cursor::new(bytes)).unwrap();
        assert!(matches!(
            reader.next_record(),
            Err(ReaderError::InvalidSyncMarker { block_index: 0, .. })
        ));
    }

    #[test]
    fn test_truncated_block() {
        let bytes = container(&[vec![1, 2]]);
        let mut reader = ContainerReader::new(Cursor::new(bytes[..bytes.len() - 10].to_vec())).unwrap();
        assert!(matches!(
            reader.next_record(),
            Err(ReaderError::Parse { .. })
        ));
    }

    #[test]
    fn test_oversized_block_size() {
        let mut bytes = container(&[]);
        encode_zigzag_into(1, &mut bytes);
        encode_zigzag_into(1 << 50, &mut bytes);
        bytes.extend_from_slice(&[2, 4, 6]);
        let mut reader = ContainerReader::new(Cursor::new(bytes)).unwrap();
        let err = reader.next_record().unwrap_err();
        assert!(err.to_string().contains("Truncated block data"), "{err}");
    }

    #[test]
    fn test_seek_inside_header_rejected() {
        let bytes = container(&[vec![1]]);
        let mut reader = ContainerReader::new(Cursor::new(bytes)).unwrap();
        assert!(matches!(
            reader.seek_to_block(2, 0),
            Err(ReaderError::InvalidCheckpoint(_))
        ));
    }
}
