//! Pull-based record sources.
//!
//! The parser tree consumes records through [`RecordSource`], a "read one
//! record" operation that yields a decoded [`AvroValue`] or `None` at end of
//! input. Sources exist for in-memory values, serialized datums, callbacks and
//! sequences of container files.

use std::fs::File;
use std::path::PathBuf;

use bytes::Bytes;
use tracing::{debug, info};

use crate::error::{ParseError, ReaderError};
use crate::reader::container::ContainerReader;
use crate::reader::decode::{AvroValue, DatumReader};
use crate::schema::AvroSchema;

/// A source of decoded records.
pub trait RecordSource {
    /// Read the next record; `Ok(None)` signals end of input.
    fn read_record(&mut self) -> Result<Option<AvroValue>, ParseError>;
}

impl<S: RecordSource + ?Sized> RecordSource for &mut S {
    fn read_record(&mut self) -> Result<Option<AvroValue>, ParseError> {
        (**self).read_record()
    }
}

impl<S: RecordSource + ?Sized> RecordSource for Box<S> {
    fn read_record(&mut self) -> Result<Option<AvroValue>, ParseError> {
        (**self).read_record()
    }
}

// ============================================================================
// In-memory sources
// ============================================================================

/// Yields clones of already-decoded values.
#[derive(Debug, Clone)]
pub struct VecRecordSource<'a> {
    records: &'a [AvroValue],
    pos: usize,
}

impl<'a> VecRecordSource<'a> {
    pub fn new(records: &'a [AvroValue]) -> Self {
        Self { records, pos: 0 }
    }
}

impl RecordSource for VecRecordSource<'_> {
    fn read_record(&mut self) -> Result<Option<AvroValue>, ParseError> {
        let record = self.records.get(self.pos).cloned();
        if record.is_some() {
            self.pos += 1;
        }
        Ok(record)
    }
}

/// Decodes binary datums one at a time.
///
/// Decode failures surface as `ParseError::Decode` at the read that hit them.
#[derive(Debug, Clone)]
pub struct SerializedRecordSource<'a> {
    records: &'a [Bytes],
    reader: &'a DatumReader,
    pos: usize,
}

impl<'a> SerializedRecordSource<'a> {
    pub fn new(records: &'a [Bytes], reader: &'a DatumReader) -> Self {
        Self {
            records,
            reader,
            pos: 0,
        }
    }
}

impl RecordSource for SerializedRecordSource<'_> {
    fn read_record(&mut self) -> Result<Option<AvroValue>, ParseError> {
        let Some(bytes) = self.records.get(self.pos) else {
            return Ok(None);
        };
        self.pos += 1;
        let mut cursor = bytes.as_ref();
        Ok(Some(self.reader.read(&mut cursor)?))
    }
}

/// Source backed by a callback, created with [`from_fn`].
pub struct FnRecordSource<F>(F);

/// Wrap a callback as a record source.
///
/// ```
/// use avro_tensor::reader::{from_fn, AvroValue, RecordSource};
///
/// let mut n = 0;
/// let mut source = from_fn(move || {
///     n += 1;
///     Ok((n <= 2).then_some(AvroValue::Int(n)))
/// });
/// assert_eq!(source.read_record().unwrap(), Some(AvroValue::Int(1)));
/// ```
pub fn from_fn<F>(f: F) -> FnRecordSource<F>
where
    F: FnMut() -> Result<Option<AvroValue>, ParseError>,
{
    FnRecordSource(f)
}

impl<F> RecordSource for FnRecordSource<F>
where
    F: FnMut() -> Result<Option<AvroValue>, ParseError>,
{
    fn read_record(&mut self) -> Result<Option<AvroValue>, ParseError> {
        (self.0)()
    }
}

// ============================================================================
// Sequential multi-file reader
// ============================================================================

/// Resumable position of an [`AvroRecordReader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderCheckpoint {
    /// Index into the reader's file list
    pub file_index: usize,
    /// Offset of the block holding the next record; 0 when the file has not
    /// been opened yet
    pub block_offset: u64,
    /// Records of that block already consumed
    pub records_into_block: u64,
}

/// Reads the records of several container files one file after another.
///
/// End of one file advances to the next; end of the last file is end of
/// input. Not meant for concurrent use; all reads take `&mut self`.
#[derive(Debug)]
pub struct AvroRecordReader {
    files: Vec<PathBuf>,
    reader_schema: Option<AvroSchema>,
    current: Option<ContainerReader<File>>,
    file_index: usize,
}

impl AvroRecordReader {
    pub fn new(files: Vec<PathBuf>) -> Self {
        Self {
            files,
            reader_schema: None,
            current: None,
            file_index: 0,
        }
    }

    /// Resolve every file's records into `schema`.
    pub fn with_reader_schema(mut self, schema: AvroSchema) -> Self {
        self.reader_schema = Some(schema);
        self
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Read the next record across all files.
    pub fn next_record(&mut self) -> Result<Option<AvroValue>, ReaderError> {
        loop {
            if self.current.is_none() {
                if self.file_index >= self.files.len() {
                    return Ok(None);
                }
                self.current = Some(self.open(self.file_index)?);
            }
            let Some(current) = self.current.as_mut() else {
                continue;
            };
            if let Some(record) = current.next_record()? {
                return Ok(Some(record));
            }
            self.current = None;
            self.file_index += 1;
            if let Some(next) = self.files.get(self.file_index) {
                info!(file_index = self.file_index, path = %next.display(), "Advancing to next file");
            }
        }
    }

    /// Capture the position of the next record.
    pub fn checkpoint(&self) -> ReaderCheckpoint {
        let (block_offset, records_into_block) = self
            .current
            .as_ref()
            .map(|c| c.position())
            .unwrap_or((0, 0));
        ReaderCheckpoint {
            file_index: self.file_index,
            block_offset,
            records_into_block,
        }
    }

    /// Resume reading at a previously captured checkpoint.
    pub fn restore(&mut self, checkpoint: ReaderCheckpoint) -> Result<(), ReaderError> {
        if checkpoint.file_index > self.files.len() {
            return Err(ReaderError::InvalidCheckpoint(format!(
                "file index {} beyond {} files",
                checkpoint.file_index,
                self.files.len()
            )));
        }
        self.current = None;
        self.file_index = checkpoint.file_index;
        if checkpoint.file_index == self.files.len() || checkpoint.block_offset == 0 {
            return Ok(());
        }

        let mut reader = self.open(checkpoint.file_index)?;
        reader.seek_to_block(checkpoint.block_offset, checkpoint.records_into_block)?;
        debug!(
            file_index = checkpoint.file_index,
            block_offset = checkpoint.block_offset,
            records_into_block = checkpoint.records_into_block,
            "Restored reader checkpoint"
        );
        self.current = Some(reader);
        Ok(())
    }

    fn open(&self, index: usize) -> Result<ContainerReader<File>, ReaderError> {
        let path = &self.files[index];
        let file = File::open(path)?;
        debug!(path = %path.display(), "Opening Avro file");
        match &self.reader_schema {
            Some(schema) => ContainerReader::with_reader_schema(file, schema.clone()),
            None => ContainerReader::new(file),
        }
    }
}

impl RecordSource for AvroRecordReader {
    fn read_record(&mut self) -> Result<Option<AvroValue>, ParseError> {
        Ok(self.next_record()?)
    }
}
