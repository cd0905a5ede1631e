//! Batches of tensors read from container files.

use std::path::PathBuf;

use tracing::debug;

use crate::batch::config::{AvroParseConfig, BatchReaderConfig};
use crate::batch::driver::{BatchParser, ParsedBatch};
use crate::error::ParseError;
use crate::reader::AvroRecordReader;
use crate::schema::AvroSchema;

/// Reads `batch_size` records at a time from a list of container files and
/// parses each group into a [`ParsedBatch`].
///
/// # Example
///
/// ```no_run
/// use avro_tensor::batch::{AvroBatchReader, AvroParseConfig, BatchReaderConfig, DenseFeature};
/// use avro_tensor::tensor::DataType;
///
/// let parse = AvroParseConfig::new().with_dense(DenseFeature::new("id", DataType::Int64));
/// let reader = AvroBatchReader::new(
///     vec!["data.avro".into()],
///     parse,
///     BatchReaderConfig::new().with_batch_size(256),
/// )?;
/// for batch in reader {
///     let batch = batch?;
///     println!("{} records", batch.batch_size);
/// }
/// # Ok::<(), avro_tensor::error::ParseError>(())
/// ```
#[derive(Debug)]
pub struct AvroBatchReader {
    reader: AvroRecordReader,
    parser: BatchParser,
    config: BatchReaderConfig,
    finished: bool,
    batches_read: usize,
}

impl AvroBatchReader {
    pub fn new(
        files: Vec<PathBuf>,
        parse_config: AvroParseConfig,
        config: BatchReaderConfig,
    ) -> Result<Self, ParseError> {
        if config.batch_size == 0 {
            return Err(ParseError::InvalidArgument(
                "batch_size must be at least 1".to_string(),
            ));
        }
        let parser = BatchParser::new(parse_config, config.shard.clone())?;
        Ok(Self {
            reader: AvroRecordReader::new(files),
            parser,
            config,
            finished: false,
            batches_read: 0,
        })
    }

    /// Resolve every file's records into `schema` before parsing.
    pub fn with_reader_schema(mut self, schema: AvroSchema) -> Self {
        self.reader = self.reader.with_reader_schema(schema);
        self
    }

    pub fn parser(&self) -> &BatchParser {
        &self.parser
    }

    /// Parse the next batch, or `None` once the files are exhausted.
    ///
    /// With `drop_remainder` a final batch smaller than `batch_size` is
    /// discarded.
    pub fn next_batch(&mut self) -> Result<Option<ParsedBatch>, ParseError> {
        if self.finished {
            return Ok(None);
        }
        let mut records = Vec::with_capacity(self.config.batch_size);
        while records.len() < self.config.batch_size {
            match self.reader.next_record()? {
                Some(record) => records.push(record),
                None => {
                    self.finished = true;
                    break;
                }
            }
        }

        if records.is_empty() {
            return Ok(None);
        }
        if records.len() < self.config.batch_size && self.config.drop_remainder {
            debug!(records = records.len(), "Dropping final partial batch");
            return Ok(None);
        }

        let batch = self.parser.parse_records(&records)?;
        self.batches_read += 1;
        debug!(
            batch_index = self.batches_read - 1,
            records = batch.batch_size,
            "Read batch"
        );
        Ok(Some(batch))
    }

    /// Iterator state cannot be saved for batch readers.
    pub fn save_checkpoint(&self) -> Result<Vec<u8>, ParseError> {
        Err(ParseError::Unimplemented(
            "saving AvroBatchReader state".to_string(),
        ))
    }

    pub fn restore_checkpoint(&mut self, _state: &[u8]) -> Result<(), ParseError> {
        Err(ParseError::Unimplemented(
            "restoring AvroBatchReader state".to_string(),
        ))
    }
}

impl Iterator for AvroBatchReader {
    type Item = Result<ParsedBatch, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_batch() {
            Ok(batch) => batch.map(Ok),
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}
