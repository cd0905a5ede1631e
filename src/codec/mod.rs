//! Block compression codecs for Avro object container files
//!
//! Every codec except `null` sits behind a cargo feature of the same name.
//! Decompression writes into a caller-owned buffer so that a reader can reuse
//! one scratch allocation for every block it decodes.

use crate::error::CodecError;

#[cfg(any(feature = "deflate", feature = "zstd", feature = "bzip2", feature = "xz"))]
use std::io::Read;

/// Compression codec named by the `avro.codec` header entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Codec {
    /// Blocks are stored as-is
    #[default]
    Null,
    /// Snappy with a trailing big-endian CRC32 of the uncompressed data
    Snappy,
    /// Raw DEFLATE (RFC 1951), no zlib framing
    Deflate,
    /// Zstandard
    Zstd,
    /// Bzip2
    Bzip2,
    /// XZ/LZMA
    Xz,
}

impl Codec {
    /// Look a codec up by its metadata name.
    ///
    /// ```
    /// use avro_tensor::codec::Codec;
    ///
    /// assert_eq!(Codec::from_name("deflate").unwrap(), Codec::Deflate);
    /// assert!(Codec::from_name("lz4").is_err());
    /// ```
    pub fn from_name(name: &str) -> Result<Self, CodecError> {
        match name {
            "null" => Ok(Codec::Null),
            "snappy" => Ok(Codec::Snappy),
            "deflate" => Ok(Codec::Deflate),
            "zstd" | "zstandard" => Ok(Codec::Zstd),
            "bzip2" => Ok(Codec::Bzip2),
            "xz" => Ok(Codec::Xz),
            other => Err(CodecError::UnsupportedCodec(format!(
                "Unknown codec '{}'. Supported codecs: null, snappy, deflate, zstd, bzip2, xz",
                other
            ))),
        }
    }

    /// Canonical metadata name.
    pub fn name(&self) -> &'static str {
        match self {
            Codec::Null => "null",
            Codec::Snappy => "snappy",
            Codec::Deflate => "deflate",
            Codec::Zstd => "zstd",
            Codec::Bzip2 => "bzip2",
            Codec::Xz => "xz",
        }
    }

    /// Decompress `data`, replacing the contents of `out`.
    pub fn decompress_into(&self, data: &[u8], out: &mut Vec<u8>) -> Result<(), CodecError> {
        out.clear();
        if data.is_empty() && *self != Codec::Snappy {
            return Ok(());
        }
        match self {
            Codec::Null => {
                out.extend_from_slice(data);
                Ok(())
            }
            Codec::Snappy => snappy_into(data, out),
            Codec::Deflate => deflate_into(data, out),
            Codec::Zstd => zstd_into(data, out),
            Codec::Bzip2 => bzip2_into(data, out),
            Codec::Xz => xz_into(data, out),
        }
    }

    /// Decompress `data` into a new buffer.
    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        self.decompress_into(data, &mut out)?;
        Ok(out)
    }
}

impl std::fmt::Display for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[allow(dead_code)]
fn disabled(codec: Codec) -> CodecError {
    CodecError::UnsupportedCodec(format!(
        "{} codec not enabled. Enable the '{}' feature.",
        codec.name(),
        codec.name()
    ))
}

#[cfg(feature = "snappy")]
fn snappy_into(data: &[u8], out: &mut Vec<u8>) -> Result<(), CodecError> {
    const CRC_SIZE: usize = 4;

    if data.len() < CRC_SIZE {
        return Err(CodecError::DecompressionError(
            "Snappy data too short: missing CRC checksum".to_string(),
        ));
    }
    let (compressed, crc_bytes) = data.split_at(data.len() - CRC_SIZE);
    let expected = u32::from_be_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);

    if !compressed.is_empty() {
        let len = snap::raw::decompress_len(compressed).map_err(|e| {
            CodecError::DecompressionError(format!("Snappy decompression failed: {}", e))
        })?;
        out.resize(len, 0);
        snap::raw::Decoder::new()
            .decompress(compressed, out)
            .map_err(|e| {
                CodecError::DecompressionError(format!("Snappy decompression failed: {}", e))
            })?;
    }

    // ISO polynomial, not Castagnoli
    let actual = crc32fast::hash(out);
    if actual != expected {
        return Err(CodecError::DecompressionError(format!(
            "Snappy CRC32 checksum mismatch: expected 0x{:08X}, got 0x{:08X}",
            expected, actual
        )));
    }
    Ok(())
}

#[cfg(not(feature = "snappy"))]
fn snappy_into(_data: &[u8], _out: &mut Vec<u8>) -> Result<(), CodecError> {
    Err(disabled(Codec::Snappy))
}

#[cfg(feature = "deflate")]
fn deflate_into(data: &[u8], out: &mut Vec<u8>) -> Result<(), CodecError> {
    flate2::read::DeflateDecoder::new(data)
        .read_to_end(out)
        .map(|_| ())
        .map_err(|e| CodecError::DecompressionError(format!("Deflate decompression failed: {}", e)))
}

#[cfg(not(feature = "deflate"))]
fn deflate_into(_data: &[u8], _out: &mut Vec<u8>) -> Result<(), CodecError> {
    Err(disabled(Codec::Deflate))
}

#[cfg(feature = "zstd")]
fn zstd_into(data: &[u8], out: &mut Vec<u8>) -> Result<(), CodecError> {
    let mut decoder = zstd::Decoder::new(data).map_err(|e| {
        CodecError::DecompressionError(format!("Zstd decoder initialization failed: {}", e))
    })?;
    decoder
        .read_to_end(out)
        .map(|_| ())
        .map_err(|e| CodecError::DecompressionError(format!("Zstd decompression failed: {}", e)))
}

#[cfg(not(feature = "zstd"))]
fn zstd_into(_data: &[u8], _out: &mut Vec<u8>) -> Result<(), CodecError> {
    Err(disabled(Codec::Zstd))
}

#[cfg(feature = "bzip2")]
fn bzip2_into(data: &[u8], out: &mut Vec<u8>) -> Result<(), CodecError> {
    bzip2::read::BzDecoder::new(data)
        .read_to_end(out)
        .map(|_| ())
        .map_err(|e| CodecError::DecompressionError(format!("Bzip2 decompression failed: {}", e)))
}

#[cfg(not(feature = "bzip2"))]
fn bzip2_into(_data: &[u8], _out: &mut Vec<u8>) -> Result<(), CodecError> {
    Err(disabled(Codec::Bzip2))
}

#[cfg(feature = "xz")]
fn xz_into(data: &[u8], out: &mut Vec<u8>) -> Result<(), CodecError> {
    xz2::read::XzDecoder::new(data)
        .read_to_end(out)
        .map(|_| ())
        .map_err(|e| CodecError::DecompressionError(format!("Xz decompression failed: {}", e)))
}

#[cfg(not(feature = "xz"))]
fn xz_into(_data: &[u8], _out: &mut Vec<u8>) -> Result<(), CodecError> {
    Err(disabled(Codec::Xz))
}
