//! Varint and zigzag coding.
//!
//! Avro stores `int` and `long` as zigzag-mapped little-endian base-128
//! varints: each byte carries 7 data bits, and the high bit marks that more
//! bytes follow. Zigzag maps 0, -1, 1, -2, ... onto 0, 1, 2, 3, ...

use crate::error::DecodeError;

// ============================================================================
// Decoding
// ============================================================================

/// Decode an unsigned varint, advancing the cursor past it.
///
/// # Errors
/// - `DecodeError::UnexpectedEof` if the input is truncated
/// - `DecodeError::InvalidVarint` if the varint runs past 10 bytes
#[inline]
pub fn decode_varint(data: &mut &[u8]) -> Result<u64, DecodeError> {
    let mut offset = 0;
    decode_varint_with_offset(data, &mut offset)
}

/// Decode an unsigned varint while tracking a byte offset for error reports.
#[inline]
pub fn decode_varint_with_offset(cursor: &mut &[u8], offset: &mut u64) -> Result<u64, DecodeError> {
    let mut result: u64 = 0;
    let mut shift: u32 = 0;

    loop {
        let (&byte, rest) = cursor.split_first().ok_or(DecodeError::UnexpectedEof)?;
        *cursor = rest;
        *offset += 1;

        result |= ((byte & 0x7F) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }

        shift += 7;
        if shift >= 64 {
            return Err(DecodeError::InvalidVarint);
        }
    }
}

/// Decode a zigzag-encoded signed varint.
#[inline]
pub fn decode_zigzag(data: &mut &[u8]) -> Result<i64, DecodeError> {
    let n = decode_varint(data)?;
    Ok(unzigzag(n))
}

/// Decode a zigzag-encoded signed varint while tracking a byte offset.
#[inline]
pub fn decode_zigzag_with_offset(cursor: &mut &[u8], offset: &mut u64) -> Result<i64, DecodeError> {
    let n = decode_varint_with_offset(cursor, offset)?;
    Ok(unzigzag(n))
}

#[inline]
fn unzigzag(n: u64) -> i64 {
    ((n >> 1) as i64) ^ -((n & 1) as i64)
}

// ============================================================================
// Encoding
// ============================================================================

/// Append an unsigned varint to `out`.
#[inline]
pub fn encode_varint_into(mut value: u64, out: &mut Vec<u8>) {
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Append a zigzag-encoded signed varint to `out`.
#[inline]
pub fn encode_zigzag_into(value: i64, out: &mut Vec<u8>) {
    encode_varint_into(((value << 1) ^ (value >> 63)) as u64, out);
}

/// Encode a zigzag signed varint into a new buffer.
pub fn encode_zigzag(value: i64) -> Vec<u8> {
    let mut out = Vec::with_capacity(10);
    encode_zigzag_into(value, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zigzag_known_values() {
        // Values from the Avro specification
        assert_eq!(encode_zigzag(0), vec![0x00]);
        assert_eq!(encode_zigzag(-1), vec![0x01]);
        assert_eq!(encode_zigzag(1), vec![0x02]);
        assert_eq!(encode_zigzag(-64), vec![0x7F]);
        assert_eq!(encode_zigzag(64), vec![0x80, 0x01]);
    }

    #[test]
    fn test_zigzag_extremes() {
        for value in [i64::MIN, i64::MAX, i32::MIN as i64, i32::MAX as i64] {
            let bytes = encode_zigzag(value);
            let mut cursor = bytes.as_slice();
            assert_eq!(decode_zigzag(&mut cursor).unwrap(), value);
            assert!(cursor.is_empty());
        }
    }

    #[test]
    fn test_truncated_varint() {
        let mut cursor: &[u8] = &[0x80, 0x80];
        assert!(matches!(
            decode_varint(&mut cursor),
            Err(DecodeError::UnexpectedEof)
        ));
    }

    #[test]
    fn test_overlong_varint() {
        let bytes = [0xFFu8; 11];
        let mut cursor: &[u8] = &bytes;
        assert!(matches!(
            decode_varint(&mut cursor),
            Err(DecodeError::InvalidVarint)
        ));
    }

    #[test]
    fn test_offset_tracking() {
        let mut bytes = Vec::new();
        encode_varint_into(300, &mut bytes);
        encode_zigzag_into(-3, &mut bytes);
        let mut cursor = bytes.as_slice();
        let mut offset = 10;
        assert_eq!(decode_varint_with_offset(&mut cursor, &mut offset).unwrap(), 300);
        assert_eq!(offset, 12);
        assert_eq!(decode_zigzag_with_offset(&mut cursor, &mut offset).unwrap(), -3);
        assert_eq!(offset, 13);
    }
}
