//! Fixed-width field encoding/decoding
//!
//! The native client writes packed C structs, so strings travel as
//! fixed-width, null-terminated, zero-padded byte fields and all integers and
//! floats are little-endian. This module is pure: no I/O, no shared state.

use bytes::{Buf, BufMut};

use crate::error::ProtocolError;

/// Width of the source-file path field (MAX_PATH on the client)
pub const PATH_FIELD: usize = 260;

/// Width of the allocating-function name field
pub const FUNCTION_FIELD: usize = 64;

/// Width of the resolved symbol name field in query responses
pub const SYMBOL_FIELD: usize = 256;

/// Number of stack slots in every AddAllocation payload
pub const MAX_STACK_FRAMES: usize = 32;

/// Fail with a truncation error unless `buf` has at least `needed` bytes left
pub fn ensure_remaining(buf: &impl Buf, needed: usize) -> Result<(), ProtocolError> {
    if buf.remaining() < needed {
        return Err(ProtocolError::Truncated {
            needed,
            available: buf.remaining(),
        });
    }
    Ok(())
}

/// Read a fixed-width null-terminated string field
///
/// Consumes exactly `field_size` bytes and decodes everything before the
/// first null as UTF-8. A field with no null terminator is a protocol
/// violation: the sender must always terminate within the declared width.
pub fn get_fixed_str(buf: &mut impl Buf, field_size: usize) -> Result<String, ProtocolError> {
    ensure_remaining(&*buf, field_size)?;

    let mut bytes = vec![0u8; field_size];
    buf.copy_to_slice(&mut bytes);

    let end = bytes
        .iter()
        .position(|&b| b == 0)
        .ok_or(ProtocolError::MissingTerminator { field_size })?;
    bytes.truncate(end);

    Ok(String::from_utf8(bytes)?)
}

/// Write a string as a fixed-width null-terminated field
///
/// The UTF-8 encoding plus one terminator byte must fit in `field_size`;
/// otherwise nothing is written. The remainder of the field is zero-padded.
pub fn put_fixed_str(
    buf: &mut impl BufMut,
    value: &str,
    field_size: usize,
) -> Result<(), ProtocolError> {
    let bytes = value.as_bytes();
    if bytes.len() + 1 > field_size {
        return Err(ProtocolError::FieldTooSmall {
            len: bytes.len(),
            field_size,
        });
    }

    buf.put_slice(bytes);
    buf.put_bytes(0, field_size - bytes.len());
    Ok(())
}

/// Render a byte slice as lowercase hex, for desync diagnostics
pub fn to_hex(data: &[u8]) -> String {
    use std::fmt::Write;

    let mut out = String::with_capacity(data.len() * 2);
    for b in data {
        let _ = write!(out, "{:02x}", b);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{Bytes, BytesMut};

    #[test]
    fn test_fixed_str_roundtrip() {
        let mut buf = BytesMut::new();
        put_fixed_str(&mut buf, "test.cpp", 16).unwrap();
        assert_eq!(buf.len(), 16);
        assert_eq!(&buf[8..], &[0u8; 8][..]);

        let mut bytes = buf.freeze();
        let decoded = get_fixed_str(&mut bytes, 16).unwrap();
        assert_eq!(decoded, "test.cpp");
        assert_eq!(bytes.remaining(), 0);
    }

    #[test]
    fn test_fixed_str_exact_fit() {
        // 15 bytes of text + terminator exactly fills a 16-byte field
        let mut buf = BytesMut::new();
        put_fixed_str(&mut buf, "fifteen_bytes_x", 16).unwrap();

        let mut bytes = buf.freeze();
        assert_eq!(get_fixed_str(&mut bytes, 16).unwrap(), "fifteen_bytes_x");
    }

    #[test]
    fn test_fixed_str_too_long_writes_nothing() {
        let mut buf = BytesMut::new();
        let err = put_fixed_str(&mut buf, "sixteen_bytes_xy", 16).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::FieldTooSmall {
                len: 16,
                field_size: 16
            }
        ));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_fixed_str_missing_terminator() {
        let mut bytes = Bytes::from(vec![b'a'; 16]);
        let err = get_fixed_str(&mut bytes, 16).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::MissingTerminator { field_size: 16 }
        ));
    }

    #[test]
    fn test_fixed_str_truncated_field() {
        let mut bytes = Bytes::from_static(b"abc\0");
        let err = get_fixed_str(&mut bytes, 16).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Truncated {
                needed: 16,
                available: 4
            }
        ));
    }

    #[test]
    fn test_fixed_str_invalid_utf8() {
        let mut field = vec![0xFFu8, 0xFE, 0xFD];
        field.resize(16, 0);
        let mut bytes = Bytes::from(field);
        assert!(matches!(
            get_fixed_str(&mut bytes, 16),
            Err(ProtocolError::Utf8(_))
        ));
    }

    #[test]
    fn test_to_hex() {
        assert_eq!(to_hex(&[0x00, 0xAB, 0x5C]), "00ab5c");
    }
}
