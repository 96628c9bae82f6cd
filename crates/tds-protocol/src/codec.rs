//! Low-level read/write helpers shared by the wire structures.
//!
//! Every reader checks the remaining length first and fails with
//! [`ProtocolError::UnexpectedEof`] instead of panicking inside `bytes`.

use bytes::{Buf, BufMut, Bytes};

use crate::error::ProtocolError;

/// Fail unless at least `n` bytes remain.
#[inline]
pub fn ensure(src: &impl Buf, n: usize) -> Result<(), ProtocolError> {
    if src.remaining() < n {
        Err(ProtocolError::UnexpectedEof)
    } else {
        Ok(())
    }
}

/// Read one byte.
#[inline]
pub fn read_u8(src: &mut impl Buf) -> Result<u8, ProtocolError> {
    ensure(src, 1)?;
    Ok(src.get_u8())
}

/// Read a little-endian `u16`.
#[inline]
pub fn read_u16_le(src: &mut impl Buf) -> Result<u16, ProtocolError> {
    ensure(src, 2)?;
    Ok(src.get_u16_le())
}

/// Read a little-endian `u32`.
#[inline]
pub fn read_u32_le(src: &mut impl Buf) -> Result<u32, ProtocolError> {
    ensure(src, 4)?;
    Ok(src.get_u32_le())
}

/// Read a little-endian `i32`.
#[inline]
pub fn read_i32_le(src: &mut impl Buf) -> Result<i32, ProtocolError> {
    ensure(src, 4)?;
    Ok(src.get_i32_le())
}

/// Read a little-endian `u64`.
#[inline]
pub fn read_u64_le(src: &mut impl Buf) -> Result<u64, ProtocolError> {
    ensure(src, 8)?;
    Ok(src.get_u64_le())
}

/// Split off `n` bytes without copying.
pub fn read_bytes(src: &mut Bytes, n: usize) -> Result<Bytes, ProtocolError> {
    ensure(src, n)?;
    Ok(src.split_to(n))
}

/// Discard `n` bytes.
pub fn skip(src: &mut impl Buf, n: usize) -> Result<(), ProtocolError> {
    ensure(src, n)?;
    src.advance(n);
    Ok(())
}

/// Read a UTF-16LE string with a 1-byte character count.
pub fn read_b_varchar(src: &mut impl Buf) -> Result<String, ProtocolError> {
    let len = read_u8(src)? as usize;
    read_utf16_string(src, len)
}

/// Read a UTF-16LE string with a 2-byte character count.
pub fn read_us_varchar(src: &mut impl Buf) -> Result<String, ProtocolError> {
    let len = read_u16_le(src)? as usize;
    read_utf16_string(src, len)
}

/// Read a UTF-16LE string of `char_count` code units.
pub fn read_utf16_string(src: &mut impl Buf, char_count: usize) -> Result<String, ProtocolError> {
    ensure(src, char_count * 2)?;
    let units: Vec<u16> = (0..char_count).map(|_| src.get_u16_le()).collect();
    String::from_utf16(&units).map_err(|_| ProtocolError::StringEncoding("invalid UTF-16"))
}

/// Decode a UTF-16LE byte slice.
pub fn decode_utf16_bytes(bytes: &[u8]) -> Result<String, ProtocolError> {
    if bytes.len() % 2 != 0 {
        return Err(ProtocolError::StringEncoding("odd UTF-16 byte length"));
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units).map_err(|_| ProtocolError::StringEncoding("invalid UTF-16"))
}

/// Write a UTF-16LE string with a 1-byte character count.
pub fn write_b_varchar(dst: &mut impl BufMut, s: &str) -> Result<(), ProtocolError> {
    let units: Vec<u16> = s.encode_utf16().collect();
    let len = u8::try_from(units.len()).map_err(|_| ProtocolError::FieldTooLong {
        field: "b_varchar",
        len: units.len(),
        max: u8::MAX as usize,
    })?;
    dst.put_u8(len);
    units.iter().for_each(|&u| dst.put_u16_le(u));
    Ok(())
}

/// Write a UTF-16LE string with a 2-byte character count.
pub fn write_us_varchar(dst: &mut impl BufMut, s: &str) -> Result<(), ProtocolError> {
    let units: Vec<u16> = s.encode_utf16().collect();
    let len = u16::try_from(units.len()).map_err(|_| ProtocolError::FieldTooLong {
        field: "us_varchar",
        len: units.len(),
        max: u16::MAX as usize,
    })?;
    dst.put_u16_le(len);
    units.iter().for_each(|&u| dst.put_u16_le(u));
    Ok(())
}

/// Write a UTF-16LE string without length prefix.
pub fn write_utf16_string(dst: &mut impl BufMut, s: &str) {
    for c in s.encode_utf16() {
        dst.put_u16_le(c);
    }
}

/// Number of UTF-16 code units in `s`.
#[must_use]
pub fn utf16_len(s: &str) -> usize {
    s.encode_utf16().count()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn test_b_varchar_roundtrip() {
        let original = "Hello, 世界!";
        let mut buf = BytesMut::new();
        write_b_varchar(&mut buf, original).unwrap();

        let mut cursor = buf.freeze();
        assert_eq!(read_b_varchar(&mut cursor).unwrap(), original);
        assert!(cursor.is_empty());
    }

    #[test]
    fn test_us_varchar_roundtrip() {
        let original = "Unicode: αβγ";
        let mut buf = BytesMut::new();
        write_us_varchar(&mut buf, original).unwrap();

        let mut cursor = buf.freeze();
        assert_eq!(read_us_varchar(&mut cursor).unwrap(), original);
    }

    #[test]
    fn test_truncated_string_is_eof() {
        let raw = [0x03u8, b'a', 0x00];
        let mut cursor = &raw[..];
        assert_eq!(read_b_varchar(&mut cursor), Err(ProtocolError::UnexpectedEof));
    }

    #[test]
    fn test_b_varchar_too_long() {
        let long = "x".repeat(300);
        let mut buf = BytesMut::new();
        assert!(matches!(
            write_b_varchar(&mut buf, &long),
            Err(ProtocolError::FieldTooLong { len: 300, .. })
        ));
    }

    #[test]
    fn test_utf16_len() {
        assert_eq!(utf16_len("Hello"), 5);
        assert_eq!(utf16_len("世界"), 2);
        assert_eq!(utf16_len("😀"), 2);
    }
}
