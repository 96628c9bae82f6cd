//! Collations and the character encodings behind non-Unicode columns.
//!
//! A collation on the wire is five bytes: a little-endian `u32` holding the
//! LCID in its low 20 bits plus comparison/version flags, and a sort id byte.
//! CHAR/VARCHAR/TEXT data is stored in the code page of that LCID, unless the
//! UTF-8 flag is set.

use bytes::{Buf, BufMut};
use encoding_rs::Encoding;

use crate::codec::ensure;
use crate::error::ProtocolError;

/// Bit marking a UTF-8 collation.
pub const COLLATION_FLAG_UTF8: u32 = 0x0800_0000;

/// Mask selecting the LCID from the collation info word.
pub const LCID_MASK: u32 = 0x000F_FFFF;

const PRIMARY_LANGUAGE_MASK: u32 = 0x0000_FFFF;

/// Collation attached to character metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Collation {
    /// Collation info word (LCID plus flags).
    pub info: u32,
    /// Sort id.
    pub sort_id: u8,
}

impl Collation {
    /// Wire size.
    pub const SIZE: usize = 5;

    /// Read five collation bytes.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        ensure(src, Self::SIZE)?;
        let info = src.get_u32_le();
        let sort_id = src.get_u8();
        Ok(Self { info, sort_id })
    }

    /// Write five collation bytes.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u32_le(self.info);
        dst.put_u8(self.sort_id);
    }

    /// The locale id.
    #[must_use]
    pub fn lcid(&self) -> u32 {
        self.info & LCID_MASK
    }

    /// Whether data in this collation is already UTF-8.
    #[must_use]
    pub fn is_utf8(&self) -> bool {
        self.info & COLLATION_FLAG_UTF8 != 0
    }

    /// Windows code page for this collation.
    #[must_use]
    pub fn code_page(&self) -> u16 {
        if self.is_utf8() {
            65001
        } else {
            code_page_for_lcid(self.lcid())
        }
    }

    /// Encoding used for non-Unicode data; Windows-1252 when the LCID is
    /// unknown.
    #[must_use]
    pub fn encoding(&self) -> &'static Encoding {
        if self.is_utf8() {
            encoding_rs::UTF_8
        } else {
            encoding_for_code_page(self.code_page())
        }
    }

    /// Decode bytes stored under this collation.
    #[must_use]
    pub fn decode_str(&self, bytes: &[u8]) -> String {
        let (text, _, _) = self.encoding().decode(bytes);
        text.into_owned()
    }
}

/// Map an LCID to its ANSI code page. Unknown LCIDs fall back to 1252.
#[must_use]
pub fn code_page_for_lcid(lcid: u32) -> u16 {
    match lcid & PRIMARY_LANGUAGE_MASK {
        0x0411 => 932,
        0x0804 | 0x1004 => 936,
        0x0412 => 949,
        0x0404 | 0x0C04 | 0x1404 => 950,
        0x041E => 874,
        0x042A => 1258,

        0x0405 | 0x0415 | 0x040E | 0x041A | 0x081A | 0x141A | 0x101A | 0x041B | 0x0424 | 0x0418
        | 0x041C => 1250,

        0x0419 | 0x0422 | 0x0423 | 0x0402 | 0x042F | 0x0C1A | 0x201A | 0x0440 | 0x0843 | 0x0444
        | 0x0450 | 0x0485 => 1251,

        0x0408 => 1253,
        0x041F | 0x042C => 1254,
        0x040D => 1255,

        0x0401 | 0x0801 | 0x0C01 | 0x1001 | 0x1401 | 0x1801 | 0x1C01 | 0x2001 | 0x2401 | 0x2801
        | 0x2C01 | 0x3001 | 0x3401 | 0x3801 | 0x3C01 | 0x4001 | 0x0429 | 0x0420 | 0x048C
        | 0x0463 => 1256,

        0x0425..=0x0427 => 1257,

        _ => 1252,
    }
}

/// Map a Windows code page to an `encoding_rs` encoding.
#[must_use]
pub fn encoding_for_code_page(code_page: u16) -> &'static Encoding {
    match code_page {
        874 => encoding_rs::WINDOWS_874,
        932 => encoding_rs::SHIFT_JIS,
        936 => encoding_rs::GB18030,
        949 => encoding_rs::EUC_KR,
        950 => encoding_rs::BIG5,
        1250 => encoding_rs::WINDOWS_1250,
        1251 => encoding_rs::WINDOWS_1251,
        1253 => encoding_rs::WINDOWS_1253,
        1254 => encoding_rs::WINDOWS_1254,
        1255 => encoding_rs::WINDOWS_1255,
        1256 => encoding_rs::WINDOWS_1256,
        1257 => encoding_rs::WINDOWS_1257,
        1258 => encoding_rs::WINDOWS_1258,
        65001 => encoding_rs::UTF_8,
        _ => encoding_rs::WINDOWS_1252,
    }
}
