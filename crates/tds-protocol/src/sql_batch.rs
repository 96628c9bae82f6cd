//! SQL batch request encoding.
//!
//! A SQL batch payload is the ALL_HEADERS section followed by the SQL text in
//! UTF-16LE. RPC requests share the same ALL_HEADERS prefix.

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::write_utf16_string;

/// Size of ALL_HEADERS carrying a single transaction descriptor header.
pub const ALL_HEADERS_LEN: usize = 22;

/// Write ALL_HEADERS with the transaction descriptor header.
///
/// `transaction_descriptor` is the value from the last begin-transaction
/// env-change, or 0 in auto-commit mode.
pub fn write_all_headers(dst: &mut impl BufMut, transaction_descriptor: u64) {
    dst.put_u32_le(ALL_HEADERS_LEN as u32);
    dst.put_u32_le(18);
    dst.put_u16_le(0x0002);
    dst.put_u64_le(transaction_descriptor);
    // outstanding request count
    dst.put_u32_le(1);
}

/// Encode a SQL batch request payload.
#[must_use]
pub fn encode_sql_batch(sql: &str, transaction_descriptor: u64) -> Bytes {
    let mut buf = BytesMut::with_capacity(ALL_HEADERS_LEN + sql.len() * 2);
    write_all_headers(&mut buf, transaction_descriptor);
    write_utf16_string(&mut buf, sql);
    buf.freeze()
}
