//! RPC request encoding.
//!
//! Prepared statements and server cursors are driven through well-known
//! system procedures addressed by id. A request is ALL_HEADERS followed by
//! one or more RPC calls; consecutive calls in one message are separated by
//! [`BATCH_SEPARATOR`].
//!
//! ```text
//! ALL_HEADERS | 0xFFFF ProcId OptionFlags Param* [0xFF 0xFFFF ProcId ...]
//! ```

use bitflags::bitflags;
use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::{utf16_len, write_b_varchar, write_utf16_string};
use crate::error::ProtocolError;
use crate::sql_batch::{ALL_HEADERS_LEN, write_all_headers};
use crate::types::TypeId;

/// Separator byte between RPC calls packed in one request.
pub const BATCH_SEPARATOR: u8 = 0xFF;

/// Default collation sent with NVARCHAR parameters (Latin1_General_CI_AS).
pub const DEFAULT_COLLATION: [u8; 5] = [0x09, 0x04, 0xD0, 0x00, 0x34];

/// Longest string (in UTF-16 units) sent as `nvarchar(4000)` rather than
/// `nvarchar(max)`.
pub const NVARCHAR_MAX_CHARS: usize = 4000;

/// PLP total-length sentinel for NULL.
pub const PLP_NULL: u64 = u64::MAX;

/// PLP total-length sentinel for unknown length.
pub const PLP_UNKNOWN_LEN: u64 = u64::MAX - 1;

/// Well-known stored procedure IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ProcId {
    /// sp_cursorprepexec
    CursorPrepExec = 0x0005,
    /// sp_cursorunprepare
    CursorUnprepare = 0x0006,
    /// sp_cursorfetch
    CursorFetch = 0x0007,
    /// sp_cursorclose
    CursorClose = 0x0009,
    /// sp_execute
    Execute = 0x000C,
    /// sp_prepexec
    PrepExec = 0x000D,
    /// sp_unprepare
    Unprepare = 0x000F,
}

bitflags! {
    /// RPC option flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct RpcOptionFlags: u16 {
        /// Recompile the procedure.
        const WITH_RECOMPILE = 0x0001;
        /// Suppress column metadata in the response.
        const NO_METADATA = 0x0002;
        /// Reuse metadata from the previous call.
        const REUSE_METADATA = 0x0004;
    }
}

bitflags! {
    /// RPC parameter status flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ParamStatus: u8 {
        /// Output (by-reference) parameter.
        const BY_REF = 0x01;
        /// Use the default value.
        const DEFAULT_VALUE = 0x02;
    }
}

/// Write a parameter's name and status byte.
pub fn write_param_header(
    dst: &mut impl BufMut,
    name: &str,
    status: ParamStatus,
) -> Result<(), ProtocolError> {
    write_b_varchar(dst, name)?;
    dst.put_u8(status.bits());
    Ok(())
}

/// Write a 4-byte INTN parameter, or a NULL one when `value` is `None`.
pub fn write_int_param(
    dst: &mut impl BufMut,
    name: &str,
    status: ParamStatus,
    value: Option<i32>,
) -> Result<(), ProtocolError> {
    write_param_header(dst, name, status)?;
    dst.put_u8(TypeId::IntN as u8);
    dst.put_u8(4);
    match value {
        Some(v) => {
            dst.put_u8(4);
            dst.put_i32_le(v);
        }
        None => dst.put_u8(0),
    }
    Ok(())
}

/// Write an NVARCHAR parameter.
///
/// Strings up to [`NVARCHAR_MAX_CHARS`] go as `nvarchar(4000)`; longer ones
/// switch to `nvarchar(max)` with a single PLP chunk.
pub fn write_nvarchar_param(
    dst: &mut impl BufMut,
    name: &str,
    status: ParamStatus,
    value: Option<&str>,
) -> Result<(), ProtocolError> {
    write_param_header(dst, name, status)?;
    dst.put_u8(TypeId::NVarChar as u8);
    let chars = value.map_or(0, utf16_len);
    let is_max = chars > NVARCHAR_MAX_CHARS;
    dst.put_u16_le(if is_max { 0xFFFF } else { 8000 });
    dst.put_slice(&DEFAULT_COLLATION);

    match value {
        None => dst.put_u16_le(0xFFFF),
        Some(s) if is_max => {
            let byte_len = chars * 2;
            dst.put_u64_le(byte_len as u64);
            dst.put_u32_le(byte_len as u32);
            write_utf16_string(dst, s);
            dst.put_u32_le(0);
        }
        Some(s) => {
            dst.put_u16_le((chars * 2) as u16);
            write_utf16_string(dst, s);
        }
    }
    Ok(())
}

/// Write bytes as a PLP stream with a single chunk and terminator.
pub fn write_plp(dst: &mut impl BufMut, data: &[u8]) {
    dst.put_u64_le(data.len() as u64);
    if !data.is_empty() {
        dst.put_u32_le(data.len() as u32);
        dst.put_slice(data);
    }
    dst.put_u32_le(0);
}

/// One RPC call: procedure id, option flags and pre-encoded parameters.
#[derive(Debug, Clone)]
pub struct RpcCall {
    proc_id: ProcId,
    options: RpcOptionFlags,
    params: BytesMut,
}

impl RpcCall {
    /// Create a call with no parameters.
    #[must_use]
    pub fn new(proc_id: ProcId) -> Self {
        Self {
            proc_id,
            options: RpcOptionFlags::empty(),
            params: BytesMut::new(),
        }
    }

    /// Set option flags.
    #[must_use]
    pub fn with_options(mut self, options: RpcOptionFlags) -> Self {
        self.options = options;
        self
    }

    /// The procedure this call targets.
    #[must_use]
    pub fn proc_id(&self) -> ProcId {
        self.proc_id
    }

    /// Append an INTN parameter.
    pub fn int_param(&mut self, status: ParamStatus, value: Option<i32>) -> Result<(), ProtocolError> {
        write_int_param(&mut self.params, "", status, value)
    }

    /// Append an NVARCHAR parameter.
    pub fn nvarchar_param(&mut self, value: &str) -> Result<(), ProtocolError> {
        write_nvarchar_param(&mut self.params, "", ParamStatus::empty(), Some(value))
    }

    /// Buffer for parameters encoded elsewhere.
    pub fn params_mut(&mut self) -> &mut BytesMut {
        &mut self.params
    }

    fn encode_into(&self, dst: &mut BytesMut) {
        dst.put_u16_le(0xFFFF);
        dst.put_u16_le(self.proc_id as u16);
        dst.put_u16_le(self.options.bits());
        dst.put_slice(&self.params);
    }
}

/// An RPC request message holding one or more calls.
#[derive(Debug, Clone, Default)]
pub struct RpcRequest {
    calls: Vec<RpcCall>,
}

impl RpcRequest {
    /// A request with a single call.
    #[must_use]
    pub fn new(call: RpcCall) -> Self {
        Self { calls: vec![call] }
    }

    /// Append another call, separated on the wire by [`BATCH_SEPARATOR`].
    pub fn push(&mut self, call: RpcCall) {
        self.calls.push(call);
    }

    /// Number of calls in the request.
    #[must_use]
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    /// Whether the request holds no calls.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Encode the request payload.
    #[must_use]
    pub fn encode(&self, transaction_descriptor: u64) -> Bytes {
        let body: usize = self.calls.iter().map(|c| c.params.len() + 7).sum();
        let mut buf = BytesMut::with_capacity(ALL_HEADERS_LEN + body);
        write_all_headers(&mut buf, transaction_descriptor);
        for (i, call) in self.calls.iter().enumerate() {
            if i > 0 {
                buf.put_u8(BATCH_SEPARATOR);
            }
            call.encode_into(&mut buf);
        }
        buf.freeze()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_int_param_layout() {
        let mut buf = BytesMut::new();
        write_int_param(&mut buf, "", ParamStatus::BY_REF, Some(7)).unwrap();
        assert_eq!(&buf[..], &[0x00, 0x01, 0x26, 4, 4, 7, 0, 0, 0]);
    }

    #[test]
    fn test_nvarchar_param_layout() {
        let mut buf = BytesMut::new();
        write_nvarchar_param(&mut buf, "", ParamStatus::empty(), Some("ab")).unwrap();
        assert_eq!(
            &buf[..],
            &[0x00, 0x00, 0xE7, 0x40, 0x1F, 0x09, 0x04, 0xD0, 0x00, 0x34, 4, 0, b'a', 0, b'b', 0]
        );
    }

    #[test]
    fn test_long_nvarchar_uses_plp() {
        let long = "x".repeat(NVARCHAR_MAX_CHARS + 1);
        let mut buf = BytesMut::new();
        write_nvarchar_param(&mut buf, "", ParamStatus::empty(), Some(&long)).unwrap();
        assert_eq!(&buf[3..5], &[0xFF, 0xFF]);
        let total = u64::from_le_bytes(buf[10..18].try_into().unwrap());
        assert_eq!(total as usize, long.len() * 2);
        assert_eq!(&buf[buf.len() - 4..], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_request_framing() {
        let mut call = RpcCall::new(ProcId::Unprepare);
        call.int_param(ParamStatus::empty(), Some(1)).unwrap();
        let payload = RpcRequest::new(call).encode(0);

        assert_eq!(&payload[..4], &[22, 0, 0, 0]);
        assert_eq!(&payload[22..28], &[0xFF, 0xFF, 0x0F, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_batch_separator_between_calls() {
        let mut request = RpcRequest::new(RpcCall::new(ProcId::Execute));
        request.push(RpcCall::new(ProcId::Execute));
        let payload = request.encode(0);

        assert_eq!(request.len(), 2);
        assert_eq!(payload.len(), ALL_HEADERS_LEN + 6 + 1 + 6);
        assert_eq!(payload[ALL_HEADERS_LEN + 6], BATCH_SEPARATOR);
    }
}
