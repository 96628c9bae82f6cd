//! Server-side views of client requests.
//!
//! The mock server and command tests parse what a client sent with these
//! instead of comparing opaque byte strings.

use bytes::{Buf, Bytes};
use tds_protocol::codec::{
    decode_utf16_bytes, read_b_varchar, read_bytes, read_u8, read_u16_le, read_u32_le,
    read_u64_le, skip,
};
use tds_protocol::rpc::BATCH_SEPARATOR;
use tds_protocol::types::TypeId;
use tds_protocol::{ParamStatus, ProtocolError};

use crate::mock_server::MockServerError;

/// Read ALL_HEADERS and return the transaction descriptor it carries.
fn read_all_headers(src: &mut Bytes) -> Result<u64, ProtocolError> {
    let mut headers = src.clone();
    let total = read_u32_le(&mut headers)? as usize;
    let mut block = read_bytes(src, total)?;
    skip(&mut block, 4)?;

    let mut descriptor = 0;
    while block.has_remaining() {
        let len = read_u32_le(&mut block)? as usize;
        let mut header = read_bytes(&mut block, len.saturating_sub(4))?;
        // type 2: transaction descriptor
        if read_u16_le(&mut header)? == 2 {
            descriptor = read_u64_le(&mut header)?;
        }
    }
    Ok(descriptor)
}

/// A decoded SQL batch request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlBatchView {
    /// Descriptor from the transaction header.
    pub transaction_descriptor: u64,
    /// Statement text.
    pub sql: String,
}

impl SqlBatchView {
    /// Parse a SQL batch payload.
    pub fn parse(payload: &[u8]) -> Result<Self, MockServerError> {
        let mut src = Bytes::copy_from_slice(payload);
        let transaction_descriptor = read_all_headers(&mut src)?;
        let sql = decode_utf16_bytes(&src)?;
        Ok(Self {
            transaction_descriptor,
            sql,
        })
    }
}

/// Decoded parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    /// NULL.
    Null,
    /// Integer of any width.
    Int(i64),
    /// Bit.
    Bool(bool),
    /// Floating point.
    Float(f64),
    /// Character data.
    Text(String),
    /// Any other type, raw.
    Raw(Bytes),
}

/// One RPC parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamView {
    /// Parameter name, empty for positional parameters.
    pub name: String,
    /// Status flags.
    pub status: ParamStatus,
    /// Type byte.
    pub type_id: u8,
    /// Value.
    pub value: ParamValue,
}

impl ParamView {
    /// The value as a 32-bit integer.
    #[must_use]
    pub fn int(&self) -> Option<i32> {
        match self.value {
            ParamValue::Int(v) => i32::try_from(v).ok(),
            _ => None,
        }
    }

    /// The value as text.
    #[must_use]
    pub fn string(&self) -> Option<&str> {
        match &self.value {
            ParamValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Whether the value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.value == ParamValue::Null
    }

    /// Whether the parameter is passed by reference.
    #[must_use]
    pub fn is_output(&self) -> bool {
        self.status.contains(ParamStatus::BY_REF)
    }
}

/// One stored procedure call.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcCallView {
    /// Well-known procedure id.
    pub proc_id: u16,
    /// Option flags.
    pub options: u16,
    /// Parameters in order.
    pub params: Vec<ParamView>,
}

/// A decoded RPC request, possibly batching several calls.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcRequestView {
    /// Descriptor from the transaction header.
    pub transaction_descriptor: u64,
    /// Calls in request order.
    pub calls: Vec<RpcCallView>,
}

impl RpcRequestView {
    /// Parse an RPC payload.
    ///
    /// Only calls by procedure id are understood, which is all the engine
    /// sends.
    pub fn parse(payload: &[u8]) -> Result<Self, MockServerError> {
        let mut src = Bytes::copy_from_slice(payload);
        let transaction_descriptor = read_all_headers(&mut src)?;

        let mut calls = Vec::new();
        loop {
            calls.push(read_call(&mut src)?);
            if !src.has_remaining() {
                break;
            }
            let separator = read_u8(&mut src)?;
            if separator != BATCH_SEPARATOR {
                return Err(MockServerError::Protocol(format!(
                    "expected batch separator, got 0x{separator:02X}"
                )));
            }
        }
        Ok(Self {
            transaction_descriptor,
            calls,
        })
    }
}

fn read_call(src: &mut Bytes) -> Result<RpcCallView, MockServerError> {
    if read_u16_le(src)? != 0xFFFF {
        return Err(MockServerError::Protocol(
            "procedure called by name".to_string(),
        ));
    }
    let proc_id = read_u16_le(src)?;
    let options = read_u16_le(src)?;

    let mut params = Vec::new();
    while src.has_remaining() && src[0] != BATCH_SEPARATOR {
        params.push(read_param(src)?);
    }
    Ok(RpcCallView {
        proc_id,
        options,
        params,
    })
}

fn read_param(src: &mut Bytes) -> Result<ParamView, ProtocolError> {
    let name = read_b_varchar(src)?;
    let status = ParamStatus::from_bits_retain(read_u8(src)?);
    let type_byte = read_u8(src)?;
    let type_id = TypeId::from_u8(type_byte)?;

    let value = match type_id {
        TypeId::IntN => {
            skip(src, 1)?;
            match read_u8(src)? {
                0 => ParamValue::Null,
                1 => ParamValue::Int(i64::from(read_u8(src)?)),
                2 => ParamValue::Int(i64::from(read_bytes(src, 2)?.get_i16_le())),
                4 => ParamValue::Int(i64::from(read_bytes(src, 4)?.get_i32_le())),
                n => ParamValue::Int(read_bytes(src, usize::from(n))?.get_i64_le()),
            }
        }
        TypeId::BitN => {
            skip(src, 1)?;
            match read_u8(src)? {
                0 => ParamValue::Null,
                _ => ParamValue::Bool(read_u8(src)? != 0),
            }
        }
        TypeId::FloatN => {
            skip(src, 1)?;
            match read_u8(src)? {
                0 => ParamValue::Null,
                4 => ParamValue::Float(f64::from(read_bytes(src, 4)?.get_f32_le())),
                n => ParamValue::Float(read_bytes(src, usize::from(n))?.get_f64_le()),
            }
        }
        TypeId::NVarChar | TypeId::NChar => {
            let max = read_u16_le(src)?;
            skip(src, 5)?;
            match read_var(src, max)? {
                Some(bytes) => ParamValue::Text(decode_utf16_bytes(&bytes)?),
                None => ParamValue::Null,
            }
        }
        TypeId::BigVarBinary | TypeId::BigBinary => {
            let max = read_u16_le(src)?;
            read_var(src, max)?.map_or(ParamValue::Null, ParamValue::Raw)
        }
        TypeId::DecimalN | TypeId::NumericN => {
            skip(src, 3)?;
            let len = read_u8(src)?;
            raw_or_null(src, usize::from(len))?
        }
        TypeId::Guid | TypeId::DateTimeN | TypeId::MoneyN => {
            skip(src, 1)?;
            let len = read_u8(src)?;
            raw_or_null(src, usize::from(len))?
        }
        _ => {
            // TIMEN, DATETIME2N and DATETIMEOFFSETN carry a scale
            if type_id != TypeId::Date {
                skip(src, 1)?;
            }
            let len = read_u8(src)?;
            raw_or_null(src, usize::from(len))?
        }
    };

    Ok(ParamView {
        name,
        status,
        type_id: type_byte,
        value,
    })
}

fn raw_or_null(src: &mut Bytes, len: usize) -> Result<ParamValue, ProtocolError> {
    if len == 0 {
        return Ok(ParamValue::Null);
    }
    Ok(ParamValue::Raw(read_bytes(src, len)?))
}

/// Read a u16-length value, or a PLP value when `max` is 0xFFFF.
fn read_var(src: &mut Bytes, max: u16) -> Result<Option<Bytes>, ProtocolError> {
    if max != 0xFFFF {
        let len = read_u16_le(src)?;
        if len == 0xFFFF {
            return Ok(None);
        }
        return read_bytes(src, usize::from(len)).map(Some);
    }

    let total = read_u64_le(src)?;
    if total == u64::MAX {
        return Ok(None);
    }
    let mut out = bytes::BytesMut::new();
    loop {
        let chunk = read_u32_le(src)? as usize;
        if chunk == 0 {
            break;
        }
        out.extend_from_slice(&read_bytes(src, chunk)?);
    }
    Ok(Some(out.freeze()))
}
