//! lib0-style binary primitives shared by every message on the wire.
//!
//! ```text
//! VarUint       := LEB128, 7 bits per byte, high bit = continuation
//! VarUint8Array := VarUint(len) bytes[len]
//! VarString     := VarUint8Array(utf8)
//! ```

use thiserror::Error;

/// Decoding failed; the input is not a well-formed message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("malformed message: unexpected end of buffer")]
    UnexpectedEof,
    #[error("malformed message: var-int exceeds 64 bits")]
    VarIntOverflow,
    #[error("malformed message: string is not valid utf-8")]
    InvalidUtf8,
    #[error("malformed message: unknown message type {0}")]
    UnknownMessageType(u64),
    #[error("malformed message: unknown sync step {0}")]
    UnknownSyncStep(u64),
    #[error("malformed message: invalid awareness state for client {0}")]
    InvalidAwarenessState(u64),
    #[error("malformed update: value {0} does not fit in 32 bits")]
    OutOfRange(u64),
    #[error("malformed update: unknown content ref {0}")]
    UnknownContent(u8),
    #[error("malformed update: unknown type ref {0}")]
    UnknownTypeRef(u8),
    #[error("malformed update: unknown value tag {0}")]
    UnknownValueTag(u8),
    #[error("malformed update: embedded JSON does not parse")]
    InvalidJson,
    #[error("malformed update: values nested too deeply")]
    NestingTooDeep,
    #[error("malformed update: clock overflows 32 bits")]
    ClockOverflow,
}

/// Appends self-delimiting values to a growable buffer.
#[derive(Debug, Default, Clone)]
pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { buf: Vec::with_capacity(capacity) }
    }

    pub fn write_var_uint(&mut self, mut value: u64) {
        while value >= 0x80 {
            self.buf.push((value as u8 & 0x7F) | 0x80);
            value >>= 7;
        }
        self.buf.push(value as u8);
    }

    pub fn write_u8(&mut self, byte: u8) {
        self.buf.push(byte);
    }

    pub fn write_var_bytes(&mut self, bytes: &[u8]) {
        self.write_var_uint(bytes.len() as u64);
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_var_string(&mut self, s: &str) {
        self.write_var_bytes(s.as_bytes());
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }
}

/// Reads values back from a borrowed buffer in the order they were written.
#[derive(Debug, Clone)]
pub struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn has_content(&self) -> bool {
        self.pos < self.buf.len()
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn read_var_uint(&mut self) -> Result<u64, DecodeError> {
        let mut value: u64 = 0;
        let mut shift = 0u32;
        loop {
            let byte = *self.buf.get(self.pos).ok_or(DecodeError::UnexpectedEof)?;
            self.pos += 1;
            let bits = (byte & 0x7F) as u64;
            if shift == 63 && bits > 1 {
                return Err(DecodeError::VarIntOverflow);
            }
            value |= bits << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
            if shift > 63 {
                return Err(DecodeError::VarIntOverflow);
            }
        }
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        let byte = *self.buf.get(self.pos).ok_or(DecodeError::UnexpectedEof)?;
        self.pos += 1;
        Ok(byte)
    }

    pub fn read_exact(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if len > self.remaining() {
            return Err(DecodeError::UnexpectedEof);
        }
        let start = self.pos;
        self.pos += len;
        Ok(&self.buf[start..self.pos])
    }

    /// Var-uint that must fit in a `u32`.
    pub fn read_var_u32(&mut self) -> Result<u32, DecodeError> {
        let value = self.read_var_uint()?;
        u32::try_from(value).map_err(|_| DecodeError::OutOfRange(value))
    }

    /// lib0 signed var-int: sign and 6 value bits in the first byte, 7 bits
    /// per continuation byte. The magnitude must fit in an `i64`.
    pub fn read_var_int(&mut self) -> Result<i64, DecodeError> {
        let mut byte = self.read_u8()?;
        let negative = byte & 0x40 != 0;
        let mut magnitude = u128::from(byte & 0x3F);
        let mut shift = 6;
        while byte & 0x80 != 0 {
            if shift > 62 {
                return Err(DecodeError::VarIntOverflow);
            }
            byte = self.read_u8()?;
            magnitude |= u128::from(byte & 0x7F) << shift;
            shift += 7;
        }
        let magnitude = i64::try_from(magnitude).map_err(|_| DecodeError::VarIntOverflow)?;
        Ok(if negative { -magnitude } else { magnitude })
    }

    pub fn read_var_bytes(&mut self) -> Result<&'a [u8], DecodeError> {
        let len = self.read_var_uint()?;
        let len = usize::try_from(len).map_err(|_| DecodeError::UnexpectedEof)?;
        self.read_exact(len)
    }

    pub fn read_var_string(&mut self) -> Result<&'a str, DecodeError> {
        let bytes = self.read_var_bytes()?;
        std::str::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8)
    }
}
