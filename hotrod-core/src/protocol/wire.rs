//! Scalar encodings shared by every Hot Rod frame.
//!
//! Counts and lengths use variable-length integers: seven data bits per byte,
//! least significant group first, with the high bit set while more bytes
//! follow. Version stamps and timestamps are fixed 8-byte big-endian longs.

use bytes::{BufMut, Bytes};

use crate::error::HotRodError;

/// Maximum encoded length of a 32-bit varint.
pub const MAX_VINT_BYTES: usize = 5;

/// Maximum encoded length of a 64-bit varint.
pub const MAX_VLONG_BYTES: usize = 10;

/// Why a frame could not be read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// More bytes are needed; the buffer must not be consumed.
    Incomplete,
    /// The bytes can never form a valid frame.
    Malformed(String),
}

impl From<DecodeError> for HotRodError {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::Incomplete => {
                HotRodError::Protocol("unexpected end of frame".to_string())
            }
            DecodeError::Malformed(msg) => HotRodError::Protocol(msg),
        }
    }
}

/// Result of a decode step.
pub type DecodeResult<T> = std::result::Result<T, DecodeError>;

/// Writes Hot Rod scalars into any [`BufMut`].
pub trait WireWrite: BufMut {
    /// Writes a 32-bit variable-length integer.
    fn put_vint(&mut self, value: i32) {
        let mut v = value as u32;
        while v & !0x7F != 0 {
            self.put_u8(((v & 0x7F) | 0x80) as u8);
            v >>= 7;
        }
        self.put_u8(v as u8);
    }

    /// Writes a 64-bit variable-length integer.
    fn put_vlong(&mut self, value: i64) {
        let mut v = value as u64;
        while v & !0x7F != 0 {
            self.put_u8(((v & 0x7F) | 0x80) as u8);
            v >>= 7;
        }
        self.put_u8(v as u8);
    }

    /// Writes a varint length followed by the bytes.
    fn put_array(&mut self, data: &[u8]) {
        self.put_vint(data.len() as i32);
        self.put_slice(data);
    }

    /// Writes a UTF-8 string as a length-prefixed array.
    fn put_string(&mut self, value: &str) {
        self.put_array(value.as_bytes());
    }
}

impl<B: BufMut + ?Sized> WireWrite for B {}

/// Number of bytes [`WireWrite::put_vint`] emits for `value`.
pub fn vint_size(value: i32) -> usize {
    let bits = 32 - (value as u32).leading_zeros() as usize;
    bits.max(1).div_ceil(7)
}

/// Number of bytes [`WireWrite::put_vlong`] emits for `value`.
pub fn vlong_size(value: i64) -> usize {
    let bits = 64 - (value as u64).leading_zeros() as usize;
    bits.max(1).div_ceil(7)
}

/// Cursor over a borrowed buffer that never reads past its end.
#[derive(Debug)]
pub struct WireReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> WireReader<'a> {
    /// Creates a reader positioned at the start of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    fn ensure_remaining(&self, needed: usize) -> DecodeResult<()> {
        if self.remaining() < needed {
            Err(DecodeError::Incomplete)
        } else {
            Ok(())
        }
    }

    /// Reads a single byte.
    pub fn read_u8(&mut self) -> DecodeResult<u8> {
        self.ensure_remaining(1)?;
        let value = self.data[self.position];
        self.position += 1;
        Ok(value)
    }

    /// Reads a big-endian unsigned short.
    pub fn read_u16(&mut self) -> DecodeResult<u16> {
        let bytes = self.read_fixed::<2>()?;
        Ok(u16::from_be_bytes(bytes))
    }

    /// Reads a big-endian signed int.
    pub fn read_i32(&mut self) -> DecodeResult<i32> {
        let bytes = self.read_fixed::<4>()?;
        Ok(i32::from_be_bytes(bytes))
    }

    /// Reads a big-endian signed long.
    pub fn read_i64(&mut self) -> DecodeResult<i64> {
        let bytes = self.read_fixed::<8>()?;
        Ok(i64::from_be_bytes(bytes))
    }

    fn read_fixed<const N: usize>(&mut self) -> DecodeResult<[u8; N]> {
        self.ensure_remaining(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[self.position..self.position + N]);
        self.position += N;
        Ok(out)
    }

    /// Reads a 32-bit variable-length integer.
    pub fn read_vint(&mut self) -> DecodeResult<i32> {
        let mut result: u32 = 0;
        for i in 0..MAX_VINT_BYTES {
            let b = self.read_u8()?;
            result |= ((b & 0x7F) as u32) << (7 * i);
            if b & 0x80 == 0 {
                return Ok(result as i32);
            }
        }
        Err(DecodeError::Malformed("varint longer than 5 bytes".to_string()))
    }

    /// Reads a 64-bit variable-length integer.
    pub fn read_vlong(&mut self) -> DecodeResult<i64> {
        let mut result: u64 = 0;
        for i in 0..MAX_VLONG_BYTES {
            let b = self.read_u8()?;
            result |= ((b & 0x7F) as u64) << (7 * i);
            if b & 0x80 == 0 {
                return Ok(result as i64);
            }
        }
        Err(DecodeError::Malformed("varlong longer than 10 bytes".to_string()))
    }

    /// Reads exactly `len` bytes.
    pub fn read_bytes(&mut self, len: usize) -> DecodeResult<&'a [u8]> {
        self.ensure_remaining(len)?;
        let slice = &self.data[self.position..self.position + len];
        self.position += len;
        Ok(slice)
    }

    /// Reads a varint-length-prefixed byte array.
    pub fn read_array(&mut self) -> DecodeResult<Bytes> {
        let len = self.read_length()?;
        Ok(Bytes::copy_from_slice(self.read_bytes(len)?))
    }

    /// Reads a length-prefixed array, mapping the empty array to `None`.
    pub fn read_optional_array(&mut self) -> DecodeResult<Option<Bytes>> {
        let array = self.read_array()?;
        Ok(if array.is_empty() { None } else { Some(array) })
    }

    /// Reads a length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> DecodeResult<String> {
        let len = self.read_length()?;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| DecodeError::Malformed(format!("invalid UTF-8 string: {}", e)))
    }

    fn read_length(&mut self) -> DecodeResult<usize> {
        let len = self.read_vint()?;
        if len < 0 {
            return Err(DecodeError::Malformed(format!("negative length {}", len)));
        }
        Ok(len as usize)
    }
}
