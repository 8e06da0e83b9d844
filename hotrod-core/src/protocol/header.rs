//! Request and response headers.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::BufMut;

use super::constants::*;
use super::topology::TopologyUpdate;
use super::wire::{DecodeError, DecodeResult, WireReader, WireWrite};
use crate::error::{HotRodError, Result};

/// Source of request message ids.
///
/// Ids only need to be unique among the requests in flight, so a relaxed
/// increment is enough. Each client owns its own generator.
#[derive(Debug, Default)]
pub struct MessageIdGenerator {
    next: AtomicU64,
}

impl MessageIdGenerator {
    /// Creates a generator starting at 1.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Returns the next id, always within the 63-bit range of the wire field.
    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed) & (i64::MAX as u64)
    }
}

/// Header opening every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHeader {
    /// Correlates the response with this request.
    pub message_id: u64,
    /// Protocol version byte.
    pub protocol_version: u8,
    /// Request opcode.
    pub opcode: u8,
    /// Target cache, empty for the default cache.
    pub cache_name: String,
    /// Bitwise OR of the active `FLAG_*` values.
    pub flags: u32,
    /// Client intelligence level.
    pub client_intelligence: u8,
    /// Last topology id the client has seen for this cache.
    pub topology_id: i32,
}

impl RequestHeader {
    /// Encodes the header after the request magic byte.
    pub fn write_to<B: BufMut>(&self, dst: &mut B) {
        dst.put_u8(REQUEST_MAGIC);
        dst.put_vlong(self.message_id as i64);
        dst.put_u8(self.protocol_version);
        dst.put_u8(self.opcode);
        dst.put_string(&self.cache_name);
        dst.put_vint(self.flags as i32);
        dst.put_u8(self.client_intelligence);
        dst.put_vint(self.topology_id);
    }

    /// Decodes a request header. Used by servers and tests.
    pub fn read_from(reader: &mut WireReader<'_>) -> DecodeResult<Self> {
        let magic = reader.read_u8()?;
        if magic != REQUEST_MAGIC {
            return Err(DecodeError::Malformed(format!(
                "invalid request magic 0x{:02X}",
                magic
            )));
        }
        Ok(Self {
            message_id: reader.read_vlong()? as u64,
            protocol_version: reader.read_u8()?,
            opcode: reader.read_u8()?,
            cache_name: reader.read_string()?,
            flags: reader.read_vint()? as u32,
            client_intelligence: reader.read_u8()?,
            topology_id: reader.read_vint()?,
        })
    }

    /// Whether `flag` is set.
    pub fn has_flag(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }
}

/// Writes a request header, minting a fresh message id from `ids`.
///
/// Returns the id so the caller can correlate the response.
#[allow(clippy::too_many_arguments)]
pub fn write_header<B: BufMut>(
    dst: &mut B,
    ids: &MessageIdGenerator,
    protocol_version: u8,
    opcode: u8,
    cache_name: &str,
    flags: u32,
    client_intelligence: u8,
    topology_id: i32,
) -> u64 {
    let header = RequestHeader {
        message_id: ids.next_id(),
        protocol_version,
        opcode,
        cache_name: cache_name.to_string(),
        flags,
        client_intelligence,
        topology_id,
    };
    header.write_to(dst);
    header.message_id
}

/// Header opening every response and event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHeader {
    /// Id of the request this answers, `0` for events.
    pub message_id: u64,
    /// Response opcode.
    pub opcode: u8,
    /// Status byte.
    pub status: u8,
    /// Topology frame, present when the server flagged a change.
    pub topology: Option<TopologyUpdate>,
}

impl ResponseHeader {
    /// Decodes a header, consuming any embedded topology frame.
    pub fn read_from(reader: &mut WireReader<'_>) -> DecodeResult<Self> {
        let magic = reader.read_u8()?;
        if magic != RESPONSE_MAGIC {
            return Err(DecodeError::Malformed(format!(
                "invalid response magic 0x{:02X}",
                magic
            )));
        }
        let message_id = reader.read_vlong()? as u64;
        let opcode = reader.read_u8()?;
        let status = reader.read_u8()?;
        let topology = match reader.read_u8()? {
            0 => None,
            1 => Some(TopologyUpdate::read_from(reader)?),
            other => {
                return Err(DecodeError::Malformed(format!(
                    "invalid topology change marker {}",
                    other
                )))
            }
        };
        Ok(Self {
            message_id,
            opcode,
            status,
            topology,
        })
    }

    /// Encodes the header.
    pub fn write_to<B: BufMut>(&self, dst: &mut B) {
        dst.put_u8(RESPONSE_MAGIC);
        dst.put_vlong(self.message_id as i64);
        dst.put_u8(self.opcode);
        dst.put_u8(self.status);
        match &self.topology {
            Some(topology) => {
                dst.put_u8(1);
                topology.write_to(dst);
            }
            None => dst.put_u8(0),
        }
    }

    /// Checks that this header answers `message_id` with `expected_opcode`.
    ///
    /// Error responses are not handled here; their message lives in the body.
    pub fn validate(&self, message_id: u64, expected_opcode: u8) -> Result<()> {
        if self.message_id != message_id {
            return Err(HotRodError::Protocol(format!(
                "invalid message id: expected {} but received {}",
                message_id, self.message_id
            )));
        }
        if self.opcode != expected_opcode {
            return Err(HotRodError::Protocol(format!(
                "invalid response opcode: expected 0x{:02X} but received 0x{:02X}",
                expected_opcode, self.opcode
            )));
        }
        Ok(())
    }
}

/// Reads a response header and checks it against the request just sent.
///
/// The topology frame, if any, is consumed before any check fails so the
/// reader is never left in the middle of it. An error opcode turns into the
/// typed error carrying the server's status and message.
pub fn read_header_and_validate(
    reader: &mut WireReader<'_>,
    message_id: u64,
    expected_opcode: u8,
) -> Result<ResponseHeader> {
    let header = ResponseHeader::read_from(reader)?;
    if header.opcode == ERROR_RESPONSE {
        let message = reader.read_string()?;
        return Err(HotRodError::from_status(header.status, message));
    }
    header.validate(message_id, expected_opcode)?;
    Ok(header)
}
