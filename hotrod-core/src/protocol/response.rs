//! Response bodies and server-pushed events.

use bytes::{BufMut, Bytes};

use super::constants::*;
use super::header::ResponseHeader;
use super::wire::{DecodeError, DecodeResult, WireReader, WireWrite};
use crate::error::{HotRodError, Result};

/// A value together with the version stamp the server assigned to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedValue {
    /// The stored bytes.
    pub value: Bytes,
    /// Opaque per-write stamp; only ever compared for equality.
    pub version: i64,
}

/// A value with version and expiration metadata.
///
/// Timestamps are milliseconds since the epoch; `-1` marks a missing field
/// (immortal entry or no idle expiration).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataValue {
    /// The stored bytes.
    pub value: Bytes,
    /// Opaque per-write stamp.
    pub version: i64,
    /// Creation time, `-1` when the entry has no lifespan.
    pub created: i64,
    /// Lifespan in seconds, `-1` when immortal.
    pub lifespan: i32,
    /// Last access time, `-1` when the entry has no max idle.
    pub last_used: i64,
    /// Max idle in seconds, `-1` when unset.
    pub max_idle: i32,
}

impl MetadataValue {
    const INFINITE_LIFESPAN: u8 = 0x01;
    const INFINITE_MAXIDLE: u8 = 0x02;

    fn read_from(reader: &mut WireReader<'_>) -> DecodeResult<Self> {
        let flags = reader.read_u8()?;
        let (created, lifespan) = if flags & Self::INFINITE_LIFESPAN == 0 {
            (reader.read_i64()?, reader.read_vint()?)
        } else {
            (-1, -1)
        };
        let (last_used, max_idle) = if flags & Self::INFINITE_MAXIDLE == 0 {
            (reader.read_i64()?, reader.read_vint()?)
        } else {
            (-1, -1)
        };
        let version = reader.read_i64()?;
        let value = reader.read_array()?;
        Ok(Self {
            value,
            version,
            created,
            lifespan,
            last_used,
            max_idle,
        })
    }

    fn write_to<B: BufMut>(&self, dst: &mut B) {
        let mut flags = 0;
        if self.lifespan < 0 {
            flags |= Self::INFINITE_LIFESPAN;
        }
        if self.max_idle < 0 {
            flags |= Self::INFINITE_MAXIDLE;
        }
        dst.put_u8(flags);
        if self.lifespan >= 0 {
            dst.put_i64(self.created);
            dst.put_vint(self.lifespan);
        }
        if self.max_idle >= 0 {
            dst.put_i64(self.last_used);
            dst.put_vint(self.max_idle);
        }
        dst.put_i64(self.version);
        dst.put_array(&self.value);
    }
}

/// Kind of cache entry event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheEventKind {
    /// An entry was created.
    Created,
    /// An entry was modified.
    Modified,
    /// An entry was removed.
    Removed,
    /// An entry expired.
    Expired,
}

impl CacheEventKind {
    /// Maps an event opcode.
    pub fn from_opcode(opcode: u8) -> Option<Self> {
        match opcode {
            CACHE_ENTRY_CREATED_EVENT => Some(CacheEventKind::Created),
            CACHE_ENTRY_MODIFIED_EVENT => Some(CacheEventKind::Modified),
            CACHE_ENTRY_REMOVED_EVENT => Some(CacheEventKind::Removed),
            CACHE_ENTRY_EXPIRED_EVENT => Some(CacheEventKind::Expired),
            _ => None,
        }
    }

    /// The opcode carrying this kind.
    pub fn opcode(&self) -> u8 {
        match self {
            CacheEventKind::Created => CACHE_ENTRY_CREATED_EVENT,
            CacheEventKind::Modified => CACHE_ENTRY_MODIFIED_EVENT,
            CacheEventKind::Removed => CACHE_ENTRY_REMOVED_EVENT,
            CacheEventKind::Expired => CACHE_ENTRY_EXPIRED_EVENT,
        }
    }
}

/// A cache entry event pushed by the server to a registered listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEvent {
    /// Listener the event is addressed to.
    pub listener_id: Bytes,
    /// What happened.
    pub kind: CacheEventKind,
    /// Affected key; empty for custom events.
    pub key: Bytes,
    /// New version, carried by created and modified events.
    pub version: Option<i64>,
    /// Set when the server may have delivered the event before.
    pub is_retried: bool,
    /// Payload of a converted (custom) event.
    pub custom_data: Option<Bytes>,
}

impl CacheEvent {
    fn read_from(kind: CacheEventKind, reader: &mut WireReader<'_>) -> DecodeResult<Self> {
        let listener_id = reader.read_array()?;
        let is_custom = reader.read_u8()?;
        let is_retried = reader.read_u8()? == 1;

        if is_custom != 0 {
            return Ok(Self {
                listener_id,
                kind,
                key: Bytes::new(),
                version: None,
                is_retried,
                custom_data: Some(reader.read_array()?),
            });
        }

        let key = reader.read_array()?;
        let version = match kind {
            CacheEventKind::Created | CacheEventKind::Modified => Some(reader.read_i64()?),
            CacheEventKind::Removed | CacheEventKind::Expired => None,
        };
        Ok(Self {
            listener_id,
            kind,
            key,
            version,
            is_retried,
            custom_data: None,
        })
    }

    fn write_to<B: BufMut>(&self, dst: &mut B) {
        dst.put_array(&self.listener_id);
        match &self.custom_data {
            Some(data) => {
                dst.put_u8(1);
                dst.put_u8(u8::from(self.is_retried));
                dst.put_array(data);
            }
            None => {
                dst.put_u8(0);
                dst.put_u8(u8::from(self.is_retried));
                dst.put_array(&self.key);
                if let Some(version) = self.version {
                    dst.put_i64(version);
                }
            }
        }
    }
}

/// Decoded response body. The shape follows from opcode and status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseBody {
    /// Status only.
    Empty,
    /// Result of a get: `None` when the key does not exist.
    Value(Option<Bytes>),
    /// Previous value returned by a write with force-return-value.
    Previous(Option<Bytes>),
    /// Result of a get-with-version hit.
    Versioned(VersionedValue),
    /// Result of a get-with-metadata hit.
    Metadata(MetadataValue),
    /// Server statistics as name/value pairs.
    Stats(Vec<(String, String)>),
    /// Entry count.
    Size(u64),
    /// Message of an error response.
    Error(String),
    /// A server-pushed event.
    Event(CacheEvent),
}

/// A complete response or event frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Header, including any topology frame.
    pub header: ResponseHeader,
    /// Body.
    pub body: ResponseBody,
}

impl Response {
    /// Decodes a whole response frame.
    pub fn read_from(reader: &mut WireReader<'_>) -> DecodeResult<Self> {
        let header = ResponseHeader::read_from(reader)?;
        let body = read_body(&header, reader)?;
        Ok(Self { header, body })
    }

    /// Encodes the frame. Used by servers and tests.
    pub fn write_to<B: BufMut>(&self, dst: &mut B) {
        self.header.write_to(dst);
        match &self.body {
            ResponseBody::Empty => {}
            ResponseBody::Value(value) => {
                if let Some(value) = value {
                    dst.put_array(value);
                }
            }
            ResponseBody::Previous(value) => {
                dst.put_array(value.as_deref().unwrap_or_default());
            }
            ResponseBody::Versioned(v) => {
                dst.put_i64(v.version);
                dst.put_array(&v.value);
            }
            ResponseBody::Metadata(m) => m.write_to(dst),
            ResponseBody::Stats(stats) => {
                dst.put_vint(stats.len() as i32);
                for (name, value) in stats {
                    dst.put_string(name);
                    dst.put_string(value);
                }
            }
            ResponseBody::Size(size) => dst.put_vlong(*size as i64),
            ResponseBody::Error(message) => dst.put_string(message),
            ResponseBody::Event(event) => event.write_to(dst),
        }
    }

    /// Whether this frame is a server-pushed event rather than a response.
    pub fn is_event(&self) -> bool {
        matches!(self.body, ResponseBody::Event(_))
    }

    /// Status byte.
    pub fn status(&self) -> u8 {
        self.header.status
    }

    /// Checks the response against the request that produced it.
    ///
    /// Error statuses become typed errors and a status this client does not
    /// understand becomes [`HotRodError::IllegalState`].
    pub fn validate(self, message_id: u64, expected_opcode: u8) -> Result<Response> {
        if let ResponseBody::Error(message) = &self.body {
            return Err(HotRodError::from_status(self.header.status, message.clone()));
        }
        if is_error_status(self.header.status) {
            return Err(HotRodError::from_status(self.header.status, String::new()));
        }
        self.header.validate(message_id, expected_opcode)?;
        if self.header.status > NOT_EXECUTED_WITH_PREVIOUS {
            return Err(HotRodError::IllegalState(format!(
                "unknown response status 0x{:02X}",
                self.header.status
            )));
        }
        Ok(self)
    }
}

fn read_body(header: &ResponseHeader, reader: &mut WireReader<'_>) -> DecodeResult<ResponseBody> {
    let status = header.status;
    if header.opcode == ERROR_RESPONSE {
        return Ok(ResponseBody::Error(reader.read_string()?));
    }
    if let Some(kind) = CacheEventKind::from_opcode(header.opcode) {
        return Ok(ResponseBody::Event(CacheEvent::read_from(kind, reader)?));
    }
    if is_error_status(status) {
        return Ok(ResponseBody::Empty);
    }

    let body = match header.opcode {
        GET_RESPONSE => {
            if status == NO_ERROR_STATUS {
                ResponseBody::Value(Some(reader.read_array()?))
            } else {
                ResponseBody::Value(None)
            }
        }
        PUT_RESPONSE
        | PUT_IF_ABSENT_RESPONSE
        | REPLACE_RESPONSE
        | REMOVE_RESPONSE
        | REPLACE_IF_UNMODIFIED_RESPONSE
        | REMOVE_IF_UNMODIFIED_RESPONSE => {
            if has_previous_value(status) {
                ResponseBody::Previous(reader.read_optional_array()?)
            } else {
                ResponseBody::Empty
            }
        }
        GET_WITH_VERSION_RESPONSE if status == NO_ERROR_STATUS => {
            let version = reader.read_i64()?;
            let value = reader.read_array()?;
            ResponseBody::Versioned(VersionedValue { value, version })
        }
        GET_WITH_METADATA_RESPONSE if status == NO_ERROR_STATUS => {
            ResponseBody::Metadata(MetadataValue::read_from(reader)?)
        }
        STATS_RESPONSE => {
            let count = reader.read_vint()?;
            if count < 0 {
                return Err(DecodeError::Malformed(format!(
                    "negative stats count {}",
                    count
                )));
            }
            let mut stats = Vec::with_capacity((count as usize).min(256));
            for _ in 0..count {
                let name = reader.read_string()?;
                let value = reader.read_string()?;
                stats.push((name, value));
            }
            ResponseBody::Stats(stats)
        }
        SIZE_RESPONSE => ResponseBody::Size(reader.read_vlong()? as u64),
        _ => ResponseBody::Empty,
    };
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn encode(response: &Response) -> BytesMut {
        let mut buf = BytesMut::new();
        response.write_to(&mut buf);
        buf
    }

    fn response(message_id: u64, opcode: u8, status: u8, body: ResponseBody) -> Response {
        Response {
            header: ResponseHeader {
                message_id,
                opcode,
                status,
                topology: None,
            },
            body,
        }
    }

    #[test]
    fn test_get_hit_and_miss() {
        let hit = response(
            1,
            GET_RESPONSE,
            NO_ERROR_STATUS,
            ResponseBody::Value(Some(Bytes::from_static(b"v"))),
        );
        let miss = response(2, GET_RESPONSE, KEY_DOES_NOT_EXIST_STATUS, ResponseBody::Value(None));
        for r in [hit, miss] {
            let buf = encode(&r);
            let mut reader = WireReader::new(&buf);
            assert_eq!(Response::read_from(&mut reader).unwrap(), r);
            assert_eq!(reader.remaining(), 0);
        }
    }

    #[test]
    fn test_previous_value_only_with_status() {
        let with = response(
            3,
            PUT_RESPONSE,
            SUCCESS_WITH_PREVIOUS,
            ResponseBody::Previous(Some(Bytes::from_static(b"old"))),
        );
        let buf = encode(&with);
        assert_eq!(Response::read_from(&mut WireReader::new(&buf)).unwrap(), with);

        let without = response(4, PUT_RESPONSE, NO_ERROR_STATUS, ResponseBody::Empty);
        let buf = encode(&without);
        assert_eq!(
            Response::read_from(&mut WireReader::new(&buf)).unwrap().body,
            ResponseBody::Empty
        );
    }

    #[test]
    fn test_metadata_immortal_skips_timestamps() {
        let meta = MetadataValue {
            value: Bytes::from_static(b"v"),
            version: 99,
            created: -1,
            lifespan: -1,
            last_used: -1,
            max_idle: -1,
        };
        let r = response(
            5,
            GET_WITH_METADATA_RESPONSE,
            NO_ERROR_STATUS,
            ResponseBody::Metadata(meta),
        );
        let buf = encode(&r);
        // header (5 bytes) + flags + version (8) + array (2)
        assert_eq!(buf.len(), 5 + 1 + 8 + 2);
        assert_eq!(Response::read_from(&mut WireReader::new(&buf)).unwrap(), r);
    }

    #[test]
    fn test_metadata_with_expiration() {
        let meta = MetadataValue {
            value: Bytes::from_static(b"v"),
            version: 1,
            created: 1_700_000_000_000,
            lifespan: 60,
            last_used: 1_700_000_001_000,
            max_idle: 30,
        };
        let r = response(
            6,
            GET_WITH_METADATA_RESPONSE,
            NO_ERROR_STATUS,
            ResponseBody::Metadata(meta),
        );
        let buf = encode(&r);
        assert_eq!(Response::read_from(&mut WireReader::new(&buf)).unwrap(), r);
    }

    #[test]
    fn test_events() {
        let created = CacheEvent {
            listener_id: Bytes::from_static(b"L1"),
            kind: CacheEventKind::Created,
            key: Bytes::from_static(b"k"),
            version: Some(12),
            is_retried: false,
            custom_data: None,
        };
        let removed = CacheEvent {
            kind: CacheEventKind::Removed,
            version: None,
            is_retried: true,
            ..created.clone()
        };
        for event in [created, removed] {
            let r = response(0, event.kind.opcode(), NO_ERROR_STATUS, ResponseBody::Event(event));
            let buf = encode(&r);
            let decoded = Response::read_from(&mut WireReader::new(&buf)).unwrap();
            assert!(decoded.is_event());
            assert_eq!(decoded, r);
        }
    }

    #[test]
    fn test_stats_and_size() {
        let stats = response(
            7,
            STATS_RESPONSE,
            NO_ERROR_STATUS,
            ResponseBody::Stats(vec![("hits".into(), "3".into()), ("misses".into(), "1".into())]),
        );
        let size = response(8, SIZE_RESPONSE, NO_ERROR_STATUS, ResponseBody::Size(1 << 40));
        for r in [stats, size] {
            let buf = encode(&r);
            assert_eq!(Response::read_from(&mut WireReader::new(&buf)).unwrap(), r);
        }
    }

    #[test]
    fn test_validate_error_response() {
        let r = response(
            9,
            ERROR_RESPONSE,
            COMMAND_TIMEOUT_STATUS,
            ResponseBody::Error("slow".into()),
        );
        let err = r.validate(9, GET_RESPONSE).unwrap_err();
        assert!(matches!(err, HotRodError::CommandTimeout(_)));
    }

    #[test]
    fn test_validate_unknown_status() {
        let r = response(9, PING_RESPONSE, 0x10, ResponseBody::Empty);
        let err = r.validate(9, PING_RESPONSE).unwrap_err();
        assert!(matches!(err, HotRodError::IllegalState(_)));
    }

    #[test]
    fn test_validate_key_missing_is_not_error() {
        let r = response(9, GET_RESPONSE, KEY_DOES_NOT_EXIST_STATUS, ResponseBody::Value(None));
        assert!(r.validate(9, GET_RESPONSE).is_ok());
    }

    #[test]
    fn test_truncated_body_is_incomplete() {
        let r = response(
            1,
            GET_WITH_VERSION_RESPONSE,
            NO_ERROR_STATUS,
            ResponseBody::Versioned(VersionedValue {
                value: Bytes::from_static(b"value"),
                version: 3,
            }),
        );
        let buf = encode(&r);
        let mut reader = WireReader::new(&buf[..buf.len() - 2]);
        assert_eq!(Response::read_from(&mut reader), Err(DecodeError::Incomplete));
    }
}
