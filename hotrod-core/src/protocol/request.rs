//! Request bodies.

use bytes::{BufMut, Bytes};

use super::constants::*;
use super::header::RequestHeader;
use super::wire::{DecodeError, DecodeResult, WireReader, WireWrite};

/// Expiration settings sent with writes, in whole seconds.
///
/// Zero means "never" unless the matching `FLAG_DEFAULT_*` flag asks the
/// server to apply its configured default instead.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Expiration {
    /// Seconds until the entry expires.
    pub lifespan: i32,
    /// Seconds of inactivity after which the entry expires.
    pub max_idle: i32,
}

impl Expiration {
    /// No expiration.
    pub const NONE: Expiration = Expiration {
        lifespan: 0,
        max_idle: 0,
    };

    fn write_to<B: BufMut>(&self, dst: &mut B) {
        dst.put_vint(self.lifespan);
        dst.put_vint(self.max_idle);
    }

    fn read_from(reader: &mut WireReader<'_>) -> DecodeResult<Self> {
        Ok(Self {
            lifespan: reader.read_vint()?,
            max_idle: reader.read_vint()?,
        })
    }
}

/// A single Hot Rod operation and its body.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Read a value.
    Get { key: Bytes },
    /// Store a value.
    Put { key: Bytes, value: Bytes, expiration: Expiration },
    /// Store unless present.
    PutIfAbsent { key: Bytes, value: Bytes, expiration: Expiration },
    /// Store only if present.
    Replace { key: Bytes, value: Bytes, expiration: Expiration },
    /// Store only if the version still matches.
    ReplaceIfUnmodified {
        key: Bytes,
        value: Bytes,
        version: i64,
        expiration: Expiration,
    },
    /// Remove a key.
    Remove { key: Bytes },
    /// Remove only if the version still matches.
    RemoveIfUnmodified { key: Bytes, version: i64 },
    /// Check presence.
    ContainsKey { key: Bytes },
    /// Read value and version.
    GetWithVersion { key: Bytes },
    /// Read value, version and expiration metadata.
    GetWithMetadata { key: Bytes },
    /// Remove everything.
    Clear,
    /// Server statistics.
    Stats,
    /// Liveness check.
    Ping,
    /// Entry count.
    Size,
    /// Register a listener whose events arrive on the same connection.
    AddClientListener {
        listener_id: Bytes,
        include_current_state: bool,
        filter_factory: String,
        converter_factory: String,
    },
    /// Unregister a listener.
    RemoveClientListener { listener_id: Bytes },
}

impl Request {
    /// Request opcode.
    pub fn opcode(&self) -> u8 {
        match self {
            Request::Get { .. } => GET_REQUEST,
            Request::Put { .. } => PUT_REQUEST,
            Request::PutIfAbsent { .. } => PUT_IF_ABSENT_REQUEST,
            Request::Replace { .. } => REPLACE_REQUEST,
            Request::ReplaceIfUnmodified { .. } => REPLACE_IF_UNMODIFIED_REQUEST,
            Request::Remove { .. } => REMOVE_REQUEST,
            Request::RemoveIfUnmodified { .. } => REMOVE_IF_UNMODIFIED_REQUEST,
            Request::ContainsKey { .. } => CONTAINS_KEY_REQUEST,
            Request::GetWithVersion { .. } => GET_WITH_VERSION_REQUEST,
            Request::GetWithMetadata { .. } => GET_WITH_METADATA_REQUEST,
            Request::Clear => CLEAR_REQUEST,
            Request::Stats => STATS_REQUEST,
            Request::Ping => PING_REQUEST,
            Request::Size => SIZE_REQUEST,
            Request::AddClientListener { .. } => ADD_CLIENT_LISTENER_REQUEST,
            Request::RemoveClientListener { .. } => REMOVE_CLIENT_LISTENER_REQUEST,
        }
    }

    /// Opcode the matching response carries.
    pub fn response_opcode(&self) -> u8 {
        self.opcode() + 1
    }

    /// Operation name, used in logs and metrics.
    pub fn name(&self) -> &'static str {
        match self {
            Request::Get { .. } => "get",
            Request::Put { .. } => "put",
            Request::PutIfAbsent { .. } => "put_if_absent",
            Request::Replace { .. } => "replace",
            Request::ReplaceIfUnmodified { .. } => "replace_with_version",
            Request::Remove { .. } => "remove",
            Request::RemoveIfUnmodified { .. } => "remove_with_version",
            Request::ContainsKey { .. } => "contains_key",
            Request::GetWithVersion { .. } => "get_with_version",
            Request::GetWithMetadata { .. } => "get_with_metadata",
            Request::Clear => "clear",
            Request::Stats => "stats",
            Request::Ping => "ping",
            Request::Size => "size",
            Request::AddClientListener { .. } => "add_client_listener",
            Request::RemoveClientListener { .. } => "remove_client_listener",
        }
    }

    /// The key a routed operation targets, if any.
    pub fn key(&self) -> Option<&Bytes> {
        match self {
            Request::Get { key }
            | Request::Put { key, .. }
            | Request::PutIfAbsent { key, .. }
            | Request::Replace { key, .. }
            | Request::ReplaceIfUnmodified { key, .. }
            | Request::Remove { key }
            | Request::RemoveIfUnmodified { key, .. }
            | Request::ContainsKey { key }
            | Request::GetWithVersion { key }
            | Request::GetWithMetadata { key } => Some(key),
            _ => None,
        }
    }

    /// Encodes the body that follows the header.
    pub fn write_body<B: BufMut>(&self, dst: &mut B) {
        match self {
            Request::Get { key }
            | Request::Remove { key }
            | Request::ContainsKey { key }
            | Request::GetWithVersion { key }
            | Request::GetWithMetadata { key } => dst.put_array(key),
            Request::Put {
                key,
                value,
                expiration,
            }
            | Request::PutIfAbsent {
                key,
                value,
                expiration,
            }
            | Request::Replace {
                key,
                value,
                expiration,
            } => {
                dst.put_array(key);
                expiration.write_to(dst);
                dst.put_array(value);
            }
            Request::ReplaceIfUnmodified {
                key,
                value,
                version,
                expiration,
            } => {
                dst.put_array(key);
                expiration.write_to(dst);
                dst.put_i64(*version);
                dst.put_array(value);
            }
            Request::RemoveIfUnmodified { key, version } => {
                dst.put_array(key);
                dst.put_i64(*version);
            }
            Request::Clear | Request::Stats | Request::Ping | Request::Size => {}
            Request::AddClientListener {
                listener_id,
                include_current_state,
                filter_factory,
                converter_factory,
            } => {
                dst.put_array(listener_id);
                dst.put_u8(u8::from(*include_current_state));
                dst.put_string(filter_factory);
                dst.put_string(converter_factory);
            }
            Request::RemoveClientListener { listener_id } => dst.put_array(listener_id),
        }
    }

    /// Decodes the body of a request with the given opcode.
    pub fn read_body(opcode: u8, reader: &mut WireReader<'_>) -> DecodeResult<Self> {
        let request = match opcode {
            GET_REQUEST => Request::Get {
                key: reader.read_array()?,
            },
            REMOVE_REQUEST => Request::Remove {
                key: reader.read_array()?,
            },
            CONTAINS_KEY_REQUEST => Request::ContainsKey {
                key: reader.read_array()?,
            },
            GET_WITH_VERSION_REQUEST => Request::GetWithVersion {
                key: reader.read_array()?,
            },
            GET_WITH_METADATA_REQUEST => Request::GetWithMetadata {
                key: reader.read_array()?,
            },
            PUT_REQUEST | PUT_IF_ABSENT_REQUEST | REPLACE_REQUEST => {
                let key = reader.read_array()?;
                let expiration = Expiration::read_from(reader)?;
                let value = reader.read_array()?;
                match opcode {
                    PUT_REQUEST => Request::Put {
                        key,
                        value,
                        expiration,
                    },
                    PUT_IF_ABSENT_REQUEST => Request::PutIfAbsent {
                        key,
                        value,
                        expiration,
                    },
                    _ => Request::Replace {
                        key,
                        value,
                        expiration,
                    },
                }
            }
            REPLACE_IF_UNMODIFIED_REQUEST => {
                let key = reader.read_array()?;
                let expiration = Expiration::read_from(reader)?;
                let version = reader.read_i64()?;
                let value = reader.read_array()?;
                Request::ReplaceIfUnmodified {
                    key,
                    value,
                    version,
                    expiration,
                }
            }
            REMOVE_IF_UNMODIFIED_REQUEST => Request::RemoveIfUnmodified {
                key: reader.read_array()?,
                version: reader.read_i64()?,
            },
            CLEAR_REQUEST => Request::Clear,
            STATS_REQUEST => Request::Stats,
            PING_REQUEST => Request::Ping,
            SIZE_REQUEST => Request::Size,
            ADD_CLIENT_LISTENER_REQUEST => Request::AddClientListener {
                listener_id: reader.read_array()?,
                include_current_state: reader.read_u8()? != 0,
                filter_factory: reader.read_string()?,
                converter_factory: reader.read_string()?,
            },
            REMOVE_CLIENT_LISTENER_REQUEST => Request::RemoveClientListener {
                listener_id: reader.read_array()?,
            },
            other => {
                return Err(DecodeError::Malformed(format!(
                    "unknown request opcode 0x{:02X}",
                    other
                )))
            }
        };
        Ok(request)
    }
}

/// A request ready to be written: header plus body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFrame {
    /// The request header.
    pub header: RequestHeader,
    /// The operation.
    pub request: Request,
}

impl RequestFrame {
    /// Encodes header and body.
    pub fn write_to<B: BufMut>(&self, dst: &mut B) {
        self.header.write_to(dst);
        self.request.write_body(dst);
    }

    /// Decodes a whole request frame.
    pub fn read_from(reader: &mut WireReader<'_>) -> DecodeResult<Self> {
        let header = RequestHeader::read_from(reader)?;
        let request = Request::read_body(header.opcode, reader)?;
        Ok(Self { header, request })
    }
}
