//! Hot Rod wire protocol: scalars, headers, bodies and codecs.

pub mod codec;
pub mod constants;
pub mod header;
pub mod request;
pub mod response;
pub mod topology;
pub mod wire;

pub use codec::{HotRodCodec, ServerCodec};
pub use header::{
    read_header_and_validate, write_header, MessageIdGenerator, RequestHeader, ResponseHeader,
};
pub use request::{Expiration, Request, RequestFrame};
pub use response::{
    CacheEvent, CacheEventKind, MetadataValue, Response, ResponseBody, VersionedValue,
};
pub use topology::{ServerHash, TopologyUpdate};
pub use wire::{DecodeError, WireReader, WireWrite};
