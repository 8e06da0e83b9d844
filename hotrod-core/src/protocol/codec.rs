//! `tokio_util` codecs for Hot Rod framing.
//!
//! Hot Rod frames carry no length prefix, so decoding parses the frame in
//! place and only consumes the buffer once a whole frame is available.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::request::RequestFrame;
use super::response::Response;
use super::wire::{DecodeError, WireReader};
use crate::error::{HotRodError, Result};

/// Default upper bound on a buffered, still incomplete frame.
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 64 * 1024 * 1024;

fn decode_with<T>(
    src: &mut BytesMut,
    max_frame_length: usize,
    read: impl FnOnce(&mut WireReader<'_>) -> std::result::Result<T, DecodeError>,
) -> Result<Option<T>> {
    if src.is_empty() {
        return Ok(None);
    }
    let mut reader = WireReader::new(&src[..]);
    match read(&mut reader) {
        Ok(item) => {
            let consumed = reader.position();
            src.advance(consumed);
            Ok(Some(item))
        }
        Err(DecodeError::Incomplete) => {
            if src.len() > max_frame_length {
                return Err(HotRodError::Protocol(format!(
                    "frame exceeds {} bytes",
                    max_frame_length
                )));
            }
            Ok(None)
        }
        Err(DecodeError::Malformed(msg)) => Err(HotRodError::Protocol(msg)),
    }
}

/// Client side codec: writes requests, reads responses and events.
#[derive(Debug)]
pub struct HotRodCodec {
    max_frame_length: usize,
}

impl HotRodCodec {
    /// Creates a codec with the default frame limit.
    pub fn new() -> Self {
        Self {
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
        }
    }

    /// Creates a codec that rejects incomplete frames above `max_frame_length`.
    pub fn with_max_frame_length(max_frame_length: usize) -> Self {
        Self { max_frame_length }
    }
}

impl Default for HotRodCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder<RequestFrame> for HotRodCodec {
    type Error = HotRodError;

    fn encode(&mut self, item: RequestFrame, dst: &mut BytesMut) -> Result<()> {
        item.write_to(dst);
        Ok(())
    }
}

impl Decoder for HotRodCodec {
    type Item = Response;
    type Error = HotRodError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        decode_with(src, self.max_frame_length, Response::read_from)
    }
}

/// Server side codec: reads requests, writes responses and events.
#[derive(Debug)]
pub struct ServerCodec {
    max_frame_length: usize,
}

impl ServerCodec {
    /// Creates a codec with the default frame limit.
    pub fn new() -> Self {
        Self {
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
        }
    }
}

impl Default for ServerCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder<Response> for ServerCodec {
    type Error = HotRodError;

    fn encode(&mut self, item: Response, dst: &mut BytesMut) -> Result<()> {
        item.write_to(dst);
        Ok(())
    }
}

impl Decoder for ServerCodec {
    type Item = RequestFrame;
    type Error = HotRodError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        decode_with(src, self.max_frame_length, RequestFrame::read_from)
    }
}
