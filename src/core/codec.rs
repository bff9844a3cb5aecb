//! Tokio codec for the generic frame: `[length: u32 LE][body]`.
//!
//! Decoding yields the raw body; formatters are applied by the caller.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::config::MAX_FRAME_SIZE;
use crate::core::value::LENGTH_PREFIX_SIZE;
use crate::error::{constants, ProtocolError, Result};

#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(MAX_FRAME_SIZE)
    }
}

impl Decoder for FrameCodec {
    type Item = BytesMut;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        let len = u32::from_le_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if len > self.max_frame_size {
            return Err(ProtocolError::OversizedFrame(len));
        }

        let total = LENGTH_PREFIX_SIZE + len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX_SIZE);
        Ok(Some(src.split_to(len)))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(ProtocolError::Truncated {
                needed: if src.len() < LENGTH_PREFIX_SIZE {
                    LENGTH_PREFIX_SIZE
                } else {
                    LENGTH_PREFIX_SIZE
                        + u32::from_le_bytes([src[0], src[1], src[2], src[3]]) as usize
                },
                available: src.len(),
            }),
        }
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, body: Bytes, dst: &mut BytesMut) -> Result<()> {
        if body.len() > self.max_frame_size {
            return Err(ProtocolError::OversizedFrame(body.len()));
        }
        let len = u32::try_from(body.len())
            .map_err(|_| ProtocolError::Configuration(constants::ERR_LENGTH_OVERFLOW.to_string()))?;

        dst.reserve(LENGTH_PREFIX_SIZE + body.len());
        dst.put_u32_le(len);
        dst.extend_from_slice(&body);
        Ok(())
    }
}
