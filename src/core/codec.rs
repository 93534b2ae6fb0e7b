//! Length-prefixed frame codec.
//!
//! Every frame is a 4-byte big-endian length followed by exactly that many bytes.
//! The codec round-trips any body, including an empty one; interpreting an empty
//! body as a heartbeat is the reader's job.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::config::MAX_FRAME_SIZE;
use crate::error::{ClientError, Result};

/// Size of the length prefix in bytes
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Write `body` as a single frame into `dst`.
pub fn encode_frame(body: &[u8], dst: &mut BytesMut) -> Result<()> {
    let len = u32::try_from(body.len()).map_err(|_| ClientError::OversizedFrame(body.len()))?;
    dst.reserve(LENGTH_PREFIX_SIZE + body.len());
    dst.put_u32(len);
    dst.extend_from_slice(body);
    Ok(())
}

/// Take one complete frame body off the front of `src`.
///
/// Returns `Ok(None)` and leaves `src` untouched while the frame is incomplete.
pub fn decode_frame(src: &mut BytesMut, max_frame_size: usize) -> Result<Option<BytesMut>> {
    if src.len() < LENGTH_PREFIX_SIZE {
        return Ok(None);
    }

    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    prefix.copy_from_slice(&src[..LENGTH_PREFIX_SIZE]);
    let len = u32::from_be_bytes(prefix) as usize;

    if len > max_frame_size {
        return Err(ClientError::OversizedFrame(len));
    }

    if src.len() < LENGTH_PREFIX_SIZE + len {
        src.reserve(LENGTH_PREFIX_SIZE + len - src.len());
        return Ok(None);
    }

    src.advance(LENGTH_PREFIX_SIZE);
    Ok(Some(src.split_to(len)))
}

/// Tokio codec for length-prefixed frames
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
    type Error = ClientError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        decode_frame(src, self.max_frame_size)
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = ClientError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<()> {
        if item.len() > self.max_frame_size {
            return Err(ClientError::OversizedFrame(item.len()));
        }
        encode_frame(&item, dst)
    }
}
