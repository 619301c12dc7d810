//! `len:u32 (big-endian) || msgpack_map` framing, per spec.md §6.
//!
//! Mirrors `VSPProtocol.data_received`'s buffer-and-drain loop from
//! `velithon/vsp/protocol.py`, expressed as a `tokio_util::codec` pair so
//! the connection loop can drive it with `Framed`.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::message::{VspError, VspMessage, MAX_FRAME_LEN};

const LEN_PREFIX: usize = 4;

#[derive(Debug, Default)]
pub struct VspCodec;

impl Decoder for VspCodec {
    type Item = VspMessage;
    type Error = VspError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LEN_PREFIX {
            return Ok(None);
        }
        let len = u32::from_be_bytes(src[..LEN_PREFIX].try_into().unwrap());
        if len > MAX_FRAME_LEN {
            return Err(VspError::FrameTooLarge(len));
        }
        let total = LEN_PREFIX + len as usize;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }
        src.advance(LEN_PREFIX);
        let frame = src.split_to(len as usize);
        Ok(Some(VspMessage::from_bytes(&frame)?))
    }
}

impl Encoder<VspMessage> for VspCodec {
    type Error = VspError;

    fn encode(&mut self, item: VspMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = item.to_bytes()?;
        if body.len() as u64 > MAX_FRAME_LEN as u64 {
            return Err(VspError::FrameTooLarge(body.len() as u32));
        }
        dst.reserve(LEN_PREFIX + body.len());
        dst.put_u32(body.len() as u32);
        dst.put_slice(&body);
        Ok(())
    }
}
