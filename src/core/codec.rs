//! Stream framing for [`Packet`]s.
//!
//! The wire format carries no outer length prefix, so the decoder walks the header to
//! learn how many bytes the packet occupies and waits until all of them are buffered.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::core::packet::{Packet, FIXED_HEADER_SIZE, MAX_PACKET_SIZE, PAYLOAD_LEN_SIZE};
use crate::error::{ProtocolError, Result};

/// Tokio codec reading and writing one [`Packet`] per frame.
#[derive(Debug, Default, Clone, Copy)]
pub struct PacketCodec;

impl PacketCodec {
    /// Total frame length if enough of the header is buffered to know it.
    fn frame_len(src: &BytesMut) -> Option<usize> {
        if src.len() < FIXED_HEADER_SIZE {
            return None;
        }
        let chain_len = src[FIXED_HEADER_SIZE - 1] as usize;
        let len_at = FIXED_HEADER_SIZE + chain_len;
        if src.len() < len_at + PAYLOAD_LEN_SIZE {
            return None;
        }
        let payload_len = u16::from_be_bytes([src[len_at], src[len_at + 1]]) as usize;
        Some(len_at + PAYLOAD_LEN_SIZE + payload_len)
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>> {
        let Some(frame_len) = Self::frame_len(src) else {
            return Ok(None);
        };
        if frame_len > MAX_PACKET_SIZE {
            return Err(ProtocolError::OversizedPacket(frame_len));
        }
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        let frame = src.split_to(frame_len);
        let packet = Packet::from_bytes(&frame)?;
        Ok(Some(packet))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Packet>> {
        match self.decode(src)? {
            Some(packet) => Ok(Some(packet)),
            None if src.is_empty() => Ok(None),
            None => {
                let leftover = src.remaining();
                src.clear();
                Err(ProtocolError::Decode(format!(
                    "Connection closed with {leftover} bytes of a partial packet"
                )))
            }
        }
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<()> {
        item.encode_into(dst)
    }
}
