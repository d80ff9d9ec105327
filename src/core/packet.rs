//! # Packet
//!
//! The protocol's binary envelope and its exact wire layout.
//!
//! ```text
//! [Type(4)] [TTL(1)] [Src(1)] [Dst(1)] [ChainLen(1)] [Chain(n)] [PayloadLen(2)] [Payload(m)]
//! ```
//!
//! Multi-byte integers are big-endian. The whole encoded packet never exceeds
//! [`MAX_PACKET_SIZE`]; encoding checks the limit before writing a single byte, so an
//! oversized send fails without touching the socket.

use bytes::{Buf, BufMut, BytesMut};
use std::fmt;

use crate::error::{constants, ProtocolError, Result};

/// Node identifier as carried on the wire.
pub type NodeId = u8;

/// Canonical 4-byte packet type tag.
pub type TypeTag = [u8; TYPE_SIZE];

/// Size of the packet type tag
pub const TYPE_SIZE: usize = 4;

/// Maximum size of an encoded packet, header included
pub const MAX_PACKET_SIZE: usize = 1024;

/// Hop budget given to freshly originated packets
pub const DEFAULT_TTL: u8 = 16;

/// Largest resend chain a packet can carry
pub const MAX_RESEND_CHAIN: usize = u8::MAX as usize;

/// Type, ttl, source, destination and chain length
pub const FIXED_HEADER_SIZE: usize = TYPE_SIZE + 4;

/// Size of the payload length prefix
pub const PAYLOAD_LEN_SIZE: usize = 2;

/// Bytes every packet spends outside its resend chain and payload
pub const PACKET_OVERHEAD: usize = FIXED_HEADER_SIZE + PAYLOAD_LEN_SIZE;

/// Normalize a user supplied tag to exactly four bytes.
///
/// Shorter tags are padded with `0x00`, longer tags are truncated. Every registry lookup
/// uses this canonical form.
pub fn format_type(tag: &str) -> TypeTag {
    let mut out = [0u8; TYPE_SIZE];
    for (slot, byte) in out.iter_mut().zip(tag.as_bytes()) {
        *slot = *byte;
    }
    out
}

/// Render a tag for logs, dropping the zero padding.
pub fn type_name(tag: &TypeTag) -> String {
    let end = tag.iter().position(|b| *b == 0).unwrap_or(TYPE_SIZE);
    String::from_utf8_lossy(&tag[..end]).into_owned()
}

#[derive(Clone, PartialEq, Eq)]
pub struct Packet {
    pub packet_type: TypeTag,
    pub ttl: u8,
    pub source: NodeId,
    pub destination: NodeId,
    /// Every node that transmitted this packet, starting with the source
    pub resend_chain: Vec<NodeId>,
    pub payload: Vec<u8>,
}

impl Packet {
    /// Build a packet with the default hop budget and `[source]` as resend chain.
    pub fn new(packet_type: TypeTag, source: NodeId, destination: NodeId, payload: Vec<u8>) -> Self {
        Self {
            packet_type,
            ttl: DEFAULT_TTL,
            source,
            destination,
            resend_chain: vec![source],
            payload,
        }
    }

    /// Build a packet ready for its first link.
    ///
    /// The originating transmission consumes one hop, so the packet leaves the source
    /// with `ttl - 1`.
    pub fn originate(
        packet_type: TypeTag,
        ttl: u8,
        source: NodeId,
        destination: NodeId,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            packet_type,
            ttl: ttl.saturating_sub(1),
            source,
            destination,
            resend_chain: vec![source],
            payload,
        }
    }

    /// Size of the packet once encoded.
    pub fn encoded_len(&self) -> usize {
        PACKET_OVERHEAD + self.resend_chain.len() + self.payload.len()
    }

    /// Check the size invariants without encoding.
    pub fn validate(&self) -> Result<()> {
        if self.resend_chain.len() > MAX_RESEND_CHAIN {
            return Err(ProtocolError::ResendChainOverflow(self.resend_chain.len()));
        }
        let size = self.encoded_len();
        if size > MAX_PACKET_SIZE {
            return Err(ProtocolError::OversizedPacket(size));
        }
        Ok(())
    }

    /// Mutate the packet for re-transmission by an intermediate node.
    ///
    /// A packet that would reach zero hops is left untouched and reported as
    /// [`ProtocolError::TtlExpired`].
    pub fn prepare_forward(&mut self, via: NodeId) -> Result<()> {
        if self.ttl <= 1 {
            return Err(ProtocolError::TtlExpired);
        }
        if self.resend_chain.len() >= MAX_RESEND_CHAIN {
            return Err(ProtocolError::ResendChainOverflow(self.resend_chain.len() + 1));
        }
        self.resend_chain.push(via);
        self.ttl -= 1;
        Ok(())
    }

    /// Whether the node already transmitted this packet.
    pub fn visited(&self, node: NodeId) -> bool {
        self.resend_chain.contains(&node)
    }

    /// Tag without padding, for logs.
    pub fn type_name(&self) -> String {
        type_name(&self.packet_type)
    }

    /// Append the encoded packet to `dst`.
    pub fn encode_into(&self, dst: &mut BytesMut) -> Result<()> {
        self.validate()?;
        dst.reserve(self.encoded_len());
        dst.put_slice(&self.packet_type);
        dst.put_u8(self.ttl);
        dst.put_u8(self.source);
        dst.put_u8(self.destination);
        dst.put_u8(self.resend_chain.len() as u8);
        dst.put_slice(&self.resend_chain);
        dst.put_u16(self.payload.len() as u16);
        dst.put_slice(&self.payload);
        Ok(())
    }

    /// Serialize the packet.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf)?;
        Ok(buf.to_vec())
    }

    /// Deserialize exactly one packet; the buffer must hold nothing else.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > MAX_PACKET_SIZE {
            return Err(ProtocolError::OversizedPacket(bytes.len()));
        }
        let mut buf = bytes;

        if buf.remaining() < FIXED_HEADER_SIZE {
            return Err(ProtocolError::Decode(constants::ERR_TRUNCATED_HEADER.into()));
        }
        let mut packet_type = [0u8; TYPE_SIZE];
        buf.copy_to_slice(&mut packet_type);
        let ttl = buf.get_u8();
        let source = buf.get_u8();
        let destination = buf.get_u8();
        let chain_len = buf.get_u8() as usize;

        if buf.remaining() < chain_len {
            return Err(ProtocolError::Decode(constants::ERR_TRUNCATED_CHAIN.into()));
        }
        let resend_chain = buf[..chain_len].to_vec();
        buf.advance(chain_len);

        if buf.remaining() < PAYLOAD_LEN_SIZE {
            return Err(ProtocolError::Decode(constants::ERR_TRUNCATED_HEADER.into()));
        }
        let payload_len = buf.get_u16() as usize;
        if buf.remaining() < payload_len {
            return Err(ProtocolError::Decode(constants::ERR_TRUNCATED_PAYLOAD.into()));
        }
        let payload = buf[..payload_len].to_vec();
        buf.advance(payload_len);

        if buf.has_remaining() {
            return Err(ProtocolError::Decode(constants::ERR_TRAILING_BYTES.into()));
        }

        Ok(Self {
            packet_type,
            ttl,
            source,
            destination,
            resend_chain,
            payload,
        })
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("type", &self.type_name())
            .field("ttl", &self.ttl)
            .field("source", &self.source)
            .field("destination", &self.destination)
            .field("resend_chain", &self.resend_chain)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample() -> Packet {
        Packet {
            packet_type: format_type("DATA"),
            ttl: 9,
            source: 1,
            destination: 3,
            resend_chain: vec![1, 2],
            payload: vec![0xDE, 0xAD, 0xBE, 0xEF],
        }
    }

    #[test]
    fn test_format_type_lengths() {
        assert_eq!(format_type("A"), [b'A', 0, 0, 0]);
        assert_eq!(format_type("AB"), [b'A', b'B', 0, 0]);
        assert_eq!(format_type("ABCD"), *b"ABCD");
        assert_eq!(format_type("ABCDE"), *b"ABCD");
        assert_eq!(format_type(""), [0u8; 4]);
    }

    #[test]
    fn test_type_name_strips_padding() {
        assert_eq!(type_name(&format_type("AC")), "AC");
        assert_eq!(type_name(b"HELO"), "HELO");
    }

    #[test]
    fn test_exact_layout() {
        let bytes = sample().to_bytes().unwrap();
        assert_eq!(
            bytes,
            vec![b'D', b'A', b'T', b'A', 9, 1, 3, 2, 1, 2, 0x00, 0x04, 0xDE, 0xAD, 0xBE, 0xEF]
        );
    }

    #[test]
    fn test_roundtrip() {
        let packet = sample();
        let decoded = Packet::from_bytes(&packet.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_truncation_rejected_at_every_length() {
        let bytes = sample().to_bytes().unwrap();
        for cut in 0..bytes.len() {
            let result = Packet::from_bytes(&bytes[..cut]);
            assert!(matches!(result, Err(ProtocolError::Decode(_))), "cut at {cut}");
        }
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = sample().to_bytes().unwrap();
        bytes.push(0);
        assert!(matches!(Packet::from_bytes(&bytes), Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn test_oversized_encode_fails() {
        let mut packet = sample();
        packet.payload = vec![0; MAX_PACKET_SIZE];
        assert!(matches!(packet.to_bytes(), Err(ProtocolError::OversizedPacket(_))));
    }

    #[test]
    fn test_largest_packet_fits() {
        let mut packet = Packet::new(format_type("BIG"), 1, 2, vec![]);
        packet.payload = vec![7; MAX_PACKET_SIZE - PACKET_OVERHEAD - 1];
        assert_eq!(packet.to_bytes().unwrap().len(), MAX_PACKET_SIZE);
    }

    #[test]
    fn test_originate_charges_first_hop() {
        let packet = Packet::originate(format_type("DATA"), DEFAULT_TTL, 1, 3, vec![]);
        assert_eq!(packet.ttl, 15);
        assert_eq!(packet.resend_chain, vec![1]);
    }

    #[test]
    fn test_prepare_forward_with_budget() {
        let mut packet = sample();
        packet.ttl = 2;
        packet.prepare_forward(5).unwrap();
        assert_eq!(packet.ttl, 1);
        assert_eq!(packet.resend_chain, vec![1, 2, 5]);
    }

    #[test]
    fn test_prepare_forward_at_last_hop_leaves_packet_untouched() {
        let mut packet = sample();
        packet.ttl = 1;
        let before = packet.clone();
        assert!(matches!(packet.prepare_forward(5), Err(ProtocolError::TtlExpired)));
        assert_eq!(packet, before);
    }

    #[test]
    fn test_full_chain_cannot_grow() {
        let mut packet = sample();
        packet.resend_chain = vec![0; MAX_RESEND_CHAIN];
        assert!(matches!(
            packet.prepare_forward(5),
            Err(ProtocolError::ResendChainOverflow(_))
        ));
    }
}
