//! Wire format and stream framing.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use bytes::BytesMut;
use netmesh::core::codec::PacketCodec;
use netmesh::core::packet::{MAX_PACKET_SIZE, PACKET_OVERHEAD};
use netmesh::{format_type, Packet, ProtocolError};
use tokio_util::codec::{Decoder, Encoder};

fn sample() -> Packet {
    Packet {
        packet_type: format_type("NOTE"),
        ttl: 14,
        source: 1,
        destination: 3,
        resend_chain: vec![1, 2],
        payload: vec![0xAA, 0xBB, 0xCC],
    }
}

#[test]
fn test_type_tags_are_padded_or_truncated() {
    assert_eq!(format_type("A"), *b"A\0\0\0");
    assert_eq!(format_type("AB"), *b"AB\0\0");
    assert_eq!(format_type("ABCD"), *b"ABCD");
    assert_eq!(format_type("ABCDE"), *b"ABCD");
    assert_eq!(format_type(""), [0; 4]);
}

#[test]
fn test_exact_wire_layout() {
    let bytes = sample().to_bytes().unwrap();
    assert_eq!(
        bytes,
        vec![b'N', b'O', b'T', b'E', 14, 1, 3, 2, 1, 2, 0x00, 0x03, 0xAA, 0xBB, 0xCC]
    );
    assert_eq!(bytes.len(), PACKET_OVERHEAD + 2 + 3);
}

#[test]
fn test_payload_length_is_big_endian() {
    let mut packet = sample();
    packet.resend_chain.clear();
    packet.payload = vec![0; 0x0102];
    let bytes = packet.to_bytes().unwrap();
    assert_eq!(&bytes[8..10], &[0x01, 0x02]);
}

#[test]
fn test_every_truncation_is_rejected() {
    let bytes = sample().to_bytes().unwrap();
    for len in 0..bytes.len() {
        let err = Packet::from_bytes(&bytes[..len]).unwrap_err();
        assert!(matches!(err, ProtocolError::Decode(_)), "prefix of {len} bytes");
    }
}

#[test]
fn test_trailing_bytes_are_rejected() {
    let mut bytes = sample().to_bytes().unwrap();
    bytes.push(0);
    assert!(matches!(
        Packet::from_bytes(&bytes),
        Err(ProtocolError::Decode(_))
    ));
}

#[test]
fn test_size_limit_is_inclusive() {
    let mut packet = sample();
    packet.resend_chain = vec![1];
    packet.payload = vec![7; MAX_PACKET_SIZE - PACKET_OVERHEAD - 1];
    assert_eq!(packet.to_bytes().unwrap().len(), MAX_PACKET_SIZE);

    packet.payload.push(7);
    assert!(matches!(
        packet.to_bytes(),
        Err(ProtocolError::OversizedPacket(1025))
    ));
}

#[test]
fn test_codec_reassembles_split_frames() {
    let mut codec = PacketCodec;
    let first = sample();
    let mut second = sample();
    second.payload = b"second".to_vec();

    let mut wire = BytesMut::new();
    codec.encode(first.clone(), &mut wire).unwrap();
    codec.encode(second.clone(), &mut wire).unwrap();

    // feed one byte at a time
    let mut buf = BytesMut::new();
    let mut decoded = Vec::new();
    for byte in wire.iter() {
        buf.extend_from_slice(&[*byte]);
        while let Some(packet) = codec.decode(&mut buf).unwrap() {
            decoded.push(packet);
        }
    }
    assert_eq!(decoded, vec![first, second]);
    assert!(buf.is_empty());
}

#[test]
fn test_codec_rejects_oversized_frame_header() {
    let mut codec = PacketCodec;
    let mut buf = BytesMut::new();
    buf.extend_from_slice(b"BIG\0");
    buf.extend_from_slice(&[16, 1, 2, 0]);
    buf.extend_from_slice(&[0x04, 0x00]);
    assert!(matches!(
        codec.decode(&mut buf),
        Err(ProtocolError::OversizedPacket(_))
    ));
}

#[test]
fn test_codec_eof_inside_frame_is_an_error() {
    let mut codec = PacketCodec;
    let bytes = sample().to_bytes().unwrap();
    let mut buf = BytesMut::from(&bytes[..bytes.len() - 1]);
    assert!(codec.decode_eof(&mut buf).is_err());

    let mut empty = BytesMut::new();
    assert!(codec.decode_eof(&mut empty).unwrap().is_none());
}

#[test]
fn test_encoder_refuses_oversized_packet_without_writing() {
    let mut codec = PacketCodec;
    let mut packet = sample();
    packet.payload = vec![0; MAX_PACKET_SIZE];
    let mut buf = BytesMut::new();
    assert!(codec.encode(packet, &mut buf).is_err());
    assert!(buf.is_empty());
}
