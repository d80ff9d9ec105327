//! Declared payload shapes through the public serializer.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use netmesh::core::attribute::{decode, deserialize, serialize, AttributeKind, PacketObject, ScalarKind};
use netmesh::{format_type, packet_object, ProtocolError};

#[derive(Debug, Default, PartialEq)]
struct Reading {
    level: i32,
    label: String,
}

packet_object!(Reading => "RDNG" { level: i32, label: String });

#[derive(Debug, Default, PartialEq)]
struct Frame {
    tag: char,
    scale: f32,
    raw: Vec<u8>,
    samples: Vec<i16>,
}

packet_object!(Frame => "FRM" { tag: char, scale: f32, raw: Vec<u8>, samples: Vec<i16> });

#[test]
fn test_int_and_string_fields_roundtrip() {
    let original = Reading {
        level: -42,
        label: "hello".into(),
    };
    let bytes = serialize(&original).unwrap();
    assert_eq!(bytes, vec![0xFF, 0xFF, 0xFF, 0xD6, 5, b'h', b'e', b'l', b'l', b'o']);

    let mut fresh = Reading::default();
    deserialize(&bytes, &mut fresh).unwrap();
    assert_eq!(fresh, original);
}

#[test]
fn test_schema_lists_fields_in_declaration_order() {
    let fields: Vec<_> = Frame::schema().fields().collect();
    assert_eq!(
        fields,
        vec![
            ("tag", AttributeKind::Scalar(ScalarKind::Char)),
            ("scale", AttributeKind::Scalar(ScalarKind::F32)),
            ("raw", AttributeKind::Array(ScalarKind::U8)),
            ("samples", AttributeKind::Array(ScalarKind::I16)),
        ]
    );
    assert_eq!(Frame::packet_type(), format_type("FRM"));
}

#[test]
fn test_mixed_fields_roundtrip() {
    let original = Frame {
        tag: 'ß',
        scale: 0.5,
        raw: vec![0, 1, 255],
        samples: vec![-1, 300],
    };
    let bytes = serialize(&original).unwrap();
    assert_eq!(bytes.len(), 2 + 4 + (1 + 3) + (1 + 4));
    assert_eq!(decode::<Frame>(&bytes).unwrap(), original);
}

#[test]
fn test_string_limit() {
    let at_limit = Reading {
        level: 0,
        label: "x".repeat(255),
    };
    assert_eq!(serialize(&at_limit).unwrap().len(), 4 + 1 + 255);

    let over = Reading {
        level: 0,
        label: "x".repeat(256),
    };
    assert!(matches!(
        serialize(&over),
        Err(ProtocolError::Serialization(_))
    ));
}

#[test]
fn test_char_outside_single_unit_is_rejected() {
    let frame = Frame {
        tag: '😀',
        ..Frame::default()
    };
    assert!(serialize(&frame).is_err());
}

#[test]
fn test_short_and_long_payloads_are_rejected() {
    let bytes = serialize(&Reading {
        level: 7,
        label: "abc".into(),
    })
    .unwrap();

    assert!(decode::<Reading>(&bytes[..bytes.len() - 1]).is_err());

    let mut longer = bytes.clone();
    longer.push(0);
    assert!(decode::<Reading>(&longer).is_err());
}

#[test]
fn test_invalid_utf8_is_rejected() {
    let bytes = vec![0, 0, 0, 1, 2, 0xC3, 0x28];
    assert!(matches!(
        decode::<Reading>(&bytes),
        Err(ProtocolError::Serialization(_))
    ));
}
