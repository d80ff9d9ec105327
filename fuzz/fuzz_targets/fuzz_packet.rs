#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use netmesh::core::codec::PacketCodec;
use netmesh::Packet;
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    // Packet deserialization must reject, never panic
    if let Ok(packet) = Packet::from_bytes(data) {
        let encoded = packet.to_bytes().expect("decoded packets re-encode");
        assert_eq!(encoded, data);
    }

    // Streaming decoder over the same bytes
    let mut codec = PacketCodec;
    let mut buf = BytesMut::from(data);
    while let Ok(Some(_)) = codec.decode(&mut buf) {}
});
