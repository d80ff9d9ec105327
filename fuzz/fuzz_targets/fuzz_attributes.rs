#![no_main]

use libfuzzer_sys::fuzz_target;
use netmesh::core::attribute::decode;
use netmesh::packet_object;

#[derive(Default)]
struct Mixed {
    id: u16,
    level: i32,
    ratio: f64,
    letter: char,
    name: String,
    raw: Vec<u8>,
    samples: Vec<i16>,
}

packet_object!(Mixed => "MIXD" {
    id: u16,
    level: i32,
    ratio: f64,
    letter: char,
    name: String,
    raw: Vec<u8>,
    samples: Vec<i16>,
});

fuzz_target!(|data: &[u8]| {
    // Attribute decoding of arbitrary payloads
    let _ = decode::<Mixed>(data);
});
