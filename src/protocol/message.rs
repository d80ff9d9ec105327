//! Link control payloads.
//!
//! These travel between directly connected peers only. The connection handles them
//! before deciding between local delivery and forwarding, and they are never relayed.
//! Applications cannot register handlers for their tags.

use crate::core::packet::{format_type, TypeTag};
use crate::packet_object;

/// Identification: the sender's node id rides in the packet source, the payload
/// carries its listener port.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Hello {
    pub port: u16,
}

packet_object!(Hello => "HELO" { port: u16 });

/// Identification accepted.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Ack {}

packet_object!(Ack => "ACK" {});

/// Liveness probe.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Probe {
    pub nonce: u32,
}

packet_object!(Probe => "RYST" { nonce: u32 });

/// Liveness reply echoing the probe's nonce.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProbeReply {
    pub nonce: u32,
}

packet_object!(ProbeReply => "ALIV" { nonce: u32 });

pub const HELLO: TypeTag = *b"HELO";
pub const ACK: TypeTag = [b'A', b'C', b'K', 0];
pub const PROBE: TypeTag = *b"RYST";
pub const PROBE_REPLY: TypeTag = *b"ALIV";

/// Tags owned by the link layer
pub const RESERVED_TYPES: [TypeTag; 4] = [HELLO, ACK, PROBE, PROBE_REPLY];

pub fn is_link_control(tag: &TypeTag) -> bool {
    RESERVED_TYPES.contains(tag)
}

/// Whether an application supplied tag collides with a link control tag.
pub fn is_reserved(tag: &str) -> bool {
    is_link_control(&format_type(tag))
}
