//! # Core Protocol Components
//!
//! Packet layout, stream framing and payload attribute serialization.
//!
//! ## Components
//! - **Packet**: the binary envelope (type, ttl, source, destination, resend chain, payload)
//! - **Codec**: Tokio codec framing packets on a TCP byte stream
//! - **Attribute**: schema-driven payload serialization
//!
//! ## Wire Format
//! ```text
//! [Type(4)] [TTL(1)] [Src(1)] [Dst(1)] [ChainLen(1)] [Chain(n)] [PayloadLen(2)] [Payload(m)]
//! ```
//!
//! ## Limits
//! - Maximum packet size: 1024 bytes, header included
//! - Resend chain: at most 255 entries
//! - Length validation before allocation

pub mod attribute;
pub mod codec;
pub mod packet;
