//! # Error Types
//!
//! Error handling for the node communication layer.
//!
//! This module defines every error variant that can surface from packet encoding,
//! payload serialization, routing, connection management and node bootstrap.
//!
//! ## Error Categories
//! - **Packet Errors**: malformed or truncated wire bytes, oversized packets, TTL expiry
//! - **Serialization Errors**: payload attributes that do not fit or do not parse
//! - **Routing Errors**: unknown destinations, no next hop, forward failures
//! - **Connection Errors**: socket I/O failures, closed links, handshake timeouts
//! - **Registration Errors**: duplicate packet types or conflicting node ids
//!
//! Packet-level errors only ever drop the offending packet. Connection errors end the
//! affected connection and nothing else. Startup errors (bind failures, invalid config)
//! are returned to the caller.
//!
//! ## Example Usage
//! ```rust
//! use netmesh::core::packet::Packet;
//! use netmesh::error::ProtocolError;
//!
//! match Packet::from_bytes(&[0x48, 0x45]) {
//!     Err(ProtocolError::Decode(reason)) => println!("dropped packet: {reason}"),
//!     other => println!("unexpected: {other:?}"),
//! }
//! ```

use crate::core::packet::NodeId;
use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Dispatcher-related error messages
    pub const ERR_DISPATCHER_WRITE_LOCK: &str = "Failed to acquire write lock on dispatcher";
    pub const ERR_DISPATCHER_READ_LOCK: &str = "Failed to acquire read lock on dispatcher";

    /// Packet decoding errors
    pub const ERR_TRUNCATED_HEADER: &str = "Truncated packet header";
    pub const ERR_TRUNCATED_CHAIN: &str = "Truncated resend chain";
    pub const ERR_TRUNCATED_PAYLOAD: &str = "Truncated payload";
    pub const ERR_TRAILING_BYTES: &str = "Trailing bytes after payload";

    /// Attribute serialization errors
    pub const ERR_ATTRIBUTE_TRUNCATED: &str = "Payload ended before all attributes were read";
    pub const ERR_ATTRIBUTE_TRAILING: &str = "Payload has bytes left after the last attribute";
    pub const ERR_STRING_TOO_LONG: &str = "String attribute exceeds 255 bytes";
    pub const ERR_ARRAY_TOO_LONG: &str = "Array attribute exceeds 255 elements";
    pub const ERR_CHAR_OUT_OF_RANGE: &str = "Character does not fit in one UTF-16 code unit";
    pub const ERR_INVALID_UTF8: &str = "String attribute is not valid UTF-8";

    /// Routing errors
    pub const ERR_NO_ROUTE: &str = "No route to destination";
    pub const ERR_PEER_UNIDENTIFIED: &str = "Peer has not identified itself";

    /// Connection errors
    pub const ERR_CONNECTION_CLOSED: &str = "Connection closed";

    /// Handshake errors
    pub const ERR_SELF_IDENTIFICATION: &str = "Peer claimed this node's id";
    pub const ERR_PEER_HUNG_UP: &str = "Peer disconnected during handshake";
    pub const ERR_LOCAL_ID_UNRESOLVED: &str =
        "Node id must be configured when listening on an unspecified or IPv6 address";
}

// ProtocolError is the primary error type for all node operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Packet too large: {0} bytes")]
    OversizedPacket(usize),

    #[error("Resend chain too long: {0} entries")]
    ResendChainOverflow(usize),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Routing error: {0}")]
    Routing(String),

    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),

    #[error("Time to live expired")]
    TtlExpired,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Handshake timed out")]
    HandshakeTimeout,

    #[error("Handshake failed: {0}")]
    HandshakeError(String),

    #[error("Packet type already registered: {0:?}")]
    DuplicateType(String),

    #[error("Node {0} is already registered with a different address")]
    DuplicateNode(NodeId),

    #[error("Packet type is reserved for link control: {0:?}")]
    ReservedType(String),

    #[error("Timeout occurred")]
    Timeout,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl ProtocolError {
    /// Whether the error only affects a single packet and leaves the link usable.
    pub fn is_packet_level(&self) -> bool {
        matches!(
            self,
            ProtocolError::OversizedPacket(_)
                | ProtocolError::ResendChainOverflow(_)
                | ProtocolError::Serialization(_)
                | ProtocolError::Routing(_)
                | ProtocolError::UnknownNode(_)
                | ProtocolError::TtlExpired
        )
    }

    /// Whether the error is a caller mistake surfaced at registration time.
    pub fn is_duplicate_registration(&self) -> bool {
        matches!(
            self,
            ProtocolError::DuplicateType(_)
                | ProtocolError::DuplicateNode(_)
                | ProtocolError::ReservedType(_)
        )
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
