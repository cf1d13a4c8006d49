//! Error types for the protocol layer.
//!
//! Each crate in Trailhead defines its own error enum. A `ProtocolError`
//! always means "this line (or this packet) is not valid protocol", never a
//! network or session problem. Callers treat it as recoverable: the line is
//! logged and discarded, and the connection stays open.

use crate::PacketType;

/// Errors that can occur while decoding or constructing a packet.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// A header field or offset is missing (the line ended too early).
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// The protocol version does not match ours exactly.
    #[error("protocol version mismatch: expected {expected}, got {found}")]
    VersionMismatch {
        expected: &'static str,
        found: String,
    },

    /// A numeric field is not a canonical decimal integer.
    ///
    /// Canonical means: no sign other than a leading `-`, no leading zeros,
    /// no whitespace. Anything else would break byte-exact re-encoding.
    #[error("invalid number in {field}: {value:?}")]
    InvalidNumber { field: &'static str, value: String },

    /// The packet type ordinal is not part of the closed set.
    #[error("unknown packet type {0}")]
    UnknownPacketType(i32),

    /// The offset table does not describe a valid split of the item blob.
    #[error("bad item offsets: {0}")]
    BadOffsets(&'static str),

    /// The number of items is wrong for this packet type.
    #[error("{packet_type:?} expects {expected} items, got {found}")]
    Arity {
        packet_type: PacketType,
        expected: String,
        found: usize,
    },

    /// An item contains a line terminator, which the framing cannot carry.
    #[error("item {0} contains a line terminator")]
    InvalidItem(usize),

    /// A typed view was requested from a packet of a different type.
    #[error("expected a {expected:?} packet, got {found:?}")]
    WrongType {
        expected: PacketType,
        found: PacketType,
    },
}
