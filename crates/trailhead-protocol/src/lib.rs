//! Wire protocol for Trailhead.
//!
//! This crate defines the language clients and the server speak:
//!
//! - **Packets** ([`Packet`], [`PacketType`], [`PlayerId`]): one decoded
//!   line, its kind, who authored it, and its string items.
//! - **Payloads** ([`GameData`], [`ServerInfo`]): named views over the items
//!   of the packet kinds the server interprets.
//! - **Codec** ([`Codec`] trait, [`LineCodec`]): the offset-table line
//!   format, to and from text.
//! - **Errors** ([`ProtocolError`]): everything that makes a line invalid.
//!
//! # Architecture
//!
//! The protocol layer sits between transport (lines of text) and the
//! connection actor (typed messages). It knows nothing about sockets,
//! players, or the dispatch bus.
//!
//! ```text
//! Transport (lines) → Protocol (Packet) → Connection actor → Dispatch
//! ```

mod codec;
mod error;
mod packet;
mod payload;

pub use codec::{Codec, LineCodec};
pub use error::ProtocolError;
pub use packet::{
    Arity, PROTOCOL_VERSION, Packet, PacketType, PlayerId, SERVER_ORIGIN,
};
pub use payload::{GameData, GameDataField, ServerInfo};
