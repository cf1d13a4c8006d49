//! Core packet types for Trailhead's wire format.
//!
//! A [`Packet`] is one decoded protocol line: a [`PacketType`], an origin
//! (the authoring or target player, `-1` for the server) and an ordered list
//! of string items. How many items a packet carries is fixed per type; see
//! [`PacketType::arity`].

use std::fmt;

use crate::ProtocolError;

/// The protocol version every line must start with.
pub const PROTOCOL_VERSION: &str = "0.5";

/// Origin value meaning "the server" or "no player yet".
///
/// On a client `GameData` packet this sentinel marks a full join payload.
pub const SERVER_ORIGIN: i32 = -1;

// ---------------------------------------------------------------------------
// PlayerId
// ---------------------------------------------------------------------------

/// A joined player's identifier.
///
/// IDs are small positive integers, dense and reused after a player leaves,
/// because they travel on every packet as the `origin` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PlayerId(pub u32);

impl PlayerId {
    /// The value to put in a packet's origin field.
    pub fn origin(self) -> i32 {
        // Allocated IDs stay far below i32::MAX.
        i32::try_from(self.0).unwrap_or(i32::MAX)
    }

    /// Interprets an origin field as a player ID. Returns `None` for the
    /// server sentinel and any other non-positive value.
    pub fn from_origin(origin: i32) -> Option<Self> {
        u32::try_from(origin).ok().filter(|id| *id > 0).map(Self)
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// PacketType
// ---------------------------------------------------------------------------

/// How many items a packet type carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
    Any,
}

impl Arity {
    /// Returns `true` if `count` items satisfy this arity.
    pub fn accepts(self, count: usize) -> bool {
        match self {
            Self::Exact(n) => count == n,
            Self::AtLeast(n) => count >= n,
            Self::Any => true,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(n) => write!(f, "exactly {n}"),
            Self::AtLeast(n) => write!(f, "at least {n}"),
            Self::Any => write!(f, "any number of"),
        }
    }
}

/// The closed set of packet kinds. The discriminant is the wire ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum PacketType {
    GameData = 0,
    PrivateMessage = 2,
    ChatMessage = 3,
    Kicked = 4,
    Id = 7,
    CreatePlayer = 8,
    DestroyPlayer = 9,
    ServerClose = 10,
    ServerMessage = 11,
    WorldData = 12,
    Ping = 13,
    GamestateMessage = 14,

    TradeRequest = 30,
    TradeJoin = 31,
    TradeQuit = 32,
    TradeOffer = 33,
    TradeStart = 34,

    BattleRequest = 50,
    BattleJoin = 51,
    BattleQuit = 52,
    BattleOffer = 53,
    BattleStart = 54,
    BattleClientData = 55,
    BattleHostData = 56,
    BattlePokemonData = 57,

    ServerInfoData = 98,
    ServerDataRequest = 99,
}

impl PacketType {
    /// Every packet type, in ordinal order.
    pub const ALL: [PacketType; 27] = [
        Self::GameData,
        Self::PrivateMessage,
        Self::ChatMessage,
        Self::Kicked,
        Self::Id,
        Self::CreatePlayer,
        Self::DestroyPlayer,
        Self::ServerClose,
        Self::ServerMessage,
        Self::WorldData,
        Self::Ping,
        Self::GamestateMessage,
        Self::TradeRequest,
        Self::TradeJoin,
        Self::TradeQuit,
        Self::TradeOffer,
        Self::TradeStart,
        Self::BattleRequest,
        Self::BattleJoin,
        Self::BattleQuit,
        Self::BattleOffer,
        Self::BattleStart,
        Self::BattleClientData,
        Self::BattleHostData,
        Self::BattlePokemonData,
        Self::ServerInfoData,
        Self::ServerDataRequest,
    ];

    /// The wire ordinal.
    pub fn ordinal(self) -> i32 {
        self as i32
    }

    /// Looks up a packet type by wire ordinal.
    pub fn from_ordinal(ordinal: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.ordinal() == ordinal)
    }

    /// The item count this packet type must carry.
    pub fn arity(self) -> Arity {
        match self {
            Self::GameData => Arity::Exact(crate::GameDataField::COUNT),
            Self::PrivateMessage => Arity::Exact(2),
            Self::ChatMessage
            | Self::Kicked
            | Self::Id
            | Self::CreatePlayer
            | Self::DestroyPlayer
            | Self::ServerClose
            | Self::ServerMessage
            | Self::GamestateMessage => Arity::Exact(1),
            Self::WorldData => Arity::Exact(3),
            Self::Ping => Arity::Exact(0),
            Self::ServerInfoData => Arity::AtLeast(4),
            Self::ServerDataRequest => Arity::Any,
            Self::TradeRequest
            | Self::TradeJoin
            | Self::TradeQuit
            | Self::TradeOffer
            | Self::TradeStart
            | Self::BattleRequest
            | Self::BattleJoin
            | Self::BattleQuit
            | Self::BattleOffer
            | Self::BattleStart
            | Self::BattleClientData
            | Self::BattleHostData
            | Self::BattlePokemonData => Arity::Any,
        }
    }

    /// Packet kinds only the server sends. A client sending one of these is
    /// misbehaving.
    pub fn is_server_only(self) -> bool {
        matches!(
            self,
            Self::Kicked
                | Self::Id
                | Self::CreatePlayer
                | Self::DestroyPlayer
                | Self::ServerClose
                | Self::ServerMessage
                | Self::WorldData
                | Self::ServerInfoData
        )
    }

    /// Trade and battle kinds. Decoded, but the server has no logic for them.
    pub fn is_trade_or_battle(self) -> bool {
        (30..=57).contains(&self.ordinal())
    }
}

// ---------------------------------------------------------------------------
// Packet
// ---------------------------------------------------------------------------

/// One decoded protocol message. Immutable after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    packet_type: PacketType,
    origin: i32,
    items: Vec<String>,
}

impl Packet {
    /// Builds a packet, validating arity and that no item contains a line
    /// terminator.
    ///
    /// # Errors
    /// - [`ProtocolError::Arity`] if the item count is wrong for the type.
    /// - [`ProtocolError::InvalidItem`] if an item contains `\n` or `\r`.
    pub fn new(
        packet_type: PacketType,
        origin: i32,
        items: Vec<String>,
    ) -> Result<Self, ProtocolError> {
        check_arity(packet_type, items.len())?;
        if let Some(index) = items.iter().position(|i| i.contains(['\n', '\r'])) {
            return Err(ProtocolError::InvalidItem(index));
        }
        Ok(Self {
            packet_type,
            origin,
            items,
        })
    }

    /// Builds a server-side packet from items the server controls. Line
    /// terminators are replaced with spaces instead of rejected.
    pub(crate) fn build(
        packet_type: PacketType,
        origin: i32,
        items: Vec<String>,
    ) -> Self {
        debug_assert!(packet_type.arity().accepts(items.len()));
        let items = items
            .into_iter()
            .map(|item| {
                if item.contains(['\n', '\r']) {
                    item.replace(['\n', '\r'], " ")
                } else {
                    item
                }
            })
            .collect();
        Self {
            packet_type,
            origin,
            items,
        }
    }

    pub fn packet_type(&self) -> PacketType {
        self.packet_type
    }

    pub fn origin(&self) -> i32 {
        self.origin
    }

    pub fn items(&self) -> &[String] {
        &self.items
    }

    /// Returns item `index`, or `""` if there is no such item.
    pub fn item(&self, index: usize) -> &str {
        self.items.get(index).map(String::as_str).unwrap_or("")
    }

    pub fn into_items(self) -> Vec<String> {
        self.items
    }

    // -- Server → client builders --------------------------------------

    /// `ChatMessage` authored by `origin` (a player or the server).
    pub fn chat(origin: i32, text: impl Into<String>) -> Self {
        Self::build(PacketType::ChatMessage, origin, vec![text.into()])
    }

    /// `PrivateMessage` from `origin`, addressed to the player named `target`.
    pub fn private_message(
        origin: i32,
        target: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self::build(
            PacketType::PrivateMessage,
            origin,
            vec![target.into(), text.into()],
        )
    }

    /// `GamestateMessage` authored by a player.
    pub fn gamestate(origin: i32, text: impl Into<String>) -> Self {
        Self::build(PacketType::GamestateMessage, origin, vec![text.into()])
    }

    /// `Kicked` with a human-readable reason.
    pub fn kicked(reason: impl Into<String>) -> Self {
        Self::build(PacketType::Kicked, SERVER_ORIGIN, vec![reason.into()])
    }

    /// `Id` telling a freshly joined client its player ID.
    pub fn id(player_id: PlayerId) -> Self {
        Self::build(
            PacketType::Id,
            SERVER_ORIGIN,
            vec![player_id.0.to_string()],
        )
    }

    /// `CreatePlayer` announcing another player's avatar.
    pub fn create_player(player_id: PlayerId) -> Self {
        Self::build(
            PacketType::CreatePlayer,
            SERVER_ORIGIN,
            vec![player_id.0.to_string()],
        )
    }

    /// `DestroyPlayer` removing another player's avatar.
    pub fn destroy_player(player_id: PlayerId) -> Self {
        Self::build(
            PacketType::DestroyPlayer,
            SERVER_ORIGIN,
            vec![player_id.0.to_string()],
        )
    }

    /// `ServerClose` sent to every client when the server stops.
    pub fn server_close(reason: impl Into<String>) -> Self {
        Self::build(PacketType::ServerClose, SERVER_ORIGIN, vec![reason.into()])
    }

    /// `ServerMessage`: server-authored text shown in the client's chat.
    pub fn server_message(text: impl Into<String>) -> Self {
        Self::build(PacketType::ServerMessage, SERVER_ORIGIN, vec![text.into()])
    }

    /// `Ping` keep-alive.
    pub fn ping(origin: i32) -> Self {
        Self::build(PacketType::Ping, origin, Vec::new())
    }
}

pub(crate) fn check_arity(
    packet_type: PacketType,
    count: usize,
) -> Result<(), ProtocolError> {
    let arity = packet_type.arity();
    if arity.accepts(count) {
        Ok(())
    } else {
        Err(ProtocolError::Arity {
            packet_type,
            expected: arity.to_string(),
            found: count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_ordinal_round_trips_every_type() {
        for t in PacketType::ALL {
            assert_eq!(PacketType::from_ordinal(t.ordinal()), Some(t));
        }
    }

    #[test]
    fn test_from_ordinal_gaps_are_unknown() {
        assert_eq!(PacketType::from_ordinal(1), None);
        assert_eq!(PacketType::from_ordinal(5), None);
        assert_eq!(PacketType::from_ordinal(100), None);
        assert_eq!(PacketType::from_ordinal(-1), None);
    }

    #[test]
    fn test_documented_ordinals() {
        assert_eq!(PacketType::GameData.ordinal(), 0);
        assert_eq!(PacketType::ChatMessage.ordinal(), 3);
        assert_eq!(PacketType::Kicked.ordinal(), 4);
        assert_eq!(PacketType::Id.ordinal(), 7);
        assert_eq!(PacketType::WorldData.ordinal(), 12);
        assert_eq!(PacketType::ServerInfoData.ordinal(), 98);
        assert_eq!(PacketType::ServerDataRequest.ordinal(), 99);
    }

    #[test]
    fn test_new_wrong_arity_returns_error() {
        let err = Packet::new(PacketType::ChatMessage, 1, vec![]).unwrap_err();
        assert!(matches!(err, ProtocolError::Arity { found: 0, .. }));
    }

    #[test]
    fn test_new_item_with_newline_returns_error() {
        let err = Packet::new(PacketType::ChatMessage, 1, vec!["a\nb".into()])
            .unwrap_err();
        assert_eq!(err, ProtocolError::InvalidItem(0));
    }

    #[test]
    fn test_builders_strip_line_terminators() {
        let packet = Packet::server_message("line one\nline two");
        assert_eq!(packet.item(0), "line one line two");
    }

    #[test]
    fn test_player_id_origin_conversions() {
        assert_eq!(PlayerId(3).origin(), 3);
        assert_eq!(PlayerId::from_origin(3), Some(PlayerId(3)));
        assert_eq!(PlayerId::from_origin(SERVER_ORIGIN), None);
        assert_eq!(PlayerId::from_origin(0), None);
    }

    #[test]
    fn test_trade_and_battle_classification() {
        assert!(PacketType::TradeOffer.is_trade_or_battle());
        assert!(PacketType::BattlePokemonData.is_trade_or_battle());
        assert!(!PacketType::ServerInfoData.is_trade_or_battle());
        assert!(!PacketType::GamestateMessage.is_trade_or_battle());
    }
}
