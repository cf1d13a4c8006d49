//! Typed views over packet items.
//!
//! A [`Packet`] only knows it has N string items. The types here give
//! those items names for the packet kinds whose layout the server cares
//! about: [`GameData`] (player state) and [`ServerInfo`] (the answer to a
//! server-list query).

use crate::packet::check_arity;
use crate::{Packet, PacketType, ProtocolError};

// ---------------------------------------------------------------------------
// GameData
// ---------------------------------------------------------------------------

/// The fields of a `GameData` packet, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GameDataField {
    GameMode,
    IsGameJoltPlayer,
    GameJoltId,
    DecimalSeparator,
    Name,
    LevelFile,
    Position,
    Facing,
    Moving,
    Skin,
    BusyType,
    PokemonVisible,
    PokemonPosition,
    PokemonSkin,
    PokemonFacing,
}

impl GameDataField {
    /// Number of items in a `GameData` packet.
    pub const COUNT: usize = 15;

    /// Fields a full join payload must carry.
    pub const IDENTITY: [GameDataField; 3] =
        [Self::GameMode, Self::IsGameJoltPlayer, Self::Name];

    /// Position of this field in the item list.
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Player state as carried by a `GameData` packet.
///
/// An empty field means "unchanged" in a partial update; a join carries
/// every identity field (see [`GameDataField::IDENTITY`]).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GameData {
    fields: [String; GameDataField::COUNT],
}

impl GameData {
    /// Reads a `GameData` packet.
    ///
    /// # Errors
    /// [`ProtocolError::WrongType`] if the packet is some other kind.
    pub fn from_packet(packet: &Packet) -> Result<Self, ProtocolError> {
        if packet.packet_type() != PacketType::GameData {
            return Err(ProtocolError::WrongType {
                expected: PacketType::GameData,
                found: packet.packet_type(),
            });
        }
        check_arity(PacketType::GameData, packet.items().len())?;
        let mut data = Self::default();
        for (slot, item) in data.fields.iter_mut().zip(packet.items()) {
            slot.clone_from(item);
        }
        Ok(data)
    }

    /// Encodes this state as a `GameData` packet authored by `origin`.
    pub fn to_packet(&self, origin: i32) -> Packet {
        Packet::build(PacketType::GameData, origin, self.fields.to_vec())
    }

    pub fn get(&self, field: GameDataField) -> &str {
        &self.fields[field.index()]
    }

    pub fn set(&mut self, field: GameDataField, value: impl Into<String>) {
        self.fields[field.index()] = value.into();
    }

    /// Builder-style [`set`](Self::set).
    pub fn with(mut self, field: GameDataField, value: impl Into<String>) -> Self {
        self.set(field, value);
        self
    }

    /// Returns `true` if every identity field is present.
    pub fn has_identity(&self) -> bool {
        GameDataField::IDENTITY
            .iter()
            .all(|f| !self.get(*f).is_empty())
    }

    /// Overwrites every field that is non-empty in `update`. Returns
    /// whether anything changed.
    pub fn apply_partial(&mut self, update: &GameData) -> bool {
        let mut changed = false;
        for (current, incoming) in self.fields.iter_mut().zip(&update.fields) {
            if !incoming.is_empty() && current != incoming {
                current.clone_from(incoming);
                changed = true;
            }
        }
        changed
    }

    pub fn name(&self) -> &str {
        self.get(GameDataField::Name)
    }

    pub fn game_mode(&self) -> &str {
        self.get(GameDataField::GameMode)
    }

    /// Whether the client claims a verified (GameJolt) profile.
    pub fn is_gamejolt_player(&self) -> bool {
        matches!(
            self.get(GameDataField::IsGameJoltPlayer),
            "1" | "true" | "True"
        )
    }

    pub fn gamejolt_id(&self) -> &str {
        self.get(GameDataField::GameJoltId)
    }
}

// ---------------------------------------------------------------------------
// ServerInfo
// ---------------------------------------------------------------------------

/// The `ServerInfoData` reply to a `ServerDataRequest`.
///
/// Items: `[player_count, max_players, server_name, server_message,
/// player_name...]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub player_count: usize,
    pub max_players: usize,
    pub name: String,
    pub message: String,
    pub player_names: Vec<String>,
}

impl ServerInfo {
    pub fn to_packet(&self) -> Packet {
        let mut items = Vec::with_capacity(4 + self.player_names.len());
        items.push(self.player_count.to_string());
        items.push(self.max_players.to_string());
        items.push(self.name.clone());
        items.push(self.message.clone());
        items.extend(self.player_names.iter().cloned());
        Packet::build(PacketType::ServerInfoData, crate::SERVER_ORIGIN, items)
    }

    /// Reads a `ServerInfoData` packet (the client side of the exchange).
    pub fn from_packet(packet: &Packet) -> Result<Self, ProtocolError> {
        if packet.packet_type() != PacketType::ServerInfoData {
            return Err(ProtocolError::WrongType {
                expected: PacketType::ServerInfoData,
                found: packet.packet_type(),
            });
        }
        check_arity(PacketType::ServerInfoData, packet.items().len())?;
        let count = |field: &'static str, value: &str| {
            value.parse::<usize>().map_err(|_| ProtocolError::InvalidNumber {
                field,
                value: value.to_string(),
            })
        };
        Ok(Self {
            player_count: count("player count", packet.item(0))?,
            max_players: count("max players", packet.item(1))?,
            name: packet.item(2).to_string(),
            message: packet.item(3).to_string(),
            player_names: packet.items()[4..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SERVER_ORIGIN;

    fn join_payload() -> GameData {
        GameData::default()
            .with(GameDataField::GameMode, "Kolben")
            .with(GameDataField::IsGameJoltPlayer, "0")
            .with(GameDataField::Name, "Red")
            .with(GameDataField::LevelFile, "newbark.dat")
            .with(GameDataField::Position, "1|0|4")
    }

    #[test]
    fn test_game_data_packet_round_trip() {
        let data = join_payload();
        let packet = data.to_packet(SERVER_ORIGIN);
        assert_eq!(packet.items().len(), GameDataField::COUNT);
        assert_eq!(GameData::from_packet(&packet).unwrap(), data);
    }

    #[test]
    fn test_from_packet_wrong_type_returns_error() {
        let packet = Packet::chat(1, "hi");
        assert!(matches!(
            GameData::from_packet(&packet),
            Err(ProtocolError::WrongType { .. })
        ));
    }

    #[test]
    fn test_has_identity_requires_mode_flag_and_name() {
        assert!(join_payload().has_identity());
        let mut data = join_payload();
        data.set(GameDataField::Name, "");
        assert!(!data.has_identity());
    }

    #[test]
    fn test_apply_partial_only_overwrites_supplied_fields() {
        let mut state = join_payload();
        let update = GameData::default()
            .with(GameDataField::Position, "2|0|4")
            .with(GameDataField::Facing, "3");

        assert!(state.apply_partial(&update));

        assert_eq!(state.get(GameDataField::Position), "2|0|4");
        assert_eq!(state.get(GameDataField::Facing), "3");
        assert_eq!(state.name(), "Red");
        assert_eq!(state.get(GameDataField::LevelFile), "newbark.dat");
    }

    #[test]
    fn test_apply_partial_identical_values_reports_unchanged() {
        let mut state = join_payload();
        let update = GameData::default().with(GameDataField::Name, "Red");
        assert!(!state.apply_partial(&update));
    }

    #[test]
    fn test_is_gamejolt_player_flag_values() {
        let mut data = join_payload();
        assert!(!data.is_gamejolt_player());
        data.set(GameDataField::IsGameJoltPlayer, "1");
        assert!(data.is_gamejolt_player());
    }

    #[test]
    fn test_server_info_round_trip() {
        let info = ServerInfo {
            player_count: 2,
            max_players: 20,
            name: "Kolben's Place".into(),
            message: "welcome | all".into(),
            player_names: vec!["Red".into(), "Blue".into()],
        };
        let packet = info.to_packet();
        assert_eq!(packet.packet_type(), PacketType::ServerInfoData);
        assert_eq!(ServerInfo::from_packet(&packet).unwrap(), info);
    }
}
