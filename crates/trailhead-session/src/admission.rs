//! Admission control: the ordered checks a join must pass.

use trailhead_protocol::GameData;

use crate::locale::{Localizer, keys};
use crate::ProfileIdentity;

/// Session-level settings: who may join and what they are told.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Shown in the server list and the welcome message.
    pub server_name: String,
    /// Message of the day.
    pub server_message: String,
    pub max_players: usize,
    /// Reject offline profiles.
    pub require_gamejolt: bool,
    /// If non-empty, only these game modes may join.
    pub allowed_game_modes: Vec<String>,
    /// These game modes may never join.
    pub blocked_game_modes: Vec<String>,
    /// Banned names or GameJolt ids.
    pub banned: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server_name: "Trailhead".to_string(),
            server_message: String::new(),
            max_players: 20,
            require_gamejolt: false,
            allowed_game_modes: Vec::new(),
            blocked_game_modes: Vec::new(),
            banned: Vec::new(),
        }
    }
}

/// Why a join was refused. The first failing check wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Denial {
    ServerFull { max_players: usize },
    GameJoltOnly,
    WrongGameMode { mode: String },
    Banned,
    AlreadyOnline { name: String },
}

impl Denial {
    /// The text sent to the client in its `Kicked` packet.
    pub fn localize(&self, localizer: &dyn Localizer) -> String {
        match self {
            Self::ServerFull { max_players } => {
                let max = max_players.to_string();
                localizer.format(keys::SERVER_FULL, &[max.as_str()])
            }
            Self::GameJoltOnly => localizer.format(keys::GAMEJOLT_ONLY, &[]),
            Self::WrongGameMode { mode } => {
                localizer.format(keys::WRONG_GAME_MODE, &[mode.as_str()])
            }
            Self::Banned => localizer.format(keys::BANNED, &[]),
            Self::AlreadyOnline { name } => {
                localizer.format(keys::ALREADY_ONLINE, &[name.as_str()])
            }
        }
    }
}

/// The registry's view of a join attempt, captured under its lock.
#[derive(Debug, Clone, Copy)]
pub struct Occupancy {
    /// Joined plus joining connections.
    pub taken: usize,
    /// Whether the same identity is already joined or joining.
    pub identity_online: bool,
}

impl SessionConfig {
    /// Runs the admission checks in order:
    ///
    /// 1. capacity
    /// 2. profile policy (GameJolt only)
    /// 3. game mode allow and deny lists
    /// 4. ban list
    /// 5. duplicate identity
    pub fn admit(
        &self,
        data: &GameData,
        identity: &ProfileIdentity,
        occupancy: Occupancy,
    ) -> Result<(), Denial> {
        if occupancy.taken >= self.max_players {
            return Err(Denial::ServerFull {
                max_players: self.max_players,
            });
        }
        if self.require_gamejolt && !identity.is_gamejolt() {
            return Err(Denial::GameJoltOnly);
        }
        let mode = data.game_mode();
        let listed = |list: &[String]| list.iter().any(|m| m.eq_ignore_ascii_case(mode));
        if (!self.allowed_game_modes.is_empty() && !listed(&self.allowed_game_modes))
            || listed(&self.blocked_game_modes)
        {
            return Err(Denial::WrongGameMode {
                mode: mode.to_string(),
            });
        }
        if self.banned.iter().any(|b| identity.matches(b)) {
            return Err(Denial::Banned);
        }
        if occupancy.identity_online {
            return Err(Denial::AlreadyOnline {
                name: identity.name().to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use trailhead_protocol::GameDataField;

    use super::*;
    use crate::EnglishLocalizer;

    fn join(name: &str, mode: &str) -> (GameData, ProfileIdentity) {
        let data = GameData::default()
            .with(GameDataField::Name, name)
            .with(GameDataField::GameMode, mode)
            .with(GameDataField::IsGameJoltPlayer, "0");
        let identity = ProfileIdentity::from_game_data(&data);
        (data, identity)
    }

    fn free() -> Occupancy {
        Occupancy {
            taken: 0,
            identity_online: false,
        }
    }

    fn kolben_only() -> SessionConfig {
        SessionConfig {
            allowed_game_modes: vec!["Kolben".into()],
            ..SessionConfig::default()
        }
    }

    #[test]
    fn test_admit_allowed_mode_passes() {
        let (data, id) = join("Ash", "kolben");
        assert_eq!(kolben_only().admit(&data, &id, free()), Ok(()));
    }

    #[test]
    fn test_admit_capacity_wins_over_game_mode() {
        let config = SessionConfig {
            max_players: 0,
            ..kolben_only()
        };
        let (data, id) = join("Ash", "Pokemon 3D");
        assert_eq!(
            config.admit(&data, &id, free()),
            Err(Denial::ServerFull { max_players: 0 })
        );
    }

    #[test]
    fn test_admit_profile_policy_wins_over_game_mode() {
        let config = SessionConfig {
            require_gamejolt: true,
            ..kolben_only()
        };
        let (data, id) = join("Ash", "Pokemon 3D");
        assert_eq!(config.admit(&data, &id, free()), Err(Denial::GameJoltOnly));
    }

    #[test]
    fn test_admit_blocked_mode_rejected() {
        let config = SessionConfig {
            blocked_game_modes: vec!["Cheats".into()],
            ..SessionConfig::default()
        };
        let (data, id) = join("Ash", "CHEATS");
        assert!(matches!(
            config.admit(&data, &id, free()),
            Err(Denial::WrongGameMode { .. })
        ));
    }

    #[test]
    fn test_admit_banned_before_already_online() {
        let config = SessionConfig {
            banned: vec!["gary".into()],
            ..SessionConfig::default()
        };
        let (data, id) = join("Gary", "Kolben");
        let busy = Occupancy {
            taken: 1,
            identity_online: true,
        };
        assert_eq!(config.admit(&data, &id, busy), Err(Denial::Banned));
    }

    #[test]
    fn test_admit_already_online() {
        let (data, id) = join("Ash", "Kolben");
        let busy = Occupancy {
            taken: 1,
            identity_online: true,
        };
        assert_eq!(
            SessionConfig::default().admit(&data, &id, busy),
            Err(Denial::AlreadyOnline { name: "Ash".into() })
        );
    }

    #[test]
    fn test_denial_localize_server_full() {
        let text = Denial::ServerFull { max_players: 0 }.localize(&EnglishLocalizer::new());
        assert_eq!(text, "The server is full (0 players).");
    }
}
