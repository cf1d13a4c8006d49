//! The messages the session layer exchanges over the dispatcher.
//!
//! ```text
//! connection actor ── GameDataReceived, ChatReceived, … ──→ orchestrator
//! orchestrator     ── PlayerJoined, PlayerUpdated, PlayerLeft ──→ broadcaster
//! operators        ── KickPlayer, ListPlayers, GetServerInfo, … ──→ handlers
//! ```

use std::sync::Arc;

use trailhead_dispatch::{Notification, Request};
use trailhead_protocol::{GameData, PlayerId, ServerInfo};

use crate::{DisconnectReason, PlayerLink};

// ---------------------------------------------------------------------------
// Inbound: decoded packets from a connection
// ---------------------------------------------------------------------------

/// A `GameData` packet arrived. Published by the game-data worker, one
/// at a time per connection.
#[derive(Debug, Clone)]
pub struct GameDataReceived {
    pub link: Arc<dyn PlayerLink>,
    pub origin: i32,
    pub data: GameData,
}

impl Notification for GameDataReceived {}

#[derive(Debug, Clone)]
pub struct ChatReceived {
    pub link: Arc<dyn PlayerLink>,
    pub text: String,
}

impl Notification for ChatReceived {}

/// A private message addressed to the player named `target`.
#[derive(Debug, Clone)]
pub struct PrivateMessageReceived {
    pub link: Arc<dyn PlayerLink>,
    pub target: String,
    pub text: String,
}

impl Notification for PrivateMessageReceived {}

#[derive(Debug, Clone)]
pub struct GamestateReceived {
    pub link: Arc<dyn PlayerLink>,
    pub text: String,
}

impl Notification for GamestateReceived {}

/// A connection ended. Published exactly once per connection.
#[derive(Debug, Clone)]
pub struct Disconnected {
    pub link: Arc<dyn PlayerLink>,
    pub reason: DisconnectReason,
}

impl Notification for Disconnected {}

// ---------------------------------------------------------------------------
// Outbound: session state changes
// ---------------------------------------------------------------------------

/// Everything a broadcaster needs to know about one player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerSnapshot {
    pub id: PlayerId,
    pub name: String,
    pub gamejolt: bool,
    pub data: GameData,
}

/// A player passed admission. It receives no broadcasts until every
/// handler of this notification has finished.
#[derive(Debug, Clone)]
pub struct PlayerJoined {
    pub player: PlayerSnapshot,
    pub link: Arc<dyn PlayerLink>,
    /// The players already present when this one joined, ordered by ID.
    pub others: Vec<PlayerSnapshot>,
}

impl Notification for PlayerJoined {}

/// A joined player's state changed. Carries the full merged state.
#[derive(Debug, Clone)]
pub struct PlayerUpdated {
    pub player: PlayerSnapshot,
}

impl Notification for PlayerUpdated {}

/// A joined player is gone; its ID is free again.
#[derive(Debug, Clone)]
pub struct PlayerLeft {
    pub id: PlayerId,
    pub name: String,
    pub reason: DisconnectReason,
}

impl Notification for PlayerLeft {}

// ---------------------------------------------------------------------------
// Commands and queries
// ---------------------------------------------------------------------------

/// Kicks a joined player with a reason shown to them.
#[derive(Debug, Clone)]
pub struct KickPlayer {
    pub id: PlayerId,
    pub reason: String,
}

impl Request for KickPlayer {
    type Response = ();
}

/// Starts accepting connections. Idempotent.
#[derive(Debug, Clone, Copy)]
pub struct StartServer;

impl Request for StartServer {
    type Response = ();
}

/// Stops the server and disconnects everyone. Idempotent.
#[derive(Debug, Clone, Copy)]
pub struct StopServer;

impl Request for StopServer {
    type Response = ();
}

/// The `ServerInfoData` answer for a server-list query.
#[derive(Debug, Clone, Copy)]
pub struct GetServerInfo;

impl Request for GetServerInfo {
    type Response = ServerInfo;
}

/// Every ready player, ordered by ID.
#[derive(Debug, Clone, Copy)]
pub struct ListPlayers;

impl Request for ListPlayers {
    type Response = Vec<PlayerSnapshot>;
}
