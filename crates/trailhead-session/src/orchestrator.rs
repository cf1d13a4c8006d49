//! The session orchestrator: the authoritative player registry.
//!
//! Every connection moves through one state machine:
//!
//! ```text
//! Anonymous ──full GameData──→ Joining ──admitted + profile──→ Joined ──disconnect──→ Left
//!     │                           │
//!     └──refused: Kicked + close  └──disconnected meanwhile: ID freed
//! ```
//!
//! "Anonymous" and "Left" are not stored: a connection without a registry
//! entry is one or the other.
//!
//! # Concurrency
//!
//! The registry sits behind a single `tokio::sync::Mutex`. It is never held
//! across network I/O or the profile lookup: handlers copy what they need,
//! release the lock, then send.
//!
//! Roster changes (a join's introduction, a departure) are serialized by a
//! second lock that is held while [`PlayerJoined`] and [`PlayerLeft`] are
//! published. A new player stays hidden from every broadcast until all
//! `PlayerJoined` handlers have run, so its own `Id` and the list of players
//! already present always reach it first, and each pair of players is
//! introduced exactly once.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use tokio::sync::Mutex;
use trailhead_dispatch::{DispatchError, Dispatcher, NotificationHandler, RequestHandler};
use trailhead_protocol::{GameData, Packet, PlayerId, SERVER_ORIGIN, ServerInfo};
use trailhead_transport::ConnectionId;

use crate::admission::Occupancy;
use crate::locale::keys;
use crate::messages::{
    ChatReceived, Disconnected, GameDataReceived, GamestateReceived, GetServerInfo,
    KickPlayer, ListPlayers, PlayerJoined, PlayerLeft, PlayerSnapshot, PlayerUpdated,
    PrivateMessageReceived,
};
use crate::{
    DisconnectReason, IdAllocator, Localizer, PlayerLink, ProfileIdentity, ProfileRecord,
    ProfileStore, SessionConfig, SessionError,
};

/// A joined player.
struct Player {
    link: Arc<dyn PlayerLink>,
    identity: ProfileIdentity,
    profile: ProfileRecord,
    data: GameData,
    /// Set once the player has been introduced; only ready players are
    /// listed or receive broadcasts.
    ready: bool,
}

impl Player {
    fn snapshot(&self, id: PlayerId) -> PlayerSnapshot {
        PlayerSnapshot {
            id,
            name: self.data.name().to_string(),
            gamejolt: self.identity.is_gamejolt(),
            data: self.data.clone(),
        }
    }
}

#[derive(Debug, Clone)]
enum ConnectionState {
    Joining { id: PlayerId, identity: ProfileIdentity },
    Joined(PlayerId),
}

#[derive(Default)]
struct Registry {
    players: BTreeMap<PlayerId, Player>,
    connections: HashMap<ConnectionId, ConnectionState>,
    ids: IdAllocator,
}

impl Registry {
    fn identity_online(&self, identity: &ProfileIdentity) -> bool {
        let key = identity.key();
        self.connections.values().any(|state| match state {
            ConnectionState::Joining { identity, .. } => identity.key() == key,
            ConnectionState::Joined(id) => self
                .players
                .get(id)
                .is_some_and(|p| p.identity.key() == key),
        })
    }

    fn ready_links(&self, except: Option<PlayerId>) -> Vec<Arc<dyn PlayerLink>> {
        self.players
            .iter()
            .filter(|(id, p)| p.ready && Some(**id) != except)
            .map(|(_, p)| Arc::clone(&p.link))
            .collect()
    }

    /// Removes `conn` and frees its ID. Returns the player if it had
    /// joined. A second call for the same connection finds nothing.
    fn remove(&mut self, conn: ConnectionId) -> Option<(PlayerId, Player)> {
        match self.connections.remove(&conn)? {
            ConnectionState::Joining { id, .. } => {
                self.ids.free(id);
                None
            }
            ConnectionState::Joined(id) => {
                self.ids.free(id);
                self.players.remove(&id).map(|p| (id, p))
            }
        }
    }
}

/// Owns the player registry and turns connection events into player
/// lifecycle events.
///
/// Create one per server run, wrap it in an `Arc`, and call
/// [`register`](Self::register) to subscribe it to its dispatcher.
pub struct SessionOrchestrator<S: ProfileStore> {
    config: SessionConfig,
    store: S,
    localizer: Arc<dyn Localizer>,
    dispatcher: Dispatcher,
    registry: Mutex<Registry>,
    roster: Mutex<()>,
}

impl<S: ProfileStore> SessionOrchestrator<S> {
    pub fn new(
        config: SessionConfig,
        store: S,
        localizer: Arc<dyn Localizer>,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            config,
            store,
            localizer,
            dispatcher,
            registry: Mutex::new(Registry::default()),
            roster: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn localizer(&self) -> &dyn Localizer {
        self.localizer.as_ref()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Subscribes the orchestrator to the connection notifications and
    /// registers its command and query handlers.
    ///
    /// # Errors
    /// [`DispatchError::AlreadyRegistered`] if another orchestrator was
    /// registered on the same dispatcher.
    pub fn register(self: &Arc<Self>) -> Result<(), DispatchError> {
        let d = &self.dispatcher;
        d.subscribe::<GameDataReceived, _>(Handler(Arc::clone(self)));
        d.subscribe::<ChatReceived, _>(Handler(Arc::clone(self)));
        d.subscribe::<PrivateMessageReceived, _>(Handler(Arc::clone(self)));
        d.subscribe::<GamestateReceived, _>(Handler(Arc::clone(self)));
        d.subscribe::<Disconnected, _>(Handler(Arc::clone(self)));
        d.register_handler::<KickPlayer, _>(Handler(Arc::clone(self)))?;
        d.register_handler::<GetServerInfo, _>(Handler(Arc::clone(self)))?;
        d.register_handler::<ListPlayers, _>(Handler(Arc::clone(self)))?;
        Ok(())
    }

    // -- Queries -----------------------------------------------------------

    /// Ready players, ordered by ID.
    pub async fn players(&self) -> Vec<PlayerSnapshot> {
        let registry = self.registry.lock().await;
        registry
            .players
            .iter()
            .filter(|(_, p)| p.ready)
            .map(|(id, p)| p.snapshot(*id))
            .collect()
    }

    /// Joined players, introduced or not.
    pub async fn player_count(&self) -> usize {
        self.registry.lock().await.players.len()
    }

    /// Joined plus joining connections.
    pub async fn occupancy(&self) -> usize {
        self.registry.lock().await.connections.len()
    }

    pub async fn server_info(&self) -> ServerInfo {
        let players = self.players().await;
        ServerInfo {
            player_count: players.len(),
            max_players: self.config.max_players,
            name: self.config.server_name.clone(),
            message: self.config.server_message.clone(),
            player_names: players.into_iter().map(|p| p.name).collect(),
        }
    }

    /// Links of every ready player, optionally excluding one.
    pub async fn ready_links(&self, except: Option<PlayerId>) -> Vec<Arc<dyn PlayerLink>> {
        self.registry.lock().await.ready_links(except)
    }

    /// The joined player behind `conn`, if any.
    pub async fn player_id(&self, conn: ConnectionId) -> Option<PlayerId> {
        match self.registry.lock().await.connections.get(&conn) {
            Some(ConnectionState::Joined(id)) => Some(*id),
            _ => None,
        }
    }

    // -- Connection events -------------------------------------------------

    /// Handles a `GameData` packet: a join on a fresh connection, a
    /// partial update on a joined one.
    ///
    /// # Errors
    /// Profile lookup and follow-up publish failures. Refused joins are
    /// not errors.
    pub async fn handle_game_data(
        &self,
        link: &Arc<dyn PlayerLink>,
        origin: i32,
        data: GameData,
    ) -> Result<(), SessionError> {
        let conn = link.connection_id();
        let mut registry = self.registry.lock().await;

        match registry.connections.get(&conn).cloned() {
            Some(ConnectionState::Joined(id)) => {
                if PlayerId::from_origin(origin).is_some_and(|o| o != id) {
                    tracing::debug!(%conn, %id, origin, "game data origin does not match sender");
                }
                let Some(player) = registry.players.get_mut(&id) else {
                    return Ok(());
                };
                if !player.data.apply_partial(&data) {
                    return Ok(());
                }
                let snapshot = player.snapshot(id);
                drop(registry);
                self.dispatcher.publish(PlayerUpdated { player: snapshot }).await?;
                Ok(())
            }
            Some(ConnectionState::Joining { id, .. }) => {
                tracing::debug!(%conn, %id, "game data while joining, dropped");
                Ok(())
            }
            None => {
                if origin != SERVER_ORIGIN || !data.has_identity() {
                    tracing::debug!(
                        %conn,
                        addr = %link.remote_addr(),
                        origin,
                        "game data from a connection that has not joined, ignored"
                    );
                    return Ok(());
                }
                if !link.is_open() {
                    return Ok(());
                }
                let identity = ProfileIdentity::from_game_data(&data);
                let occupancy = Occupancy {
                    taken: registry.connections.len(),
                    identity_online: registry.identity_online(&identity),
                };
                if let Err(denial) = self.config.admit(&data, &identity, occupancy) {
                    drop(registry);
                    tracing::info!(
                        %conn,
                        addr = %link.remote_addr(),
                        %identity,
                        ?denial,
                        "join refused"
                    );
                    let reason = denial.localize(self.localizer.as_ref());
                    self.refuse(link, reason).await;
                    return Ok(());
                }

                let id = registry.ids.allocate();
                registry.connections.insert(
                    conn,
                    ConnectionState::Joining {
                        id,
                        identity: identity.clone(),
                    },
                );
                drop(registry);

                self.complete_join(link, id, identity, data).await
            }
        }
    }

    /// Second half of a join: profile lookup outside the lock, then the
    /// `Joining → Joined` transition if the connection is still there.
    async fn complete_join(
        &self,
        link: &Arc<dyn PlayerLink>,
        id: PlayerId,
        identity: ProfileIdentity,
        data: GameData,
    ) -> Result<(), SessionError> {
        let conn = link.connection_id();
        let profile = match self.store.get_or_create_profile(&identity).await {
            Ok(profile) => profile,
            Err(e) => {
                self.registry.lock().await.remove(conn);
                tracing::error!(%conn, addr = %link.remote_addr(), %identity, error = %e, "profile lookup failed");
                let reason = self.localizer.format(keys::PROFILE_UNAVAILABLE, &[]);
                self.refuse(link, reason).await;
                return Err(e);
            }
        };

        let _roster = self.roster.lock().await;
        let mut registry = self.registry.lock().await;
        let still_joining = matches!(
            registry.connections.get(&conn),
            Some(ConnectionState::Joining { id: pending, .. }) if *pending == id
        );
        if !still_joining {
            // Disconnected while the profile was loading; that path freed
            // the ID already.
            tracing::debug!(%conn, %id, "connection left before join completed");
            return Ok(());
        }
        if !link.is_open() {
            registry.remove(conn);
            return Ok(());
        }

        let others: Vec<PlayerSnapshot> = registry
            .players
            .iter()
            .filter(|(_, p)| p.ready)
            .map(|(other, p)| p.snapshot(*other))
            .collect();
        registry.connections.insert(conn, ConnectionState::Joined(id));
        let player = Player {
            link: Arc::clone(link),
            identity,
            profile,
            data,
            ready: false,
        };
        let snapshot = player.snapshot(id);
        registry.players.insert(id, player);
        drop(registry);

        tracing::info!(%conn, addr = %link.remote_addr(), %id, name = %snapshot.name, "player joined");
        let published = self
            .dispatcher
            .publish(PlayerJoined {
                player: snapshot,
                link: Arc::clone(link),
                others,
            })
            .await;

        // Departures wait on the roster lock, so the player is still here.
        if let Some(player) = self.registry.lock().await.players.get_mut(&id) {
            player.ready = true;
        }
        published?;
        Ok(())
    }

    async fn refuse(&self, link: &Arc<dyn PlayerLink>, reason: String) {
        if let Err(e) = link.send(&Packet::kicked(reason.clone())).await {
            tracing::debug!(conn = %link.connection_id(), error = %e, "could not deliver kick reason");
        }
        link.disconnect(DisconnectReason::Kicked(reason)).await;
    }

    /// Removes the connection's player, if any, and publishes
    /// [`PlayerLeft`]. Duplicate calls are no-ops.
    ///
    /// # Errors
    /// Only if publishing `PlayerLeft` fails.
    pub async fn handle_disconnected(
        &self,
        link: &Arc<dyn PlayerLink>,
        reason: DisconnectReason,
    ) -> Result<(), SessionError> {
        let conn = link.connection_id();
        let _roster = self.roster.lock().await;
        let removed = self.registry.lock().await.remove(conn);
        let Some((id, player)) = removed else {
            return Ok(());
        };
        let name = player.data.name().to_string();
        tracing::info!(
            %conn,
            %id,
            name = %name,
            joins = player.profile.joins,
            %reason,
            "player left"
        );
        self.dispatcher.publish(PlayerLeft { id, name, reason }).await?;
        Ok(())
    }

    /// Relays chat from a joined player to every ready player, the sender
    /// included.
    pub async fn handle_chat(&self, link: &Arc<dyn PlayerLink>, text: &str) {
        let (sender, links) = {
            let registry = self.registry.lock().await;
            let Some(ConnectionState::Joined(id)) = registry.connections.get(&link.connection_id()) else {
                tracing::debug!(conn = %link.connection_id(), "chat before join, ignored");
                return;
            };
            (*id, registry.ready_links(None))
        };
        fan_out(&links, &Packet::chat(sender.origin(), text)).await;
    }

    /// Delivers a private message to the player named `target` and echoes
    /// it to the sender. Unknown targets get a "not online" notice.
    pub async fn handle_private_message(
        &self,
        link: &Arc<dyn PlayerLink>,
        target: &str,
        text: &str,
    ) {
        let (sender, recipient) = {
            let registry = self.registry.lock().await;
            let Some(ConnectionState::Joined(id)) = registry.connections.get(&link.connection_id()) else {
                return;
            };
            let recipient = registry
                .players
                .values()
                .find(|p| p.ready && p.data.name() == target)
                .map(|p| Arc::clone(&p.link));
            (*id, recipient)
        };

        let Some(recipient) = recipient else {
            let notice = self.localizer.format(keys::NOT_ONLINE, &[target]);
            if let Err(e) = link.send(&Packet::server_message(notice)).await {
                tracing::debug!(conn = %link.connection_id(), error = %e, "send failed");
            }
            return;
        };

        let packet = Packet::private_message(sender.origin(), target, text);
        fan_out(&[recipient, Arc::clone(link)], &packet).await;
    }

    /// Relays a gamestate message to every other ready player.
    pub async fn handle_gamestate(&self, link: &Arc<dyn PlayerLink>, text: &str) {
        let (sender, links) = {
            let registry = self.registry.lock().await;
            let Some(ConnectionState::Joined(id)) = registry.connections.get(&link.connection_id()) else {
                return;
            };
            (*id, registry.ready_links(Some(*id)))
        };
        fan_out(&links, &Packet::gamestate(sender.origin(), text)).await;
    }

    // -- Commands ----------------------------------------------------------

    /// Sends `Kicked [reason]` to a joined player and disconnects it. The
    /// usual disconnect path then publishes [`PlayerLeft`].
    ///
    /// # Errors
    /// [`SessionError::UnknownPlayer`] if nobody has this ID.
    pub async fn kick(&self, id: PlayerId, reason: &str) -> Result<(), SessionError> {
        let link = self
            .registry
            .lock()
            .await
            .players
            .get(&id)
            .map(|p| Arc::clone(&p.link))
            .ok_or(SessionError::UnknownPlayer(id))?;
        tracing::info!(%id, reason, "kicking player");
        self.refuse(&link, reason.to_string()).await;
        Ok(())
    }
}

/// Sends one packet to many links concurrently. Failures are logged per
/// link and otherwise ignored; a dead link is cleaned up by its own actor.
pub async fn fan_out(links: &[Arc<dyn PlayerLink>], packet: &Packet) {
    let sends = links.iter().map(|link| async move {
        if let Err(e) = link.send(packet).await {
            tracing::debug!(
                conn = %link.connection_id(),
                addr = %link.remote_addr(),
                kind = ?packet.packet_type(),
                error = %e,
                "broadcast send failed"
            );
        }
    });
    join_all(sends).await;
}

/// Adapts the orchestrator to the dispatcher's handler traits.
struct Handler<S: ProfileStore>(Arc<SessionOrchestrator<S>>);

#[async_trait]
impl<S: ProfileStore> NotificationHandler<GameDataReceived> for Handler<S> {
    async fn handle(&self, n: &GameDataReceived) -> Result<(), DispatchError> {
        Ok(self.0.handle_game_data(&n.link, n.origin, n.data.clone()).await?)
    }
}

#[async_trait]
impl<S: ProfileStore> NotificationHandler<ChatReceived> for Handler<S> {
    async fn handle(&self, n: &ChatReceived) -> Result<(), DispatchError> {
        self.0.handle_chat(&n.link, &n.text).await;
        Ok(())
    }
}

#[async_trait]
impl<S: ProfileStore> NotificationHandler<PrivateMessageReceived> for Handler<S> {
    async fn handle(&self, n: &PrivateMessageReceived) -> Result<(), DispatchError> {
        self.0.handle_private_message(&n.link, &n.target, &n.text).await;
        Ok(())
    }
}

#[async_trait]
impl<S: ProfileStore> NotificationHandler<GamestateReceived> for Handler<S> {
    async fn handle(&self, n: &GamestateReceived) -> Result<(), DispatchError> {
        self.0.handle_gamestate(&n.link, &n.text).await;
        Ok(())
    }
}

#[async_trait]
impl<S: ProfileStore> NotificationHandler<Disconnected> for Handler<S> {
    async fn handle(&self, n: &Disconnected) -> Result<(), DispatchError> {
        Ok(self.0.handle_disconnected(&n.link, n.reason.clone()).await?)
    }
}

#[async_trait]
impl<S: ProfileStore> RequestHandler<KickPlayer> for Handler<S> {
    async fn handle(&self, req: KickPlayer) -> Result<(), DispatchError> {
        Ok(self.0.kick(req.id, &req.reason).await?)
    }
}

#[async_trait]
impl<S: ProfileStore> RequestHandler<GetServerInfo> for Handler<S> {
    async fn handle(&self, _: GetServerInfo) -> Result<ServerInfo, DispatchError> {
        Ok(self.0.server_info().await)
    }
}

#[async_trait]
impl<S: ProfileStore> RequestHandler<ListPlayers> for Handler<S> {
    async fn handle(&self, _: ListPlayers) -> Result<Vec<PlayerSnapshot>, DispatchError> {
        Ok(self.0.players().await)
    }
}
