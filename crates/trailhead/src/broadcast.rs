//! Turns player lifecycle events into the packets other clients need.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use trailhead_dispatch::{DispatchError, Dispatcher, NotificationHandler};
use trailhead_protocol::Packet;
use trailhead_session::messages::{PlayerJoined, PlayerLeft, PlayerUpdated};
use trailhead_session::{
    DisconnectReason, PlayerLink, ProfileStore, SessionOrchestrator, fan_out, keys,
};

/// Subscribes to [`PlayerJoined`], [`PlayerUpdated`] and [`PlayerLeft`].
pub struct Broadcaster<S: ProfileStore> {
    orchestrator: Arc<SessionOrchestrator<S>>,
}

impl<S: ProfileStore> Broadcaster<S> {
    pub fn new(orchestrator: Arc<SessionOrchestrator<S>>) -> Arc<Self> {
        Arc::new(Self { orchestrator })
    }

    pub fn register(self: &Arc<Self>, dispatcher: &Dispatcher) {
        dispatcher.subscribe::<PlayerJoined, _>(Subscriber(Arc::clone(self)));
        dispatcher.subscribe::<PlayerUpdated, _>(Subscriber(Arc::clone(self)));
        dispatcher.subscribe::<PlayerLeft, _>(Subscriber(Arc::clone(self)));
    }

    /// Introduces a new player:
    ///
    /// 1. `Id` to the joiner
    /// 2. every player already present, `CreatePlayer` then `GameData`, to the joiner
    /// 3. the joiner's `CreatePlayer` and `GameData` to everyone else
    /// 4. a "joined" notice to everyone, the joiner included
    /// 5. the welcome message to the joiner
    ///
    /// The joiner is not yet ready, so nothing else reaches it in between.
    pub async fn player_joined(&self, joined: &PlayerJoined) {
        let joiner = &joined.link;
        let player = &joined.player;
        let id = player.id;

        send(joiner, &Packet::id(id)).await;
        for other in &joined.others {
            send(joiner, &Packet::create_player(other.id)).await;
            send(joiner, &other.data.to_packet(other.id.origin())).await;
        }

        let mut links = self.orchestrator.ready_links(Some(id)).await;
        fan_out(&links, &Packet::create_player(id)).await;
        fan_out(&links, &player.data.to_packet(id.origin())).await;

        let localizer = self.orchestrator.localizer();
        let notice = localizer.format(keys::PLAYER_JOINED, &[player.name.as_str()]);
        links.push(Arc::clone(joiner));
        fan_out(&links, &Packet::server_message(notice)).await;

        let config = self.orchestrator.config();
        let welcome = localizer.format(
            keys::WELCOME,
            &[config.server_name.as_str(), config.server_message.as_str()],
        );
        send(joiner, &Packet::server_message(welcome)).await;
    }

    /// Forwards the merged state to everyone but the player.
    pub async fn player_updated(&self, updated: &PlayerUpdated) {
        let id = updated.player.id;
        let links = self.orchestrator.ready_links(Some(id)).await;
        fan_out(&links, &updated.player.data.to_packet(id.origin())).await;
    }

    /// Removes the player's avatar from every remaining client.
    pub async fn player_left(&self, left: &PlayerLeft) {
        let links = self.orchestrator.ready_links(None).await;
        fan_out(&links, &Packet::destroy_player(left.id)).await;

        let localizer = self.orchestrator.localizer();
        let notice = match &left.reason {
            DisconnectReason::Kicked(reason) => localizer.format(
                keys::PLAYER_KICKED,
                &[left.name.as_str(), reason.as_str()],
            ),
            _ => localizer.format(keys::PLAYER_LEFT, &[left.name.as_str()]),
        };
        fan_out(&links, &Packet::server_message(notice)).await;
    }
}

async fn send(link: &Arc<dyn PlayerLink>, packet: &Packet) {
    if let Err(e) = link.send(packet).await {
        debug!(
            conn = %link.connection_id(),
            addr = %link.remote_addr(),
            kind = ?packet.packet_type(),
            error = %e,
            "send failed"
        );
    }
}

struct Subscriber<S: ProfileStore>(Arc<Broadcaster<S>>);

#[async_trait]
impl<S: ProfileStore> NotificationHandler<PlayerJoined> for Subscriber<S> {
    async fn handle(&self, n: &PlayerJoined) -> Result<(), DispatchError> {
        self.0.player_joined(n).await;
        Ok(())
    }
}

#[async_trait]
impl<S: ProfileStore> NotificationHandler<PlayerUpdated> for Subscriber<S> {
    async fn handle(&self, n: &PlayerUpdated) -> Result<(), DispatchError> {
        self.0.player_updated(n).await;
        Ok(())
    }
}

#[async_trait]
impl<S: ProfileStore> NotificationHandler<PlayerLeft> for Subscriber<S> {
    async fn handle(&self, n: &PlayerLeft) -> Result<(), DispatchError> {
        self.0.player_left(n).await;
        Ok(())
    }
}
