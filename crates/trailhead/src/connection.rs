//! The connection actor: three loops per accepted socket.
//!
//! ```text
//!            ┌── reader ──── GameData ──→ queue ──→ game-data worker ──→ GameDataReceived
//! socket ────┤          └─── other kinds ──→ spawned dispatch task
//!            └── watchdog ── idle too long ──→ disconnect(NoPing)
//! ```
//!
//! All three share one [`ConnectionHandle`], which is also what the session
//! layer holds as its [`PlayerLink`]. A single [`CancellationToken`] stops
//! every loop; the handle's closing flag makes sure `Disconnected` is
//! published once.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use trailhead_dispatch::Dispatcher;
use trailhead_protocol::{Codec, GameData, LineCodec, Packet, PacketType};
use trailhead_session::messages::{
    ChatReceived, Disconnected, GameDataReceived, GamestateReceived, GetServerInfo,
    PrivateMessageReceived,
};
use trailhead_session::{DisconnectReason, PlayerLink};
use trailhead_transport::{Connection, ConnectionId, TransportError};

use crate::TrailheadError;

/// How long `disconnect` waits for the socket shutdown before giving up on
/// a peer that stopped reading.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Per-connection tuning.
#[derive(Debug, Clone)]
pub struct ActorConfig {
    /// Drop the connection after this long without a valid packet.
    pub no_ping_timeout: Duration,
    /// How often the watchdog looks.
    pub watchdog_tick: Duration,
    /// Capacity of the `GameData` queue. A full queue pauses the reader.
    pub game_data_queue: usize,
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            no_ping_timeout: Duration::from_secs(20),
            watchdog_tick: Duration::from_secs(1),
            game_data_queue: 256,
        }
    }
}

type Queued = (i32, GameData);

/// The shared side of a connection: what the session layer sends through
/// and what the three loops run on.
pub struct ConnectionHandle<C> {
    conn: C,
    codec: LineCodec,
    dispatcher: Dispatcher,
    config: ActorConfig,
    cancel: CancellationToken,
    closing: AtomicBool,
    started: Instant,
    /// Milliseconds since `started` at the last valid packet.
    last_valid: AtomicU64,
    me: Weak<Self>,
}

impl<C: Connection<Error = TransportError>> ConnectionHandle<C> {
    fn touch(&self) {
        let now = self.started.elapsed().as_millis();
        self.last_valid
            .store(u64::try_from(now).unwrap_or(u64::MAX), Ordering::Relaxed);
    }

    /// Time since the last valid packet.
    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_valid.load(Ordering::Relaxed));
        self.started.elapsed().saturating_sub(last)
    }

    /// Resolves once the connection has started closing.
    pub async fn closed(&self) {
        self.cancel.cancelled().await;
    }

    fn link(self: &Arc<Self>) -> Arc<dyn PlayerLink> {
        Arc::clone(self) as Arc<dyn PlayerLink>
    }

    // -- Reader ------------------------------------------------------------

    async fn read_loop(self: Arc<Self>, queue: mpsc::Sender<Queued>) {
        loop {
            let read = tokio::select! {
                () = self.cancel.cancelled() => break,
                read = self.conn.recv_line() => read,
            };
            match read {
                Ok(Some(line)) => {
                    if !self.on_line(&line, &queue).await {
                        break;
                    }
                }
                Ok(None) => {
                    self.disconnect(DisconnectReason::RemoteClosed).await;
                    break;
                }
                Err(TransportError::LineTooLong { max }) => {
                    warn!(conn = %self.conn.id(), addr = %self.conn.remote_addr(), max, "line too long");
                    self.disconnect(DisconnectReason::LineTooLong).await;
                    break;
                }
                // The framed reader is finished after an I/O error, so the
                // first fault ends the connection.
                Err(e) => {
                    warn!(
                        conn = %self.conn.id(),
                        addr = %self.conn.remote_addr(),
                        error = %e,
                        "read fault"
                    );
                    self.disconnect(DisconnectReason::ReadFault).await;
                    break;
                }
            }
        }
        debug!(conn = %self.conn.id(), "reader stopped");
    }

    /// Decodes and routes one line. Returns `false` once the connection is
    /// going away.
    async fn on_line(self: &Arc<Self>, line: &str, queue: &mpsc::Sender<Queued>) -> bool {
        let packet = match self.codec.decode(line) {
            Ok(packet) => packet,
            Err(e) => {
                warn!(
                    conn = %self.conn.id(),
                    addr = %self.conn.remote_addr(),
                    error = %e,
                    "discarding undecodable line"
                );
                return true;
            }
        };
        self.touch();

        let kind = packet.packet_type();
        match kind {
            PacketType::GameData => {
                let data = match GameData::from_packet(&packet) {
                    Ok(data) => data,
                    Err(e) => {
                        warn!(conn = %self.conn.id(), addr = %self.conn.remote_addr(), ?kind, error = %e, "bad game data");
                        return true;
                    }
                };
                tokio::select! {
                    () = self.cancel.cancelled() => false,
                    sent = queue.send((packet.origin(), data)) => sent.is_ok(),
                }
            }
            PacketType::Ping => true,
            PacketType::ChatMessage
            | PacketType::PrivateMessage
            | PacketType::GamestateMessage
            | PacketType::ServerDataRequest => {
                tokio::spawn(Arc::clone(self).route(packet));
                true
            }
            kind if kind.is_trade_or_battle() => {
                debug!(conn = %self.conn.id(), ?kind, "trade and battle packets are not relayed");
                true
            }
            kind => {
                warn!(
                    conn = %self.conn.id(),
                    addr = %self.conn.remote_addr(),
                    ?kind,
                    "client sent a server-only packet, dropped"
                );
                true
            }
        }
    }

    /// Turns one non-`GameData` packet into its typed message.
    async fn route(self: Arc<Self>, packet: Packet) {
        let kind = packet.packet_type();
        let link = self.link();
        let result: Result<(), TrailheadError> = match kind {
            PacketType::ChatMessage => self
                .dispatcher
                .publish(ChatReceived {
                    link,
                    text: packet.item(0).to_string(),
                })
                .await
                .map_err(Into::into),
            PacketType::PrivateMessage => self
                .dispatcher
                .publish(PrivateMessageReceived {
                    link,
                    target: packet.item(0).to_string(),
                    text: packet.item(1).to_string(),
                })
                .await
                .map_err(Into::into),
            PacketType::GamestateMessage => self
                .dispatcher
                .publish(GamestateReceived {
                    link,
                    text: packet.item(0).to_string(),
                })
                .await
                .map_err(Into::into),
            PacketType::ServerDataRequest => self.serve_info().await,
            _ => Ok(()),
        };
        if let Err(e) = result {
            warn!(
                conn = %self.conn.id(),
                addr = %self.conn.remote_addr(),
                ?kind,
                error = %e,
                "dispatch failed"
            );
        }
    }

    /// Answers a server-list query and hangs up.
    async fn serve_info(&self) -> Result<(), TrailheadError> {
        let info = self.dispatcher.send(GetServerInfo).await?;
        self.send(&info.to_packet()).await?;
        self.disconnect(DisconnectReason::InfoServed).await;
        Ok(())
    }

    // -- Game-data worker --------------------------------------------------

    async fn game_data_loop(self: Arc<Self>, mut queue: mpsc::Receiver<Queued>) {
        loop {
            let (origin, data) = tokio::select! {
                () = self.cancel.cancelled() => break,
                next = queue.recv() => match next {
                    Some(next) => next,
                    None => break,
                },
            };
            let published = self
                .dispatcher
                .publish(GameDataReceived {
                    link: self.link(),
                    origin,
                    data,
                })
                .await;
            if let Err(e) = published {
                warn!(
                    conn = %self.conn.id(),
                    addr = %self.conn.remote_addr(),
                    kind = ?PacketType::GameData,
                    error = %e,
                    "game data handling failed"
                );
            }
        }
        debug!(conn = %self.conn.id(), "game-data worker stopped");
    }

    // -- Watchdog ----------------------------------------------------------

    async fn watchdog_loop(self: Arc<Self>) {
        let tick = self.config.watchdog_tick.max(Duration::from_millis(1));
        let mut ticks = tokio::time::interval(tick);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                _ = ticks.tick() => {}
            }
            let idle = self.idle_for();
            if idle > self.config.no_ping_timeout {
                info!(
                    conn = %self.conn.id(),
                    addr = %self.conn.remote_addr(),
                    idle_ms = idle.as_millis() as u64,
                    "no ping"
                );
                self.disconnect(DisconnectReason::NoPing).await;
                break;
            }
        }
    }
}

#[async_trait]
impl<C: Connection<Error = TransportError>> PlayerLink for ConnectionHandle<C> {
    fn connection_id(&self) -> ConnectionId {
        self.conn.id()
    }

    fn remote_addr(&self) -> SocketAddr {
        self.conn.remote_addr()
    }

    fn is_open(&self) -> bool {
        !self.closing.load(Ordering::Acquire)
    }

    /// Writes one packet under the connection's writer lock. A no-op once
    /// the connection is closing.
    async fn send(&self, packet: &Packet) -> Result<(), TransportError> {
        if !self.is_open() {
            return Ok(());
        }
        let line = self.codec.encode(packet);
        self.conn.send_line(&line).await.inspect_err(|e| {
            debug!(
                conn = %self.conn.id(),
                addr = %self.conn.remote_addr(),
                kind = ?packet.packet_type(),
                error = %e,
                "send failed"
            );
        })
    }

    async fn disconnect(&self, reason: DisconnectReason) {
        if self.closing.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel.cancel();
        info!(conn = %self.conn.id(), addr = %self.conn.remote_addr(), %reason, "disconnecting");

        match tokio::time::timeout(CLOSE_TIMEOUT, self.conn.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(conn = %self.conn.id(), error = %e, "socket shutdown failed"),
            Err(_) => debug!(conn = %self.conn.id(), "socket shutdown timed out"),
        }

        let Some(me) = self.me.upgrade() else {
            return;
        };
        let dispatcher = self.dispatcher.clone();
        tokio::spawn(async move {
            let conn = me.conn.id();
            let link: Arc<dyn PlayerLink> = me;
            if let Err(e) = dispatcher.publish(Disconnected { link, reason }).await {
                warn!(%conn, error = %e, "disconnect handling failed");
            }
        });
    }
}

/// A connection that has not started its loops yet.
///
/// Create it, register its [`handle`](Self::handle) wherever the server
/// tracks connections, then [`spawn`](Self::spawn) it.
pub struct ConnectionActor<C> {
    handle: Arc<ConnectionHandle<C>>,
    queue_tx: mpsc::Sender<Queued>,
    queue_rx: mpsc::Receiver<Queued>,
}

impl<C: Connection<Error = TransportError>> ConnectionActor<C> {
    pub fn new(conn: C, dispatcher: Dispatcher, config: ActorConfig) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(config.game_data_queue.max(1));
        let handle = Arc::new_cyclic(|me| ConnectionHandle {
            conn,
            codec: LineCodec,
            dispatcher,
            config,
            cancel: CancellationToken::new(),
            closing: AtomicBool::new(false),
            started: Instant::now(),
            last_valid: AtomicU64::new(0),
            me: me.clone(),
        });
        Self {
            handle,
            queue_tx,
            queue_rx,
        }
    }

    pub fn handle(&self) -> &Arc<ConnectionHandle<C>> {
        &self.handle
    }

    /// Starts the reader, the game-data worker and the watchdog.
    pub fn spawn(self) -> Arc<ConnectionHandle<C>> {
        let Self {
            handle,
            queue_tx,
            queue_rx,
        } = self;
        debug!(conn = %handle.conn.id(), addr = %handle.conn.remote_addr(), "connection actor started");
        tokio::spawn(Arc::clone(&handle).read_loop(queue_tx));
        tokio::spawn(Arc::clone(&handle).game_data_loop(queue_rx));
        tokio::spawn(Arc::clone(&handle).watchdog_loop());
        handle
    }
}
