//! `Server`: binds the listener and wires every layer together.
//!
//! Each [`start`](Server::start) builds a fresh dispatcher and registry:
//! transport → connection actors → dispatcher → orchestrator → broadcaster.
//! [`stop`](Server::stop) tears all of it down again.
//!
//! [`StartServer`] and [`StopServer`] go through a separate control
//! dispatcher that lives as long as the `Server`, so a stopped server can be
//! started again by command.

use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::future::join_all;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use trailhead_dispatch::{DispatchError, Dispatcher, NotificationHandler, RequestHandler};
use trailhead_protocol::Packet;
use trailhead_session::messages::{Disconnected, StartServer, StopServer};
use trailhead_session::{
    DisconnectReason, EnglishLocalizer, InMemoryProfileStore, Localizer, PlayerLink,
    ProfileStore, SessionOrchestrator, fan_out, keys,
};
use trailhead_transport::{ConnectionId, TcpTransport, Transport};

use crate::broadcast::Broadcaster;
use crate::config::ServerConfig;
use crate::connection::{ActorConfig, ConnectionActor};
use crate::TrailheadError;

/// How long [`Server::stop`] waits for departing players to be cleaned up.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause after a failed accept so a persistent error does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Every live connection, joined or not, keyed by id.
type Connections = DashMap<ConnectionId, Arc<dyn PlayerLink>>;

/// State that exists only while the server runs.
struct Running<S: ProfileStore> {
    local_addr: SocketAddr,
    dispatcher: Dispatcher,
    orchestrator: Arc<SessionOrchestrator<Arc<S>>>,
    connections: Arc<Connections>,
    shutdown: CancellationToken,
    accept_task: JoinHandle<()>,
}

/// A Trailhead game server.
///
/// ```rust,no_run
/// use trailhead::session::messages::StopServer;
/// use trailhead::{Server, ServerConfig};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), trailhead::TrailheadError> {
/// let server = Server::new(ServerConfig::default());
/// let addr = server.start().await?;
/// println!("listening on {addr}");
/// server.control().send(StopServer).await?;
/// # Ok(())
/// # }
/// ```
pub struct Server<S: ProfileStore = InMemoryProfileStore> {
    config: ServerConfig,
    store: Arc<S>,
    localizer: Arc<dyn Localizer>,
    control: Dispatcher,
    state: Mutex<Option<Running<S>>>,
}

impl Server<InMemoryProfileStore> {
    /// A server with in-memory profiles and English server text.
    pub fn new(config: ServerConfig) -> Arc<Self> {
        Self::with_collaborators(
            config,
            InMemoryProfileStore::new(),
            Arc::new(EnglishLocalizer::new()),
        )
    }
}

impl<S: ProfileStore> Server<S> {
    /// A server with a custom profile store and localizer. Profiles outlive
    /// restarts; the registry does not.
    pub fn with_collaborators(
        config: ServerConfig,
        store: S,
        localizer: Arc<dyn Localizer>,
    ) -> Arc<Self> {
        let control = Dispatcher::builder().stages(config.stages()).build();
        let server = Arc::new(Self {
            config,
            store: Arc::new(store),
            localizer,
            control,
            state: Mutex::new(None),
        });
        let registered = server
            .control
            .register_handler::<StartServer, _>(Control(Arc::downgrade(&server)))
            .and_then(|()| {
                server
                    .control
                    .register_handler::<StopServer, _>(Control(Arc::downgrade(&server)))
            });
        if let Err(e) = registered {
            error!(error = %e, "control handlers not registered");
        }
        server
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Binds, wires a fresh dispatcher and starts accepting. Returns the
    /// bound address. Calling it on a running server returns the current
    /// address.
    ///
    /// # Errors
    /// Bind failures and handler registration conflicts.
    pub async fn start(&self) -> Result<SocketAddr, TrailheadError> {
        let mut state = self.state.lock().await;
        if let Some(running) = state.as_ref() {
            return Ok(running.local_addr);
        }

        let transport = TcpTransport::bind(&self.config.server.bind)
            .await?
            .with_max_line_length(self.config.server.max_line_length);
        let local_addr = transport.local_addr()?;

        let dispatcher = Dispatcher::builder()
            .stages(self.config.stages())
            .build();
        let orchestrator = Arc::new(SessionOrchestrator::new(
            self.config.session(),
            Arc::clone(&self.store),
            Arc::clone(&self.localizer),
            dispatcher.clone(),
        ));
        orchestrator.register()?;
        Broadcaster::new(Arc::clone(&orchestrator)).register(&dispatcher);

        let connections: Arc<Connections> = Arc::new(DashMap::new());
        dispatcher.subscribe::<Disconnected, _>(ForgetConnection(Arc::clone(&connections)));

        let shutdown = CancellationToken::new();
        let accept_task = tokio::spawn(accept_loop(
            transport,
            dispatcher.clone(),
            Arc::clone(&connections),
            self.config.actor(),
            shutdown.clone(),
        ));

        info!(%local_addr, name = %self.config.admission.name, "server started");
        *state = Some(Running {
            local_addr,
            dispatcher,
            orchestrator,
            connections,
            shutdown,
            accept_task,
        });
        Ok(local_addr)
    }

    /// Stops accepting, tells every player the server is closing, drops
    /// every connection and waits for the registry to drain. A no-op on a
    /// stopped server.
    pub async fn stop(&self) -> Result<(), TrailheadError> {
        let mut state = self.state.lock().await;
        let Some(running) = state.take() else {
            return Ok(());
        };

        running.shutdown.cancel();
        if let Err(e) = running.accept_task.await {
            error!(error = %e, "accept loop panicked");
        }

        let reason = self.localizer.format(keys::SERVER_CLOSING, &[]);
        let players = running.orchestrator.ready_links(None).await;
        fan_out(&players, &Packet::server_close(reason)).await;

        let live: Vec<Arc<dyn PlayerLink>> = running
            .connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        join_all(
            live.iter()
                .map(|link| link.disconnect(DisconnectReason::ServerStopped)),
        )
        .await;

        let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
            while running.orchestrator.occupancy().await > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        if drained.is_err() {
            let remaining = running.orchestrator.occupancy().await;
            warn!(remaining, "registry did not drain before timeout");
        }

        info!(local_addr = %running.local_addr, "server stopped");
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.is_some()
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.state.lock().await.as_ref().map(|r| r.local_addr)
    }

    /// Serves [`StartServer`] and [`StopServer`], running or not.
    pub fn control(&self) -> &Dispatcher {
        &self.control
    }

    /// The running dispatcher, for sending commands and queries.
    pub async fn dispatcher(&self) -> Option<Dispatcher> {
        self.state.lock().await.as_ref().map(|r| r.dispatcher.clone())
    }

    /// Connections currently open, joined or not.
    pub async fn connection_count(&self) -> usize {
        self.state
            .lock()
            .await
            .as_ref()
            .map_or(0, |r| r.connections.len())
    }
}

async fn accept_loop(
    mut transport: TcpTransport,
    dispatcher: Dispatcher,
    connections: Arc<Connections>,
    actor: ActorConfig,
    shutdown: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            () = shutdown.cancelled() => break,
            accepted = transport.accept() => accepted,
        };
        match accepted {
            Ok(conn) => {
                let actor = ConnectionActor::new(conn, dispatcher.clone(), actor.clone());
                let handle = Arc::clone(actor.handle());
                // Tracked before it runs, so a fast disconnect cannot be
                // forgotten before it is remembered.
                connections.insert(handle.connection_id(), handle as Arc<dyn PlayerLink>);
                actor.spawn();
            }
            Err(e) => {
                error!(error = %e, "accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
    debug!("accept loop stopped");
}

/// Drops closed connections from the server's table.
struct ForgetConnection(Arc<Connections>);

#[async_trait]
impl NotificationHandler<Disconnected> for ForgetConnection {
    async fn handle(&self, n: &Disconnected) -> Result<(), DispatchError> {
        self.0.remove(&n.link.connection_id());
        Ok(())
    }
}

/// Serves [`StartServer`] and [`StopServer`] from the control dispatcher.
struct Control<S: ProfileStore>(Weak<Server<S>>);

#[async_trait]
impl<S: ProfileStore> RequestHandler<StartServer> for Control<S> {
    async fn handle(&self, _: StartServer) -> Result<(), DispatchError> {
        let Some(server) = self.0.upgrade() else {
            return Ok(());
        };
        server.start().await.map(drop).map_err(DispatchError::handler)
    }
}

#[async_trait]
impl<S: ProfileStore> RequestHandler<StopServer> for Control<S> {
    async fn handle(&self, _: StopServer) -> Result<(), DispatchError> {
        let Some(server) = self.0.upgrade() else {
            return Ok(());
        };
        server.stop().await.map_err(DispatchError::handler)
    }
}
