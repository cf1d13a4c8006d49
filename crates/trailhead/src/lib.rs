//! # Trailhead
//!
//! A multiplayer server for P3D-style game clients, speaking protocol 0.5
//! over line-framed TCP.
//!
//! This crate ties the layers together:
//!
//! ```text
//! TcpTransport ──→ ConnectionActor ──→ Dispatcher ──→ SessionOrchestrator
//!                        ↑                                   │
//!                        └──── PlayerLink ←── Broadcaster ←──┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use trailhead::{Server, ServerConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), trailhead::TrailheadError> {
//! let mut config = ServerConfig::default();
//! config.server.bind = "127.0.0.1:15124".into();
//! config.admission.allowed_game_modes = vec!["Kolben".into()];
//!
//! let server = Server::new(config);
//! server.start().await?;
//! tokio::signal::ctrl_c().await.ok();
//! server.stop().await
//! # }
//! ```

mod broadcast;
mod config;
mod connection;
mod error;
mod server;

pub use broadcast::Broadcaster;
pub use config::{
    AdmissionSettings, DispatchSettings, LoggingSettings, ServerConfig, ServerSettings,
};
pub use connection::{ActorConfig, ConnectionActor, ConnectionHandle};
pub use error::{ConfigError, TrailheadError};
pub use server::Server;

pub use trailhead_dispatch as dispatch;
pub use trailhead_protocol as protocol;
pub use trailhead_session as session;
pub use trailhead_transport as transport;
