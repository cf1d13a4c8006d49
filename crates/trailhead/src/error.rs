//! Unified error type for the Trailhead server.

use std::io;

use trailhead_dispatch::DispatchError;
use trailhead_protocol::ProtocolError;
use trailhead_session::SessionError;
use trailhead_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant generates the `From` impls, so
/// `?` converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum TrailheadError {
    /// A transport-level error (bind, accept, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (malformed line, bad arity).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session-level error (unknown player, profile lookup).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A dispatch error (missing handler, rejected request, handler failure).
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Loading or validating `trailhead.toml`.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file i/o failed: {0}")]
    Io(#[from] io::Error),

    #[error("config file is not valid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("could not serialize default config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
