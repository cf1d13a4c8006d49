//! The capability handle the session layer holds for each connection.

use std::fmt;
use std::net::SocketAddr;

use async_trait::async_trait;
use trailhead_protocol::Packet;
use trailhead_transport::{ConnectionId, TransportError};

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Nothing valid arrived within the no-activity timeout.
    NoPing,
    /// The socket failed while reading.
    ReadFault,
    /// The peer sent a line longer than the configured maximum.
    LineTooLong,
    /// The peer closed its end.
    RemoteClosed,
    /// Refused at admission or kicked by an operator.
    Kicked(String),
    /// The server is shutting down.
    ServerStopped,
    /// A server-info request was answered; such requests never join.
    InfoServed,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoPing => f.write_str("no ping"),
            Self::ReadFault => f.write_str("read fault"),
            Self::LineTooLong => f.write_str("line too long"),
            Self::RemoteClosed => f.write_str("remote closed"),
            Self::Kicked(reason) => write!(f, "kicked: {reason}"),
            Self::ServerStopped => f.write_str("server stopped"),
            Self::InfoServed => f.write_str("server info served"),
        }
    }
}

/// What the session layer may do with a connection it does not own.
///
/// The connection actor implements this; tests implement it with a
/// recorder. Handles are shared as `Arc<dyn PlayerLink>`.
#[async_trait]
pub trait PlayerLink: Send + Sync + 'static {
    fn connection_id(&self) -> ConnectionId;

    fn remote_addr(&self) -> SocketAddr;

    /// `false` once the connection has started closing.
    fn is_open(&self) -> bool;

    /// Encodes and writes one packet. A no-op once the link is closed.
    async fn send(&self, packet: &Packet) -> Result<(), TransportError>;

    /// Closes the connection. Idempotent.
    async fn disconnect(&self, reason: DisconnectReason);
}

impl fmt::Debug for dyn PlayerLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlayerLink")
            .field("connection", &self.connection_id())
            .field("addr", &self.remote_addr())
            .field("open", &self.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disconnect_reason_display() {
        assert_eq!(DisconnectReason::NoPing.to_string(), "no ping");
        assert_eq!(
            DisconnectReason::Kicked("spam".into()).to_string(),
            "kicked: spam"
        );
    }
}
