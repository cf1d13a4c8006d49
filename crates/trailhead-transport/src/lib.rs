//! Transport abstraction layer for Trailhead.
//!
//! Provides the [`Transport`] and [`Connection`] traits, and their TCP
//! implementation: every message is one UTF-8 line terminated by `\n`.
//!
//! The transport knows nothing about packets. It hands lines up and writes
//! lines down; the protocol crate gives them meaning.

mod error;
mod tcp;

pub use error::TransportError;
pub use tcp::{DEFAULT_MAX_LINE_LENGTH, TcpConnection, TcpTransport};

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;

/// Opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Accepts new incoming connections.
pub trait Transport: Send + Sync + 'static {
    /// The connection type produced by this transport.
    type Connection: Connection;
    /// The error type for transport operations.
    type Error: std::error::Error + Send + Sync;

    /// Waits for and accepts the next incoming connection.
    fn accept(
        &mut self,
    ) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send;

    /// Returns the address the transport is listening on.
    fn local_addr(&self) -> Result<SocketAddr, Self::Error>;
}

/// A single connection that exchanges lines of text.
///
/// Reads and writes are independent: one task may block in
/// [`recv_line`](Connection::recv_line) while others call
/// [`send_line`](Connection::send_line). Concurrent senders are serialized
/// so lines never interleave.
pub trait Connection: Send + Sync + 'static {
    /// The error type for connection operations.
    type Error: std::error::Error + Send + Sync;

    /// Writes one line (a `\n` is appended).
    fn send_line(
        &self,
        line: &str,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Receives the next line, without its terminator.
    ///
    /// Returns `Ok(None)` when the peer closed the connection.
    fn recv_line(
        &self,
    ) -> impl Future<Output = Result<Option<String>, Self::Error>> + Send;

    /// Shuts down the write side. Further reads see end of stream once the
    /// peer closes too.
    fn close(&self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;

    /// Returns the peer's address.
    fn remote_addr(&self) -> SocketAddr;
}
