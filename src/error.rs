//! Relay Error Types
//!
//! Typed errors for the relay core. Application-level code (configuration,
//! the binary) wraps these in `anyhow::Error` through the crate `Result` alias.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use crate::connection::ConnectionId;

/// Errors raised by the listener, the registry, connections and sessions
#[derive(Debug, Error)]
pub enum RelayError {
    /// The listening endpoint could not be established
    #[error("failed to bind listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// A single accept attempt failed; the accept loop keeps running
    #[error("failed to accept connection: {0}")]
    Accept(#[source] io::Error),

    /// The listener itself failed and the accept loop cannot continue
    #[error("listener failed: {0}")]
    Listener(#[source] io::Error),

    #[error("connection {0} is already registered")]
    AlreadyRegistered(ConnectionId),

    #[error("malformed command: {0}")]
    MalformedCommand(String),

    #[error("connection {0} is closed")]
    ConnectionClosed(ConnectionId),

    #[error("timed out writing to connection {0}")]
    WriteTimeout(ConnectionId),

    /// A received line exceeded the configured maximum length
    #[error("connection {id} sent a line longer than {max} bytes")]
    LineTooLong { id: ConnectionId, max: usize },

    /// Read or write failure on a single connection
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
