//! linerelay Library
//!
//! A concurrent text-line chat relay. Every connected client may broadcast a
//! newline-delimited line of text to all currently connected clients.

pub mod config;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod relay;
pub mod shutdown;

pub use config::Config;
pub use connection::{ConnectionRegistry, RelayServer};
pub use error::RelayError;
pub use shutdown::ShutdownCoordinator;

/// Common error type for application-level code
pub type Result<T> = anyhow::Result<T>;
