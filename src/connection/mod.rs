//! Connection Management Module
//! 
//! Handles TCP connection acceptance, the live connection registry, and the
//! line transport for each peer.

pub mod manager;
pub mod registry;
pub mod transport;

pub use manager::{RelayServer, ServerStats};
pub use registry::{ConnectionRegistry, Snapshot};
pub use transport::{Connection, ConnectionId, ConnectionReader};
