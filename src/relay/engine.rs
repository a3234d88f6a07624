//! Broadcast Engine

use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::{RelayConfig, SenderPolicy};
use crate::connection::{ConnectionId, Snapshot};
use crate::error::RelayError;

/// Outcome of one fan-out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Write attempts made, one per eligible snapshot member
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
}

/// Writes one payload to every member of a registry snapshot
#[derive(Debug, Clone)]
pub struct BroadcastEngine {
    sender_policy: SenderPolicy,
    write_timeout: Duration,
}

impl BroadcastEngine {
    /// Create an engine with an explicit policy and per-write timeout
    pub fn new(sender_policy: SenderPolicy, write_timeout: Duration) -> Self {
        Self {
            sender_policy,
            write_timeout,
        }
    }

    /// Create an engine from the `[relay]` configuration section
    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(config.sender_policy, config.write_timeout)
    }

    /// Whether broadcasts are delivered back to their sender
    pub fn sender_policy(&self) -> SenderPolicy {
        self.sender_policy
    }

    /// Deliver `payload` to the snapshot members.
    ///
    /// A failing recipient is logged and counted; it never stops delivery to
    /// the remaining members. A recipient that times out may hold a partial
    /// line, so it is closed.
    pub async fn fan_out(&self, snapshot: &Snapshot, sender: ConnectionId, payload: &str) -> BroadcastReport {
        let mut report = BroadcastReport::default();

        for recipient in snapshot.iter() {
            if recipient.id() == sender && !self.sender_policy.includes_sender() {
                continue;
            }

            report.attempted += 1;

            let result = match timeout(self.write_timeout, recipient.write_line(payload)).await {
                Ok(result) => result,
                Err(_) => Err(RelayError::WriteTimeout(recipient.id())),
            };

            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        connection_id = %recipient.id(),
                        peer = %recipient.peer_addr(),
                        "Broadcast delivery failed: {}", e
                    );
                    if matches!(e, RelayError::WriteTimeout(_)) {
                        recipient.close().await;
                    }
                }
            }
        }

        debug!(
            sender = %sender,
            attempted = report.attempted,
            delivered = report.delivered,
            failed = report.failed,
            "Broadcast fan-out completed"
        );

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{Connection, ConnectionRegistry};
    use std::net::SocketAddr;
    use std::sync::Arc;
    use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream};

    fn test_addr() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    /// Register a connection whose peer end is returned for inspection
    async fn register_peer(registry: &ConnectionRegistry, id: u64) -> (Arc<Connection>, DuplexStream) {
        let (client, server) = tokio::io::duplex(1024);
        let (read_half, write_half) = tokio::io::split(server);
        let (connection, _reader) = Connection::new(ConnectionId::new(id), test_addr(), read_half, write_half);
        registry.add(Arc::clone(&connection)).await.unwrap();
        (connection, client)
    }

    async fn next_line(client: DuplexStream) -> String {
        let mut line = String::new();
        BufReader::new(client).read_line(&mut line).await.unwrap();
        line
    }

    #[tokio::test]
    async fn test_fan_out_include_sender() {
        let registry = ConnectionRegistry::new();
        let (_a, client_a) = register_peer(&registry, 1).await;
        let (_b, client_b) = register_peer(&registry, 2).await;

        let engine = BroadcastEngine::new(SenderPolicy::Include, Duration::from_secs(1));
        let report = engine
            .fan_out(&registry.snapshot().await, ConnectionId::new(1), "hello")
            .await;

        assert_eq!(report, BroadcastReport { attempted: 2, delivered: 2, failed: 0 });
        assert_eq!(next_line(client_a).await, "hello\n");
        assert_eq!(next_line(client_b).await, "hello\n");
    }

    #[tokio::test]
    async fn test_fan_out_exclude_sender() {
        let registry = ConnectionRegistry::new();
        let (_a, _client_a) = register_peer(&registry, 1).await;
        let (_b, client_b) = register_peer(&registry, 2).await;

        let engine = BroadcastEngine::new(SenderPolicy::Exclude, Duration::from_secs(1));
        let report = engine
            .fan_out(&registry.snapshot().await, ConnectionId::new(1), "hello")
            .await;

        assert_eq!(report, BroadcastReport { attempted: 1, delivered: 1, failed: 0 });
        assert_eq!(next_line(client_b).await, "hello\n");
    }

    #[tokio::test]
    async fn test_failed_recipient_does_not_stop_delivery() {
        let registry = ConnectionRegistry::new();
        let (_a, _client_a) = register_peer(&registry, 1).await;
        let (b, _client_b) = register_peer(&registry, 2).await;
        let (_c, client_c) = register_peer(&registry, 3).await;

        let snapshot = registry.snapshot().await;
        // B goes away after the snapshot was taken
        b.close().await;
        registry.remove(b.id()).await;

        let engine = BroadcastEngine::new(SenderPolicy::Include, Duration::from_secs(1));
        let report = engine.fan_out(&snapshot, ConnectionId::new(1), "z").await;

        assert_eq!(report.attempted, 3);
        assert_eq!(report.delivered, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(next_line(client_c).await, "z\n");
    }

    #[tokio::test]
    async fn test_dropped_peer_counts_as_failure() {
        let registry = ConnectionRegistry::new();
        let (_a, client_a) = register_peer(&registry, 1).await;
        let (_b, client_b) = register_peer(&registry, 2).await;
        drop(client_b);

        let engine = BroadcastEngine::new(SenderPolicy::Include, Duration::from_secs(1));
        let report = engine
            .fan_out(&registry.snapshot().await, ConnectionId::new(1), "still here")
            .await;

        assert_eq!(report.attempted, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(next_line(client_a).await, "still here\n");
    }

    #[tokio::test]
    async fn test_stalled_recipient_times_out() {
        let registry = ConnectionRegistry::new();
        // A peer that never reads, with a buffer smaller than the payload
        let (stalled_client, server) = tokio::io::duplex(4);
        let (read_half, write_half) = tokio::io::split(server);
        let (stalled, _reader) = Connection::new(ConnectionId::new(1), test_addr(), read_half, write_half);
        registry.add(Arc::clone(&stalled)).await.unwrap();
        let (_b, client_b) = register_peer(&registry, 2).await;

        let engine = BroadcastEngine::new(SenderPolicy::Include, Duration::from_millis(50));
        let report = engine
            .fan_out(&registry.snapshot().await, ConnectionId::new(2), "a payload longer than four bytes")
            .await;

        assert_eq!(report, BroadcastReport { attempted: 2, delivered: 1, failed: 1 });
        assert_eq!(next_line(client_b).await, "a payload longer than four bytes\n");
        assert!(stalled.is_closed());
        drop(stalled_client);
    }

    #[tokio::test]
    async fn test_empty_snapshot() {
        let registry = ConnectionRegistry::new();
        let engine = BroadcastEngine::from_config(&RelayConfig::default());
        let report = engine
            .fan_out(&registry.snapshot().await, ConnectionId::new(1), "nobody")
            .await;
        assert_eq!(report, BroadcastReport::default());
    }
}
