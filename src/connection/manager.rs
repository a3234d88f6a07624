//! Relay Server Implementation

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

use super::{Connection, ConnectionId, ConnectionRegistry};
use crate::config::Config;
use crate::error::RelayError;
use crate::relay::{BroadcastEngine, ClientSession};

/// Pause after the process runs out of file descriptors
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Server statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerStats {
    pub active_sessions: usize,
    pub registered_connections: usize,
    pub total_accepted: u64,
    pub total_registered: u64,
}

/// How the accept loop reacts to a failed `accept`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AcceptFailure {
    /// The attempt failed, the listener is fine
    Transient,
    /// Out of file descriptors; retry after a pause
    Exhausted,
    /// The listener cannot continue
    Fatal,
}

fn classify_accept_error(e: &io::Error) -> AcceptFailure {
    match e.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionRefused
        | io::ErrorKind::Interrupted
        | io::ErrorKind::TimedOut
        | io::ErrorKind::WouldBlock => AcceptFailure::Transient,
        // ENFILE / EMFILE
        _ if matches!(e.raw_os_error(), Some(23) | Some(24)) => AcceptFailure::Exhausted,
        _ => AcceptFailure::Fatal,
    }
}

/// Accepts TCP connections and runs one session task per connection
pub struct RelayServer {
    /// Taken by the accept loop and dropped before sessions drain
    listener: Mutex<Option<TcpListener>>,
    local_addr: SocketAddr,
    config: Arc<Config>,
    registry: Arc<ConnectionRegistry>,
    engine: BroadcastEngine,
    active_sessions: Arc<AtomicUsize>,
    next_connection_id: AtomicU64,
    total_accepted: AtomicU64,
    shutdown_flag: AtomicBool,
}

impl RelayServer {
    /// Bind the listening endpoint from `config.server.bind_addr`
    pub async fn bind(config: Arc<Config>) -> Result<Self, RelayError> {
        let bind_addr = config.server.bind_addr;

        info!("Binding TCP listener to {}", bind_addr);
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|source| RelayError::Bind {
                addr: bind_addr,
                source,
            })?;

        let local_addr = listener
            .local_addr()
            .map_err(|source| RelayError::Bind {
                addr: bind_addr,
                source,
            })?;
        info!("Successfully bound to {}", local_addr);

        let engine = BroadcastEngine::from_config(&config.relay);
        info!("Broadcast sender policy: {}", engine.sender_policy());

        Ok(Self {
            listener: Mutex::new(Some(listener)),
            local_addr,
            config,
            registry: Arc::new(ConnectionRegistry::new()),
            engine,
            active_sessions: Arc::new(AtomicUsize::new(0)),
            next_connection_id: AtomicU64::new(1),
            total_accepted: AtomicU64::new(0),
            shutdown_flag: AtomicBool::new(false),
        })
    }

    /// The bound address, with an ephemeral port resolved
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Registry of the connections currently receiving broadcasts
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Number of session tasks still running
    pub fn active_sessions(&self) -> usize {
        self.active_sessions.load(Ordering::Relaxed)
    }

    /// Whether the accept loop has stopped
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown_flag.load(Ordering::Relaxed)
    }

    /// Point-in-time server counters
    pub async fn stats(&self) -> ServerStats {
        ServerStats {
            active_sessions: self.active_sessions(),
            registered_connections: self.registry.len().await,
            total_accepted: self.total_accepted.load(Ordering::Relaxed),
            total_registered: self.registry.total_registered(),
        }
    }

    /// Accept connections until the listener fails
    pub async fn run(&self) -> Result<(), RelayError> {
        self.run_until(std::future::pending()).await
    }

    /// Accept connections until `shutdown` completes or the listener fails,
    /// then close every session and wait for them to drain.
    ///
    /// The listener is released before draining, so new connections are
    /// refused during shutdown. A server runs at most once.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<(), RelayError>
    where
        F: Future<Output = ()>,
    {
        let listener = self.listener.lock().await.take().ok_or_else(|| {
            RelayError::Listener(io::Error::new(
                io::ErrorKind::Other,
                "listener already consumed by a previous run",
            ))
        })?;

        info!("Starting connection acceptance loop");
        tokio::pin!(shutdown);

        let result = loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Received shutdown signal, stopping connection acceptance");
                    break Ok(());
                }
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => self.start_session(stream, addr).await,
                        Err(e) => match classify_accept_error(&e) {
                            AcceptFailure::Transient => {
                                warn!("{}", RelayError::Accept(e));
                            }
                            AcceptFailure::Exhausted => {
                                warn!("{}; retrying in {:?}", RelayError::Accept(e), ACCEPT_BACKOFF);
                                tokio::time::sleep(ACCEPT_BACKOFF).await;
                            }
                            AcceptFailure::Fatal => {
                                error!("Listener failed: {}", e);
                                break Err(RelayError::Listener(e));
                            }
                        },
                    }
                }
            }
        };

        self.shutdown_flag.store(true, Ordering::Relaxed);
        drop(listener);
        info!("Connection acceptance loop stopped, listener closed");

        self.close_all_connections().await;
        self.wait_for_sessions_to_close().await;

        result
    }

    /// Register the accepted connection and spawn its session
    async fn start_session(&self, stream: TcpStream, addr: SocketAddr) {
        if self.config.server.tcp_nodelay {
            if let Err(e) = stream.set_nodelay(true) {
                debug!("Failed to set TCP_NODELAY for {}: {}", addr, e);
            }
        }

        self.total_accepted.fetch_add(1, Ordering::Relaxed);
        let connection_id = ConnectionId::new(self.next_connection_id.fetch_add(1, Ordering::Relaxed));
        let (connection, reader) =
            Connection::from_tcp(connection_id, stream, addr, self.config.relay.max_line_length);

        let mut session = ClientSession::new(
            Arc::clone(&connection),
            reader,
            Arc::clone(&self.registry),
            self.engine.clone(),
        );

        if let Err(e) = session.register().await {
            warn!("Rejecting connection {} from {}: {}", connection_id, addr, e);
            connection.close().await;
            return;
        }

        info!("Accepted connection {} from {}", connection_id, addr);

        let registry = Arc::clone(&self.registry);
        let active_sessions = Arc::clone(&self.active_sessions);
        active_sessions.fetch_add(1, Ordering::Relaxed);

        tokio::spawn(async move {
            // A panicking session skips its own teardown; redo it here.
            if let Err(e) = tokio::spawn(session.run()).await {
                error!("Session task for connection {} failed: {}", connection_id, e);
                registry.remove(connection_id).await;
                connection.close().await;
            }

            active_sessions.fetch_sub(1, Ordering::Relaxed);
        });
    }

    /// Close every registered connection, which ends its session's read loop
    pub async fn close_all_connections(&self) {
        let snapshot = self.registry.snapshot().await;
        if snapshot.is_empty() {
            return;
        }

        info!("Closing {} active connections", snapshot.len());
        for connection in snapshot.iter() {
            connection.close().await;
        }
    }

    /// Wait for all sessions to finish, bounded by the shutdown timeout
    pub async fn wait_for_sessions_to_close(&self) {
        let shutdown_timeout = self.config.server.shutdown_timeout;
        let start_time = Instant::now();

        while self.active_sessions() > 0 && start_time.elapsed() < shutdown_timeout {
            debug!("Waiting for {} active sessions to close", self.active_sessions());
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let remaining = self.active_sessions();
        let elapsed = start_time.elapsed();

        if remaining == 0 {
            info!("All sessions closed gracefully in {:?}", elapsed);
        } else {
            warn!(
                "Shutdown timeout reached after {:?} with {} sessions still active",
                elapsed, remaining
            );
        }
    }
}
