//! Client Session

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};

use super::BroadcastEngine;
use crate::connection::{Connection, ConnectionReader, ConnectionRegistry};
use crate::error::RelayError;
use crate::protocol::Command;

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Constructed, registry add pending
    Accepted,
    /// Registered, read loop running
    Active,
    /// Teardown in progress
    Closing,
    /// Unregistered and connection closed
    Closed,
}

/// Why a session's read loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// Peer sent `/quit`
    Quit,
    /// Peer closed its end of the stream
    PeerClosed,
    /// Connection was closed from the server side
    Cancelled,
    /// Read failed
    ReadError(String),
    /// The connection could not be registered
    RegistrationFailed(String),
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::Quit => write!(f, "quit"),
            ExitReason::PeerClosed => write!(f, "peer closed"),
            ExitReason::Cancelled => write!(f, "cancelled"),
            ExitReason::ReadError(e) => write!(f, "read error: {}", e),
            ExitReason::RegistrationFailed(e) => write!(f, "registration failed: {}", e),
        }
    }
}

/// Counters reported when a session ends
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub exit_reason: ExitReason,
    pub lines_received: u64,
    pub broadcasts_sent: u64,
    pub malformed_commands: u64,
    pub duration: Duration,
}

/// One accepted connection: its read loop, command handling and teardown
pub struct ClientSession {
    connection: Arc<Connection>,
    reader: ConnectionReader,
    registry: Arc<ConnectionRegistry>,
    engine: BroadcastEngine,
    state: SessionState,
    start_time: Instant,
    lines_received: u64,
    broadcasts_sent: u64,
    malformed_commands: u64,
}

impl ClientSession {
    /// Create a session in the `Accepted` state
    pub fn new(
        connection: Arc<Connection>,
        reader: ConnectionReader,
        registry: Arc<ConnectionRegistry>,
        engine: BroadcastEngine,
    ) -> Self {
        Self {
            connection,
            reader,
            registry,
            engine,
            state: SessionState::Accepted,
            start_time: Instant::now(),
            lines_received: 0,
            broadcasts_sent: 0,
            malformed_commands: 0,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Add the connection to the registry: `Accepted -> Active`
    pub async fn register(&mut self) -> Result<(), RelayError> {
        if self.state != SessionState::Accepted {
            return Ok(());
        }

        self.registry.add(Arc::clone(&self.connection)).await?;
        self.state = SessionState::Active;
        Ok(())
    }

    /// Run the session to completion, registering first if needed.
    ///
    /// Teardown runs on every exit path.
    #[instrument(
        skip(self),
        fields(connection_id = %self.connection.id(), peer = %self.connection.peer_addr())
    )]
    pub async fn run(mut self) -> SessionSummary {
        let exit_reason = match self.register().await {
            Ok(()) => {
                info!("Session active");
                self.read_loop().await
            }
            Err(e) => {
                warn!("Failed to register session: {}", e);
                ExitReason::RegistrationFailed(e.to_string())
            }
        };

        self.teardown(exit_reason).await
    }

    async fn read_loop(&mut self) -> ExitReason {
        while self.state == SessionState::Active {
            let line = match self.reader.read_line().await {
                Ok(Some(line)) => line,
                Ok(None) if self.connection.is_closed() => return ExitReason::Cancelled,
                Ok(None) => return ExitReason::PeerClosed,
                Err(e) => {
                    warn!("Read failed: {}", e);
                    return ExitReason::ReadError(e.to_string());
                }
            };

            self.lines_received += 1;

            let command = match Command::parse(&line) {
                Ok(command) => command,
                Err(e) => {
                    self.malformed_commands += 1;
                    warn!("Ignoring line: {}", e);
                    continue;
                }
            };
            debug!(command = command.name(), "Received line");

            match command {
                Command::Quit => {
                    debug!("Quit requested");
                    return ExitReason::Quit;
                }
                Command::Broadcast(payload) => {
                    let snapshot = self.registry.snapshot().await;
                    let report = self
                        .engine
                        .fan_out(&snapshot, self.connection.id(), payload)
                        .await;
                    self.broadcasts_sent += 1;
                    debug!(
                        recipients = report.attempted,
                        failed = report.failed,
                        "Broadcast relayed"
                    );
                }
                Command::Message(_) => {}
            }
        }

        ExitReason::Cancelled
    }

    async fn teardown(&mut self, exit_reason: ExitReason) -> SessionSummary {
        // Only a registered session owns the registry entry under its id
        let registered = self.state == SessionState::Active;
        self.state = SessionState::Closing;

        if registered {
            self.registry.remove(self.connection.id()).await;
        }
        self.connection.close().await;

        self.state = SessionState::Closed;

        let summary = SessionSummary {
            exit_reason,
            lines_received: self.lines_received,
            broadcasts_sent: self.broadcasts_sent,
            malformed_commands: self.malformed_commands,
            duration: self.start_time.elapsed(),
        };

        info!(
            exit_reason = %summary.exit_reason,
            lines_received = summary.lines_received,
            broadcasts_sent = summary.broadcasts_sent,
            malformed_commands = summary.malformed_commands,
            duration_ms = summary.duration.as_millis() as u64,
            "Session closed"
        );

        summary
    }
}
