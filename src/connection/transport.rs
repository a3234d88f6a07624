//! Line Transport
//!
//! A [`Connection`] is the shared, write-side handle to one peer. Its read side
//! is a [`ConnectionReader`] owned by exactly one session. Closing the
//! connection wakes a pending read, which is the only way to cancel a session
//! from outside.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::debug;

use crate::error::RelayError;
use crate::protocol::DEFAULT_MAX_LINE_LENGTH;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Process-unique identity of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wrap a raw numeric id
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Raw numeric id
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn_{}", self.0)
    }
}

/// Write side and lifecycle flag of a single peer connection
pub struct Connection {
    id: ConnectionId,
    peer_addr: SocketAddr,
    /// `None` once the connection has been closed
    writer: Mutex<Option<BoxedWriter>>,
    closed_tx: watch::Sender<bool>,
}

/// Read side of a connection, owned by its session
pub struct ConnectionReader {
    id: ConnectionId,
    lines: FramedRead<BoxedReader, LinesCodec>,
    max_line_length: usize,
    closed_rx: watch::Receiver<bool>,
}

impl Connection {
    /// Build a connection from an arbitrary reader/writer pair with the
    /// default line length limit
    pub fn new<R, W>(
        id: ConnectionId,
        peer_addr: SocketAddr,
        reader: R,
        writer: W,
    ) -> (Arc<Connection>, ConnectionReader)
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::with_max_line_length(id, peer_addr, reader, writer, DEFAULT_MAX_LINE_LENGTH)
    }

    /// Build a connection whose reader rejects lines longer than
    /// `max_line_length` bytes
    pub fn with_max_line_length<R, W>(
        id: ConnectionId,
        peer_addr: SocketAddr,
        reader: R,
        writer: W,
        max_line_length: usize,
    ) -> (Arc<Connection>, ConnectionReader)
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (closed_tx, closed_rx) = watch::channel(false);
        let reader: BoxedReader = Box::new(reader);
        let writer: BoxedWriter = Box::new(writer);

        let connection = Arc::new(Self {
            id,
            peer_addr,
            writer: Mutex::new(Some(writer)),
            closed_tx,
        });

        let reader = ConnectionReader {
            id,
            lines: FramedRead::new(reader, LinesCodec::new_with_max_length(max_line_length)),
            max_line_length,
            closed_rx,
        };

        (connection, reader)
    }

    /// Build a connection from an accepted TCP stream
    pub fn from_tcp(
        id: ConnectionId,
        stream: TcpStream,
        peer_addr: SocketAddr,
        max_line_length: usize,
    ) -> (Arc<Connection>, ConnectionReader) {
        let (read_half, write_half) = stream.into_split();
        Self::with_max_line_length(id, peer_addr, read_half, write_half, max_line_length)
    }

    /// Identity under which the connection is registered
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Remote address of the peer
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        *self.closed_tx.borrow()
    }

    /// Write `text` followed by a newline as one atomic unit.
    ///
    /// Writers are serialized by the per-connection lock, so two broadcasts
    /// targeting this peer never interleave partial lines.
    pub async fn write_line(&self, text: &str) -> Result<(), RelayError> {
        let mut frame = Vec::with_capacity(text.len() + 1);
        frame.extend_from_slice(text.as_bytes());
        frame.push(b'\n');

        let mut guard = self.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or(RelayError::ConnectionClosed(self.id))?;

        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Close the connection. Returns `true` only for the call that actually
    /// closed it; every later call is a no-op.
    pub async fn close(&self) -> bool {
        let was_closed = self.closed_tx.send_replace(true);
        if was_closed {
            return false;
        }

        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.shutdown().await {
                debug!(connection_id = %self.id, "Error shutting down write side: {}", e);
            }
        }

        debug!(connection_id = %self.id, peer = %self.peer_addr, "Connection closed");
        true
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ConnectionReader {
    /// Read the next line without its terminator.
    ///
    /// Returns `Ok(None)` on end of stream or once the connection is closed.
    /// A line over the length limit or one that is not valid UTF-8 is an error.
    pub async fn read_line(&mut self) -> Result<Option<String>, RelayError> {
        if *self.closed_rx.borrow() {
            return Ok(None);
        }

        tokio::select! {
            biased;
            _ = wait_closed(&mut self.closed_rx) => Ok(None),
            line = self.lines.next() => match line {
                None => Ok(None),
                Some(Ok(line)) => Ok(Some(line)),
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => Err(RelayError::LineTooLong {
                    id: self.id,
                    max: self.max_line_length,
                }),
                Some(Err(LinesCodecError::Io(e))) => Err(RelayError::Io(e)),
            },
        }
    }
}

async fn wait_closed(closed_rx: &mut watch::Receiver<bool>) {
    // A dropped sender means the connection is gone as well.
    let _ = closed_rx.wait_for(|closed| *closed).await;
}
