//! A single peer connection and its newline-delimited framing.

use crate::error::{ProtocolError, Result, TransportError};
use crate::message::WireMessage;
use crate::types::{ConnectionId, NodeId};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tracing::{debug, trace};

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Write side of a peer connection plus its lifecycle flags.
///
/// The read side is owned by the connection's read loop; closing here wakes
/// that loop so it can release the socket.
pub struct Connection {
    id: ConnectionId,
    remote: NodeId,
    peer_addr: Option<SocketAddr>,
    writer: Mutex<BoxedWriter>,
    closed: AtomicBool,
    close_tx: watch::Sender<bool>,
}

impl Connection {
    pub fn new<W>(remote: NodeId, writer: W, peer_addr: Option<SocketAddr>) -> Arc<Self>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (close_tx, _) = watch::channel(false);
        Arc::new(Self {
            id: ConnectionId::new(),
            remote,
            peer_addr,
            writer: Mutex::new(Box::new(writer)),
            closed: AtomicBool::new(false),
            close_tx,
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Identity this connection is registered under.
    pub fn remote(&self) -> &NodeId {
        &self.remote
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Receiver that changes when the connection is closed.
    ///
    /// Check [`is_closed`](Self::is_closed) after subscribing: a close that
    /// happened before the subscription is not reported as a change.
    pub fn subscribe_close(&self) -> watch::Receiver<bool> {
        self.close_tx.subscribe()
    }

    /// Writes one record. Concurrent senders are serialized.
    pub async fn send(&self, message: &WireMessage) -> Result<()> {
        if self.is_closed() {
            return Err(TransportError::ConnectionClosed.into());
        }

        let mut line = message.encode()?;
        line.push('\n');

        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        trace!(conn = %self.id, remote = %self.remote, bytes = line.len(), "Sent frame");
        Ok(())
    }

    /// Marks the connection dead, wakes the read loop and shuts the write side.
    /// Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.close_tx.send_replace(true);
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            trace!(conn = %self.id, error = %e, "Write half already gone");
        }
        debug!(conn = %self.id, remote = %self.remote, "Connection closed");
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("remote", &self.remote)
            .field("peer_addr", &self.peer_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Reads newline-delimited wire records, enforcing a frame size limit.
pub struct FrameReader<R> {
    reader: BufReader<R>,
    max_frame_bytes: usize,
    line: String,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R, max_frame_bytes: usize) -> Self {
        Self {
            reader: BufReader::new(reader),
            max_frame_bytes,
            line: String::new(),
        }
    }

    /// Next record, or `None` on a clean end of stream.
    ///
    /// A trailing record without a newline is still accepted.
    pub async fn next_message(&mut self) -> Result<Option<WireMessage>> {
        self.line.clear();
        // One byte of slack for the newline
        let limit = self.max_frame_bytes as u64 + 1;
        let read = (&mut self.reader)
            .take(limit)
            .read_line(&mut self.line)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::InvalidData => {
                    ProtocolError::MalformedFrame("frame is not valid UTF-8".to_string()).into()
                }
                _ => crate::error::MixnetError::Io(e),
            })?;

        if read == 0 {
            return Ok(None);
        }

        let frame = self.line.trim_end_matches(['\r', '\n']);
        if frame.len() > self.max_frame_bytes {
            return Err(ProtocolError::FrameTooLarge {
                limit: self.max_frame_bytes,
            }
            .into());
        }

        WireMessage::decode(frame).map(Some)
    }
}

/// Applies latency and liveness options to a fresh TCP stream.
pub(crate) fn tune_socket(stream: &TcpStream) -> std::io::Result<()> {
    stream.set_nodelay(true)?;
    let keepalive = socket2::TcpKeepalive::new()
        .with_time(Duration::from_secs(30))
        .with_interval(Duration::from_secs(10));
    socket2::SockRef::from(stream).set_tcp_keepalive(&keepalive)
}
