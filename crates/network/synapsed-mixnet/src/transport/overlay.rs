//! The overlay owns the listener, the connection registry and every
//! connection task of one node.

use super::connection::{tune_socket, Connection, FrameReader};
use super::registry::ConnectionRegistry;
use super::MessageHandler;
use crate::config::{MixnetConfig, NodeDirectory};
use crate::error::{ErrorSeverity, MixnetError, ProtocolError, Result, TransportError};
use crate::message::WireMessage;
use crate::mix::Forwarder;
use crate::types::{NodeConfig, NodeId};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use tokio::io::AsyncRead;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, info_span, warn, Instrument};

pub struct Overlay {
    this: Weak<Overlay>,
    local: NodeId,
    directory: Arc<NodeDirectory>,
    config: MixnetConfig,
    registry: ConnectionRegistry,
    /// Serializes dials per target so concurrent sends share one connection
    dial_locks: DashMap<NodeId, Arc<tokio::sync::Mutex<()>>>,
    handler: RwLock<Option<Arc<dyn MessageHandler>>>,
    tasks: Mutex<JoinSet<()>>,
    local_addr: Mutex<Option<SocketAddr>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Overlay {
    pub fn new(local: NodeId, directory: Arc<NodeDirectory>, config: MixnetConfig) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            local,
            directory,
            config,
            registry: ConnectionRegistry::new(),
            dial_locks: DashMap::new(),
            handler: RwLock::new(None),
            tasks: Mutex::new(JoinSet::new()),
            local_addr: Mutex::new(None),
            shutdown_tx,
        })
    }

    pub fn local_id(&self) -> &NodeId {
        &self.local
    }

    pub fn directory(&self) -> &Arc<NodeDirectory> {
        &self.directory
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Address the listener is bound to, once listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// Installs the handler that receives every inbound record.
    pub fn set_handler(&self, handler: Arc<dyn MessageHandler>) {
        *self.handler.write() = Some(handler);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Number of live connection tasks, the accept loop included.
    pub fn active_tasks(&self) -> usize {
        let mut tasks = self.tasks.lock();
        while tasks.try_join_next().is_some() {}
        tasks.len()
    }

    /// Binds `addr` and starts accepting connections.
    pub async fn listen(&self, addr: &str) -> Result<SocketAddr> {
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            MixnetError::Configuration(format!("Failed to bind {} for {}: {}", addr, self.local, e))
        })?;
        self.serve(listener)
    }

    /// Starts accepting on an already bound listener.
    pub fn serve(&self, listener: TcpListener) -> Result<SocketAddr> {
        let addr = listener.local_addr()?;
        *self.local_addr.lock() = Some(addr);
        info!(node = %self.local, %addr, "Listening for peers");

        self.spawn_with(|overlay| overlay.accept_loop(listener));
        Ok(addr)
    }

    /// Spawns a connection task holding a strong reference to the overlay.
    /// Finished tasks are reaped first. Nothing is spawned once shutdown has
    /// begun.
    fn spawn_with<F, Fut>(&self, task: F)
    where
        F: FnOnce(Arc<Self>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.is_shutting_down() {
            return;
        }
        if let Some(overlay) = self.this.upgrade() {
            let mut tasks = self.tasks.lock();
            while tasks.try_join_next().is_some() {}
            tasks.spawn(task(overlay));
        }
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        if self.is_shutting_down() {
            return;
        }

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => {
                        debug!(node = %self.local, %peer_addr, "Accepted connection");
                        self.spawn_with(|overlay| overlay.handle_inbound(stream, peer_addr));
                    }
                    Err(e) => {
                        warn!(node = %self.local, error = %e, "Accept failed");
                    }
                },
            }
        }
        debug!(node = %self.local, "Accept loop stopped");
    }

    /// Reads the handshake record, registers the connection under the claimed
    /// identity, then treats the handshake as the first ordinary message.
    ///
    /// A peer claiming this node's own id is served but never registered, so
    /// sends addressed to the local id always go through a dialed connection.
    async fn handle_inbound(self: Arc<Self>, stream: TcpStream, peer_addr: SocketAddr) {
        if let Err(e) = tune_socket(&stream) {
            debug!(%peer_addr, error = %e, "Failed to tune inbound socket");
        }
        let (read_half, write_half) = stream.into_split();
        let mut reader = FrameReader::new(read_half, self.config.max_frame_bytes);

        let handshake = match self.read_handshake(&mut reader).await {
            Ok(message) => message,
            Err(e) => {
                warn!(node = %self.local, %peer_addr, error = %e, "Rejecting inbound connection");
                return;
            }
        };
        let origin = match handshake.origin() {
            Some(origin) => origin.clone(),
            None => return,
        };

        let conn = Connection::new(origin.clone(), write_half, Some(peer_addr));
        let span = info_span!("connection", node = %self.local, remote = %origin, conn = %conn.id());
        async move {
            info!(%peer_addr, "Inbound peer identified");
            if origin == self.local {
                debug!("Peer claims the local identity, leaving connection unregistered");
            } else if self.register(Arc::clone(&conn)).await.is_err() {
                return;
            }
            self.dispatch(handshake, &origin).await;
            self.read_loop(conn, reader).await;
        }
        .instrument(span)
        .await
    }

    async fn read_handshake<R: AsyncRead + Unpin>(&self, reader: &mut FrameReader<R>) -> Result<WireMessage> {
        let timeout = self.config.handshake_timeout();
        match tokio::time::timeout(timeout, reader.next_message()).await {
            Err(_) => Err(ProtocolError::BadHandshake("timed out".to_string()).into()),
            Ok(Ok(None)) => Err(ProtocolError::BadHandshake("closed before handshake".to_string()).into()),
            Ok(Err(e)) => Err(ProtocolError::BadHandshake(e.to_string()).into()),
            Ok(Ok(Some(message))) => Ok(message),
        }
    }

    /// Adds a connection to the registry, closing whatever it supersedes.
    async fn register(&self, conn: Arc<Connection>) -> Result<()> {
        if self.is_shutting_down() {
            conn.close().await;
            return Err(MixnetError::Shutdown("overlay is shutting down".to_string()));
        }
        if let Some(old) = self.registry.insert(Arc::clone(&conn)) {
            info!(remote = %conn.remote(), old = %old.id(), new = %conn.id(), "Superseding connection");
            old.close().await;
        }
        Ok(())
    }

    /// Pumps records from `reader` into the handler until the stream ends,
    /// a protocol error occurs or the connection is closed.
    async fn read_loop<R: AsyncRead + Unpin>(&self, conn: Arc<Connection>, mut reader: FrameReader<R>) {
        let mut close_rx = conn.subscribe_close();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        while !conn.is_closed() && !self.is_shutting_down() {
            let frame = tokio::select! {
                biased;
                _ = close_rx.changed() => break,
                _ = shutdown_rx.changed() => break,
                frame = reader.next_message() => frame,
            };

            match frame {
                Ok(Some(message)) => self.dispatch(message, conn.remote()).await,
                Ok(None) => {
                    debug!("Peer closed connection");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Tearing down connection");
                    break;
                }
            }
        }

        self.registry.remove_if_current(conn.remote(), conn.id());
        conn.close().await;
    }

    async fn dispatch(&self, message: WireMessage, origin: &NodeId) {
        let handler = self.handler.read().clone();
        let Some(handler) = handler else {
            debug!(%origin, "No handler installed, discarding message");
            return;
        };

        if let Err(e) = handler.handle(message, origin).await {
            match e.severity() {
                ErrorSeverity::Critical => error!(%origin, class = %e.class(), error = %e, "Dropped message"),
                ErrorSeverity::Major => warn!(%origin, class = %e.class(), error = %e, "Dropped message"),
                ErrorSeverity::Minor => info!(%origin, class = %e.class(), error = %e, "Dropped message"),
            }
        }
    }

    /// Sends `message` to `target`, reusing a live connection or dialing one.
    ///
    /// No retries: a failed dial or write is reported and the message is gone.
    pub async fn send_to_node(&self, target: &NodeId, message: &WireMessage) -> Result<()> {
        let node = self.directory.resolve(target)?;
        let conn = self.connection_for(node).await?;

        if let Err(e) = conn.send(message).await {
            warn!(node = %self.local, peer = %target, error = %e, "Send failed, dropping connection");
            self.registry.remove_if_current(target, conn.id());
            conn.close().await;
            return Err(TransportError::ConnectionUnavailable {
                node: target.clone(),
                reason: e.to_string(),
            }
            .into());
        }

        debug!(node = %self.local, peer = %target, hop = message.current_hop_index(), "Message sent");
        Ok(())
    }

    async fn connection_for(&self, node: &NodeConfig) -> Result<Arc<Connection>> {
        if let Some(conn) = self.registry.get(&node.id) {
            return Ok(conn);
        }

        let dial_lock = self.dial_locks.entry(node.id.clone()).or_default().clone();
        let _guard = dial_lock.lock().await;

        // Someone else may have connected while we waited
        if let Some(conn) = self.registry.get(&node.id) {
            return Ok(conn);
        }

        let stream = self.dial(node).await?;
        let peer_addr = stream.peer_addr().ok();
        let (read_half, write_half) = stream.into_split();
        let conn = Connection::new(node.id.clone(), write_half, peer_addr);

        self.register(Arc::clone(&conn)).await.map_err(|e| TransportError::ConnectionUnavailable {
            node: node.id.clone(),
            reason: e.to_string(),
        })?;
        info!(node = %self.local, peer = %node.id, conn = %conn.id(), "Connected to peer");

        let reader = FrameReader::new(read_half, self.config.max_frame_bytes);
        let span = info_span!("connection", node = %self.local, remote = %node.id, conn = %conn.id());
        let task_conn = Arc::clone(&conn);
        self.spawn_with(move |overlay| async move { overlay.read_loop(task_conn, reader).await }.instrument(span));

        Ok(conn)
    }

    async fn dial(&self, node: &NodeConfig) -> Result<TcpStream> {
        let address = node.address();
        let unavailable = |reason: String| TransportError::ConnectionUnavailable {
            node: node.id.clone(),
            reason,
        };

        let stream = tokio::time::timeout(self.config.connect_timeout(), TcpStream::connect(&address))
            .await
            .map_err(|_| unavailable(format!("connect to {} timed out", address)))?
            .map_err(|e| unavailable(format!("connect to {} failed: {}", address, e)))?;

        if let Err(e) = tune_socket(&stream) {
            debug!(peer = %node.id, error = %e, "Failed to tune outbound socket");
        }
        Ok(stream)
    }

    /// Stops accepting, closes every registered connection and waits for
    /// connection tasks, aborting any still running after the shutdown timeout.
    pub async fn shutdown(&self) {
        if self.shutdown_tx.send_replace(true) {
            return;
        }
        info!(node = %self.local, connections = self.registry.len(), "Shutting down overlay");

        // Drops the handler's reference back to us
        self.handler.write().take();

        let connections = self.registry.drain();
        futures::future::join_all(connections.iter().map(|conn| conn.close())).await;

        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        let timeout = self.config.shutdown_timeout();
        let drained = tokio::time::timeout(timeout, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(node = %self.local, remaining = tasks.len(), "Connection tasks did not finish, aborting");
            tasks.abort_all();
        }
        info!(node = %self.local, "Overlay stopped");
    }
}

#[async_trait]
impl Forwarder for Overlay {
    async fn forward(&self, next_hop: &NodeId, message: &WireMessage) -> Result<()> {
        self.send_to_node(next_hop, message).await
    }
}
