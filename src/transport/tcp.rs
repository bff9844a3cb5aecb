//! # TCP Transport
//!
//! Async packet connections over tokio TCP streams.
//!
//! Each connection is split in two. The read half belongs to a spawned session
//! task that runs [`Protocol::receive`] until the connection's
//! [`CancellationToken`] is cancelled, the handler breaks, or the session fails.
//! The write half sits behind a `tokio::sync::Mutex` inside a cloneable
//! [`PacketSender`], so any number of tasks can send while frames stay whole.
//!
//! Cancelling the token is the closed predicate of the receive loop: an error
//! that races a cancellation is reported as a clean shutdown.
//!
//! A [`Server`] numbers the connections it accepts and keeps their senders in a
//! table shared with every [`ServerHandle`]. The handle sends to one connection,
//! broadcasts, and disconnects connections (announcing it with the built-in
//! [`Disconnect`] packet first). Connect and disconnect hooks observe the table.

use bytes::Bytes;
use futures::SinkExt;
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::ops::ControlFlow;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument};

use crate::config::{ClientConfig, ServerConfig};
use crate::core::codec::FrameCodec;
use crate::core::value::LENGTH_PREFIX_SIZE;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::network::Protocol;
use crate::protocol::packet::{AnyPacket, Disconnect};

type FrameWriter = FramedWrite<OwnedWriteHalf, FrameCodec>;

/// Cloneable send handle of one connection.
#[derive(Clone)]
pub struct PacketSender {
    writer: Arc<Mutex<FrameWriter>>,
    protocol: Protocol,
    closed: CancellationToken,
    peer: SocketAddr,
}

impl std::fmt::Debug for PacketSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketSender")
            .field("peer", &self.peer)
            .field("closed", &self.closed.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl PacketSender {
    /// Encode `packet` and write it as one frame.
    ///
    /// # Errors
    /// `ConnectionClosed` once the connection is closed; `Configuration` for an
    /// unregistered packet or a layout mismatch; I/O errors of the socket.
    pub async fn send(&self, packet: &dyn AnyPacket) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(ProtocolError::ConnectionClosed);
        }
        let body = self.protocol.encode(packet)?;
        self.send_encoded(Bytes::from(body), packet.packet_name()).await
    }

    /// Write an already encoded packet body as one frame.
    async fn send_encoded(&self, body: Bytes, name: &'static str) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(ProtocolError::ConnectionClosed);
        }
        let bytes = body.len() + LENGTH_PREFIX_SIZE;

        self.writer.lock().await.send(body).await?;
        self.protocol.record_sent(bytes);
        debug!(peer = %self.peer, packet = name, bytes, "Packet sent");
        Ok(())
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Mark the connection closed. The session task stops at its next await point.
    pub fn close(&self) {
        self.closed.cancel();
    }

    async fn shutdown(&self) {
        if let Err(e) = self.writer.lock().await.close().await {
            debug!(peer = %self.peer, error = %e, "Error shutting down write half");
        }
    }
}

/// A TCP connection with a running receive session.
///
/// Dropping the connection cancels its session.
#[derive(Debug)]
pub struct Connection {
    sender: PacketSender,
    session: Option<JoinHandle<Result<()>>>,
}

impl Connection {
    /// Connect with the default frame codec; every received packet goes to `on_packet`.
    #[instrument(skip(protocol, on_packet))]
    pub async fn connect<H>(addr: &str, protocol: Protocol, on_packet: H) -> Result<Self>
    where
        H: FnMut(Box<dyn AnyPacket>) -> Result<ControlFlow<()>> + Send + 'static,
    {
        let stream = TcpStream::connect(addr).await?;
        info!(address = %addr, "Connected");
        Self::from_stream(
            stream,
            protocol,
            FrameCodec::default(),
            CancellationToken::new(),
            move |_| on_packet,
        )
    }

    /// Connect to `config.address` within `config.connection_timeout`.
    ///
    /// `make_handler` receives the connection's sender, so the handler can reply.
    #[instrument(skip(config, protocol, codec, make_handler), fields(address = %config.address))]
    pub async fn connect_with<F, H>(
        config: &ClientConfig,
        protocol: Protocol,
        codec: FrameCodec,
        make_handler: F,
    ) -> Result<Self>
    where
        F: FnOnce(PacketSender) -> H,
        H: FnMut(Box<dyn AnyPacket>) -> Result<ControlFlow<()>> + Send + 'static,
    {
        let stream = tokio::time::timeout(config.connection_timeout, TcpStream::connect(&config.address))
            .await
            .map_err(|_| {
                ProtocolError::Io(io::Error::new(io::ErrorKind::TimedOut, "connection timed out"))
            })??;
        info!("Connected");
        Self::from_stream(stream, protocol, codec, CancellationToken::new(), make_handler)
    }

    /// Start a session over an established stream. `closed` becomes the
    /// connection's closed flag.
    pub fn from_stream<F, H>(
        stream: TcpStream,
        protocol: Protocol,
        codec: FrameCodec,
        closed: CancellationToken,
        make_handler: F,
    ) -> Result<Self>
    where
        F: FnOnce(PacketSender) -> H,
        H: FnMut(Box<dyn AnyPacket>) -> Result<ControlFlow<()>> + Send + 'static,
    {
        let peer = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        let (read, write) = stream.into_split();

        let sender = PacketSender {
            writer: Arc::new(Mutex::new(FramedWrite::new(write, codec))),
            protocol: protocol.clone(),
            closed: closed.clone(),
            peer,
        };
        let handler = make_handler(sender.clone());

        let session = tokio::spawn(
            async move {
                let frames = FramedRead::new(read, codec);
                let result = protocol.receive(frames, &closed, handler).await;
                closed.cancel();
                result
            }
            .instrument(info_span!("session", peer = %peer)),
        );

        Ok(Self {
            sender,
            session: Some(session),
        })
    }

    pub async fn send(&self, packet: &dyn AnyPacket) -> Result<()> {
        self.sender.send(packet).await
    }

    pub fn sender(&self) -> &PacketSender {
        &self.sender
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.sender.peer
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Wait for the session to end on its own (peer hang-up, handler break,
    /// failure or a close through a [`PacketSender`]).
    pub async fn wait(mut self) -> Result<()> {
        let result = self.join().await;
        self.sender.shutdown().await;
        result
    }

    /// Close the connection and wait for the session to stop.
    ///
    /// Returns the session's outcome, which is `Ok` unless it had already failed.
    pub async fn close(mut self) -> Result<()> {
        self.sender.close();
        self.sender.shutdown().await;
        self.join().await
    }

    async fn join(&mut self) -> Result<()> {
        match self.session.take() {
            Some(session) => session.await.map_err(|e| ProtocolError::Io(io::Error::other(e)))?,
            None => Ok(()),
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.sender.close();
    }
}

/// Number a [`Server`] gives each accepted connection, unique for the server's lifetime.
pub type ConnectionId = u64;

type ConnectHook = dyn Fn(ConnectionId, &PacketSender) + Send + Sync;
type DisconnectHook = dyn Fn(ConnectionId, SocketAddr) + Send + Sync;

/// Shared view of a server's live connections.
///
/// Cloning shares the table. Entries are added when a connection is accepted
/// and removed when its session ends.
#[derive(Clone)]
pub struct ServerHandle {
    protocol: Protocol,
    connections: Arc<RwLock<HashMap<ConnectionId, PacketSender>>>,
}

impl std::fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle")
            .field("connections", &self.len())
            .finish_non_exhaustive()
    }
}

impl ServerHandle {
    fn new(protocol: Protocol) -> Self {
        Self {
            protocol,
            connections: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.connections
            .read()
            .map(|connections| connections.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Identifiers of the live connections, in ascending order.
    pub fn ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self
            .connections
            .read()
            .map(|connections| connections.keys().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    pub fn sender(&self, id: ConnectionId) -> Result<Option<PacketSender>> {
        let connections = self
            .connections
            .read()
            .map_err(|_| ProtocolError::LockPoisoned(constants::ERR_CONNECTIONS_READ_LOCK))?;
        Ok(connections.get(&id).cloned())
    }

    fn senders(&self) -> Result<Vec<(ConnectionId, PacketSender)>> {
        let connections = self
            .connections
            .read()
            .map_err(|_| ProtocolError::LockPoisoned(constants::ERR_CONNECTIONS_READ_LOCK))?;
        let mut senders: Vec<_> = connections.iter().map(|(id, s)| (*id, s.clone())).collect();
        senders.sort_unstable_by_key(|(id, _)| *id);
        Ok(senders)
    }

    fn insert(&self, id: ConnectionId, sender: PacketSender) -> Result<()> {
        self.connections
            .write()
            .map_err(|_| ProtocolError::LockPoisoned(constants::ERR_CONNECTIONS_WRITE_LOCK))?
            .insert(id, sender);
        Ok(())
    }

    fn remove(&self, id: ConnectionId) -> Option<PacketSender> {
        self.connections.write().ok()?.remove(&id)
    }

    fn drain(&self) -> Vec<(ConnectionId, PacketSender)> {
        self.connections
            .write()
            .map(|mut connections| connections.drain().collect())
            .unwrap_or_default()
    }

    /// Send `packet` to connection `id`. Returns `false` when there is no such connection.
    pub async fn send_to(&self, id: ConnectionId, packet: &dyn AnyPacket) -> Result<bool> {
        match self.sender(id)? {
            Some(sender) => {
                sender.send(packet).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Send `packet` to every live connection. The packet is encoded once.
    ///
    /// Returns how many connections it was written to; connections that fail
    /// or close meanwhile are skipped.
    ///
    /// # Errors
    /// `Configuration` when the packet cannot be encoded.
    pub async fn broadcast(&self, packet: &dyn AnyPacket) -> Result<usize> {
        let body = Bytes::from(self.protocol.encode(packet)?);
        let mut delivered = 0;
        for (id, sender) in self.senders()? {
            match sender.send_encoded(body.clone(), packet.packet_name()).await {
                Ok(()) => delivered += 1,
                Err(e) => debug!(connection = id, error = %e, "Broadcast skipped connection"),
            }
        }
        Ok(delivered)
    }

    /// Send [`Disconnect`] with `reason` to connection `id`, then close it.
    /// Returns `false` when there is no such connection.
    pub async fn disconnect(&self, id: ConnectionId, reason: &[u8]) -> Result<bool> {
        match self.sender(id)? {
            Some(sender) => {
                Self::kick(id, &sender, &Disconnect::new(reason)).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// [`disconnect`](Self::disconnect) every live connection. Returns how many were closed.
    pub async fn disconnect_all(&self, reason: &[u8]) -> Result<usize> {
        let notice = Disconnect::new(reason);
        let senders = self.senders()?;
        for (id, sender) in &senders {
            Self::kick(*id, sender, &notice).await;
        }
        Ok(senders.len())
    }

    async fn kick(id: ConnectionId, sender: &PacketSender, notice: &Disconnect) {
        if let Err(e) = sender.send(notice).await {
            debug!(connection = id, error = %e, "Disconnect notice not sent");
        }
        sender.close();
        info!(connection = id, peer = %sender.peer_addr(), "Connection disconnected by server");
    }
}

/// Accepts connections and runs one session task per connection.
pub struct Server {
    listener: TcpListener,
    protocol: Protocol,
    codec: FrameCodec,
    max_connections: usize,
    shutdown_timeout: Duration,
    handle: ServerHandle,
    on_connect: Option<Arc<ConnectHook>>,
    on_disconnect: Option<Arc<DisconnectHook>>,
}

impl Server {
    #[instrument(skip(config, protocol), fields(address = %config.address))]
    pub async fn bind(config: &ServerConfig, protocol: Protocol) -> Result<Self> {
        let listener = TcpListener::bind(&config.address).await?;
        info!(address = %listener.local_addr()?, "Listening");
        Ok(Self {
            listener,
            handle: ServerHandle::new(protocol.clone()),
            protocol,
            codec: FrameCodec::default(),
            max_connections: config.max_connections,
            shutdown_timeout: config.shutdown_timeout,
            on_connect: None,
            on_disconnect: None,
        })
    }

    pub fn with_codec(mut self, codec: FrameCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Called for every accepted connection once it is in the connection table.
    pub fn on_connect<F>(mut self, hook: F) -> Self
    where
        F: Fn(ConnectionId, &PacketSender) + Send + Sync + 'static,
    {
        self.on_connect = Some(Arc::new(hook));
        self
    }

    /// Called once per connection after it has left the connection table.
    pub fn on_disconnect<F>(mut self, hook: F) -> Self
    where
        F: Fn(ConnectionId, SocketAddr) + Send + Sync + 'static,
    {
        self.on_disconnect = Some(Arc::new(hook));
        self
    }

    /// Handle to the connection table, usable while [`serve`](Self::serve) runs.
    pub fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` is cancelled.
    ///
    /// Connections beyond `max_connections` are closed right after accept.
    /// Every session runs under a child token of `shutdown`, so cancelling it
    /// closes all of them; sessions still running after `shutdown_timeout`
    /// are aborted. Cancelling does not send [`Disconnect`]; call
    /// [`ServerHandle::disconnect_all`] first for that.
    #[instrument(skip_all)]
    pub async fn serve<F, H>(self, shutdown: CancellationToken, make_handler: F) -> Result<()>
    where
        F: Fn(PacketSender) -> H,
        H: FnMut(Box<dyn AnyPacket>) -> Result<ControlFlow<()>> + Send + 'static,
    {
        let limiter = Arc::new(Semaphore::new(self.max_connections));
        let mut sessions = JoinSet::new();
        let mut next_id: ConnectionId = 0;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,

                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = joined {
                        warn!(error = %e, "Session task failed");
                    }
                }

                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            error!(error = %e, "Error accepting connection");
                            continue;
                        }
                    };

                    let Ok(permit) = limiter.clone().try_acquire_owned() else {
                        warn!(peer = %peer, max = self.max_connections, "Connection limit reached, rejecting");
                        continue;
                    };

                    let connection = match Connection::from_stream(
                        stream,
                        self.protocol.clone(),
                        self.codec,
                        shutdown.child_token(),
                        &make_handler,
                    ) {
                        Ok(connection) => connection,
                        Err(e) => {
                            error!(peer = %peer, error = %e, "Failed to start session");
                            continue;
                        }
                    };

                    next_id += 1;
                    let id = next_id;
                    let sender = connection.sender().clone();
                    if let Err(e) = self.handle.insert(id, sender.clone()) {
                        error!(connection = id, error = %e, "Failed to track connection");
                        continue;
                    }
                    info!(connection = id, peer = %peer, "Connection accepted");
                    if let Some(hook) = &self.on_connect {
                        hook(id, &sender);
                    }

                    let table = self.handle.clone();
                    let on_disconnect = self.on_disconnect.clone();
                    sessions.spawn(async move {
                        let _permit = permit;
                        match connection.wait().await {
                            Ok(()) => debug!(connection = id, peer = %peer, "Connection closed"),
                            Err(e) => debug!(connection = id, peer = %peer, error = %e, "Connection failed"),
                        }
                        if table.remove(id).is_some() {
                            if let Some(hook) = on_disconnect {
                                hook(id, peer);
                            }
                        }
                    });
                }
            }
        }

        info!(sessions = sessions.len(), "Shutting down server");
        let drained = tokio::time::timeout(self.shutdown_timeout, async {
            while sessions.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!("Shutdown timeout reached, aborting remaining sessions");
            sessions.abort_all();
        }
        for (id, sender) in self.handle.drain() {
            sender.close();
            if let Some(hook) = &self.on_disconnect {
                hook(id, sender.peer_addr());
            }
        }
        Ok(())
    }
}
