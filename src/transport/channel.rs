use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::select;
use tokio::sync::{oneshot, Notify};
use tracing::{debug, error, info, instrument, trace, warn, Instrument, Span};

use crate::transport::config::TcpChannelConfig;
use crate::transport::connection::{receive_loop, ConnectionHandle, ConnectionRole};
use crate::transport::connector::{Connector, TcpConnector};
use crate::transport::end_point::{SipEndPoint, SipProtocol};
use crate::transport::error::TransportError;
use crate::transport::framer::{ContentLengthFramerFactory, FramerFactory};
use crate::transport::handler::ChannelHandler;
use crate::transport::registry::{ConnectionRegistry, RegistrySealed};

/// The result of a successful call to [TcpChannel::send]
#[derive(Debug)]
pub enum SendOutcome {
    /// The payload was written to an existing connection.
    Written,
    /// There was no connection to the destination, and one is being established. The payload
    ///  is written as soon as the connection is up.
    Connecting(PendingSend),
}

/// Completes with the outcome of a send that had to establish a connection first. Awaiting it
///  is optional: the connection attempt and the write proceed regardless.
#[derive(Debug)]
pub struct PendingSend {
    end_point: SipEndPoint,
    receiver: oneshot::Receiver<Result<(), TransportError>>,
}

impl Future for PendingSend {
    type Output = Result<(), TransportError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let end_point = this.end_point;
        Pin::new(&mut this.receiver)
            .poll(cx)
            .map(|result| match result {
                Ok(result) => result,
                // the connecting task went away without reporting, i.e. the runtime shut down
                Err(_) => Err(TransportError::ChannelClosed(end_point)),
            })
    }
}

/// A SIP transport channel over TCP: it listens on a local address, and it maintains at most
///  one connection per remote address, regardless of which side initiated it. Messages to a
///  remote address go over the existing connection if there is one, and trigger a new
///  connection otherwise.
///
/// Received messages and disconnects are reported to the channel's [ChannelHandler].
///
/// Dropping the channel closes it.
pub struct TcpChannel {
    inner: Arc<ChannelInner>,
}

struct ChannelInner {
    name: String,
    end_point: SipEndPoint,
    config: Arc<TcpChannelConfig>,
    registry: ConnectionRegistry,
    handler: Arc<dyn ChannelHandler>,
    framer_factory: Arc<dyn FramerFactory>,
    connector: Arc<dyn Connector>,
    closed: AtomicBool,
    shutdown: Notify,
}

impl TcpChannel {
    /// Opens a channel with SIP message framing and plain outbound TCP connections.
    pub async fn open(config: Arc<TcpChannelConfig>, handler: Arc<dyn ChannelHandler>) -> Result<TcpChannel, TransportError> {
        let framer_factory = Arc::new(ContentLengthFramerFactory {
            max_message_size: config.max_message_size,
        });
        let connector = Arc::new(TcpConnector {
            connect_timeout: config.connect_timeout,
            tcp_nodelay: config.tcp_nodelay,
            reuse_local_port: config.reuse_local_port,
        });
        TcpChannel::open_with(config, handler, framer_factory, connector).await
    }

    pub async fn open_with(
        config: Arc<TcpChannelConfig>,
        handler: Arc<dyn ChannelHandler>,
        framer_factory: Arc<dyn FramerFactory>,
        connector: Arc<dyn Connector>,
    ) -> Result<TcpChannel, TransportError> {
        config.validate()
            .map_err(|e| TransportError::InvalidArgument(e.to_string()))?;

        let listener = bind_listener(&config)
            .map_err(|source| TransportError::Bind { addr: config.local_addr, source })?;
        let local_addr = listener.local_addr()
            .map_err(|source| TransportError::Bind { addr: config.local_addr, source })?;

        let name = config.effective_name();
        let end_point = SipEndPoint::tcp(local_addr);
        info!(channel=%name, "listening on {}", end_point);

        let inner = Arc::new(ChannelInner {
            name,
            end_point,
            config,
            registry: ConnectionRegistry::new(),
            handler,
            framer_factory,
            connector,
            closed: AtomicBool::new(false),
            shutdown: Notify::new(),
        });

        tokio::spawn(accept_loop(inner.clone(), listener));

        Ok(TcpChannel { inner })
    }

    /// The local end point, with the actual port if the channel was configured with port 0
    pub fn end_point(&self) -> SipEndPoint {
        self.inner.end_point
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    pub fn connected_peers(&self) -> Vec<SocketAddr> {
        self.inner.registry.remote_addrs()
    }

    pub fn has_connection(&self, remote_addr: &SocketAddr) -> bool {
        self.inner.registry.contains(remote_addr)
    }

    /// Sends a payload to a remote address.
    ///
    /// If there is a connection to the destination, this writes the payload to it before
    ///  returning, waiting at most the configured write timeout. A failed or timed out write
    ///  closes that connection and is reported as [TransportError::SendFailed]; there is no
    ///  retry on a fresh connection.
    ///
    /// Otherwise this returns immediately with [SendOutcome::Connecting], and a background task
    ///  connects and then writes the payload. Failures to connect are reported through the
    ///  returned [PendingSend] as [TransportError::ConnectFailed].
    pub async fn send(&self, to: SocketAddr, payload: Bytes) -> Result<SendOutcome, TransportError> {
        if payload.is_empty() {
            return Err(TransportError::InvalidArgument(format!("empty payload for {}", to)));
        }
        if self.is_closed() {
            return Err(TransportError::ChannelClosed(self.inner.end_point));
        }

        if let Some(handle) = self.inner.registry.get(&to) {
            trace!(channel=%self.inner.name, remote=%to, len=payload.len(), "sending on existing connection");
            return match bounded_write(self.inner.config.write_timeout, handle.write(&payload)).await {
                Ok(()) => Ok(SendOutcome::Written),
                Err(source) => {
                    debug!(channel=%self.inner.name, remote=%to, "write failed, closing connection: {}", source);
                    self.inner.disconnect(&handle).await;
                    Err(TransportError::SendFailed { destination: to, source })
                }
            };
        }

        let (sender, receiver) = oneshot::channel();
        tokio::spawn(self.inner.clone().connect_and_send(to, payload, sender));
        Ok(SendOutcome::Connecting(PendingSend {
            end_point: self.inner.end_point,
            receiver,
        }))
    }

    /// Sending with verification of the peer's server name requires TLS, so plain TCP
    ///  channels always reject it.
    pub async fn send_verified(&self, _to: SocketAddr, _payload: Bytes, _server_name: &str) -> Result<SendOutcome, TransportError> {
        Err(TransportError::UnsupportedOperation {
            operation: "send with server name verification",
            protocol: SipProtocol::Tcp,
        })
    }

    /// Stops listening and closes all connections. The handler is not notified of connections
    ///  closed this way. Calling this more than once has no further effect.
    pub fn close(&self) {
        self.inner.close();
    }
}

impl Drop for TcpChannel {
    fn drop(&mut self) {
        self.inner.close();
    }
}

impl ChannelInner {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(channel=%self.name, "closing channel {}", self.end_point);

        // there is exactly one acceptor, and a stored permit reaches it even if it is busy
        self.shutdown.notify_one();

        for handle in self.registry.seal_and_drain() {
            handle.mark_disconnected();
            handle.close();
        }
    }

    /// Registers a connection, closing it if the channel is closed
    fn register(&self, handle: &Arc<ConnectionHandle>) -> Result<(), TransportError> {
        match self.registry.insert(handle.clone()) {
            Ok(_) => Ok(()),
            Err(RegistrySealed) => {
                debug!(channel=%self.name, remote=%handle.remote_addr(), "channel is closed, dropping new connection");
                handle.close();
                Err(TransportError::ChannelClosed(self.end_point))
            }
        }
    }

    /// Tears down a connection after a read or write failure, or after the peer closed it.
    ///  Only the first call per connection has an effect, and the handler is notified only if
    ///  the connection was still registered.
    async fn disconnect(&self, handle: &Arc<ConnectionHandle>) {
        if !handle.mark_disconnected() {
            return;
        }

        let was_registered = self.registry.remove_if_same(handle);
        handle.close();

        if was_registered {
            debug!(channel=%self.name, remote=%handle.remote_addr(), "connection disconnected");
            self.handler.on_disconnected(handle.remote_addr()).await;
        }
    }

    fn on_accepted(self: &Arc<Self>, stream: TcpStream, remote_addr: SocketAddr) {
        debug!(remote=%remote_addr, "accepted connection");
        if let Err(e) = stream.set_nodelay(self.config.tcp_nodelay) {
            debug!(remote=%remote_addr, "could not configure accepted socket: {}", e);
        }

        let (handle, reader) = match ConnectionHandle::new(stream, remote_addr, ConnectionRole::Accepted) {
            Ok(x) => x,
            Err(e) => {
                warn!(remote=%remote_addr, "dropping accepted connection: {}", e);
                return;
            }
        };

        if self.register(&handle).is_ok() {
            self.spawn_receive_loop(handle, reader);
        }
    }

    fn spawn_receive_loop(self: &Arc<Self>, handle: Arc<ConnectionHandle>, reader: OwnedReadHalf) {
        tokio::spawn(run_connection(self.clone(), handle, reader));
    }

    #[instrument(name="connect", skip_all, fields(channel=%self.name, remote=%to))]
    async fn connect_and_send(self: Arc<Self>, to: SocketAddr, payload: Bytes, completion: oneshot::Sender<Result<(), TransportError>>) {
        let result = self.do_connect_and_send(to, &payload).await;
        match &result {
            Ok(()) => trace!("sent {} bytes on new connection", payload.len()),
            Err(e) => debug!("send failed: {}", e),
        }
        // the caller may not be interested in the outcome
        let _ = completion.send(result);
    }

    async fn do_connect_and_send(self: &Arc<Self>, to: SocketAddr, payload: &[u8]) -> Result<(), TransportError> {
        let stream = self.connector.connect(self.end_point.socket_addr, to).await
            .map_err(|source| TransportError::ConnectFailed { destination: to, source })?;
        debug!("connected");

        let (handle, reader) = ConnectionHandle::new(stream, to, ConnectionRole::Initiated)
            .map_err(|source| TransportError::ConnectFailed { destination: to, source })?;

        // the write lock is taken before registering, so the pending payload precedes anything
        //  sent through the registry. A closed channel rejects the registration, and the socket
        //  is closed without being written to.
        let mut writer = handle.lock_writer().await;
        self.register(&handle)?;
        self.spawn_receive_loop(handle.clone(), reader);

        let result = bounded_write(self.config.write_timeout, writer.write(payload)).await;
        drop(writer);

        if let Err(source) = result {
            self.disconnect(&handle).await;
            return Err(TransportError::SendFailed { destination: to, source });
        }
        Ok(())
    }
}

async fn bounded_write(write_timeout: Duration, write: impl Future<Output = io::Result<()>>) -> io::Result<()> {
    match tokio::time::timeout(write_timeout, write).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, format!("write timed out after {:?}", write_timeout))),
    }
}

fn bind_listener(config: &TcpChannelConfig) -> io::Result<TcpListener> {
    let socket = match config.local_addr {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    socket.set_reuseaddr(true)?;
    #[cfg(unix)]
    if config.reuse_local_port {
        socket.set_reuseport(true)?;
    }
    socket.bind(config.local_addr)?;
    socket.listen(config.accept_backlog)
}

#[instrument(name="acceptor", skip_all, fields(channel=%inner.name))]
async fn accept_loop(inner: Arc<ChannelInner>, listener: TcpListener) {
    debug!("accepting connections");

    while !inner.is_closed() {
        let accepted = select! {
            _ = inner.shutdown.notified() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, remote_addr)) => inner.on_accepted(stream, remote_addr),
            Err(_) if inner.is_closed() => break,
            Err(source) => {
                warn!("error accepting connection: {}", source);
                inner.handler.on_listener_error(TransportError::Accept { addr: inner.end_point.socket_addr, source }).await;
                tokio::time::sleep(inner.config.accept_error_backoff).await;
            }
        }
    }

    debug!("acceptor stopped");
}

#[instrument(name="connection", skip_all, fields(channel=%inner.name, remote=%handle.remote_addr(), id=handle.id()))]
async fn run_connection(inner: Arc<ChannelInner>, handle: Arc<ConnectionHandle>, reader: OwnedReadHalf) {
    let remote_addr = handle.remote_addr();
    let framer = inner.framer_factory.new_framer(remote_addr);

    // a panic in the framer or the handler must not keep the connection registered
    let receive = tokio::spawn(
        receive_loop(remote_addr, reader, framer, inner.handler.clone(), inner.config.receive_buffer_size)
            .instrument(Span::current())
    );

    match receive.await {
        Ok(Ok(())) => debug!("connection closed"),
        Ok(Err(e)) if handle.is_closed() => debug!("connection closed locally: {}", e),
        Ok(Err(e)) => warn!("connection broke with an error: {}", e),
        Err(e) => error!("receive loop failed: {}", e),
    }

    inner.disconnect(&handle).await;
}
