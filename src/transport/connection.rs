use std::fmt::{Debug, Formatter};
use std::io;
use std::net::{Shutdown, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, trace};

use crate::transport::framer::Framer;
use crate::transport::handler::ChannelHandler;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionRole {
    /// the peer connected to our listening socket
    Accepted,
    /// we connected to the peer to send something
    Initiated,
}

/// One live TCP connection to a remote address.
///
/// The handle owns the write half of the stream; the read half is moved into the connection's
///  receive loop. Closing a handle shuts down the socket in both directions, which fails
///  pending writes and makes the receive loop see EOF - the file descriptor itself is released
///  when the last reference to the handle and the receive loop are gone.
pub struct ConnectionHandle {
    id: u64,
    remote_addr: SocketAddr,
    role: ConnectionRole,
    writer: Mutex<OwnedWriteHalf>,
    /// a duplicate of the socket's descriptor, so the connection can be shut down without
    ///  waiting for the write lock
    control: std::net::TcpStream,
    closed: AtomicBool,
    disconnected: AtomicBool,
}

impl Debug for ConnectionHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ConnectionHandle{{#{} {:?} {}}}", self.id, self.role, self.remote_addr)
    }
}

impl ConnectionHandle {
    /// Must be called from within a tokio runtime
    pub fn new(stream: TcpStream, remote_addr: SocketAddr, role: ConnectionRole) -> io::Result<(Arc<ConnectionHandle>, OwnedReadHalf)> {
        let std_stream = stream.into_std()?;
        let control = std_stream.try_clone()?;
        let (reader, writer) = TcpStream::from_std(std_stream)?
            .into_split();

        let handle = ConnectionHandle {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            remote_addr,
            role,
            writer: Mutex::new(writer),
            control,
            closed: AtomicBool::new(false),
            disconnected: AtomicBool::new(false),
        };
        Ok((Arc::new(handle), reader))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn role(&self) -> ConnectionRole {
        self.role
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Writes the entire buffer. Writes issued concurrently on the same handle do not
    ///  interleave, but their relative order is unspecified.
    pub async fn write(&self, buf: &[u8]) -> io::Result<()> {
        self.lock_writer().await
            .write(buf).await
    }

    /// Exclusive write access. Holding it while the handle is being registered guarantees that
    ///  the first write goes out before anything written through the registry.
    pub(crate) async fn lock_writer(&self) -> ConnectionWriter<'_> {
        ConnectionWriter {
            handle: self,
            writer: self.writer.lock().await,
        }
    }

    /// Shuts the socket down. Returns `false` if the handle was closed before. Errors from a
    ///  socket the peer has already torn down are ignored.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }

        debug!(remote=%self.remote_addr, id=self.id, "closing connection");
        if let Err(e) = self.control.shutdown(Shutdown::Both) {
            debug!(remote=%self.remote_addr, id=self.id, "error shutting down socket (ignored): {}", e);
        }
        true
    }

    /// Returns `true` exactly once per handle, for whoever gets to run the disconnect
    ///  handling
    pub(crate) fn mark_disconnected(&self) -> bool {
        !self.disconnected.swap(true, Ordering::AcqRel)
    }
}

pub(crate) struct ConnectionWriter<'a> {
    handle: &'a ConnectionHandle,
    writer: MutexGuard<'a, OwnedWriteHalf>,
}

impl ConnectionWriter<'_> {
    pub(crate) async fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        if self.handle.is_closed() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "connection is closed"));
        }

        trace!(remote=%self.handle.remote_addr, len=buf.len(), "writing");
        self.writer.write_all(buf).await
    }
}

/// Reads from a connection until EOF or an error, passing every complete message to the
///  handler. Bytes are fed to the framer in the order they were received.
///
/// Returns `Ok(())` when the peer closed the stream (or it was shut down locally), and an error
///  for read failures and streams that can not be framed.
pub(crate) async fn receive_loop(
    remote_addr: SocketAddr,
    mut reader: OwnedReadHalf,
    mut framer: Box<dyn Framer>,
    handler: Arc<dyn ChannelHandler>,
    buffer_size: usize,
) -> anyhow::Result<()> {
    let mut buf = vec![0u8; buffer_size];

    loop {
        let num_read = reader.read(&mut buf).await?;
        if num_read == 0 {
            return Ok(());
        }
        trace!("received {} bytes", num_read);

        for msg in framer.feed(&buf[..num_read])? {
            handler.on_message(remote_addr, msg).await;
        }
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use tokio::io::AsyncWriteExt;
    use tokio::time::timeout;

    use crate::test_util::{connected_pair, TrackingChannelHandler};
    use crate::transport::framer::ContentLengthFramer;

    use super::*;

    #[tokio::test]
    async fn test_write() {
        let (local, mut remote) = connected_pair().await;
        let remote_addr = local.peer_addr().unwrap();
        let (handle, _reader) = ConnectionHandle::new(local, remote_addr, ConnectionRole::Initiated).unwrap();

        assert_eq!(handle.remote_addr(), remote_addr);
        assert_eq!(handle.role(), ConnectionRole::Initiated);
        assert!(!handle.is_closed());

        handle.write(b"hello").await.unwrap();

        let mut buf = [0u8; 5];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[tokio::test]
    async fn test_close() {
        let (local, mut remote) = connected_pair().await;
        let remote_addr = local.peer_addr().unwrap();
        let (handle, _reader) = ConnectionHandle::new(local, remote_addr, ConnectionRole::Accepted).unwrap();

        assert!(handle.close());
        assert!(!handle.close());
        assert!(handle.is_closed());

        assert_eq!(handle.write(b"x").await.unwrap_err().kind(), io::ErrorKind::NotConnected);

        let mut buf = [0u8; 1];
        let num_read = timeout(Duration::from_secs(5), remote.read(&mut buf)).await.unwrap().unwrap();
        assert_eq!(num_read, 0);
    }

    #[tokio::test]
    async fn test_mark_disconnected_once() {
        let (local, _remote) = connected_pair().await;
        let remote_addr = local.peer_addr().unwrap();
        let (handle, _reader) = ConnectionHandle::new(local, remote_addr, ConnectionRole::Accepted).unwrap();

        assert!(handle.mark_disconnected());
        assert!(!handle.mark_disconnected());
    }

    #[tokio::test]
    async fn test_connection_ids_are_unique() {
        let (a, _ra) = connected_pair().await;
        let (b, _rb) = connected_pair().await;
        let addr_a = a.peer_addr().unwrap();
        let addr_b = b.peer_addr().unwrap();
        let (a, _) = ConnectionHandle::new(a, addr_a, ConnectionRole::Accepted).unwrap();
        let (b, _) = ConnectionHandle::new(b, addr_b, ConnectionRole::Accepted).unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[tokio::test]
    async fn test_receive_loop_dispatches_messages_until_eof() {
        let (local, mut remote) = connected_pair().await;
        let remote_addr = local.peer_addr().unwrap();
        let (_handle, reader) = ConnectionHandle::new(local, remote_addr, ConnectionRole::Accepted).unwrap();
        let handler = Arc::new(TrackingChannelHandler::new());

        let receive = tokio::spawn(receive_loop(remote_addr, reader, Box::new(ContentLengthFramer::new(1024)), handler.clone(), 7));

        remote.write_all(b"MESSAGE sip:a@b SIP/2.0\r\nContent-Length: 2\r\n\r\nhiOPTIONS sip:a@b SIP/2.0\r\n\r\n").await.unwrap();
        remote.shutdown().await.unwrap();

        timeout(Duration::from_secs(5), receive).await.unwrap().unwrap().unwrap();

        let messages = handler.received_messages();
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().all(|(addr, _)| *addr == remote_addr));
        assert_eq!(messages[0].1.as_ref(), b"MESSAGE sip:a@b SIP/2.0\r\nContent-Length: 2\r\n\r\nhi");
        assert_eq!(messages[1].1.as_ref(), b"OPTIONS sip:a@b SIP/2.0\r\n\r\n");
    }

    #[tokio::test]
    async fn test_receive_loop_fails_on_framing_error() {
        let (local, mut remote) = connected_pair().await;
        let remote_addr = local.peer_addr().unwrap();
        let (_handle, reader) = ConnectionHandle::new(local, remote_addr, ConnectionRole::Accepted).unwrap();
        let handler = Arc::new(TrackingChannelHandler::new());

        let receive = tokio::spawn(receive_loop(remote_addr, reader, Box::new(ContentLengthFramer::new(16)), handler.clone(), 16));
        remote.write_all(&[b'x'; 64]).await.unwrap();

        let result = timeout(Duration::from_secs(5), receive).await.unwrap().unwrap();
        assert!(result.is_err());
        assert!(handler.received_messages().is_empty());
    }
}
