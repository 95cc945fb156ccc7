use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Instant;

use crate::transport::config::TcpChannelConfig;
use crate::transport::connection::{ConnectionHandle, ConnectionRole};
use crate::transport::connector::{Connector, TcpConnector};

/// A config for a channel on an ephemeral loopback port
pub fn loopback_config() -> Arc<TcpChannelConfig> {
    Arc::new(TcpChannelConfig::new(SocketAddr::from(([127, 0, 0, 1], 0))))
}

/// Returns both ends of a fresh loopback connection as `(local, remote)`
pub async fn connected_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await
        .expect("could not bind loopback listener");
    let addr = listener.local_addr()
        .expect("bound listener has no address");

    let (local, accepted) = tokio::join!(
        TcpStream::connect(addr),
        listener.accept(),
    );
    let local = local.expect("could not connect to loopback listener");
    let (remote, _) = accepted.expect("could not accept loopback connection");
    (local, remote)
}

/// Creates a handle for a live loopback connection, registered under an arbitrary remote
///  address. The other end of the connection is returned alongside the handle.
pub async fn test_handle(remote_addr: SocketAddr, role: ConnectionRole) -> (Arc<ConnectionHandle>, TcpStream) {
    let (local, remote) = connected_pair().await;
    let (handle, _reader) = ConnectionHandle::new(local, remote_addr, role)
        .expect("could not create connection handle");
    (handle, remote)
}

/// Polls a condition until it holds or the timeout expires, returning the last result
pub async fn eventually(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// A [Connector] that establishes plain loopback-friendly connections and counts the attempts
pub struct CountingConnector {
    inner: TcpConnector,
    num_connects: AtomicUsize,
}

impl Default for CountingConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl CountingConnector {
    pub fn new() -> CountingConnector {
        CountingConnector {
            inner: TcpConnector {
                connect_timeout: Duration::from_secs(5),
                tcp_nodelay: true,
                reuse_local_port: false,
            },
            num_connects: AtomicUsize::new(0),
        }
    }

    pub fn num_connects(&self) -> usize {
        self.num_connects.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Connector for CountingConnector {
    async fn connect(&self, local_addr: SocketAddr, remote_addr: SocketAddr) -> io::Result<TcpStream> {
        self.num_connects.fetch_add(1, Ordering::AcqRel);
        self.inner.connect(local_addr, remote_addr).await
    }
}
