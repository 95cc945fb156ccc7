use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use tokio::net::{TcpSocket, TcpStream};
use tracing::trace;

/// Establishes outbound connections for a channel. This is a seam for tests and for owners that
///  need control over socket setup; [TcpConnector] is what channels use by default.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, local_addr: SocketAddr, remote_addr: SocketAddr) -> io::Result<TcpStream>;
}

pub struct TcpConnector {
    pub connect_timeout: Duration,
    pub tcp_nodelay: bool,
    pub reuse_local_port: bool,
}

impl TcpConnector {
    fn bind_socket(&self, local_addr: SocketAddr, remote_addr: SocketAddr) -> io::Result<TcpSocket> {
        let socket = match remote_addr {
            SocketAddr::V4(_) => TcpSocket::new_v4()?,
            SocketAddr::V6(_) => TcpSocket::new_v6()?,
        };

        if local_addr.is_ipv4() != remote_addr.is_ipv4() {
            // the local address can not be used for the remote address family
            return Ok(socket);
        }

        let bind_addr = if self.reuse_local_port {
            socket.set_reuseaddr(true)?;
            #[cfg(unix)]
            socket.set_reuseport(true)?;
            local_addr
        }
        else {
            SocketAddr::new(local_addr.ip(), 0)
        };
        socket.bind(bind_addr)?;
        Ok(socket)
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, local_addr: SocketAddr, remote_addr: SocketAddr) -> io::Result<TcpStream> {
        let socket = self.bind_socket(local_addr, remote_addr)?;
        trace!(remote=%remote_addr, "connecting");

        let stream = match tokio::time::timeout(self.connect_timeout, socket.connect(remote_addr)).await {
            Ok(result) => result?,
            Err(_) => return Err(io::Error::new(io::ErrorKind::TimedOut, format!("connect timed out after {:?}", self.connect_timeout))),
        };

        stream.set_nodelay(self.tcp_nodelay)?;
        Ok(stream)
    }
}
