use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use crate::transport::end_point::{SipEndPoint, SipProtocol};

/// Failures surfaced by a channel to its owner. Errors inside the accept and receive loops are
///  contained there and never show up here.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("could not bind listening socket to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// Reported to [crate::transport::handler::ChannelHandler::on_listener_error]; the channel
    ///  keeps accepting.
    #[error("listener on {addr} failed to accept a connection: {source}")]
    Accept {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("could not connect to {destination}: {source}")]
    ConnectFailed {
        destination: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// The connection is closed and removed from the registry before this is returned.
    #[error("could not send to {destination}: {source}")]
    SendFailed {
        destination: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("channel {0} is closed")]
    ChannelClosed(SipEndPoint),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{operation} is not supported by the {protocol} transport")]
    UnsupportedOperation {
        operation: &'static str,
        protocol: SipProtocol,
    },
}

impl TransportError {
    /// `true` for errors that a caller may reasonably retry on a fresh connection.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::ConnectFailed { .. } | TransportError::SendFailed { .. })
    }
}
