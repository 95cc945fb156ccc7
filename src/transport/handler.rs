use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
#[cfg(test)] use mockall::automock;
use tokio::sync::mpsc;
use tracing::{error, trace};

use crate::transport::error::TransportError;

/// This trait decouples a channel from whatever consumes its messages - typically the SIP
///  transaction layer. Every channel requires its owner to provide one.
///
/// Callbacks are awaited by the connection's receive loop, so a slow handler holds up reading
///  from that connection (but not from others). Non-trivial work should be offloaded.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ChannelHandler: Send + Sync + 'static {
    /// called once per complete message, in the order messages arrived on the connection
    async fn on_message(&self, remote_addr: SocketAddr, msg: Bytes);

    /// called once when a registered connection goes away - closed by the peer, broken, or
    ///  torn down after a failed write. It is not called for connections closed by
    ///  [crate::transport::channel::TcpChannel::close].
    async fn on_disconnected(&self, remote_addr: SocketAddr);

    /// called when the listener fails for a reason other than the channel being closed. The
    ///  channel keeps accepting after a back-off.
    async fn on_listener_error(&self, e: TransportError) {
        error!("listener error: {}", e);
    }
}

#[derive(Debug)]
pub enum ChannelEvent {
    Message {
        remote_addr: SocketAddr,
        msg: Bytes,
    },
    Disconnected {
        remote_addr: SocketAddr,
    },
    ListenerError(TransportError),
}

/// A [ChannelHandler] that turns callbacks into [ChannelEvent]s on a queue, for owners that
///  prefer a single dispatcher loop over callbacks.
pub struct ChannelEventQueue {
    sender: mpsc::UnboundedSender<ChannelEvent>,
}

impl ChannelEventQueue {
    pub fn new() -> (Arc<ChannelEventQueue>, mpsc::UnboundedReceiver<ChannelEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Arc::new(ChannelEventQueue { sender }), receiver)
    }

    fn send_event(&self, event: ChannelEvent) {
        trace!("event: {:?}", event);
        // the owner dropping the receiver means it is no longer interested
        let _ = self.sender.send(event);
    }
}

#[async_trait]
impl ChannelHandler for ChannelEventQueue {
    async fn on_message(&self, remote_addr: SocketAddr, msg: Bytes) {
        self.send_event(ChannelEvent::Message { remote_addr, msg });
    }

    async fn on_disconnected(&self, remote_addr: SocketAddr) {
        self.send_event(ChannelEvent::Disconnected { remote_addr });
    }

    async fn on_listener_error(&self, e: TransportError) {
        self.send_event(ChannelEvent::ListenerError(e));
    }
}
