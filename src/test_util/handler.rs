use std::net::SocketAddr;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::transport::error::TransportError;
use crate::transport::handler::ChannelHandler;

/// A [ChannelHandler] that records everything it is called with
#[derive(Default)]
pub struct TrackingChannelHandler {
    messages: Mutex<Vec<(SocketAddr, Bytes)>>,
    disconnected: Mutex<Vec<SocketAddr>>,
    listener_errors: Mutex<Vec<String>>,
}

impl TrackingChannelHandler {
    pub fn new() -> TrackingChannelHandler {
        Default::default()
    }

    pub fn received_messages(&self) -> Vec<(SocketAddr, Bytes)> {
        self.messages.lock().clone()
    }

    pub fn disconnected(&self) -> Vec<SocketAddr> {
        self.disconnected.lock().clone()
    }

    /// listener errors, rendered as strings
    pub fn listener_errors(&self) -> Vec<String> {
        self.listener_errors.lock().clone()
    }
}

#[async_trait]
impl ChannelHandler for TrackingChannelHandler {
    async fn on_message(&self, remote_addr: SocketAddr, msg: Bytes) {
        self.messages.lock().push((remote_addr, msg));
    }

    async fn on_disconnected(&self, remote_addr: SocketAddr) {
        self.disconnected.lock().push(remote_addr);
    }

    async fn on_listener_error(&self, e: TransportError) {
        self.listener_errors.lock().push(e.to_string());
    }
}
