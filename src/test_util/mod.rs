//! This module contains utilities that are useful for testing code based on SIP channels. They
//!  are used for testing the channel itself, but they are also exported for application testing.

pub mod handler;
pub mod net;

pub use handler::TrackingChannelHandler;
pub use net::{connected_pair, eventually, loopback_config, test_handle, CountingConnector};

#[cfg(test)]
mod tests {
    use tracing::Level;

    #[ctor::ctor]
    fn init_test_logging() {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(Level::DEBUG)
            // .with_max_level(Level::TRACE)
            .try_init()
            .ok();
    }
}
