use std::net::SocketAddr;
use std::time::Duration;

use anyhow::bail;
use rand::Rng;

#[derive(Debug, Clone)]
pub struct TcpChannelConfig {
    pub local_addr: SocketAddr,

    /// Used to tell channels apart in log output. If it is not set, a name is generated when
    ///  the channel is opened.
    pub name: Option<String>,

    pub accept_backlog: u32,

    /// This is the upper bound for a single read from a connection. Messages that do not fit
    ///  into one read are reassembled by the framer.
    pub receive_buffer_size: usize,

    /// A connection that accumulates more than this number of bytes without producing a
    ///  complete message is treated as broken and closed.
    pub max_message_size: usize,

    pub connect_timeout: Duration,

    /// Upper bound for writing one payload, including waiting for other writes on the same
    ///  connection. A connection whose peer stops reading is closed when this expires.
    pub write_timeout: Duration,

    pub tcp_nodelay: bool,

    /// If set, outbound connections are bound to the channel's exact local address (including
    ///  the port) with SO_REUSEADDR / SO_REUSEPORT, so peers see requests coming from the
    ///  listening port. Otherwise they are bound to the channel's IP with an ephemeral port.
    pub reuse_local_port: bool,

    /// Delay before accepting again after an unexpected listener error, to avoid a hot loop
    ///  e.g. when running out of file descriptors
    pub accept_error_backoff: Duration,
}

impl TcpChannelConfig {
    pub fn new(local_addr: SocketAddr) -> TcpChannelConfig {
        TcpChannelConfig {
            local_addr,
            name: None,
            accept_backlog: 1000,
            receive_buffer_size: 8 * 1024,
            max_message_size: 64 * 1024,
            connect_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(10),
            tcp_nodelay: true,
            reuse_local_port: false,
            accept_error_backoff: Duration::from_millis(100),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.receive_buffer_size == 0 {
            bail!("receive buffer size must not be 0");
        }
        if self.max_message_size < self.receive_buffer_size {
            bail!("max message size ({}) must be at least the receive buffer size ({})", self.max_message_size, self.receive_buffer_size);
        }
        if self.accept_backlog == 0 {
            bail!("accept backlog must not be 0");
        }
        if self.connect_timeout.is_zero() {
            bail!("connect timeout must not be zero");
        }
        if self.write_timeout.is_zero() {
            bail!("write timeout must not be zero");
        }
        Ok(())
    }

    pub fn effective_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("t{:04}", rand::thread_rng().gen_range(0..10_000)),
        }
    }
}
