use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use clap::Parser;
use clap_derive::Parser;
use sip_tcp_channel::sip::user_field::SipUserField;
use sip_tcp_channel::transport::channel::{SendOutcome, TcpChannel};
use sip_tcp_channel::transport::config::TcpChannelConfig;
use sip_tcp_channel::transport::handler::{ChannelEvent, ChannelEventQueue};
use tokio::select;
use tracing::{info, warn, Level};

#[derive(Parser)]
struct Args {
    listen_address: String,

    /// send an OPTIONS request to this address after startup
    #[clap(long)]
    peer: Option<String>,

    #[clap(long)]
    name: Option<String>,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,

    #[clap(long, default_value_t = false)]
    very_verbose: bool,
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match (args.verbose, args.very_verbose) {
        (_, true) => Level::TRACE,
        (true, _) => Level::DEBUG,
        (false, false) => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .try_init()
        .ok();

    let mut config = TcpChannelConfig::new(args.listen_address.parse()?);
    config.name = args.name;

    let (queue, mut events) = ChannelEventQueue::new();
    let channel = TcpChannel::open(Arc::new(config), queue).await?;
    let local_addr = channel.end_point().socket_addr;

    if let Some(peer) = args.peer {
        let peer: SocketAddr = peer.parse()?;
        match channel.send(peer, options_request(local_addr, peer)).await? {
            SendOutcome::Written => info!("sent OPTIONS to {}", peer),
            SendOutcome::Connecting(pending) => {
                pending.await?;
                info!("connected to {} and sent OPTIONS", peer);
            }
        }
    }

    loop {
        select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Some(ChannelEvent::Message { remote_addr, msg }) => on_message(remote_addr, &msg),
                Some(ChannelEvent::Disconnected { remote_addr }) => info!("{} disconnected", remote_addr),
                Some(ChannelEvent::ListenerError(e)) => warn!("listener error: {}", e),
                None => break,
            }
        }
    }

    channel.close();
    Ok(())
}

fn options_request(from: SocketAddr, to: SocketAddr) -> Bytes {
    let request = format!(
        "OPTIONS sip:{to} SIP/2.0\r\n\
         Via: SIP/2.0/TCP {from};branch=z9hG4bK-demo\r\n\
         From: \"Demo\" <sip:demo@{from}>;tag=1\r\n\
         To: <sip:{to}>\r\n\
         Call-ID: demo-{from}\r\n\
         CSeq: 1 OPTIONS\r\n\
         Max-Forwards: 70\r\n\
         Content-Length: 0\r\n\r\n"
    );
    Bytes::from(request)
}

fn on_message(remote_addr: SocketAddr, msg: &[u8]) {
    let text = String::from_utf8_lossy(msg);
    let start_line = text.lines().next().unwrap_or_default();
    info!("received {:?} from {}", start_line, remote_addr);

    for line in text.lines().skip(1).take_while(|l| !l.is_empty()) {
        let Some((name, value)) = line.split_once(':') else { continue };
        let name = name.trim();
        if name.eq_ignore_ascii_case("from") || name.eq_ignore_ascii_case("f") {
            match value.parse::<SipUserField>() {
                Ok(from) => info!("  from {:?} at {} (tag {:?})",
                    from.display_name.as_deref().unwrap_or("<anonymous>"),
                    from.uri,
                    from.parameters.get("tag").flatten(),
                ),
                Err(e) => warn!("  unparsable From header: {}", e),
            }
        }
    }
}
