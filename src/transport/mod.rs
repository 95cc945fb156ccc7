//! SIP over TCP: a [channel::TcpChannel] listens on a local address and keeps at most one
//!  connection per remote address, no matter which side opened it. Outbound messages reuse an
//!  existing connection or trigger a new one; inbound bytes are split into messages by a
//!  [framer::Framer] and handed to the owner's [handler::ChannelHandler].

pub mod channel;
pub mod config;
pub mod connection;
pub mod connector;
pub mod end_point;
pub mod error;
pub mod framer;
pub mod handler;
pub mod registry;
