use std::fmt::{Debug, Display, Formatter};
use std::net::SocketAddr;
use std::str::FromStr;

use anyhow::anyhow;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum SipProtocol {
    Udp,
    Tcp,
    Tls,
}

impl SipProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            SipProtocol::Udp => "udp",
            SipProtocol::Tcp => "tcp",
            SipProtocol::Tls => "tls",
        }
    }

    /// Stream transports guarantee ordered delivery, so the SIP layer does not retransmit
    ///  over them.
    pub fn is_reliable(&self) -> bool {
        !matches!(self, SipProtocol::Udp)
    }
}

impl Display for SipProtocol {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SipProtocol {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("udp") {
            Ok(SipProtocol::Udp)
        }
        else if s.eq_ignore_ascii_case("tcp") {
            Ok(SipProtocol::Tcp)
        }
        else if s.eq_ignore_ascii_case("tls") {
            Ok(SipProtocol::Tls)
        }
        else {
            Err(anyhow!("unknown SIP transport protocol {:?}", s))
        }
    }
}

/// A transport protocol together with a socket address. As a channel's identity it names the
///  local listening / sending endpoint; for received messages it names the remote side.
///
/// The textual form is `protocol:address`, e.g. `tcp:10.0.0.1:5060` or `tcp:[::1]:5060`.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct SipEndPoint {
    pub protocol: SipProtocol,
    pub socket_addr: SocketAddr,
}

impl SipEndPoint {
    pub fn new(protocol: SipProtocol, socket_addr: SocketAddr) -> SipEndPoint {
        SipEndPoint {
            protocol,
            socket_addr,
        }
    }

    pub fn tcp(socket_addr: SocketAddr) -> SipEndPoint {
        SipEndPoint::new(SipProtocol::Tcp, socket_addr)
    }
}

impl Debug for SipEndPoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}:{}]", self.protocol, self.socket_addr)
    }
}

impl Display for SipEndPoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.protocol, self.socket_addr)
    }
}

impl FromStr for SipEndPoint {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (protocol, addr) = s.split_once(':')
            .ok_or_else(|| anyhow!("SIP end point {:?} has no protocol prefix", s))?;

        Ok(SipEndPoint {
            protocol: protocol.parse()?,
            socket_addr: addr.parse()?,
        })
    }
}

impl From<SocketAddr> for SipEndPoint {
    fn from(addr: SocketAddr) -> Self {
        SipEndPoint::tcp(addr)
    }
}

#[cfg(test)]
mod test {
    use rstest::rstest;
    use super::*;

    #[rstest]
    #[case::tcp_v4("tcp:10.0.0.1:5060", SipProtocol::Tcp, "10.0.0.1:5060")]
    #[case::upper_case("TCP:10.0.0.1:5060", SipProtocol::Tcp, "10.0.0.1:5060")]
    #[case::udp_v6("udp:[::1]:5070", SipProtocol::Udp, "[::1]:5070")]
    #[case::tls("tls:127.0.0.1:5061", SipProtocol::Tls, "127.0.0.1:5061")]
    fn test_parse(#[case] s: &str, #[case] protocol: SipProtocol, #[case] addr: &str) {
        let end_point: SipEndPoint = s.parse().unwrap();
        assert_eq!(end_point, SipEndPoint::new(protocol, addr.parse().unwrap()));
    }

    #[rstest]
    #[case::no_protocol("10.0.0.1")]
    #[case::unknown_protocol("sctp:10.0.0.1:5060")]
    #[case::no_port("tcp:10.0.0.1")]
    fn test_parse_invalid(#[case] s: &str) {
        assert!(s.parse::<SipEndPoint>().is_err());
    }

    #[test]
    fn test_display() {
        let end_point = SipEndPoint::tcp("[::1]:5060".parse().unwrap());
        assert_eq!(end_point.to_string(), "tcp:[::1]:5060");
        assert_eq!(format!("{:?}", end_point), "[tcp:[::1]:5060]");
    }

    #[rstest]
    #[case(SipProtocol::Udp, false)]
    #[case(SipProtocol::Tcp, true)]
    #[case(SipProtocol::Tls, true)]
    fn test_is_reliable(#[case] protocol: SipProtocol, #[case] expected: bool) {
        assert_eq!(protocol.is_reliable(), expected);
    }
}
