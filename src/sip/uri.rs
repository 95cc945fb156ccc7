use std::fmt::{Display, Formatter};
use std::str::FromStr;

use crate::sip::error::SipParseError;
use crate::sip::parameters::{SipParameters, HEADER_DELIMITER, PARAM_DELIMITER};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum SipScheme {
    Sip,
    Sips,
}

impl SipScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            SipScheme::Sip => "sip",
            SipScheme::Sips => "sips",
        }
    }
}

impl Display for SipScheme {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `sip:` or `sips:` URI (RFC 3261 section 19.1):
///
/// ```ascii
/// SIP-URI   =  "sip:" [ userinfo ] hostport uri-parameters [ headers ]
/// userinfo  =  ( user / telephone-subscriber ) [ ":" password ] "@"
/// ```
///
/// `host` holds the full `hostport`, i.e. including the port if there is one -
///  [SipUri::host_name] and [SipUri::port] split it.
///
/// The user part is everything up to the first `@`, so it may contain `;` and `=` (some
///  gateways encode routing data there, e.g. `sip:C=on;t=DLPAN@10.0.0.1`).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SipUri {
    pub scheme: SipScheme,
    pub user: Option<String>,
    pub password: Option<String>,
    pub host: String,
    pub parameters: SipParameters,
    pub headers: SipParameters,
}

impl SipUri {
    pub fn new(scheme: SipScheme, user: Option<&str>, host: &str) -> SipUri {
        SipUri {
            scheme,
            user: user.map(str::to_string),
            password: None,
            host: host.to_string(),
            parameters: SipParameters::new(PARAM_DELIMITER),
            headers: SipParameters::new(HEADER_DELIMITER),
        }
    }

    pub fn parse(s: &str) -> Result<SipUri, SipParseError> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(SipParseError::uri(s, "empty URI"));
        }

        let (scheme, rest) = trimmed.split_once(':')
            .ok_or_else(|| SipParseError::uri(s, "missing scheme"))?;
        let scheme = if scheme.eq_ignore_ascii_case("sip") {
            SipScheme::Sip
        }
        else if scheme.eq_ignore_ascii_case("sips") {
            SipScheme::Sips
        }
        else {
            return Err(SipParseError::uri(s, "unsupported scheme"));
        };

        let (user_info, host_part) = match rest.find('@') {
            Some(idx) => (Some(&rest[..idx]), &rest[idx+1..]),
            None => (None, rest),
        };

        let (user, password) = match user_info {
            None => (None, None),
            Some(user_info) => {
                let (user, password) = match user_info.split_once(':') {
                    Some((user, password)) => (user, Some(password.to_string())),
                    None => (user_info, None),
                };
                if user.is_empty() {
                    return Err(SipParseError::uri(s, "empty user part"));
                }
                (Some(user.to_string()), password)
            }
        };

        let (host_part, headers) = match host_part.split_once('?') {
            Some((host_part, headers)) => (host_part, SipParameters::parse(headers, HEADER_DELIMITER)),
            None => (host_part, SipParameters::new(HEADER_DELIMITER)),
        };
        let (host, parameters) = match host_part.split_once(PARAM_DELIMITER) {
            Some((host, params)) => (host, SipParameters::parse(params, PARAM_DELIMITER)),
            None => (host_part, SipParameters::new(PARAM_DELIMITER)),
        };

        if host.is_empty() {
            return Err(SipParseError::uri(s, "missing host"));
        }
        if host.chars().any(|c| c.is_whitespace() || c == '<' || c == '>' || c == '"') {
            return Err(SipParseError::uri(s, "invalid character in host"));
        }

        Ok(SipUri {
            scheme,
            user,
            password,
            host: host.to_string(),
            parameters,
            headers,
        })
    }

    /// The host without the port; IPv6 references keep their brackets.
    pub fn host_name(&self) -> &str {
        self.split_host_port().0
    }

    pub fn port(&self) -> Option<u16> {
        self.split_host_port().1
    }

    fn split_host_port(&self) -> (&str, Option<u16>) {
        if self.host.starts_with('[') {
            return match self.host.find(']') {
                Some(end) => {
                    let port = self.host[end+1..]
                        .strip_prefix(':')
                        .and_then(|p| p.parse().ok());
                    (&self.host[..=end], port)
                }
                None => (&self.host, None),
            };
        }

        match self.host.rsplit_once(':') {
            Some((host, port)) => match port.parse() {
                Ok(port) => (host, Some(port)),
                Err(_) => (&self.host, None),
            },
            None => (&self.host, None),
        }
    }
}

impl Display for SipUri {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:", self.scheme)?;
        if let Some(user) = &self.user {
            f.write_str(user)?;
            if let Some(password) = &self.password {
                write!(f, ":{}", password)?;
            }
            f.write_str("@")?;
        }
        f.write_str(&self.host)?;
        self.parameters.write_with(f, PARAM_DELIMITER)?;
        self.headers.write_with(f, '?')
    }
}

impl FromStr for SipUri {
    type Err = SipParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SipUri::parse(s)
    }
}

#[cfg(test)]
mod test {
    use rstest::rstest;
    use super::*;

    #[rstest]
    #[case::user_host_port("sip:alice@10.0.0.1:5060", SipScheme::Sip, Some("alice"), None, "10.0.0.1:5060")]
    #[case::no_user("sip:example.com", SipScheme::Sip, None, None, "example.com")]
    #[case::sips("sips:bob@example.com", SipScheme::Sips, Some("bob"), None, "example.com")]
    #[case::upper_case_scheme("SIP:bob@example.com", SipScheme::Sip, Some("bob"), None, "example.com")]
    #[case::password("sip:bob:secret@example.com", SipScheme::Sip, Some("bob"), Some("secret"), "example.com")]
    #[case::params_in_user("sip:C=on;t=DLPAN@10.0.0.1:5060;lr", SipScheme::Sip, Some("C=on;t=DLPAN"), None, "10.0.0.1:5060")]
    #[case::ipv6("sip:alice@[2001:db8::1]:5070", SipScheme::Sip, Some("alice"), None, "[2001:db8::1]:5070")]
    fn test_parse(#[case] s: &str, #[case] scheme: SipScheme, #[case] user: Option<&str>, #[case] password: Option<&str>, #[case] host: &str) {
        let uri = SipUri::parse(s).unwrap();
        assert_eq!(uri.scheme, scheme);
        assert_eq!(uri.user.as_deref(), user);
        assert_eq!(uri.password.as_deref(), password);
        assert_eq!(uri.host, host);
    }

    #[test]
    fn test_parse_parameters_and_headers() {
        let uri = SipUri::parse("sip:alice@atlanta.com;transport=tcp;lr?subject=project&priority=urgent").unwrap();
        assert_eq!(uri.host, "atlanta.com");
        assert_eq!(uri.parameters.get("transport"), Some(Some("tcp")));
        assert_eq!(uri.parameters.get("lr"), Some(None));
        assert_eq!(uri.headers.get("subject"), Some(Some("project")));
        assert_eq!(uri.headers.get("priority"), Some(Some("urgent")));
    }

    #[rstest]
    #[case::empty("")]
    #[case::blank("   ")]
    #[case::no_scheme("alice@example.com")]
    #[case::unsupported_scheme("mailto:alice@example.com")]
    #[case::no_host("sip:alice@")]
    #[case::only_params("sip:;lr")]
    #[case::empty_user("sip:@example.com")]
    #[case::whitespace_in_host("sip:alice@exa mple.com")]
    fn test_parse_invalid(#[case] s: &str) {
        assert!(matches!(SipUri::parse(s), Err(SipParseError::MalformedUri { .. })));
    }

    #[rstest]
    #[case::host_and_port("sip:a@10.0.0.1:5060", "10.0.0.1", Some(5060))]
    #[case::host_only("sip:a@example.com", "example.com", None)]
    #[case::ipv6_with_port("sip:a@[::1]:5060", "[::1]", Some(5060))]
    #[case::ipv6_without_port("sip:a@[::1]", "[::1]", None)]
    #[case::invalid_port("sip:a@example.com:abc", "example.com:abc", None)]
    fn test_host_name_and_port(#[case] s: &str, #[case] host_name: &str, #[case] port: Option<u16>) {
        let uri = SipUri::parse(s).unwrap();
        assert_eq!(uri.host_name(), host_name);
        assert_eq!(uri.port(), port);
    }

    #[rstest]
    #[case::simple("sip:alice@10.0.0.1:5060")]
    #[case::no_user("sips:example.com")]
    #[case::password("sip:bob:secret@example.com")]
    #[case::params("sip:C=on;t=DLPAN@10.0.0.1:5060;lr;transport=tcp")]
    #[case::headers("sip:alice@atlanta.com?subject=project&priority=urgent")]
    fn test_display(#[case] s: &str) {
        assert_eq!(SipUri::parse(s).unwrap().to_string(), s);
    }

    #[test]
    fn test_new() {
        let mut uri = SipUri::new(SipScheme::Sip, Some("carol"), "chicago.com:5080");
        uri.parameters.set("transport", Some("tcp"));
        assert_eq!(uri.to_string(), "sip:carol@chicago.com:5080;transport=tcp");
        assert_eq!(uri.port(), Some(5080));
    }
}
