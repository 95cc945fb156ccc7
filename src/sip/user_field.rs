use std::fmt::{Display, Formatter};
use std::str::FromStr;

use tracing::warn;

use crate::sip::error::SipParseError;
use crate::sip::parameters::{find_unquoted, SipParameters, PARAM_DELIMITER};
use crate::sip::uri::SipUri;

/// The address-of-record value of the From, To and Contact headers:
///
/// ```ascii
/// name-addr   =  [ display-name ] LAQUOT addr-spec RAQUOT *( SEMI param )
/// addr-spec   =  SIP-URI / SIPS-URI
/// ```
///
/// If there are no angle brackets, the field is an `addr-spec` directly followed by its
///  parameters, and *all* parameters after the URI are header parameters rather than URI
///  parameters (RFC 3261 section 20.10). Inside brackets, `;` belongs to the URI.
///
/// Serialization always uses the bracketed form and always quotes the display name, so it
///  round-trips the parsed content but not necessarily the original text.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SipUserField {
    pub display_name: Option<String>,
    pub uri: SipUri,
    pub parameters: SipParameters,
}

impl SipUserField {
    pub fn new(display_name: Option<&str>, uri: SipUri, parameters: &str) -> SipUserField {
        SipUserField {
            display_name: display_name.map(str::to_string),
            uri,
            parameters: SipParameters::parse(parameters, PARAM_DELIMITER),
        }
    }

    pub fn parse(s: &str) -> Result<SipUserField, SipParseError> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(SipParseError::field(s, "empty user field"));
        }

        let Some(laquot) = find_unquoted(trimmed, '<') else {
            let (uri, parameters) = match trimmed.split_once(PARAM_DELIMITER) {
                Some((uri, params)) => (uri, SipParameters::parse(params, PARAM_DELIMITER)),
                None => (trimmed, SipParameters::new(PARAM_DELIMITER)),
            };
            return Ok(SipUserField {
                display_name: None,
                uri: parse_uri(s, uri)?,
                parameters,
            });
        };

        let display_name = parse_display_name(&trimmed[..laquot]);
        let addr_spec = &trimmed[laquot+1..];

        match addr_spec.find('>') {
            Some(raquot) => {
                let uri = parse_uri(s, &addr_spec[..raquot])?;

                let params = addr_spec[raquot+1..].trim();
                if !params.is_empty() && !params.starts_with(PARAM_DELIMITER) {
                    return Err(SipParseError::field(s, "unexpected text after '>'"));
                }

                Ok(SipUserField {
                    display_name,
                    uri,
                    parameters: SipParameters::parse(params, PARAM_DELIMITER),
                })
            }
            None => {
                warn!("user field {:?} is missing the closing '>' - using the remainder as URI and ignoring parameters", s);
                Ok(SipUserField {
                    display_name,
                    uri: parse_uri(s, addr_spec)?,
                    parameters: SipParameters::new(PARAM_DELIMITER),
                })
            }
        }
    }
}

fn parse_uri(field: &str, uri: &str) -> Result<SipUri, SipParseError> {
    SipUri::parse(uri)
        .map_err(|e| SipParseError::field(field, e.to_string()))
}

fn parse_display_name(raw: &str) -> Option<String> {
    let raw = raw.trim();

    let name = match raw.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        Some(quoted) => unescape(quoted),
        None => raw.trim_matches('"').trim().to_string(),
    };

    if name.trim().is_empty() {
        None
    }
    else {
        Some(name)
    }
}

fn unescape(quoted: &str) -> String {
    let mut result = String::with_capacity(quoted.len());
    let mut chars = quoted.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    result.push(escaped);
                }
            }
            c => result.push(c),
        }
    }
    result
}

impl Display for SipUserField {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if let Some(name) = &self.display_name {
            f.write_str("\"")?;
            for c in name.chars() {
                if c == '"' || c == '\\' {
                    f.write_str("\\")?;
                }
                write!(f, "{}", c)?;
            }
            f.write_str("\" ")?;
        }
        write!(f, "<{}>{}", self.uri, self.parameters)
    }
}

impl FromStr for SipUserField {
    type Err = SipParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SipUserField::parse(s)
    }
}
