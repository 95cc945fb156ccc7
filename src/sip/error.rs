use thiserror::Error;

#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum SipParseError {
    #[error("malformed SIP URI {uri:?}: {reason}")]
    MalformedUri {
        uri: String,
        reason: &'static str,
    },

    /// There is no discernible URI in an address-of-record field.
    #[error("malformed user field {field:?}: {reason}")]
    MalformedField {
        field: String,
        reason: String,
    },
}

impl SipParseError {
    pub(crate) fn uri(uri: &str, reason: &'static str) -> SipParseError {
        SipParseError::MalformedUri {
            uri: uri.to_string(),
            reason,
        }
    }

    pub(crate) fn field(field: &str, reason: impl Into<String>) -> SipParseError {
        SipParseError::MalformedField {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}
