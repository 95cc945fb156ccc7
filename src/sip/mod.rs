//! The part of the SIP grammar the transport needs to know about: the address-of-record
//!  field of From / To / Contact headers, and the SIP URI embedded in it.

pub mod error;
pub mod parameters;
pub mod uri;
pub mod user_field;
