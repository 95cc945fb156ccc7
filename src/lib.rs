pub mod sip;
pub mod transport;
pub mod test_util;
