//! Agree on the SASL mechanism before authenticating.

pub mod request;
pub mod response;
