//! Encoding and creation for SASL Handshake requests.
//!
//! ### Example
//! ```rust
//! use kafka_gateway::{encode::ToByte, protocol::SaslHandshakeRequest};
//!
//! let handshake = SaslHandshakeRequest::new(0, "relay", "plain");
//! assert_eq!(handshake.mechanism, "PLAIN");
//! ```
//!
//! ### Protocol Def
//! ```text
//! SaslHandshake Request (Version: 1) => mechanism
//!   mechanism => STRING
//! ```
//!
//! Note that we are using version 1 of this API

use crate::{encode::ToByte, protocol::HeaderRequest};

const API_KEY_SASL_HANDSHAKE: i16 = 17;
const API_VERSION: i16 = 1;

/// The base SASL Handshake request object.
#[derive(Debug)]
pub struct SaslHandshakeRequest<'a> {
    pub header: HeaderRequest<'a>,
    /// The SASL mechanism chosen by the client, upper cased.
    pub mechanism: String,
}

impl<'a> SaslHandshakeRequest<'a> {
    pub fn new(correlation_id: i32, client_id: &'a str, mechanism: &str) -> Self {
        let header =
            HeaderRequest::new(API_KEY_SASL_HANDSHAKE, API_VERSION, correlation_id, client_id);
        Self {
            header,
            mechanism: mechanism.to_uppercase(),
        }
    }
}

impl<'a> ToByte for SaslHandshakeRequest<'a> {
    fn encode<T: bytes::BufMut>(&self, buffer: &mut T) -> crate::error::Result<()> {
        tracing::trace!("Encoding SaslHandshakeRequest {:?}", self);
        self.header.encode(buffer)?;
        self.mechanism.encode(buffer)?;
        Ok(())
    }
}
