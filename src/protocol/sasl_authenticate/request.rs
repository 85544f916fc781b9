//! Encoding and creation for SASL Authenticate requests.
//!
//! ### Protocol Def
//! ```text
//! SaslAuthenticate Request (Version: 1) => auth_bytes
//!   auth_bytes => BYTES
//! ```
//!
//! Note that we are using version 1 of this API

use bytes::{BufMut, Bytes, BytesMut};

use crate::{encode::ToByte, protocol::HeaderRequest};

const API_KEY_SASL_AUTHENTICATE: i16 = 36;
const API_VERSION: i16 = 1;

/// The base SASL Authenticate request object.
#[derive(Debug)]
pub struct SaslAuthenticateRequest<'a> {
    pub header: HeaderRequest<'a>,
    /// The SASL authentication bytes from the client, as defined by the SASL mechanism.
    pub auth_bytes: Bytes,
}

impl<'a> SaslAuthenticateRequest<'a> {
    pub fn new(correlation_id: i32, client_id: &'a str, auth_bytes: Bytes) -> Self {
        let header =
            HeaderRequest::new(API_KEY_SASL_AUTHENTICATE, API_VERSION, correlation_id, client_id);
        Self { header, auth_bytes }
    }

    /// PLAIN credentials, `\0username\0password` with an empty authorization id.
    pub fn plain(correlation_id: i32, client_id: &'a str, username: &str, password: &str) -> Self {
        let mut auth_bytes = BytesMut::with_capacity(2 + username.len() + password.len());
        auth_bytes.put_u8(0);
        auth_bytes.put_slice(username.as_bytes());
        auth_bytes.put_u8(0);
        auth_bytes.put_slice(password.as_bytes());
        Self::new(correlation_id, client_id, auth_bytes.freeze())
    }
}

impl<'a> ToByte for SaslAuthenticateRequest<'a> {
    fn encode<T: bytes::BufMut>(&self, buffer: &mut T) -> crate::error::Result<()> {
        tracing::trace!("Encoding SaslAuthenticateRequest {:?}", self.header);
        self.header.encode(buffer)?;
        self.auth_bytes.encode(buffer)?;
        Ok(())
    }
}
