//! Parsing for SASL Authenticate responses.
//!
//! ### Protocol Defs
//! ```text
//! SaslAuthenticate Response (Version: 1) => error_code error_message auth_bytes session_lifetime_ms
//!   error_code => INT16
//!   error_message => NULLABLE_STRING
//!   auth_bytes => BYTES
//!   session_lifetime_ms => INT64
//! ```
//!
//! Note we are using version 1 for the response.

use bytes::Bytes;
use nom::{
    number::streaming::{be_i16, be_i64},
    IResult,
};
use nombytes::NomBytes;

use crate::parser;

/// The SASL Authenticate response body, following the response header.
#[derive(Debug, PartialEq)]
pub struct SaslAuthenticateResponse {
    /// The error code, or 0 if there was no error.
    pub error_code: i16,
    /// The error message, or null if there was no error.
    pub error_message: Option<Bytes>,
    /// The SASL authentication bytes from the server, as defined by the SASL mechanism.
    pub auth_bytes: Bytes,
    /// Number of milliseconds after which only re-authentication over the existing connection to create a new session can occur.
    pub session_lifetime_ms: i64,
}

pub fn parse_sasl_authenticate_response(
    s: NomBytes,
) -> IResult<NomBytes, SaslAuthenticateResponse> {
    let (s, error_code) = be_i16(s)?;
    let (s, error_message) = parser::parse_nullable_string(s)?;
    let (s, auth_bytes) = parser::parse_bytes(s)?;
    let (s, session_lifetime_ms) = be_i64(s)?;

    Ok((
        s,
        SaslAuthenticateResponse {
            error_code,
            error_message,
            auth_bytes,
            session_lifetime_ms,
        },
    ))
}
