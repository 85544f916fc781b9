//! Parsing for SASL Handshake responses.
//!
//! The mechanism list is walked one string at a time with
//! [`parse_string`](crate::parser::parse_string) after the head.
//!
//! ### Protocol Defs
//! ```text
//! SaslHandshake Response (Version: 1) => error_code [mechanisms]
//!   error_code => INT16
//!   mechanisms => STRING
//! ```
//!
//! Note we are using version 1 for the response.

use nom::{
    number::streaming::{be_i16, be_i32},
    IResult,
};
use nombytes::NomBytes;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SaslHandshakeHead {
    /// The error code, or 0 if there was no error.
    pub error_code: i16,
    pub mechanism_count: i32,
}

pub fn parse_sasl_handshake_head(s: NomBytes) -> IResult<NomBytes, SaslHandshakeHead> {
    let (s, error_code) = be_i16(s)?;
    let (s, mechanism_count) = be_i32(s)?;
    Ok((
        s,
        SaslHandshakeHead {
            error_code,
            mechanism_count,
        },
    ))
}
