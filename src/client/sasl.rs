//! SASL handshake and authenticate, run ahead of the first request on a
//! connection when the binding carries credentials.
use bytes::Bytes;
use tracing::instrument;

use crate::{
    binding::SaslConfig,
    error::{Error, KafkaCode, Result},
    parser::{self, try_wrap},
    protocol::{
        encode_request, parse_response_header,
        sasl_authenticate::response::parse_sasl_authenticate_response,
        sasl_handshake::response::parse_sasl_handshake_head, SaslAuthenticateRequest,
        SaslHandshakeRequest,
    },
};

pub const MECHANISM_PLAIN: &str = "PLAIN";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SaslDecoder {
    HandshakeResponse,
    Handshake { response_bytes: i32 },
    Mechanisms { remaining: i32, error_code: i16 },
    AuthenticateResponse,
    Authenticate { response_bytes: i32 },
}

/// Outcome of a complete SASL response.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SaslEvent {
    Handshake(KafkaCode),
    Authenticate(KafkaCode),
}

/// Decodes one step of a SASL response, returning the new progress and the
/// event once a whole response has been read.
pub fn decode(
    decoder: &mut SaslDecoder,
    buffer: &Bytes,
    progress: usize,
    limit: usize,
) -> Result<(usize, Option<SaslEvent>)> {
    match *decoder {
        SaslDecoder::HandshakeResponse => {
            match try_wrap(parse_response_header, buffer, progress, limit)? {
                Some((header, sizeof)) => {
                    *decoder = SaslDecoder::Handshake {
                        response_bytes: header.body_length(),
                    };
                    Ok((progress + sizeof, None))
                }
                None => Ok((progress, None)),
            }
        }
        SaslDecoder::Handshake { .. } => {
            match try_wrap(parse_sasl_handshake_head, buffer, progress, limit)? {
                Some((head, sizeof)) => {
                    tracing::debug!(
                        "SASL handshake error {}, {} mechanisms",
                        head.error_code,
                        head.mechanism_count
                    );
                    *decoder = SaslDecoder::Mechanisms {
                        remaining: head.mechanism_count.max(0),
                        error_code: head.error_code,
                    };
                    Ok((progress + sizeof, None))
                }
                None => Ok((progress, None)),
            }
        }
        SaslDecoder::Mechanisms {
            remaining,
            error_code,
        } => {
            if remaining == 0 {
                *decoder = SaslDecoder::AuthenticateResponse;
                return Ok((progress, Some(SaslEvent::Handshake(error_code.into()))));
            }

            match try_wrap(parser::parse_string, buffer, progress, limit)? {
                Some((mechanism, sizeof)) => {
                    tracing::trace!("SASL mechanism {:?}", mechanism);
                    *decoder = SaslDecoder::Mechanisms {
                        remaining: remaining - 1,
                        error_code,
                    };
                    Ok((progress + sizeof, None))
                }
                None => Ok((progress, None)),
            }
        }
        SaslDecoder::AuthenticateResponse => {
            match try_wrap(parse_response_header, buffer, progress, limit)? {
                Some((header, sizeof)) => {
                    *decoder = SaslDecoder::Authenticate {
                        response_bytes: header.body_length(),
                    };
                    Ok((progress + sizeof, None))
                }
                None => Ok((progress, None)),
            }
        }
        SaslDecoder::Authenticate { response_bytes } => {
            let limit = limit.min(progress + response_bytes.max(0) as usize);
            match try_wrap(parse_sasl_authenticate_response, buffer, progress, limit)? {
                Some((response, sizeof)) => {
                    let error: KafkaCode = response.error_code.into();
                    if error != KafkaCode::None {
                        let message = response
                            .error_message
                            .map(|message| String::from_utf8_lossy(&message).into_owned())
                            .unwrap_or_default();
                        tracing::error!("{}", Error::SaslAuthFailed(message));
                    }
                    *decoder = SaslDecoder::HandshakeResponse;
                    Ok((progress + sizeof, Some(SaslEvent::Authenticate(error))))
                }
                None => Ok((progress, None)),
            }
        }
    }
}

#[instrument(name = "sasl-handshake", level = "debug", skip(sasl))]
pub fn encode_handshake(correlation_id: i32, client_id: &str, sasl: &SaslConfig) -> Result<Bytes> {
    let request = SaslHandshakeRequest::new(correlation_id, client_id, &sasl.mechanism);
    encode_request(&request)
}

#[instrument(name = "sasl-authenticate", level = "debug", skip(sasl))]
pub fn encode_authenticate(
    correlation_id: i32,
    client_id: &str,
    sasl: &SaslConfig,
) -> Result<Bytes> {
    if !sasl.mechanism.eq_ignore_ascii_case(MECHANISM_PLAIN) {
        return Err(Error::InvalidSaslMechanism);
    }
    let request =
        SaslAuthenticateRequest::plain(correlation_id, client_id, &sasl.username, &sasl.password);
    encode_request(&request)
}
