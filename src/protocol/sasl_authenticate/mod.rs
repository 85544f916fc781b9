//! Authenticate the connection with the mechanism agreed during the handshake.

pub mod request;
pub mod response;

#[cfg(test)]
mod test {
    use bytes::Bytes;

    use super::*;
    use crate::{encode::ToByte, parser::try_wrap};

    #[test]
    fn encode_plain() {
        let b = b"\0\x24\0\x01\0\0\0\x01\0\x04rust\0\0\0\x0c\0user\0secret";

        let req = request::SaslAuthenticateRequest::plain(1, "rust", "user", "secret");

        let mut buffer: Vec<u8> = vec![];
        req.encode(&mut buffer).unwrap();

        assert_eq!(buffer, b);
    }

    #[test]
    fn parse_failure() {
        let buffer = Bytes::from_static(b"\0\x3a\0\x03bad\0\0\0\0\0\0\0\0\0\0\0\0");

        let (response, sizeof) = try_wrap(
            response::parse_sasl_authenticate_response,
            &buffer,
            0,
            buffer.len(),
        )
        .unwrap()
        .unwrap();

        assert_eq!(sizeof, buffer.len());
        assert_eq!(response.error_code, 58);
        assert_eq!(response.error_message, Some(Bytes::from_static(b"bad")));
        assert!(response.auth_bytes.is_empty());
    }
}
