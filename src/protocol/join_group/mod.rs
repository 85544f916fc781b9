//! Become a member of a group, creating it if there are no active members.
//!
//! A member first joins with an empty member id; brokers that insist on
//! assigning one answer `MEMBER_ID_REQUIRED` with the id to use on the
//! retry. The leader of a generation receives every member's metadata,
//! followers receive an empty member list.

pub mod request;
pub mod response;

#[cfg(test)]
mod test {
    use bytes::{BufMut, Bytes, BytesMut};

    use super::*;
    use crate::{client::try_wrap_response, encode::ToByte, error::KafkaCode, protocol};

    fn framed(body: &[u8]) -> Bytes {
        let mut buffer = BytesMut::new();
        buffer.put_i32(body.len() as i32);
        buffer.put_slice(body);
        buffer.freeze()
    }

    #[test]
    fn encode() {
        let b = b"\0\x0b\0\x05\0\0\0\x01\0\x04rust\0\x06orders\0\0\x75\x30\0\0\x0f\xa0\0\0\0\x07relay-1\0\x08consumer\0\0\0\x01\0\x0ahighlander\0\0\0\0";

        let req = request::JoinGroupRequest::new(
            1,
            "rust",
            "orders",
            30000,
            4000,
            "",
            Some("relay-1"),
            "consumer",
            vec![request::Protocol::new("highlander", Bytes::new())],
        );

        let mut buffer: Vec<u8> = vec![];

        req.encode(&mut buffer).unwrap();

        assert_eq!(buffer, b);
    }

    #[test]
    fn parse() {
        let b = b"\0\0\0\x01\0\0\0\0\0\0\0\0\0\x03\0\x0ahighlander\0\x03m-1\0\x03m-1\0\0\0\x02\0\x03m-1\0\x07relay-1\0\0\0\x02\0\x01\0\x03m-2\xff\xff\0\0\0\0";

        let res = response::JoinGroupResponse {
            header: protocol::HeaderResponse { correlation_id: 1 },
            throttle_time_ms: 0,
            error_code: KafkaCode::None,
            generation_id: 3,
            protocol_name: Bytes::from_static(b"highlander"),
            leader: Bytes::from_static(b"m-1"),
            member_id: Bytes::from_static(b"m-1"),
            members: vec![
                response::Member {
                    member_id: Bytes::from_static(b"m-1"),
                    group_instance_id: Some(Bytes::from_static(b"relay-1")),
                    metadata: Bytes::from_static(b"\0\x01"),
                },
                response::Member {
                    member_id: Bytes::from_static(b"m-2"),
                    group_instance_id: None,
                    metadata: Bytes::new(),
                },
            ],
        };

        let buffer = framed(b);
        let partial = try_wrap_response(
            response::parse_join_group_response,
            &buffer,
            0,
            buffer.len() - 1,
        )
        .unwrap();
        assert!(partial.is_none());

        let (x, progress) =
            try_wrap_response(response::parse_join_group_response, &buffer, 0, buffer.len())
                .unwrap()
                .unwrap();
        assert_eq!(progress, buffer.len());
        assert_eq!(res, x);
    }

    #[test]
    fn parse_member_id_required() {
        let b = b"\0\0\0\x02\0\0\0\0\0\x4f\xff\xff\xff\xff\0\0\0\0\0\x03m-9\0\0\0\0";

        let buffer = framed(b);
        let (x, _) =
            try_wrap_response(response::parse_join_group_response, &buffer, 0, buffer.len())
                .unwrap()
                .unwrap();

        assert_eq!(x.error_code, KafkaCode::MemberIdRequired);
        assert_eq!(x.member_id, Bytes::from_static(b"m-9"));
        assert!(x.members.is_empty());
    }
}
