//! Get information about the available offsets for a given topic partition.

pub mod request;
pub mod response;

#[cfg(test)]
mod test {
    use bytes::Bytes;

    use super::*;
    use crate::{encode::ToByte, parser::try_wrap};

    #[test]
    fn encode() {
        let b = [
            0, 2, 0, 2, 0, 0, 0, 1, 0, 4, 114, 117, 115, 116, 255, 255, 255, 255, 0, 0, 0, 0, 1,
            0, 9, 112, 117, 114, 99, 104, 97, 115, 101, 115, 0, 0, 0, 1, 0, 0, 0, 1, 255, 255,
            255, 255, 255, 255, 255, 254,
        ];
        let correlation_id = 1;
        let client_id = "rust";
        let topic_name = "purchases";
        let partition_index = 1;

        let mut req = request::ListOffsetsRequest::new(correlation_id, client_id, 0);

        req.add(topic_name, partition_index, -2);

        let mut buffer: Vec<u8> = vec![];

        req.encode(&mut buffer).unwrap();

        assert_eq!(buffer, b);
    }

    #[test]
    fn parse() {
        let b = Bytes::from_static(b"\0\0\0\0\0\0\0\x01\0\tpurchases\0\0\0\x01\0\0\0\x01\0\0\xff\xff\xff\xff\xff\xff\xff\xff\0\0\0\0\0\0\0\x2a");

        let (head, progress) =
            try_wrap(response::parse_list_offsets_response_head, &b, 0, b.len())
                .unwrap()
                .unwrap();
        assert_eq!(head.topic_count, 1);

        let (topic, sizeof) =
            try_wrap(response::parse_list_offsets_topic, &b, progress, b.len())
                .unwrap()
                .unwrap();
        assert_eq!(topic.name, Bytes::from_static(b"purchases"));
        assert_eq!(topic.partition_count, 1);

        let (partition, _) = try_wrap(
            response::parse_list_offsets_partition,
            &b,
            progress + sizeof,
            b.len(),
        )
        .unwrap()
        .unwrap();

        assert_eq!(
            partition,
            response::ListOffsetsPartition {
                partition_index: 1,
                error_code: 0,
                timestamp: -1,
                offset: 42,
            }
        );
    }
}
