//! Produce messages to a broker.

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
            0, 0, 0, 3, 0, 0, 0, 7, 0, 4, 114, 117, 115, 116, 255, 255, 0, 1, 0, 0, 117, 48, 0, 0,
            0, 1, 0, 4, 116, 101, 115, 116, 0, 0, 0, 1, 0, 0, 0, 2, 0, 0, 0, 80,
        ];

        let req = request::ProduceRequestHead::new(7, "rust", 1, 30000, "test", 2, 80);

        let mut buffer = vec![];
        req.encode(&mut buffer).unwrap();

        assert_eq!(buffer, b);
    }

    #[test]
    fn parse() {
        let b = Bytes::from_static(&[
            0, 0, 0, 1, // topics
            0, 4, b't', b'e', b's', b't', // name
            0, 0, 0, 1, // partitions
            0, 0, 0, 2, // partition
            0, 0, // error
            0, 0, 0, 0, 0, 0, 0, 9, // base offset
            255, 255, 255, 255, 255, 255, 255, 255, // log append time
            0, 0, 0, 0, // throttle
        ]);

        let (head, mut progress) = try_wrap(response::parse_produce_response_head, &b, 0, b.len())
            .unwrap()
            .unwrap();
        assert_eq!(head.topic_count, 1);

        let (topic, sizeof) = try_wrap(response::parse_produce_topic, &b, progress, b.len())
            .unwrap()
            .unwrap();
        assert_eq!(topic.partition_count, 1);
        progress += sizeof;

        let (partition, sizeof) =
            try_wrap(response::parse_produce_partition, &b, progress, b.len())
                .unwrap()
                .unwrap();
        assert_eq!(partition.partition_index, 2);
        assert_eq!(partition.error_code, 0);
        assert_eq!(partition.base_offset, 9);
        progress += sizeof;

        assert_eq!(
            try_wrap(response::parse_produce_response_trailer, &b, progress, b.len() - 1)
                .unwrap(),
            None
        );
        let (trailer, sizeof) =
            try_wrap(response::parse_produce_response_trailer, &b, progress, b.len())
                .unwrap()
                .unwrap();
        assert_eq!(trailer.throttle_time_ms, 0);
        assert_eq!(progress + sizeof, b.len());
    }
}
