mod testsupport;

use bytes::Bytes;
use kafka_gateway::{
    config::GatewayConfig,
    stream::{
        ext::{DataEx, FetchBeginEx, KafkaBeginEx, MetaBeginEx, PartitionOffset, ResetEx, OFFSET_HISTORICAL},
        BeginEx, Data, Frame,
    },
};
use testsupport::{Gateway, TestRecord, FETCH, LIST_OFFSETS, METADATA, TOPIC};

const LEADER: i64 = 1;
const BROKERS: &[(i32, &str, i32)] = &[(1, "broker-1", 9092), (2, "broker-2", 9092)];

/// Learns the leaders of the topic so fetch streams are accepted.
fn follow_topic(gateway: &mut Gateway, partitions: &[(i32, i32)]) -> u64 {
    gateway
        .broker
        .respond(METADATA, testsupport::metadata(BROKERS, TOPIC, partitions));
    gateway.begin(
        0,
        KafkaBeginEx::Meta(MetaBeginEx {
            topic: TOPIC.to_owned(),
        }),
    )
}

fn fetch_ex(partition_id: i32, offset: i64) -> KafkaBeginEx {
    KafkaBeginEx::Fetch(FetchBeginEx {
        topic: TOPIC.to_owned(),
        partition: PartitionOffset::new(partition_id, offset),
        ..Default::default()
    })
}

fn fetched_offsets(records: &[Data]) -> Vec<i64> {
    records
        .iter()
        .filter_map(|data| match &data.extension {
            Some(DataEx::Fetch(ext)) => Some(ext.partition.partition_offset),
            _ => None,
        })
        .collect()
}

fn three_records() -> Bytes {
    testsupport::record_batch(
        100,
        &[
            TestRecord::new(b"key-100", b"value-100"),
            TestRecord::new(b"key-101", b"value-101"),
            TestRecord::new(b"key-102", b"value-102"),
        ],
    )
}

//
// Test fetching from an explicit offset
//
#[test]
fn fetch_delivers_records_and_advances() {
    let mut gateway = Gateway::new(GatewayConfig::default());
    follow_topic(&mut gateway, &[(0, 1)]);
    gateway
        .broker
        .respond(FETCH, testsupport::fetch(TOPIC, 0, 0, 103, &three_records()));

    let fetch = gateway.begin(LEADER, fetch_ex(0, 100));

    let connection = &gateway.broker.connections()[1];
    let proxy = connection.proxy.as_ref().expect("proxy to the leader");
    assert_eq!(proxy.host, "broker-1");
    assert_eq!(connection.affinity, LEADER);

    let frames = gateway.frames(fetch);
    let begin = frames.iter().find_map(|frame| match frame {
        Frame::Begin(begin) => Some(begin.clone()),
        _ => None,
    });
    match begin.and_then(|begin| begin.extension) {
        Some(BeginEx::Kafka(KafkaBeginEx::Fetch(ext))) => {
            assert_eq!(ext.partition.partition_offset, 100);
            assert_eq!(ext.partition.latest_offset, 102);
        }
        other => panic!("unexpected reply begin {:?}", other),
    }

    let records = gateway.data_frames(fetch);
    assert_eq!(fetched_offsets(&records), vec![100, 101, 102]);
    assert_eq!(records[1].payload, Bytes::from_static(b"value-101"));
    assert!(records.iter().all(|data| data.is_init() && data.is_fin()));
    match &records[0].extension {
        Some(DataEx::Fetch(ext)) => {
            assert_eq!(ext.key.as_deref(), Some(&b"key-100"[..]));
            assert_eq!(ext.timestamp, 1_700_000_000_000);
        }
        other => panic!("unexpected extension {:?}", other),
    }

    let requests = gateway.broker.requests(FETCH);
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].partition_offset(), (0, 100));
    assert_eq!(requests[1].partition_offset(), (0, 103));
    // only the first request is sent before the application opened its window
    assert_eq!(requests[0].max_wait(), 0);
    assert_eq!(requests[1].max_wait(), GatewayConfig::default().fetch_max_wait_millis);
}

#[test]
fn records_before_the_offset_are_skipped() {
    let mut gateway = Gateway::new(GatewayConfig::default());
    follow_topic(&mut gateway, &[(0, 1)]);
    gateway
        .broker
        .respond(FETCH, testsupport::fetch(TOPIC, 0, 0, 103, &three_records()));

    let fetch = gateway.begin(LEADER, fetch_ex(0, 101));

    assert_eq!(fetched_offsets(&gateway.data_frames(fetch)), vec![101, 102]);
}

//
// Test decoding responses split at every size
//
#[test]
fn split_responses_decode_the_same() {
    let expected = {
        let mut gateway = Gateway::new(GatewayConfig::default());
        follow_topic(&mut gateway, &[(0, 1)]);
        gateway
            .broker
            .respond(FETCH, testsupport::fetch(TOPIC, 0, 0, 103, &three_records()));
        let fetch = gateway.begin(LEADER, fetch_ex(0, 100));
        gateway.data_frames(fetch)
    };
    assert_eq!(expected.len(), 3);

    for chunk in [1, 2, 7, 13, 61] {
        let mut gateway = Gateway::new(GatewayConfig::default());
        gateway.broker.chunk(chunk);
        follow_topic(&mut gateway, &[(0, 1)]);
        gateway
            .broker
            .respond(FETCH, testsupport::fetch(TOPIC, 0, 0, 103, &three_records()));
        let fetch = gateway.begin(LEADER, fetch_ex(0, 100));

        let records = gateway.data_frames(fetch);
        let payloads: Vec<_> = records.iter().map(|data| data.payload.clone()).collect();
        let expected_payloads: Vec<_> = expected.iter().map(|data| data.payload.clone()).collect();
        assert_eq!(payloads, expected_payloads, "chunk size {}", chunk);
        assert_eq!(fetched_offsets(&records), vec![100, 101, 102], "chunk size {}", chunk);
        assert_eq!(
            gateway.broker.requests(FETCH).last().map(|request| request.partition_offset()),
            Some((0, 103)),
            "chunk size {}",
            chunk
        );
    }
}

//
// Test values larger than a buffer slot
//
#[test]
fn large_value_arrives_in_fragments() {
    let config = GatewayConfig::builder().slot_capacity(1024).build();
    let mut gateway = Gateway::new(config);
    follow_topic(&mut gateway, &[(0, 1)]);

    let value: Vec<u8> = (0..3000).map(|i| (i % 251) as u8).collect();
    let batch = testsupport::record_batch(7, &[TestRecord::new(b"big", &value)]);
    gateway
        .broker
        .respond(FETCH, testsupport::fetch(TOPIC, 0, 0, 8, &batch));

    let fetch = gateway.begin(LEADER, fetch_ex(0, 7));

    let fragments = gateway.data_frames(fetch);
    assert!(fragments.len() > 2);

    let first = &fragments[0];
    assert!(first.is_init() && !first.is_fin());
    match &first.extension {
        Some(DataEx::Fetch(ext)) => {
            assert_eq!(ext.partition.partition_offset, 7);
            assert_eq!(ext.deferred as usize, value.len() - first.payload.len());
        }
        other => panic!("unexpected extension {:?}", other),
    }
    assert!(fragments[1..fragments.len() - 1]
        .iter()
        .all(|data| !data.is_init() && !data.is_fin()));
    assert!(fragments.last().map_or(false, Data::is_fin));
    assert!(fragments.iter().all(|data| data.payload.len() <= 1024));

    let joined: Vec<u8> = fragments
        .iter()
        .flat_map(|data| data.payload.iter().copied())
        .collect();
    assert_eq!(joined, value);
    assert_eq!(
        gateway.broker.requests(FETCH).last().map(|request| request.partition_offset()),
        Some((0, 8))
    );
}

//
// Test symbolic offsets
//
#[test]
fn historical_offset_is_resolved_first() {
    let mut gateway = Gateway::new(GatewayConfig::default());
    follow_topic(&mut gateway, &[(0, 1)]);
    gateway
        .broker
        .respond(LIST_OFFSETS, testsupport::list_offsets(TOPIC, 0, 100));
    gateway
        .broker
        .respond(FETCH, testsupport::fetch(TOPIC, 0, 0, 103, &three_records()));

    let fetch = gateway.begin(LEADER, fetch_ex(0, OFFSET_HISTORICAL));

    let list_offsets = gateway.broker.requests(LIST_OFFSETS);
    assert_eq!(list_offsets.len(), 1);
    assert_eq!(list_offsets[0].partition_offset(), (0, OFFSET_HISTORICAL));
    assert_eq!(gateway.broker.requests(FETCH)[0].partition_offset(), (0, 100));
    assert_eq!(fetched_offsets(&gateway.data_frames(fetch)), vec![100, 101, 102]);
}

#[test]
fn offset_out_of_range_restarts_from_earliest() {
    let mut gateway = Gateway::new(GatewayConfig::default());
    follow_topic(&mut gateway, &[(0, 1)]);
    gateway
        .broker
        .respond(FETCH, testsupport::fetch(TOPIC, 0, 1, 103, &[]));
    gateway
        .broker
        .respond(LIST_OFFSETS, testsupport::list_offsets(TOPIC, 0, 100));
    gateway
        .broker
        .respond(FETCH, testsupport::fetch(TOPIC, 0, 0, 103, &three_records()));

    let fetch = gateway.begin(LEADER, fetch_ex(0, 5));

    assert_eq!(
        gateway.broker.requests(LIST_OFFSETS)[0].partition_offset(),
        (0, OFFSET_HISTORICAL)
    );
    assert_eq!(fetched_offsets(&gateway.data_frames(fetch)), vec![100, 101, 102]);
}

//
// Test leadership
//
#[test]
fn fetch_from_follower_is_rejected() {
    let mut gateway = Gateway::new(GatewayConfig::default());
    follow_topic(&mut gateway, &[(0, 1)]);

    let fetch = gateway.begin(2, fetch_ex(0, 0));

    let reset = gateway.frames(fetch).into_iter().find_map(|frame| match frame {
        Frame::Reset(reset) => reset.extension,
        _ => None,
    });
    assert_eq!(reset, Some(ResetEx { error: 6 }));
    assert!(gateway.broker.requests(FETCH).is_empty());
}

#[test]
fn not_leader_refreshes_metadata() {
    let mut gateway = Gateway::new(GatewayConfig::default());
    follow_topic(&mut gateway, &[(0, 1)]);
    gateway
        .broker
        .respond(FETCH, testsupport::fetch(TOPIC, 0, 6, -1, &[]));
    gateway
        .broker
        .respond(METADATA, testsupport::metadata(BROKERS, TOPIC, &[(0, 2)]));

    let fetch = gateway.begin(LEADER, fetch_ex(0, 100));

    let reset = gateway.frames(fetch).into_iter().find_map(|frame| match frame {
        Frame::Reset(reset) => reset.extension,
        _ => None,
    });
    assert_eq!(reset, Some(ResetEx { error: 6 }));
    assert_eq!(gateway.broker.requests(METADATA).len(), 2);

    // the new leader serves the partition
    gateway
        .broker
        .respond(FETCH, testsupport::fetch(TOPIC, 0, 0, 103, &three_records()));
    let fetch = gateway.begin(2, fetch_ex(0, 100));
    let connection = gateway.broker.connections().pop().expect("connection");
    assert_eq!(connection.proxy.map(|proxy| proxy.host), Some("broker-2".to_owned()));
    assert_eq!(fetched_offsets(&gateway.data_frames(fetch)), vec![100, 101, 102]);
}

#[test]
fn end_closes_the_connection() {
    let mut gateway = Gateway::new(GatewayConfig::default());
    follow_topic(&mut gateway, &[(0, 1)]);
    gateway
        .broker
        .respond(FETCH, testsupport::fetch(TOPIC, 0, 0, 103, &three_records()));
    let fetch = gateway.begin(LEADER, fetch_ex(0, 100));

    gateway.end(fetch);

    assert!(gateway.broker.connections()[1].ended);
    assert_eq!(gateway.names(fetch).last(), Some(&"END"));
}
