mod testsupport;

use bytes::{Buf, Bytes};
use kafka_gateway::{
    client::group::HIGHLANDER_PROTOCOL,
    config::GatewayConfig,
    stream::{
        ext::{GroupBeginEx, GroupDataEx, GroupFlushEx, GroupMember, KafkaBeginEx, MemberAssignment},
        BeginEx, DataEx, FlushEx, Frame, FLAGS_COMPLETE,
    },
};
use testsupport::{
    Gateway, DESCRIBE_CONFIGS, FIND_COORDINATOR, HEARTBEAT, JOIN_GROUP, LEAVE_GROUP, SYNC_GROUP,
};

const GROUP_ID: &str = "billing";
const RESOURCE_TYPE_BROKER: i8 = 4;

fn group_ex(timeout: i32) -> KafkaBeginEx {
    KafkaBeginEx::Group(GroupBeginEx {
        group_id: GROUP_ID.to_owned(),
        protocol: HIGHLANDER_PROTOCOL.to_owned(),
        timeout,
        metadata: Bytes::from_static(b"subscription"),
    })
}

/// Scripts the broker up to and including a successful join as
/// `member-1`, leading a group of one.
fn script_join(gateway: &Gateway) {
    gateway
        .broker
        .respond(FIND_COORDINATOR, testsupport::find_coordinator(0, 2, "broker-2", 9093));
    gateway.broker.respond(
        DESCRIBE_CONFIGS,
        testsupport::describe_configs(
            RESOURCE_TYPE_BROKER,
            "2",
            &[
                ("group.min.session.timeout.ms", "6000"),
                ("group.max.session.timeout.ms", "20000"),
            ],
        ),
    );
    gateway
        .broker
        .respond(JOIN_GROUP, testsupport::join_group(79, -1, "", "member-1", &[]));
    gateway.broker.respond(
        JOIN_GROUP,
        testsupport::join_group(0, 1, "member-1", "member-1", &["member-1"]),
    );
}

/// Whether the group told the application about a completed join.
fn joined(gateway: &Gateway, group: u64) -> bool {
    gateway
        .frames(group)
        .iter()
        .any(|frame| matches!(frame, Frame::Flush(flush) if flush.extension.is_some()))
}

fn session_timeout(request: &testsupport::Request) -> i32 {
    let mut body = request.body();
    let group_length = body.get_i16() as usize;
    body.advance(group_length);
    body.get_i32()
}

//
// Test joining through the coordinator
//
#[test]
fn group_joins_through_its_coordinator() {
    let mut gateway = Gateway::new(GatewayConfig::default());
    script_join(&gateway);

    let group = gateway.begin(0, group_ex(45_000));

    let connections = gateway.broker.connections();
    assert_eq!(connections.len(), 2);
    assert!(connections[0].ended);
    assert_eq!(connections[1].affinity, 2);
    let proxy = connections[1].proxy.clone().expect("coordinator address");
    assert_eq!((proxy.host.as_str(), proxy.port), ("broker-2", 9093));

    let describe = gateway.broker.requests(DESCRIBE_CONFIGS);
    assert_eq!(describe[0].resource(), (RESOURCE_TYPE_BROKER, "2".to_owned()));

    let joins = gateway.broker.requests(JOIN_GROUP);
    assert_eq!(joins.len(), 2);
    assert_eq!(joins[0].member_id(), "");
    assert_eq!(joins[1].member_id(), "member-1");
    // clamped to the broker maximum
    assert_eq!(session_timeout(&joins[1]), 20_000);
    assert!(joins.iter().all(|join| join.connection == 1));

    let frames = gateway.frames(group);
    let timeout = frames.iter().find_map(|frame| match frame {
        Frame::Begin(begin) => match &begin.extension {
            Some(BeginEx::Kafka(KafkaBeginEx::Group(ext))) => Some(ext.timeout),
            _ => None,
        },
        _ => None,
    });
    assert_eq!(timeout, Some(20_000));

    let flush = frames.iter().find_map(|frame| match frame {
        Frame::Flush(flush) => flush.extension.clone(),
        _ => None,
    });
    assert_eq!(
        flush,
        Some(FlushEx::Group(GroupFlushEx {
            leader_id: "member-1".to_owned(),
            member_id: "member-1".to_owned(),
            members: vec![GroupMember {
                id: "member-1".to_owned(),
                metadata: Bytes::new(),
            }],
            metadata: None,
        }))
    );
}

#[test]
fn coordinator_lookup_failure_resets_the_application() {
    let mut gateway = Gateway::new(GatewayConfig::default());
    gateway
        .broker
        .respond(FIND_COORDINATOR, testsupport::find_coordinator(30, -1, "", -1));

    let group = gateway.begin(0, group_ex(10_000));

    let reset = gateway.frames(group).into_iter().find_map(|frame| match frame {
        Frame::Reset(reset) => reset.extension,
        _ => None,
    });
    assert_eq!(reset.map(|reset| reset.error), Some(30));
    assert!(gateway.broker.requests(JOIN_GROUP).is_empty());
}

#[test]
fn coordinator_not_available_retries_lookup() {
    let mut gateway = Gateway::new(GatewayConfig::default());
    gateway
        .broker
        .respond(FIND_COORDINATOR, testsupport::find_coordinator(15, -1, "", -1));
    script_join(&gateway);

    let group = gateway.begin(0, group_ex(10_000));

    let finds = gateway.broker.requests(FIND_COORDINATOR);
    assert_eq!(finds.len(), 2);
    assert!(finds.iter().all(|find| find.connection == 0));
    assert_eq!(gateway.broker.requests(JOIN_GROUP).len(), 2);
    assert!(gateway
        .frames(group)
        .iter()
        .all(|frame| !matches!(frame, Frame::Reset(_))));
    assert!(joined(&gateway, group));
}

#[test]
fn join_on_moved_coordinator_restarts_from_lookup() {
    let mut gateway = Gateway::new(GatewayConfig::default());
    gateway
        .broker
        .respond(FIND_COORDINATOR, testsupport::find_coordinator(0, 3, "broker-3", 9094));
    gateway.broker.respond(
        DESCRIBE_CONFIGS,
        testsupport::describe_configs(RESOURCE_TYPE_BROKER, "3", &[]),
    );
    gateway
        .broker
        .respond(JOIN_GROUP, testsupport::join_group(16, -1, "", "", &[]));
    script_join(&gateway);

    let group = gateway.begin(0, group_ex(10_000));

    assert_eq!(gateway.broker.requests(FIND_COORDINATOR).len(), 2);
    assert_eq!(gateway.broker.requests(DESCRIBE_CONFIGS).len(), 2);
    let joins = gateway.broker.requests(JOIN_GROUP);
    assert_eq!(joins.len(), 3);
    assert_eq!(joins[0].connection, 1);
    assert_eq!(joins[2].connection, 3);

    let connections = gateway.broker.connections();
    assert_eq!(connections.len(), 4);
    assert!(connections[1].ended);
    assert_eq!(connections[1].affinity, 3);
    assert_eq!(connections[3].affinity, 2);
    assert!(!connections[3].ended);
    assert!(gateway
        .frames(group)
        .iter()
        .all(|frame| !matches!(frame, Frame::Reset(_))));
    assert!(joined(&gateway, group));
}

//
// Test the membership lifecycle
//
#[test]
fn leader_assignments_sync_heartbeat_and_leave() {
    let mut gateway = Gateway::new(GatewayConfig::default());
    script_join(&gateway);
    gateway
        .broker
        .respond(SYNC_GROUP, testsupport::sync_group(0, b"p0"));
    gateway
        .broker
        .respond(HEARTBEAT, testsupport::heartbeat(0));
    gateway
        .broker
        .respond(LEAVE_GROUP, testsupport::leave_group(0));

    let group = gateway.begin(0, group_ex(45_000));
    gateway.data(
        group,
        FLAGS_COMPLETE,
        Bytes::new(),
        Some(DataEx::Group(GroupDataEx {
            assignments: vec![MemberAssignment {
                member_id: "member-1".to_owned(),
                assignment: Bytes::from_static(b"p0"),
            }],
        })),
    );

    assert_eq!(gateway.broker.requests(SYNC_GROUP).len(), 1);
    let assignment = gateway.data_frames(group);
    assert_eq!(assignment.len(), 1);
    assert_eq!(assignment[0].payload, Bytes::from_static(b"p0"));

    // heartbeats every half session
    gateway.tick(9_999);
    assert!(gateway.broker.requests(HEARTBEAT).is_empty());
    gateway.tick(10_000);
    assert_eq!(gateway.broker.requests(HEARTBEAT).len(), 1);

    gateway.end(group);

    let leave = gateway.broker.requests(LEAVE_GROUP);
    assert_eq!(leave.len(), 1);
    assert_eq!(gateway.names(group).last(), Some(&"END"));
    assert!(gateway.broker.connections()[1].ended);
}

#[test]
fn sync_during_rebalance_rejoins() {
    let mut gateway = Gateway::new(GatewayConfig::default());
    script_join(&gateway);
    gateway
        .broker
        .respond(SYNC_GROUP, testsupport::sync_group(27, b""));
    gateway.broker.respond(
        JOIN_GROUP,
        testsupport::join_group(0, 2, "member-1", "member-1", &["member-1"]),
    );
    gateway
        .broker
        .respond(SYNC_GROUP, testsupport::sync_group(0, b"p0"));

    let group = gateway.begin(0, group_ex(10_000));
    let assign = |gateway: &mut Gateway| {
        gateway.data(
            group,
            FLAGS_COMPLETE,
            Bytes::new(),
            Some(DataEx::Group(GroupDataEx {
                assignments: vec![MemberAssignment {
                    member_id: "member-1".to_owned(),
                    assignment: Bytes::from_static(b"p0"),
                }],
            })),
        );
    };
    assign(&mut gateway);

    let joins = gateway.broker.requests(JOIN_GROUP);
    assert_eq!(joins.len(), 3);
    assert_eq!(joins[2].member_id(), "member-1");
    assert_eq!(gateway.broker.requests(SYNC_GROUP).len(), 1);
    assert!(gateway.data_frames(group).is_empty());
    let flushes = gateway
        .frames(group)
        .iter()
        .filter(|frame| matches!(frame, Frame::Flush(_)))
        .count();
    assert_eq!(flushes, 2);

    // the new generation syncs again
    assign(&mut gateway);
    assert_eq!(gateway.broker.requests(SYNC_GROUP).len(), 2);
    let assignment = gateway.data_frames(group);
    assert_eq!(assignment.len(), 1);
    assert_eq!(assignment[0].payload, Bytes::from_static(b"p0"));
    assert!(gateway
        .frames(group)
        .iter()
        .all(|frame| !matches!(frame, Frame::Reset(_))));
}

#[test]
fn heartbeat_on_moved_coordinator_restarts_from_lookup() {
    let mut gateway = Gateway::new(GatewayConfig::default());
    script_join(&gateway);
    gateway
        .broker
        .respond(SYNC_GROUP, testsupport::sync_group(0, b"p0"));
    gateway
        .broker
        .respond(HEARTBEAT, testsupport::heartbeat(16));
    gateway
        .broker
        .respond(FIND_COORDINATOR, testsupport::find_coordinator(0, 2, "broker-2", 9093));
    gateway.broker.respond(
        DESCRIBE_CONFIGS,
        testsupport::describe_configs(RESOURCE_TYPE_BROKER, "2", &[]),
    );
    gateway.broker.respond(
        JOIN_GROUP,
        testsupport::join_group(0, 2, "member-1", "member-1", &["member-1"]),
    );

    let group = gateway.begin(0, group_ex(45_000));
    gateway.data(
        group,
        FLAGS_COMPLETE,
        Bytes::new(),
        Some(DataEx::Group(GroupDataEx {
            assignments: vec![MemberAssignment {
                member_id: "member-1".to_owned(),
                assignment: Bytes::from_static(b"p0"),
            }],
        })),
    );
    assert_eq!(gateway.broker.requests(FIND_COORDINATOR).len(), 1);

    gateway.tick(10_000);

    let heartbeats = gateway.broker.requests(HEARTBEAT);
    assert_eq!(heartbeats.len(), 1);
    assert_eq!(heartbeats[0].connection, 1);
    assert_eq!(gateway.broker.requests(FIND_COORDINATOR).len(), 2);
    let joins = gateway.broker.requests(JOIN_GROUP);
    assert_eq!(joins.len(), 3);
    assert_eq!(joins[2].member_id(), "member-1");
    assert_eq!(joins[2].connection, 3);
    assert!(gateway.broker.connections()[1].ended);
    assert!(gateway
        .frames(group)
        .iter()
        .all(|frame| !matches!(frame, Frame::Reset(_))));
}

#[test]
fn leaving_before_the_coordinator_is_known_skips_leave_group() {
    let mut gateway = Gateway::new(GatewayConfig::default());

    let group = gateway.begin(0, group_ex(10_000));
    assert_eq!(gateway.broker.requests(FIND_COORDINATOR).len(), 1);

    gateway.end(group);

    assert!(gateway.broker.requests(LEAVE_GROUP).is_empty());
    assert!(gateway.broker.connections()[0].ended);
}

//
// Test takeover of a highlander group
//
#[test]
fn newer_stream_takes_the_group_over() {
    let mut gateway = Gateway::new(GatewayConfig::default());
    script_join(&gateway);
    let first = gateway.begin(0, group_ex(10_000));
    assert!(gateway
        .frames(first)
        .iter()
        .all(|frame| !matches!(frame, Frame::Reset(_))));

    gateway
        .broker
        .respond(FIND_COORDINATOR, testsupport::find_coordinator(0, 2, "broker-2", 9093));
    let second = gateway.begin(0, group_ex(10_000));

    assert!(gateway
        .frames(first)
        .iter()
        .any(|frame| matches!(frame, Frame::Reset(_))));
    assert_eq!(gateway.names(first).last(), Some(&"ABORT"));
    assert!(gateway
        .frames(second)
        .iter()
        .all(|frame| !matches!(frame, Frame::Reset(_))));
    assert_eq!(gateway.broker.requests(FIND_COORDINATOR).len(), 2);
}
