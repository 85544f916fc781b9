//! Typed extensions carried by stream frames.
//!
//! The application side speaks in topics and partitions through
//! [`KafkaBeginEx`], [`DataEx`] and [`FlushEx`]. The network side only ever
//! carries a [`ProxyBeginEx`] naming the broker to connect to.

use bytes::Bytes;

use crate::{protocol::record::MessageHeader, stream::filter::Filter};

/// Symbolic offset for "the next record produced from now on".
pub const OFFSET_LIVE: i64 = -1;
/// Symbolic offset for "the earliest record still retained".
pub const OFFSET_HISTORICAL: i64 = -2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Isolation {
    #[default]
    ReadUncommitted,
    ReadCommitted,
}

impl Isolation {
    pub fn level(self) -> i8 {
        match self {
            Isolation::ReadUncommitted => 0,
            Isolation::ReadCommitted => 1,
        }
    }
}

/// Acknowledgement a produced record waits for, ordered so that the
/// strongest mode wins when records share one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum AckMode {
    None,
    #[default]
    LeaderOnly,
    InSyncReplicas,
}

impl AckMode {
    /// The `acks` value put on the wire.
    pub fn required_acks(self) -> i16 {
        match self {
            AckMode::None => 0,
            AckMode::LeaderOnly => 1,
            AckMode::InSyncReplicas => -1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Capabilities {
    ProduceOnly,
    #[default]
    FetchOnly,
    ProduceAndFetch,
}

impl Capabilities {
    pub fn fetch(self) -> bool {
        matches!(self, Capabilities::FetchOnly | Capabilities::ProduceAndFetch)
    }

    pub fn produce(self) -> bool {
        matches!(self, Capabilities::ProduceOnly | Capabilities::ProduceAndFetch)
    }
}

/// Position of one partition as the application sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionOffset {
    pub partition_id: i32,
    pub partition_offset: i64,
    pub stable_offset: i64,
    pub latest_offset: i64,
}

impl PartitionOffset {
    pub fn new(partition_id: i32, partition_offset: i64) -> Self {
        PartitionOffset {
            partition_id,
            partition_offset,
            stable_offset: -1,
            latest_offset: -1,
        }
    }
}

impl Default for PartitionOffset {
    fn default() -> Self {
        PartitionOffset::new(-1, OFFSET_LIVE)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BeginEx {
    Kafka(KafkaBeginEx),
    Proxy(ProxyBeginEx),
}

/// Address of the broker a network stream should reach.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyBeginEx {
    pub host: String,
    pub port: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum KafkaBeginEx {
    Merged(MergedBeginEx),
    Fetch(FetchBeginEx),
    Produce(ProduceBeginEx),
    Meta(MetaBeginEx),
    Describe(DescribeBeginEx),
    Group(GroupBeginEx),
}

impl KafkaBeginEx {
    /// Topic or group the stream is routed by.
    pub fn route_key(&self) -> &str {
        match self {
            KafkaBeginEx::Merged(merged) => &merged.topic,
            KafkaBeginEx::Fetch(fetch) => &fetch.topic,
            KafkaBeginEx::Produce(produce) => &produce.topic,
            KafkaBeginEx::Meta(meta) => &meta.topic,
            KafkaBeginEx::Describe(describe) => &describe.topic,
            KafkaBeginEx::Group(group) => &group.group_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MergedBeginEx {
    pub capabilities: Capabilities,
    pub topic: String,
    /// Requested starting offsets, partition `-1` applies to every
    /// partition not listed.
    pub partitions: Vec<PartitionOffset>,
    pub filters: Vec<Filter>,
    pub isolation: Isolation,
    pub ack_mode: AckMode,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct FetchBeginEx {
    pub topic: String,
    pub partition: PartitionOffset,
    pub filters: Vec<Filter>,
    pub isolation: Isolation,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProduceBeginEx {
    pub transaction: Option<String>,
    pub topic: String,
    pub partition: PartitionOffset,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MetaBeginEx {
    pub topic: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DescribeBeginEx {
    pub topic: String,
    pub configs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GroupBeginEx {
    pub group_id: String,
    pub protocol: String,
    /// Session timeout in milliseconds. On the reply Begin this is the
    /// timeout after clamping to what the broker allows.
    pub timeout: i32,
    /// Subscription metadata offered to the group leader.
    pub metadata: Bytes,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DataEx {
    Fetch(FetchDataEx),
    Produce(ProduceDataEx),
    Merged(MergedDataEx),
    Meta(MetaDataEx),
    Describe(DescribeDataEx),
    Group(GroupDataEx),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct FetchDataEx {
    /// Value bytes still to come after this frame.
    pub deferred: i32,
    pub timestamp: i64,
    /// Upper bound on the headers trailing a fragmented value.
    pub headers_size_max: i32,
    pub producer_id: i64,
    /// Bit per begin filter the record matched.
    pub filters: i64,
    pub partition: PartitionOffset,
    pub key: Option<Bytes>,
    pub headers: Vec<MessageHeader>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProduceDataEx {
    /// Value bytes still to come after this frame.
    pub deferred: i32,
    pub timestamp: i64,
    pub producer_id: i64,
    pub producer_epoch: i16,
    pub sequence: i32,
    /// CRC32-C of the complete value, required when the value spans
    /// several frames.
    pub crc32c: u32,
    pub ack_mode: AckMode,
    pub key: Option<Bytes>,
    pub headers: Vec<MessageHeader>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MergedDataEx {
    Fetch(MergedFetchDataEx),
    Produce(MergedProduceDataEx),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MergedFetchDataEx {
    pub deferred: i32,
    pub timestamp: i64,
    pub filters: i64,
    pub partition: PartitionOffset,
    /// Next offset per partition, as far as the application has seen.
    pub progress: Vec<PartitionOffset>,
    pub key: Option<Bytes>,
    pub headers: Vec<MessageHeader>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MergedProduceDataEx {
    pub deferred: i32,
    pub timestamp: i64,
    /// Partition `-1` lets the gateway choose from the key.
    pub partition: PartitionOffset,
    pub key: Option<Bytes>,
    /// Hashed instead of `key` when present.
    pub hash_key: Option<Bytes>,
    pub crc32c: u32,
    pub headers: Vec<MessageHeader>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionLeader {
    pub partition_id: i32,
    pub leader_id: i32,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MetaDataEx {
    pub partitions: Vec<PartitionLeader>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfigEntry {
    pub name: String,
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DescribeDataEx {
    pub configs: Vec<ConfigEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemberAssignment {
    pub member_id: String,
    pub assignment: Bytes,
}

/// Assignments the group leader hands out, one per member.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GroupDataEx {
    pub assignments: Vec<MemberAssignment>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FlushEx {
    Fetch(FetchFlushEx),
    Merged(MergedFlushEx),
    Group(GroupFlushEx),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionResult {
    Abort,
    Commit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transaction {
    pub result: TransactionResult,
    pub producer_id: i64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct FetchFlushEx {
    pub partition: PartitionOffset,
    pub transactions: Vec<Transaction>,
    pub filters: Vec<Filter>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MergedFlushEx {
    /// Next offset per partition once every partition reported.
    pub progress: Vec<PartitionOffset>,
    pub capabilities: Option<Capabilities>,
    pub filters: Vec<Filter>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupMember {
    pub id: String,
    pub metadata: Bytes,
}

/// Outcome of a join, or a rejoin request when sent by the application.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GroupFlushEx {
    pub leader_id: String,
    pub member_id: String,
    pub members: Vec<GroupMember>,
    /// New subscription metadata when the application asks to rejoin.
    pub metadata: Option<Bytes>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResetEx {
    /// Kafka error code the stream was reset with.
    pub error: i16,
}
