//! Errors for the gateway and the Kafka protocol codes it reacts to.
use std::fmt;

use bytes::Bytes;
use num_derive::FromPrimitive;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// A value could not be rendered into its wire representation.
    EncodingError,
    /// Bytes which could not be parsed into the expected frame.
    ParsingError(Bytes),
    /// The broker answered with a protocol error code.
    KafkaError(KafkaCode),
    DecodingUtf8Error,
    NoLeaderForTopicPartition(String, i32),
    /// The buffer pool has no free slot left.
    NoSlotAvailable,
    /// A peer sent beyond the window it was granted.
    FlowControlViolation {
        stream_id: u64,
        sequence: i64,
        acknowledge: i64,
        maximum: i32,
    },
    /// The application broke the frame sequence a stream expects.
    UnexpectedFrame(String),
    SaslAuthFailed(String),
    InvalidSaslMechanism,
    /// No stream factory is registered for the routed id.
    UnknownRoute(u64),
    IoError(String),
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::EncodingError => write!(f, "Could not encode value"),
            Error::ParsingError(bytes) => write!(f, "Could not parse {} bytes", bytes.len()),
            Error::KafkaError(code) => write!(f, "Kafka error code {:?}", code),
            Error::DecodingUtf8Error => write!(f, "Could not decode utf8 string"),
            Error::NoLeaderForTopicPartition(topic, partition) => {
                write!(f, "No leader for {}[{}]", topic, partition)
            }
            Error::NoSlotAvailable => write!(f, "No buffer slot available"),
            Error::FlowControlViolation {
                stream_id,
                sequence,
                acknowledge,
                maximum,
            } => write!(
                f,
                "Stream {:#018x} sent sequence {} beyond acknowledge {} + maximum {}",
                stream_id, sequence, acknowledge, maximum
            ),
            Error::UnexpectedFrame(message) => write!(f, "Unexpected frame: {}", message),
            Error::SaslAuthFailed(message) => write!(f, "SASL authentication failed: {}", message),
            Error::InvalidSaslMechanism => write!(f, "Unsupported SASL mechanism"),
            Error::UnknownRoute(routed_id) => write!(f, "No route for {:#018x}", routed_id),
            Error::IoError(message) => write!(f, "IO error: {}", message),
        }
    }
}

/// Various errors reported by a remote Kafka server.
/// See also [Kafka Errors](http://kafka.apache.org/protocol.html)
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive)]
#[repr(i16)]
pub enum KafkaCode {
    /// An unexpected server error
    Unknown = -1,
    None = 0,
    /// The requested offset is outside the range of offsets
    /// maintained by the server for the given topic/partition
    OffsetOutOfRange = 1,
    CorruptMessage = 2,
    /// This request is for a topic or partition that does not exist
    /// on this broker.
    UnknownTopicOrPartition = 3,
    InvalidMessageSize = 4,
    LeaderNotAvailable = 5,
    /// This error is thrown if the client attempts to send messages
    /// to a replica that is not the leader for some partition. It
    /// indicates that the clients metadata is out of date.
    NotLeaderForPartition = 6,
    RequestTimedOut = 7,
    BrokerNotAvailable = 8,
    ReplicaNotAvailable = 9,
    MessageSizeTooLarge = 10,
    StaleControllerEpoch = 11,
    OffsetMetadataTooLarge = 12,
    NetworkException = 13,
    GroupLoadInProgress = 14,
    /// The broker returns this error code for group coordinator
    /// requests, offset commits, and most group management requests
    /// if the offsets topic has not yet been created, or if the group
    /// coordinator is not active.
    CoordinatorNotAvailable = 15,
    /// The broker returns this error code if it receives an offset
    /// fetch or commit request for a group that it is not a
    /// coordinator for.
    NotCoordinator = 16,
    InvalidTopic = 17,
    RecordListTooLarge = 18,
    NotEnoughReplicas = 19,
    NotEnoughReplicasAfterAppend = 20,
    InvalidRequiredAcks = 21,
    IllegalGeneration = 22,
    InconsistentGroupProtocol = 23,
    InvalidGroupId = 24,
    /// The coordinator does not know this member id.
    UnknownMemberId = 25,
    InvalidSessionTimeout = 26,
    /// The group is rebalancing, so a rejoin is needed.
    RebalanceInProgress = 27,
    InvalidCommitOffsetSize = 28,
    TopicAuthorizationFailed = 29,
    GroupAuthorizationFailed = 30,
    ClusterAuthorizationFailed = 31,
    InvalidTimestamp = 32,
    UnsupportedSaslMechanism = 33,
    IllegalSaslState = 34,
    UnsupportedVersion = 35,
    SaslAuthenticationFailed = 58,
    /// The group member needs to have a valid member id before
    /// actually entering a consumer group.
    MemberIdRequired = 79,
}

impl KafkaCode {
    pub fn value(self) -> i16 {
        self as i16
    }
}

impl From<i16> for KafkaCode {
    fn from(code: i16) -> Self {
        num_traits::FromPrimitive::from_i16(code).unwrap_or(KafkaCode::Unknown)
    }
}
