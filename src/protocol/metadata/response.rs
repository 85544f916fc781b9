//! Parsing for Metadata responses.
//!
//! The response contains metadata for each partition, with
//! partitions grouped together by topic. This metadata
//! refers to brokers by their broker id. The brokers each
//! have a host and port.
//!
//! The meta client walks the response one piece at a time, so each
//! fixed section below has its own view: the head up to the broker
//! count, every broker, the cluster section up to the topic count,
//! each topic head and each partition.
//!
//! ### Protocol Def
//! ```text
//! Metadata Response (Version: 5) => throttle_time_ms [brokers] cluster_id controller_id [topics]
//!   throttle_time_ms => INT32
//!   brokers => node_id host port rack
//!     node_id => INT32
//!     host => STRING
//!     port => INT32
//!     rack => NULLABLE_STRING
//!   cluster_id => NULLABLE_STRING
//!   controller_id => INT32
//!   topics => error_code name is_internal [partitions]
//!     error_code => INT16
//!     name => STRING
//!     is_internal => BOOLEAN
//!     partitions => error_code partition_index leader_id [replica_nodes] [isr_nodes] [offline_replicas]
//!       error_code => INT16
//!       partition_index => INT32
//!       leader_id => INT32
//!       replica_nodes => INT32
//!       isr_nodes => INT32
//!       offline_replicas => INT32
//! ```

use bytes::Bytes;
use nom::{
    number::streaming::{be_i16, be_i32, be_u8},
    IResult,
};
use nombytes::NomBytes;

use crate::parser::{parse_array, parse_nullable_string, parse_string};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetadataResponseHead {
    pub throttle_time_ms: i32,
    pub broker_count: i32,
}

pub fn parse_metadata_response_head(s: NomBytes) -> IResult<NomBytes, MetadataResponseHead> {
    let (s, throttle_time_ms) = be_i32(s)?;
    let (s, broker_count) = be_i32(s)?;
    Ok((
        s,
        MetadataResponseHead {
            throttle_time_ms,
            broker_count,
        },
    ))
}

/// Each broker in the response.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerMetadata {
    /// The broker ID.
    pub node_id: i32,
    /// The broker hostname.
    pub host: Bytes,
    /// The broker port.
    pub port: i32,
    pub rack: Option<Bytes>,
}

pub fn parse_broker_metadata(s: NomBytes) -> IResult<NomBytes, BrokerMetadata> {
    let (s, node_id) = be_i32(s)?;
    let (s, host) = parse_string(s)?;
    let (s, port) = be_i32(s)?;
    let (s, rack) = parse_nullable_string(s)?;

    Ok((
        s,
        BrokerMetadata {
            node_id,
            host,
            port,
            rack,
        },
    ))
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClusterMetadata {
    pub cluster_id: Option<Bytes>,
    pub controller_id: i32,
    pub topic_count: i32,
}

pub fn parse_cluster_metadata(s: NomBytes) -> IResult<NomBytes, ClusterMetadata> {
    let (s, cluster_id) = parse_nullable_string(s)?;
    let (s, controller_id) = be_i32(s)?;
    let (s, topic_count) = be_i32(s)?;
    Ok((
        s,
        ClusterMetadata {
            cluster_id,
            controller_id,
            topic_count,
        },
    ))
}

#[derive(Debug, Clone, PartialEq)]
pub struct TopicMetadataHead {
    /// The topic error, or 0 if there was no error.
    pub error_code: i16,
    pub name: Bytes,
    pub is_internal: bool,
    pub partition_count: i32,
}

pub fn parse_topic_metadata_head(s: NomBytes) -> IResult<NomBytes, TopicMetadataHead> {
    let (s, error_code) = be_i16(s)?;
    let (s, name) = parse_string(s)?;
    let (s, is_internal) = be_u8(s)?;
    let (s, partition_count) = be_i32(s)?;
    Ok((
        s,
        TopicMetadataHead {
            error_code,
            name,
            is_internal: is_internal != 0,
            partition_count,
        },
    ))
}

/// Each partition in the topic.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionMetadata {
    /// The partition error, or 0 if there was no error.
    pub error_code: i16,
    pub partition_index: i32,
    /// The ID of the leader broker.
    pub leader_id: i32,
    /// The set of all nodes that host this partition.
    pub replica_nodes: Vec<i32>,
    /// The set of nodes that are in sync with the leader for this partition.
    pub isr_nodes: Vec<i32>,
    pub offline_replicas: Vec<i32>,
}

pub fn parse_partition_metadata(s: NomBytes) -> IResult<NomBytes, PartitionMetadata> {
    let (s, error_code) = be_i16(s)?;
    let (s, partition_index) = be_i32(s)?;
    let (s, leader_id) = be_i32(s)?;
    let (s, replica_nodes) = parse_array(be_i32)(s)?;
    let (s, isr_nodes) = parse_array(be_i32)(s)?;
    let (s, offline_replicas) = parse_array(be_i32)(s)?;

    Ok((
        s,
        PartitionMetadata {
            error_code,
            partition_index,
            leader_id,
            replica_nodes,
            isr_nodes,
            offline_replicas,
        },
    ))
}
