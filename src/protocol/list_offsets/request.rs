//! Encoding and creation for List Offsets requests.
//!
//! Used to resolve the symbolic offsets. Specify -1 to receive the latest
//! offset (i.e. the offset of the next coming message) and -2 to receive the
//! earliest available offset.
//!
//! ### Example
//! ```rust
//! use kafka_gateway::protocol::ListOffsetsRequest;
//!
//! let mut req = ListOffsetsRequest::new(1, "relay", 0);
//! req.add("purchases", 0, -2);
//! ```
//!
//! ### Protocol Def
//! ```text
//! ListOffsets Request (Version: 2) => replica_id isolation_level [topics]
//!   replica_id => INT32
//!   isolation_level => INT8
//!   topics => name [partitions]
//!     name => STRING
//!     partitions => partition_index timestamp
//!       partition_index => INT32
//!       timestamp => INT64
//! ```
//!
//! Note we are using version 2 of the request.

use crate::{encode::ToByte, protocol::HeaderRequest};

const API_KEY_LIST_OFFSETS: i16 = 2;
const API_VERSION: i16 = 2;

/// The base List Offsets request object.
#[derive(Debug)]
pub struct ListOffsetsRequest<'a> {
    pub header: HeaderRequest<'a>,
    /// The broker ID of the requester, or -1 if this request is being made by a normal consumer.
    pub replica_id: i32,
    pub isolation_level: i8,
    /// Each topic in the request.
    pub topics: Vec<Topic<'a>>,
}

/// Each topic in the request.
#[derive(Debug)]
pub struct Topic<'a> {
    /// The topic name.
    pub name: &'a str,
    /// Each partition in the request.
    pub partitions: Vec<Partition>,
}

/// Each partition in the request.
#[derive(Debug)]
pub struct Partition {
    /// The partition index.
    pub partition_index: i32,
    /// The target timestamp, or one of the symbolic offsets.
    pub timestamp: i64,
}

impl<'a> ListOffsetsRequest<'a> {
    pub fn new(correlation_id: i32, client_id: &'a str, isolation_level: i8) -> Self {
        let header =
            HeaderRequest::new(API_KEY_LIST_OFFSETS, API_VERSION, correlation_id, client_id);
        Self {
            header,
            replica_id: -1,
            isolation_level,
            topics: vec![],
        }
    }

    pub fn add(&mut self, topic_name: &'a str, partition_index: i32, timestamp: i64) {
        let partition = Partition {
            partition_index,
            timestamp,
        };
        match self
            .topics
            .iter_mut()
            .find(|topic| topic.name == topic_name)
        {
            None => self.topics.push(Topic {
                name: topic_name,
                partitions: vec![partition],
            }),
            Some(topic) => {
                if !topic
                    .partitions
                    .iter()
                    .any(|existing| existing.partition_index == partition_index)
                {
                    topic.partitions.push(partition)
                }
            }
        }
    }
}

impl<'a> ToByte for ListOffsetsRequest<'a> {
    fn encode<T: bytes::BufMut>(&self, buffer: &mut T) -> crate::error::Result<()> {
        tracing::trace!("Encoding ListOffsetRequest {:?}", self);
        self.header.encode(buffer)?;
        self.replica_id.encode(buffer)?;
        self.isolation_level.encode(buffer)?;
        self.topics.encode(buffer)?;
        Ok(())
    }
}

impl<'a> ToByte for Topic<'a> {
    fn encode<T: bytes::BufMut>(&self, buffer: &mut T) -> crate::error::Result<()> {
        self.name.encode(buffer)?;
        self.partitions.encode(buffer)?;
        Ok(())
    }
}

impl ToByte for Partition {
    fn encode<T: bytes::BufMut>(&self, buffer: &mut T) -> crate::error::Result<()> {
        self.partition_index.encode(buffer)?;
        self.timestamp.encode(buffer)?;
        Ok(())
    }
}
