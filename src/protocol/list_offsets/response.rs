//! Parsing for List Offsets responses.
//!
//! ### Protocol Def
//! ```text
//! ListOffsets Response (Version: 2) => throttle_time_ms [topics]
//!   throttle_time_ms => INT32
//!   topics => name [partitions]
//!     name => STRING
//!     partitions => partition_index error_code timestamp offset
//!       partition_index => INT32
//!       error_code => INT16
//!       timestamp => INT64
//!       offset => INT64
//! ```

use bytes::Bytes;
use nom::{
    number::streaming::{be_i16, be_i32, be_i64},
    IResult,
};
use nombytes::NomBytes;

use crate::parser;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ListOffsetsResponseHead {
    pub throttle_time_ms: i32,
    pub topic_count: i32,
}

pub fn parse_list_offsets_response_head(
    s: NomBytes,
) -> IResult<NomBytes, ListOffsetsResponseHead> {
    let (s, throttle_time_ms) = be_i32(s)?;
    let (s, topic_count) = be_i32(s)?;
    Ok((
        s,
        ListOffsetsResponseHead {
            throttle_time_ms,
            topic_count,
        },
    ))
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListOffsetsTopic {
    pub name: Bytes,
    pub partition_count: i32,
}

pub fn parse_list_offsets_topic(s: NomBytes) -> IResult<NomBytes, ListOffsetsTopic> {
    let (s, name) = parser::parse_string(s)?;
    let (s, partition_count) = be_i32(s)?;
    Ok((
        s,
        ListOffsetsTopic {
            name,
            partition_count,
        },
    ))
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ListOffsetsPartition {
    pub partition_index: i32,
    pub error_code: i16,
    pub timestamp: i64,
    pub offset: i64,
}

pub fn parse_list_offsets_partition(s: NomBytes) -> IResult<NomBytes, ListOffsetsPartition> {
    let (s, partition_index) = be_i32(s)?;
    let (s, error_code) = be_i16(s)?;
    let (s, timestamp) = be_i64(s)?;
    let (s, offset) = be_i64(s)?;
    Ok((
        s,
        ListOffsetsPartition {
            partition_index,
            error_code,
            timestamp,
            offset,
        },
    ))
}
