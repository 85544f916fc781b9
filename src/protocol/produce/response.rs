//! Parsing for Produce responses.
//!
//! Note, the request needs to have a non-zero value for `required_acks` to receive a response.
//!
//! ### Protocol Def
//! ```text
//! Produce Response (Version: 3) => [responses] throttle_time_ms
//!   responses => name [partition_responses]
//!     name => STRING
//!     partition_responses => index error_code base_offset log_append_time_ms
//!       index => INT32
//!       error_code => INT16
//!       base_offset => INT64
//!       log_append_time_ms => INT64
//!   throttle_time_ms => INT32
//! ```

use bytes::Bytes;
use nom::{
    number::streaming::{be_i16, be_i32, be_i64},
    IResult,
};
use nombytes::NomBytes;

use crate::parser;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProduceResponseHead {
    pub topic_count: i32,
}

pub fn parse_produce_response_head(s: NomBytes) -> IResult<NomBytes, ProduceResponseHead> {
    let (s, topic_count) = be_i32(s)?;
    Ok((s, ProduceResponseHead { topic_count }))
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProduceTopic {
    pub name: Bytes,
    pub partition_count: i32,
}

pub fn parse_produce_topic(s: NomBytes) -> IResult<NomBytes, ProduceTopic> {
    let (s, name) = parser::parse_string(s)?;
    let (s, partition_count) = be_i32(s)?;
    Ok((
        s,
        ProduceTopic {
            name,
            partition_count,
        },
    ))
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProducePartition {
    pub partition_index: i32,
    pub error_code: i16,
    pub base_offset: i64,
    pub log_append_time_ms: i64,
}

pub fn parse_produce_partition(s: NomBytes) -> IResult<NomBytes, ProducePartition> {
    let (s, partition_index) = be_i32(s)?;
    let (s, error_code) = be_i16(s)?;
    let (s, base_offset) = be_i64(s)?;
    let (s, log_append_time_ms) = be_i64(s)?;
    Ok((
        s,
        ProducePartition {
            partition_index,
            error_code,
            base_offset,
            log_append_time_ms,
        },
    ))
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProduceResponseTrailer {
    pub throttle_time_ms: i32,
}

pub fn parse_produce_response_trailer(s: NomBytes) -> IResult<NomBytes, ProduceResponseTrailer> {
    let (s, throttle_time_ms) = be_i32(s)?;
    Ok((s, ProduceResponseTrailer { throttle_time_ms }))
}
