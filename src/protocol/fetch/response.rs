//! Parsing for Fetch responses.
//!
//! The response is never materialized whole, a single partition can carry
//! megabytes of records. The fetch client walks it with the views below,
//! one piece at a time, and hands the record batches to
//! [`record`](crate::protocol::record).
//!
//! ### Protocol Def
//! ```text
//! Fetch Response (Version: 5) => throttle_time_ms [responses]
//!   throttle_time_ms => INT32
//!   responses => topic [partitions]
//!     topic => STRING
//!     partitions => partition_index error_code high_watermark last_stable_offset log_start_offset [aborted_transactions] records
//!       partition_index => INT32
//!       error_code => INT16
//!       high_watermark => INT64
//!       last_stable_offset => INT64
//!       log_start_offset => INT64
//!       aborted_transactions => producer_id first_offset
//!         producer_id => INT64
//!         first_offset => INT64
//!       records => RECORDS
//! ```

use bytes::Bytes;
use nom::{
    number::streaming::{be_i16, be_i32, be_i64},
    IResult,
};
use nombytes::NomBytes;

use crate::parser;

/// Fields ahead of the topic array.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FetchResponseHead {
    pub throttle_time_ms: i32,
    pub topic_count: i32,
}

pub fn parse_fetch_response_head(s: NomBytes) -> IResult<NomBytes, FetchResponseHead> {
    let (s, throttle_time_ms) = be_i32(s)?;
    let (s, topic_count) = be_i32(s)?;
    Ok((
        s,
        FetchResponseHead {
            throttle_time_ms,
            topic_count,
        },
    ))
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TopicHead {
    pub name: Bytes,
    pub partition_count: i32,
}

pub fn parse_topic_head(s: NomBytes) -> IResult<NomBytes, TopicHead> {
    let (s, name) = parser::parse_string(s)?;
    let (s, partition_count) = be_i32(s)?;
    Ok((
        s,
        TopicHead {
            name,
            partition_count,
        },
    ))
}

/// Partition fields ahead of the aborted transactions.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PartitionHead {
    pub partition_index: i32,
    pub error_code: i16,
    pub high_watermark: i64,
    pub last_stable_offset: i64,
    pub log_start_offset: i64,
    /// `-1` when the broker sent a null array.
    pub aborted_transaction_count: i32,
}

pub fn parse_partition_head(s: NomBytes) -> IResult<NomBytes, PartitionHead> {
    let (s, partition_index) = be_i32(s)?;
    let (s, error_code) = be_i16(s)?;
    let (s, high_watermark) = be_i64(s)?;
    let (s, last_stable_offset) = be_i64(s)?;
    let (s, log_start_offset) = be_i64(s)?;
    let (s, aborted_transaction_count) = be_i32(s)?;
    Ok((
        s,
        PartitionHead {
            partition_index,
            error_code,
            high_watermark,
            last_stable_offset,
            log_start_offset,
            aborted_transaction_count,
        },
    ))
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AbortedTransaction {
    pub producer_id: i64,
    pub first_offset: i64,
}

pub fn parse_aborted_transaction(s: NomBytes) -> IResult<NomBytes, AbortedTransaction> {
    let (s, producer_id) = be_i64(s)?;
    let (s, first_offset) = be_i64(s)?;
    Ok((
        s,
        AbortedTransaction {
            producer_id,
            first_offset,
        },
    ))
}

/// Size of the record set that follows, `-1` for null.
pub fn parse_record_set_length(s: NomBytes) -> IResult<NomBytes, i32> {
    be_i32(s)
}
