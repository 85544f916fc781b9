//! Parsing and processing for Sync Group responses.
//!
//! Each member in the group will receive the assignment
//! from the leader in the sync group response.
//!
//! ### Protocol Def
//! ```text
//! SyncGroup Response (Version: 3) => throttle_time_ms error_code assignment
//!   throttle_time_ms => INT32
//!   error_code => INT16
//!   assignment => BYTES
//! ```
//!
//! Note that we are using version 3 of this API.

use bytes::Bytes;
use nom::{number::streaming::be_i32, IResult};
use nombytes::NomBytes;

use crate::{
    error::KafkaCode,
    parser, protocol,
};

/// The base Sync Group response object.
#[derive(Debug, PartialEq)]
pub struct SyncGroupResponse {
    pub header: protocol::HeaderResponse,
    /// The duration in milliseconds for which the request was throttled due to a quota violation, or zero if the request did not violate any quota.
    pub throttle_time_ms: i32,
    /// The error code, or 0 if there was no error.
    pub error_code: KafkaCode,
    /// The member assignment, opaque to the coordinator.
    pub assignment: Bytes,
}

pub fn parse_sync_group_response(s: NomBytes) -> IResult<NomBytes, SyncGroupResponse> {
    let (s, header) = protocol::parse_header_response(s)?;
    let (s, throttle_time_ms) = be_i32(s)?;
    let (s, error_code) = parser::parse_kafka_code(s)?;
    let (s, assignment) = parser::parse_bytes(s)?;

    Ok((
        s,
        SyncGroupResponse {
            header,
            throttle_time_ms,
            error_code,
            assignment,
        },
    ))
}
