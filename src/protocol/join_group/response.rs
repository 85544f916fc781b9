//! Parsing and processing for Join Group responses.
//!
//! Only the leader receives the member list. An error of
//! `MEMBER_ID_REQUIRED` still carries the member id the broker assigned.
//!
//! ### Protocol Def
//! ```text
//! JoinGroup Response (Version: 5) => throttle_time_ms error_code generation_id protocol_name leader member_id [members]
//!   throttle_time_ms => INT32
//!   error_code => INT16
//!   generation_id => INT32
//!   protocol_name => STRING
//!   leader => STRING
//!   member_id => STRING
//!   members => member_id group_instance_id metadata
//!     member_id => STRING
//!     group_instance_id => NULLABLE_STRING
//!     metadata => BYTES
//! ```
//!
//! Note we are using version 5 for the response.

use bytes::Bytes;
use nom::{number::streaming::be_i32, IResult};
use nombytes::NomBytes;

use crate::{
    error::KafkaCode,
    parser::{self, parse_array},
    protocol::{parse_header_response, HeaderResponse},
};

/// The base Join Group response object.
#[derive(Debug, PartialEq)]
pub struct JoinGroupResponse {
    pub header: HeaderResponse,
    /// The duration in milliseconds for which the request was throttled due to a quota violation, or zero if the request did not violate any quota.
    pub throttle_time_ms: i32,
    /// The error code, or 0 if there was no error.
    pub error_code: KafkaCode,
    /// The generation ID of the group.
    pub generation_id: i32,
    /// The group protocol selected by the coordinator.
    pub protocol_name: Bytes,
    /// The leader of the group.
    pub leader: Bytes,
    /// The member ID assigned by the group coordinator.
    pub member_id: Bytes,
    /// Each member in the group. Empty if this member is not the leader.
    pub members: Vec<Member>,
}

/// Each member in the group.
#[derive(Debug, PartialEq)]
pub struct Member {
    /// The group member ID.
    pub member_id: Bytes,
    pub group_instance_id: Option<Bytes>,
    /// The group member metadata.
    pub metadata: Bytes,
}

pub fn parse_join_group_response(s: NomBytes) -> IResult<NomBytes, JoinGroupResponse> {
    let (s, header) = parse_header_response(s)?;
    let (s, throttle_time_ms) = be_i32(s)?;
    let (s, error_code) = parser::parse_kafka_code(s)?;
    let (s, generation_id) = be_i32(s)?;
    let (s, protocol_name) = parser::parse_string(s)?;
    let (s, leader) = parser::parse_string(s)?;
    let (s, member_id) = parser::parse_string(s)?;
    let (s, members) = parse_array(parse_member)(s)?;

    Ok((
        s,
        JoinGroupResponse {
            header,
            throttle_time_ms,
            error_code,
            generation_id,
            protocol_name,
            leader,
            member_id,
            members,
        },
    ))
}

fn parse_member(s: NomBytes) -> IResult<NomBytes, Member> {
    let (s, member_id) = parser::parse_string(s)?;
    let (s, group_instance_id) = parser::parse_nullable_string(s)?;
    let (s, metadata) = parser::parse_bytes(s)?;

    Ok((
        s,
        Member {
            member_id,
            group_instance_id,
            metadata,
        },
    ))
}
