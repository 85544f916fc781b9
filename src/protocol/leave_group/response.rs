//! Parsing and processing for Leave Group responses.
//!
//! ### Protocol Defs
//! ```text
//! LeaveGroup Response (Version: 3) => throttle_time_ms error_code [members]
//!   throttle_time_ms => INT32
//!   error_code => INT16
//!   members => member_id group_instance_id error_code
//!     member_id => STRING
//!     group_instance_id => NULLABLE_STRING
//!     error_code => INT16
//! ```
//!
//! Note we are using version 3 for the response.

use bytes::Bytes;
use nom::{number::streaming::be_i32, IResult};
use nombytes::NomBytes;

use crate::{
    error::KafkaCode,
    parser::{self, parse_array},
    protocol::{parse_header_response, HeaderResponse},
};

/// The base Leave Group response object.
#[derive(Debug, PartialEq)]
pub struct LeaveGroupResponse {
    pub header: HeaderResponse,
    pub throttle_time_ms: i32,
    /// The error code, or 0 if there was no error.
    pub error_code: KafkaCode,
    pub members: Vec<MemberResponse>,
}

#[derive(Debug, PartialEq)]
pub struct MemberResponse {
    pub member_id: Bytes,
    pub group_instance_id: Option<Bytes>,
    pub error_code: KafkaCode,
}

pub fn parse_leave_group_response(s: NomBytes) -> IResult<NomBytes, LeaveGroupResponse> {
    let (s, header) = parse_header_response(s)?;
    let (s, throttle_time_ms) = be_i32(s)?;
    let (s, error_code) = parser::parse_kafka_code(s)?;
    let (s, members) = parse_array(parse_member_response)(s)?;

    Ok((
        s,
        LeaveGroupResponse {
            header,
            throttle_time_ms,
            error_code,
            members,
        },
    ))
}

fn parse_member_response(s: NomBytes) -> IResult<NomBytes, MemberResponse> {
    let (s, member_id) = parser::parse_string(s)?;
    let (s, group_instance_id) = parser::parse_nullable_string(s)?;
    let (s, error_code) = parser::parse_kafka_code(s)?;

    Ok((
        s,
        MemberResponse {
            member_id,
            group_instance_id,
            error_code,
        },
    ))
}
