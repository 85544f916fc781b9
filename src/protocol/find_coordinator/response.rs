//! Parsing and processing for Find Coordinator responses.
//!
//! The response is small, so the group client waits for all of it and
//! parses it whole.
//!
//! ### Protocol Def
//! ```text
//! FindCoordinator Response (Version: 1) => throttle_time_ms error_code error_message node_id host port
//!   throttle_time_ms => INT32
//!   error_code => INT16
//!   error_message => NULLABLE_STRING
//!   node_id => INT32
//!   host => STRING
//!   port => INT32
//! ```
//!
//! Note we are using version 1 of the response.

use bytes::Bytes;
use nom::{number::streaming::be_i32, IResult};
use nombytes::NomBytes;

use crate::{
    error::KafkaCode,
    parser,
    protocol::{parse_header_response, HeaderResponse},
};

/// The base Find Coordinator response object.
#[derive(Debug, PartialEq)]
pub struct FindCoordinatorResponse {
    pub header: HeaderResponse,
    pub throttle_time_ms: i32,
    pub error_code: KafkaCode,
    pub error_message: Option<Bytes>,
    pub node_id: i32,
    pub host: Bytes,
    pub port: i32,
}

pub fn parse_find_coordinator_response(s: NomBytes) -> IResult<NomBytes, FindCoordinatorResponse> {
    let (s, header) = parse_header_response(s)?;
    let (s, throttle_time_ms) = be_i32(s)?;
    let (s, error_code) = parser::parse_kafka_code(s)?;
    let (s, error_message) = parser::parse_nullable_string(s)?;
    let (s, node_id) = be_i32(s)?;
    let (s, host) = parser::parse_string(s)?;
    let (s, port) = be_i32(s)?;

    Ok((
        s,
        FindCoordinatorResponse {
            header,
            throttle_time_ms,
            error_code,
            error_message,
            node_id,
            host,
            port,
        },
    ))
}
