//! Parsing and processing for Heartbeat responses.
//!
//! ### Protocol Def
//! ```text
//! Heartbeat Response (Version: 3) => throttle_time_ms error_code
//!   throttle_time_ms => INT32
//!   error_code => INT16
//! ```

use nom::{number::streaming::be_i32, IResult};
use nombytes::NomBytes;

use crate::{
    error::KafkaCode,
    parser,
    protocol::{parse_header_response, HeaderResponse},
};

/// The base Heartbeat response object.
#[derive(Debug, PartialEq)]
pub struct HeartbeatResponse {
    pub header: HeaderResponse,
    pub throttle_time_ms: i32,
    /// The error code, or 0 if there was no error.
    pub error_code: KafkaCode,
}

pub fn parse_heartbeat_response(s: NomBytes) -> IResult<NomBytes, HeartbeatResponse> {
    let (s, header) = parse_header_response(s)?;
    let (s, throttle_time_ms) = be_i32(s)?;
    let (s, error_code) = parser::parse_kafka_code(s)?;

    Ok((
        s,
        HeartbeatResponse {
            header,
            throttle_time_ms,
            error_code,
        },
    ))
}
