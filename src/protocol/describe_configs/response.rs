//! Parsing and processing for Describe Configs responses.
//!
//! ### Protocol Def
//! ```text
//! DescribeConfigs Response (Version: 0) => throttle_time_ms [results]
//!   throttle_time_ms => INT32
//!   results => error_code error_message resource_type resource_name [configs]
//!     error_code => INT16
//!     error_message => NULLABLE_STRING
//!     resource_type => INT8
//!     resource_name => STRING
//!     configs => name value read_only is_default is_sensitive
//!       name => STRING
//!       value => NULLABLE_STRING
//!       read_only => BOOLEAN
//!       is_default => BOOLEAN
//!       is_sensitive => BOOLEAN
//! ```

use bytes::Bytes;
use nom::{
    number::streaming::{be_i16, be_i32, be_i8, be_u8},
    IResult,
};
use nombytes::NomBytes;

use crate::{
    parser::{self, parse_array},
    protocol::{parse_header_response, HeaderResponse},
};

#[derive(Debug, PartialEq)]
pub struct DescribeConfigsResponse {
    pub header: HeaderResponse,
    pub throttle_time_ms: i32,
    pub results: Vec<ResourceResult>,
}

#[derive(Debug, PartialEq)]
pub struct ResourceResult {
    /// Raw error code, `35` (unsupported version) included.
    pub error_code: i16,
    pub error_message: Option<Bytes>,
    pub resource_type: i8,
    pub resource_name: Bytes,
    pub configs: Vec<ConfigEntry>,
}

#[derive(Debug, PartialEq)]
pub struct ConfigEntry {
    pub name: Bytes,
    pub value: Option<Bytes>,
    pub read_only: bool,
    pub is_default: bool,
    pub is_sensitive: bool,
}

pub fn parse_describe_configs_response(
    s: NomBytes,
) -> IResult<NomBytes, DescribeConfigsResponse> {
    let (s, header) = parse_header_response(s)?;
    let (s, throttle_time_ms) = be_i32(s)?;
    let (s, results) = parse_array(parse_resource_result)(s)?;

    Ok((
        s,
        DescribeConfigsResponse {
            header,
            throttle_time_ms,
            results,
        },
    ))
}

fn parse_resource_result(s: NomBytes) -> IResult<NomBytes, ResourceResult> {
    let (s, error_code) = be_i16(s)?;
    let (s, error_message) = parser::parse_nullable_string(s)?;
    let (s, resource_type) = be_i8(s)?;
    let (s, resource_name) = parser::parse_string(s)?;
    let (s, configs) = parse_array(parse_config_entry)(s)?;

    Ok((
        s,
        ResourceResult {
            error_code,
            error_message,
            resource_type,
            resource_name,
            configs,
        },
    ))
}

fn parse_config_entry(s: NomBytes) -> IResult<NomBytes, ConfigEntry> {
    let (s, name) = parser::parse_string(s)?;
    let (s, value) = parser::parse_nullable_string(s)?;
    let (s, read_only) = be_u8(s)?;
    let (s, is_default) = be_u8(s)?;
    let (s, is_sensitive) = be_u8(s)?;

    Ok((
        s,
        ConfigEntry {
            name,
            value,
            read_only: read_only != 0,
            is_default: is_default != 0,
            is_sensitive: is_sensitive != 0,
        },
    ))
}
