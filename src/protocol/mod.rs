//! Bytecode protocol requests & responses.
//!
//! This module aims to implement the bytecode protocol outlined in the
//! [Kafka Documentation](https://kafka.apache.org/protocol.html)
//!
//! The module is set up as a list of message pairs containing two files
//! each corresponding to the request and response.
//!
//! The request files hold the logic for creating and encoding structs that
//! will be sent to the broker. The response files hold the views the
//! streaming decoders poll with [`try_wrap`](crate::parser::try_wrap): each
//! view parses one fixed piece of a response (a header, a topic, a
//! partition) so a response can be consumed a few bytes at a time.
//! Small responses (group membership, coordinator lookup, configs) are
//! parsed whole once [`try_wrap_response`](crate::client::try_wrap_response)
//! sees their last byte.

pub mod describe_configs;
pub mod fetch;
pub mod find_coordinator;
pub mod heartbeat;
pub mod join_group;
pub mod leave_group;
pub mod list_offsets;
pub mod metadata;
pub mod produce;
pub mod record;
pub mod sasl_authenticate;
pub mod sasl_handshake;
pub mod sync_group;

use bytes::{BufMut, Bytes, BytesMut};
use nom::{number::streaming::be_i32, IResult};
use nombytes::NomBytes;

// re exporting these for ease
pub use self::{
    describe_configs::{request::DescribeConfigsRequest, response::DescribeConfigsResponse},
    fetch::request::FetchRequest,
    find_coordinator::{request::FindCoordinatorRequest, response::FindCoordinatorResponse},
    heartbeat::{request::HeartbeatRequest, response::HeartbeatResponse},
    join_group::{request::JoinGroupRequest, response::JoinGroupResponse},
    leave_group::{request::LeaveGroupRequest, response::LeaveGroupResponse},
    list_offsets::request::ListOffsetsRequest,
    metadata::request::MetadataRequest,
    sasl_authenticate::{request::SaslAuthenticateRequest, response::SaslAuthenticateResponse},
    sasl_handshake::request::SaslHandshakeRequest,
    sync_group::{request::SyncGroupRequest, response::SyncGroupResponse},
};
use crate::{encode::ToByte, error::Result};

/// Size of the `length` prefix in front of every request and response.
pub const LENGTH_PREFIX_SIZE: usize = 4;

#[derive(Debug, Clone)]
pub struct HeaderRequest<'a> {
    /// The API key of this request.
    pub api_key: i16,
    /// The API version of this request.
    pub api_version: i16,
    /// The correlation ID of this request.
    pub correlation_id: i32,
    /// The client ID string.
    pub client_id: &'a str,
}

impl<'a> HeaderRequest<'a> {
    /// Create new header request.
    ///
    /// This goes at the beginning of every single request.
    pub fn new(
        api_key: i16,
        api_version: i16,
        correlation_id: i32,
        client_id: &'a str,
    ) -> HeaderRequest {
        HeaderRequest {
            api_key,
            api_version,
            correlation_id,
            client_id,
        }
    }
}

impl<'a> ToByte for HeaderRequest<'a> {
    fn encode<W: BufMut>(&self, buffer: &mut W) -> Result<()> {
        self.api_key.encode(buffer)?;
        self.api_version.encode(buffer)?;
        self.correlation_id.encode(buffer)?;
        self.client_id.encode(buffer)?;
        Ok(())
    }
}

#[derive(Debug, Default, PartialEq)]
pub struct HeaderResponse {
    /// The correlation ID of this response.
    pub correlation_id: i32,
}

pub fn parse_header_response(s: NomBytes) -> IResult<NomBytes, HeaderResponse> {
    let (s, correlation_id) = be_i32(s)?;
    Ok((s, HeaderResponse { correlation_id }))
}

/// The size prefixed header every response starts with on the wire.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct ResponseHeader {
    /// Bytes following the length field, correlation id included.
    pub length: i32,
    pub correlation_id: i32,
}

impl ResponseHeader {
    /// Bytes of the response body, after the correlation id.
    pub fn body_length(&self) -> i32 {
        self.length - 4
    }
}

pub fn parse_response_header(s: NomBytes) -> IResult<NomBytes, ResponseHeader> {
    let (s, length) = be_i32(s)?;
    let (s, header) = parse_header_response(s)?;
    Ok((
        s,
        ResponseHeader {
            length,
            correlation_id: header.correlation_id,
        },
    ))
}

/// Serialize a request with its size prefix, ready to go on the wire.
pub fn encode_request<R: ToByte>(req: &R) -> Result<Bytes> {
    let mut buffer = BytesMut::with_capacity(64);
    buffer.put_i32(0);
    req.encode(&mut buffer)?;

    let size = (buffer.len() - LENGTH_PREFIX_SIZE) as i32;
    size.encode(&mut &mut buffer[..LENGTH_PREFIX_SIZE])?;

    Ok(buffer.freeze())
}
