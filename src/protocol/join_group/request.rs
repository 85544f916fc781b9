//! Encoding and creation for Join Group requests.
//!
//! The gateway joins with a single protocol, the one named in the
//! application's group stream, carrying the application's metadata
//! verbatim. The session timeout sent is the application's request
//! clamped to the broker's `group.min.session.timeout.ms` and
//! `group.max.session.timeout.ms`.
//!
//! ### Example
//! ```rust
//! use bytes::Bytes;
//! use kafka_gateway::protocol::{join_group::request::Protocol, JoinGroupRequest};
//!
//! let join_request = JoinGroupRequest::new(
//!     1,
//!     "relay",
//!     "orders",
//!     30000,
//!     4000,
//!     "",
//!     Some("relay-1"),
//!     "consumer",
//!     vec![Protocol::new("highlander", Bytes::new())],
//! );
//! ```
//!
//! ### Protocol Def
//! The kafka protocol defines this request as follows:
//! ```text
//! JoinGroup Request (Version: 5) => group_id session_timeout_ms rebalance_timeout_ms member_id group_instance_id protocol_type [protocols]
//!   group_id => STRING
//!   session_timeout_ms => INT32
//!   rebalance_timeout_ms => INT32
//!   member_id => STRING
//!   group_instance_id => NULLABLE_STRING
//!   protocol_type => STRING
//!   protocols => name metadata
//!     name => STRING
//!     metadata => BYTES
//! ```
//!
//! Note we are using version 5 of the request.

use bytes::Bytes;

use crate::{encode::ToByte, protocol::HeaderRequest};

const API_KEY_JOIN_GROUP: i16 = 11;
const API_VERSION: i16 = 5;

/// The base Join Group request object.
#[derive(Debug)]
pub struct JoinGroupRequest<'a> {
    pub header: HeaderRequest<'a>,
    /// The group identifier.
    pub group_id: &'a str,
    /// The coordinator considers the consumer dead if it receives no heartbeat after this timeout in milliseconds.
    pub session_timeout_ms: i32,
    /// The maximum time in milliseconds that the coordinator will wait for each member to rejoin when rebalancing the group.
    pub rebalance_timeout_ms: i32,
    /// The member id assigned by the group coordinator. Empty if the member is joining for the first time.
    pub member_id: &'a str,
    /// The unique identifier of the consumer instance provided by end user.
    pub group_instance_id: Option<&'a str>,
    /// The unique name the for class of protocols implemented by the group we want to join.
    pub protocol_type: &'a str,
    /// The list of protocols that the member supports.
    pub protocols: Vec<Protocol<'a>>,
}

/// The list of protocols that the member supports.
#[derive(Debug)]
pub struct Protocol<'a> {
    /// The protocol name.
    pub name: &'a str,
    /// The protocol metadata, opaque to the coordinator.
    pub metadata: Bytes,
}

impl<'a> Protocol<'a> {
    pub fn new(name: &'a str, metadata: Bytes) -> Protocol<'a> {
        Protocol { name, metadata }
    }
}

impl<'a> JoinGroupRequest<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        correlation_id: i32,
        client_id: &'a str,
        group_id: &'a str,
        session_timeout_ms: i32,
        rebalance_timeout_ms: i32,
        member_id: &'a str,
        group_instance_id: Option<&'a str>,
        protocol_type: &'a str,
        protocols: Vec<Protocol<'a>>,
    ) -> Self {
        let header = HeaderRequest::new(API_KEY_JOIN_GROUP, API_VERSION, correlation_id, client_id);
        Self {
            header,
            group_id,
            session_timeout_ms,
            rebalance_timeout_ms,
            member_id,
            group_instance_id,
            protocol_type,
            protocols,
        }
    }
}

impl<'a> ToByte for JoinGroupRequest<'a> {
    fn encode<T: bytes::BufMut>(&self, buffer: &mut T) -> crate::error::Result<()> {
        tracing::trace!("Encoding JoinGroupRequest {:?}", self);
        self.header.encode(buffer)?;
        self.group_id.encode(buffer)?;
        self.session_timeout_ms.encode(buffer)?;
        self.rebalance_timeout_ms.encode(buffer)?;
        self.member_id.encode(buffer)?;
        self.group_instance_id.encode(buffer)?;
        self.protocol_type.encode(buffer)?;
        self.protocols.encode(buffer)?;
        Ok(())
    }
}

impl<'a> ToByte for Protocol<'a> {
    fn encode<T: bytes::BufMut>(&self, buffer: &mut T) -> crate::error::Result<()> {
        self.name.encode(buffer)?;
        self.metadata.encode(buffer)?;
        Ok(())
    }
}
