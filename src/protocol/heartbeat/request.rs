//! Encoding and creation for Heartbeat requests.
//!
//! Once a member has joined and synced, it will begin sending periodic
//! heartbeats to keep itself in the group. If not heartbeat has been
//! received by the coordinator with the configured session timeout,
//! the member will be kicked out of the group.
//!
//! ### Protocol Def
//! ```text
//! Heartbeat Request (Version: 3) => group_id generation_id member_id group_instance_id
//!   group_id => STRING
//!   generation_id => INT32
//!   member_id => STRING
//!   group_instance_id => NULLABLE_STRING
//! ```
//!
//! Note that we are using version 3 of this API.

use crate::{encode::ToByte, protocol::HeaderRequest};

const API_KEY_HEARTBEAT: i16 = 12;
const API_VERSION: i16 = 3;

/// The base Heartbeat request object.
#[derive(Debug)]
pub struct HeartbeatRequest<'a> {
    pub header: HeaderRequest<'a>,
    /// The group id.
    pub group_id: &'a str,
    /// The generation of the group.
    pub generation_id: i32,
    /// The member ID.
    pub member_id: &'a str,
    pub group_instance_id: Option<&'a str>,
}

impl<'a> HeartbeatRequest<'a> {
    pub fn new(
        correlation_id: i32,
        client_id: &'a str,
        group_id: &'a str,
        generation_id: i32,
        member_id: &'a str,
        group_instance_id: Option<&'a str>,
    ) -> Self {
        let header = HeaderRequest::new(API_KEY_HEARTBEAT, API_VERSION, correlation_id, client_id);
        Self {
            header,
            group_id,
            generation_id,
            member_id,
            group_instance_id,
        }
    }
}

impl<'a> ToByte for HeartbeatRequest<'a> {
    fn encode<T: bytes::BufMut>(&self, buffer: &mut T) -> crate::error::Result<()> {
        tracing::trace!("Encoding HeartbeatRequest {:?}", self);
        self.header.encode(buffer)?;
        self.group_id.encode(buffer)?;
        self.generation_id.encode(buffer)?;
        self.member_id.encode(buffer)?;
        self.group_instance_id.encode(buffer)?;
        Ok(())
    }
}
