//! Encoding and creation for Sync Group requests.
//!
//! The sync group request is used by the group
//! leader to assign state (e.g. partition assignments)
//! to all members of the current generation. All members
//! send SyncGroup immediately after joining the group,
//! but only the leader provides the group's assignment.
//!
//! ### Protocol Def
//! ```text
//! SyncGroup Request (Version: 3) => group_id generation_id member_id group_instance_id [assignments]
//!   group_id => STRING
//!   generation_id => INT32
//!   member_id => STRING
//!   group_instance_id => NULLABLE_STRING
//!   assignments => member_id assignment
//!     member_id => STRING
//!     assignment => BYTES
//! ```
//!
//! Note that we are using version 3 of this API. Assignments are carried
//! as the opaque bytes the leader supplied.
use bytes::Bytes;

use crate::{encode::ToByte, protocol::HeaderRequest};

const API_KEY_SYNC_GROUP: i16 = 14;
const API_VERSION: i16 = 3;

/// The base Sync Group request object.
#[derive(Debug)]
pub struct SyncGroupRequest<'a> {
    pub header: HeaderRequest<'a>,
    /// The unique group identifier.
    pub group_id: &'a str,
    /// The generation of the group.
    pub generation_id: i32,
    /// The member ID assigned by the group.
    pub member_id: &'a str,
    pub group_instance_id: Option<&'a str>,
    /// Each assignment. Empty if this member is not the leader.
    pub assignments: Vec<Assignment<'a>>,
}

#[derive(Debug, Clone)]
pub struct Assignment<'a> {
    /// The ID of the member to assign.
    pub member_id: &'a str,
    /// The member assignment.
    pub assignment: Bytes,
}

impl<'a> Assignment<'a> {
    pub fn new(member_id: &'a str, assignment: Bytes) -> Assignment<'a> {
        Assignment {
            member_id,
            assignment,
        }
    }
}

impl<'a> SyncGroupRequest<'a> {
    pub fn new(
        correlation_id: i32,
        client_id: &'a str,
        group_id: &'a str,
        generation_id: i32,
        member_id: &'a str,
        group_instance_id: Option<&'a str>,
        assignments: Vec<Assignment<'a>>,
    ) -> Self {
        let header = HeaderRequest::new(API_KEY_SYNC_GROUP, API_VERSION, correlation_id, client_id);
        Self {
            header,
            group_id,
            generation_id,
            member_id,
            group_instance_id,
            assignments,
        }
    }
}

impl<'a> ToByte for SyncGroupRequest<'a> {
    fn encode<T: bytes::BufMut>(&self, buffer: &mut T) -> crate::error::Result<()> {
        tracing::trace!("Encoding SyncGroupRequest {:?}", self);
        self.header.encode(buffer)?;
        self.group_id.encode(buffer)?;
        self.generation_id.encode(buffer)?;
        self.member_id.encode(buffer)?;
        self.group_instance_id.encode(buffer)?;
        self.assignments.encode(buffer)?;
        Ok(())
    }
}

impl<'a> ToByte for Assignment<'a> {
    fn encode<T: bytes::BufMut>(&self, buffer: &mut T) -> crate::error::Result<()> {
        self.member_id.encode(buffer)?;
        self.assignment.encode(buffer)?;
        Ok(())
    }
}
