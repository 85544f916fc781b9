//! Encoding and creation for Leave Group requests.
//!
//! To explicitly leave a group, the client can send a leave group request. This is preferred over letting the session timeout expire since it allows the group to rebalance faster, which for the consumer means that less time will elapse before partitions can be reassigned to an active member.
//!
//! ### Protocol Def
//! ```text
//! LeaveGroup Request (Version: 3) => group_id [members]
//!   group_id => STRING
//!   members => member_id group_instance_id
//!     member_id => STRING
//!     group_instance_id => NULLABLE_STRING
//! ```
//!
//! Note we are using version 3 for this request.

use crate::{encode::ToByte, protocol::HeaderRequest};

const API_KEY_LEAVE_GROUP: i16 = 13;
const API_VERSION: i16 = 3;

/// The base Leave Group request object.
#[derive(Debug)]
pub struct LeaveGroupRequest<'a> {
    pub header: HeaderRequest<'a>,
    /// The ID of the group to leave.
    pub group_id: &'a str,
    /// The members to remove from the group.
    pub members: Vec<MemberIdentity<'a>>,
}

#[derive(Debug, Clone)]
pub struct MemberIdentity<'a> {
    pub member_id: &'a str,
    pub group_instance_id: Option<&'a str>,
}

impl<'a> LeaveGroupRequest<'a> {
    /// A request removing a single member, the way a departing member leaves.
    pub fn new(
        correlation_id: i32,
        client_id: &'a str,
        group_id: &'a str,
        member_id: &'a str,
        group_instance_id: Option<&'a str>,
    ) -> Self {
        let header = HeaderRequest::new(API_KEY_LEAVE_GROUP, API_VERSION, correlation_id, client_id);
        Self {
            header,
            group_id,
            members: vec![MemberIdentity {
                member_id,
                group_instance_id,
            }],
        }
    }
}

impl<'a> ToByte for LeaveGroupRequest<'a> {
    fn encode<T: bytes::BufMut>(&self, buffer: &mut T) -> crate::error::Result<()> {
        tracing::trace!("Encoding LeaveGroupRequest {:?}", self);
        self.header.encode(buffer)?;
        self.group_id.encode(buffer)?;
        self.members.encode(buffer)?;
        Ok(())
    }
}

impl<'a> ToByte for MemberIdentity<'a> {
    fn encode<T: bytes::BufMut>(&self, buffer: &mut T) -> crate::error::Result<()> {
        self.member_id.encode(buffer)?;
        self.group_instance_id.encode(buffer)?;
        Ok(())
    }
}
