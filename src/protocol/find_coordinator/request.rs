//! Encoding and creation for Find Coordinator requests.
//!
//! Any broker answers with the node id and address of the group's
//! coordinator, where the group client then opens its own connection.
//!
//! ### Example
//! ```rust
//! use kafka_gateway::protocol::{encode_request, FindCoordinatorRequest};
//!
//! let req = FindCoordinatorRequest::new(1, "relay", "orders");
//! let bytes = encode_request(&req).unwrap();
//! ```
//!
//! ### Protocol Def
//! ```text
//! FindCoordinator Request (Version: 1) => key key_type
//!   key => STRING
//!   key_type => INT8
//! ```
//!
//! Note we are using version 1 of the request.

use crate::{encode::ToByte, protocol::HeaderRequest};

const API_KEY_FIND_COORDINATOR: i16 = 10;
const API_VERSION: i16 = 1;

/// Coordinator key type for consumer groups.
pub const KEY_TYPE_GROUP: i8 = 0;

/// The base Find Coordinator request object.
#[derive(Debug)]
pub struct FindCoordinatorRequest<'a> {
    pub header: HeaderRequest<'a>,
    /// The coordinator key.
    pub key: &'a str,
    pub key_type: i8,
}

impl<'a> FindCoordinatorRequest<'a> {
    pub fn new(correlation_id: i32, client_id: &'a str, key: &'a str) -> Self {
        let header = HeaderRequest::new(
            API_KEY_FIND_COORDINATOR,
            API_VERSION,
            correlation_id,
            client_id,
        );
        Self {
            header,
            key,
            key_type: KEY_TYPE_GROUP,
        }
    }
}

impl<'a> ToByte for FindCoordinatorRequest<'a> {
    fn encode<T: bytes::BufMut>(&self, buffer: &mut T) -> crate::error::Result<()> {
        tracing::trace!("Encoding FindCoordinatorRequest {:?}", self);
        self.header.encode(buffer)?;
        self.key.encode(buffer)?;
        self.key_type.encode(buffer)?;
        Ok(())
    }
}
