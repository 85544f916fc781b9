//! Encoding and creation for Metadata requests.
//!
//! ### Example
//! ```rust
//! use kafka_gateway::{encode::ToByte, protocol::MetadataRequest};
//!
//! let topics = ["purchases"];
//! let metadata_request = MetadataRequest::new(1, "relay", &topics);
//! let mut buffer = vec![];
//! metadata_request.encode(&mut buffer).unwrap();
//! ```
//!
//! ### Protocol Def
//! ```text
//! Metadata Request (Version: 5) => [topics] allow_auto_topic_creation
//!   topics => name
//!     name => STRING
//!   allow_auto_topic_creation => BOOLEAN
//! ```
//!
//! Note we are using version 5 of the request.

use bytes::BufMut;

use crate::{
    encode::{AsStrings, ToByte},
    error::Result,
    protocol::HeaderRequest,
};

const API_KEY_METADATA: i16 = 3;
const API_VERSION: i16 = 5;

/// The base Metadata request object.
#[derive(Debug)]
pub struct MetadataRequest<'a, T> {
    pub header: HeaderRequest<'a>,
    /// The topics to fetch metadata for.
    pub topics: &'a [T],
    pub allow_auto_topic_creation: bool,
}

impl<'a, T: AsRef<str>> MetadataRequest<'a, T> {
    pub fn new(correlation_id: i32, client_id: &'a str, topics: &'a [T]) -> MetadataRequest<'a, T> {
        MetadataRequest {
            header: HeaderRequest::new(API_KEY_METADATA, API_VERSION, correlation_id, client_id),
            topics,
            allow_auto_topic_creation: false,
        }
    }
}

impl<'a, T: AsRef<str> + 'a> ToByte for MetadataRequest<'a, T> {
    fn encode<W: BufMut>(&self, buffer: &mut W) -> Result<()> {
        self.header.encode(buffer)?;
        AsStrings(self.topics).encode(buffer)?;
        self.allow_auto_topic_creation.encode(buffer)?;
        Ok(())
    }
}
