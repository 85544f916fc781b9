//! Encoding for Produce requests.
//!
//! A produce request carries one record batch for one topic partition.
//! Only the fields ahead of the batch are modelled here, the batch itself is
//! assembled by the produce client with [`record`](crate::protocol::record)
//! because its value bytes may already be on the wire by the time the
//! request is complete.
//!
//! ### Protocol Def
//! ```text
//! Produce Request (Version: 3) => transactional_id acks timeout_ms [topic_data]
//!   transactional_id => NULLABLE_STRING
//!   acks => INT16
//!   timeout_ms => INT32
//!   topic_data => name [partition_data]
//!     name => STRING
//!     partition_data => index records
//!       index => INT32
//!       records => RECORDS
//! ```

use bytes::BufMut;

use crate::{encode::ToByte, error::Result, protocol::HeaderRequest};

const API_KEY_PRODUCE: i16 = 0;
const API_VERSION: i16 = 3;

/// Request fields up to the record set of its single partition.
#[derive(Debug)]
pub struct ProduceRequestHead<'a> {
    pub header: HeaderRequest<'a>,
    pub transactional_id: Option<&'a str>,
    /// The number of acknowledgments the producer requires the leader to have received before considering a request complete. Allowed values: 0 for no acknowledgments, 1 for only the leader and -1 for the full ISR.
    pub required_acks: i16,
    /// The timeout to await a response in milliseconds.
    pub timeout_ms: i32,
    pub topic: &'a str,
    pub partition: i32,
    /// Length of the record batch that follows.
    pub record_set_length: i32,
}

impl<'a> ProduceRequestHead<'a> {
    pub fn new(
        correlation_id: i32,
        client_id: &'a str,
        required_acks: i16,
        timeout_ms: i32,
        topic: &'a str,
        partition: i32,
        record_set_length: i32,
    ) -> Self {
        ProduceRequestHead {
            header: HeaderRequest::new(API_KEY_PRODUCE, API_VERSION, correlation_id, client_id),
            transactional_id: None,
            required_acks,
            timeout_ms,
            topic,
            partition,
            record_set_length,
        }
    }
}

impl<'a> ToByte for ProduceRequestHead<'a> {
    fn encode<W: BufMut>(&self, buffer: &mut W) -> Result<()> {
        tracing::trace!("Encoding ProduceRequestHead {:?}", self);
        self.header.encode(buffer)?;
        self.transactional_id.encode(buffer)?;
        self.required_acks.encode(buffer)?;
        self.timeout_ms.encode(buffer)?;
        1i32.encode(buffer)?;
        self.topic.encode(buffer)?;
        1i32.encode(buffer)?;
        self.partition.encode(buffer)?;
        self.record_set_length.encode(buffer)?;
        Ok(())
    }
}
