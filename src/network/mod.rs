//! Connections to brokers.
//!
//! Kafka speaks size delimited request/response pairs over TCP, answered in
//! the order they were sent. The protocol clients only ever see network
//! streams of the engine; [`tcp`] turns those streams into sockets.

use bytes::Bytes;

use crate::error::Error;

pub mod tcp;

/// What a socket task reports back to the engine thread.
#[derive(Debug)]
pub enum NetworkEvent {
    Connected { stream_id: u64 },
    Received { stream_id: u64, bytes: Bytes },
    /// Bytes handed to the socket, acknowledged back to the client.
    Written { stream_id: u64, length: usize },
    Closed { stream_id: u64 },
    Failed { stream_id: u64, error: Error },
}

impl NetworkEvent {
    pub fn stream_id(&self) -> u64 {
        match self {
            NetworkEvent::Connected { stream_id }
            | NetworkEvent::Received { stream_id, .. }
            | NetworkEvent::Written { stream_id, .. }
            | NetworkEvent::Closed { stream_id }
            | NetworkEvent::Failed { stream_id, .. } => *stream_id,
        }
    }
}
