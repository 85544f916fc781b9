//! Picks the partition of a produced record the application left for the
//! gateway to choose.
//!
//! Keyed records hash with murmur2 under Kafka's seed so they land where a
//! Java producer would put them. Records without a key take turns.

use murmur2::{murmur2, KAFKA_SEED};

/// Partition id the application sends to let the gateway decide.
pub const DYNAMIC_PARTITION: i32 = -1;

#[derive(Debug, Default)]
pub struct Partitioner {
    next_null_key: u32,
}

impl Partitioner {
    /// The partition for a record keyed by `key`, among `partition_count`.
    pub fn next_partition(&mut self, key: Option<&[u8]>, partition_count: usize) -> i32 {
        let hash = match key {
            Some(key) => murmur2(key, KAFKA_SEED),
            None => {
                let hash = self.next_null_key;
                self.next_null_key = self.next_null_key.wrapping_add(1);
                hash
            }
        };

        if partition_count == 0 {
            0
        } else {
            ((hash & 0x7fff_ffff) as usize % partition_count) as i32
        }
    }
}

/// Resolves the record's requested partition, hashing when it is dynamic.
///
/// Any other id passes through untouched, unknown ones included.
pub fn compute_partition(
    partitioner: &mut Partitioner,
    requested_partition: i32,
    key: Option<&[u8]>,
    partition_count: usize,
) -> i32 {
    if requested_partition == DYNAMIC_PARTITION {
        partitioner.next_partition(key, partition_count)
    } else {
        requested_partition
    }
}
