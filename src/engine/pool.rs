//! Fixed size buffer slots for bytes that could not be decoded or sent yet.
use std::{
    cell::Cell,
    ops::{Deref, DerefMut},
    rc::Rc,
};

use bytes::BytesMut;

/// A bounded number of equally sized slots.
///
/// Slots return themselves to the pool when dropped, so a stream that
/// tears down releases whatever it held.
#[derive(Debug, Clone)]
pub struct BufferPool {
    capacity: usize,
    available: Rc<Cell<usize>>,
}

impl BufferPool {
    pub fn new(capacity: usize, count: usize) -> Self {
        BufferPool {
            capacity,
            available: Rc::new(Cell::new(count)),
        }
    }

    pub fn slot_capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.available.get()
    }

    /// Takes a slot, `None` once the pool is exhausted.
    pub fn acquire(&self) -> Option<Slot> {
        let available = self.available.get();
        if available == 0 {
            tracing::warn!("Buffer pool exhausted, capacity {}", self.capacity);
            return None;
        }

        self.available.set(available - 1);
        Some(Slot {
            buffer: BytesMut::with_capacity(self.capacity),
            capacity: self.capacity,
            available: Rc::clone(&self.available),
        })
    }
}

#[derive(Debug)]
pub struct Slot {
    buffer: BytesMut,
    capacity: usize,
    available: Rc<Cell<usize>>,
}

impl Slot {
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Room left before the slot is full.
    pub fn remaining(&self) -> usize {
        self.capacity.saturating_sub(self.buffer.len())
    }
}

impl Deref for Slot {
    type Target = BytesMut;

    fn deref(&self) -> &BytesMut {
        &self.buffer
    }
}

impl DerefMut for Slot {
    fn deref_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.available.set(self.available.get() + 1);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn slots_return_on_drop() {
        let pool = BufferPool::new(16, 1);
        let mut slot = pool.acquire().unwrap();
        slot.extend_from_slice(b"abc");
        assert_eq!(slot.remaining(), 13);
        assert!(pool.acquire().is_none());

        drop(slot);
        assert_eq!(pool.available(), 1);
        assert!(pool.acquire().is_some());
    }
}
