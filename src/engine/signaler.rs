//! Deferred, cancellable wake ups.
use std::collections::{BTreeMap, HashMap};

use crate::stream::Signal;

use super::ConsumerId;

#[derive(Debug, Clone)]
struct Timer {
    target: ConsumerId,
    stream_id: u64,
    signal_id: i32,
}

/// Timers ordered by the instant they fire, then by the order they were
/// scheduled.
#[derive(Debug, Default)]
pub struct Signaler {
    next_cancel_id: u64,
    timers: BTreeMap<(i64, u64), Timer>,
    deadlines: HashMap<u64, i64>,
}

impl Signaler {
    /// Schedules `signal_id` for `target` at `at` milliseconds and returns
    /// the id that cancels it.
    pub fn schedule(&mut self, at: i64, target: ConsumerId, stream_id: u64, signal_id: i32) -> u64 {
        self.next_cancel_id += 1;
        let cancel_id = self.next_cancel_id;
        self.timers.insert(
            (at, cancel_id),
            Timer {
                target,
                stream_id,
                signal_id,
            },
        );
        self.deadlines.insert(cancel_id, at);
        cancel_id
    }

    /// Returns `false` when the timer already fired or never existed.
    pub fn cancel(&mut self, cancel_id: u64) -> bool {
        match self.deadlines.remove(&cancel_id) {
            Some(at) => self.timers.remove(&(at, cancel_id)).is_some(),
            None => false,
        }
    }

    /// Removes and returns every timer due at `now`.
    pub fn due(&mut self, now: i64) -> Vec<(ConsumerId, Signal)> {
        let pending = self.timers.split_off(&(now + 1, 0));
        let due = std::mem::replace(&mut self.timers, pending);
        due.into_iter()
            .map(|((_, cancel_id), timer)| {
                self.deadlines.remove(&cancel_id);
                (
                    timer.target,
                    Signal {
                        stream_id: timer.stream_id,
                        trace_id: 0,
                        cancel_id,
                        signal_id: timer.signal_id,
                    },
                )
            })
            .collect()
    }

    /// Instant of the earliest pending timer.
    pub fn next_deadline(&self) -> Option<i64> {
        self.timers.keys().next().map(|(at, _)| *at)
    }

    pub fn detach(&mut self, consumer: ConsumerId) {
        let deadlines = &mut self.deadlines;
        self.timers.retain(|(_, cancel_id), timer| {
            let keep = timer.target != consumer;
            if !keep {
                deadlines.remove(cancel_id);
            }
            keep
        });
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fires_in_deadline_order() {
        let mut signaler = Signaler::default();
        signaler.schedule(200, 1, 5, 2);
        signaler.schedule(100, 1, 5, 1);
        let cancelled = signaler.schedule(150, 1, 5, 3);
        assert!(signaler.cancel(cancelled));
        assert!(!signaler.cancel(cancelled));

        assert!(signaler.due(99).is_empty());
        let fired: Vec<i32> = signaler
            .due(200)
            .into_iter()
            .map(|(_, signal)| signal.signal_id)
            .collect();
        assert_eq!(fired, vec![1, 2]);
        assert_eq!(signaler.next_deadline(), None);
    }
}
