//! Frames of the flow controlled duplex streams the gateway speaks on both
//! sides.
//!
//! Every logical stream is a pair of directions. The *initial* direction
//! flows from the stream's creator to its receiver and uses an odd stream
//! id, the *reply* direction flows back and uses the same id with the low
//! bit cleared. Begin, Data, End, Abort and Flush travel in the direction
//! of the stream they name, Window and Reset travel against it.
//!
//! Each direction is flow controlled by `sequence`, `acknowledge` and
//! `maximum`: a sender may never have more than `maximum` unacknowledged
//! bytes in flight, so `acknowledge <= sequence <= acknowledge + maximum`
//! always holds. [`Flow`] tracks one direction from either end.

pub mod ext;
pub mod filter;
pub mod state;

use bytes::Bytes;

pub use self::ext::{BeginEx, DataEx, FlushEx, ResetEx};

pub const FLAG_CONT: u8 = 0x00;
pub const FLAG_FIN: u8 = 0x01;
pub const FLAG_INIT: u8 = 0x02;
pub const FLAG_INCOMPLETE: u8 = 0x04;
pub const FLAG_SKIP: u8 = 0x08;
/// A whole message in a single frame.
pub const FLAGS_COMPLETE: u8 = FLAG_INIT | FLAG_FIN;

/// Returns `true` for initial stream ids, which are always odd.
pub fn is_initial(stream_id: u64) -> bool {
    stream_id & 0x01 != 0
}

/// The reply id paired with `initial_id`.
pub fn reply_id(initial_id: u64) -> u64 {
    initial_id & !0x01
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Begin {
    pub origin_id: u64,
    pub routed_id: u64,
    pub stream_id: u64,
    pub sequence: i64,
    pub acknowledge: i64,
    pub maximum: i32,
    pub trace_id: u64,
    pub authorization: u64,
    /// Hint for where the stream should be served, the leader id for
    /// partition streams.
    pub affinity: i64,
    pub extension: Option<BeginEx>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Data {
    pub origin_id: u64,
    pub routed_id: u64,
    pub stream_id: u64,
    pub sequence: i64,
    pub acknowledge: i64,
    pub maximum: i32,
    pub trace_id: u64,
    pub authorization: u64,
    pub flags: u8,
    pub budget_id: u64,
    /// Window consumed by this frame, payload length plus padding.
    pub reserved: i32,
    pub payload: Bytes,
    pub extension: Option<DataEx>,
}

impl Data {
    pub fn is_init(&self) -> bool {
        self.flags & FLAG_INIT != 0
    }

    pub fn is_fin(&self) -> bool {
        self.flags & FLAG_FIN != 0
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct End {
    pub origin_id: u64,
    pub routed_id: u64,
    pub stream_id: u64,
    pub sequence: i64,
    pub acknowledge: i64,
    pub maximum: i32,
    pub trace_id: u64,
    pub authorization: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Abort {
    pub origin_id: u64,
    pub routed_id: u64,
    pub stream_id: u64,
    pub sequence: i64,
    pub acknowledge: i64,
    pub maximum: i32,
    pub trace_id: u64,
    pub authorization: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Flush {
    pub origin_id: u64,
    pub routed_id: u64,
    pub stream_id: u64,
    pub sequence: i64,
    pub acknowledge: i64,
    pub maximum: i32,
    pub trace_id: u64,
    pub authorization: u64,
    pub budget_id: u64,
    pub reserved: i32,
    pub extension: Option<FlushEx>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Window {
    pub origin_id: u64,
    pub routed_id: u64,
    pub stream_id: u64,
    pub sequence: i64,
    pub acknowledge: i64,
    pub maximum: i32,
    pub trace_id: u64,
    pub authorization: u64,
    pub budget_id: u64,
    pub padding: i32,
    pub minimum: i32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reset {
    pub origin_id: u64,
    pub routed_id: u64,
    pub stream_id: u64,
    pub sequence: i64,
    pub acknowledge: i64,
    pub maximum: i32,
    pub trace_id: u64,
    pub authorization: u64,
    pub extension: Option<ResetEx>,
}

/// A deferred wake up, delivered to the consumer that scheduled it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Signal {
    pub stream_id: u64,
    pub trace_id: u64,
    pub cancel_id: u64,
    pub signal_id: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Begin(Begin),
    Data(Data),
    End(End),
    Abort(Abort),
    Flush(Flush),
    Window(Window),
    Reset(Reset),
    Signal(Signal),
}

impl Frame {
    pub fn stream_id(&self) -> u64 {
        match self {
            Frame::Begin(begin) => begin.stream_id,
            Frame::Data(data) => data.stream_id,
            Frame::End(end) => end.stream_id,
            Frame::Abort(abort) => abort.stream_id,
            Frame::Flush(flush) => flush.stream_id,
            Frame::Window(window) => window.stream_id,
            Frame::Reset(reset) => reset.stream_id,
            Frame::Signal(signal) => signal.stream_id,
        }
    }

    /// Window and Reset flow against the direction of their stream.
    pub fn is_throttle(&self) -> bool {
        matches!(self, Frame::Window(_) | Frame::Reset(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Frame::Begin(_) => "BEGIN",
            Frame::Data(_) => "DATA",
            Frame::End(_) => "END",
            Frame::Abort(_) => "ABORT",
            Frame::Flush(_) => "FLUSH",
            Frame::Window(_) => "WINDOW",
            Frame::Reset(_) => "RESET",
            Frame::Signal(_) => "SIGNAL",
        }
    }
}

/// Flow control position of one stream direction.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Flow {
    pub sequence: i64,
    pub acknowledge: i64,
    pub maximum: i32,
    pub padding: i32,
    pub budget_id: u64,
}

impl Flow {
    /// Bytes the sender may still send before running out of window.
    pub fn budget(&self) -> i32 {
        self.maximum - (self.sequence - self.acknowledge) as i32
    }

    /// Records `reserved` bytes sent from `sequence`. Returns `false` when
    /// the frame overruns the window.
    pub fn received(&mut self, sequence: i64, reserved: i32) -> bool {
        debug_assert!(sequence >= self.sequence);
        self.sequence = sequence + reserved as i64;
        self.sequence <= self.acknowledge + self.maximum as i64
    }

    /// Advances `acknowledge` so that at most `no_ack` bytes stay
    /// unacknowledged, returning `true` when a Window needs to be sent.
    pub fn acknowledge_up_to(&mut self, no_ack: i32, maximum: i32) -> bool {
        let acknowledge = (self.sequence - no_ack as i64).max(self.acknowledge);
        if acknowledge > self.acknowledge || maximum > self.maximum {
            self.acknowledge = acknowledge;
            self.maximum = maximum;
            true
        } else {
            false
        }
    }

    /// Applies a Window received for this direction.
    pub fn on_window(&mut self, window: &Window) {
        debug_assert!(window.acknowledge <= window.sequence);
        debug_assert!(window.acknowledge >= self.acknowledge);
        self.acknowledge = window.acknowledge;
        self.maximum = window.maximum;
        self.padding = window.padding;
        self.budget_id = window.budget_id;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn reply_id_clears_low_bit() {
        assert!(is_initial(0x13));
        assert!(!is_initial(0x12));
        assert_eq!(reply_id(0x13), 0x12);
    }

    #[test]
    fn flow_detects_overrun() {
        let mut flow = Flow {
            maximum: 100,
            ..Default::default()
        };
        assert!(flow.received(0, 60));
        assert_eq!(flow.budget(), 40);
        assert!(!flow.received(60, 41));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic]
    fn flow_rejects_sequence_going_backwards() {
        let mut flow = Flow {
            maximum: 100,
            ..Default::default()
        };
        assert!(flow.received(0, 60));
        flow.received(20, 10);
    }

    #[test]
    fn acknowledge_keeps_unacked_tail() {
        let mut flow = Flow {
            sequence: 100,
            maximum: 100,
            ..Default::default()
        };
        assert!(flow.acknowledge_up_to(30, 100));
        assert_eq!(flow.acknowledge, 70);
        assert!(!flow.acknowledge_up_to(30, 100));
        assert!(flow.acknowledge_up_to(0, 100));
        assert_eq!(flow.acknowledge, 100);
    }
}
