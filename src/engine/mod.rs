//! Single threaded frame dispatch.
//!
//! The [`Engine`] owns every [`MessageConsumer`] and delivers frames to
//! them one at a time, in the order they were sent. Consumers never call
//! each other: they push frames onto the [`Context`] and return, which
//! keeps a request/response ping-pong between two streams from recursing.
//!
//! Frames are routed by stream id. A Begin on an initial id that nobody
//! serves yet is handed to the [`StreamFactory`] registered for its
//! `routed_id`, whose consumer then receives everything sent on that
//! initial id. The reply id routes back to whoever sent the Begin.
//! Window and Reset take the opposite route of the stream they name.

pub mod budget;
pub mod pool;
pub mod signaler;

use std::{
    collections::{HashMap, VecDeque},
    rc::Rc,
};

use crate::{
    config::GatewayConfig,
    stream::{self, Begin, Frame, Reset, Signal},
};

use self::{
    budget::Budgets,
    pool::{BufferPool, Slot},
    signaler::Signaler,
};

pub type ConsumerId = usize;

/// Signal id delivered to debitors when a budget they wait on is credited.
pub const SIGNAL_BUDGET_CREDIT: i32 = -1;

pub trait MessageConsumer {
    fn on_message(&mut self, cx: &mut Context, frame: Frame);

    /// Closed consumers are dropped after the frame that closed them.
    fn is_closed(&self) -> bool {
        false
    }
}

pub trait StreamFactory {
    /// Creates the consumer serving `begin`, or `None` to reject it.
    fn new_stream(&mut self, cx: &mut Context, begin: &Begin) -> Option<Box<dyn MessageConsumer>>;
}

#[derive(Debug)]
struct Envelope {
    target: Option<ConsumerId>,
    frame: Frame,
}

/// Everything a consumer may touch while handling a frame.
pub struct Context {
    config: Rc<GatewayConfig>,
    queue: VecDeque<Envelope>,
    routes: HashMap<u64, ConsumerId>,
    current: ConsumerId,
    stream_ids: u64,
    budget_ids: u64,
    trace_ids: u64,
    now: i64,
    pool: BufferPool,
    budgets: Budgets,
    signaler: Signaler,
}

impl Context {
    fn new(config: Rc<GatewayConfig>) -> Self {
        let pool = BufferPool::new(config.slot_capacity, config.slot_count);
        Context {
            config,
            queue: VecDeque::new(),
            routes: HashMap::new(),
            current: 0,
            stream_ids: 0,
            budget_ids: 0,
            trace_ids: 0,
            now: 0,
            pool,
            budgets: Budgets::default(),
            signaler: Signaler::default(),
        }
    }

    pub fn config(&self) -> &Rc<GatewayConfig> {
        &self.config
    }

    /// The consumer handling the current frame.
    pub fn current(&self) -> ConsumerId {
        self.current
    }

    /// Milliseconds on the engine clock.
    pub fn now(&self) -> i64 {
        self.now
    }

    pub fn supply_initial_id(&mut self) -> u64 {
        self.stream_ids += 1;
        (self.stream_ids << 1) | 0x01
    }

    pub fn supply_reply_id(&self, initial_id: u64) -> u64 {
        stream::reply_id(initial_id)
    }

    pub fn supply_budget_id(&mut self) -> u64 {
        self.budget_ids += 1;
        self.budget_ids
    }

    pub fn supply_trace_id(&mut self) -> u64 {
        self.trace_ids += 1;
        self.trace_ids
    }

    /// Queues `frame` for delivery.
    ///
    /// A Begin on an initial id also routes the paired reply id back to
    /// the current consumer.
    pub fn send(&mut self, frame: Frame) {
        if let Frame::Begin(begin) = &frame {
            if stream::is_initial(begin.stream_id) {
                self.routes
                    .insert(stream::reply_id(begin.stream_id), self.current);
            }
        }
        tracing::trace!("{} {:#x}", frame.name(), frame.stream_id());
        self.queue.push_back(Envelope {
            target: None,
            frame,
        });
    }

    pub fn signal_now(&mut self, stream_id: u64, signal_id: i32) {
        let target = self.current;
        self.signal_now_for(target, stream_id, signal_id);
    }

    /// Wakes another consumer, for hand overs between streams.
    pub fn signal_now_for(&mut self, target: ConsumerId, stream_id: u64, signal_id: i32) {
        self.queue.push_back(Envelope {
            target: Some(target),
            frame: Frame::Signal(Signal {
                stream_id,
                trace_id: 0,
                cancel_id: 0,
                signal_id,
            }),
        });
    }

    /// Schedules a signal for the current consumer, returning the id that
    /// cancels it.
    pub fn signal_at(&mut self, at: i64, stream_id: u64, signal_id: i32) -> u64 {
        self.signaler
            .schedule(at, self.current, stream_id, signal_id)
    }

    pub fn cancel(&mut self, cancel_id: u64) -> bool {
        self.signaler.cancel(cancel_id)
    }

    pub fn acquire_slot(&mut self) -> Option<Slot> {
        self.pool.acquire()
    }

    pub fn slot_capacity(&self) -> usize {
        self.pool.slot_capacity()
    }

    pub fn acquire_creditor(&mut self) -> u64 {
        let budget_id = self.supply_budget_id();
        self.budgets.acquire_creditor(budget_id);
        budget_id
    }

    pub fn release_creditor(&mut self, budget_id: u64) {
        self.budgets.release_creditor(budget_id);
    }

    /// Credits a budget and wakes the debitors waiting on it.
    pub fn credit(&mut self, budget_id: u64, credit: i64) {
        for (target, stream_id) in self.budgets.credit(budget_id, credit) {
            self.signal_now_for(target, stream_id, SIGNAL_BUDGET_CREDIT);
        }
    }

    /// Registers the current consumer's `stream_id` as a debitor, `false`
    /// when nobody credits `budget_id`.
    pub fn acquire_debitor(&mut self, budget_id: u64, stream_id: u64) -> bool {
        self.budgets
            .acquire_debitor(budget_id, (self.current, stream_id))
    }

    pub fn release_debitor(&mut self, budget_id: u64, stream_id: u64) {
        self.budgets
            .release_debitor(budget_id, (self.current, stream_id));
    }

    pub fn claim(&mut self, budget_id: u64, stream_id: u64, minimum: i32, maximum: i32) -> i32 {
        self.budgets
            .claim(budget_id, (self.current, stream_id), minimum, maximum)
    }

    fn route(&self, frame: &Frame) -> Option<ConsumerId> {
        let stream_id = frame.stream_id();
        let routed = if frame.is_throttle() {
            stream_id ^ 0x01
        } else {
            stream_id
        };
        self.routes.get(&routed).copied()
    }
}

/// Owns consumers and stream factories and runs the dispatch loop.
///
/// ### Example
/// ```rust
/// use kafka_gateway::{config::GatewayConfig, engine::Engine};
///
/// let mut engine = Engine::new(GatewayConfig::default());
/// engine.tick(1_000);
/// assert_eq!(engine.now(), 1_000);
/// ```
pub struct Engine {
    cx: Context,
    factories: HashMap<u64, Box<dyn StreamFactory>>,
    consumers: Vec<Option<Box<dyn MessageConsumer>>>,
    free: Vec<ConsumerId>,
}

impl Engine {
    pub fn new(config: GatewayConfig) -> Self {
        Engine {
            cx: Context::new(Rc::new(config)),
            factories: HashMap::new(),
            consumers: vec![],
            free: vec![],
        }
    }

    /// Serves Begin frames routed to `routed_id` with `factory`.
    pub fn register(&mut self, routed_id: u64, factory: Box<dyn StreamFactory>) {
        self.factories.insert(routed_id, factory);
    }

    /// Adds a consumer that is not created by a factory, such as an
    /// application or a network driver.
    pub fn attach(&mut self, consumer: Box<dyn MessageConsumer>) -> ConsumerId {
        match self.free.pop() {
            Some(id) => {
                self.consumers[id] = Some(consumer);
                id
            }
            None => {
                self.consumers.push(Some(consumer));
                self.consumers.len() - 1
            }
        }
    }

    pub fn context(&mut self) -> &mut Context {
        &mut self.cx
    }

    pub fn now(&self) -> i64 {
        self.cx.now
    }

    /// Sends `frame` on behalf of the attached consumer `from` and runs
    /// until every queued frame is delivered.
    pub fn send(&mut self, from: ConsumerId, frame: Frame) {
        self.cx.current = from;
        self.cx.send(frame);
        self.run();
    }

    /// Advances the clock, fires due signals and runs.
    pub fn tick(&mut self, now: i64) {
        self.cx.now = now.max(self.cx.now);
        for (target, signal) in self.cx.signaler.due(self.cx.now) {
            self.cx.queue.push_back(Envelope {
                target: Some(target),
                frame: Frame::Signal(signal),
            });
        }
        self.run();
    }

    /// Instant of the earliest scheduled signal.
    pub fn next_deadline(&self) -> Option<i64> {
        self.cx.signaler.next_deadline()
    }

    pub fn run(&mut self) {
        while let Some(envelope) = self.cx.queue.pop_front() {
            self.deliver(envelope);
        }
    }

    fn deliver(&mut self, envelope: Envelope) {
        let Envelope { target, frame } = envelope;
        match target.or_else(|| self.cx.route(&frame)) {
            Some(target) => self.dispatch(target, frame),
            None => match frame {
                Frame::Begin(begin) if stream::is_initial(begin.stream_id) => {
                    self.new_stream(begin)
                }
                frame => tracing::trace!(
                    "Dropping {} for unrouted stream {:#x}",
                    frame.name(),
                    frame.stream_id()
                ),
            },
        }
    }

    fn new_stream(&mut self, begin: Begin) {
        let stream = match self.factories.get_mut(&begin.routed_id) {
            Some(factory) => factory.new_stream(&mut self.cx, &begin),
            None => {
                tracing::debug!("No factory for routed id {:#x}", begin.routed_id);
                None
            }
        };

        match stream {
            Some(consumer) => {
                let id = self.attach(consumer);
                tracing::debug!("New stream {:#x} served by {}", begin.stream_id, id);
                self.cx.routes.insert(begin.stream_id, id);
                self.dispatch(id, Frame::Begin(begin));
            }
            None => {
                tracing::debug!("Rejecting stream {:#x}", begin.stream_id);
                self.cx.send(Frame::Reset(Reset {
                    origin_id: begin.origin_id,
                    routed_id: begin.routed_id,
                    stream_id: begin.stream_id,
                    sequence: begin.sequence,
                    acknowledge: begin.acknowledge,
                    maximum: begin.maximum,
                    trace_id: begin.trace_id,
                    authorization: begin.authorization,
                    extension: None,
                }));
            }
        }
    }

    fn dispatch(&mut self, id: ConsumerId, frame: Frame) {
        let Some(mut consumer) = self.consumers.get_mut(id).and_then(Option::take) else {
            tracing::trace!("Dropping {} for closed consumer {}", frame.name(), id);
            return;
        };

        self.cx.current = id;
        consumer.on_message(&mut self.cx, frame);

        if consumer.is_closed() {
            self.detach(id);
        } else {
            self.consumers[id] = Some(consumer);
        }
    }

    fn detach(&mut self, id: ConsumerId) {
        tracing::debug!("Consumer {} closed", id);
        self.cx.routes.retain(|_, consumer| *consumer != id);
        self.cx.signaler.detach(id);
        self.cx.budgets.detach(id);
        self.free.push(id);
    }
}

#[cfg(test)]
mod test {
    use std::{cell::RefCell, rc::Rc};

    use super::*;
    use crate::stream::{Data, Window};

    #[derive(Default)]
    struct Recorder {
        frames: Rc<RefCell<Vec<Frame>>>,
    }

    impl MessageConsumer for Recorder {
        fn on_message(&mut self, _cx: &mut Context, frame: Frame) {
            self.frames.borrow_mut().push(frame);
        }
    }

    /// Answers every Begin with a Window.
    struct Echo;

    impl MessageConsumer for Echo {
        fn on_message(&mut self, cx: &mut Context, frame: Frame) {
            if let Frame::Begin(begin) = frame {
                cx.send(Frame::Window(Window {
                    stream_id: begin.stream_id,
                    maximum: 1024,
                    ..Default::default()
                }));
            }
        }
    }

    struct EchoFactory;

    impl StreamFactory for EchoFactory {
        fn new_stream(&mut self, _cx: &mut Context, _begin: &Begin) -> Option<Box<dyn MessageConsumer>> {
            Some(Box::new(Echo))
        }
    }

    #[test]
    fn window_returns_to_sender() {
        let mut engine = Engine::new(GatewayConfig::default());
        engine.register(7, Box::new(EchoFactory));
        let recorder = Recorder::default();
        let frames = Rc::clone(&recorder.frames);
        let app = engine.attach(Box::new(recorder));

        let initial_id = engine.context().supply_initial_id();
        engine.send(
            app,
            Frame::Begin(Begin {
                routed_id: 7,
                stream_id: initial_id,
                ..Default::default()
            }),
        );

        let frames = frames.borrow();
        assert_eq!(frames.len(), 1);
        assert!(matches!(&frames[0], Frame::Window(window) if window.maximum == 1024));
    }

    #[test]
    fn unknown_route_is_reset() {
        let mut engine = Engine::new(GatewayConfig::default());
        let recorder = Recorder::default();
        let frames = Rc::clone(&recorder.frames);
        let app = engine.attach(Box::new(recorder));

        let initial_id = engine.context().supply_initial_id();
        engine.send(
            app,
            Frame::Begin(Begin {
                routed_id: 99,
                stream_id: initial_id,
                ..Default::default()
            }),
        );
        engine.send(
            app,
            Frame::Data(Data {
                stream_id: initial_id,
                ..Default::default()
            }),
        );

        let frames = frames.borrow();
        assert_eq!(frames.len(), 1);
        assert!(matches!(&frames[0], Frame::Reset(reset) if reset.stream_id == initial_id));
    }

    #[test]
    fn scheduled_signal_fires_on_tick() {
        struct Timed;
        impl MessageConsumer for Timed {
            fn on_message(&mut self, cx: &mut Context, frame: Frame) {
                if let Frame::Begin(begin) = frame {
                    cx.signal_at(cx.now() + 100, begin.stream_id, 1);
                } else if let Frame::Signal(signal) = frame {
                    cx.send(Frame::Window(Window {
                        stream_id: signal.stream_id,
                        maximum: signal.signal_id,
                        ..Default::default()
                    }));
                }
            }
        }
        struct TimedFactory;
        impl StreamFactory for TimedFactory {
            fn new_stream(&mut self, _cx: &mut Context, _begin: &Begin) -> Option<Box<dyn MessageConsumer>> {
                Some(Box::new(Timed))
            }
        }

        let mut engine = Engine::new(GatewayConfig::default());
        engine.register(1, Box::new(TimedFactory));
        let recorder = Recorder::default();
        let frames = Rc::clone(&recorder.frames);
        let app = engine.attach(Box::new(recorder));
        let initial_id = engine.context().supply_initial_id();
        engine.send(
            app,
            Frame::Begin(Begin {
                routed_id: 1,
                stream_id: initial_id,
                ..Default::default()
            }),
        );

        engine.tick(99);
        assert!(frames.borrow().is_empty());
        engine.tick(100);
        assert_eq!(frames.borrow().len(), 1);
    }
}
