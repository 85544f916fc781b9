use std::{
    cell::RefCell,
    collections::{HashMap, VecDeque},
    rc::Rc,
};

use bytes::{Bytes, BytesMut};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
    time::Instant,
};
use tracing::instrument;

use crate::{
    engine::{ConsumerId, Context, Engine, MessageConsumer, StreamFactory},
    error::Error,
    stream::{
        self,
        ext::{BeginEx, ProxyBeginEx},
        state, Abort, Begin, Data, End, Flow, Frame, Reset, Window, FLAGS_COMPLETE,
    },
};

use super::NetworkEvent;

/// Wakes a connection whose socket task reported something.
pub const SIGNAL_NETWORK: i32 = 0x4e;

const READ_CAPACITY: usize = 8192;

type Inboxes = Rc<RefCell<HashMap<u64, Inbox>>>;

#[derive(Debug)]
struct Inbox {
    consumer: ConsumerId,
    events: VecDeque<NetworkEvent>,
}

/// Bridges the engine's network streams to broker sockets.
///
/// Register [`TcpDriver::factory`] under the exit id the binding routes
/// to, then keep [`TcpDriver::run`] polled on the thread that owns the
/// engine.
///
/// ### Example
/// ```rust,no_run
/// use kafka_gateway::{config::GatewayConfig, engine::Engine, network::tcp::TcpDriver};
///
/// # async fn serve() -> kafka_gateway::error::Result<()> {
/// let mut engine = Engine::new(GatewayConfig::default());
/// let mut driver = TcpDriver::new();
/// engine.register(2, Box::new(driver.factory("localhost:9092")));
/// driver.run(&mut engine).await
/// # }
/// ```
pub struct TcpDriver {
    inboxes: Inboxes,
    sender: UnboundedSender<NetworkEvent>,
    events: UnboundedReceiver<NetworkEvent>,
    started: Instant,
}

impl Default for TcpDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpDriver {
    pub fn new() -> Self {
        let (sender, events) = mpsc::unbounded_channel();
        TcpDriver {
            inboxes: Inboxes::default(),
            sender,
            events,
            started: Instant::now(),
        }
    }

    /// Factory opening sockets, to `bootstrap` when a Begin names no broker.
    pub fn factory(&self, bootstrap: &str) -> TcpClientFactory {
        TcpClientFactory {
            bootstrap: bootstrap.to_owned(),
            inboxes: Rc::clone(&self.inboxes),
            sender: self.sender.clone(),
        }
    }

    /// Milliseconds since the driver was created, the engine's clock.
    pub fn now(&self) -> i64 {
        self.started.elapsed().as_millis() as i64
    }

    /// Delivers socket events and due signals to `engine`.
    pub async fn run(&mut self, engine: &mut Engine) -> crate::error::Result<()> {
        loop {
            let deadline = engine
                .next_deadline()
                .map(|at| self.started + std::time::Duration::from_millis(at.max(0) as u64));

            tokio::select! {
                event = self.events.recv() => match event {
                    Some(event) => self.deliver(engine, event),
                    None => return Ok(()),
                },
                _ = sleep_until(deadline), if deadline.is_some() => {}
            }
            engine.tick(self.now());
        }
    }

    fn deliver(&mut self, engine: &mut Engine, event: NetworkEvent) {
        let stream_id = event.stream_id();
        let consumer = {
            let mut inboxes = self.inboxes.borrow_mut();
            let Some(inbox) = inboxes.get_mut(&stream_id) else {
                tracing::trace!("Dropping {:?} for closed connection", event);
                return;
            };
            inbox.events.push_back(event);
            inbox.consumer
        };
        engine
            .context()
            .signal_now_for(consumer, stream_id, SIGNAL_NETWORK);
        engine.run();
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    if let Some(deadline) = deadline {
        tokio::time::sleep_until(deadline).await;
    }
}

/// Serves network Begin frames with a socket each.
pub struct TcpClientFactory {
    bootstrap: String,
    inboxes: Inboxes,
    sender: UnboundedSender<NetworkEvent>,
}

impl StreamFactory for TcpClientFactory {
    fn new_stream(&mut self, _cx: &mut Context, begin: &Begin) -> Option<Box<dyn MessageConsumer>> {
        let address = match &begin.extension {
            Some(BeginEx::Proxy(ProxyBeginEx { host, port })) => format!("{}:{}", host, port),
            None => self.bootstrap.clone(),
            Some(BeginEx::Kafka(_)) => {
                tracing::debug!("Kafka stream {:#x} routed to the network", begin.stream_id);
                return None;
            }
        };
        Some(Box::new(TcpConnection::new(
            begin,
            address,
            Rc::clone(&self.inboxes),
            self.sender.clone(),
        )))
    }
}

/// Engine side of one socket: the client sends on `initial_id`, we answer
/// with what the broker sent on `reply_id`.
struct TcpConnection {
    origin_id: u64,
    routed_id: u64,
    initial_id: u64,
    reply_id: u64,
    state: u8,
    initial: Flow,
    reply: Flow,
    address: String,
    inboxes: Inboxes,
    sender: UnboundedSender<NetworkEvent>,
    writer: Option<UnboundedSender<Bytes>>,
    /// Read credit handed back to the socket task as bytes leave `pending`.
    credits: Option<UnboundedSender<usize>>,
    task: Option<JoinHandle<()>>,
    /// Received bytes waiting for reply window.
    pending: BytesMut,
    closing: bool,
}

impl TcpConnection {
    fn new(
        begin: &Begin,
        address: String,
        inboxes: Inboxes,
        sender: UnboundedSender<NetworkEvent>,
    ) -> Self {
        TcpConnection {
            origin_id: begin.origin_id,
            routed_id: begin.routed_id,
            initial_id: begin.stream_id,
            reply_id: stream::reply_id(begin.stream_id),
            state: 0,
            initial: Flow::default(),
            reply: Flow::default(),
            address,
            inboxes,
            sender,
            writer: None,
            credits: None,
            task: None,
            pending: BytesMut::new(),
            closing: false,
        }
    }

    fn on_begin(&mut self, cx: &mut Context) {
        self.state = state::opening_initial(self.state);
        self.inboxes.borrow_mut().insert(
            self.initial_id,
            Inbox {
                consumer: cx.current(),
                events: VecDeque::new(),
            },
        );

        let (writer, writes) = mpsc::unbounded_channel();
        let (credits, grants) = mpsc::unbounded_channel();
        self.writer = Some(writer);
        self.credits = Some(credits);
        tracing::debug!("Connecting {:#x} to {}", self.initial_id, self.address);
        self.task = Some(tokio::spawn(serve(
            self.initial_id,
            self.address.clone(),
            writes,
            grants,
            cx.slot_capacity(),
            self.sender.clone(),
        )));
    }

    fn on_network(&mut self, cx: &mut Context) {
        loop {
            let event = self
                .inboxes
                .borrow_mut()
                .get_mut(&self.initial_id)
                .and_then(|inbox| inbox.events.pop_front());
            let Some(event) = event else {
                break;
            };

            match event {
                NetworkEvent::Connected { .. } => {
                    self.state = state::opening_reply(state::opened_initial(self.state));
                    let trace_id = cx.supply_trace_id();
                    cx.send(Frame::Begin(Begin {
                        origin_id: self.origin_id,
                        routed_id: self.routed_id,
                        stream_id: self.reply_id,
                        trace_id,
                        ..Default::default()
                    }));
                    self.initial.maximum = cx.slot_capacity() as i32;
                    self.window_initial(cx);
                }
                NetworkEvent::Received { bytes, .. } => {
                    self.pending.extend_from_slice(&bytes);
                    self.flush_reply(cx);
                }
                NetworkEvent::Written { length, .. } => {
                    self.initial.acknowledge += length as i64;
                    self.window_initial(cx);
                }
                NetworkEvent::Closed { .. } => {
                    self.closing = true;
                    self.flush_reply(cx);
                }
                NetworkEvent::Failed { error, .. } => {
                    tracing::warn!("Connection {:#x} to {} failed: {}", self.initial_id, self.address, error);
                    self.reset_initial(cx);
                    self.abort_reply(cx);
                }
            }
        }
    }

    fn on_data(&mut self, cx: &mut Context, data: Data) {
        if !self.initial.received(data.sequence, data.reserved) {
            tracing::error!("Connection {:#x} overran its window", self.initial_id);
            self.reset_initial(cx);
            self.abort_reply(cx);
            return;
        }
        if let Some(writer) = self.writer.as_ref() {
            if writer.send(data.payload).is_err() {
                tracing::debug!("Connection {:#x} writer already gone", self.initial_id);
            }
        }
    }

    fn on_end(&mut self) {
        self.state = state::closed_initial(self.state);
        self.writer = None;
    }

    fn on_abort(&mut self) {
        self.state = state::closed_initial(self.state);
        self.writer = None;
        self.stop();
    }

    fn on_window(&mut self, cx: &mut Context, window: &Window) {
        self.reply.on_window(window);
        self.state = state::opened_reply(self.state);
        self.flush_reply(cx);
    }

    fn on_reset(&mut self) {
        self.state = state::closed_reply(self.state);
        self.pending.clear();
        self.stop();
    }

    fn window_initial(&mut self, cx: &mut Context) {
        if state::initial_closed(self.state) {
            return;
        }
        cx.send(Frame::Window(Window {
            origin_id: self.origin_id,
            routed_id: self.routed_id,
            stream_id: self.initial_id,
            sequence: self.initial.sequence,
            acknowledge: self.initial.acknowledge,
            maximum: self.initial.maximum,
            ..Default::default()
        }));
    }

    /// Sends as much of the received bytes as the client's window allows.
    fn flush_reply(&mut self, cx: &mut Context) {
        if !state::reply_opening(self.state) || state::reply_closed(self.state) {
            return;
        }
        let padding = self.reply.padding;
        let length = (self.reply.budget() - padding).clamp(0, self.pending.len() as i32) as usize;
        if length > 0 {
            let payload = self.pending.split_to(length).freeze();
            let reserved = length as i32 + padding;
            cx.send(Frame::Data(Data {
                origin_id: self.origin_id,
                routed_id: self.routed_id,
                stream_id: self.reply_id,
                sequence: self.reply.sequence,
                acknowledge: self.reply.acknowledge,
                maximum: self.reply.maximum,
                flags: FLAGS_COMPLETE,
                budget_id: self.reply.budget_id,
                reserved,
                payload,
                ..Default::default()
            }));
            self.reply.sequence += reserved as i64;
            self.credit_reads(length);
        }

        if self.closing && self.pending.is_empty() {
            self.state = state::closed_reply(self.state);
            cx.send(Frame::End(End {
                origin_id: self.origin_id,
                routed_id: self.routed_id,
                stream_id: self.reply_id,
                sequence: self.reply.sequence,
                acknowledge: self.reply.acknowledge,
                maximum: self.reply.maximum,
                ..Default::default()
            }));
        }
    }

    fn reset_initial(&mut self, cx: &mut Context) {
        if state::initial_closed(self.state) {
            return;
        }
        self.state = state::closed_initial(self.state);
        self.writer = None;
        cx.send(Frame::Reset(Reset {
            origin_id: self.origin_id,
            routed_id: self.routed_id,
            stream_id: self.initial_id,
            sequence: self.initial.sequence,
            acknowledge: self.initial.acknowledge,
            maximum: self.initial.maximum,
            ..Default::default()
        }));
    }

    fn abort_reply(&mut self, cx: &mut Context) {
        if state::reply_closed(self.state) {
            return;
        }
        let opened = state::reply_opening(self.state);
        self.state = state::closed_reply(self.state);
        self.pending.clear();
        self.stop();
        if opened {
            cx.send(Frame::Abort(Abort {
                origin_id: self.origin_id,
                routed_id: self.routed_id,
                stream_id: self.reply_id,
                sequence: self.reply.sequence,
                acknowledge: self.reply.acknowledge,
                maximum: self.reply.maximum,
                ..Default::default()
            }));
        }
    }

    fn credit_reads(&mut self, length: usize) {
        if let Some(credits) = self.credits.as_ref() {
            if credits.send(length).is_err() {
                self.credits = None;
            }
        }
    }

    fn stop(&mut self) {
        self.credits = None;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl MessageConsumer for TcpConnection {
    fn on_message(&mut self, cx: &mut Context, frame: Frame) {
        match frame {
            Frame::Begin(_) => self.on_begin(cx),
            Frame::Data(data) => self.on_data(cx, data),
            Frame::End(_) => self.on_end(),
            Frame::Abort(_) => self.on_abort(),
            Frame::Window(window) => self.on_window(cx, &window),
            Frame::Reset(_) => self.on_reset(),
            Frame::Signal(signal) if signal.signal_id == SIGNAL_NETWORK => self.on_network(cx),
            frame => tracing::trace!("Connection ignoring {}", frame.name()),
        }
    }

    fn is_closed(&self) -> bool {
        state::closed(self.state)
    }
}

impl Drop for TcpConnection {
    fn drop(&mut self) {
        self.stop();
        self.inboxes.borrow_mut().remove(&self.initial_id);
    }
}

/// Owns the socket: writes what the engine sent, reads until the broker
/// closes. Reads stop once `credit` bytes sit undelivered on the engine side.
#[instrument(name = "network-serve", level = "debug", skip(writes, grants, events))]
async fn serve(
    stream_id: u64,
    address: String,
    mut writes: UnboundedReceiver<Bytes>,
    mut grants: UnboundedReceiver<usize>,
    mut credit: usize,
    events: UnboundedSender<NetworkEvent>,
) {
    let socket = match TcpStream::connect(&address).await {
        Ok(socket) => socket,
        Err(err) => {
            let error = Error::IoError(err.to_string());
            let _ = events.send(NetworkEvent::Failed { stream_id, error });
            return;
        }
    };
    if events.send(NetworkEvent::Connected { stream_id }).is_err() {
        return;
    }

    let (mut reader, mut writer) = socket.into_split();
    let mut buffer = BytesMut::zeroed(READ_CAPACITY);
    let mut writing = true;
    let mut granting = true;

    loop {
        tokio::select! {
            write = writes.recv(), if writing => match write {
                Some(bytes) => {
                    if let Err(err) = writer.write_all(&bytes).await {
                        let error = Error::IoError(err.to_string());
                        let _ = events.send(NetworkEvent::Failed { stream_id, error });
                        return;
                    }
                    tracing::trace!("Wrote {} bytes", bytes.len());
                    let _ = events.send(NetworkEvent::Written { stream_id, length: bytes.len() });
                }
                None => {
                    writing = false;
                    let _ = writer.shutdown().await;
                }
            },
            grant = grants.recv(), if granting => match grant {
                Some(length) => credit += length,
                None => granting = false,
            },
            read = reader.read(&mut buffer[..credit.min(READ_CAPACITY)]), if credit > 0 => match read {
                Ok(0) => {
                    let _ = events.send(NetworkEvent::Closed { stream_id });
                    return;
                }
                Ok(length) => {
                    tracing::trace!("Read {} bytes", length);
                    credit -= length;
                    let bytes = Bytes::copy_from_slice(&buffer[..length]);
                    if events.send(NetworkEvent::Received { stream_id, bytes }).is_err() {
                        return;
                    }
                }
                Err(err) => {
                    let error = Error::IoError(err.to_string());
                    let _ = events.send(NetworkEvent::Failed { stream_id, error });
                    return;
                }
            },
            else => return,
        }
    }
}
