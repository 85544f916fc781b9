#![allow(dead_code)]
//! A scripted broker and an application probe wired into one engine.
//!
//! The broker answers requests from per api key queues or responders,
//! optionally in chunks of a fixed size so decoders see responses split at
//! arbitrary offsets. The probe grants a window on every reply it sees and
//! acknowledges every Data frame, recording all of it.
use std::{
    cell::RefCell,
    collections::{HashMap, VecDeque},
    rc::Rc,
};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use kafka_gateway::{
    binding::{KafkaBinding, KafkaRoute},
    client::KafkaClientFactory,
    config::GatewayConfig,
    encode::ToByte,
    engine::{ConsumerId, Context, Engine, MessageConsumer, StreamFactory},
    protocol::record::{
        MessageHeader, RecordBatchHeader, RecordHeader, RecordTrailer, FIELD_LIMIT_RECORD_BATCH_LENGTH,
        FIELD_OFFSET_ATTRIBUTES, FIELD_OFFSET_CRC, RECORD_BATCH_HEADER_SIZE, RECORD_BATCH_MAGIC,
    },
    stream::{
        self,
        ext::{BeginEx, KafkaBeginEx, ProxyBeginEx},
        Begin, Data, DataEx, End, Flow, Flush, FlushEx, Frame, Window, FLAGS_COMPLETE,
    },
    utils::to_crc32c,
};

pub const BINDING_ID: u64 = 1;
pub const EXIT_ID: u64 = 2;
pub const TOPIC: &str = "orders";

pub const PRODUCE: i16 = 0;
pub const FETCH: i16 = 1;
pub const LIST_OFFSETS: i16 = 2;
pub const METADATA: i16 = 3;
pub const FIND_COORDINATOR: i16 = 10;
pub const JOIN_GROUP: i16 = 11;
pub const HEARTBEAT: i16 = 12;
pub const LEAVE_GROUP: i16 = 13;
pub const SYNC_GROUP: i16 = 14;
pub const DESCRIBE_CONFIGS: i16 = 32;

const BROKER_WINDOW: i32 = 65536;
const PROBE_WINDOW: i32 = 65536;

//
// Requests as the broker saw them
//

#[derive(Debug, Clone)]
pub struct Request {
    /// Index of the connection the request arrived on.
    pub connection: usize,
    pub api_key: i16,
    pub api_version: i16,
    pub correlation_id: i32,
    pub bytes: Bytes,
}

impl Request {
    fn parse(connection: usize, bytes: Bytes) -> Self {
        let mut header = bytes.slice(4..);
        let api_key = header.get_i16();
        let api_version = header.get_i16();
        let correlation_id = header.get_i32();
        Request {
            connection,
            api_key,
            api_version,
            correlation_id,
            bytes,
        }
    }

    /// Everything after the request header.
    pub fn body(&self) -> Bytes {
        let mut body = self.bytes.slice(12..);
        let client_id = body.get_i16().max(0) as usize;
        body.advance(client_id);
        body
    }

    /// Partition and offset of a Fetch or ListOffsets request for a single
    /// partition.
    pub fn partition_offset(&self) -> (i32, i64) {
        let mut body = self.body();
        match self.api_key {
            FETCH => body.advance(4 + 4 + 4 + 4 + 1),
            _ => body.advance(4 + 1),
        }
        let _topics = body.get_i32();
        get_string(&mut body);
        let _partitions = body.get_i32();
        let partition = body.get_i32();
        // fetch offset, or the timestamp ListOffsets resolves
        (partition, body.get_i64())
    }

    /// `max_wait_ms` of a Fetch request.
    pub fn max_wait(&self) -> i32 {
        let mut body = self.body();
        body.advance(4);
        body.get_i32()
    }

    /// Acks, partition and record batch of a Produce request.
    pub fn produce(&self) -> (i16, i32, Bytes) {
        let mut body = self.body();
        get_nullable_string(&mut body);
        let acks = body.get_i16();
        let _timeout = body.get_i32();
        let _topics = body.get_i32();
        get_string(&mut body);
        let _partitions = body.get_i32();
        let partition = body.get_i32();
        let length = body.get_i32() as usize;
        (acks, partition, body.slice(..length))
    }

    /// Member id a JoinGroup request joins with.
    pub fn member_id(&self) -> String {
        let mut body = self.body();
        get_string(&mut body);
        body.advance(4 + 4);
        get_string(&mut body)
    }

    /// Resource name of a single resource DescribeConfigs request.
    pub fn resource(&self) -> (i8, String) {
        let mut body = self.body();
        let _resources = body.get_i32();
        let resource_type = body.get_i8();
        (resource_type, get_string(&mut body))
    }
}

fn get_string(buffer: &mut Bytes) -> String {
    let length = buffer.get_i16().max(0) as usize;
    let value = buffer.split_to(length);
    String::from_utf8_lossy(&value).into_owned()
}

fn get_nullable_string(buffer: &mut Bytes) -> Option<String> {
    if buffer.chunk()[..2] == [0xff, 0xff] {
        buffer.advance(2);
        None
    } else {
        Some(get_string(buffer))
    }
}

//
// Scripted broker
//

type Responder = Box<dyn FnMut(&Request) -> Option<Bytes>>;

#[derive(Debug, Clone)]
pub struct Connection {
    pub initial_id: u64,
    pub affinity: i64,
    pub proxy: Option<ProxyBeginEx>,
    pub ended: bool,
}

#[derive(Default)]
struct BrokerState {
    connections: Vec<Connection>,
    requests: Vec<Request>,
    responses: HashMap<i16, VecDeque<Bytes>>,
    responders: HashMap<i16, Responder>,
    chunk: Option<usize>,
}

/// Serves every network stream routed to [`EXIT_ID`].
#[derive(Clone, Default)]
pub struct Broker(Rc<RefCell<BrokerState>>);

impl Broker {
    /// Queues `body` as the answer to the next request with `api_key`.
    pub fn respond(&self, api_key: i16, body: Bytes) {
        self.0
            .borrow_mut()
            .responses
            .entry(api_key)
            .or_default()
            .push_back(body);
    }

    /// Answers requests with `api_key` once their queue ran dry.
    pub fn respond_with<F>(&self, api_key: i16, responder: F)
    where
        F: FnMut(&Request) -> Option<Bytes> + 'static,
    {
        self.0
            .borrow_mut()
            .responders
            .insert(api_key, Box::new(responder));
    }

    /// Splits every response into frames of at most `size` bytes.
    pub fn chunk(&self, size: usize) {
        self.0.borrow_mut().chunk = Some(size);
    }

    pub fn requests(&self, api_key: i16) -> Vec<Request> {
        self.0
            .borrow()
            .requests
            .iter()
            .filter(|request| request.api_key == api_key)
            .cloned()
            .collect()
    }

    pub fn connections(&self) -> Vec<Connection> {
        self.0.borrow().connections.clone()
    }

    fn next_response(&self, request: &Request) -> Option<Bytes> {
        let queued = self
            .0
            .borrow_mut()
            .responses
            .get_mut(&request.api_key)
            .and_then(VecDeque::pop_front);
        if queued.is_some() {
            return queued;
        }
        let mut responder = self.0.borrow_mut().responders.remove(&request.api_key)?;
        let response = responder(request);
        self.0
            .borrow_mut()
            .responders
            .insert(request.api_key, responder);
        response
    }
}

impl StreamFactory for Broker {
    fn new_stream(&mut self, _cx: &mut Context, begin: &Begin) -> Option<Box<dyn MessageConsumer>> {
        let proxy = match &begin.extension {
            Some(BeginEx::Proxy(proxy)) => Some(proxy.clone()),
            _ => None,
        };
        let index = {
            let mut state = self.0.borrow_mut();
            state.connections.push(Connection {
                initial_id: begin.stream_id,
                affinity: begin.affinity,
                proxy,
                ended: false,
            });
            state.connections.len() - 1
        };
        Some(Box::new(BrokerConnection {
            broker: self.clone(),
            index,
            origin_id: begin.origin_id,
            routed_id: begin.routed_id,
            initial_id: begin.stream_id,
            reply_id: stream::reply_id(begin.stream_id),
            initial: Flow::default(),
            reply: Flow::default(),
            received: BytesMut::new(),
            pending: BytesMut::new(),
            ending: false,
            initial_closed: false,
            reply_closed: false,
        }))
    }
}

struct BrokerConnection {
    broker: Broker,
    index: usize,
    origin_id: u64,
    routed_id: u64,
    initial_id: u64,
    reply_id: u64,
    initial: Flow,
    reply: Flow,
    received: BytesMut,
    pending: BytesMut,
    ending: bool,
    initial_closed: bool,
    reply_closed: bool,
}

impl BrokerConnection {
    fn on_data(&mut self, cx: &mut Context, data: Data) {
        self.initial.sequence = data.sequence + data.reserved as i64;
        self.initial.acknowledge = self.initial.sequence;
        cx.send(Frame::Window(Window {
            origin_id: self.origin_id,
            routed_id: self.routed_id,
            stream_id: self.initial_id,
            sequence: self.initial.sequence,
            acknowledge: self.initial.acknowledge,
            maximum: BROKER_WINDOW,
            ..Default::default()
        }));

        self.received.extend_from_slice(&data.payload);
        while self.received.len() >= 4 {
            let length = i32::from_be_bytes([
                self.received[0],
                self.received[1],
                self.received[2],
                self.received[3],
            ]) as usize;
            if self.received.len() < 4 + length {
                break;
            }
            let request = Request::parse(self.index, self.received.split_to(4 + length).freeze());
            let response = self.broker.next_response(&request);
            if let Some(body) = response {
                self.pending.put_i32(body.len() as i32 + 4);
                self.pending.put_i32(request.correlation_id);
                self.pending.put_slice(&body);
            }
            self.broker.0.borrow_mut().requests.push(request);
        }
        self.flush(cx);
    }

    fn flush(&mut self, cx: &mut Context) {
        let chunk = self.broker.0.borrow().chunk.unwrap_or(usize::MAX);
        while !self.pending.is_empty() && !self.reply_closed {
            let budget = (self.reply.budget() - self.reply.padding).max(0) as usize;
            let length = self.pending.len().min(budget).min(chunk);
            if length == 0 {
                break;
            }
            let reserved = length as i32 + self.reply.padding;
            cx.send(Frame::Data(Data {
                origin_id: self.origin_id,
                routed_id: self.routed_id,
                stream_id: self.reply_id,
                sequence: self.reply.sequence,
                acknowledge: self.reply.acknowledge,
                maximum: self.reply.maximum,
                flags: FLAGS_COMPLETE,
                reserved,
                payload: self.pending.split_to(length).freeze(),
                ..Default::default()
            }));
            self.reply.sequence += reserved as i64;
        }

        if self.ending && self.pending.is_empty() && !self.reply_closed {
            self.reply_closed = true;
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
}

impl MessageConsumer for BrokerConnection {
    fn on_message(&mut self, cx: &mut Context, frame: Frame) {
        match frame {
            Frame::Begin(_) => {
                cx.send(Frame::Begin(Begin {
                    origin_id: self.origin_id,
                    routed_id: self.routed_id,
                    stream_id: self.reply_id,
                    ..Default::default()
                }));
                cx.send(Frame::Window(Window {
                    origin_id: self.origin_id,
                    routed_id: self.routed_id,
                    stream_id: self.initial_id,
                    maximum: BROKER_WINDOW,
                    ..Default::default()
                }));
            }
            Frame::Data(data) => self.on_data(cx, data),
            Frame::Window(window) => {
                self.reply.on_window(&window);
                self.flush(cx);
            }
            Frame::End(_) => {
                self.initial_closed = true;
                self.ending = true;
                self.broker.0.borrow_mut().connections[self.index].ended = true;
                self.flush(cx);
            }
            Frame::Abort(_) => {
                self.initial_closed = true;
                self.broker.0.borrow_mut().connections[self.index].ended = true;
            }
            Frame::Reset(_) => {
                self.reply_closed = true;
                self.pending.clear();
            }
            _ => {}
        }
    }

    fn is_closed(&self) -> bool {
        self.initial_closed && self.reply_closed
    }
}

//
// Application probe
//

#[derive(Default)]
struct ProbeState {
    frames: Vec<Frame>,
    /// Latest window per initial id, what the gateway lets us send.
    windows: HashMap<u64, Window>,
    replies: HashMap<u64, Flow>,
    maximum: i32,
    padding: i32,
}

struct Probe(Rc<RefCell<ProbeState>>);

impl MessageConsumer for Probe {
    fn on_message(&mut self, cx: &mut Context, frame: Frame) {
        let mut state = self.0.borrow_mut();
        state.frames.push(frame.clone());
        match frame {
            Frame::Begin(begin) if !stream::is_initial(begin.stream_id) => {
                let (maximum, padding) = (state.maximum, state.padding);
                state.replies.insert(
                    begin.stream_id,
                    Flow {
                        maximum,
                        padding,
                        ..Default::default()
                    },
                );
                cx.send(Frame::Window(Window {
                    origin_id: begin.origin_id,
                    routed_id: begin.routed_id,
                    stream_id: begin.stream_id,
                    maximum,
                    padding,
                    ..Default::default()
                }));
            }
            Frame::Data(data) => {
                let Some(reply) = state.replies.get_mut(&data.stream_id) else {
                    return;
                };
                reply.sequence = data.sequence + data.reserved as i64;
                reply.acknowledge = reply.sequence;
                cx.send(Frame::Window(Window {
                    origin_id: data.origin_id,
                    routed_id: data.routed_id,
                    stream_id: data.stream_id,
                    sequence: reply.sequence,
                    acknowledge: reply.acknowledge,
                    maximum: reply.maximum,
                    padding: reply.padding,
                    ..Default::default()
                }));
            }
            Frame::Window(window) => {
                state.windows.insert(window.stream_id, window);
            }
            _ => {}
        }
    }
}

//
// Harness
//

/// An engine with the Kafka binding routing every topic to the scripted
/// broker, and the probe playing the application.
pub struct Gateway {
    pub engine: Engine,
    pub broker: Broker,
    probe: Rc<RefCell<ProbeState>>,
    app: ConsumerId,
    sequences: HashMap<u64, i64>,
}

impl Gateway {
    pub fn new(config: GatewayConfig) -> Self {
        let binding = KafkaBinding::new(BINDING_ID).route(KafkaRoute::new(EXIT_ID));
        Gateway::with_binding(config, binding)
    }

    pub fn with_binding(config: GatewayConfig, binding: KafkaBinding) -> Self {
        let broker = Broker::default();
        let mut engine = Engine::new(config.clone());
        engine.register(BINDING_ID, Box::new(KafkaClientFactory::new(binding, &config)));
        engine.register(EXIT_ID, Box::new(broker.clone()));

        let probe = Rc::new(RefCell::new(ProbeState {
            maximum: PROBE_WINDOW,
            ..Default::default()
        }));
        let app = engine.attach(Box::new(Probe(Rc::clone(&probe))));
        Gateway {
            engine,
            broker,
            probe,
            app,
            sequences: HashMap::new(),
        }
    }

    /// Window and padding the probe grants on replies opened from now on.
    pub fn reply_window(&mut self, maximum: i32, padding: i32) {
        let mut probe = self.probe.borrow_mut();
        probe.maximum = maximum;
        probe.padding = padding;
    }

    /// Opens an application stream, returning its initial id.
    pub fn begin(&mut self, affinity: i64, extension: KafkaBeginEx) -> u64 {
        let initial_id = self.engine.context().supply_initial_id();
        self.sequences.insert(initial_id, 0);
        self.engine.send(
            self.app,
            Frame::Begin(Begin {
                routed_id: BINDING_ID,
                stream_id: initial_id,
                affinity,
                extension: Some(BeginEx::Kafka(extension)),
                ..Default::default()
            }),
        );
        initial_id
    }

    /// Sends a Data frame reserving its payload plus the granted padding.
    pub fn data(&mut self, initial_id: u64, flags: u8, payload: Bytes, extension: Option<DataEx>) {
        let padding = self
            .probe
            .borrow()
            .windows
            .get(&initial_id)
            .map_or(0, |window| window.padding);
        let reserved = payload.len() as i32 + padding;
        self.data_reserved(initial_id, flags, reserved, payload, extension);
    }

    pub fn data_reserved(
        &mut self,
        initial_id: u64,
        flags: u8,
        reserved: i32,
        payload: Bytes,
        extension: Option<DataEx>,
    ) {
        let sequence = self.sequences.entry(initial_id).or_default();
        let frame = Frame::Data(Data {
            routed_id: BINDING_ID,
            stream_id: initial_id,
            sequence: *sequence,
            flags,
            reserved,
            payload,
            extension,
            ..Default::default()
        });
        *sequence += reserved as i64;
        self.engine.send(self.app, frame);
    }

    pub fn flush(&mut self, initial_id: u64, extension: Option<FlushEx>) {
        let sequence = self.sequences.get(&initial_id).copied().unwrap_or_default();
        self.engine.send(
            self.app,
            Frame::Flush(Flush {
                routed_id: BINDING_ID,
                stream_id: initial_id,
                sequence,
                extension,
                ..Default::default()
            }),
        );
    }

    pub fn end(&mut self, initial_id: u64) {
        let sequence = self.sequences.get(&initial_id).copied().unwrap_or_default();
        self.engine.send(
            self.app,
            Frame::End(End {
                routed_id: BINDING_ID,
                stream_id: initial_id,
                sequence,
                ..Default::default()
            }),
        );
    }

    pub fn tick(&mut self, now: i64) {
        self.engine.tick(now);
    }

    /// Everything the probe received on either direction of the stream.
    pub fn frames(&self, initial_id: u64) -> Vec<Frame> {
        let reply_id = stream::reply_id(initial_id);
        self.probe
            .borrow()
            .frames
            .iter()
            .filter(|frame| frame.stream_id() == initial_id || frame.stream_id() == reply_id)
            .cloned()
            .collect()
    }

    pub fn names(&self, initial_id: u64) -> Vec<&'static str> {
        self.frames(initial_id).iter().map(Frame::name).collect()
    }

    pub fn data_frames(&self, initial_id: u64) -> Vec<Data> {
        self.frames(initial_id)
            .into_iter()
            .filter_map(|frame| match frame {
                Frame::Data(data) => Some(data),
                _ => None,
            })
            .collect()
    }

    /// The window the gateway granted on the stream's initial direction.
    pub fn window(&self, initial_id: u64) -> Option<Window> {
        self.probe.borrow().windows.get(&initial_id).cloned()
    }
}

//
// Response bodies, everything after the correlation id
//

fn put_string(buffer: &mut BytesMut, value: &str) {
    buffer.put_i16(value.len() as i16);
    buffer.put_slice(value.as_bytes());
}

fn put_null_string(buffer: &mut BytesMut) {
    buffer.put_i16(-1);
}

fn put_bytes(buffer: &mut BytesMut, value: &[u8]) {
    buffer.put_i32(value.len() as i32);
    buffer.put_slice(value);
}

/// Metadata v5 for one topic, `partitions` as (partition, leader).
pub fn metadata(brokers: &[(i32, &str, i32)], topic: &str, partitions: &[(i32, i32)]) -> Bytes {
    let mut body = BytesMut::new();
    body.put_i32(0);
    body.put_i32(brokers.len() as i32);
    for (node_id, host, port) in brokers {
        body.put_i32(*node_id);
        put_string(&mut body, host);
        body.put_i32(*port);
        put_null_string(&mut body);
    }
    put_null_string(&mut body);
    body.put_i32(brokers.first().map_or(-1, |broker| broker.0));
    body.put_i32(1);
    body.put_i16(0);
    put_string(&mut body, topic);
    body.put_u8(0);
    body.put_i32(partitions.len() as i32);
    for (partition_id, leader_id) in partitions {
        body.put_i16(0);
        body.put_i32(*partition_id);
        body.put_i32(*leader_id);
        for _ in 0..2 {
            body.put_i32(1);
            body.put_i32(*leader_id);
        }
        body.put_i32(0);
    }
    body.freeze()
}

/// Fetch v5 for one partition with `batch` as its record set.
pub fn fetch(topic: &str, partition_id: i32, error: i16, high_watermark: i64, batch: &[u8]) -> Bytes {
    let mut body = BytesMut::new();
    body.put_i32(0);
    body.put_i32(1);
    put_string(&mut body, topic);
    body.put_i32(1);
    body.put_i32(partition_id);
    body.put_i16(error);
    body.put_i64(high_watermark);
    body.put_i64(high_watermark);
    body.put_i64(0);
    body.put_i32(0);
    put_bytes(&mut body, batch);
    body.freeze()
}

/// A record with its offset delta taken from its position in the batch.
pub struct TestRecord<'a> {
    pub key: Option<&'a [u8]>,
    pub value: &'a [u8],
    pub headers: Vec<MessageHeader>,
}

impl<'a> TestRecord<'a> {
    pub fn new(key: &'a [u8], value: &'a [u8]) -> Self {
        TestRecord {
            key: Some(key),
            value,
            headers: vec![],
        }
    }
}

/// An uncompressed record batch with a valid CRC.
pub fn record_batch(base_offset: i64, records: &[TestRecord]) -> Bytes {
    let mut encoded = BytesMut::new();
    for (offset_delta, record) in records.iter().enumerate() {
        let mut trailer = BytesMut::new();
        RecordTrailer {
            headers: record.headers.clone(),
        }
        .encode(&mut trailer)
        .expect("trailer");
        let mut header = RecordHeader {
            length: 0,
            attributes: 0,
            timestamp_delta: 0,
            offset_delta: offset_delta as i32,
            key: record.key.map(Bytes::copy_from_slice),
            value_length: record.value.len() as i32,
        };
        header.length = (header.sizeof_body() + record.value.len() + trailer.len()) as i32;
        header.encode(&mut encoded).expect("record header");
        encoded.put_slice(record.value);
        encoded.put_slice(&trailer);
    }

    let header = RecordBatchHeader {
        base_offset,
        length: (RECORD_BATCH_HEADER_SIZE - FIELD_LIMIT_RECORD_BATCH_LENGTH + encoded.len()) as i32,
        partition_leader_epoch: 0,
        magic: RECORD_BATCH_MAGIC,
        crc: 0,
        attributes: 0,
        last_offset_delta: records.len() as i32 - 1,
        first_timestamp: 1_700_000_000_000,
        max_timestamp: 1_700_000_000_000,
        producer_id: -1,
        producer_epoch: -1,
        base_sequence: -1,
        record_count: records.len() as i32,
    };
    let mut batch = BytesMut::new();
    header.encode(&mut batch).expect("batch header");
    batch.put_slice(&encoded);
    let crc = to_crc32c(&batch[FIELD_OFFSET_ATTRIBUTES..]);
    batch[FIELD_OFFSET_CRC..FIELD_OFFSET_ATTRIBUTES].copy_from_slice(&crc.to_be_bytes());
    batch.freeze()
}

/// ListOffsets v2 resolving one partition to `offset`.
pub fn list_offsets(topic: &str, partition_id: i32, offset: i64) -> Bytes {
    let mut body = BytesMut::new();
    body.put_i32(0);
    body.put_i32(1);
    put_string(&mut body, topic);
    body.put_i32(1);
    body.put_i32(partition_id);
    body.put_i16(0);
    body.put_i64(-1);
    body.put_i64(offset);
    body.freeze()
}

/// Produce v3 for one partition.
pub fn produce(topic: &str, partition_id: i32, error: i16) -> Bytes {
    let mut body = BytesMut::new();
    body.put_i32(1);
    put_string(&mut body, topic);
    body.put_i32(1);
    body.put_i32(partition_id);
    body.put_i16(error);
    body.put_i64(0);
    body.put_i64(-1);
    body.put_i32(0);
    body.freeze()
}

/// FindCoordinator v1.
pub fn find_coordinator(error: i16, node_id: i32, host: &str, port: i32) -> Bytes {
    let mut body = BytesMut::new();
    body.put_i32(0);
    body.put_i16(error);
    put_null_string(&mut body);
    body.put_i32(node_id);
    put_string(&mut body, host);
    body.put_i32(port);
    body.freeze()
}

/// DescribeConfigs v0 for one resource.
pub fn describe_configs(resource_type: i8, name: &str, configs: &[(&str, &str)]) -> Bytes {
    let mut body = BytesMut::new();
    body.put_i32(0);
    body.put_i32(1);
    body.put_i16(0);
    put_null_string(&mut body);
    body.put_i8(resource_type);
    put_string(&mut body, name);
    body.put_i32(configs.len() as i32);
    for (name, value) in configs {
        put_string(&mut body, name);
        put_string(&mut body, value);
        body.put_u8(0);
        body.put_u8(0);
        body.put_u8(0);
    }
    body.freeze()
}

/// JoinGroup v5, with `members` listed only for the leader.
pub fn join_group(error: i16, generation_id: i32, leader_id: &str, member_id: &str, members: &[&str]) -> Bytes {
    let mut body = BytesMut::new();
    body.put_i32(0);
    body.put_i16(error);
    body.put_i32(generation_id);
    put_string(&mut body, "highlander");
    put_string(&mut body, leader_id);
    put_string(&mut body, member_id);
    body.put_i32(members.len() as i32);
    for member in members {
        put_string(&mut body, member);
        put_null_string(&mut body);
        put_bytes(&mut body, &[]);
    }
    body.freeze()
}

/// SyncGroup v3.
pub fn sync_group(error: i16, assignment: &[u8]) -> Bytes {
    let mut body = BytesMut::new();
    body.put_i32(0);
    body.put_i16(error);
    put_bytes(&mut body, assignment);
    body.freeze()
}

/// Heartbeat v3.
pub fn heartbeat(error: i16) -> Bytes {
    let mut body = BytesMut::new();
    body.put_i32(0);
    body.put_i16(error);
    body.freeze()
}

/// LeaveGroup v3.
pub fn leave_group(error: i16) -> Bytes {
    let mut body = BytesMut::new();
    body.put_i32(0);
    body.put_i16(error);
    body.put_i32(0);
    body.freeze()
}
