//! Protocol clients, each pairing one application stream with one network
//! stream to a broker.
//!
//! Every client keeps the same shape: an [`ApplicationStream`] it answers
//! on, a [`NetworkStream`] it writes requests to and reads responses from,
//! and a decoder state the response bytes are fed through with
//! [`Client::decode_network`]. Bytes that arrive ahead of what the decoder
//! can use are parked in the network's decode slot and replayed later,
//! requests that do not fit the network window are parked in its encode
//! slot.

pub mod describe;
pub mod fetch;
pub mod group;
pub mod meta;
pub mod produce;
pub mod sasl;

use std::{cell::RefCell, collections::HashMap, fmt, rc::Rc};

use bytes::Bytes;
use nom::IResult;
use nombytes::NomBytes;

use crate::{
    binding::{ClientRoutes, GroupMembership, GroupMembershipRef, KafkaBinding},
    config::GatewayConfig,
    engine::{ConsumerId, Context, MessageConsumer, StreamFactory},
    error::{Error, Result},
    merged::MergedStream,
    parser::try_wrap,
    protocol::{parse_response_header, LENGTH_PREFIX_SIZE},
    stream::{
        self,
        ext::{BeginEx, KafkaBeginEx, ProxyBeginEx},
        state, Abort, Begin, Data, DataEx, End, Flow, Flush, FlushEx, Frame, Reset, ResetEx,
        Window, FLAGS_COMPLETE,
    },
};

/// Self addressed wake up to send the next request once the previous
/// response has been decoded.
pub const SIGNAL_NEXT_REQUEST: i32 = 1;

/// Group id to the consumer and stream currently holding it.
pub type GroupStreams = Rc<RefCell<HashMap<String, (ConsumerId, u64)>>>;

/// Serves every Kafka stream kind for one binding.
pub struct KafkaClientFactory {
    binding: Rc<KafkaBinding>,
    routes: ClientRoutes,
    membership: GroupMembershipRef,
    group_streams: GroupStreams,
}

impl KafkaClientFactory {
    pub fn new(binding: KafkaBinding, config: &GatewayConfig) -> Self {
        tracing::debug!(
            "Attaching binding {:#x} with {} routes",
            binding.id,
            binding.routes.len()
        );
        KafkaClientFactory {
            binding: Rc::new(binding),
            routes: ClientRoutes::default(),
            membership: Rc::new(RefCell::new(GroupMembership::new(&config.group_instance_id))),
            group_streams: GroupStreams::default(),
        }
    }

    pub fn membership(&self) -> GroupMembershipRef {
        Rc::clone(&self.membership)
    }
}

impl StreamFactory for KafkaClientFactory {
    fn new_stream(&mut self, cx: &mut Context, begin: &Begin) -> Option<Box<dyn MessageConsumer>> {
        let Some(BeginEx::Kafka(ext)) = &begin.extension else {
            tracing::debug!("Stream {:#x} carries no kafka extension", begin.stream_id);
            return None;
        };

        let route = match ext {
            KafkaBeginEx::Group(group) => self.binding.resolve_group(&group.group_id),
            other => self.binding.resolve(other.route_key()),
        };
        let Some(route) = route else {
            tracing::debug!("No route for {:?}", ext.route_key());
            return None;
        };
        let client_route = self.routes.supply(route.exit_id);
        let sasl = self.binding.sasl.clone();

        let stream: Box<dyn MessageConsumer> = match ext {
            KafkaBeginEx::Merged(merged) => {
                Box::new(MergedStream::new(begin, merged.clone(), self.binding.id))
            }
            KafkaBeginEx::Fetch(fetch) => Box::new(fetch::FetchClient::new(
                begin,
                fetch.clone(),
                client_route,
                sasl,
            )),
            KafkaBeginEx::Produce(produce) => Box::new(produce::ProduceClient::new(
                begin,
                produce.clone(),
                client_route,
                sasl,
            )),
            KafkaBeginEx::Meta(meta) => {
                Box::new(meta::MetaClient::new(begin, meta.clone(), client_route, sasl))
            }
            KafkaBeginEx::Describe(describe) => Box::new(describe::DescribeClient::new(
                begin,
                describe.clone(),
                client_route,
                sasl,
            )),
            KafkaBeginEx::Group(group) => {
                let holder = self.group_streams.borrow().get(&group.group_id).copied();
                if let Some((consumer, stream_id)) = holder {
                    if group.protocol != group::HIGHLANDER_PROTOCOL {
                        tracing::debug!(
                            "Group {} already served by stream {:#x}",
                            group.group_id,
                            stream_id
                        );
                        return None;
                    }
                    cx.signal_now_for(consumer, stream_id, group::SIGNAL_MIGRATE);
                }
                Box::new(group::GroupStream::new(
                    begin,
                    group.clone(),
                    client_route,
                    sasl,
                    Rc::clone(&self.membership),
                    Rc::clone(&self.group_streams),
                ))
            }
        };
        Some(stream)
    }
}

/// The application facing half of a client: we receive on `initial_id`
/// and answer on `reply_id`.
#[derive(Debug)]
pub struct ApplicationStream {
    pub origin_id: u64,
    pub routed_id: u64,
    pub initial_id: u64,
    pub reply_id: u64,
    pub affinity: i64,
    pub authorization: u64,
    pub state: u8,
    pub initial: Flow,
    pub reply: Flow,
}

impl ApplicationStream {
    pub fn new(begin: &Begin) -> Self {
        ApplicationStream {
            origin_id: begin.origin_id,
            routed_id: begin.routed_id,
            initial_id: begin.stream_id,
            reply_id: stream::reply_id(begin.stream_id),
            affinity: begin.affinity,
            authorization: begin.authorization,
            state: 0,
            initial: Flow {
                sequence: begin.sequence,
                acknowledge: begin.acknowledge,
                ..Default::default()
            },
            reply: Flow::default(),
        }
    }

    /// Records the application Begin.
    pub fn on_begin(&mut self) {
        self.state = state::opening_initial(self.state);
    }

    /// Records a frame received on the initial direction, failing when it
    /// overruns the window we granted.
    pub fn received(&mut self, sequence: i64, reserved: i32) -> Result<()> {
        if self.initial.received(sequence, reserved) {
            Ok(())
        } else {
            let error = Error::FlowControlViolation {
                stream_id: self.initial_id,
                sequence: self.initial.sequence,
                acknowledge: self.initial.acknowledge,
                maximum: self.initial.maximum,
            };
            tracing::error!("{}", error);
            Err(error)
        }
    }

    pub fn on_window(&mut self, window: &Window) {
        self.reply.on_window(window);
        self.state = state::opened_reply(self.state);
    }

    pub fn begin_reply(&mut self, cx: &mut Context, extension: Option<BeginEx>) {
        if state::reply_opening(self.state) || state::reply_closed(self.state) {
            return;
        }
        self.state = state::opening_reply(self.state);
        let trace_id = cx.supply_trace_id();
        cx.send(Frame::Begin(Begin {
            origin_id: self.origin_id,
            routed_id: self.routed_id,
            stream_id: self.reply_id,
            sequence: self.reply.sequence,
            acknowledge: self.reply.acknowledge,
            maximum: self.reply.maximum,
            trace_id,
            authorization: self.authorization,
            affinity: self.affinity,
            extension,
        }));
    }

    pub fn data_reply(
        &mut self,
        cx: &mut Context,
        flags: u8,
        reserved: i32,
        payload: Bytes,
        extension: Option<DataEx>,
    ) {
        cx.send(Frame::Data(Data {
            origin_id: self.origin_id,
            routed_id: self.routed_id,
            stream_id: self.reply_id,
            sequence: self.reply.sequence,
            acknowledge: self.reply.acknowledge,
            maximum: self.reply.maximum,
            authorization: self.authorization,
            flags,
            budget_id: self.reply.budget_id,
            reserved,
            payload,
            extension,
            ..Default::default()
        }));
        self.reply.sequence += reserved as i64;
    }

    pub fn flush_reply(&mut self, cx: &mut Context, extension: Option<FlushEx>) {
        cx.send(Frame::Flush(Flush {
            origin_id: self.origin_id,
            routed_id: self.routed_id,
            stream_id: self.reply_id,
            sequence: self.reply.sequence,
            acknowledge: self.reply.acknowledge,
            maximum: self.reply.maximum,
            authorization: self.authorization,
            budget_id: self.reply.budget_id,
            reserved: 0,
            extension,
            ..Default::default()
        }));
    }

    pub fn end_reply(&mut self, cx: &mut Context) {
        if !state::reply_opening(self.state) || state::reply_closed(self.state) {
            return;
        }
        self.state = state::closed_reply(self.state);
        cx.send(Frame::End(End {
            origin_id: self.origin_id,
            routed_id: self.routed_id,
            stream_id: self.reply_id,
            sequence: self.reply.sequence,
            acknowledge: self.reply.acknowledge,
            maximum: self.reply.maximum,
            authorization: self.authorization,
            ..Default::default()
        }));
    }

    /// Aborts the reply, or just forgets it when it never began.
    pub fn abort_reply(&mut self, cx: &mut Context) {
        if state::reply_closed(self.state) {
            return;
        }
        let opened = state::reply_opening(self.state);
        self.state = state::closed_reply(self.state);
        if !opened {
            return;
        }
        cx.send(Frame::Abort(Abort {
            origin_id: self.origin_id,
            routed_id: self.routed_id,
            stream_id: self.reply_id,
            sequence: self.reply.sequence,
            acknowledge: self.reply.acknowledge,
            maximum: self.reply.maximum,
            authorization: self.authorization,
            ..Default::default()
        }));
    }

    /// Grants the application `maximum` bytes of window, keeping `no_ack`
    /// of what it sent unacknowledged.
    pub fn window_initial(&mut self, cx: &mut Context, no_ack: i32, padding: i32, maximum: i32) {
        let changed = self.initial.acknowledge_up_to(no_ack, maximum);
        if changed || !state::initial_opened(self.state) || padding != self.initial.padding {
            self.initial.padding = padding;
            self.state = state::opened_initial(self.state);
            cx.send(Frame::Window(Window {
                origin_id: self.origin_id,
                routed_id: self.routed_id,
                stream_id: self.initial_id,
                sequence: self.initial.sequence,
                acknowledge: self.initial.acknowledge,
                maximum: self.initial.maximum,
                authorization: self.authorization,
                budget_id: self.initial.budget_id,
                padding,
                minimum: 0,
                ..Default::default()
            }));
        }
    }

    /// Resets the application's initial direction, with the Kafka error
    /// code when there is one.
    pub fn reset_initial(&mut self, cx: &mut Context, error: Option<i16>) {
        if state::initial_closed(self.state) {
            return;
        }
        self.state = state::closed_initial(self.state);
        cx.send(Frame::Reset(Reset {
            origin_id: self.origin_id,
            routed_id: self.routed_id,
            stream_id: self.initial_id,
            sequence: self.initial.sequence,
            acknowledge: self.initial.acknowledge,
            maximum: self.initial.maximum,
            authorization: self.authorization,
            extension: error.map(|error| ResetEx { error }),
            ..Default::default()
        }));
    }

    pub fn cleanup(&mut self, cx: &mut Context, error: Option<i16>) {
        self.reset_initial(cx, error);
        self.abort_reply(cx);
    }

    pub fn is_closed(&self) -> bool {
        state::closed(self.state)
    }
}

/// The broker facing half of a client: we send requests on `initial_id`
/// and receive responses on `reply_id`.
#[derive(Debug)]
pub struct NetworkStream {
    pub origin_id: u64,
    pub routed_id: u64,
    pub initial_id: u64,
    pub reply_id: u64,
    pub state: u8,
    pub initial: Flow,
    pub reply: Flow,
    reply_max: i32,
    encode_slot: Option<crate::engine::pool::Slot>,
    decode_slot: Option<crate::engine::pool::Slot>,
    decode_reserved: i32,
    pub next_request_id: i32,
    pub next_response_id: i32,
}

impl NetworkStream {
    pub fn new(origin_id: u64, routed_id: u64) -> Self {
        NetworkStream {
            origin_id,
            routed_id,
            initial_id: 0,
            reply_id: 0,
            state: 0,
            initial: Flow::default(),
            reply: Flow::default(),
            reply_max: 0,
            encode_slot: None,
            decode_slot: None,
            decode_reserved: 0,
            next_request_id: 0,
            next_response_id: 0,
        }
    }

    pub fn is_open(&self) -> bool {
        state::initial_opening(self.state) && !state::closed(self.state)
    }

    /// Owns `stream_id` as either direction of this network stream.
    pub fn owns(&self, stream_id: u64) -> bool {
        self.initial_id != 0 && (stream_id == self.initial_id || stream_id == self.reply_id)
    }

    /// No request is waiting on its response.
    pub fn is_idle(&self) -> bool {
        self.next_request_id == self.next_response_id
    }

    pub fn has_pending_decode(&self) -> bool {
        self.decode_slot
            .as_ref()
            .map_or(false, |slot| !slot.is_empty())
    }

    pub fn has_pending_encode(&self) -> bool {
        self.pending_encode() != 0
    }

    /// Bytes parked until the broker opens more window.
    pub fn pending_encode(&self) -> usize {
        self.encode_slot.as_ref().map_or(0, |slot| slot.len())
    }

    /// Opens a fresh connection, forgetting whatever the previous one
    /// left behind.
    pub fn begin(&mut self, cx: &mut Context, affinity: i64, extension: Option<BeginEx>) {
        self.initial_id = cx.supply_initial_id();
        self.reply_id = cx.supply_reply_id(self.initial_id);
        self.state = state::opening_initial(0);
        self.initial = Flow::default();
        self.reply = Flow::default();
        self.reply_max = cx.slot_capacity() as i32;
        self.encode_slot = None;
        self.decode_slot = None;
        self.decode_reserved = 0;
        self.next_request_id = 0;
        self.next_response_id = 0;

        tracing::debug!(
            "Opening network stream {:#x} to {:#x}",
            self.initial_id,
            self.routed_id
        );
        let trace_id = cx.supply_trace_id();
        cx.send(Frame::Begin(Begin {
            origin_id: self.origin_id,
            routed_id: self.routed_id,
            stream_id: self.initial_id,
            trace_id,
            affinity,
            extension,
            ..Default::default()
        }));
    }

    /// Begin with the broker address the leader or coordinator lives at.
    pub fn proxy_ex(host: &str, port: i32) -> Option<BeginEx> {
        Some(BeginEx::Proxy(ProxyBeginEx {
            host: host.to_owned(),
            port,
        }))
    }

    pub fn on_begin(&mut self, cx: &mut Context) {
        self.state = state::opening_reply(self.state);
        self.window(cx, 0, self.reply_max);
    }

    pub fn on_window(&mut self, cx: &mut Context, window: &Window) -> Result<()> {
        self.initial.on_window(window);
        self.state = state::opened_initial(self.state);
        if let Some(slot) = self.encode_slot.as_mut() {
            let buffer = slot.split().freeze();
            self.flush(cx, buffer)?;
        }
        Ok(())
    }

    pub fn on_end(&mut self) {
        self.state = state::closing_reply(self.state);
    }

    pub fn on_abort(&mut self) {
        self.state = state::closed_reply(self.state);
    }

    pub fn on_reset(&mut self) {
        self.state = state::closed_initial(self.state);
        self.encode_slot = None;
    }

    /// Sends the request `bytes` after whatever is still parked in the
    /// encode slot.
    pub fn encode(&mut self, cx: &mut Context, bytes: Bytes) -> Result<()> {
        self.next_request_id += 1;
        self.write(cx, bytes)
    }

    /// Sends more bytes of the request already counted by [`encode`].
    ///
    /// [`encode`]: NetworkStream::encode
    pub fn write(&mut self, cx: &mut Context, bytes: Bytes) -> Result<()> {
        let buffer = match self.encode_slot.as_mut() {
            Some(slot) if !slot.is_empty() => {
                slot.extend_from_slice(&bytes);
                slot.split().freeze()
            }
            _ => bytes,
        };
        self.flush(cx, buffer)
    }

    fn flush(&mut self, cx: &mut Context, buffer: Bytes) -> Result<()> {
        let padding = self.initial.padding;
        let length = (self.initial.budget() - padding).clamp(0, buffer.len() as i32) as usize;

        if length > 0 {
            let reserved = length as i32 + padding;
            tracing::trace!(
                "Network {:#x} sending {} of {} bytes",
                self.initial_id,
                length,
                buffer.len()
            );
            cx.send(Frame::Data(Data {
                origin_id: self.origin_id,
                routed_id: self.routed_id,
                stream_id: self.initial_id,
                sequence: self.initial.sequence,
                acknowledge: self.initial.acknowledge,
                maximum: self.initial.maximum,
                flags: FLAGS_COMPLETE,
                budget_id: self.initial.budget_id,
                reserved,
                payload: buffer.slice(..length),
                ..Default::default()
            }));
            self.initial.sequence += reserved as i64;
        }

        let remaining = buffer.slice(length..);
        if remaining.is_empty() {
            self.encode_slot = None;
            if state::initial_closing(self.state) {
                self.send_end(cx);
            }
            return Ok(());
        }

        if self.encode_slot.is_none() {
            self.encode_slot = Some(cx.acquire_slot().ok_or(Error::NoSlotAvailable)?);
        }
        match self.encode_slot.as_mut() {
            Some(slot) if remaining.len() <= slot.capacity() => {
                slot.extend_from_slice(&remaining);
                Ok(())
            }
            _ => Err(Error::NoSlotAvailable),
        }
    }

    /// Ends the connection once everything parked in the encode slot has
    /// been sent.
    pub fn end(&mut self, cx: &mut Context) {
        if state::initial_closed(self.state) || !state::initial_opening(self.state) {
            return;
        }
        self.state = state::closing_initial(self.state);
        if !self.has_pending_encode() {
            self.send_end(cx);
        }
    }

    fn send_end(&mut self, cx: &mut Context) {
        if state::initial_closed(self.state) {
            return;
        }
        self.state = state::closed_initial(self.state);
        cx.send(Frame::End(End {
            origin_id: self.origin_id,
            routed_id: self.routed_id,
            stream_id: self.initial_id,
            sequence: self.initial.sequence,
            acknowledge: self.initial.acknowledge,
            maximum: self.initial.maximum,
            ..Default::default()
        }));
    }

    pub fn abort(&mut self, cx: &mut Context) {
        if state::initial_closed(self.state) || !state::initial_opening(self.state) {
            return;
        }
        self.state = state::closed_initial(self.state);
        self.encode_slot = None;
        cx.send(Frame::Abort(Abort {
            origin_id: self.origin_id,
            routed_id: self.routed_id,
            stream_id: self.initial_id,
            sequence: self.initial.sequence,
            acknowledge: self.initial.acknowledge,
            maximum: self.initial.maximum,
            ..Default::default()
        }));
    }

    pub fn reset(&mut self, cx: &mut Context) {
        if state::reply_closed(self.state) || !state::initial_opening(self.state) {
            return;
        }
        self.state = state::closed_reply(self.state);
        self.decode_slot = None;
        self.decode_reserved = 0;
        cx.send(Frame::Reset(Reset {
            origin_id: self.origin_id,
            routed_id: self.routed_id,
            stream_id: self.reply_id,
            sequence: self.reply.sequence,
            acknowledge: self.reply.acknowledge,
            maximum: self.reply.maximum,
            ..Default::default()
        }));
    }

    /// Tears down both directions.
    pub fn cleanup(&mut self, cx: &mut Context) {
        self.reset(cx);
        self.abort(cx);
    }

    pub fn window(&mut self, cx: &mut Context, no_ack: i32, maximum: i32) {
        if state::reply_closed(self.state) {
            return;
        }
        if self.reply.acknowledge_up_to(no_ack, maximum) {
            cx.send(Frame::Window(Window {
                origin_id: self.origin_id,
                routed_id: self.routed_id,
                stream_id: self.reply_id,
                sequence: self.reply.sequence,
                acknowledge: self.reply.acknowledge,
                maximum: self.reply.maximum,
                budget_id: 0,
                padding: 0,
                minimum: 0,
                ..Default::default()
            }));
        }
    }

    /// Accepts a response chunk, returning the bytes to decode prefixed by
    /// whatever was parked, and the window they account for.
    pub fn received(&mut self, data: &Data) -> Result<(Bytes, i32)> {
        if !self.reply.received(data.sequence, data.reserved) {
            let error = Error::FlowControlViolation {
                stream_id: self.reply_id,
                sequence: self.reply.sequence,
                acknowledge: self.reply.acknowledge,
                maximum: self.reply.maximum,
            };
            tracing::error!("{}", error);
            return Err(error);
        }

        let reserved = self.decode_reserved + data.reserved;
        self.decode_reserved = 0;
        match self.decode_slot.as_mut() {
            Some(slot) if !slot.is_empty() => {
                slot.extend_from_slice(&data.payload);
                Ok((slot.split().freeze(), reserved))
            }
            _ => Ok((data.payload.clone(), reserved)),
        }
    }

    /// Takes the parked bytes to decode again, after the application
    /// opened more window.
    pub fn take_decode_buffer(&mut self) -> Option<(Bytes, i32)> {
        let slot = self.decode_slot.as_mut().filter(|slot| !slot.is_empty())?;
        let reserved = std::mem::take(&mut self.decode_reserved);
        Some((slot.split().freeze(), reserved))
    }

    /// Parks what the decoder left of `buffer` and opens the window for
    /// the rest of the stream.
    pub fn decoded(
        &mut self,
        cx: &mut Context,
        buffer: &Bytes,
        progress: usize,
        reserved: i32,
    ) -> Result<()> {
        let limit = buffer.len();
        if progress < limit {
            if self.decode_slot.is_none() {
                self.decode_slot = Some(cx.acquire_slot().ok_or(Error::NoSlotAvailable)?);
            }
            let tail = limit - progress;
            if let Some(slot) = self.decode_slot.as_mut() {
                slot.clear();
                slot.extend_from_slice(&buffer[progress..]);
            }
            self.decode_reserved = (tail as i64 * reserved as i64 / limit as i64) as i32;
            tracing::trace!(
                "Network {:#x} parked {} bytes",
                self.reply_id,
                tail
            );
            self.window(cx, tail as i32, self.reply_max);
        } else {
            self.decode_slot = None;
            self.decode_reserved = 0;
            self.window(cx, 0, self.reply_max);
        }
        Ok(())
    }
}

/// Waits until `buffer[progress..limit]` holds a whole size prefixed
/// response, then runs `parser` over it from the correlation id on.
///
/// Returns the value with the progress past the response. A parser that
/// does not consume the response it was given fails with
/// [`Error::ParsingError`].
pub fn try_wrap_response<O, F>(
    parser: F,
    buffer: &Bytes,
    progress: usize,
    limit: usize,
) -> Result<Option<(O, usize)>>
where
    F: FnMut(NomBytes) -> IResult<NomBytes, O>,
{
    let Some((header, _)) = try_wrap(parse_response_header, buffer, progress, limit)? else {
        return Ok(None);
    };
    let response_limit = progress + LENGTH_PREFIX_SIZE + header.length.max(0) as usize;
    if response_limit > limit {
        return Ok(None);
    }

    match try_wrap(parser, buffer, progress + LENGTH_PREFIX_SIZE, response_limit)? {
        Some((value, _)) => Ok(Some((value, response_limit))),
        None => Err(Error::ParsingError(buffer.slice(progress..response_limit))),
    }
}

/// A client whose response bytes run through a resumable decoder.
pub trait Client {
    type Decoder: Copy + PartialEq + fmt::Debug;

    fn decoder(&self) -> Self::Decoder;

    fn network(&mut self) -> &mut NetworkStream;

    /// Runs the current decoder once over `buffer[progress..limit]` and
    /// returns the new progress.
    fn decode(
        &mut self,
        cx: &mut Context,
        buffer: &Bytes,
        progress: usize,
        limit: usize,
    ) -> Result<usize>;

    /// Resets the network and ignores whatever else it sends.
    fn reject(&mut self, cx: &mut Context);

    /// Tears down after a failure outside the decoder.
    fn cleanup(&mut self, cx: &mut Context, error: Error);

    /// Runs the decoder until it neither advances nor changes state.
    fn decode_all(
        &mut self,
        cx: &mut Context,
        buffer: &Bytes,
        mut progress: usize,
        limit: usize,
    ) -> usize {
        loop {
            let previous = self.decoder();
            let next = match self.decode(cx, buffer, progress, limit) {
                Ok(next) => next,
                Err(err) => {
                    tracing::error!("Rejecting network stream: {}", err);
                    self.reject(cx);
                    return limit;
                }
            };
            if next == progress && self.decoder() == previous {
                return progress;
            }
            progress = next;
        }
    }

    /// Decodes `buffer`, parking the undecoded tail.
    fn decode_network(&mut self, cx: &mut Context, buffer: Bytes, reserved: i32) {
        let progress = self.decode_all(cx, &buffer, 0, buffer.len());
        if let Err(err) = self.network().decoded(cx, &buffer, progress, reserved) {
            self.cleanup(cx, err);
        }
    }

    fn on_network_data(&mut self, cx: &mut Context, data: &Data) {
        match self.network().received(data) {
            Ok((buffer, reserved)) => self.decode_network(cx, buffer, reserved),
            Err(err) => self.cleanup(cx, err),
        }
    }

    /// Replays the parked bytes.
    fn decode_parked(&mut self, cx: &mut Context) {
        if let Some((buffer, reserved)) = self.network().take_decode_buffer() {
            self.decode_network(cx, buffer, reserved);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::Engine;

    #[derive(Default)]
    struct Sink {
        frames: Rc<RefCell<Vec<Frame>>>,
    }

    impl MessageConsumer for Sink {
        fn on_message(&mut self, _cx: &mut Context, frame: Frame) {
            self.frames.borrow_mut().push(frame);
        }
    }

    struct SinkFactory(Rc<RefCell<Vec<Frame>>>);

    impl StreamFactory for SinkFactory {
        fn new_stream(&mut self, _cx: &mut Context, _begin: &Begin) -> Option<Box<dyn MessageConsumer>> {
            Some(Box::new(Sink {
                frames: Rc::clone(&self.0),
            }))
        }
    }

    /// Drives a network stream from inside the engine.
    struct Driver {
        network: NetworkStream,
        requests: Vec<Bytes>,
    }

    impl MessageConsumer for Driver {
        fn on_message(&mut self, cx: &mut Context, frame: Frame) {
            match frame {
                Frame::Signal(_) => {
                    self.network.begin(cx, 0, None);
                    for request in self.requests.drain(..) {
                        self.network.encode(cx, request).unwrap();
                    }
                    self.network.end(cx);
                }
                Frame::Window(window) => self.network.on_window(cx, &window).unwrap(),
                _ => {}
            }
        }
    }

    #[test]
    fn encode_waits_for_window() {
        let config = GatewayConfig::builder().slot_capacity(64).slot_count(2).build();
        let mut engine = Engine::new(config);
        let frames = Rc::new(RefCell::new(vec![]));
        engine.register(9, Box::new(SinkFactory(Rc::clone(&frames))));

        let driver = engine.attach(Box::new(Driver {
            network: NetworkStream::new(1, 9),
            requests: vec![Bytes::from_static(&[1; 10]), Bytes::from_static(&[2; 10])],
        }));
        engine.context().signal_now_for(driver, 0, 0);
        engine.run();

        // Begin only, the requests wait in the encode slot
        assert_eq!(frames.borrow().len(), 1);

        let initial_id = frames.borrow()[0].stream_id();
        engine.send(
            driver,
            Frame::Window(Window {
                stream_id: initial_id,
                maximum: 15,
                ..Default::default()
            }),
        );
        let sent: Vec<usize> = frames
            .borrow()
            .iter()
            .filter_map(|frame| match frame {
                Frame::Data(data) => Some(data.payload.len()),
                _ => None,
            })
            .collect();
        assert_eq!(sent, vec![15]);

        engine.send(
            driver,
            Frame::Window(Window {
                stream_id: initial_id,
                acknowledge: 15,
                sequence: 15,
                maximum: 15,
                ..Default::default()
            }),
        );
        let frames = frames.borrow();
        assert!(matches!(&frames[2], Frame::Data(data) if data.payload.len() == 5));
        assert!(matches!(&frames[3], Frame::End(_)));
    }

    #[test]
    fn received_rejects_overrun() {
        let mut network = NetworkStream::new(1, 9);
        network.reply.maximum = 8;
        let data = Data {
            reserved: 9,
            payload: Bytes::from_static(&[0; 9]),
            ..Default::default()
        };
        assert!(matches!(
            network.received(&data),
            Err(Error::FlowControlViolation { maximum: 8, .. })
        ));
    }
}
