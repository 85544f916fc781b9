//! Produce client for a single topic partition.
//!
//! Application records are appended to one record batch as they arrive and
//! sent as a Produce request when the linger signal fires, when the batch
//! would outgrow its slot, or when a record arrives whose value is still
//! being streamed. A streamed value goes to the broker as it arrives, so
//! the batch CRC is completed from the checksum the application supplies
//! for the whole value rather than from the value bytes themselves.
use bytes::{BufMut, Bytes, BytesMut};
use tracing::instrument;

use crate::{
    binding::{ClientRouteRef, SaslConfig},
    config::GatewayConfig,
    encode::ToByte,
    engine::{pool::Slot, Context, MessageConsumer},
    error::{Error, KafkaCode, Result},
    parser::try_wrap,
    protocol::{
        parse_response_header,
        produce::{
            request::ProduceRequestHead,
            response::{
                parse_produce_partition, parse_produce_response_head,
                parse_produce_response_trailer, parse_produce_topic,
            },
        },
        record::{
            MessageHeader, RecordBatchHeader, RecordHeader, RecordTrailer,
            ATTRIBUTES_NO_TIMESTAMP, FIELD_LIMIT_RECORD_BATCH_LENGTH, FIELD_OFFSET_ATTRIBUTES,
            FIELD_OFFSET_CRC, RECORD_BATCH_HEADER_SIZE, RECORD_BATCH_MAGIC,
        },
        LENGTH_PREFIX_SIZE,
    },
    stream::{
        ext::{AckMode, BeginEx, KafkaBeginEx, PartitionOffset, ProduceBeginEx, ProduceDataEx, OFFSET_LIVE},
        state, Begin, Data, DataEx, Frame, Signal, FLAG_FIN, FLAG_INIT,
    },
    utils::{combine_crc32c, to_crc32c, CRC32C},
};

use super::{
    sasl::{self, SaslDecoder, SaslEvent},
    ApplicationStream, Client, NetworkStream, SIGNAL_NEXT_REQUEST,
};

const TIMESTAMP_NONE: i64 = 0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProduceEncoder {
    SaslHandshake,
    SaslAuthenticate,
    Produce,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProduceDecoder {
    Sasl(SaslDecoder),
    ProduceResponse,
    Produce,
    ProduceTopics,
    ProduceTopic,
    ProducePartitions,
    ProducePartition,
    ProduceResponseTrailer,
    Reject,
    IgnoreAll,
}

/// What the next application Data frame continues.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProduceFlusher {
    Record,
    RecordContFin,
    IgnoreAll,
}

/// Record whose value is still arriving in continuation frames.
#[derive(Debug, Clone)]
struct OpenRecord {
    /// Where the value starts in the batch records.
    value_offset: usize,
    value_length: usize,
    value_crc32c: u32,
    deferred: usize,
    trailer: Bytes,
}

/// A record batch being assembled for the next Produce request.
#[derive(Debug, Default)]
pub struct ProduceBatch {
    records: Option<Slot>,
    record_count: i32,
    first_timestamp: i64,
    max_timestamp: i64,
    ack_mode: AckMode,
    open: Option<OpenRecord>,
}

impl ProduceBatch {
    pub fn is_empty(&self) -> bool {
        self.record_count == 0
    }

    /// Bytes held for the next request.
    pub fn len(&self) -> usize {
        self.records.as_ref().map_or(0, |records| records.len())
    }

    /// Whether `length` more record bytes, with up to `framing` bytes of
    /// record framing, still fit the batch slot.
    pub fn fits(&self, cx: &Context, length: usize, framing: usize) -> bool {
        self.len() + length + framing <= cx.slot_capacity()
    }

    pub fn is_streaming(&self) -> bool {
        self.open.is_some()
    }

    fn records(&mut self, cx: &mut Context) -> Result<&mut Slot> {
        if self.records.is_none() {
            self.records = Some(cx.acquire_slot().ok_or(Error::NoSlotAvailable)?);
        }
        self.records.as_mut().ok_or(Error::NoSlotAvailable)
    }

    /// Appends the start of a record, `deferred` value bytes are still to
    /// come and must hash to `value_crc32c` together with `value`.
    #[allow(clippy::too_many_arguments)]
    pub fn append_init(
        &mut self,
        cx: &mut Context,
        timestamp: i64,
        ack_mode: AckMode,
        key: Option<Bytes>,
        value: Option<&Bytes>,
        deferred: usize,
        value_crc32c: u32,
        headers: &[MessageHeader],
    ) -> Result<()> {
        if self.record_count == 0 {
            self.first_timestamp = timestamp;
            self.ack_mode = ack_mode;
        }

        let value_length = value.map_or(0, |value| value.len()) + deferred;
        let mut trailer = BytesMut::new();
        RecordTrailer {
            headers: headers.to_vec(),
        }
        .encode(&mut trailer)?;

        let mut header = RecordHeader {
            length: 0,
            attributes: 0,
            timestamp_delta: timestamp - self.first_timestamp,
            offset_delta: self.record_count,
            key,
            value_length: value.map_or(-1, |_| value_length as i32),
        };
        header.length = (header.sizeof_body() + value_length + trailer.len()) as i32;

        let records = self.records(cx)?;
        header.encode(&mut **records)?;
        let value_offset = records.len();
        if let Some(value) = value {
            records.extend_from_slice(value);
        }

        self.record_count += 1;
        self.max_timestamp = self.max_timestamp.max(timestamp);
        // strictest wins, the batch is acknowledged as a whole
        self.ack_mode = self.ack_mode.max(ack_mode);

        let trailer = trailer.freeze();
        if deferred == 0 {
            self.records(cx)?.extend_from_slice(&trailer);
        } else {
            self.open = Some(OpenRecord {
                value_offset,
                value_length,
                value_crc32c,
                deferred,
                trailer,
            });
        }
        Ok(())
    }

    /// Appends more value bytes of the open record, finishing it with its
    /// headers on `fin`.
    pub fn append_cont(&mut self, cx: &mut Context, value: &Bytes, fin: bool) -> Result<()> {
        let Some(open) = self.open.as_mut() else {
            return Err(Error::UnexpectedFrame("continuation without record".to_owned()));
        };
        open.deferred = open
            .deferred
            .checked_sub(value.len())
            .ok_or_else(|| Error::UnexpectedFrame("value longer than declared".to_owned()))?;
        let trailer = open.trailer.clone();
        let records = self.records(cx)?;
        records.extend_from_slice(value);
        if fin {
            records.extend_from_slice(&trailer);
            self.open = None;
        }
        Ok(())
    }

    /// Frames the batch, leaving it empty, and returns its bytes with the
    /// number of record bytes still to follow them for an open record.
    pub fn take(&mut self) -> Result<(Bytes, Option<OpenTail>)> {
        let records = self
            .records
            .take()
            .map(|mut records| records.split().freeze())
            .unwrap_or_default();
        let open = self.open.take();
        let pending = open
            .as_ref()
            .map_or(0, |open| open.deferred + open.trailer.len());
        let records_length = records.len() + pending;

        let header = RecordBatchHeader {
            base_offset: 0,
            length: (RECORD_BATCH_HEADER_SIZE - FIELD_LIMIT_RECORD_BATCH_LENGTH + records_length)
                as i32,
            partition_leader_epoch: -1,
            magic: RECORD_BATCH_MAGIC,
            crc: 0,
            attributes: if self.max_timestamp == TIMESTAMP_NONE {
                ATTRIBUTES_NO_TIMESTAMP
            } else {
                0
            },
            last_offset_delta: self.record_count - 1,
            first_timestamp: self.first_timestamp,
            max_timestamp: self.max_timestamp,
            producer_id: -1,
            producer_epoch: -1,
            base_sequence: -1,
            record_count: self.record_count,
        };
        let mut buffer = BytesMut::with_capacity(RECORD_BATCH_HEADER_SIZE + records.len());
        header.encode(&mut buffer)?;

        let crc = match &open {
            None => {
                let mut digest = CRC32C.digest();
                digest.update(&buffer[FIELD_OFFSET_ATTRIBUTES..]);
                digest.update(&records);
                digest.finalize()
            }
            Some(open) => {
                let mut digest = CRC32C.digest();
                digest.update(&buffer[FIELD_OFFSET_ATTRIBUTES..]);
                digest.update(&records[..open.value_offset]);
                let crc = combine_crc32c(digest.finalize(), open.value_crc32c, open.value_length);
                combine_crc32c(crc, to_crc32c(&open.trailer), open.trailer.len())
            }
        };
        buffer[FIELD_OFFSET_CRC..FIELD_OFFSET_ATTRIBUTES].copy_from_slice(&crc.to_be_bytes());
        buffer.extend_from_slice(&records);

        *self = ProduceBatch::default();
        Ok((
            buffer.freeze(),
            open.map(|open| OpenTail {
                deferred: open.deferred,
                trailer: open.trailer,
            }),
        ))
    }
}

/// The rest of a record whose request has already been sent.
#[derive(Debug, Clone)]
pub struct OpenTail {
    deferred: usize,
    trailer: Bytes,
}

pub struct ProduceClient {
    app: ApplicationStream,
    network: NetworkStream,
    route: ClientRouteRef,
    sasl: Option<SaslConfig>,
    topic: String,
    partition_id: i32,
    encoder: ProduceEncoder,
    decoder: ProduceDecoder,
    flusher: ProduceFlusher,
    flushable: bool,
    batch: ProduceBatch,
    streaming: Option<OpenTail>,
    /// Ack mode of the request in flight.
    encoded_ack_mode: AckMode,
    /// An unacknowledged request completes once it left the encode slot.
    awaiting_drain: bool,
    signaled_request_id: i32,
    response_bytes: i32,
    topics: i32,
    partitions: i32,
}

impl ProduceClient {
    pub fn new(
        begin: &Begin,
        ext: ProduceBeginEx,
        route: ClientRouteRef,
        sasl: Option<SaslConfig>,
    ) -> Self {
        let exit_id = route.borrow().exit_id;
        ProduceClient {
            app: ApplicationStream::new(begin),
            network: NetworkStream::new(begin.routed_id, exit_id),
            route,
            flushable: sasl.is_none(),
            encoder: if sasl.is_some() {
                ProduceEncoder::SaslHandshake
            } else {
                ProduceEncoder::Produce
            },
            decoder: if sasl.is_some() {
                ProduceDecoder::Sasl(SaslDecoder::HandshakeResponse)
            } else {
                ProduceDecoder::Reject
            },
            sasl,
            topic: ext.topic,
            partition_id: ext.partition.partition_id,
            flusher: ProduceFlusher::Record,
            batch: ProduceBatch::default(),
            streaming: None,
            encoded_ack_mode: AckMode::None,
            awaiting_drain: false,
            signaled_request_id: 0,
            response_bytes: 0,
            topics: 0,
            partitions: 0,
        }
    }

    fn on_application(&mut self, cx: &mut Context, frame: Frame) {
        match frame {
            Frame::Begin(_) => {
                self.app.on_begin();
                if self.flushable {
                    self.window_application(cx);
                }
                let affinity = self.app.affinity;
                let proxy = self
                    .route
                    .borrow()
                    .broker(affinity as i32)
                    .and_then(|broker| NetworkStream::proxy_ex(&broker.host, broker.port));
                self.network.begin(cx, affinity, proxy);
            }
            Frame::Data(data) => {
                if let Err(err) = self.on_application_data(cx, &data) {
                    self.cleanup(cx, err);
                }
            }
            Frame::End(_) => {
                self.app.state = state::closed_initial(self.app.state);
                self.end_network_if_flushed(cx);
            }
            Frame::Abort(_) => {
                self.app.state = state::closed_initial(self.app.state);
                self.network.abort(cx);
            }
            Frame::Window(window) => self.app.on_window(&window),
            Frame::Reset(_) => {
                self.app.state = state::closed_reply(self.app.state);
                self.network.reset(cx);
            }
            _ => {}
        }
    }

    fn on_application_data(&mut self, cx: &mut Context, data: &Data) -> Result<()> {
        self.app.received(data.sequence, data.reserved)?;

        match self.flusher {
            ProduceFlusher::IgnoreAll => Ok(()),
            ProduceFlusher::Record => {
                if data.flags & FLAG_INIT == 0 {
                    return Err(Error::UnexpectedFrame(format!(
                        "record continuation on {:#x} without init",
                        data.stream_id
                    )));
                }
                let Some(DataEx::Produce(ext)) = data.extension.clone() else {
                    return Err(Error::UnexpectedFrame(format!(
                        "record on {:#x} without produce extension",
                        data.stream_id
                    )));
                };
                self.on_record_init(cx, data, ext)
            }
            ProduceFlusher::RecordContFin => {
                if data.flags & FLAG_INIT != 0 {
                    return Err(Error::UnexpectedFrame(format!(
                        "record init on {:#x} before previous fin",
                        data.stream_id
                    )));
                }
                self.on_record_cont(cx, &data.payload, data.flags & FLAG_FIN != 0)
            }
        }
    }

    fn on_record_init(&mut self, cx: &mut Context, data: &Data, ext: ProduceDataEx) -> Result<()> {
        let framing = cx.config().produce_record_framing_size;
        let framing_size = ext.key.as_ref().map_or(0, |key| key.len())
            + ext
                .headers
                .iter()
                .map(|header| header.key.len() + header.value.as_ref().map_or(0, |value| value.len()))
                .sum::<usize>();
        if framing_size > framing as usize {
            return Err(Error::UnexpectedFrame(format!(
                "record framing {} exceeds {}",
                framing_size, framing
            )));
        }

        let fin = data.flags & FLAG_FIN != 0;
        let deferred = if fin { 0 } else { ext.deferred.max(0) as usize };
        // an empty complete value is a tombstone
        let value = if data.payload.is_empty() && deferred == 0 {
            None
        } else {
            Some(&data.payload)
        };

        let length = data.payload.len() + deferred;
        if !self.batch.is_empty() && !self.batch.fits(cx, length, framing as usize) {
            self.encode_request_if_necessary(cx);
        }

        tracing::trace!(
            "Record for {}[{}] with {} value bytes, {} deferred",
            self.topic,
            self.partition_id,
            data.payload.len(),
            deferred
        );
        self.batch.append_init(
            cx,
            ext.timestamp,
            ext.ack_mode,
            ext.key,
            value,
            deferred,
            ext.crc32c,
            &ext.headers,
        )?;

        if self.batch.is_streaming() {
            self.flusher = ProduceFlusher::RecordContFin;
            self.encode_request_if_necessary(cx);
        } else {
            self.signal_next_request_if_necessary(cx);
        }
        Ok(())
    }

    fn on_record_cont(&mut self, cx: &mut Context, value: &Bytes, fin: bool) -> Result<()> {
        match self.streaming.as_mut() {
            Some(tail) => {
                tail.deferred = tail
                    .deferred
                    .checked_sub(value.len())
                    .ok_or_else(|| Error::UnexpectedFrame("value longer than declared".to_owned()))?;
                let trailer = tail.trailer.clone();
                self.network.write(cx, value.clone())?;
                if fin {
                    self.streaming = None;
                    self.network.write(cx, trailer)?;
                    self.on_request_encoded(cx);
                }
                self.window_application(cx);
            }
            None => self.batch.append_cont(cx, value, fin)?,
        }

        if fin {
            self.flusher = ProduceFlusher::Record;
            self.signal_next_request_if_necessary(cx);
        }
        Ok(())
    }

    fn on_network(&mut self, cx: &mut Context, frame: Frame) {
        match frame {
            Frame::Begin(_) => {
                self.network.on_begin(cx);
                let ext = ProduceBeginEx {
                    transaction: None,
                    topic: self.topic.clone(),
                    partition: PartitionOffset::new(self.partition_id, OFFSET_LIVE),
                };
                self.app
                    .begin_reply(cx, Some(BeginEx::Kafka(KafkaBeginEx::Produce(ext))));
            }
            Frame::Data(data) => {
                self.on_network_data(cx, &data);
                if state::reply_closing(self.network.state) && !self.network.has_pending_decode() {
                    self.app.end_reply(cx);
                }
            }
            Frame::End(_) => {
                self.network.on_end();
                if !self.network.has_pending_decode() {
                    self.app.end_reply(cx);
                }
            }
            Frame::Abort(_) => {
                self.network.on_abort();
                self.cleanup_network(cx);
            }
            Frame::Reset(_) => {
                self.network.on_reset();
                self.cleanup_network(cx);
            }
            Frame::Window(window) => {
                if let Err(err) = self.network.on_window(cx, &window) {
                    self.cleanup(cx, err);
                    return;
                }
                if self.awaiting_drain && !self.network.has_pending_encode() {
                    self.on_decode_response(cx);
                } else if self.streaming.is_some() {
                    self.window_application(cx);
                }
                self.encode_request_if_necessary(cx);
            }
            _ => {}
        }
    }

    fn on_signal(&mut self, cx: &mut Context, signal: Signal) {
        if signal.signal_id == SIGNAL_NEXT_REQUEST {
            self.encode_request_if_necessary(cx);
        }
    }

    fn cleanup_network(&mut self, cx: &mut Context) {
        self.network.cleanup(cx);
        self.app.cleanup(cx, None);
        self.flusher = ProduceFlusher::IgnoreAll;
    }

    /// Credits the application with what the batch and the encode slot
    /// can still take.
    fn window_application(&mut self, cx: &mut Context) {
        let config = cx.config().clone();
        let buffered = self.batch.len() + self.network.pending_encode();
        self.app.window_initial(
            cx,
            buffered as i32,
            config.produce_record_framing_size,
            cx.slot_capacity() as i32,
        );
    }

    /// Schedules the request for the records batched so far, lingering
    /// when configured to.
    fn signal_next_request_if_necessary(&mut self, cx: &mut Context) {
        let next_request_id = self.network.next_request_id;
        if self.signaled_request_id <= next_request_id
            && self.network.is_idle()
            && !self.batch.is_empty()
        {
            let delay = cx.config().produce_max_request_millis;
            if delay == 0 {
                cx.signal_now(self.network.initial_id, SIGNAL_NEXT_REQUEST);
            } else {
                let at = cx.now() + delay;
                cx.signal_at(at, self.network.initial_id, SIGNAL_NEXT_REQUEST);
            }
            self.signaled_request_id = next_request_id + 1;
        }
    }

    fn end_network_if_flushed(&mut self, cx: &mut Context) {
        if state::initial_closed(self.app.state)
            && self.batch.is_empty()
            && self.streaming.is_none()
        {
            self.network.end(cx);
        }
    }

    fn encode_request_if_necessary(&mut self, cx: &mut Context) {
        if !state::initial_opened(self.network.state)
            || state::initial_closing(self.network.state)
            || !self.network.is_idle()
            || self.streaming.is_some()
        {
            return;
        }

        let correlation_id = self.network.next_request_id;
        let config = cx.config().clone();
        let result = match (self.encoder, &self.sasl) {
            (ProduceEncoder::SaslHandshake, Some(sasl)) => {
                sasl::encode_handshake(correlation_id, &config.client_id, sasl)
                    .and_then(|request| self.network.encode(cx, request))
            }
            (ProduceEncoder::SaslAuthenticate, Some(sasl)) => {
                sasl::encode_authenticate(correlation_id, &config.client_id, sasl)
                    .and_then(|request| self.network.encode(cx, request))
            }
            (ProduceEncoder::Produce, _) if self.flushable && !self.batch.is_empty() => {
                self.encode_produce_request(cx, correlation_id, &config)
            }
            _ => Ok(()),
        };

        if let Err(err) = result {
            self.cleanup(cx, err);
        }
    }

    fn encode_produce_request(
        &mut self,
        cx: &mut Context,
        correlation_id: i32,
        config: &GatewayConfig,
    ) -> Result<()> {
        let ack_mode = self.batch.ack_mode;
        let (batch, tail) = self.batch.take()?;
        let pending = tail
            .as_ref()
            .map_or(0, |tail| tail.deferred + tail.trailer.len());
        let request = encode_produce_request(
            correlation_id,
            config,
            &self.topic,
            self.partition_id,
            ack_mode,
            &batch,
            pending,
        )?;

        self.encoded_ack_mode = ack_mode;
        self.decoder = ProduceDecoder::ProduceResponse;
        self.network.encode(cx, request)?;

        match tail {
            Some(tail) => {
                self.streaming = Some(tail);
                self.window_application(cx);
            }
            None => self.on_request_encoded(cx),
        }
        Ok(())
    }

    /// The whole request has been handed to the network.
    fn on_request_encoded(&mut self, cx: &mut Context) {
        if self.encoded_ack_mode == AckMode::None {
            self.decoder = ProduceDecoder::Reject;
            if self.network.has_pending_encode() {
                self.awaiting_drain = true;
            } else {
                self.on_decode_response(cx);
            }
        }
    }

    fn on_sasl(&mut self, cx: &mut Context, event: SaslEvent) {
        match event {
            SaslEvent::Handshake(KafkaCode::None) => {
                self.encoder = ProduceEncoder::SaslAuthenticate;
            }
            SaslEvent::Authenticate(KafkaCode::None) => {
                self.encoder = ProduceEncoder::Produce;
                self.decoder = ProduceDecoder::Reject;
                self.flushable = true;
                self.window_application(cx);
            }
            SaslEvent::Handshake(error) | SaslEvent::Authenticate(error) => {
                tracing::warn!("SASL failed for {}[{}]: {:?}", self.topic, self.partition_id, error);
                self.app.cleanup(cx, Some(error.value()));
                self.network.end(cx);
                self.decoder = ProduceDecoder::IgnoreAll;
                return;
            }
        }
        self.network.next_response_id += 1;
        cx.signal_now(self.network.initial_id, SIGNAL_NEXT_REQUEST);
    }

    fn on_decode_partition(&mut self, cx: &mut Context, partition_id: i32, error_code: i16) {
        if error_code == KafkaCode::None.value() {
            tracing::trace!("Produced to {}[{}]", self.topic, partition_id);
            return;
        }
        tracing::warn!(
            "Produce to {}[{}] failed: {:?}",
            self.topic,
            partition_id,
            KafkaCode::from(error_code)
        );
        self.app.reset_initial(cx, Some(error_code));
        self.flusher = ProduceFlusher::IgnoreAll;
        self.batch = ProduceBatch::default();
        self.network.end(cx);
    }

    fn on_decode_response(&mut self, cx: &mut Context) {
        self.awaiting_drain = false;
        self.network.next_response_id += 1;
        if self.flusher != ProduceFlusher::IgnoreAll {
            self.window_application(cx);
        }
        if !self.batch.is_empty() {
            cx.signal_now(self.network.initial_id, SIGNAL_NEXT_REQUEST);
        }
        self.end_network_if_flushed(cx);
    }

    fn decode_produce_response(
        &mut self,
        cx: &mut Context,
        buffer: &Bytes,
        progress: usize,
        limit: usize,
    ) -> Result<usize> {
        match self.decoder {
            ProduceDecoder::ProduceResponse => {
                match try_wrap(parse_response_header, buffer, progress, limit)? {
                    Some((header, sizeof)) => {
                        tracing::trace!(
                            "Produce response {} for {}[{}]",
                            header.correlation_id,
                            self.topic,
                            self.partition_id
                        );
                        self.response_bytes = header.body_length();
                        self.decoder = ProduceDecoder::Produce;
                        Ok(progress + sizeof)
                    }
                    None => Ok(progress),
                }
            }
            ProduceDecoder::Produce => {
                match try_wrap(parse_produce_response_head, buffer, progress, limit)? {
                    Some((head, sizeof)) => {
                        self.response_bytes -= sizeof as i32;
                        self.topics = head.topic_count;
                        self.decoder = ProduceDecoder::ProduceTopics;
                        Ok(progress + sizeof)
                    }
                    None => Ok(progress),
                }
            }
            ProduceDecoder::ProduceTopics => {
                self.decoder = if self.topics <= 0 {
                    ProduceDecoder::ProduceResponseTrailer
                } else {
                    ProduceDecoder::ProduceTopic
                };
                Ok(progress)
            }
            ProduceDecoder::ProduceTopic => match try_wrap(parse_produce_topic, buffer, progress, limit)? {
                Some((topic, sizeof)) => {
                    self.response_bytes -= sizeof as i32;
                    self.partitions = topic.partition_count;
                    self.decoder = ProduceDecoder::ProducePartitions;
                    Ok(progress + sizeof)
                }
                None => Ok(progress),
            },
            ProduceDecoder::ProducePartitions => {
                if self.partitions <= 0 {
                    self.topics -= 1;
                    self.decoder = ProduceDecoder::ProduceTopics;
                } else {
                    self.decoder = ProduceDecoder::ProducePartition;
                }
                Ok(progress)
            }
            ProduceDecoder::ProducePartition => {
                match try_wrap(parse_produce_partition, buffer, progress, limit)? {
                    Some((partition, sizeof)) => {
                        self.response_bytes -= sizeof as i32;
                        self.partitions -= 1;
                        self.decoder = ProduceDecoder::ProducePartitions;
                        self.on_decode_partition(cx, partition.partition_index, partition.error_code);
                        Ok(progress + sizeof)
                    }
                    None => Ok(progress),
                }
            }
            ProduceDecoder::ProduceResponseTrailer => {
                match try_wrap(parse_produce_response_trailer, buffer, progress, limit)? {
                    Some((_, sizeof)) => {
                        self.response_bytes -= sizeof as i32;
                        self.decoder = ProduceDecoder::Reject;
                        self.on_decode_response(cx);
                        Ok(progress + sizeof)
                    }
                    None => Ok(progress),
                }
            }
            _ => Ok(progress),
        }
    }
}

impl Client for ProduceClient {
    type Decoder = ProduceDecoder;

    fn decoder(&self) -> ProduceDecoder {
        self.decoder
    }

    fn network(&mut self) -> &mut NetworkStream {
        &mut self.network
    }

    fn decode(
        &mut self,
        cx: &mut Context,
        buffer: &Bytes,
        progress: usize,
        limit: usize,
    ) -> Result<usize> {
        match self.decoder {
            ProduceDecoder::Sasl(mut decoder) => {
                let (progress, event) = sasl::decode(&mut decoder, buffer, progress, limit)?;
                self.decoder = ProduceDecoder::Sasl(decoder);
                if let Some(event) = event {
                    self.on_sasl(cx, event);
                }
                Ok(progress)
            }
            ProduceDecoder::Reject if progress < limit => {
                Err(Error::ParsingError(buffer.slice(progress..limit)))
            }
            ProduceDecoder::Reject => Ok(progress),
            ProduceDecoder::IgnoreAll => Ok(limit),
            _ => self.decode_produce_response(cx, buffer, progress, limit),
        }
    }

    fn reject(&mut self, cx: &mut Context) {
        self.decoder = ProduceDecoder::IgnoreAll;
        self.network.reset(cx);
    }

    fn cleanup(&mut self, cx: &mut Context, error: Error) {
        tracing::error!("Produce {}[{}] failed: {}", self.topic, self.partition_id, error);
        self.cleanup_network(cx);
    }
}

impl MessageConsumer for ProduceClient {
    fn on_message(&mut self, cx: &mut Context, frame: Frame) {
        match frame {
            Frame::Signal(signal) => self.on_signal(cx, signal),
            frame
                if frame.stream_id() == self.app.initial_id
                    || frame.stream_id() == self.app.reply_id =>
            {
                self.on_application(cx, frame)
            }
            frame if self.network.owns(frame.stream_id()) => self.on_network(cx, frame),
            frame => tracing::trace!("Produce ignoring {} {:#x}", frame.name(), frame.stream_id()),
        }
    }

    fn is_closed(&self) -> bool {
        self.app.is_closed() && !self.network.is_open()
    }
}

/// Produce request carrying `batch`, with `pending` more record bytes to
/// follow it on the wire.
#[instrument(name = "produce-request", level = "debug", skip(config, batch))]
pub fn encode_produce_request(
    correlation_id: i32,
    config: &GatewayConfig,
    topic: &str,
    partition_id: i32,
    ack_mode: AckMode,
    batch: &Bytes,
    pending: usize,
) -> Result<Bytes> {
    let record_set_length = batch.len() + pending;
    let head = ProduceRequestHead::new(
        correlation_id,
        &config.client_id,
        ack_mode.required_acks(),
        config.produce_max_response_millis,
        topic,
        partition_id,
        record_set_length as i32,
    );

    let mut buffer = BytesMut::with_capacity(64 + batch.len());
    buffer.put_i32(0);
    head.encode(&mut buffer)?;
    let size = (buffer.len() - LENGTH_PREFIX_SIZE + record_set_length) as i32;
    buffer[..LENGTH_PREFIX_SIZE].copy_from_slice(&size.to_be_bytes());
    buffer.extend_from_slice(batch);
    Ok(buffer.freeze())
}
