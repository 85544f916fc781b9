//! Fetch client for a single topic partition.
//!
//! Resolves a symbolic start offset with ListOffsets, then repeats Fetch
//! requests against the partition leader, turning each decoded record
//! into one application Data frame. Values too large for a decode slot
//! are delivered as init, continuation and fin fragments so memory stays
//! bounded by the slot size whatever the record size.
use std::collections::HashMap;

use bytes::Bytes;
use tracing::instrument;

use crate::{
    binding::{ClientRouteRef, SaslConfig},
    config::GatewayConfig,
    encode::varint_size,
    engine::{Context, MessageConsumer, SIGNAL_BUDGET_CREDIT},
    error::{Error, KafkaCode, Result},
    parser::try_wrap,
    protocol::{
        encode_request,
        fetch::response::{
            parse_aborted_transaction, parse_fetch_response_head, parse_partition_head,
            parse_record_set_length, parse_topic_head,
        },
        list_offsets::response::{
            parse_list_offsets_partition, parse_list_offsets_response_head,
            parse_list_offsets_topic,
        },
        parse_response_header,
        record::{
            parse_control_record_key, parse_record_batch_header, parse_record_header,
            parse_record_length, parse_record_trailer, RecordHeader, CONTROL_TYPE_ABORT,
            CONTROL_TYPE_COMMIT, FIELD_LIMIT_RECORD_BATCH_LENGTH,
        },
        FetchRequest, ListOffsetsRequest,
    },
    stream::{
        ext::{
            BeginEx, FetchBeginEx, FetchDataEx, FetchFlushEx, Isolation, KafkaBeginEx,
            PartitionOffset, Transaction, TransactionResult, OFFSET_HISTORICAL, OFFSET_LIVE,
        },
        filter::{self, Filter},
        state, Begin, DataEx, Flush, FlushEx, Frame, Signal, FLAGS_COMPLETE, FLAG_CONT,
        FLAG_FIN, FLAG_INIT, FLAG_SKIP,
    },
};

use super::{
    sasl::{self, SaslDecoder, SaslEvent},
    ApplicationStream, Client, NetworkStream, SIGNAL_NEXT_REQUEST,
};

/// Smallest claim worth making against a shared reply budget.
const CLAIM_MINIMUM: i32 = 1024;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FetchEncoder {
    SaslHandshake,
    SaslAuthenticate,
    Offsets,
    Fetch,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FetchDecoder {
    Sasl(SaslDecoder),
    OffsetsResponse,
    Offsets,
    OffsetsTopics { topics: i32 },
    OffsetsPartitions { topics: i32, partitions: i32 },
    FetchResponse,
    Fetch,
    FetchTopic,
    FetchPartition,
    FetchTransaction,
    FetchRecordSet,
    RecordBatch,
    RecordLength,
    Record,
    RecordInit,
    RecordValue,
    IgnoreRecord,
    IgnoreRecordBatch,
    IgnoreRecordSet,
    IgnoreAll,
}

/// Bytes still expected at each level of the response being decoded.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Cursor {
    response_bytes: i32,
    topics: i32,
    partitions: i32,
    transactions: i32,
    record_set_bytes: i32,
    record_batch_bytes: i32,
    records: i32,
    record_bytes: i32,
    record_value_bytes: i32,
}

impl Cursor {
    fn consume_response(&mut self, length: usize) {
        self.response_bytes -= length as i32;
    }

    fn consume_record_set(&mut self, length: usize) {
        self.consume_response(length);
        self.record_set_bytes -= length as i32;
    }

    fn consume_record_batch(&mut self, length: usize) {
        self.consume_record_set(length);
        self.record_batch_bytes -= length as i32;
    }

    fn consume_record(&mut self, length: usize) {
        self.consume_record_batch(length);
        self.record_bytes -= length as i32;
    }
}

/// Header fields of the batch whose records are being decoded.
#[derive(Debug, Clone, Copy, Default)]
struct Batch {
    base_offset: i64,
    last_offset: i64,
    timestamp: i64,
    producer_id: i64,
    aborted: bool,
    transactional: bool,
    control: bool,
}

/// Record header and where its value starts in the buffer.
struct RecordView {
    header: RecordHeader,
    sizeof_record: usize,
    value_offset: usize,
    offset: i64,
    timestamp: i64,
}

pub struct FetchClient {
    app: ApplicationStream,
    network: NetworkStream,
    route: ClientRouteRef,
    sasl: Option<SaslConfig>,
    topic: String,
    partition_id: i32,
    isolation: Isolation,
    filters: Vec<Filter>,
    next_offset: i64,
    stable_offset: i64,
    latest_offset: i64,
    initial_stable_offset: i64,
    initial_latest_offset: i64,
    encoder: FetchEncoder,
    decoder: FetchDecoder,
    cursor: Cursor,
    batch: Batch,
    partition_error: i16,
    record_offset: i64,
    aborted_transactions: HashMap<i64, i64>,
    frames_sent: usize,
    reply_debitor: Option<u64>,
}

impl FetchClient {
    pub fn new(
        begin: &Begin,
        ext: FetchBeginEx,
        route: ClientRouteRef,
        sasl: Option<SaslConfig>,
    ) -> Self {
        let exit_id = route.borrow().exit_id;
        let partition = ext.partition;
        FetchClient {
            app: ApplicationStream::new(begin),
            network: NetworkStream::new(begin.routed_id, exit_id),
            route,
            sasl,
            topic: ext.topic,
            partition_id: partition.partition_id,
            isolation: ext.isolation,
            filters: ext.filters,
            next_offset: partition.partition_offset,
            stable_offset: -1,
            latest_offset: -1,
            initial_stable_offset: -1,
            initial_latest_offset: -1,
            encoder: FetchEncoder::Fetch,
            decoder: FetchDecoder::FetchResponse,
            cursor: Cursor::default(),
            batch: Batch::default(),
            partition_error: 0,
            record_offset: 0,
            aborted_transactions: HashMap::new(),
            frames_sent: 0,
            reply_debitor: None,
        }
    }

    fn is_leader(&self) -> bool {
        self.route.borrow().leader(&self.topic, self.partition_id) == Some(self.app.affinity as i32)
    }

    fn partition(&self, offset: i64) -> PartitionOffset {
        PartitionOffset {
            partition_id: self.partition_id,
            partition_offset: offset,
            stable_offset: self.stable_offset,
            latest_offset: self.latest_offset,
        }
    }

    fn on_application(&mut self, cx: &mut Context, frame: Frame) {
        match frame {
            Frame::Begin(_) => self.on_application_begin(cx),
            Frame::Data(data) => {
                tracing::error!(
                    "Unexpected data on fetch stream {:#x}",
                    data.stream_id
                );
                self.cleanup_network(cx);
            }
            Frame::End(_) => {
                self.app.state = state::closed_initial(self.app.state);
                self.network.end(cx);
            }
            Frame::Abort(_) => {
                self.app.state = state::closed_initial(self.app.state);
                self.network.abort(cx);
            }
            Frame::Window(window) => {
                self.app.on_window(&window);
                if window.budget_id != 0 && self.reply_debitor.is_none() {
                    if cx.acquire_debitor(window.budget_id, self.app.reply_id) {
                        self.reply_debitor = Some(window.budget_id);
                    }
                }
                self.decode_parked(cx);
                self.end_application_if_drained(cx);
            }
            Frame::Reset(_) => {
                self.app.state = state::closed_reply(self.app.state);
                self.network.reset(cx);
            }
            _ => {}
        }
    }

    fn on_application_begin(&mut self, cx: &mut Context) {
        self.app.on_begin();

        if !self.is_leader() {
            tracing::warn!(
                "Rejecting fetch {}[{}], broker {} is not the leader",
                self.topic,
                self.partition_id,
                self.app.affinity
            );
            self.app
                .cleanup(cx, Some(KafkaCode::NotLeaderForPartition.value()));
            return;
        }

        if self.sasl.is_some() {
            self.encoder = FetchEncoder::SaslHandshake;
            self.decoder = FetchDecoder::Sasl(SaslDecoder::HandshakeResponse);
        } else if self.next_offset == OFFSET_LIVE || self.next_offset == OFFSET_HISTORICAL {
            self.encoder = FetchEncoder::Offsets;
            self.decoder = FetchDecoder::OffsetsResponse;
        } else {
            self.encoder = FetchEncoder::Fetch;
            self.decoder = FetchDecoder::FetchResponse;
        }

        let affinity = self.app.affinity;
        let proxy = self
            .route
            .borrow()
            .broker(affinity as i32)
            .and_then(|broker| NetworkStream::proxy_ex(&broker.host, broker.port));
        self.network.begin(cx, affinity, proxy);
    }

    fn on_network(&mut self, cx: &mut Context, frame: Frame) {
        match frame {
            Frame::Begin(_) => self.network.on_begin(cx),
            Frame::Data(data) => {
                self.on_network_data(cx, &data);
                self.end_application_if_drained(cx);
            }
            Frame::End(_) => {
                self.network.on_end();
                if !state::reply_opening(self.app.state) {
                    self.cleanup_network(cx);
                } else {
                    self.end_application_if_drained(cx);
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
            Frame::Window(window) => match self.network.on_window(cx, &window) {
                Ok(()) => self.encode_request_if_necessary(cx),
                Err(err) => self.cleanup(cx, err),
            },
            _ => {}
        }
    }

    fn on_signal(&mut self, cx: &mut Context, signal: Signal) {
        match signal.signal_id {
            SIGNAL_NEXT_REQUEST => self.encode_request_if_necessary(cx),
            SIGNAL_BUDGET_CREDIT => {
                self.decode_parked(cx);
                self.end_application_if_drained(cx);
            }
            _ => {}
        }
    }

    fn end_application_if_drained(&mut self, cx: &mut Context) {
        if state::reply_closing(self.network.state) && !self.network.has_pending_decode() {
            self.release_debitor(cx);
            self.app.end_reply(cx);
        }
    }

    fn release_debitor(&mut self, cx: &mut Context) {
        if let Some(budget_id) = self.reply_debitor.take() {
            cx.release_debitor(budget_id, self.app.reply_id);
        }
    }

    fn cleanup_network(&mut self, cx: &mut Context) {
        self.network.cleanup(cx);
        self.release_debitor(cx);
        self.app.cleanup(cx, None);
    }

    /// Fails the application with `error` and ends the connection.
    fn cleanup_application(&mut self, cx: &mut Context, error: KafkaCode) {
        self.release_debitor(cx);
        self.app.cleanup(cx, Some(error.value()));
        self.network.end(cx);
    }

    fn encode_request_if_necessary(&mut self, cx: &mut Context) {
        if !state::initial_opened(self.network.state)
            || state::initial_closing(self.network.state)
            || !self.network.is_idle()
            || self.decoder == FetchDecoder::IgnoreAll
        {
            return;
        }

        let correlation_id = self.network.next_request_id;
        let config = cx.config().clone();
        let request = match self.encoder {
            FetchEncoder::SaslHandshake | FetchEncoder::SaslAuthenticate => match &self.sasl {
                Some(sasl) if self.encoder == FetchEncoder::SaslHandshake => {
                    sasl::encode_handshake(correlation_id, &config.client_id, sasl)
                }
                Some(sasl) => sasl::encode_authenticate(correlation_id, &config.client_id, sasl),
                None => Err(Error::InvalidSaslMechanism),
            },
            FetchEncoder::Offsets => {
                self.decoder = FetchDecoder::OffsetsResponse;
                encode_offsets_request(
                    correlation_id,
                    &config.client_id,
                    &self.topic,
                    self.partition_id,
                    self.next_offset,
                    self.isolation,
                )
            }
            FetchEncoder::Fetch => {
                self.decoder = FetchDecoder::FetchResponse;
                let max_wait_ms = if state::reply_opened(self.app.state) {
                    config.fetch_max_wait_millis
                } else {
                    0
                };
                encode_fetch_request(
                    correlation_id,
                    &config,
                    &self.topic,
                    self.partition_id,
                    self.next_offset,
                    max_wait_ms,
                    self.isolation,
                )
            }
        };

        if let Err(err) = request.and_then(|bytes| self.network.encode(cx, bytes)) {
            self.cleanup(cx, err);
        }
    }

    fn on_sasl(&mut self, cx: &mut Context, event: SaslEvent) {
        match event {
            SaslEvent::Handshake(KafkaCode::None) => {
                self.encoder = FetchEncoder::SaslAuthenticate;
            }
            SaslEvent::Authenticate(KafkaCode::None) => {
                if self.next_offset == OFFSET_LIVE || self.next_offset == OFFSET_HISTORICAL {
                    self.encoder = FetchEncoder::Offsets;
                    self.decoder = FetchDecoder::OffsetsResponse;
                } else {
                    self.encoder = FetchEncoder::Fetch;
                    self.decoder = FetchDecoder::FetchResponse;
                }
            }
            SaslEvent::Handshake(error) | SaslEvent::Authenticate(error) => {
                tracing::warn!("SASL failed for {}[{}]: {:?}", self.topic, self.partition_id, error);
                self.cleanup_application(cx, error);
                self.decoder = FetchDecoder::IgnoreAll;
                return;
            }
        }
        self.network.next_response_id += 1;
        cx.signal_now(self.network.initial_id, SIGNAL_NEXT_REQUEST);
    }

    fn on_decode_offsets_partition(&mut self, cx: &mut Context, error: KafkaCode, offset: i64) {
        match error {
            KafkaCode::None => {
                tracing::debug!(
                    "Resolved {}[{}] offset {} to {}",
                    self.topic,
                    self.partition_id,
                    self.next_offset,
                    offset
                );
                self.next_offset = offset;
            }
            error => {
                tracing::warn!(
                    "ListOffsets {}[{}] failed: {:?}",
                    self.topic,
                    self.partition_id,
                    error
                );
                self.cleanup_application(cx, error);
                self.decoder = FetchDecoder::IgnoreAll;
            }
        }
    }

    /// The response is complete, schedule the next request while this
    /// broker still leads the partition.
    fn on_decode_response(&mut self, cx: &mut Context) {
        self.network.next_response_id += 1;

        if self.is_leader() {
            self.flush_application_if_necessary(cx);
            cx.signal_now(self.network.initial_id, SIGNAL_NEXT_REQUEST);
        } else {
            tracing::warn!(
                "Leader of {}[{}] moved away from {}",
                self.topic,
                self.partition_id,
                self.app.affinity
            );
            self.cleanup_application(cx, KafkaCode::NotLeaderForPartition);
        }
    }

    fn on_decode_partition(&mut self, cx: &mut Context, error: KafkaCode) {
        match error {
            KafkaCode::None => {
                self.app.window_initial(cx, 0, 0, 0);
                if !state::reply_opening(self.app.state) {
                    let ext = FetchBeginEx {
                        topic: self.topic.clone(),
                        partition: self.partition(self.next_offset),
                        filters: self.filters.clone(),
                        isolation: self.isolation,
                    };
                    self.app
                        .begin_reply(cx, Some(BeginEx::Kafka(KafkaBeginEx::Fetch(ext))));
                    self.initial_stable_offset = self.stable_offset;
                    self.initial_latest_offset = self.latest_offset;
                }
            }
            KafkaCode::OffsetOutOfRange => {
                tracing::warn!(
                    "Offset {} out of range for {}[{}], restarting from earliest",
                    self.next_offset,
                    self.topic,
                    self.partition_id
                );
                self.next_offset = OFFSET_HISTORICAL;
                self.encoder = FetchEncoder::Offsets;
            }
            error => {
                tracing::warn!(
                    "Fetch {}[{}] failed: {:?}",
                    self.topic,
                    self.partition_id,
                    error
                );
                if error == KafkaCode::NotLeaderForPartition {
                    self.refresh_meta(cx);
                }
                self.cleanup_application(cx, error);
                self.decoder = FetchDecoder::IgnoreAll;
            }
        }
    }

    /// Pokes the meta stream of this route so leadership is refreshed.
    fn refresh_meta(&mut self, cx: &mut Context) {
        let meta_initial_id = self.route.borrow().meta_initial_id;
        if let Some(stream_id) = meta_initial_id {
            cx.send(Frame::Flush(Flush {
                origin_id: self.app.origin_id,
                routed_id: self.app.routed_id,
                stream_id,
                ..Default::default()
            }));
        }
    }

    /// Tells the application it has caught up when nothing was delivered.
    fn flush_application_if_necessary(&mut self, cx: &mut Context) {
        if state::reply_opening(self.app.state)
            && !state::reply_closed(self.app.state)
            && self.cursor.records == 0
            && self.frames_sent == 0
            && self.next_offset - 1 >= self.initial_latest_offset
        {
            self.frames_sent += 1;
            let ext = FetchFlushEx {
                partition: PartitionOffset {
                    partition_id: self.partition_id,
                    partition_offset: self.next_offset - 1,
                    stable_offset: self.initial_stable_offset,
                    latest_offset: self.initial_latest_offset,
                },
                ..Default::default()
            };
            self.app.flush_reply(cx, Some(FlushEx::Fetch(ext)));
        }
    }

    fn on_decode_transaction(&mut self, cx: &mut Context, offset: i64, result: TransactionResult) {
        self.next_offset = offset + 1;
        self.frames_sent += 1;
        let ext = FetchFlushEx {
            partition: self.partition(offset),
            transactions: vec![Transaction {
                result,
                producer_id: self.batch.producer_id,
            }],
            filters: vec![],
        };
        self.app.flush_reply(cx, Some(FlushEx::Fetch(ext)));
    }

    fn send_record(&mut self, cx: &mut Context, flags: u8, reserved: i32, value: Bytes, ext: FetchDataEx) {
        self.frames_sent += 1;
        self.app
            .data_reply(cx, flags, reserved, value, Some(DataEx::Fetch(ext)));
    }

    /// Claims up to `maximum` from the shared reply budget, all of it when
    /// there is none.
    fn claim(&mut self, cx: &mut Context, maximum: i32) -> i32 {
        match self.reply_debitor {
            Some(budget_id) if maximum > 0 => cx.claim(
                budget_id,
                self.app.reply_id,
                maximum.min(CLAIM_MINIMUM),
                maximum,
            ),
            _ => maximum,
        }
    }

    fn decode_offsets_response(
        &mut self,
        cx: &mut Context,
        buffer: &Bytes,
        progress: usize,
        limit: usize,
    ) -> Result<usize> {
        match self.decoder {
            FetchDecoder::OffsetsResponse => {
                match try_wrap(parse_response_header, buffer, progress, limit)? {
                    Some((header, sizeof)) => {
                        self.cursor.response_bytes = header.body_length();
                        self.decoder = FetchDecoder::Offsets;
                        Ok(progress + sizeof)
                    }
                    None => Ok(progress),
                }
            }
            FetchDecoder::Offsets => {
                match try_wrap(parse_list_offsets_response_head, buffer, progress, limit)? {
                    Some((head, sizeof)) => {
                        self.cursor.consume_response(sizeof);
                        self.decoder = FetchDecoder::OffsetsTopics {
                            topics: head.topic_count,
                        };
                        Ok(progress + sizeof)
                    }
                    None => Ok(progress),
                }
            }
            FetchDecoder::OffsetsTopics { topics } => {
                if topics <= 0 {
                    self.network.next_response_id += 1;
                    if state::initial_closing(self.network.state) {
                        self.decoder = FetchDecoder::IgnoreAll;
                    } else {
                        self.encoder = FetchEncoder::Fetch;
                        self.decoder = FetchDecoder::FetchResponse;
                        cx.signal_now(self.network.initial_id, SIGNAL_NEXT_REQUEST);
                    }
                    return Ok(progress);
                }
                match try_wrap(parse_list_offsets_topic, buffer, progress, limit)? {
                    Some((topic, sizeof)) => {
                        self.cursor.consume_response(sizeof);
                        self.decoder = FetchDecoder::OffsetsPartitions {
                            topics,
                            partitions: topic.partition_count,
                        };
                        Ok(progress + sizeof)
                    }
                    None => Ok(progress),
                }
            }
            FetchDecoder::OffsetsPartitions { topics, partitions } => {
                if partitions <= 0 {
                    self.decoder = FetchDecoder::OffsetsTopics { topics: topics - 1 };
                    return Ok(progress);
                }
                match try_wrap(parse_list_offsets_partition, buffer, progress, limit)? {
                    Some((partition, sizeof)) => {
                        self.cursor.consume_response(sizeof);
                        self.decoder = FetchDecoder::OffsetsPartitions {
                            topics,
                            partitions: partitions - 1,
                        };
                        if partition.partition_index == self.partition_id {
                            self.on_decode_offsets_partition(
                                cx,
                                partition.error_code.into(),
                                partition.offset,
                            );
                        }
                        Ok(progress + sizeof)
                    }
                    None => Ok(progress),
                }
            }
            _ => Ok(progress),
        }
    }

    fn decode_fetch_response(
        &mut self,
        cx: &mut Context,
        buffer: &Bytes,
        progress: usize,
        limit: usize,
    ) -> Result<usize> {
        let length = limit - progress;
        match self.decoder {
            FetchDecoder::FetchResponse => {
                match try_wrap(parse_response_header, buffer, progress, limit)? {
                    Some((header, sizeof)) => {
                        tracing::trace!(
                            "Fetch response {} for {}[{}], {} bytes",
                            header.correlation_id,
                            self.topic,
                            self.partition_id,
                            header.length
                        );
                        self.cursor = Cursor {
                            response_bytes: header.body_length(),
                            ..Default::default()
                        };
                        self.decoder = FetchDecoder::Fetch;
                        Ok(progress + sizeof)
                    }
                    None => Ok(progress),
                }
            }
            FetchDecoder::Fetch => match try_wrap(parse_fetch_response_head, buffer, progress, limit)? {
                Some((head, sizeof)) => {
                    self.cursor.consume_response(sizeof);
                    self.cursor.topics = head.topic_count;
                    self.decoder = FetchDecoder::FetchTopic;
                    Ok(progress + sizeof)
                }
                None => Ok(progress),
            },
            FetchDecoder::FetchTopic => {
                if self.cursor.topics <= 0 {
                    self.decoder = FetchDecoder::FetchResponse;
                    self.on_decode_response(cx);
                    return Ok(progress);
                }
                match try_wrap(parse_topic_head, buffer, progress, limit)? {
                    Some((topic, sizeof)) => {
                        self.cursor.consume_response(sizeof);
                        self.cursor.partitions = topic.partition_count;
                        self.decoder = FetchDecoder::FetchPartition;
                        Ok(progress + sizeof)
                    }
                    None => Ok(progress),
                }
            }
            FetchDecoder::FetchPartition => {
                if self.cursor.partitions <= 0 {
                    self.cursor.topics -= 1;
                    self.decoder = FetchDecoder::FetchTopic;
                    return Ok(progress);
                }
                match try_wrap(parse_partition_head, buffer, progress, limit)? {
                    Some((partition, sizeof)) => {
                        self.cursor.consume_response(sizeof);
                        self.stable_offset = partition.last_stable_offset;
                        self.latest_offset = partition.high_watermark - 1;
                        self.partition_error = partition.error_code;
                        self.cursor.transactions = partition.aborted_transaction_count;
                        self.aborted_transactions.clear();
                        self.decoder = FetchDecoder::FetchTransaction;
                        tracing::trace!(
                            "Fetch partition {}[{}] error {} stable {} latest {}",
                            self.topic,
                            partition.partition_index,
                            partition.error_code,
                            self.stable_offset,
                            self.latest_offset
                        );
                        self.on_decode_partition(cx, partition.error_code.into());
                        Ok(progress + sizeof)
                    }
                    None => Ok(progress),
                }
            }
            FetchDecoder::FetchTransaction => {
                if self.cursor.transactions <= 0 {
                    self.decoder = FetchDecoder::FetchRecordSet;
                    return Ok(progress);
                }
                match try_wrap(parse_aborted_transaction, buffer, progress, limit)? {
                    Some((transaction, sizeof)) => {
                        self.cursor.consume_response(sizeof);
                        self.cursor.transactions -= 1;
                        self.aborted_transactions
                            .insert(transaction.first_offset, transaction.producer_id);
                        Ok(progress + sizeof)
                    }
                    None => Ok(progress),
                }
            }
            FetchDecoder::FetchRecordSet => {
                match try_wrap(parse_record_set_length, buffer, progress, limit)? {
                    Some((record_set_length, sizeof)) => {
                        self.cursor.consume_response(sizeof);
                        self.cursor.record_set_bytes = record_set_length.max(0);
                        self.decoder = if self.partition_error != 0 || record_set_length <= 0 {
                            FetchDecoder::IgnoreRecordSet
                        } else {
                            FetchDecoder::RecordBatch
                        };
                        Ok(progress + sizeof)
                    }
                    None => Ok(progress),
                }
            }
            FetchDecoder::RecordBatch => {
                if self.cursor.record_set_bytes <= 0 {
                    self.cursor.partitions -= 1;
                    self.decoder = FetchDecoder::FetchPartition;
                    return Ok(progress);
                }
                let record_set_bytes = self.cursor.record_set_bytes as usize;
                let bound = limit.min(progress + record_set_bytes);
                match try_wrap(parse_record_batch_header, buffer, progress, bound)? {
                    Some((header, sizeof)) => {
                        tracing::trace!(
                            "Record batch {}..={} of {}[{}]",
                            header.base_offset,
                            header.last_offset(),
                            self.topic,
                            self.partition_id
                        );
                        self.batch = Batch {
                            base_offset: header.base_offset,
                            last_offset: header.last_offset(),
                            timestamp: header.first_timestamp,
                            producer_id: header.producer_id,
                            aborted: self.aborted_transactions.get(&header.base_offset)
                                == Some(&header.producer_id),
                            transactional: header.is_transactional(),
                            control: header.is_control(),
                        };
                        self.cursor.records = header.record_count;
                        self.cursor.record_batch_bytes = header.length;
                        self.cursor.consume_record_batch(sizeof - FIELD_LIMIT_RECORD_BATCH_LENGTH);
                        self.cursor.consume_record_set(FIELD_LIMIT_RECORD_BATCH_LENGTH);

                        self.decoder = if header.is_compressed()
                            || (header.is_control() && !header.is_transactional())
                        {
                            FetchDecoder::IgnoreRecordBatch
                        } else {
                            FetchDecoder::RecordLength
                        };
                        Ok(progress + sizeof)
                    }
                    None => {
                        if length >= record_set_bytes {
                            tracing::trace!("Truncated record batch, ignoring rest of record set");
                            self.decoder = FetchDecoder::IgnoreRecordSet;
                        }
                        Ok(progress)
                    }
                }
            }
            FetchDecoder::RecordLength => self.decode_record_length(cx, buffer, progress, limit),
            FetchDecoder::Record => self.decode_record(cx, buffer, progress, limit),
            FetchDecoder::RecordInit => {
                if length < cx.slot_capacity() {
                    return Ok(progress);
                }
                match self.wrap_record(buffer, progress, limit)? {
                    Some(record) => {
                        if record.offset < self.next_offset {
                            self.cursor.record_bytes = record.sizeof_record as i32;
                            self.decoder = FetchDecoder::IgnoreRecord;
                            return Ok(progress);
                        }
                        let value_size = record.header.value_length.max(0);
                        let value_reserved = value_size + self.app.reply.padding;
                        let reserved_max = value_reserved.min(self.app.reply.budget());
                        self.decode_record_init(cx, buffer, progress, limit, record, reserved_max)
                    }
                    None => Ok(progress),
                }
            }
            FetchDecoder::RecordValue => self.decode_record_value(cx, buffer, progress, limit),
            FetchDecoder::IgnoreRecord => {
                let consumed = length.min(self.cursor.record_bytes.max(0) as usize);
                self.cursor.consume_record(consumed);
                if self.cursor.record_bytes <= 0 {
                    self.cursor.records -= 1;
                    self.decoder = FetchDecoder::RecordLength;
                }
                Ok(progress + consumed)
            }
            FetchDecoder::IgnoreRecordBatch => {
                let remaining = self
                    .cursor
                    .record_batch_bytes
                    .min(self.cursor.record_set_bytes)
                    .max(0) as usize;
                let consumed = length.min(remaining);
                self.cursor.consume_record_batch(consumed);
                if self.cursor.record_batch_bytes <= 0 {
                    self.next_offset = self.next_offset.max(self.batch.last_offset + 1);
                    self.decoder = FetchDecoder::RecordBatch;
                } else if self.cursor.record_set_bytes <= 0 {
                    self.decoder = FetchDecoder::RecordBatch;
                }
                Ok(progress + consumed)
            }
            FetchDecoder::IgnoreRecordSet => {
                let consumed = length.min(self.cursor.record_set_bytes.max(0) as usize);
                self.cursor.consume_record_set(consumed);
                if self.cursor.record_set_bytes <= 0 {
                    self.cursor.partitions -= 1;
                    self.decoder = FetchDecoder::FetchPartition;
                }
                Ok(progress + consumed)
            }
            FetchDecoder::IgnoreAll => Ok(limit),
            _ => Ok(progress),
        }
    }

    fn decode_record_length(
        &mut self,
        cx: &mut Context,
        buffer: &Bytes,
        progress: usize,
        limit: usize,
    ) -> Result<usize> {
        if self.cursor.records <= 0 {
            self.next_offset = self.next_offset.max(self.batch.last_offset + 1);
            self.decoder = FetchDecoder::RecordBatch;
            return Ok(progress);
        }

        let length = limit - progress;
        if length == 0 {
            return Ok(progress);
        }

        // a record length cut off by the end of the record set never completes
        let remaining = self
            .cursor
            .record_batch_bytes
            .min(self.cursor.record_set_bytes)
            .max(0) as usize;
        let bound = limit.min(progress + remaining);
        match try_wrap(parse_record_length, buffer, progress, bound)? {
            Some((record_length, sizeof)) => {
                let sizeof_record = sizeof + record_length.max(0) as usize;
                if sizeof_record > self.cursor.record_set_bytes.max(0) as usize {
                    tracing::trace!("Truncated record, ignoring rest of record set");
                    self.decoder = FetchDecoder::IgnoreRecordSet;
                } else if length >= sizeof_record {
                    self.decoder = FetchDecoder::Record;
                } else if sizeof_record > cx.slot_capacity() {
                    self.decoder = FetchDecoder::RecordInit;
                }
            }
            None if length >= remaining => {
                self.decoder = if self.cursor.record_set_bytes < self.cursor.record_batch_bytes {
                    FetchDecoder::IgnoreRecordSet
                } else {
                    FetchDecoder::IgnoreRecordBatch
                };
            }
            None => {}
        }
        Ok(progress)
    }

    fn wrap_record(&self, buffer: &Bytes, progress: usize, limit: usize) -> Result<Option<RecordView>> {
        Ok(
            try_wrap(parse_record_header, buffer, progress, limit)?.map(|(header, sizeof)| {
                RecordView {
                    sizeof_record: varint_size(header.length) + header.length.max(0) as usize,
                    value_offset: progress + sizeof,
                    offset: self.batch.base_offset + header.offset_delta as i64,
                    timestamp: self.batch.timestamp + header.timestamp_delta,
                    header,
                }
            }),
        )
    }

    fn decode_record(
        &mut self,
        cx: &mut Context,
        buffer: &Bytes,
        progress: usize,
        limit: usize,
    ) -> Result<usize> {
        let Some(record) = self.wrap_record(buffer, progress, limit)? else {
            return Ok(progress);
        };
        self.record_offset = record.offset;
        tracing::trace!("Record {} of {}[{}]", record.offset, self.topic, self.partition_id);

        if record.offset < self.next_offset {
            self.cursor.record_bytes = record.sizeof_record as i32;
            self.decoder = FetchDecoder::IgnoreRecord;
            return Ok(progress);
        }

        if self.batch.control && self.batch.transactional {
            let control = match &record.header.key {
                Some(key) => try_wrap(parse_control_record_key, key, 0, key.len())?,
                None => None,
            };
            match control {
                Some((key, _)) if key.version == 0 && key.control_type == CONTROL_TYPE_ABORT => {
                    self.on_decode_transaction(cx, record.offset, TransactionResult::Abort)
                }
                Some((key, _)) if key.version == 0 && key.control_type == CONTROL_TYPE_COMMIT => {
                    self.on_decode_transaction(cx, record.offset, TransactionResult::Commit)
                }
                _ => self.next_offset = self.next_offset.max(record.offset + 1),
            }
            self.cursor.record_bytes = record.sizeof_record as i32;
            self.decoder = FetchDecoder::IgnoreRecord;
            return Ok(progress);
        }

        let record_limit = progress + record.sizeof_record;
        if record_limit > limit {
            return Ok(progress);
        }

        let value_length = record.header.value_length;
        let value_size = value_length.max(0);
        let value_limit = record.value_offset + value_size as usize;
        let Some((trailer, _)) = try_wrap(parse_record_trailer, buffer, value_limit, record_limit)? else {
            return Err(Error::ParsingError(buffer.slice(progress..record_limit)));
        };

        let filters = filter::evaluate(&self.filters, record.header.key.as_ref(), &trailer.headers);
        if filters == 0 {
            tracing::trace!("Record {} filtered out", record.offset);
            self.next_offset = record.offset + 1;
            self.consume_whole_record(record.sizeof_record);
            return Ok(record_limit);
        }

        let value_reserved = value_size + self.app.reply.padding;
        if value_reserved > self.app.reply.budget() {
            // never fits the window whole, deliver it in fragments
            if value_reserved > self.app.reply.maximum && self.app.reply.budget() > self.app.reply.padding {
                let reserved_max = self.app.reply.budget();
                return self.decode_record_init(cx, buffer, progress, limit, record, reserved_max);
            }
            return Ok(progress);
        }

        let claimed = self.claim(cx, value_reserved);
        if claimed == 0 && value_reserved != 0 {
            return Ok(progress);
        }
        if claimed < value_reserved {
            return self.emit_record_init(cx, buffer, progress, limit, record, claimed);
        }

        let value = if value_length >= 0 {
            buffer.slice(record.value_offset..value_limit)
        } else {
            Bytes::new()
        };
        let flags = if self.batch.aborted {
            FLAGS_COMPLETE | FLAG_SKIP
        } else {
            FLAGS_COMPLETE
        };
        let ext = FetchDataEx {
            deferred: 0,
            timestamp: record.timestamp,
            headers_size_max: 0,
            producer_id: self.batch.producer_id,
            filters,
            partition: self.partition(record.offset),
            key: record.header.key,
            headers: trailer.headers,
        };
        self.next_offset = record.offset + 1;
        self.send_record(cx, flags, claimed, value, ext);
        self.consume_whole_record(record.sizeof_record);
        Ok(record_limit)
    }

    fn consume_whole_record(&mut self, sizeof_record: usize) {
        self.cursor.consume_record_batch(sizeof_record);
        self.cursor.records -= 1;
        self.decoder = FetchDecoder::RecordLength;
    }

    fn decode_record_init(
        &mut self,
        cx: &mut Context,
        buffer: &Bytes,
        progress: usize,
        limit: usize,
        record: RecordView,
        reserved_max: i32,
    ) -> Result<usize> {
        let value_size = record.header.value_length.max(0);
        let available = limit
            .saturating_sub(record.value_offset)
            .min(value_size as usize) as i32;
        let reserved_max = reserved_max.min(available + self.app.reply.padding);
        if reserved_max <= self.app.reply.padding && value_size > 0 {
            return Ok(progress);
        }
        let claimed = self.claim(cx, reserved_max);
        if claimed == 0 && reserved_max != 0 {
            return Ok(progress);
        }
        self.emit_record_init(cx, buffer, progress, limit, record, claimed)
    }

    /// Delivers the record header with as much of the value as `claimed`
    /// allows, the rest follows from [`FetchDecoder::RecordValue`].
    fn emit_record_init(
        &mut self,
        cx: &mut Context,
        buffer: &Bytes,
        progress: usize,
        limit: usize,
        record: RecordView,
        claimed: i32,
    ) -> Result<usize> {
        let value_length = record.header.value_length;
        let value_size = value_length.max(0) as usize;
        let value_length_max = (claimed - self.app.reply.padding).max(0) as usize;
        let value_limit = limit.min(record.value_offset + value_size.min(value_length_max));
        let value = buffer.slice(record.value_offset..value_limit);
        let value_progress = value.len();
        let record_progress = record.value_offset - progress + value_progress;

        let sizeof_length = varint_size(record.header.length);
        let headers_length = (record.header.length.max(0) as usize)
            .saturating_sub(record.value_offset - progress - sizeof_length)
            .saturating_sub(value_size);
        let flags = if self.batch.aborted {
            FLAG_INIT | FLAG_SKIP
        } else {
            FLAG_INIT
        };
        let ext = FetchDataEx {
            deferred: (value_size - value_progress) as i32,
            timestamp: record.timestamp,
            headers_size_max: headers_length as i32 + 3,
            producer_id: self.batch.producer_id,
            filters: -1,
            partition: self.partition(record.offset),
            key: record.header.key,
            headers: vec![],
        };
        tracing::trace!(
            "Record {} init with {} of {} value bytes",
            record.offset,
            value_progress,
            value_size
        );
        self.send_record(cx, flags, claimed, value, ext);

        self.record_offset = record.offset;
        self.cursor.record_bytes = record.sizeof_record as i32;
        self.cursor.record_value_bytes = (value_size - value_progress) as i32;
        self.cursor.consume_record(record_progress);
        self.decoder = FetchDecoder::RecordValue;
        Ok(progress + record_progress)
    }

    fn decode_record_value(
        &mut self,
        cx: &mut Context,
        buffer: &Bytes,
        progress: usize,
        limit: usize,
    ) -> Result<usize> {
        let length = limit - progress;
        let record_bytes = self.cursor.record_bytes.max(0) as usize;
        let value_bytes = self.cursor.record_value_bytes.max(0) as usize;
        if length < cx.slot_capacity().min(record_bytes) {
            return Ok(progress);
        }

        let value_available = length.min(value_bytes);
        if value_available == 0 && length < record_bytes {
            return Ok(progress);
        }
        let value_reserved = value_available as i32 + self.app.reply.padding;
        let reserved_max = value_reserved.min(self.app.reply.budget());
        if reserved_max <= self.app.reply.padding && value_bytes > 0 {
            return Ok(progress);
        }
        let claimed = self.claim(cx, reserved_max);
        if claimed == 0 && reserved_max != 0 {
            return Ok(progress);
        }
        let value_length_max = (claimed - self.app.reply.padding).max(0) as usize;

        if length >= record_bytes && value_length_max >= value_bytes {
            let value_limit = progress + value_bytes;
            let record_limit = progress + record_bytes;
            let Some((trailer, _)) = try_wrap(parse_record_trailer, buffer, value_limit, record_limit)? else {
                return Err(Error::ParsingError(buffer.slice(progress..record_limit)));
            };
            let ext = FetchDataEx {
                filters: -1,
                partition: self.partition(self.record_offset),
                headers: trailer.headers,
                ..Default::default()
            };
            self.next_offset = self.record_offset + 1;
            self.send_record(cx, FLAG_FIN, claimed, buffer.slice(progress..value_limit), ext);
            self.cursor.consume_record(record_bytes);
            self.cursor.record_value_bytes = 0;
            self.cursor.records -= 1;
            self.decoder = FetchDecoder::RecordLength;
            Ok(record_limit)
        } else {
            let value_progress = value_length_max.min(value_bytes).min(length);
            self.app.data_reply(
                cx,
                FLAG_CONT,
                claimed,
                buffer.slice(progress..progress + value_progress),
                None,
            );
            self.cursor.consume_record(value_progress);
            self.cursor.record_value_bytes -= value_progress as i32;
            Ok(progress + value_progress)
        }
    }
}

impl Client for FetchClient {
    type Decoder = FetchDecoder;

    fn decoder(&self) -> FetchDecoder {
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
            FetchDecoder::Sasl(mut decoder) => {
                let (progress, event) = sasl::decode(&mut decoder, buffer, progress, limit)?;
                self.decoder = FetchDecoder::Sasl(decoder);
                if let Some(event) = event {
                    self.on_sasl(cx, event);
                }
                Ok(progress)
            }
            FetchDecoder::OffsetsResponse
            | FetchDecoder::Offsets
            | FetchDecoder::OffsetsTopics { .. }
            | FetchDecoder::OffsetsPartitions { .. } => {
                self.decode_offsets_response(cx, buffer, progress, limit)
            }
            _ => self.decode_fetch_response(cx, buffer, progress, limit),
        }
    }

    fn reject(&mut self, cx: &mut Context) {
        self.decoder = FetchDecoder::IgnoreAll;
        self.cleanup_network(cx);
    }

    fn cleanup(&mut self, cx: &mut Context, error: Error) {
        tracing::error!("Fetch {}[{}] failed: {}", self.topic, self.partition_id, error);
        self.cleanup_network(cx);
    }
}

impl MessageConsumer for FetchClient {
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
            frame => tracing::trace!("Fetch ignoring {} {:#x}", frame.name(), frame.stream_id()),
        }
    }

    fn is_closed(&self) -> bool {
        self.app.is_closed() && !self.network.is_open()
    }
}

#[instrument(name = "offsets-request", level = "debug", skip(client_id))]
pub fn encode_offsets_request(
    correlation_id: i32,
    client_id: &str,
    topic: &str,
    partition_id: i32,
    timestamp: i64,
    isolation: Isolation,
) -> Result<Bytes> {
    let mut request = ListOffsetsRequest::new(correlation_id, client_id, isolation.level());
    request.add(topic, partition_id, timestamp);
    encode_request(&request)
}

#[instrument(name = "fetch-request", level = "debug", skip(config))]
pub fn encode_fetch_request(
    correlation_id: i32,
    config: &GatewayConfig,
    topic: &str,
    partition_id: i32,
    offset: i64,
    max_wait_ms: i32,
    isolation: Isolation,
) -> Result<Bytes> {
    let mut request = FetchRequest::new(
        correlation_id,
        &config.client_id,
        max_wait_ms,
        1,
        config.fetch_max_bytes,
        isolation.level(),
    );
    request.add(topic, partition_id, offset, config.fetch_partition_max_bytes);
    encode_request(&request)
}
