//! Merge engine.
//!
//! A [`MergedStream`] serves one application stream for a whole topic. It
//! learns the topic through a describe stream and a meta stream, then opens
//! one fetch and/or produce stream per partition, each addressed to the
//! partition leader, and relays between them and the application.
//!
//! Records of one partition reach the application in partition order, no
//! order is kept across partitions. Every relayed record carries the next
//! offset of each partition seen so far. All partition replies draw their
//! window from one budget the application's reply window credits.

use std::collections::BTreeMap;

use bytes::Bytes;

use crate::{
    client::ApplicationStream,
    engine::{Context, MessageConsumer},
    error::KafkaCode,
    partitioner::{compute_partition, Partitioner},
    stream::{
        ext::{
            AckMode, BeginEx, Capabilities, DescribeBeginEx, FetchBeginEx, FetchDataEx,
            FetchFlushEx, Isolation, KafkaBeginEx, MergedBeginEx, MergedDataEx,
            MergedFetchDataEx, MergedFlushEx, MetaBeginEx, PartitionLeader, PartitionOffset,
            ProduceBeginEx, ProduceDataEx, OFFSET_HISTORICAL, OFFSET_LIVE,
        },
        filter::Filter,
        state, Abort, Begin, Data, DataEx, End, Flow, Flush, FlushEx, Frame, Reset, Window,
    },
};

/// Window granted to the describe and meta replies.
const SIDE_REPLY_MAX: i32 = 8192;

const TOPIC_CONFIGS: [&str; 11] = [
    "cleanup.policy",
    "max.message.bytes",
    "segment.bytes",
    "segment.index.bytes",
    "segment.ms",
    "retention.bytes",
    "retention.ms",
    "delete.retention.ms",
    "min.compaction.lag.ms",
    "max.compaction.lag.ms",
    "min.cleanable.dirty.ratio",
];

/// How far the application wants to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MaximumOffset {
    Live,
    /// Up to the latest offset each partition had when it was opened.
    Historical,
}

impl MaximumOffset {
    fn of(partitions: &[PartitionOffset]) -> Self {
        if !partitions.is_empty()
            && partitions
                .iter()
                .all(|partition| partition.latest_offset == OFFSET_HISTORICAL)
        {
            MaximumOffset::Historical
        } else {
            MaximumOffset::Live
        }
    }

    fn value(self) -> i64 {
        match self {
            MaximumOffset::Live => OFFSET_LIVE,
            MaximumOffset::Historical => OFFSET_HISTORICAL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Describe,
    Meta,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Fetch,
    Produce,
}

/// A stream the merged stream opens itself: we send on `initial_id` and
/// receive on `reply_id`.
#[derive(Debug, Default)]
struct Unmerged {
    partition_id: i32,
    leader_id: i32,
    origin_id: u64,
    routed_id: u64,
    authorization: u64,
    initial_id: u64,
    reply_id: u64,
    state: u8,
    initial: Flow,
    reply: Flow,
    /// Ended on purpose, dropped once the reply closes.
    ending: bool,
}

impl Unmerged {
    fn new(partition_id: i32, leader_id: i32) -> Self {
        Unmerged {
            partition_id,
            leader_id,
            ..Default::default()
        }
    }

    fn owns(&self, stream_id: u64) -> bool {
        self.initial_id != 0 && (stream_id == self.initial_id || stream_id == self.reply_id)
    }

    fn begin(
        &mut self,
        cx: &mut Context,
        origin_id: u64,
        routed_id: u64,
        authorization: u64,
        extension: KafkaBeginEx,
    ) {
        self.origin_id = origin_id;
        self.routed_id = routed_id;
        self.authorization = authorization;
        self.initial_id = cx.supply_initial_id();
        self.reply_id = cx.supply_reply_id(self.initial_id);
        self.state = state::opening_initial(0);
        self.initial = Flow::default();
        self.reply = Flow::default();
        self.ending = false;
        let trace_id = cx.supply_trace_id();
        cx.send(Frame::Begin(Begin {
            origin_id,
            routed_id,
            stream_id: self.initial_id,
            trace_id,
            authorization,
            affinity: self.leader_id as i64,
            extension: Some(BeginEx::Kafka(extension)),
            ..Default::default()
        }));
    }

    fn data(
        &mut self,
        cx: &mut Context,
        flags: u8,
        budget_id: u64,
        reserved: i32,
        payload: Bytes,
        extension: Option<DataEx>,
    ) {
        cx.send(Frame::Data(Data {
            origin_id: self.origin_id,
            routed_id: self.routed_id,
            stream_id: self.initial_id,
            sequence: self.initial.sequence,
            acknowledge: self.initial.acknowledge,
            maximum: self.initial.maximum,
            authorization: self.authorization,
            flags,
            budget_id,
            reserved,
            payload,
            extension,
            ..Default::default()
        }));
        self.initial.sequence += reserved as i64;
    }

    fn flush(&mut self, cx: &mut Context) {
        if !state::initial_opening(self.state) || state::initial_closed(self.state) {
            return;
        }
        cx.send(Frame::Flush(Flush {
            origin_id: self.origin_id,
            routed_id: self.routed_id,
            stream_id: self.initial_id,
            sequence: self.initial.sequence,
            acknowledge: self.initial.acknowledge,
            maximum: self.initial.maximum,
            authorization: self.authorization,
            ..Default::default()
        }));
    }

    fn end(&mut self, cx: &mut Context) {
        if !state::initial_opening(self.state) || state::initial_closed(self.state) {
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
            authorization: self.authorization,
            ..Default::default()
        }));
    }

    fn abort(&mut self, cx: &mut Context) {
        if !state::initial_opening(self.state) || state::initial_closed(self.state) {
            return;
        }
        self.state = state::closed_initial(self.state);
        cx.send(Frame::Abort(Abort {
            origin_id: self.origin_id,
            routed_id: self.routed_id,
            stream_id: self.initial_id,
            sequence: self.initial.sequence,
            acknowledge: self.initial.acknowledge,
            maximum: self.initial.maximum,
            authorization: self.authorization,
            ..Default::default()
        }));
    }

    fn reset(&mut self, cx: &mut Context) {
        if !state::initial_opening(self.state) || state::reply_closed(self.state) {
            return;
        }
        self.state = state::closed_reply(self.state);
        cx.send(Frame::Reset(Reset {
            origin_id: self.origin_id,
            routed_id: self.routed_id,
            stream_id: self.reply_id,
            sequence: self.reply.sequence,
            acknowledge: self.reply.acknowledge,
            maximum: self.reply.maximum,
            authorization: self.authorization,
            extension: None,
            ..Default::default()
        }));
    }

    /// Ends what we send and refuses what we would receive.
    fn close(&mut self, cx: &mut Context) {
        self.end(cx);
        self.reset(cx);
    }

    fn cleanup(&mut self, cx: &mut Context) {
        self.abort(cx);
        self.reset(cx);
    }

    fn window(&mut self, cx: &mut Context, no_ack: i32, maximum: i32, budget_id: u64, padding: i32) {
        if !state::reply_opening(self.state) || state::reply_closing(self.state) {
            return;
        }
        let changed = self.reply.acknowledge_up_to(no_ack, maximum);
        if changed || !state::reply_opened(self.state) || budget_id != self.reply.budget_id {
            self.state = state::opened_reply(self.state);
            self.reply.budget_id = budget_id;
            self.reply.padding = padding;
            cx.send(Frame::Window(Window {
                origin_id: self.origin_id,
                routed_id: self.routed_id,
                stream_id: self.reply_id,
                sequence: self.reply.sequence,
                acknowledge: self.reply.acknowledge,
                maximum: self.reply.maximum,
                authorization: self.authorization,
                budget_id,
                padding,
                minimum: 0,
                ..Default::default()
            }));
        }
    }

    fn no_ack(&self) -> i32 {
        (self.initial.sequence - self.initial.acknowledge) as i32
    }
}

/// One application stream for a whole topic.
pub struct MergedStream {
    app: ApplicationStream,
    binding_id: u64,
    topic: String,
    capabilities: Capabilities,
    filters: Vec<Filter>,
    isolation: Isolation,
    ack_mode: AckMode,
    maximum: MaximumOffset,
    default_offset: i64,
    describe: Unmerged,
    meta: Unmerged,
    fetches: Vec<Unmerged>,
    produces: Vec<Unmerged>,
    leaders: BTreeMap<i32, i32>,
    next_offsets: BTreeMap<i32, i64>,
    stable_offsets: BTreeMap<i32, i64>,
    latest_offsets: BTreeMap<i32, i64>,
    /// Position each partition reported when it caught up.
    flushed: BTreeMap<i32, PartitionOffset>,
    reply_budget_id: Option<u64>,
    fetch_index: usize,
    partitioner: Partitioner,
    /// Partition of the record whose fragments are still arriving.
    producer: Option<i32>,
}

impl MergedStream {
    pub fn new(begin: &Begin, ext: MergedBeginEx, binding_id: u64) -> Self {
        let default_offset = ext
            .partitions
            .iter()
            .find(|partition| partition.partition_id == -1)
            .map_or(OFFSET_HISTORICAL, |partition| partition.partition_offset);
        let next_offsets = ext
            .partitions
            .iter()
            .filter(|partition| partition.partition_id >= 0)
            .map(|partition| (partition.partition_id, partition.partition_offset))
            .collect();

        MergedStream {
            app: ApplicationStream::new(begin),
            binding_id,
            topic: ext.topic,
            capabilities: ext.capabilities,
            filters: ext.filters,
            isolation: ext.isolation,
            ack_mode: ext.ack_mode,
            maximum: MaximumOffset::of(&ext.partitions),
            default_offset,
            describe: Unmerged::new(-1, 0),
            meta: Unmerged::new(-1, 0),
            fetches: vec![],
            produces: vec![],
            leaders: BTreeMap::new(),
            next_offsets,
            stable_offsets: BTreeMap::new(),
            latest_offsets: BTreeMap::new(),
            flushed: BTreeMap::new(),
            reply_budget_id: None,
            fetch_index: 0,
            partitioner: Partitioner::default(),
            producer: None,
        }
    }

    fn is_closing(&self) -> bool {
        state::initial_closed(self.app.state) || state::reply_closing(self.app.state)
    }

    fn on_application(&mut self, cx: &mut Context, frame: Frame) {
        match frame {
            Frame::Begin(_) => {
                self.app.on_begin();
                tracing::debug!(
                    "Merging {} with {:?} from {:?}",
                    self.topic,
                    self.capabilities,
                    self.maximum
                );
                let ext = KafkaBeginEx::Describe(DescribeBeginEx {
                    topic: self.topic.clone(),
                    configs: TOPIC_CONFIGS.iter().map(|name| name.to_string()).collect(),
                });
                let (origin_id, authorization) = (self.app.routed_id, self.app.authorization);
                self.describe
                    .begin(cx, origin_id, self.binding_id, authorization, ext);
            }
            Frame::Data(data) => self.on_application_data(cx, data),
            Frame::Flush(flush) => self.on_application_flush(cx, flush),
            Frame::End(_) => self.on_application_end(cx),
            Frame::Abort(_) => {
                self.app.state = state::closed_initial(self.app.state);
                self.cleanup_streams(cx);
                self.release_creditor(cx);
                self.app.abort_reply(cx);
            }
            Frame::Window(window) => self.on_reply_window(cx, &window),
            Frame::Reset(_) => {
                self.app.state = state::closed_reply(self.app.state);
                self.cleanup_streams(cx);
                self.release_creditor(cx);
                self.app.reset_initial(cx, None);
            }
            Frame::Signal(_) => {}
        }
    }

    fn on_application_data(&mut self, cx: &mut Context, data: Data) {
        let (init, fin) = (data.is_init(), data.is_fin());
        if self.app.received(data.sequence, data.reserved).is_err() {
            self.cleanup(cx, None);
            return;
        }
        if !self.capabilities.produce() {
            tracing::error!("Data on {} which only fetches", self.topic);
            self.cleanup(cx, None);
            return;
        }

        let partition_id = match (self.producer, &data.extension) {
            (Some(partition_id), _) => partition_id,
            (None, Some(DataEx::Merged(MergedDataEx::Produce(ext)))) if init => {
                let key = ext.hash_key.as_ref().or(ext.key.as_ref());
                compute_partition(
                    &mut self.partitioner,
                    ext.partition.partition_id,
                    key.map(|key| &key[..]),
                    self.leaders.len(),
                )
            }
            _ => {
                tracing::error!("Record on {} without a produce extension", self.topic);
                self.cleanup(cx, None);
                return;
            }
        };

        let extension = match data.extension {
            Some(DataEx::Merged(MergedDataEx::Produce(ext))) if init => {
                Some(DataEx::Produce(ProduceDataEx {
                    deferred: ext.deferred,
                    timestamp: ext.timestamp,
                    producer_id: -1,
                    producer_epoch: -1,
                    sequence: if ext.partition.partition_offset >= 0 {
                        ext.partition.partition_offset as i32
                    } else {
                        -1
                    },
                    crc32c: ext.crc32c,
                    ack_mode: self.ack_mode,
                    key: ext.key,
                    headers: ext.headers,
                }))
            }
            _ => None,
        };

        let Some(producer) = self
            .produces
            .iter_mut()
            .find(|produce| produce.partition_id == partition_id && !produce.ending)
        else {
            tracing::warn!("No producer for {}[{}]", self.topic, partition_id);
            self.cleanup(cx, Some(KafkaCode::UnknownTopicOrPartition.value()));
            return;
        };
        producer.data(
            cx,
            data.flags,
            data.budget_id,
            data.reserved,
            data.payload,
            extension,
        );

        self.producer = if fin {
            None
        } else {
            Some(partition_id)
        };
    }

    fn on_application_flush(&mut self, cx: &mut Context, flush: Flush) {
        let Some(FlushEx::Merged(ext)) = flush.extension else {
            tracing::trace!("Ignoring flush on {} without merged extension", self.topic);
            return;
        };
        let capabilities = ext.capabilities.unwrap_or(self.capabilities);

        if capabilities != self.capabilities {
            tracing::debug!(
                "{} capabilities {:?} -> {:?}",
                self.topic,
                self.capabilities,
                capabilities
            );
            self.maximum = MaximumOffset::of(&ext.progress);
            if capabilities.fetch() && !self.capabilities.fetch() {
                self.next_offsets = ext
                    .progress
                    .iter()
                    .filter(|partition| partition.partition_id >= 0)
                    .map(|partition| (partition.partition_id, partition.partition_offset))
                    .collect();
            }
            if !capabilities.fetch() {
                for mut fetch in self.fetches.drain(..) {
                    fetch.cleanup(cx);
                }
                self.flushed.clear();
            }
            if !capabilities.produce() {
                for produce in self.produces.iter_mut() {
                    produce.ending = true;
                    produce.end(cx);
                }
                self.producer = None;
            }
            self.capabilities = capabilities;
            self.filters = ext.filters;
            self.fetch_partitions_if_necessary(cx);
            self.produce_partitions_if_necessary(cx);
        } else if capabilities.fetch() && ext.filters != self.filters {
            tracing::debug!("{} filters changed, restarting fetches", self.topic);
            self.filters = ext.filters;
            for index in 0..self.fetches.len() {
                let partition_id = self.fetches[index].partition_id;
                let extension = self.begin_ex(Kind::Fetch, partition_id);
                let (origin_id, authorization) = (self.app.routed_id, self.app.authorization);
                let fetch = &mut self.fetches[index];
                fetch.cleanup(cx);
                fetch.begin(cx, origin_id, self.binding_id, authorization, extension);
            }
            self.flushed.clear();
        }
    }

    fn on_application_end(&mut self, cx: &mut Context) {
        self.app.state = state::closed_initial(self.app.state);
        self.describe.close(cx);
        self.meta.close(cx);
        for mut fetch in self.fetches.drain(..) {
            fetch.close(cx);
        }
        for produce in self.produces.iter_mut() {
            produce.ending = true;
            produce.end(cx);
        }
        self.producer = None;
        self.on_partition_removed(cx);
    }

    fn on_reply_window(&mut self, cx: &mut Context, window: &Window) {
        if state::reply_closed(self.app.state) {
            return;
        }
        let no_ack = self.app.reply.sequence - self.app.reply.acknowledge;
        let maximum = self.app.reply.maximum;
        self.app.reply.on_window(window);

        if !state::reply_opening(self.app.state) {
            return;
        }

        if state::reply_opened(self.app.state) {
            let new_no_ack = self.app.reply.sequence - self.app.reply.acknowledge;
            let credit = (no_ack - new_no_ack) + (self.app.reply.maximum - maximum) as i64;
            if let Some(budget_id) = self.reply_budget_id {
                cx.credit(budget_id, credit);
            }
        } else {
            let budget = self.app.reply.budget();
            self.open_reply(cx, budget);
        }
        self.window_partitions(cx);
    }

    fn open_reply(&mut self, cx: &mut Context, credit: i32) {
        self.app.state = state::opened_reply(self.app.state);
        let budget_id = *self
            .reply_budget_id
            .get_or_insert_with(|| cx.acquire_creditor());
        cx.credit(budget_id, credit as i64);
    }

    fn release_creditor(&mut self, cx: &mut Context) {
        if let Some(budget_id) = self.reply_budget_id.take() {
            cx.release_creditor(budget_id);
        }
    }

    /// Hands the application's reply window on to every partition reply,
    /// starting one further along each time.
    fn window_partitions(&mut self, cx: &mut Context) {
        if !state::reply_opened(self.app.state) || state::reply_closed(self.app.state) {
            return;
        }
        let reply = self.app.reply;
        let no_ack = (reply.sequence - reply.acknowledge) as i32;
        let budget_id = self.reply_budget_id.unwrap_or(0);

        let count = self.fetches.len();
        if self.fetch_index >= count {
            self.fetch_index = 0;
        }
        for index in (self.fetch_index..count).chain(0..self.fetch_index) {
            self.fetches[index].window(cx, no_ack, reply.maximum, budget_id, reply.padding);
        }
        self.fetch_index += 1;

        for produce in self.produces.iter_mut() {
            produce.window(cx, no_ack, reply.maximum, budget_id, reply.padding);
        }
    }

    /// Opens the application's initial window once it can be used.
    fn window_initial(&mut self, cx: &mut Context) {
        if state::initial_closed(self.app.state) {
            return;
        }
        if self.capabilities.produce() {
            let ready = !self.produces.is_empty()
                && self
                    .produces
                    .iter()
                    .all(|produce| state::initial_opened(produce.state));
            if !ready {
                return;
            }
            let no_ack = self.produces.iter().map(Unmerged::no_ack).max().unwrap_or(0);
            let padding = self
                .produces
                .iter()
                .map(|produce| produce.initial.padding)
                .max()
                .unwrap_or(0);
            let maximum = self
                .produces
                .iter()
                .map(|produce| produce.initial.maximum)
                .min()
                .unwrap_or(0);
            self.app.window_initial(cx, no_ack, padding, maximum);
        } else if !state::initial_opened(self.app.state) {
            self.app.window_initial(cx, 0, 0, 0);
        }
    }

    fn is_ready(&self) -> bool {
        let fetch_ready = !self.capabilities.fetch()
            || (!self.fetches.is_empty()
                && self
                    .fetches
                    .iter()
                    .all(|fetch| self.latest_offsets.contains_key(&fetch.partition_id)));
        let produce_ready = !self.capabilities.produce()
            || (!self.produces.is_empty()
                && self
                    .produces
                    .iter()
                    .all(|produce| state::reply_opening(produce.state)));
        fetch_ready && produce_ready
    }

    fn begin_reply_if_ready(&mut self, cx: &mut Context) {
        if !state::reply_opening(self.app.state) && self.is_ready() {
            self.begin_reply(cx);
        }
    }

    fn begin_reply(&mut self, cx: &mut Context) {
        if state::reply_opening(self.app.state) || state::reply_closed(self.app.state) {
            return;
        }
        let extension = (self.capabilities == Capabilities::FetchOnly).then(|| {
            let partitions = self
                .latest_offsets
                .iter()
                .map(|(&partition_id, &latest_offset)| PartitionOffset {
                    partition_id,
                    partition_offset: self.next_fetch_offset(partition_id),
                    stable_offset: self.stable_offsets.get(&partition_id).copied().unwrap_or(-1),
                    latest_offset,
                })
                .collect();
            BeginEx::Kafka(KafkaBeginEx::Merged(MergedBeginEx {
                capabilities: Capabilities::FetchOnly,
                topic: self.topic.clone(),
                partitions,
                filters: self.filters.clone(),
                isolation: self.isolation,
                ack_mode: self.ack_mode,
            }))
        });
        tracing::debug!("Merged {} ready", self.topic);
        self.app.begin_reply(cx, extension);

        let budget = self.app.reply.budget();
        if budget > 0 {
            self.open_reply(cx, budget);
        }
        self.window_partitions(cx);
    }

    /// Ends the reply, beginning it first when nothing was ready yet.
    fn end_reply(&mut self, cx: &mut Context) {
        if state::reply_closed(self.app.state) {
            return;
        }
        self.begin_reply(cx);
        self.cleanup_streams(cx);
        self.release_creditor(cx);
        tracing::debug!("Merged {} ended", self.topic);
        self.app.end_reply(cx);
    }

    fn cleanup_streams(&mut self, cx: &mut Context) {
        self.describe.cleanup(cx);
        self.meta.cleanup(cx);
        for mut fetch in self.fetches.drain(..) {
            fetch.cleanup(cx);
        }
        for mut produce in self.produces.drain(..) {
            produce.cleanup(cx);
        }
        self.producer = None;
    }

    fn cleanup(&mut self, cx: &mut Context, error: Option<i16>) {
        tracing::debug!("Cleaning up merged {} with {:?}", self.topic, error);
        self.cleanup_streams(cx);
        self.release_creditor(cx);
        self.app.cleanup(cx, error);
    }

    fn next_fetch_offset(&self, partition_id: i32) -> i64 {
        self.next_offsets
            .get(&partition_id)
            .copied()
            .unwrap_or(self.default_offset)
    }

    fn progress(&self) -> Vec<PartitionOffset> {
        self.next_offsets
            .iter()
            .map(|(&partition_id, &offset)| PartitionOffset::new(partition_id, offset))
            .collect()
    }

    fn begin_ex(&self, kind: Kind, partition_id: i32) -> KafkaBeginEx {
        match kind {
            Kind::Fetch => KafkaBeginEx::Fetch(FetchBeginEx {
                topic: self.topic.clone(),
                partition: PartitionOffset {
                    partition_id,
                    partition_offset: self.next_fetch_offset(partition_id),
                    stable_offset: -1,
                    latest_offset: self.maximum.value(),
                },
                filters: self.filters.clone(),
                isolation: self.isolation,
            }),
            Kind::Produce => KafkaBeginEx::Produce(ProduceBeginEx {
                transaction: None,
                topic: self.topic.clone(),
                partition: PartitionOffset::new(partition_id, OFFSET_HISTORICAL),
            }),
        }
    }

    fn on_side(&mut self, cx: &mut Context, side: Side, frame: Frame) {
        let stream = match side {
            Side::Describe => &mut self.describe,
            Side::Meta => &mut self.meta,
        };
        match frame {
            Frame::Begin(_) => {
                stream.state = state::opening_reply(stream.state);
                stream.window(cx, 0, SIDE_REPLY_MAX, 0, 0);
            }
            Frame::Data(data) => {
                if !stream.reply.received(data.sequence, data.reserved) {
                    tracing::error!("{:?} of {} overran its window", side, self.topic);
                    self.cleanup(cx, None);
                    return;
                }
                let maximum = stream.reply.maximum;
                stream.window(cx, 0, maximum, 0, 0);
                match data.extension {
                    Some(DataEx::Describe(ext)) => {
                        tracing::debug!("Configs of {} now {:?}", self.topic, ext.configs);
                        if !state::initial_opening(self.meta.state) {
                            let extension = KafkaBeginEx::Meta(MetaBeginEx {
                                topic: self.topic.clone(),
                            });
                            let (origin_id, authorization) =
                                (self.app.routed_id, self.app.authorization);
                            self.meta
                                .begin(cx, origin_id, self.binding_id, authorization, extension);
                        }
                    }
                    Some(DataEx::Meta(ext)) => self.on_topic_partitions(cx, ext.partitions),
                    _ => tracing::trace!("Ignoring {:?} data without extension", side),
                }
            }
            Frame::End(_) => {
                stream.state = state::closed_reply(stream.state);
                stream.end(cx);
                if !self.is_closing() {
                    tracing::debug!("{:?} of {} ended", side, self.topic);
                    self.end_reply(cx);
                }
            }
            Frame::Abort(_) => {
                stream.state = state::closed_reply(stream.state);
                stream.abort(cx);
                self.cleanup(cx, None);
            }
            Frame::Reset(reset) => {
                stream.state = state::closed_initial(stream.state);
                stream.reset(cx);
                let error = reset.extension.map(|ext| ext.error);
                tracing::warn!("{:?} of {} failed with {:?}", side, self.topic, error);
                self.cleanup(cx, error);
            }
            Frame::Window(_) => {
                if !state::initial_opened(stream.state) {
                    stream.state = state::opened_initial(stream.state);
                    self.window_initial(cx);
                }
            }
            Frame::Flush(_) | Frame::Signal(_) => {}
        }
    }

    fn on_topic_partitions(&mut self, cx: &mut Context, partitions: Vec<PartitionLeader>) {
        self.leaders = partitions
            .iter()
            .map(|partition| (partition.partition_id, partition.leader_id))
            .collect();
        tracing::debug!("Leaders of {} now {:?}", self.topic, self.leaders);
        self.fetch_partitions_if_necessary(cx);
        self.produce_partitions_if_necessary(cx);
    }

    fn fetch_partitions_if_necessary(&mut self, cx: &mut Context) {
        if !self.capabilities.fetch() {
            return;
        }
        let leaders = &self.leaders;
        self.next_offsets
            .retain(|partition_id, _| leaders.contains_key(partition_id));
        let removed = self.remove_vanished(cx, Kind::Fetch);
        for (partition_id, leader_id) in self.leaders.clone() {
            self.partition_if_necessary(cx, Kind::Fetch, partition_id, leader_id);
        }
        if removed {
            self.on_partition_removed(cx);
        }
    }

    fn produce_partitions_if_necessary(&mut self, cx: &mut Context) {
        if !self.capabilities.produce() {
            return;
        }
        let removed = self.remove_vanished(cx, Kind::Produce);
        for (partition_id, leader_id) in self.leaders.clone() {
            self.partition_if_necessary(cx, Kind::Produce, partition_id, leader_id);
        }
        if removed {
            self.on_partition_removed(cx);
        }
    }

    /// Drops the streams of partitions the topic no longer has.
    fn remove_vanished(&mut self, cx: &mut Context, kind: Kind) -> bool {
        let streams = match kind {
            Kind::Fetch => &mut self.fetches,
            Kind::Produce => &mut self.produces,
        };
        let leaders = &self.leaders;
        let count = streams.len();
        streams.retain_mut(|stream| {
            let keep = leaders.contains_key(&stream.partition_id);
            if !keep {
                tracing::debug!("{:?} {}[{}] vanished", kind, self.topic, stream.partition_id);
                stream.cleanup(cx);
            }
            keep
        });
        if let Some(partition_id) = self.producer {
            if !leaders.contains_key(&partition_id) {
                self.producer = None;
            }
        }
        streams.len() != count
    }

    fn partition_if_necessary(&mut self, cx: &mut Context, kind: Kind, partition_id: i32, leader_id: i32) {
        let extension = self.begin_ex(kind, partition_id);
        let (origin_id, authorization) = (self.app.routed_id, self.app.authorization);
        let binding_id = self.binding_id;
        let streams = match kind {
            Kind::Fetch => &mut self.fetches,
            Kind::Produce => &mut self.produces,
        };
        match streams
            .iter_mut()
            .find(|stream| stream.partition_id == partition_id)
        {
            Some(stream) => {
                if stream.leader_id != leader_id {
                    tracing::debug!(
                        "{:?} {}[{}] leader {} -> {}",
                        kind,
                        self.topic,
                        partition_id,
                        stream.leader_id,
                        leader_id
                    );
                    stream.leader_id = leader_id;
                    if state::closed(stream.state) && !stream.ending {
                        stream.begin(cx, origin_id, binding_id, authorization, extension);
                    }
                }
            }
            None => {
                let mut stream = Unmerged::new(partition_id, leader_id);
                stream.begin(cx, origin_id, binding_id, authorization, extension);
                streams.push(stream);
            }
        }
    }

    fn on_partition(&mut self, cx: &mut Context, kind: Kind, index: usize, frame: Frame) {
        let stream = match kind {
            Kind::Fetch => &mut self.fetches[index],
            Kind::Produce => &mut self.produces[index],
        };
        match frame {
            Frame::Begin(begin) => {
                stream.state = state::opening_reply(stream.state);
                if kind == Kind::Fetch {
                    let partition_id = stream.partition_id;
                    let partition = match begin.extension {
                        Some(BeginEx::Kafka(KafkaBeginEx::Fetch(ext))) => ext.partition,
                        _ => PartitionOffset::new(partition_id, self.default_offset),
                    };
                    self.on_fetch_ready(partition_id, partition);
                } else {
                    self.window_initial(cx);
                }
                self.begin_reply_if_ready(cx);
                self.window_partitions(cx);
            }
            Frame::Data(data) => {
                if !stream.reply.received(data.sequence, data.reserved) {
                    tracing::error!(
                        "{:?} {}[{}] overran the merged window",
                        kind,
                        self.topic,
                        stream.partition_id
                    );
                    self.cleanup(cx, None);
                } else if kind == Kind::Fetch {
                    self.on_fetch_data(cx, index, data);
                }
            }
            Frame::Flush(flush) => {
                if !stream.reply.received(flush.sequence, flush.reserved) {
                    self.cleanup(cx, None);
                } else if let Some(FlushEx::Fetch(ext)) = flush.extension {
                    self.on_fetch_flush(cx, index, ext);
                }
            }
            Frame::End(_) => {
                stream.state = state::closed_reply(stream.state);
                stream.end(cx);
                if kind == Kind::Fetch && self.maximum == MaximumOffset::Historical {
                    stream.ending = true;
                }
                self.on_partition_closed(cx, kind, index, KafkaCode::NotLeaderForPartition.value());
            }
            Frame::Abort(_) => {
                stream.state = state::closed_reply(stream.state);
                stream.abort(cx);
                self.on_partition_closed(cx, kind, index, KafkaCode::NotLeaderForPartition.value());
            }
            Frame::Reset(reset) => {
                stream.state = state::closed_initial(stream.state);
                let error = match reset.extension {
                    Some(ext) => ext.error,
                    None if state::reply_closed(stream.state) => {
                        KafkaCode::NotLeaderForPartition.value()
                    }
                    None => KafkaCode::Unknown.value(),
                };
                stream.reset(cx);
                self.on_partition_closed(cx, kind, index, error);
            }
            Frame::Window(window) => {
                if kind == Kind::Produce {
                    stream.initial.on_window(&window);
                }
                stream.state = state::opened_initial(stream.state);
                self.window_initial(cx);
            }
            Frame::Signal(_) => {}
        }
    }

    fn on_fetch_ready(&mut self, partition_id: i32, partition: PartitionOffset) {
        let next_offset = self
            .next_offsets
            .entry(partition_id)
            .or_insert(self.default_offset);
        if *next_offset < 0 && partition.partition_offset >= 0 {
            *next_offset = partition.partition_offset;
        }
        self.stable_offsets
            .insert(partition_id, partition.stable_offset);
        self.latest_offsets
            .insert(partition_id, partition.latest_offset);
    }

    fn on_fetch_data(&mut self, cx: &mut Context, index: usize, data: Data) {
        let fin = data.is_fin();
        let partition_id = self.fetches[index].partition_id;
        let extension = match data.extension {
            Some(DataEx::Fetch(FetchDataEx {
                deferred,
                timestamp,
                filters,
                partition,
                key,
                headers,
                ..
            })) => {
                self.next_offsets
                    .insert(partition_id, partition.partition_offset + 1);
                Some(DataEx::Merged(MergedDataEx::Fetch(MergedFetchDataEx {
                    deferred,
                    timestamp,
                    filters,
                    partition,
                    progress: self.progress(),
                    key,
                    headers,
                })))
            }
            _ => None,
        };
        self.app
            .data_reply(cx, data.flags, data.reserved, data.payload, extension);

        if fin {
            let offset = self.next_fetch_offset(partition_id) - 1;
            self.finish_if_historical(cx, index, offset);
        }
    }

    fn on_fetch_flush(&mut self, cx: &mut Context, index: usize, ext: FetchFlushEx) {
        let partition = ext.partition;
        let partition_id = self.fetches[index].partition_id;
        self.next_offsets
            .insert(partition_id, partition.partition_offset + 1);
        self.flushed.insert(partition_id, partition);

        if self
            .fetches
            .iter()
            .all(|fetch| self.flushed.contains_key(&fetch.partition_id))
        {
            let progress = self
                .next_offsets
                .iter()
                .map(|(&partition_id, &partition_offset)| {
                    let flushed = self.flushed.get(&partition_id);
                    PartitionOffset {
                        partition_id,
                        partition_offset,
                        stable_offset: flushed.map_or(-1, |flushed| flushed.stable_offset),
                        latest_offset: flushed.map_or(-1, |flushed| flushed.latest_offset),
                    }
                })
                .collect();
            self.app.flush_reply(
                cx,
                Some(FlushEx::Merged(MergedFlushEx {
                    progress,
                    capabilities: None,
                    filters: vec![],
                })),
            );
        }

        self.finish_if_historical(cx, index, partition.partition_offset);
    }

    /// Ends a historical fetch that delivered its latest offset.
    fn finish_if_historical(&mut self, cx: &mut Context, index: usize, offset: i64) {
        if self.maximum != MaximumOffset::Historical {
            return;
        }
        let fetch = &mut self.fetches[index];
        let latest_offset = self
            .latest_offsets
            .get(&fetch.partition_id)
            .copied()
            .unwrap_or(i64::MAX);
        if !fetch.ending && offset >= latest_offset {
            tracing::debug!(
                "{}[{}] reached offset {}",
                self.topic,
                fetch.partition_id,
                latest_offset
            );
            fetch.ending = true;
            fetch.end(cx);
        }
    }

    /// Restarts or drops a partition stream that closed.
    fn on_partition_closed(&mut self, cx: &mut Context, kind: Kind, index: usize, error: i16) {
        let closing = self.is_closing();
        let streams = match kind {
            Kind::Fetch => &mut self.fetches,
            Kind::Produce => &mut self.produces,
        };
        let stream = &streams[index];
        let partition_id = stream.partition_id;
        if kind == Kind::Produce && self.producer == Some(partition_id) {
            self.producer = None;
        }

        if stream.ending || closing {
            let mut stream = streams.remove(index);
            stream.cleanup(cx);
            self.flushed.remove(&partition_id);
            self.on_partition_removed(cx);
        } else if error == KafkaCode::NotLeaderForPartition.value() {
            match self.leaders.get(&partition_id).copied() {
                Some(leader_id) => {
                    if leader_id == stream.leader_id {
                        // same leader refused it, ask for fresh metadata meanwhile
                        self.meta.flush(cx);
                    }
                    let extension = self.begin_ex(kind, partition_id);
                    let (origin_id, authorization) = (self.app.routed_id, self.app.authorization);
                    let binding_id = self.binding_id;
                    tracing::debug!(
                        "Restarting {:?} {}[{}] on broker {}",
                        kind,
                        self.topic,
                        partition_id,
                        leader_id
                    );
                    let stream = match kind {
                        Kind::Fetch => &mut self.fetches[index],
                        Kind::Produce => &mut self.produces[index],
                    };
                    stream.cleanup(cx);
                    stream.leader_id = leader_id;
                    stream.begin(cx, origin_id, binding_id, authorization, extension);
                }
                None => {
                    let mut stream = match kind {
                        Kind::Fetch => self.fetches.remove(index),
                        Kind::Produce => self.produces.remove(index),
                    };
                    stream.cleanup(cx);
                    self.flushed.remove(&partition_id);
                    self.on_partition_removed(cx);
                }
            }
        } else {
            tracing::warn!(
                "{:?} {}[{}] failed with error {}",
                kind,
                self.topic,
                partition_id,
                error
            );
            self.cleanup(cx, Some(error));
        }
    }

    fn on_partition_removed(&mut self, cx: &mut Context) {
        if !self.fetches.is_empty() || !self.produces.is_empty() {
            return;
        }
        if state::initial_closed(self.app.state)
            || (self.maximum == MaximumOffset::Historical && self.capabilities.fetch())
        {
            self.end_reply(cx);
        } else if self.leaders.is_empty() {
            tracing::warn!("Every partition of {} is gone", self.topic);
            self.cleanup(cx, Some(KafkaCode::UnknownTopicOrPartition.value()));
        }
    }
}

impl MessageConsumer for MergedStream {
    fn on_message(&mut self, cx: &mut Context, frame: Frame) {
        let stream_id = frame.stream_id();
        if stream_id == self.app.initial_id || stream_id == self.app.reply_id {
            self.on_application(cx, frame);
        } else if self.describe.owns(stream_id) {
            self.on_side(cx, Side::Describe, frame);
        } else if self.meta.owns(stream_id) {
            self.on_side(cx, Side::Meta, frame);
        } else if let Some(index) = self.fetches.iter().position(|fetch| fetch.owns(stream_id)) {
            self.on_partition(cx, Kind::Fetch, index, frame);
        } else if let Some(index) = self
            .produces
            .iter()
            .position(|produce| produce.owns(stream_id))
        {
            self.on_partition(cx, Kind::Produce, index, frame);
        } else {
            tracing::trace!("Merged ignoring {} {:#x}", frame.name(), stream_id);
        }
    }

    fn is_closed(&self) -> bool {
        self.app.is_closed()
    }
}

#[cfg(test)]
mod test {
    use std::{cell::RefCell, rc::Rc};

    use super::*;
    use crate::{
        config::GatewayConfig,
        engine::{Engine, StreamFactory},
        partitioner::DYNAMIC_PARTITION,
        stream::{
            self,
            ext::{DescribeDataEx, MergedProduceDataEx, MetaDataEx, ResetEx},
            FLAGS_COMPLETE,
        },
    };

    const BINDING_ID: u64 = 0x11;

    type Log = Rc<RefCell<Vec<(String, Frame)>>>;

    /// Answers the streams a merged stream opens, logging what it gets.
    struct Stub {
        log: Log,
        label: String,
    }

    impl Stub {
        fn reply(cx: &mut Context, begin: &Begin, extension: Option<BeginEx>) {
            cx.send(Frame::Begin(Begin {
                stream_id: stream::reply_id(begin.stream_id),
                extension,
                ..Default::default()
            }));
        }

        fn window(cx: &mut Context, begin: &Begin, maximum: i32) {
            cx.send(Frame::Window(Window {
                stream_id: begin.stream_id,
                maximum,
                ..Default::default()
            }));
        }

        fn data(cx: &mut Context, begin: &Begin, extension: DataEx) {
            cx.send(Frame::Data(Data {
                stream_id: stream::reply_id(begin.stream_id),
                flags: FLAGS_COMPLETE,
                extension: Some(extension),
                ..Default::default()
            }));
        }
    }

    impl MessageConsumer for Stub {
        fn on_message(&mut self, _cx: &mut Context, frame: Frame) {
            self.log.borrow_mut().push((self.label.clone(), frame));
        }
    }

    struct TestFactory {
        log: Log,
        partitions: Vec<PartitionLeader>,
        ready: Vec<i32>,
    }

    impl StreamFactory for TestFactory {
        fn new_stream(&mut self, cx: &mut Context, begin: &Begin) -> Option<Box<dyn MessageConsumer>> {
            let Some(BeginEx::Kafka(ext)) = &begin.extension else {
                return None;
            };
            let label = match ext {
                KafkaBeginEx::Merged(merged) => {
                    return Some(Box::new(MergedStream::new(begin, merged.clone(), BINDING_ID)))
                }
                KafkaBeginEx::Describe(_) => {
                    Stub::reply(cx, begin, None);
                    Stub::window(cx, begin, 0);
                    Stub::data(cx, begin, DataEx::Describe(DescribeDataEx::default()));
                    "describe".to_owned()
                }
                KafkaBeginEx::Meta(_) => {
                    Stub::reply(cx, begin, None);
                    Stub::window(cx, begin, 0);
                    Stub::data(
                        cx,
                        begin,
                        DataEx::Meta(MetaDataEx {
                            partitions: self.partitions.clone(),
                        }),
                    );
                    "meta".to_owned()
                }
                KafkaBeginEx::Fetch(fetch) => {
                    let partition_id = fetch.partition.partition_id;
                    if self.ready.contains(&partition_id) {
                        let mut reply = fetch.clone();
                        reply.partition.partition_offset = fetch.partition.partition_offset.max(0);
                        reply.partition.stable_offset = 5;
                        reply.partition.latest_offset = 5;
                        Stub::reply(cx, begin, Some(BeginEx::Kafka(KafkaBeginEx::Fetch(reply))));
                    }
                    Stub::window(cx, begin, 0);
                    format!("fetch-{}", partition_id)
                }
                KafkaBeginEx::Produce(produce) => {
                    Stub::reply(cx, begin, None);
                    Stub::window(cx, begin, 65536);
                    format!("produce-{}", produce.partition.partition_id)
                }
                KafkaBeginEx::Group(_) => return None,
            };
            self.log.borrow_mut().push((label.clone(), Frame::Begin(begin.clone())));
            Some(Box::new(Stub {
                log: Rc::clone(&self.log),
                label,
            }))
        }
    }

    #[derive(Default)]
    struct App {
        frames: Rc<RefCell<Vec<Frame>>>,
    }

    impl MessageConsumer for App {
        fn on_message(&mut self, _cx: &mut Context, frame: Frame) {
            self.frames.borrow_mut().push(frame);
        }
    }

    struct Harness {
        engine: Engine,
        app: usize,
        app_initial_id: u64,
        frames: Rc<RefCell<Vec<Frame>>>,
        log: Log,
    }

    impl Harness {
        fn new(ext: MergedBeginEx, partitions: Vec<(i32, i32)>, ready: Vec<i32>) -> Self {
            let log = Log::default();
            let mut engine = Engine::new(GatewayConfig::default());
            engine.register(
                BINDING_ID,
                Box::new(TestFactory {
                    log: Rc::clone(&log),
                    partitions: partitions
                        .into_iter()
                        .map(|(partition_id, leader_id)| PartitionLeader {
                            partition_id,
                            leader_id,
                        })
                        .collect(),
                    ready,
                }),
            );
            let app = App::default();
            let frames = Rc::clone(&app.frames);
            let app = engine.attach(Box::new(app));
            let app_initial_id = engine.context().supply_initial_id();
            engine.send(
                app,
                Frame::Begin(Begin {
                    routed_id: BINDING_ID,
                    stream_id: app_initial_id,
                    extension: Some(BeginEx::Kafka(KafkaBeginEx::Merged(ext))),
                    ..Default::default()
                }),
            );
            Harness {
                engine,
                app,
                app_initial_id,
                frames,
                log,
            }
        }

        fn send(&mut self, frame: Frame) {
            self.engine.send(self.app, frame);
        }

        fn open_reply(&mut self, maximum: i32) {
            let stream_id = stream::reply_id(self.app_initial_id);
            self.send(Frame::Window(Window {
                stream_id,
                maximum,
                ..Default::default()
            }));
        }

        /// Initial id of the latest stream opened under `label`.
        fn initial_id(&self, label: &str) -> u64 {
            self.log
                .borrow()
                .iter()
                .rev()
                .find_map(|(name, frame)| match frame {
                    Frame::Begin(begin) if name == label => Some(begin.stream_id),
                    _ => None,
                })
                .expect("stream opened")
        }

        fn logged(&self, label: &str, name: &str) -> usize {
            self.log
                .borrow()
                .iter()
                .filter(|(stream, frame)| stream == label && frame.name() == name)
                .count()
        }

        fn app_frames(&self, name: &str) -> Vec<Frame> {
            self.frames
                .borrow()
                .iter()
                .filter(|frame| frame.name() == name)
                .cloned()
                .collect()
        }

        fn record(&mut self, partition_id: i32, offset: i64, reserved: i32) {
            let stream_id = stream::reply_id(self.initial_id(&format!("fetch-{}", partition_id)));
            self.send(Frame::Data(Data {
                stream_id,
                flags: FLAGS_COMPLETE,
                reserved,
                payload: Bytes::from_static(b"value"),
                extension: Some(DataEx::Fetch(FetchDataEx {
                    partition: PartitionOffset::new(partition_id, offset),
                    ..Default::default()
                })),
                ..Default::default()
            }));
        }
    }

    fn fetch_only(topic: &str) -> MergedBeginEx {
        MergedBeginEx {
            capabilities: Capabilities::FetchOnly,
            topic: topic.to_owned(),
            partitions: vec![PartitionOffset::new(-1, OFFSET_HISTORICAL)],
            ..Default::default()
        }
    }

    #[test]
    fn reply_waits_for_every_partition() {
        let mut harness = Harness::new(fetch_only("orders"), vec![(0, 1), (1, 2)], vec![0]);

        assert_eq!(harness.logged("fetch-0", "BEGIN"), 1);
        assert_eq!(harness.logged("fetch-1", "BEGIN"), 1);
        assert!(harness.app_frames("BEGIN").is_empty());
        assert_eq!(harness.app_frames("WINDOW").len(), 1);

        let stream_id = stream::reply_id(harness.initial_id("fetch-1"));
        harness.send(Frame::Begin(Begin {
            stream_id,
            extension: Some(BeginEx::Kafka(KafkaBeginEx::Fetch(FetchBeginEx {
                topic: "orders".to_owned(),
                partition: PartitionOffset {
                    partition_id: 1,
                    partition_offset: 0,
                    stable_offset: 7,
                    latest_offset: 7,
                },
                ..Default::default()
            }))),
            ..Default::default()
        }));

        let begins = harness.app_frames("BEGIN");
        assert_eq!(begins.len(), 1);
        let Frame::Begin(Begin {
            extension: Some(BeginEx::Kafka(KafkaBeginEx::Merged(ext))),
            ..
        }) = &begins[0]
        else {
            panic!("merged begin extension");
        };
        assert_eq!(ext.partitions.len(), 2);
        assert_eq!(ext.partitions[1].latest_offset, 7);
    }

    #[test]
    fn vanished_partition_is_dropped_alone() {
        let mut harness = Harness::new(fetch_only("orders"), vec![(0, 1), (1, 2)], vec![0, 1]);
        harness.open_reply(65536);
        assert_eq!(harness.app_frames("BEGIN").len(), 1);

        let meta_reply_id = stream::reply_id(harness.initial_id("meta"));
        harness.send(Frame::Data(Data {
            stream_id: meta_reply_id,
            flags: FLAGS_COMPLETE,
            extension: Some(DataEx::Meta(MetaDataEx {
                partitions: vec![PartitionLeader {
                    partition_id: 0,
                    leader_id: 1,
                }],
            })),
            ..Default::default()
        }));

        assert_eq!(harness.logged("fetch-1", "ABORT"), 1);
        assert_eq!(harness.logged("fetch-1", "RESET"), 1);
        assert_eq!(harness.logged("fetch-0", "ABORT"), 0);

        harness.record(0, 2, 10);

        let data = harness.app_frames("DATA");
        assert_eq!(data.len(), 1);
        let Frame::Data(Data {
            extension: Some(DataEx::Merged(MergedDataEx::Fetch(ext))),
            ..
        }) = &data[0]
        else {
            panic!("merged fetch extension");
        };
        assert_eq!(ext.partition.partition_offset, 2);
        assert_eq!(ext.progress, vec![PartitionOffset::new(0, 3)]);
        assert!(harness.app_frames("ABORT").is_empty());
        assert!(harness.app_frames("RESET").is_empty());
    }

    #[test]
    fn not_leader_restarts_from_next_offset() {
        let mut harness = Harness::new(fetch_only("orders"), vec![(0, 1)], vec![0]);
        harness.open_reply(65536);
        harness.record(0, 41, 10);

        let initial_id = harness.initial_id("fetch-0");
        harness.send(Frame::Reset(Reset {
            stream_id: initial_id,
            extension: Some(ResetEx {
                error: KafkaCode::NotLeaderForPartition.value(),
            }),
            ..Default::default()
        }));

        assert_eq!(harness.logged("fetch-0", "BEGIN"), 2);
        let restarted = harness.initial_id("fetch-0");
        assert_ne!(restarted, initial_id);
        let offset = harness
            .log
            .borrow()
            .iter()
            .rev()
            .find_map(|(_, frame)| match frame {
                Frame::Begin(Begin {
                    extension: Some(BeginEx::Kafka(KafkaBeginEx::Fetch(fetch))),
                    ..
                }) => Some(fetch.partition.partition_offset),
                _ => None,
            });
        assert_eq!(offset, Some(42));
        assert!(harness.app_frames("RESET").is_empty());
    }

    #[test]
    fn fatal_partition_error_fails_merged() {
        let mut harness = Harness::new(fetch_only("orders"), vec![(0, 1)], vec![0]);
        let initial_id = harness.initial_id("fetch-0");
        harness.send(Frame::Reset(Reset {
            stream_id: initial_id,
            extension: Some(ResetEx {
                error: KafkaCode::TopicAuthorizationFailed.value(),
            }),
            ..Default::default()
        }));

        let resets = harness.app_frames("RESET");
        assert_eq!(resets.len(), 1);
        assert!(matches!(
            &resets[0],
            Frame::Reset(Reset { extension: Some(ResetEx { error }), .. })
                if *error == KafkaCode::TopicAuthorizationFailed.value()
        ));
        assert_eq!(harness.logged("describe", "ABORT"), 1);
    }

    #[test]
    fn historical_ends_after_latest_offset() {
        let mut ext = fetch_only("orders");
        ext.partitions = vec![PartitionOffset {
            partition_id: -1,
            partition_offset: OFFSET_HISTORICAL,
            stable_offset: -1,
            latest_offset: OFFSET_HISTORICAL,
        }];
        let mut harness = Harness::new(ext, vec![(0, 1)], vec![0]);
        harness.open_reply(65536);

        let reply_id = stream::reply_id(harness.initial_id("fetch-0"));
        harness.send(Frame::Flush(Flush {
            stream_id: reply_id,
            extension: Some(FlushEx::Fetch(FetchFlushEx {
                partition: PartitionOffset {
                    partition_id: 0,
                    partition_offset: 5,
                    stable_offset: 5,
                    latest_offset: 5,
                },
                ..Default::default()
            })),
            ..Default::default()
        }));

        let flushes = harness.app_frames("FLUSH");
        assert_eq!(flushes.len(), 1);
        assert!(matches!(
            &flushes[0],
            Frame::Flush(Flush { extension: Some(FlushEx::Merged(merged)), .. })
                if merged.progress[0].partition_offset == 6
        ));
        assert_eq!(harness.logged("fetch-0", "END"), 1);
        assert!(harness.app_frames("END").is_empty());

        harness.send(Frame::End(End {
            stream_id: reply_id,
            ..Default::default()
        }));
        assert_eq!(harness.app_frames("END").len(), 1);
    }

    #[test]
    fn dynamic_partition_follows_key_hash() {
        let ext = MergedBeginEx {
            capabilities: Capabilities::ProduceOnly,
            topic: "orders".to_owned(),
            ack_mode: AckMode::None,
            ..Default::default()
        };
        let mut harness = Harness::new(ext, vec![(0, 1), (1, 1), (2, 2), (3, 2)], vec![]);

        assert_eq!(harness.app_frames("BEGIN").len(), 1);
        assert!(matches!(
            harness.app_frames("WINDOW").last(),
            Some(Frame::Window(window)) if window.maximum == 65536
        ));

        harness.send(Frame::Data(Data {
            stream_id: harness.app_initial_id,
            flags: FLAGS_COMPLETE,
            reserved: 5,
            payload: Bytes::from_static(b"value"),
            extension: Some(DataEx::Merged(MergedDataEx::Produce(MergedProduceDataEx {
                partition: PartitionOffset::new(DYNAMIC_PARTITION, OFFSET_LIVE),
                key: Some(Bytes::from_static(b"key")),
                ..Default::default()
            }))),
            ..Default::default()
        }));

        let expected = Partitioner::default().next_partition(Some(b"key"), 4);
        let label = format!("produce-{}", expected);
        assert_eq!(harness.logged(&label, "DATA"), 1);
        let log = harness.log.borrow();
        let produced = log.iter().find_map(|(name, frame)| match frame {
            Frame::Data(Data {
                extension: Some(DataEx::Produce(ext)),
                ..
            }) if name == &label => Some(ext.clone()),
            _ => None,
        });
        let produced = produced.expect("produce extension");
        assert_eq!(produced.ack_mode, AckMode::None);
        assert_eq!(produced.key, Some(Bytes::from_static(b"key")));
    }
}
