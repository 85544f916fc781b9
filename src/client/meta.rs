//! Meta client: keeps the brokers and partition leaders of one topic fresh.
//!
//! Sends a Metadata request when the stream opens, again every
//! `meta_max_age_millis`, and whenever another client pokes it with a
//! Flush after learning that a leader moved. Each response replaces the
//! brokers of the route, and the topic's leaders when they changed, in
//! which case the application receives them as one Data frame.
use std::collections::BTreeMap;

use bytes::Bytes;
use tracing::instrument;

use crate::{
    binding::{BrokerInfo, ClientRouteRef, SaslConfig},
    engine::{Context, MessageConsumer},
    error::{Error, KafkaCode, Result},
    parser::try_wrap,
    protocol::{
        encode_request,
        metadata::response::{
            parse_broker_metadata, parse_cluster_metadata, parse_metadata_response_head,
            parse_partition_metadata, parse_topic_metadata_head,
        },
        parse_response_header, MetadataRequest,
    },
    stream::{
        ext::{BeginEx, KafkaBeginEx, MetaBeginEx, MetaDataEx, PartitionLeader},
        state, Begin, DataEx, Frame, Signal, FLAGS_COMPLETE,
    },
};

use super::{
    sasl::{self, SaslDecoder, SaslEvent},
    ApplicationStream, Client, NetworkStream, SIGNAL_NEXT_REQUEST,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetaEncoder {
    SaslHandshake,
    SaslAuthenticate,
    Meta,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetaDecoder {
    Sasl(SaslDecoder),
    MetaResponse,
    Meta,
    MetaBrokers,
    MetaBroker,
    MetaCluster,
    MetaTopics,
    MetaTopic,
    MetaPartitions,
    MetaPartition,
    Reject,
    IgnoreAll,
}

pub struct MetaClient {
    app: ApplicationStream,
    network: NetworkStream,
    route: ClientRouteRef,
    sasl: Option<SaslConfig>,
    topic: String,
    encoder: MetaEncoder,
    decoder: MetaDecoder,
    brokers: i32,
    topics: i32,
    partitions: i32,
    new_brokers: BTreeMap<i32, BrokerInfo>,
    new_partitions: BTreeMap<i32, i32>,
    /// Leaders last sent to the application.
    partitions_sent: Option<BTreeMap<i32, i32>>,
    next_request_at: Option<u64>,
}

impl MetaClient {
    pub fn new(
        begin: &Begin,
        ext: MetaBeginEx,
        route: ClientRouteRef,
        sasl: Option<SaslConfig>,
    ) -> Self {
        let exit_id = route.borrow().exit_id;
        MetaClient {
            app: ApplicationStream::new(begin),
            network: NetworkStream::new(begin.routed_id, exit_id),
            route,
            encoder: if sasl.is_some() {
                MetaEncoder::SaslHandshake
            } else {
                MetaEncoder::Meta
            },
            decoder: if sasl.is_some() {
                MetaDecoder::Sasl(SaslDecoder::HandshakeResponse)
            } else {
                MetaDecoder::MetaResponse
            },
            sasl,
            topic: ext.topic,
            brokers: 0,
            topics: 0,
            partitions: 0,
            new_brokers: BTreeMap::new(),
            new_partitions: BTreeMap::new(),
            partitions_sent: None,
            next_request_at: None,
        }
    }

    fn on_application(&mut self, cx: &mut Context, frame: Frame) {
        match frame {
            Frame::Begin(begin) => {
                self.app.on_begin();
                self.route.borrow_mut().meta_initial_id = Some(begin.stream_id);
                let affinity = self.app.affinity;
                let proxy = self
                    .route
                    .borrow()
                    .broker(affinity as i32)
                    .and_then(|broker| NetworkStream::proxy_ex(&broker.host, broker.port));
                self.network.begin(cx, affinity, proxy);
            }
            Frame::Data(data) => {
                tracing::error!("Unexpected data on meta stream {:#x}", data.stream_id);
                self.cleanup_network(cx);
            }
            Frame::Flush(_) => {
                tracing::debug!("Refreshing metadata of {} on demand", self.topic);
                self.encode_request_if_necessary(cx);
            }
            Frame::End(_) => {
                self.app.state = state::closed_initial(self.app.state);
                self.forget_route();
                self.network.end(cx);
            }
            Frame::Abort(_) => {
                self.app.state = state::closed_initial(self.app.state);
                self.forget_route();
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

    fn on_network(&mut self, cx: &mut Context, frame: Frame) {
        match frame {
            Frame::Begin(_) => self.network.on_begin(cx),
            Frame::Data(data) => self.on_network_data(cx, &data),
            Frame::End(_) => {
                self.network.on_end();
                self.cancel_next_request(cx);
                if !state::reply_opening(self.app.state) {
                    self.cleanup_network(cx);
                } else if !self.network.has_pending_decode() {
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
            Frame::Window(window) => match self.network.on_window(cx, &window) {
                Ok(()) => self.encode_request_if_necessary(cx),
                Err(err) => self.cleanup(cx, err),
            },
            _ => {}
        }
    }

    fn on_signal(&mut self, cx: &mut Context, signal: Signal) {
        if signal.signal_id == SIGNAL_NEXT_REQUEST {
            self.next_request_at = None;
            self.encode_request_if_necessary(cx);
        }
    }

    fn forget_route(&mut self) {
        let mut route = self.route.borrow_mut();
        if route.meta_initial_id == Some(self.app.initial_id) {
            route.meta_initial_id = None;
        }
    }

    fn cancel_next_request(&mut self, cx: &mut Context) {
        if let Some(cancel_id) = self.next_request_at.take() {
            cx.cancel(cancel_id);
        }
    }

    fn cleanup_network(&mut self, cx: &mut Context) {
        self.cancel_next_request(cx);
        self.network.cleanup(cx);
        self.forget_route();
        self.app.cleanup(cx, None);
    }

    fn encode_request_if_necessary(&mut self, cx: &mut Context) {
        if !state::initial_opened(self.network.state)
            || state::initial_closing(self.network.state)
            || !self.network.is_idle()
            || self.decoder == MetaDecoder::IgnoreAll
        {
            return;
        }

        let correlation_id = self.network.next_request_id;
        let config = cx.config().clone();
        let request = match (self.encoder, &self.sasl) {
            (MetaEncoder::SaslHandshake, Some(sasl)) => {
                sasl::encode_handshake(correlation_id, &config.client_id, sasl)
            }
            (MetaEncoder::SaslAuthenticate, Some(sasl)) => {
                sasl::encode_authenticate(correlation_id, &config.client_id, sasl)
            }
            (MetaEncoder::Meta, _) => {
                self.cancel_next_request(cx);
                self.decoder = MetaDecoder::MetaResponse;
                encode_meta_request(correlation_id, &config.client_id, &self.topic)
            }
            _ => Err(Error::InvalidSaslMechanism),
        };

        if let Err(err) = request.and_then(|bytes| self.network.encode(cx, bytes)) {
            self.cleanup(cx, err);
        }
    }

    fn on_sasl(&mut self, cx: &mut Context, event: SaslEvent) {
        match event {
            SaslEvent::Handshake(KafkaCode::None) => {
                self.encoder = MetaEncoder::SaslAuthenticate;
            }
            SaslEvent::Authenticate(KafkaCode::None) => {
                self.encoder = MetaEncoder::Meta;
                self.decoder = MetaDecoder::MetaResponse;
            }
            SaslEvent::Handshake(error) | SaslEvent::Authenticate(error) => {
                tracing::warn!("SASL failed for meta {}: {:?}", self.topic, error);
                self.app.cleanup(cx, Some(error.value()));
                self.network.end(cx);
                self.decoder = MetaDecoder::IgnoreAll;
                return;
            }
        }
        self.network.next_response_id += 1;
        cx.signal_now(self.network.initial_id, SIGNAL_NEXT_REQUEST);
    }

    fn on_decode_brokers(&mut self) {
        let mut route = self.route.borrow_mut();
        route.brokers = std::mem::take(&mut self.new_brokers);
        tracing::debug!(
            "Route {:#x} knows {} brokers",
            route.exit_id,
            route.brokers.len()
        );
    }

    fn on_decode_topic(&mut self, cx: &mut Context, error_code: i16, name: &Bytes) {
        let error = KafkaCode::from(error_code);
        match error {
            KafkaCode::None | KafkaCode::UnknownTopicOrPartition => {
                debug_assert_eq!(&name[..], self.topic.as_bytes());
                self.new_partitions.clear();
            }
            _ => {
                tracing::warn!("Metadata for {} failed: {:?}", self.topic, error);
                self.app.cleanup(cx, Some(error_code));
                self.network.end(cx);
                self.decoder = MetaDecoder::IgnoreAll;
            }
        }
    }

    fn on_decode_partition(&mut self, partition_id: i32, leader_id: i32, error_code: i16) {
        if error_code == KafkaCode::None.value() {
            self.new_partitions.insert(partition_id, leader_id);
        } else {
            tracing::trace!(
                "Skipping {}[{}] with error {}",
                self.topic,
                partition_id,
                error_code
            );
        }
    }

    fn on_decode_response(&mut self, cx: &mut Context) {
        self.app.window_initial(cx, 0, 0, 0);
        let ext = MetaBeginEx {
            topic: self.topic.clone(),
        };
        self.app
            .begin_reply(cx, Some(BeginEx::Kafka(KafkaBeginEx::Meta(ext))));

        {
            let mut route = self.route.borrow_mut();
            let shared = route.partitions.entry(self.topic.clone()).or_default();
            if *shared != self.new_partitions {
                *shared = self.new_partitions.clone();
            }
        }

        if self.partitions_sent.as_ref() != Some(&self.new_partitions) {
            tracing::debug!(
                "Leaders of {} now {:?}",
                self.topic,
                self.new_partitions
            );
            let partitions = self
                .new_partitions
                .iter()
                .map(|(&partition_id, &leader_id)| PartitionLeader {
                    partition_id,
                    leader_id,
                })
                .collect();
            let reserved = self.app.reply.padding;
            self.app.data_reply(
                cx,
                FLAGS_COMPLETE,
                reserved,
                Bytes::new(),
                Some(DataEx::Meta(MetaDataEx { partitions })),
            );
            self.partitions_sent = Some(self.new_partitions.clone());
        }

        self.network.next_response_id += 1;
        let at = cx.now() + cx.config().meta_max_age_millis;
        self.next_request_at = Some(cx.signal_at(at, self.network.initial_id, SIGNAL_NEXT_REQUEST));
    }

    fn decode_meta(
        &mut self,
        cx: &mut Context,
        buffer: &Bytes,
        progress: usize,
        limit: usize,
    ) -> Result<usize> {
        match self.decoder {
            MetaDecoder::MetaResponse => {
                match try_wrap(parse_response_header, buffer, progress, limit)? {
                    Some((header, sizeof)) => {
                        tracing::trace!("Metadata response {}", header.correlation_id);
                        self.decoder = MetaDecoder::Meta;
                        Ok(progress + sizeof)
                    }
                    None => Ok(progress),
                }
            }
            MetaDecoder::Meta => {
                match try_wrap(parse_metadata_response_head, buffer, progress, limit)? {
                    Some((head, sizeof)) => {
                        self.new_brokers.clear();
                        self.brokers = head.broker_count;
                        self.decoder = MetaDecoder::MetaBrokers;
                        Ok(progress + sizeof)
                    }
                    None => Ok(progress),
                }
            }
            MetaDecoder::MetaBrokers => {
                if self.brokers <= 0 {
                    self.on_decode_brokers();
                    self.decoder = MetaDecoder::MetaCluster;
                } else {
                    self.decoder = MetaDecoder::MetaBroker;
                }
                Ok(progress)
            }
            MetaDecoder::MetaBroker => {
                match try_wrap(parse_broker_metadata, buffer, progress, limit)? {
                    Some((broker, sizeof)) => {
                        let host =
                            String::from_utf8(broker.host.to_vec()).map_err(|_| Error::DecodingUtf8Error)?;
                        self.new_brokers.insert(
                            broker.node_id,
                            BrokerInfo {
                                node_id: broker.node_id,
                                host,
                                port: broker.port,
                            },
                        );
                        self.brokers -= 1;
                        self.decoder = MetaDecoder::MetaBrokers;
                        Ok(progress + sizeof)
                    }
                    None => Ok(progress),
                }
            }
            MetaDecoder::MetaCluster => {
                match try_wrap(parse_cluster_metadata, buffer, progress, limit)? {
                    Some((cluster, sizeof)) => {
                        self.topics = cluster.topic_count;
                        self.decoder = MetaDecoder::MetaTopics;
                        Ok(progress + sizeof)
                    }
                    None => Ok(progress),
                }
            }
            MetaDecoder::MetaTopics => {
                if self.topics <= 0 {
                    self.decoder = MetaDecoder::Reject;
                    self.on_decode_response(cx);
                } else {
                    self.decoder = MetaDecoder::MetaTopic;
                }
                Ok(progress)
            }
            MetaDecoder::MetaTopic => {
                match try_wrap(parse_topic_metadata_head, buffer, progress, limit)? {
                    Some((topic, sizeof)) => {
                        self.partitions = topic.partition_count;
                        self.decoder = MetaDecoder::MetaPartitions;
                        self.on_decode_topic(cx, topic.error_code, &topic.name);
                        Ok(progress + sizeof)
                    }
                    None => Ok(progress),
                }
            }
            MetaDecoder::MetaPartitions => {
                if self.partitions <= 0 {
                    self.topics -= 1;
                    self.decoder = MetaDecoder::MetaTopics;
                } else {
                    self.decoder = MetaDecoder::MetaPartition;
                }
                Ok(progress)
            }
            MetaDecoder::MetaPartition => {
                match try_wrap(parse_partition_metadata, buffer, progress, limit)? {
                    Some((partition, sizeof)) => {
                        self.partitions -= 1;
                        self.decoder = MetaDecoder::MetaPartitions;
                        self.on_decode_partition(
                            partition.partition_index,
                            partition.leader_id,
                            partition.error_code,
                        );
                        Ok(progress + sizeof)
                    }
                    None => Ok(progress),
                }
            }
            _ => Ok(progress),
        }
    }
}

impl Client for MetaClient {
    type Decoder = MetaDecoder;

    fn decoder(&self) -> MetaDecoder {
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
            MetaDecoder::Sasl(mut decoder) => {
                let (progress, event) = sasl::decode(&mut decoder, buffer, progress, limit)?;
                self.decoder = MetaDecoder::Sasl(decoder);
                if let Some(event) = event {
                    self.on_sasl(cx, event);
                }
                Ok(progress)
            }
            MetaDecoder::Reject if progress < limit => {
                Err(Error::ParsingError(buffer.slice(progress..limit)))
            }
            MetaDecoder::Reject => Ok(progress),
            MetaDecoder::IgnoreAll => Ok(limit),
            _ => self.decode_meta(cx, buffer, progress, limit),
        }
    }

    fn reject(&mut self, cx: &mut Context) {
        self.decoder = MetaDecoder::IgnoreAll;
        self.cleanup_network(cx);
    }

    fn cleanup(&mut self, cx: &mut Context, error: Error) {
        tracing::error!("Meta {} failed: {}", self.topic, error);
        self.cleanup_network(cx);
    }
}

impl MessageConsumer for MetaClient {
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
            frame => tracing::trace!("Meta ignoring {} {:#x}", frame.name(), frame.stream_id()),
        }
    }

    fn is_closed(&self) -> bool {
        self.app.is_closed() && !self.network.is_open()
    }
}

#[instrument(name = "meta-request", level = "debug", skip(client_id))]
pub fn encode_meta_request(correlation_id: i32, client_id: &str, topic: &str) -> Result<Bytes> {
    let topics = [topic];
    encode_request(&MetadataRequest::new(correlation_id, client_id, &topics))
}

#[cfg(test)]
mod test {
    use std::{cell::RefCell, rc::Rc};

    use super::*;
    use crate::{binding::ClientRoute, config::GatewayConfig, engine::Engine};

    fn response(leader: u8) -> Bytes {
        let mut bytes = vec![
            0, 0, 0, 0, // length, unchecked
            0, 0, 0, 1, // correlation id
            0, 0, 0, 0, // throttle
            0, 0, 0, 1, // brokers
            0, 0, 0, 1, 0, 9, b'l', b'o', b'c', b'a', b'l', b'h', b'o', b's', b't', 0, 0, 0x23,
            0x84, 255, 255, // broker 1 localhost:9092
            255, 255, // cluster id
            0, 0, 0, 1, // controller
            0, 0, 0, 1, // topics
            0, 0, 0, 4, b't', b'e', b's', b't', 0, // topic
            0, 0, 0, 2, // partitions
        ];
        for (partition, error) in [(0u8, 0u8), (1, 5)] {
            bytes.extend_from_slice(&[0, error, 0, 0, 0, partition, 0, 0, 0, leader]);
            bytes.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        }
        Bytes::from(bytes)
    }

    fn client(route: &ClientRouteRef) -> MetaClient {
        let begin = Begin {
            stream_id: 3,
            ..Default::default()
        };
        let ext = MetaBeginEx {
            topic: "test".to_owned(),
        };
        MetaClient::new(&begin, ext, Rc::clone(route), None)
    }

    #[test]
    fn response_updates_route() {
        let mut engine = Engine::new(GatewayConfig::default());
        let route: ClientRouteRef = Rc::new(RefCell::new(ClientRoute::default()));
        let mut client = client(&route);

        let bytes = response(1);
        let progress = client.decode_all(engine.context(), &bytes, 0, bytes.len());
        assert_eq!(progress, bytes.len());
        assert_eq!(client.decoder(), MetaDecoder::Reject);

        let route = route.borrow();
        assert_eq!(route.broker(1).map(|broker| broker.port), Some(9092));
        assert_eq!(route.leader("test", 0), Some(1));
        assert_eq!(route.leader("test", 1), None);
        assert_eq!(client.network.next_response_id, 1);
    }

    #[test]
    fn unchanged_leaders_are_sent_once() {
        let mut engine = Engine::new(GatewayConfig::default());
        let route: ClientRouteRef = Rc::new(RefCell::new(ClientRoute::default()));
        let mut client = client(&route);
        client.app.reply.padding = 1;

        let bytes = response(1);
        client.decode_all(engine.context(), &bytes, 0, bytes.len());
        assert_eq!(client.app.reply.sequence, 1);

        client.decoder = MetaDecoder::MetaResponse;
        client.decode_all(engine.context(), &bytes, 0, bytes.len());
        assert_eq!(client.app.reply.sequence, 1);

        let bytes = response(2);
        client.decoder = MetaDecoder::MetaResponse;
        client.decode_all(engine.context(), &bytes, 0, bytes.len());
        assert_eq!(client.app.reply.sequence, 2);
        assert_eq!(route.borrow().leader("test", 0), Some(2));
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut engine = Engine::new(GatewayConfig::default());
        let route: ClientRouteRef = Rc::new(RefCell::new(ClientRoute::default()));
        let mut client = client(&route);

        let mut bytes = response(2).to_vec();
        bytes.push(0);
        let bytes = Bytes::from(bytes);
        assert_eq!(
            client.decode_all(engine.context(), &bytes, 0, bytes.len()),
            bytes.len()
        );
        assert_eq!(client.decoder(), MetaDecoder::IgnoreAll);
    }
}
