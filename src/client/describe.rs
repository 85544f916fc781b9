//! Describe client: watches a chosen set of topic configs.
//!
//! The response is small, so unlike the other clients it is decoded only
//! once it has arrived whole. Every `describe_max_age_millis` the configs
//! are asked for again and the application hears about the ones whose
//! value changed.
use bytes::Bytes;
use tracing::instrument;

use crate::{
    binding::{ClientRouteRef, SaslConfig},
    engine::{Context, MessageConsumer},
    error::{Error, KafkaCode, Result},
    protocol::{
        describe_configs::{
            request::Resource,
            response::{parse_describe_configs_response, DescribeConfigsResponse},
        },
        encode_request, DescribeConfigsRequest,
    },
    stream::{
        ext::{BeginEx, ConfigEntry, DescribeBeginEx, DescribeDataEx, KafkaBeginEx},
        state, Begin, DataEx, Frame, Signal, FLAGS_COMPLETE,
    },
};

use super::{
    sasl::{self, SaslDecoder, SaslEvent},
    try_wrap_response, ApplicationStream, Client, NetworkStream, SIGNAL_NEXT_REQUEST,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DescribeEncoder {
    SaslHandshake,
    SaslAuthenticate,
    Describe,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DescribeDecoder {
    Sasl(SaslDecoder),
    DescribeResponse,
    Reject,
    IgnoreAll,
}

pub struct DescribeClient {
    app: ApplicationStream,
    network: NetworkStream,
    route: ClientRouteRef,
    sasl: Option<SaslConfig>,
    topic: String,
    /// Watched config names in request order, with their last value.
    configs: Vec<(String, Option<String>)>,
    encoder: DescribeEncoder,
    decoder: DescribeDecoder,
    next_request_at: Option<u64>,
}

impl DescribeClient {
    pub fn new(
        begin: &Begin,
        ext: DescribeBeginEx,
        route: ClientRouteRef,
        sasl: Option<SaslConfig>,
    ) -> Self {
        let exit_id = route.borrow().exit_id;
        DescribeClient {
            app: ApplicationStream::new(begin),
            network: NetworkStream::new(begin.routed_id, exit_id),
            route,
            encoder: if sasl.is_some() {
                DescribeEncoder::SaslHandshake
            } else {
                DescribeEncoder::Describe
            },
            decoder: if sasl.is_some() {
                DescribeDecoder::Sasl(SaslDecoder::HandshakeResponse)
            } else {
                DescribeDecoder::Reject
            },
            sasl,
            topic: ext.topic,
            configs: ext.configs.into_iter().map(|name| (name, None)).collect(),
            next_request_at: None,
        }
    }

    fn on_application(&mut self, cx: &mut Context, frame: Frame) {
        match frame {
            Frame::Begin(_) => {
                self.app.on_begin();
                let affinity = self.app.affinity;
                let proxy = self
                    .route
                    .borrow()
                    .broker(affinity as i32)
                    .and_then(|broker| NetworkStream::proxy_ex(&broker.host, broker.port));
                self.network.begin(cx, affinity, proxy);
            }
            Frame::Data(data) => {
                tracing::error!("Unexpected data on describe stream {:#x}", data.stream_id);
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

    fn cancel_next_request(&mut self, cx: &mut Context) {
        if let Some(cancel_id) = self.next_request_at.take() {
            cx.cancel(cancel_id);
        }
    }

    fn cleanup_network(&mut self, cx: &mut Context) {
        self.cancel_next_request(cx);
        self.network.cleanup(cx);
        self.app.cleanup(cx, None);
    }

    fn encode_request_if_necessary(&mut self, cx: &mut Context) {
        if !state::initial_opened(self.network.state)
            || state::initial_closing(self.network.state)
            || !self.network.is_idle()
            || self.decoder == DescribeDecoder::IgnoreAll
        {
            return;
        }

        let correlation_id = self.network.next_request_id;
        let config = cx.config().clone();
        let request = match (self.encoder, &self.sasl) {
            (DescribeEncoder::SaslHandshake, Some(sasl)) => {
                sasl::encode_handshake(correlation_id, &config.client_id, sasl)
            }
            (DescribeEncoder::SaslAuthenticate, Some(sasl)) => {
                sasl::encode_authenticate(correlation_id, &config.client_id, sasl)
            }
            (DescribeEncoder::Describe, _) => {
                self.decoder = DescribeDecoder::DescribeResponse;
                let names: Vec<&str> = self.configs.iter().map(|(name, _)| name.as_str()).collect();
                encode_describe_request(correlation_id, &config.client_id, &self.topic, &names)
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
                self.encoder = DescribeEncoder::SaslAuthenticate;
            }
            SaslEvent::Authenticate(KafkaCode::None) => {
                self.encoder = DescribeEncoder::Describe;
                self.decoder = DescribeDecoder::Reject;
            }
            SaslEvent::Handshake(error) | SaslEvent::Authenticate(error) => {
                tracing::warn!("SASL failed for describe {}: {:?}", self.topic, error);
                self.app.cleanup(cx, Some(error.value()));
                self.network.end(cx);
                self.decoder = DescribeDecoder::IgnoreAll;
                return;
            }
        }
        self.network.next_response_id += 1;
        cx.signal_now(self.network.initial_id, SIGNAL_NEXT_REQUEST);
    }

    fn on_decode_response(&mut self, cx: &mut Context, response: DescribeConfigsResponse) {
        let mut values = vec![];
        for resource in response.results {
            if resource.error_code != KafkaCode::None.value() {
                tracing::warn!(
                    "Describe {} failed: {:?}",
                    self.topic,
                    KafkaCode::from(resource.error_code)
                );
                self.app.cleanup(cx, Some(resource.error_code));
                self.network.end(cx);
                self.decoder = DescribeDecoder::IgnoreAll;
                return;
            }
            debug_assert_eq!(&resource.resource_name[..], self.topic.as_bytes());
            values.extend(resource.configs.into_iter().map(|entry| {
                (
                    String::from_utf8_lossy(&entry.name).into_owned(),
                    entry
                        .value
                        .map(|value| String::from_utf8_lossy(&value).into_owned()),
                )
            }));
        }

        self.app.window_initial(cx, 0, 0, 0);
        let ext = DescribeBeginEx {
            topic: self.topic.clone(),
            configs: self.configs.iter().map(|(name, _)| name.clone()).collect(),
        };
        self.app
            .begin_reply(cx, Some(BeginEx::Kafka(KafkaBeginEx::Describe(ext))));

        let mut changed = vec![];
        for (name, value) in self.configs.iter_mut() {
            let new_value = values
                .iter()
                .find(|(new_name, _)| new_name == name)
                .and_then(|(_, value)| value.clone());
            if *value != new_value {
                *value = new_value;
                changed.push(ConfigEntry {
                    name: name.clone(),
                    value: value.clone(),
                });
            }
        }

        if !changed.is_empty() {
            tracing::debug!("{} configs of {} changed", changed.len(), self.topic);
            let reserved = self.app.reply.padding;
            self.app.data_reply(
                cx,
                FLAGS_COMPLETE,
                reserved,
                Bytes::new(),
                Some(DataEx::Describe(DescribeDataEx { configs: changed })),
            );
        }

        self.network.next_response_id += 1;
        let at = cx.now() + cx.config().describe_max_age_millis;
        self.next_request_at = Some(cx.signal_at(at, self.network.initial_id, SIGNAL_NEXT_REQUEST));
    }
}

impl Client for DescribeClient {
    type Decoder = DescribeDecoder;

    fn decoder(&self) -> DescribeDecoder {
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
            DescribeDecoder::Sasl(mut decoder) => {
                let (progress, event) = sasl::decode(&mut decoder, buffer, progress, limit)?;
                self.decoder = DescribeDecoder::Sasl(decoder);
                if let Some(event) = event {
                    self.on_sasl(cx, event);
                }
                Ok(progress)
            }
            DescribeDecoder::DescribeResponse => {
                match try_wrap_response(parse_describe_configs_response, buffer, progress, limit)? {
                    Some((response, progress)) => {
                        self.decoder = DescribeDecoder::Reject;
                        self.on_decode_response(cx, response);
                        Ok(progress)
                    }
                    None => Ok(progress),
                }
            }
            DescribeDecoder::Reject if progress < limit => {
                Err(Error::ParsingError(buffer.slice(progress..limit)))
            }
            DescribeDecoder::Reject => Ok(progress),
            DescribeDecoder::IgnoreAll => Ok(limit),
        }
    }

    fn reject(&mut self, cx: &mut Context) {
        self.decoder = DescribeDecoder::IgnoreAll;
        self.network.reset(cx);
    }

    fn cleanup(&mut self, cx: &mut Context, error: Error) {
        tracing::error!("Describe {} failed: {}", self.topic, error);
        self.cleanup_network(cx);
    }
}

impl MessageConsumer for DescribeClient {
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
            frame => tracing::trace!("Describe ignoring {} {:#x}", frame.name(), frame.stream_id()),
        }
    }

    fn is_closed(&self) -> bool {
        self.app.is_closed() && !self.network.is_open()
    }
}

#[instrument(name = "describe-request", level = "debug", skip(client_id))]
pub fn encode_describe_request(
    correlation_id: i32,
    client_id: &str,
    topic: &str,
    configs: &[&str],
) -> Result<Bytes> {
    let request =
        DescribeConfigsRequest::new(correlation_id, client_id, vec![Resource::topic(topic, configs)]);
    encode_request(&request)
}

#[cfg(test)]
mod test {
    use std::{cell::RefCell, rc::Rc};

    use super::*;
    use crate::{binding::ClientRoute, config::GatewayConfig, engine::Engine};

    fn response(value: &'static [u8]) -> Bytes {
        let mut body = vec![
            0, 0, 0, 1, // correlation id
            0, 0, 0, 0, // throttle
            0, 0, 0, 1, // results
            0, 0, 255, 255, 2, 0, 4, b't', b'e', b's', b't', // topic resource
            0, 0, 0, 1, // configs
            0, 14,
        ];
        body.extend_from_slice(b"cleanup.policy");
        body.extend_from_slice(&[0, value.len() as u8]);
        body.extend_from_slice(value);
        body.extend_from_slice(&[0, 1, 0]);

        let mut bytes = (body.len() as i32).to_be_bytes().to_vec();
        bytes.extend(body);
        Bytes::from(bytes)
    }

    fn client() -> DescribeClient {
        let begin = Begin {
            stream_id: 5,
            ..Default::default()
        };
        let ext = DescribeBeginEx {
            topic: "test".to_owned(),
            configs: vec!["cleanup.policy".to_owned(), "segment.bytes".to_owned()],
        };
        let route = Rc::new(RefCell::new(ClientRoute::default()));
        DescribeClient::new(&begin, ext, route, None)
    }

    #[test]
    fn waits_for_whole_response() {
        let mut engine = Engine::new(GatewayConfig::default());
        let mut client = client();
        client.decoder = DescribeDecoder::DescribeResponse;

        let bytes = response(b"delete");
        let partial = client.decode_all(engine.context(), &bytes, 0, bytes.len() - 1);
        assert_eq!(partial, 0);

        let progress = client.decode_all(engine.context(), &bytes, 0, bytes.len());
        assert_eq!(progress, bytes.len());
        assert_eq!(
            client.configs,
            vec![
                ("cleanup.policy".to_owned(), Some("delete".to_owned())),
                ("segment.bytes".to_owned(), None),
            ]
        );
    }

    #[test]
    fn only_changes_are_delivered() {
        let mut engine = Engine::new(GatewayConfig::default());
        let mut client = client();
        client.app.reply.padding = 1;

        for (value, sequence) in [(&b"delete"[..], 1), (&b"delete"[..], 1), (&b"compact"[..], 2)] {
            client.decoder = DescribeDecoder::DescribeResponse;
            let bytes = response(value);
            client.decode_all(engine.context(), &bytes, 0, bytes.len());
            assert_eq!(client.app.reply.sequence, sequence);
        }
    }

    #[test]
    fn request_names_topic_resource() {
        let bytes = encode_describe_request(7, "relay", "test", &["cleanup.policy"]).unwrap();
        // resources
        assert_eq!(&bytes[19..23], &[0, 0, 0, 1]);
        assert_eq!(bytes[23], 2);
        assert_eq!(&bytes[24..30], b"\x00\x04test");
    }
}
