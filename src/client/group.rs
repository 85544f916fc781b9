//! Group driver: joins one consumer group on behalf of an application
//! stream and keeps the membership alive.
//!
//! The driver walks through three connections in turn. A cluster
//! connection to any broker finds the coordinator of the group. The first
//! request on the coordinator connection describes the coordinator broker
//! for the session timeouts it accepts, then the same connection runs
//! JoinGroup, SyncGroup, periodic Heartbeat and finally LeaveGroup.
//!
//! Application frames map onto the group protocol like this:
//!
//! * Begin opens the cluster connection,
//! * a JoinGroup outcome is answered with a Flush carrying the members,
//! * Data carries the leader's assignments and triggers SyncGroup, whose
//!   outcome comes back as Data,
//! * Flush with metadata rejoins, Flush without it heartbeats at once,
//! * End leaves the group.
use std::rc::Rc;

use bytes::Bytes;
use tracing::instrument;

use crate::{
    binding::{BrokerInfo, ClientRouteRef, GroupMembershipRef, SaslConfig},
    engine::{Context, MessageConsumer},
    error::{Error, KafkaCode, Result},
    parser,
    protocol::{
        describe_configs::{
            request::Resource,
            response::{parse_describe_configs_response, DescribeConfigsResponse, ResourceResult},
        },
        encode_request,
        find_coordinator::response::{parse_find_coordinator_response, FindCoordinatorResponse},
        heartbeat::response::{parse_heartbeat_response, HeartbeatResponse},
        join_group::{
            request::Protocol,
            response::{parse_join_group_response, JoinGroupResponse},
        },
        leave_group::response::{parse_leave_group_response, LeaveGroupResponse},
        sync_group::{
            request::Assignment,
            response::{parse_sync_group_response, SyncGroupResponse},
        },
        DescribeConfigsRequest, FindCoordinatorRequest, HeartbeatRequest, JoinGroupRequest,
        LeaveGroupRequest, SyncGroupRequest,
    },
    stream::{
        ext::{
            BeginEx, GroupBeginEx, GroupFlushEx, GroupMember, KafkaBeginEx, MemberAssignment,
        },
        state, Begin, DataEx, FlushEx, Frame, Signal, FLAGS_COMPLETE,
    },
};

use super::{
    sasl::{self, SaslDecoder, SaslEvent},
    try_wrap_response, ApplicationStream, Client, GroupStreams, NetworkStream,
    SIGNAL_NEXT_REQUEST,
};

/// Protocol whose newest stream takes over the group from the previous one.
pub const HIGHLANDER_PROTOCOL: &str = "highlander";

/// Tells a group stream that a newer stream took its group over.
pub const SIGNAL_MIGRATE: i32 = 2;
const SIGNAL_HEARTBEAT: i32 = 3;

const PROTOCOL_TYPE: &str = "consumer";
const GROUP_MIN_SESSION_TIMEOUT: &str = "group.min.session.timeout.ms";
const GROUP_MAX_SESSION_TIMEOUT: &str = "group.max.session.timeout.ms";
const MAX_SESSION_TIMEOUT_MILLIS: i32 = 30_000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GroupPhase {
    Cluster,
    Describe,
    Coordinator,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GroupEncoder {
    SaslHandshake,
    SaslAuthenticate,
    FindCoordinator,
    DescribeConfigs,
    JoinGroup,
    SyncGroup,
    Heartbeat,
    LeaveGroup,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GroupDecoder {
    Sasl(SaslDecoder),
    FindCoordinatorResponse,
    DescribeConfigsResponse,
    JoinGroupResponse,
    SyncGroupResponse,
    HeartbeatResponse,
    LeaveGroupResponse,
    Reject,
    IgnoreAll,
}

pub struct GroupStream {
    app: ApplicationStream,
    network: NetworkStream,
    route: ClientRouteRef,
    sasl: Option<SaslConfig>,
    membership: GroupMembershipRef,
    group_streams: GroupStreams,
    group_id: String,
    protocol: String,
    /// Session timeout in milliseconds, clamped once the coordinator is described.
    timeout: i32,
    metadata: Bytes,
    phase: GroupPhase,
    /// Next request to send, `None` while nothing is due.
    encoder: Option<GroupEncoder>,
    /// Request the connection continues with once SASL completes.
    after_sasl: GroupEncoder,
    decoder: GroupDecoder,
    coordinator: Option<BrokerInfo>,
    generation_id: i32,
    /// Members reported by the last join, empty unless we lead the group.
    members: Vec<String>,
    assignments: Vec<MemberAssignment>,
    joining: bool,
    rejoin: bool,
    leaving: bool,
    heartbeat_at: Option<u64>,
}

impl GroupStream {
    pub fn new(
        begin: &Begin,
        ext: GroupBeginEx,
        route: ClientRouteRef,
        sasl: Option<SaslConfig>,
        membership: GroupMembershipRef,
        group_streams: GroupStreams,
    ) -> Self {
        let exit_id = route.borrow().exit_id;
        GroupStream {
            app: ApplicationStream::new(begin),
            network: NetworkStream::new(begin.routed_id, exit_id),
            route,
            sasl,
            membership,
            group_streams,
            group_id: ext.group_id,
            protocol: ext.protocol,
            timeout: ext.timeout.min(MAX_SESSION_TIMEOUT_MILLIS),
            metadata: ext.metadata,
            phase: GroupPhase::Cluster,
            encoder: None,
            after_sasl: GroupEncoder::FindCoordinator,
            decoder: GroupDecoder::Reject,
            coordinator: None,
            generation_id: -1,
            members: vec![],
            assignments: vec![],
            joining: false,
            rejoin: false,
            leaving: false,
            heartbeat_at: None,
        }
    }

    fn on_application(&mut self, cx: &mut Context, frame: Frame) {
        match frame {
            Frame::Begin(_) => {
                self.app.on_begin();
                self.group_streams
                    .borrow_mut()
                    .insert(self.group_id.clone(), (cx.current(), self.app.initial_id));
                self.window_application(cx);
                self.connect(cx, GroupPhase::Cluster);
            }
            Frame::Data(data) => {
                if let Err(err) = self.app.received(data.sequence, data.reserved) {
                    self.cleanup(cx, err);
                    return;
                }
                self.window_application(cx);
                self.assignments = match data.extension {
                    Some(DataEx::Group(ext)) => ext.assignments,
                    _ => vec![],
                };
                if self.phase == GroupPhase::Coordinator {
                    self.request(cx, GroupEncoder::SyncGroup);
                }
            }
            Frame::Flush(flush) => match flush.extension {
                Some(FlushEx::Group(ext)) => {
                    if let Some(metadata) = ext.metadata {
                        self.metadata = metadata;
                    }
                    self.join(cx);
                }
                _ => self.heartbeat(cx),
            },
            Frame::End(_) => {
                self.app.state = state::closed_initial(self.app.state);
                self.leave(cx);
            }
            Frame::Abort(_) => {
                self.app.state = state::closed_initial(self.app.state);
                self.cleanup_stream(cx, None);
            }
            Frame::Window(window) => self.app.on_window(&window),
            Frame::Reset(_) => {
                self.app.state = state::closed_reply(self.app.state);
                self.cleanup_stream(cx, None);
            }
            _ => {}
        }
    }

    fn on_network(&mut self, cx: &mut Context, frame: Frame) {
        match frame {
            Frame::Begin(_) => self.network.on_begin(cx),
            Frame::Data(data) => self.on_network_data(cx, &data),
            Frame::End(_) | Frame::Abort(_) | Frame::Reset(_) => {
                match &frame {
                    Frame::End(_) => self.network.on_end(),
                    Frame::Abort(_) => self.network.on_abort(),
                    _ => self.network.on_reset(),
                }
                if self.decoder == GroupDecoder::IgnoreAll {
                    self.network.cleanup(cx);
                } else {
                    tracing::warn!(
                        "Group {} lost its {:?} connection",
                        self.group_id,
                        self.phase
                    );
                    self.cleanup_stream(cx, None);
                }
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
            SIGNAL_NEXT_REQUEST => {
                if state::initial_closed(self.network.state)
                    && !self.app_closed()
                    && self.decoder != GroupDecoder::IgnoreAll
                {
                    self.connect(cx, self.phase);
                } else {
                    self.encode_request_if_necessary(cx);
                }
            }
            SIGNAL_HEARTBEAT => {
                self.heartbeat_at = None;
                if self.encoder.is_none() {
                    self.request(cx, GroupEncoder::Heartbeat);
                }
            }
            SIGNAL_MIGRATE => {
                tracing::debug!(
                    "Group {} moved away from stream {:#x}",
                    self.group_id,
                    self.app.initial_id
                );
                self.cancel_heartbeat(cx);
                self.network.cleanup(cx);
                self.app.cleanup(cx, None);
            }
            _ => {}
        }
    }

    /// Opens the connection `phase` runs on, to the coordinator once it is
    /// known and to any broker before.
    fn connect(&mut self, cx: &mut Context, phase: GroupPhase) {
        self.phase = phase;
        let (first, affinity, proxy) = match (phase, &self.coordinator) {
            (GroupPhase::Cluster, _) | (_, None) => {
                self.phase = GroupPhase::Cluster;
                let route = self.route.borrow();
                match route.brokers.values().next() {
                    Some(broker) => (
                        GroupEncoder::FindCoordinator,
                        broker.node_id as i64,
                        NetworkStream::proxy_ex(&broker.host, broker.port),
                    ),
                    None => (GroupEncoder::FindCoordinator, self.app.affinity, None),
                }
            }
            (_, Some(coordinator)) => (
                GroupEncoder::DescribeConfigs,
                coordinator.node_id as i64,
                NetworkStream::proxy_ex(&coordinator.host, coordinator.port),
            ),
        };
        tracing::debug!("Group {} connecting for {:?}", self.group_id, self.phase);

        self.after_sasl = first;
        if self.sasl.is_some() {
            self.encoder = Some(GroupEncoder::SaslHandshake);
            self.decoder = GroupDecoder::Sasl(SaslDecoder::HandshakeResponse);
        } else {
            self.encoder = Some(first);
            self.decoder = GroupDecoder::Reject;
        }
        self.network.begin(cx, affinity, proxy);
    }

    /// Closes the current connection, the next one opens on the next
    /// request signal.
    fn reconnect(&mut self, cx: &mut Context, phase: GroupPhase) {
        self.network.end(cx);
        self.network.reset(cx);
        self.phase = phase;
        self.encoder = None;
        cx.signal_now(self.network.initial_id, SIGNAL_NEXT_REQUEST);
    }

    fn request(&mut self, cx: &mut Context, encoder: GroupEncoder) {
        let encoder = if self.leaving {
            GroupEncoder::LeaveGroup
        } else {
            encoder
        };
        self.encoder = Some(encoder);
        cx.signal_now(self.network.initial_id, SIGNAL_NEXT_REQUEST);
    }

    fn join(&mut self, cx: &mut Context) {
        self.cancel_heartbeat(cx);
        if self.phase != GroupPhase::Coordinator {
            return;
        }
        if self.joining {
            self.rejoin = true;
        } else {
            self.request(cx, GroupEncoder::JoinGroup);
        }
    }

    fn heartbeat(&mut self, cx: &mut Context) {
        if self.phase != GroupPhase::Coordinator
            || self.joining
            || self.encoder == Some(GroupEncoder::JoinGroup)
        {
            return;
        }
        self.cancel_heartbeat(cx);
        self.request(cx, GroupEncoder::Heartbeat);
    }

    fn leave(&mut self, cx: &mut Context) {
        self.cancel_heartbeat(cx);
        self.leaving = true;
        let member_id = self.membership.borrow().member_id(&self.group_id);
        if self.phase == GroupPhase::Coordinator && !member_id.is_empty() {
            self.request(cx, GroupEncoder::LeaveGroup);
        } else {
            self.on_leave_group(cx);
        }
    }

    fn schedule_heartbeat(&mut self, cx: &mut Context) {
        self.cancel_heartbeat(cx);
        let at = cx.now() + (self.timeout / 2) as i64;
        self.heartbeat_at = Some(cx.signal_at(at, self.network.initial_id, SIGNAL_HEARTBEAT));
    }

    fn cancel_heartbeat(&mut self, cx: &mut Context) {
        if let Some(cancel_id) = self.heartbeat_at.take() {
            cx.cancel(cancel_id);
        }
    }

    fn deregister(&mut self) {
        let mut streams = self.group_streams.borrow_mut();
        if streams.get(&self.group_id).map(|(_, initial_id)| *initial_id) == Some(self.app.initial_id) {
            streams.remove(&self.group_id);
        }
    }

    fn cleanup_stream(&mut self, cx: &mut Context, error: Option<i16>) {
        self.cancel_heartbeat(cx);
        self.decoder = GroupDecoder::IgnoreAll;
        self.encoder = None;
        self.network.cleanup(cx);
        self.app.cleanup(cx, error);
        self.deregister();
    }

    /// Assignments arrive as Data, one slot at a time.
    fn window_application(&mut self, cx: &mut Context) {
        let maximum = cx.slot_capacity() as i32;
        self.app.window_initial(cx, 0, 0, maximum);
    }

    fn begin_reply(&mut self, cx: &mut Context) {
        let ext = GroupBeginEx {
            group_id: self.group_id.clone(),
            protocol: self.protocol.clone(),
            timeout: self.timeout,
            metadata: Bytes::new(),
        };
        self.app
            .begin_reply(cx, Some(BeginEx::Kafka(KafkaBeginEx::Group(ext))));
    }

    fn encode_request_if_necessary(&mut self, cx: &mut Context) {
        if !state::initial_opened(self.network.state)
            || state::initial_closing(self.network.state)
            || !self.network.is_idle()
            || self.decoder == GroupDecoder::IgnoreAll
        {
            return;
        }
        let Some(encoder) = self.encoder.take() else {
            return;
        };

        let correlation_id = self.network.next_request_id;
        let config = cx.config().clone();
        let client_id = config.client_id.as_str();
        let membership = Rc::clone(&self.membership);
        let membership = membership.borrow();
        let member_id = membership.member_id(&self.group_id);
        let instance_id = Some(membership.instance_id.as_str());

        let request = match (encoder, &self.sasl) {
            (GroupEncoder::SaslHandshake, Some(sasl)) => {
                sasl::encode_handshake(correlation_id, client_id, sasl)
            }
            (GroupEncoder::SaslAuthenticate, Some(sasl)) => {
                sasl::encode_authenticate(correlation_id, client_id, sasl)
            }
            (GroupEncoder::SaslHandshake | GroupEncoder::SaslAuthenticate, None) => {
                Err(Error::InvalidSaslMechanism)
            }
            (GroupEncoder::FindCoordinator, _) => {
                self.decoder = GroupDecoder::FindCoordinatorResponse;
                encode_find_coordinator_request(correlation_id, client_id, &self.group_id)
            }
            (GroupEncoder::DescribeConfigs, _) => {
                self.decoder = GroupDecoder::DescribeConfigsResponse;
                let node_id = self
                    .coordinator
                    .as_ref()
                    .map(|coordinator| coordinator.node_id)
                    .unwrap_or_default();
                encode_describe_broker_request(correlation_id, client_id, node_id)
            }
            (GroupEncoder::JoinGroup, _) => {
                self.decoder = GroupDecoder::JoinGroupResponse;
                self.joining = true;
                self.rejoin = false;
                encode_join_group_request(
                    correlation_id,
                    client_id,
                    &self.group_id,
                    self.timeout,
                    config.group_rebalance_timeout.as_millis() as i32,
                    &member_id,
                    instance_id,
                    &self.protocol,
                    self.metadata.clone(),
                )
            }
            (GroupEncoder::SyncGroup, _) => {
                self.decoder = GroupDecoder::SyncGroupResponse;
                let assignments = if self.assignments.is_empty() {
                    self.members
                        .iter()
                        .map(|member| Assignment::new(member, Bytes::new()))
                        .collect()
                } else {
                    self.assignments
                        .iter()
                        .map(|a| Assignment::new(&a.member_id, a.assignment.clone()))
                        .collect()
                };
                encode_request(&SyncGroupRequest::new(
                    correlation_id,
                    client_id,
                    &self.group_id,
                    self.generation_id,
                    &member_id,
                    instance_id,
                    assignments,
                ))
            }
            (GroupEncoder::Heartbeat, _) => {
                self.decoder = GroupDecoder::HeartbeatResponse;
                encode_request(&HeartbeatRequest::new(
                    correlation_id,
                    client_id,
                    &self.group_id,
                    self.generation_id,
                    &member_id,
                    instance_id,
                ))
            }
            (GroupEncoder::LeaveGroup, _) => {
                self.decoder = GroupDecoder::LeaveGroupResponse;
                encode_request(&LeaveGroupRequest::new(
                    correlation_id,
                    client_id,
                    &self.group_id,
                    &member_id,
                    instance_id,
                ))
            }
        };
        drop(membership);

        if encoder == GroupEncoder::JoinGroup {
            self.begin_reply(cx);
        }
        if let Err(err) = request.and_then(|bytes| self.network.encode(cx, bytes)) {
            self.cleanup(cx, err);
        }
    }

    fn on_sasl(&mut self, cx: &mut Context, event: SaslEvent) {
        match event {
            SaslEvent::Handshake(KafkaCode::None) => {
                self.encoder = Some(GroupEncoder::SaslAuthenticate);
            }
            SaslEvent::Authenticate(KafkaCode::None) => {
                self.encoder = Some(self.after_sasl);
                self.decoder = GroupDecoder::Reject;
            }
            SaslEvent::Handshake(error) | SaslEvent::Authenticate(error) => {
                tracing::warn!("SASL failed for group {}: {:?}", self.group_id, error);
                self.app.cleanup(cx, Some(error.value()));
                self.network.end(cx);
                self.decoder = GroupDecoder::IgnoreAll;
                self.deregister();
                return;
            }
        }
        self.network.next_response_id += 1;
        cx.signal_now(self.network.initial_id, SIGNAL_NEXT_REQUEST);
    }

    fn on_error(&mut self, cx: &mut Context, request: &str, error: KafkaCode) {
        tracing::warn!("{} for group {} failed: {:?}", request, self.group_id, error);
        self.cleanup_stream(cx, Some(error.value()));
    }

    fn on_find_coordinator(&mut self, cx: &mut Context, response: FindCoordinatorResponse) {
        self.network.next_response_id += 1;
        match response.error_code {
            KafkaCode::None => {
                let host = match parser::to_string(&response.host) {
                    Ok(host) => host,
                    Err(err) => return self.cleanup(cx, err),
                };
                tracing::debug!(
                    "Group {} coordinated by {} at {}:{}",
                    self.group_id,
                    response.node_id,
                    host,
                    response.port
                );
                self.coordinator = Some(BrokerInfo {
                    node_id: response.node_id,
                    host,
                    port: response.port,
                });
                self.reconnect(cx, GroupPhase::Describe);
            }
            KafkaCode::CoordinatorNotAvailable => {
                tracing::warn!("Coordinator of group {} not available yet", self.group_id);
                self.request(cx, GroupEncoder::FindCoordinator);
            }
            error => self.on_error(cx, "FindCoordinator", error),
        }
    }

    fn on_describe(&mut self, cx: &mut Context, response: DescribeConfigsResponse) {
        self.network.next_response_id += 1;

        let node_id = self
            .coordinator
            .as_ref()
            .map(|coordinator| coordinator.node_id.to_string())
            .unwrap_or_default();
        let timeout_config = |result: &ResourceResult, name: &str| {
            result
                .configs
                .iter()
                .find(|entry| &entry.name[..] == name.as_bytes())
                .and_then(|entry| entry.value.as_ref())
                .and_then(|value| std::str::from_utf8(value).ok())
                .and_then(|value| value.parse::<i32>().ok())
        };

        match response
            .results
            .iter()
            .find(|result| result.error_code == 0 && &result.resource_name[..] == node_id.as_bytes())
        {
            Some(result) => {
                let min = timeout_config(result, GROUP_MIN_SESSION_TIMEOUT);
                let max = timeout_config(result, GROUP_MAX_SESSION_TIMEOUT);
                if let Some(min) = min.filter(|min| self.timeout < *min) {
                    self.timeout = min;
                } else if let Some(max) = max.filter(|max| self.timeout > *max) {
                    self.timeout = max;
                }
                tracing::debug!("Group {} session timeout {}ms", self.group_id, self.timeout);
            }
            None => tracing::warn!(
                "Broker {} did not describe its session timeouts, keeping {}ms",
                node_id,
                self.timeout
            ),
        }

        self.phase = GroupPhase::Coordinator;
        self.request(cx, GroupEncoder::JoinGroup);
    }

    fn on_join_group(&mut self, cx: &mut Context, response: JoinGroupResponse) {
        self.network.next_response_id += 1;
        self.joining = false;

        match response.error_code {
            KafkaCode::None => {
                let (leader_id, member_id) = match (
                    parser::to_string(&response.leader),
                    parser::to_string(&response.member_id),
                ) {
                    (Ok(leader_id), Ok(member_id)) => (leader_id, member_id),
                    (Err(err), _) | (_, Err(err)) => return self.cleanup(cx, err),
                };
                self.generation_id = response.generation_id;
                self.membership
                    .borrow_mut()
                    .member_ids
                    .insert(self.group_id.clone(), member_id.clone());

                let mut members = Vec::with_capacity(response.members.len());
                for member in response.members {
                    match parser::to_string(&member.member_id) {
                        Ok(id) => members.push(GroupMember {
                            id,
                            metadata: member.metadata,
                        }),
                        Err(err) => return self.cleanup(cx, err),
                    }
                }
                self.members = members.iter().map(|member| member.id.clone()).collect();
                self.assignments.clear();

                if self.rejoin || self.leaving {
                    self.request(cx, GroupEncoder::JoinGroup);
                    return;
                }

                tracing::debug!(
                    "Joined group {} generation {} as {}, leader {}",
                    self.group_id,
                    self.generation_id,
                    member_id,
                    leader_id
                );
                self.app.flush_reply(
                    cx,
                    Some(FlushEx::Group(GroupFlushEx {
                        leader_id,
                        member_id,
                        members,
                        metadata: None,
                    })),
                );
            }
            KafkaCode::UnknownMemberId => {
                tracing::warn!("Group {} forgot our member id, rejoining", self.group_id);
                self.membership.borrow_mut().member_ids.remove(&self.group_id);
                self.request(cx, GroupEncoder::JoinGroup);
            }
            KafkaCode::MemberIdRequired => match parser::to_string(&response.member_id) {
                Ok(member_id) => {
                    tracing::debug!("Group {} assigned member id {}", self.group_id, member_id);
                    self.membership
                        .borrow_mut()
                        .member_ids
                        .insert(self.group_id.clone(), member_id);
                    self.request(cx, GroupEncoder::JoinGroup);
                }
                Err(err) => self.cleanup(cx, err),
            },
            KafkaCode::NotCoordinator => {
                tracing::warn!("Coordinator of group {} moved", self.group_id);
                self.reconnect(cx, GroupPhase::Cluster);
            }
            error => self.on_error(cx, "JoinGroup", error),
        }
    }

    fn on_rebalance(&mut self, cx: &mut Context, error: KafkaCode) {
        tracing::warn!("Group {} rebalancing on {:?}", self.group_id, error);
        if error == KafkaCode::UnknownMemberId {
            self.membership.borrow_mut().member_ids.remove(&self.group_id);
        }
        self.request(cx, GroupEncoder::JoinGroup);
    }

    fn on_sync_group(&mut self, cx: &mut Context, response: SyncGroupResponse) {
        self.network.next_response_id += 1;
        match response.error_code {
            KafkaCode::None => {
                tracing::debug!(
                    "Group {} assigned {} bytes",
                    self.group_id,
                    response.assignment.len()
                );
                let reserved = self.app.reply.padding + response.assignment.len() as i32;
                self.app
                    .data_reply(cx, FLAGS_COMPLETE, reserved, response.assignment, None);
                self.schedule_heartbeat(cx);
                if self.leaving {
                    self.request(cx, GroupEncoder::LeaveGroup);
                }
            }
            error @ (KafkaCode::RebalanceInProgress
            | KafkaCode::IllegalGeneration
            | KafkaCode::UnknownMemberId) => self.on_rebalance(cx, error),
            KafkaCode::NotCoordinator => self.reconnect(cx, GroupPhase::Cluster),
            error => self.on_error(cx, "SyncGroup", error),
        }
    }

    fn on_heartbeat(&mut self, cx: &mut Context, response: HeartbeatResponse) {
        self.network.next_response_id += 1;
        match response.error_code {
            KafkaCode::None if self.leaving => self.request(cx, GroupEncoder::LeaveGroup),
            KafkaCode::None => self.schedule_heartbeat(cx),
            error @ (KafkaCode::RebalanceInProgress
            | KafkaCode::IllegalGeneration
            | KafkaCode::UnknownMemberId) => self.on_rebalance(cx, error),
            KafkaCode::NotCoordinator => self.reconnect(cx, GroupPhase::Cluster),
            error => self.on_error(cx, "Heartbeat", error),
        }
    }

    fn on_leave_group(&mut self, cx: &mut Context) {
        tracing::debug!("Left group {}", self.group_id);
        self.cancel_heartbeat(cx);
        self.encoder = None;
        self.decoder = GroupDecoder::IgnoreAll;
        self.network.end(cx);
        self.network.reset(cx);
        if state::reply_opening(self.app.state) {
            self.app.end_reply(cx);
        } else {
            self.app.state = state::closed_reply(self.app.state);
        }
        self.membership.borrow_mut().member_ids.remove(&self.group_id);
        self.deregister();
    }

    fn decode_group(
        &mut self,
        cx: &mut Context,
        buffer: &Bytes,
        progress: usize,
        limit: usize,
    ) -> Result<usize> {
        match self.decoder {
            GroupDecoder::FindCoordinatorResponse => {
                match try_wrap_response(parse_find_coordinator_response, buffer, progress, limit)? {
                    Some((response, progress)) => {
                        self.decoder = GroupDecoder::Reject;
                        self.on_find_coordinator(cx, response);
                        Ok(progress)
                    }
                    None => Ok(progress),
                }
            }
            GroupDecoder::DescribeConfigsResponse => {
                match try_wrap_response(parse_describe_configs_response, buffer, progress, limit)? {
                    Some((response, progress)) => {
                        self.decoder = GroupDecoder::Reject;
                        self.on_describe(cx, response);
                        Ok(progress)
                    }
                    None => Ok(progress),
                }
            }
            GroupDecoder::JoinGroupResponse => {
                match try_wrap_response(parse_join_group_response, buffer, progress, limit)? {
                    Some((response, progress)) => {
                        self.decoder = GroupDecoder::Reject;
                        self.on_join_group(cx, response);
                        Ok(progress)
                    }
                    None => Ok(progress),
                }
            }
            GroupDecoder::SyncGroupResponse => {
                match try_wrap_response(parse_sync_group_response, buffer, progress, limit)? {
                    Some((response, progress)) => {
                        self.decoder = GroupDecoder::Reject;
                        self.on_sync_group(cx, response);
                        Ok(progress)
                    }
                    None => Ok(progress),
                }
            }
            GroupDecoder::HeartbeatResponse => {
                match try_wrap_response(parse_heartbeat_response, buffer, progress, limit)? {
                    Some((response, progress)) => {
                        self.decoder = GroupDecoder::Reject;
                        self.on_heartbeat(cx, response);
                        Ok(progress)
                    }
                    None => Ok(progress),
                }
            }
            GroupDecoder::LeaveGroupResponse => {
                match try_wrap_response(parse_leave_group_response, buffer, progress, limit)? {
                    Some((response, progress)) => {
                        self.network.next_response_id += 1;
                        let LeaveGroupResponse { error_code, .. } = response;
                        if error_code != KafkaCode::None {
                            tracing::warn!("Leaving group {} failed: {:?}", self.group_id, error_code);
                        }
                        self.on_leave_group(cx);
                        Ok(progress)
                    }
                    None => Ok(progress),
                }
            }
            _ => Ok(progress),
        }
    }

    /// The application side is done, with a reply that never opened
    /// counting as closed.
    fn app_closed(&self) -> bool {
        let state = self.app.state;
        state::initial_closed(state) && (state::reply_closed(state) || !state::reply_opening(state))
    }
}

impl Client for GroupStream {
    type Decoder = GroupDecoder;

    fn decoder(&self) -> GroupDecoder {
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
            GroupDecoder::Sasl(mut decoder) => {
                let (progress, event) = sasl::decode(&mut decoder, buffer, progress, limit)?;
                self.decoder = GroupDecoder::Sasl(decoder);
                if let Some(event) = event {
                    self.on_sasl(cx, event);
                }
                Ok(progress)
            }
            GroupDecoder::Reject if progress < limit => {
                Err(Error::ParsingError(buffer.slice(progress..limit)))
            }
            GroupDecoder::Reject => Ok(progress),
            GroupDecoder::IgnoreAll => Ok(limit),
            _ => self.decode_group(cx, buffer, progress, limit),
        }
    }

    fn reject(&mut self, cx: &mut Context) {
        self.cleanup_stream(cx, None);
    }

    fn cleanup(&mut self, cx: &mut Context, error: Error) {
        tracing::error!("Group {} failed: {}", self.group_id, error);
        self.cleanup_stream(cx, None);
    }
}

impl MessageConsumer for GroupStream {
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
            frame => tracing::trace!("Group ignoring {} {:#x}", frame.name(), frame.stream_id()),
        }
    }

    fn is_closed(&self) -> bool {
        self.app_closed() && !self.network.is_open()
    }
}

#[instrument(name = "find-coordinator-request", level = "debug", skip(client_id))]
pub fn encode_find_coordinator_request(
    correlation_id: i32,
    client_id: &str,
    group_id: &str,
) -> Result<Bytes> {
    encode_request(&FindCoordinatorRequest::new(correlation_id, client_id, group_id))
}

/// Asks broker `node_id` for the session timeouts it accepts.
#[instrument(name = "describe-broker-request", level = "debug", skip(client_id))]
pub fn encode_describe_broker_request(
    correlation_id: i32,
    client_id: &str,
    node_id: i32,
) -> Result<Bytes> {
    let node_id = node_id.to_string();
    let names = [GROUP_MIN_SESSION_TIMEOUT, GROUP_MAX_SESSION_TIMEOUT];
    encode_request(&DescribeConfigsRequest::new(
        correlation_id,
        client_id,
        vec![Resource::broker(&node_id, &names)],
    ))
}

#[allow(clippy::too_many_arguments)]
#[instrument(
    name = "join-group-request",
    level = "debug",
    skip(client_id, metadata, instance_id)
)]
pub fn encode_join_group_request(
    correlation_id: i32,
    client_id: &str,
    group_id: &str,
    session_timeout: i32,
    rebalance_timeout: i32,
    member_id: &str,
    instance_id: Option<&str>,
    protocol: &str,
    metadata: Bytes,
) -> Result<Bytes> {
    encode_request(&JoinGroupRequest::new(
        correlation_id,
        client_id,
        group_id,
        session_timeout,
        rebalance_timeout,
        member_id,
        instance_id,
        PROTOCOL_TYPE,
        vec![Protocol::new(protocol, metadata)],
    ))
}
