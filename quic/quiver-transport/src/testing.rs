// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Scripted collaborators for exercising the handshake core without a
//! real TLS library.

use crate::connection::{AcceptOutcome, FatalError, FlushReason, SendFlag};
use bytes::Bytes;
use quiver_core::{
    crypto::{
        key::testing as key,
        packet_protection,
        tls::{self, DataKind, EarlyDataState, ResultFlags},
        EncryptLevel, KeyPair, PacketKey, PacketKeyType, Suite,
    },
    endpoint, transport,
};
use std::collections::VecDeque;

/// One scripted effect of a TLS processing call
#[derive(Clone, Debug)]
pub enum Action {
    /// Append `len` bytes of handshake data at the current write level
    Transmit(usize),
    InstallWriteKey(PacketKeyType),
    InstallReadKey(PacketKeyType),
    Complete,
    Ticket,
    Error { alert: u16 },
    EarlyDataAccepted,
    EarlyDataRejected,
    SessionResumed,
    /// Record the application protocol the handshake agreed on
    NegotiateAlpn(Bytes),
}

/// One scripted TLS processing call
#[derive(Clone, Debug, Default)]
pub struct Step {
    /// Receive-buffer bytes the call consumes
    pub consume: usize,
    pub actions: Vec<Action>,
    /// Return PENDING and apply the step at completion time instead
    pub pending: bool,
}

impl Step {
    pub fn consume(len: usize) -> Self {
        Self {
            consume: len,
            ..Self::default()
        }
    }

    pub fn with(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    pub fn into_pending(mut self) -> Self {
        self.pending = true;
        self
    }
}

/// A scripted TLS session
#[derive(Debug, Default)]
pub struct Session {
    pub steps: VecDeque<Step>,
    pending: Option<Step>,
    pub reset_count: usize,
}

impl Session {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: steps.into(),
            pending: None,
            reset_count: 0,
        }
    }

    fn apply(state: &mut tls::State<Self>, step: &Step) -> tls::Output {
        let mut flags = ResultFlags::EMPTY;

        for action in &step.actions {
            match action {
                Action::Transmit(len) => {
                    state.transmit(&vec![0x5a; *len]);
                    flags.insert(ResultFlags::DATA);
                }
                Action::InstallWriteKey(key_type) => {
                    state.install_write_key(*key_type, test_key());
                    flags.insert(ResultFlags::WRITE_KEY_UPDATED);
                }
                Action::InstallReadKey(key_type) => {
                    state.install_read_key(*key_type, test_key());
                    flags.insert(ResultFlags::READ_KEY_UPDATED);
                }
                Action::Complete => {
                    state.handshake_complete = true;
                    flags.insert(ResultFlags::COMPLETE);
                }
                Action::Ticket => flags.insert(ResultFlags::TICKET),
                Action::Error { alert } => {
                    state.alert_code = *alert;
                    flags.insert(ResultFlags::ERROR);
                }
                Action::EarlyDataAccepted => {
                    state.early_data_state = EarlyDataState::Accepted;
                    flags.insert(ResultFlags::EARLY_DATA_ACCEPTED);
                }
                Action::EarlyDataRejected => {
                    state.early_data_state = EarlyDataState::Rejected;
                    flags.insert(ResultFlags::EARLY_DATA_REJECTED);
                }
                Action::SessionResumed => state.session_resumed = true,
                Action::NegotiateAlpn(alpn) => state.negotiated_alpn = Some(alpn.clone()),
            }
        }

        tls::Output {
            flags,
            consumed: step.consume,
        }
    }
}

fn test_key() -> PacketKey<Session> {
    PacketKey::new(key::Key::new(endpoint::Type::Client), key::HeaderKey)
}

impl Suite for Session {
    type PacketKey = key::Key;
    type HeaderKey = key::HeaderKey;

    fn initial_keys(
        endpoint: endpoint::Type,
        salt: &[u8],
        handshake_cid: &[u8],
    ) -> Result<KeyPair<Self>, packet_protection::Error> {
        key::Session::initial_keys(endpoint, salt, handshake_cid).map(|pair| KeyPair {
            read: PacketKey {
                key: pair.read.key,
                header_key: pair.read.header_key,
            },
            write: PacketKey {
                key: pair.write.key,
                header_key: pair.write.header_key,
            },
        })
    }

    fn update_key(current: &key::Key) -> Result<key::Key, packet_protection::Error> {
        key::Session::update_key(current)
    }
}

impl tls::Session for Session {
    fn process_data(
        &mut self,
        state: &mut tls::State<Self>,
        _kind: DataKind,
        data: &[u8],
    ) -> tls::Output {
        let mut step = self.steps.pop_front().unwrap_or(Step {
            consume: data.len(),
            actions: Vec::new(),
            pending: false,
        });
        step.consume = step.consume.min(data.len());

        if step.pending {
            self.pending = Some(step);
            return tls::Output::pending();
        }

        Self::apply(state, &step)
    }

    fn process_data_complete(&mut self, state: &mut tls::State<Self>) -> tls::Output {
        let step = self.pending.take().expect("no pending call");
        Self::apply(state, &step)
    }

    fn reset(&mut self) {
        self.reset_count += 1;
    }
}

/// Creates scripted sessions for new connections
#[derive(Debug, Default)]
pub struct Endpoint {
    pub sessions: VecDeque<Session>,
}

impl tls::Endpoint for Endpoint {
    type Session = Session;
    type SecConfig = ();

    fn new_server_session(
        &mut self,
        _sec_config: (),
        _transport_parameters: &[u8],
        _negotiated_alpn: &[u8],
    ) -> Result<Session, transport::Error> {
        self.sessions
            .pop_front()
            .ok_or_else(|| transport::Error::INTERNAL_ERROR.with_reason("no scripted session"))
    }

    fn new_client_session(
        &mut self,
        _sec_config: (),
        _transport_parameters: &[u8],
        _server_name: Option<&str>,
    ) -> Result<Session, transport::Error> {
        self.sessions
            .pop_front()
            .ok_or_else(|| transport::Error::INTERNAL_ERROR.with_reason("no scripted session"))
    }
}

/// Everything the core asked the connection to do, in order
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    SetSendFlag(SendFlag),
    ClearSendFlag(SendFlag),
    QueueFlush(FlushReason),
    UpdateAckState,
    TransportError(transport::Error),
    FatalError(FatalError),
    HandshakeConfirmed,
    Connected { resumed: bool, alpn: Bytes },
    GenerateNewSourceCids,
    CacheServerState,
    ReleaseServerResumptionState,
    PathIdFreed(u32),
    DiscardPackets(PacketKeyType),
    DiscardPacketSpace(EncryptLevel),
    ZeroRttRejected,
    DiscardDeferredZeroRtt,
    AcceptConnection,
}

/// A recording connection context
pub struct Context {
    pub endpoint_type: endpoint::Type,
    pub tls: Endpoint,
    pub closed_locally: bool,
    pub connected: bool,
    pub multipath: bool,
    pub ack_delay_exponent: u8,
    pub server_name: Option<String>,
    pub local_transport_parameters: Bytes,
    pub send_flags: Vec<SendFlag>,
    pub events: Vec<Event>,
    /// Scripted listener decision; `None` accepts with the client's
    /// first offered protocol
    pub accept_outcome: Option<AcceptOutcome<()>>,
    /// Scripted result for `discard_packet_space`
    pub ack_eliciting_spaces: bool,
}

impl Context {
    pub fn client() -> Self {
        Self::new(endpoint::Type::Client)
    }

    pub fn server() -> Self {
        Self::new(endpoint::Type::Server)
    }

    fn new(endpoint_type: endpoint::Type) -> Self {
        Self {
            endpoint_type,
            tls: Endpoint::default(),
            closed_locally: false,
            connected: false,
            multipath: false,
            ack_delay_exponent: 3,
            server_name: None,
            local_transport_parameters: Bytes::from_static(&[0x42; 16]),
            send_flags: Vec::new(),
            events: Vec::new(),
            accept_outcome: None,
            ack_eliciting_spaces: false,
        }
    }

    pub fn with_session(mut self, session: Session) -> Self {
        self.tls.sessions.push_back(session);
        self
    }

    pub fn has_send_flag(&self, flag: SendFlag) -> bool {
        self.send_flags.contains(&flag)
    }

    pub fn transport_errors(&self) -> Vec<transport::Error> {
        self.events
            .iter()
            .filter_map(|event| match event {
                Event::TransportError(error) => Some(*error),
                _ => None,
            })
            .collect()
    }
}

impl crate::connection::Context for Context {
    type Tls = Endpoint;

    fn is_closed_locally(&self) -> bool {
        self.closed_locally
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn multipath_negotiated(&self) -> bool {
        self.multipath
    }

    fn peer_ack_delay_exponent(&self) -> u8 {
        self.ack_delay_exponent
    }

    fn tls_endpoint(&mut self) -> &mut Endpoint {
        &mut self.tls
    }

    fn local_transport_parameters(&self) -> Bytes {
        self.local_transport_parameters.clone()
    }

    fn server_name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }

    fn set_send_flag(&mut self, flag: SendFlag) -> bool {
        self.events.push(Event::SetSendFlag(flag));
        if !self.send_flags.contains(&flag) {
            self.send_flags.push(flag);
        }
        true
    }

    fn clear_send_flag(&mut self, flag: SendFlag) {
        self.events.push(Event::ClearSendFlag(flag));
        self.send_flags.retain(|set| *set != flag);
    }

    fn queue_flush(&mut self, reason: FlushReason) {
        self.events.push(Event::QueueFlush(reason));
    }

    fn update_ack_state(&mut self) {
        self.events.push(Event::UpdateAckState);
    }

    fn transport_error(&mut self, error: transport::Error) {
        self.closed_locally = true;
        self.events.push(Event::TransportError(error));
    }

    fn fatal_error(&mut self, error: FatalError) {
        self.closed_locally = true;
        self.events.push(Event::FatalError(error));
    }

    fn on_handshake_confirmed(&mut self) {
        self.events.push(Event::HandshakeConfirmed);
    }

    fn on_connected(&mut self, session_resumed: bool, negotiated_alpn: &[u8]) {
        self.connected = true;
        self.events.push(Event::Connected {
            resumed: session_resumed,
            alpn: Bytes::copy_from_slice(negotiated_alpn),
        });
    }

    fn generate_new_source_cids(&mut self) {
        self.events.push(Event::GenerateNewSourceCids);
    }

    fn cache_server_state(&mut self) {
        self.events.push(Event::CacheServerState);
    }

    fn release_server_resumption_state(&mut self) {
        self.events.push(Event::ReleaseServerResumptionState);
    }

    fn on_path_id_freed(&mut self, id: u32) {
        self.events.push(Event::PathIdFreed(id));
    }

    fn discard_packets(&mut self, key_type: PacketKeyType) {
        self.events.push(Event::DiscardPackets(key_type));
    }

    fn discard_packet_space(&mut self, level: EncryptLevel) -> bool {
        self.events.push(Event::DiscardPacketSpace(level));
        self.ack_eliciting_spaces
    }

    fn on_zero_rtt_rejected(&mut self) {
        self.events.push(Event::ZeroRttRejected);
    }

    fn discard_deferred_zero_rtt(&mut self) {
        self.events.push(Event::DiscardDeferredZeroRtt);
    }

    fn accept_connection(&mut self, client_hello: &tls::ClientHello) -> AcceptOutcome<()> {
        self.events.push(Event::AcceptConnection);
        self.accept_outcome.take().unwrap_or_else(|| {
            AcceptOutcome::Accept {
                sec_config: Some(()),
                negotiated_alpn: client_hello
                    .alpn_protocols
                    .first()
                    .cloned()
                    .unwrap_or_else(|| Bytes::from_static(b"h3")),
            }
        })
    }
}

/// Builds a syntactically valid TLS handshake message of `payload_len`
/// bytes with the given message type
pub fn handshake_message(msg_type: u8, payload_len: usize) -> Vec<u8> {
    let mut message = vec![msg_type];
    message.extend_from_slice(&(payload_len as u32).to_be_bytes()[1..]);
    message.resize(tls::MESSAGE_HEADER_LEN + payload_len, 0x5a);
    message
}

/// Builds a minimal parseable ClientHello offering `alpns`
pub fn client_hello_message(server_name: Option<&[u8]>, alpns: &[&[u8]]) -> Vec<u8> {
    let mut extensions: Vec<u8> = Vec::new();

    if let Some(name) = server_name {
        let mut entry = vec![0u8]; // host_name
        entry.extend_from_slice(&(name.len() as u16).to_be_bytes());
        entry.extend_from_slice(name);
        let mut list = (entry.len() as u16).to_be_bytes().to_vec();
        list.extend_from_slice(&entry);

        extensions.extend_from_slice(&0u16.to_be_bytes());
        extensions.extend_from_slice(&(list.len() as u16).to_be_bytes());
        extensions.extend_from_slice(&list);
    }

    let mut entries: Vec<u8> = Vec::new();
    for alpn in alpns {
        entries.push(alpn.len() as u8);
        entries.extend_from_slice(alpn);
    }
    let mut list = (entries.len() as u16).to_be_bytes().to_vec();
    list.extend_from_slice(&entries);
    extensions.extend_from_slice(&16u16.to_be_bytes());
    extensions.extend_from_slice(&(list.len() as u16).to_be_bytes());
    extensions.extend_from_slice(&list);

    let mut body = vec![0x03, 0x03];
    body.extend_from_slice(&[0u8; 32]);
    body.push(0);
    body.extend_from_slice(&2u16.to_be_bytes());
    body.extend_from_slice(&[0x13, 0x01]);
    body.extend_from_slice(&[1, 0]);
    body.extend_from_slice(&(extensions.len() as u16).to_be_bytes());
    body.extend_from_slice(&extensions);

    let mut message = vec![1u8];
    message.extend_from_slice(&(body.len() as u32).to_be_bytes()[1..]);
    message.extend_from_slice(&body);
    message
}
