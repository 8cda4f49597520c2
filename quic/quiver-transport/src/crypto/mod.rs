// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The cryptographic handshake stream.
//!
//! TLS 1.3 handshake messages are carried as multiple serial byte
//! streams, one per encryption level. The stream represents them as a
//! single contiguous buffer and tracks the offsets at which each
//! level begins (and therefore where the previous level ends). Much
//! of the machinery resembles an ordinary QUIC stream: ACK tracking,
//! retransmission, and receive reassembly.

use crate::connection::{Context, SendFlag};
use quiver_core::{
    crypto::{
        initial,
        tls::{self, Endpoint, Session},
        EncryptLevel, PacketKeyType, Suite,
    },
    endpoint,
    interval_set::IntervalSet,
    transport,
};
use s2n_codec::EncoderValue;
use tracing::{debug, trace};

mod pump;
pub mod recv_buffer;
mod send;


use recv_buffer::RecvBuffer;

pub(crate) type SessionOf<Ctx> = <<Ctx as Context>::Tls as tls::Endpoint>::Session;
pub(crate) type SecConfigOf<Ctx> = <<Ctx as Context>::Tls as tls::Endpoint>::SecConfig;

/// Send-buffer size for clients: the Initial flight
pub const MAX_TLS_CLIENT_SEND_BUFFER: usize = 4 * 1024;
/// Send-buffer size for servers: the full server flight
pub const MAX_TLS_SERVER_SEND_BUFFER: usize = 8 * 1024;
/// Initial receive-buffer allocation
pub const INITIAL_RECV_BUFFER_SIZE: usize = 4 * 1024;

//= https://www.rfc-editor.org/rfc/rfc9000#section-7.5
//# Implementations MUST support buffering at least 4096 bytes of data
//# received in out-of-order CRYPTO frames.
/// Flow-control limit for the inbound handshake stream
pub const MAX_RECV_BUFFER_SIZE: u64 = u16::MAX as u64;

/// Cap on tracked out-of-order ACK subranges; exceeding it is treated
/// as allocation failure
pub const MAX_SPARSE_ACK_RANGES: usize = 4096;

/// Single-flight state of the TLS call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TlsCallState {
    Idle,
    /// A call is outstanding; `data_pending` records whether more
    /// receive data arrived in the meantime and the pump must re-enter
    /// on completion.
    Pending { data_pending: bool },
}

/// Handshake-flight byte accounting
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HandshakeStats {
    /// Client flight 1: everything the client sends at Initial
    pub client_flight_1_bytes: u64,
    /// Client flight 2: everything the client sends at Handshake
    pub client_flight_2_bytes: u64,
    /// Server flight 1: the full server response
    pub server_flight_1_bytes: u64,
}

pub struct CryptoStream<Ctx: Context> {
    endpoint: endpoint::Type,
    /// Shared with the TLS session: send buffer, level offsets, keys
    state: tls::State<SessionOf<Ctx>>,
    session: Option<SessionOf<Ctx>>,

    max_sent_length: u64,
    unacked_offset: u64,
    next_send_offset: u64,
    recovery_next_offset: u64,
    recovery_end_offset: u64,
    in_recovery: bool,
    sparse_ack_ranges: IntervalSet,

    recv_buffer: RecvBuffer,
    recv_total_consumed: u64,
    recv_encrypt_level_start_offset: u64,

    tls_call: TlsCallState,
    initialized: bool,
    stats: HandshakeStats,
}

impl<Ctx: Context> CryptoStream<Ctx> {
    /// Creates the stream and derives the INITIAL read/write keys
    /// from the version salt and the handshake connection id
    pub fn initialize(
        endpoint: endpoint::Type,
        quic_version: u32,
        handshake_cid: &[u8],
    ) -> Result<Self, transport::Error> {
        let send_buffer_capacity = match endpoint {
            endpoint::Type::Server => MAX_TLS_SERVER_SEND_BUFFER,
            endpoint::Type::Client => MAX_TLS_CLIENT_SEND_BUFFER,
        };

        let mut state = tls::State::new(send_buffer_capacity);

        let salt = initial::initial_salt(quic_version);
        let pair = <SessionOf<Ctx> as Suite>::initial_keys(endpoint, salt, handshake_cid)
            .map_err(|_| {
                transport::Error::INTERNAL_ERROR.with_reason("creating initial keys")
            })?;
        state.keys.install_initial(pair);

        let stream = Self {
            endpoint,
            state,
            session: None,
            max_sent_length: 0,
            unacked_offset: 0,
            next_send_offset: 0,
            recovery_next_offset: 0,
            recovery_end_offset: 0,
            in_recovery: false,
            sparse_ack_ranges: IntervalSet::with_limit(MAX_SPARSE_ACK_RANGES),
            recv_buffer: RecvBuffer::new(INITIAL_RECV_BUFFER_SIZE, MAX_RECV_BUFFER_SIZE),
            recv_total_consumed: 0,
            recv_encrypt_level_start_offset: 0,
            tls_call: TlsCallState::Idle,
            initialized: true,
            stats: HandshakeStats::default(),
        };
        stream.validate();
        Ok(stream)
    }

    /// Encodes the local transport parameters, creates the TLS
    /// session, and on the client immediately pumps the initial flight
    pub fn initialize_tls<Params: EncoderValue>(
        &mut self,
        ctx: &mut Ctx,
        sec_config: SecConfigOf<Ctx>,
        params: &Params,
    ) -> Result<(), transport::Error> {
        let transport_parameters = params.encode_to_vec();
        self.install_session(ctx, sec_config, &transport_parameters)?;

        if self.endpoint.is_client() {
            self.process_data(ctx, true);
        } else if self.recv_buffer.has_unread_data() {
            // a deferred security config arrived after the ClientHello
            self.process_data(ctx, false);
        }

        Ok(())
    }

    pub(crate) fn install_session(
        &mut self,
        ctx: &mut Ctx,
        sec_config: SecConfigOf<Ctx>,
        transport_parameters: &[u8],
    ) -> Result<(), transport::Error> {
        debug_assert!(self.session.is_none());

        let session = match self.endpoint {
            endpoint::Type::Server => {
                // the ALPN comes out of ClientHello preprocessing, so
                // the server session can't exist before acceptance
                let alpn = self.state.negotiated_alpn.clone().ok_or_else(|| {
                    transport::Error::INTERNAL_ERROR.with_reason("connection not accepted yet")
                })?;
                ctx.tls_endpoint()
                    .new_server_session(sec_config, transport_parameters, &alpn)?
            }
            endpoint::Type::Client => {
                let server_name = ctx.server_name().map(String::from);
                ctx.tls_endpoint().new_client_session(
                    sec_config,
                    transport_parameters,
                    server_name.as_deref(),
                )?
            }
        };

        self.session = Some(session);
        Ok(())
    }

    /// Restores the send stream to the beginning for a client retry.
    ///
    /// Only valid while the TLS pump is quiescent and nothing has
    /// been delivered upward yet.
    pub fn reset(&mut self, ctx: &mut Ctx, reset_tls: bool) {
        debug_assert!(self.endpoint.is_client());
        debug_assert_eq!(self.tls_call, TlsCallState::Idle);
        debug_assert_eq!(self.recv_total_consumed, 0);
        debug_assert_eq!(self.unacked_offset, 0);

        self.max_sent_length = 0;
        self.unacked_offset = 0;
        self.next_send_offset = 0;
        self.recovery_next_offset = 0;
        self.recovery_end_offset = 0;
        self.in_recovery = false;

        if reset_tls {
            self.state.reset_transmission();

            if let Some(session) = self.session.as_mut() {
                session.reset();
            }
            self.process_data(ctx, true);
        } else {
            // re-queue the buffered flight for retransmission
            ctx.set_send_flag(SendFlag::Crypto);
        }

        self.validate();
    }

    /// Discards HANDSHAKE keys once the handshake is confirmed;
    /// idempotent
    pub fn on_handshake_confirmed(&mut self, ctx: &mut Ctx) {
        ctx.on_handshake_confirmed();
        self.discard_keys(ctx, PacketKeyType::Handshake);
    }

    /// Frees the keys for `key_type` and retires its send state so no
    /// byte protected by a discarded key is ever retransmitted
    pub fn discard_keys(&mut self, ctx: &mut Ctx, key_type: PacketKeyType) -> bool {
        if !self.state.keys.discard(key_type) {
            // already discarded
            return false;
        }

        debug!(?key_type, "discarding keys");

        let level = key_type.encrypt_level();
        if level >= EncryptLevel::OneRtt {
            // no additional state to clean up at the 1-RTT level
            return true;
        }

        let had_ack_eliciting = ctx.discard_packet_space(level);
        ctx.discard_packets(key_type);

        // Retire the discarded level's portion of the send stream
        let boundary = match key_type {
            PacketKeyType::Initial => self.state.buffer_offset_handshake(),
            _ => self.state.buffer_offset_1rtt(),
        };
        debug_assert!(boundary != 0);
        debug_assert!(self.max_sent_length >= boundary);

        if self.next_send_offset < boundary {
            self.next_send_offset = boundary;
        }
        if self.recovery_next_offset < boundary {
            self.recovery_next_offset = boundary;
        }
        if self.recovery_end_offset <= self.recovery_next_offset {
            self.in_recovery = false;
        }
        if self.unacked_offset < boundary {
            let old_unacked_offset = self.unacked_offset;
            self.unacked_offset = boundary;
            self.sparse_ack_ranges.set_min(self.unacked_offset);
            self.absorb_front_sacks();

            let drain = (self.unacked_offset - old_unacked_offset) as usize;
            self.state.drain_prefix(drain);
        }

        if had_ack_eliciting {
            // don't leave the ACK machine pointed at a level whose
            // keys no longer exist
            ctx.update_ack_state();
        }

        self.validate();
        true
    }

    /// Tears down all buffers and keys; idempotent
    pub fn uninitialize(&mut self) {
        if !self.initialized {
            return;
        }
        self.state.keys.clear();
        self.session = None;
        self.recv_buffer.clear();
        self.sparse_ack_ranges.clear();
        self.state.reset_transmission();
        self.max_sent_length = 0;
        self.unacked_offset = 0;
        self.next_send_offset = 0;
        self.recovery_next_offset = 0;
        self.recovery_end_offset = 0;
        self.in_recovery = false;
        self.initialized = false;
    }

    /// Derives the next-generation 1-RTT keys into the NEW slots
    pub fn generate_new_keys(&mut self) -> Result<(), transport::Error> {
        self.state.keys.generate_new_keys().map_err(|_| {
            transport::Error::KEY_UPDATE_ERROR.with_reason("failed to derive updated keys")
        })
    }

    /// Shifts the 1-RTT key phase and records where the new phase
    /// begins
    pub fn update_key_phase(
        &mut self,
        space: &mut crate::recovery::PacketNumberSpace,
        next_packet_number: u64,
        locally_initiated: bool,
    ) {
        self.state.keys.update_key_phase();
        space.on_key_phase_change(next_packet_number);
        debug!(locally_initiated, "key phase change");
    }

    // === accessors ===

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    #[inline]
    pub fn tls_state(&self) -> &tls::State<SessionOf<Ctx>> {
        &self.state
    }

    #[inline]
    pub fn stats(&self) -> &HandshakeStats {
        &self.stats
    }

    #[inline]
    pub fn unacked_offset(&self) -> u64 {
        self.unacked_offset
    }

    #[inline]
    pub fn next_send_offset(&self) -> u64 {
        self.next_send_offset
    }

    #[inline]
    pub fn max_sent_length(&self) -> u64 {
        self.max_sent_length
    }

    #[inline]
    pub fn in_recovery(&self) -> bool {
        self.in_recovery
    }

    #[inline]
    pub fn recovery_window(&self) -> core::ops::Range<u64> {
        self.recovery_next_offset..self.recovery_end_offset
    }

    #[inline]
    pub fn sparse_ack_ranges(&self) -> &IntervalSet {
        &self.sparse_ack_ranges
    }

    /// Offset the next transmission would start at
    #[inline]
    fn send_offset(&self) -> u64 {
        if self.recovery_window_open() {
            self.recovery_next_offset
        } else {
            self.next_send_offset
        }
    }

    #[inline]
    fn recovery_window_open(&self) -> bool {
        self.in_recovery && self.recovery_next_offset < self.recovery_end_offset
    }

    /// Returns true if any byte is queued for (re)transmission
    #[inline]
    pub fn has_pending_crypto_frame(&self) -> bool {
        self.recovery_window_open()
            || self.next_send_offset < self.state.buffer_total_length()
    }

    /// The encryption level the next CRYPTO frame would be sent at
    pub fn next_encrypt_level(&self) -> EncryptLevel {
        let send_offset = self.send_offset();

        if self.state.buffer_offset_1rtt() != 0 && send_offset >= self.state.buffer_offset_1rtt()
        {
            EncryptLevel::OneRtt
        } else if self.state.buffer_offset_handshake() != 0
            && send_offset >= self.state.buffer_offset_handshake()
        {
            EncryptLevel::Handshake
        } else {
            EncryptLevel::Initial
        }
    }

    /// Absorbs any sparse range now beginning exactly at the
    /// acknowledgment point
    fn absorb_front_sacks(&mut self) {
        if let Some(front) = self.sparse_ack_ranges.get(0) {
            if front.start == self.unacked_offset {
                self.unacked_offset = front.end;
                self.sparse_ack_ranges.remove_index(0);
            }
        }
    }

    fn dump_send_state(&self) {
        trace!(
            total = self.state.buffer_total_length(),
            max_sent = self.max_sent_length,
            unacked = self.unacked_offset,
            next_send = self.next_send_offset,
            recovery_next = self.in_recovery.then_some(self.recovery_next_offset),
            recovery_end = self.in_recovery.then_some(self.recovery_end_offset),
            sacks = ?self.sparse_ack_ranges,
            "crypto send state"
        );
    }

    fn validate(&self) {
        debug_assert!(self.state.buffer_total_length() >= self.max_sent_length);
        debug_assert!(self.max_sent_length >= self.unacked_offset);
        debug_assert!(self.max_sent_length >= self.next_send_offset);
        debug_assert!(self.next_send_offset >= self.unacked_offset);
        debug_assert!(self.recovery_next_offset >= self.unacked_offset || !self.in_recovery);
        debug_assert_eq!(
            self.state.buffer_len() + self.unacked_offset,
            self.state.buffer_total_length()
        );
        debug_assert!(self
            .sparse_ack_ranges
            .min_start()
            .map_or(true, |low| low >= self.unacked_offset));
        debug_assert_eq!(self.recv_total_consumed, self.recv_buffer.consumed());
    }
}
