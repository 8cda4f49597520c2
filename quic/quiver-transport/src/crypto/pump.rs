// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Receive-side processing and the single-flight TLS pump.
//!
//! At most one TLS call is in progress per connection at a time; if
//! receive data arrives while a call is outstanding, the pump
//! re-enters when the call completes.

use crate::{
    connection::{AcceptOutcome, Context, FlushReason, ProcessingError, SendFlag},
    crypto::{CryptoStream, TlsCallState},
};
use quiver_core::{
    crypto::{
        tls::{self, ClientHello, DataKind, EarlyDataState, ResultFlags, Session},
        PacketKeyType,
    },
    endpoint, transport,
};
use tracing::{debug, trace, warn};

impl<Ctx: Context> CryptoStream<Ctx> {
    /// Processes a received CRYPTO frame.
    ///
    /// `offset` is relative to the frame's encryption level. Old
    /// retransmitted data is silently absorbed; a frame beyond the
    /// flow-control limit is a fatal protocol error.
    pub fn process_frame(
        &mut self,
        ctx: &mut Ctx,
        key_type: PacketKeyType,
        offset: u64,
        data: &[u8],
    ) -> Result<(), ProcessingError> {
        let data_ready = self.process_data_frame(ctx, key_type, offset, data)?;

        if data_ready {
            if self.tls_call == TlsCallState::Idle {
                self.process_data(ctx, false);

                if ctx.is_closed_locally() {
                    // processing closed the connection; stop handling
                    // anything else from this packet
                    return Err(ProcessingError::InvalidState);
                }
            } else {
                // a TLS call is already in flight; deliver on completion
                self.tls_call = TlsCallState::Pending { data_pending: true };
            }
        }

        Ok(())
    }

    fn process_data_frame(
        &mut self,
        ctx: &mut Ctx,
        key_type: PacketKeyType,
        offset: u64,
        data: &[u8],
    ) -> Result<bool, ProcessingError> {
        if data.is_empty() {
            return Ok(false);
        }

        if !self.initialized {
            warn!("ignoring received crypto after cleanup");
            return Ok(false);
        }

        // old and new 1-RTT generations carry the same stream
        let key_type = key_type.normalize();

        debug_assert!(key_type <= self.state.keys.read_key());
        if key_type < self.state.keys.read_key() {
            // old, likely retransmitted data
            return Ok(false);
        }

        let absolute_offset = self.recv_encrypt_level_start_offset + offset;
        let data_ready = match self.recv_buffer.write(absolute_offset, data) {
            Ok(ready) => ready,
            Err(_) => {
                let error = transport::Error::CRYPTO_BUFFER_EXCEEDED
                    .with_reason("tried to write beyond crypto flow control limit");
                ctx.transport_error(error);
                return Err(error.into());
            }
        };

        trace!(
            len = data.len(),
            offset,
            ready = data_ready,
            "received crypto bytes"
        );

        Ok(data_ready)
    }

    /// Runs the TLS pump: delivers the longest complete-message
    /// prefix of the receive buffer to TLS (or, for
    /// `is_client_initial`, an empty input to produce the first
    /// flight).
    pub(crate) fn process_data(&mut self, ctx: &mut Ctx, is_client_initial: bool) {
        debug_assert_eq!(self.tls_call, TlsCallState::Idle);

        let mut message_len = 0;

        if !is_client_initial {
            let buffer = self.recv_buffer.contiguous();
            message_len = tls::complete_messages_len(buffer);
            if message_len == 0 {
                trace!("no complete TLS messages to process");
                return;
            }

            // Match the connection to a listener before the first
            // server TLS call: the ALPN (and SNI) come straight out
            // of the ClientHello.
            if self.recv_buffer.consumed() == 0
                && self.endpoint.is_server()
                && self.session.is_none()
                && !self.preprocess_client_hello(ctx, message_len)
            {
                return;
            }
        }

        if self.session.is_none() {
            // the listener hasn't provided a security config yet
            return;
        }

        self.tls_call = TlsCallState::Pending {
            data_pending: false,
        };
        self.validate();

        let output = {
            let buffer = &self.recv_buffer.contiguous()[..message_len];
            let session = self.session.as_mut().expect("checked above");
            session.process_data(&mut self.state, DataKind::Crypto, buffer)
        };

        debug_assert!(
            !(is_client_initial && output.flags.contains(ResultFlags::PENDING)),
            "the client initial flight is produced synchronously"
        );

        if !output.flags.contains(ResultFlags::PENDING) {
            self.process_data_complete(ctx, output);
        }
    }

    /// Parses the ClientHello and asks the listener to accept the
    /// connection; returns false if the pump must stop
    fn preprocess_client_hello(&mut self, ctx: &mut Ctx, message_len: usize) -> bool {
        let hello = {
            let buffer = &self.recv_buffer.contiguous()[..message_len];
            ClientHello::parse(buffer)
        };

        let hello = match hello {
            Ok(hello) => hello,
            Err(error) => {
                debug!(%error, "rejecting malformed ClientHello");
                ctx.transport_error(error);
                return false;
            }
        };

        match ctx.accept_connection(&hello) {
            AcceptOutcome::Accept {
                sec_config,
                negotiated_alpn,
            } => {
                self.state.negotiated_alpn = Some(negotiated_alpn);

                if let Some(sec_config) = sec_config {
                    let transport_parameters = ctx.local_transport_parameters();
                    if let Err(error) =
                        self.install_session(ctx, sec_config, &transport_parameters)
                    {
                        ctx.transport_error(error);
                        return false;
                    }
                }
                // with no sec config yet, the buffered data is pumped
                // once the application configures the handshake
                true
            }
            AcceptOutcome::RejectNoListener => {
                ctx.transport_error(transport::Error::CRYPTO_NO_APPLICATION_PROTOCOL);
                false
            }
            AcceptOutcome::RejectBusy => {
                ctx.transport_error(transport::Error::CONNECTION_REFUSED);
                false
            }
            AcceptOutcome::RejectApp => {
                ctx.transport_error(transport::Error::INTERNAL_ERROR);
                false
            }
        }
    }

    /// Collects the results of an asynchronous TLS call previously
    /// left PENDING
    pub fn process_complete_operation(&mut self, ctx: &mut Ctx) {
        debug_assert!(matches!(self.tls_call, TlsCallState::Pending { .. }));

        let output = match self.session.as_mut() {
            Some(session) => session.process_data_complete(&mut self.state),
            None => {
                debug_assert!(false, "completion without a TLS session");
                return;
            }
        };
        self.process_data_complete(ctx, output);
    }

    /// Feeds application-supplied resumption-ticket bytes to TLS
    pub fn process_app_data(&mut self, ctx: &mut Ctx, data: &[u8]) -> Result<(), ProcessingError> {
        if !matches!(self.tls_call, TlsCallState::Idle) {
            return Err(ProcessingError::InvalidState);
        }

        let output = {
            let session = self
                .session
                .as_mut()
                .ok_or(ProcessingError::InvalidState)?;
            session.process_data(&mut self.state, DataKind::Ticket, data)
        };

        if output.flags.contains(ResultFlags::ERROR) {
            return Err(transport::Error::INTERNAL_ERROR
                .with_reason("resumption ticket rejected")
                .into());
        }

        if !output.flags.contains(ResultFlags::PENDING) {
            let output = tls::Output {
                flags: output.flags,
                consumed: 0,
            };
            self.process_data_complete(ctx, output);
        }

        Ok(())
    }

    pub(crate) fn process_data_complete(&mut self, ctx: &mut Ctx, output: tls::Output) {
        let data_pending = matches!(
            self.tls_call,
            TlsCallState::Pending { data_pending: true }
        );
        self.tls_call = TlsCallState::Idle;

        if output.consumed != 0 {
            self.recv_total_consumed += output.consumed as u64;
            trace!(consumed = output.consumed, "draining crypto bytes");
            self.recv_buffer.drain(output.consumed);
        }

        self.validate();
        self.process_tls_completion(ctx, output.flags);

        if data_pending && self.tls_call == TlsCallState::Idle {
            self.process_data(ctx, false);
        }
    }

    fn process_tls_completion(&mut self, ctx: &mut Ctx, flags: ResultFlags) {
        if flags.contains(ResultFlags::ERROR) {
            debug!(alert = self.state.alert_code, "received alert from TLS");
            ctx.transport_error(transport::Error::crypto_error(
                (self.state.alert_code & 0xFF) as u8,
            ));
            return;
        }

        self.validate();

        if flags.contains(ResultFlags::EARLY_DATA_ACCEPTED) {
            debug!("0-RTT accepted");
            debug_assert_eq!(self.state.early_data_state, EarlyDataState::Accepted);
        }

        if flags.contains(ResultFlags::EARLY_DATA_REJECTED) {
            debug!("0-RTT rejected");
            debug_assert_ne!(self.state.early_data_state, EarlyDataState::Accepted);
            if self.endpoint.is_client() {
                self.discard_keys(ctx, PacketKeyType::ZeroRtt);
                ctx.on_zero_rtt_rejected();
            } else {
                ctx.discard_deferred_zero_rtt();
            }
        }

        if flags.contains(ResultFlags::WRITE_KEY_UPDATED) {
            let write_key = self.state.keys.write_key();
            debug!(?write_key, "write key updated");
            debug_assert!(self.state.keys.has_write_key(write_key));

            if write_key == PacketKeyType::Handshake && self.endpoint.is_client() {
                //= https://www.rfc-editor.org/rfc/rfc9001#section-4.9.1
                //# Thus, a client MUST discard Initial keys when it first
                //# sends a Handshake packet
                self.discard_keys(ctx, PacketKeyType::Initial);
            }
            if write_key == PacketKeyType::OneRtt {
                if self.endpoint.is_client() {
                    // the 1-RTT keys supersede any 0-RTT keys
                    self.discard_keys(ctx, PacketKeyType::ZeroRtt);
                }
                // application data may now flow
                ctx.queue_flush(FlushReason::NewKey);
            }

            match (self.endpoint, write_key) {
                (endpoint::Type::Server, PacketKeyType::OneRtt) => {
                    self.stats.server_flight_1_bytes = self.state.buffer_offset_1rtt();
                }
                (endpoint::Type::Client, PacketKeyType::Handshake) => {
                    self.stats.client_flight_1_bytes = self.state.buffer_offset_handshake();
                }
                (endpoint::Type::Client, PacketKeyType::OneRtt) => {
                    self.stats.client_flight_2_bytes =
                        self.state.buffer_offset_1rtt() - self.state.buffer_offset_handshake();
                }
                _ => {}
            }
        }

        if flags.contains(ResultFlags::READ_KEY_UPDATED) {
            // data received past the current offset at the previous
            // encryption level can never be delivered
            if self.recv_buffer.has_unread_data() {
                ctx.transport_error(
                    transport::Error::PROTOCOL_VIOLATION
                        .with_reason("leftover crypto data in previous encryption level"),
                );
                return;
            }

            self.recv_encrypt_level_start_offset = self.recv_total_consumed;

            let read_key = self.state.keys.read_key();
            debug!(?read_key, "read key updated");

            // whoever installed the read key must have the write key
            debug_assert!(self.state.keys.read_key() <= self.state.keys.write_key());
            debug_assert!(self.state.keys.has_read_key(read_key));

            match (self.endpoint, read_key) {
                (endpoint::Type::Server, PacketKeyType::Handshake) => {
                    self.stats.client_flight_1_bytes = self.recv_total_consumed;
                }
                (endpoint::Type::Server, PacketKeyType::OneRtt) => {
                    self.stats.client_flight_2_bytes =
                        self.recv_total_consumed - self.stats.client_flight_1_bytes;
                }
                (endpoint::Type::Client, PacketKeyType::OneRtt) => {
                    self.stats.server_flight_1_bytes = self.recv_total_consumed;
                }
                _ => {}
            }
        }

        if flags.contains(ResultFlags::DATA) {
            ctx.set_send_flag(SendFlag::Crypto);
            self.dump_send_state();
            self.validate();
        }

        if flags.contains(ResultFlags::COMPLETE) {
            debug_assert!(!flags.contains(ResultFlags::ERROR));
            debug_assert!(!ctx.is_connected());

            debug!("handshake complete");

            // the 1-RTT keys must exist by completion time
            if !self.state.keys.has_read_key(PacketKeyType::OneRtt)
                || !self.state.keys.has_write_key(PacketKeyType::OneRtt)
            {
                debug_assert!(false, "handshake completed without 1-RTT keys");
                ctx.transport_error(
                    transport::Error::INTERNAL_ERROR.with_reason("missing 1-RTT keys"),
                );
                return;
            }

            if self.endpoint.is_server() {
                // the handshake is confirmed on the server as soon as
                // it completes
                debug!("handshake confirmed (server)");
                ctx.set_send_flag(SendFlag::HandshakeDone);
                self.on_handshake_confirmed(ctx);
            }

            let session_resumed = self.state.session_resumed;
            let negotiated_alpn = self.state.negotiated_alpn.clone().unwrap_or_default();
            debug_assert!(!negotiated_alpn.is_empty());

            // mark connected only after the confirmation path above so
            // TLS state isn't torn down before the event is indicated
            ctx.on_connected(session_resumed, &negotiated_alpn);

            ctx.generate_new_source_cids();

            if self.endpoint.is_client() && ctx.server_name().is_some() {
                // cache the handshake outcome for future connections
                // to this server
                ctx.cache_server_state();
            }

            ctx.set_send_flag(SendFlag::Pmtud);

            if self.endpoint.is_server()
                && self.state.buffer_offset_1rtt() != 0
                && self.unacked_offset == self.state.buffer_total_length()
            {
                ctx.release_server_resumption_state();
            }
        }

        if flags.contains(ResultFlags::TICKET) {
            debug!("ticket ready");
        }

        self.validate();
    }
}
