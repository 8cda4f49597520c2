// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The connection-side collaborator surface consumed by the core.
//!
//! The original design stored these hooks as process-wide function
//! pointers installed at TLS init time; here they are an explicit
//! trait object passed into each operation, so there is no global
//! mutable state.

use bytes::Bytes;
use quiver_core::{
    crypto::{tls, EncryptLevel, PacketKeyType},
    transport,
};

/// Frames the send scheduler can be asked to queue
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SendFlag {
    Crypto,
    HandshakeDone,
    Pmtud,
    MaxPathId,
    PathsBlocked,
}

/// Why an immediate send flush was requested
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushReason {
    /// A new write key allows previously-blocked data to be sent
    NewKey,
}

/// A local failure that is fatal to the connection
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum FatalError {
    /// Local resource exhaustion
    OutOfMemory,
}

/// The listener's decision for an incoming connection
#[derive(Debug)]
pub enum AcceptOutcome<SecConfig> {
    Accept {
        /// The security configuration to continue the handshake with.
        /// `None` defers TLS initialization until the application
        /// provides one.
        sec_config: Option<SecConfig>,
        /// The application protocol selected from the client's offer
        negotiated_alpn: Bytes,
    },
    /// No listener matched the connection
    RejectNoListener,
    /// A listener matched but is unable to take the connection
    RejectBusy,
    /// The application rejected the connection
    RejectApp,
}

/// An error which occurred while processing received data
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessingError {
    /// The connection closed locally during processing; the caller
    /// must not process further frames from the current packet.
    InvalidState,
    TransportError(transport::Error),
}

impl From<transport::Error> for ProcessingError {
    fn from(error: transport::Error) -> Self {
        Self::TransportError(error)
    }
}

/// The connection operations the core calls out to.
///
/// One implementation per connection; every core operation receives
/// `&mut` so no internal synchronization is required (the connection
/// runs on a single cooperative worker at a time).
pub trait Context {
    type Tls: tls::Endpoint;

    fn is_closed_locally(&self) -> bool;
    fn is_connected(&self) -> bool;
    fn multipath_negotiated(&self) -> bool;

    //= https://www.rfc-editor.org/rfc/rfc9000#section-18.2
    //# Values above 20 are invalid.
    fn peer_ack_delay_exponent(&self) -> u8;

    fn tls_endpoint(&mut self) -> &mut Self::Tls;
    /// The local transport parameters, already encoded
    fn local_transport_parameters(&self) -> Bytes;
    fn server_name(&self) -> Option<&str>;

    // send scheduler
    fn set_send_flag(&mut self, flag: SendFlag) -> bool;
    fn clear_send_flag(&mut self, flag: SendFlag);
    fn queue_flush(&mut self, reason: FlushReason);
    /// Re-evaluates delayed-ACK state after a packet space goes away
    fn update_ack_state(&mut self);

    // error escalation
    fn transport_error(&mut self, error: transport::Error);
    fn fatal_error(&mut self, error: FatalError);

    // connection events
    fn on_handshake_confirmed(&mut self);
    fn on_connected(&mut self, session_resumed: bool, negotiated_alpn: &[u8]);
    fn generate_new_source_cids(&mut self);
    /// Caches the handshake outcome for future resumption of this
    /// server (client only)
    fn cache_server_state(&mut self);
    /// The peer acknowledged the full server flight; resumption state
    /// can be released (server only)
    fn release_server_resumption_state(&mut self);
    /// Releases connection ids bound to a freed path id
    fn on_path_id_freed(&mut self, id: u32);

    // loss detection and packet spaces
    fn discard_packets(&mut self, key_type: PacketKeyType);
    /// Tears down the packet space for `level`; returns whether
    /// ACK-eliciting packets were still awaiting acknowledgement
    fn discard_packet_space(&mut self, level: EncryptLevel) -> bool;
    fn on_zero_rtt_rejected(&mut self);
    /// Drops 0-RTT packets the server deferred for later decryption
    fn discard_deferred_zero_rtt(&mut self);

    // listener acceptance (server)
    fn accept_connection(
        &mut self,
        client_hello: &tls::ClientHello,
    ) -> AcceptOutcome<<Self::Tls as tls::Endpoint>::SecConfig>;
}
