// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The TLS collaborator interface.
//!
//! The handshake machine views TLS as a byte-stream consumer that
//! reports progress through [`ResultFlags`] and mutates the shared
//! [`State`]: appending outbound handshake bytes, installing keys in
//! the schedule, and recording the negotiated session properties.

use crate::{
    crypto::{KeySchedule, PacketKeyType, Suite},
    transport,
};
use alloc::vec::Vec;
use bytes::Bytes;
use core::fmt;

pub mod client_hello;

pub use client_hello::ClientHello;

/// Result bits reported by a TLS processing call
///
/// A single result set may carry several bits; they are processed in
/// the order WRITE_KEY_UPDATED, READ_KEY_UPDATED, DATA, COMPLETE.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct ResultFlags(u16);

impl ResultFlags {
    pub const EMPTY: Self = Self(0);
    /// Outbound handshake bytes were appended to the send buffer
    pub const DATA: Self = Self(1 << 0);
    /// A new write key was installed
    pub const WRITE_KEY_UPDATED: Self = Self(1 << 1);
    /// A new read key was installed
    pub const READ_KEY_UPDATED: Self = Self(1 << 2);
    /// The peer accepted 0-RTT data
    pub const EARLY_DATA_ACCEPTED: Self = Self(1 << 3);
    /// The peer rejected 0-RTT data
    pub const EARLY_DATA_REJECTED: Self = Self(1 << 4);
    /// The handshake completed successfully
    pub const COMPLETE: Self = Self(1 << 5);
    /// A session ticket is available
    pub const TICKET: Self = Self(1 << 6);
    /// TLS failed with the alert recorded in [`State::alert_code`]
    pub const ERROR: Self = Self(1 << 7);
    /// The call continues asynchronously; a completion follows
    pub const PENDING: Self = Self(1 << 8);

    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }
}

impl core::ops::BitOr for ResultFlags {
    type Output = Self;

    #[inline]
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for ResultFlags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut set = f.debug_set();
        for (flag, name) in [
            (Self::DATA, "DATA"),
            (Self::WRITE_KEY_UPDATED, "WRITE_KEY_UPDATED"),
            (Self::READ_KEY_UPDATED, "READ_KEY_UPDATED"),
            (Self::EARLY_DATA_ACCEPTED, "EARLY_DATA_ACCEPTED"),
            (Self::EARLY_DATA_REJECTED, "EARLY_DATA_REJECTED"),
            (Self::COMPLETE, "COMPLETE"),
            (Self::TICKET, "TICKET"),
            (Self::ERROR, "ERROR"),
            (Self::PENDING, "PENDING"),
        ] {
            if self.contains(flag) {
                set.entry(&name);
            }
        }
        set.finish()
    }
}

/// The kind of data handed to a TLS processing call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataKind {
    /// Bytes from the peer's CRYPTO stream
    Crypto,
    /// Resumption-ticket bytes supplied by the application
    Ticket,
}

/// 0-RTT negotiation state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EarlyDataState {
    #[default]
    Unknown,
    Accepted,
    Rejected,
}

/// The result of a TLS processing call
#[derive(Debug, Default)]
pub struct Output {
    pub flags: ResultFlags,
    /// Receive-buffer bytes consumed by the call
    pub consumed: usize,
}

impl Output {
    #[inline]
    pub fn pending() -> Self {
        Self {
            flags: ResultFlags::PENDING,
            consumed: 0,
        }
    }
}

/// State shared between the handshake machine and the TLS session
///
/// Holds every handshake byte produced locally (as a retained suffix
/// of a logically contiguous stream starting at offset 0), the
/// offsets at which each encryption level's bytes begin, and the key
/// schedule.
pub struct State<S: Suite> {
    buffer: Vec<u8>,
    buffer_total_length: u64,
    buffer_offset_handshake: u64,
    buffer_offset_1rtt: u64,
    pub keys: KeySchedule<S>,
    pub negotiated_alpn: Option<Bytes>,
    pub alert_code: u16,
    pub session_resumed: bool,
    pub early_data_state: EarlyDataState,
    pub handshake_complete: bool,
}

impl<S: Suite> State<S> {
    pub fn new(send_buffer_capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(send_buffer_capacity),
            buffer_total_length: 0,
            buffer_offset_handshake: 0,
            buffer_offset_1rtt: 0,
            keys: KeySchedule::new(),
            negotiated_alpn: None,
            alert_code: 0,
            session_resumed: false,
            early_data_state: EarlyDataState::default(),
            handshake_complete: false,
        }
    }

    /// The retained (not yet fully acknowledged) suffix of the stream
    #[inline]
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    #[inline]
    pub fn buffer_len(&self) -> u64 {
        self.buffer.len() as u64
    }

    /// Logical total stream length: acked prefix + retained suffix
    #[inline]
    pub fn buffer_total_length(&self) -> u64 {
        self.buffer_total_length
    }

    /// Offset at which HANDSHAKE-level bytes begin; 0 until the
    /// HANDSHAKE write key exists
    #[inline]
    pub fn buffer_offset_handshake(&self) -> u64 {
        self.buffer_offset_handshake
    }

    /// Offset at which 1-RTT-level bytes begin; 0 until the 1-RTT
    /// write key exists
    #[inline]
    pub fn buffer_offset_1rtt(&self) -> u64 {
        self.buffer_offset_1rtt
    }

    /// Installs a write key and pins the offset at which that level's
    /// send bytes begin
    ///
    /// Every level occupies one contiguous range of the stream, so
    /// the boundary is the total length at install time.
    pub fn install_write_key(&mut self, key_type: PacketKeyType, key: crate::crypto::PacketKey<S>) {
        match key_type.normalize() {
            PacketKeyType::Handshake if self.buffer_offset_handshake == 0 => {
                self.buffer_offset_handshake = self.buffer_total_length;
            }
            PacketKeyType::OneRtt if self.buffer_offset_1rtt == 0 => {
                self.buffer_offset_1rtt = self.buffer_total_length;
            }
            _ => {}
        }
        self.keys.install_write_key(key_type, key);
    }

    /// Installs a read key
    pub fn install_read_key(&mut self, key_type: PacketKeyType, key: crate::crypto::PacketKey<S>) {
        self.keys.install_read_key(key_type, key);
    }

    /// Appends outbound handshake bytes
    ///
    /// The caller must have installed the write key for the level the
    /// bytes belong to.
    pub fn transmit(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
        self.buffer_total_length += data.len() as u64;
    }

    /// Releases `len` acknowledged bytes from the front of the buffer
    pub fn drain_prefix(&mut self, len: usize) {
        debug_assert!(len <= self.buffer.len());
        self.buffer.drain(..len.min(self.buffer.len()));
    }

    /// Restores the send stream for a client handshake retry
    pub fn reset_transmission(&mut self) {
        self.buffer.clear();
        self.buffer_total_length = 0;
        self.buffer_offset_handshake = 0;
        self.buffer_offset_1rtt = 0;
    }
}

impl<S: Suite> fmt::Debug for State<S> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("State")
            .field("buffer_len", &self.buffer.len())
            .field("buffer_total_length", &self.buffer_total_length)
            .field("buffer_offset_handshake", &self.buffer_offset_handshake)
            .field("buffer_offset_1rtt", &self.buffer_offset_1rtt)
            .field("keys", &self.keys)
            .field("handshake_complete", &self.handshake_complete)
            .finish()
    }
}

/// A TLS handshake session
///
/// At most one processing call is outstanding at a time; if a call
/// returns [`ResultFlags::PENDING`], the owner must invoke
/// [`process_data_complete`] once the session signals completion, and
/// must not touch `state` in between.
///
/// [`process_data_complete`]: Session::process_data_complete
pub trait Session: Suite + Sized + Send {
    /// Feeds `data` to the handshake
    ///
    /// An empty `data` with [`DataKind::Crypto`] drives the client's
    /// initial flight.
    fn process_data(&mut self, state: &mut State<Self>, kind: DataKind, data: &[u8]) -> Output;

    /// Collects the results of a call that previously returned
    /// [`ResultFlags::PENDING`]
    fn process_data_complete(&mut self, state: &mut State<Self>) -> Output;

    /// Restarts the handshake from the beginning
    fn reset(&mut self);
}

/// Creates TLS sessions for new connections
pub trait Endpoint: Sized {
    type Session: Session;
    /// Security configuration (certificates, etc.) selected by the
    /// listener for this connection
    type SecConfig;

    fn new_server_session(
        &mut self,
        sec_config: Self::SecConfig,
        transport_parameters: &[u8],
        negotiated_alpn: &[u8],
    ) -> Result<Self::Session, transport::Error>;

    fn new_client_session(
        &mut self,
        sec_config: Self::SecConfig,
        transport_parameters: &[u8],
        server_name: Option<&str>,
    ) -> Result<Self::Session, transport::Error>;
}

/// Length of the TLS handshake message header: type(1) + length(3)
pub const MESSAGE_HEADER_LEN: usize = 4;

/// Returns the length of the longest prefix of `buffer` consisting of
/// complete TLS handshake messages
///
/// CRYPTO frames carry handshake messages without record framing, so
/// message boundaries are recovered from the 4-byte message headers.
#[inline]
pub fn complete_messages_len(buffer: &[u8]) -> usize {
    let mut len = 0;

    while let Some(header) = buffer.get(len..len + MESSAGE_HEADER_LEN) {
        let payload_len =
            u32::from_be_bytes([0, header[1], header[2], header[3]]) as usize;
        let message_len = MESSAGE_HEADER_LEN + payload_len;
        if buffer.len() - len < message_len {
            break;
        }
        len += message_len;
    }

    len
}
