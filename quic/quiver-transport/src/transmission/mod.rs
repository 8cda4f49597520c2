// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The packet-builder collaborator surface.
//!
//! A builder wraps the payload buffer of the packet currently being
//! assembled and collects the sent-frame metadata that loss detection
//! later replays into `on_ack` / `on_loss`.

use quiver_core::crypto::EncryptLevel;
use s2n_codec::{Encoder as _, EncoderBuffer, EncoderValue};
use smallvec::SmallVec;

/// Frame records are bounded per packet; a full packet stops frame
/// emission rather than growing the metadata.
pub const MAX_FRAMES_PER_PACKET: usize = 12;

/// The packet type being assembled
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PacketType {
    Initial,
    ZeroRtt,
    Handshake,
    Short,
}

impl PacketType {
    #[inline]
    pub fn encrypt_level(self) -> EncryptLevel {
        match self {
            Self::Initial => EncryptLevel::Initial,
            Self::Handshake => EncryptLevel::Handshake,
            Self::ZeroRtt | Self::Short => EncryptLevel::OneRtt,
        }
    }
}

/// A record of a frame written into a packet
///
/// CRYPTO offsets are absolute stream offsets, not level-relative:
/// acknowledgement and loss replay operate on the single contiguous
/// handshake stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum SentFrame {
    Crypto { offset: u64, length: u64 },
}

/// Metadata retained for a sent packet
#[derive(Debug, Default)]
pub struct SentPacketMetadata {
    pub frames: SmallVec<[SentFrame; 4]>,
    pub is_ack_eliciting: bool,
}

impl SentPacketMetadata {
    #[inline]
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }
}

/// Assembles the payload of one packet
pub struct Builder<'a> {
    encoder: EncoderBuffer<'a>,
    packet_type: PacketType,
    metadata: SentPacketMetadata,
}

impl<'a> Builder<'a> {
    pub fn new(buffer: &'a mut [u8], packet_type: PacketType) -> Self {
        Self {
            encoder: EncoderBuffer::new(buffer),
            packet_type,
            metadata: SentPacketMetadata::default(),
        }
    }

    #[inline]
    pub fn packet_type(&self) -> PacketType {
        self.packet_type
    }

    #[inline]
    pub fn remaining_capacity(&self) -> usize {
        self.encoder.remaining_capacity()
    }

    #[inline]
    pub fn frame_count(&self) -> usize {
        self.metadata.frame_count()
    }

    #[inline]
    pub fn can_write_frame(&self) -> bool {
        self.frame_count() < MAX_FRAMES_PER_PACKET
    }

    /// Encodes `frame` into the packet and records its metadata
    pub fn write_frame<F: EncoderValue>(
        &mut self,
        frame: &F,
        sent: SentFrame,
        is_ack_eliciting: bool,
    ) {
        debug_assert!(self.can_write_frame());
        debug_assert!(frame.encoding_size() <= self.remaining_capacity());
        self.encoder.encode(frame);
        self.metadata.frames.push(sent);
        self.metadata.is_ack_eliciting |= is_ack_eliciting;
    }

    /// Finishes the packet, returning the payload length and the
    /// sent-frame metadata
    pub fn finish(self) -> (usize, SentPacketMetadata) {
        (self.encoder.len(), self.metadata)
    }
}
