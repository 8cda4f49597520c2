// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Send-side processing: CRYPTO frame emission, acknowledgement, and
//! loss recovery.

use crate::{
    connection::{Context, FatalError, SendFlag},
    crypto::CryptoStream,
    transmission::{Builder, PacketType, SentFrame},
};
use quiver_core::{frame::crypto::CryptoRef, varint::VarInt};
use tracing::trace;

impl<Ctx: Context> CryptoStream<Ctx> {
    /// Writes CRYPTO frames into the packet under assembly.
    ///
    /// Returns whether any frame was written. Clears the CRYPTO send
    /// flag once no data remains queued.
    pub fn write_frames(&mut self, ctx: &mut Ctx, builder: &mut Builder) -> bool {
        debug_assert!(builder.can_write_frame());

        let prev_frame_count = builder.frame_count();

        if self.has_pending_crypto_frame() {
            self.write_crypto_frames(builder);

            if !self.has_pending_crypto_frame() {
                ctx.clear_send_flag(SendFlag::Crypto);
            }
        } else {
            // shouldn't have been queued in the first place
            debug_assert!(false, "no pending crypto data");
        }

        builder.frame_count() > prev_frame_count
    }

    fn write_crypto_frames(&mut self, builder: &mut Builder) {
        self.validate();

        // Write frames until the provided space is filled.
        while builder.remaining_capacity() > 0 && builder.can_write_frame() {
            // Find the bounds of this frame: `left` is the offset of
            // the first byte, `right` the offset of the first byte
            // AFTER the frame.
            let recovery = self.recovery_window_open();
            let left = if recovery {
                self.recovery_next_offset
            } else {
                self.next_send_offset
            };

            if left == self.state.buffer_total_length() {
                // no more data left to send
                break;
            }

            let mut right = left + builder.remaining_capacity() as u64;

            if recovery
                && right > self.recovery_end_offset
                && self.recovery_end_offset != self.next_send_offset
            {
                right = self.recovery_end_offset;
            }

            // Find the first SACK past the selected offset. When
            // transmitting new bytes no such SACK can exist.
            let sack = if left == self.max_sent_length {
                None
            } else {
                self.sparse_ack_ranges.first_interval_beyond(left)
            };

            if let Some((_, sack)) = sack {
                debug_assert!(sack.start >= left);
                right = right.min(sack.start);
            } else {
                right = right.min(self.state.buffer_total_length());
            }

            debug_assert!(right >= left);

            // An encryption level's bytes may only travel in packets
            // of the matching type.
            let (encrypt_level_start, packet_type_right) = match builder.packet_type() {
                PacketType::Initial => (
                    0,
                    if self.state.buffer_offset_handshake() != 0 {
                        self.state.buffer_offset_handshake()
                    } else {
                        self.state.buffer_total_length()
                    },
                ),
                PacketType::ZeroRtt => {
                    debug_assert!(false, "CRYPTO frames are not sent in 0-RTT packets");
                    return;
                }
                PacketType::Handshake => {
                    debug_assert!(self.state.buffer_offset_handshake() != 0);
                    debug_assert!(left >= self.state.buffer_offset_handshake());
                    (
                        self.state.buffer_offset_handshake(),
                        if self.state.buffer_offset_1rtt() == 0 {
                            self.state.buffer_total_length()
                        } else {
                            self.state.buffer_offset_1rtt()
                        },
                    )
                }
                PacketType::Short => {
                    debug_assert!(self.state.buffer_offset_1rtt() != 0);
                    debug_assert!(left >= self.state.buffer_offset_1rtt());
                    (
                        self.state.buffer_offset_1rtt(),
                        self.state.buffer_total_length(),
                    )
                }
            };

            right = right.min(packet_type_right);

            if left >= right {
                // no more data to write at this encryption level
                break;
            }

            let payload_len = match self.write_one_frame(builder, encrypt_level_start, left, right)
            {
                Some(len) => len,
                // no more room in the packet
                None => break,
            };

            let right = left + payload_len;

            // Move the "next" offset forward by the number of bytes
            // written. If we wrote up to the edge of a SACK, skip past
            // it.
            if recovery {
                debug_assert!(self.recovery_next_offset <= right);
                self.recovery_next_offset = right;
                if let Some((_, sack)) = sack {
                    if self.recovery_next_offset == sack.start {
                        self.recovery_next_offset += sack.len();
                    }
                }
            }

            if self.next_send_offset < right {
                self.next_send_offset = right;
                if let Some((_, sack)) = sack {
                    if self.next_send_offset == sack.start {
                        self.next_send_offset += sack.len();
                    }
                }
            }

            if self.max_sent_length < right {
                self.max_sent_length = right;
            }

            self.validate();
        }

        self.dump_send_state();
        self.validate();
    }

    /// Writes the CRYPTO frame `[left, right)`, shrinking it to the
    /// remaining packet space; returns the payload length actually
    /// written
    fn write_one_frame(
        &mut self,
        builder: &mut Builder,
        encrypt_level_start: u64,
        left: u64,
        right: u64,
    ) -> Option<u64> {
        self.validate();
        debug_assert!(left >= encrypt_level_start);
        debug_assert!(right <= self.state.buffer_total_length());
        debug_assert!(left >= self.unacked_offset);

        // the buffer only retains bytes at and above the
        // acknowledgment point
        let buffer_start = (left - self.unacked_offset) as usize;
        let payload = &self.state.buffer()[buffer_start..buffer_start + (right - left) as usize];

        let offset = VarInt::new(left - encrypt_level_start).ok()?;
        let frame = CryptoRef {
            offset,
            data: payload,
        };

        let payload_len = frame.try_fit(builder.remaining_capacity()).ok()?;
        if payload_len == 0 {
            trace!("no room for CRYPTO frame");
            return None;
        }

        let frame = CryptoRef {
            offset,
            data: &payload[..payload_len],
        };

        trace!(offset = left, len = payload_len, "sending crypto bytes");

        builder.write_frame(
            &frame,
            SentFrame::Crypto {
                offset: left,
                length: payload_len as u64,
            },
            true,
        );

        Some(payload_len as u64)
    }

    /// Processes an acknowledgement for the sent range
    /// `[offset, offset + length)`
    pub fn on_ack(&mut self, ctx: &mut Ctx, offset: u64, length: u64) {
        // the offset directly following this frame
        let following_offset = offset + length;

        debug_assert!(following_offset <= self.state.buffer_total_length());

        trace!(offset, length, "received crypto ack");

        if offset <= self.unacked_offset {
            // No unacknowledged bytes before this ACK. If any new
            // bytes are covered, advance the acknowledgment point.
            if self.unacked_offset < following_offset {
                let old_unacked_offset = self.unacked_offset;
                self.unacked_offset = following_offset;

                // absorb any SACK the acknowledgment point caught up to
                self.sparse_ack_ranges.set_min(self.unacked_offset);
                self.absorb_front_sacks();

                // drain the front of the send buffer
                let drain_length = (self.unacked_offset - old_unacked_offset) as usize;
                debug_assert!(drain_length <= self.state.buffer().len());
                self.state.drain_prefix(drain_length);

                if self.next_send_offset < self.unacked_offset {
                    self.next_send_offset = self.unacked_offset;
                }
                if self.recovery_next_offset < self.unacked_offset {
                    self.recovery_next_offset = self.unacked_offset;
                }
                if self.recovery_end_offset <= self.unacked_offset {
                    self.in_recovery = false;
                }

                if ctx.is_connected()
                    && self.endpoint.is_server()
                    && self.state.buffer_offset_1rtt() != 0
                    && self.unacked_offset == self.state.buffer_total_length()
                {
                    // the full flight is acknowledged
                    ctx.release_server_resumption_state();
                }
            }
        } else {
            // Acknowledged out of order: track as a sparse range.
            match self.sparse_ack_ranges.insert(offset, following_offset) {
                Err(_) => {
                    ctx.fatal_error(FatalError::OutOfMemory);
                    return;
                }
                Ok((index, updated)) => {
                    if updated {
                        let sack = self.sparse_ack_ranges.get(index).expect("just inserted");

                        // Emission assumes the starting offset is not
                        // acknowledged; fix up any pointer the merge
                        // swallowed.
                        if (sack.start..sack.end).contains(&self.next_send_offset) {
                            self.next_send_offset = sack.end;
                        }
                        if (sack.start..sack.end).contains(&self.recovery_next_offset) {
                            self.recovery_next_offset = sack.end;
                        }
                    }
                }
            }
        }

        if !self.has_pending_crypto_frame() {
            // nothing left to send
            ctx.clear_send_flag(SendFlag::Crypto);
        }

        self.dump_send_state();
        self.validate();
    }

    /// Processes a loss report for the sent range
    /// `[offset, offset + length)`; returns whether retransmission
    /// was queued
    pub fn on_loss(&mut self, ctx: &mut Ctx, offset: u64, length: u64) -> bool {
        let mut start = offset;
        let mut end = offset + length;

        // the range may have been acknowledged in another packet
        if end <= self.unacked_offset {
            return false;
        }
        if start < self.unacked_offset {
            start = self.unacked_offset;
        }

        for sack in self.sparse_ack_ranges.iter() {
            if sack.start >= end {
                break;
            }
            if start < sack.end {
                // this SACK overlaps the lost range
                if start >= sack.start {
                    if end <= sack.end {
                        // fully covered
                        return false;
                    }
                    // covers the head; move start past the SACK
                    start = sack.end;
                } else if end <= sack.end {
                    // covers the tail; pull end before the SACK
                    end = sack.start;
                }
                // a SACK strictly inside the range leaves both halves
                // needing retransmission; keep one contiguous window,
                // emission skips the SACK
            }
        }

        let mut updated_recovery_window = false;

        // expand the recovery window to encompass the lost bytes
        if start < self.recovery_next_offset {
            self.recovery_next_offset = start;
            updated_recovery_window = true;
        }
        if self.recovery_end_offset < end {
            self.recovery_end_offset = end;
            updated_recovery_window = true;
        }

        if updated_recovery_window {
            trace!(start, end, "recovering crypto bytes");

            self.in_recovery = true;
            let data_queued = ctx.set_send_flag(SendFlag::Crypto);

            self.dump_send_state();
            self.validate();

            return data_queued;
        }

        false
    }
}
