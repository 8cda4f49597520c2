// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-path loss-detection and packet-number-space collaborators.
//!
//! Only the surface the handshake core and the path-id set consume is
//! modeled here; the congestion controller and timer logic proper
//! live with the connection.

use quiver_core::{
    crypto::{EncryptLevel, KeyPhase, PacketKeyType},
    interval_set::IntervalSet,
};

/// ECN counts reported by an ACK frame
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EcnCounts {
    pub ect_0_count: u64,
    pub ect_1_count: u64,
    pub ce_count: u64,
}

/// Per-path loss detection state
#[derive(Debug, Default)]
pub struct LossDetection {
    largest_sent_packet_number: Option<u64>,
    largest_acked_packet_number: Option<u64>,
    ack_eliciting_in_flight: u64,
}

impl LossDetection {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn largest_sent_packet_number(&self) -> Option<u64> {
        self.largest_sent_packet_number
    }

    #[inline]
    pub fn largest_acked_packet_number(&self) -> Option<u64> {
        self.largest_acked_packet_number
    }

    pub fn on_packet_sent(&mut self, packet_number: u64, ack_eliciting: bool) {
        debug_assert!(
            self.largest_sent_packet_number
                .map_or(true, |largest| packet_number > largest),
            "packet numbers are strictly increasing"
        );
        self.largest_sent_packet_number = Some(packet_number);
        if ack_eliciting {
            self.ack_eliciting_in_flight += 1;
        }
    }

    /// Applies the ACK blocks of a received ACK frame
    ///
    /// `ack_delay` has already been scaled by the peer's
    /// ack_delay_exponent.
    pub fn process_ack_blocks(
        &mut self,
        _level: EncryptLevel,
        _ack_delay_micros: u64,
        blocks: &IntervalSet,
        _ecn: Option<EcnCounts>,
    ) {
        if let Some(end) = blocks.max_end() {
            let largest = end - 1;
            debug_assert!(
                self.largest_sent_packet_number
                    .map_or(false, |sent| largest <= sent),
                "the caller validates ACKs against largest-sent"
            );
            if self
                .largest_acked_packet_number
                .map_or(true, |acked| largest > acked)
            {
                self.largest_acked_packet_number = Some(largest);
            }
        }
    }

    /// Drops outstanding packets protected by `key_type`
    pub fn discard_packets(&mut self, _key_type: PacketKeyType) {
        self.ack_eliciting_in_flight = 0;
    }

    /// The peer rejected 0-RTT; everything sent early counts as lost
    pub fn on_zero_rtt_rejected(&mut self) {
        self.ack_eliciting_in_flight = 0;
    }

    pub fn on_loss_detection_timeout(&mut self) {}

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Per-level packet-number bookkeeping
#[derive(Debug)]
pub struct PacketNumberSpace {
    level: EncryptLevel,
    pub ack_eliciting_packets_to_acknowledge: u64,
    pub current_key_phase: KeyPhase,
    pub awaiting_key_phase_confirmation: bool,
    pub write_key_phase_start_packet_number: u64,
    pub current_key_phase_bytes_sent: u64,
}

impl PacketNumberSpace {
    pub fn new(level: EncryptLevel) -> Self {
        Self {
            level,
            ack_eliciting_packets_to_acknowledge: 0,
            current_key_phase: KeyPhase::default(),
            awaiting_key_phase_confirmation: false,
            write_key_phase_start_packet_number: 0,
            current_key_phase_bytes_sent: 0,
        }
    }

    #[inline]
    pub fn level(&self) -> EncryptLevel {
        self.level
    }

    /// Records a key-phase flip beginning at `next_packet_number`
    pub fn on_key_phase_change(&mut self, next_packet_number: u64) {
        self.write_key_phase_start_packet_number = next_packet_number;
        self.current_key_phase = self.current_key_phase.next_phase();
        self.awaiting_key_phase_confirmation = true;
        self.current_key_phase_bytes_sent = 0;
    }
}
