// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

//! QUIC packet-protection key organization
//!
//! Key material itself is opaque to this crate: encryption,
//! decryption and header protection are delegated to the
//! [`Suite`] implementation provided by the TLS library. This module
//! only tracks which keys exist, at which level, and in which
//! direction.

pub mod initial;
pub mod key;
pub mod key_schedule;
pub mod packet_protection;
#[cfg(feature = "alloc")]
pub mod tls;

pub use key::{HeaderKey, Key};
pub use key_schedule::KeySchedule;

/// The packet-protection key slots of a connection
///
/// The rotation slots (`OneRttOld` / `OneRttNew`) hold the previous
/// and pending 1-RTT keys across a key update. The declaration order
/// is significant: level comparisons (`read_key <= write_key`,
/// stale-frame detection) operate on [`normalize`]d values.
///
/// [`normalize`]: PacketKeyType::normalize
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PacketKeyType {
    Initial = 0,
    ZeroRtt = 1,
    Handshake = 2,
    OneRtt = 3,
    OneRttOld = 4,
    OneRttNew = 5,
}

impl PacketKeyType {
    pub const COUNT: usize = 6;

    /// Collapses the 1-RTT rotation slots onto `OneRtt`
    #[inline]
    pub fn normalize(self) -> Self {
        match self {
            Self::OneRttOld | Self::OneRttNew => Self::OneRtt,
            other => other,
        }
    }

    /// Returns the encryption level protected by this key type
    #[inline]
    pub fn encrypt_level(self) -> EncryptLevel {
        match self {
            Self::Initial => EncryptLevel::Initial,
            Self::Handshake => EncryptLevel::Handshake,
            // 0-RTT and 1-RTT share a packet-number space
            _ => EncryptLevel::OneRtt,
        }
    }
}

/// The encryption level of a packet
///
/// 0-RTT shares the 1-RTT level.
///
//= https://www.rfc-editor.org/rfc/rfc9000#section-12.3
//# Packet numbers are divided into three spaces in QUIC
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EncryptLevel {
    Initial = 0,
    Handshake = 1,
    OneRtt = 2,
}

impl EncryptLevel {
    pub const COUNT: usize = 3;
}

//= https://www.rfc-editor.org/rfc/rfc9001#section-6
//# The Key Phase bit is initially set to 0 for the
//# first set of 1-RTT packets and toggled to signal each subsequent key
//# update.

/// The 1-RTT key phase bit
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum KeyPhase {
    #[default]
    Zero,
    One,
}

impl KeyPhase {
    #[inline]
    pub fn next_phase(self) -> Self {
        match self {
            Self::Zero => Self::One,
            Self::One => Self::Zero,
        }
    }
}

/// A directional packet-protection key together with its header key
///
/// The header key is optional because it does not rotate with the
/// packet key on a 1-RTT key update: it is moved from the CURRENT
/// slot to the NEW slot at phase-change time.
pub struct PacketKey<S: Suite> {
    pub key: S::PacketKey,
    pub header_key: Option<S::HeaderKey>,
}

impl<S: Suite> PacketKey<S> {
    #[inline]
    pub fn new(key: S::PacketKey, header_key: S::HeaderKey) -> Self {
        Self {
            key,
            header_key: Some(header_key),
        }
    }
}

/// A read/write pair of packet-protection keys for one level
pub struct KeyPair<S: Suite> {
    pub read: PacketKey<S>,
    pub write: PacketKey<S>,
}

/// The cryptographic operations the core delegates to the TLS library
pub trait Suite: Sized {
    type PacketKey: Key;
    type HeaderKey: HeaderKey;

    /// Derives the INITIAL read/write key pair from the version salt
    /// and the handshake connection id
    ///
    //= https://www.rfc-editor.org/rfc/rfc9001#section-5.2
    //# The hash function for HKDF when deriving initial secrets and keys is
    //# SHA-256
    fn initial_keys(
        endpoint: crate::endpoint::Type,
        salt: &[u8],
        handshake_cid: &[u8],
    ) -> Result<KeyPair<Self>, packet_protection::Error>;

    /// Derives the next-generation key from `current`
    ///
    //= https://www.rfc-editor.org/rfc/rfc9001#section-6.1
    //# The corresponding key and IV are created from that secret as defined
    //# in Section 5.1.  The header protection key is not updated.
    fn update_key(current: &Self::PacketKey) -> Result<Self::PacketKey, packet_protection::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_test() {
        assert_eq!(PacketKeyType::OneRttOld.normalize(), PacketKeyType::OneRtt);
        assert_eq!(PacketKeyType::OneRttNew.normalize(), PacketKeyType::OneRtt);
        assert_eq!(PacketKeyType::Initial.normalize(), PacketKeyType::Initial);
    }

    #[test]
    fn level_ordering_test() {
        // stale-frame detection relies on this ordering
        assert!(PacketKeyType::Initial < PacketKeyType::Handshake);
        assert!(PacketKeyType::Handshake < PacketKeyType::OneRtt);
        assert!(PacketKeyType::ZeroRtt < PacketKeyType::Handshake);
    }

    #[test]
    fn shared_space_test() {
        assert_eq!(
            PacketKeyType::ZeroRtt.encrypt_level(),
            EncryptLevel::OneRtt
        );
        assert_eq!(
            PacketKeyType::OneRttNew.encrypt_level(),
            EncryptLevel::OneRtt
        );
    }
}
