// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

/// A trait for packet-protection keys
///
/// The sealing and opening operations themselves are out of scope for
/// the core; the trait only exposes what packet assembly needs.
pub trait Key: Send {
    /// Length of the AEAD tag appended to each protected payload
    fn tag_len(&self) -> usize;
}

/// A trait for header-protection keys
pub trait HeaderKey: Send {}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use crate::{
        crypto::{self, packet_protection, KeyPair, PacketKey, Suite},
        endpoint,
    };

    /// A packet key which records how it was derived instead of
    /// protecting anything
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct Key {
        pub endpoint: endpoint::Type,
        pub generation: u64,
        pub fail_on_update: bool,
    }

    impl Key {
        pub fn new(endpoint: endpoint::Type) -> Self {
            Self {
                endpoint,
                generation: 0,
                fail_on_update: false,
            }
        }
    }

    impl crypto::Key for Key {
        fn tag_len(&self) -> usize {
            16
        }
    }

    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct HeaderKey;

    impl crypto::HeaderKey for HeaderKey {}

    /// A [`Suite`] for tests: derivations are recorded, never computed
    #[derive(Debug)]
    pub struct Session;

    impl Suite for Session {
        type PacketKey = Key;
        type HeaderKey = HeaderKey;

        fn initial_keys(
            endpoint: endpoint::Type,
            _salt: &[u8],
            _handshake_cid: &[u8],
        ) -> Result<KeyPair<Self>, packet_protection::Error> {
            Ok(KeyPair {
                read: PacketKey::new(Key::new(endpoint), HeaderKey),
                write: PacketKey::new(Key::new(endpoint), HeaderKey),
            })
        }

        fn update_key(current: &Key) -> Result<Key, packet_protection::Error> {
            if current.fail_on_update {
                return Err(packet_protection::Error::INTERNAL_ERROR);
            }
            Ok(Key {
                endpoint: current.endpoint,
                generation: current.generation + 1,
                fail_on_update: current.fail_on_update,
            })
        }
    }
}
