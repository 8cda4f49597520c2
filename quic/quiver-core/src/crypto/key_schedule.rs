// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Install, discard and rotate packet-protection keys.
//!
//! Each of the four encryption levels has an independent read/write
//! key slot; 1-RTT additionally has OLD/NEW slots used across a key
//! update. Keys are exclusively owned: rotation moves them between
//! slots, it never duplicates them.

use crate::crypto::{packet_protection, KeyPair, PacketKey, PacketKeyType, Suite};

/// The key slots of a connection
pub struct KeySchedule<S: Suite> {
    read_keys: [Option<PacketKey<S>>; PacketKeyType::COUNT],
    write_keys: [Option<PacketKey<S>>; PacketKeyType::COUNT],
    /// Highest level for which a read key has been installed
    read_key: PacketKeyType,
    /// Highest level for which a write key has been installed
    write_key: PacketKeyType,
    key_update_count: u32,
}

impl<S: Suite> Default for KeySchedule<S> {
    fn default() -> Self {
        Self {
            read_keys: [None, None, None, None, None, None],
            write_keys: [None, None, None, None, None, None],
            read_key: PacketKeyType::Initial,
            write_key: PacketKeyType::Initial,
            key_update_count: 0,
        }
    }
}

impl<S: Suite> KeySchedule<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current read level
    #[inline]
    pub fn read_key(&self) -> PacketKeyType {
        self.read_key
    }

    /// Current write level
    #[inline]
    pub fn write_key(&self) -> PacketKeyType {
        self.write_key
    }

    #[inline]
    pub fn key_update_count(&self) -> u32 {
        self.key_update_count
    }

    #[inline]
    pub fn has_read_key(&self, key_type: PacketKeyType) -> bool {
        self.read_keys[key_type as usize].is_some()
    }

    #[inline]
    pub fn has_write_key(&self, key_type: PacketKeyType) -> bool {
        self.write_keys[key_type as usize].is_some()
    }

    /// Installs the INITIAL read/write pair
    pub fn install_initial(&mut self, pair: KeyPair<S>) {
        debug_assert!(!self.has_read_key(PacketKeyType::Initial));
        debug_assert!(!self.has_write_key(PacketKeyType::Initial));
        self.read_keys[PacketKeyType::Initial as usize] = Some(pair.read);
        self.write_keys[PacketKeyType::Initial as usize] = Some(pair.write);
    }

    /// Installs a read key and advances the current read level
    ///
    /// The installer side must never hold a read key above its write
    /// key; the invariant is enforced here, at construction, rather
    /// than at each access.
    pub fn install_read_key(&mut self, key_type: PacketKeyType, key: PacketKey<S>) {
        debug_assert!(key_type <= PacketKeyType::OneRtt);
        self.read_keys[key_type as usize] = Some(key);
        self.read_key = self.read_key.max(key_type.normalize());
        debug_assert!(self.read_key <= self.write_key || key_type == PacketKeyType::ZeroRtt);
    }

    /// Installs a write key and advances the current write level
    pub fn install_write_key(&mut self, key_type: PacketKeyType, key: PacketKey<S>) {
        debug_assert!(key_type <= PacketKeyType::OneRtt);
        self.write_keys[key_type as usize] = Some(key);
        self.write_key = self.write_key.max(key_type.normalize());
    }

    /// Discards both keys for `key_type`
    ///
    /// Idempotent: returns false if the keys were already discarded.
    pub fn discard(&mut self, key_type: PacketKeyType) -> bool {
        let read = self.read_keys[key_type as usize].take();
        let write = self.write_keys[key_type as usize].take();
        read.is_some() || write.is_some()
    }

    /// Derives the NEW 1-RTT read and write keys from CURRENT
    ///
    /// Either both derivations succeed and both keys are installed, or
    /// neither is: a torn key update is forbidden.
    pub fn generate_new_keys(&mut self) -> Result<(), packet_protection::Error> {
        debug_assert_eq!(
            self.read_keys[PacketKeyType::OneRttNew as usize].is_none(),
            self.write_keys[PacketKeyType::OneRttNew as usize].is_none(),
        );

        if self.read_keys[PacketKeyType::OneRttNew as usize].is_some() {
            return Ok(());
        }

        let current_read = self.read_keys[PacketKeyType::OneRtt as usize]
            .as_ref()
            .ok_or(packet_protection::Error::INTERNAL_ERROR)?;
        let new_read = S::update_key(&current_read.key)?;

        let current_write = self.write_keys[PacketKeyType::OneRtt as usize]
            .as_ref()
            .ok_or(packet_protection::Error::INTERNAL_ERROR)?;
        let new_write = S::update_key(&current_write.key)?;

        self.read_keys[PacketKeyType::OneRttNew as usize] = Some(PacketKey {
            key: new_read,
            header_key: None,
        });
        self.write_keys[PacketKeyType::OneRttNew as usize] = Some(PacketKey {
            key: new_write,
            header_key: None,
        });

        Ok(())
    }

    /// Atomically shifts the 1-RTT rotation slots: CURRENT moves to
    /// OLD, NEW moves to CURRENT.
    ///
    //= https://www.rfc-editor.org/rfc/rfc9001#section-5.4
    //# The same header protection key is used for the duration of the
    //# connection, with the value not changing after a key update (see
    //# Section 6).
    pub fn update_key_phase(&mut self) {
        Self::rotate(&mut self.read_keys);
        Self::rotate(&mut self.write_keys);
        self.key_update_count = self.key_update_count.saturating_add(1);
    }

    fn rotate(keys: &mut [Option<PacketKey<S>>; PacketKeyType::COUNT]) {
        let header_key = keys[PacketKeyType::OneRtt as usize]
            .as_mut()
            .and_then(|current| current.header_key.take());

        let new = keys[PacketKeyType::OneRttNew as usize]
            .take()
            .map(|mut new| {
                // the header key moves forward, it does not rotate
                debug_assert!(new.header_key.is_none());
                new.header_key = header_key;
                new
            });
        debug_assert!(new.is_some());

        // OLD is freed by the overwrite
        keys[PacketKeyType::OneRttOld as usize] = keys[PacketKeyType::OneRtt as usize].take();
        keys[PacketKeyType::OneRtt as usize] = new;
    }

    /// Drops every key slot
    pub fn clear(&mut self) {
        for slot in self.read_keys.iter_mut().chain(self.write_keys.iter_mut()) {
            *slot = None;
        }
    }
}

impl<S: Suite> core::fmt::Debug for KeySchedule<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("KeySchedule")
            .field("read_key", &self.read_key)
            .field("write_key", &self.write_key)
            .field("key_update_count", &self.key_update_count)
            .finish()
    }
}
