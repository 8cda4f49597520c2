// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-path protocol state for the multipath extension.
//!
//! A `PathId` is shared between the owning [`set`] and transient
//! lookups: the set holds one strong handle, lookups clone short-lived
//! handles. The set only drops its handle once the path is both
//! abandoned and closed, so the object lives exactly as long as
//! either side still needs it.

use crate::recovery::{LossDetection, PacketNumberSpace};
use quiver_core::crypto::EncryptLevel;
use std::sync::{Arc, Mutex, MutexGuard};

pub mod set;

pub use set::PathIdSet;

#[cfg(test)]
mod tests;

/// Lifecycle flags of a path id
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Flags {
    pub in_use: bool,
    pub abandoned: bool,
    pub closed: bool,
    pub in_path_id_table: bool,
}

/// State mutated under the path's lock
#[derive(Debug)]
pub struct Inner {
    pub flags: Flags,
    /// Peer-imposed cap on connection ids issued for this path
    pub source_cid_limit: u8,
    pub loss_detection: LossDetection,
    pub packets: [Option<PacketNumberSpace>; EncryptLevel::COUNT],
}

/// Connection ids issued per path before the peer's
/// active_connection_id_limit arrives and clamps it down
pub const DEFAULT_SOURCE_CID_LIMIT: u8 = 4;

/// One network path's protocol state, keyed by its 32-bit path id
#[derive(Debug)]
pub struct PathId {
    id: u32,
    inner: Mutex<Inner>,
}

impl PathId {
    /// Creates the path and initializes its packet spaces.
    ///
    /// Path id 0 carries the handshake and owns all three spaces;
    /// every later path only ever sees 1-RTT packets.
    pub(crate) fn new(id: u32) -> Arc<Self> {
        let packets = if id == 0 {
            [
                Some(PacketNumberSpace::new(EncryptLevel::Initial)),
                Some(PacketNumberSpace::new(EncryptLevel::Handshake)),
                Some(PacketNumberSpace::new(EncryptLevel::OneRtt)),
            ]
        } else {
            [
                None,
                None,
                Some(PacketNumberSpace::new(EncryptLevel::OneRtt)),
            ]
        };

        Arc::new(Self {
            id,
            inner: Mutex::new(Inner {
                flags: Flags::default(),
                source_cid_limit: DEFAULT_SOURCE_CID_LIMIT,
                loss_detection: LossDetection::new(),
                packets,
            }),
        })
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Locks the path's mutable state
    ///
    /// Mutations happen on the connection worker; the lock only
    /// guards against concurrent datapath lookups observing the path.
    pub fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("path lock poisoned")
    }

    /// True once the set is allowed to drop its handle
    #[inline]
    pub fn is_abandoned_and_closed(&self) -> bool {
        let inner = self.lock();
        inner.flags.abandoned && inner.flags.closed
    }
}

impl Inner {
    #[inline]
    pub fn packet_space(&self, level: EncryptLevel) -> Option<&PacketNumberSpace> {
        self.packets[level as usize].as_ref()
    }

    #[inline]
    pub fn packet_space_mut(&mut self, level: EncryptLevel) -> Option<&mut PacketNumberSpace> {
        self.packets[level as usize].as_mut()
    }
}

