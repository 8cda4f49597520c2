// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The per-connection container of path ids.
//!
//! Most connections only ever use one path, so the set starts as a
//! single inline entry and promotes itself to a hash table on the
//! second insertion; promotion is one-way. Lookups take the lock
//! shared (they also run on the datapath ingress); inserts, removals,
//! and mutating enumerations take it exclusive.

use crate::{
    connection::{Context, SendFlag},
    path::PathId,
    recovery::EcnCounts,
};
use hashbrown::HashMap;
use quiver_core::{crypto::EncryptLevel, interval_set::IntervalSet, transport};
use smallvec::SmallVec;
use std::sync::{Arc, RwLock};
use tracing::{debug, trace};

/// The most path ids a connection keeps active at once
pub const ACTIVE_PATH_ID_LIMIT: u32 = 4;

/// The local limit could not be satisfied; the peer must raise
/// MAX_PATH_ID first
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PathIdLimitReached;

#[derive(Debug)]
enum Storage {
    Empty,
    Single(Arc<PathId>),
    Many(HashMap<u32, Arc<PathId>>),
}

#[derive(Debug)]
struct Inner {
    storage: Storage,
    current_path_id_count: u32,
    max_current_path_id_count: u32,
    /// Strictly monotonic allocation counter; doubles as the next id
    total_path_id_count: u32,
    /// Highest path id the peer may initiate
    max_path_id: u32,
    /// Highest path id we may initiate
    peer_max_path_id: u32,
    initial_max_path_id_received: bool,
}

pub struct PathIdSet {
    inner: RwLock<Inner>,
}

impl Default for PathIdSet {
    fn default() -> Self {
        Self::new()
    }
}

impl PathIdSet {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                storage: Storage::Empty,
                current_path_id_count: 0,
                max_current_path_id_count: 1,
                total_path_id_count: 0,
                max_path_id: 0,
                peer_max_path_id: 0,
                initial_max_path_id_received: false,
            }),
        }
    }

    // === counters ===

    #[inline]
    pub fn total_path_id_count(&self) -> u32 {
        self.inner.read().expect("lock").total_path_id_count
    }

    #[inline]
    pub fn current_path_id_count(&self) -> u32 {
        self.inner.read().expect("lock").current_path_id_count
    }

    #[inline]
    pub fn max_path_id(&self) -> u32 {
        self.inner.read().expect("lock").max_path_id
    }

    #[inline]
    pub fn peer_max_path_id(&self) -> u32 {
        self.inner.read().expect("lock").peer_max_path_id
    }

    /// Whether the peer advertised a MaxPathID transport parameter
    #[inline]
    pub fn multipath_enabled(&self) -> bool {
        self.inner.read().expect("lock").initial_max_path_id_received
    }

    /// Applies the peer's transport parameters.
    ///
    /// Absent a MaxPathID parameter, multipath is disabled and the
    /// connection is confined to path id 0. The connection-id limit
    /// of the initial path is clamped down to the peer's value, never
    /// raised.
    pub fn initialize_transport_parameters(
        &self,
        source_cid_limit: u8,
        peer_max_path_id: Option<u32>,
    ) {
        let mut inner = self.inner.write().expect("lock");
        debug_assert_eq!(inner.current_path_id_count, 1);

        if let Storage::Single(path) = &inner.storage {
            let mut path = path.lock();
            if path.source_cid_limit > source_cid_limit {
                path.source_cid_limit = source_cid_limit;
            }
        }

        if let Some(peer_max_path_id) = peer_max_path_id {
            inner.initial_max_path_id_received = true;
            inner.max_path_id = ACTIVE_PATH_ID_LIMIT - 1;
            inner.peer_max_path_id = peer_max_path_id;
            inner.max_current_path_id_count = ACTIVE_PATH_ID_LIMIT;
        } else {
            inner.initial_max_path_id_received = false;
            inner.max_path_id = 0;
            inner.peer_max_path_id = 0;
            inner.max_current_path_id_count = 1;
        }
    }

    /// The peer raised the number of paths we may initiate
    pub fn update_max_path_id<Ctx: Context>(&self, ctx: &mut Ctx, max_path_id: u32) {
        {
            let mut inner = self.inner.write().expect("lock");
            if inner.peer_max_path_id >= max_path_id {
                return;
            }
            debug!(max_path_id, "peer updated max path id");
            inner.peer_max_path_id = max_path_id;
        }
        self.generate_new_path_ids(ctx);
    }

    /// Opens local path ids up to the active cap (multipath only)
    pub fn generate_new_path_ids<Ctx: Context>(&self, ctx: &mut Ctx) {
        if !ctx.multipath_negotiated() {
            return;
        }

        loop {
            {
                let inner = self.inner.read().expect("lock");
                if inner.current_path_id_count >= inner.max_current_path_id_count {
                    break;
                }
            }
            if self.new_local_path_id(ctx).is_err() {
                // blocked on the peer's limit; PATHS_BLOCKED is queued
                break;
            }
        }
    }

    /// Looks up a path id, returning a transient handle
    pub fn lookup_path_id(&self, id: u32) -> Option<Arc<PathId>> {
        let inner = self.inner.read().expect("lock");
        inner.lookup(id)
    }

    /// Resolves a locally chosen path id
    ///
    /// `Ok(None)` means the id was valid but the path has closed.
    pub fn get_path_id_for_local<Ctx: Context>(
        &self,
        ctx: &mut Ctx,
        id: u32,
    ) -> Result<Option<Arc<PathId>>, transport::Error> {
        let (peer_max_path_id, total_path_id_count) = {
            let inner = self.inner.read().expect("lock");
            (inner.peer_max_path_id, inner.total_path_id_count)
        };

        if id > peer_max_path_id {
            let error = transport::Error::INTERNAL_ERROR
                .with_reason("local tried to use more path ids than allowed");
            ctx.transport_error(error);
            return Err(error);
        }

        if id < total_path_id_count {
            // may be missing if the path has closed
            Ok(self.lookup_path_id(id))
        } else {
            let error = transport::Error::INTERNAL_ERROR
                .with_reason("local tried to open a path id it hasn't allocated");
            ctx.transport_error(error);
            Err(error)
        }
    }

    /// Resolves a peer-chosen path id, optionally allocating every id
    /// up to it
    ///
    /// Peer-driven allocation is strictly contiguous: referencing id
    /// `n` implicitly opens `[totalPathIDCount, n]`.
    pub fn get_path_id_for_peer<Ctx: Context>(
        &self,
        ctx: &mut Ctx,
        id: u32,
        create_if_missing: bool,
    ) -> Result<Option<Arc<PathId>>, transport::Error> {
        let (max_path_id, total_path_id_count) = {
            let inner = self.inner.read().expect("lock");
            (inner.max_path_id, inner.total_path_id_count)
        };

        if id > max_path_id {
            let error = transport::Error::PROTOCOL_VIOLATION
                .with_reason("peer used more path ids than allowed");
            ctx.transport_error(error);
            return Err(error);
        }

        if id < total_path_id_count {
            return Ok(self.lookup_path_id(id));
        }

        if !create_if_missing {
            let error = transport::Error::PROTOCOL_VIOLATION
                .with_reason("peer tried to open a path id it wasn't allowed to open");
            ctx.transport_error(error);
            return Err(error);
        }

        loop {
            let mut inner = self.inner.write().expect("lock");
            let new_id = inner.total_path_id_count;
            let new_path = PathId::new(new_id);
            inner.insert(new_path.clone());
            inner.current_path_id_count += 1;
            inner.total_path_id_count += 1;
            debug!(id = new_id, "added new path id");

            if inner.total_path_id_count == id + 1 {
                return Ok(Some(new_path));
            }
        }
    }

    /// Allocates the next locally initiated path id
    pub fn new_local_path_id<Ctx: Context>(
        &self,
        ctx: &mut Ctx,
    ) -> Result<Arc<PathId>, PathIdLimitReached> {
        let mut inner = self.inner.write().expect("lock");

        let blocked = inner.total_path_id_count as u64 > inner.peer_max_path_id as u64;
        if blocked {
            drop(inner);
            if ctx.multipath_negotiated() {
                ctx.set_send_flag(SendFlag::PathsBlocked);
            }
            return Err(PathIdLimitReached);
        }

        let id = inner.total_path_id_count;
        let path = PathId::new(id);
        inner.insert(path.clone());
        inner.current_path_id_count += 1;
        inner.total_path_id_count += 1;

        if inner.max_current_path_id_count < inner.current_path_id_count {
            inner.max_current_path_id_count = inner.current_path_id_count;
        }

        debug!(id, "added new path id");

        Ok(path)
    }

    /// Releases a path id once it is both abandoned and closed;
    /// otherwise does nothing
    pub fn try_free_path_id<Ctx: Context>(&self, ctx: &mut Ctx, path: &Arc<PathId>) {
        if !path.is_abandoned_and_closed() {
            return;
        }

        debug!(id = path.id(), "removed path id");

        ctx.on_path_id_freed(path.id());

        {
            let mut path = path.lock();
            path.flags.in_path_id_table = false;
            path.loss_detection.reset();
        }

        let raise_limit = {
            let mut inner = self.inner.write().expect("lock");
            inner.remove(path.id());
            inner.current_path_id_count -= 1;

            if inner.current_path_id_count < inner.max_current_path_id_count {
                inner.max_path_id += 1;
                true
            } else {
                false
            }
        };

        if raise_limit {
            ctx.set_send_flag(SendFlag::MaxPathId);
        }
    }

    /// Applies a decoded ACK frame to the loss detection of the path
    /// it arrived for
    #[allow(clippy::too_many_arguments)]
    pub fn process_ack_frame<Ctx: Context>(
        &self,
        ctx: &mut Ctx,
        path_id: u32,
        level: EncryptLevel,
        ack_blocks: &IntervalSet,
        ecn: Option<EcnCounts>,
        ack_delay: u64,
    ) -> Result<(), transport::Error> {
        let path = self
            .get_path_id_for_peer(ctx, path_id, true)?
            .ok_or_else(|| {
                transport::Error::PROTOCOL_VIOLATION.with_reason("unknown path id in ACK")
            })?;

        let mut inner = path.lock();

        // an ACK can never cover a packet number we haven't sent
        let largest_acked = ack_blocks.max_end().map(|end| end - 1);
        let valid = match (largest_acked, inner.loss_detection.largest_sent_packet_number()) {
            (Some(largest_acked), Some(largest_sent)) => largest_acked <= largest_sent,
            (Some(_), None) => false,
            (None, _) => true,
        };
        if !valid {
            drop(inner);
            let error = transport::Error::PROTOCOL_VIOLATION
                .with_reason("ACK for a packet that was never sent");
            ctx.transport_error(error);
            return Err(error);
        }

        //= https://www.rfc-editor.org/rfc/rfc9000#section-19.3
        //# The ACK Delay value [...] is multiplied by 2 to the power of the
        //# value of the ack_delay_exponent transport parameter
        let ack_delay = ack_delay << ctx.peer_ack_delay_exponent();

        trace!(path_id, ?level, ack_delay, "processing ack blocks");
        inner
            .loss_detection
            .process_ack_blocks(level, ack_delay, ack_blocks, ecn);

        Ok(())
    }

    /// Takes a bounded snapshot of every live path id
    pub fn get_path_ids(&self) -> SmallVec<[Arc<PathId>; ACTIVE_PATH_ID_LIMIT as usize]> {
        let inner = self.inner.read().expect("lock");
        let mut paths = SmallVec::new();
        match &inner.storage {
            Storage::Empty => {}
            Storage::Single(path) => paths.push(path.clone()),
            Storage::Many(map) => {
                paths.extend(map.values().cloned());
                paths.sort_by_key(|path: &Arc<PathId>| path.id());
            }
        }
        paths
    }

    /// Fans a loss-detection timer expiry out to every path
    pub fn process_loss_detection_timer_operation(&self) {
        for path in self.get_path_ids() {
            path.lock().loss_detection.on_loss_detection_timeout();
        }
    }

    /// Drops every path handle held by the set
    pub fn free(&self) {
        let mut inner = self.inner.write().expect("lock");
        inner.storage = Storage::Empty;
    }
}

impl Inner {
    fn lookup(&self, id: u32) -> Option<Arc<PathId>> {
        match &self.storage {
            Storage::Empty => None,
            Storage::Single(path) => (path.id() == id).then(|| path.clone()),
            Storage::Many(map) => map.get(&id).cloned(),
        }
    }

    /// Inserts under the exclusive lock; the second insertion
    /// promotes the inline entry to a hash table, and the promotion
    /// is never undone
    fn insert(&mut self, path: Arc<PathId>) {
        path.lock().flags.in_path_id_table = true;

        match &mut self.storage {
            storage @ Storage::Empty => {
                *storage = Storage::Single(path);
            }
            storage @ Storage::Single(_) => {
                let existing = match core::mem::replace(storage, Storage::Empty) {
                    Storage::Single(existing) => existing,
                    _ => unreachable!(),
                };
                let mut map = HashMap::new();
                map.insert(existing.id(), existing);
                map.insert(path.id(), path);
                *storage = Storage::Many(map);
            }
            Storage::Many(map) => {
                map.insert(path.id(), path);
            }
        }
    }

    fn remove(&mut self, id: u32) {
        match &mut self.storage {
            Storage::Empty => debug_assert!(false, "removing from an empty set"),
            storage @ Storage::Single(_) => {
                if let Storage::Single(path) = storage {
                    debug_assert_eq!(path.id(), id);
                }
                *storage = Storage::Empty;
            }
            Storage::Many(map) => {
                map.remove(&id);
            }
        }
    }
}
