// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use super::*;
use crate::{
    connection::SendFlag,
    path::set::{PathIdLimitReached, ACTIVE_PATH_ID_LIMIT},
    testing::{Context, Event},
};
use bolero::{check, generator::*};
use quiver_core::{crypto::EncryptLevel, interval_set::IntervalSet, transport};

/// A set with path id 0 open and the peer's transport parameters
/// applied
fn multipath_set(ctx: &mut Context, peer_max_path_id: u32) -> PathIdSet {
    ctx.multipath = true;
    let set = PathIdSet::new();
    set.new_local_path_id(ctx).expect("path id 0");
    set.initialize_transport_parameters(2, Some(peer_max_path_id));
    set
}

#[test]
fn path_zero_owns_all_spaces() {
    let path = PathId::new(0);
    let inner = path.lock();
    assert!(inner.packet_space(EncryptLevel::Initial).is_some());
    assert!(inner.packet_space(EncryptLevel::Handshake).is_some());
    assert!(inner.packet_space(EncryptLevel::OneRtt).is_some());
}

#[test]
fn later_paths_only_get_one_rtt() {
    let path = PathId::new(3);
    let inner = path.lock();
    assert!(inner.packet_space(EncryptLevel::Initial).is_none());
    assert!(inner.packet_space(EncryptLevel::Handshake).is_none());
    assert!(inner.packet_space(EncryptLevel::OneRtt).is_some());
}

#[test]
fn transport_parameters_without_max_path_id_disable_multipath() {
    let mut ctx = Context::client();
    let set = PathIdSet::new();
    set.new_local_path_id(&mut ctx).unwrap();

    set.initialize_transport_parameters(2, None);
    assert!(!set.multipath_enabled());
    assert_eq!(set.max_path_id(), 0);
    assert_eq!(set.peer_max_path_id(), 0);

    // only path id 0 is usable
    let result = set.get_path_id_for_peer(&mut ctx, 1, true);
    assert!(result.is_err());
}

#[test]
fn transport_parameters_with_max_path_id() {
    let mut ctx = Context::client();
    let set = multipath_set(&mut ctx, 10);

    assert!(set.multipath_enabled());
    assert_eq!(set.max_path_id(), ACTIVE_PATH_ID_LIMIT - 1);
    assert_eq!(set.peer_max_path_id(), 10);
}

#[test]
fn source_cid_limit_clamps_but_never_raises() {
    let mut ctx = Context::client();
    let set = PathIdSet::new();
    let path = set.new_local_path_id(&mut ctx).unwrap();
    assert_eq!(path.lock().source_cid_limit, DEFAULT_SOURCE_CID_LIMIT);

    // a lower peer limit clamps
    set.initialize_transport_parameters(2, None);
    assert_eq!(path.lock().source_cid_limit, 2);

    // a higher peer limit does not raise it back
    set.initialize_transport_parameters(8, None);
    assert_eq!(path.lock().source_cid_limit, 2);
}

#[test]
fn peer_driven_allocation_is_contiguous() {
    let mut ctx = Context::client();
    let set = multipath_set(&mut ctx, 10);
    assert_eq!(set.total_path_id_count(), 1);

    // an ACK arrives on path 2 before paths 1 and 2 were opened
    let path = set
        .get_path_id_for_peer(&mut ctx, 2, true)
        .unwrap()
        .expect("created");
    assert_eq!(path.id(), 2);
    assert_eq!(set.total_path_id_count(), 3);

    for id in 0..=2 {
        assert!(set.lookup_path_id(id).is_some());
    }

    // the implicitly opened paths only carry 1-RTT packets
    for id in 1..=2 {
        let path = set.lookup_path_id(id).unwrap();
        let inner = path.lock();
        assert!(inner.packet_space(EncryptLevel::Initial).is_none());
        assert!(inner.packet_space(EncryptLevel::Handshake).is_none());
        assert!(inner.packet_space(EncryptLevel::OneRtt).is_some());
    }
}

#[test]
fn peer_path_id_overrun_is_protocol_violation() {
    let mut ctx = Context::client();
    let set = multipath_set(&mut ctx, 10);

    let result = set.get_path_id_for_peer(&mut ctx, 5, true);
    assert_eq!(
        result.unwrap_err().code,
        transport::Error::PROTOCOL_VIOLATION.code
    );
    assert_eq!(
        ctx.transport_errors().first().map(|e| e.code),
        Some(transport::Error::PROTOCOL_VIOLATION.code)
    );
    // nothing was allocated
    assert_eq!(set.total_path_id_count(), 1);
}

#[test]
fn local_path_id_overrun_is_internal_error() {
    let mut ctx = Context::client();
    let set = multipath_set(&mut ctx, 1);

    // id 0 is open
    let path = set.get_path_id_for_local(&mut ctx, 0).unwrap();
    assert_eq!(path.map(|p| p.id()), Some(0));

    // id 1 is allowed but unopened
    let result = set.get_path_id_for_local(&mut ctx, 1);
    assert_eq!(
        result.unwrap_err().code,
        transport::Error::INTERNAL_ERROR.code
    );

    // id 2 exceeds the peer's limit
    ctx.events.clear();
    let result = set.get_path_id_for_local(&mut ctx, 2);
    assert_eq!(
        result.unwrap_err().code,
        transport::Error::INTERNAL_ERROR.code
    );
}

#[test]
fn local_allocation_blocked_by_peer_limit() {
    let mut ctx = Context::client();
    let set = multipath_set(&mut ctx, 1);

    // id 1 is available
    let path = set.new_local_path_id(&mut ctx).unwrap();
    assert_eq!(path.id(), 1);

    // id 2 is blocked until the peer raises MAX_PATH_ID
    assert!(matches!(
        set.new_local_path_id(&mut ctx),
        Err(PathIdLimitReached)
    ));
    assert!(ctx.has_send_flag(SendFlag::PathsBlocked));

    set.update_max_path_id(&mut ctx, 3);
    assert_eq!(set.peer_max_path_id(), 3);
    // the raise minted new path ids up to the active cap
    assert_eq!(set.current_path_id_count(), ACTIVE_PATH_ID_LIMIT);
}

#[test]
fn try_free_requires_abandoned_and_closed() {
    let mut ctx = Context::client();
    let set = multipath_set(&mut ctx, 10);
    let path = set.get_path_id_for_peer(&mut ctx, 1, true).unwrap().unwrap();

    // neither flag: kept
    set.try_free_path_id(&mut ctx, &path);
    assert!(set.lookup_path_id(1).is_some());

    path.lock().flags.abandoned = true;
    set.try_free_path_id(&mut ctx, &path);
    assert!(set.lookup_path_id(1).is_some());

    path.lock().flags.closed = true;
    set.try_free_path_id(&mut ctx, &path);
    assert!(set.lookup_path_id(1).is_none());
    assert_eq!(set.current_path_id_count(), 1);
    assert!(ctx.events.contains(&Event::PathIdFreed(1)));

    // freeing below the cap re-opens a path id for the peer
    assert!(ctx.has_send_flag(SendFlag::MaxPathId));
    assert_eq!(set.max_path_id(), ACTIVE_PATH_ID_LIMIT);
}

#[test]
fn ack_frame_is_validated_against_largest_sent() {
    let mut ctx = Context::client();
    let set = multipath_set(&mut ctx, 10);

    {
        let path = set.get_path_id_for_peer(&mut ctx, 1, true).unwrap().unwrap();
        path.lock()
            .loss_detection
            .on_packet_sent(5, true);
    }

    let mut blocks = IntervalSet::new();
    blocks.insert(0, 6).unwrap();
    set.process_ack_frame(&mut ctx, 1, EncryptLevel::OneRtt, &blocks, None, 100)
        .unwrap();

    let path = set.lookup_path_id(1).unwrap();
    assert_eq!(path.lock().loss_detection.largest_acked_packet_number(), Some(5));

    // acknowledging an unsent packet closes the connection
    let mut blocks = IntervalSet::new();
    blocks.insert(0, 8).unwrap();
    let result = set.process_ack_frame(&mut ctx, 1, EncryptLevel::OneRtt, &blocks, None, 100);
    assert_eq!(
        result.unwrap_err().code,
        transport::Error::PROTOCOL_VIOLATION.code
    );
}

#[test]
fn snapshot_is_bounded_and_ordered() {
    let mut ctx = Context::client();
    let set = multipath_set(&mut ctx, 10);
    set.get_path_id_for_peer(&mut ctx, 3, true).unwrap();

    let ids: Vec<u32> = set.get_path_ids().iter().map(|path| path.id()).collect();
    assert_eq!(ids, vec![0, 1, 2, 3]);

    set.process_loss_detection_timer_operation();

    // teardown drops every handle at once
    set.free();
    assert!(set.lookup_path_id(0).is_none());
    assert!(set.get_path_ids().is_empty());
}

// P6/P7: allocation order and contiguity under arbitrary interleavings
#[derive(Clone, Copy, Debug, TypeGenerator)]
enum AllocOp {
    NewLocal,
    PeerCreate { id: u8 },
}

#[test]
#[cfg_attr(miri, ignore)]
fn allocation_monotonicity_test() {
    check!().with_type::<Vec<AllocOp>>().for_each(|ops| {
        let mut ctx = Context::client();
        ctx.multipath = true;
        let set = PathIdSet::new();
        set.new_local_path_id(&mut ctx).unwrap();
        set.initialize_transport_parameters(2, Some(64));

        let mut allocated = vec![0u32];

        for op in ops {
            let before = set.total_path_id_count();
            match op {
                AllocOp::NewLocal => {
                    if let Ok(path) = set.new_local_path_id(&mut ctx) {
                        allocated.push(path.id());
                    }
                }
                AllocOp::PeerCreate { id } => {
                    let id = (*id % ACTIVE_PATH_ID_LIMIT as u8) as u32;
                    if let Ok(Some(path)) = set.get_path_id_for_peer(&mut ctx, id, true) {
                        if path.id() >= before {
                            for new_id in before..=path.id() {
                                allocated.push(new_id);
                            }
                        }
                    }
                }
            }

            // P6: strictly increasing allocation
            assert!(allocated.windows(2).all(|pair| pair[0] < pair[1]));
            assert_eq!(*allocated.last().unwrap() + 1, set.total_path_id_count());

            // P7: every allocated id below the total exists unless freed
            for id in 0..set.total_path_id_count() {
                assert!(set.lookup_path_id(id).is_some());
            }
        }
    });
}
