// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use super::*;
use alloc::collections::BTreeSet;
use alloc::vec::Vec;
use bolero::{check, generator::*};

type Bound = u8;

#[derive(Clone, Debug, TypeGenerator)]
enum Operation {
    Insert { start: Bound, len: Bound },
    SetMin { min: Bound },
    PopMin,
}

fn apply(model: &mut BTreeSet<u64>, subject: &mut IntervalSet, operation: &Operation) {
    match operation {
        Operation::Insert { start, len } => {
            let start = *start as u64;
            let end = start + *len as u64;
            let result = subject.insert(start, end);
            if start >= end {
                assert_eq!(result, Err(IntervalSetError::InvalidInterval));
                return;
            }
            let (index, updated) = result.unwrap();
            let mut any_new = false;
            for value in start..end {
                any_new |= model.insert(value);
            }
            assert_eq!(updated, any_new);

            // the returned interval covers everything that was inserted
            let merged = subject.get(index).unwrap();
            assert!(merged.start <= start && end <= merged.end);
        }
        Operation::SetMin { min } => {
            let min = *min as u64;
            subject.set_min(min);
            *model = model.split_off(&min);
        }
        Operation::PopMin => {
            if let Some(interval) = subject.pop_min() {
                for value in interval.start..interval.end {
                    assert!(model.remove(&value));
                }
            } else {
                assert!(model.is_empty());
            }
        }
    }
}

#[test]
#[cfg_attr(miri, ignore)]
fn differential_test() {
    check!()
        .with_type::<Vec<Operation>>()
        .for_each(|operations| {
            let mut model = BTreeSet::new();
            let mut subject = IntervalSet::new();

            for operation in operations {
                apply(&mut model, &mut subject, operation);
                subject.validate();

                assert_eq!(model.len() as u64, subject.count());
                for value in model.iter() {
                    assert!(subject.contains(*value));
                }
            }
        });
}

#[test]
fn merge_on_insert_test() {
    let mut set = IntervalSet::new();
    set.insert(0, 10).unwrap();
    set.insert(20, 30).unwrap();
    assert_eq!(set.interval_len(), 2);

    // adjacent intervals are merged
    set.insert(10, 20).unwrap();
    assert_eq!(set.interval_len(), 1);
    assert_eq!(set.get(0), Some(Interval { start: 0, end: 30 }));

    // a covered insert reports no new values
    let (_, updated) = set.insert(5, 25).unwrap();
    assert!(!updated);
}

#[test]
fn limit_test() {
    let mut set = IntervalSet::with_limit(2);
    set.insert(0, 1).unwrap();
    set.insert(10, 11).unwrap();
    assert_eq!(set.insert(20, 21), Err(IntervalSetError::LimitExceeded));

    // merging inserts don't allocate new intervals
    set.insert(1, 2).unwrap();
    assert_eq!(set.interval_len(), 2);
}

#[test]
fn first_interval_beyond_test() {
    let mut set = IntervalSet::new();
    set.insert(10, 20).unwrap();
    set.insert(30, 40).unwrap();

    assert_eq!(
        set.first_interval_beyond(0).map(|(_, i)| i),
        Some(Interval { start: 10, end: 20 })
    );
    // a partially covered start still returns the covering interval
    assert_eq!(
        set.first_interval_beyond(15).map(|(_, i)| i),
        Some(Interval { start: 10, end: 20 })
    );
    assert_eq!(
        set.first_interval_beyond(20).map(|(_, i)| i),
        Some(Interval { start: 30, end: 40 })
    );
    assert_eq!(set.first_interval_beyond(40), None);
}

#[test]
fn set_min_test() {
    let mut set = IntervalSet::new();
    set.insert(0, 10).unwrap();
    set.insert(20, 30).unwrap();

    set.set_min(5);
    assert_eq!(set.get(0), Some(Interval { start: 5, end: 10 }));

    set.set_min(15);
    assert_eq!(set.get(0), Some(Interval { start: 20, end: 30 }));

    set.set_min(30);
    assert!(set.is_empty());
}
