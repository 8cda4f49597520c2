// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(any(test, feature = "std")), no_std)]

#[cfg(feature = "alloc")]
extern crate alloc;

pub mod crypto;
pub mod endpoint;
pub mod frame;
#[cfg(feature = "alloc")]
pub mod interval_set;
pub mod transport;
pub mod varint;
