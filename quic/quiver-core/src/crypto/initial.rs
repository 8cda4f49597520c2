// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use hex_literal::hex;

//= https://www.rfc-editor.org/rfc/rfc9001#section-5.2
//# initial_salt = 0x38762cf7f55934b34d179ae6a4c80cadccbb7f0a

pub const INITIAL_SALT_V1: [u8; 20] = hex!("38762cf7f55934b34d179ae6a4c80cadccbb7f0a");

//= https://tools.ietf.org/id/draft-ietf-quic-tls-29.txt#5.2
//# initial_salt = 0xafbfec289993d24c9e9786f19c6111e04390a899

pub const INITIAL_SALT_DRAFT_29: [u8; 20] = hex!("afbfec289993d24c9e9786f19c6111e04390a899");

//= https://www.rfc-editor.org/rfc/rfc9001#section-5.2
//# client_initial_secret = HKDF-Expand-Label(initial_secret,
//#                                           "client in", "",
//#                                           Hash.length)

pub const INITIAL_CLIENT_LABEL: [u8; 9] = *b"client in";

//= https://www.rfc-editor.org/rfc/rfc9001#section-5.2
//# server_initial_secret = HKDF-Expand-Label(initial_secret,
//#                                           "server in", "",
//#                                           Hash.length)

pub const INITIAL_SERVER_LABEL: [u8; 9] = *b"server in";

//= https://www.rfc-editor.org/rfc/rfc9001#section-6.1
//# secret_<n+1> = HKDF-Expand-Label(secret_<n>, "quic ku",
//#                                  "", Hash.length)

pub const KEY_UPDATE_LABEL: [u8; 7] = *b"quic ku";

pub const QUIC_VERSION_1: u32 = 0x0000_0001;
pub const QUIC_VERSION_DRAFT_29: u32 = 0xff00_001d;

/// Returns the HKDF salt for deriving INITIAL secrets for `version`
///
/// Unknown versions fall back to the latest supported salt, matching
/// the behavior for locally initiated connections where the version
/// has already been validated.
#[inline]
pub fn initial_salt(version: u32) -> &'static [u8; 20] {
    match version {
        QUIC_VERSION_DRAFT_29 => &INITIAL_SALT_DRAFT_29,
        _ => &INITIAL_SALT_V1,
    }
}

//= https://www.rfc-editor.org/rfc/rfc9001#appendix-A.1
//# These packets use an 8-byte client-chosen Destination Connection ID
//# of 0x8394c8f03e515708.

pub const EXAMPLE_DCID: [u8; 8] = hex!("8394c8f03e515708");
