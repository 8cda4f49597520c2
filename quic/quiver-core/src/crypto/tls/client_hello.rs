// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! ClientHello preprocessing.
//!
//! A server must match an incoming connection to a listener before it
//! has a TLS session to parse with, so the ALPN list (and the SNI,
//! when present) are pulled straight out of the first complete
//! ClientHello on the CRYPTO stream.

use crate::transport;
use alloc::vec::Vec;
use bytes::Bytes;
use s2n_codec::DecoderBuffer;

//= https://www.rfc-editor.org/rfc/rfc8446#section-4.1.2
//# struct {
//#     ProtocolVersion legacy_version = 0x0303;    /* TLS v1.2 */
//#     Random random;
//#     opaque legacy_session_id<0..32>;
//#     CipherSuite cipher_suites<2..2^16-2>;
//#     opaque legacy_compression_methods<1..2^8-1>;
//#     Extension extensions<8..2^16-1>;
//# } ClientHello;

const MESSAGE_TYPE_CLIENT_HELLO: u8 = 1;
const RANDOM_LEN: usize = 32;

const EXTENSION_SERVER_NAME: u16 = 0;
const EXTENSION_ALPN: u16 = 16;

const SNI_NAME_TYPE_HOST_NAME: u8 = 0;

/// handshake_failure(40), reported when the hello cannot be parsed
const HANDSHAKE_FAILURE_ALERT: u8 = 40;

fn malformed(reason: &'static str) -> transport::Error {
    transport::Error::crypto_error(HANDSHAKE_FAILURE_ALERT).with_reason(reason)
}

/// The connection-selection properties of a ClientHello
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ClientHello {
    /// The server_name extension's host name, if offered
    pub server_name: Option<Bytes>,
    /// The offered application protocols, in preference order
    pub alpn_protocols: Vec<Bytes>,
}

impl ClientHello {
    /// Parses the selection properties out of a complete ClientHello
    /// message (including the 4-byte handshake header)
    pub fn parse(message: &[u8]) -> Result<Self, transport::Error> {
        let buffer = DecoderBuffer::new(message);

        let (msg_type, buffer) = buffer
            .decode::<u8>()
            .map_err(|_| malformed("truncated handshake header"))?;

        if msg_type != MESSAGE_TYPE_CLIENT_HELLO {
            return Err(transport::Error::PROTOCOL_VIOLATION
                .with_reason("first TLS message should be a ClientHello"));
        }

        let (payload_len, buffer) = decode_u24(buffer)?;
        let (payload, _) = buffer
            .decode_slice(payload_len)
            .map_err(|_| malformed("truncated ClientHello"))?;

        // legacy_version + random
        let payload = payload
            .skip(2 + RANDOM_LEN)
            .map_err(|_| malformed("truncated ClientHello body"))?;

        // legacy_session_id
        let (session_id_len, payload) = payload
            .decode::<u8>()
            .map_err(|_| malformed("truncated session id"))?;
        let payload = payload
            .skip(session_id_len as usize)
            .map_err(|_| malformed("truncated session id"))?;

        // cipher_suites
        let (cipher_suites_len, payload) = payload
            .decode::<u16>()
            .map_err(|_| malformed("truncated cipher suites"))?;
        let payload = payload
            .skip(cipher_suites_len as usize)
            .map_err(|_| malformed("truncated cipher suites"))?;

        // legacy_compression_methods
        let (compression_len, payload) = payload
            .decode::<u8>()
            .map_err(|_| malformed("truncated compression methods"))?;
        let payload = payload
            .skip(compression_len as usize)
            .map_err(|_| malformed("truncated compression methods"))?;

        let (extensions_len, payload) = payload
            .decode::<u16>()
            .map_err(|_| malformed("truncated extensions"))?;
        let (mut extensions, _) = payload
            .decode_slice(extensions_len as usize)
            .map_err(|_| malformed("truncated extensions"))?;

        let mut hello = ClientHello::default();

        while !extensions.is_empty() {
            let (ext_type, rest) = extensions
                .decode::<u16>()
                .map_err(|_| malformed("truncated extension header"))?;
            let (ext_len, rest) = rest
                .decode::<u16>()
                .map_err(|_| malformed("truncated extension header"))?;
            let (ext_data, rest) = rest
                .decode_slice(ext_len as usize)
                .map_err(|_| malformed("truncated extension"))?;

            match ext_type {
                EXTENSION_SERVER_NAME => {
                    hello.server_name = parse_server_name(ext_data)?;
                }
                EXTENSION_ALPN => {
                    hello.alpn_protocols = parse_alpn(ext_data)?;
                }
                _ => {}
            }

            extensions = rest;
        }

        //= https://www.rfc-editor.org/rfc/rfc9001#section-8.1
        //# When using ALPN, endpoints MUST immediately close a connection
        //# [...] if an application protocol is not negotiated.
        if hello.alpn_protocols.is_empty() {
            return Err(transport::Error::CRYPTO_NO_APPLICATION_PROTOCOL);
        }

        Ok(hello)
    }
}

//= https://www.rfc-editor.org/rfc/rfc6066#section-3
//# struct {
//#     NameType name_type;
//#     select (name_type) {
//#         case host_name: HostName;
//#     } name;
//# } ServerName;

fn parse_server_name(buffer: DecoderBuffer) -> Result<Option<Bytes>, transport::Error> {
    let (list_len, buffer) = buffer
        .decode::<u16>()
        .map_err(|_| malformed("truncated server name list"))?;
    let (mut list, _) = buffer
        .decode_slice(list_len as usize)
        .map_err(|_| malformed("truncated server name list"))?;

    while !list.is_empty() {
        let (name_type, rest) = list
            .decode::<u8>()
            .map_err(|_| malformed("truncated server name"))?;
        let (name_len, rest) = rest
            .decode::<u16>()
            .map_err(|_| malformed("truncated server name"))?;
        let (name, rest) = rest
            .decode_slice(name_len as usize)
            .map_err(|_| malformed("truncated server name"))?;

        if name_type == SNI_NAME_TYPE_HOST_NAME {
            return Ok(Some(Bytes::copy_from_slice(name.into_less_safe_slice())));
        }

        list = rest;
    }

    Ok(None)
}

//= https://www.rfc-editor.org/rfc/rfc7301#section-3.1
//# opaque ProtocolName<1..2^8-1>;
//#
//# struct {
//#     ProtocolName protocol_name_list<2..2^16-1>
//# } ProtocolNameList;

fn parse_alpn(buffer: DecoderBuffer) -> Result<Vec<Bytes>, transport::Error> {
    let (list_len, buffer) = buffer
        .decode::<u16>()
        .map_err(|_| malformed("truncated alpn list"))?;
    let (mut list, _) = buffer
        .decode_slice(list_len as usize)
        .map_err(|_| malformed("truncated alpn list"))?;

    let mut protocols = Vec::new();

    while !list.is_empty() {
        let (protocol_len, rest) = list
            .decode::<u8>()
            .map_err(|_| malformed("truncated alpn entry"))?;
        if protocol_len == 0 {
            return Err(malformed("empty alpn entry"));
        }
        let (protocol, rest) = rest
            .decode_slice(protocol_len as usize)
            .map_err(|_| malformed("truncated alpn entry"))?;

        protocols.push(Bytes::copy_from_slice(protocol.into_less_safe_slice()));
        list = rest;
    }

    Ok(protocols)
}

fn decode_u24(buffer: DecoderBuffer) -> Result<(usize, DecoderBuffer), transport::Error> {
    let (bytes, buffer) = buffer
        .decode_slice(3)
        .map_err(|_| malformed("truncated length"))?;
    let bytes = bytes.into_less_safe_slice();
    let len = u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]]) as usize;
    Ok((len, buffer))
}
