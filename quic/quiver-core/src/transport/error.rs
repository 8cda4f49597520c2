// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

use crate::varint::VarInt;
use core::fmt;

//= https://www.rfc-editor.org/rfc/rfc9000#section-20.1
//# QUIC transport error codes and application error codes are 62-bit
//# unsigned integers.

/// A transport-level error
///
/// Transport errors apply to the entire connection and initiate
/// connection close with the carried code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Error {
    pub code: VarInt,
    pub frame_type: Option<VarInt>,
    pub reason: &'static str,
}

impl Error {
    /// Creates a new `Error` with the specified code
    pub const fn new(code: VarInt) -> Self {
        Self {
            code,
            frame_type: None,
            reason: "",
        }
    }

    /// Updates the `Error` with the specified `frame_type`
    #[must_use]
    pub const fn with_frame_type(mut self, frame_type: VarInt) -> Self {
        self.frame_type = Some(frame_type);
        self
    }

    /// Updates the `Error` with the specified `reason`
    #[must_use]
    pub const fn with_reason(mut self, reason: &'static str) -> Self {
        self.reason = reason;
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.reason.is_empty() {
            let code: u64 = self.code.into();
            write!(f, "TransportError({code})")
        } else {
            f.write_str(self.reason)
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Internal convenience macro for defining standard error codes
macro_rules! def_error {
    ($doc:expr, $name:ident, $code:expr) => {
        impl Error {
            #[doc = $doc]
            pub const $name: Error = Error::new(VarInt::from_u32($code));
        }
    };
}

def_error!(
    "An endpoint uses this with CONNECTION_CLOSE to signal that the connection is being closed abruptly in the absence of any error.",
    NO_ERROR,
    0x0
);

def_error!(
    "The endpoint encountered an internal error and cannot continue with the connection.",
    INTERNAL_ERROR,
    0x1
);

def_error!(
    "The server refused to accept a new connection.",
    CONNECTION_REFUSED,
    0x2
);

def_error!(
    "An endpoint detected an error with protocol compliance that was not covered by more specific error codes.",
    PROTOCOL_VIOLATION,
    0xA
);

def_error!(
    "An endpoint has received more data in CRYPTO frames than it can buffer.",
    CRYPTO_BUFFER_EXCEEDED,
    0xD
);

def_error!(
    "An endpoint detected errors in performing key updates.",
    KEY_UPDATE_ERROR,
    0xE
);

//= https://www.rfc-editor.org/rfc/rfc9001#section-4.8
//# A TLS alert is converted into a QUIC connection error.  The
//# AlertDescription value is added to 0x0100 to produce a QUIC error
//# code from the range reserved for CRYPTO_ERROR.

impl Error {
    /// Creates a crypto-level `Error` from a TLS alert code
    #[inline]
    pub const fn crypto_error(alert: u8) -> Self {
        Self::new(VarInt::from_u16(0x100 | alert as u16))
    }

    /// Returns the TLS alert for the error, if any
    #[inline]
    pub fn try_into_tls_alert(self) -> Option<u8> {
        let code = self.code.as_u64();
        if (0x100..=0x1ff).contains(&code) {
            Some(code as u8)
        } else {
            None
        }
    }
}

//= https://www.rfc-editor.org/rfc/rfc9001#section-8.1
//# If the ClientHello or EncryptedExtensions do not contain the
//# quic_transport_parameters extension or the ALPN extension is
//# malformed, the endpoint uses the no_application_protocol alert.

/// TLS alert 120 (no_application_protocol), as a transport error
impl Error {
    pub const CRYPTO_NO_APPLICATION_PROTOCOL: Error =
        Error::crypto_error(120).with_reason("no application protocol");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crypto_error_test() {
        let error = Error::crypto_error(42);
        assert_eq!(error.code.as_u64(), 0x100 + 42);
        assert_eq!(error.try_into_tls_alert(), Some(42));
        assert_eq!(Error::PROTOCOL_VIOLATION.try_into_tls_alert(), None);
    }

    #[test]
    fn alert_truncation_test() {
        // only the low byte of an alert participates in the code
        let error = Error::crypto_error(0xFF);
        assert_eq!(error.code.as_u64(), 0x1FF);
    }

    #[test]
    fn display_test() {
        assert_eq!(
            Error::PROTOCOL_VIOLATION.to_string(),
            "TransportError(10)"
        );
        assert_eq!(
            Error::PROTOCOL_VIOLATION
                .with_reason("leftover crypto data")
                .to_string(),
            "leftover crypto data"
        );
    }
}
