// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    frame::{FitError, Tag},
    varint::VarInt,
};
use core::{convert::TryFrom, mem::size_of};
use s2n_codec::{decoder_parameterized_value, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.6
//# A CRYPTO frame (type=0x06) is used to transmit cryptographic
//# handshake messages.

macro_rules! crypto_tag {
    () => {
        0x06u8
    };
}

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.6
//# CRYPTO Frame {
//#   Type (i) = 0x06,
//#   Offset (i),
//#   Length (i),
//#   Crypto Data (..),
//# }

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.6
//# CRYPTO frames contain the following fields:
//#
//# Offset:  A variable-length integer specifying the byte offset in the
//#    stream for the data in this CRYPTO frame.
//#
//# Length:  A variable-length integer specifying the length of the
//#    Crypto Data field in this CRYPTO frame.
//#
//# Crypto Data:  The cryptographic message data.

#[derive(Debug, PartialEq, Eq)]
pub struct Crypto<Data> {
    /// The byte offset in the stream for the data in this CRYPTO frame,
    /// relative to the start of the frame's encryption level
    pub offset: VarInt,

    /// The cryptographic message data
    pub data: Data,
}

impl<Data> Crypto<Data> {
    #[inline]
    pub const fn tag(&self) -> u8 {
        crypto_tag!()
    }

    /// Converts the crypto data from one type to another
    #[inline]
    pub fn map_data<F: FnOnce(Data) -> Out, Out>(self, map: F) -> Crypto<Out> {
        Crypto {
            offset: self.offset,
            data: map(self.data),
        }
    }
}

impl<Data: EncoderValue> Crypto<Data> {
    /// Tries to fit the frame into the provided capacity
    ///
    /// If ok, the maximum payload length is returned, otherwise the
    /// frame cannot fit.
    #[inline]
    pub fn try_fit(&self, capacity: usize) -> Result<usize, FitError> {
        let mut fixed_len = 0;
        fixed_len += size_of::<Tag>();
        fixed_len += self.offset.encoding_size();

        let remaining_capacity = capacity.checked_sub(fixed_len).ok_or(FitError)?;

        let data_len = self.data.encoding_size();
        let max_data_len = remaining_capacity.min(data_len);

        let len_prefix_size = VarInt::try_from(max_data_len)
            .map_err(|_| FitError)?
            .encoding_size();

        let prefixed_data_len = remaining_capacity
            .checked_sub(len_prefix_size)
            .ok_or(FitError)?;
        let data_len = prefixed_data_len.min(data_len);

        Ok(data_len)
    }
}

pub type CryptoRef<'a> = Crypto<&'a [u8]>;

decoder_parameterized_value!(
    impl<'a, Data> Crypto<Data> {
        fn decode(_tag: Tag, buffer: Buffer) -> Result<Self> {
            let (offset, buffer) = buffer.decode()?;
            let (data, buffer) = buffer.decode_with_len_prefix::<VarInt, Data>()?;

            let frame = Crypto { offset, data };

            Ok((frame, buffer))
        }
    }
);

impl<Data: EncoderValue> EncoderValue for Crypto<Data> {
    #[inline]
    fn encode<E: Encoder>(&self, buffer: &mut E) {
        buffer.encode(&self.tag());
        buffer.encode(&self.offset);
        buffer.encode_with_len_prefix::<VarInt, _>(&self.data);
    }
}

impl<'a> From<Crypto<s2n_codec::DecoderBuffer<'a>>> for CryptoRef<'a> {
    #[inline]
    fn from(s: Crypto<s2n_codec::DecoderBuffer<'a>>) -> Self {
        s.map_data(|data| data.into_less_safe_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use s2n_codec::{DecoderBuffer, EncoderBuffer};

    #[test]
    fn round_trip_test() {
        let data: &[u8] = &[1, 2, 3, 4, 5];
        let frame = Crypto {
            offset: VarInt::from_u16(300),
            data,
        };

        let mut buffer = [0u8; 64];
        let len = {
            let mut encoder = EncoderBuffer::new(&mut buffer);
            encoder.encode(&frame);
            encoder.len()
        };

        // type(1) + offset(2) + length(1) + data(5)
        assert_eq!(len, 9);

        let decoder = DecoderBuffer::new(&buffer[..len]);
        let (tag, decoder) = decoder.decode::<Tag>().unwrap();
        assert_eq!(tag, 0x06);
        let (decoded, remaining) = decoder
            .decode_parameterized::<Crypto<DecoderBuffer>>(tag)
            .unwrap();
        assert!(remaining.is_empty());
        assert_eq!(decoded.offset, frame.offset);
        assert_eq!(decoded.data.into_less_safe_slice(), data);
    }

    #[test]
    fn try_fit_test() {
        let data: &[u8] = &[0u8; 1000];
        let frame = Crypto {
            offset: VarInt::ZERO,
            data,
        };

        // everything fits
        assert_eq!(frame.try_fit(2000), Ok(1000));

        // header overhead is accounted for: tag(1) + offset(1) + length(2)
        assert_eq!(frame.try_fit(1004), Ok(1000));

        // payload is clamped to the capacity
        let clamped = frame.try_fit(500).unwrap();
        assert!(clamped < 500);
        let frame = Crypto {
            offset: VarInt::ZERO,
            data: &data[..clamped],
        };
        assert_eq!(frame.encoding_size(), 500);

        // a frame with no room for payload doesn't fit
        assert!(frame.try_fit(1).is_err());
    }
}
