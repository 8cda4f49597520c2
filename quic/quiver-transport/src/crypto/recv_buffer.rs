// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Reassembly buffer for inbound CRYPTO frames.
//!
//! Frames may arrive duplicated, overlapping, and out of order; TLS
//! only ever consumes the contiguous prefix. Delivered bytes are
//! released immediately, so the buffer holds at most the
//! flow-control window.

use quiver_core::interval_set::IntervalSet;

/// A write would exceed the crypto flow-control limit
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlowControlExceeded;

pub struct RecvBuffer {
    /// Bytes covering `[base, base + data.len())` of the stream
    data: Vec<u8>,
    /// Absolute offset of `data[0]`; equals the total bytes drained
    base: u64,
    /// Absolute ranges received so far, at or above `base`
    written: IntervalSet,
    /// Absolute stream offset that writes must stay below
    limit: u64,
}

impl RecvBuffer {
    pub fn new(initial_capacity: usize, limit: u64) -> Self {
        Self {
            data: Vec::with_capacity(initial_capacity),
            base: 0,
            written: IntervalSet::new(),
            limit,
        }
    }

    /// Total bytes drained to the consumer
    #[inline]
    pub fn consumed(&self) -> u64 {
        self.base
    }

    /// Writes `data` at absolute stream offset `offset`
    ///
    /// Duplicate and overlapping writes are accepted. Returns whether
    /// contiguous data is now available to read.
    pub fn write(&mut self, offset: u64, data: &[u8]) -> Result<bool, FlowControlExceeded> {
        let end = offset + data.len() as u64;

        if end > self.limit {
            return Err(FlowControlExceeded);
        }

        if data.is_empty() || end <= self.base {
            // stale retransmission, already delivered
            return Ok(self.contiguous_len() > 0);
        }

        // clip the already-delivered prefix
        let (offset, data) = if offset < self.base {
            let skip = (self.base - offset) as usize;
            (self.base, &data[skip..])
        } else {
            (offset, data)
        };

        let relative = (offset - self.base) as usize;
        if self.data.len() < relative + data.len() {
            self.data.resize(relative + data.len(), 0);
        }
        self.data[relative..relative + data.len()].copy_from_slice(data);

        self.written
            .insert(offset, offset + data.len() as u64)
            .expect("unlimited set");

        Ok(self.contiguous_len() > 0)
    }

    #[inline]
    fn contiguous_len(&self) -> u64 {
        match self.written.get(0) {
            Some(front) if front.start == self.base => front.end - self.base,
            _ => 0,
        }
    }

    /// The contiguous readable prefix starting at [`consumed`]
    ///
    /// [`consumed`]: Self::consumed
    #[inline]
    pub fn contiguous(&self) -> &[u8] {
        &self.data[..self.contiguous_len() as usize]
    }

    /// Releases `len` bytes previously returned by [`contiguous`]
    ///
    /// [`contiguous`]: Self::contiguous
    pub fn drain(&mut self, len: usize) {
        debug_assert!(len as u64 <= self.contiguous_len());
        self.data.drain(..len);
        self.base += len as u64;
        self.written.set_min(self.base);
    }

    /// Returns true if any received byte has not been drained yet,
    /// contiguous or not
    #[inline]
    pub fn has_unread_data(&self) -> bool {
        !self.written.is_empty()
    }

    /// Drops all buffered data
    pub fn clear(&mut self) {
        self.data.clear();
        self.written.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer() -> RecvBuffer {
        RecvBuffer::new(64, u16::MAX as u64)
    }

    #[test]
    fn in_order_write_read() {
        let mut buffer = buffer();
        assert!(buffer.write(0, b"hello").unwrap());
        assert_eq!(buffer.contiguous(), b"hello");

        buffer.drain(5);
        assert_eq!(buffer.consumed(), 5);
        assert!(!buffer.has_unread_data());
        assert_eq!(buffer.contiguous(), b"");
    }

    #[test]
    fn out_of_order_write() {
        let mut buffer = buffer();
        assert!(!buffer.write(5, b"world").unwrap());
        assert!(buffer.has_unread_data());
        assert_eq!(buffer.contiguous(), b"");

        assert!(buffer.write(0, b"hello").unwrap());
        assert_eq!(buffer.contiguous(), b"helloworld");
    }

    #[test]
    fn overlapping_and_stale_writes() {
        let mut buffer = buffer();
        buffer.write(0, b"abcdef").unwrap();
        buffer.drain(4);

        // fully delivered: ignored, the retained tail is unaffected
        buffer.write(0, b"abcd").unwrap();
        assert_eq!(buffer.contiguous(), b"ef");

        // straddles the drained prefix: only the tail lands
        buffer.write(2, b"cdEF").unwrap();
        assert_eq!(buffer.contiguous(), b"EF");
    }

    #[test]
    fn flow_control_limit() {
        let mut buffer = RecvBuffer::new(16, 10);
        assert_eq!(buffer.write(8, b"abc"), Err(FlowControlExceeded));
        assert!(buffer.write(8, b"ab").is_ok());
    }
}
