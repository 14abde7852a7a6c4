//! Segmented byte buffer for streaming decoders.
//!
//! Accumulates `Bytes` segments as they arrive off the wire and lets a
//! decoder consume exact amounts across segment boundaries. A payload
//! that lies within one segment is extracted without copying (refcount
//! bump on the underlying buffer); only payloads spanning segments are
//! assembled into a fresh contiguous buffer.

use std::collections::VecDeque;

use bytes::{Buf, Bytes, BytesMut};

/// FIFO of wire segments with exact-length extraction.
#[derive(Debug, Default)]
pub struct SegmentedBuffer {
    segs: VecDeque<Bytes>,
    len: usize,
}

impl SegmentedBuffer {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            segs: VecDeque::new(),
            len: 0,
        }
    }

    /// Total buffered bytes.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append a segment read from the wire.
    #[inline]
    pub fn push(&mut self, bytes: Bytes) {
        if bytes.is_empty() {
            return;
        }
        self.len += bytes.len();
        self.segs.push_back(bytes);
    }

    /// Consume a single byte, if one is buffered.
    pub fn take_u8(&mut self) -> Option<u8> {
        let front = self.segs.front_mut()?;
        let byte = front[0];
        front.advance(1);
        if front.is_empty() {
            self.segs.pop_front();
        }
        self.len -= 1;
        Some(byte)
    }

    /// Consume exactly `N` bytes into a fixed array, if buffered.
    pub fn take_array<const N: usize>(&mut self) -> Option<[u8; N]> {
        if self.len < N {
            return None;
        }
        let mut out = [0u8; N];
        let mut filled = 0;
        while filled < N {
            let mut seg = self
                .segs
                .pop_front()
                .unwrap_or_else(|| unreachable!("len covers {N} bytes"));
            let take = (N - filled).min(seg.len());
            out[filled..filled + take].copy_from_slice(&seg[..take]);
            filled += take;
            self.len -= take;
            if take < seg.len() {
                seg.advance(take);
                self.segs.push_front(seg);
            }
        }
        Some(out)
    }

    /// Consume exactly `n` bytes, zero-copy when they lie within the
    /// front segment.
    pub fn take_bytes(&mut self, n: usize) -> Option<Bytes> {
        if n == 0 {
            return Some(Bytes::new());
        }
        if n > self.len {
            return None;
        }

        let front = self.segs.front_mut()?;
        if front.len() >= n {
            self.len -= n;
            let out = front.split_to(n);
            if front.is_empty() {
                self.segs.pop_front();
            }
            return Some(out);
        }

        // Spans segments: assemble a contiguous copy.
        let mut out = BytesMut::with_capacity(n);
        let mut remaining = n;
        while remaining > 0 {
            let mut seg = self
                .segs
                .pop_front()
                .unwrap_or_else(|| unreachable!("len covers {n} bytes"));
            let take = remaining.min(seg.len());
            out.extend_from_slice(&seg[..take]);
            remaining -= take;
            self.len -= take;
            if take < seg.len() {
                seg.advance(take);
                self.segs.push_front(seg);
            }
        }
        Some(out.freeze())
    }
}
