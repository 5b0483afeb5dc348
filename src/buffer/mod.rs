//! Match buffer for process output

mod ansi;

pub use ansi::strip_ansi;

use bytes::{Bytes, BytesMut};

/// When the window overflows, the oldest `1 / DISCARD_RATIO` of it is dropped.
const DISCARD_RATIO: usize = 3;

/// Holds output that has not been consumed by a match yet.
///
/// Matched data is split off on every match, so offsets reported by matchers
/// are always relative to the start of the pending window.
pub struct BufferManager {
    pending: BytesMut,
    max_size: usize,
    strip_ansi: bool,
    discarded: usize,
}

impl BufferManager {
    /// Create a new buffer manager
    pub fn new(max_size: usize, strip_ansi: bool) -> Self {
        Self {
            pending: BytesMut::with_capacity(max_size.min(64 * 1024)),
            max_size: max_size.max(DISCARD_RATIO),
            strip_ansi,
            discarded: 0,
        }
    }

    /// Append freshly read data, returning the bytes actually stored
    /// (after ANSI stripping, if enabled).
    pub fn append(&mut self, data: &[u8]) -> Bytes {
        let data = if self.strip_ansi {
            Bytes::from(strip_ansi(data))
        } else {
            Bytes::copy_from_slice(data)
        };

        self.pending.extend_from_slice(&data);
        if self.pending.len() > self.max_size {
            self.compact();
        }
        data
    }

    /// The unmatched window.
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    /// Unmatched window as text (lossy).
    pub fn pending_text(&self) -> String {
        String::from_utf8_lossy(&self.pending).into_owned()
    }

    /// Consume the window up to `end`, returning the consumed bytes.
    pub fn consume(&mut self, end: usize) -> Bytes {
        let end = end.min(self.pending.len());
        self.pending.split_to(end).freeze()
    }

    /// Drop everything pending, returning it.
    pub fn take_all(&mut self) -> Bytes {
        self.pending.split().freeze()
    }

    /// Current window length
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Total bytes dropped by compaction so far.
    pub fn discarded(&self) -> usize {
        self.discarded
    }

    fn compact(&mut self) {
        let overflow = self.pending.len() - self.max_size;
        let drop = overflow.max(self.max_size / DISCARD_RATIO);
        let drop = drop.min(self.pending.len());
        let _ = self.pending.split_to(drop);
        self.discarded += drop;
    }
}
