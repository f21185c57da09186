use std::fmt::{Debug, Formatter};
use std::io;
use std::ops::Range;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use parking_lot::Mutex;

use crate::ReadAt;

/// Counters describing the reads issued against an [`InstrumentedReadAt`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadStats {
    /// Number of positional reads issued.
    pub requests: u64,
    /// Total number of bytes requested.
    pub bytes: u64,
    /// Every requested range, in issue order.
    pub ranges: Vec<Range<u64>>,
}

impl ReadStats {
    /// Whether any read touched a byte inside `range`.
    pub fn touched(&self, range: &Range<u64>) -> bool {
        self.ranges
            .iter()
            .any(|r| r.start < range.end && range.start < r.end)
    }
}

/// A [`ReadAt`] adapter that records every positional read it forwards.
pub struct InstrumentedReadAt<R> {
    read: R,
    stats: Arc<Mutex<ReadStats>>,
}

impl<R: ReadAt> InstrumentedReadAt<R> {
    pub fn new(read: R) -> Self {
        Self {
            read,
            stats: Arc::default(),
        }
    }

    /// A snapshot of the reads recorded so far.
    pub fn stats(&self) -> ReadStats {
        self.stats.lock().clone()
    }

    pub fn reset(&self) {
        *self.stats.lock() = ReadStats::default();
    }
}

impl<R> Debug for InstrumentedReadAt<R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstrumentedReadAt")
            .field("stats", &*self.stats.lock())
            .finish_non_exhaustive()
    }
}

impl<R: ReadAt> ReadAt for InstrumentedReadAt<R> {
    fn read_byte_range(&self, range: Range<u64>) -> BoxFuture<'static, io::Result<Bytes>> {
        {
            let mut stats = self.stats.lock();
            stats.requests += 1;
            stats.bytes += range.end.saturating_sub(range.start);
            stats.ranges.push(range.clone());
        }
        self.read.read_byte_range(range)
    }

    fn size(&self) -> BoxFuture<'static, io::Result<u64>> {
        self.read.size()
    }
}
