use parking_lot::RwLock;
use tracing::warn;

use super::ring::RingBuffer;
use crate::models::{SourceId, VitalRecord};

/// A vital record together with its cache-assigned sequence number.
///
/// Sequence numbers start at 1 and grow by one per accepted append, so
/// consumers can resume reading with [`VitalsCache::get_after_sequence`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CachedVital {
    pub sequence: u64,
    pub record: VitalRecord,
}

/// Ordering and persistence position of one source
#[derive(Debug, Clone, Copy)]
struct SourceCursor {
    source: SourceId,
    last_timestamp_ms: i64,
    /// Newest timestamp known to be durably stored
    persisted_ms: Option<i64>,
}

impl SourceCursor {
    /// Advance the watermark, never past the newest accepted record
    fn advance(&mut self, upto_timestamp_ms: i64) {
        let target = upto_timestamp_ms.min(self.last_timestamp_ms);
        if self.persisted_ms.map_or(true, |current| target > current) {
            self.persisted_ms = Some(target);
        }
    }

    fn is_persisted(&self, timestamp_ms: i64) -> bool {
        self.persisted_ms.is_some_and(|watermark| timestamp_ms <= watermark)
    }
}

#[derive(Debug)]
struct Inner {
    ring: RingBuffer<CachedVital>,
    /// Fixed capacity; sources are never removed
    source_cursors: Vec<SourceCursor>,
    max_sources: usize,
    next_sequence: u64,
    evictions: u64,
}

impl Inner {
    fn cursor(&self, source: SourceId) -> Option<&SourceCursor> {
        self.source_cursors.iter().find(|cursor| cursor.source == source)
    }
}

/// Bounded, time-ordered store of vital-sign records.
///
/// One writer (the real-time thread) appends; any number of readers take
/// copies under a shared lock. Appends never allocate and never fail for
/// lack of room: the oldest record is evicted instead, whether or not it
/// was persisted.
#[derive(Debug)]
pub struct VitalsCache {
    inner: RwLock<Inner>,
}

impl VitalsCache {
    pub fn new(capacity: usize, max_sources: usize) -> Self {
        let max_sources = max_sources.max(1);
        Self {
            inner: RwLock::new(Inner {
                ring: RingBuffer::with_capacity(capacity),
                source_cursors: Vec::with_capacity(max_sources),
                max_sources,
                next_sequence: 1,
                evictions: 0,
            }),
        }
    }

    /// Append a record. Returns `false` only for malformed input: invalid
    /// values, a timestamp older than the source's previous record, or a new
    /// source when the source table is exhausted.
    pub fn append(&self, record: VitalRecord) -> bool {
        if !record.is_well_formed() {
            warn!(
                source_id = record.source_id().0,
                timestamp_ms = record.timestamp_ms(),
                "Rejected malformed vital record"
            );
            return false;
        }

        let mut inner = self.inner.write();
        let source = record.source_id();
        let timestamp_ms = record.timestamp_ms();

        match inner.source_cursors.iter().position(|cursor| cursor.source == source) {
            Some(index) => {
                let last = inner.source_cursors[index].last_timestamp_ms;
                if timestamp_ms < last {
                    drop(inner);
                    warn!(
                        source_id = source.0,
                        timestamp_ms,
                        last_timestamp_ms = last,
                        "Rejected out-of-order vital record"
                    );
                    return false;
                }
                inner.source_cursors[index].last_timestamp_ms = timestamp_ms;
            }
            None => {
                if inner.source_cursors.len() >= inner.max_sources {
                    let max_sources = inner.max_sources;
                    drop(inner);
                    warn!(
                        source_id = source.0,
                        max_sources, "Rejected vital record from untracked source"
                    );
                    return false;
                }
                inner.source_cursors.push(SourceCursor {
                    source,
                    last_timestamp_ms: timestamp_ms,
                    persisted_ms: None,
                });
            }
        }

        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        if inner.ring.push(CachedVital { sequence, record }).is_some() {
            inner.evictions += 1;
        }
        true
    }

    /// Records with `start_ms <= timestamp <= end_ms`, in cache order
    pub fn get_range(&self, start_ms: i64, end_ms: i64) -> Vec<VitalRecord> {
        let inner = self.inner.read();
        inner
            .ring
            .iter()
            .filter(|cached| {
                let ts = cached.record.timestamp_ms();
                ts >= start_ms && ts <= end_ms
            })
            .map(|cached| cached.record)
            .collect()
    }

    /// Records newer than their source's persistence watermark
    pub fn get_unpersisted(&self) -> Vec<VitalRecord> {
        let inner = self.inner.read();
        inner
            .ring
            .iter()
            .filter(|cached| {
                let record = &cached.record;
                inner
                    .cursor(record.source_id())
                    .map_or(true, |cursor| !cursor.is_persisted(record.timestamp_ms()))
            })
            .map(|cached| cached.record)
            .collect()
    }

    /// Advance the persistence watermark of every known source.
    ///
    /// Watermarks only move forward and never past a source's newest cached
    /// record; repeated calls with the same value change nothing.
    pub fn mark_persisted(&self, upto_timestamp_ms: i64) {
        let mut inner = self.inner.write();
        for cursor in inner.source_cursors.iter_mut() {
            cursor.advance(upto_timestamp_ms);
        }
    }

    /// Advance the persistence watermark of one source. Sources keep
    /// independent clocks, so each is tracked on its own.
    pub fn mark_source_persisted(&self, source: SourceId, upto_timestamp_ms: i64) {
        let mut inner = self.inner.write();
        if let Some(cursor) = inner
            .source_cursors
            .iter_mut()
            .find(|cursor| cursor.source == source)
        {
            cursor.advance(upto_timestamp_ms);
        }
    }

    /// Persistence watermark of one source
    pub fn source_watermark(&self, source: SourceId) -> Option<i64> {
        self.inner.read().cursor(source).and_then(|cursor| cursor.persisted_ms)
    }

    /// Lowest watermark across sources; `None` while any known source has
    /// nothing persisted
    pub fn watermark(&self) -> Option<i64> {
        let inner = self.inner.read();
        inner
            .source_cursors
            .iter()
            .map(|cursor| cursor.persisted_ms)
            .try_fold(None, |lowest: Option<i64>, persisted| {
                persisted.map(|watermark| Some(lowest.map_or(watermark, |low| low.min(watermark))))
            })
            .flatten()
    }

    pub fn len(&self) -> usize {
        self.inner.read().ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().ring.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.read().ring.capacity()
    }

    pub fn eviction_count(&self) -> u64 {
        self.inner.read().evictions
    }

    /// Most recently appended record
    pub fn latest(&self) -> Option<VitalRecord> {
        self.inner.read().ring.newest().map(|cached| cached.record)
    }

    /// Sequence number of the most recently appended record, 0 when empty
    pub fn last_sequence(&self) -> u64 {
        self.inner.read().next_sequence - 1
    }

    /// Up to `limit` records appended after `sequence`, oldest first.
    ///
    /// If the cursor has fallen behind eviction, reading resumes at the
    /// oldest surviving record.
    pub fn get_after_sequence(&self, sequence: u64, limit: usize) -> Vec<CachedVital> {
        let inner = self.inner.read();
        let start = Self::start_index(&inner, sequence);
        inner.ring.iter_from(start).take(limit).copied().collect()
    }

    fn start_index(inner: &Inner, sequence: u64) -> usize {
        let oldest = inner.next_sequence - inner.ring.len() as u64;
        // `sequence` is exclusive
        (sequence + 1).saturating_sub(oldest) as usize
    }
}
