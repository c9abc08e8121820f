// HLS Segment Buffer: bounded, index-keyed holding area between the workers and the writer.

use std::collections::{BTreeMap, BTreeSet};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;

/// A downloaded segment waiting to be appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferedSegment {
    /// 1-based playlist position
    pub index: u64,
    pub data: Bytes,
}

impl BufferedSegment {
    pub fn new(index: u64, data: Bytes) -> Self {
        Self { index, data }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Why [`SegmentBuffer::add`] refused a segment. The segment is handed back to the caller.
#[derive(Debug, PartialEq, Eq)]
pub enum BufferRejection {
    /// At capacity; wait for the writer to free a slot and retry.
    Full(BufferedSegment),
    /// An unconsumed entry already holds this index.
    Duplicate(BufferedSegment),
    /// The writer has stopped consuming; the segment will never be written.
    Closed(BufferedSegment),
}

impl BufferRejection {
    pub fn into_segment(self) -> BufferedSegment {
        match self {
            Self::Full(s) | Self::Duplicate(s) | Self::Closed(s) => s,
        }
    }
}

#[derive(Debug)]
struct State {
    segments: BTreeMap<u64, BufferedSegment>,
    failed: BTreeSet<u64>,
    bytes: usize,
    /// Lowest index the writer has not consumed yet
    next_expected: u64,
    closed: bool,
}

/// Thread-safe for any number of producers and a single consumer.
///
/// `size() <= capacity()` holds at all times. Producers should only fetch an index once
/// [`admits`](Self::admits) is true: every admitted index then fits without a `Full`
/// rejection, so the segment the writer is waiting for can always be inserted.
#[derive(Debug)]
pub struct SegmentBuffer {
    capacity: usize,
    state: Mutex<State>,
    segment_ready: Notify,
    space_freed: Notify,
}

impl SegmentBuffer {
    pub fn new(capacity: usize) -> Self {
        Self::starting_at(capacity, 1)
    }

    /// A buffer whose writer will first ask for `first_index`.
    pub fn starting_at(capacity: usize, first_index: u64) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(State {
                segments: BTreeMap::new(),
                failed: BTreeSet::new(),
                bytes: 0,
                next_expected: first_index,
                closed: false,
            }),
            segment_ready: Notify::new(),
            space_freed: Notify::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Store a segment without blocking.
    pub fn add(&self, segment: BufferedSegment) -> Result<(), BufferRejection> {
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(BufferRejection::Closed(segment));
            }
            if state.segments.contains_key(&segment.index) {
                return Err(BufferRejection::Duplicate(segment));
            }
            if state.segments.len() >= self.capacity {
                return Err(BufferRejection::Full(segment));
            }
            state.bytes += segment.size();
            state.segments.insert(segment.index, segment);
        }
        self.segment_ready.notify_one();
        Ok(())
    }

    /// Remove and return the segment at `index`, if present.
    pub fn take(&self, index: u64) -> Option<BufferedSegment> {
        let segment = {
            let mut state = self.state.lock();
            let segment = state.segments.remove(&index)?;
            state.bytes -= segment.size();
            state.next_expected = state.next_expected.max(index + 1);
            segment
        };
        self.space_freed.notify_waiters();
        Some(segment)
    }

    /// Whether a producer may start fetching `index` now.
    ///
    /// True while `index` lies within `capacity` slots of the writer's position, or once the
    /// buffer is closed (the fetch is then only attempted for reporting).
    pub fn admits(&self, index: u64) -> bool {
        let state = self.state.lock();
        state.closed || index < state.next_expected.saturating_add(self.capacity as u64)
    }

    pub fn is_full(&self) -> bool {
        self.state.lock().segments.len() >= self.capacity
    }

    pub fn len(&self) -> usize {
        self.state.lock().segments.len()
    }

    /// Alias of [`len`](Self::len).
    pub fn size(&self) -> usize {
        self.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().segments.is_empty()
    }

    /// Total bytes currently buffered.
    pub fn memory_usage(&self) -> usize {
        self.state.lock().bytes
    }

    /// Record that `index` will never arrive.
    pub fn mark_failed(&self, index: u64) {
        self.state.lock().failed.insert(index);
        self.segment_ready.notify_one();
    }

    pub fn is_failed(&self, index: u64) -> bool {
        self.state.lock().failed.contains(&index)
    }

    /// Failed indices in ascending order.
    pub fn failed(&self) -> Vec<u64> {
        self.state.lock().failed.iter().copied().collect()
    }

    /// Stop accepting segments and drop everything still buffered.
    pub fn close(&self) {
        {
            let mut state = self.state.lock();
            state.closed = true;
            state.segments.clear();
            state.bytes = 0;
        }
        self.space_freed.notify_waiters();
        self.segment_ready.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Signalled after every successful `add` and `mark_failed`.
    pub fn segment_ready(&self) -> &Notify {
        &self.segment_ready
    }

    /// Signalled after every `take` and on `close`.
    pub fn space_freed(&self) -> &Notify {
        &self.space_freed
    }
}
