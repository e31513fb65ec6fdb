//! Segment Queue - Bounded Ring of Open Segments for One Parameter Group
//!
//! Each parameter group owns one `SegmentQueue`. The queue keeps at most
//! [`QUEUE_CAPACITY`] segments in a ring, ordered by interval, and decides when
//! a segment is complete enough to hand to the archive.
//!
//! ## Ring Layout
//!
//! ```text
//!            head                    head+len
//!             │                         │
//!   ┌────┬────▼───┬───────┬───────┬─────▼──┬────┐
//!   │ P  │  L0    │  L1   │  L2   │  free  │ P  │ ...
//!   └────┴────────┴───────┴───────┴────────┴────┘
//!    P  = evicted, write pending (still readable)
//!    Ln = live, accepting samples, intervals non-decreasing
//! ```
//!
//! Slots move through `empty → live → evicted-pending → empty`. Eviction only
//! advances `head`; the slot keeps its segment until the dispatcher reports the
//! write back through [`SegmentQueue::release`]. A new segment can only take
//! the slot after the tail, so a pending write blocks growth once the ring
//! wraps around to it. That is the queue's hard backpressure.
//!
//! ## Locking
//!
//! The queue itself is not synchronised. The filler keeps each queue behind
//! its own mutex and calls every method here with that lock held. Eviction
//! callbacks run under the lock too, so they must only hand the segment off
//! and return.

use std::sync::Arc;

use parchive_core::{
    GroupId, IntervalScheme, ParameterGroupSegment, ParameterId, ParameterValueSegment, Timestamp,
    Value,
};

use crate::error::{Error, Result};

/// Slots per queue (must be a power of two)
pub const QUEUE_CAPACITY: usize = 16;

const MASK: usize = QUEUE_CAPACITY - 1;

/// A segment leaving the live region, together with the slot it keeps
/// occupied until its write completes
#[derive(Debug, Clone)]
pub struct Eviction {
    pub slot: usize,
    pub segment: Arc<ParameterGroupSegment>,
}

/// Occupancy snapshot of a queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    /// Segments still accepting samples
    pub live: usize,
    /// Segments handed to the archive and not yet acknowledged
    pub pending: usize,
    pub capacity: usize,
}

pub struct SegmentQueue {
    group_id: GroupId,
    parameter_ids: Arc<[ParameterId]>,
    intervals: IntervalScheme,
    max_segment_size: usize,
    slots: [Option<Arc<ParameterGroupSegment>>; QUEUE_CAPACITY],
    head: usize,
    len: usize,
}

impl SegmentQueue {
    pub fn new(
        group_id: GroupId,
        parameter_ids: Arc<[ParameterId]>,
        intervals: IntervalScheme,
        max_segment_size: usize,
    ) -> Self {
        Self {
            group_id,
            parameter_ids,
            intervals,
            max_segment_size: max_segment_size.max(1),
            slots: Default::default(),
            head: 0,
            len: 0,
        }
    }

    pub fn group_id(&self) -> GroupId {
        self.group_id
    }

    pub fn parameter_ids(&self) -> &Arc<[ParameterId]> {
        &self.parameter_ids
    }

    /// Number of live segments
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Live segment `offset` positions after the head
    fn live(&self, offset: usize) -> Option<&Arc<ParameterGroupSegment>> {
        if offset >= self.len {
            return None;
        }
        self.slots[(self.head + offset) & MASK].as_ref()
    }

    /// Merge a sample into the matching live segment or open a new one.
    ///
    /// Returns `Ok(false)` without touching the queue when a new segment is
    /// needed and there is no room for it.
    pub fn add_record(&mut self, timestamp: Timestamp, values: &[Value]) -> Result<bool> {
        let interval = self.intervals.interval_of(timestamp);

        let mut pos = 0;
        while let Some(segment) = self.live(pos) {
            let segment_interval = segment.interval();
            if segment_interval > interval {
                break;
            }
            if segment_interval == interval
                && (timestamp <= segment.end() || segment.len() < self.max_segment_size)
            {
                segment.add_record(timestamp, values)?;
                return Ok(true);
            }
            pos += 1;
        }

        if self.len == QUEUE_CAPACITY {
            return Ok(false);
        }
        let tail = (self.head + self.len) & MASK;
        if self.slots[tail].is_some() {
            return Ok(false);
        }

        let segment = ParameterGroupSegment::open(
            self.group_id,
            Arc::clone(&self.parameter_ids),
            interval,
            timestamp,
            values,
        )?;

        // Shift [pos, len) one slot toward the tail, last entry first
        let mut i = self.len;
        while i > pos {
            let from = (self.head + i - 1) & MASK;
            let to = (self.head + i) & MASK;
            self.slots[to] = self.slots[from].take();
            i -= 1;
        }
        self.slots[(self.head + pos) & MASK] = Some(Arc::new(segment));
        self.len += 1;

        Ok(true)
    }

    /// Start timestamp of the oldest live segment
    pub fn start(&self) -> Result<Timestamp> {
        self.live(0).map(|s| s.start()).ok_or(Error::QueueEmpty)
    }

    /// Evict segments that can no longer receive samples.
    ///
    /// Walking from the head, a segment is evicted when its interval is older
    /// than the interval of `threshold`, or when it is full and ends before
    /// `threshold`. The walk stops at the first segment that qualifies for
    /// neither. Returns the number of evicted segments.
    pub fn send_to_archive<F>(&mut self, threshold: Timestamp, mut dispatch: F) -> usize
    where
        F: FnMut(Eviction),
    {
        let threshold_interval = self.intervals.interval_of(threshold);
        let mut evicted = 0;

        while let Some(segment) = self.live(0) {
            let older = segment.interval() < threshold_interval;
            let complete = segment.len() >= self.max_segment_size && segment.end() < threshold;
            if !(older || complete) {
                break;
            }
            if let Some(eviction) = self.evict_head() {
                dispatch(eviction);
                evicted += 1;
            }
        }

        evicted
    }

    /// Evict every live segment, oldest first
    pub fn flush<F>(&mut self, mut dispatch: F) -> usize
    where
        F: FnMut(Eviction),
    {
        let mut evicted = 0;
        while let Some(eviction) = self.evict_head() {
            dispatch(eviction);
            evicted += 1;
        }
        evicted
    }

    fn evict_head(&mut self) -> Option<Eviction> {
        let slot = self.head;
        let segment = Arc::clone(self.live(0)?);

        self.head = (self.head + 1) & MASK;
        self.len -= 1;

        Some(Eviction { slot, segment })
    }

    /// Clear an evicted slot once its write has completed.
    ///
    /// Only clears if the slot still holds exactly `segment`; returns whether
    /// it did.
    pub fn release(&mut self, slot: usize, segment: &Arc<ParameterGroupSegment>) -> bool {
        if slot >= QUEUE_CAPACITY || self.is_live_slot(slot) {
            return false;
        }
        match &self.slots[slot] {
            Some(current) if Arc::ptr_eq(current, segment) => {
                self.slots[slot] = None;
                true
            }
            _ => false,
        }
    }

    fn is_live_slot(&self, slot: usize) -> bool {
        (slot.wrapping_sub(self.head) & MASK) < self.len
    }

    /// Per-parameter views of every segment still held, live or pending.
    ///
    /// Ascending order starts at the oldest ring position (just after the
    /// newest live segment); descending is the exact reverse.
    pub fn parameter_value_segments(
        &self,
        parameter_id: ParameterId,
        ascending: bool,
    ) -> Vec<ParameterValueSegment> {
        let oldest = (self.head + self.len) & MASK;

        let mut views: Vec<ParameterValueSegment> = (0..QUEUE_CAPACITY)
            .filter_map(|i| self.slots[(oldest + i) & MASK].as_ref())
            .filter_map(|segment| segment.parameter_value_segment(parameter_id))
            .collect();

        if !ascending {
            views.reverse();
        }
        views
    }

    pub fn stats(&self) -> QueueStats {
        let occupied = self.slots.iter().filter(|s| s.is_some()).count();
        QueueStats {
            live: self.len,
            pending: occupied - self.len,
            capacity: QUEUE_CAPACITY,
        }
    }
}
