//! Archive Time Intervals
//!
//! The archive partitions time into fixed-width intervals and never lets a
//! segment span two of them. The in-memory queues must use exactly the same
//! boundaries as the archive, so the scheme is owned by the archive and handed
//! to the filler through `ParameterArchive::intervals()`.
//!
//! The default is a power-of-two width of 2^23 ms (about 2h20m): the interval
//! of `t` is `t` with its low 23 bits cleared.

use serde::{Deserialize, Serialize};

use crate::{IntervalId, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IntervalScheme {
    /// Intervals of `2^bits` milliseconds, computed by masking
    PowerOfTwo { bits: u8 },
    /// Intervals of `width_ms` milliseconds aligned on the epoch
    Fixed { width_ms: i64 },
}

impl Default for IntervalScheme {
    fn default() -> Self {
        IntervalScheme::PowerOfTwo { bits: 23 }
    }
}

impl IntervalScheme {
    /// Width of one interval in milliseconds
    pub fn width_ms(&self) -> i64 {
        match *self {
            IntervalScheme::PowerOfTwo { bits } => 1i64 << bits.min(62),
            IntervalScheme::Fixed { width_ms } => width_ms.max(1),
        }
    }

    /// Interval containing `t`
    ///
    /// Monotonic in `t`; negative timestamps round toward negative infinity.
    pub fn interval_of(&self, t: Timestamp) -> IntervalId {
        match *self {
            IntervalScheme::PowerOfTwo { .. } => t & !(self.width_ms() - 1),
            IntervalScheme::Fixed { .. } => {
                let width = self.width_ms();
                t.div_euclid(width) * width
            }
        }
    }

    /// First millisecond after the interval containing `t`
    pub fn interval_end(&self, t: Timestamp) -> Timestamp {
        self.interval_of(t).saturating_add(self.width_ms())
    }
}
