//! Parameter Group Segments
//!
//! A segment is the in-memory unit the realtime filler accumulates and later
//! hands to the archive. It belongs to exactly one parameter group and one
//! archive interval, and stores one time column plus one value column per
//! parameter of the group.
//!
//! ## Segment Lifecycle
//! 1. Opened by a segment queue with its first sample
//! 2. Samples merged in (possibly slightly out of order) while it is live
//! 3. Evicted to the write-back dispatcher; no more appends from here on
//! 4. Dropped once the archive write completed and no reader holds it
//!
//! ## Sharing
//! Segments live behind `Arc` because the queue slot, the dispatcher task and
//! the encoder all hold them at the same time. Columns sit behind a `RwLock`:
//! the queue writes while it holds its own lock, everybody else only reads.
//!
//! Readers never get references into the columns. [`ParameterValueSegment`]
//! is a copy taken at call time, so clearing a queue slot or inserting an
//! out-of-order sample never invalidates what a reader already has.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::{Error, GroupId, IntervalId, ParameterId, Result, Timestamp, Value};

#[derive(Debug)]
struct Columns {
    timestamps: Vec<Timestamp>,
    /// `values[column][row]`, one column per parameter id
    values: Vec<Vec<Value>>,
}

/// Append-only, time-sorted samples of one parameter group in one interval
pub struct ParameterGroupSegment {
    group_id: GroupId,
    interval: IntervalId,
    parameter_ids: Arc<[ParameterId]>,
    opened_at: Timestamp,
    columns: RwLock<Columns>,
}

impl ParameterGroupSegment {
    /// Open a segment holding a single sample
    pub fn open(
        group_id: GroupId,
        parameter_ids: Arc<[ParameterId]>,
        interval: IntervalId,
        timestamp: Timestamp,
        values: &[Value],
    ) -> Result<Self> {
        check_width(&parameter_ids, values)?;

        let columns = Columns {
            timestamps: vec![timestamp],
            values: values.iter().map(|v| vec![v.clone()]).collect(),
        };

        Ok(Self {
            group_id,
            interval,
            parameter_ids,
            opened_at: timestamp,
            columns: RwLock::new(columns),
        })
    }

    /// Insert a sample at its sorted position
    ///
    /// Samples with an equal timestamp keep arrival order. The segment does not
    /// check its interval; that is the queue's job.
    pub fn add_record(&self, timestamp: Timestamp, values: &[Value]) -> Result<()> {
        check_width(&self.parameter_ids, values)?;

        let mut columns = self.columns.write();
        let pos = columns.timestamps.partition_point(|&t| t <= timestamp);

        columns.timestamps.insert(pos, timestamp);
        for (column, value) in columns.values.iter_mut().zip(values) {
            column.insert(pos, value.clone());
        }

        Ok(())
    }

    pub fn group_id(&self) -> GroupId {
        self.group_id
    }

    pub fn interval(&self) -> IntervalId {
        self.interval
    }

    pub fn parameter_ids(&self) -> &Arc<[ParameterId]> {
        &self.parameter_ids
    }

    /// Timestamp of the first sample this segment was opened with
    pub fn opened_at(&self) -> Timestamp {
        self.opened_at
    }

    /// Smallest timestamp in the segment
    pub fn start(&self) -> Timestamp {
        self.columns.read().timestamps[0]
    }

    /// Largest timestamp in the segment
    pub fn end(&self) -> Timestamp {
        let columns = self.columns.read();
        columns.timestamps[columns.timestamps.len() - 1]
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.columns.read().timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.read().timestamps.is_empty()
    }

    /// Copy of the time column
    pub fn timestamps(&self) -> Vec<Timestamp> {
        self.columns.read().timestamps.clone()
    }

    /// Copy of the samples of one parameter, or `None` if it is not in the group
    pub fn parameter_value_segment(&self, parameter_id: ParameterId) -> Option<ParameterValueSegment> {
        let column = self.parameter_ids.iter().position(|&id| id == parameter_id)?;
        let columns = self.columns.read();

        Some(ParameterValueSegment {
            parameter_id,
            group_id: self.group_id,
            interval: self.interval,
            timestamps: columns.timestamps.clone(),
            values: columns.values[column].clone(),
        })
    }

    /// Copy of every column, used by the archive encoder
    pub fn snapshot(&self) -> Vec<ParameterValueSegment> {
        let columns = self.columns.read();

        self.parameter_ids
            .iter()
            .zip(&columns.values)
            .map(|(&parameter_id, values)| ParameterValueSegment {
                parameter_id,
                group_id: self.group_id,
                interval: self.interval,
                timestamps: columns.timestamps.clone(),
                values: values.clone(),
            })
            .collect()
    }
}

impl fmt::Debug for ParameterGroupSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParameterGroupSegment")
            .field("group_id", &self.group_id)
            .field("interval", &self.interval)
            .field("start", &self.start())
            .field("end", &self.end())
            .field("len", &self.len())
            .finish()
    }
}

impl fmt::Display for ParameterGroupSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "group {} interval {} [{}, {}] ({} samples)",
            self.group_id,
            self.interval,
            self.start(),
            self.end(),
            self.len()
        )
    }
}

fn check_width(parameter_ids: &[ParameterId], values: &[Value]) -> Result<()> {
    if parameter_ids.len() != values.len() {
        return Err(Error::ColumnMismatch {
            expected: parameter_ids.len(),
            actual: values.len(),
        });
    }
    Ok(())
}

/// Samples of a single parameter taken from one segment
///
/// Values are always in ascending time order; use [`iter_descending`] to walk
/// them backwards. `(interval, segment_start)` identifies the segment, which is
/// what callers use to drop duplicates when they merge in-memory views with
/// data read back from the archive.
///
/// [`iter_descending`]: ParameterValueSegment::iter_descending
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterValueSegment {
    pub parameter_id: ParameterId,
    pub group_id: GroupId,
    pub interval: IntervalId,
    pub timestamps: Vec<Timestamp>,
    pub values: Vec<Value>,
}

impl ParameterValueSegment {
    pub fn segment_start(&self) -> Option<Timestamp> {
        self.timestamps.first().copied()
    }

    pub fn segment_end(&self) -> Option<Timestamp> {
        self.timestamps.last().copied()
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (Timestamp, &Value)> + '_ {
        self.timestamps.iter().copied().zip(self.values.iter())
    }

    pub fn iter_descending(&self) -> impl Iterator<Item = (Timestamp, &Value)> + '_ {
        self.iter().rev()
    }
}

/// Compression applied to the column blocks of an encoded segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u16)]
pub enum Compression {
    None = 0,
    Lz4 = 1,
}

impl TryFrom<u16> for Compression {
    type Error = crate::Error;

    fn try_from(value: u16) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Compression::None),
            1 => Ok(Compression::Lz4),
            _ => Err(crate::Error::InvalidCompression(value)),
        }
    }
}

/// Description of a segment stored in the archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentInfo {
    /// Object key the segment is stored under
    pub key: String,

    pub group_id: GroupId,

    pub interval: IntervalId,

    /// First timestamp in the segment
    pub start: Timestamp,

    /// Last timestamp in the segment
    pub end: Timestamp,

    pub sample_count: u32,

    pub parameter_count: u32,

    /// Encoded size in bytes
    pub size_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(ids: &[ParameterId]) -> Arc<[ParameterId]> {
        Arc::from(ids)
    }

    fn segment(t: Timestamp) -> ParameterGroupSegment {
        ParameterGroupSegment::open(
            1,
            ids(&[10, 20]),
            0,
            t,
            &[Value::Int64(t), Value::Bool(true)],
        )
        .unwrap()
    }

    #[test]
    fn test_open_sets_bounds() {
        let seg = segment(100);
        assert_eq!(seg.start(), 100);
        assert_eq!(seg.end(), 100);
        assert_eq!(seg.len(), 1);
        assert_eq!(seg.opened_at(), 100);
    }

    #[test]
    fn test_out_of_order_insert_keeps_sorted() {
        let seg = segment(100);
        for t in [105, 101, 99, 103] {
            seg.add_record(t, &[Value::Int64(t), Value::Bool(false)]).unwrap();
        }

        assert_eq!(seg.timestamps(), vec![99, 100, 101, 103, 105]);
        assert_eq!(seg.start(), 99);
        assert_eq!(seg.end(), 105);

        let view = seg.parameter_value_segment(10).unwrap();
        let values: Vec<i64> = view
            .values
            .iter()
            .map(|v| match v {
                Value::Int64(x) => *x,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(values, vec![99, 100, 101, 103, 105]);
    }

    #[test]
    fn test_equal_timestamps_keep_arrival_order() {
        let seg = segment(100);
        seg.add_record(100, &[Value::Int64(2), Value::Bool(false)]).unwrap();

        let view = seg.parameter_value_segment(10).unwrap();
        assert_eq!(view.values, vec![Value::Int64(100), Value::Int64(2)]);
    }

    #[test]
    fn test_column_mismatch_rejected() {
        let seg = segment(100);
        let err = seg.add_record(101, &[Value::Int64(1)]).unwrap_err();
        assert!(matches!(
            err,
            Error::ColumnMismatch {
                expected: 2,
                actual: 1
            }
        ));
        assert_eq!(seg.len(), 1);
    }

    #[test]
    fn test_unknown_parameter_has_no_view() {
        let seg = segment(100);
        assert!(seg.parameter_value_segment(99).is_none());
    }

    #[test]
    fn test_view_is_a_snapshot() {
        let seg = segment(100);
        let view = seg.parameter_value_segment(20).unwrap();
        seg.add_record(50, &[Value::Int64(50), Value::Bool(false)]).unwrap();

        assert_eq!(view.timestamps, vec![100]);
        assert_eq!(view.segment_start(), Some(100));
        assert_eq!(seg.start(), 50);
    }

    #[test]
    fn test_snapshot_has_one_view_per_parameter() {
        let seg = segment(7);
        let views = seg.snapshot();
        assert_eq!(views.len(), 2);
        assert_eq!(views[0].parameter_id, 10);
        assert_eq!(views[1].parameter_id, 20);
        assert_eq!(views[1].values, vec![Value::Bool(true)]);
    }

    #[test]
    fn test_descending_iteration() {
        let seg = segment(1);
        seg.add_record(3, &[Value::Int64(3), Value::Bool(true)]).unwrap();
        seg.add_record(2, &[Value::Int64(2), Value::Bool(true)]).unwrap();

        let view = seg.parameter_value_segment(10).unwrap();
        let times: Vec<Timestamp> = view.iter_descending().map(|(t, _)| t).collect();
        assert_eq!(times, vec![3, 2, 1]);
    }

    #[test]
    fn test_compression_from_u16() {
        assert_eq!(Compression::try_from(1).unwrap(), Compression::Lz4);
        assert!(matches!(
            Compression::try_from(9),
            Err(Error::InvalidCompression(9))
        ));
    }
}
