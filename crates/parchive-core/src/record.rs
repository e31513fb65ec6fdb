//! Parameter Values and Batches
//!
//! A [`ParameterBatch`] is what the upstream processor delivers: one timestamp
//! and the values of every parameter that was updated at that instant.
//!
//! ## Canonical Form
//! Batches are keyed by their *set* of parameter ids, so the constructor sorts
//! entries by id. When an id appears twice, the last value wins. Two batches
//! with the same ids therefore always expose the same `parameter_ids()` slice
//! and map to the same parameter group.
//!
//! ## Example
//! ```ignore
//! let batch = ParameterBatch::new(
//!     1_700_000_000_000,
//!     [(7, Value::Float64(21.5)), (3, Value::Bool(true))],
//! );
//! assert_eq!(batch.parameter_ids(), &[3, 7]);
//! ```

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{ParameterId, Timestamp};

/// Engineering value of a parameter sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Float64(f64),
    Float32(f32),
    Int64(i64),
    UInt64(u64),
    Bool(bool),
    String(String),
    Binary(Bytes),
}

impl Value {
    /// Tag stored in front of each value by the segment codec
    pub fn type_tag(&self) -> u8 {
        match self {
            Value::Float64(_) => 0,
            Value::Float32(_) => 1,
            Value::Int64(_) => 2,
            Value::UInt64(_) => 3,
            Value::Bool(_) => 4,
            Value::String(_) => 5,
            Value::Binary(_) => 6,
        }
    }
}

/// All parameter values that arrived together with one timestamp
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterBatch {
    timestamp: Timestamp,
    parameter_ids: Vec<ParameterId>,
    values: Vec<Value>,
}

impl ParameterBatch {
    pub fn new(
        timestamp: Timestamp,
        entries: impl IntoIterator<Item = (ParameterId, Value)>,
    ) -> Self {
        let sorted: BTreeMap<ParameterId, Value> = entries.into_iter().collect();
        let (parameter_ids, values) = sorted.into_iter().unzip();

        Self {
            timestamp,
            parameter_ids,
            values,
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Sorted, duplicate-free parameter ids
    pub fn parameter_ids(&self) -> &[ParameterId] {
        &self.parameter_ids
    }

    /// Values aligned with `parameter_ids()`
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.parameter_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameter_ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_is_sorted_by_parameter_id() {
        let batch = ParameterBatch::new(
            10,
            [
                (9, Value::Int64(9)),
                (2, Value::Int64(2)),
                (5, Value::Int64(5)),
            ],
        );

        assert_eq!(batch.parameter_ids(), &[2, 5, 9]);
        assert_eq!(
            batch.values(),
            &[Value::Int64(2), Value::Int64(5), Value::Int64(9)]
        );
        assert_eq!(batch.timestamp(), 10);
    }

    #[test]
    fn test_duplicate_parameter_keeps_last_value() {
        let batch = ParameterBatch::new(
            0,
            [(1, Value::Bool(false)), (1, Value::Bool(true))],
        );

        assert_eq!(batch.len(), 1);
        assert_eq!(batch.values(), &[Value::Bool(true)]);
    }

    #[test]
    fn test_empty_batch() {
        let batch = ParameterBatch::new(0, std::iter::empty());
        assert!(batch.is_empty());
    }

    #[test]
    fn test_type_tags_are_distinct() {
        let values = [
            Value::Float64(0.0),
            Value::Float32(0.0),
            Value::Int64(0),
            Value::UInt64(0),
            Value::Bool(false),
            Value::String(String::new()),
            Value::Binary(Bytes::new()),
        ];
        let mut tags: Vec<u8> = values.iter().map(Value::type_tag).collect();
        tags.dedup();
        assert_eq!(tags.len(), values.len());
    }
}
