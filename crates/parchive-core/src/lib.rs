//! Core data types for parchive.
//!
//! - [`record`]: parameter values and the batches delivered by the upstream processor
//! - [`interval`]: the fixed-width time buckets shared with the archive
//! - [`segment`]: in-memory group segments and per-parameter value views
//! - [`varint`]: variable-length integer coding used by the segment codec

pub mod error;
pub mod interval;
pub mod record;
pub mod segment;
pub mod varint;

pub use error::{Error, Result};
pub use interval::IntervalScheme;
pub use record::{ParameterBatch, Value};
pub use segment::{Compression, ParameterGroupSegment, ParameterValueSegment, SegmentInfo};

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

/// Stable numeric id of a single parameter.
pub type ParameterId = u32;

/// Stable numeric id of a set of parameters that arrive together.
pub type GroupId = u32;

/// Identifier of a time interval: the first millisecond it covers.
pub type IntervalId = i64;
