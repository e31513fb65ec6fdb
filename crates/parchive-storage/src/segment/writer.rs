//! Segment Encoder
//!
//! Turns a [`ParameterGroupSegment`] into the archived byte layout described in
//! the module docs. Encoding works on a copy of the columns, so it can run on
//! a dispatcher task while readers keep querying the same segment.
//!
//! The time column is delta encoded against the segment start. Samples are
//! sorted, so every delta is non-negative and usually fits in one or two
//! bytes.

use bytes::{BufMut, Bytes, BytesMut};
use parchive_core::{
    varint, Compression, GroupId, IntervalId, ParameterGroupSegment, ParameterId, Result,
    Timestamp, Value,
};

use super::{HEADER_SIZE, SEGMENT_MAGIC, SEGMENT_VERSION};

/// Builds archived segment files
#[derive(Debug, Clone, Copy)]
pub struct SegmentEncoder {
    compression: Compression,
}

impl SegmentEncoder {
    pub fn new(compression: Compression) -> Self {
        Self { compression }
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    /// Encode a whole segment
    pub fn encode(&self, segment: &ParameterGroupSegment) -> Result<Bytes> {
        let timestamps = segment.timestamps();
        let columns: Vec<Vec<Value>> = segment
            .snapshot()
            .into_iter()
            .map(|view| view.values)
            .collect();

        self.encode_columns(
            segment.group_id(),
            segment.interval(),
            segment.parameter_ids(),
            &timestamps,
            &columns,
        )
    }

    /// Encode raw columns; `columns[i]` holds the values of `parameter_ids[i]`
    pub fn encode_columns(
        &self,
        group_id: GroupId,
        interval: IntervalId,
        parameter_ids: &[ParameterId],
        timestamps: &[Timestamp],
        columns: &[Vec<Value>],
    ) -> Result<Bytes> {
        if timestamps.is_empty() {
            return Err(parchive_core::Error::InvalidSegment(
                "No samples written".to_string(),
            ));
        }
        if columns.len() != parameter_ids.len() {
            return Err(parchive_core::Error::ColumnMismatch {
                expected: parameter_ids.len(),
                actual: columns.len(),
            });
        }
        if let Some(column) = columns.iter().find(|c| c.len() != timestamps.len()) {
            return Err(parchive_core::Error::ColumnMismatch {
                expected: timestamps.len(),
                actual: column.len(),
            });
        }

        let start = timestamps[0];
        let end = timestamps[timestamps.len() - 1];

        let mut output = BytesMut::with_capacity(HEADER_SIZE + timestamps.len() * 4);

        // 1. Header
        output.put_slice(&SEGMENT_MAGIC); // 4 bytes
        output.put_u16(SEGMENT_VERSION); // 2 bytes
        output.put_u16(self.compression as u16); // 2 bytes
        output.put_u32(group_id); // 4 bytes
        output.put_i64(interval); // 8 bytes
        output.put_i64(start); // 8 bytes
        output.put_i64(end); // 8 bytes
        output.put_u32(timestamps.len() as u32); // 4 bytes
        output.put_u32(parameter_ids.len() as u32); // 4 bytes
        output.put_bytes(0, 4); // reserved

        // 2. Parameter id table
        for &id in parameter_ids {
            output.put_u32(id);
        }

        // 3. Time block
        let mut block = BytesMut::with_capacity(timestamps.len() * 2);
        let mut previous = start;
        for &t in timestamps {
            varint::encode_varint(&mut block, t.wrapping_sub(previous));
            previous = t;
        }
        self.put_block(&mut output, &block)?;

        // 4. One value block per parameter
        for column in columns {
            let mut block = BytesMut::new();
            for value in column {
                encode_value(&mut block, value);
            }
            self.put_block(&mut output, &block)?;
        }

        // 5. Footer
        let crc = crc32fast::hash(&output);
        output.put_u32(crc);
        output.put_slice(&SEGMENT_MAGIC);

        Ok(output.freeze())
    }

    fn put_block(&self, output: &mut BytesMut, block: &[u8]) -> Result<()> {
        let stored = match self.compression {
            Compression::None => block.to_vec(),
            Compression::Lz4 => lz4_flex::compress_prepend_size(block),
        };

        let len = u32::try_from(stored.len()).map_err(|_| {
            parchive_core::Error::CompressionError(format!(
                "block of {} bytes exceeds the format limit",
                stored.len()
            ))
        })?;

        output.put_u32(len);
        output.put_slice(&stored);
        Ok(())
    }
}

fn encode_value(buf: &mut BytesMut, value: &Value) {
    buf.put_u8(value.type_tag());
    match value {
        Value::Float64(v) => buf.put_f64(*v),
        Value::Float32(v) => buf.put_f32(*v),
        Value::Int64(v) => varint::encode_varint(buf, *v),
        Value::UInt64(v) => varint::encode_varint_u64(buf, *v),
        Value::Bool(v) => buf.put_u8(u8::from(*v)),
        Value::String(s) => {
            varint::encode_varint_u64(buf, s.len() as u64);
            buf.put_slice(s.as_bytes());
        }
        Value::Binary(b) => {
            varint::encode_varint_u64(buf, b.len() as u64);
            buf.put_slice(b);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::FOOTER_SIZE;
    use std::sync::Arc;

    #[test]
    fn test_header_layout() {
        let segment =
            ParameterGroupSegment::open(9, Arc::from(&[1u32, 2][..]), 1024, 1500, &[
                Value::Bool(true),
                Value::Int64(-1),
            ])
            .unwrap();

        let bytes = SegmentEncoder::new(Compression::None).encode(&segment).unwrap();

        assert_eq!(&bytes[..4], &SEGMENT_MAGIC);
        assert_eq!(u16::from_be_bytes([bytes[4], bytes[5]]), SEGMENT_VERSION);
        assert_eq!(u16::from_be_bytes([bytes[6], bytes[7]]), 0);
        assert_eq!(&bytes[bytes.len() - 4..], &SEGMENT_MAGIC);
        assert!(bytes.len() > HEADER_SIZE + FOOTER_SIZE + 8);
    }

    #[test]
    fn test_empty_columns_rejected() {
        let encoder = SegmentEncoder::new(Compression::Lz4);
        assert!(encoder.encode_columns(1, 0, &[1], &[], &[vec![]]).is_err());
    }

    #[test]
    fn test_ragged_columns_rejected() {
        let encoder = SegmentEncoder::new(Compression::None);
        let err = encoder
            .encode_columns(1, 0, &[1, 2], &[10, 20], &[
                vec![Value::Bool(true), Value::Bool(false)],
                vec![Value::Bool(true)],
            ])
            .unwrap_err();
        assert!(matches!(
            err,
            parchive_core::Error::ColumnMismatch { expected: 2, actual: 1 }
        ));
    }

    #[test]
    fn test_lz4_shrinks_repetitive_columns() {
        let timestamps: Vec<Timestamp> = (0..2000).map(|i| i * 10).collect();
        let column: Vec<Value> = (0..2000).map(|_| Value::Float64(21.5)).collect();

        let plain = SegmentEncoder::new(Compression::None)
            .encode_columns(1, 0, &[1], &timestamps, &[column.clone()])
            .unwrap();
        let packed = SegmentEncoder::new(Compression::Lz4)
            .encode_columns(1, 0, &[1], &timestamps, &[column])
            .unwrap();

        assert!(packed.len() < plain.len() / 4);
    }
}
