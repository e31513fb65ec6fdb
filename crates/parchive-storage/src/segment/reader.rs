//! Segment Decoder
//!
//! Validates and reads archived segment files.
//!
//! ## Validation
//!
//! `SegmentDecoder::new` checks, in order:
//! 1. The blob is at least header + footer long
//! 2. Header magic and version
//! 3. Footer CRC32 over everything before the footer, then footer magic
//! 4. Every block length stays inside the blob
//!
//! Block contents are decoded lazily, one column at a time. Blobs come back
//! from an object store, so every read is bounds checked and malformed input
//! yields an error instead of a panic.
//!
//! ## Errors
//!
//! - `InvalidMagic`: not a segment file
//! - `UnsupportedVersion`: written by a newer format
//! - `CrcMismatch`: corrupted in storage or transit
//! - `InvalidSegment`: truncated or inconsistent structure
//! - `UnknownValueType`: a value tag this version does not know
//! - `Decompression`: LZ4 block failed to decompress

use std::ops::Range;

use bytes::{Buf, Bytes};
use parchive_core::{
    varint, Compression, Error, GroupId, IntervalId, ParameterId, ParameterValueSegment, Result,
    SegmentInfo, Timestamp, Value,
};

use super::{FOOTER_SIZE, HEADER_SIZE, SEGMENT_MAGIC, SEGMENT_VERSION};

/// Reads columns from an archived segment
pub struct SegmentDecoder {
    data: Bytes,
    header: SegmentHeader,
    parameter_ids: Vec<ParameterId>,
    time_block: Range<usize>,
    value_blocks: Vec<Range<usize>>,
}

#[derive(Debug, Clone)]
struct SegmentHeader {
    compression: Compression,
    group_id: GroupId,
    interval: IntervalId,
    start: Timestamp,
    end: Timestamp,
    sample_count: u32,
    parameter_count: u32,
}

impl SegmentDecoder {
    /// Open a segment blob
    pub fn new(data: Bytes) -> Result<Self> {
        if data.len() < HEADER_SIZE + FOOTER_SIZE {
            return Err(Error::InvalidSegment("Segment too small".to_string()));
        }

        let header = Self::read_header(&data)?;
        let body_end = data.len() - FOOTER_SIZE;
        Self::verify_footer(&data, body_end)?;

        let mut pos = HEADER_SIZE;

        let id_table_len = header.parameter_count as usize * 4;
        let id_table = checked_range(pos, id_table_len, body_end, "parameter ids")?;
        let mut cursor = &data[id_table.clone()];
        let parameter_ids = (0..header.parameter_count)
            .map(|_| cursor.get_u32())
            .collect();
        pos = id_table.end;

        let time_block = Self::block_range(&data, &mut pos, body_end, "time block")?;
        let value_blocks = (0..header.parameter_count)
            .map(|_| Self::block_range(&data, &mut pos, body_end, "value block"))
            .collect::<Result<Vec<_>>>()?;

        if pos != body_end {
            return Err(Error::InvalidSegment(format!(
                "{} trailing bytes before footer",
                body_end - pos
            )));
        }

        Ok(Self {
            data,
            header,
            parameter_ids,
            time_block,
            value_blocks,
        })
    }

    fn read_header(data: &Bytes) -> Result<SegmentHeader> {
        let mut cursor = &data[..HEADER_SIZE];

        let mut magic = [0u8; 4];
        cursor.copy_to_slice(&mut magic);
        if magic != SEGMENT_MAGIC {
            return Err(Error::InvalidMagic);
        }

        let version = cursor.get_u16();
        if version != SEGMENT_VERSION {
            return Err(Error::UnsupportedVersion(version));
        }

        let compression = Compression::try_from(cursor.get_u16())?;

        Ok(SegmentHeader {
            compression,
            group_id: cursor.get_u32(),
            interval: cursor.get_i64(),
            start: cursor.get_i64(),
            end: cursor.get_i64(),
            sample_count: cursor.get_u32(),
            parameter_count: cursor.get_u32(),
        })
    }

    fn verify_footer(data: &Bytes, body_end: usize) -> Result<()> {
        let mut cursor = &data[body_end..];

        let stored_crc = cursor.get_u32();
        let calculated_crc = crc32fast::hash(&data[..body_end]);
        if stored_crc != calculated_crc {
            return Err(Error::CrcMismatch);
        }

        let mut magic = [0u8; 4];
        cursor.copy_to_slice(&mut magic);
        if magic != SEGMENT_MAGIC {
            return Err(Error::InvalidMagic);
        }

        Ok(())
    }

    /// Read a length-prefixed block starting at `pos` and advance past it
    fn block_range(
        data: &Bytes,
        pos: &mut usize,
        body_end: usize,
        what: &str,
    ) -> Result<Range<usize>> {
        let len_field = checked_range(*pos, 4, body_end, what)?;
        let len = (&data[len_field.clone()]).get_u32() as usize;
        let range = checked_range(len_field.end, len, body_end, what)?;
        *pos = range.end;
        Ok(range)
    }

    fn block(&self, range: &Range<usize>) -> Result<Bytes> {
        let raw = self.data.slice(range.clone());
        match self.header.compression {
            Compression::None => Ok(raw),
            Compression::Lz4 => {
                let decompressed = lz4_flex::decompress_size_prepended(&raw)
                    .map_err(|e| Error::Decompression(e.to_string()))?;
                Ok(Bytes::from(decompressed))
            }
        }
    }

    /// Decode the time column
    pub fn timestamps(&self) -> Result<Vec<Timestamp>> {
        let block = self.block(&self.time_block)?;
        let mut cursor = block.as_ref();

        let count = self.header.sample_count as usize;
        let mut timestamps = Vec::with_capacity(count);
        let mut current = self.header.start;
        for _ in 0..count {
            current = current.wrapping_add(varint::decode_varint(&mut cursor)?);
            timestamps.push(current);
        }

        if cursor.has_remaining() {
            return Err(Error::InvalidSegment(
                "time block longer than sample count".to_string(),
            ));
        }
        if timestamps.last() != Some(&self.header.end) {
            return Err(Error::InvalidSegment(
                "time column does not match header end".to_string(),
            ));
        }

        Ok(timestamps)
    }

    fn values(&self, column: usize) -> Result<Vec<Value>> {
        let block = self.block(&self.value_blocks[column])?;
        let mut cursor = block.as_ref();

        let count = self.header.sample_count as usize;
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            values.push(decode_value(&mut cursor)?);
        }

        if cursor.has_remaining() {
            return Err(Error::InvalidSegment(
                "value block longer than sample count".to_string(),
            ));
        }
        Ok(values)
    }

    /// Samples of one parameter, or `None` if it is not part of this segment
    pub fn column(&self, parameter_id: ParameterId) -> Result<Option<ParameterValueSegment>> {
        let Some(column) = self.parameter_ids.iter().position(|&id| id == parameter_id) else {
            return Ok(None);
        };

        Ok(Some(ParameterValueSegment {
            parameter_id,
            group_id: self.header.group_id,
            interval: self.header.interval,
            timestamps: self.timestamps()?,
            values: self.values(column)?,
        }))
    }

    /// Every column of the segment
    pub fn read_all(&self) -> Result<Vec<ParameterValueSegment>> {
        let timestamps = self.timestamps()?;

        self.parameter_ids
            .iter()
            .enumerate()
            .map(|(column, &parameter_id)| {
                Ok(ParameterValueSegment {
                    parameter_id,
                    group_id: self.header.group_id,
                    interval: self.header.interval,
                    timestamps: timestamps.clone(),
                    values: self.values(column)?,
                })
            })
            .collect()
    }

    pub fn group_id(&self) -> GroupId {
        self.header.group_id
    }

    pub fn interval(&self) -> IntervalId {
        self.header.interval
    }

    pub fn start(&self) -> Timestamp {
        self.header.start
    }

    pub fn end(&self) -> Timestamp {
        self.header.end
    }

    pub fn sample_count(&self) -> u32 {
        self.header.sample_count
    }

    pub fn parameter_ids(&self) -> &[ParameterId] {
        &self.parameter_ids
    }

    pub fn compression(&self) -> Compression {
        self.header.compression
    }

    /// Describe this segment as stored under `key`
    pub fn info(&self, key: impl Into<String>) -> SegmentInfo {
        SegmentInfo {
            key: key.into(),
            group_id: self.header.group_id,
            interval: self.header.interval,
            start: self.header.start,
            end: self.header.end,
            sample_count: self.header.sample_count,
            parameter_count: self.header.parameter_count,
            size_bytes: self.data.len() as u64,
        }
    }
}

fn checked_range(start: usize, len: usize, limit: usize, what: &str) -> Result<Range<usize>> {
    match start.checked_add(len) {
        Some(end) if end <= limit => Ok(start..end),
        _ => Err(Error::InvalidSegment(format!("{what} runs past end of segment"))),
    }
}

fn need(cursor: &[u8], n: usize) -> Result<()> {
    if cursor.remaining() < n {
        return Err(Error::InvalidSegment(
            "Unexpected end of block reading value".to_string(),
        ));
    }
    Ok(())
}

fn decode_value(cursor: &mut &[u8]) -> Result<Value> {
    need(cursor, 1)?;
    let tag = cursor.get_u8();

    let value = match tag {
        0 => {
            need(cursor, 8)?;
            Value::Float64(cursor.get_f64())
        }
        1 => {
            need(cursor, 4)?;
            Value::Float32(cursor.get_f32())
        }
        2 => Value::Int64(varint::decode_varint(cursor)?),
        3 => Value::UInt64(varint::decode_varint_u64(cursor)?),
        4 => {
            need(cursor, 1)?;
            Value::Bool(cursor.get_u8() != 0)
        }
        5 => {
            let bytes = read_len_prefixed(cursor)?;
            let s = String::from_utf8(bytes.to_vec())
                .map_err(|e| Error::InvalidSegment(format!("invalid UTF-8 string: {e}")))?;
            Value::String(s)
        }
        6 => Value::Binary(Bytes::copy_from_slice(read_len_prefixed(cursor)?)),
        other => return Err(Error::UnknownValueType(other)),
    };

    Ok(value)
}

fn read_len_prefixed<'a>(cursor: &mut &'a [u8]) -> Result<&'a [u8]> {
    let len = varint::decode_varint_u64(cursor)? as usize;
    need(cursor, len)?;
    let slice: &'a [u8] = *cursor;
    let (bytes, rest) = slice.split_at(len);
    *cursor = rest;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::SegmentEncoder;
    use parchive_core::ParameterGroupSegment;
    use std::sync::Arc;

    fn all_types() -> Vec<Value> {
        vec![
            Value::Float64(-0.5),
            Value::Float32(3.25),
            Value::Int64(i64::MIN),
            Value::UInt64(u64::MAX),
            Value::Bool(true),
            Value::String("nominal ✓".to_string()),
            Value::Binary(Bytes::from_static(&[0, 1, 2, 255])),
        ]
    }

    fn segment() -> ParameterGroupSegment {
        let ids: Vec<ParameterId> = (10..17).collect();
        let seg = ParameterGroupSegment::open(4, Arc::from(ids), 0, 1000, &all_types()).unwrap();
        seg.add_record(990, &all_types()).unwrap();
        seg.add_record(1500, &all_types()).unwrap();
        seg
    }

    fn encoded(compression: Compression) -> Bytes {
        SegmentEncoder::new(compression).encode(&segment()).unwrap()
    }

    #[test]
    fn test_roundtrip_every_value_type() {
        for compression in [Compression::None, Compression::Lz4] {
            let decoder = SegmentDecoder::new(encoded(compression)).unwrap();

            assert_eq!(decoder.group_id(), 4);
            assert_eq!(decoder.start(), 990);
            assert_eq!(decoder.end(), 1500);
            assert_eq!(decoder.sample_count(), 3);
            assert_eq!(decoder.compression(), compression);

            let views = decoder.read_all().unwrap();
            assert_eq!(views, segment().snapshot());
        }
    }

    #[test]
    fn test_single_column() {
        let decoder = SegmentDecoder::new(encoded(Compression::Lz4)).unwrap();

        let view = decoder.column(15).unwrap().unwrap();
        assert_eq!(view.timestamps, vec![990, 1000, 1500]);
        assert_eq!(view.values[0], Value::String("nominal ✓".to_string()));

        assert!(decoder.column(99).unwrap().is_none());
    }

    #[test]
    fn test_info_describes_blob() {
        let bytes = encoded(Compression::None);
        let size = bytes.len() as u64;
        let info = SegmentDecoder::new(bytes).unwrap().info("k");

        assert_eq!(info.key, "k");
        assert_eq!(info.parameter_count, 7);
        assert_eq!(info.sample_count, 3);
        assert_eq!(info.size_bytes, size);
    }

    #[test]
    fn test_invalid_magic() {
        let mut bytes = encoded(Compression::None).to_vec();
        bytes[0] = b'X';
        assert!(matches!(
            SegmentDecoder::new(Bytes::from(bytes)),
            Err(Error::InvalidMagic)
        ));
    }

    #[test]
    fn test_too_small() {
        assert!(matches!(
            SegmentDecoder::new(Bytes::from_static(b"PARC")),
            Err(Error::InvalidSegment(_))
        ));
    }

    #[test]
    fn test_corrupted_body_fails_crc() {
        let mut bytes = encoded(Compression::Lz4).to_vec();
        let middle = bytes.len() / 2;
        bytes[middle] ^= 0xFF;
        assert!(matches!(
            SegmentDecoder::new(Bytes::from(bytes)),
            Err(Error::CrcMismatch)
        ));
    }

    #[test]
    fn test_corrupted_footer_magic() {
        let mut bytes = encoded(Compression::None).to_vec();
        let last = bytes.len() - 1;
        bytes[last] = 0;
        assert!(matches!(
            SegmentDecoder::new(Bytes::from(bytes)),
            Err(Error::InvalidMagic)
        ));
    }

    #[test]
    fn test_unsupported_version() {
        let mut bytes = encoded(Compression::None).to_vec();
        bytes[5] = 9;
        assert!(matches!(
            SegmentDecoder::new(Bytes::from(bytes)),
            Err(Error::UnsupportedVersion(9))
        ));
    }

    #[test]
    fn test_truncated_value_is_an_error() {
        let mut cursor: &[u8] = &[0, 1, 2];
        assert!(matches!(
            decode_value(&mut cursor),
            Err(Error::InvalidSegment(_))
        ));
    }

    #[test]
    fn test_unknown_value_tag() {
        let mut cursor: &[u8] = &[42];
        assert!(matches!(
            decode_value(&mut cursor),
            Err(Error::UnknownValueType(42))
        ));
    }
}
