//! Edge-case tests for segments, batches, intervals and varint coding.

use std::sync::Arc;

use bytes::Bytes;
use parchive_core::varint::{decode_varint, encode_varint};
use parchive_core::{
    IntervalScheme, ParameterBatch, ParameterGroupSegment, ParameterValueSegment, SegmentInfo,
    Value,
};
use proptest::prelude::*;

// ---------------------------------------------------------------
// Segments
// ---------------------------------------------------------------

fn open(t: i64) -> ParameterGroupSegment {
    ParameterGroupSegment::open(3, Arc::from(&[1u32][..]), 0, t, &[Value::Int64(t)]).unwrap()
}

proptest! {
    #[test]
    fn segment_timestamps_always_ascending(times in proptest::collection::vec(0i64..10_000, 1..200)) {
        let seg = open(times[0]);
        for &t in &times[1..] {
            seg.add_record(t, &[Value::Int64(t)]).unwrap();
        }

        let recorded = seg.timestamps();
        prop_assert_eq!(recorded.len(), times.len());
        prop_assert!(recorded.windows(2).all(|w| w[0] <= w[1]));
        prop_assert_eq!(seg.start(), *times.iter().min().unwrap());
        prop_assert_eq!(seg.end(), *times.iter().max().unwrap());
    }

    #[test]
    fn values_follow_their_timestamps(times in proptest::collection::vec(0i64..1_000, 1..100)) {
        let seg = open(times[0]);
        for &t in &times[1..] {
            seg.add_record(t, &[Value::Int64(t)]).unwrap();
        }

        let view = seg.parameter_value_segment(1).unwrap();
        for (t, v) in view.iter() {
            prop_assert_eq!(v, &Value::Int64(t));
        }
    }

    #[test]
    fn varint_zigzag_symmetry(value in any::<i64>()) {
        let mut buf = Vec::new();
        encode_varint(&mut buf, value);
        prop_assert_eq!(decode_varint(&mut &buf[..]).unwrap(), value);
    }
}

#[test]
fn segment_timestamps_at_extremes() {
    let seg = open(i64::MAX);
    seg.add_record(i64::MIN, &[Value::Int64(0)]).unwrap();
    assert_eq!(seg.start(), i64::MIN);
    assert_eq!(seg.end(), i64::MAX);
}

#[test]
fn segment_display_mentions_group_and_count() {
    let seg = open(5);
    let text = seg.to_string();
    assert!(text.contains("group 3"));
    assert!(text.contains("1 samples"));
}

#[test]
fn empty_value_segment_has_no_bounds() {
    let view = ParameterValueSegment {
        parameter_id: 1,
        group_id: 1,
        interval: 0,
        timestamps: vec![],
        values: vec![],
    };
    assert!(view.is_empty());
    assert_eq!(view.segment_start(), None);
    assert_eq!(view.segment_end(), None);
}

// ---------------------------------------------------------------
// Values and batches
// ---------------------------------------------------------------

#[test]
fn value_serde_roundtrip() {
    let values = vec![
        Value::Float64(1.5),
        Value::Float32(-2.25),
        Value::Int64(-7),
        Value::UInt64(u64::MAX),
        Value::Bool(true),
        Value::String("nominal".to_string()),
        Value::Binary(Bytes::from_static(b"\x00\x01")),
    ];
    let json = serde_json::to_string(&values).unwrap();
    let back: Vec<Value> = serde_json::from_str(&json).unwrap();
    assert_eq!(back, values);
}

#[test]
fn batches_with_same_set_share_parameter_ids() {
    let a = ParameterBatch::new(1, [(4, Value::Bool(true)), (2, Value::Bool(false))]);
    let b = ParameterBatch::new(2, [(2, Value::Bool(true)), (4, Value::Bool(false))]);
    assert_eq!(a.parameter_ids(), b.parameter_ids());
}

// ---------------------------------------------------------------
// Intervals
// ---------------------------------------------------------------

#[test]
fn interval_boundaries_are_shared_by_both_schemes() {
    let p2 = IntervalScheme::PowerOfTwo { bits: 12 };
    let fixed = IntervalScheme::Fixed { width_ms: 4096 };
    for t in [-10_000i64, -4096, -1, 0, 1, 4095, 4096, 123_456] {
        assert_eq!(p2.interval_of(t), fixed.interval_of(t), "t = {t}");
    }
}

#[test]
fn segment_info_roundtrip() {
    let info = SegmentInfo {
        key: "archive/3/0/100.seg".to_string(),
        group_id: 3,
        interval: 0,
        start: 100,
        end: 200,
        sample_count: 10,
        parameter_count: 2,
        size_bytes: 512,
    };
    let json = serde_json::to_string(&info).unwrap();
    let back: SegmentInfo = serde_json::from_str(&json).unwrap();
    assert_eq!(back, info);
}
