use proptest::prelude::*;

/// Per-step timestamp increments, zero allowed (equal timestamps are legal)
pub fn timestamp_steps_strategy(max_len: usize) -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(0i64..2_000, 1..max_len)
}

/// Interleaved appends from up to three sources: (source, timestamp step)
pub fn multi_source_strategy(max_len: usize) -> impl Strategy<Value = Vec<(u32, i64)>> {
    prop::collection::vec((1u32..=3, 0i64..1_500), 1..max_len)
}

/// Heart rate values around a 100 bpm limit
pub fn heart_rate_strategy() -> impl Strategy<Value = f64> {
    prop_oneof![
        3 => 60.0f64..99.0,
        1 => 99.0f64..101.0,
        2 => 101.0f64..180.0,
    ]
}

/// Independent clock offsets for sources 1..=3
pub fn source_offsets_strategy() -> impl Strategy<Value = [i64; 3]> {
    [-600_000i64..600_000, -600_000i64..600_000, -600_000i64..600_000]
}

/// Interleaved heart-rate samples that cross both alarm limits:
/// (source, timestamp step, heart rate, advance past a resync afterwards)
pub fn alarm_traffic_strategy(max_len: usize) -> impl Strategy<Value = Vec<(u32, i64, f64, bool)>> {
    prop::collection::vec(
        (
            1u32..=3,
            1i64..1_500,
            prop_oneof![3 => Just(72.0), 2 => Just(130.0), 1 => Just(35.0)],
            prop::bool::weighted(0.05),
        ),
        1..max_len,
    )
}
