//! Real-time path benchmarks
//!
//! Measures the per-sample work the `vitals-rt` thread does: cache append,
//! alarm evaluation and a drop-oldest channel send.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use vitals_core::alarm::{AlarmEngine, NullSink};
use vitals_core::channels::{bounded, OverflowPolicy};
use vitals_core::config::{AlarmsConfig, ChannelConfig};
use vitals_core::models::{SourceId, VitalRecord};
use vitals_core::VitalsCache;

fn record(ts: i64, hr: f64) -> VitalRecord {
    VitalRecord::measured(SourceId(1), ts, hr, 97.0, 16.0)
}

fn benchmark_cache_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("vitals_cache_append");
    for capacity in [1_024usize, 259_200] {
        group.bench_with_input(BenchmarkId::from_parameter(capacity), &capacity, |b, &capacity| {
            let cache = VitalsCache::new(capacity, 4);
            let mut ts = 1;
            b.iter(|| {
                ts += 1;
                black_box(cache.append(record(ts, 72.0)))
            });
        });
    }
    group.finish();
}

fn benchmark_alarm_evaluation(c: &mut Criterion) {
    let config = AlarmsConfig::default();

    c.bench_function("alarm_evaluate_normal", |b| {
        let mut engine = AlarmEngine::new(&config);
        let mut ts = 1;
        b.iter(|| {
            ts += 1;
            engine.evaluate(black_box(&record(ts, 72.0)), ts, &mut NullSink);
        });
    });

    // Alternates raise and clear so every iteration exercises a transition path
    c.bench_function("alarm_evaluate_flapping", |b| {
        let mut engine = AlarmEngine::new(&config);
        let mut ts = 1;
        b.iter(|| {
            ts += 1;
            let hr = if ts % 8 == 0 { 150.0 } else { 80.0 };
            engine.evaluate(black_box(&record(ts, hr)), ts, &mut NullSink);
        });
    });
}

fn benchmark_channel_send(c: &mut Criterion) {
    c.bench_function("drop_oldest_send_full_channel", |b| {
        let (tx, _rx) = bounded::<VitalRecord>("bench", ChannelConfig::new(64, OverflowPolicy::DropOldest));
        let mut ts = 1;
        b.iter(|| {
            ts += 1;
            black_box(tx.send(record(ts, 72.0)).is_ok())
        });
    });
}

criterion_group!(
    benches,
    benchmark_cache_append,
    benchmark_alarm_evaluation,
    benchmark_channel_send
);
criterion_main!(benches);
