//! Проверка пересечений сегментов на месте с плотной продажей.
//!
//! Run with: `cargo bench --bench segment_overlap`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use seat_segment_booking::models::Segment;

/// Соседние сегменты длиной 1: `[0,1) [1,2) ...`
fn sold_segments(stops: i32) -> Vec<Segment> {
    (0..stops - 1)
        .filter_map(|from| Segment::new(from, from + 1).ok())
        .collect()
}

fn bench_overlap(c: &mut Criterion) {
    let mut group = c.benchmark_group("segment_overlap");
    for stops in [8, 32, 128] {
        let sold = sold_segments(stops);
        let Ok(probe) = Segment::new(stops / 2, stops / 2 + 2) else {
            continue;
        };
        group.bench_with_input(BenchmarkId::new("any_overlap", stops), &sold, |b, sold| {
            b.iter(|| black_box(sold.iter().any(|s| s.overlaps(black_box(&probe)))))
        });
        group.bench_with_input(BenchmarkId::new("peak_occupancy", stops), &sold, |b, sold| {
            b.iter(|| {
                black_box(
                    probe
                        .stop_orders()
                        .map(|order| sold.iter().filter(|s| s.covers(order)).count())
                        .max(),
                )
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_overlap);
criterion_main!(benches);
