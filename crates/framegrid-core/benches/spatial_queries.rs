use criterion::{black_box, criterion_group, criterion_main, Criterion};
use framegrid_core::config::{PathConfig, SpatialConfig};
use framegrid_core::pathfinding::PathPlanner;
use framegrid_core::prelude::*;
use framegrid_core::spatial::SpatialIndex;

/// Deterministic scatter of `count` boxes over a 1000 x 40 x 1000 volume.
fn populated_index(count: u64) -> SpatialIndex {
    let mut index = SpatialIndex::new(
        SpatialConfig {
            query_cache_ttl: 0.0,
            ..SpatialConfig::default()
        },
        SystemClock::shared(),
    );
    let mut seed = 0x2545_f491u64;
    let mut next = move || {
        seed ^= seed << 13;
        seed ^= seed >> 7;
        seed ^= seed << 17;
        (seed % 10_000) as f32 / 10_000.0
    };
    for id in 0..count {
        let position = Vec3::new(
            next() * 1000.0 - 500.0,
            next() * 40.0 - 20.0,
            next() * 1000.0 - 500.0,
        );
        let size = Vec3::splat(0.5 + next() * 3.0);
        index.add_object(&Body::new(id, position, size), id % 5 == 0);
    }
    index
}

fn bench_spatial(c: &mut Criterion) {
    let mut index = populated_index(5_000);

    c.bench_function("nearby_objects r=25", |b| {
        b.iter(|| index.nearby_objects(black_box(Vec3::new(12.0, 0.0, -40.0)), 25.0, true))
    });

    c.bench_function("objects_in_region 100^3", |b| {
        b.iter(|| {
            index.objects_in_region(
                black_box(Vec3::new(-50.0, -20.0, -50.0)),
                black_box(Vec3::new(50.0, 20.0, 50.0)),
            )
        })
    });

    c.bench_function("raycast 400", |b| {
        b.iter(|| {
            index.raycast(
                black_box(Vec3::new(-450.0, 0.0, 3.0)),
                Vec3::new(1.0, 0.0, 0.1),
                400.0,
            )
        })
    });
}

fn bench_paths(c: &mut Criterion) {
    let options = PathOptions::default();
    let mut planner = PathPlanner::new(
        PathConfig {
            cache_ttl: 0.0,
            ..PathConfig::default()
        },
        SystemClock::shared(),
    );

    c.bench_function("grid A* 40 units", |b| {
        b.iter(|| {
            planner.compute_path(Vec3::ZERO, black_box(Vec3::new(40.0, 0.0, 12.0)), 0.5, &options)
        })
    });

    let flat = PathOptions {
        allow_hierarchical: false,
        ..PathOptions::default()
    };
    let from = Vec3::new(-150.0, 0.0, -150.0);
    let to = Vec3::new(150.0, 0.0, 60.0);
    c.bench_function("grid A* 300 units", |b| {
        b.iter(|| planner.compute_path(from, black_box(to), 0.5, &flat))
    });
    c.bench_function("hierarchical A* 300 units", |b| {
        b.iter(|| planner.compute_path(from, black_box(to), 0.5, &options))
    });
}

criterion_group!(benches, bench_spatial, bench_paths);
criterion_main!(benches);
