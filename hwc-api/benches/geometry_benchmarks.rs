//! Geometry benchmarks

use criterion::{Criterion, criterion_group, criterion_main};
use core::hint::black_box;
use hwc_api::core::{Bounds, Rect, Size, Transform};
use hwc_api::geometry::{self, ActionSafe, DownscaleFactor};

fn bench_transform_map(c: &mut Criterion) {
    let frame = Size::new(1920, 1080);
    let crop = Rect::new(64, 32, 1280, 720);
    c.bench_function("transform_map_all", |b| {
        b.iter(|| {
            for t in Transform::ALL {
                black_box(t.map_rect(black_box(crop), frame));
            }
        })
    });
}

fn bench_downscale_select(c: &mut Criterion) {
    c.bench_function("downscale_select", |b| {
        b.iter(|| DownscaleFactor::select(black_box(Size::new(3840, 2160)), black_box(Size::new(480, 270))))
    });
}

fn bench_placement(c: &mut Criterion) {
    let display = Size::new(1920, 1080);
    c.bench_function("mirror_position", |b| {
        b.iter(|| {
            geometry::mirror_position(
                black_box(Size::new(480, 800)),
                black_box(Rect::new(0, 100, 480, 270)),
                Transform::ROT_90,
                display,
                ActionSafe::new(5.0, 5.0),
            )
        })
    });
}

fn bench_clip(c: &mut Criterion) {
    let display = Size::new(1920, 1080);
    c.bench_function("clip_to_display", |b| {
        b.iter(|| {
            geometry::clip_to_display(
                black_box(Rect::new(0, 0, 1280, 720)),
                black_box(Bounds::new(-200, -100, 1800, 1200)),
                display,
                Transform::ROT_270,
            )
        })
    });
}

criterion_group!(
    geometry_benchmarks,
    bench_transform_map,
    bench_downscale_select,
    bench_placement,
    bench_clip
);

criterion_main!(geometry_benchmarks);
