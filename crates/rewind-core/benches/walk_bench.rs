//! Criterion benchmarks for snapshot walks and loop records.
//!
//! Three benchmark groups:
//! - `sample_world`: the three-actor test world, snapshot and restore
//! - `large_world`: 2000 actors in target rings with shared components
//! - `loop_record`: encoding and decoding a large world's record

use std::hint::black_box;
use std::rc::Rc;

use criterion::{Criterion, criterion_group, criterion_main};
use rewind_core::loop_record::LoopRecord;
use rewind_core::shared::{into_any, new_shared};
use rewind_core::test_utils::*;
use rewind_core::{restore, snapshot};

// ===========================================================================
// World builders
// ===========================================================================

/// `count` actors over one definition. Every 10 consecutive actors form a
/// target ring, and each ring shares one `Health`.
fn build_large_world(count: usize) -> World {
    let mut world = sample_world();
    release_world(&world);

    let actors: Vec<_> = (0..count)
        .map(|i| make_actor(&format!("actor-{i}"), &world.definition, i as f64, 0.5))
        .collect();
    for ring in actors.chunks(10) {
        let health = into_any(new_shared(Health {
            current: 50,
            regen: fixed32(0.125),
        }));
        for (i, actor) in ring.iter().enumerate() {
            let mut a = actor.borrow_mut();
            a.target = Some(Rc::clone(&ring[(i + 1) % ring.len()]));
            a.components.push(Rc::clone(&health));
            a.inventory.insert("ore".to_string(), i as u32);
            a.tags.insert(format!("ring-{}", i % 3));
        }
    }
    world.actors = actors;
    world
}

// ===========================================================================
// Benchmarks
// ===========================================================================

fn bench_sample_world(c: &mut Criterion) {
    let reg = sample_registry().unwrap();
    let world = sample_world();
    let bytes = snapshot(&reg, &world).unwrap();

    let mut group = c.benchmark_group("sample_world");
    group.bench_function("snapshot", |b| {
        b.iter(|| snapshot(&reg, black_box(&world)).unwrap())
    });
    group.bench_function("restore", |b| {
        b.iter(|| {
            let restored: World = restore(&reg, black_box(&bytes)).unwrap();
            release_world(&restored);
        })
    });
    group.finish();
    release_world(&world);
}

fn bench_large_world(c: &mut Criterion) {
    let reg = sample_registry().unwrap();
    let world = build_large_world(2000);
    let bytes = snapshot(&reg, &world).unwrap();

    let mut group = c.benchmark_group("large_world");
    group.sample_size(20);
    group.bench_function("snapshot_2000", |b| {
        b.iter(|| snapshot(&reg, black_box(&world)).unwrap())
    });
    group.bench_function("restore_2000", |b| {
        b.iter(|| {
            let restored: World = restore(&reg, black_box(&bytes)).unwrap();
            release_world(&restored);
        })
    });
    group.finish();
    release_world(&world);
}

fn bench_loop_record(c: &mut Criterion) {
    let reg = sample_registry().unwrap();
    let world = build_large_world(2000);
    let record = LoopRecord::new(
        "tick 120",
        reg.definition_hash(),
        snapshot(&reg, &world).unwrap(),
    );
    let encoded = record.encode().unwrap();

    let mut group = c.benchmark_group("loop_record");
    group.bench_function("encode", |b| {
        b.iter(|| black_box(&record).encode().unwrap())
    });
    group.bench_function("decode", |b| {
        b.iter(|| LoopRecord::decode(black_box(&encoded)).unwrap())
    });
    group.finish();
    release_world(&world);
}

criterion_group!(
    benches,
    bench_sample_world,
    bench_large_world,
    bench_loop_record
);
criterion_main!(benches);
