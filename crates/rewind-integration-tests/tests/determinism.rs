//! Cross-thread determinism: independent walks over one shared registry.
//!
//! Peers in a lockstep session each build their own state and compare
//! snapshot bytes. These tests stand in for peers with threads: every thread
//! builds its own world (the `Rc` graph never crosses threads), walks it with
//! the shared `&Registry`, and the results must be byte-identical.

use std::thread;

use rewind_core::fixed::Fixed64;
use rewind_core::loop_record::LoopRecord;
use rewind_core::test_utils::*;
use rewind_core::validation::{diff_payloads, validate_determinism, validate_record};
use rewind_core::{Registry, snapshot};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Build the sample world, advance it `ticks` times, and snapshot it.
fn simulate(reg: &Registry, ticks: u64) -> Vec<u8> {
    let mut world = sample_world();
    let step = Fixed64::from_num(0.5);
    for _ in 0..ticks {
        world.tick += 1;
        for actor in &world.actors {
            let mut a = actor.borrow_mut();
            a.x += step;
            a.y -= step;
        }
    }
    let bytes = snapshot(reg, &world).unwrap();
    release_world(&world);
    bytes
}

#[test]
fn threads_produce_identical_snapshots() {
    init_tracing();
    let reg = sample_registry().unwrap();

    let results: Vec<Vec<u8>> = thread::scope(|s| {
        let handles: Vec<_> = (0..8).map(|_| s.spawn(|| simulate(&reg, 60))).collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    for bytes in &results[1..] {
        let diff = diff_payloads(&results[0], bytes);
        assert!(diff.is_identical(), "peers diverged: {diff:?}");
    }
}

#[test]
fn desync_is_located() {
    let reg = sample_registry().unwrap();
    let a = simulate(&reg, 60);
    let b = simulate(&reg, 61);
    let diff = diff_payloads(&a, &b);
    // The tick counter is the first field of the world.
    assert_eq!(diff.first_divergence, Some(0));
    assert_eq!(diff.len_a, diff.len_b);
}

#[test]
fn registries_built_on_separate_threads_agree() {
    let hashes: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|_| s.spawn(|| sample_registry().unwrap().definition_hash()))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert!(hashes.windows(2).all(|w| w[0] == w[1]));
}

#[test]
fn sample_world_validates() {
    let reg = sample_registry().unwrap();
    let world = sample_world();
    let result = validate_determinism(&reg, &world).unwrap();
    assert!(result.is_deterministic);

    let record = LoopRecord::new("tick 120", reg.definition_hash(), result.payload);
    assert!(validate_record(&reg, &record, &world).unwrap().is_identical());
    release_world(&world);
}
