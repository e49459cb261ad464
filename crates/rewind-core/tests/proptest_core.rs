//! Property-based tests for the snapshot walk and the loop format.
//!
//! Uses proptest to generate container contents, reference graphs and loop
//! records, then checks that restoring reproduces the value and its identity
//! structure, and that encodings are canonical.

use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use proptest::prelude::*;
use rewind_core::loop_record::{LoopReader, LoopRecord};
use rewind_core::shared::new_shared;
use rewind_core::test_utils::*;
use rewind_core::validation::diff_payloads;
use rewind_core::{DefinitionHash, Registry, RegistryBuilder, restore, snapshot};

fn container_registry() -> Registry {
    let mut b = RegistryBuilder::with_builtins();
    b.register_vec::<u32>().unwrap();
    b.register_vec::<String>().unwrap();
    b.register_option::<String>().unwrap();
    b.register_btree_map::<u64, String>().unwrap();
    b.register_btree_set::<i32>().unwrap();
    b.build().unwrap()
}

// ===========================================================================
// Generators
// ===========================================================================

/// Actor count plus, for each actor, an optional target index.
fn arb_graph(max_actors: usize) -> impl Strategy<Value = Vec<Option<usize>>> {
    (1..=max_actors).prop_flat_map(|n| proptest::collection::vec(proptest::option::of(0..n), n))
}

fn build_world(targets: &[Option<usize>]) -> World {
    let definition = new_shared(Definition {
        name: "prop".to_string(),
        max_health: 10,
        speed: fixed(0.5),
    });
    let actors: Vec<_> = (0..targets.len())
        .map(|i| make_actor(&format!("a{i}"), &definition, i as f64, -(i as f64)))
        .collect();
    for (i, target) in targets.iter().enumerate() {
        actors[i].borrow_mut().target = target.map(|j| Rc::clone(&actors[j]));
    }
    World {
        definition,
        actors,
        ..World::default()
    }
}

/// Target index of each actor, recovered by pointer identity.
fn target_indices(world: &World) -> Vec<Option<usize>> {
    world
        .actors
        .iter()
        .map(|actor| {
            let target = actor.borrow().target.clone()?;
            world.actors.iter().position(|a| Rc::ptr_eq(a, &target))
        })
        .collect()
}

// ===========================================================================
// Properties
// ===========================================================================

proptest! {
    #[test]
    fn vec_and_strings_round_trip(
        numbers in proptest::collection::vec(any::<u32>(), 0..64),
        words in proptest::collection::vec(".{0,16}", 0..16),
        maybe in proptest::option::of(".{0,32}"),
    ) {
        let reg = container_registry();
        prop_assert_eq!(restore::<Vec<u32>>(&reg, &snapshot(&reg, &numbers).unwrap()).unwrap(), numbers);
        prop_assert_eq!(restore::<Vec<String>>(&reg, &snapshot(&reg, &words).unwrap()).unwrap(), words);
        prop_assert_eq!(restore::<Option<String>>(&reg, &snapshot(&reg, &maybe).unwrap()).unwrap(), maybe);
    }

    #[test]
    fn ordered_containers_round_trip(
        map in proptest::collection::btree_map(any::<u64>(), "[a-z]{0,8}", 0..32),
        set in proptest::collection::btree_set(any::<i32>(), 0..32),
    ) {
        let reg = container_registry();
        let map_bytes = snapshot(&reg, &map).unwrap();
        prop_assert_eq!(restore::<BTreeMap<u64, String>>(&reg, &map_bytes).unwrap(), map);
        let set_bytes = snapshot(&reg, &set).unwrap();
        prop_assert_eq!(restore::<BTreeSet<i32>>(&reg, &set_bytes).unwrap(), set);
    }

    /// Restored actors target the same positions, and re-encoding gives the
    /// same bytes, for arbitrary (possibly cyclic) target graphs.
    #[test]
    fn reference_graph_identity_preserved(targets in arb_graph(12)) {
        let reg = sample_registry().unwrap();
        let world = build_world(&targets);
        let bytes = snapshot(&reg, &world).unwrap();
        let restored: World = restore(&reg, &bytes).unwrap();

        let restored_targets = target_indices(&restored);
        let again = snapshot(&reg, &restored).unwrap();
        for actor in &restored.actors {
            let shares = Rc::ptr_eq(&actor.borrow().definition, &restored.definition);
            prop_assert!(shares);
        }
        release_world(&restored);
        release_world(&world);

        prop_assert_eq!(restored_targets, targets);
        prop_assert_eq!(again, bytes);
    }

    #[test]
    fn loop_record_round_trip(
        comment in "[ -~]{0,48}",
        words in any::<[u32; 4]>(),
        payload in proptest::collection::vec(any::<u8>(), 0..256),
    ) {
        let [w0, w1, w2, w3] = words;
        let record = LoopRecord::new(comment, DefinitionHash::new(w0, w1, w2, w3), payload);
        let bytes = record.encode().unwrap();
        prop_assert_eq!(bytes.len(), record.encoded_len());

        let (decoded, used) = LoopRecord::decode(&bytes).unwrap();
        prop_assert_eq!(used, bytes.len());
        prop_assert_eq!(&decoded, &record);
        prop_assert!(LoopRecord::decode(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn loop_stream_yields_records_in_order(
        comments in proptest::collection::vec("[a-z0-9 ]{0,12}", 0..8),
    ) {
        let mut stream = Vec::new();
        for (i, comment) in comments.iter().enumerate() {
            let record = LoopRecord::new(comment.clone(), DefinitionHash::default(), vec![i as u8; i]);
            stream.extend(record.encode().unwrap());
        }
        let read: Vec<String> = LoopReader::new(stream.as_slice())
            .map(|r| r.unwrap().comment)
            .collect();
        prop_assert_eq!(read, comments);
    }

    #[test]
    fn diff_finds_first_changed_byte(
        data in proptest::collection::vec(any::<u8>(), 1..128),
        pick in any::<prop::sample::Index>(),
        mask in 1u8..=255,
    ) {
        let at = pick.index(data.len());
        let mut changed = data.clone();
        changed[at] ^= mask;

        prop_assert!(diff_payloads(&data, &data).is_identical());
        prop_assert_eq!(diff_payloads(&data, &changed).first_divergence, Some(at));
        prop_assert_eq!(diff_payloads(&data, &data[..at]).first_divergence, Some(at));
    }
}
