//! Shared test helpers for integration tests, benchmarks and fuzz targets.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]`. Provides a small
//! simulation with every shape the walk has to handle: a definition singleton
//! shared by all actors, actors targeting each other (cycles), ordered
//! containers, polymorphic components, and a plain-data settings block.

use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use crate::codec::{ByteReader, ByteWriter};
use crate::fixed::{Fixed32, Fixed64};
use crate::registry::{Registry, RegistryBuilder, RegistryError, TypeHandler};
use crate::serialize::{DeserializeContext, SerializeContext, WalkError};
use crate::shared::{AnyShared, Shared, into_any, new_shared};

// ===========================================================================
// Fixed-point helpers
// ===========================================================================

pub use crate::fixed::{f64_to_fixed32 as fixed32, f64_to_fixed64 as fixed};

// ===========================================================================
// Sample state types
// ===========================================================================

/// Per-simulation definition. One instance, referenced by every actor.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Definition {
    pub name: String,
    pub max_health: u32,
    pub speed: Fixed64,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Health {
    pub current: u32,
    pub regen: Fixed32,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Motor {
    pub velocity: Fixed64,
    pub heading: i16,
}

/// Plain data, encoded through the serde bridge.
#[derive(Debug, Default, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Settings {
    pub seed: u64,
    pub difficulty: u8,
    pub label: String,
}

#[derive(Debug, Default)]
pub struct Actor {
    pub name: String,
    pub x: Fixed64,
    pub y: Fixed64,
    pub definition: Shared<Definition>,
    /// May point back at this actor or at one that targets it.
    pub target: Option<Shared<Actor>>,
    pub tags: BTreeSet<String>,
    pub inventory: BTreeMap<String, u32>,
    /// `Health` or `Motor`, possibly shared with other actors.
    pub components: Vec<AnyShared>,
}

/// Snapshot root.
#[derive(Debug, Default)]
pub struct World {
    pub tick: u64,
    pub settings: Settings,
    pub definition: Shared<Definition>,
    pub actors: Vec<Shared<Actor>>,
}

// ===========================================================================
// Handlers
// ===========================================================================

fn serialize_definition(
    ctx: &mut SerializeContext<'_>,
    out: &mut ByteWriter,
    d: &Definition,
) -> Result<(), WalkError> {
    ctx.walk(out, &d.name)?;
    ctx.walk(out, &d.max_health)?;
    ctx.walk(out, &d.speed)
}

fn deserialize_definition(
    ctx: &mut DeserializeContext<'_>,
    input: &mut ByteReader<'_>,
    d: &mut Definition,
) -> Result<(), WalkError> {
    ctx.walk(input, &mut d.name)?;
    ctx.walk(input, &mut d.max_health)?;
    ctx.walk(input, &mut d.speed)
}

fn serialize_health(
    ctx: &mut SerializeContext<'_>,
    out: &mut ByteWriter,
    h: &Health,
) -> Result<(), WalkError> {
    ctx.walk(out, &h.current)?;
    ctx.walk(out, &h.regen)
}

fn deserialize_health(
    ctx: &mut DeserializeContext<'_>,
    input: &mut ByteReader<'_>,
    h: &mut Health,
) -> Result<(), WalkError> {
    ctx.walk(input, &mut h.current)?;
    ctx.walk(input, &mut h.regen)
}

fn serialize_motor(
    ctx: &mut SerializeContext<'_>,
    out: &mut ByteWriter,
    m: &Motor,
) -> Result<(), WalkError> {
    ctx.walk(out, &m.velocity)?;
    ctx.walk(out, &m.heading)
}

fn deserialize_motor(
    ctx: &mut DeserializeContext<'_>,
    input: &mut ByteReader<'_>,
    m: &mut Motor,
) -> Result<(), WalkError> {
    ctx.walk(input, &mut m.velocity)?;
    ctx.walk(input, &mut m.heading)
}

fn serialize_actor(
    ctx: &mut SerializeContext<'_>,
    out: &mut ByteWriter,
    a: &Actor,
) -> Result<(), WalkError> {
    ctx.walk(out, &a.name)?;
    ctx.walk(out, &a.x)?;
    ctx.walk(out, &a.y)?;
    ctx.walk(out, &a.definition)?;
    ctx.walk(out, &a.target)?;
    ctx.walk(out, &a.tags)?;
    ctx.walk(out, &a.inventory)?;
    ctx.walk(out, &a.components)
}

fn deserialize_actor(
    ctx: &mut DeserializeContext<'_>,
    input: &mut ByteReader<'_>,
    a: &mut Actor,
) -> Result<(), WalkError> {
    ctx.walk(input, &mut a.name)?;
    ctx.walk(input, &mut a.x)?;
    ctx.walk(input, &mut a.y)?;
    ctx.walk(input, &mut a.definition)?;
    ctx.walk(input, &mut a.target)?;
    ctx.walk(input, &mut a.tags)?;
    ctx.walk(input, &mut a.inventory)?;
    ctx.walk(input, &mut a.components)
}

fn serialize_world(
    ctx: &mut SerializeContext<'_>,
    out: &mut ByteWriter,
    w: &World,
) -> Result<(), WalkError> {
    ctx.walk(out, &w.tick)?;
    ctx.walk(out, &w.settings)?;
    ctx.walk(out, &w.definition)?;
    ctx.walk(out, &w.actors)
}

fn deserialize_world(
    ctx: &mut DeserializeContext<'_>,
    input: &mut ByteReader<'_>,
    w: &mut World,
) -> Result<(), WalkError> {
    ctx.walk(input, &mut w.tick)?;
    ctx.walk(input, &mut w.settings)?;
    ctx.walk(input, &mut w.definition)?;
    ctx.walk(input, &mut w.actors)
}

// ===========================================================================
// Registry
// ===========================================================================

/// Builder with every sample type registered and `World` declared as root.
pub fn sample_builder() -> Result<RegistryBuilder, RegistryError> {
    let mut b = RegistryBuilder::with_builtins();

    b.register_serde::<Settings>()?;

    b.register(
        TypeHandler::<Definition>::new()
            .named("sample::Definition")
            .initializer(Definition::default)
            .serializer(serialize_definition)
            .deserializer(deserialize_definition)
            .depends_on::<String>()
            .depends_on::<u32>()
            .depends_on::<Fixed64>(),
    )?;
    b.register_shared::<Definition>()?;

    b.register(
        TypeHandler::<Health>::new()
            .named("sample::Health")
            .initializer(Health::default)
            .serializer(serialize_health)
            .deserializer(deserialize_health)
            .depends_on::<u32>()
            .depends_on::<Fixed32>(),
    )?;
    b.register_shared::<Health>()?;

    b.register(
        TypeHandler::<Motor>::new()
            .named("sample::Motor")
            .initializer(Motor::default)
            .serializer(serialize_motor)
            .deserializer(deserialize_motor)
            .depends_on::<Fixed64>()
            .depends_on::<i16>(),
    )?;
    b.register_shared::<Motor>()?;

    b.register(
        TypeHandler::<Actor>::new()
            .named("sample::Actor")
            .initializer(Actor::default)
            .serializer(serialize_actor)
            .deserializer(deserialize_actor)
            .depends_on::<String>()
            .depends_on::<Fixed64>()
            .depends_on::<Shared<Definition>>()
            .depends_on::<Option<Shared<Actor>>>()
            .depends_on::<BTreeSet<String>>()
            .depends_on::<BTreeMap<String, u32>>()
            .depends_on::<Vec<AnyShared>>(),
    )?;
    b.register_shared::<Actor>()?;
    b.register_option::<Shared<Actor>>()?;
    b.register_btree_set::<String>()?;
    b.register_btree_map::<String, u32>()?;
    b.register_vec::<AnyShared>()?;

    b.register(
        TypeHandler::<World>::new()
            .named("sample::World")
            .initializer(World::default)
            .serializer(serialize_world)
            .deserializer(deserialize_world)
            .depends_on::<u64>()
            .depends_on::<Settings>()
            .depends_on::<Shared<Definition>>()
            .depends_on::<Vec<Shared<Actor>>>(),
    )?;
    b.register_vec::<Shared<Actor>>()?;

    b.declare_root::<World>();
    Ok(b)
}

pub fn sample_registry() -> Result<Registry, RegistryError> {
    sample_builder()?.build()
}

// ===========================================================================
// Sample state
// ===========================================================================

pub fn make_actor(name: &str, definition: &Shared<Definition>, x: f64, y: f64) -> Shared<Actor> {
    new_shared(Actor {
        name: name.to_string(),
        x: fixed(x),
        y: fixed(y),
        definition: Rc::clone(definition),
        ..Actor::default()
    })
}

/// Three actors over one definition. `alice` and `bob` target each other;
/// `alice` and `carol` share one `Health` component.
pub fn sample_world() -> World {
    let definition = new_shared(Definition {
        name: "grunt".to_string(),
        max_health: 100,
        speed: fixed(1.5),
    });

    let alice = make_actor("alice", &definition, 0.0, 0.0);
    let bob = make_actor("bob", &definition, 3.25, -1.0);
    let carol = make_actor("carol", &definition, -8.5, 2.0);

    alice.borrow_mut().target = Some(Rc::clone(&bob));
    bob.borrow_mut().target = Some(Rc::clone(&alice));

    let shared_health = into_any(new_shared(Health {
        current: 80,
        regen: fixed32(0.25),
    }));
    let motor = into_any(new_shared(Motor {
        velocity: fixed(2.0),
        heading: -90,
    }));

    {
        let mut a = alice.borrow_mut();
        a.tags.insert("leader".to_string());
        a.tags.insert("armed".to_string());
        a.inventory.insert("ammo".to_string(), 30);
        a.inventory.insert("medkit".to_string(), 1);
        a.components.push(Rc::clone(&shared_health));
    }
    {
        let mut b = bob.borrow_mut();
        b.tags.insert("scout".to_string());
        b.components.push(motor);
    }
    carol.borrow_mut().components.push(shared_health);

    World {
        tick: 120,
        settings: Settings {
            seed: 0xDEAD_BEEF,
            difficulty: 2,
            label: "skirmish".to_string(),
        },
        definition,
        actors: vec![alice, bob, carol],
    }
}

/// Break actor target cycles so the `Rc` graph can be freed.
pub fn release_world(world: &World) {
    for actor in &world.actors {
        if let Ok(mut a) = actor.try_borrow_mut() {
            a.target = None;
        }
    }
}

/// Actor names in order.
pub fn actor_names(world: &World) -> Vec<String> {
    world
        .actors
        .iter()
        .map(|a| a.borrow().name.clone())
        .collect()
}
