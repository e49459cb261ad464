//! Record/playback example: a tiny simulation captured as a loop file.
//!
//! Registers two types, steps a pair of units that chase each other, records
//! a snapshot every tick into a loop file, then plays the file back and
//! checks the chase cycle survived restoration.
//!
//! Run with: `RUST_LOG=debug cargo run -p rewind-core --example record_loop`

use std::rc::Rc;

use rewind_core::fixed::Fixed64;
use rewind_core::loop_record::{LoopReader, LoopWriter};
use rewind_core::replay::{LoopPlayback, LoopRecorder};
use rewind_core::shared::{Shared, new_shared};
use rewind_core::{
    ByteReader, ByteWriter, DeserializeContext, RegistryBuilder, SerializeContext, TypeHandler,
    WalkError,
};

#[derive(Default)]
struct Unit {
    name: String,
    position: Fixed64,
    chasing: Option<Shared<Unit>>,
}

#[derive(Default)]
struct Field {
    tick: u64,
    units: Vec<Shared<Unit>>,
}

fn write_unit(
    ctx: &mut SerializeContext<'_>,
    out: &mut ByteWriter,
    u: &Unit,
) -> Result<(), WalkError> {
    ctx.walk(out, &u.name)?;
    ctx.walk(out, &u.position)?;
    ctx.walk(out, &u.chasing)
}

fn read_unit(
    ctx: &mut DeserializeContext<'_>,
    input: &mut ByteReader<'_>,
    u: &mut Unit,
) -> Result<(), WalkError> {
    ctx.walk(input, &mut u.name)?;
    ctx.walk(input, &mut u.position)?;
    ctx.walk(input, &mut u.chasing)
}

fn write_field(
    ctx: &mut SerializeContext<'_>,
    out: &mut ByteWriter,
    f: &Field,
) -> Result<(), WalkError> {
    ctx.walk(out, &f.tick)?;
    ctx.walk(out, &f.units)
}

fn read_field(
    ctx: &mut DeserializeContext<'_>,
    input: &mut ByteReader<'_>,
    f: &mut Field,
) -> Result<(), WalkError> {
    ctx.walk(input, &mut f.tick)?;
    ctx.walk(input, &mut f.units)
}

fn release(field: &Field) {
    for unit in &field.units {
        unit.borrow_mut().chasing = None;
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // 1. Register types and freeze the registry.
    let mut builder = RegistryBuilder::with_builtins();
    builder.register(
        TypeHandler::<Unit>::new()
            .named("demo::Unit")
            .initializer(Unit::default)
            .serializer(write_unit)
            .deserializer(read_unit)
            .depends_on::<String>()
            .depends_on::<Fixed64>()
            .depends_on::<Option<Shared<Unit>>>(),
    )?;
    builder.register_shared::<Unit>()?;
    builder.register_option::<Shared<Unit>>()?;
    builder.register_vec::<Shared<Unit>>()?;
    builder.register(
        TypeHandler::<Field>::new()
            .named("demo::Field")
            .initializer(Field::default)
            .serializer(write_field)
            .deserializer(read_field)
            .depends_on::<u64>()
            .depends_on::<Vec<Shared<Unit>>>(),
    )?;
    builder.declare_root::<Field>();
    let registry = builder.build()?;
    println!("definition hash: {}", registry.definition_hash());

    // 2. Two units chasing each other.
    let fox = new_shared(Unit {
        name: "fox".to_string(),
        position: Fixed64::from_num(0),
        chasing: None,
    });
    let hare = new_shared(Unit {
        name: "hare".to_string(),
        position: Fixed64::from_num(5),
        chasing: Some(Rc::clone(&fox)),
    });
    fox.borrow_mut().chasing = Some(Rc::clone(&hare));
    let mut field = Field {
        tick: 0,
        units: vec![fox, hare],
    };

    // 3. Simulate and record one snapshot per tick.
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("chase.loop");
    let mut recorder = LoopRecorder::new(&registry, LoopWriter::create(&path)?, 4);
    let step = Fixed64::from_num(0.75);
    for _ in 0..5 {
        field.tick += 1;
        for unit in &field.units {
            let mut u = unit.borrow_mut();
            u.position += step;
        }
        let record = recorder.capture(format!("tick {}", field.tick), &field)?;
        println!("{}: {} payload bytes", record.comment, record.payload.len());
    }
    recorder.finish()?;
    release(&field);

    // 4. Play the loop back.
    let frames = LoopPlayback::new(&registry, LoopReader::open(&path)?).collect_frames::<Field>()?;
    for frame in &frames {
        let fox = &frame.root.units[0];
        let hare = &frame.root.units[1];
        let closed = fox
            .borrow()
            .chasing
            .as_ref()
            .is_some_and(|target| Rc::ptr_eq(target, hare));
        println!(
            "[{}] {} fox at {}, hare at {}, cycle intact: {closed}",
            frame.index,
            frame.comment,
            fox.borrow().position,
            hare.borrow().position,
        );
        release(&frame.root);
    }

    Ok(())
}
