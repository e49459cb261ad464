//! Built-in handlers and per-instantiation registration helpers.
//!
//! Primitives, `String`, fixed-point numbers and the polymorphic reference
//! handler are installed by [`RegistryBuilder::with_builtins`]. Generic
//! containers are never registered implicitly: every closed instantiation
//! that appears in a snapshot gets its own `register_*` call.

use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::codec::{ByteReader, ByteWriter};
use crate::fixed::{Fixed32, Fixed64};
use crate::id::{TypeKey, TypeTag};
use crate::ordered::{OrderError, check_order};
use crate::registry::{
    Dependency, ErasedHandler, HandlerKind, Registry, RegistryBuilder, RegistryError,
    SharedEntry, TypeHandler, downcast_mut, downcast_ref,
};
use crate::serialize::{DeserializeContext, Marker, Operation, SerializeContext, WalkError};
use crate::shared::{AnyShared, Shared, new_shared};

macro_rules! primitive {
    ($builder:expr, $ty:ty, $write:ident, $read:ident) => {
        builtin(
            $builder,
            TypeHandler::<$ty>::new()
                .initializer(<$ty>::default)
                .serializer(|_, out, v| {
                    out.$write(*v);
                    Ok(())
                })
                .deserializer(|_, input, v| {
                    *v = input.$read()?;
                    Ok(())
                }),
        );
    };
}

fn builtin<T: 'static>(builder: &mut RegistryBuilder, handler: TypeHandler<T>) {
    builder
        .handlers
        .insert(TypeId::of::<T>(), handler.erase());
}

pub(crate) fn install(builder: &mut RegistryBuilder) {
    primitive!(builder, bool, write_bool, read_bool);
    primitive!(builder, u8, write_u8, read_u8);
    primitive!(builder, u16, write_u16, read_u16);
    primitive!(builder, u32, write_u32, read_u32);
    primitive!(builder, u64, write_u64, read_u64);
    primitive!(builder, i8, write_i8, read_i8);
    primitive!(builder, i16, write_i16, read_i16);
    primitive!(builder, i32, write_i32, read_i32);
    primitive!(builder, i64, write_i64, read_i64);
    primitive!(builder, f32, write_f32, read_f32);
    primitive!(builder, f64, write_f64, read_f64);

    // usize is platform sized; the wire always carries 64 bits.
    builtin(
        builder,
        TypeHandler::<usize>::new()
            .initializer(usize::default)
            .serializer(|_, out, v| {
                out.write_u64(*v as u64);
                Ok(())
            })
            .deserializer(|_, input, v| {
                let raw = input.read_u64()?;
                *v = usize::try_from(raw).map_err(|_| WalkError::OutOfRange {
                    value: raw,
                    target: "usize",
                })?;
                Ok(())
            }),
    );

    builtin(
        builder,
        TypeHandler::<()>::new()
            .initializer(<()>::default)
            .serializer(|_, _, _| Ok(()))
            .deserializer(|_, _, _| Ok(())),
    );

    builtin(
        builder,
        TypeHandler::<String>::new()
            .initializer(String::new)
            .serializer(|_, out, v| out.write_str(v))
            .deserializer(|_, input, v| {
                let s = input.read_str()?;
                v.clear();
                v.push_str(s);
                Ok(())
            }),
    );

    builtin(
        builder,
        TypeHandler::<Fixed64>::new()
            .initializer(Fixed64::default)
            .serializer(|_, out, v| {
                out.write_i64(v.to_bits());
                Ok(())
            })
            .deserializer(|_, input, v| {
                *v = Fixed64::from_bits(input.read_i64()?);
                Ok(())
            }),
    );

    builtin(
        builder,
        TypeHandler::<Fixed32>::new()
            .initializer(Fixed32::default)
            .serializer(|_, out, v| {
                out.write_i32(v.to_bits());
                Ok(())
            })
            .deserializer(|_, input, v| {
                *v = Fixed32::from_bits(input.read_i32()?);
                Ok(())
            }),
    );

    builder
        .handlers
        .insert(TypeId::of::<AnyShared>(), any_shared_handler());
}

// ---------------------------------------------------------------------------
// Generic containers
// ---------------------------------------------------------------------------

impl RegistryBuilder {
    /// `Vec<T>`: `u32` length, then each element in order.
    pub fn register_vec<T: 'static>(&mut self) -> Result<(), RegistryError> {
        self.register(
            TypeHandler::<Vec<T>>::new()
                .initializer(Vec::new)
                .serializer(|ctx, out, items| {
                    out.write_len(items.len())?;
                    for item in items {
                        ctx.walk(out, item)?;
                    }
                    Ok(())
                })
                .deserializer(|ctx, input, items| {
                    let len = input.read_len()?;
                    items.clear();
                    for _ in 0..len {
                        items.push(ctx.read::<T>(input)?);
                    }
                    Ok(())
                })
                .creates::<T>(),
        )
    }

    /// `Option<T>`: presence byte, then the value if present.
    pub fn register_option<T: 'static>(&mut self) -> Result<(), RegistryError> {
        self.register(
            TypeHandler::<Option<T>>::new()
                .initializer(|| None)
                .serializer(|ctx, out, value| match value {
                    None => {
                        out.write_u8(0);
                        Ok(())
                    }
                    Some(inner) => {
                        out.write_u8(1);
                        ctx.walk(out, inner)
                    }
                })
                .deserializer(|ctx, input, value| {
                    *value = match input.read_u8()? {
                        0 => None,
                        1 => Some(ctx.read::<T>(input)?),
                        tag => {
                            return Err(WalkError::InvalidTag {
                                what: "option",
                                tag,
                            });
                        }
                    };
                    Ok(())
                })
                .creates::<T>(),
        )
    }

    /// `BTreeMap<K, V>`: `u32` length, then key/value pairs in key order.
    /// Also guards `HashMap<K, V>`, pointing callers here.
    pub fn register_btree_map<K, V>(&mut self) -> Result<(), RegistryError>
    where
        K: Ord + 'static,
        V: 'static,
    {
        self.register(
            TypeHandler::<BTreeMap<K, V>>::new()
                .initializer(BTreeMap::new)
                .serializer(|ctx, out, map| {
                    out.write_len(map.len())?;
                    for (key, value) in map {
                        ctx.walk(out, key)?;
                        ctx.walk(out, value)?;
                    }
                    Ok(())
                })
                .deserializer(|ctx, input, map| {
                    let len = input.read_len()?;
                    map.clear();
                    for _ in 0..len {
                        let key = ctx.read::<K>(input)?;
                        // One canonical encoding per value: keys strictly ascending.
                        if let Some((last, _)) = map.last_key_value()
                            && *last >= key
                        {
                            return Err(WalkError::UnorderedKeys {
                                container: std::any::type_name::<BTreeMap<K, V>>(),
                            });
                        }
                        let value = ctx.read::<V>(input)?;
                        map.insert(key, value);
                    }
                    Ok(())
                })
                .creates::<K>()
                .creates::<V>(),
        )?;
        self.guard_hash_map::<K, V>()
    }

    /// `BTreeSet<T>`: `u32` length, then elements in order.
    /// Also guards `HashSet<T>`.
    pub fn register_btree_set<T>(&mut self) -> Result<(), RegistryError>
    where
        T: Ord + 'static,
    {
        self.register(
            TypeHandler::<BTreeSet<T>>::new()
                .initializer(BTreeSet::new)
                .serializer(|ctx, out, set| {
                    out.write_len(set.len())?;
                    for item in set {
                        ctx.walk(out, item)?;
                    }
                    Ok(())
                })
                .deserializer(|ctx, input, set| {
                    let len = input.read_len()?;
                    set.clear();
                    for _ in 0..len {
                        let item = ctx.read::<T>(input)?;
                        if let Some(last) = set.last()
                            && *last >= item
                        {
                            return Err(WalkError::UnorderedKeys {
                                container: std::any::type_name::<BTreeSet<T>>(),
                            });
                        }
                        set.insert(item);
                    }
                    Ok(())
                })
                .creates::<T>(),
        )?;
        self.guard_hash_set::<T>()
    }

    /// Plain data encoded through `bitcode` as one length-prefixed blob. For
    /// leaf types with no shared references inside.
    ///
    /// Every map inside `T` must yield its keys in ascending order, so use
    /// `BTreeMap`. A `HashMap` is refused with
    /// [`WalkError::Nondeterministic`] when it is written. Sets reach serde
    /// as plain sequences and are not checked: use `BTreeSet`, never
    /// `HashSet`, inside a serde type.
    pub fn register_serde<T>(&mut self) -> Result<(), RegistryError>
    where
        T: Serialize + DeserializeOwned + Default + 'static,
    {
        self.register(
            TypeHandler::<T>::new()
                .initializer(T::default)
                .serializer(|_, out, value| {
                    check_order(value).map_err(|e| match e {
                        OrderError::Unordered => {
                            tracing::warn!(
                                container = std::any::type_name::<T>(),
                                "refused serde value with unordered map"
                            );
                            WalkError::Nondeterministic {
                                container: std::any::type_name::<T>(),
                                alternative: "BTreeMap",
                                operation: Operation::Serialize,
                            }
                        }
                        OrderError::Custom(msg) => WalkError::Codec(msg),
                    })?;
                    let bytes =
                        bitcode::serialize(value).map_err(|e| WalkError::Codec(e.to_string()))?;
                    out.write_bytes(&bytes)
                })
                .deserializer(|_, input, value| {
                    let bytes = input.read_bytes()?;
                    *value =
                        bitcode::deserialize(bytes).map_err(|e| WalkError::Codec(e.to_string()))?;
                    Ok(())
                }),
        )
    }

    /// `Shared<T>`: identity-tracked reference. Also makes `T` reachable
    /// through [`AnyShared`] under a stable type tag.
    pub fn register_shared<T: 'static>(&mut self) -> Result<(), RegistryError> {
        let handler = ErasedHandler {
            key: TypeKey::of::<Shared<T>>(),
            name: std::any::type_name::<Shared<T>>(),
            kind: HandlerKind::Shared,
            dependencies: vec![Dependency {
                key: TypeKey::of::<T>(),
                needs_initializer: true,
            }],
            // Placeholder; deserialization replaces it with the table's instance.
            initialize: Some(Box::new(
                |registry: &Registry| -> Result<Box<dyn Any>, WalkError> {
                    Ok(Box::new(new_shared(registry.initialize::<T>()?)))
                },
            )),
            serialize: Some(Box::new(
                |ctx: &mut SerializeContext<'_>,
                 out: &mut ByteWriter,
                 value: &dyn Any|
                 -> Result<(), WalkError> {
                    write_shared(ctx, out, downcast_ref::<Shared<T>>(value)?)
                },
            )),
            deserialize: Some(Box::new(
                |ctx: &mut DeserializeContext<'_>,
                 input: &mut ByteReader<'_>,
                 value: &mut dyn Any|
                 -> Result<(), WalkError> {
                    let restored = read_shared::<T>(ctx, input)?;
                    *downcast_mut::<Shared<T>>(value)? = restored;
                    Ok(())
                },
            )),
        };
        self.insert(handler)?;

        self.shared.insert(
            TypeId::of::<RefCell<T>>(),
            SharedEntry {
                content: TypeKey::of::<T>(),
                name: std::any::type_name::<T>(),
                tag: TypeTag(0),
                create: Box::new(|registry: &Registry| -> Result<Rc<dyn Any>, WalkError> {
                    Ok(new_shared(registry.initialize::<T>()?))
                }),
                serialize_cell: Box::new(
                    |ctx: &mut SerializeContext<'_>,
                     out: &mut ByteWriter,
                     cell: &dyn Any|
                     -> Result<(), WalkError> {
                        let inner = downcast_ref::<RefCell<T>>(cell)?
                            .try_borrow()
                            .map_err(|_| borrowed::<T>())?;
                        ctx.walk(out, &*inner)
                    },
                ),
                deserialize_cell: Box::new(
                    |ctx: &mut DeserializeContext<'_>,
                     input: &mut ByteReader<'_>,
                     cell: &dyn Any|
                     -> Result<(), WalkError> {
                        let mut inner = downcast_ref::<RefCell<T>>(cell)?
                            .try_borrow_mut()
                            .map_err(|_| borrowed::<T>())?;
                        ctx.walk(input, &mut *inner)
                    },
                ),
            },
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Reference handlers
// ---------------------------------------------------------------------------

fn borrowed<T: 'static>() -> WalkError {
    WalkError::AlreadyBorrowed {
        type_name: std::any::type_name::<T>(),
    }
}

fn write_shared<T: 'static>(
    ctx: &mut SerializeContext<'_>,
    out: &mut ByteWriter,
    shared: &Shared<T>,
) -> Result<(), WalkError> {
    let object: Rc<dyn Any> = shared.clone();
    if ctx.write_marker(out, &object)? {
        let inner = shared.try_borrow().map_err(|_| borrowed::<T>())?;
        ctx.descend(|ctx| ctx.walk(out, &*inner))?;
    }
    Ok(())
}

fn read_shared<T: 'static>(
    ctx: &mut DeserializeContext<'_>,
    input: &mut ByteReader<'_>,
) -> Result<Shared<T>, WalkError> {
    match ctx.read_marker(input)? {
        Marker::Existing(id, object) => {
            object
                .downcast::<RefCell<T>>()
                .map_err(|_| WalkError::ReferenceTypeMismatch {
                    id: id.0,
                    expected: std::any::type_name::<T>(),
                })
        }
        Marker::New(id) => {
            let shared = new_shared(ctx.initialize::<T>()?);
            ctx.bind(id, shared.clone())?;
            {
                let mut inner = shared.try_borrow_mut().map_err(|_| borrowed::<T>())?;
                ctx.descend(|ctx| ctx.walk(input, &mut *inner))?;
            }
            Ok(shared)
        }
    }
}

/// Handler for [`AnyShared`]. The first occurrence carries the type tag of
/// the concrete type so the reader can build the right instance.
fn any_shared_handler() -> ErasedHandler {
    ErasedHandler {
        key: TypeKey::of::<AnyShared>(),
        name: "AnyShared",
        kind: HandlerKind::Polymorphic,
        dependencies: Vec::new(),
        // Placeholder; deserialization replaces it.
        initialize: Some(Box::new(
            |_: &Registry| -> Result<Box<dyn Any>, WalkError> {
                let placeholder: AnyShared = Rc::new(());
                Ok(Box::new(placeholder))
            },
        )),
        serialize: Some(Box::new(
            |ctx: &mut SerializeContext<'_>,
             out: &mut ByteWriter,
             value: &dyn Any|
             -> Result<(), WalkError> {
                let object = downcast_ref::<AnyShared>(value)?;
                let registry = ctx.registry();
                let concrete = (**object).type_id();
                let entry = registry
                    .shared_for(concrete)
                    .ok_or(WalkError::UnregisteredShared(concrete))?;
                if ctx.write_marker(out, object)? {
                    out.write_u32(entry.tag.0);
                    ctx.descend(|ctx| (entry.serialize_cell)(ctx, out, &**object))?;
                }
                Ok(())
            },
        )),
        deserialize: Some(Box::new(
            |ctx: &mut DeserializeContext<'_>,
             input: &mut ByteReader<'_>,
             value: &mut dyn Any|
             -> Result<(), WalkError> {
                let restored = match ctx.read_marker(input)? {
                    Marker::Existing(_, object) => object,
                    Marker::New(id) => {
                        let tag = input.read_u32()?;
                        let registry = ctx.registry();
                        let entry = registry
                            .shared_by_tag(TypeTag(tag))
                            .ok_or(WalkError::UnknownTypeTag(tag))?;
                        tracing::trace!(id = id.0, tag, content = %entry.content, "polymorphic reference");
                        let object = (entry.create)(registry)?;
                        ctx.bind(id, Rc::clone(&object))?;
                        ctx.descend(|ctx| (entry.deserialize_cell)(ctx, input, &*object))?;
                        object
                    }
                };
                *downcast_mut::<AnyShared>(value)? = restored;
                Ok(())
            },
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::f64_to_fixed64;
    use crate::serialize::{restore, snapshot};
    use crate::shared::{downcast_shared, into_any};
    use std::collections::{HashMap, HashSet};

    fn round_trip<T: 'static>(registry: &Registry, value: &T) -> T {
        let bytes = snapshot(registry, value).unwrap();
        restore(registry, &bytes).unwrap()
    }

    #[test]
    fn primitives_round_trip() {
        let reg = RegistryBuilder::with_builtins().build().unwrap();
        assert!(round_trip(&reg, &true));
        assert_eq!(round_trip(&reg, &-7i8), -7);
        assert_eq!(round_trip(&reg, &u64::MAX), u64::MAX);
        assert_eq!(round_trip(&reg, &1.25f32), 1.25);
        assert_eq!(round_trip(&reg, &12345usize), 12345);
        assert_eq!(round_trip(&reg, &"héllo".to_string()), "héllo");
        assert_eq!(round_trip(&reg, &f64_to_fixed64(-2.5)), f64_to_fixed64(-2.5));
    }

    #[test]
    fn fixed64_written_as_raw_bits() {
        let reg = RegistryBuilder::with_builtins().build().unwrap();
        let one = f64_to_fixed64(1.0);
        let bytes = snapshot(&reg, &one).unwrap();
        assert_eq!(bytes, (1i64 << 32).to_le_bytes());
    }

    #[test]
    fn option_and_vec_round_trip() {
        let mut b = RegistryBuilder::with_builtins();
        b.register_option::<String>().unwrap();
        b.register_vec::<Option<String>>().unwrap();
        let reg = b.build().unwrap();

        let value = vec![Some("a".to_string()), None, Some(String::new())];
        assert_eq!(round_trip(&reg, &value), value);
    }

    #[test]
    fn invalid_option_tag_rejected() {
        let mut b = RegistryBuilder::with_builtins();
        b.register_option::<u8>().unwrap();
        let reg = b.build().unwrap();
        assert!(matches!(
            restore::<Option<u8>>(&reg, &[2, 0]),
            Err(WalkError::InvalidTag { what: "option", tag: 2 })
        ));
    }

    #[test]
    fn btree_map_written_in_key_order() {
        let mut b = RegistryBuilder::with_builtins();
        b.register_btree_map::<u8, u8>().unwrap();
        let reg = b.build().unwrap();

        let mut map = BTreeMap::new();
        map.insert(3u8, 30u8);
        map.insert(1, 10);
        map.insert(2, 20);
        let bytes = snapshot(&reg, &map).unwrap();
        assert_eq!(bytes, vec![3, 0, 0, 0, 1, 10, 2, 20, 3, 30]);
        assert_eq!(round_trip(&reg, &map), map);
    }

    #[test]
    fn btree_map_rejects_unordered_keys() {
        let mut b = RegistryBuilder::with_builtins();
        b.register_btree_map::<u8, u8>().unwrap();
        let reg = b.build().unwrap();
        let bytes = [2, 0, 0, 0, 5, 0, 4, 0];
        assert!(matches!(
            restore::<BTreeMap<u8, u8>>(&reg, &bytes),
            Err(WalkError::UnorderedKeys { .. })
        ));
    }

    #[test]
    fn btree_set_rejects_duplicates() {
        let mut b = RegistryBuilder::with_builtins();
        b.register_btree_set::<u8>().unwrap();
        let reg = b.build().unwrap();
        let bytes = [2, 0, 0, 0, 5, 5];
        assert!(matches!(
            restore::<BTreeSet<u8>>(&reg, &bytes),
            Err(WalkError::UnorderedKeys { .. })
        ));
    }

    #[derive(Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Settings {
        difficulty: u8,
        label: String,
    }

    #[test]
    fn serde_bridge_round_trip() {
        let mut b = RegistryBuilder::with_builtins();
        b.register_serde::<Settings>().unwrap();
        let reg = b.build().unwrap();
        let settings = Settings {
            difficulty: 3,
            label: "hard".into(),
        };
        assert_eq!(round_trip(&reg, &settings), settings);
    }

    #[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
    struct Scores {
        by_id: HashMap<u32, u32>,
    }

    #[derive(Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
    struct OrderedScores {
        by_id: BTreeMap<u32, u32>,
    }

    #[test]
    fn serde_bridge_refuses_hash_map() {
        let mut b = RegistryBuilder::with_builtins();
        b.register_serde::<Scores>().unwrap();
        let reg = b.build().unwrap();
        let scores = Scores {
            by_id: (0..64).map(|i| (i, i * 10)).collect(),
        };
        let err = snapshot(&reg, &scores).unwrap_err();
        assert!(matches!(
            err,
            WalkError::Nondeterministic {
                alternative: "BTreeMap",
                operation: Operation::Serialize,
                ..
            }
        ));
    }

    #[test]
    fn serde_bridge_accepts_btree_map() {
        let mut b = RegistryBuilder::with_builtins();
        b.register_serde::<OrderedScores>().unwrap();
        let reg = b.build().unwrap();
        let scores = OrderedScores {
            by_id: (0..64).map(|i| (i, i * 10)).collect(),
        };
        assert_eq!(round_trip(&reg, &scores), scores);
    }

    #[test]
    fn serde_bridge_rejects_garbage() {
        let mut b = RegistryBuilder::with_builtins();
        b.register_serde::<Settings>().unwrap();
        let reg = b.build().unwrap();
        let bytes = [3, 0, 0, 0, 0xFF, 0xFF, 0xFF];
        assert!(matches!(
            restore::<Settings>(&reg, &bytes),
            Err(WalkError::Codec(_))
        ));
    }

    #[test]
    fn polymorphic_reference_uses_runtime_type() {
        let mut b = RegistryBuilder::with_builtins();
        b.register_shared::<u32>().unwrap();
        b.register_shared::<String>().unwrap();
        b.register_vec::<AnyShared>().unwrap();
        let reg = b.build().unwrap();

        let number = into_any(new_shared(7u32));
        let text = into_any(new_shared("seven".to_string()));
        let list = vec![Rc::clone(&number), text, number];

        let restored = round_trip(&reg, &list);
        assert_eq!(*downcast_shared::<u32>(&restored[0]).unwrap().borrow(), 7);
        assert_eq!(
            *downcast_shared::<String>(&restored[1]).unwrap().borrow(),
            "seven"
        );
        assert!(crate::shared::same_object(&restored[0], &restored[2]));
    }

    #[test]
    fn type_tags_follow_name_order() {
        let mut a = RegistryBuilder::with_builtins();
        a.register_shared::<u32>().unwrap();
        a.register_shared::<String>().unwrap();
        let mut b = RegistryBuilder::with_builtins();
        b.register_shared::<String>().unwrap();
        b.register_shared::<u32>().unwrap();
        let (a, b) = (a.build().unwrap(), b.build().unwrap());
        assert_eq!(a.type_tag::<u32>(), b.type_tag::<u32>());
        assert_eq!(a.type_tag::<String>(), b.type_tag::<String>());
        assert_ne!(a.type_tag::<u32>(), a.type_tag::<String>());
    }

    #[test]
    fn polymorphic_reference_to_unregistered_type_fails() {
        let reg = RegistryBuilder::with_builtins().build().unwrap();
        let any = into_any(new_shared(1u16));
        assert!(matches!(
            snapshot(&reg, &any),
            Err(WalkError::UnregisteredShared(_))
        ));
    }

    #[test]
    fn unknown_type_tag_rejected() {
        let reg = RegistryBuilder::with_builtins().build().unwrap();
        let mut out = ByteWriter::new();
        out.write_u8(crate::serialize::NEW_REF);
        out.write_u32(0);
        out.write_u32(99);
        assert!(matches!(
            restore::<AnyShared>(&reg, out.as_bytes()),
            Err(WalkError::UnknownTypeTag(99))
        ));
    }

    struct Mixed {
        any: AnyShared,
        text: Shared<String>,
    }

    fn mixed_registry() -> Registry {
        let mut b = RegistryBuilder::with_builtins();
        b.register_shared::<u32>().unwrap();
        b.register_shared::<String>().unwrap();
        b.register(
            TypeHandler::<Mixed>::new()
                .initializer(|| Mixed {
                    any: Rc::new(()),
                    text: new_shared(String::new()),
                })
                .serializer(|ctx, out, m| {
                    ctx.walk(out, &m.any)?;
                    ctx.walk(out, &m.text)
                })
                .deserializer(|ctx, input, m| {
                    ctx.walk(input, &mut m.any)?;
                    ctx.walk(input, &mut m.text)
                }),
        )
        .unwrap();
        b.build().unwrap()
    }

    #[test]
    fn back_reference_to_wrong_type_rejected() {
        let reg = mixed_registry();
        let tag = reg.type_tag::<u32>().unwrap();

        // The polymorphic field creates a u32 as id 0; the String field then
        // back-references it.
        let mut out = ByteWriter::new();
        out.write_u8(crate::serialize::NEW_REF);
        out.write_u32(0);
        out.write_u32(tag.0);
        out.write_u32(5);
        out.write_u8(crate::serialize::BACK_REF);
        out.write_u32(0);

        assert!(matches!(
            restore::<Mixed>(&reg, out.as_bytes()),
            Err(WalkError::ReferenceTypeMismatch { id: 0, .. })
        ));
    }

    #[test]
    fn shared_and_polymorphic_fields_share_identity() {
        let reg = mixed_registry();
        let text = new_shared("same".to_string());
        let mixed = Mixed {
            any: into_any(Rc::clone(&text)),
            text,
        };
        let restored = round_trip(&reg, &mixed);
        let through_any = downcast_shared::<String>(&restored.any).unwrap();
        assert!(Rc::ptr_eq(&through_any, &restored.text));
        assert_eq!(*restored.text.borrow(), "same");
    }

    #[test]
    fn borrowed_shared_reports_error_instead_of_panicking() {
        let mut b = RegistryBuilder::with_builtins();
        b.register_shared::<u32>().unwrap();
        let reg = b.build().unwrap();
        let shared = new_shared(1u32);
        let _guard = shared.borrow_mut();
        assert!(matches!(
            snapshot(&reg, &shared),
            Err(WalkError::AlreadyBorrowed { .. })
        ));
    }

    #[test]
    fn shared_registration_records_dependency() {
        let mut b = RegistryBuilder::new();
        b.register_shared::<u32>().unwrap();
        b.declare_root::<Shared<u32>>();
        assert!(matches!(
            b.build(),
            Err(RegistryError::Unregistered { type_name: "u32", .. })
        ));
    }

    #[test]
    fn hash_containers_never_mix_with_ordered_ones() {
        let mut b = RegistryBuilder::with_builtins();
        b.register_btree_map::<u32, String>().unwrap();
        let reg = b.build().unwrap();
        assert!(reg.contains::<HashMap<u32, String>>());
        assert!(!reg.contains::<HashSet<u32>>());
    }
}
