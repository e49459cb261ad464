//! Determinism guard for hash-ordered containers.
//!
//! `HashMap` and `HashSet` iterate in an order that depends on a per-process
//! random seed, so two runs over equal state would produce different bytes.
//! Their instantiations are registered with handlers that fail every
//! operation and name the ordered alternative. Registering the guard (rather
//! than leaving the type unregistered) makes the error say what to use
//! instead, and lets `build` reject roots that reach one.

use std::any::{Any, type_name};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::codec::{ByteReader, ByteWriter};
use crate::id::TypeKey;
use crate::registry::{ErasedHandler, HandlerKind, Registry, RegistryBuilder, RegistryError};
use crate::serialize::{DeserializeContext, Operation, SerializeContext, WalkError};

impl RegistryBuilder {
    /// Guard `HashMap<K, V>`. Idempotent; fails only if a real handler is
    /// already registered for that type.
    pub fn guard_hash_map<K: 'static, V: 'static>(&mut self) -> Result<(), RegistryError> {
        self.install_guard::<HashMap<K, V>>(type_name::<BTreeMap<K, V>>())
    }

    /// Guard `HashSet<T>`.
    pub fn guard_hash_set<T: 'static>(&mut self) -> Result<(), RegistryError> {
        self.install_guard::<HashSet<T>>(type_name::<BTreeSet<T>>())
    }

    fn install_guard<C: 'static>(&mut self, alternative: &'static str) -> Result<(), RegistryError> {
        let key = TypeKey::of::<C>();
        if let Some(existing) = self.handlers.get(&key.type_id()) {
            return match existing.kind() {
                HandlerKind::Guard { .. } => Ok(()),
                _ => Err(RegistryError::Nondeterministic {
                    container: key.name(),
                    required_by: existing.name(),
                    alternative,
                }),
            };
        }
        self.insert(guard_handler(key, alternative))
    }
}

fn refuse(container: &'static str, alternative: &'static str, operation: Operation) -> WalkError {
    tracing::warn!(container, alternative, %operation, "refused nondeterministic container");
    WalkError::Nondeterministic {
        container,
        alternative,
        operation,
    }
}

fn guard_handler(key: TypeKey, alternative: &'static str) -> ErasedHandler {
    let container = key.name();
    ErasedHandler {
        key,
        name: container,
        kind: HandlerKind::Guard { alternative },
        dependencies: Vec::new(),
        initialize: Some(Box::new(
            move |_: &Registry| -> Result<Box<dyn Any>, WalkError> {
                Err(refuse(container, alternative, Operation::Initialize))
            },
        )),
        serialize: Some(Box::new(
            move |_: &mut SerializeContext<'_>,
                  _: &mut ByteWriter,
                  _: &dyn Any|
                  -> Result<(), WalkError> {
                Err(refuse(container, alternative, Operation::Serialize))
            },
        )),
        deserialize: Some(Box::new(
            move |_: &mut DeserializeContext<'_>,
                  _: &mut ByteReader<'_>,
                  _: &mut dyn Any|
                  -> Result<(), WalkError> {
                Err(refuse(container, alternative, Operation::Deserialize))
            },
        )),
    }
}
