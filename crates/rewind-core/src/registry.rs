//! Type serializer registry.
//!
//! Maps every concrete type that may appear in a snapshot to up to three
//! operations: initialize (produce an empty instance), serialize, and
//! deserialize in place. The registry is populated once by an explicit
//! registration pass and frozen by [`RegistryBuilder::build`]; after that it
//! is read-only and may be shared across threads.
//!
//! Lifecycle: register handlers -> declare roots -> build (validates every
//! type reachable from a root and computes the definition hash).

use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

use crate::codec::{ByteReader, ByteWriter};
use crate::hash::{DefinitionHash, DefinitionHasher};
use crate::id::{TypeKey, TypeTag};
use crate::serialize::{DeserializeContext, Operation, SerializeContext, WalkError};

// ---------------------------------------------------------------------------
// Typed handler signatures
// ---------------------------------------------------------------------------

/// Produces a new, empty instance.
pub type InitializeFn<T> = fn() -> T;

/// Writes an instance. May call [`SerializeContext::walk`] for nested fields.
pub type SerializeFn<T> =
    fn(&mut SerializeContext<'_>, &mut ByteWriter, &T) -> Result<(), WalkError>;

/// Populates an existing instance. May call [`DeserializeContext::walk`].
pub type DeserializeFn<T> =
    fn(&mut DeserializeContext<'_>, &mut ByteReader<'_>, &mut T) -> Result<(), WalkError>;

pub(crate) type ErasedInit =
    Box<dyn Fn(&Registry) -> Result<Box<dyn Any>, WalkError> + Send + Sync>;
pub(crate) type ErasedSerialize = Box<
    dyn Fn(&mut SerializeContext<'_>, &mut ByteWriter, &dyn Any) -> Result<(), WalkError>
        + Send
        + Sync,
>;
pub(crate) type ErasedDeserialize = Box<
    dyn Fn(&mut DeserializeContext<'_>, &mut ByteReader<'_>, &mut dyn Any) -> Result<(), WalkError>
        + Send
        + Sync,
>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Configuration errors detected while registering or building.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("type {type_name} is already registered")]
    Duplicate { type_name: &'static str },
    #[error("type {type_name} (required by {required_by}) is not registered")]
    Unregistered {
        type_name: &'static str,
        required_by: &'static str,
    },
    #[error("type {type_name} (required by {required_by}) has no {operation} operation")]
    MissingOperation {
        type_name: &'static str,
        required_by: &'static str,
        operation: Operation,
    },
    #[error(
        "{container} (required by {required_by}) has nondeterministic iteration order; use {alternative}"
    )]
    Nondeterministic {
        container: &'static str,
        required_by: &'static str,
        alternative: &'static str,
    },
    #[error("stable name {name} is used by both {first} and {second}")]
    DuplicateName {
        name: &'static str,
        first: &'static str,
        second: &'static str,
    },
}

// ---------------------------------------------------------------------------
// TypeHandler
// ---------------------------------------------------------------------------

/// A nested type a handler walks, recorded for eager validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dependency {
    pub key: TypeKey,
    /// Whether the handler creates fresh instances of the dependency (element
    /// of a sequence, referenced object) rather than filling a field in place.
    pub needs_initializer: bool,
}

/// What kind of entry a handler is. Drives validation and the definition hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    /// Plain data, walked in place.
    Value,
    /// `Shared<T>`: identity-tracked reference to a statically known type.
    Shared,
    /// `AnyShared`: identity-tracked reference resolved by runtime type.
    Polymorphic,
    /// Handle to externally managed content, written as a path.
    Asset,
    /// Determinism guard: every operation fails.
    Guard { alternative: &'static str },
}

impl HandlerKind {
    fn code(&self) -> u8 {
        match self {
            HandlerKind::Value => 0,
            HandlerKind::Shared => 1,
            HandlerKind::Polymorphic => 2,
            HandlerKind::Asset => 3,
            HandlerKind::Guard { .. } => 4,
        }
    }
}

/// Typed registration for one concrete type. All three operations are
/// optional; a missing operation fails when it is first needed.
///
/// ```rust,ignore
/// builder.register(
///     TypeHandler::<Actor>::new()
///         .initializer(Actor::default)
///         .serializer(serialize_actor)
///         .deserializer(deserialize_actor)
///         .depends_on::<String>(),
/// )?;
/// ```
pub struct TypeHandler<T> {
    name: &'static str,
    initialize: Option<InitializeFn<T>>,
    serialize: Option<SerializeFn<T>>,
    deserialize: Option<DeserializeFn<T>>,
    dependencies: Vec<Dependency>,
}

impl<T: 'static> TypeHandler<T> {
    pub fn new() -> Self {
        Self {
            name: std::any::type_name::<T>(),
            initialize: None,
            serialize: None,
            deserialize: None,
            dependencies: Vec::new(),
        }
    }

    /// Override the stable name used in the definition hash and in errors.
    pub fn named(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    pub fn initializer(mut self, f: InitializeFn<T>) -> Self {
        self.initialize = Some(f);
        self
    }

    pub fn serializer(mut self, f: SerializeFn<T>) -> Self {
        self.serialize = Some(f);
        self
    }

    pub fn deserializer(mut self, f: DeserializeFn<T>) -> Self {
        self.deserialize = Some(f);
        self
    }

    /// Record that this type walks a field of type `U` in place.
    pub fn depends_on<U: 'static>(mut self) -> Self {
        self.dependencies.push(Dependency {
            key: TypeKey::of::<U>(),
            needs_initializer: false,
        });
        self
    }

    /// Record that this type creates fresh instances of `U` while
    /// deserializing (sequence elements, optional values, map entries).
    pub fn creates<U: 'static>(mut self) -> Self {
        self.dependencies.push(Dependency {
            key: TypeKey::of::<U>(),
            needs_initializer: true,
        });
        self
    }

    pub(crate) fn erase(self) -> ErasedHandler {
        let initialize = self.initialize.map(|f| -> ErasedInit {
            Box::new(move |_: &Registry| -> Result<Box<dyn Any>, WalkError> {
                Ok(Box::new(f()))
            })
        });
        let serialize = self.serialize.map(|f| -> ErasedSerialize {
            Box::new(
                move |ctx: &mut SerializeContext<'_>,
                      out: &mut ByteWriter,
                      value: &dyn Any|
                      -> Result<(), WalkError> { f(ctx, out, downcast_ref::<T>(value)?) },
            )
        });
        let deserialize = self.deserialize.map(|f| -> ErasedDeserialize {
            Box::new(
                move |ctx: &mut DeserializeContext<'_>,
                      input: &mut ByteReader<'_>,
                      value: &mut dyn Any|
                      -> Result<(), WalkError> { f(ctx, input, downcast_mut::<T>(value)?) },
            )
        });
        ErasedHandler {
            key: TypeKey::of::<T>(),
            name: self.name,
            kind: HandlerKind::Value,
            dependencies: self.dependencies,
            initialize,
            serialize,
            deserialize,
        }
    }
}

impl<T: 'static> Default for TypeHandler<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn downcast_ref<T: 'static>(value: &dyn Any) -> Result<&T, WalkError> {
    value.downcast_ref::<T>().ok_or(WalkError::TypeMismatch {
        expected: std::any::type_name::<T>(),
    })
}

pub(crate) fn downcast_mut<T: 'static>(value: &mut dyn Any) -> Result<&mut T, WalkError> {
    value.downcast_mut::<T>().ok_or(WalkError::TypeMismatch {
        expected: std::any::type_name::<T>(),
    })
}

// ---------------------------------------------------------------------------
// ErasedHandler
// ---------------------------------------------------------------------------

/// A registry entry with its operations erased to `dyn Any`.
pub struct ErasedHandler {
    pub(crate) key: TypeKey,
    pub(crate) name: &'static str,
    pub(crate) kind: HandlerKind,
    pub(crate) dependencies: Vec<Dependency>,
    pub(crate) initialize: Option<ErasedInit>,
    pub(crate) serialize: Option<ErasedSerialize>,
    pub(crate) deserialize: Option<ErasedDeserialize>,
}

impl ErasedHandler {
    pub fn key(&self) -> TypeKey {
        self.key
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn kind(&self) -> HandlerKind {
        self.kind
    }

    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    pub fn has_initializer(&self) -> bool {
        self.initialize.is_some()
    }

    pub fn has_serializer(&self) -> bool {
        self.serialize.is_some()
    }

    pub fn has_deserializer(&self) -> bool {
        self.deserialize.is_some()
    }

    fn missing(&self, operation: Operation) -> WalkError {
        WalkError::MissingOperation {
            type_name: self.name,
            operation,
        }
    }

    pub(crate) fn initialize(&self, registry: &Registry) -> Result<Box<dyn Any>, WalkError> {
        match &self.initialize {
            Some(f) => f(registry),
            None => Err(self.missing(Operation::Initialize)),
        }
    }

    pub(crate) fn serialize(
        &self,
        ctx: &mut SerializeContext<'_>,
        out: &mut ByteWriter,
        value: &dyn Any,
    ) -> Result<(), WalkError> {
        match &self.serialize {
            Some(f) => f(ctx, out, value),
            None => Err(self.missing(Operation::Serialize)),
        }
    }

    pub(crate) fn deserialize(
        &self,
        ctx: &mut DeserializeContext<'_>,
        input: &mut ByteReader<'_>,
        value: &mut dyn Any,
    ) -> Result<(), WalkError> {
        match &self.deserialize {
            Some(f) => f(ctx, input, value),
            None => Err(self.missing(Operation::Deserialize)),
        }
    }
}

impl fmt::Debug for ErasedHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErasedHandler")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("initialize", &self.has_initializer())
            .field("serialize", &self.has_serializer())
            .field("deserialize", &self.has_deserializer())
            .field("dependencies", &self.dependencies.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Shared entries (content operations reached through a reference)
// ---------------------------------------------------------------------------

pub(crate) type CreateShared =
    Box<dyn Fn(&Registry) -> Result<Rc<dyn Any>, WalkError> + Send + Sync>;
pub(crate) type SerializeCell = Box<
    dyn Fn(&mut SerializeContext<'_>, &mut ByteWriter, &dyn Any) -> Result<(), WalkError>
        + Send
        + Sync,
>;
pub(crate) type DeserializeCell = Box<
    dyn Fn(&mut DeserializeContext<'_>, &mut ByteReader<'_>, &dyn Any) -> Result<(), WalkError>
        + Send
        + Sync,
>;

/// Per shared type: how to create, write and fill the `RefCell<T>` behind a
/// type-erased reference. Keyed by the `TypeId` of `RefCell<T>`, which is the
/// concrete type an `AnyShared` reports at runtime.
pub(crate) struct SharedEntry {
    pub(crate) content: TypeKey,
    pub(crate) name: &'static str,
    pub(crate) tag: TypeTag,
    pub(crate) create: CreateShared,
    pub(crate) serialize_cell: SerializeCell,
    pub(crate) deserialize_cell: DeserializeCell,
}

// ---------------------------------------------------------------------------
// RegistryBuilder
// ---------------------------------------------------------------------------

/// Mutable registration phase. Consumed by [`RegistryBuilder::build`].
pub struct RegistryBuilder {
    pub(crate) handlers: HashMap<TypeId, ErasedHandler>,
    pub(crate) shared: HashMap<TypeId, SharedEntry>,
    roots: Vec<TypeKey>,
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryBuilder {
    /// An empty builder with no handlers at all.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            shared: HashMap::new(),
            roots: Vec::new(),
        }
    }

    /// A builder pre-populated with primitives, strings, fixed-point numbers
    /// and the polymorphic reference handler.
    pub fn with_builtins() -> Self {
        let mut builder = Self::new();
        crate::builtins::install(&mut builder);
        builder
    }

    /// Register a concrete type. Each type may be registered once.
    pub fn register<T: 'static>(&mut self, handler: TypeHandler<T>) -> Result<(), RegistryError> {
        self.insert(handler.erase())
    }

    pub(crate) fn insert(&mut self, handler: ErasedHandler) -> Result<(), RegistryError> {
        let id = handler.key.type_id();
        if self.handlers.contains_key(&id) {
            return Err(RegistryError::Duplicate {
                type_name: handler.name,
            });
        }
        self.handlers.insert(id, handler);
        Ok(())
    }

    pub fn contains<T: 'static>(&self) -> bool {
        self.handlers.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Declare a top-level snapshot type. `build` validates everything
    /// reachable from it.
    pub fn declare_root<T: 'static>(&mut self) -> &mut Self {
        let key = TypeKey::of::<T>();
        if !self.roots.contains(&key) {
            self.roots.push(key);
        }
        self
    }

    /// Validate declared roots, assign polymorphic type tags, compute the
    /// definition hash and freeze the registry.
    pub fn build(self) -> Result<Registry, RegistryError> {
        self.check_names()?;
        for root in &self.roots {
            self.validate_from(*root, "<root>")?;
        }
        // Content reachable only through `AnyShared` is never named by a
        // root, so check it here.
        let mut contents: Vec<&SharedEntry> = self.shared.values().collect();
        contents.sort_by_key(|entry| entry.name);
        for entry in contents {
            self.validate_from(entry.content, "AnyShared")?;
        }

        // Tags follow stable-name order so independent processes agree.
        let mut shared: Vec<(TypeId, SharedEntry)> = self.shared.into_iter().collect();
        shared.sort_by(|a, b| {
            stable_name(&self.handlers, a.1.content)
                .cmp(stable_name(&self.handlers, b.1.content))
                .then_with(|| a.1.name.cmp(b.1.name))
        });
        let mut tags = Vec::with_capacity(shared.len());
        let mut shared_map = HashMap::with_capacity(shared.len());
        for (index, (cell_id, mut entry)) in shared.into_iter().enumerate() {
            entry.tag = TypeTag(index as u32);
            tags.push(cell_id);
            shared_map.insert(cell_id, entry);
        }

        let definition_hash = definition_hash(&self.handlers);
        tracing::debug!(
            handlers = self.handlers.len(),
            shared = tags.len(),
            roots = self.roots.len(),
            %definition_hash,
            "registry built"
        );

        Ok(Registry {
            handlers: self.handlers,
            shared: shared_map,
            tags,
            roots: self.roots,
            definition_hash,
        })
    }

    /// Two handlers may not share a stable name: the definition hash and
    /// the polymorphic tags are both keyed by it.
    fn check_names(&self) -> Result<(), RegistryError> {
        let mut named: Vec<(&'static str, &'static str)> = self
            .handlers
            .values()
            .filter(|handler| handler.kind != HandlerKind::Shared)
            .map(|handler| (handler.name, handler.key.name()))
            .collect();
        named.sort_unstable();
        for pair in named.windows(2) {
            if pair[0].0 == pair[1].0 {
                return Err(RegistryError::DuplicateName {
                    name: pair[0].0,
                    first: pair[0].1,
                    second: pair[1].1,
                });
            }
        }
        Ok(())
    }

    fn validate_from(&self, root: TypeKey, required_by: &'static str) -> Result<(), RegistryError> {
        let mut visited: HashSet<TypeId> = HashSet::new();
        let mut stack = vec![(
            Dependency {
                key: root,
                needs_initializer: true,
            },
            required_by,
        )];

        while let Some((dep, required_by)) = stack.pop() {
            let handler = self.handlers.get(&dep.key.type_id()).ok_or(
                RegistryError::Unregistered {
                    type_name: dep.key.name(),
                    required_by,
                },
            )?;

            if let HandlerKind::Guard { alternative } = handler.kind {
                return Err(RegistryError::Nondeterministic {
                    container: handler.name,
                    required_by,
                    alternative,
                });
            }
            if dep.needs_initializer && !handler.has_initializer() {
                return Err(self.missing(handler, required_by, Operation::Initialize));
            }
            if !visited.insert(dep.key.type_id()) {
                continue;
            }
            if !handler.has_serializer() {
                return Err(self.missing(handler, required_by, Operation::Serialize));
            }
            if !handler.has_deserializer() {
                return Err(self.missing(handler, required_by, Operation::Deserialize));
            }
            for nested in &handler.dependencies {
                stack.push((*nested, handler.name));
            }
        }
        Ok(())
    }

    fn missing(
        &self,
        handler: &ErasedHandler,
        required_by: &'static str,
        operation: Operation,
    ) -> RegistryError {
        RegistryError::MissingOperation {
            type_name: handler.name,
            required_by,
            operation,
        }
    }
}

impl fmt::Debug for RegistryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryBuilder")
            .field("handlers", &self.handlers.len())
            .field("shared", &self.shared.len())
            .field("roots", &self.roots)
            .finish()
    }
}

/// The `.named()` name of the handler for `key`, or the Rust type name when
/// nothing is registered for it.
fn stable_name(handlers: &HashMap<TypeId, ErasedHandler>, key: TypeKey) -> &'static str {
    handlers
        .get(&key.type_id())
        .map_or(key.name(), |handler| handler.name)
}

/// Hash every handler's stable name, kind, operations and dependencies in
/// name order. Registration order does not affect the result. A `Shared<T>`
/// handler is recorded under the stable name of `T`.
fn definition_hash(handlers: &HashMap<TypeId, ErasedHandler>) -> DefinitionHash {
    let mut records: Vec<(&'static str, u8, u8, Vec<(&'static str, bool)>)> = handlers
        .values()
        .map(|handler| {
            let ops = u8::from(handler.has_initializer())
                | u8::from(handler.has_serializer()) << 1
                | u8::from(handler.has_deserializer()) << 2;
            let mut deps: Vec<(&'static str, bool)> = handler
                .dependencies
                .iter()
                .map(|d| (stable_name(handlers, d.key), d.needs_initializer))
                .collect();
            deps.sort_unstable();
            let name = match (handler.kind, handler.dependencies.first()) {
                (HandlerKind::Shared, Some(content)) => stable_name(handlers, content.key),
                _ => handler.name,
            };
            (name, handler.kind.code(), ops, deps)
        })
        .collect();
    records.sort_unstable();

    let mut hasher = DefinitionHasher::new();
    hasher.write_u32(records.len() as u32);
    for (name, kind, ops, deps) in records {
        hasher.write_str(name);
        hasher.write_u8(kind);
        hasher.write_u8(ops);
        hasher.write_u32(deps.len() as u32);
        for (dep, needs_initializer) in deps {
            hasher.write_str(dep);
            hasher.write_u8(u8::from(needs_initializer));
        }
    }
    hasher.finish()
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Immutable registry. Frozen after build(). Thread-safe to share.
pub struct Registry {
    handlers: HashMap<TypeId, ErasedHandler>,
    shared: HashMap<TypeId, SharedEntry>,
    tags: Vec<TypeId>,
    roots: Vec<TypeKey>,
    definition_hash: DefinitionHash,
}

impl Registry {
    /// Exact-type lookup. Unregistered types are a configuration error.
    pub fn resolve(&self, key: TypeKey) -> Result<&ErasedHandler, WalkError> {
        self.handlers
            .get(&key.type_id())
            .ok_or(WalkError::Unregistered {
                type_name: key.name(),
            })
    }

    pub fn get<T: 'static>(&self) -> Option<&ErasedHandler> {
        self.handlers.get(&TypeId::of::<T>())
    }

    pub fn contains<T: 'static>(&self) -> bool {
        self.handlers.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn roots(&self) -> &[TypeKey] {
        &self.roots
    }

    /// Fingerprint of every registered definition. Stored in loop records.
    pub fn definition_hash(&self) -> DefinitionHash {
        self.definition_hash
    }

    /// Stable names of all registered types, sorted.
    pub fn type_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.handlers.values().map(|h| h.name).collect();
        names.sort_unstable();
        names
    }

    /// Produce a fresh instance through the registered initializer.
    pub fn initialize<T: 'static>(&self) -> Result<T, WalkError> {
        let handler = self.resolve(TypeKey::of::<T>())?;
        let boxed = handler.initialize(self)?;
        boxed
            .downcast::<T>()
            .map(|value| *value)
            .map_err(|_| WalkError::TypeMismatch {
                expected: std::any::type_name::<T>(),
            })
    }

    /// Tag written for polymorphic references to `T`, if `T` is shared.
    pub fn type_tag<T: 'static>(&self) -> Option<TypeTag> {
        self.shared
            .get(&TypeId::of::<std::cell::RefCell<T>>())
            .map(|entry| entry.tag)
    }

    pub(crate) fn shared_for(&self, cell: TypeId) -> Option<&SharedEntry> {
        self.shared.get(&cell)
    }

    pub(crate) fn shared_by_tag(&self, tag: TypeTag) -> Option<&SharedEntry> {
        self.tags
            .get(tag.0 as usize)
            .and_then(|cell| self.shared.get(cell))
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("handlers", &self.handlers.len())
            .field("shared", &self.tags.len())
            .field("roots", &self.roots)
            .field("definition_hash", &self.definition_hash)
            .finish()
    }
}
