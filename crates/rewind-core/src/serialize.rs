//! Serialize/deserialize contexts and the walk protocol.
//!
//! A context is created for one top-level walk, driven to completion, and
//! dropped. It owns a reference table so that an object reachable through
//! several paths is written once and restored as one instance:
//!
//! - serialize side: object address -> sequential [`RefId`], assigned on the
//!   first visit. Later visits emit a back-reference.
//! - deserialize side: `RefId` -> instance, filled *before* the instance's
//!   fields are read so cycles resolve to the same allocation.
//!
//! Contexts hold `Rc` handles and are therefore neither `Send` nor `Sync`.
//! Independent contexts on different threads may share one [`Registry`].

use std::any::{Any, TypeId};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::asset::AssetResolver;
use crate::codec::{ByteReader, ByteWriter};
use crate::config::WalkConfig;
use crate::id::{RefId, TypeKey};
use crate::registry::Registry;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Marker preceding the first occurrence of a shared object.
pub const NEW_REF: u8 = 0x01;

/// Marker preceding a reference to an object already walked.
pub const BACK_REF: u8 = 0x02;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// The registered operation an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Initialize,
    Serialize,
    Deserialize,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Initialize => "initialize",
            Operation::Serialize => "serialize",
            Operation::Deserialize => "deserialize",
        })
    }
}

/// Broad error class. Configuration errors mean the process is set up
/// wrong; protocol errors mean the current input is bad and the operation
/// must be abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Protocol,
    Io,
}

/// Errors raised while walking a value.
#[derive(Debug, thiserror::Error)]
pub enum WalkError {
    #[error("type {type_name} is not registered")]
    Unregistered { type_name: &'static str },
    #[error("polymorphic reference to an unregistered shared type ({0:?})")]
    UnregisteredShared(TypeId),
    #[error("type {type_name} has no {operation} operation")]
    MissingOperation {
        type_name: &'static str,
        operation: Operation,
    },
    #[error(
        "{container} has nondeterministic iteration order and cannot be used to {operation}; use {alternative}"
    )]
    Nondeterministic {
        container: &'static str,
        alternative: &'static str,
        operation: Operation,
    },
    #[error("asset handle {type_name} needs an asset resolver")]
    NoAssetResolver { type_name: &'static str },
    #[error("asset of type {type_name} has no path")]
    UnnamedAsset { type_name: &'static str },
    #[error("handler expected a value of type {expected}")]
    TypeMismatch { expected: &'static str },
    #[error("shared {type_name} is mutably borrowed elsewhere")]
    AlreadyBorrowed { type_name: &'static str },

    #[error("unexpected end of input: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof { needed: usize, remaining: usize },
    #[error("invalid {what} tag 0x{tag:02X}")]
    InvalidTag { what: &'static str, tag: u8 },
    #[error("back-reference {id} out of range ({known} references known)")]
    BackReferenceOutOfRange { id: u32, known: usize },
    #[error("new reference id {found} out of sequence (expected {expected})")]
    ReferenceOutOfSequence { expected: u32, found: u32 },
    #[error("reference {id} is not a {expected}")]
    ReferenceTypeMismatch { id: u32, expected: &'static str },
    #[error("unknown polymorphic type tag {0}")]
    UnknownTypeTag(u32),
    #[error("invalid UTF-8 in string")]
    InvalidUtf8,
    #[error("declared length {len} exceeds limit {max}")]
    LengthLimit { len: usize, max: usize },
    #[error("value {value} does not fit in {target}")]
    OutOfRange { value: u64, target: &'static str },
    #[error("keys of {container} are not in strictly ascending order")]
    UnorderedKeys { container: &'static str },
    #[error("walk depth exceeded limit {0}")]
    DepthExceeded(usize),
    #[error("{0} trailing bytes after top-level value")]
    TrailingBytes(usize),
    #[error("asset {path} could not be loaded as {type_name}")]
    AssetNotFound {
        path: String,
        type_name: &'static str,
    },
    #[error("bitcode: {0}")]
    Codec(String),
}

impl WalkError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WalkError::Unregistered { .. }
            | WalkError::UnregisteredShared(_)
            | WalkError::MissingOperation { .. }
            | WalkError::Nondeterministic { .. }
            | WalkError::NoAssetResolver { .. }
            | WalkError::UnnamedAsset { .. }
            | WalkError::TypeMismatch { .. }
            | WalkError::AlreadyBorrowed { .. } => ErrorKind::Configuration,
            _ => ErrorKind::Protocol,
        }
    }
}

// ---------------------------------------------------------------------------
// Reference tables
// ---------------------------------------------------------------------------

/// Serialize side: object identity -> id.
///
/// Visited objects are pinned for the lifetime of the walk so an address can
/// never be freed and reused by a different object mid-walk.
#[derive(Default)]
struct IdentityTable {
    ids: BTreeMap<usize, RefId>,
    pinned: Vec<Rc<dyn Any>>,
}

impl IdentityTable {
    fn lookup(&self, address: usize) -> Option<RefId> {
        self.ids.get(&address).copied()
    }

    fn insert(&mut self, address: usize, object: Rc<dyn Any>) -> Result<RefId, WalkError> {
        let id = u32::try_from(self.pinned.len()).map_err(|_| WalkError::OutOfRange {
            value: self.pinned.len() as u64,
            target: "reference id",
        })?;
        self.ids.insert(address, RefId(id));
        self.pinned.push(object);
        Ok(RefId(id))
    }

    fn len(&self) -> usize {
        self.pinned.len()
    }
}

/// Deserialize side: id -> instance, in order of first appearance.
#[derive(Default)]
struct InstanceTable {
    slots: Vec<Rc<dyn Any>>,
}

impl InstanceTable {
    fn next_id(&self) -> u32 {
        self.slots.len() as u32
    }

    fn get(&self, id: u32) -> Result<Rc<dyn Any>, WalkError> {
        self.slots
            .get(id as usize)
            .cloned()
            .ok_or(WalkError::BackReferenceOutOfRange {
                id,
                known: self.slots.len(),
            })
    }

    fn push(&mut self, instance: Rc<dyn Any>) {
        self.slots.push(instance);
    }
}

fn address_of(object: &Rc<dyn Any>) -> usize {
    Rc::as_ptr(object) as *const () as usize
}

/// Result of reading a reference marker.
pub(crate) enum Marker {
    /// First occurrence: the caller creates the instance and binds it.
    New(RefId),
    /// Already restored earlier in this walk.
    Existing(RefId, Rc<dyn Any>),
}

// ---------------------------------------------------------------------------
// SerializeContext
// ---------------------------------------------------------------------------

/// Drives one serialize walk.
pub struct SerializeContext<'a> {
    registry: &'a Registry,
    assets: Option<&'a dyn AssetResolver>,
    config: WalkConfig,
    refs: IdentityTable,
    depth: usize,
}

impl<'a> SerializeContext<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self {
            registry,
            assets: None,
            config: WalkConfig::default(),
            refs: IdentityTable::default(),
            depth: 0,
        }
    }

    pub fn with_config(mut self, config: WalkConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_assets(mut self, assets: &'a dyn AssetResolver) -> Self {
        self.assets = Some(assets);
        self
    }

    pub fn registry(&self) -> &'a Registry {
        self.registry
    }

    pub fn assets(&self) -> Option<&'a dyn AssetResolver> {
        self.assets
    }

    /// Number of distinct shared objects written so far.
    pub fn reference_count(&self) -> usize {
        self.refs.len()
    }

    /// Write `value` by dispatching on its exact type.
    pub fn walk<T: 'static>(&mut self, out: &mut ByteWriter, value: &T) -> Result<(), WalkError> {
        let registry = self.registry;
        let handler = registry.resolve(TypeKey::of::<T>())?;
        handler.serialize(self, out, value)
    }

    /// Run `f` one reference level deeper. Fails with
    /// [`WalkError::DepthExceeded`] once `max_depth` levels are open.
    /// Shared references go through this; so should any custom handler
    /// whose type can nest without bound.
    pub fn descend<R>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<R, WalkError>,
    ) -> Result<R, WalkError> {
        if self.depth >= self.config.max_depth {
            return Err(WalkError::DepthExceeded(self.config.max_depth));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    /// Walk a root value into a fresh buffer, consuming the context.
    pub fn snapshot<T: 'static>(mut self, root: &T) -> Result<Vec<u8>, WalkError> {
        let mut out = ByteWriter::with_limit(self.config.max_sequence_len);
        self.walk(&mut out, root)?;
        tracing::debug!(
            root = std::any::type_name::<T>(),
            bytes = out.len(),
            references = self.refs.len(),
            "snapshot written"
        );
        Ok(out.into_bytes())
    }

    /// Emit the reference marker for `object`. Returns `true` when this is
    /// the first visit and the caller must write the content next.
    pub(crate) fn write_marker(
        &mut self,
        out: &mut ByteWriter,
        object: &Rc<dyn Any>,
    ) -> Result<bool, WalkError> {
        let address = address_of(object);
        match self.refs.lookup(address) {
            Some(id) => {
                tracing::trace!(id = id.0, "back-reference");
                out.write_u8(BACK_REF);
                out.write_u32(id.0);
                Ok(false)
            }
            None => {
                let id = self.refs.insert(address, Rc::clone(object))?;
                tracing::trace!(id = id.0, "new reference");
                out.write_u8(NEW_REF);
                out.write_u32(id.0);
                Ok(true)
            }
        }
    }
}

impl fmt::Debug for SerializeContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerializeContext")
            .field("config", &self.config)
            .field("references", &self.refs.len())
            .field("depth", &self.depth)
            .field("assets", &self.assets.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// DeserializeContext
// ---------------------------------------------------------------------------

/// Drives one deserialize walk.
pub struct DeserializeContext<'a> {
    registry: &'a Registry,
    assets: Option<&'a dyn AssetResolver>,
    config: WalkConfig,
    refs: InstanceTable,
    depth: usize,
}

impl<'a> DeserializeContext<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self {
            registry,
            assets: None,
            config: WalkConfig::default(),
            refs: InstanceTable::default(),
            depth: 0,
        }
    }

    pub fn with_config(mut self, config: WalkConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_assets(mut self, assets: &'a dyn AssetResolver) -> Self {
        self.assets = Some(assets);
        self
    }

    pub fn registry(&self) -> &'a Registry {
        self.registry
    }

    pub fn assets(&self) -> Option<&'a dyn AssetResolver> {
        self.assets
    }

    /// Number of distinct shared objects restored so far.
    pub fn reference_count(&self) -> usize {
        self.refs.slots.len()
    }

    /// Produce a fresh instance of `T` through its registered initializer.
    pub fn initialize<T: 'static>(&self) -> Result<T, WalkError> {
        self.registry.initialize::<T>()
    }

    /// Populate `value` in place by dispatching on its exact type.
    pub fn walk<T: 'static>(
        &mut self,
        input: &mut ByteReader<'_>,
        value: &mut T,
    ) -> Result<(), WalkError> {
        let registry = self.registry;
        let handler = registry.resolve(TypeKey::of::<T>())?;
        handler.deserialize(self, input, value)
    }

    /// Run `f` one reference level deeper. See [`SerializeContext::descend`].
    pub fn descend<R>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<R, WalkError>,
    ) -> Result<R, WalkError> {
        if self.depth >= self.config.max_depth {
            return Err(WalkError::DepthExceeded(self.config.max_depth));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    /// Initialize and walk a new `T`.
    pub fn read<T: 'static>(&mut self, input: &mut ByteReader<'_>) -> Result<T, WalkError> {
        let mut value = self.initialize::<T>()?;
        self.walk(input, &mut value)?;
        Ok(value)
    }

    /// Restore a root value from `data`, consuming the context. The whole
    /// buffer must be used.
    pub fn restore<T: 'static>(mut self, data: &[u8]) -> Result<T, WalkError> {
        let mut input = ByteReader::with_limit(data, self.config.max_sequence_len);
        let root = match self.read::<T>(&mut input) {
            Ok(root) => root,
            Err(e) => {
                tracing::warn!(
                    root = std::any::type_name::<T>(),
                    offset = input.position(),
                    error = %e,
                    "malformed snapshot"
                );
                return Err(e);
            }
        };
        if !input.is_empty() {
            tracing::warn!(
                root = std::any::type_name::<T>(),
                trailing = input.remaining(),
                "snapshot has trailing bytes"
            );
            return Err(WalkError::TrailingBytes(input.remaining()));
        }
        tracing::debug!(
            root = std::any::type_name::<T>(),
            bytes = data.len(),
            references = self.refs.slots.len(),
            "snapshot restored"
        );
        Ok(root)
    }

    /// Read a reference marker and resolve back-references.
    pub(crate) fn read_marker(&mut self, input: &mut ByteReader<'_>) -> Result<Marker, WalkError> {
        match input.read_u8()? {
            NEW_REF => {
                let found = input.read_u32()?;
                let expected = self.refs.next_id();
                if found != expected {
                    return Err(WalkError::ReferenceOutOfSequence { expected, found });
                }
                Ok(Marker::New(RefId(found)))
            }
            BACK_REF => {
                let id = input.read_u32()?;
                Ok(Marker::Existing(RefId(id), self.refs.get(id)?))
            }
            tag => Err(WalkError::InvalidTag {
                what: "reference marker",
                tag,
            }),
        }
    }

    /// Record a newly created instance under `id`. Must happen before the
    /// instance's fields are read.
    pub(crate) fn bind(&mut self, id: RefId, instance: Rc<dyn Any>) -> Result<(), WalkError> {
        let expected = self.refs.next_id();
        if id.0 != expected {
            return Err(WalkError::ReferenceOutOfSequence {
                expected,
                found: id.0,
            });
        }
        self.refs.push(instance);
        Ok(())
    }
}

impl fmt::Debug for DeserializeContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeserializeContext")
            .field("config", &self.config)
            .field("references", &self.refs.slots.len())
            .field("depth", &self.depth)
            .field("assets", &self.assets.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Convenience entry points
// ---------------------------------------------------------------------------

/// Serialize `root` with default limits.
pub fn snapshot<T: 'static>(registry: &Registry, root: &T) -> Result<Vec<u8>, WalkError> {
    SerializeContext::new(registry).snapshot(root)
}

/// Restore a `T` from `data` with default limits.
pub fn restore<T: 'static>(registry: &Registry, data: &[u8]) -> Result<T, WalkError> {
    DeserializeContext::new(registry).restore(data)
}
