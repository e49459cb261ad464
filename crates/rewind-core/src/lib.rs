//! Rewind Core -- deterministic state snapshots for real-time simulations.
//!
//! This crate turns the mutable state of a simulation into a compact byte
//! stream that is identical across processes, restores it with shared-object
//! identity intact, and records sequences of snapshots ("loops") to disk for
//! playback, regression testing and network resynchronization.
//!
//! # Registry Lifecycle
//!
//! Every type that can appear in a snapshot is registered once at startup.
//! The builder is then frozen; the resulting [`registry::Registry`] is
//! read-only and can be shared by any number of threads:
//!
//! ```rust,ignore
//! let mut builder = RegistryBuilder::with_builtins();
//! builder.register(TypeHandler::<Actor>::new()
//!     .initializer(Actor::default)
//!     .serializer(serialize_actor)
//!     .deserializer(deserialize_actor))?;
//! builder.register_shared::<Actor>()?;
//! builder.register_vec::<Shared<Actor>>()?;
//! builder.declare_root::<World>();
//! let registry = builder.build()?;
//! ```
//!
//! # Walk Protocol
//!
//! A [`serialize::SerializeContext`] or [`serialize::DeserializeContext`] is
//! created per top-level walk. Plain values dispatch straight to their
//! handler. [`shared::Shared`] and [`shared::AnyShared`] references go through
//! the context's reference table: the first visit writes `NEW_REF id` and the
//! content, later visits write `BACK_REF id`. On restore the instance is
//! bound to its id before its fields are read, so cycles close on the same
//! allocation.
//!
//! # Determinism
//!
//! - Ordered containers only: `HashMap`/`HashSet` instantiations are guarded
//!   ([`guard`]) and fail every operation.
//! - Floats are written as raw IEEE-754 bits; simulation math should use
//!   [`fixed::Fixed64`].
//! - Map and set payloads must be strictly ascending, so each value has
//!   exactly one encoding.
//!
//! # Key Types
//!
//! - [`registry::RegistryBuilder`] / [`registry::Registry`] -- type handlers
//!   and the definition hash.
//! - [`serialize::SerializeContext`] / [`serialize::DeserializeContext`] --
//!   one walk each.
//! - [`loop_record::LoopRecord`], [`loop_record::LoopWriter`],
//!   [`loop_record::LoopReader`] -- the on-disk loop format.
//! - [`replay::LoopRecorder`] / [`replay::LoopPlayback`] -- capture and
//!   replay with staleness checks.
//! - [`validation`] -- payload diffs and determinism checks for desyncs.

pub mod asset;
mod builtins;
pub mod codec;
pub mod config;
pub mod fixed;
pub mod guard;
pub mod hash;
pub mod id;
pub mod loop_record;
mod ordered;
pub mod registry;
pub mod replay;
pub mod serialize;
pub mod shared;
pub mod validation;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use codec::{ByteReader, ByteWriter};
pub use hash::DefinitionHash;
pub use loop_record::{LoopError, LoopReader, LoopRecord, LoopWriter, StaleDefinition};
pub use registry::{Registry, RegistryBuilder, RegistryError, TypeHandler};
pub use serialize::{
    DeserializeContext, ErrorKind, SerializeContext, WalkError, restore, snapshot,
};
pub use shared::{AnyShared, Shared, new_shared};
