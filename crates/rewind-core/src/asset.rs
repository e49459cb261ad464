//! Asset handles: references to content owned outside the snapshot.
//!
//! An asset (a mesh, a sound, a definition file) is never written into the
//! payload. Its handle is written as the path it was loaded from, and the
//! same handle is obtained again on restore by loading that path. The host
//! supplies both directions through an [`AssetResolver`].

use std::any::{Any, type_name};
use std::rc::Rc;

use crate::codec::{ByteReader, ByteWriter};
use crate::id::TypeKey;
use crate::registry::{
    ErasedHandler, HandlerKind, Registry, RegistryBuilder, RegistryError, downcast_mut,
    downcast_ref,
};
use crate::serialize::{DeserializeContext, SerializeContext, WalkError};

/// Handle to externally managed, immutable content.
pub type Asset<T> = Rc<T>;

/// Maps asset handles to paths and back.
pub trait AssetResolver {
    /// Path under which `asset` can be loaded again. `None` if the handle is
    /// not managed by this resolver.
    fn path_of(&self, asset: &Rc<dyn Any>) -> Option<String>;

    /// Load (or fetch from cache) the asset at `path` as type `key`. The
    /// returned value must be an `Rc<T>` for `key`'s `T`.
    fn load(&self, key: TypeKey, path: &str) -> Option<Rc<dyn Any>>;
}

impl RegistryBuilder {
    /// `Asset<T>`: written as its path. Restoring needs a resolver on the
    /// context.
    pub fn register_asset<T: Default + 'static>(&mut self) -> Result<(), RegistryError> {
        self.insert(ErasedHandler {
            key: TypeKey::of::<Asset<T>>(),
            name: type_name::<Asset<T>>(),
            kind: HandlerKind::Asset,
            dependencies: Vec::new(),
            // Placeholder until the path is resolved.
            initialize: Some(Box::new(
                |_: &Registry| -> Result<Box<dyn Any>, WalkError> {
                    Ok(Box::new(Asset::new(T::default())))
                },
            )),
            serialize: Some(Box::new(
                |ctx: &mut SerializeContext<'_>,
                 out: &mut ByteWriter,
                 value: &dyn Any|
                 -> Result<(), WalkError> {
                    let handle = downcast_ref::<Asset<T>>(value)?;
                    let resolver = ctx.assets().ok_or(WalkError::NoAssetResolver {
                        type_name: type_name::<T>(),
                    })?;
                    let object: Rc<dyn Any> = handle.clone();
                    let path = resolver.path_of(&object).ok_or(WalkError::UnnamedAsset {
                        type_name: type_name::<T>(),
                    })?;
                    out.write_str(&path)
                },
            )),
            deserialize: Some(Box::new(
                |ctx: &mut DeserializeContext<'_>,
                 input: &mut ByteReader<'_>,
                 value: &mut dyn Any|
                 -> Result<(), WalkError> {
                    let path = input.read_str()?;
                    let resolver = ctx.assets().ok_or(WalkError::NoAssetResolver {
                        type_name: type_name::<T>(),
                    })?;
                    let not_found = || WalkError::AssetNotFound {
                        path: path.to_owned(),
                        type_name: type_name::<T>(),
                    };
                    let loaded = resolver
                        .load(TypeKey::of::<T>(), path)
                        .ok_or_else(not_found)?
                        .downcast::<T>()
                        .map_err(|_| not_found())?;
                    *downcast_mut::<Asset<T>>(value)? = loaded;
                    Ok(())
                },
            )),
        })
    }
}
