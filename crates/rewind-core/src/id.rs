use std::any::TypeId;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Identifies a concrete, closed type in the registry.
///
/// Generic types are keyed per instantiation: `Vec<u32>` and `Vec<String>`
/// produce different keys because the monomorphized `TypeId` already combines
/// the template with its type arguments. The name is carried for diagnostics
/// and for the definition hash; equality and ordering use only the `TypeId`.
#[derive(Clone, Copy)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl PartialOrd for TypeKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TypeKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeKey({})", self.name)
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Sequential id assigned to a shared object the first time a walk visits it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RefId(pub u32);

/// Stable tag of a shared type, written for polymorphic references.
///
/// Tags are assigned in stable-name order when the registry is built, so two
/// processes with identical registrations agree on every tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeTag(pub u32);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_key_distinguishes_generic_instantiations() {
        assert_ne!(TypeKey::of::<Vec<u32>>(), TypeKey::of::<Vec<String>>());
        assert_eq!(TypeKey::of::<Vec<u32>>(), TypeKey::of::<Vec<u32>>());
    }

    #[test]
    fn type_key_display_uses_type_name() {
        let key = TypeKey::of::<u64>();
        assert_eq!(key.to_string(), "u64");
        assert_eq!(key.name(), "u64");
    }

    #[test]
    fn ids_are_hashable() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(TypeKey::of::<u8>(), "byte");
        map.insert(TypeKey::of::<bool>(), "flag");
        assert_eq!(map[&TypeKey::of::<u8>()], "byte");
    }
}
