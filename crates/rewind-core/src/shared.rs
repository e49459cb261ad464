//! Identity-tracked references.
//!
//! State that is conceptually one instance per simulation (a definition
//! object, an actor referenced by several others) is held in a [`Shared`].
//! Walking a `Shared` writes its content once and back-references on every
//! later visit. [`AnyShared`] is the polymorphic form: the handler is picked
//! from the concrete type behind the reference at runtime.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

/// Shared, mutable simulation object with a statically known type.
pub type Shared<T> = Rc<RefCell<T>>;

/// Shared object whose concrete type is only known at runtime. The value
/// behind the `dyn Any` is always a `RefCell<T>` for some registered `T`.
pub type AnyShared = Rc<dyn Any>;

pub fn new_shared<T>(value: T) -> Shared<T> {
    Rc::new(RefCell::new(value))
}

/// Erase the static type. The result keeps the same identity.
pub fn into_any<T: 'static>(shared: Shared<T>) -> AnyShared {
    shared
}

/// Recover the static type of a polymorphic reference.
pub fn downcast_shared<T: 'static>(any: &AnyShared) -> Option<Shared<T>> {
    Rc::clone(any).downcast::<RefCell<T>>().ok()
}

/// Whether two references point at the same allocation, ignoring type.
pub fn same_object(a: &AnyShared, b: &AnyShared) -> bool {
    std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b))
}
