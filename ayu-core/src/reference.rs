//! Opaque handles to values living inside resources.
//!
//! A [`Reference`] is an identity, not a pointer: the address of a value plus
//! its concrete type. Nothing ever dereferences it. To reach the value behind
//! one, the registry finds its [`Location`](crate::Location) by scanning and
//! walks there.
//!
//! Identity only holds while the value stays put. Values are owned by their
//! resource's boxed root, so moving a resource (rename) keeps every
//! reference into it valid, and replacing the value (reload) breaks them,
//! which is exactly what reload repairs.

use std::any::TypeId;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::item::{Access, Item};

/// Address and type of a value.
///
/// Equality and hashing ignore the access flag, so a read-only and a
/// mutable handle to the same value compare equal. Lookups that care about
/// access check it separately.
#[derive(Clone)]
pub struct Reference {
    address: usize,
    type_id: TypeId,
    type_name: &'static str,
    access: Access,
}

impl Reference {
    /// Reference to a value the caller may write through.
    pub fn of<T: Item>(item: &T) -> Self {
        Self::from_item(item, Access::Mutable)
    }

    /// Reference to a value the caller may only read.
    pub fn of_readonly<T: Item>(item: &T) -> Self {
        Self::from_item(item, Access::ReadOnly)
    }

    pub(crate) fn from_item(item: &dyn Item, access: Access) -> Self {
        Self {
            address: item as *const dyn Item as *const () as usize,
            type_id: item.as_any().type_id(),
            type_name: item.type_name(),
            access,
        }
    }

    /// The value's address. Only meaningful as an identity.
    pub fn address(&self) -> usize {
        self.address
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn access(&self) -> Access {
        self.access
    }

    pub fn is_readonly(&self) -> bool {
        self.access == Access::ReadOnly
    }

    /// Whether this points at a `T`.
    pub fn is<T: Item>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    pub(crate) fn with_access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }
}

impl PartialEq for Reference {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address && self.type_id == other.type_id
    }
}

impl Eq for Reference {}

impl Hash for Reference {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
        self.type_id.hash(state);
    }
}

impl fmt::Debug for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Reference({} @ {:#x}", self.type_name, self.address)?;
        if self.is_readonly() {
            f.write_str(", readonly")?;
        }
        f.write_str(")")
    }
}
