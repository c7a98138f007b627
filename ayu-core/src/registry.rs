//! The resource registry.
//!
//! A [`Registry`] owns everything that outlives a single call: the resource
//! table, active schemes, registered types, the transaction scope, the
//! delayed-link queue and the location cache. It is single-threaded; every
//! method takes `&self` and uses interior mutability.
//!
//! Values are reached through closures rather than returned borrows, so a
//! resource can be loaded on demand and its value can never be swapped out
//! from under a caller.

mod lifecycle;

use std::any::TypeId;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::item::{walk, walk_mut, Access, Describe, FromTreeCx, Item, Link, Step};
use crate::location::Location;
use crate::reference::Reference;
use crate::resource::{Resource, ResourceState};
use crate::scan::{self, LocationCache, LocationCacheGuard};
use crate::scheme::{scheme_of, FileScheme, ResourceScheme, SchemeGuard};
use crate::transaction::{Domain, Transaction, TransactionScope};
use crate::tree::Tree;

use self::lifecycle::DelayedLinks;

type Construct = fn(&Tree, &mut FromTreeCx<'_>) -> Result<Box<dyn Item>>;

#[derive(Clone, Copy)]
struct TypeEntry {
    type_id: TypeId,
    construct: Construct,
}

fn construct<T: Describe>(tree: &Tree, cx: &mut FromTreeCx<'_>) -> Result<Box<dyn Item>> {
    Ok(Box::new(T::from_tree(tree, cx)?))
}

/// Owner of all resources and the state shared between operations on them.
pub struct Registry {
    resources: RefCell<IndexMap<String, Resource>>,
    schemes: RefCell<IndexMap<String, Rc<dyn ResourceScheme>>>,
    default_scheme: Rc<dyn ResourceScheme>,
    types: RefCell<HashMap<String, TypeEntry>>,
    type_names: RefCell<HashMap<TypeId, String>>,
    scope: TransactionScope<Registry>,
    links: DelayedLinks,
    cache: LocationCache,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Domain for Registry {
    fn transaction_scope(&self) -> &TransactionScope<Self> {
        &self.scope
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            resources: RefCell::new(IndexMap::new()),
            schemes: RefCell::new(IndexMap::new()),
            default_scheme: Rc::new(FileScheme::new("", "")),
            types: RefCell::new(HashMap::new()),
            type_names: RefCell::new(HashMap::new()),
            scope: TransactionScope::default(),
            links: DelayedLinks::default(),
            cache: LocationCache::default(),
        }
    }

    // ========================================================================
    // Types
    // ========================================================================

    /// Allow values of `T` in resource files, under `T::NAME`.
    pub fn register_type<T: Describe>(&self) {
        self.register_type_as::<T>(T::NAME);
    }

    /// Register `T` under another name. Generic containers need this, since
    /// every `Vec<T>` shares one `NAME`.
    pub fn register_type_as<T: Describe>(&self, name: impl Into<String>) {
        let name = name.into();
        let entry = TypeEntry {
            type_id: TypeId::of::<T>(),
            construct: construct::<T>,
        };
        tracing::debug!(type_name = %name, "registering type");
        self.type_names.borrow_mut().insert(entry.type_id, name.clone());
        self.types.borrow_mut().insert(name, entry);
    }

    /// Name a value is written under.
    pub(crate) fn type_name_of(&self, item: &dyn Item) -> Result<String> {
        self.type_names
            .borrow()
            .get(&item.as_any().type_id())
            .cloned()
            .ok_or_else(|| Error::TypeNotFound {
                type_name: item.type_name().to_string(),
            })
    }

    pub(crate) fn construct(&self, type_name: &str, tree: &Tree, cx: &mut FromTreeCx<'_>) -> Result<Box<dyn Item>> {
        let entry = self
            .types
            .borrow()
            .get(type_name)
            .copied()
            .ok_or_else(|| Error::TypeNotFound {
                type_name: type_name.to_string(),
            })?;
        let value = (entry.construct)(tree, cx)?;
        debug_assert_eq!(value.as_any().type_id(), entry.type_id);
        Ok(value)
    }

    // ========================================================================
    // Schemes
    // ========================================================================

    /// Start routing names with this scheme's prefix to it.
    ///
    /// Registering the empty prefix replaces the built-in handling of bare
    /// paths.
    pub fn activate_scheme(&self, scheme: impl ResourceScheme + 'static) -> Result<SchemeGuard<'_>> {
        let prefix = scheme.scheme().to_string();
        if !prefix.is_empty() && scheme_of(&format!("{prefix}:")) != Some(prefix.as_str()) {
            return Err(Error::ResourceNameInvalid {
                name: prefix,
                reason: "not a valid scheme",
            });
        }
        let mut schemes = self.schemes.borrow_mut();
        if schemes.contains_key(&prefix) {
            return Err(Error::ResourceSchemeDuplicate { scheme: prefix });
        }
        tracing::debug!(scheme = %prefix, "activating scheme");
        schemes.insert(prefix.clone(), Rc::new(scheme));
        Ok(SchemeGuard::new(self, prefix))
    }

    pub(crate) fn deactivate_scheme(&self, prefix: &str) {
        tracing::debug!(scheme = %prefix, "deactivating scheme");
        self.schemes.borrow_mut().shift_remove(prefix);
    }

    pub(crate) fn scheme_for(&self, name: &str) -> Result<Rc<dyn ResourceScheme>> {
        let schemes = self.schemes.borrow();
        match scheme_of(name) {
            Some(prefix) => schemes.get(prefix).cloned().ok_or_else(|| Error::ResourceNameInvalid {
                name: name.to_string(),
                reason: "unknown scheme",
            }),
            None => Ok(schemes.get("").cloned().unwrap_or_else(|| self.default_scheme.clone())),
        }
    }

    // ========================================================================
    // Resources
    // ========================================================================

    /// Handle for `name`, creating an unloaded entry on first use.
    pub fn resource(&self, name: &str) -> Result<Resource> {
        if let Some(res) = self.resources.borrow().get(name) {
            return Ok(res.clone());
        }
        let invalid = |reason| Error::ResourceNameInvalid {
            name: name.to_string(),
            reason,
        };
        if name.is_empty() {
            return Err(invalid("empty name"));
        }
        if name.contains('#') {
            return Err(invalid("names can't contain a fragment"));
        }
        let scheme = self.scheme_for(name)?;
        if !scheme.accepts_name(name) {
            return Err(Error::ResourceNameRejected {
                name: name.to_string(),
                scheme: scheme.scheme().to_string(),
            });
        }
        let res = Resource::new(name.to_string());
        self.resources.borrow_mut().insert(name.to_string(), res.clone());
        Ok(res)
    }

    /// Every resource that isn't unloaded, in creation order.
    pub fn loaded_resources(&self) -> Vec<Resource> {
        self.resources
            .borrow()
            .values()
            .filter(|res| res.is_loaded())
            .cloned()
            .collect()
    }

    /// Give an unloaded resource a value without reading its file.
    pub fn set_value<T: Item>(&self, res: &Resource, value: T) -> Result<()> {
        res.expect_state("set value of", ResourceState::Unloaded)?;
        let type_name = self
            .type_names
            .borrow()
            .get(&TypeId::of::<T>())
            .cloned()
            .unwrap_or_else(|| value.type_name().to_string());
        let scheme = self.scheme_for(res.name())?;
        if !scheme.accepts_type(&type_name) {
            return Err(Error::ResourceTypeRejected {
                name: res.name().to_string(),
                type_name,
            });
        }
        res.replace_value(Some(Box::new(value)))?;
        res.set_state(ResourceState::Loaded);
        self.invalidate_cache();
        tracing::debug!(resource = %res.name(), type_name = %type_name, "value set");
        Ok(())
    }

    /// Run `f` on a resource's value, loading it first if needed.
    pub fn with_value<T: Item, R>(&self, res: &Resource, f: impl FnOnce(&T) -> R) -> Result<R> {
        self.ensure_loaded(res)?;
        let value = res.borrow_value()?;
        let item = value.as_deref().ok_or_else(|| not_found(&Location::resource(res.clone())))?;
        let typed = item
            .as_any()
            .downcast_ref::<T>()
            .ok_or_else(|| wrong_type::<T>(res.name(), item))?;
        Ok(f(typed))
    }

    /// Run `f` on a resource's value mutably, loading it first if needed.
    pub fn with_value_mut<T: Item, R>(&self, res: &Resource, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        self.ensure_loaded(res)?;
        self.invalidate_cache();
        let mut value = res.borrow_value_mut()?;
        let item = value
            .as_deref_mut()
            .ok_or_else(|| not_found(&Location::resource(res.clone())))?;
        let got = item.type_name();
        let typed = item
            .as_any_mut()
            .downcast_mut::<T>()
            .ok_or_else(|| Error::ReferenceWrongType {
                location: res.name().to_string(),
                expected: std::any::type_name::<T>(),
                got,
            })?;
        Ok(f(typed))
    }

    fn ensure_loaded(&self, res: &Resource) -> Result<()> {
        if res.state() == ResourceState::Unloaded {
            tracing::debug!(resource = %res.name(), "loading on demand");
            self.load(std::slice::from_ref(res))?;
        }
        Ok(())
    }

    // ========================================================================
    // Locations and references
    // ========================================================================

    /// Start or join a batch of lookups sharing one location cache.
    pub fn location_cache(&self) -> LocationCacheGuard<'_> {
        LocationCacheGuard::new(&self.cache)
    }

    pub(crate) fn cache(&self) -> &LocationCache {
        &self.cache
    }

    pub(crate) fn invalidate_cache(&self) {
        self.cache.invalidate();
    }

    /// Find where a reference points, scanning every loaded resource.
    pub fn reference_to_location(&self, r: &Reference) -> Result<Location> {
        scan::find_reference(self, r)
    }

    /// Resolve a location to a reference, loading its resource if needed.
    pub fn location_to_reference(&self, loc: &Location) -> Result<Reference> {
        self.with_location_access(loc, |item, access| Reference::from_item(item, access))
    }

    /// Run `f` on the value at `loc`.
    pub fn with_location<R>(&self, loc: &Location, f: impl FnOnce(&dyn Item) -> R) -> Result<R> {
        self.with_location_access(loc, |item, _| f(item))
    }

    /// Run `f` on the value at `loc` mutably.
    pub fn with_location_mut<R>(&self, loc: &Location, f: impl FnOnce(&mut dyn Item) -> R) -> Result<R> {
        let (res, steps, root_access) = self.anchor(loc)?;
        self.ensure_loaded(&res)?;
        let access = {
            let value = res.borrow_value()?;
            let root = value.as_deref().ok_or_else(|| not_found(loc))?;
            let (_, access) = walk(root, &steps).ok_or_else(|| not_found(loc))?;
            access.and(root_access)
        };
        if access == Access::ReadOnly {
            return Err(Error::ReferenceReadOnly {
                location: loc.to_uri(),
            });
        }
        self.invalidate_cache();
        let mut value = res.borrow_value_mut()?;
        let root = value.as_deref_mut().ok_or_else(|| not_found(loc))?;
        let item = walk_mut(root, &steps).ok_or_else(|| not_found(loc))?;
        Ok(f(item))
    }

    /// Run `f` on whatever `link` points at.
    pub fn with_target<T: Item, R>(&self, link: &Link<T>, f: impl FnOnce(&T) -> R) -> Result<R> {
        let target = link.target().ok_or_else(|| Error::ReferenceNotFound {
            location: "unset link".to_string(),
        })?;
        let loc = Location::reference(target.clone());
        self.with_location(&loc, |item| {
            item.as_any()
                .downcast_ref::<T>()
                .map(f)
                .ok_or_else(|| wrong_type::<T>(&loc.to_uri(), item))
        })?
    }

    fn with_location_access<R>(&self, loc: &Location, f: impl FnOnce(&dyn Item, Access) -> R) -> Result<R> {
        let (res, steps, root_access) = self.anchor(loc)?;
        self.ensure_loaded(&res)?;
        let value = res.borrow_value()?;
        let root = value.as_deref().ok_or_else(|| not_found(loc))?;
        let (item, access) = walk(root, &steps).ok_or_else(|| not_found(loc))?;
        Ok(f(item, access.and(root_access)))
    }

    /// Re-root `loc` at a resource.
    fn anchor(&self, loc: &Location) -> Result<(Resource, Vec<Step>, Access)> {
        if let Some(res) = loc.root_resource() {
            return Ok((res.clone(), loc.steps(), Access::Mutable));
        }
        let r = loc.root_reference().ok_or_else(|| not_found(loc))?;
        let base = self.reference_to_location(r)?;
        let res = base.root_resource().cloned().ok_or_else(|| not_found(loc))?;
        let mut steps = base.steps();
        steps.extend(loc.steps());
        Ok((res, steps, r.access()))
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Group several operations so their commits happen together.
    pub fn transaction(&self) -> Transaction<'_, Registry> {
        Transaction::begin(self)
    }
}

fn not_found(loc: &Location) -> Error {
    Error::ReferenceNotFound {
        location: loc.to_uri(),
    }
}

fn wrong_type<T: Item>(location: &str, got: &dyn Item) -> Error {
    Error::ReferenceWrongType {
        location: location.to_string(),
        expected: std::any::type_name::<T>(),
        got: got.type_name(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_str;

    #[test]
    fn test_resource_names() {
        let registry = Registry::new();
        let a = registry.resource("a.ayu").unwrap();
        assert_eq!(registry.resource("a.ayu").unwrap(), a);
        assert_eq!(a.state(), ResourceState::Unloaded);
        for name in ["", "a.ayu#/x", "nope:a.ayu"] {
            assert_eq!(registry.resource(name).unwrap_err().code(), "ResourceNameInvalid", "{name}");
        }
        assert_eq!(registry.resource("../up.ayu").unwrap_err().code(), "ResourceNameRejected");
    }

    #[test]
    fn test_scheme_guard() {
        let registry = Registry::new();
        {
            let _guard = registry.activate_scheme(FileScheme::new("data", "/srv")).unwrap();
            assert!(registry.resource("data:x.ayu").is_ok());
            let err = registry.activate_scheme(FileScheme::new("data", "/other")).err().unwrap();
            assert_eq!(err.code(), "ResourceSchemeDuplicate");
        }
        assert_eq!(registry.resource("data:y.ayu").unwrap_err().code(), "ResourceNameInvalid");
        assert!(registry.activate_scheme(FileScheme::new("x", "/")).is_err());
    }

    #[test]
    fn test_set_value_and_locate() {
        let registry = Registry::new();
        let res = registry.resource("mem.ayu").unwrap();
        registry.set_value(&res, parse_str("{a:[1 2]}").unwrap()).unwrap();
        assert_eq!(res.state(), ResourceState::Loaded);

        let loc = Location::resource(res.clone()).key("a").index(1);
        let r = registry.location_to_reference(&loc).unwrap();
        assert!(r.is_readonly());
        assert_eq!(registry.reference_to_location(&r).unwrap(), loc);
        let two = registry.with_location(&loc, |item| item.as_any().downcast_ref::<Tree>().cloned());
        assert_eq!(two.unwrap(), Some(Tree::from(2)));

        let err = registry.with_location_mut(&loc, |_| ()).unwrap_err();
        assert_eq!(err.code(), "ReferenceReadOnly");
        let missing = Location::resource(res).key("b");
        assert_eq!(registry.location_to_reference(&missing).unwrap_err().code(), "ReferenceNotFound");
    }

    #[test]
    fn test_typed_access() {
        let registry = Registry::new();
        let res = registry.resource("nums.ayu").unwrap();
        registry.set_value(&res, vec![1i32, 2, 3]).unwrap();
        registry.with_value_mut(&res, |v: &mut Vec<i32>| v.push(4)).unwrap();
        assert_eq!(registry.with_value(&res, |v: &Vec<i32>| v.len()).unwrap(), 4);
        let err = registry.with_value(&res, |_: &String| ()).unwrap_err();
        assert_eq!(err.code(), "ReferenceWrongType");
        assert_eq!(
            registry.set_value(&res, 1i32).unwrap_err().code(),
            "ResourceStateInvalid"
        );
    }

    #[test]
    fn test_reference_rooted_location() {
        let registry = Registry::new();
        let res = registry.resource("m.ayu").unwrap();
        let mut map: IndexMap<String, Vec<i32>> = IndexMap::new();
        map.insert("xs".into(), vec![5, 6]);
        registry.set_value(&res, map).unwrap();

        let xs = registry
            .location_to_reference(&Location::resource(res.clone()).key("xs"))
            .unwrap();
        let loc = Location::reference(xs).index(1);
        registry
            .with_location_mut(&loc, |item| {
                *item.as_any_mut().downcast_mut::<i32>().unwrap() = 60;
            })
            .unwrap();
        let six = registry.with_value(&res, |m: &IndexMap<String, Vec<i32>>| m["xs"][1]);
        assert_eq!(six.unwrap(), 60);
    }

    #[test]
    fn test_unregistered_type_name() {
        let registry = Registry::new();
        assert_eq!(registry.type_name_of(&1i32).unwrap_err().code(), "TypeNotFound");
        registry.register_type::<i32>();
        assert_eq!(registry.type_name_of(&1i32).unwrap(), "i32");
        registry.register_type_as::<Vec<i32>>("Ints");
        assert_eq!(registry.type_name_of(&vec![1i32]).unwrap(), "Ints");
    }
}
