//! Reachability scans over item trees.
//!
//! A scan walks a value depth-first, pre-order, extending the location by
//! one step per level and reporting every node. Visitors return
//! [`ControlFlow`]; a `Break` unwinds the whole walk.
//!
//! Scanning every loaded resource is the only way to turn a [`Reference`]
//! back into a [`Location`]. When many lookups happen together (saving a
//! batch full of links, verifying a reload) a [`LocationCacheGuard`] keeps
//! one reference-to-location map alive across them.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::ops::ControlFlow;

use crate::error::{Error, Result};
use crate::item::{Access, AnyLink, Item};
use crate::location::Location;
use crate::reference::Reference;
use crate::registry::Registry;
use crate::resource::Resource;

/// Visitor for [`scan_item`].
pub type NodeVisitor<'v> = dyn FnMut(&dyn Item, &Location, Access) -> ControlFlow<()> + 'v;

/// Visit `item` and everything below it.
pub fn scan_item(item: &dyn Item, loc: &Location, access: Access, visit: &mut NodeVisitor<'_>) -> ControlFlow<()> {
    visit(item, loc, access)?;
    item.visit_children(&mut |step, child, child_access| {
        scan_item(child, &loc.child(step), access.and(child_access), &mut *visit)
    })
}

/// Visit a reference to every node below and including `item`.
pub fn scan_references(
    item: &dyn Item,
    loc: &Location,
    visit: &mut dyn FnMut(Reference, &Location) -> ControlFlow<()>,
) -> ControlFlow<()> {
    scan_item(item, loc, Access::Mutable, &mut |node, node_loc, access| {
        visit(Reference::from_item(node, access), node_loc)
    })
}

/// Visit every link below and including `item`.
pub fn scan_links(
    item: &dyn Item,
    loc: &Location,
    visit: &mut dyn FnMut(&dyn AnyLink, &Location) -> ControlFlow<()>,
) -> ControlFlow<()> {
    scan_item(item, loc, Access::Mutable, &mut |node, node_loc, _| match node.as_link() {
        Some(link) => visit(link, node_loc),
        None => ControlFlow::Continue(()),
    })
}

/// Scan the current value of each resource that has one.
pub(crate) fn scan_resources(resources: &[Resource], visit: &mut NodeVisitor<'_>) -> Result<ControlFlow<()>> {
    for res in resources {
        let value = res.borrow_value()?;
        if let Some(value) = value.as_deref() {
            if scan_item(value, &Location::resource(res.clone()), Access::Mutable, &mut *visit).is_break() {
                return Ok(ControlFlow::Break(()));
            }
        }
    }
    Ok(ControlFlow::Continue(()))
}

/// Scan every link in the given resources.
pub(crate) fn scan_resource_links(
    resources: &[Resource],
    visit: &mut dyn FnMut(&dyn AnyLink, &Location) -> ControlFlow<()>,
) -> Result<()> {
    let _ = scan_resources(resources, &mut |node, loc, _| match node.as_link() {
        Some(link) => visit(link, loc),
        None => ControlFlow::Continue(()),
    })?;
    Ok(())
}

// ============================================================================
// Location cache
// ============================================================================

/// Where a reference was first seen, and first seen writable.
struct CacheEntry {
    first: Location,
    mutable: Option<Location>,
}

type CacheMap = HashMap<Reference, CacheEntry>;

/// Shared reference-to-location map, valid while any guard is alive.
#[derive(Default)]
pub(crate) struct LocationCache {
    depth: Cell<usize>,
    map: RefCell<Option<CacheMap>>,
}

impl LocationCache {
    pub fn is_active(&self) -> bool {
        self.depth.get() > 0
    }

    /// Drop the map; the next lookup rebuilds it.
    pub fn invalidate(&self) {
        if let Ok(mut map) = self.map.try_borrow_mut() {
            if map.take().is_some() {
                tracing::trace!("location cache invalidated");
            }
        }
    }

    /// Look `r` up, building the map first if needed.
    ///
    /// Answers the same as an uncached scan: the first node in scan order
    /// that `r` may stand for.
    fn lookup(&self, registry: &Registry, r: &Reference) -> Result<Option<Location>> {
        if self.map.borrow().is_none() {
            let map = build_map(registry)?;
            tracing::debug!(entries = map.len(), "location cache built");
            *self.map.borrow_mut() = Some(map);
        }
        let map = self.map.borrow();
        Ok(map.as_ref().and_then(|map| map.get(r)).and_then(|entry| {
            if r.is_readonly() {
                Some(entry.first.clone())
            } else {
                entry.mutable.clone()
            }
        }))
    }
}

fn build_map(registry: &Registry) -> Result<CacheMap> {
    let mut map = CacheMap::new();
    let _ = scan_resources(&registry.loaded_resources(), &mut |node, loc, access| {
        let entry = map
            .entry(Reference::from_item(node, access))
            .or_insert_with(|| CacheEntry {
                first: loc.clone(),
                mutable: None,
            });
        if access == Access::Mutable && entry.mutable.is_none() {
            entry.mutable = Some(loc.clone());
        }
        ControlFlow::Continue(())
    })?;
    Ok(map)
}

/// A mutable query never matches a read-only node at the same address.
fn accepts(query: &Reference, found: Access) -> bool {
    query.is_readonly() || found == Access::Mutable
}

/// Keeps the location cache alive. Nested guards share one map, freed when
/// the outermost is dropped.
#[must_use = "the cache is freed as soon as the guard is dropped"]
pub struct LocationCacheGuard<'r> {
    cache: &'r LocationCache,
}

impl<'r> LocationCacheGuard<'r> {
    pub(crate) fn new(cache: &'r LocationCache) -> Self {
        cache.depth.set(cache.depth.get() + 1);
        Self { cache }
    }
}

impl Drop for LocationCacheGuard<'_> {
    fn drop(&mut self) {
        let depth = self.cache.depth.get() - 1;
        self.cache.depth.set(depth);
        if depth == 0 {
            if let Ok(mut map) = self.cache.map.try_borrow_mut() {
                if map.take().is_some() {
                    tracing::debug!("location cache freed");
                }
            }
        }
    }
}

/// Find where `r` lives among the loaded resources.
pub(crate) fn find_reference(registry: &Registry, r: &Reference) -> Result<Location> {
    let cache = registry.cache();
    let found = if cache.is_active() {
        cache.lookup(registry, r)?
    } else {
        let mut found = None;
        let _ = scan_resources(&registry.loaded_resources(), &mut |node, loc, access| {
            if accepts(r, access) && Reference::from_item(node, access) == *r {
                found = Some(loc.clone());
                return ControlFlow::Break(());
            }
            ControlFlow::Continue(())
        })?;
        found
    };
    found.ok_or_else(|| Error::ReferenceNotFound {
        location: format!("{r:?}"),
    })
}
