//! How native values convert to trees and expose their children.
//!
//! [`Item`] is the object-safe side: convert to a tree, list children,
//! fetch a child by key or index. [`Describe`] is the static side that
//! builds a value back from a tree. The [`record!`](crate::record) macro
//! implements both for a plain struct.
//!
//! Children are reported through a visitor returning [`ControlFlow`], so a
//! scan can stop at the first match from any depth.

use std::any::{Any, TypeId};
use std::fmt;
use std::marker::PhantomData;
use std::ops::ControlFlow;

use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::location::Location;
use crate::printer::{print, PrintOptions};
use crate::reference::Reference;
use crate::registry::Registry;
use crate::resource::Resource;
use crate::tree::{Form, Tree};
use crate::value::{TreeString, Value};

/// One step down from a value to a child.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Step {
    Key(TreeString),
    Index(u32),
}

impl Step {
    pub fn as_key(&self) -> Option<&str> {
        match self {
            Step::Key(key) => Some(key),
            Step::Index(_) => None,
        }
    }

    pub fn as_index(&self) -> Option<u32> {
        match self {
            Step::Index(index) => Some(*index),
            Step::Key(_) => None,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Key(key) => write!(f, "/{key}"),
            Step::Index(index) => write!(f, "+{index}"),
        }
    }
}

/// Whether a child may be written through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    Mutable,
    ReadOnly,
}

impl Access {
    /// Read-only if either side is.
    pub fn and(self, other: Access) -> Access {
        if self == Access::ReadOnly || other == Access::ReadOnly {
            Access::ReadOnly
        } else {
            Access::Mutable
        }
    }
}

/// Visitor passed to [`Item::visit_children`].
pub type ChildVisitor<'v> = dyn FnMut(Step, &dyn Item, Access) -> ControlFlow<()> + 'v;

#[doc(hidden)]
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A value the registry can store, serialize and walk.
pub trait Item: AsAny {
    /// Name for diagnostics.
    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    fn to_tree(&self, cx: &ToTreeCx<'_>) -> Result<Tree>;

    /// Report each child in order. Stops early when `visit` breaks.
    fn visit_children(&self, visit: &mut ChildVisitor<'_>) -> ControlFlow<()> {
        let _ = visit;
        ControlFlow::Continue(())
    }

    fn child(&self, step: &Step) -> Option<(&dyn Item, Access)> {
        let _ = step;
        None
    }

    /// Writable child. `None` for read-only children too.
    fn child_mut(&mut self, step: &Step) -> Option<&mut dyn Item> {
        let _ = step;
        None
    }

    fn as_link(&self) -> Option<&dyn AnyLink> {
        None
    }

    fn as_link_mut(&mut self) -> Option<&mut dyn AnyLink> {
        None
    }
}

/// Construction from a tree.
pub trait Describe: Item + Sized {
    /// Name used in resource files, unless registered under another.
    const NAME: &'static str;

    fn from_tree(tree: &Tree, cx: &mut FromTreeCx<'_>) -> Result<Self>;
}

// ============================================================================
// Contexts
// ============================================================================

/// State for [`Item::to_tree`].
pub struct ToTreeCx<'r> {
    registry: &'r Registry,
    base: Option<Resource>,
}

impl<'r> ToTreeCx<'r> {
    pub fn new(registry: &'r Registry) -> Self {
        Self { registry, base: None }
    }

    /// Links into `base` will be written as bare fragments.
    pub fn with_base(registry: &'r Registry, base: Resource) -> Self {
        Self {
            registry,
            base: Some(base),
        }
    }

    pub fn registry(&self) -> &'r Registry {
        self.registry
    }

    /// URI for a link target, relative when it lives in the base resource.
    pub fn link_uri(&self, target: &Reference) -> Result<String> {
        let loc = self.registry.reference_to_location(target)?;
        Ok(loc.to_relative_uri(self.base.as_ref()))
    }
}

/// A link read from a tree, waiting for its target to exist.
#[derive(Debug, Clone)]
pub(crate) struct PendingLink {
    /// Where the link sits, relative to the value being built.
    pub path: Vec<Step>,
    pub uri: String,
}

/// State for [`Describe::from_tree`].
///
/// Tracks the path from the root of the value being built, and collects
/// links so they can be resolved once every value they might point into
/// exists.
pub struct FromTreeCx<'r> {
    registry: &'r Registry,
    base: Option<Location>,
    path: Vec<Step>,
    links: Vec<PendingLink>,
}

impl<'r> FromTreeCx<'r> {
    pub fn new(registry: &'r Registry) -> Self {
        Self {
            registry,
            base: None,
            path: Vec::new(),
            links: Vec::new(),
        }
    }

    pub(crate) fn for_resource(registry: &'r Registry, resource: Resource) -> Self {
        Self {
            base: Some(Location::resource(resource)),
            ..Self::new(registry)
        }
    }

    pub fn registry(&self) -> &'r Registry {
        self.registry
    }

    /// Location that relative link URIs resolve against.
    pub fn base(&self) -> Option<&Location> {
        self.base.as_ref()
    }

    /// Path from the root of the value under construction.
    pub fn path(&self) -> &[Step] {
        &self.path
    }

    /// Run `f` one step further down.
    pub fn with_step<R>(&mut self, step: Step, f: impl FnOnce(&mut Self) -> R) -> R {
        self.path.push(step);
        let result = f(self);
        self.path.pop();
        result
    }

    /// Record that the link at the current path should point at `uri`.
    pub fn defer_link(&mut self, uri: &str) {
        self.links.push(PendingLink {
            path: self.path.clone(),
            uri: uri.to_string(),
        });
    }

    pub(crate) fn take_links(&mut self) -> Vec<PendingLink> {
        std::mem::take(&mut self.links)
    }
}

/// Build a value outside any resource and resolve its links.
///
/// Relative link URIs have nothing to resolve against here and fail.
pub fn from_tree<T: Describe>(registry: &Registry, tree: &Tree) -> Result<T> {
    let mut cx = FromTreeCx::new(registry);
    let mut value = T::from_tree(tree, &mut cx)?;
    let resolved = resolve_links(registry, None, cx.take_links())?;
    apply_links(&mut value, resolved)?;
    Ok(value)
}

/// Convert a value with no base resource.
pub fn to_tree(registry: &Registry, item: &dyn Item) -> Result<Tree> {
    item.to_tree(&ToTreeCx::new(registry))
}

/// Find the target of every pending link. Only reads.
pub(crate) fn resolve_links(
    registry: &Registry,
    base: Option<&Location>,
    pending: Vec<PendingLink>,
) -> Result<Vec<(Vec<Step>, Reference)>> {
    pending
        .into_iter()
        .map(|link| -> Result<(Vec<Step>, Reference)> {
            let loc = Location::from_uri(registry, &link.uri, base)?;
            let target = registry.location_to_reference(&loc)?;
            Ok((link.path, target))
        })
        .collect()
}

/// Point each link at its resolved target.
pub(crate) fn apply_links(root: &mut dyn Item, resolved: Vec<(Vec<Step>, Reference)>) -> Result<()> {
    for (path, target) in resolved {
        let link = walk_mut(root, &path)
            .and_then(|item| item.as_link_mut())
            .ok_or_else(|| Error::ReferenceNotFound {
                location: path_string(&path),
            })?;
        link.set_target(Some(target))?;
    }
    Ok(())
}

pub(crate) fn walk<'a>(root: &'a dyn Item, steps: &[Step]) -> Option<(&'a dyn Item, Access)> {
    let mut item = root;
    let mut access = Access::Mutable;
    for step in steps {
        let (child, child_access) = item.child(step)?;
        item = child;
        access = access.and(child_access);
    }
    Some((item, access))
}

pub(crate) fn walk_mut<'a>(root: &'a mut dyn Item, steps: &[Step]) -> Option<&'a mut dyn Item> {
    let mut item = root;
    for step in steps {
        item = item.child_mut(step)?;
    }
    Some(item)
}

fn path_string(path: &[Step]) -> String {
    let mut out = String::from("#");
    for step in path {
        out.push_str(&step.to_string());
    }
    out
}

fn cant_represent(type_name: &'static str, tree: &Tree) -> Error {
    Error::TreeCantRepresent {
        type_name,
        tree: print(tree, PrintOptions::COMPACT).unwrap_or_default(),
    }
}

/// Fill in an attribute the tree left out: only types that accept `null`
/// can go missing.
#[doc(hidden)]
pub fn missing_attr<T: Describe>(key: &'static str, cx: &mut FromTreeCx<'_>) -> Result<T> {
    T::from_tree(&Tree::null(), cx).map_err(|_| Error::AttrMissing { key: key.to_string() })
}

#[doc(hidden)]
pub fn reject_unknown_attrs(tree: &Tree, known: &[&str]) -> Result<()> {
    for (key, _) in tree.as_object()? {
        if !known.contains(&key.as_str()) {
            return Err(Error::AttrRejected { key: key.to_string() });
        }
    }
    Ok(())
}

// ============================================================================
// Scalars
// ============================================================================

macro_rules! scalar_item {
    ($t:ty, $name:literal, |$tree:ident| $from:expr) => {
        impl Item for $t {
            fn type_name(&self) -> &'static str {
                $name
            }

            fn to_tree(&self, _cx: &ToTreeCx<'_>) -> Result<Tree> {
                Ok(Tree::from(self.clone()))
            }
        }

        impl Describe for $t {
            const NAME: &'static str = $name;

            fn from_tree($tree: &Tree, _cx: &mut FromTreeCx<'_>) -> Result<Self> {
                $from
            }
        }
    };
}

scalar_item!(bool, "bool", |tree| tree.as_bool());
scalar_item!(i32, "i32", |tree| narrow(tree, "i32"));
scalar_item!(i64, "i64", |tree| tree.as_i64());
scalar_item!(u32, "u32", |tree| narrow(tree, "u32"));
scalar_item!(u64, "u64", |tree| to_u64(tree));
scalar_item!(f64, "f64", |tree| tree.as_f64());
scalar_item!(String, "String", |tree| tree.as_str().map(str::to_string));

fn narrow<T: TryFrom<i64>>(tree: &Tree, type_name: &'static str) -> Result<T> {
    T::try_from(tree.as_i64()?).map_err(|_| cant_represent(type_name, tree))
}

fn to_u64(tree: &Tree) -> Result<u64> {
    match tree.value() {
        Value::Int(i) => u64::try_from(*i).map_err(|_| cant_represent("u64", tree)),
        // Values past i64::MAX only survive parsing as doubles
        Value::Double(d) if d.fract() == 0.0 && *d >= 0.0 && *d < 18_446_744_073_709_551_616.0 => Ok(*d as u64),
        Value::Double(_) => Err(cant_represent("u64", tree)),
        _ => Err(Error::TreeWrongForm {
            expected: Form::Number,
            got: tree.form(),
        }),
    }
}

// ============================================================================
// Trees
// ============================================================================

/// A raw tree. Its children can be read and linked to but not written.
impl Item for Tree {
    fn type_name(&self) -> &'static str {
        "Tree"
    }

    fn to_tree(&self, _cx: &ToTreeCx<'_>) -> Result<Tree> {
        Ok(self.clone())
    }

    fn visit_children(&self, visit: &mut ChildVisitor<'_>) -> ControlFlow<()> {
        match self.value() {
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    visit(Step::Index(i as u32), item, Access::ReadOnly)?;
                }
            }
            Value::Object(pairs) => {
                for (key, value) in pairs.iter() {
                    visit(Step::Key(key.clone()), value, Access::ReadOnly)?;
                }
            }
            _ => {}
        }
        ControlFlow::Continue(())
    }

    fn child(&self, step: &Step) -> Option<(&dyn Item, Access)> {
        let child = match step {
            Step::Index(index) => self.elem(*index as usize)?,
            Step::Key(key) => self.attr(key)?,
        };
        Some((child as &dyn Item, Access::ReadOnly))
    }
}

impl Describe for Tree {
    const NAME: &'static str = "Tree";

    fn from_tree(tree: &Tree, _cx: &mut FromTreeCx<'_>) -> Result<Self> {
        Ok(tree.clone())
    }
}

// ============================================================================
// Containers
// ============================================================================

impl<T: Item> Item for Vec<T> {
    fn to_tree(&self, cx: &ToTreeCx<'_>) -> Result<Tree> {
        let items = self.iter().map(|item| item.to_tree(cx)).collect::<Result<Vec<_>>>()?;
        Ok(Tree::from(items))
    }

    fn visit_children(&self, visit: &mut ChildVisitor<'_>) -> ControlFlow<()> {
        for (i, item) in self.iter().enumerate() {
            visit(Step::Index(i as u32), item, Access::Mutable)?;
        }
        ControlFlow::Continue(())
    }

    fn child(&self, step: &Step) -> Option<(&dyn Item, Access)> {
        let item = self.get(step.as_index()? as usize)?;
        Some((item as &dyn Item, Access::Mutable))
    }

    fn child_mut(&mut self, step: &Step) -> Option<&mut dyn Item> {
        let item = self.get_mut(step.as_index()? as usize)?;
        Some(item as &mut dyn Item)
    }
}

impl<T: Describe> Describe for Vec<T> {
    const NAME: &'static str = "Vec";

    fn from_tree(tree: &Tree, cx: &mut FromTreeCx<'_>) -> Result<Self> {
        tree.as_array()?
            .iter()
            .enumerate()
            .map(|(i, elem)| cx.with_step(Step::Index(i as u32), |cx| T::from_tree(elem, cx)))
            .collect()
    }
}

impl<T: Item> Item for IndexMap<String, T> {
    fn to_tree(&self, cx: &ToTreeCx<'_>) -> Result<Tree> {
        let mut pairs = Vec::with_capacity(self.len());
        for (key, value) in self {
            pairs.push((TreeString::from(key.clone()), value.to_tree(cx)?));
        }
        Ok(Tree::object(pairs))
    }

    fn visit_children(&self, visit: &mut ChildVisitor<'_>) -> ControlFlow<()> {
        for (key, value) in self {
            visit(Step::Key(TreeString::from(key.clone())), value, Access::Mutable)?;
        }
        ControlFlow::Continue(())
    }

    fn child(&self, step: &Step) -> Option<(&dyn Item, Access)> {
        let value = self.get(step.as_key()?)?;
        Some((value as &dyn Item, Access::Mutable))
    }

    fn child_mut(&mut self, step: &Step) -> Option<&mut dyn Item> {
        let value = self.get_mut(step.as_key()?)?;
        Some(value as &mut dyn Item)
    }
}

impl<T: Describe> Describe for IndexMap<String, T> {
    const NAME: &'static str = "Map";

    fn from_tree(tree: &Tree, cx: &mut FromTreeCx<'_>) -> Result<Self> {
        let mut map = IndexMap::new();
        for (key, value) in tree.as_object()? {
            let step = Step::Key(key.clone());
            let value = cx.with_step(step, |cx| T::from_tree(value, cx))?;
            map.insert(key.to_string(), value);
        }
        Ok(map)
    }
}

/// `null` when empty; otherwise the inner value stands in for the option,
/// children and all.
impl<T: Item> Item for Option<T> {
    fn to_tree(&self, cx: &ToTreeCx<'_>) -> Result<Tree> {
        match self {
            Some(value) => value.to_tree(cx),
            None => Ok(Tree::null()),
        }
    }

    fn visit_children(&self, visit: &mut ChildVisitor<'_>) -> ControlFlow<()> {
        match self {
            Some(value) => value.visit_children(visit),
            None => ControlFlow::Continue(()),
        }
    }

    fn child(&self, step: &Step) -> Option<(&dyn Item, Access)> {
        self.as_ref()?.child(step)
    }

    fn child_mut(&mut self, step: &Step) -> Option<&mut dyn Item> {
        self.as_mut()?.child_mut(step)
    }

    fn as_link(&self) -> Option<&dyn AnyLink> {
        self.as_ref()?.as_link()
    }

    fn as_link_mut(&mut self) -> Option<&mut dyn AnyLink> {
        self.as_mut()?.as_link_mut()
    }
}

impl<T: Describe> Describe for Option<T> {
    const NAME: &'static str = "Option";

    fn from_tree(tree: &Tree, cx: &mut FromTreeCx<'_>) -> Result<Self> {
        if tree.is_null() {
            Ok(None)
        } else {
            T::from_tree(tree, cx).map(Some)
        }
    }
}

// ============================================================================
// Links
// ============================================================================

/// Type-erased view of a [`Link`], used by scans and reload repair.
pub trait AnyLink {
    fn target(&self) -> Option<&Reference>;

    fn target_type(&self) -> TypeId;

    fn target_type_name(&self) -> &'static str;

    /// Repoint the link. Fails if `target` isn't the link's type.
    fn set_target(&mut self, target: Option<Reference>) -> Result<()>;
}

/// A typed, nullable reference to a value in some resource.
///
/// Written as the target's location URI: a bare `#...` fragment when the
/// target shares the link's resource, a full URI otherwise, `null` when
/// unset. Reading one defers resolution until the values it can point into
/// have been built.
pub struct Link<T> {
    target: Option<Reference>,
    _type: PhantomData<fn() -> T>,
}

impl<T: Item> Link<T> {
    pub fn unset() -> Self {
        Self {
            target: None,
            _type: PhantomData,
        }
    }

    pub fn to(target: &T) -> Self {
        Self {
            target: Some(Reference::of(target)),
            _type: PhantomData,
        }
    }

    pub fn target(&self) -> Option<&Reference> {
        self.target.as_ref()
    }

    pub fn is_set(&self) -> bool {
        self.target.is_some()
    }

    /// Whether this points at `value`.
    pub fn points_to(&self, value: &T) -> bool {
        self.target.as_ref() == Some(&Reference::of(value))
    }
}

impl<T> Clone for Link<T> {
    fn clone(&self) -> Self {
        Self {
            target: self.target.clone(),
            _type: PhantomData,
        }
    }
}

impl<T: Item> Default for Link<T> {
    fn default() -> Self {
        Self::unset()
    }
}

impl<T> PartialEq for Link<T> {
    fn eq(&self, other: &Self) -> bool {
        self.target == other.target
    }
}

impl<T> fmt::Debug for Link<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            Some(target) => write!(f, "Link({target:?})"),
            None => f.write_str("Link(unset)"),
        }
    }
}

impl<T: Item> AnyLink for Link<T> {
    fn target(&self) -> Option<&Reference> {
        self.target.as_ref()
    }

    fn target_type(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn target_type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn set_target(&mut self, target: Option<Reference>) -> Result<()> {
        if let Some(r) = &target {
            if r.type_id() != TypeId::of::<T>() {
                return Err(Error::ReferenceWrongType {
                    location: format!("{r:?}"),
                    expected: std::any::type_name::<T>(),
                    got: r.type_name(),
                });
            }
        }
        self.target = target;
        Ok(())
    }
}

impl<T: Item> Item for Link<T> {
    fn type_name(&self) -> &'static str {
        "Link"
    }

    fn to_tree(&self, cx: &ToTreeCx<'_>) -> Result<Tree> {
        match &self.target {
            Some(target) => Ok(Tree::from(cx.link_uri(target)?)),
            None => Ok(Tree::null()),
        }
    }

    fn as_link(&self) -> Option<&dyn AnyLink> {
        Some(self as &dyn AnyLink)
    }

    fn as_link_mut(&mut self) -> Option<&mut dyn AnyLink> {
        Some(self as &mut dyn AnyLink)
    }
}

impl<T: Item> Describe for Link<T> {
    const NAME: &'static str = "Link";

    fn from_tree(tree: &Tree, cx: &mut FromTreeCx<'_>) -> Result<Self> {
        if !tree.is_null() {
            cx.defer_link(tree.as_str()?);
        }
        Ok(Self::unset())
    }
}

// ============================================================================
// Records
// ============================================================================

/// Implement [`Item`] and [`Describe`] for a struct with named fields.
///
/// The struct serializes as an object keyed by field name. Missing
/// attributes are an error unless the field accepts `null` (an `Option`);
/// unknown attributes are always an error.
///
/// ```
/// use ayu_core::{record, Link};
///
/// struct Weapon {
///     name: String,
///     damage: i32,
/// }
/// record!(Weapon as "Weapon" { name, damage });
///
/// struct Loadout {
///     primary: Link<Weapon>,
///     spare: Option<i32>,
/// }
/// record!(Loadout as "Loadout" { primary, spare });
/// ```
#[macro_export]
macro_rules! record {
    ($ty:ty as $name:literal { $($field:ident),* $(,)? }) => {
        impl $crate::Item for $ty {
            fn type_name(&self) -> &'static str {
                $name
            }

            fn to_tree(&self, cx: &$crate::ToTreeCx<'_>) -> $crate::Result<$crate::Tree> {
                let mut pairs: ::std::vec::Vec<(&'static str, $crate::Tree)> = ::std::vec::Vec::new();
                $( pairs.push((stringify!($field), $crate::Item::to_tree(&self.$field, cx)?)); )*
                let _ = cx;
                Ok($crate::Tree::object(pairs))
            }

            fn visit_children(
                &self,
                visit: &mut $crate::item::ChildVisitor<'_>,
            ) -> ::std::ops::ControlFlow<()> {
                $(
                    visit(
                        $crate::Step::Key($crate::TreeString::Static(stringify!($field))),
                        &self.$field,
                        $crate::Access::Mutable,
                    )?;
                )*
                let _ = visit;
                ::std::ops::ControlFlow::Continue(())
            }

            fn child(&self, step: &$crate::Step) -> Option<(&dyn $crate::Item, $crate::Access)> {
                match step.as_key()? {
                    $( stringify!($field) => Some((&self.$field as &dyn $crate::Item, $crate::Access::Mutable)), )*
                    _ => None,
                }
            }

            fn child_mut(&mut self, step: &$crate::Step) -> Option<&mut dyn $crate::Item> {
                match step.as_key()? {
                    $( stringify!($field) => Some(&mut self.$field as &mut dyn $crate::Item), )*
                    _ => None,
                }
            }
        }

        impl $crate::Describe for $ty {
            const NAME: &'static str = $name;

            fn from_tree(tree: &$crate::Tree, cx: &mut $crate::FromTreeCx<'_>) -> $crate::Result<Self> {
                $crate::item::reject_unknown_attrs(tree, &[$(stringify!($field)),*])?;
                let _ = &cx;
                Ok(Self {
                    $(
                        $field: cx.with_step(
                            $crate::Step::Key($crate::TreeString::Static(stringify!($field))),
                            |cx| match tree.attr(stringify!($field)) {
                                Some(attr) => $crate::Describe::from_tree(attr, cx),
                                None => $crate::item::missing_attr(stringify!($field), cx),
                            },
                        )?,
                    )*
                })
            }
        }
    };
}
