//! Named top-level values and their lifecycle states.
//!
//! A [`Resource`] is a shared handle; every handle for a name aliases the
//! same state. Handles come from [`Registry::resource`](crate::Registry::resource),
//! which creates the entry on first lookup. Entries are never removed, so a
//! handle stays meaningful after its value is unloaded.

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::item::Item;

/// Where a resource is in its lifecycle.
///
/// ```text
/// Unloaded -> Loading -> Loaded
/// Loaded -> SaveVerifying -> SaveCommitting -> Loaded
/// Loaded -> UnloadVerifying -> UnloadCommitting -> Unloaded
/// Loaded -> ReloadConstructing -> ReloadVerifying -> ReloadCommitting -> Loaded
/// Loading -> LoadRollback -> Unloaded
/// Reload* -> ReloadRollback -> Loaded
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    Unloaded,
    Loading,
    Loaded,
    SaveVerifying,
    SaveCommitting,
    UnloadVerifying,
    UnloadCommitting,
    ReloadConstructing,
    ReloadVerifying,
    ReloadCommitting,
    LoadRollback,
    ReloadRollback,
}

impl ResourceState {
    pub fn name(self) -> &'static str {
        match self {
            Self::Unloaded => "unloaded",
            Self::Loading => "loading",
            Self::Loaded => "loaded",
            Self::SaveVerifying => "save-verifying",
            Self::SaveCommitting => "save-committing",
            Self::UnloadVerifying => "unload-verifying",
            Self::UnloadCommitting => "unload-committing",
            Self::ReloadConstructing => "reload-constructing",
            Self::ReloadVerifying => "reload-verifying",
            Self::ReloadCommitting => "reload-committing",
            Self::LoadRollback => "load-rollback",
            Self::ReloadRollback => "reload-rollback",
        }
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

struct ResourceData {
    name: String,
    state: Cell<ResourceState>,
    value: RefCell<Option<Box<dyn Item>>>,
    /// The value being replaced, while a reload is in flight.
    old_value: RefCell<Option<Box<dyn Item>>>,
}

/// Shared handle to a named resource.
#[derive(Clone)]
pub struct Resource(Rc<ResourceData>);

impl Resource {
    pub(crate) fn new(name: String) -> Self {
        Resource(Rc::new(ResourceData {
            name,
            state: Cell::new(ResourceState::Unloaded),
            value: RefCell::new(None),
            old_value: RefCell::new(None),
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn state(&self) -> ResourceState {
        self.0.state.get()
    }

    pub fn is_loaded(&self) -> bool {
        self.state() != ResourceState::Unloaded
    }

    pub(crate) fn set_state(&self, state: ResourceState) {
        let old = self.0.state.replace(state);
        tracing::trace!(resource = %self.0.name, from = %old, to = %state, "state change");
    }

    /// Fail unless the resource is in `expected`.
    pub(crate) fn expect_state(&self, operation: &'static str, expected: ResourceState) -> Result<()> {
        let state = self.state();
        if state != expected {
            return Err(Error::ResourceStateInvalid {
                operation,
                name: self.0.name.clone(),
                state,
            });
        }
        Ok(())
    }

    pub(crate) fn has_value(&self) -> bool {
        self.0.value.try_borrow().map_or(true, |v| v.is_some())
    }

    pub(crate) fn borrow_value(&self) -> Result<Ref<'_, Option<Box<dyn Item>>>> {
        self.0.value.try_borrow().map_err(|_| self.busy())
    }

    pub(crate) fn borrow_value_mut(&self) -> Result<RefMut<'_, Option<Box<dyn Item>>>> {
        self.0.value.try_borrow_mut().map_err(|_| self.busy())
    }

    pub(crate) fn replace_value(&self, value: Option<Box<dyn Item>>) -> Result<Option<Box<dyn Item>>> {
        Ok(std::mem::replace(&mut *self.borrow_value_mut()?, value))
    }

    pub(crate) fn borrow_old_value(&self) -> Result<Ref<'_, Option<Box<dyn Item>>>> {
        self.0.old_value.try_borrow().map_err(|_| self.busy())
    }

    pub(crate) fn replace_old_value(&self, value: Option<Box<dyn Item>>) -> Result<Option<Box<dyn Item>>> {
        let mut slot = self.0.old_value.try_borrow_mut().map_err(|_| self.busy())?;
        Ok(std::mem::replace(&mut *slot, value))
    }

    fn busy(&self) -> Error {
        Error::ResourceBusy {
            name: self.0.name.clone(),
        }
    }
}

impl PartialEq for Resource {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Resource {}

impl Hash for Resource {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Rc::as_ptr(&self.0).hash(state);
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("name", &self.0.name)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_checks() {
        let res = Resource::new("a.ayu".into());
        assert_eq!(res.state(), ResourceState::Unloaded);
        assert!(res.expect_state("load", ResourceState::Unloaded).is_ok());
        let err = res.expect_state("save", ResourceState::Loaded).unwrap_err();
        assert_eq!(err.to_string(), r#"can't save resource "a.ayu" while it is unloaded"#);
    }

    #[test]
    fn test_handles_alias() {
        let a = Resource::new("x".into());
        let b = a.clone();
        b.set_state(ResourceState::Loaded);
        assert_eq!(a.state(), ResourceState::Loaded);
        assert_eq!(a, b);
        assert_ne!(a, Resource::new("x".into()));
    }

    #[test]
    fn test_busy_value() {
        let res = Resource::new("x".into());
        let _held = res.borrow_value_mut().unwrap();
        assert_eq!(res.borrow_value().err().unwrap().code(), "ResourceBusy");
    }
}
