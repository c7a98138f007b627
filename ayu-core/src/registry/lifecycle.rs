//! Load, save, unload, reload and rename.
//!
//! Every operation checks the states of the resources it is given, runs a
//! verify phase, and puts everything back if verification fails. What is
//! left to make the change permanent goes on the current transaction as a
//! [`Committer`], so it happens when the outermost transaction commits.
//!
//! Resource files hold one array, `[TypeName value]`.

use std::any::TypeId;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io;
use std::ops::ControlFlow;
use std::path::PathBuf;

use super::Registry;
use crate::error::{Error, ReloadBreak, Result, UnloadBreak};
use crate::item::{apply_links, resolve_links, walk_mut, Access, FromTreeCx, Item, PendingLink, ToTreeCx};
use crate::location::Location;
use crate::parser::parse_file;
use crate::printer::{print, write_file, PrintOptions};
use crate::reference::Reference;
use crate::resource::{Resource, ResourceState};
use crate::scan::{scan_item, scan_resource_links, scan_resources};
use crate::transaction::Committer;
use crate::tree::Tree;

// ============================================================================
// Delayed links
// ============================================================================

/// Links read during a load, waiting for every value in the batch to exist.
#[derive(Default)]
pub(super) struct DelayedLinks {
    depth: Cell<usize>,
    queue: RefCell<Vec<(Resource, Vec<PendingLink>)>>,
}

/// One level of delayed-link nesting. Loads started while resolving links
/// (to load a link's target) queue their own links on the outer level.
struct DelayedLinksGuard<'r> {
    registry: &'r Registry,
}

impl<'r> DelayedLinksGuard<'r> {
    fn new(registry: &'r Registry) -> Self {
        let links = &registry.links;
        links.depth.set(links.depth.get() + 1);
        Self { registry }
    }

    fn defer(&self, res: &Resource, pending: Vec<PendingLink>) {
        if !pending.is_empty() {
            self.registry.links.queue.borrow_mut().push((res.clone(), pending));
        }
    }

    fn discard(&self, batch: &[Resource]) {
        self.registry
            .links
            .queue
            .borrow_mut()
            .retain(|(res, _)| !batch.contains(res));
    }

    /// At the outermost level, resolve queued links until none are left.
    fn finish(&self) -> Result<()> {
        let links = &self.registry.links;
        if links.depth.get() > 1 {
            return Ok(());
        }
        loop {
            let batch = std::mem::take(&mut *links.queue.borrow_mut());
            if batch.is_empty() {
                return Ok(());
            }
            for (res, pending) in batch {
                if let Err(err) = self.registry.link_resource(&res, pending) {
                    links.queue.borrow_mut().clear();
                    return Err(err);
                }
            }
        }
    }
}

impl Drop for DelayedLinksGuard<'_> {
    fn drop(&mut self) {
        let links = &self.registry.links;
        let depth = links.depth.get() - 1;
        links.depth.set(depth);
        if depth == 0 {
            links.queue.borrow_mut().clear();
        }
    }
}

// ============================================================================
// Committers
// ============================================================================

struct LoadCommitter {
    resources: Vec<Resource>,
}

impl Committer<Registry> for LoadCommitter {
    fn commit(self: Box<Self>, _registry: &Registry) -> Result<()> {
        for res in &self.resources {
            res.set_state(ResourceState::Loaded);
            tracing::info!(resource = %res.name(), "loaded");
        }
        Ok(())
    }

    fn rollback(self: Box<Self>, registry: &Registry) {
        for res in &self.resources {
            registry.rollback_load(res);
        }
    }
}

struct SaveCommitter {
    files: Vec<(Resource, PathBuf, String)>,
}

impl Committer<Registry> for SaveCommitter {
    fn commit(self: Box<Self>, _registry: &Registry) -> Result<()> {
        let mut result = Ok(());
        for (res, path, text) in &self.files {
            res.set_state(ResourceState::SaveCommitting);
            if result.is_ok() {
                result = write_file(path, text.as_bytes());
                if result.is_ok() {
                    tracing::info!(resource = %res.name(), path = %path.display(), "saved");
                }
            }
            res.set_state(ResourceState::Loaded);
        }
        result
    }

    fn rollback(self: Box<Self>, _registry: &Registry) {
        for (res, _, _) in &self.files {
            res.set_state(ResourceState::Loaded);
        }
    }
}

struct UnloadCommitter {
    resources: Vec<Resource>,
}

impl Committer<Registry> for UnloadCommitter {
    fn commit(self: Box<Self>, registry: &Registry) -> Result<()> {
        let mut result = Ok(());
        for res in &self.resources {
            res.set_state(ResourceState::UnloadCommitting);
            match res.replace_value(None) {
                Ok(value) => {
                    drop(value);
                    res.set_state(ResourceState::Unloaded);
                    tracing::info!(resource = %res.name(), "unloaded");
                }
                Err(err) => {
                    res.set_state(ResourceState::Loaded);
                    if result.is_ok() {
                        result = Err(err);
                    }
                }
            }
        }
        registry.invalidate_cache();
        result
    }

    fn rollback(self: Box<Self>, _registry: &Registry) {
        for res in &self.resources {
            res.set_state(ResourceState::Loaded);
        }
    }
}

/// A link outside a reload batch that pointed into an old value.
struct Stale {
    holder: Location,
    target: Location,
    target_type: TypeId,
    target_type_name: &'static str,
}

/// Where a stale link should point once the reload commits.
struct Repoint {
    holder: Location,
    target: Reference,
}

struct ReloadCommitter {
    resources: Vec<Resource>,
    repoints: Vec<Repoint>,
}

impl Committer<Registry> for ReloadCommitter {
    fn commit(self: Box<Self>, registry: &Registry) -> Result<()> {
        for res in &self.resources {
            res.set_state(ResourceState::ReloadCommitting);
        }
        for repoint in &self.repoints {
            if let Err(err) = registry.repoint(repoint) {
                unrecoverable("failed to repoint a link into a reloaded resource", &err);
            }
        }
        for res in &self.resources {
            match res.replace_old_value(None) {
                Ok(old) => drop(old),
                Err(err) => unrecoverable("failed to destroy the old value of a reloaded resource", &err),
            }
            res.set_state(ResourceState::Loaded);
            tracing::info!(resource = %res.name(), repointed = self.repoints.len(), "reloaded");
        }
        registry.invalidate_cache();
        Ok(())
    }

    fn rollback(self: Box<Self>, registry: &Registry) {
        for res in &self.resources {
            registry.restore_old(res);
        }
    }
}

/// Report and abort. Used only where no consistent prior state is left.
fn unrecoverable(context: &str, err: &Error) -> ! {
    tracing::error!(error = %err, code = err.code(), "{}", context);
    std::process::abort()
}

fn distinct(resources: &[Resource]) -> Vec<Resource> {
    let mut out: Vec<Resource> = Vec::with_capacity(resources.len());
    for res in resources {
        if !out.contains(res) {
            out.push(res.clone());
        }
    }
    out
}

fn set_states(resources: &[Resource], state: ResourceState) {
    for res in resources {
        res.set_state(state);
    }
}

// ============================================================================
// Operations
// ============================================================================

impl Registry {
    /// Read, parse and build the values of `resources` as one batch.
    ///
    /// Links may point anywhere in the batch. Links into other unloaded
    /// resources load those too. On failure nothing in the batch stays
    /// loaded.
    pub fn load(&self, resources: &[Resource]) -> Result<()> {
        let resources = distinct(resources);
        let tx = self.transaction();
        for res in &resources {
            res.expect_state("load", ResourceState::Unloaded)?;
        }
        let links = DelayedLinksGuard::new(self);
        for res in &resources {
            res.set_state(ResourceState::Loading);
            tracing::debug!(resource = %res.name(), "loading");
        }
        if let Err(err) = self.load_batch(&resources, &links) {
            links.discard(&resources);
            for res in &resources {
                self.rollback_load(res);
            }
            tracing::warn!(error = %err, "load failed");
            return Err(err);
        }
        drop(links);
        tx.defer(Box::new(LoadCommitter { resources }));
        tx.commit()
    }

    fn load_batch(&self, resources: &[Resource], links: &DelayedLinksGuard<'_>) -> Result<()> {
        for res in resources {
            let (value, pending) = self.read_value(res)?;
            res.replace_value(Some(value))?;
            links.defer(res, pending);
        }
        self.invalidate_cache();
        links.finish()
    }

    fn rollback_load(&self, res: &Resource) {
        res.set_state(ResourceState::LoadRollback);
        match res.replace_value(None) {
            Ok(value) => drop(value),
            Err(err) => unrecoverable("failed to destroy a partially loaded value", &err),
        }
        res.set_state(ResourceState::Unloaded);
        self.invalidate_cache();
    }

    /// Build a resource's value from its file. Links come back unresolved.
    fn read_value(&self, res: &Resource) -> Result<(Box<dyn Item>, Vec<PendingLink>)> {
        let scheme = self.scheme_for(res.name())?;
        let path = scheme.get_file(res.name())?;
        let tree = parse_file(&path)?;
        let invalid = |reason: &str| Error::ResourceValueInvalid {
            name: res.name().to_string(),
            reason: reason.to_string(),
        };
        let (type_name, value) = match tree.as_array() {
            Ok([type_name, value]) => (
                type_name.as_str().map_err(|_| invalid("type name must be a string"))?,
                value,
            ),
            _ => return Err(invalid("expected [Type value]")),
        };
        if !scheme.accepts_type(type_name) {
            return Err(Error::ResourceTypeRejected {
                name: res.name().to_string(),
                type_name: type_name.to_string(),
            });
        }
        let mut cx = FromTreeCx::for_resource(self, res.clone());
        let value = self.construct(type_name, value, &mut cx)?;
        Ok((value, cx.take_links()))
    }

    /// Resolve `pending` against the current state and point the links in
    /// `res` at the results.
    fn link_resource(&self, res: &Resource, pending: Vec<PendingLink>) -> Result<()> {
        let count = pending.len();
        let resolved = resolve_links(self, Some(&Location::resource(res.clone())), pending)?;
        let mut value = res.borrow_value_mut()?;
        let root = value.as_deref_mut().ok_or_else(|| Error::ResourceValueInvalid {
            name: res.name().to_string(),
            reason: "no value to link".to_string(),
        })?;
        apply_links(root, resolved)?;
        tracing::trace!(resource = %res.name(), count, "links resolved");
        Ok(())
    }

    /// Write the values of `resources` back to their files.
    ///
    /// Everything is serialized before any file is touched.
    pub fn save(&self, resources: &[Resource]) -> Result<()> {
        let resources = distinct(resources);
        let tx = self.transaction();
        for res in &resources {
            res.expect_state("save", ResourceState::Loaded)?;
        }
        set_states(&resources, ResourceState::SaveVerifying);
        let outputs = {
            let _cache = self.location_cache();
            resources
                .iter()
                .map(|res| self.serialize(res))
                .collect::<Result<Vec<_>>>()
        };
        let outputs = match outputs {
            Ok(outputs) => outputs,
            Err(err) => {
                set_states(&resources, ResourceState::Loaded);
                tracing::warn!(error = %err, "save failed");
                return Err(err);
            }
        };
        let files = resources
            .into_iter()
            .zip(outputs)
            .map(|(res, (path, text))| (res, path, text))
            .collect();
        tx.defer(Box::new(SaveCommitter { files }));
        tx.commit()
    }

    fn serialize(&self, res: &Resource) -> Result<(PathBuf, String)> {
        let scheme = self.scheme_for(res.name())?;
        let path = scheme.get_file(res.name())?;
        let value = res.borrow_value()?;
        let item = value.as_deref().ok_or_else(|| Error::ResourceValueInvalid {
            name: res.name().to_string(),
            reason: "no value to save".to_string(),
        })?;
        let type_name = self.type_name_of(item)?;
        if !scheme.accepts_type(&type_name) {
            return Err(Error::ResourceTypeRejected {
                name: res.name().to_string(),
                type_name,
            });
        }
        let cx = ToTreeCx::with_base(self, res.clone());
        let tree = Tree::array([Tree::from(type_name), item.to_tree(&cx)?]);
        let mut text = print(&tree, PrintOptions::PRETTY)?;
        text.push('\n');
        Ok((path, text))
    }

    /// Unload `resources` together.
    ///
    /// Fails without unloading anything if a link in some other loaded
    /// resource points into one of them. Already-unloaded resources are
    /// skipped.
    pub fn unload(&self, resources: &[Resource]) -> Result<()> {
        let targets: Vec<Resource> = distinct(resources)
            .into_iter()
            .filter(|res| res.state() != ResourceState::Unloaded)
            .collect();
        let tx = self.transaction();
        for res in &targets {
            res.expect_state("unload", ResourceState::Loaded)?;
        }
        set_states(&targets, ResourceState::UnloadVerifying);
        if let Err(err) = self.verify_unload(&targets) {
            set_states(&targets, ResourceState::Loaded);
            return Err(err);
        }
        tx.defer(Box::new(UnloadCommitter { resources: targets }));
        tx.commit()
    }

    fn verify_unload(&self, targets: &[Resource]) -> Result<()> {
        let mut inside: HashMap<Reference, Location> = HashMap::new();
        let _ = scan_resources(targets, &mut |node, loc, access| {
            inside
                .entry(Reference::from_item(node, access))
                .or_insert_with(|| loc.clone());
            ControlFlow::Continue(())
        })?;

        let others: Vec<Resource> = self
            .loaded_resources()
            .into_iter()
            .filter(|res| !targets.contains(res))
            .collect();
        let mut breaks = Vec::new();
        scan_resource_links(&others, &mut |link, from| {
            if let Some(to) = link.target().and_then(|target| inside.get(target)) {
                breaks.push(UnloadBreak {
                    from: from.to_uri(),
                    to: to.to_uri(),
                });
            }
            ControlFlow::Continue(())
        })?;

        if breaks.is_empty() {
            Ok(())
        } else {
            tracing::warn!(count = breaks.len(), "unload would break references");
            Err(Error::ResourceUnloadWouldBreak { breaks })
        }
    }

    /// Unload without checking for links into `resources`. Any such link is
    /// left pointing at freed memory's old address and will no longer
    /// resolve.
    pub fn force_unload(&self, resources: &[Resource]) -> Result<()> {
        for res in distinct(resources) {
            if res.state() == ResourceState::Unloaded {
                continue;
            }
            res.expect_state("force unload", ResourceState::Loaded)?;
            res.set_state(ResourceState::UnloadCommitting);
            if let Err(err) = res.replace_value(None) {
                res.set_state(ResourceState::Loaded);
                return Err(err);
            }
            res.set_state(ResourceState::Unloaded);
            tracing::warn!(resource = %res.name(), "force unloaded");
        }
        self.invalidate_cache();
        Ok(())
    }

    /// Replace the values of `resources` with fresh ones from their files.
    ///
    /// Links elsewhere that pointed into the old values are repointed to
    /// the same locations in the new ones. If any such location no longer
    /// exists the reload fails and the old values stay.
    pub fn reload(&self, resources: &[Resource]) -> Result<()> {
        let resources = distinct(resources);
        let tx = self.transaction();
        for res in &resources {
            res.expect_state("reload", ResourceState::Loaded)?;
        }
        set_states(&resources, ResourceState::ReloadConstructing);
        tracing::debug!(count = resources.len(), "reloading");

        let mut built = Vec::with_capacity(resources.len());
        for res in &resources {
            match self.read_value(res) {
                Ok(value) => built.push(value),
                Err(err) => {
                    set_states(&resources, ResourceState::Loaded);
                    tracing::warn!(resource = %res.name(), error = %err, "reload failed");
                    return Err(err);
                }
            }
        }

        let mut pending = Vec::with_capacity(resources.len());
        for (i, (res, (value, links))) in resources.iter().zip(built).enumerate() {
            if let Err(err) = self.swap_in(res, value) {
                for swapped in &resources[..i] {
                    self.restore_old(swapped);
                }
                set_states(&resources[i..], ResourceState::Loaded);
                return Err(err);
            }
            pending.push((res.clone(), links));
        }
        self.invalidate_cache();
        set_states(&resources, ResourceState::ReloadVerifying);

        match self.verify_reload(&resources, pending) {
            Ok(repoints) => {
                tx.defer(Box::new(ReloadCommitter { resources, repoints }));
                tx.commit()
            }
            Err(err) => {
                for res in &resources {
                    self.restore_old(res);
                }
                tracing::warn!(error = %err, "reload failed");
                Err(err)
            }
        }
    }

    /// Install `value`, keeping the current one aside.
    fn swap_in(&self, res: &Resource, value: Box<dyn Item>) -> Result<()> {
        let old = res.replace_value(Some(value))?;
        if let Err(err) = res.replace_old_value(old) {
            unrecoverable("lost the value being reloaded", &err);
        }
        Ok(())
    }

    fn restore_old(&self, res: &Resource) {
        res.set_state(ResourceState::ReloadRollback);
        let old = res
            .replace_old_value(None)
            .unwrap_or_else(|err| unrecoverable("failed to take back an old value", &err));
        match res.replace_value(old) {
            Ok(new) => drop(new),
            Err(err) => unrecoverable("failed to restore an old value", &err),
        }
        res.set_state(ResourceState::Loaded);
        self.invalidate_cache();
    }

    fn verify_reload(&self, resources: &[Resource], pending: Vec<(Resource, Vec<PendingLink>)>) -> Result<Vec<Repoint>> {
        // New values resolve their own links right away, against new values
        for (res, links) in pending {
            self.link_resource(&res, links)?;
        }

        let mut old: HashMap<Reference, Location> = HashMap::new();
        for res in resources {
            let slot = res.borrow_old_value()?;
            if let Some(value) = slot.as_deref() {
                let root = Location::resource(res.clone());
                let _ = scan_item(value, &root, Access::Mutable, &mut |node, loc, access| {
                    old.entry(Reference::from_item(node, access))
                        .or_insert_with(|| loc.clone());
                    ControlFlow::Continue(())
                });
            }
        }

        let others: Vec<Resource> = self
            .loaded_resources()
            .into_iter()
            .filter(|res| !resources.contains(res))
            .collect();
        let mut stale = Vec::new();
        scan_resource_links(&others, &mut |link, holder| {
            if let Some(target) = link.target().and_then(|target| old.get(target)) {
                stale.push(Stale {
                    holder: holder.clone(),
                    target: target.clone(),
                    target_type: link.target_type(),
                    target_type_name: link.target_type_name(),
                });
            }
            ControlFlow::Continue(())
        })?;

        let mut repoints = Vec::with_capacity(stale.len());
        let mut breaks = Vec::new();
        for Stale {
            holder,
            target,
            target_type,
            target_type_name,
        } in stale
        {
            let cause = match self.location_to_reference(&target) {
                Ok(r) if r.type_id() == target_type => {
                    repoints.push(Repoint { holder, target: r });
                    continue;
                }
                Ok(r) => Error::ReferenceWrongType {
                    location: target.to_uri(),
                    expected: target_type_name,
                    got: r.type_name(),
                },
                Err(err) => err,
            };
            breaks.push(ReloadBreak {
                from: holder.to_uri(),
                to: target.to_uri(),
                cause: Box::new(cause),
            });
        }

        if breaks.is_empty() {
            tracing::debug!(count = repoints.len(), "reload verified");
            Ok(repoints)
        } else {
            Err(Error::ResourceReloadWouldBreak { breaks })
        }
    }

    fn repoint(&self, repoint: &Repoint) -> Result<()> {
        let not_found = || Error::ReferenceNotFound {
            location: repoint.holder.to_uri(),
        };
        let res = repoint.holder.root_resource().ok_or_else(not_found)?;
        let mut value = res.borrow_value_mut()?;
        let root = value.as_deref_mut().ok_or_else(not_found)?;
        let link = walk_mut(root, &repoint.holder.steps())
            .and_then(|item| item.as_link_mut())
            .ok_or_else(not_found)?;
        link.set_target(Some(repoint.target.clone()))
    }

    /// Move a loaded value to an unloaded name. The value isn't rebuilt, so
    /// links into it stay valid and now resolve under the new name.
    pub fn rename(&self, from: &Resource, to: &Resource) -> Result<()> {
        from.expect_state("rename", ResourceState::Loaded)?;
        to.expect_state("rename onto", ResourceState::Unloaded)?;
        {
            let mut src = from.borrow_value_mut()?;
            if let Some(item) = src.as_deref() {
                let type_name = self
                    .type_name_of(item)
                    .unwrap_or_else(|_| item.type_name().to_string());
                if !self.scheme_for(to.name())?.accepts_type(&type_name) {
                    return Err(Error::ResourceTypeRejected {
                        name: to.name().to_string(),
                        type_name,
                    });
                }
            }
            let mut dst = to.borrow_value_mut()?;
            *dst = src.take();
        }
        from.set_state(ResourceState::Unloaded);
        to.set_state(ResourceState::Loaded);
        self.invalidate_cache();
        tracing::info!(from = %from.name(), to = %to.name(), "renamed");
        Ok(())
    }

    /// Delete a resource's file. A missing file is fine.
    pub fn remove_source(&self, res: &Resource) -> Result<()> {
        let path = self.scheme_for(res.name())?.get_file(res.name())?;
        match fs::remove_file(&path) {
            Ok(()) => {
                tracing::info!(resource = %res.name(), path = %path.display(), "removed source");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(Error::ResourceRemoveSourceFailed { path, source }),
        }
    }

    /// Whether a resource's file can be opened.
    pub fn source_exists(&self, res: &Resource) -> Result<bool> {
        let path = self.scheme_for(res.name())?.get_file(res.name())?;
        Ok(File::open(path).is_ok())
    }
}
