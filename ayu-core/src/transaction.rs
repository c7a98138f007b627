//! Nestable commit/rollback scopes.
//!
//! Operations that touch several resources split into a verify phase, which
//! may fail and undo itself, and a commit phase registered as a
//! [`Committer`]. Committers run only when the outermost [`Transaction`]
//! ends: `commit` if it was committed, `rollback` if it was dropped. That
//! lets a caller group several operations so none of them becomes permanent
//! until all have verified.

use std::cell::{Cell, RefCell};

use crate::error::Result;

/// Deferred second half of an operation.
pub trait Committer<D: ?Sized> {
    fn commit(self: Box<Self>, domain: &D) -> Result<()>;

    fn rollback(self: Box<Self>, domain: &D);
}

/// Something that owns a transaction scope.
pub trait Domain {
    fn transaction_scope(&self) -> &TransactionScope<Self>;
}

/// Nesting counter and pending committers for one domain.
pub struct TransactionScope<D: ?Sized> {
    depth: Cell<usize>,
    committers: RefCell<Vec<Box<dyn Committer<D>>>>,
}

impl<D: ?Sized> Default for TransactionScope<D> {
    fn default() -> Self {
        Self {
            depth: Cell::new(0),
            committers: RefCell::new(Vec::new()),
        }
    }
}

impl<D: ?Sized> TransactionScope<D> {
    pub fn depth(&self) -> usize {
        self.depth.get()
    }

    pub fn pending(&self) -> usize {
        self.committers.borrow().len()
    }
}

/// One level of transaction nesting.
///
/// Dropping without [`commit`](Self::commit) rolls back, but only the
/// outermost level actually runs the committers.
#[must_use = "dropping a transaction rolls it back"]
pub struct Transaction<'d, D: Domain + ?Sized> {
    domain: &'d D,
    done: bool,
}

impl<'d, D: Domain + ?Sized> Transaction<'d, D> {
    pub fn begin(domain: &'d D) -> Self {
        let scope = domain.transaction_scope();
        scope.depth.set(scope.depth.get() + 1);
        Self { domain, done: false }
    }

    pub fn is_outermost(&self) -> bool {
        self.domain.transaction_scope().depth.get() == 1
    }

    /// Queue work for when the outermost transaction ends.
    pub fn defer(&self, committer: Box<dyn Committer<D>>) {
        self.domain.transaction_scope().committers.borrow_mut().push(committer);
    }

    /// End this level. At the outermost level, commit everything queued in
    /// the order it was queued and return the first failure.
    pub fn commit(mut self) -> Result<()> {
        self.done = true;
        match self.leave() {
            Some(committers) => {
                tracing::trace!(count = committers.len(), "committing transaction");
                let mut result = Ok(());
                for committer in committers {
                    if let Err(err) = committer.commit(self.domain) {
                        if result.is_ok() {
                            result = Err(err);
                        }
                    }
                }
                result
            }
            None => Ok(()),
        }
    }

    /// Decrement the depth; at zero, hand back everything queued.
    fn leave(&self) -> Option<Vec<Box<dyn Committer<D>>>> {
        let scope = self.domain.transaction_scope();
        let depth = scope.depth.get() - 1;
        scope.depth.set(depth);
        (depth == 0).then(|| std::mem::take(&mut *scope.committers.borrow_mut()))
    }
}

impl<D: Domain + ?Sized> Drop for Transaction<'_, D> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        if let Some(committers) = self.leave() {
            tracing::debug!(count = committers.len(), "rolling back transaction");
            for committer in committers {
                committer.rollback(self.domain);
            }
        }
    }
}
