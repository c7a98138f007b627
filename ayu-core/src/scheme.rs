//! Resource name schemes.
//!
//! A resource name is a URI. Its scheme prefix (`data:` in
//! `data:items/swords.ayu`) selects a [`ResourceScheme`], which decides
//! whether the name and the value's type are acceptable and where the
//! backing file lives. Names without a prefix go to the scheme registered
//! under `""`, or to a built-in one that treats them as plain file paths.

use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};
use crate::registry::Registry;

/// Maps resource names of one scheme to files.
pub trait ResourceScheme {
    /// Prefix without the colon. Empty for the scheme that handles bare
    /// paths.
    fn scheme(&self) -> &str;

    fn accepts_name(&self, name: &str) -> bool {
        let _ = name;
        true
    }

    /// Whether a value with this registered type name may live here.
    fn accepts_type(&self, type_name: &str) -> bool {
        let _ = type_name;
        true
    }

    /// Backing file for `name`.
    fn get_file(&self, name: &str) -> Result<PathBuf>;
}

/// Split off the scheme of a URI-like name.
///
/// Single letters don't count, so `C:\data.ayu` stays a path.
pub fn scheme_of(name: &str) -> Option<&str> {
    let colon = name.find(':')?;
    let scheme = &name[..colon];
    let mut chars = scheme.chars();
    let first = chars.next()?;
    let valid = first.is_ascii_alphabetic()
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    (valid && scheme.len() >= 2).then_some(scheme)
}

/// Scheme mapping names under a root directory.
///
/// `FileScheme::new("data", "assets/data")` sends `data:items.ayu` to
/// `assets/data/items.ayu`. Paths that climb out of the root with `..` are
/// rejected.
#[derive(Debug, Clone)]
pub struct FileScheme {
    scheme: String,
    root: PathBuf,
    types: Option<Vec<String>>,
}

impl FileScheme {
    pub fn new(scheme: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            scheme: scheme.into(),
            root: root.into(),
            types: None,
        }
    }

    /// Only accept values registered under one of these type names.
    pub fn with_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.types = Some(types.into_iter().map(Into::into).collect());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The part of `name` after the scheme prefix.
    fn path_of<'n>(&self, name: &'n str) -> &'n str {
        if self.scheme.is_empty() {
            return name;
        }
        let rest = name
            .strip_prefix(self.scheme.as_str())
            .and_then(|rest| rest.strip_prefix(':'))
            .unwrap_or(name);
        rest.trim_start_matches('/')
    }
}

impl ResourceScheme for FileScheme {
    fn scheme(&self) -> &str {
        &self.scheme
    }

    fn accepts_name(&self, name: &str) -> bool {
        let path = self.path_of(name);
        !path.is_empty()
            && Path::new(path)
                .components()
                .all(|c| !matches!(c, Component::ParentDir))
    }

    fn accepts_type(&self, type_name: &str) -> bool {
        match &self.types {
            Some(types) => types.iter().any(|t| t == type_name),
            None => true,
        }
    }

    fn get_file(&self, name: &str) -> Result<PathBuf> {
        if !self.accepts_name(name) {
            return Err(Error::ResourceNameRejected {
                name: name.to_string(),
                scheme: self.scheme.clone(),
            });
        }
        Ok(self.root.join(self.path_of(name)))
    }
}

/// Keeps a scheme active. Dropping it deactivates the scheme.
#[must_use = "the scheme is deactivated as soon as the guard is dropped"]
pub struct SchemeGuard<'r> {
    registry: &'r Registry,
    scheme: String,
}

impl<'r> SchemeGuard<'r> {
    pub(crate) fn new(registry: &'r Registry, scheme: String) -> Self {
        Self { registry, scheme }
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }
}

impl Drop for SchemeGuard<'_> {
    fn drop(&mut self) {
        self.registry.deactivate_scheme(&self.scheme);
    }
}
