//! Paths to values, rooted at a resource or a bare reference.
//!
//! A [`Location`] is an immutable chain of [`Step`]s. It converts to and
//! from a URI: the root's name, then `#`, then `/key` for each key step
//! (percent-encoded) and `+N` for each index step.
//!
//! ```text
//! data:items.ayu#/weapons+3/name
//! ```
//!
//! Whether a step is a key or an index comes only from its marker, never
//! from the text: `/3` is the key `"3"`, `+3` is index 3.

use std::fmt;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::item::Step;
use crate::reference::Reference;
use crate::registry::Registry;
use crate::resource::Resource;
use crate::value::TreeString;

/// Pseudo-scheme for locations rooted at a reference outside any resource.
pub const ANONYMOUS_ROOT: &str = "ayu-anonymous:";

enum LocationData {
    Resource(Resource),
    Reference(Reference),
    Key(Location, TreeString),
    Index(Location, u32),
}

/// Shared, immutable path to a value.
#[derive(Clone)]
pub struct Location(Rc<LocationData>);

impl Location {
    pub fn resource(resource: Resource) -> Self {
        Location(Rc::new(LocationData::Resource(resource)))
    }

    pub fn reference(reference: Reference) -> Self {
        Location(Rc::new(LocationData::Reference(reference)))
    }

    pub fn key(&self, key: impl Into<TreeString>) -> Self {
        Location(Rc::new(LocationData::Key(self.clone(), key.into())))
    }

    pub fn index(&self, index: u32) -> Self {
        Location(Rc::new(LocationData::Index(self.clone(), index)))
    }

    pub fn child(&self, step: Step) -> Self {
        match step {
            Step::Key(key) => self.key(key),
            Step::Index(index) => self.index(index),
        }
    }

    pub fn parent(&self) -> Option<&Location> {
        match &*self.0 {
            LocationData::Key(parent, _) | LocationData::Index(parent, _) => Some(parent),
            LocationData::Resource(_) | LocationData::Reference(_) => None,
        }
    }

    /// The last step, if this isn't a root.
    pub fn step(&self) -> Option<Step> {
        match &*self.0 {
            LocationData::Key(_, key) => Some(Step::Key(key.clone())),
            LocationData::Index(_, index) => Some(Step::Index(*index)),
            LocationData::Resource(_) | LocationData::Reference(_) => None,
        }
    }

    pub fn root(&self) -> &Location {
        let mut loc = self;
        while let Some(parent) = loc.parent() {
            loc = parent;
        }
        loc
    }

    pub fn root_resource(&self) -> Option<&Resource> {
        match &*self.root().0 {
            LocationData::Resource(res) => Some(res),
            _ => None,
        }
    }

    pub fn root_reference(&self) -> Option<&Reference> {
        match &*self.root().0 {
            LocationData::Reference(r) => Some(r),
            _ => None,
        }
    }

    /// Steps from the root down to here.
    pub fn steps(&self) -> Vec<Step> {
        let mut steps = Vec::new();
        let mut loc = self;
        while let Some(parent) = loc.parent() {
            if let Some(step) = loc.step() {
                steps.push(step);
            }
            loc = parent;
        }
        steps.reverse();
        steps
    }

    /// Append `steps` below this location.
    pub fn join(&self, steps: impl IntoIterator<Item = Step>) -> Self {
        steps.into_iter().fold(self.clone(), |loc, step| loc.child(step))
    }

    /// Just the `#...` part, always starting with `#`.
    pub fn fragment(&self) -> String {
        let mut out = String::from("#");
        for step in self.steps() {
            match step {
                Step::Key(key) => {
                    out.push('/');
                    out.push_str(&urlencoding::encode(&key));
                }
                Step::Index(index) => {
                    out.push('+');
                    out.push_str(&index.to_string());
                }
            }
        }
        out
    }

    /// Full URI: the root's name plus the fragment, if there are steps.
    pub fn to_uri(&self) -> String {
        let mut uri = match &*self.root().0 {
            LocationData::Resource(res) => res.name().to_string(),
            _ => ANONYMOUS_ROOT.to_string(),
        };
        if self.parent().is_some() {
            uri.push_str(&self.fragment());
        }
        uri
    }

    /// Fragment-only form when rooted at `base`, full URI otherwise.
    pub fn to_relative_uri(&self, base: Option<&Resource>) -> String {
        match (self.root_resource(), base) {
            (Some(root), Some(base)) if root == base => self.fragment(),
            _ => self.to_uri(),
        }
    }

    /// Parse a URI produced by [`to_uri`](Self::to_uri) or
    /// [`to_relative_uri`](Self::to_relative_uri).
    ///
    /// A fragment-only URI is taken relative to the root of `base`.
    /// Resource names go through [`Registry::resource`], so they are
    /// validated but not loaded.
    pub fn from_uri(registry: &Registry, uri: &str, base: Option<&Location>) -> Result<Location> {
        let invalid = |reason| Error::LocationInvalid {
            uri: uri.to_string(),
            reason,
        };
        let (name, fragment) = match uri.find('#') {
            Some(hash) => (&uri[..hash], &uri[hash + 1..]),
            None => (uri, ""),
        };

        let root = if name.is_empty() {
            match base {
                Some(base) => base.root().clone(),
                None => return Err(invalid("relative location without a base")),
            }
        } else if name == ANONYMOUS_ROOT {
            return Err(invalid("anonymous locations can't be resolved by name"));
        } else {
            Location::resource(registry.resource(name)?)
        };

        let mut loc = root;
        let mut rest = fragment;
        while let Some(&marker) = rest.as_bytes().first() {
            if marker != b'/' && marker != b'+' {
                return Err(invalid("fragment steps start with / or +"));
            }
            let body = &rest[1..];
            let end = body.find(['/', '+']).unwrap_or(body.len());
            let text = &body[..end];
            rest = &body[end..];
            loc = if marker == b'/' {
                let key = urlencoding::decode(text).map_err(|_| invalid("key isn't valid UTF-8"))?;
                loc.key(key.into_owned())
            } else {
                let index = text.parse::<u32>().map_err(|_| invalid("bad index"))?;
                loc.index(index)
            };
        }
        Ok(loc)
    }
}

impl PartialEq for Location {
    fn eq(&self, other: &Self) -> bool {
        if Rc::ptr_eq(&self.0, &other.0) {
            return true;
        }
        match (&*self.0, &*other.0) {
            (LocationData::Resource(a), LocationData::Resource(b)) => a == b,
            (LocationData::Reference(a), LocationData::Reference(b)) => a == b,
            (LocationData::Key(pa, a), LocationData::Key(pb, b)) => a == b && pa == pb,
            (LocationData::Index(pa, a), LocationData::Index(pb, b)) => a == b && pa == pb,
            _ => false,
        }
    }
}

impl Eq for Location {}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_uri())
    }
}

impl fmt::Debug for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Location({})", self.to_uri())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uri_form() {
        let registry = Registry::new();
        let res = registry.resource("data.ayu").unwrap();
        let loc = Location::resource(res.clone()).key("weapons").index(3).key("full name");
        assert_eq!(loc.to_uri(), "data.ayu#/weapons+3/full%20name");
        assert_eq!(loc.to_relative_uri(Some(&res)), "#/weapons+3/full%20name");
        assert_eq!(Location::resource(res.clone()).to_uri(), "data.ayu");
        assert_eq!(Location::resource(res).fragment(), "#");
    }

    #[test]
    fn test_uri_round_trip() {
        let registry = Registry::new();
        let res = registry.resource("data.ayu").unwrap();
        let loc = Location::resource(res)
            .key("a/b+c")
            .index(0)
            .key("3")
            .key("")
            .key("é");
        let back = Location::from_uri(&registry, &loc.to_uri(), None).unwrap();
        assert_eq!(back, loc);
        assert_eq!(back.steps(), loc.steps());
    }

    #[test]
    fn test_key_vs_index_by_marker() {
        let registry = Registry::new();
        let loc = Location::from_uri(&registry, "x.ayu#/3+3", None).unwrap();
        assert_eq!(loc.steps(), vec![Step::Key("3".into()), Step::Index(3)]);
    }

    #[test]
    fn test_relative() {
        let registry = Registry::new();
        let base = Location::resource(registry.resource("b.ayu").unwrap()).key("deep");
        let loc = Location::from_uri(&registry, "#/x", Some(&base)).unwrap();
        assert_eq!(loc.to_uri(), "b.ayu#/x");
        let root = Location::from_uri(&registry, "#", Some(&base)).unwrap();
        assert_eq!(root, *base.root());
        assert_eq!(
            Location::from_uri(&registry, "#/x", None).unwrap_err().code(),
            "LocationInvalid"
        );
    }

    #[test]
    fn test_invalid() {
        let registry = Registry::new();
        for uri in ["x.ayu#+abc", "x.ayu#abc", "ayu-anonymous:#/a", "x.ayu#/%FF"] {
            let err = Location::from_uri(&registry, uri, None).unwrap_err();
            assert_eq!(err.code(), "LocationInvalid", "{uri}");
        }
    }

    #[test]
    fn test_anonymous_root() {
        let x = 5i32;
        let loc = Location::reference(Reference::of(&x)).key("a");
        assert_eq!(loc.to_uri(), "ayu-anonymous:#/a");
        assert!(loc.root_reference().is_some());
        assert!(loc.root_resource().is_none());
    }
}
