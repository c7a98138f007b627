//! The immutable tree value.
//!
//! A [`Tree`] is what the parser produces and the printer consumes: a
//! [`Value`] plus a few printing hints. Trees are cheap to clone (compound
//! payloads are shared) and never change after construction; "mutating"
//! methods either consume `self` or copy the shared buffer first.
//!
//! # Example
//!
//! ```
//! use ayu_core::{parse_str, Tree};
//!
//! let tree = parse_str("{name:ayu tags:[fast small]}").unwrap();
//! assert_eq!(tree.attr("name").unwrap().as_str().unwrap(), "ayu");
//! assert_eq!(tree, Tree::object([
//!     ("tags", Tree::array(["fast".into(), "small".into()])),
//!     ("name", "ayu".into()),
//! ]));
//! ```

use std::fmt;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::value::{TreeString, Value};

bitflags::bitflags! {
    /// Printing hints. They never affect equality.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TreeFlags: u8 {
        /// Print integers and floats in hex.
        const PREFER_HEX = 1 << 0;
        /// Keep arrays/objects inline and escape newlines in strings.
        const PREFER_COMPACT = 1 << 1;
        /// Put each child on its own line and keep newlines in strings raw.
        const PREFER_EXPANDED = 1 << 2;
    }
}

/// The broad shape of a tree, for diagnostics and dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Form {
    Null,
    Bool,
    Number,
    String,
    Array,
    Object,
    Error,
}

impl Form {
    pub fn name(self) -> &'static str {
        match self {
            Form::Null => "null",
            Form::Bool => "bool",
            Form::Number => "number",
            Form::String => "string",
            Form::Array => "array",
            Form::Object => "object",
            Form::Error => "error",
        }
    }
}

impl fmt::Display for Form {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An immutable, structurally shared value.
#[derive(Debug, Clone)]
pub struct Tree {
    value: Value,
    flags: TreeFlags,
}

impl Tree {
    /// Wrap a payload with no flags.
    #[inline]
    pub fn new(value: Value) -> Self {
        Tree {
            value,
            flags: TreeFlags::empty(),
        }
    }

    #[inline]
    pub fn null() -> Self {
        Tree::new(Value::Null)
    }

    /// Build an array tree.
    pub fn array(items: impl IntoIterator<Item = Tree>) -> Self {
        Tree::new(Value::Array(Rc::new(items.into_iter().collect())))
    }

    /// Build an object tree. Pairs keep their order for printing.
    pub fn object<K: Into<TreeString>>(pairs: impl IntoIterator<Item = (K, Tree)>) -> Self {
        Tree::new(Value::Object(Rc::new(
            pairs.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        )))
    }

    /// Carry an error as a value.
    pub fn error(err: Error) -> Self {
        Tree::new(Value::Error(Rc::new(err)))
    }

    #[inline]
    pub fn value(&self) -> &Value {
        &self.value
    }

    #[inline]
    pub fn flags(&self) -> TreeFlags {
        self.flags
    }

    /// Same value with different printing hints.
    #[inline]
    pub fn with_flags(mut self, flags: TreeFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn form(&self) -> Form {
        match self.value {
            Value::Null => Form::Null,
            Value::Bool(_) => Form::Bool,
            Value::Int(_) | Value::Double(_) => Form::Number,
            Value::String(_) => Form::String,
            Value::Array(_) => Form::Array,
            Value::Object(_) => Form::Object,
            Value::Error(_) => Form::Error,
        }
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self.value, Value::Null)
    }

    fn wrong_form(&self, expected: Form) -> Error {
        Error::TreeWrongForm {
            expected,
            got: self.form(),
        }
    }

    pub fn as_bool(&self) -> Result<bool> {
        match self.value {
            Value::Bool(b) => Ok(b),
            _ => Err(self.wrong_form(Form::Bool)),
        }
    }

    /// Integer value. Doubles are accepted when they hold an exact integer.
    pub fn as_i64(&self) -> Result<i64> {
        match self.value {
            Value::Int(i) => Ok(i),
            Value::Double(d) => {
                if d.fract() == 0.0 && d >= -(2f64.powi(63)) && d < 2f64.powi(63) {
                    Ok(d as i64)
                } else {
                    Err(Error::TreeCantRepresent {
                        type_name: "i64",
                        tree: d.to_string(),
                    })
                }
            }
            _ => Err(self.wrong_form(Form::Number)),
        }
    }

    /// Float value. Integers widen.
    pub fn as_f64(&self) -> Result<f64> {
        match self.value {
            Value::Int(i) => Ok(i as f64),
            Value::Double(d) => Ok(d),
            _ => Err(self.wrong_form(Form::Number)),
        }
    }

    pub fn as_str(&self) -> Result<&str> {
        match &self.value {
            Value::String(s) => Ok(s.as_str()),
            _ => Err(self.wrong_form(Form::String)),
        }
    }

    /// The shared string payload, for callers that want to keep it.
    pub fn as_tree_string(&self) -> Result<&TreeString> {
        match &self.value {
            Value::String(s) => Ok(s),
            _ => Err(self.wrong_form(Form::String)),
        }
    }

    pub fn as_array(&self) -> Result<&[Tree]> {
        match &self.value {
            Value::Array(items) => Ok(items),
            _ => Err(self.wrong_form(Form::Array)),
        }
    }

    pub fn as_object(&self) -> Result<&[(TreeString, Tree)]> {
        match &self.value {
            Value::Object(pairs) => Ok(pairs),
            _ => Err(self.wrong_form(Form::Object)),
        }
    }

    /// First attribute named `key`, if this is an object.
    pub fn attr(&self, key: &str) -> Option<&Tree> {
        match &self.value {
            Value::Object(pairs) => pairs.iter().find(|(k, _)| k.as_str() == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Element at `index`, if this is an array.
    pub fn elem(&self, index: usize) -> Option<&Tree> {
        match &self.value {
            Value::Array(items) => items.get(index),
            _ => None,
        }
    }

    /// Replace the first attribute named `key`, or append it.
    /// A non-object is replaced by a one-pair object.
    pub fn with_attr(mut self, key: impl Into<TreeString>, value: Tree) -> Self {
        let key = key.into();
        match &mut self.value {
            Value::Object(pairs) => {
                let pairs = Rc::make_mut(pairs);
                match pairs.iter_mut().find(|(k, _)| *k == key) {
                    Some(slot) => slot.1 = value,
                    None => pairs.push((key, value)),
                }
                self
            }
            _ => Tree::object([(key, value)]),
        }
    }

    /// Append an element, copying the buffer if it's shared.
    pub fn push(&mut self, item: Tree) -> Result<()> {
        match &mut self.value {
            Value::Array(items) => {
                Rc::make_mut(items).push(item);
                Ok(())
            }
            _ => Err(self.wrong_form(Form::Array)),
        }
    }
}

impl Default for Tree {
    fn default() -> Self {
        Tree::null()
    }
}

/// Structural equality.
///
/// - Numbers compare across forms: `3 == 3.0`.
/// - `NaN` equals `NaN`, so diffs of configs containing it stay quiet.
/// - Objects compare as bags: order is ignored, and each key on the left is
///   matched against the first pair with that key on the right.
/// - Arrays compare in order.
/// - Flags are ignored.
impl PartialEq for Tree {
    fn eq(&self, other: &Self) -> bool {
        match (&self.value, &other.value) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Int(a), Value::Double(b)) | (Value::Double(b), Value::Int(a)) => int_eq_double(*a, *b),
            (Value::Double(a), Value::Double(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b) || a[..] == b[..],
            (Value::Object(a), Value::Object(b)) => {
                Rc::ptr_eq(a, b)
                    || (a.len() == b.len()
                        && a.iter().all(|(key, value)| {
                            b.iter()
                                .find(|(k, _)| k == key)
                                .is_some_and(|(_, v)| v == value)
                        }))
            }
            (Value::Error(a), Value::Error(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Exact: the double must be integral and hold the same value.
fn int_eq_double(i: i64, d: f64) -> bool {
    d.fract() == 0.0 && (-9_223_372_036_854_775_808.0..9_223_372_036_854_775_808.0).contains(&d) && d as i64 == i
}

// ============================================================================
// Conversions
// ============================================================================

impl From<Value> for Tree {
    fn from(value: Value) -> Self {
        Tree::new(value)
    }
}

impl From<bool> for Tree {
    fn from(b: bool) -> Self {
        Tree::new(Value::Bool(b))
    }
}

macro_rules! tree_from_int {
    ($($t:ty),*) => {$(
        impl From<$t> for Tree {
            fn from(i: $t) -> Self {
                Tree::new(Value::Int(i as i64))
            }
        }
    )*};
}

tree_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<u64> for Tree {
    fn from(u: u64) -> Self {
        match i64::try_from(u) {
            Ok(i) => Tree::new(Value::Int(i)),
            Err(_) => Tree::new(Value::Double(u as f64)),
        }
    }
}

impl From<usize> for Tree {
    fn from(u: usize) -> Self {
        Tree::from(u as u64)
    }
}

impl From<f32> for Tree {
    fn from(d: f32) -> Self {
        Tree::new(Value::Double(d as f64))
    }
}

impl From<f64> for Tree {
    fn from(d: f64) -> Self {
        Tree::new(Value::Double(d))
    }
}

impl From<&'static str> for Tree {
    fn from(s: &'static str) -> Self {
        Tree::new(Value::String(TreeString::Static(s)))
    }
}

impl From<String> for Tree {
    fn from(s: String) -> Self {
        Tree::new(Value::String(s.into()))
    }
}

impl From<TreeString> for Tree {
    fn from(s: TreeString) -> Self {
        Tree::new(Value::String(s))
    }
}

impl From<Vec<Tree>> for Tree {
    fn from(items: Vec<Tree>) -> Self {
        Tree::new(Value::Array(Rc::new(items)))
    }
}

// ============================================================================
// Tests
// ============================================================================
