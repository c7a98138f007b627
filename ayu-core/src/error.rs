//! Error types for ayu operations.
//!
//! Every variant has a stable string code (see [`Error::code`]) so callers
//! can match on failures without depending on message text. Errors never
//! hold shared handles: locations travel as their URI strings.

use std::fmt;
use std::io;
use std::path::PathBuf;

use crate::resource::ResourceState;
use crate::tree::Form;

/// Parse failure categories.
///
/// Kept as a small `Copy` enum so the parser never allocates a message
/// until it actually fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ParseErrorCode {
    /// Input ended where a term was required
    UnexpectedEof = 0,
    /// Byte that can't start or continue any production
    UnexpectedChar,
    /// Extra content after the top-level term
    TrailingContent,
    /// Unclosed string literal
    UnclosedString,
    /// Unclosed array
    UnclosedArray,
    /// Unclosed object
    UnclosedObject,
    /// Bad escape sequence in a string
    InvalidEscape,
    /// Text isn't valid UTF-8
    InvalidUtf8,
    /// Malformed number
    InvalidNumber,
    /// `"` inside an unquoted word
    QuoteInWord,
    /// Object key isn't a string
    InvalidKey,
    /// Object key not followed by `:`
    MissingColon,
    /// Shortcut declared twice
    ShortcutRedeclared,
    /// Shortcut used before being declared
    ShortcutUnknown,
    /// Shortcut name isn't a string
    InvalidShortcutName,
    /// Arrays/objects nested too deep
    TooDeep,
}

impl ParseErrorCode {
    /// Get a human-readable message for this error code.
    pub fn message(self) -> &'static str {
        match self {
            Self::UnexpectedEof => "unexpected end of input",
            Self::UnexpectedChar => "unexpected character",
            Self::TrailingContent => "extra content after document",
            Self::UnclosedString => "unclosed string",
            Self::UnclosedArray => "unclosed array",
            Self::UnclosedObject => "unclosed object",
            Self::InvalidEscape => "invalid escape sequence",
            Self::InvalidUtf8 => "invalid UTF-8",
            Self::InvalidNumber => "invalid number",
            Self::QuoteInWord => "\" in unquoted word (missing opening quote?)",
            Self::InvalidKey => "object key must be a string",
            Self::MissingColon => "missing : after object key",
            Self::ShortcutRedeclared => "shortcut declared twice",
            Self::ShortcutUnknown => "unknown shortcut",
            Self::InvalidShortcutName => "shortcut name must be a string",
            Self::TooDeep => "arrays and objects nested too deep",
        }
    }
}

/// A reference that would dangle if an unload went ahead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnloadBreak {
    /// Location of the link that still points into the unloading set.
    pub from: String,
    /// Location the link points to.
    pub to: String,
}

/// A reference that couldn't be repointed into a reloaded value.
#[derive(Debug)]
pub struct ReloadBreak {
    /// Location of the link that points into the old value.
    pub from: String,
    /// Location inside the old value the link pointed to.
    pub to: String,
    /// Why the location couldn't be found in the new value.
    pub cause: Box<Error>,
}

/// Error type for ayu operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // Codec errors
    /// Text couldn't be parsed.
    #[error("{filename}:{line}:{column}: {}{}", .code.message(), fmt_detail(.detail))]
    ParseFailed {
        filename: String,
        line: usize,
        column: usize,
        code: ParseErrorCode,
        detail: String,
    },
    /// Contradictory print options.
    #[error("invalid print options: {options}")]
    PrintOptionsInvalid { options: String },

    // IO errors
    #[error("failed to open {}: {source}", .path.display())]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to read {}: {source}", .path.display())]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write {}: {source}", .path.display())]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to close {}: {source}", .path.display())]
    CloseFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    // Resource errors
    #[error("invalid resource name {name:?}: {reason}")]
    ResourceNameInvalid { name: String, reason: &'static str },
    #[error("resource name {name:?} rejected by scheme {scheme:?}")]
    ResourceNameRejected { name: String, scheme: String },
    #[error("resource scheme {scheme:?} is already active")]
    ResourceSchemeDuplicate { scheme: String },
    #[error("resource {name:?} doesn't accept values of type {type_name}")]
    ResourceTypeRejected { name: String, type_name: String },
    #[error("resource {name:?} has an invalid value: {reason}")]
    ResourceValueInvalid { name: String, reason: String },
    #[error("can't {operation} resource {name:?} while it is {state}")]
    ResourceStateInvalid {
        operation: &'static str,
        name: String,
        state: ResourceState,
    },
    #[error("resource {name:?} is already borrowed")]
    ResourceBusy { name: String },
    #[error("unload would break {} reference(s): {}", .breaks.len(), fmt_unload_breaks(.breaks))]
    ResourceUnloadWouldBreak { breaks: Vec<UnloadBreak> },
    #[error("reload would break {} reference(s): {}", .breaks.len(), fmt_reload_breaks(.breaks))]
    ResourceReloadWouldBreak { breaks: Vec<ReloadBreak> },
    #[error("failed to remove source {}: {source}", .path.display())]
    ResourceRemoveSourceFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    // Type and reference errors
    #[error("no type named {type_name:?} is registered")]
    TypeNotFound { type_name: String },
    #[error("nothing found at {location}")]
    ReferenceNotFound { location: String },
    #[error("{location} is a {got}, expected {expected}")]
    ReferenceWrongType {
        location: String,
        expected: &'static str,
        got: &'static str,
    },
    #[error("{location} can't be written through")]
    ReferenceReadOnly { location: String },
    #[error("invalid location {uri:?}: {reason}")]
    LocationInvalid { uri: String, reason: &'static str },

    // Tree conversion errors
    #[error("expected {expected} tree, got {got}")]
    TreeWrongForm { expected: Form, got: Form },
    #[error("{type_name} can't represent {tree}")]
    TreeCantRepresent { type_name: &'static str, tree: String },
    #[error("missing attribute {key:?}")]
    AttrMissing { key: String },
    #[error("unexpected attribute {key:?}")]
    AttrRejected { key: String },
}

fn fmt_detail(detail: &str) -> String {
    if detail.is_empty() {
        String::new()
    } else {
        format!(" ({detail})")
    }
}

fn fmt_unload_breaks(breaks: &[UnloadBreak]) -> String {
    breaks
        .iter()
        .map(|b| format!("{} -> {}", b.from, b.to))
        .collect::<Vec<_>>()
        .join(", ")
}

fn fmt_reload_breaks(breaks: &[ReloadBreak]) -> String {
    breaks
        .iter()
        .map(|b| format!("{} -> {} ({})", b.from, b.to, b.cause))
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for ReloadBreak {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}: {}", self.from, self.to, self.cause)
    }
}

impl Error {
    /// Stable identifier for this kind of failure.
    pub fn code(&self) -> &'static str {
        match self {
            Error::ParseFailed { .. } => "ParseFailed",
            Error::PrintOptionsInvalid { .. } => "PrintOptionsInvalid",
            Error::OpenFailed { .. } => "IOOpenFailed",
            Error::ReadFailed { .. } => "IOReadFailed",
            Error::WriteFailed { .. } => "IOWriteFailed",
            Error::CloseFailed { .. } => "IOCloseFailed",
            Error::ResourceNameInvalid { .. } => "ResourceNameInvalid",
            Error::ResourceNameRejected { .. } => "ResourceNameRejected",
            Error::ResourceSchemeDuplicate { .. } => "ResourceSchemeDuplicate",
            Error::ResourceTypeRejected { .. } => "ResourceTypeRejected",
            Error::ResourceValueInvalid { .. } => "ResourceValueInvalid",
            Error::ResourceStateInvalid { .. } => "ResourceStateInvalid",
            Error::ResourceBusy { .. } => "ResourceBusy",
            Error::ResourceUnloadWouldBreak { .. } => "ResourceUnloadWouldBreak",
            Error::ResourceReloadWouldBreak { .. } => "ResourceReloadWouldBreak",
            Error::ResourceRemoveSourceFailed { .. } => "ResourceRemoveSourceFailed",
            Error::TypeNotFound { .. } => "TypeNotFound",
            Error::ReferenceNotFound { .. } => "ReferenceNotFound",
            Error::ReferenceWrongType { .. } => "ReferenceWrongType",
            Error::ReferenceReadOnly { .. } => "ReferenceReadOnly",
            Error::LocationInvalid { .. } => "LocationInvalid",
            Error::TreeWrongForm { .. } => "TreeWrongForm",
            Error::TreeCantRepresent { .. } => "TreeCantRepresent",
            Error::AttrMissing { .. } => "AttrMissing",
            Error::AttrRejected { .. } => "AttrRejected",
        }
    }

    /// Structured name/value details, for diagnostics that want more than
    /// the display message.
    pub fn tags(&self) -> Vec<(&'static str, String)> {
        match self {
            Error::ParseFailed {
                filename,
                line,
                column,
                ..
            } => vec![
                ("filename", filename.clone()),
                ("line", line.to_string()),
                ("column", column.to_string()),
            ],
            Error::OpenFailed { path, .. }
            | Error::ReadFailed { path, .. }
            | Error::WriteFailed { path, .. }
            | Error::CloseFailed { path, .. }
            | Error::ResourceRemoveSourceFailed { path, .. } => {
                vec![("path", path.display().to_string())]
            }
            Error::ResourceNameInvalid { name, .. }
            | Error::ResourceValueInvalid { name, .. }
            | Error::ResourceBusy { name } => vec![("name", name.clone())],
            Error::ResourceNameRejected { name, scheme } => {
                vec![("name", name.clone()), ("scheme", scheme.clone())]
            }
            Error::ResourceTypeRejected { name, type_name } => {
                vec![("name", name.clone()), ("type", type_name.clone())]
            }
            Error::ResourceStateInvalid {
                operation,
                name,
                state,
            } => vec![
                ("operation", (*operation).to_string()),
                ("name", name.clone()),
                ("state", state.to_string()),
            ],
            Error::ResourceUnloadWouldBreak { breaks } => breaks
                .iter()
                .flat_map(|b| [("from", b.from.clone()), ("to", b.to.clone())])
                .collect(),
            Error::ResourceReloadWouldBreak { breaks } => breaks
                .iter()
                .flat_map(|b| [("from", b.from.clone()), ("to", b.to.clone())])
                .collect(),
            Error::ReferenceNotFound { location }
            | Error::ReferenceWrongType { location, .. }
            | Error::ReferenceReadOnly { location } => vec![("location", location.clone())],
            _ => Vec::new(),
        }
    }
}

/// Result type alias for ayu operations.
pub type Result<T> = std::result::Result<T, Error>;
