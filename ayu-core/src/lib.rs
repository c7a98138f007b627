//! ayu Core
//!
//! Tree-structured text format plus a registry of named, file-backed values
//! that can be loaded, saved, unloaded and hot-reloaded without leaving
//! dangling links between them.
//!
//! # Architecture
//!
//! - **value.rs** - Scalar value types, number parsing
//! - **tree.rs** - Immutable Tree type and its accessors
//! - **parser.rs** - Recursive-descent parser for the text format
//! - **printer.rs** - Pretty/compact/JSON printer
//! - **item.rs** - Item/Describe traits, Link, the `record!` macro
//! - **location.rs** - Paths to values and their URI form
//! - **reference.rs** - Typed identities of values
//! - **scan.rs** - Reachability scans and the location cache
//! - **resource.rs** - Resource handles and lifecycle states
//! - **scheme.rs** - Resource name schemes
//! - **registry.rs** - The registry and its load/save/unload/reload operations
//! - **transaction.rs** - Nestable commit/rollback scopes
//!
//! # Example
//!
//! ```
//! use ayu_core::{parse_str, print, PrintOptions};
//!
//! let tree = parse_str("{name:ayu version:[0 10]}").unwrap();
//! assert_eq!(print(&tree, PrintOptions::COMPACT).unwrap(), "{name:ayu version:[0 10]}");
//! ```

mod chars;
pub mod error;
pub mod item;
pub mod location;
pub mod parser;
pub mod printer;
pub mod reference;
pub mod registry;
pub mod resource;
pub mod scan;
pub mod scheme;
pub mod transaction;
pub mod tree;
pub mod value;

pub use error::{Error, ParseErrorCode, ReloadBreak, Result, UnloadBreak};
pub use item::{from_tree, to_tree, Access, AnyLink, Describe, FromTreeCx, Item, Link, Step, ToTreeCx};
pub use location::{Location, ANONYMOUS_ROOT};
pub use parser::{parse, parse_file, parse_list, parse_str, MAX_DEPTH};
pub use printer::{print, print_file, PrintOptions};
pub use reference::Reference;
pub use registry::Registry;
pub use resource::{Resource, ResourceState};
pub use scan::{scan_item, scan_links, scan_references, LocationCacheGuard};
pub use scheme::{scheme_of, FileScheme, ResourceScheme, SchemeGuard};
pub use transaction::{Committer, Domain, Transaction, TransactionScope};
pub use tree::{Form, Tree, TreeFlags};
pub use value::{TreeString, Value};
