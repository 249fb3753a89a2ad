//! # pkgnav-metadata
//!
//! Typed view of `go list -e -json` output and its projection into a
//! navigation tree.
//!
//! ## Pipeline
//!
//! ```text
//! go list -e -json .
//!     │
//!     ├──> Parser (strict shape, lenient fields)
//!     │      └─> PackageRecord
//!     │
//!     └──> Tree builder (pure)
//!            └─> PackageTree { Source | Import | Dependency }
//! ```
//!
//! ## Example
//!
//! ```
//! use pkgnav_metadata::{build_tree, parse_record};
//!
//! let raw = br#"{"ImportPath":"demo/pkg","Dir":"/src/demo/pkg","Name":"pkg",
//!               "GoFiles":["a.go"],"Imports":["fmt"],"Deps":["fmt","strings"]}"#;
//! let record = parse_record(raw)?;
//! let tree = build_tree(&record);
//! assert_eq!(tree.children.len(), 3);
//! # Ok::<(), pkgnav_metadata::ParseError>(())
//! ```

mod parse;
mod record;
mod tree;

pub use parse::{parse_record, ParseError};
pub use record::{PackageDiagnostic, PackageKind, PackageRecord, COMMAND_PACKAGE_NAME};
pub use tree::{build_tree, NodeKind, PackageTree, TreeNode};
