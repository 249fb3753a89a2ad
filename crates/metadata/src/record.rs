use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Reserved package name marking an executable entry point.
pub const COMMAND_PACKAGE_NAME: &str = "main";

/// One package as reported by `go list -e -json`, field names per the
/// tool's own schema. Everything except the top-level shape is optional;
/// absent sequences decode to empty ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRecord {
    #[serde(rename = "ImportPath", default)]
    pub import_path: String,

    #[serde(rename = "Dir", default)]
    pub dir: PathBuf,

    #[serde(rename = "Name", default)]
    pub name: String,

    /// Buildable sources, in the tool's reported order.
    #[serde(rename = "GoFiles", default)]
    pub source_files: Vec<String>,

    /// Direct imports.
    #[serde(rename = "Imports", default)]
    pub imports: Vec<String>,

    /// Transitive dependency import paths; may overlap with `imports`.
    #[serde(rename = "Deps", default)]
    pub dependencies: Vec<String>,

    /// Diagnostic the tool attaches under `-e` when the package loads
    /// with caveats. Not a parse failure.
    #[serde(rename = "Error", default)]
    pub error: Option<PackageDiagnostic>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageDiagnostic {
    #[serde(rename = "Err", default)]
    pub err: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageKind {
    Library,
    Command,
}

impl PackageKind {
    #[must_use]
    pub const fn mime_type(self) -> &'static str {
        match self {
            PackageKind::Library => "text/x-gopackage",
            PackageKind::Command => "text/x-gocommand",
        }
    }
}

impl PackageRecord {
    #[must_use]
    pub fn kind(&self) -> PackageKind {
        if self.name == COMMAND_PACKAGE_NAME {
            PackageKind::Command
        } else {
            PackageKind::Library
        }
    }

    /// A record without a backing directory cannot resolve its files.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        !self.dir.as_os_str().is_empty()
    }

    #[must_use]
    pub fn tool_error(&self) -> Option<&str> {
        self.error
            .as_ref()
            .map(|diag| diag.err.as_str())
            .filter(|err| !err.is_empty())
    }

    /// Resolves a bare file name against the package directory.
    #[must_use]
    pub fn resolve(&self, file: impl AsRef<Path>) -> PathBuf {
        self.dir.join(file)
    }
}
