use crate::record::{PackageKind, PackageRecord};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Root,
    Source,
    Import,
    Dependency,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNode {
    pub label: String,
    pub kind: NodeKind,
    /// Absolute path, set only for `Source` nodes.
    pub resolved_path: Option<PathBuf>,
}

/// Display-oriented projection of one [`PackageRecord`]. Rebuilt
/// wholesale on every reload; published behind an `Arc` and never
/// mutated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageTree {
    pub name: String,
    pub import_path: String,
    pub kind: PackageKind,
    pub children: Vec<TreeNode>,
}

impl PackageTree {
    /// Labels of the `Source` children, in tree order.
    #[must_use]
    pub fn source_names(&self) -> Vec<String> {
        self.children
            .iter()
            .filter(|node| node.kind == NodeKind::Source)
            .map(|node| node.label.clone())
            .collect()
    }

    /// Resolved paths of the `Source` children, in tree order.
    #[must_use]
    pub fn source_paths(&self) -> Vec<PathBuf> {
        self.children
            .iter()
            .filter(|node| node.kind == NodeKind::Source)
            .filter_map(|node| node.resolved_path.clone())
            .collect()
    }
}

/// Builds the navigation tree for a record. Pure and deterministic:
/// node order mirrors the record's sequences — sources, then imports,
/// then dependencies that are not already shown as imports.
#[must_use]
pub fn build_tree(record: &PackageRecord) -> PackageTree {
    let mut children = Vec::with_capacity(
        record.source_files.len() + record.imports.len() + record.dependencies.len(),
    );

    for file in &record.source_files {
        children.push(TreeNode {
            label: file.clone(),
            kind: NodeKind::Source,
            resolved_path: Some(record.resolve(file)),
        });
    }

    for import in &record.imports {
        children.push(TreeNode {
            label: import.clone(),
            kind: NodeKind::Import,
            resolved_path: None,
        });
    }

    for dep in &record.dependencies {
        if record.imports.contains(dep) {
            continue;
        }
        children.push(TreeNode {
            label: dep.clone(),
            kind: NodeKind::Dependency,
            resolved_path: None,
        });
    }

    PackageTree {
        name: record.name.clone(),
        import_path: record.import_path.clone(),
        kind: record.kind(),
        children,
    }
}
