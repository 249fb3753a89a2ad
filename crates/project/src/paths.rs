use std::fs;
use std::path::{Component, Path, PathBuf};

/// Lexical cleanup: drops `.` components and resolves `..` against the
/// preceding component where one exists.
#[must_use]
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                // "/.." is "/" on every platform we run the tool on.
                Some(Component::RootDir) => {}
                _ => out.push(Component::ParentDir),
            },
            other => out.push(other),
        }
    }
    out
}

/// Whether two paths refer to the same file. Editors hand back whatever
/// relative form they opened the file under, so plain string equality
/// is not enough: compare canonical identities when both paths resolve,
/// and fall back to lexical comparison when either does not exist.
#[must_use]
pub fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(ca), Ok(cb)) => ca == cb,
        _ => normalize(a) == normalize(b),
    }
}
