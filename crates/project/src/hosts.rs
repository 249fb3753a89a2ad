use std::path::Path;

/// Editor collaborator. Save notifications flow the other way, through
/// [`PackageProject::notify_saved`](crate::PackageProject::notify_saved).
pub trait EditorHost: Send + Sync {
    /// Opens `path`, focusing the view when `focus` is set.
    fn open_file(&self, path: &Path, focus: bool);
}

/// Documentation browser collaborator, addressed by import path.
pub trait DocumentationHost: Send + Sync {
    fn open_reference(&self, import_path: &str);
    fn bring_to_front(&self);
}
