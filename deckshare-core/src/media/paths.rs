use std::path::{Component, Path, PathBuf};

/// Lexically normalize `path`: drops `.` components and folds `..` into
/// the preceding component. Never touches the filesystem, so it works for
/// files that do not exist yet. `..` above the root is discarded.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => out.push(prefix.as_os_str()),
            Component::RootDir => out.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() && !out.has_root() {
                    out.push("..");
                }
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}

/// Join a request-relative path onto `root`, refusing anything that would
/// escape it. Leading slashes in `relative` are ignored.
pub fn resolve_within(root: &Path, relative: &str) -> Option<PathBuf> {
    let root = normalize(root);
    let trimmed = relative.trim_start_matches('/');
    let joined = normalize(&root.join(trimmed));
    joined.starts_with(&root).then_some(joined)
}
