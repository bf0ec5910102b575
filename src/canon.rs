//! Path canonicalization.

use std::path::{Component, Path, PathBuf};

/// Lexically canonicalize a path, removing redundant components.
/// Does not access the disk, but only simplifies things like
/// "foo/./bar" => "foo/bar".
/// These paths show up when target roots and user paths are joined.
pub fn canon_path<P: AsRef<Path>>(inpath: P) -> PathBuf {
    let mut components: Vec<Component> = Vec::new();
    for component in inpath.as_ref().components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match components.last() {
                Some(Component::Normal(_)) => {
                    components.pop();
                }
                // ".." above the root is the root.
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => components.push(component),
            },
            _ => components.push(component),
        }
    }
    if components.is_empty() {
        return PathBuf::from(".");
    }
    components.iter().collect()
}

/// Canonicalize `path` against `base` if it is relative.
pub fn canon_join(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        canon_path(path)
    } else {
        canon_path(base.join(path))
    }
}

/// Format a path for a command line, quoting it if it contains spaces.
pub fn path_for_command(path: &Path) -> String {
    let s = path.to_string_lossy();
    if s.contains(' ') {
        format!("\"{}\"", s)
    } else {
        s.into_owned()
    }
}
