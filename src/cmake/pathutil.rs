//! Lexical path helpers
//!
//! CMake reports paths as plain strings. These helpers normalise and relate
//! them without touching the filesystem, so a path that does not exist yet
//! (generated files, install destinations) is handled the same way as an
//! existing one.

use std::path::{Component, Path, PathBuf};

/// Collapse `.` and `..` components without resolving symlinks
pub fn normpath(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    let mut parts: Vec<Component<'_>> = Vec::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(Component::Normal(_)) => {
                    parts.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => parts.push(component),
            },
            other => parts.push(other),
        }
    }

    if parts.is_empty() {
        return PathBuf::from(".");
    }
    parts.iter().collect()
}

/// Join `path` onto `base` unless it is already absolute, then normalise
pub fn join_norm(base: impl AsRef<Path>, path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    if path.is_absolute() {
        normpath(path)
    } else {
        normpath(base.as_ref().join(path))
    }
}

/// True if `path` lies inside `base` (or is `base`)
pub fn is_under(path: impl AsRef<Path>, base: impl AsRef<Path>) -> bool {
    normpath(path).starts_with(normpath(base))
}

/// Express `path` relative to `base`, inserting `..` as needed
pub fn relpath(path: impl AsRef<Path>, base: impl AsRef<Path>) -> PathBuf {
    let path = normpath(path);
    let base = normpath(base);

    let path_parts: Vec<Component<'_>> = path.components().collect();
    let base_parts: Vec<Component<'_>> = base.components().collect();
    let common = path_parts
        .iter()
        .zip(base_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut res = PathBuf::new();
    for _ in common..base_parts.len() {
        res.push("..");
    }
    for part in &path_parts[common..] {
        res.push(part.as_os_str());
    }

    if res.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        res
    }
}

/// Forward-slash rendering of a path
pub fn to_posix(path: impl AsRef<Path>) -> String {
    path.as_ref().to_string_lossy().replace('\\', "/")
}

pub fn basename(path: &str) -> &str {
    Path::new(path)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(path)
}

/// File name without its last extension
pub fn file_stem(path: &str) -> &str {
    let name = basename(path);
    match name.rfind('.') {
        Some(0) | None => name,
        Some(idx) => &name[..idx],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normpath() {
        assert_eq!(normpath("/a/./b/../c"), PathBuf::from("/a/c"));
        assert_eq!(normpath("a/../../b"), PathBuf::from("../b"));
        assert_eq!(normpath("/../a"), PathBuf::from("/a"));
        assert_eq!(normpath("./"), PathBuf::from("."));
    }

    #[test]
    fn test_relpath() {
        assert_eq!(relpath("/a/b/c", "/a"), PathBuf::from("b/c"));
        assert_eq!(relpath("/a/x", "/a/b/c"), PathBuf::from("../../x"));
        assert_eq!(relpath("/a/b", "/a/b"), PathBuf::from("."));
    }

    #[test]
    fn test_is_under() {
        assert!(is_under("/src/sub/file.c", "/src"));
        assert!(is_under("/src", "/src"));
        assert!(!is_under("/srcfoo/file.c", "/src"));
        assert!(!is_under("/src/../other", "/src"));
    }

    #[test]
    fn test_name_helpers() {
        assert_eq!(basename("/a/b/foo.cpp.o"), "foo.cpp.o");
        assert_eq!(file_stem("/a/b/foo.cpp.o"), "foo.cpp");
        assert_eq!(file_stem(".hidden"), ".hidden");
        assert_eq!(join_norm("/a/b", "../c"), PathBuf::from("/a/c"));
        assert_eq!(join_norm("/a/b", "/x/./y"), PathBuf::from("/x/y"));
    }
}
