/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is dual-licensed under either the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree or the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree. You may select, at your option, one of the
 * above-listed licenses.
 */

use std::fmt;

/// A normalized, `/`-separated path relative to the workspace root.
///
/// The empty fragment is the workspace root itself. No leading or trailing
/// separators, no `.` segments.
#[derive(Debug, Clone, Default, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct PathFragment(String);

impl PathFragment {
    pub fn new(path: impl AsRef<str>) -> Self {
        let normalized = path
            .as_ref()
            .split('/')
            .filter(|segment| !segment.is_empty() && *segment != ".")
            .collect::<Vec<_>>()
            .join("/");
        Self(normalized)
    }

    pub fn empty() -> Self {
        Self(String::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The parent directory, or `None` for the workspace root.
    pub fn parent(&self) -> Option<PathFragment> {
        if self.0.is_empty() {
            return None;
        }
        match self.0.rfind('/') {
            Some(idx) => Some(PathFragment(self.0[..idx].to_owned())),
            None => Some(PathFragment::empty()),
        }
    }

    pub fn join(&self, segment: impl AsRef<str>) -> PathFragment {
        if self.0.is_empty() {
            PathFragment::new(segment)
        } else {
            PathFragment::new(format!("{}/{}", self.0, segment.as_ref()))
        }
    }

    pub fn file_name(&self) -> Option<&str> {
        if self.0.is_empty() {
            return None;
        }
        Some(match self.0.rfind('/') {
            Some(idx) => &self.0[idx + 1..],
            None => &self.0,
        })
    }

    /// Whether `prefix` is this path or an ancestor directory of it. The
    /// empty fragment is a prefix of everything.
    pub fn starts_with(&self, prefix: &PathFragment) -> bool {
        if prefix.0.is_empty() {
            return true;
        }
        self.0 == prefix.0
            || (self.0.len() > prefix.0.len()
                && self.0.starts_with(&prefix.0)
                && self.0.as_bytes()[prefix.0.len()] == b'/')
    }
}

impl fmt::Display for PathFragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A path relative to one of the package-path roots, together with that root.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct RootedPath {
    root: PathFragment,
    path: PathFragment,
}

impl RootedPath {
    pub fn new(root: PathFragment, path: PathFragment) -> Self {
        Self { root, path }
    }

    pub fn root(&self) -> &PathFragment {
        &self.root
    }

    pub fn path(&self) -> &PathFragment {
        &self.path
    }
}

impl fmt::Display for RootedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]/{}", self.root, self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization() {
        assert_eq!(PathFragment::new("/a/b/").as_str(), "a/b");
        assert_eq!(PathFragment::new("a//b").as_str(), "a/b");
        assert_eq!(PathFragment::new("./a/./b").as_str(), "a/b");
        assert!(PathFragment::new("").is_empty());
    }

    #[test]
    fn test_parent_walk_terminates_at_root() {
        let path = PathFragment::new("a/b/c");
        assert_eq!(path.parent(), Some(PathFragment::new("a/b")));
        assert_eq!(
            PathFragment::new("a").parent(),
            Some(PathFragment::empty())
        );
        assert_eq!(PathFragment::empty().parent(), None);
    }

    #[test]
    fn test_file_name_and_join() {
        let dir = PathFragment::new("a/b");
        assert_eq!(dir.join("BUILD").as_str(), "a/b/BUILD");
        assert_eq!(dir.file_name(), Some("b"));
        assert_eq!(PathFragment::empty().join("WORKSPACE").as_str(), "WORKSPACE");
        assert_eq!(PathFragment::empty().file_name(), None);
    }

    #[test]
    fn test_starts_with_is_directory_aware() {
        let path = PathFragment::new("foo/bar/baz");
        assert!(path.starts_with(&PathFragment::new("foo/bar")));
        assert!(path.starts_with(&PathFragment::empty()));
        assert!(path.starts_with(&path.clone()));
        assert!(!path.starts_with(&PathFragment::new("foo/ba")));
    }
}
