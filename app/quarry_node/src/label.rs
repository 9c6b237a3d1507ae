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
use std::sync::Arc;

use dupe::Dupe;

use crate::path::PathFragment;

#[derive(Debug, thiserror::Error)]
pub enum LabelParseError {
    #[error("label `{0}` must start with `//` or `@`")]
    NotAbsolute(String),
    #[error("label `{0}` has an empty target name")]
    EmptyName(String),
}

/// Name of the repository a package lives in. The empty name is the main
/// repository.
#[derive(Debug, Clone, Dupe, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct RepositoryName(Arc<str>);

impl RepositoryName {
    pub fn main() -> Self {
        Self(Arc::from(""))
    }

    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    pub fn is_main(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Identifies a package: the repository it lives in and its path below the
/// repository root.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct PackageId {
    repo: RepositoryName,
    path: PathFragment,
}

/// Path of the distinguished package holding external-workspace bindings.
/// Every package implicitly depends on it.
pub const EXTERNAL_PACKAGE_NAME: &str = "external";

impl PackageId {
    pub fn new(path: PathFragment) -> Self {
        Self {
            repo: RepositoryName::main(),
            path,
        }
    }

    pub fn in_repo(repo: RepositoryName, path: PathFragment) -> Self {
        Self { repo, path }
    }

    pub fn external() -> Self {
        Self::new(PathFragment::new(EXTERNAL_PACKAGE_NAME))
    }

    pub fn is_external(&self) -> bool {
        self.repo.is_main() && self.path.as_str() == EXTERNAL_PACKAGE_NAME
    }

    pub fn repo(&self) -> &RepositoryName {
        &self.repo
    }

    pub fn path(&self) -> &PathFragment {
        &self.path
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.repo.is_main() {
            write!(f, "//{}", self.path)
        } else {
            write!(f, "@{}//{}", self.repo.as_str(), self.path)
        }
    }
}

#[derive(Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
struct LabelData {
    package: PackageId,
    name: String,
}

/// A target address, unique within one query universe. Ordered lexically by
/// `(repository, package path, target name)`.
#[derive(Debug, Clone, Dupe, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct Label(Arc<LabelData>);

impl Label {
    pub fn new(package: PackageId, name: impl Into<String>) -> Self {
        Self(Arc::new(LabelData {
            package,
            name: name.into(),
        }))
    }

    /// Parses an absolute label of the form `//pkg:name`, `@repo//pkg:name`
    /// or `//pkg` (target name defaulting to the last package segment).
    pub fn parse(s: &str) -> Result<Label, LabelParseError> {
        let (repo, rest) = if let Some(rest) = s.strip_prefix('@') {
            match rest.split_once("//") {
                Some((repo, rest)) => (RepositoryName::new(repo), rest),
                None => return Err(LabelParseError::NotAbsolute(s.to_owned())),
            }
        } else if let Some(rest) = s.strip_prefix("//") {
            (RepositoryName::main(), rest)
        } else {
            return Err(LabelParseError::NotAbsolute(s.to_owned()));
        };

        let (pkg, name) = match rest.split_once(':') {
            Some((pkg, name)) => (PathFragment::new(pkg), name.to_owned()),
            None => {
                let pkg = PathFragment::new(rest);
                let name = pkg
                    .file_name()
                    .ok_or_else(|| LabelParseError::EmptyName(s.to_owned()))?
                    .to_owned();
                (pkg, name)
            }
        };
        if name.is_empty() {
            return Err(LabelParseError::EmptyName(s.to_owned()));
        }
        Ok(Label::new(PackageId::in_repo(repo, pkg), name))
    }

    pub fn package_id(&self) -> &PackageId {
        &self.0.package
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// A sibling label in the same package.
    pub fn sibling(&self, name: impl Into<String>) -> Label {
        Label::new(self.0.package.clone(), name)
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.0.package, self.0.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_forms() {
        let label = Label::parse("//a/b:c").unwrap();
        assert_eq!(label.package_id().path().as_str(), "a/b");
        assert_eq!(label.name(), "c");

        let default_name = Label::parse("//a/b").unwrap();
        assert_eq!(default_name.name(), "b");

        let external = Label::parse("@dist//x:y").unwrap();
        assert_eq!(external.package_id().repo().as_str(), "dist");
        assert_eq!(external.to_string(), "@dist//x:y");

        assert!(Label::parse("a:b").is_err());
        assert!(Label::parse("//a:").is_err());
    }

    #[test]
    fn test_ordering_is_lexical() {
        let a = Label::parse("//a:z").unwrap();
        let b = Label::parse("//a/b:a").unwrap();
        let c = Label::parse("//b:a").unwrap();
        let mut labels = vec![c.dupe(), b.dupe(), a.dupe()];
        labels.sort();
        assert_eq!(labels, vec![a, b, c]);
    }

    #[test]
    fn test_external_package() {
        assert!(PackageId::external().is_external());
        assert_eq!(PackageId::external().to_string(), "//external");
    }
}
